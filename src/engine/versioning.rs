// src/engine/versioning.rs

//! Fallback data versions for materializations reported without one.

use std::fmt;

use blake3::Hasher;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::reducer::MaterializationReport;
use crate::metadata::MetadataMap;
use crate::types::{AssetKey, DataVersion};

/// Supplies a data version when the child did not report one.
///
/// Implementations must be deterministic: the same report must always yield
/// the same version.
pub trait DataVersioner: Send + Sync + fmt::Debug {
    fn fallback_version(&self, report: &MaterializationReport) -> Option<DataVersion>;
}

/// Leaves the data version absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFallback;

impl DataVersioner for NoFallback {
    fn fallback_version(&self, _report: &MaterializationReport) -> Option<DataVersion> {
        None
    }
}

/// Hex blake3 digest of the asset key and metadata, rendered as canonical
/// JSON (object keys sorted).
#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataDigest;

impl DataVersioner for MetadataDigest {
    fn fallback_version(&self, report: &MaterializationReport) -> Option<DataVersion> {
        let canonical = DigestInput {
            asset_key: &report.asset_key,
            metadata: &report.metadata,
        };
        let bytes = match serde_json::to_vec(&canonical) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(asset = %report.asset_key, error = %e, "cannot render metadata for digest");
                return None;
            }
        };

        let mut hasher = Hasher::new();
        hasher.update(&bytes);
        Some(DataVersion::new(hasher.finalize().to_hex().to_string()))
    }
}

#[derive(Serialize)]
struct DigestInput<'a> {
    asset_key: &'a AssetKey,
    metadata: &'a MetadataMap,
}

/// Built-in strategies selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackStrategy {
    #[default]
    None,
    MetadataDigest,
}

impl FallbackStrategy {
    pub fn versioner(self) -> Box<dyn DataVersioner> {
        match self {
            FallbackStrategy::None => Box::new(NoFallback),
            FallbackStrategy::MetadataDigest => Box::new(MetadataDigest),
        }
    }
}
