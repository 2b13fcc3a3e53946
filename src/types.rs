// src/types.rs

//! Target identities shared by the encoder, reducer and outcome builder.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize, Serializer};

/// Asset identity: an ordered sequence of path segments.
///
/// On the wire an asset key is accepted either as an array of segments
/// (`["raw", "orders"]`) or as a single `/`-separated string (`"raw/orders"`).
/// It is always written back as an array so that segments containing `/`
/// survive a round trip.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "AssetKeyRepr", into = "Vec<String>")]
pub struct AssetKey(Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum AssetKeyRepr {
    Segments(Vec<String>),
    Path(String),
}

impl From<AssetKeyRepr> for AssetKey {
    fn from(repr: AssetKeyRepr) -> Self {
        match repr {
            AssetKeyRepr::Segments(segments) => AssetKey(segments),
            AssetKeyRepr::Path(path) => AssetKey::parse(&path),
        }
    }
}

impl From<AssetKey> for Vec<String> {
    fn from(key: AssetKey) -> Self {
        key.0
    }
}

impl AssetKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        AssetKey(segments.into_iter().map(Into::into).collect())
    }

    /// Parse the `/`-separated user form, e.g. `"raw/orders"`.
    pub fn parse(path: &str) -> Self {
        AssetKey(path.split('/').map(str::to_string).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

impl From<&str> for AssetKey {
    fn from(path: &str) -> Self {
        AssetKey::parse(path)
    }
}

/// Check identity: check name plus the asset it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CheckKey {
    pub asset_key: AssetKey,
    #[serde(rename = "check_name")]
    pub name: String,
}

impl CheckKey {
    pub fn new(asset_key: impl Into<AssetKey>, name: impl Into<String>) -> Self {
        Self {
            asset_key: asset_key.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for CheckKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.asset_key, self.name)
    }
}

/// Something the orchestrator expects exactly one report about.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TargetId {
    Asset(AssetKey),
    Check(CheckKey),
}

impl TargetId {
    pub fn asset(key: impl Into<AssetKey>) -> Self {
        TargetId::Asset(key.into())
    }

    pub fn check(asset_key: impl Into<AssetKey>, name: impl Into<String>) -> Self {
        TargetId::Check(CheckKey::new(asset_key, name))
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetId::Asset(key) => write!(f, "asset {key}"),
            TargetId::Check(key) => write!(f, "check {key}"),
        }
    }
}

// Serialized as its display form so it can key JSON maps.
impl Serialize for TargetId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The set of targets registered with the runner before launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclaredTargets {
    targets: BTreeSet<TargetId>,
}

impl DeclaredTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_asset(mut self, key: impl Into<AssetKey>) -> Self {
        self.targets.insert(TargetId::asset(key));
        self
    }

    pub fn with_check(mut self, asset_key: impl Into<AssetKey>, name: impl Into<String>) -> Self {
        self.targets.insert(TargetId::check(asset_key, name));
        self
    }

    /// Returns `false` if the target was already declared.
    pub fn insert(&mut self, target: TargetId) -> bool {
        self.targets.insert(target)
    }

    pub fn contains(&self, target: &TargetId) -> bool {
        self.targets.contains(target)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TargetId> {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn assets(&self) -> impl Iterator<Item = &AssetKey> {
        self.targets.iter().filter_map(|t| match t {
            TargetId::Asset(key) => Some(key),
            TargetId::Check(_) => None,
        })
    }

    pub fn checks(&self) -> impl Iterator<Item = &CheckKey> {
        self.targets.iter().filter_map(|t| match t {
            TargetId::Check(key) => Some(key),
            TargetId::Asset(_) => None,
        })
    }

    /// The only declared asset, if exactly one is declared.
    pub fn sole_asset(&self) -> Option<&AssetKey> {
        let mut assets = self.assets();
        match (assets.next(), assets.next()) {
            (Some(key), None) => Some(key),
            _ => None,
        }
    }

    /// The owning asset of the only declared check named `name`, if unique.
    pub fn sole_check_asset(&self, name: &str) -> Option<&AssetKey> {
        let mut owners = self
            .checks()
            .filter(|c| c.name == name)
            .map(|c| &c.asset_key);
        match (owners.next(), owners.next()) {
            (Some(key), None) => Some(key),
            _ => None,
        }
    }
}

impl FromIterator<TargetId> for DeclaredTargets {
    fn from_iter<I: IntoIterator<Item = TargetId>>(iter: I) -> Self {
        Self {
            targets: iter.into_iter().collect(),
        }
    }
}

/// Severity attached to a check evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "WARN", alias = "warn", alias = "WARNING", alias = "warning")]
    Warn,
    #[default]
    #[serde(rename = "ERROR", alias = "error")]
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warn => f.write_str("WARN"),
            Severity::Error => f.write_str("ERROR"),
        }
    }
}

/// Opaque content-version token. Only ever compared for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataVersion(String);

impl DataVersion {
    pub fn new(value: impl Into<String>) -> Self {
        DataVersion(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DataVersion {
    fn from(value: &str) -> Self {
        DataVersion(value.to_string())
    }
}
