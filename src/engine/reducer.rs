// src/engine/reducer.rs

//! Pure message reducer.
//!
//! Folds the child's messages, strictly in arrival order, into a
//! [`ReducedState`]. It owns no channels and performs no IO, so it can be
//! driven directly from tests.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::errors::ProtocolError;
use crate::metadata::MetadataMap;
use crate::protocol::{
    CheckMessage, ChildException, LogLevel, LogRecord, LogSource, MaterializationMessage,
    MessageKind, ProtocolMessage,
};
use crate::types::{AssetKey, CheckKey, DataVersion, DeclaredTargets, Severity, TargetId};

/// First materialization reported for an asset.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializationReport {
    pub asset_key: AssetKey,
    pub data_version: Option<DataVersion>,
    pub metadata: MetadataMap,
}

impl MaterializationReport {
    /// The child materialized without supplying a data version.
    pub fn without_data_version(&self) -> bool {
        self.data_version.is_none()
    }
}

/// First evaluation reported for a check.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckReport {
    pub check: CheckKey,
    pub passed: bool,
    pub severity: Severity,
    pub metadata: MetadataMap,
}

/// Everything accumulated from one message stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReducedState {
    pub logs: Vec<LogRecord>,
    pub materializations: BTreeMap<AssetKey, MaterializationReport>,
    pub checks: BTreeMap<CheckKey, CheckReport>,
    pub custom_messages: Vec<Value>,
    pub opened_extras: Option<BTreeMap<String, Value>>,
    pub closed: bool,
    pub exception: Option<ChildException>,
    /// First protocol violation observed, if any.
    pub violation: Option<ProtocolError>,
    pub messages_seen: usize,
}

impl ReducedState {
    pub fn has_report(&self, target: &TargetId) -> bool {
        match target {
            TargetId::Asset(key) => self.materializations.contains_key(key),
            TargetId::Check(key) => self.checks.contains_key(key),
        }
    }
}

#[derive(Debug)]
pub struct Reducer {
    declared: DeclaredTargets,
    state: ReducedState,
}

impl Reducer {
    pub fn new(declared: DeclaredTargets) -> Self {
        Self {
            declared,
            state: ReducedState::default(),
        }
    }

    pub fn state(&self) -> &ReducedState {
        &self.state
    }

    pub fn finish(self) -> ReducedState {
        self.state
    }

    /// Feed one item from the reader: a decoded message or a decode error.
    pub fn ingest(&mut self, item: Result<ProtocolMessage, ProtocolError>) {
        let result = match item {
            Ok(message) => self.apply(message),
            Err(err) => {
                self.record_violation(err.clone());
                Err(err)
            }
        };
        if let Err(err) = result {
            debug!(error = %err, "protocol violation while reducing");
        }
    }

    /// Record a violation. Only the first one is kept.
    pub fn record_violation(&mut self, err: ProtocolError) {
        if self.state.violation.is_none() {
            warn!(error = %err, "child message stream violated the protocol");
            self.state.violation = Some(err);
        }
    }

    /// Apply a single message. Violations are recorded and also returned.
    pub fn apply(&mut self, message: ProtocolMessage) -> Result<(), ProtocolError> {
        self.state.messages_seen += 1;

        if self.state.closed && message.is_framed() {
            let err = ProtocolError::MessageAfterClose {
                kind: message.kind(),
            };
            self.record_violation(err.clone());
            return Err(err);
        }

        let result = match message {
            ProtocolMessage::Log(record) => {
                self.apply_log(record);
                Ok(())
            }
            // Reports after a violation cannot be trusted; logs above still
            // accumulate for diagnostics.
            _ if self.state.violation.is_some() => Ok(()),
            ProtocolMessage::Opened(opened) => {
                if self.state.opened_extras.is_none() {
                    self.state.opened_extras = Some(opened.extras);
                }
                Ok(())
            }
            ProtocolMessage::Materialization(msg) => self.apply_materialization(msg),
            ProtocolMessage::Check(msg) => self.apply_check(msg),
            ProtocolMessage::Custom(custom) => {
                self.state.custom_messages.push(custom.payload);
                Ok(())
            }
            ProtocolMessage::Closed(closed) => {
                self.state.closed = true;
                self.state.exception = closed.exception;
                debug!("child closed the message stream");
                Ok(())
            }
        };

        if let Err(err) = &result {
            self.record_violation(err.clone());
        }
        result
    }

    fn apply_log(&mut self, record: LogRecord) {
        if record.source == LogSource::Protocol {
            match record.level {
                LogLevel::Debug => debug!(child = true, "{}", record.message),
                LogLevel::Info => info!(child = true, "{}", record.message),
                LogLevel::Warn => warn!(child = true, "{}", record.message),
                LogLevel::Error => error!(child = true, "{}", record.message),
            }
        }
        self.state.logs.push(record);
    }

    fn apply_materialization(&mut self, msg: MaterializationMessage) -> Result<(), ProtocolError> {
        let asset_key = match msg.asset_key {
            Some(key) => key,
            None => self.declared.sole_asset().cloned().ok_or_else(|| {
                self.unresolved(
                    MessageKind::ReportAssetMaterialization,
                    "asset_key omitted but the declared asset is not unique",
                )
            })?,
        };

        self.admit(TargetId::Asset(asset_key.clone()))?;
        debug!(asset = %asset_key, "materialization reported");
        self.state.materializations.insert(
            asset_key.clone(),
            MaterializationReport {
                asset_key,
                data_version: msg.data_version,
                metadata: msg.metadata,
            },
        );
        Ok(())
    }

    fn apply_check(&mut self, msg: CheckMessage) -> Result<(), ProtocolError> {
        let asset_key = match msg.asset_key {
            Some(key) => key,
            None => self
                .declared
                .sole_check_asset(&msg.check_name)
                .cloned()
                .ok_or_else(|| {
                    self.unresolved(
                        MessageKind::ReportAssetCheck,
                        "asset_key omitted but the check name is not unique among declared checks",
                    )
                })?,
        };
        let check = CheckKey::new(asset_key, msg.check_name);

        self.admit(TargetId::Check(check.clone()))?;
        debug!(check = %check, passed = msg.passed, "check evaluation reported");
        self.state.checks.insert(
            check.clone(),
            CheckReport {
                check,
                passed: msg.passed,
                severity: msg.severity,
                metadata: msg.metadata,
            },
        );
        Ok(())
    }

    /// Reject undeclared and already-reported targets.
    fn admit(&self, target: TargetId) -> Result<(), ProtocolError> {
        if !self.declared.contains(&target) {
            Err(ProtocolError::UndeclaredTarget { target })
        } else if self.state.has_report(&target) {
            Err(ProtocolError::DuplicateReport { target })
        } else {
            Ok(())
        }
    }

    fn unresolved(&self, kind: MessageKind, reason: &str) -> ProtocolError {
        ProtocolError::UnresolvedTarget {
            kind,
            reason: reason.to_string(),
        }
    }
}
