// src/engine/outcome.rs

//! Result builder.
//!
//! Combines the reduced message state with the process status into an
//! [`Outcome`]: exactly one entry per declared target, an optional
//! invocation-level failure, and diagnostics. Invocation-level failures are
//! resolved in a fixed order (first match wins):
//!
//! 1. the context could not be encoded
//! 2. the child could not be spawned
//! 3. the child timed out
//! 4. the message stream violated the protocol
//! 5. the child exited nonzero
//! 6. the child closed the stream with an exception
//!
//! Only when none of these apply is each target judged on its own report.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::engine::reducer::{CheckReport, MaterializationReport, ReducedState};
use crate::engine::versioning::{DataVersioner, NoFallback};
use crate::errors::{ContextError, ExecutionError, OutcomeError, ProtocolError};
use crate::metadata::MetadataMap;
use crate::protocol::{ChildException, LogRecord};
use crate::types::{AssetKey, CheckKey, DataVersion, DeclaredTargets, Severity, TargetId};

/// Where a materialization's data version came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataVersionSource {
    Reported,
    Fallback,
    Absent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaterializationResult {
    pub asset_key: AssetKey,
    pub data_version: Option<DataVersion>,
    pub data_version_source: DataVersionSource,
    pub metadata: MetadataMap,
}

/// A check evaluation. `passed == false` is still a successful report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckResult {
    pub check: CheckKey,
    pub passed: bool,
    pub severity: Severity,
    pub metadata: MetadataMap,
}

impl From<CheckReport> for CheckResult {
    fn from(report: CheckReport) -> Self {
        Self {
            check: report.check,
            passed: report.passed,
            severity: report.severity,
            metadata: report.metadata,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetReport {
    Materialization(MaterializationResult),
    Check(CheckResult),
}

pub type TargetOutcome = Result<TargetReport, OutcomeError>;

/// How the child process ended, as observed by the runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessStatus {
    /// `code` is absent when the child died from a signal.
    Exited { code: Option<i32>, success: bool },
    TimedOut { after: Duration },
    SpawnFailed { reason: String },
    /// The child was never launched.
    ContextRejected { error: ContextError },
}

/// Everything the runner knows about the process itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessReport {
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    /// Whether the runner had to terminate the child.
    pub terminated: bool,
    pub duration: Duration,
    pub stderr: String,
    pub stderr_truncated: bool,
}

impl ProcessReport {
    pub fn exited(code: Option<i32>) -> Self {
        Self::with_status(ProcessStatus::Exited {
            code,
            success: code == Some(0),
        })
    }

    pub fn with_status(status: ProcessStatus) -> Self {
        Self {
            status,
            pid: None,
            terminated: false,
            duration: Duration::ZERO,
            stderr: String::new(),
            stderr_truncated: false,
        }
    }

    pub fn stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    #[serde(flatten)]
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub terminated: bool,
    pub duration_ms: u64,
}

/// Side information attached to every outcome, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostics {
    pub logs: Vec<LogRecord>,
    pub stderr: String,
    pub stderr_truncated: bool,
    pub custom_messages: Vec<Value>,
    pub opened_extras: Option<BTreeMap<String, Value>>,
    pub child_exception: Option<ChildException>,
    pub closed: bool,
    pub exit: ExitInfo,
}

/// Terminal result of one invocation. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    run_id: String,
    targets: BTreeMap<TargetId, TargetOutcome>,
    failure: Option<OutcomeError>,
    diagnostics: Diagnostics,
}

impl Outcome {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn targets(&self) -> impl Iterator<Item = (&TargetId, &TargetOutcome)> {
        self.targets.iter()
    }

    pub fn get(&self, target: &TargetId) -> Option<&TargetOutcome> {
        self.targets.get(target)
    }

    /// Successful materialization result for `key`, if any.
    pub fn materialization(&self, key: &AssetKey) -> Option<&MaterializationResult> {
        match self.targets.get(&TargetId::Asset(key.clone())) {
            Some(Ok(TargetReport::Materialization(result))) => Some(result),
            _ => None,
        }
    }

    /// Successful check result for `key`, if any.
    pub fn check(&self, key: &CheckKey) -> Option<&CheckResult> {
        match self.targets.get(&TargetId::Check(key.clone())) {
            Some(Ok(TargetReport::Check(result))) => Some(result),
            _ => None,
        }
    }

    pub fn error_for(&self, target: &TargetId) -> Option<&OutcomeError> {
        self.targets.get(target).and_then(|r| r.as_ref().err())
    }

    /// Invocation-level failure, if any.
    pub fn failure(&self) -> Option<&OutcomeError> {
        self.failure.as_ref()
    }

    /// No invocation-level failure and every target succeeded.
    pub fn is_success(&self) -> bool {
        self.failure.is_none() && self.targets.values().all(Result::is_ok)
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }
}

#[derive(Serialize)]
struct TargetEntry<'a> {
    target: &'a TargetId,
    #[serde(flatten)]
    result: EntryResult<'a>,
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum EntryResult<'a> {
    Success { report: &'a TargetReport },
    Failed { error: &'a OutcomeError },
}

#[derive(Serialize)]
struct OutcomeRepr<'a> {
    run_id: &'a str,
    success: bool,
    failure: Option<&'a OutcomeError>,
    targets: Vec<TargetEntry<'a>>,
    diagnostics: &'a Diagnostics,
}

impl Serialize for Outcome {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let targets = self
            .targets
            .iter()
            .map(|(target, result)| TargetEntry {
                target,
                result: match result {
                    Ok(report) => EntryResult::Success { report },
                    Err(error) => EntryResult::Failed { error },
                },
            })
            .collect();

        OutcomeRepr {
            run_id: &self.run_id,
            success: self.is_success(),
            failure: self.failure.as_ref(),
            targets,
            diagnostics: &self.diagnostics,
        }
        .serialize(serializer)
    }
}

/// What to do when a declared target received no report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingReportPolicy {
    /// Only the silent target fails.
    #[default]
    PerTarget,
    /// The invocation fails too; reported targets keep their results.
    Fatal,
}

/// Builds an [`Outcome`] from reduced state and process status.
#[derive(Debug)]
pub struct OutcomeBuilder<'a> {
    run_id: String,
    declared: &'a DeclaredTargets,
    missing_report: MissingReportPolicy,
    require_close: bool,
    versioner: &'a dyn DataVersioner,
}

impl<'a> OutcomeBuilder<'a> {
    pub fn new(run_id: impl Into<String>, declared: &'a DeclaredTargets) -> Self {
        Self {
            run_id: run_id.into(),
            declared,
            missing_report: MissingReportPolicy::default(),
            require_close: false,
            versioner: &NoFallback,
        }
    }

    pub fn missing_report(mut self, policy: MissingReportPolicy) -> Self {
        self.missing_report = policy;
        self
    }

    /// Treat a stream that ends without `closed` as a protocol violation.
    pub fn require_close(mut self, require: bool) -> Self {
        self.require_close = require;
        self
    }

    pub fn versioner(mut self, versioner: &'a dyn DataVersioner) -> Self {
        self.versioner = versioner;
        self
    }

    pub fn build(self, mut state: ReducedState, process: ProcessReport) -> Outcome {
        let invocation_error = self.invocation_error(&state, &process);

        let mut targets = BTreeMap::new();
        let mut failure = invocation_error.clone();

        for target in self.declared.iter() {
            let result = match &invocation_error {
                Some(err) => Err(err.clone()),
                None => self.judge_target(target, &mut state),
            };

            if let Err(err) = &result {
                if invocation_error.is_none() {
                    debug!(run_id = %self.run_id, target = %target, error = %err, "target failed");
                    if self.missing_report == MissingReportPolicy::Fatal && failure.is_none() {
                        failure = Some(err.clone());
                    }
                }
            }
            targets.insert(target.clone(), result);
        }

        match &failure {
            Some(err) => warn!(run_id = %self.run_id, error = %err, "invocation failed"),
            None => info!(
                run_id = %self.run_id,
                targets = targets.len(),
                "invocation outcome built"
            ),
        }

        let diagnostics = Diagnostics {
            logs: state.logs,
            stderr: process.stderr,
            stderr_truncated: process.stderr_truncated,
            custom_messages: state.custom_messages,
            opened_extras: state.opened_extras,
            child_exception: state.exception,
            closed: state.closed,
            exit: ExitInfo {
                status: process.status,
                pid: process.pid,
                terminated: process.terminated,
                duration_ms: u64::try_from(process.duration.as_millis()).unwrap_or(u64::MAX),
            },
        };

        Outcome {
            run_id: self.run_id,
            targets,
            failure,
            diagnostics,
        }
    }

    fn invocation_error(
        &self,
        state: &ReducedState,
        process: &ProcessReport,
    ) -> Option<OutcomeError> {
        match &process.status {
            ProcessStatus::ContextRejected { error } => return Some(error.clone().into()),
            ProcessStatus::SpawnFailed { reason } => {
                return Some(
                    ExecutionError::SpawnFailed {
                        reason: reason.clone(),
                    }
                    .into(),
                );
            }
            ProcessStatus::TimedOut { after } => {
                return Some(ExecutionError::TimedOut { after: *after }.into());
            }
            ProcessStatus::Exited { .. } => {}
        }

        if let Some(violation) = &state.violation {
            return Some(violation.clone().into());
        }
        if self.require_close && !state.closed {
            return Some(ProtocolError::Unterminated.into());
        }

        if let ProcessStatus::Exited {
            code,
            success: false,
        } = &process.status
        {
            return Some(
                ExecutionError::NonZeroExit {
                    code: *code,
                    stderr: process.stderr.clone(),
                }
                .into(),
            );
        }

        state.exception.as_ref().map(|exception| {
            ExecutionError::ChildException {
                name: exception.name.clone(),
                message: exception.message.clone(),
            }
            .into()
        })
    }

    fn judge_target(&self, target: &TargetId, state: &mut ReducedState) -> TargetOutcome {
        let missing = || OutcomeError::MissingReport {
            target: target.clone(),
        };

        match target {
            TargetId::Asset(key) => state
                .materializations
                .remove(key)
                .map(|report| TargetReport::Materialization(self.materialization_result(report)))
                .ok_or_else(missing),
            TargetId::Check(key) => state
                .checks
                .remove(key)
                .map(|report| TargetReport::Check(report.into()))
                .ok_or_else(missing),
        }
    }

    fn materialization_result(&self, report: MaterializationReport) -> MaterializationResult {
        let (data_version, data_version_source) = match report.data_version.clone() {
            Some(version) => (Some(version), DataVersionSource::Reported),
            None => match self.versioner.fallback_version(&report) {
                Some(version) => (Some(version), DataVersionSource::Fallback),
                None => (None, DataVersionSource::Absent),
            },
        };

        MaterializationResult {
            asset_key: report.asset_key,
            data_version,
            data_version_source,
            metadata: report.metadata,
        }
    }
}
