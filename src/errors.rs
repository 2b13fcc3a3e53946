// src/errors.rs

//! Crate-wide error types.
//!
//! [`PipesError`] covers operational failures (config, IO, encoding) that are
//! returned as `Err`. The invocation taxonomy ([`ContextError`],
//! [`ProtocolError`], [`ExecutionError`], unified as [`OutcomeError`]) is
//! never returned as `Err` from a run; it is carried inside the `Outcome`.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::protocol::MessageKind;
use crate::types::TargetId;

#[derive(Error, Debug)]
pub enum PipesError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PipesError>;

/// Failures while encoding or decoding the execution context.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum ContextError {
    #[error("context variable {variable} is {size} bytes, exceeding the limit of {limit} bytes")]
    TooLarge {
        variable: String,
        size: usize,
        limit: usize,
    },

    #[error("invalid context value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("failed to decode context: {reason}")]
    Decode { reason: String },

    #[error("failed to write context file: {reason}")]
    File { reason: String },
}

/// The child's message stream did not conform to the protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum ProtocolError {
    #[error("malformed protocol message on line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("duplicate report for {target}")]
    DuplicateReport { target: TargetId },

    #[error("'{kind}' message received after 'closed'")]
    MessageAfterClose { kind: MessageKind },

    #[error("report for undeclared {target}")]
    UndeclaredTarget { target: TargetId },

    #[error("cannot resolve the target of a '{kind}' message: {reason}")]
    UnresolvedTarget { kind: MessageKind, reason: String },

    #[error("message stream ended without a 'closed' message")]
    Unterminated,
}

/// Process-level failures. These take precedence over anything the child
/// reported on stdout.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "error", rename_all = "snake_case")]
pub enum ExecutionError {
    #[error("child process {}", describe_exit(.code))]
    NonZeroExit { code: Option<i32>, stderr: String },

    #[error("child process timed out after {after:?}")]
    TimedOut { after: Duration },

    #[error("failed to spawn child process: {reason}")]
    SpawnFailed { reason: String },

    #[error("child reported exception {name}: {message}")]
    ChildException { name: String, message: String },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with code {code}"),
        None => "was terminated by a signal".to_string(),
    }
}

/// Per-target (or invocation-level) failure carried by an `Outcome`.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum OutcomeError {
    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("no report received for declared {target}")]
    MissingReport { target: TargetId },

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl OutcomeError {
    pub fn is_missing_report(&self) -> bool {
        matches!(self, OutcomeError::MissingReport { .. })
    }

    pub fn as_protocol(&self) -> Option<&ProtocolError> {
        match self {
            OutcomeError::Protocol(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_execution(&self) -> Option<&ExecutionError> {
        match self {
            OutcomeError::Execution(e) => Some(e),
            _ => None,
        }
    }
}
