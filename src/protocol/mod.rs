// src/protocol/mod.rs

//! Child-side wire protocol.
//!
//! The child writes one message per line on stdout. Lines starting with
//! [`MARKER`] carry a JSON object:
//!
//! ```text
//! __PIPES_MESSAGE__ {"__pipes_version":"0.1","kind":"closed","params":{}}
//! ```
//!
//! Every other line is plain log output.
//!
//! - [`message`] defines the typed messages and their payloads.
//! - [`reader`] turns a byte stream into a lazy sequence of messages.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod message;
pub mod reader;

pub use message::{
    CheckMessage, ChildException, Closed, CustomMessage, LogLevel, LogRecord, LogSource,
    MaterializationMessage, Opened, ProtocolMessage,
};
pub use reader::{
    DEFAULT_MAX_LINE_BYTES, LineInfo, MessageReader, parse_line, read_bounded_line,
};

/// Prefix that marks a protocol-framed stdout line.
pub const MARKER: &str = "__PIPES_MESSAGE__";

/// Protocol version written by [`ProtocolMessage::to_line`].
pub const PROTOCOL_VERSION: &str = "0.1";

/// Discriminant of a protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageKind {
    Log,
    Opened,
    ReportAssetMaterialization,
    ReportAssetCheck,
    ReportCustomMessage,
    Closed,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Log => "log",
            MessageKind::Opened => "opened",
            MessageKind::ReportAssetMaterialization => "report-asset-materialization",
            MessageKind::ReportAssetCheck => "report-asset-check",
            MessageKind::ReportCustomMessage => "report-custom-message",
            MessageKind::Closed => "closed",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
