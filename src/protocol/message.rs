// src/protocol/message.rs

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

use crate::metadata::MetadataMap;
use crate::protocol::{MARKER, MessageKind, PROTOCOL_VERSION};
use crate::types::{AssetKey, DataVersion, Severity};

/// A single decoded message, in the order the child emitted it.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolMessage {
    Log(LogRecord),
    Opened(Opened),
    Materialization(MaterializationMessage),
    Check(CheckMessage),
    Custom(CustomMessage),
    Closed(Closed),
}

impl ProtocolMessage {
    pub fn kind(&self) -> MessageKind {
        match self {
            ProtocolMessage::Log(_) => MessageKind::Log,
            ProtocolMessage::Opened(_) => MessageKind::Opened,
            ProtocolMessage::Materialization(_) => MessageKind::ReportAssetMaterialization,
            ProtocolMessage::Check(_) => MessageKind::ReportAssetCheck,
            ProtocolMessage::Custom(_) => MessageKind::ReportCustomMessage,
            ProtocolMessage::Closed(_) => MessageKind::Closed,
        }
    }

    /// `false` only for plain stdout lines that carried no marker.
    pub fn is_framed(&self) -> bool {
        !matches!(
            self,
            ProtocolMessage::Log(LogRecord {
                source: LogSource::Stdout,
                ..
            })
        )
    }

    /// Shorthand for a plain stdout line.
    pub fn stdout_line(line: impl Into<String>) -> Self {
        ProtocolMessage::Log(LogRecord {
            level: LogLevel::Info,
            message: line.into(),
            source: LogSource::Stdout,
            truncated: false,
        })
    }

    /// A plain stdout line that was cut at the line length limit.
    pub fn truncated_stdout_line(line: impl Into<String>) -> Self {
        ProtocolMessage::Log(LogRecord {
            level: LogLevel::Info,
            message: line.into(),
            source: LogSource::Stdout,
            truncated: true,
        })
    }

    /// Decode the `params` object of a framed message of the given kind.
    pub fn from_params(kind: MessageKind, params: Value) -> Result<Self, serde_json::Error> {
        // Kinds whose fields are all optional may omit params entirely.
        let params = match params {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };

        Ok(match kind {
            MessageKind::Log => {
                let log: LogParams = serde_json::from_value(params)?;
                ProtocolMessage::Log(LogRecord {
                    level: log.level,
                    message: log.message,
                    source: LogSource::Protocol,
                    truncated: false,
                })
            }
            MessageKind::Opened => ProtocolMessage::Opened(serde_json::from_value(params)?),
            MessageKind::ReportAssetMaterialization => {
                ProtocolMessage::Materialization(serde_json::from_value(params)?)
            }
            MessageKind::ReportAssetCheck => ProtocolMessage::Check(serde_json::from_value(params)?),
            MessageKind::ReportCustomMessage => {
                ProtocolMessage::Custom(serde_json::from_value(params)?)
            }
            MessageKind::Closed => ProtocolMessage::Closed(serde_json::from_value(params)?),
        })
    }

    fn params(&self) -> Value {
        let params = match self {
            ProtocolMessage::Log(record) => serde_json::to_value(LogParams {
                message: record.message.clone(),
                level: record.level,
            }),
            ProtocolMessage::Opened(p) => serde_json::to_value(p),
            ProtocolMessage::Materialization(p) => serde_json::to_value(p),
            ProtocolMessage::Check(p) => serde_json::to_value(p),
            ProtocolMessage::Custom(p) => serde_json::to_value(p),
            ProtocolMessage::Closed(p) => serde_json::to_value(p),
        };
        params.unwrap_or_default()
    }

    /// Render the message the way a child writes it to stdout (no trailing
    /// newline). Plain stdout lines are returned verbatim.
    pub fn to_line(&self) -> String {
        if let ProtocolMessage::Log(LogRecord {
            source: LogSource::Stdout,
            message,
            ..
        }) = self
        {
            return message.clone();
        }

        let envelope = json!({
            "__pipes_version": PROTOCOL_VERSION,
            "kind": self.kind(),
            "params": self.params(),
        });
        format!("{MARKER} {envelope}")
    }
}

/// Severity of a log record. Parsed case-insensitively; `WARNING` is
/// accepted for `WARN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DEBUG" | "TRACE" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" | "CRITICAL" => Ok(LogLevel::Error),
            other => Err(format!("invalid log level: {other}")),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        value.parse()
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// Where a log record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogSource {
    /// An unframed stdout line.
    Stdout,
    /// A framed `log` message.
    Protocol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
    pub source: LogSource,
    /// The line exceeded the reader's limit and `message` holds its head.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

#[derive(Serialize, Deserialize)]
struct LogParams {
    message: String,
    #[serde(default)]
    level: LogLevel,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Opened {
    #[serde(default, deserialize_with = "null_as_default")]
    pub extras: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MaterializationMessage {
    /// May be omitted when exactly one asset is declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_key: Option<AssetKey>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "non_empty_version"
    )]
    pub data_version: Option<DataVersion>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: MetadataMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckMessage {
    /// May be omitted when the check name alone identifies a declared check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_key: Option<AssetKey>,
    pub check_name: String,
    pub passed: bool,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, deserialize_with = "null_as_default")]
    pub metadata: MetadataMap,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CustomMessage {
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Closed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<ChildException>,
}

/// Structured error the child attaches to its `closed` message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChildException {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<ChildException>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stack: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub context: Vec<String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn non_empty_version<'de, D>(deserializer: D) -> Result<Option<DataVersion>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|v| !v.is_empty()).map(DataVersion::new))
}
