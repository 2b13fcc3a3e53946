#![allow(dead_code)]

use std::time::Duration;

use procpipes::context::ExecutionContext;
use procpipes::exec::Invocation;
use procpipes::protocol::ProtocolMessage;

pub const ASSET: &str = "materialize_subprocess";
pub const CHECK: &str = "check_subprocess";

/// Builder for a `sh -c` child that prints protocol lines, writes to stderr,
/// optionally sleeps, and exits with a chosen code.
#[derive(Debug, Clone, Default)]
pub struct ChildScript {
    commands: Vec<String>,
    exit_code: i32,
}

impl ChildScript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Print a protocol message the way a child library would.
    pub fn message(self, message: &ProtocolMessage) -> Self {
        self.stdout(&message.to_line())
    }

    /// Print several protocol messages in order.
    pub fn messages<'a>(mut self, messages: impl IntoIterator<Item = &'a ProtocolMessage>) -> Self {
        for message in messages {
            self = self.message(message);
        }
        self
    }

    /// Print a raw line on stdout.
    pub fn stdout(mut self, line: &str) -> Self {
        self.commands.push(format!("printf '%s\\n' {}", quote(line)));
        self
    }

    /// Print a raw line on stderr.
    pub fn stderr(mut self, line: &str) -> Self {
        self.commands
            .push(format!("printf '%s\\n' {} >&2", quote(line)));
        self
    }

    /// Append an arbitrary shell command.
    pub fn raw(mut self, command: &str) -> Self {
        self.commands.push(command.to_string());
        self
    }

    pub fn sleep(mut self, duration: Duration) -> Self {
        self.commands
            .push(format!("sleep {}", duration.as_secs_f64()));
        self
    }

    /// Replace the shell with `sleep`, so signals reach the sleeping process
    /// directly. Nothing after this runs.
    pub fn exec_sleep(mut self, duration: Duration) -> Self {
        self.commands
            .push(format!("exec sleep {}", duration.as_secs_f64()));
        self
    }

    pub fn exit(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    pub fn script(&self) -> String {
        let mut script = self.commands.join("\n");
        script.push_str(&format!("\nexit {}\n", self.exit_code));
        script
    }

    /// An invocation running this script under `sh -c`.
    pub fn invocation(&self, context: ExecutionContext) -> Invocation {
        Invocation::new("sh", context).arg("-c").arg(self.script())
    }
}

/// Single-quote `s` for `sh`.
fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Shorthands for building protocol messages.
pub mod lines {
    use procpipes::metadata::{MetadataMap, MetadataValue};
    use procpipes::protocol::{
        CheckMessage, ChildException, Closed, CustomMessage, LogLevel, LogRecord, LogSource,
        MaterializationMessage, Opened, ProtocolMessage,
    };
    use procpipes::types::{AssetKey, DataVersion, Severity};
    use serde_json::Value;

    pub fn log(level: LogLevel, message: &str) -> ProtocolMessage {
        ProtocolMessage::Log(LogRecord {
            level,
            message: message.to_string(),
            source: LogSource::Protocol,
            truncated: false,
        })
    }

    pub fn opened() -> ProtocolMessage {
        ProtocolMessage::Opened(Opened::default())
    }

    pub fn materialization(
        asset: &str,
        data_version: Option<&str>,
        metadata: MetadataMap,
    ) -> ProtocolMessage {
        ProtocolMessage::Materialization(MaterializationMessage {
            asset_key: Some(AssetKey::parse(asset)),
            data_version: data_version.map(DataVersion::from),
            metadata,
        })
    }

    /// Materialization without an asset key, relying on target resolution.
    pub fn anonymous_materialization(data_version: Option<&str>) -> ProtocolMessage {
        ProtocolMessage::Materialization(MaterializationMessage {
            asset_key: None,
            data_version: data_version.map(DataVersion::from),
            metadata: MetadataMap::new(),
        })
    }

    pub fn check(
        asset: &str,
        name: &str,
        passed: bool,
        severity: Severity,
        metadata: MetadataMap,
    ) -> ProtocolMessage {
        ProtocolMessage::Check(CheckMessage {
            asset_key: Some(AssetKey::parse(asset)),
            check_name: name.to_string(),
            passed,
            severity,
            metadata,
        })
    }

    pub fn custom(payload: Value) -> ProtocolMessage {
        ProtocolMessage::Custom(CustomMessage { payload })
    }

    pub fn closed() -> ProtocolMessage {
        ProtocolMessage::Closed(Closed::default())
    }

    pub fn closed_with_exception(name: &str, message: &str) -> ProtocolMessage {
        ProtocolMessage::Closed(Closed {
            exception: Some(ChildException {
                name: name.to_string(),
                message: message.to_string(),
                ..ChildException::default()
            }),
        })
    }

    /// `{"foo": text("bar")}`.
    pub fn foo_bar() -> MetadataMap {
        MetadataMap::from([("foo".to_string(), MetadataValue::text("bar"))])
    }
}

/// Context declaring the `materialize_subprocess` asset and its
/// `check_subprocess` check.
pub fn sample_context(run_id: &str) -> ExecutionContext {
    ExecutionContext::builder(run_id)
        .asset(ASSET)
        .check(ASSET, CHECK)
        .config("limit", 10_i64)
        .provenance("code_version", "v1")
        .build()
        .expect("sample context is valid")
}

/// Context declaring only the `materialize_subprocess` asset.
pub fn single_asset_context(run_id: &str) -> ExecutionContext {
    ExecutionContext::builder(run_id)
        .asset(ASSET)
        .build()
        .expect("single-asset context is valid")
}
