// src/protocol/reader.rs

//! Line classifier and lazy message reader over a child's stdout.

use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

use crate::errors::ProtocolError;
use crate::protocol::{MARKER, MessageKind, PROTOCOL_VERSION, ProtocolMessage};

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "__pipes_version", default)]
    version: Option<String>,
    kind: MessageKind,
    #[serde(default)]
    params: Value,
}

/// Classify and decode a single line (without its line terminator).
///
/// `line_no` is 1-based and only used for error reporting. Lines without
/// the marker become plain `log` messages; lines with the marker must decode
/// or the result is [`ProtocolError::Malformed`].
pub fn parse_line(line: &str, line_no: usize) -> Result<ProtocolMessage, ProtocolError> {
    match line.strip_prefix(MARKER) {
        Some(payload) => decode_framed(payload.trim_start(), line_no),
        None => Ok(ProtocolMessage::stdout_line(line)),
    }
}

fn decode_framed(payload: &str, line_no: usize) -> Result<ProtocolMessage, ProtocolError> {
    let malformed = |reason: String| ProtocolError::Malformed {
        line: line_no,
        reason,
    };

    let envelope: Envelope =
        serde_json::from_str(payload).map_err(|e| malformed(format!("invalid envelope: {e}")))?;

    if let Some(version) = envelope.version.as_deref() {
        if major(version) != major(PROTOCOL_VERSION) {
            warn!(
                line = line_no,
                child_version = %version,
                supported = PROTOCOL_VERSION,
                "child speaks a different protocol major version"
            );
        }
    }

    ProtocolMessage::from_params(envelope.kind, envelope.params)
        .map_err(|e| malformed(format!("invalid '{}' params: {e}", envelope.kind)))
}

fn major(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}

/// Longest stdout or stderr line kept by default (1 MiB).
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// Shape of one line read by [`read_bounded_line`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineInfo {
    /// The line ended with `\n` (as opposed to EOF).
    pub terminated: bool,
    /// Bytes past the limit were discarded.
    pub truncated: bool,
}

/// Read one line into `buf` without its `\n` (or `\r\n`), keeping at most `limit`
/// bytes. The rest of an over-long line is consumed and dropped, so memory
/// stays bounded no matter what the child writes. Returns `None` at EOF.
pub async fn read_bounded_line<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    limit: usize,
) -> std::io::Result<Option<LineInfo>>
where
    R: AsyncBufRead + Unpin,
{
    let mut consumed_any = false;
    let mut truncated = false;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(consumed_any.then_some(LineInfo {
                terminated: false,
                truncated,
            }));
        }

        let newline = available.iter().position(|b| *b == b'\n');
        let content = match newline {
            Some(i) => available[..i].strip_suffix(b"\r").unwrap_or(&available[..i]),
            None => available,
        };
        let room = limit.saturating_sub(buf.len());
        if content.len() > room {
            truncated = true;
        }
        buf.extend_from_slice(&content[..content.len().min(room)]);

        let used = newline.map_or(available.len(), |i| i + 1);
        reader.consume(used);
        consumed_any = true;

        if newline.is_some() {
            return Ok(Some(LineInfo {
                terminated: true,
                truncated,
            }));
        }
    }
}

/// Lazy, single-pass reader over a child's stdout.
///
/// Each call to [`next_message`](Self::next_message) reads one line and
/// yields the decoded message, or `None` once the stream is closed. The
/// reader is tied to one live stream and cannot be restarted.
///
/// Lines longer than the limit are cut: a framed one is malformed, a plain
/// one becomes a log record flagged `truncated`.
#[derive(Debug)]
pub struct MessageReader<R> {
    inner: R,
    buf: Vec<u8>,
    line_no: usize,
    max_line_bytes: usize,
    done: bool,
}

impl<R: AsyncBufRead + Unpin> MessageReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_max_line_bytes(inner, DEFAULT_MAX_LINE_BYTES)
    }

    pub fn with_max_line_bytes(inner: R, max_line_bytes: usize) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            line_no: 0,
            max_line_bytes,
            done: false,
        }
    }

    /// Number of lines consumed so far.
    pub fn lines_read(&self) -> usize {
        self.line_no
    }

    pub async fn next_message(&mut self) -> Option<Result<ProtocolMessage, ProtocolError>> {
        if self.done {
            return None;
        }

        self.buf.clear();
        let info = match read_bounded_line(&mut self.inner, &mut self.buf, self.max_line_bytes).await
        {
            Ok(Some(info)) => info,
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(e) => {
                warn!(error = %e, "failed reading child stdout; treating as end of stream");
                self.done = true;
                return None;
            }
        };

        self.line_no += 1;
        let line = self.buf.strip_suffix(b"\r").unwrap_or(&self.buf[..]);

        if line.starts_with(MARKER.as_bytes()) {
            if info.truncated {
                return Some(Err(ProtocolError::Malformed {
                    line: self.line_no,
                    reason: format!("framed line exceeds {} bytes", self.max_line_bytes),
                }));
            }
            let decoded = match std::str::from_utf8(line) {
                Ok(text) => parse_line(text, self.line_no),
                Err(e) => Err(ProtocolError::Malformed {
                    line: self.line_no,
                    reason: format!("framed line is not valid UTF-8: {e}"),
                }),
            };
            return Some(decoded);
        }

        let text = String::from_utf8_lossy(line).into_owned();
        if info.truncated {
            warn!(
                line = self.line_no,
                limit = self.max_line_bytes,
                "stdout line too long; keeping its head"
            );
            return Some(Ok(ProtocolMessage::truncated_stdout_line(text)));
        }
        debug!(line = self.line_no, "stdout: {}", text);
        Some(Ok(ProtocolMessage::stdout_line(text)))
    }
}
