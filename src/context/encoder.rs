// src/context/encoder.rs

//! Environment-variable transport for [`ExecutionContext`].
//!
//! Each payload is `base64(zlib(json))`, decodable with nothing more than a
//! JSON parser, zlib and base64. Variables written:
//!
//! - `PIPES_CONTEXT`: `{"data": <context>}`; or, when split,
//!   `PIPES_CONTEXT_CHUNKS=n` plus `PIPES_CONTEXT_0 .. PIPES_CONTEXT_{n-1}`
//!   whose concatenation is the payload; or `{"path": <file>}` when the
//!   context was written to a JSON file (see [`prepare`]).
//! - `PIPES_MESSAGES`: where and how the child writes messages.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use base64::{Engine as _, engine::general_purpose};
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tempfile::TempPath;
use tracing::debug;

use crate::context::ExecutionContext;
use crate::errors::ContextError;
use crate::protocol::MARKER;

pub const CONTEXT_ENV_VAR: &str = "PIPES_CONTEXT";
pub const CONTEXT_CHUNKS_ENV_VAR: &str = "PIPES_CONTEXT_CHUNKS";
pub const MESSAGES_ENV_VAR: &str = "PIPES_MESSAGES";

/// Size policy for the encoded context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderOptions {
    /// Upper bound for any single variable value.
    pub max_value_bytes: usize,
    /// Upper bound for the whole encoded context.
    pub max_total_bytes: usize,
    /// Split an oversized context across numbered variables instead of
    /// failing.
    pub split: bool,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            // MAX_ARG_STRLEN on Linux.
            max_value_bytes: 128 * 1024,
            max_total_bytes: 1024 * 1024,
            split: true,
        }
    }
}

/// Exactly one of `data` (inline) or `path` (JSON file) is set.
#[derive(Debug, Serialize, Deserialize)]
struct ContextParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<ExecutionContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<PathBuf>,
}

/// When the context is written to a file instead of the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContextFileMode {
    /// Environment only; an oversized context is rejected.
    #[default]
    Never,
    /// Use a file only when the environment encoding is too large.
    Fallback,
    /// Always use a file.
    Always,
}

/// Tells the child where to write protocol messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagesParams {
    pub stdio: String,
    pub marker: String,
}

impl Default for MessagesParams {
    fn default() -> Self {
        Self {
            stdio: "stdout".to_string(),
            marker: MARKER.to_string(),
        }
    }
}

/// Variable assignments ready to be attached to a child's environment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EncodedContext {
    vars: Vec<(String, String)>,
}

impl EncodedContext {
    pub fn vars(&self) -> &[(String, String)] {
        &self.vars
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.iter().find(|(k, _)| *k == name).map(|(_, v)| v)
    }

    /// Whether the context payload was split across numbered variables.
    pub fn is_split(&self) -> bool {
        self.get(CONTEXT_CHUNKS_ENV_VAR).is_some()
    }

    pub fn total_bytes(&self) -> usize {
        self.vars.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl IntoIterator for EncodedContext {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.vars.into_iter()
    }
}

/// Encode `ctx` into environment variables, enforcing `options`.
///
/// Never truncates: an oversized context either gets split (if allowed and
/// within `max_total_bytes`) or fails with [`ContextError::TooLarge`].
pub fn encode(
    ctx: &ExecutionContext,
    options: &EncoderOptions,
) -> Result<EncodedContext, ContextError> {
    let payload = encode_payload(&ContextParams {
        data: Some(ctx.clone()),
        path: None,
    })?;
    let mut vars = Vec::new();

    if payload.len() > options.max_total_bytes {
        return Err(ContextError::TooLarge {
            variable: CONTEXT_ENV_VAR.to_string(),
            size: payload.len(),
            limit: options.max_total_bytes,
        });
    }

    if payload.len() <= options.max_value_bytes {
        vars.push((CONTEXT_ENV_VAR.to_string(), payload));
    } else if options.split && options.max_value_bytes > 0 {
        // base64 output is ASCII, so byte chunks are valid strings.
        let chunks: Vec<&str> = payload
            .as_bytes()
            .chunks(options.max_value_bytes)
            .map(|c| std::str::from_utf8(c).unwrap_or_default())
            .collect();
        vars.push((CONTEXT_CHUNKS_ENV_VAR.to_string(), chunks.len().to_string()));
        for (i, chunk) in chunks.iter().enumerate() {
            vars.push((format!("{CONTEXT_ENV_VAR}_{i}"), chunk.to_string()));
        }
    } else {
        return Err(ContextError::TooLarge {
            variable: CONTEXT_ENV_VAR.to_string(),
            size: payload.len(),
            limit: options.max_value_bytes,
        });
    }

    vars.push((
        MESSAGES_ENV_VAR.to_string(),
        encode_payload(&MessagesParams::default())?,
    ));

    Ok(EncodedContext { vars })
}

/// Decode the context from `(name, value)` pairs, e.g. `std::env::vars()`.
pub fn decode_env<I, K, V>(vars: I) -> Result<ExecutionContext, ContextError>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let vars: HashMap<String, String> = vars
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();

    let payload = match vars.get(CONTEXT_ENV_VAR) {
        Some(payload) => payload.clone(),
        None => join_chunks(&vars)?,
    };

    let params: ContextParams = decode_payload(&payload)?;
    match params {
        ContextParams {
            path: Some(path), ..
        } => read_context_file(&path),
        ContextParams {
            data: Some(data), ..
        } => Ok(data),
        _ => Err(ContextError::Decode {
            reason: "context params carry neither data nor path".to_string(),
        }),
    }
}

/// An encoded context plus the file backing it, if any.
///
/// The file is removed when this value is dropped, so keep it alive until
/// the child has exited.
#[derive(Debug)]
pub struct PreparedContext {
    encoded: EncodedContext,
    file: Option<TempPath>,
}

impl PreparedContext {
    pub fn encoded(&self) -> &EncodedContext {
        &self.encoded
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file.as_deref()
    }
}

/// Encode `ctx` for a launch, writing it to a temporary JSON file when
/// `mode` asks for it. With [`ContextFileMode::Fallback`] the file replaces
/// a [`ContextError::TooLarge`] from [`encode`].
pub fn prepare(
    ctx: &ExecutionContext,
    options: &EncoderOptions,
    mode: ContextFileMode,
) -> Result<PreparedContext, ContextError> {
    match mode {
        ContextFileMode::Never => Ok(PreparedContext {
            encoded: encode(ctx, options)?,
            file: None,
        }),
        ContextFileMode::Fallback => match encode(ctx, options) {
            Ok(encoded) => Ok(PreparedContext {
                encoded,
                file: None,
            }),
            Err(ContextError::TooLarge { size, .. }) => {
                debug!(size, "context too large for the environment; using a file");
                write_context_file(ctx)
            }
            Err(e) => Err(e),
        },
        ContextFileMode::Always => write_context_file(ctx),
    }
}

fn write_context_file(ctx: &ExecutionContext) -> Result<PreparedContext, ContextError> {
    let file_err = |e: std::io::Error| ContextError::File {
        reason: e.to_string(),
    };

    let file = tempfile::Builder::new()
        .prefix("pipes-context-")
        .suffix(".json")
        .tempfile()
        .map_err(file_err)?;
    let mut writer = BufWriter::new(file.as_file());
    serde_json::to_writer(&mut writer, ctx).map_err(|e| ContextError::File {
        reason: e.to_string(),
    })?;
    writer.flush().map_err(file_err)?;
    drop(writer);

    let path = file.into_temp_path();
    let payload = encode_payload(&ContextParams {
        data: None,
        path: Some(path.to_path_buf()),
    })?;
    let encoded = EncodedContext {
        vars: vec![
            (CONTEXT_ENV_VAR.to_string(), payload),
            (
                MESSAGES_ENV_VAR.to_string(),
                encode_payload(&MessagesParams::default())?,
            ),
        ],
    };

    Ok(PreparedContext {
        encoded,
        file: Some(path),
    })
}

fn read_context_file(path: &Path) -> Result<ExecutionContext, ContextError> {
    let file = File::open(path).map_err(|e| ContextError::Decode {
        reason: format!("cannot open context file {}: {e}", path.display()),
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| ContextError::Decode {
        reason: format!("invalid context file {}: {e}", path.display()),
    })
}

/// Decode the messages parameters from `(name, value)` pairs.
pub fn decode_messages_env<I, K, V>(vars: I) -> Result<MessagesParams, ContextError>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    let payload = vars
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .find(|(k, _)| k == MESSAGES_ENV_VAR)
        .map(|(_, v)| v)
        .ok_or_else(|| ContextError::Decode {
            reason: format!("{MESSAGES_ENV_VAR} is not set"),
        })?;
    decode_payload(&payload)
}

fn join_chunks(vars: &HashMap<String, String>) -> Result<String, ContextError> {
    let count: usize = vars
        .get(CONTEXT_CHUNKS_ENV_VAR)
        .ok_or_else(|| ContextError::Decode {
            reason: format!("neither {CONTEXT_ENV_VAR} nor {CONTEXT_CHUNKS_ENV_VAR} is set"),
        })?
        .trim()
        .parse()
        .map_err(|e| ContextError::Decode {
            reason: format!("invalid {CONTEXT_CHUNKS_ENV_VAR}: {e}"),
        })?;

    let mut payload = String::new();
    for i in 0..count {
        let name = format!("{CONTEXT_ENV_VAR}_{i}");
        let chunk = vars.get(&name).ok_or_else(|| ContextError::Decode {
            reason: format!("missing context chunk {name}"),
        })?;
        payload.push_str(chunk);
    }
    Ok(payload)
}

/// `base64(zlib(json(value)))`.
pub fn encode_payload<T: Serialize>(value: &T) -> Result<String, ContextError> {
    let json = serde_json::to_vec(value).map_err(|e| ContextError::InvalidValue {
        key: "context".to_string(),
        reason: e.to_string(),
    })?;

    let compress_err = |e: std::io::Error| ContextError::InvalidValue {
        key: "context".to_string(),
        reason: format!("compression failed: {e}"),
    };
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json).map_err(compress_err)?;
    let compressed = encoder.finish().map_err(compress_err)?;

    Ok(general_purpose::STANDARD.encode(compressed))
}

/// Inverse of [`encode_payload`].
pub fn decode_payload<T: DeserializeOwned>(payload: &str) -> Result<T, ContextError> {
    let decode_err = |reason: String| ContextError::Decode { reason };

    let compressed = general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| decode_err(format!("invalid base64: {e}")))?;

    let mut json = Vec::new();
    ZlibDecoder::new(compressed.as_slice())
        .read_to_end(&mut json)
        .map_err(|e| decode_err(format!("invalid zlib stream: {e}")))?;

    serde_json::from_slice(&json).map_err(|e| decode_err(format!("invalid JSON: {e}")))
}
