// src/logging.rs

//! Logging setup for `procpipes` using `tracing` + `tracing-subscriber`.
//!
//! The filter is chosen in this order:
//! 1. `--log-level` (one level for everything)
//! 2. `PIPES_LOG`, which takes full `EnvFilter` directives such as
//!    `procpipes::exec=debug,info`
//! 3. `info`
//!
//! Logs go to STDERR so that `--json` output on stdout stays machine-readable.

use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

pub const LOG_ENV_VAR: &str = "PIPES_LOG";

const DEFAULT_DIRECTIVE: &str = "info";

/// Install the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let env_value = std::env::var(LOG_ENV_VAR).ok();

    fmt()
        .with_env_filter(build_filter(cli_level, env_value.as_deref()))
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(())
}

/// The filter for a CLI level and a raw `PIPES_LOG` value. Directives that
/// do not parse fall back to `info`.
pub fn build_filter(cli_level: Option<LogLevel>, env_value: Option<&str>) -> EnvFilter {
    let directives = match (cli_level, env_value.map(str::trim)) {
        (Some(level), _) => level.as_directive(),
        (None, Some(value)) if !value.is_empty() => value,
        (None, _) => DEFAULT_DIRECTIVE,
    };

    EnvFilter::try_new(directives).unwrap_or_else(|e| {
        eprintln!("ignoring {LOG_ENV_VAR}={directives:?}: {e}");
        EnvFilter::new(DEFAULT_DIRECTIVE)
    })
}
