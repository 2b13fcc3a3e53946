// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{PipesConfig, RawPipesConfig, RunnerSection};
use crate::context::EncoderOptions;
use crate::errors::{PipesError, Result};
use crate::exec::RunnerOptions;
use crate::types::{AssetKey, DeclaredTargets, TargetId};

impl TryFrom<RawPipesConfig> for PipesConfig {
    type Error = PipesError;

    fn try_from(raw: RawPipesConfig) -> std::result::Result<Self, Self::Error> {
        validate_invocation(&raw)?;
        let declared = collect_targets(&raw)?;
        let timeout = raw
            .runner
            .timeout
            .as_deref()
            .map(|t| parse_positive_duration("[runner].timeout", t))
            .transpose()?;
        let runner = runner_options(&raw.runner)?;

        Ok(PipesConfig::new_unchecked(
            runner,
            timeout,
            raw.invocation,
            raw.context,
            declared,
        ))
    }
}

fn validate_invocation(cfg: &RawPipesConfig) -> Result<()> {
    if cfg.invocation.executable.trim().is_empty() {
        return Err(PipesError::ConfigError(
            "[invocation].executable must not be empty".to_string(),
        ));
    }
    if let Some(run_id) = &cfg.invocation.run_id {
        if run_id.trim().is_empty() {
            return Err(PipesError::ConfigError(
                "[invocation].run_id must not be empty when set".to_string(),
            ));
        }
    }
    Ok(())
}

fn collect_targets(cfg: &RawPipesConfig) -> Result<DeclaredTargets> {
    let mut declared = DeclaredTargets::new();

    for entry in &cfg.assets {
        validate_key("[[asset]].key", &entry.key)?;
        if !declared.insert(TargetId::Asset(entry.key.clone())) {
            return Err(PipesError::ConfigError(format!(
                "asset '{}' is declared more than once",
                entry.key
            )));
        }
    }

    for entry in &cfg.checks {
        validate_key("[[check]].asset", &entry.asset)?;
        if entry.name.trim().is_empty() {
            return Err(PipesError::ConfigError(format!(
                "check on asset '{}' has an empty name",
                entry.asset
            )));
        }
        let target = TargetId::check(entry.asset.clone(), entry.name.clone());
        if !declared.insert(target) {
            return Err(PipesError::ConfigError(format!(
                "check '{}' on asset '{}' is declared more than once",
                entry.name, entry.asset
            )));
        }
    }

    if declared.is_empty() {
        return Err(PipesError::ConfigError(
            "config must declare at least one [[asset]] or [[check]]".to_string(),
        ));
    }

    Ok(declared)
}

fn validate_key(field: &str, key: &AssetKey) -> Result<()> {
    if key.is_empty() || key.segments().iter().any(|s| s.trim().is_empty()) {
        return Err(PipesError::ConfigError(format!(
            "{field} '{key}' must have only non-empty segments"
        )));
    }
    Ok(())
}

fn runner_options(section: &RunnerSection) -> Result<RunnerOptions> {
    let grace_period = parse_positive_duration("[runner].grace_period", &section.grace_period)?;

    for (field, value) in [
        ("stderr_limit_bytes", section.stderr_limit_bytes),
        ("channel_capacity", section.channel_capacity),
        ("max_line_bytes", section.max_line_bytes),
        ("max_env_value_bytes", section.max_env_value_bytes),
        ("max_context_bytes", section.max_context_bytes),
    ] {
        if value == 0 {
            return Err(PipesError::ConfigError(format!(
                "[runner].{field} must be >= 1 (got 0)"
            )));
        }
    }

    if section.max_env_value_bytes > section.max_context_bytes {
        return Err(PipesError::ConfigError(format!(
            "[runner].max_env_value_bytes ({}) must not exceed max_context_bytes ({})",
            section.max_env_value_bytes, section.max_context_bytes
        )));
    }

    Ok(RunnerOptions {
        grace_period,
        stderr_limit_bytes: section.stderr_limit_bytes,
        channel_capacity: section.channel_capacity,
        max_line_bytes: section.max_line_bytes,
        encoder: EncoderOptions {
            max_value_bytes: section.max_env_value_bytes,
            max_total_bytes: section.max_context_bytes,
            split: section.split_context,
        },
        context_file: section.context_file,
        missing_report: section.missing_report,
        require_close: section.require_close,
        data_version_fallback: section.data_version_fallback,
    })
}

fn parse_positive_duration(field: &str, value: &str) -> Result<Duration> {
    let duration =
        parse_duration(value).map_err(|e| PipesError::ConfigError(format!("{field}: {e}")))?;
    if duration.is_zero() {
        return Err(PipesError::ConfigError(format!(
            "{field} must be greater than zero"
        )));
    }
    Ok(duration)
}

/// Parse durations like `"500ms"`, `"30s"`, `"5m"` or `"1h"`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| format!("duration '{s}' is missing a unit suffix"))?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{num_part}': {e}"))?;

    match unit_part.trim().to_lowercase().as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value.saturating_mul(60))),
        "h" => Ok(Duration::from_secs(value.saturating_mul(60 * 60))),
        unit => Err(format!(
            "unsupported duration unit '{unit}'; expected ms, s, m, or h"
        )),
    }
}
