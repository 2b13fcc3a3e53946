// src/lib.rs

pub mod cli;
pub mod config;
pub mod context;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod metadata;
pub mod protocol;
pub mod types;

use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::{PipesConfig, load_and_validate, parse_duration};
use crate::context::prepare;
use crate::engine::{Outcome, TargetReport};
use crate::exec::ProcessRunner;

pub use crate::context::{ExecutionContext, ScalarValue};
pub use crate::engine::{MissingReportPolicy, TargetOutcome};
pub use crate::errors::{ContextError, ExecutionError, OutcomeError, PipesError, ProtocolError};
pub use crate::exec::{Invocation, RunnerOptions, run};
pub use crate::metadata::MetadataValue;
pub use crate::types::{AssetKey, CheckKey, DataVersion, DeclaredTargets, Severity, TargetId};

/// High-level entry point used by `main.rs`.
///
/// Returns exit code 0 when every target succeeded and 1 otherwise. Errors
/// (bad config, bad flags) are mapped to exit code 2 by the caller.
pub async fn run_cli(args: CliArgs) -> Result<ExitCode> {
    let config_path = &args.config;
    let mut cfg = load_and_validate(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    if let Some(timeout) = &args.timeout {
        let timeout = parse_duration(timeout)
            .map_err(|e| anyhow::anyhow!("invalid --timeout: {e}"))?;
        if timeout.is_zero() {
            anyhow::bail!("invalid --timeout: must be greater than zero");
        }
        cfg.timeout = Some(timeout);
    }

    let invocation = cfg.build_invocation()?;

    if args.dry_run {
        print_dry_run(&cfg, &invocation)?;
        return Ok(ExitCode::SUCCESS);
    }

    let runner = ProcessRunner::new(cfg.runner_options());
    let outcome = runner.run(&invocation).await;
    info!(
        run_id = %outcome.run_id(),
        success = outcome.is_success(),
        "invocation finished"
    );

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }

    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    })
}

fn print_dry_run(cfg: &PipesConfig, invocation: &Invocation) -> Result<()> {
    println!("procpipes dry-run");
    println!("  executable: {}", invocation.executable.display());
    if !invocation.args.is_empty() {
        println!("  args: {:?}", invocation.args);
    }
    if let Some(cwd) = &invocation.cwd {
        println!("  cwd: {}", cwd.display());
    }
    println!("  run_id: {}", invocation.context.run_id());
    match invocation.timeout {
        Some(timeout) => println!("  timeout: {timeout:?}"),
        None => println!("  timeout: none"),
    }
    println!("  grace_period: {:?}", cfg.runner.grace_period);
    println!("  missing_report: {:?}", cfg.runner.missing_report);
    println!();

    println!("targets ({}):", invocation.declared.len());
    for target in invocation.declared.iter() {
        println!("  - {target}");
    }
    println!();

    let prepared = prepare(
        &invocation.context,
        &cfg.runner.encoder,
        cfg.runner.context_file,
    )?;
    if let Some(path) = prepared.file_path() {
        println!("context file: {} (removed after the run)", path.display());
    }
    let encoded = prepared.encoded();
    println!("environment ({} bytes):", encoded.total_bytes());
    for (name, value) in encoded.iter() {
        println!("  {name}: {} bytes", value.len());
    }
    for name in invocation.env.keys() {
        println!("  {name}: (from config)");
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}

fn print_outcome(outcome: &Outcome) {
    println!("run {}", outcome.run_id());
    for (target, result) in outcome.targets() {
        match result {
            Ok(TargetReport::Materialization(m)) => {
                let version = m
                    .data_version
                    .as_ref()
                    .map_or_else(|| "-".to_string(), ToString::to_string);
                println!(
                    "  ok    {target} (data_version: {version}, metadata: {} entries)",
                    m.metadata.len()
                );
            }
            Ok(TargetReport::Check(c)) => {
                let verdict = if c.passed { "passed" } else { "failed" };
                println!("  ok    {target} ({verdict}, severity {})", c.severity);
            }
            Err(err) => println!("  FAIL  {target}: {err}"),
        }
    }

    let diagnostics = outcome.diagnostics();
    if let Some(failure) = outcome.failure() {
        println!("invocation failed: {failure}");
    }
    if !diagnostics.custom_messages.is_empty() {
        println!("custom messages: {}", diagnostics.custom_messages.len());
    }
    if !diagnostics.stderr.is_empty() {
        println!("stderr:");
        for line in diagnostics.stderr.lines() {
            println!("  {line}");
        }
        if diagnostics.stderr_truncated {
            println!("  (earlier output truncated)");
        }
    }
}
