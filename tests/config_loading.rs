mod common;
use crate::common::{asset_target, check_target, init_tracing};

use std::error::Error;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::{NamedTempFile, tempdir};

use procpipes::config::{load_and_validate, parse_duration};
use procpipes::context::{ContextFileMode, ScalarValue};
use procpipes::engine::{FallbackStrategy, MissingReportPolicy};
use procpipes::errors::PipesError;

type TestResult = Result<(), Box<dyn Error>>;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{contents}").unwrap();
    file
}

fn expect_config_error(contents: &str, needle: &str) {
    let file = write_config(contents);
    match load_and_validate(file.path()) {
        Err(PipesError::ConfigError(msg)) => {
            assert!(msg.contains(needle), "'{msg}' does not mention '{needle}'")
        }
        Err(e) => panic!("Expected ConfigError, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}

#[test]
fn full_config_is_loaded_and_validated() -> TestResult {
    init_tracing();

    let dir = tempdir()?;
    let path = dir.path().join("Pipes.toml");
    std::fs::write(
        &path,
        r#"
[runner]
timeout = "30s"
grace_period = "250ms"
stderr_limit_bytes = 1024
channel_capacity = 8
max_env_value_bytes = 4096
max_context_bytes = 8192
split_context = false
max_line_bytes = 65536
context_file = "fallback"
missing_report = "fatal"
require_close = true
data_version_fallback = "metadata-digest"

[invocation]
executable = "./bin/child.sh"
args = ["--flag", "value"]
cwd = "work"
run_id = "fixed-run"

[invocation.env]
EXTRA = "1"

[context.config]
limit = 10
ratio = 0.5
name = "orders"
dry = false

[context.provenance]
code_version = "v1"

[context.extras]
nested = { deep = [1, 2, 3] }

[[asset]]
key = ["materialize_subprocess"]

[[asset]]
key = "warehouse/orders"

[[check]]
asset = ["materialize_subprocess"]
name = "check_subprocess"
"#,
    )?;

    let cfg = load_and_validate(&path)?;

    assert_eq!(cfg.timeout, Some(Duration::from_secs(30)));
    assert_eq!(cfg.runner.grace_period, Duration::from_millis(250));
    assert_eq!(cfg.runner.stderr_limit_bytes, 1024);
    assert_eq!(cfg.runner.channel_capacity, 8);
    assert_eq!(cfg.runner.encoder.max_value_bytes, 4096);
    assert_eq!(cfg.runner.encoder.max_total_bytes, 8192);
    assert!(!cfg.runner.encoder.split);
    assert_eq!(cfg.runner.max_line_bytes, 65536);
    assert_eq!(cfg.runner.context_file, ContextFileMode::Fallback);
    assert_eq!(cfg.runner.missing_report, MissingReportPolicy::Fatal);
    assert!(cfg.runner.require_close);
    assert_eq!(cfg.runner.data_version_fallback, FallbackStrategy::MetadataDigest);

    assert_eq!(cfg.declared.len(), 3);
    assert!(cfg.declared.contains(&asset_target()));
    assert!(cfg.declared.contains(&check_target()));
    assert!(cfg.declared.contains(&procpipes::TargetId::asset("warehouse/orders")));

    assert_eq!(cfg.executable(), dir.path().join("./bin/child.sh"));
    assert_eq!(cfg.cwd(), Some(dir.path().join("work")));

    let ctx = cfg.build_context()?;
    assert_eq!(ctx.run_id(), "fixed-run");
    assert_eq!(ctx.config()["limit"], ScalarValue::Int(10));
    assert_eq!(ctx.config()["ratio"], ScalarValue::Float(0.5));
    assert_eq!(ctx.config()["name"], ScalarValue::from("orders"));
    assert_eq!(ctx.config()["dry"], ScalarValue::Bool(false));
    assert_eq!(ctx.provenance()["code_version"], "v1");
    assert_eq!(ctx.extras()["nested"]["deep"][2], 3);

    let invocation = cfg.build_invocation()?;
    assert_eq!(invocation.args.len(), 2);
    assert_eq!(invocation.env.get("EXTRA").map(String::as_str), Some("1"));
    assert_eq!(invocation.timeout, Some(Duration::from_secs(30)));
    assert_eq!(invocation.declared, cfg.declared);
    Ok(())
}

#[test]
fn defaults_apply_and_run_id_is_generated() -> TestResult {
    let file = write_config(
        r#"
[invocation]
executable = "python3"

[[asset]]
key = "a"
"#,
    );

    let cfg = load_and_validate(file.path())?;
    assert_eq!(cfg.timeout, None);
    assert_eq!(cfg.runner.grace_period, Duration::from_secs(5));
    assert_eq!(cfg.runner.stderr_limit_bytes, 64 * 1024);
    assert_eq!(cfg.runner.channel_capacity, 64);
    assert!(cfg.runner.encoder.split);
    assert_eq!(cfg.runner.missing_report, MissingReportPolicy::PerTarget);
    assert!(!cfg.runner.require_close);

    // Bare names are looked up on PATH, not next to the config file.
    assert_eq!(cfg.executable(), PathBuf::from("python3"));

    let first = cfg.build_context()?;
    let second = cfg.build_context()?;
    assert!(!first.run_id().is_empty());
    assert_ne!(first.run_id(), second.run_id());
    Ok(())
}

#[test]
fn config_without_targets_is_rejected() {
    expect_config_error(
        r#"
[invocation]
executable = "child"
"#,
        "at least one",
    );
}

#[test]
fn duplicate_targets_are_rejected() {
    expect_config_error(
        r#"
[invocation]
executable = "child"

[[asset]]
key = "a/b"

[[asset]]
key = ["a", "b"]
"#,
        "more than once",
    );

    expect_config_error(
        r#"
[invocation]
executable = "child"

[[check]]
asset = "a"
name = "c"

[[check]]
asset = "a"
name = "c"
"#,
        "more than once",
    );
}

#[test]
fn empty_executable_segments_and_names_are_rejected() {
    expect_config_error(
        r#"
[invocation]
executable = "  "

[[asset]]
key = "a"
"#,
        "executable",
    );

    expect_config_error(
        r#"
[invocation]
executable = "child"

[[asset]]
key = "a//b"
"#,
        "non-empty segments",
    );

    expect_config_error(
        r#"
[invocation]
executable = "child"

[[check]]
asset = "a"
name = ""
"#,
        "empty name",
    );
}

#[test]
fn bad_runner_values_are_rejected() {
    expect_config_error(
        r#"
[runner]
timeout = "0s"

[invocation]
executable = "child"

[[asset]]
key = "a"
"#,
        "timeout",
    );

    expect_config_error(
        r#"
[runner]
grace_period = "5 fortnights"

[invocation]
executable = "child"

[[asset]]
key = "a"
"#,
        "unsupported duration unit",
    );

    expect_config_error(
        r#"
[runner]
channel_capacity = 0

[invocation]
executable = "child"

[[asset]]
key = "a"
"#,
        "channel_capacity",
    );

    expect_config_error(
        r#"
[runner]
max_line_bytes = 0

[invocation]
executable = "child"

[[asset]]
key = "a"
"#,
        "max_line_bytes",
    );

    expect_config_error(
        r#"
[runner]
max_env_value_bytes = 4096
max_context_bytes = 1024

[invocation]
executable = "child"

[[asset]]
key = "a"
"#,
        "must not exceed",
    );
}

#[test]
fn unknown_policy_or_missing_invocation_is_a_toml_error() {
    let file = write_config(
        r#"
[runner]
missing_report = "sometimes"

[invocation]
executable = "child"

[[asset]]
key = "a"
"#,
    );
    assert!(matches!(
        load_and_validate(file.path()),
        Err(PipesError::TomlError(_))
    ));

    let file = write_config(
        r#"
[[asset]]
key = "a"
"#,
    );
    assert!(matches!(
        load_and_validate(file.path()),
        Err(PipesError::TomlError(_))
    ));
}

#[test]
fn parse_duration_accepts_supported_units() {
    assert_eq!(parse_duration("150ms"), Ok(Duration::from_millis(150)));
    assert_eq!(parse_duration(" 2s "), Ok(Duration::from_secs(2)));
    assert_eq!(parse_duration("3m"), Ok(Duration::from_secs(180)));
    assert_eq!(parse_duration("1h"), Ok(Duration::from_secs(3600)));
    assert!(parse_duration("").is_err());
    assert!(parse_duration("10").is_err());
    assert!(parse_duration("1.5s").is_err());
    assert!(parse_duration("5d").is_err());
}

#[tokio::test]
async fn demo_config_runs_end_to_end() -> TestResult {
    init_tracing();

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let cfg = load_and_validate(manifest_dir.join("demos/Pipes.toml"))?;
    assert_eq!(cfg.executable(), manifest_dir.join("demos/./child.sh"));

    // Run the script through `sh` so the executable bit does not matter.
    let mut invocation = cfg.build_invocation()?;
    invocation.args.insert(0, invocation.executable.clone().into_os_string());
    invocation.executable = PathBuf::from("sh");

    let runner = procpipes::exec::ProcessRunner::new(cfg.runner_options());
    let outcome = common::with_timeout(runner.run(&invocation)).await;

    assert!(outcome.is_success(), "{:?}", outcome.failure());
    assert!(outcome.check(&common::check_key()).is_some_and(|c| c.passed));
    assert_eq!(outcome.diagnostics().logs.len(), 2);
    Ok(())
}
