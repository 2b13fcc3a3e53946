mod common;
use crate::common::builders::{ASSET, ChildScript, lines, single_asset_context};
use crate::common::{asset_key, asset_target, init_tracing, with_timeout};

use std::error::Error;
use std::time::{Duration, Instant};

use procpipes::engine::ProcessStatus;
use procpipes::errors::{ExecutionError, OutcomeError};
use procpipes::exec::{ProcessRunner, RunnerOptions};
use procpipes::metadata::MetadataMap;
use procpipes::protocol::LogLevel;

type TestResult = Result<(), Box<dyn Error>>;

/// `kill -0` succeeds while the process exists.
async fn process_alive(pid: u32) -> bool {
    tokio::process::Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

#[tokio::test]
async fn sleeping_child_times_out_and_is_terminated() -> TestResult {
    init_tracing();

    let script = ChildScript::new()
        .message(&lines::log(LogLevel::Info, "about to sleep"))
        .message(&lines::materialization(ASSET, Some("1"), MetadataMap::new()))
        .exec_sleep(Duration::from_secs(10));
    let invocation = script
        .invocation(single_asset_context("t1"))
        .timeout(Some(Duration::from_millis(300)));

    let options = RunnerOptions {
        grace_period: Duration::from_secs(1),
        ..RunnerOptions::default()
    };

    let started = Instant::now();
    let outcome = with_timeout(ProcessRunner::new(options).run(&invocation)).await;
    assert!(started.elapsed() < Duration::from_secs(4));

    assert_eq!(
        outcome.error_for(&asset_target()),
        Some(&OutcomeError::Execution(ExecutionError::TimedOut {
            after: Duration::from_millis(300)
        }))
    );
    // Decoded messages survive the timeout as diagnostics only.
    assert!(outcome.materialization(&asset_key()).is_none());
    assert_eq!(outcome.diagnostics().logs.len(), 1);

    let exit = &outcome.diagnostics().exit;
    assert!(exit.terminated);
    assert!(matches!(exit.status, ProcessStatus::TimedOut { .. }));

    let pid = exit.pid.ok_or("child pid recorded")?;
    assert!(!process_alive(pid).await, "child {pid} still running");
    Ok(())
}

#[tokio::test]
async fn child_ignoring_sigterm_is_killed_after_grace_period() -> TestResult {
    init_tracing();

    let script = ChildScript::new()
        .raw("trap '' TERM")
        .stdout("ignoring SIGTERM")
        .raw("while :; do sleep 0.1; done");
    let invocation = script
        .invocation(single_asset_context("t2"))
        .timeout(Some(Duration::from_millis(200)));

    let options = RunnerOptions {
        grace_period: Duration::from_millis(300),
        ..RunnerOptions::default()
    };

    let outcome = with_timeout(ProcessRunner::new(options).run(&invocation)).await;

    assert!(matches!(
        outcome.failure(),
        Some(OutcomeError::Execution(ExecutionError::TimedOut { .. }))
    ));
    let pid = outcome.diagnostics().exit.pid.ok_or("child pid recorded")?;
    assert!(!process_alive(pid).await, "child {pid} still running");
    Ok(())
}

#[tokio::test]
async fn fast_child_is_unaffected_by_timeout() {
    init_tracing();

    let script = ChildScript::new()
        .message(&lines::materialization(ASSET, Some("1"), MetadataMap::new()))
        .message(&lines::closed());
    let invocation = script
        .invocation(single_asset_context("t3"))
        .timeout(Some(Duration::from_secs(5)));

    let outcome = with_timeout(ProcessRunner::default().run(&invocation)).await;
    assert!(outcome.is_success());
    assert!(!outcome.diagnostics().exit.terminated);
}

#[tokio::test]
async fn background_job_holding_stdout_does_not_delay_a_clean_exit() {
    init_tracing();

    // The backgrounded sleep inherits stdout and stderr and outlives the
    // child by several seconds.
    let script = ChildScript::new()
        .raw("sleep 3 &")
        .message(&lines::materialization(ASSET, Some("1.0"), MetadataMap::new()))
        .message(&lines::closed());

    for timeout in [Some(Duration::from_secs(1)), None] {
        let invocation = script
            .invocation(single_asset_context("t4"))
            .timeout(timeout);

        let started = Instant::now();
        let outcome = with_timeout(ProcessRunner::default().run(&invocation)).await;
        let elapsed = started.elapsed();

        assert!(outcome.is_success(), "{timeout:?}: {:?}", outcome.failure());
        assert!(outcome.materialization(&asset_key()).is_some());
        assert!(!outcome.diagnostics().exit.terminated);
        assert!(
            elapsed < Duration::from_secs(2),
            "{timeout:?}: run took {elapsed:?}"
        );
    }
}

#[tokio::test]
async fn timed_out_run_returns_soon_after_the_grace_period() {
    init_tracing();

    let script = ChildScript::new()
        .raw("sleep 4 &")
        .exec_sleep(Duration::from_secs(10));
    let invocation = script
        .invocation(single_asset_context("t5"))
        .timeout(Some(Duration::from_millis(200)));

    let options = RunnerOptions {
        grace_period: Duration::from_millis(500),
        ..RunnerOptions::default()
    };

    let started = Instant::now();
    let outcome = with_timeout(ProcessRunner::new(options).run(&invocation)).await;

    assert!(matches!(
        outcome.failure(),
        Some(OutcomeError::Execution(ExecutionError::TimedOut { .. }))
    ));
    // Timeout plus grace plus the stream idle windows, not the 4s job.
    assert!(started.elapsed() < Duration::from_secs(2));
}
