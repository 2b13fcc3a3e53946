mod common;
use crate::common::builders::{ASSET, ChildScript, lines, single_asset_context};
use crate::common::{asset_key, init_tracing, with_timeout};

use tokio::sync::oneshot;

use procpipes::exec::stream::capture_stderr;
use procpipes::exec::{ProcessRunner, RunnerOptions};
use procpipes::metadata::MetadataMap;
use procpipes::protocol::LogSource;

#[tokio::test]
async fn stderr_lines_are_cut_at_the_line_limit() {
    let mut input = b"short\n".to_vec();
    input.extend_from_slice(&[b'e'; 10_000]);
    input.extend_from_slice(b"\ntail");

    let (_stop_tx, stop_rx) = oneshot::channel();
    let captured = capture_stderr(input.as_slice(), 1024, 8, stop_rx).await;

    assert_eq!(captured.text, "short\neeeeeeee\ntail");
    assert!(captured.truncated);
}

#[tokio::test]
async fn stderr_within_limits_is_kept_verbatim() {
    let (_stop_tx, stop_rx) = oneshot::channel();
    let captured = capture_stderr(&b"one\r\ntwo\n"[..], 1024, 64, stop_rx).await;

    assert_eq!(captured.text, "one\ntwo\n");
    assert!(!captured.truncated);
}

#[tokio::test]
async fn child_flooding_one_line_is_bounded_by_max_line_bytes() {
    init_tracing();

    // 200 KiB without a newline, then a normal report.
    let script = ChildScript::new()
        .raw("head -c 204800 /dev/zero | tr '\\0' 'z'; echo")
        .raw("head -c 204800 /dev/zero | tr '\\0' 'w' >&2")
        .message(&lines::materialization(ASSET, Some("1"), MetadataMap::new()))
        .message(&lines::closed());

    let options = RunnerOptions {
        max_line_bytes: 4096,
        ..RunnerOptions::default()
    };
    let outcome = with_timeout(
        ProcessRunner::new(options).run(&script.invocation(single_asset_context("s1"))),
    )
    .await;

    assert!(outcome.is_success(), "{:?}", outcome.failure());
    assert!(outcome.materialization(&asset_key()).is_some());

    let diagnostics = outcome.diagnostics();
    let flood = diagnostics
        .logs
        .iter()
        .find(|r| r.source == LogSource::Stdout)
        .expect("flooded line kept as a log");
    assert!(flood.truncated);
    assert_eq!(flood.message.len(), 4096);

    assert!(diagnostics.stderr_truncated);
    assert_eq!(diagnostics.stderr.len(), 4096);
}
