//! Shared helpers for the `procpipes` integration tests.

pub mod builders;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use procpipes::logging::{LOG_ENV_VAR, build_filter};
use tracing_subscriber::fmt;

/// Upper bound for any single test that launches children.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

static INIT: Once = Once::new();

/// Install a test-writer subscriber once per test binary.
///
/// Uses the same filter rules as the binary, so `PIPES_LOG=procpipes=debug`
/// shows the runner's logs for failing tests (or all tests with
/// `--nocapture`). Defaults to `warn` to keep captured output short.
pub fn init_tracing() {
    INIT.call_once(|| {
        let env_value = std::env::var(LOG_ENV_VAR).ok();
        let filter = build_filter(None, env_value.as_deref().or(Some("warn")));

        let _ = fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}

/// Await `f`, panicking after [`TEST_TIMEOUT`] so a stuck child fails the
/// test instead of hanging the suite.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(TEST_TIMEOUT, f).await {
        Ok(value) => value,
        Err(_) => panic!("test did not finish within {TEST_TIMEOUT:?}"),
    }
}
