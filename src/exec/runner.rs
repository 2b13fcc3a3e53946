// src/exec/runner.rs

//! Process runner: launches one child per invocation and turns everything
//! it does into an [`Outcome`].

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::context::{ContextFileMode, EncoderOptions, ExecutionContext, prepare};
use crate::engine::{
    DataVersioner, FallbackStrategy, MissingReportPolicy, Outcome, OutcomeBuilder, ProcessReport,
    ProcessStatus, ReducedState, Reducer,
};
use crate::exec::stream::{CapturedStderr, MessageItem, capture_stderr, pump_stdout, terminate};
use crate::protocol::DEFAULT_MAX_LINE_BYTES;
use crate::types::DeclaredTargets;

/// After the child is gone, how long a stream may stay quiet before the
/// runner stops reading it. Background jobs can inherit the pipes and hold
/// them open long after the child exited.
const STREAM_IDLE: Duration = Duration::from_millis(250);

/// Knobs shared by every invocation of a [`ProcessRunner`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerOptions {
    /// Time between SIGTERM and a forced kill.
    pub grace_period: Duration,
    /// Stderr bytes kept for diagnostics (most recent output wins).
    pub stderr_limit_bytes: usize,
    /// Capacity of the channel between the stdout reader and the reducer.
    pub channel_capacity: usize,
    /// Longest stdout or stderr line kept; the rest of the line is dropped.
    pub max_line_bytes: usize,
    pub encoder: EncoderOptions,
    /// When the context goes through a JSON file instead of the environment.
    pub context_file: ContextFileMode,
    pub missing_report: MissingReportPolicy,
    /// A stream without `closed` is a protocol violation.
    pub require_close: bool,
    pub data_version_fallback: FallbackStrategy,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            stderr_limit_bytes: 64 * 1024,
            channel_capacity: 64,
            max_line_bytes: DEFAULT_MAX_LINE_BYTES,
            encoder: EncoderOptions::default(),
            context_file: ContextFileMode::default(),
            missing_report: MissingReportPolicy::default(),
            require_close: false,
            data_version_fallback: FallbackStrategy::default(),
        }
    }
}

/// One child launch: what to run and what it is expected to report.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub executable: PathBuf,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub context: ExecutionContext,
    pub declared: DeclaredTargets,
    pub timeout: Option<Duration>,
}

impl Invocation {
    /// Declared targets default to the ones named in `context`.
    pub fn new(executable: impl Into<PathBuf>, context: ExecutionContext) -> Self {
        let declared = context.declared_targets();
        Self {
            executable: executable.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            context,
            declared,
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn declared(mut self, declared: DeclaredTargets) -> Self {
        self.declared = declared;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug)]
pub struct ProcessRunner {
    options: RunnerOptions,
    versioner: Box<dyn DataVersioner>,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(RunnerOptions::default())
    }
}

impl ProcessRunner {
    pub fn new(options: RunnerOptions) -> Self {
        let versioner = options.data_version_fallback.versioner();
        Self { options, versioner }
    }

    /// Replace the configured fallback strategy with a custom one.
    pub fn with_versioner(mut self, versioner: Box<dyn DataVersioner>) -> Self {
        self.versioner = versioner;
        self
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    /// Run the invocation to completion.
    ///
    /// Never fails: spawn errors, timeouts and protocol violations all end up
    /// inside the returned [`Outcome`].
    pub async fn run(&self, invocation: &Invocation) -> Outcome {
        let span = info_span!("invocation", run_id = %invocation.context.run_id());
        self.run_inner(invocation).instrument(span).await
    }

    async fn run_inner(&self, inv: &Invocation) -> Outcome {
        let started = Instant::now();
        let builder = OutcomeBuilder::new(inv.context.run_id(), &inv.declared)
            .missing_report(self.options.missing_report)
            .require_close(self.options.require_close)
            .versioner(self.versioner.as_ref());

        // The context file, if any, lives until this function returns.
        let prepared = match prepare(
            &inv.context,
            &self.options.encoder,
            self.options.context_file,
        ) {
            Ok(prepared) => prepared,
            Err(error) => {
                warn!(error = %error, "context rejected; child not launched");
                return builder.build(
                    ReducedState::default(),
                    ProcessReport::with_status(ProcessStatus::ContextRejected { error }),
                );
            }
        };
        let encoded = prepared.encoded();
        debug!(
            vars = encoded.vars().len(),
            bytes = encoded.total_bytes(),
            split = encoded.is_split(),
            file = ?prepared.file_path(),
            "context encoded"
        );

        let mut cmd = Command::new(&inv.executable);
        cmd.args(&inv.args)
            .envs(&inv.env)
            .envs(encoded.iter())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &inv.cwd {
            cmd.current_dir(cwd);
        }

        info!(
            executable = %inv.executable.display(),
            targets = inv.declared.len(),
            "starting child process"
        );

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let reason = format!("{}: {e}", inv.executable.display());
                warn!(error = %reason, "failed to spawn child process");
                let mut report =
                    ProcessReport::with_status(ProcessStatus::SpawnFailed { reason });
                report.duration = started.elapsed();
                return builder.build(ReducedState::default(), report);
            }
        };
        let pid = child.id();

        let (tx, mut rx) = mpsc::channel::<MessageItem>(self.options.channel_capacity.max(1));
        let stdout = match child.stdout.take() {
            Some(out) => {
                let (stop_tx, stop_rx) = oneshot::channel();
                let max_line = self.options.max_line_bytes;
                Some((tokio::spawn(pump_stdout(out, max_line, tx, stop_rx)), stop_tx))
            }
            None => {
                drop(tx);
                None
            }
        };
        let stderr = child.stderr.take().map(|err| {
            let (stop_tx, stop_rx) = oneshot::channel();
            let limit = self.options.stderr_limit_bytes;
            let max_line = self.options.max_line_bytes;
            (tokio::spawn(capture_stderr(err, limit, max_line, stop_rx)), stop_tx)
        });

        let mut reducer = Reducer::new(inv.declared.clone());

        // Reduce messages while waiting for the child itself; stdout EOF is
        // not required for the child to count as exited.
        let drive = async {
            let mut stdout_open = true;
            loop {
                tokio::select! {
                    item = rx.recv(), if stdout_open => match item {
                        Some(item) => reducer.ingest(item),
                        None => stdout_open = false,
                    },
                    exit = child.wait() => break exit,
                }
            }
        };
        let waited = match inv.timeout {
            Some(limit) => tokio::time::timeout(limit, drive).await.ok(),
            None => Some(drive.await),
        };

        let (status, terminated) = match waited {
            Some(Ok(exit)) => {
                info!(
                    pid,
                    exit_code = ?exit.code(),
                    success = exit.success(),
                    "child process exited"
                );
                (
                    ProcessStatus::Exited {
                        code: exit.code(),
                        success: exit.success(),
                    },
                    false,
                )
            }
            Some(Err(e)) => {
                warn!(pid, error = %e, "failed waiting for child process");
                (
                    ProcessStatus::Exited {
                        code: None,
                        success: false,
                    },
                    false,
                )
            }
            None => {
                let after = inv.timeout.unwrap_or_default();
                warn!(pid, timeout_ms = after.as_millis() as u64, "child process timed out");
                terminate(&mut child, self.options.grace_period).await;
                (ProcessStatus::TimedOut { after }, true)
            }
        };

        // Whatever the child wrote before exiting is still in the pipe or the
        // channel. Keep reducing until stdout goes quiet, bounded by the grace
        // period, then stop the pump.
        if let Some((handle, stop)) = stdout {
            let grace = self.options.grace_period;
            if tokio::time::timeout(grace, drain_until_idle(&mut rx, &mut reducer))
                .await
                .is_err()
            {
                debug!("stdout still busy after the grace period; stopping reader");
            }
            let _ = stop.send(());
            drain(&mut rx, &mut reducer).await;
            match handle.await {
                Ok(lines) => debug!(lines, "stdout closed"),
                Err(e) => warn!(error = %e, "stdout reader task failed"),
            }
        }

        let captured = collect_stderr(stderr, STREAM_IDLE).await;

        let state = reducer.finish();
        debug!(
            messages = state.messages_seen,
            closed = state.closed,
            "message stream reduced"
        );

        let report = ProcessReport {
            status,
            pid,
            terminated,
            duration: started.elapsed(),
            stderr: captured.text,
            stderr_truncated: captured.truncated,
        };
        builder.build(state, report)
    }
}

async fn drain(rx: &mut mpsc::Receiver<MessageItem>, reducer: &mut Reducer) {
    while let Some(item) = rx.recv().await {
        reducer.ingest(item);
    }
}

/// Like [`drain`], but returns once no item arrived for [`STREAM_IDLE`].
async fn drain_until_idle(rx: &mut mpsc::Receiver<MessageItem>, reducer: &mut Reducer) {
    while let Ok(Some(item)) = tokio::time::timeout(STREAM_IDLE, rx.recv()).await {
        reducer.ingest(item);
    }
}

/// Wait up to `wait` for stderr EOF after the child is gone; a descendant may
/// keep the pipe open, in which case capture stops with what was read so far.
async fn collect_stderr(
    task: Option<(JoinHandle<CapturedStderr>, oneshot::Sender<()>)>,
    wait: Duration,
) -> CapturedStderr {
    let Some((mut handle, stop)) = task else {
        return CapturedStderr::default();
    };

    match tokio::time::timeout(wait, &mut handle).await {
        Ok(Ok(captured)) => captured,
        Ok(Err(e)) => {
            warn!(error = %e, "stderr capture task failed");
            CapturedStderr::default()
        }
        Err(_) => {
            debug!("stderr still open after child exit; stopping capture");
            let _ = stop.send(());
            handle.await.unwrap_or_default()
        }
    }
}

/// Run `executable` with default options.
pub async fn run<I, S>(
    executable: impl Into<PathBuf>,
    args: I,
    context: ExecutionContext,
    declared: DeclaredTargets,
    timeout: Option<Duration>,
) -> Outcome
where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
{
    let invocation = Invocation::new(executable, context)
        .args(args)
        .declared(declared)
        .timeout(timeout);
    ProcessRunner::default().run(&invocation).await
}
