// src/exec/stream.rs

//! Per-stream tasks attached to a running child.

use std::time::Duration;

use tokio::io::{AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::errors::ProtocolError;
use crate::protocol::{MessageReader, ProtocolMessage, read_bounded_line};

pub type MessageItem = Result<ProtocolMessage, ProtocolError>;

/// Decode stdout line by line and forward every item to the reducer.
///
/// Stops at EOF, when the receiving side is gone, or when `stop` fires.
/// Returns the number of lines read.
pub async fn pump_stdout<R>(
    stdout: R,
    max_line_bytes: usize,
    tx: mpsc::Sender<MessageItem>,
    mut stop: oneshot::Receiver<()>,
) -> usize
where
    R: AsyncRead + Unpin,
{
    let mut reader = MessageReader::with_max_line_bytes(BufReader::new(stdout), max_line_bytes);

    loop {
        tokio::select! {
            _ = &mut stop => {
                debug!(lines = reader.lines_read(), "stdout reader stopped");
                break;
            }
            item = reader.next_message() => {
                let Some(item) = item else { break };
                if tx.send(item).await.is_err() {
                    debug!("message receiver dropped; stopping stdout reader");
                    break;
                }
            }
        }
    }

    reader.lines_read()
}

/// Stderr text captured from a child.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedStderr {
    pub text: String,
    /// Output was dropped to stay within the limits: earlier lines, or the
    /// tail of an over-long line.
    pub truncated: bool,
}

/// Consume stderr, logging each line at debug and keeping at most `limit`
/// bytes of the most recent output. Each line is cut at `max_line_bytes`.
pub async fn capture_stderr<R>(
    stderr: R,
    limit: usize,
    max_line_bytes: usize,
    mut stop: oneshot::Receiver<()>,
) -> CapturedStderr
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stderr);
    let mut kept: Vec<u8> = Vec::new();
    let mut line = Vec::new();
    let mut truncated = false;

    loop {
        line.clear();
        let info = tokio::select! {
            _ = &mut stop => break,
            read = read_bounded_line(&mut reader, &mut line, max_line_bytes) => {
                match read {
                    Ok(Some(info)) => info,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "failed reading child stderr");
                        break;
                    }
                }
            }
        };

        debug!(
            "stderr: {}",
            String::from_utf8_lossy(&line).trim_end_matches('\r')
        );
        if info.truncated {
            truncated = true;
        }
        kept.extend_from_slice(&line);
        if info.terminated {
            kept.push(b'\n');
        }
        if kept.len() > limit {
            let excess = kept.len() - limit;
            kept.drain(..excess);
            truncated = true;
        }
    }

    CapturedStderr {
        text: String::from_utf8_lossy(&kept).into_owned(),
        truncated,
    }
}

/// Ask the child to stop, then force it after `grace`.
///
/// On Unix the request is SIGTERM; elsewhere the child is killed
/// immediately.
pub async fn terminate(child: &mut Child, grace: Duration) {
    let Some(pid) = child.id() else {
        debug!("child already reaped; nothing to terminate");
        return;
    };

    match send_sigterm(pid) {
        Ok(()) => {
            info!(pid, grace_ms = grace.as_millis() as u64, "sent SIGTERM to child");
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(pid, exit_code = ?status.code(), "child exited after SIGTERM");
                    return;
                }
                Ok(Err(e)) => warn!(pid, error = %e, "failed waiting for child after SIGTERM"),
                Err(_) => warn!(pid, "child ignored SIGTERM within grace period"),
            }
        }
        Err(reason) => debug!(pid, %reason, "SIGTERM not delivered"),
    }

    info!(pid, "killing child process");
    if let Err(e) = child.kill().await {
        warn!(pid, error = %e, "failed to kill child process");
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> Result<(), String> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|_| format!("pid {pid} out of range"))?;
    kill(Pid::from_raw(raw), Signal::SIGTERM).map_err(|errno| errno.to_string())
}

#[cfg(not(unix))]
fn send_sigterm(_pid: u32) -> Result<(), String> {
    Err("signals are not supported on this platform".to_string())
}
