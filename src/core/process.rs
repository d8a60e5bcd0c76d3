//! Process execution utilities
//!
//! Helpers shared by every extractor invocation:
//! - Command construction from a program + leading arguments
//! - Bounded stderr draining on a background task
//! - Kill-and-reap termination of the child and its process group
//! - Short runs with an overall timeout (`--version` checks)

use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::core::error::AppError;
use crate::core::utils::tail_utf8;

/// Timeout for `--version` style checks
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for stderr to close once the child is gone
pub const STDERR_GRACE: Duration = Duration::from_secs(2);

/// Builds a command from `program_and_args` (the extractor command line) with
/// `args` appended. Stdin is closed and the child is killed if its handle is
/// dropped.
///
/// On unix the child leads a new process group, so helpers it starts (ffmpeg
/// for merges and HLS) can be killed together with it.
pub fn build_command(program_and_args: &[String], args: &[String]) -> Result<Command, AppError> {
    let (program, leading) = program_and_args
        .split_first()
        .ok_or_else(|| AppError::extraction("Extractor command is not configured"))?;

    let mut cmd = Command::new(program);
    cmd.args(leading)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);
    Ok(cmd)
}

/// Sends SIGKILL to the process group led by `child`.
///
/// Only signals while the child is unreaped (`Child::id` is `Some`), so the
/// group id cannot have been recycled.
#[cfg(unix)]
pub fn kill_process_group(child: &Child) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else { return };
    let Ok(raw) = i32::try_from(pid) else { return };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => log::warn!("Failed to kill process group {}: {}", pid, e),
    }
}

#[cfg(not(unix))]
pub fn kill_process_group(_child: &Child) {}

/// Keeps the last `limit` bytes written to it.
#[derive(Debug, Default)]
pub struct TailBuffer {
    buf: Vec<u8>,
    limit: usize,
    /// Bytes discarded from the front so far
    dropped: u64,
}

impl TailBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::with_capacity(limit.min(8 * 1024)),
            limit,
            dropped: 0,
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        if self.limit == 0 {
            self.dropped += data.len() as u64;
            return;
        }
        if data.len() >= self.limit {
            self.dropped += (self.buf.len() + data.len() - self.limit) as u64;
            self.buf.clear();
            self.buf.extend_from_slice(&data[data.len() - self.limit..]);
            return;
        }
        let overflow = (self.buf.len() + data.len()).saturating_sub(self.limit);
        if overflow > 0 {
            self.buf.drain(..overflow);
            self.dropped += overflow as u64;
        }
        self.buf.extend_from_slice(data);
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Lossy UTF-8 view of the kept tail.
    pub fn into_string(self) -> String {
        tail_utf8(&self.buf, self.limit)
    }
}

/// Reads `reader` to EOF on a background task, keeping only the last `limit`
/// bytes. The task ends when the child closes its stderr (exit or kill).
pub fn spawn_stderr_drain<R>(mut reader: R, limit: usize) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut tail = TailBuffer::new(limit);
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => tail.push(&chunk[..n]),
                Err(e) => {
                    log::debug!("stderr drain stopped: {}", e);
                    break;
                }
            }
        }
        if tail.dropped() > 0 {
            log::debug!("stderr drain discarded {} leading bytes", tail.dropped());
        }
        tail.into_string()
    })
}

/// Collects a drained stderr tail.
///
/// Gives up after `grace` (a grandchild may still hold the pipe open) and
/// tolerates a panicked drain task.
pub async fn collect_stderr(handle: Option<JoinHandle<String>>, grace: Duration) -> String {
    let Some(handle) = handle else {
        return String::new();
    };
    match tokio::time::timeout(grace, handle).await {
        Ok(Ok(tail)) => tail,
        Ok(Err(e)) => {
            log::warn!("stderr drain task failed: {}", e);
            String::new()
        }
        Err(_) => {
            log::warn!("stderr still open {}s after exit, giving up", grace.as_secs());
            String::new()
        }
    }
}

/// Kills `child` and its process group, then waits for the child so no zombie
/// is left.
pub async fn terminate(child: &mut Child) {
    let pid = child.id();
    // Before try_wait: a reaped child no longer identifies its group
    kill_process_group(child);
    match child.try_wait() {
        Ok(Some(_)) => return,
        Ok(None) => {}
        Err(e) => log::warn!("try_wait failed for pid {:?}: {}", pid, e),
    }
    if let Err(e) = child.kill().await {
        log::warn!("Failed to kill extractor pid {:?}: {}", pid, e);
    } else {
        log::debug!("Extractor pid {:?} killed and reaped", pid);
    }
}

/// Run an async Command with a timeout.
///
/// The child is spawned with `kill_on_drop`, so hitting the timeout kills it.
pub async fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> Result<Output, AppError> {
    cmd.kill_on_drop(true);
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(AppError::extraction(format!("Failed to launch extractor: {}", e))),
        Err(_) => Err(AppError::extraction(format!(
            "Process timed out after {}s",
            timeout.as_secs()
        ))),
    }
}
