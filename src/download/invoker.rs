//! Extraction Invoker
//!
//! Launches the extractor from a discrete argument vector and supervises it in
//! one of three modes:
//! - file: output materialized into a [`TempArtifact`], overall timeout
//! - stream: stdout relayed in bounded chunks through a bounded channel
//! - metadata: `--dump-json` lines consumed by [`FormatLines`](super::FormatLines)
//!
//! Every job owns its child process. Whatever ends the job (exit, timeout,
//! failure, the caller going away) the child is killed if still running and
//! reaped.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::process::{Child, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use url::Url;

use crate::core::config::{extraction, ServerConfig};
use crate::core::error::{AppError, AppResult};
use crate::core::metrics::{self, ActiveJobGuard};
use crate::core::process::{self, STDERR_GRACE};
use crate::core::utils::redact_url;
use crate::download::job::JobLifecycle;
use crate::download::scratch::TempArtifact;
use crate::download::ytdlp_errors::failure_message;

/// Settings shared by every job.
#[derive(Debug, Clone)]
pub struct InvokerSettings {
    /// Extractor program followed by its leading arguments
    pub extractor: Vec<String>,
    /// Overall limit for file-mode and metadata runs
    pub job_timeout: Duration,
    /// Longest silence on stdout tolerated while streaming
    pub stream_idle_timeout: Duration,
    /// Tail of stderr kept per job
    pub stderr_limit_bytes: usize,
}

impl From<&ServerConfig> for InvokerSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            extractor: config.extractor.clone(),
            job_timeout: config.job_timeout,
            stream_idle_timeout: config.stream_idle_timeout,
            stderr_limit_bytes: config.stderr_limit_bytes,
        }
    }
}

/// Arguments for a retrieval run writing to `target` (a path template or `-`).
pub fn retrieval_args(format: &str, target: &str, url: &Url) -> Vec<String> {
    vec![
        "--no-playlist".to_string(),
        "--no-progress".to_string(),
        "--no-part".to_string(),
        "-f".to_string(),
        format.to_string(),
        "-o".to_string(),
        target.to_string(),
        "--".to_string(),
        url.as_str().to_string(),
    ]
}

/// Arguments for a metadata-only run.
pub fn metadata_args(url: &Url) -> Vec<String> {
    vec![
        "--dump-json".to_string(),
        "--skip-download".to_string(),
        "--no-playlist".to_string(),
        "--no-warnings".to_string(),
        "--".to_string(),
        url.as_str().to_string(),
    ]
}

/// Owner of one running extractor process.
///
/// Dropping a job that has not reached a terminal state marks it `Cancelled`,
/// kills the child and reaps it on a background task.
#[derive(Debug)]
pub struct ExtractionJob {
    child: Option<Child>,
    stderr: Option<JoinHandle<String>>,
    lifecycle: Arc<JobLifecycle>,
    label: String,
    _active: ActiveJobGuard,
}

impl ExtractionJob {
    pub fn lifecycle(&self) -> &Arc<JobLifecycle> {
        &self.lifecycle
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }

    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.as_mut().and_then(|child| child.stdout.take())
    }

    /// Waits for the child to exit. On timeout the child is killed and reaped
    /// and the reason is returned.
    pub async fn wait(&mut self, timeout: Duration) -> Result<ExitStatus, String> {
        let Some(child) = self.child.as_mut() else {
            return Err("Extractor process is gone".to_string());
        };
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(e)) => {
                process::terminate(child).await;
                Err(format!("Failed to wait for extractor: {}", e))
            }
            Err(_) => {
                log::warn!(
                    "Extractor for {} timed out after {}s, killing",
                    self.label,
                    timeout.as_secs()
                );
                process::terminate(child).await;
                Err(format!("Extractor timed out after {}s", timeout.as_secs()))
            }
        }
    }

    /// Kills the child if it is still running and reaps it.
    pub async fn kill(&mut self) {
        if let Some(child) = self.child.as_mut() {
            process::terminate(child).await;
        }
    }

    pub async fn stderr_tail(&mut self) -> String {
        process::collect_stderr(self.stderr.take(), STDERR_GRACE).await
    }

    /// Marks the job `Failed`, logs the full stderr tail for the operator and
    /// builds the caller-facing error. Without an explicit `reason` the
    /// message is derived from stderr.
    pub async fn fail(&mut self, status: Option<ExitStatus>, reason: Option<String>) -> AppError {
        self.lifecycle.fail();
        let stderr = self.stderr_tail().await;
        log::error!(
            "Extraction failed for {} (exit code {:?}, {}). stderr:\n{}",
            self.label,
            status.and_then(|s| s.code()),
            reason.as_deref().unwrap_or("non-zero exit"),
            stderr
        );
        let message = reason.unwrap_or_else(|| failure_message(&stderr, extraction::PUBLIC_EXCERPT_CHARS));
        AppError::extraction(message)
    }

    /// Marks the job `Cancelled` unless it already settled. Returns whether
    /// this call made the transition.
    pub fn mark_cancelled(&self) -> bool {
        if !self.lifecycle.cancel() {
            return false;
        }
        let cancelled = AppError::Cancelled;
        log::info!("Extraction for {}: {}", self.label, cancelled);
        metrics::record_failure("extraction", cancelled.kind());
        true
    }

    /// Marks the job `Completed` and logs whatever the extractor said on stderr.
    pub async fn complete(&mut self) {
        self.lifecycle.complete();
        let stderr = self.stderr_tail().await;
        if !stderr.trim().is_empty() {
            log::debug!("Extractor stderr for {}:\n{}", self.label, stderr);
        }
    }
}

impl Drop for ExtractionJob {
    fn drop(&mut self) {
        self.mark_cancelled();
        let Some(mut child) = self.child.take() else { return };
        process::kill_process_group(&child);
        if !matches!(child.try_wait(), Ok(None)) {
            return;
        }
        if let Err(e) = child.start_kill() {
            log::warn!("Failed to kill extractor pid {:?}: {}", child.id(), e);
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = child.wait().await {
                    log::warn!("Failed to reap extractor: {}", e);
                }
            });
        }
    }
}

/// Result of a successful file-mode run.
#[derive(Debug)]
pub struct FileOutput {
    /// Owns the scratch files; dropping it removes them
    pub artifact: TempArtifact,
    /// File the extractor produced (may differ from `artifact.path()` in extension)
    pub path: PathBuf,
    pub size: u64,
}

impl FileOutput {
    pub fn extension(&self) -> &str {
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("bin")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the produced file for sending. The returned stream keeps the
    /// artifact alive; the scratch files go away when it is dropped.
    pub async fn into_stream(self) -> std::io::Result<FileStream> {
        let file = fs_err::tokio::File::open(&self.path).await?;
        Ok(FileStream {
            chunks: ReaderStream::with_capacity(file, extraction::STREAM_CHUNK_BYTES),
            _output: self,
        })
    }
}

/// Chunks of a completed file-mode artifact.
#[derive(Debug)]
pub struct FileStream {
    chunks: ReaderStream<fs_err::tokio::File>,
    _output: FileOutput,
}

impl Stream for FileStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.chunks.poll_next_unpin(cx)
    }
}

/// Live byte stream of a stream-mode run.
///
/// Yields the extractor's stdout in emission order. An `Err` item means the job
/// failed after output had started. Dropping the stream cancels the job, which
/// kills and reaps the child.
#[derive(Debug)]
pub struct StreamOutput {
    first: Option<Bytes>,
    rx: mpsc::Receiver<AppResult<Bytes>>,
    lifecycle: Arc<JobLifecycle>,
    _cancel: DropGuard,
}

impl StreamOutput {
    #[cfg(test)]
    fn state(&self) -> crate::download::job::JobState {
        self.lifecycle.state()
    }
}

impl Stream for StreamOutput {
    type Item = AppResult<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(first) = self.first.take() {
            return Poll::Ready(Some(Ok(first)));
        }
        self.rx.poll_recv(cx)
    }
}

/// How the relay loop ended
enum RelayEnd {
    Eof,
    Cancelled,
    Failed(String),
}

/// Launches and supervises extractor runs.
#[derive(Debug, Clone)]
pub struct ExtractionInvoker {
    settings: Arc<InvokerSettings>,
}

impl ExtractionInvoker {
    pub fn new(settings: InvokerSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &InvokerSettings {
        &self.settings
    }

    /// `Idle → Launched`: spawns the extractor with stderr drained in the
    /// background.
    pub fn spawn(&self, args: Vec<String>, stdout: Stdio, label: &str) -> AppResult<ExtractionJob> {
        let lifecycle = Arc::new(JobLifecycle::new());
        let mut cmd = process::build_command(&self.settings.extractor, &args)?;
        cmd.stdout(stdout).stderr(Stdio::piped());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                lifecycle.fail();
                log::error!(
                    "Failed to launch extractor {:?} for {}: {}",
                    self.settings.extractor,
                    label,
                    e
                );
                return Err(AppError::extraction("Failed to launch extractor"));
            }
        };
        lifecycle.launched();

        let stderr = child
            .stderr
            .take()
            .map(|stderr| process::spawn_stderr_drain(stderr, self.settings.stderr_limit_bytes));

        log::info!("Launched extractor pid {:?} for {}", child.id(), label);
        Ok(ExtractionJob {
            child: Some(child),
            stderr,
            lifecycle,
            label: label.to_string(),
            _active: ActiveJobGuard::new(),
        })
    }

    /// Runs the extractor in metadata mode and hands back its stdout.
    pub fn spawn_metadata(&self, url: &Url) -> AppResult<(ExtractionJob, ChildStdout)> {
        let mut job = self.spawn(metadata_args(url), Stdio::piped(), &redact_url(url))?;
        let stdout = job
            .take_stdout()
            .ok_or_else(|| AppError::extraction("Extractor stdout is unavailable"))?;
        job.lifecycle().streaming();
        Ok((job, stdout))
    }

    /// File mode: the extractor writes into `artifact`'s stem.
    ///
    /// Completes only when the process exits 0 within the job timeout and left
    /// a non-empty file behind. Every error path removes whatever was written
    /// before returning; dropping the returned future kills the child and
    /// leaves the removal to `artifact`'s `Drop`.
    pub async fn run_to_file(&self, url: &Url, format: &str, artifact: TempArtifact) -> AppResult<FileOutput> {
        match self.materialize(url, format, &artifact).await {
            Ok((path, size)) => Ok(FileOutput { artifact, path, size }),
            Err(e) => {
                artifact.remove().await;
                Err(e)
            }
        }
    }

    async fn materialize(&self, url: &Url, format: &str, artifact: &TempArtifact) -> AppResult<(PathBuf, u64)> {
        let args = retrieval_args(format, &artifact.output_template(), url);
        let mut job = self.spawn(args, Stdio::null(), &redact_url(url))?;
        job.lifecycle().streaming();

        let status = match job.wait(self.settings.job_timeout).await {
            Ok(status) => status,
            Err(reason) => return Err(job.fail(None, Some(reason)).await),
        };
        if !status.success() {
            return Err(job.fail(Some(status), None).await);
        }

        let produced = match artifact.resolve_output().await {
            Some(path) => fs_err::tokio::metadata(&path).await.ok().map(|meta| (path, meta.len())),
            None => None,
        };
        let (path, size) = match produced {
            Some((path, size)) if size > 0 => (path, size),
            _ => {
                return Err(job
                    .fail(Some(status), Some("Extractor produced no output".to_string()))
                    .await)
            }
        };

        job.complete().await;
        log::info!("Retrieved {} into {} ({} bytes)", redact_url(url), path.display(), size);
        Ok((path, size))
    }

    /// Stream mode: stdout is relayed to the returned stream.
    ///
    /// Resolves once the first chunk is available, so a run that fails before
    /// producing anything is reported as an error instead of an empty body.
    pub async fn run_to_stream(&self, url: &Url, format: &str) -> AppResult<StreamOutput> {
        let args = retrieval_args(format, "-", url);
        let mut job = self.spawn(args, Stdio::piped(), &redact_url(url))?;
        let stdout = job
            .take_stdout()
            .ok_or_else(|| AppError::extraction("Extractor stdout is unavailable"))?;

        let lifecycle = job.lifecycle().clone();
        let cancel = CancellationToken::new();
        // Cancels the relay if this future is dropped before returning
        let guard = cancel.clone().drop_guard();
        let (tx, mut rx) = mpsc::channel(extraction::STREAM_CHANNEL_CAPACITY);

        tokio::spawn(relay(job, stdout, tx, cancel, self.settings.clone()));

        match rx.recv().await {
            Some(Ok(first)) => Ok(StreamOutput {
                first: Some(first),
                rx,
                lifecycle,
                _cancel: guard,
            }),
            Some(Err(e)) => Err(e),
            None => Err(AppError::extraction("Extractor ended without output")),
        }
    }
}

/// Copies stdout chunks into `tx` until EOF, failure or cancellation, then
/// settles the job.
async fn relay(
    mut job: ExtractionJob,
    stdout: ChildStdout,
    tx: mpsc::Sender<AppResult<Bytes>>,
    cancel: CancellationToken,
    settings: Arc<InvokerSettings>,
) {
    let idle = settings.stream_idle_timeout;
    let mut chunks = ReaderStream::with_capacity(stdout, extraction::STREAM_CHUNK_BYTES);
    let mut relayed: u64 = 0;

    let end = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break RelayEnd::Cancelled,
            next = tokio::time::timeout(idle, chunks.next()) => next,
        };

        match next {
            Err(_) => break RelayEnd::Failed(format!("No output from extractor for {}s", idle.as_secs())),
            Ok(None) => break RelayEnd::Eof,
            Ok(Some(Err(e))) => break RelayEnd::Failed(format!("Failed to read extractor output: {}", e)),
            Ok(Some(Ok(bytes))) => {
                if relayed == 0 {
                    job.lifecycle().streaming();
                }
                relayed += bytes.len() as u64;

                // Parks here while the channel is full
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break RelayEnd::Cancelled,
                    sent = tx.send(Ok(bytes)) => {
                        if sent.is_err() {
                            break RelayEnd::Cancelled;
                        }
                    }
                }
            }
        }
    };
    drop(chunks);

    match end {
        RelayEnd::Cancelled => {
            let pid = job.pid();
            job.kill().await;
            if job.mark_cancelled() {
                log::info!("Stream stopped after {} bytes, extractor pid {:?} killed", relayed, pid);
            }
        }
        RelayEnd::Failed(reason) => {
            job.kill().await;
            let err = job.fail(None, Some(reason)).await;
            let _ = tx.send(Err(err)).await;
        }
        RelayEnd::Eof => {
            let waited = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                waited = job.wait(idle) => Some(waited),
            };
            match waited {
                None => {
                    job.kill().await;
                    job.mark_cancelled();
                }
                Some(Ok(status)) if status.success() && relayed > 0 => {
                    job.complete().await;
                    log::info!("Stream finished: {} bytes relayed", relayed);
                }
                Some(Ok(status)) => {
                    let reason = status.success().then(|| "Extractor produced no output".to_string());
                    let err = job.fail(Some(status), reason).await;
                    let _ = tx.send(Err(err)).await;
                }
                Some(Err(reason)) => {
                    let err = job.fail(None, Some(reason)).await;
                    let _ = tx.send(Err(err)).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::job::JobState;
    use pretty_assertions::assert_eq;

    fn url() -> Url {
        Url::parse("https://example.com/v/1").unwrap()
    }

    fn sh_invoker(script: &str) -> (tempfile::TempDir, ExtractionInvoker) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stub.sh");
        std::fs::write(&path, script).unwrap();
        let invoker = ExtractionInvoker::new(InvokerSettings {
            extractor: vec!["/bin/sh".to_string(), path.to_string_lossy().into_owned()],
            job_timeout: Duration::from_secs(10),
            stream_idle_timeout: Duration::from_secs(10),
            stderr_limit_bytes: 1024,
        });
        (dir, invoker)
    }

    #[test]
    fn test_retrieval_args_are_discrete() {
        let args = retrieval_args("best; rm -rf /", "-", &url());
        assert_eq!(args[args.len() - 2], "--");
        assert_eq!(args[args.len() - 1], "https://example.com/v/1");
        let f = args.iter().position(|a| a == "-f").unwrap();
        assert_eq!(args[f + 1], "best; rm -rf /");
        let o = args.iter().position(|a| a == "-o").unwrap();
        assert_eq!(args[o + 1], "-");
    }

    #[test]
    fn test_metadata_args() {
        let args = metadata_args(&url());
        assert!(args.contains(&"--dump-json".to_string()));
        assert!(args.contains(&"--skip-download".to_string()));
        assert_eq!(args.last().unwrap(), "https://example.com/v/1");
    }

    #[tokio::test]
    async fn test_launch_failure_is_extraction_failed() {
        let invoker = ExtractionInvoker::new(InvokerSettings {
            extractor: vec!["/nonexistent/extractor-binary".to_string()],
            job_timeout: Duration::from_secs(1),
            stream_idle_timeout: Duration::from_secs(1),
            stderr_limit_bytes: 1024,
        });
        let err = invoker.run_to_stream(&url(), "best").await.unwrap_err();
        assert!(matches!(err, AppError::ExtractionFailed { .. }));
    }

    #[tokio::test]
    async fn test_stream_relays_bytes_in_order() {
        let (_dir, invoker) = sh_invoker("printf 'hello '\nprintf 'world'\n");
        let stream = invoker.run_to_stream(&url(), "best").await.unwrap();
        let chunks: Vec<Bytes> = stream.map(|r| r.unwrap()).collect().await;
        let all: Vec<u8> = chunks.concat();
        assert_eq!(all, b"hello world");
    }

    #[tokio::test]
    async fn test_stream_failure_before_output() {
        let (_dir, invoker) = sh_invoker("echo 'ERROR: Unsupported URL: x' >&2\nexit 1\n");
        let err = invoker.run_to_stream(&url(), "best").await.unwrap_err();
        match err {
            AppError::ExtractionFailed { message } => assert!(message.contains("Unsupported URL")),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_empty_success_is_failure() {
        let (_dir, invoker) = sh_invoker("exit 0\n");
        let err = invoker.run_to_stream(&url(), "best").await.unwrap_err();
        assert!(matches!(err, AppError::ExtractionFailed { .. }));
    }

    #[tokio::test]
    async fn test_stream_failure_after_output_yields_error_item() {
        let (_dir, invoker) = sh_invoker("printf 'partial'\nexit 3\n");
        let mut stream = invoker.run_to_stream(&url(), "best").await.unwrap();
        let mut saw_error = false;
        while let Some(item) = stream.next().await {
            if item.is_err() {
                saw_error = true;
            }
        }
        assert!(saw_error);
        assert_eq!(stream.state(), JobState::Failed);
    }

    #[tokio::test]
    async fn test_job_timeout_kills_process() {
        let (_dir, invoker) = sh_invoker("while :; do :; done\n");
        let mut job = invoker.spawn(vec![], Stdio::null(), "test").unwrap();
        let reason = job.wait(Duration::from_millis(200)).await.unwrap_err();
        assert!(reason.contains("timed out"));
        let err = job.fail(None, Some(reason)).await;
        assert!(matches!(err, AppError::ExtractionFailed { .. }));
        assert_eq!(job.lifecycle().state(), JobState::Failed);
    }

    #[tokio::test]
    async fn test_dropped_job_is_cancelled() {
        let (_dir, invoker) = sh_invoker("while :; do :; done\n");
        let job = invoker.spawn(vec![], Stdio::null(), "test").unwrap();
        let lifecycle = job.lifecycle().clone();
        drop(job);
        assert_eq!(lifecycle.state(), JobState::Cancelled);
    }

    #[tokio::test]
    async fn test_cancellation_recorded_once() {
        let (_dir, invoker) = sh_invoker("while :; do :; done\n");
        let mut job = invoker.spawn(vec![], Stdio::null(), "test").unwrap();
        job.kill().await;
        assert!(job.mark_cancelled());
        assert!(!job.mark_cancelled());
        assert_eq!(job.lifecycle().state(), JobState::Cancelled);
    }

    #[tokio::test]
    async fn test_file_stream_keeps_artifact_until_dropped() {
        let (dir, invoker) = sh_invoker(
            r#"while [ "$1" != "-o" ]; do shift; done
printf 'file-bytes' > "$(printf '%s' "$2" | sed 's/%(ext)s/webm/')"
"#,
        );
        let scratch = crate::download::scratch::ScratchDir::new(dir.path().join("scratch"));
        scratch.prepare().unwrap();
        let artifact = scratch.new_artifact("mp4").await.unwrap();

        let output = invoker.run_to_file(&url(), "best", artifact).await.unwrap();
        assert_eq!(output.extension(), "webm");
        let path = output.path().to_path_buf();

        let stream = output.into_stream().await.unwrap();
        assert!(path.exists());
        let chunks: Vec<Bytes> = stream.map(|chunk| chunk.unwrap()).collect().await;
        assert_eq!(chunks.concat(), b"file-bytes");
        for _ in 0..200 {
            if !path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!path.exists());
    }
}
