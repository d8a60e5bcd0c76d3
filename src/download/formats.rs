//! Format Lister
//!
//! Runs the extractor in metadata mode and turns its `--dump-json` output into
//! [`FormatDescriptor`]s, in the order the extractor emitted them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::ChildStdout;
use tokio::time::Instant;
use url::Url;

use crate::core::error::{AppError, AppResult};
use crate::core::utils::redact_url;
use crate::download::invoker::{ExtractionInvoker, ExtractionJob};

/// One encoding offered for a media URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatDescriptor {
    /// Extractor format id, usable as a format selector
    pub id: String,
    /// File extension / container (`mp4`, `webm`, `m4a`)
    pub container: String,
    /// `1920x1080`, `720p`; absent for audio-only formats
    pub resolution: Option<String>,
    pub frame_rate: Option<f64>,
    /// Exact or estimated size in bytes
    pub approximate_size: Option<u64>,
    /// `vcodec+acodec`, or whichever one is present
    pub codec: String,
}

impl FormatDescriptor {
    /// Builds a descriptor from one extractor format record.
    ///
    /// Returns `None` when the record has no `format_id`.
    pub fn from_json(record: &Value) -> Option<Self> {
        let id = match record.get("format_id")? {
            Value::String(id) if !id.trim().is_empty() => id.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };

        let container = non_empty_str(record, "ext").unwrap_or("unknown").to_string();
        let frame_rate = record.get("fps").and_then(Value::as_f64).filter(|fps| *fps > 0.0);
        let approximate_size = size_field(record, "filesize").or_else(|| size_field(record, "filesize_approx"));

        Some(Self {
            id,
            container,
            resolution: resolution_of(record),
            frame_rate,
            approximate_size,
            codec: codec_of(record),
        })
    }

    pub fn is_audio_only(&self) -> bool {
        self.resolution.is_none()
    }
}

fn non_empty_str<'a>(record: &'a Value, key: &str) -> Option<&'a str> {
    record
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn size_field(record: &Value, key: &str) -> Option<u64> {
    let value = record.get(key)?;
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
        .filter(|size| *size > 0)
}

fn resolution_of(record: &Value) -> Option<String> {
    if let Some(resolution) = non_empty_str(record, "resolution") {
        let lowered = resolution.to_ascii_lowercase();
        if lowered != "audio only" && lowered != "unknown" {
            return Some(resolution.to_string());
        }
        return None;
    }

    let width = record.get("width").and_then(Value::as_u64);
    let height = record.get("height").and_then(Value::as_u64);
    match (width, height) {
        (Some(w), Some(h)) => Some(format!("{}x{}", w, h)),
        (None, Some(h)) => Some(format!("{}p", h)),
        _ => None,
    }
}

fn codec_of(record: &Value) -> String {
    let present = |key: &str| non_empty_str(record, key).filter(|c| !c.eq_ignore_ascii_case("none"));
    match (present("vcodec"), present("acodec")) {
        (Some(v), Some(a)) => format!("{}+{}", v, a),
        (Some(v), None) => v.to_string(),
        (None, Some(a)) => a.to_string(),
        (None, None) => "unknown".to_string(),
    }
}

/// Expands one stdout line into descriptors.
///
/// A record carrying `format_id` is a single format; an info dict carrying a
/// `formats` array yields each usable element in order. `Err` means the line
/// was not a usable JSON record.
pub fn parse_line(line: &str) -> Result<Vec<FormatDescriptor>, String> {
    let value: Value = serde_json::from_str(line).map_err(|e| format!("invalid JSON: {}", e))?;

    if let Some(descriptor) = FormatDescriptor::from_json(&value) {
        return Ok(vec![descriptor]);
    }

    match value.get("formats").and_then(Value::as_array) {
        Some(formats) => Ok(formats.iter().filter_map(FormatDescriptor::from_json).collect()),
        None => Err("record has neither format_id nor formats".to_string()),
    }
}

/// One-pass reader over the extractor's metadata output.
///
/// Lazy: a line is read only when the next descriptor is asked for. Finite and
/// not restartable; [`finish`](Self::finish) consumes it and settles the job.
#[derive(Debug)]
pub struct FormatLines {
    lines: Lines<BufReader<ChildStdout>>,
    pending: VecDeque<FormatDescriptor>,
    job: ExtractionJob,
    produced: usize,
    skipped: usize,
    exhausted: bool,
}

impl FormatLines {
    pub fn new(job: ExtractionJob, stdout: ChildStdout) -> Self {
        Self {
            lines: BufReader::new(stdout).lines(),
            pending: VecDeque::new(),
            job,
            produced: 0,
            skipped: 0,
            exhausted: false,
        }
    }

    /// Next descriptor, or `None` once stdout is exhausted.
    ///
    /// Unparseable lines are skipped and logged. Cancel safe.
    pub async fn next(&mut self) -> AppResult<Option<FormatDescriptor>> {
        loop {
            if let Some(descriptor) = self.pending.pop_front() {
                return Ok(Some(descriptor));
            }
            if self.exhausted {
                return Ok(None);
            }

            match self.lines.next_line().await {
                Ok(Some(line)) => self.ingest(&line),
                Ok(None) => self.exhausted = true,
                Err(e) => {
                    self.exhausted = true;
                    self.job.kill().await;
                    return Err(self
                        .job
                        .fail(None, Some(format!("Failed to read extractor output: {}", e)))
                        .await);
                }
            }
        }
    }

    fn ingest(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match parse_line(line) {
            Ok(descriptors) => {
                self.produced += descriptors.len();
                self.pending.extend(descriptors);
            }
            Err(reason) => {
                self.skipped += 1;
                log::warn!("Skipping extractor output line ({}): {:.120}", reason, line);
            }
        }
    }

    /// Kills the job and reports it failed with `reason`.
    pub async fn abort(mut self, reason: String) -> AppError {
        self.job.kill().await;
        self.job.fail(None, Some(reason)).await
    }

    /// Drains remaining output, waits for the extractor to exit and checks the
    /// outcome.
    ///
    /// # Returns
    /// - `Ok(count)` with the number of descriptors produced
    /// - `ExtractionFailed` on non-zero exit or timeout
    /// - `NoFormatsAvailable` when the run succeeded without a usable record
    pub async fn finish(mut self, timeout: Duration) -> AppResult<usize> {
        while !self.exhausted {
            match self.lines.next_line().await {
                Ok(Some(line)) => self.ingest(&line),
                Ok(None) | Err(_) => self.exhausted = true,
            }
        }

        let status = match self.job.wait(timeout).await {
            Ok(status) => status,
            Err(reason) => return Err(self.job.fail(None, Some(reason)).await),
        };
        if !status.success() {
            return Err(self.job.fail(Some(status), None).await);
        }

        self.job.complete().await;
        if self.skipped > 0 {
            log::warn!("Skipped {} malformed extractor lines", self.skipped);
        }
        if self.produced == 0 {
            return Err(AppError::NoFormatsAvailable);
        }
        Ok(self.produced)
    }
}

/// Lists the formats available for `url`, in extractor order.
///
/// The whole run, reading included, is bounded by the job timeout; on expiry
/// the extractor is killed and reaped.
pub async fn list_formats(invoker: &ExtractionInvoker, url: &Url) -> AppResult<Vec<FormatDescriptor>> {
    let timeout = invoker.settings().job_timeout;
    let deadline = Instant::now() + timeout;

    let (job, stdout) = invoker.spawn_metadata(url)?;
    let mut lines = FormatLines::new(job, stdout);
    let mut formats = Vec::new();

    loop {
        match tokio::time::timeout_at(deadline, lines.next()).await {
            Ok(Ok(Some(descriptor))) => formats.push(descriptor),
            Ok(Ok(None)) => break,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(lines
                    .abort(format!("Extractor timed out after {}s", timeout.as_secs()))
                    .await)
            }
        }
    }

    let remaining = deadline.saturating_duration_since(Instant::now());
    lines.finish(remaining).await?;

    log::info!("Listed {} formats for {}", formats.len(), redact_url(url));
    Ok(formats)
}
