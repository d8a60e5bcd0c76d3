//! Retrieval Orchestrator
//!
//! Composes rate limiting, validation, temp artifacts and the invoker into the
//! three public operations. Order is fixed: the rate limiter sees every
//! request, then validation runs, and only valid requests reach a subprocess.

use std::sync::Arc;

use crate::core::config::ServerConfig;
use crate::core::error::AppResult;
use crate::core::metrics;
use crate::core::rate_limiter::RateLimiter;
use crate::core::utils::redact_url;
use crate::core::validation::{validate_format_selector, validate_url};
use crate::download::formats::{self, FormatDescriptor};
use crate::download::invoker::{ExtractionInvoker, FileOutput, InvokerSettings, StreamOutput};
use crate::download::scratch::ScratchDir;
use crate::download::DeliveryMode;
use crate::storage::files::{FileStore, StoredFile};

/// Extension reserved for file-mode artifacts before the extractor picks the
/// real container
pub const DEFAULT_EXTENSION: &str = "mp4";

/// One caller request.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub url: String,
    pub format: Option<String>,
    /// Rate-limit key (peer address unless the caller knows better)
    pub client_identity: String,
    pub mode: DeliveryMode,
}

impl RetrievalRequest {
    pub fn new(url: impl Into<String>, format: Option<String>, client_identity: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            format,
            client_identity: client_identity.into(),
            mode: DeliveryMode::File,
        }
    }

    pub fn with_mode(mut self, mode: DeliveryMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Bytes ready for the caller.
#[derive(Debug)]
pub enum Delivery {
    /// Completed file in the scratch directory, removed when dropped
    File(FileOutput),
    /// Live stdout of a running extractor, cancelled when dropped
    Stream(StreamOutput),
}

/// Media Retrieval Orchestrator
#[derive(Debug, Clone)]
pub struct Orchestrator {
    limiter: Arc<RateLimiter>,
    scratch: ScratchDir,
    invoker: ExtractionInvoker,
    store: FileStore,
}

impl Orchestrator {
    pub fn new(limiter: Arc<RateLimiter>, scratch: ScratchDir, invoker: ExtractionInvoker, store: FileStore) -> Self {
        Self {
            limiter,
            scratch,
            invoker,
            store,
        }
    }

    /// Wires every component from `config`. Directories are not touched.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(
            Arc::new(RateLimiter::new(config.rate_limit_max_requests, config.rate_limit_window)),
            ScratchDir::new(&config.scratch_dir),
            ExtractionInvoker::new(InvokerSettings::from(config)),
            FileStore::new(&config.store_dir),
        )
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn scratch(&self) -> &ScratchDir {
        &self.scratch
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// RateLimiter → Validate → Format Lister.
    pub async fn list_formats(&self, request: &RetrievalRequest) -> AppResult<Vec<FormatDescriptor>> {
        observe("formats", async {
            self.limiter.allow(&request.client_identity)?;
            let url = validate_url(&request.url)?;
            formats::list_formats(&self.invoker, &url).await
        })
        .await
    }

    /// RateLimiter → Validate → Namer (file mode) → Invoker.
    ///
    /// The returned [`Delivery`] owns the job: dropping it at any point removes
    /// the temp file or kills the stream.
    pub async fn retrieve(&self, request: &RetrievalRequest) -> AppResult<Delivery> {
        observe("download", async {
            self.limiter.allow(&request.client_identity)?;
            let url = validate_url(&request.url)?;
            let format = validate_format_selector(request.format.as_deref())?;

            log::info!(
                "Retrieving {} (format {}, mode {}) for {}",
                redact_url(&url),
                format,
                request.mode,
                request.client_identity
            );

            match request.mode {
                DeliveryMode::File => {
                    let artifact = self.scratch.new_artifact(DEFAULT_EXTENSION).await?;
                    let output = self.invoker.run_to_file(&url, format, artifact).await?;
                    Ok(Delivery::File(output))
                }
                DeliveryMode::Stream => {
                    let stream = self.invoker.run_to_stream(&url, format).await?;
                    Ok(Delivery::Stream(stream))
                }
            }
        })
        .await
    }

    /// File-mode retrieval whose result is moved into the file store.
    pub async fn persist(&self, request: &RetrievalRequest) -> AppResult<StoredFile> {
        observe("process", async {
            self.limiter.allow(&request.client_identity)?;
            let url = validate_url(&request.url)?;
            let format = validate_format_selector(request.format.as_deref())?;

            let artifact = self.scratch.new_artifact(DEFAULT_EXTENSION).await?;
            let output = self.invoker.run_to_file(&url, format, artifact).await?;
            self.store.adopt(output).await
        })
        .await
    }
}

/// Counts the request and, on error, the failure kind.
async fn observe<T>(operation: &str, fut: impl Future<Output = AppResult<T>>) -> AppResult<T> {
    metrics::record_request(operation);
    let result = fut.await;
    if let Err(e) = &result {
        metrics::record_failure(operation, e.kind());
    }
    result
}
