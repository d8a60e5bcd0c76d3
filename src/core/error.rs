use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Centralized error type for the service
///
/// Every failure a request can observe is one of these variants. The HTTP
/// status and the `kind` label exposed to callers are derived from the variant,
/// so handlers never pick status codes themselves.
///
/// # Example
///
/// ```
/// use mediagate::core::error::AppError;
///
/// let err = AppError::InvalidInput("missing url".into());
/// assert_eq!(err.kind(), "invalid_input");
/// ```
#[derive(Error, Debug)]
pub enum AppError {
    /// The caller must fix the request (bad URL, missing format selector)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Too many requests from one client identity inside the current window
    #[error("Rate limit exceeded, retry in {}s", .retry_after.as_secs().max(1))]
    RateLimited { retry_after: Duration },

    /// The extractor succeeded but produced no usable format record
    #[error("No available formats for this URL")]
    NoFormatsAvailable,

    /// Subprocess or upstream-source failure. `message` is safe to show to callers.
    #[error("Extraction failed: {message}")]
    ExtractionFailed { message: String },

    /// Scratch or store directory is missing or unusable
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Network or read error while sending bytes to the caller
    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),

    /// Stored file does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The caller went away before the job finished. Never rendered to a client.
    #[error("Job cancelled")]
    Cancelled,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

/// Retry-After is expressed in whole seconds, rounded up, never zero.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    let secs = if retry_after.subsec_nanos() > 0 { secs + 1 } else { secs };
    secs.max(1)
}

impl AppError {
    /// Shorthand for an extraction failure with a caller-safe message.
    pub fn extraction(message: impl Into<String>) -> Self {
        AppError::ExtractionFailed {
            message: message.into(),
        }
    }

    /// Stable label used in response bodies and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::InvalidInput(_) => "invalid_input",
            AppError::RateLimited { .. } => "rate_limited",
            AppError::NoFormatsAvailable => "no_formats_available",
            AppError::ExtractionFailed { .. } => "extraction_failed",
            AppError::StorageUnavailable(_) => "storage_unavailable",
            AppError::DeliveryFailed(_) => "delivery_failed",
            AppError::NotFound(_) => "not_found",
            AppError::Cancelled => "cancelled",
            AppError::Io(_) => "io",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::NoFormatsAvailable | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ExtractionFailed { .. } => StatusCode::BAD_GATEWAY,
            AppError::StorageUnavailable(_)
            | AppError::DeliveryFailed(_)
            | AppError::Cancelled
            | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message rendered to untrusted callers.
    ///
    /// Operational details (paths, OS errors) stay in the log.
    pub fn public_message(&self) -> String {
        match self {
            AppError::StorageUnavailable(_) => "Temporary storage is unavailable".to_string(),
            AppError::DeliveryFailed(_) => "Failed to deliver the media".to_string(),
            AppError::Io(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("Request failed ({}): {}", self.kind(), self);
        } else {
            log::debug!("Request rejected ({}): {}", self.kind(), self);
        }

        let body = Json(json!({
            "error": self.public_message(),
            "kind": self.kind(),
        }));

        let mut response = (status, body).into_response();
        if let AppError::RateLimited { retry_after } = &self {
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs(*retry_after).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
