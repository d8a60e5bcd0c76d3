/// Extractor error analysis
///
/// Classifies extractor stderr into a small set of failure kinds and builds the
/// sanitized message returned to callers. The full stderr only ever goes to the
/// operator log.
use crate::core::utils::sanitize_excerpt;

/// Kinds of extractor failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YtDlpErrorType {
    /// Media is private, removed, geo-blocked or otherwise gone
    VideoUnavailable,
    /// No extractor handles this URL
    UnsupportedUrl,
    /// Timeouts, DNS, refused connections
    NetworkError,
    /// The requested format selector matched nothing
    FormatUnavailable,
    /// Anything else
    Unknown,
}

impl YtDlpErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            YtDlpErrorType::VideoUnavailable => "video_unavailable",
            YtDlpErrorType::UnsupportedUrl => "unsupported_url",
            YtDlpErrorType::NetworkError => "network_error",
            YtDlpErrorType::FormatUnavailable => "format_unavailable",
            YtDlpErrorType::Unknown => "unknown",
        }
    }
}

/// Analyzes extractor stderr and determines the failure kind
pub fn analyze_ytdlp_error(stderr: &str) -> YtDlpErrorType {
    let stderr_lower = stderr.to_lowercase();

    if stderr_lower.contains("requested format is not available")
        || stderr_lower.contains("requested format not available")
        || stderr_lower.contains("no video formats found")
    {
        return YtDlpErrorType::FormatUnavailable;
    }

    if stderr_lower.contains("unsupported url") || stderr_lower.contains("no suitable extractor") {
        return YtDlpErrorType::UnsupportedUrl;
    }

    if stderr_lower.contains("private video")
        || stderr_lower.contains("video unavailable")
        || stderr_lower.contains("this video is not available")
        || stderr_lower.contains("video is private")
        || stderr_lower.contains("has been removed")
        || stderr_lower.contains("does not exist")
        || stderr_lower.contains("http error 404")
        || stderr_lower.contains("not available in your country")
    {
        return YtDlpErrorType::VideoUnavailable;
    }

    if stderr_lower.contains("timed out")
        || stderr_lower.contains("timeout")
        || stderr_lower.contains("connection")
        || stderr_lower.contains("network is unreachable")
        || stderr_lower.contains("name or service not known")
        || stderr_lower.contains("temporary failure in name resolution")
        || stderr_lower.contains("failed to connect")
    {
        return YtDlpErrorType::NetworkError;
    }

    YtDlpErrorType::Unknown
}

/// Caller-facing summary for a failure kind
pub fn get_error_message(error_type: YtDlpErrorType) -> &'static str {
    match error_type {
        YtDlpErrorType::VideoUnavailable => "Media is unavailable (private, removed or region-locked)",
        YtDlpErrorType::UnsupportedUrl => "URL is not supported by the extractor",
        YtDlpErrorType::NetworkError => "Network error while contacting the media source",
        YtDlpErrorType::FormatUnavailable => "Requested format is not available",
        YtDlpErrorType::Unknown => "Media extraction failed",
    }
}

/// Builds the sanitized message for a failed run: the summary for the detected
/// kind followed by a bounded stderr excerpt, when there is one.
pub fn failure_message(stderr: &str, excerpt_chars: usize) -> String {
    let error_type = analyze_ytdlp_error(stderr);
    let summary = get_error_message(error_type);
    let excerpt = sanitize_excerpt(stderr, excerpt_chars);
    if excerpt.is_empty() {
        summary.to_string()
    } else {
        format!("{}: {}", summary, excerpt)
    }
}
