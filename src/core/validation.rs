//! Request validation utilities
//!
//! Pure syntax checks on caller input, run before any subprocess is launched:
//! - Media URL validation (any absolute HTTP/HTTPS URL with a host)
//! - Format selector validation
//! - Stored file name validation (prevent directory traversal)
//!
//! Nothing here touches the network; whether a site is supported is decided by
//! the extractor.

use url::Url;

use crate::core::error::AppError;

/// Longest accepted format selector, in bytes
pub const MAX_FORMAT_SELECTOR_LEN: usize = 256;

/// Longest accepted stored file name, in bytes
pub const MAX_FILE_NAME_LEN: usize = 255;

/// Validates a media URL submitted by a caller.
///
/// # Security
/// - Only HTTP and HTTPS schemes are allowed
/// - A host is required
///
/// Anything else, userinfo included, is left for the extractor to judge.
///
/// # Examples
/// ```
/// use mediagate::core::validation::validate_url;
///
/// assert!(validate_url("https://example.com/v/abc").is_ok());
/// assert!(validate_url("http://media.example.org/watch?v=1").is_ok());
/// assert!(validate_url("https://user:pw@example.com/v/abc").is_ok());
///
/// assert!(validate_url("").is_err());
/// assert!(validate_url("ftp://example.com/video").is_err());
/// assert!(validate_url("not a url").is_err());
/// ```
pub fn validate_url(url: &str) -> Result<Url, AppError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidInput("URL is required".to_string()));
    }

    let parsed = Url::parse(trimmed).map_err(|_| AppError::InvalidInput(format!("Malformed URL: {}", trimmed)))?;

    // Only HTTP and HTTPS are allowed
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(AppError::InvalidInput(format!(
            "Unsupported URL scheme: {}",
            parsed.scheme()
        )));
    }

    match parsed.host_str() {
        Some(host) if !host.is_empty() => {}
        _ => return Err(AppError::InvalidInput("URL has no host".to_string())),
    }

    Ok(parsed)
}

/// Validates the format selector of a retrieval request.
///
/// The selector is passed to the extractor as one discrete argument, so the
/// checks only keep it from being read as an option or carrying junk.
///
/// # Examples
/// ```
/// use mediagate::core::validation::validate_format_selector;
///
/// assert_eq!(validate_format_selector(Some("best")).unwrap(), "best");
/// assert_eq!(validate_format_selector(Some("137+140")).unwrap(), "137+140");
/// assert!(validate_format_selector(Some("bv*[height<=720]+ba/b")).is_ok());
///
/// assert!(validate_format_selector(None).is_err());
/// assert!(validate_format_selector(Some("")).is_err());
/// assert!(validate_format_selector(Some("--exec")).is_err());
/// ```
pub fn validate_format_selector(format: Option<&str>) -> Result<&str, AppError> {
    let format = format
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .ok_or_else(|| AppError::InvalidInput("Format selector is required".to_string()))?;

    if format.len() > MAX_FORMAT_SELECTOR_LEN {
        return Err(AppError::InvalidInput("Format selector is too long".to_string()));
    }

    if format.starts_with('-') {
        return Err(AppError::InvalidInput(
            "Format selector must not start with '-'".to_string(),
        ));
    }

    if format.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(AppError::InvalidInput(
            "Format selector contains whitespace or control characters".to_string(),
        ));
    }

    Ok(format)
}

/// Validates a file name addressed through the file store endpoints.
///
/// # Security
/// Rejects anything that could leave the store directory:
/// - Path separators: `/`, `\`
/// - Parent references and hidden files (leading `.`)
/// - Control characters
///
/// # Examples
/// ```
/// use mediagate::core::validation::validate_file_name;
///
/// assert!(validate_file_name("3f2a9c.mp4").is_ok());
///
/// assert!(validate_file_name("../etc/passwd").is_err());
/// assert!(validate_file_name("a/b.mp4").is_err());
/// assert!(validate_file_name(".hidden").is_err());
/// ```
pub fn validate_file_name(name: &str) -> Result<&str, AppError> {
    if name.is_empty() || name.len() > MAX_FILE_NAME_LEN {
        return Err(AppError::InvalidInput("Invalid file name".to_string()));
    }

    if name.starts_with('.') {
        return Err(AppError::InvalidInput("Invalid file name".to_string()));
    }

    if name
        .chars()
        .any(|c| c == '/' || c == '\\' || c == ':' || c.is_control())
    {
        return Err(AppError::InvalidInput("Invalid file name".to_string()));
    }

    Ok(name)
}
