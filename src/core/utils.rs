use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

/// ANSI escape sequences (colors, cursor movement) the extractor prints when it
/// believes it is attached to a terminal.
static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("ANSI regex is valid")
});

/// Returns the last `max_bytes` bytes of `bytes` decoded lossily, starting on a
/// character boundary.
///
/// # Example
///
/// ```
/// use mediagate::core::utils::tail_utf8;
///
/// assert_eq!(tail_utf8(b"hello world", 5), "world");
/// assert_eq!(tail_utf8("añb".as_bytes(), 2), "b");
/// ```
pub fn tail_utf8(bytes: &[u8], max_bytes: usize) -> String {
    if bytes.len() <= max_bytes {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let mut start = bytes.len() - max_bytes;
    // Skip UTF-8 continuation bytes so the tail starts on a char boundary
    while start < bytes.len() && (bytes[start] & 0b1100_0000) == 0b1000_0000 {
        start += 1;
    }
    String::from_utf8_lossy(&bytes[start..]).into_owned()
}

/// Truncates `text` to at most `max_chars` characters, appending `…` when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// Builds the stderr excerpt shown to callers.
///
/// Strips terminal escapes, drops blank lines and `WARNING:` noise, prefers the
/// extractor's `ERROR:` lines when present, and keeps the last line(s) within
/// `max_chars`.
///
/// # Example
///
/// ```
/// use mediagate::core::utils::sanitize_excerpt;
///
/// let stderr = "WARNING: slow\n\x1b[0;31mERROR:\x1b[0m [generic] Unsupported URL: x\n";
/// assert_eq!(sanitize_excerpt(stderr, 300), "ERROR: [generic] Unsupported URL: x");
/// ```
pub fn sanitize_excerpt(stderr: &str, max_chars: usize) -> String {
    let cleaned = ANSI_ESCAPE.replace_all(stderr, "");

    let lines: Vec<String> = cleaned
        .lines()
        .map(|line| line.chars().filter(|c| !c.is_control()).collect::<String>())
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty() && !line.starts_with("WARNING:"))
        .collect();

    let errors: Vec<&String> = lines.iter().filter(|line| line.starts_with("ERROR:")).collect();
    let chosen: Vec<&String> = if errors.is_empty() {
        lines.iter().rev().take(1).collect()
    } else {
        errors.into_iter().rev().take(2).rev().collect()
    };

    let joined = chosen.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(" | ");
    truncate_chars(&joined, max_chars)
}

/// Formats a byte count for humans (`1.5 MiB`).
///
/// # Example
///
/// ```
/// use mediagate::core::utils::format_bytes;
///
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(1536), "1.5 KiB");
/// assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// URL for log lines, with any userinfo masked.
pub fn redact_url(url: &Url) -> String {
    if url.username().is_empty() && url.password().is_none() {
        return url.to_string();
    }
    let mut masked = url.clone();
    // Only fails for URLs that cannot carry userinfo, which ours always can
    let _ = masked.set_username("***");
    let _ = masked.set_password(None);
    masked.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tail_utf8_keeps_short_input() {
        assert_eq!(tail_utf8(b"abc", 10), "abc");
        assert_eq!(tail_utf8(b"", 10), "");
    }

    #[test]
    fn test_tail_utf8_respects_char_boundary() {
        // "ж" is two bytes; cutting into it must not produce a replacement char
        let text = "жжж";
        let tail = tail_utf8(text.as_bytes(), 3);
        assert_eq!(tail, "ж");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel…");
    }

    #[test]
    fn test_sanitize_excerpt_prefers_error_lines() {
        let stderr = "[youtube] abc: Downloading webpage\n\
                      WARNING: something odd\n\
                      ERROR: [youtube] abc: Video unavailable\n";
        assert_eq!(
            sanitize_excerpt(stderr, 300),
            "ERROR: [youtube] abc: Video unavailable"
        );
    }

    #[test]
    fn test_sanitize_excerpt_falls_back_to_last_line() {
        let stderr = "first\nsecond\n\n";
        assert_eq!(sanitize_excerpt(stderr, 300), "second");
    }

    #[test]
    fn test_sanitize_excerpt_bounded() {
        let stderr = format!("ERROR: {}", "x".repeat(1000));
        let excerpt = sanitize_excerpt(&stderr, 50);
        assert_eq!(excerpt.chars().count(), 51);
    }

    #[test]
    fn test_sanitize_excerpt_empty() {
        assert_eq!(sanitize_excerpt("", 300), "");
        assert_eq!(sanitize_excerpt("WARNING: only noise\n", 300), "");
    }

    #[test]
    fn test_redact_url_masks_userinfo() {
        let url = Url::parse("https://user:pw@example.com/v/abc").unwrap();
        assert_eq!(redact_url(&url), "https://***@example.com/v/abc");

        let plain = Url::parse("https://example.com/v/abc").unwrap();
        assert_eq!(redact_url(&plain), "https://example.com/v/abc");
    }

    #[test]
    fn test_format_bytes_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1024), "1.0 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }
}
