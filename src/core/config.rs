use once_cell::sync::Lazy;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::download::DeliveryMode;

/// Extractor command line.
/// Read once at startup from YTDL_BIN environment variable or defaults to "yt-dlp".
/// May carry leading arguments, e.g. "python3 -m yt_dlp".
pub static YTDL_BIN: Lazy<String> = Lazy::new(|| env::var("YTDL_BIN").unwrap_or_else(|_| "yt-dlp".to_string()));

/// Scratch directory for in-flight file-mode artifacts
/// Read from SCRATCH_DIR environment variable
/// Default: <system temp dir>/mediagate-scratch
pub static SCRATCH_DIR: Lazy<String> = Lazy::new(|| {
    env::var("SCRATCH_DIR").unwrap_or_else(|_| {
        env::temp_dir()
            .join("mediagate-scratch")
            .to_string_lossy()
            .to_string()
    })
});

/// Directory served by the /files endpoints
/// Read from STORE_DIR environment variable
/// Supports tilde (~) expansion
pub static STORE_DIR: Lazy<String> = Lazy::new(|| env::var("STORE_DIR").unwrap_or_else(|_| "downloads".to_string()));

/// Listen address
/// Read from BIND_ADDR environment variable
/// Default: 0.0.0.0:5000
pub static BIND_ADDR: Lazy<String> = Lazy::new(|| env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:5000".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: mediagate.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "mediagate.log".to_string()));

/// Log level (error, warn, info, debug, trace)
/// Read from LOG_LEVEL environment variable
pub static LOG_LEVEL: Lazy<String> = Lazy::new(|| env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()));

/// Default delivery mode when a download request does not name one
/// Read from DEFAULT_DELIVERY_MODE environment variable ("file" or "stream")
pub static DEFAULT_DELIVERY_MODE: Lazy<DeliveryMode> = Lazy::new(|| {
    env::var("DEFAULT_DELIVERY_MODE")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(DeliveryMode::File)
});

/// Use the first X-Forwarded-For hop as client identity.
/// Only enable behind a proxy that overwrites the header.
pub static TRUST_FORWARDED_FOR: Lazy<bool> = Lazy::new(|| env_parse("TRUST_FORWARDED_FOR", false));

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

/// Rate limiting configuration
pub mod rate_limit {
    use super::{env_parse, Duration, Lazy};

    /// Requests allowed per client identity inside one window
    pub const DEFAULT_MAX_REQUESTS: u32 = 10;

    /// Window length (in seconds)
    pub const DEFAULT_WINDOW_SECS: u64 = 60;

    pub static MAX_REQUESTS: Lazy<u32> = Lazy::new(|| env_parse("RATE_LIMIT_MAX_REQUESTS", DEFAULT_MAX_REQUESTS));

    pub static WINDOW_SECS: Lazy<u64> = Lazy::new(|| env_parse("RATE_LIMIT_WINDOW_SECS", DEFAULT_WINDOW_SECS));

    /// Rate limit window duration
    pub fn window() -> Duration {
        Duration::from_secs(*WINDOW_SECS)
    }
}

/// Extraction subprocess configuration
pub mod extraction {
    use super::{env_parse, Duration, Lazy};

    /// Timeout for file-mode and metadata runs (in seconds)
    pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 240;

    /// Longest silence tolerated on stdout while streaming (in seconds)
    pub const DEFAULT_STREAM_IDLE_TIMEOUT_SECS: u64 = 60;

    /// Tail of stderr kept per job for diagnostics
    pub const DEFAULT_STDERR_LIMIT_BYTES: usize = 16 * 1024;

    /// Size of one relayed stdout chunk
    pub const STREAM_CHUNK_BYTES: usize = 64 * 1024;

    /// Chunks buffered between the subprocess reader and the HTTP body
    pub const STREAM_CHANNEL_CAPACITY: usize = 8;

    /// Longest stderr excerpt shown to callers
    pub const PUBLIC_EXCERPT_CHARS: usize = 300;

    pub static JOB_TIMEOUT_SECS: Lazy<u64> = Lazy::new(|| env_parse("JOB_TIMEOUT_SECS", DEFAULT_JOB_TIMEOUT_SECS));

    pub static STREAM_IDLE_TIMEOUT_SECS: Lazy<u64> =
        Lazy::new(|| env_parse("STREAM_IDLE_TIMEOUT_SECS", DEFAULT_STREAM_IDLE_TIMEOUT_SECS));

    pub static STDERR_LIMIT_BYTES: Lazy<usize> =
        Lazy::new(|| env_parse("STDERR_LIMIT_BYTES", DEFAULT_STDERR_LIMIT_BYTES));

    /// Job timeout duration
    pub fn job_timeout() -> Duration {
        Duration::from_secs(*JOB_TIMEOUT_SECS)
    }

    /// Stream idle timeout duration
    pub fn stream_idle_timeout() -> Duration {
        Duration::from_secs(*STREAM_IDLE_TIMEOUT_SECS)
    }
}

/// Runtime configuration handed to the server.
///
/// Built from the environment by [`ServerConfig::from_env`]; tests construct it
/// directly so nothing depends on process-wide state.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    /// Extractor program followed by its leading arguments
    pub extractor: Vec<String>,
    pub scratch_dir: PathBuf,
    pub store_dir: PathBuf,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window: Duration,
    pub job_timeout: Duration,
    pub stream_idle_timeout: Duration,
    pub stderr_limit_bytes: usize,
    pub default_delivery_mode: DeliveryMode,
    pub trust_forwarded_for: bool,
}

impl ServerConfig {
    /// Reads every setting from the environment (see the statics in this module).
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_addr = BIND_ADDR
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid BIND_ADDR '{}': {}", *BIND_ADDR, e))?;

        let extractor = split_command(&YTDL_BIN);
        if extractor.is_empty() {
            anyhow::bail!("YTDL_BIN is empty");
        }

        Ok(Self {
            bind_addr,
            extractor,
            scratch_dir: expand_path(&SCRATCH_DIR),
            store_dir: expand_path(&STORE_DIR),
            rate_limit_max_requests: *rate_limit::MAX_REQUESTS,
            rate_limit_window: rate_limit::window(),
            job_timeout: extraction::job_timeout(),
            stream_idle_timeout: extraction::stream_idle_timeout(),
            stderr_limit_bytes: *extraction::STDERR_LIMIT_BYTES,
            default_delivery_mode: *DEFAULT_DELIVERY_MODE,
            trust_forwarded_for: *TRUST_FORWARDED_FOR,
        })
    }
}

/// Splits an extractor command line on whitespace.
///
/// Quoting is not supported; paths with spaces belong in a wrapper script.
pub fn split_command(command: &str) -> Vec<String> {
    command.split_whitespace().map(str::to_string).collect()
}

/// Expands a leading `~` to the home directory.
pub fn expand_path(path: &str) -> PathBuf {
    match path.strip_prefix('~') {
        Some(rest) => match env::var_os("HOME") {
            Some(home) => PathBuf::from(home).join(rest.trim_start_matches('/')),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}
