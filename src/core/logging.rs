//! Logging initialization and startup diagnostics
//!
//! This module provides:
//! - Logger initialization (console + file)
//! - Startup configuration summary

use anyhow::Result;
use simplelog::*;
use std::fs::File;

use crate::core::config::ServerConfig;

/// Initialize logger for both console and file output
///
/// # Arguments
/// * `log_file_path` - Path to the log file
/// * `level` - Level name (`error`, `warn`, `info`, `debug`, `trace`); unknown names fall back to `info`
///
/// # Returns
/// * `Ok(())` - Logger initialized successfully
/// * `Err(anyhow::Error)` - Failed to initialize logger
pub fn init_logger(log_file_path: &str, level: &str) -> Result<()> {
    let log_file = File::create(log_file_path).map_err(|e| anyhow::anyhow!("Failed to create log file: {}", e))?;
    let level = parse_level(level);

    CombinedLogger::init(vec![
        TermLogger::new(level, Config::default(), TerminalMode::Mixed, ColorChoice::Auto),
        WriteLogger::new(level, Config::default(), log_file),
    ])
    .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    Ok(())
}

/// Parses a level name, defaulting to `Info`.
pub fn parse_level(level: &str) -> LevelFilter {
    level.trim().parse().unwrap_or(LevelFilter::Info)
}

/// Logs the effective configuration at startup.
pub fn log_configuration(config: &ServerConfig) {
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("Configuration");
    log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    log::info!("  bind address:    {}", config.bind_addr);
    log::info!("  extractor:       {}", config.extractor.join(" "));
    log::info!("  scratch dir:     {}", config.scratch_dir.display());
    log::info!("  store dir:       {}", config.store_dir.display());
    log::info!(
        "  rate limit:      {} requests / {}s",
        config.rate_limit_max_requests,
        config.rate_limit_window.as_secs()
    );
    log::info!("  job timeout:     {}s", config.job_timeout.as_secs());
    log::info!("  stream idle:     {}s", config.stream_idle_timeout.as_secs());
    log::info!("  default mode:    {}", config.default_delivery_mode);
    if config.trust_forwarded_for {
        log::warn!("  X-Forwarded-For is trusted for client identity");
    }
}
