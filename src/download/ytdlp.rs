use crate::core::error::AppError;
use crate::core::process::{self, PROBE_TIMEOUT};

/// Checks that the extractor can be launched and reports its version.
///
/// Runs `<extractor> --version` with a timeout.
///
/// # Returns
///
/// The trimmed version string, or `ExtractionFailed` when the binary is
/// missing, times out, exits non-zero or prints nothing.
pub async fn check_extractor(extractor: &[String]) -> Result<String, AppError> {
    log::info!("Checking extractor version...");

    let mut cmd = process::build_command(extractor, &["--version".to_string()])?;
    let output = process::run_with_timeout(&mut cmd, PROBE_TIMEOUT).await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AppError::extraction(format!(
            "`{} --version` exited with {:?}: {}",
            extractor.join(" "),
            output.status.code(),
            stderr.trim()
        )));
    }

    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if version.is_empty() {
        return Err(AppError::extraction(
            "Extractor is not installed or --version produced no output",
        ));
    }

    log::info!("Extractor version: {}", version);
    Ok(version)
}

/// Startup check: logs the outcome and never fails, so the server still comes
/// up when the extractor is missing (jobs will fail individually).
pub async fn log_extractor_status(extractor: &[String]) {
    if let Err(e) = check_extractor(extractor).await {
        log::error!("Extractor check failed: {}. Retrievals will fail until this is fixed.", e);
    }
}
