//! Core utilities, configuration, and common functionality

pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod process;
pub mod rate_limiter;
pub mod utils;
pub mod validation;
pub mod web_server;

// Re-exports for convenience
pub use config::ServerConfig;
pub use error::{AppError, AppResult};
pub use logging::init_logger;
pub use rate_limiter::RateLimiter;
