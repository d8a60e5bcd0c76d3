//! mediagate - HTTP front end for a yt-dlp compatible media extractor
//!
//! Lists the formats available for a media URL and retrieves a chosen format
//! as a file attachment or a live byte stream, under a per-client rate limit.
//! Every subprocess is supervised and every temp file is removed, whether the
//! request succeeds, fails or the client disconnects.
//!
//! # Module Structure
//!
//! - `core`: configuration, errors, validation, rate limiting, logging, metrics, HTTP server
//! - `download`: temp artifacts, extractor invocation, format listing, orchestration
//! - `storage`: persistent file store
//! - `cli`: command-line interface

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

pub mod cli;
pub mod core;
pub mod download;
pub mod storage;

// Re-export commonly used types for convenience
pub use crate::core::error::{AppError, AppResult};
pub use download::{Delivery, DeliveryMode, FormatDescriptor, Orchestrator, RetrievalRequest};
pub use storage::{FileStore, StoredFile};
