//! Persistent storage for retrieved media

pub mod files;

// Re-exports for convenience
pub use files::{FileStore, StoredFile};
