//! Common test utilities
//!
//! This module is shared across all integration tests

pub mod fixtures;
pub mod helpers;
pub mod stubs;

#[allow(unused_imports)]
pub use fixtures::TestEnvironment;
#[allow(unused_imports)]
pub use helpers::{body_bytes, body_json, delete, eventually, get, post_json, post_raw, process_exists, process_running, wait_for_pid};
