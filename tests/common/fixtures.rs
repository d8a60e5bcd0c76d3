//! Test environment: temp directories, stub extractor and a ready router.

#![allow(dead_code)]

use axum::extract::connect_info::MockConnectInfo;
use axum::Router;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

use mediagate::core::config::ServerConfig;
use mediagate::core::web_server::{create_router, AppState};
use mediagate::download::DeliveryMode;
use mediagate::Orchestrator;

/// Peer address every test request appears to come from
pub const TEST_PEER: ([u8; 4], u16) = ([127, 0, 0, 1], 40000);

/// Isolated environment for one test.
///
/// Owns a temp directory holding the stub script, the scratch directory and
/// the store directory; everything is removed when dropped.
pub struct TestEnvironment {
    pub dir: TempDir,
    pub config: ServerConfig,
}

impl TestEnvironment {
    /// Environment whose extractor is `/bin/sh <script>`.
    pub fn with_script(script: &str) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let script_path = dir.path().join("extractor.sh");
        std::fs::write(&script_path, script).expect("write stub script");

        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".parse().expect("valid addr"),
            extractor: vec!["/bin/sh".to_string(), script_path.to_string_lossy().into_owned()],
            scratch_dir: dir.path().join("scratch"),
            store_dir: dir.path().join("store"),
            rate_limit_max_requests: 100,
            rate_limit_window: Duration::from_secs(60),
            job_timeout: Duration::from_secs(20),
            stream_idle_timeout: Duration::from_secs(20),
            stderr_limit_bytes: 4096,
            default_delivery_mode: DeliveryMode::File,
            trust_forwarded_for: false,
        };

        Self { dir, config }
    }

    pub fn with_rate_limit(mut self, max_requests: u32) -> Self {
        self.config.rate_limit_max_requests = max_requests;
        self
    }

    /// Path inside the environment's temp directory.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.config.scratch_dir
    }

    pub fn store_dir(&self) -> &Path {
        &self.config.store_dir
    }

    /// Orchestrator with prepared directories.
    pub fn orchestrator(&self) -> Orchestrator {
        let orchestrator = Orchestrator::from_config(&self.config);
        orchestrator.scratch().prepare().expect("prepare scratch dir");
        orchestrator.store().prepare().expect("prepare store dir");
        orchestrator
    }

    /// Router with prepared directories and a fixed peer address.
    pub fn router(&self) -> Router {
        let state = AppState::new(self.orchestrator(), &self.config);
        create_router(state).layer(MockConnectInfo(SocketAddr::from(TEST_PEER)))
    }

    /// Names currently in the scratch directory.
    pub fn scratch_entries(&self) -> Vec<String> {
        match std::fs::read_dir(self.scratch_dir()) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}
