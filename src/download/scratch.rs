//! Scratch directory and temp artifacts for file-mode retrievals.
//!
//! Every artifact is named by 128 random bits, so concurrent jobs never
//! collide and paths cannot be guessed. A [`TempArtifact`] deletes its file,
//! plus anything else the extractor wrote under the same stem, exactly once.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::core::error::AppError;
use crate::core::metrics;

/// Length of an artifact stem: 128 bits as lowercase hex
pub const STEM_LEN: usize = 32;

/// Suffixes of files the extractor is still writing
const PARTIAL_SUFFIXES: [&str; 4] = [".part", ".ytdl", ".temp", ".tmp"];

/// Directory holding in-flight artifacts.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Creates the directory if needed and removes artifacts left over from a
    /// previous run. Returns how many entries were purged.
    pub fn prepare(&self) -> io::Result<usize> {
        fs_err::create_dir_all(&self.root)?;

        let mut purged = 0;
        for entry in fs_err::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !is_artifact_name(name) {
                continue;
            }
            match fs_err::remove_file(entry.path()) {
                Ok(()) => purged += 1,
                Err(e) => log::warn!("Failed to purge stale artifact: {}", e),
            }
        }

        if purged > 0 {
            log::info!("Purged {} stale artifacts from {}", purged, self.root.display());
        }
        Ok(purged)
    }

    /// Reserves a fresh artifact path `<root>/<random>.<extension>`.
    ///
    /// Nothing is created on disk; the extractor writes the file. Fails with
    /// `StorageUnavailable` when the scratch directory does not exist.
    pub async fn new_artifact(&self, extension: &str) -> Result<TempArtifact, AppError> {
        match fs_err::tokio::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(AppError::StorageUnavailable(format!(
                    "{} is not a directory",
                    self.root.display()
                )))
            }
            Err(e) => return Err(AppError::StorageUnavailable(e.to_string())),
        }

        let stem = format!("{:032x}", rand::random::<u128>());
        let extension = sanitize_extension(extension);
        let path = self.root.join(format!("{}.{}", stem, extension));

        log::debug!("Reserved artifact {}", path.display());
        Ok(TempArtifact {
            dir: self.root.clone(),
            stem,
            path,
            cleaned: AtomicBool::new(false),
            removal_attempts: AtomicUsize::new(0),
        })
    }
}

/// A reserved path in the scratch directory, removed on cleanup or drop.
#[derive(Debug)]
pub struct TempArtifact {
    dir: PathBuf,
    stem: String,
    path: PathBuf,
    cleaned: AtomicBool,
    removal_attempts: AtomicUsize,
}

impl TempArtifact {
    /// Expected path of the finished file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stem(&self) -> &str {
        &self.stem
    }

    /// Output template handed to the extractor: same stem, extension chosen by
    /// the extractor once it knows the container.
    pub fn output_template(&self) -> String {
        self.dir
            .join(format!("{}.%(ext)s", self.stem))
            .to_string_lossy()
            .into_owned()
    }

    /// Finds the file the extractor actually produced: the expected path when
    /// present, otherwise the largest finished sibling sharing the stem.
    pub async fn resolve_output(&self) -> Option<PathBuf> {
        if let Ok(meta) = fs_err::tokio::metadata(&self.path).await {
            if meta.is_file() {
                return Some(self.path.clone());
            }
        }

        let mut best: Option<(u64, PathBuf)> = None;
        let mut entries = fs_err::tokio::read_dir(&self.dir).await.ok()?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !self.owns(name) || PARTIAL_SUFFIXES.iter().any(|s| name.ends_with(s)) {
                continue;
            }
            let Ok(meta) = entry.metadata().await else { continue };
            if !meta.is_file() {
                continue;
            }
            if best.as_ref().is_none_or(|(size, _)| meta.len() > *size) {
                best = Some((meta.len(), entry.path()));
            }
        }
        best.map(|(_, path)| path)
    }

    /// Whether `file_name` belongs to this artifact.
    fn owns(&self, file_name: &str) -> bool {
        owned_by(&self.stem, file_name)
    }

    /// Claims the one removal this artifact gets.
    fn claim(&self) -> bool {
        if self.cleaned.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.removal_attempts.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Removes the artifact and every sibling sharing its stem, blocking the
    /// calling thread.
    ///
    /// Only the first removal (this, [`remove`](Self::remove) or the one made
    /// from `Drop`) does any work; later calls return `false`.
    pub fn cleanup(&self) -> bool {
        if !self.claim() {
            return false;
        }
        remove_stem(&self.dir, &self.stem);
        true
    }

    /// Same as [`cleanup`](Self::cleanup), with the directory scan moved to
    /// the blocking pool.
    pub async fn remove(&self) -> bool {
        if !self.claim() {
            return false;
        }
        let (dir, stem) = (self.dir.clone(), self.stem.clone());
        if let Err(e) = tokio::task::spawn_blocking(move || remove_stem(&dir, &stem)).await {
            log::warn!("Artifact cleanup task failed: {}", e);
        }
        true
    }

    /// Number of times the removal routine actually ran (0 or 1).
    #[cfg(test)]
    fn removal_attempts(&self) -> usize {
        self.removal_attempts.load(Ordering::Relaxed)
    }
}

impl Drop for TempArtifact {
    fn drop(&mut self) {
        if !self.claim() {
            return;
        }
        let (dir, stem) = (std::mem::take(&mut self.dir), std::mem::take(&mut self.stem));
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(move || remove_stem(&dir, &stem));
            }
            Err(_) => {
                remove_stem(&dir, &stem);
            }
        }
    }
}

fn owned_by(stem: &str, file_name: &str) -> bool {
    file_name == stem
        || file_name
            .strip_prefix(stem)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Deletes every file in `dir` named `stem` or `stem.*`.
fn remove_stem(dir: &Path, stem: &str) -> usize {
    let mut removed = 0usize;
    match fs_err::read_dir(dir) {
        Ok(entries) => {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if !owned_by(stem, name) {
                    continue;
                }
                match fs_err::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => log::warn!("Failed to remove artifact file: {}", e),
                }
            }
        }
        Err(e) => log::warn!("Cannot list scratch directory during cleanup: {}", e),
    }

    metrics::ARTIFACT_CLEANUPS_TOTAL.inc();
    log::debug!("Cleaned up artifact {} ({} files removed)", stem, removed);
    removed
}

/// Keeps only ASCII alphanumerics; falls back to `bin`.
fn sanitize_extension(extension: &str) -> String {
    let cleaned: String = extension
        .trim_start_matches('.')
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect::<String>()
        .to_ascii_lowercase();
    if cleaned.is_empty() {
        "bin".to_string()
    } else {
        cleaned
    }
}

/// Whether `name` looks like `<32 hex>` optionally followed by `.<anything>`.
fn is_artifact_name(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or_default();
    stem.len() == STEM_LEN && stem.chars().all(|c| c.is_ascii_hexdigit())
}
