//! Persistent file store
//!
//! One flat directory of retrieved media, browsed through `/files`. Files land
//! here through [`FileStore::adopt`] after a `/process` retrieval completes.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};

use crate::core::error::{AppError, AppResult};
use crate::core::validation::validate_file_name;
use crate::download::invoker::FileOutput;

/// Structure representing one stored file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredFile {
    /// File name inside the store (no directories)
    pub name: String,
    /// Size in bytes
    pub size: u64,
    /// Last modification time, when the filesystem reports one
    pub modified: Option<DateTime<Utc>>,
}

impl StoredFile {
    fn from_metadata(name: String, meta: &std::fs::Metadata) -> Self {
        Self {
            name,
            size: meta.len(),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
        }
    }
}

/// Flat directory of stored media.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates the store directory if it does not exist yet.
    pub fn prepare(&self) -> io::Result<()> {
        fs_err::create_dir_all(&self.root)
    }

    async fn canonical_root(&self) -> AppResult<PathBuf> {
        fs_err::tokio::canonicalize(&self.root)
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))
    }

    /// Maps a caller-supplied name to a path inside the store.
    ///
    /// # Errors
    /// - `InvalidInput` for names with separators, parent references, leading dots
    /// - `NotFound` when no such file exists
    async fn resolve(&self, name: &str) -> AppResult<PathBuf> {
        let name = validate_file_name(name)?;
        let root = self.canonical_root().await?;

        let path = match fs_err::tokio::canonicalize(root.join(name)).await {
            Ok(path) => path,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(AppError::NotFound(name.to_string())),
            Err(e) => return Err(AppError::Io(e)),
        };

        // Symlinks must not lead out of the store
        if !path.starts_with(&root) {
            log::warn!("Rejected store path escaping root: {}", name);
            return Err(AppError::InvalidInput("Invalid file name".to_string()));
        }
        Ok(path)
    }

    /// Lists regular files in the store, sorted by name.
    pub async fn list(&self) -> AppResult<Vec<StoredFile>> {
        let mut entries = fs_err::tokio::read_dir(&self.root)
            .await
            .map_err(|e| AppError::StorageUnavailable(e.to_string()))?;

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else { continue };
            if name.starts_with('.') {
                continue;
            }
            let meta = entry.metadata().await?;
            if meta.is_file() {
                files.push(StoredFile::from_metadata(name, &meta));
            }
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Opens a stored file for reading.
    pub async fn open(&self, name: &str) -> AppResult<(fs_err::tokio::File, StoredFile)> {
        let path = self.resolve(name).await?;
        let file = fs_err::tokio::File::open(&path).await?;
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(AppError::NotFound(name.to_string()));
        }
        Ok((file, StoredFile::from_metadata(name.to_string(), &meta)))
    }

    /// Deletes a stored file.
    pub async fn delete(&self, name: &str) -> AppResult<()> {
        let path = self.resolve(name).await?;
        match fs_err::tokio::remove_file(&path).await {
            Ok(()) => {
                log::info!("Deleted stored file {}", name);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(AppError::NotFound(name.to_string())),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Moves a completed artifact into the store.
    ///
    /// The stored name reuses the artifact's random stem, so it is unique and
    /// unguessable. Renames when possible, otherwise copies and lets the
    /// artifact remove the source.
    pub async fn adopt(&self, output: FileOutput) -> AppResult<StoredFile> {
        let name = format!("{}.{}", output.artifact.stem(), output.extension());
        let dest = self.root.join(&name);

        if !fs_err::tokio::metadata(&self.root).await.is_ok_and(|meta| meta.is_dir()) {
            return Err(AppError::StorageUnavailable(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }

        if let Err(e) = fs_err::tokio::rename(output.path(), &dest).await {
            log::debug!("rename into store failed ({}), copying instead", e);
            if let Err(e) = fs_err::tokio::copy(output.path(), &dest).await {
                // Leave nothing half-copied behind
                let _ = fs_err::tokio::remove_file(&dest).await;
                return Err(AppError::StorageUnavailable(e.to_string()));
            }
        }
        // Removes the source (if copied) and any sibling fragments
        output.artifact.remove().await;

        let meta = fs_err::tokio::metadata(&dest).await?;
        log::info!("Stored {} ({} bytes)", name, meta.len());
        Ok(StoredFile::from_metadata(name, &meta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store() -> (tempfile::TempDir, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("store"));
        store.prepare().unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_list_sorted_and_skips_hidden() {
        let (_dir, store) = store();
        std::fs::write(store.root().join("b.mp4"), b"bb").unwrap();
        std::fs::write(store.root().join("a.webm"), b"a").unwrap();
        std::fs::write(store.root().join(".hidden"), b"x").unwrap();
        std::fs::create_dir(store.root().join("subdir")).unwrap();

        let files = store.list().await.unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.webm", "b.mp4"]);
        assert_eq!(files[1].size, 2);
        assert!(files[0].modified.is_some());
    }

    #[tokio::test]
    async fn test_open_and_delete() {
        let (_dir, store) = store();
        std::fs::write(store.root().join("clip.mp4"), b"data").unwrap();

        let (_file, meta) = store.open("clip.mp4").await.unwrap();
        assert_eq!(meta.size, 4);

        store.delete("clip.mp4").await.unwrap();
        assert!(matches!(store.open("clip.mp4").await, Err(AppError::NotFound(_))));
        assert!(matches!(store.delete("clip.mp4").await, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("secret.txt"), b"secret").unwrap();

        for name in ["../secret.txt", "..", "sub/../../secret.txt", ".env"] {
            assert!(
                matches!(store.open(name).await, Err(AppError::InvalidInput(_))),
                "{} should be rejected",
                name
            );
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_escape_rejected() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("secret.txt"), b"secret").unwrap();
        std::os::unix::fs::symlink(dir.path().join("secret.txt"), store.root().join("link.txt")).unwrap();

        assert!(matches!(store.open("link.txt").await, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_missing_store_is_storage_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("absent"));
        assert!(matches!(store.list().await, Err(AppError::StorageUnavailable(_))));
    }
}
