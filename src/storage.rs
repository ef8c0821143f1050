//! Filesystem collaborator.
//!
//! The manager only needs two calls: an existence probe for the
//! already-downloaded short-circuit, and a relocation of finished bodies to
//! their final destination.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

/// Filesystem operations used by the manager.
#[async_trait]
pub trait FileStore: Send + Sync {
    /// Whether a file exists at `path`.
    async fn exists(&self, path: &Path) -> bool;

    /// Moves `source` to `destination`, replacing any existing file.
    async fn relocate(&self, source: &Path, destination: &Path) -> io::Result<()>;
}

/// [`FileStore`] backed by the local filesystem via `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileStore;

impl LocalFileStore {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn relocate(&self, source: &Path, destination: &Path) -> io::Result<()> {
        if let Some(parent) = destination.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        match tokio::fs::remove_file(destination).await {
            Ok(()) => debug!(path = %destination.display(), "replaced existing file"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }

        if tokio::fs::rename(source, destination).await.is_ok() {
            return Ok(());
        }

        // Rename fails across devices; fall back to copy + remove.
        tokio::fs::copy(source, destination).await?;
        tokio::fs::remove_file(source).await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_relocate_creates_parent_and_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("1.part");
        let destination = dir.path().join("nested/out/a.zip");
        tokio::fs::create_dir_all(destination.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(&destination, b"stale").await.unwrap();
        tokio::fs::write(&source, b"fresh").await.unwrap();

        let store = LocalFileStore::new();
        store.relocate(&source, &destination).await.unwrap();

        assert!(!store.exists(&source).await);
        assert_eq!(tokio::fs::read(&destination).await.unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn test_relocate_missing_source_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalFileStore::new();
        let result = store
            .relocate(&dir.path().join("missing"), &dir.path().join("out"))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_exists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        let store = LocalFileStore::new();
        assert!(!store.exists(&path).await);
        tokio::fs::write(&path, b"x").await.unwrap();
        assert!(store.exists(&path).await);
    }
}
