use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::error::{Error, Result};

/// File operations the notes host provides. Paths are relative to the vault root.
#[async_trait]
pub trait Vault: Send + Sync {
    async fn read(&self, path: &Path) -> Result<String>;
    /// Create or overwrite, creating parent folders as needed
    async fn write(&self, path: &Path, content: &str) -> Result<()>;
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;
    async fn delete(&self, path: &Path) -> Result<()>;
    /// Markdown files directly inside `dir`
    async fn list(&self, dir: &Path) -> Result<Vec<PathBuf>>;
    async fn exists(&self, path: &Path) -> bool;
    /// Map an absolute path reported by the file watcher back to a vault path
    fn relative(&self, absolute: &Path) -> Option<PathBuf>;
}

/// A vault backed by a folder on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsVault {
    root: PathBuf,
}

impl FsVault {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn full(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }
}

#[async_trait]
impl Vault for FsVault {
    async fn read(&self, path: &Path) -> Result<String> {
        let full = self.full(path);
        fs::read_to_string(&full)
            .await
            .map_err(|e| Error::storage(full, e))
    }

    async fn write(&self, path: &Path, content: &str) -> Result<()> {
        let full = self.full(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::storage(parent, e))?;
        }
        fs::write(&full, content)
            .await
            .map_err(|e| Error::storage(&full, e))?;
        debug!(path = %path.display(), bytes = content.len(), "wrote note");
        Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let target = self.full(to);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::storage(parent, e))?;
        }
        fs::rename(self.full(from), &target)
            .await
            .map_err(|e| Error::storage(target, e))
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let full = self.full(path);
        fs::remove_file(&full)
            .await
            .map_err(|e| Error::storage(full, e))
    }

    async fn list(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let full = self.full(dir);
        let mut files = Vec::new();
        if !full.exists() {
            return Ok(files);
        }

        let mut entries = fs::read_dir(&full)
            .await
            .map_err(|e| Error::storage(&full, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::storage(&full, e))?
        {
            let file_path = entry.path();
            if file_path.extension().map_or(false, |ext| ext == "md") {
                if let Some(name) = file_path.file_name() {
                    files.push(dir.join(name));
                }
            }
        }
        files.sort();
        Ok(files)
    }

    async fn exists(&self, path: &Path) -> bool {
        fs::metadata(self.full(path)).await.is_ok()
    }

    fn relative(&self, absolute: &Path) -> Option<PathBuf> {
        absolute
            .strip_prefix(&self.root)
            .ok()
            .map(Path::to_path_buf)
            .or_else(|| {
                let root = self.root.canonicalize().ok()?;
                absolute.strip_prefix(root).ok().map(Path::to_path_buf)
            })
    }
}

/// One async mutex per note path. Holding the guard serializes every read-modify-write
/// of that note; different notes proceed independently.
#[derive(Debug, Clone, Default)]
pub struct DocumentLocks {
    inner: Arc<Mutex<HashMap<PathBuf, Arc<AsyncMutex<()>>>>>,
}

impl DocumentLocks {
    pub async fn lock(&self, path: &Path) -> DocumentGuard {
        let lock = {
            let mut map = self.inner.lock().expect("document locks mutex");
            map.entry(path.to_path_buf()).or_default().clone()
        };
        DocumentGuard {
            guard: Some(lock.lock_owned().await),
            path: path.to_path_buf(),
            locks: self.clone(),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.inner.lock().expect("document locks mutex").len()
    }
}

/// Holds one note's lock. The map entry goes away with the last holder or waiter.
pub struct DocumentGuard {
    guard: Option<OwnedMutexGuard<()>>,
    path: PathBuf,
    locks: DocumentLocks,
}

impl Drop for DocumentGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.locks.inner.lock().expect("document locks mutex");
        if map.get(&self.path).map_or(false, |lock| Arc::strong_count(lock) == 1) {
            map.remove(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_creates_parent_folders() {
        let dir = tempfile::tempdir().unwrap();
        let vault = FsVault::new(dir.path());
        let path = Path::new("Nutrition/Food Log/2026-01-02.md");
        vault.write(path, "hello").await.unwrap();
        assert!(vault.exists(path).await);
        assert_eq!(vault.read(path).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_list_only_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let vault = FsVault::new(dir.path());
        vault.write(Path::new("m/b.md"), "").await.unwrap();
        vault.write(Path::new("m/a.md"), "").await.unwrap();
        vault.write(Path::new("m/c.json"), "").await.unwrap();
        let listed = vault.list(Path::new("m")).await.unwrap();
        assert_eq!(listed, vec![PathBuf::from("m/a.md"), PathBuf::from("m/b.md")]);
        assert!(vault.list(Path::new("missing")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rename_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let vault = FsVault::new(dir.path());
        vault.write(Path::new("a.md"), "x").await.unwrap();
        vault.rename(Path::new("a.md"), Path::new("sub/b.md")).await.unwrap();
        assert!(!vault.exists(Path::new("a.md")).await);
        vault.delete(Path::new("sub/b.md")).await.unwrap();
        assert!(!vault.exists(Path::new("sub/b.md")).await);
    }

    #[tokio::test]
    async fn test_read_missing_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let vault = FsVault::new(dir.path());
        let err = vault.read(Path::new("nope.md")).await.unwrap_err();
        assert!(matches!(err, Error::Storage { .. }));
    }

    #[tokio::test]
    async fn test_document_locks_serialize_same_path() {
        let locks = DocumentLocks::default();
        let guard = locks.lock(Path::new("a.md")).await;
        let other = locks.lock(Path::new("b.md")).await;
        drop(other);

        let again = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = again.lock(Path::new("a.md")).await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_document_locks_forget_released_paths() {
        let locks = DocumentLocks::default();
        let first = locks.lock(Path::new("a.md")).await;

        let again = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = again.lock(Path::new("a.md")).await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        drop(first);
        // The waiter still needs the entry
        waiter.await.unwrap();
        assert_eq!(locks.len(), 0);

        for name in ["b.md", "c.md", "d.md"] {
            let _g = locks.lock(Path::new(name)).await;
        }
        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn test_relative() {
        let vault = FsVault::new("/notes");
        assert_eq!(
            vault.relative(Path::new("/notes/Meals/x.md")),
            Some(PathBuf::from("Meals/x.md"))
        );
        assert_eq!(vault.relative(Path::new("/elsewhere/x.md")), None);
    }
}
