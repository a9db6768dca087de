//! File-backed token store.
//!
//! Mappings are kept in a single JSON document so that tokens minted by one
//! process can be restored by another. Every operation re-reads the file.
//! Writes hold an exclusive advisory lock on `<path>.lock` for the whole
//! read-modify-write, so instances in other engines or processes sharing
//! the file never drop each other's entries, and each write lands through a
//! fresh temporary file that is renamed into place.

use crate::errors::StoreError;
use crate::store::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileEntry {
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

impl FileEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FileContents {
    #[serde(default)]
    entries: HashMap<String, FileEntry>,
}

/// Token store persisted to a JSON file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    ttl: Option<Duration>,
    /// Keeps this instance's writers from parking blocking threads on the
    /// file lock.
    lock: Mutex<()>,
}

impl FileStore {
    /// Store without expiry at `path`. The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ttl: None,
            lock: Mutex::new(()),
        }
    }

    /// Store whose entries expire `ttl` after being written.
    pub fn with_ttl(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::new(path)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete a mapping. Returns whether it existed.
    pub async fn remove(&self, key: &str) -> Result<bool, StoreError> {
        let key = key.to_string();
        self.locked(move |path| {
            let mut contents = load(path)?;
            let removed = contents.entries.remove(&key).is_some();
            if removed {
                save(path, &contents)?;
            }
            Ok(removed)
        })
        .await
    }

    /// Drop expired entries from the file. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<usize, StoreError> {
        self.locked(|path| {
            let mut contents = load(path)?;
            let removed = prune(&mut contents, Utc::now());
            if removed > 0 {
                save(path, &contents)?;
                tracing::debug!(removed = removed, path = %path.display(), "Purged expired tokens");
            }
            Ok(removed)
        })
        .await
    }

    /// Run blocking file work off the async runtime.
    async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Path) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || op(&path))
            .await
            .map_err(|e| StoreError::Internal(format!("file store task failed: {}", e)))?
    }

    /// Run a read-modify-write under the cross-process file lock.
    async fn locked<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Path) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let _guard = self.lock.lock().await;
        self.blocking(move |path| {
            let _lock = acquire_lock(path)?;
            op(path)
        })
        .await
    }

    async fn lookup(&self, key: &str) -> Result<Option<String>, StoreError> {
        let key = key.to_string();
        self.blocking(move |path| {
            let contents = load(path)?;
            let now = Utc::now();
            Ok(contents
                .entries
                .get(&key)
                .filter(|entry| entry.is_live(now))
                .map(|entry| entry.value.clone()))
        })
        .await
    }
}

fn unavailable(path: &Path, err: std::io::Error) -> StoreError {
    StoreError::Unavailable(format!("{}: {}", path.display(), err))
}

fn parent_dir(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}

/// Exclusive lock on the sidecar `<path>.lock`, released when the returned
/// handle is dropped.
fn acquire_lock(path: &Path) -> Result<File, StoreError> {
    if let Some(parent) = parent_dir(path) {
        std::fs::create_dir_all(parent)?;
    }

    let mut lock_path = path.as_os_str().to_owned();
    lock_path.push(".lock");
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(PathBuf::from(lock_path))
        .map_err(|e| unavailable(path, e))?;
    file.lock_exclusive().map_err(|e| unavailable(path, e))?;
    Ok(file)
}

fn load(path: &Path) -> Result<FileContents, StoreError> {
    match std::fs::read(path) {
        Ok(bytes) if bytes.is_empty() => Ok(FileContents::default()),
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Serialization(format!("{}: {}", path.display(), e))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(FileContents::default()),
        Err(e) => Err(unavailable(path, e)),
    }
}

fn save(path: &Path, contents: &FileContents) -> Result<(), StoreError> {
    let json =
        serde_json::to_vec_pretty(contents).map_err(|e| StoreError::Serialization(e.to_string()))?;

    let dir = parent_dir(path).unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

fn prune(contents: &mut FileContents, now: DateTime<Utc>) -> usize {
    let before = contents.entries.len();
    contents.entries.retain(|_, entry| entry.is_live(now));
    before - contents.entries.len()
}

#[async_trait]
impl Store for FileStore {
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let ttl = self.ttl;
        let key = key.to_string();
        let value = value.to_string();

        self.locked(move |path| {
            let mut contents = load(path)?;
            let now = Utc::now();
            prune(&mut contents, now);

            let expires_at = match ttl {
                Some(ttl) => {
                    let ttl = chrono::Duration::from_std(ttl)
                        .map_err(|e| StoreError::Internal(format!("invalid ttl: {}", e)))?;
                    Some(now + ttl)
                }
                None => None,
            };

            contents
                .entries
                .insert(key, FileEntry { value, expires_at });
            save(path, &contents)
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.lookup(key).await
    }

    async fn has(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lookup(key).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let store = FileStore::new(&path);
        store.put("{{EMAIL_a_1}}", "john@example.com").await.unwrap();
        drop(store);

        let reopened = FileStore::new(&path);
        assert_eq!(
            reopened.get("{{EMAIL_a_1}}").await.unwrap().as_deref(),
            Some("john@example.com")
        );
        assert!(reopened.has("{{EMAIL_a_1}}").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("nested/dir/tokens.json"));
        assert_eq!(store.get("k").await.unwrap(), None);

        // Parent directories are created on write
        store.put("k", "v").await.unwrap();
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::with_ttl(dir.path().join("t.json"), Duration::from_millis(30));
        store.put("k", "v").await.unwrap();
        assert!(store.has("k").await.unwrap());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(!store.has("k").await.unwrap());
        assert_eq!(store.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("t.json"));
        store.put("k", "v").await.unwrap();
        assert!(store.remove("k").await.unwrap());
        assert!(!store.remove("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.json");
        std::fs::write(&path, b"{not json").unwrap();

        let store = FileStore::new(&path);
        assert!(matches!(
            store.get("k").await,
            Err(StoreError::Serialization(_))
        ));
        assert!(store.put("k", "v").await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_instances_sharing_a_file_keep_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.json");
        let first = Arc::new(FileStore::new(&path));
        let second = Arc::new(FileStore::new(&path));

        let mut handles = Vec::new();
        for i in 0..40 {
            let store = if i % 2 == 0 { first.clone() } else { second.clone() };
            handles.push(tokio::spawn(async move {
                store.put(&format!("k{i}"), &format!("v{i}")).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let reader = FileStore::new(&path);
        for i in 0..40 {
            assert_eq!(reader.get(&format!("k{i}")).await.unwrap(), Some(format!("v{i}")));
        }

        // Only the store and its lock file remain; no temp files linger
        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["shared.json", "shared.json.lock"]);
    }

    #[tokio::test]
    async fn test_directory_path_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(matches!(store.get("k").await, Err(StoreError::Unavailable(_))));
    }
}
