//! In-memory token store with optional TTL and capacity limit.

use crate::errors::StoreError;
use crate::store::Store;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Token entry with metadata.
#[derive(Debug, Clone)]
struct TokenEntry {
    /// Original value.
    original: String,
    /// Creation timestamp.
    created_at: Instant,
}

/// Process-local token store.
///
/// Without a TTL entries live as long as the store. Cloning is cheap and
/// clones share the same entries.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, TokenEntry>>,
    ttl: Option<Duration>,
    max_entries: Option<usize>,
}

impl MemoryStore {
    /// Create an unbounded store with no expiry.
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl: None,
            max_entries: None,
        }
    }

    /// Create a store whose entries expire `ttl` after being written.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::new()
        }
    }

    /// Limit the number of live entries.
    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Delete a mapping. Returns whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        purge(&self.entries, self.ttl)
    }

    /// Periodically purge expired entries in the background.
    ///
    /// Returns `None` when there is no TTL or no tokio runtime. The task
    /// stops once every handle to the store has been dropped.
    pub fn spawn_cleanup_task(&self, every: Duration) -> Option<JoinHandle<()>> {
        let ttl = self.ttl?;
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let entries: Weak<DashMap<String, TokenEntry>> = Arc::downgrade(&self.entries);

        Some(handle.spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let Some(entries) = entries.upgrade() else {
                    break;
                };
                let removed = purge(&entries, Some(ttl));
                if removed > 0 {
                    tracing::debug!(removed = removed, "Cleaned up expired tokens");
                }
            }
        }))
    }

    /// Drop `key` only while it is still expired; a concurrent put may have
    /// replaced it since it was read.
    fn remove_if_expired(&self, key: &str) -> bool {
        self.entries
            .remove_if(key, |_, entry| self.is_expired(entry))
            .is_some()
    }

    fn is_expired(&self, entry: &TokenEntry) -> bool {
        self.ttl
            .is_some_and(|ttl| entry.created_at.elapsed() >= ttl)
    }
}

fn purge(entries: &DashMap<String, TokenEntry>, ttl: Option<Duration>) -> usize {
    let Some(ttl) = ttl else {
        return 0;
    };
    let before = entries.len();
    entries.retain(|_, entry| entry.created_at.elapsed() < ttl);
    before.saturating_sub(entries.len())
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if let Some(max_entries) = self.max_entries {
            if !self.entries.contains_key(key) && self.entries.len() >= max_entries {
                // Make room from expired entries before refusing
                self.purge_expired();
                if self.entries.len() >= max_entries {
                    return Err(StoreError::CapacityExceeded { max_entries });
                }
            }
        }

        self.entries.insert(
            key.to_string(),
            TokenEntry {
                original: value.to_string(),
                created_at: Instant::now(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if let Some(entry) = self.entries.get(key) {
            if !self.is_expired(&entry) {
                return Ok(Some(entry.original.clone()));
            }
        }
        self.remove_if_expired(key);
        Ok(None)
    }

    async fn has(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .entries
            .get(key)
            .is_some_and(|entry| !self.is_expired(&entry)))
    }
}
