//! Token store implementations.
//!
//! A store maps placeholder tokens to the original values they replaced.
//! Backends differ in lifetime and durability; the engine only relies on the
//! three operations of [`Store`].

mod encrypted;
mod file;
mod memory;

pub use encrypted::{EncryptedStore, EncryptionKey};
pub use file::FileStore;
pub use memory::MemoryStore;

use crate::errors::StoreError;
use async_trait::async_trait;
use std::sync::Arc;

/// Key-value persistence for token mappings.
///
/// Implementations must be safe for concurrent use. A value written and not
/// yet expired must be returned unchanged by `get`, and `has` must agree
/// with `get`.
#[async_trait]
pub trait Store: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Retrieve the value for `key`, or `None` if unknown or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Check whether `key` currently resolves.
    async fn has(&self, key: &str) -> Result<bool, StoreError>;
}

#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    async fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).put(key, value).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key).await
    }

    async fn has(&self, key: &str) -> Result<bool, StoreError> {
        (**self).has(key).await
    }
}
