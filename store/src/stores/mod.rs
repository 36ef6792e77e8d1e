//! The key-value contract the write path and the store watcher depend on.

mod filesystem;
mod memory;

pub use filesystem::{FilesystemStore, write_atomic};
pub use memory::MemoryStore;

use async_trait::async_trait;
use std::io;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid key: {0:?}")]
    InvalidKey(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KvBytes {
    pub key: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<KvBytes>, StoreError>;

    /// Every entry whose key starts with `prefix`, ordered by key.
    async fn list(&self, prefix: &str) -> Result<Vec<KvBytes>, StoreError>;

    async fn set(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Change notifications, for backends that can push them. The value is a
    /// generation counter and only its changes matter.
    fn subscribe(&self) -> Option<watch::Receiver<u64>> {
        None
    }
}

#[async_trait]
impl<T: Store + ?Sized> Store for Arc<T> {
    async fn get(&self, key: &str) -> Result<Option<KvBytes>, StoreError> {
        (**self).get(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvBytes>, StoreError> {
        (**self).list(prefix).await
    }

    async fn set(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        (**self).set(key, bytes).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key).await
    }

    fn subscribe(&self) -> Option<watch::Receiver<u64>> {
        (**self).subscribe()
    }
}

/// Keys are `/` separated paths without empty, `.` or `..` segments.
pub(crate) fn validate_key(key: &str) -> Result<(), StoreError> {
    let valid = !key.is_empty()
        && key
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(key.to_string()))
    }
}
