use super::{KvBytes, Store, StoreError, validate_key};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tokio::sync::watch;

/// Keeps everything in process. Pushes a notification on every change.
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
    changes: watch::Sender<u64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        MemoryStore {
            entries: RwLock::new(BTreeMap::new()),
            changes,
        }
    }

    fn notify(&self) {
        self.changes.send_modify(|generation| *generation += 1);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<KvBytes>, StoreError> {
        Ok(self.entries.read().get(key).map(|bytes| KvBytes {
            key: key.to_string(),
            bytes: bytes.clone(),
        }))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<KvBytes>, StoreError> {
        let entries = self.entries.read();
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, bytes)| KvBytes {
                key: key.clone(),
                bytes: bytes.clone(),
            })
            .collect())
    }

    async fn set(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        validate_key(key)?;
        self.entries.write().insert(key.to_string(), bytes);
        self.notify();
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let removed = self.entries.write().remove(key).is_some();
        if removed {
            self.notify();
        }
        Ok(())
    }

    fn subscribe(&self) -> Option<watch::Receiver<u64>> {
        Some(self.changes.subscribe())
    }
}
