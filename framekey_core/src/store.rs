//! Key-value storage adapter.
//!
//! The host shell owns durable storage; the core only sees this trait. The
//! one entry the core writes is the device identity key pair, which is stored
//! without a TTL and removed only by an explicit clear.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Logical bucket holding the client encryption keys.
pub const ENCRYPTION_KEYS_BUCKET: &str = "encryption-keys";

/// Storage key of the device identity key pair within the encryption keys
/// bucket.
pub const IDENTITY_KEY_PAIR_KEY: &str = "device-identity-key-pair";

#[derive(Debug, thiserror::Error)]
#[error("storage error: {0}")]
pub struct StorageError(pub String);

/// Generic key-value adapter with TTL semantics, implemented by the host.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Stores a value; `ttl = None` keeps the entry until deleted.
    async fn set(
        &self,
        bucket: &str,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError>;

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError>;
}

/// In-memory [`KeyValueStore`] for tests and hosts without durable storage.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<(String, String), (Vec<u8>, Option<Instant>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let id = (bucket.to_string(), key.to_string());
        let expired = {
            let entries = self.entries.read();
            match entries.get(&id) {
                Some((_, Some(deadline))) if *deadline <= Instant::now() => true,
                Some((value, _)) => return Ok(Some(value.clone())),
                None => return Ok(None),
            }
        };
        if expired {
            self.entries.write().remove(&id);
        }
        Ok(None)
    }

    async fn set(
        &self,
        bucket: &str,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), StorageError> {
        let deadline = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .write()
            .insert((bucket.to_string(), key.to_string()), (value, deadline));
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        self.entries
            .write()
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_delete() {
        let store = MemoryStore::new();
        assert!(store.get("b", "k").await.unwrap().is_none());

        store.set("b", "k", vec![1, 2, 3], None).await.unwrap();
        assert_eq!(store.get("b", "k").await.unwrap(), Some(vec![1, 2, 3]));
        assert!(store.get("other", "k").await.unwrap().is_none());

        store.delete("b", "k").await.unwrap();
        assert!(store.get("b", "k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ttl_expires_entries() {
        let store = MemoryStore::new();
        store
            .set("b", "k", vec![7], Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(store.get("b", "k").await.unwrap(), Some(vec![7]));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store.get("b", "k").await.unwrap().is_none());
    }
}
