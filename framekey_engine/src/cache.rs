//! In-memory session cache.
//!
//! A small moka cache holding CBOR-serialized values with a per-entry TTL.
//! `None` means the entry lives for the rest of the frame session. Used to
//! deduplicate cross-call work: the attested TEE key and the encrypted
//! master-key record are fetched once and reused.

use bytes::Bytes;
use ciborium::from_reader;
use moka::future::Cache;
use moka::policy::Expiry;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct SessionCache {
    entries: Cache<String, Arc<(Bytes, Option<Duration>)>>,
}

impl SessionCache {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(SessionExpiry)
                .build(),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Retrieves and deserializes a cached value. An entry that fails to
    /// deserialize is treated as absent.
    pub async fn get<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned,
    {
        let entry = self.entries.get(key).await?;
        from_reader(&entry.0[..]).ok()
    }

    /// Stores a value with an optional TTL; `None` keeps the entry for the
    /// session.
    pub async fn set<T>(&self, key: &str, value: &T, ttl: Option<Duration>)
    where
        T: Serialize,
    {
        let mut data = Vec::new();
        if ciborium::into_writer(value, &mut data).is_err() {
            return;
        }
        self.entries
            .insert(key.to_string(), Arc::new((data.into(), ttl)))
            .await;
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).await.is_some()
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(64)
    }
}

struct SessionExpiry;

impl Expiry<String, Arc<(Bytes, Option<Duration>)>> for SessionExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<(Bytes, Option<Duration>)>,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.1
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Arc<(Bytes, Option<Duration>)>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.1
    }
}
