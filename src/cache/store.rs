//! Key-value stores for computed JSON payloads.
//!
//! [`MemoryCacheStore`] keeps entries in a bounded in-process LRU;
//! [`RemoteCacheStore`](super::remote::RemoteCacheStore) talks to a REST KV service.
//! Both honour per-entry TTLs.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::infra::kv::KvError;

use super::ttl::BoundedTtlCache;

#[derive(Debug, Error)]
pub enum CacheStoreError {
    #[error("cache backend unavailable: {0}")]
    Backend(#[from] KvError),
    #[error("cache payload could not be encoded: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("cache payload could not be decoded: {0}")]
    Decode(#[source] serde_json::Error),
}

/// A payload together with the bookkeeping needed to expire it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub payload: Value,
    pub stored_at_ms: u64,
    pub ttl_ms: u64,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, payload: Value, stored_at_ms: u64, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            payload,
            stored_at_ms,
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// An entry is logically absent once `now - stored_at > ttl`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.stored_at_ms) > self.ttl_ms
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Short backend name for diagnostics (`memory`, `remote`).
    fn backend(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheStoreError>;

    async fn set(&self, key: &str, payload: Value, ttl: Duration) -> Result<(), CacheStoreError>;

    async fn delete(&self, key: &str) -> Result<bool, CacheStoreError>;

    /// Remove every key starting with `prefix` (all keys for an empty prefix).
    async fn clear(&self, prefix: &str) -> Result<u64, CacheStoreError>;

    /// Number of stored entries, when the backend can tell cheaply.
    async fn len(&self) -> Result<Option<u64>, CacheStoreError>;
}

pub struct MemoryCacheStore {
    entries: BoundedTtlCache<String, Value>,
}

impl MemoryCacheStore {
    pub fn new(capacity: NonZeroUsize, default_ttl: Duration) -> Self {
        Self {
            entries: BoundedTtlCache::new(capacity, default_ttl),
        }
    }

    pub fn set_at(&self, key: &str, payload: Value, ttl: Duration, now: Instant) {
        self.entries.insert_at(key.to_string(), payload, ttl, now);
    }

    pub fn get_at(&self, key: &str, now: Instant) -> Option<Value> {
        self.entries.get_at(&key.to_string(), now)
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheStoreError> {
        Ok(self.entries.get(&key.to_string()))
    }

    async fn set(&self, key: &str, payload: Value, ttl: Duration) -> Result<(), CacheStoreError> {
        self.entries.insert_with_ttl(key.to_string(), payload, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheStoreError> {
        Ok(self.entries.remove(&key.to_string()).is_some())
    }

    async fn clear(&self, prefix: &str) -> Result<u64, CacheStoreError> {
        let removed = if prefix.is_empty() {
            self.entries.clear()
        } else {
            self.entries.remove_where(|key| key.starts_with(prefix))
        };
        Ok(removed as u64)
    }

    async fn len(&self) -> Result<Option<u64>, CacheStoreError> {
        Ok(Some(self.entries.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn store() -> MemoryCacheStore {
        MemoryCacheStore::new(
            NonZeroUsize::new(4).expect("non-zero"),
            Duration::from_secs(300),
        )
    }

    #[test]
    fn entry_expiry_is_strictly_after_ttl() {
        let entry = CacheEntry::new("post:a", json!(1), 1_000, Duration::from_millis(500));
        assert!(!entry.is_expired(1_500));
        assert!(entry.is_expired(1_501));
    }

    #[tokio::test]
    async fn memory_store_round_trips_and_deletes() {
        let store = store();
        store
            .set("post:a", json!({"title": "A"}), Duration::from_secs(60))
            .await
            .expect("set");
        assert_eq!(
            store.get("post:a").await.expect("get"),
            Some(json!({"title": "A"}))
        );
        assert!(store.delete("post:a").await.expect("delete"));
        assert!(!store.delete("post:a").await.expect("second delete"));
        assert_eq!(store.get("post:a").await.expect("get"), None);
    }

    #[tokio::test]
    async fn clear_respects_prefix() {
        let store = store();
        for key in ["post:a", "post:b", "list:all"] {
            store
                .set(key, json!(key), Duration::from_secs(60))
                .await
                .expect("set");
        }
        assert_eq!(store.clear("post:").await.expect("clear"), 2);
        assert_eq!(store.len().await.expect("len"), Some(1));
        assert_eq!(store.clear("").await.expect("clear all"), 1);
    }

    #[test]
    fn expired_entries_are_misses() {
        let store = store();
        let start = Instant::now();
        store.set_at("post:a", json!(1), Duration::from_millis(10), start);
        assert_eq!(store.get_at("post:a", start + Duration::from_millis(5)), Some(json!(1)));
        assert_eq!(store.get_at("post:a", start + Duration::from_millis(11)), None);
    }
}
