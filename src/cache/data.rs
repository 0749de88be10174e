//! Read-through cache for computed JSON payloads (rendered posts and similar).

use std::error::Error as StdError;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};

use super::policy::FailurePolicy;
use super::store::{CacheStore, CacheStoreError};

const METRIC_DATA_HIT: &str = "folio_cache_hit_total";
const METRIC_DATA_MISS: &str = "folio_cache_miss_total";
const METRIC_DATA_ERROR: &str = "folio_cache_error_total";

#[derive(Debug, Error)]
pub enum CacheLookupError<E: StdError + 'static> {
    #[error(transparent)]
    Store(#[from] CacheStoreError),
    #[error(transparent)]
    Compute(E),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataCacheStats {
    pub backend: &'static str,
    pub entries: Option<u64>,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
}

pub struct DataCache {
    store: Arc<dyn CacheStore>,
    policy: FailurePolicy,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl DataCache {
    pub fn new(store: Arc<dyn CacheStore>, policy: FailurePolicy) -> Self {
        Self {
            store,
            policy,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Return the cached value for `key`, computing and storing it on a miss.
    ///
    /// Store failures are treated as misses under [`FailurePolicy::Open`] and
    /// returned as [`CacheLookupError::Store`] under [`FailurePolicy::Closed`].
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<T, CacheLookupError<E>>
    where
        T: Serialize + DeserializeOwned,
        E: StdError + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.store.get(key).await {
            Ok(Some(payload)) => match serde_json::from_value::<T>(payload) {
                Ok(value) => {
                    self.record_hit();
                    return Ok(value);
                }
                Err(err) => {
                    // A payload from an older shape is just a miss.
                    debug!(
                        target = "folio::cache",
                        key,
                        error = %err,
                        "discarding undecodable cache entry"
                    );
                }
            },
            Ok(None) => {}
            Err(err) => self.absorb("get", key, err)?,
        }

        self.record_miss();
        let value = compute().await.map_err(CacheLookupError::Compute)?;

        match serde_json::to_value(&value) {
            Ok(payload) => {
                if let Err(err) = self.store.set(key, payload, ttl).await {
                    self.absorb("set", key, err)?;
                }
            }
            Err(err) => self.absorb("encode", key, CacheStoreError::Encode(err))?,
        }

        Ok(value)
    }

    pub async fn invalidate(&self, key: &str) -> Result<bool, CacheStoreError> {
        match self.store.delete(key).await {
            Ok(removed) => Ok(removed),
            Err(err) => self.absorb("delete", key, err).map(|_| false),
        }
    }

    pub async fn clear(&self, prefix: &str) -> Result<u64, CacheStoreError> {
        match self.store.clear(prefix).await {
            Ok(removed) => Ok(removed),
            Err(err) => self.absorb("clear", prefix, err).map(|_| 0),
        }
    }

    pub async fn stats(&self) -> DataCacheStats {
        let entries = match self.store.len().await {
            Ok(entries) => entries,
            Err(err) => {
                self.record_error("len", &err);
                None
            }
        };
        DataCacheStats {
            backend: self.store.backend(),
            entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    fn absorb(&self, op: &'static str, key: &str, err: CacheStoreError) -> Result<(), CacheStoreError> {
        self.record_error(op, &err);
        if self.policy.is_open() {
            warn!(
                target = "folio::cache",
                op,
                key,
                backend = self.store.backend(),
                error = %err,
                "cache store failed; continuing without cache"
            );
            Ok(())
        } else {
            Err(err)
        }
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_DATA_HIT, "backend" => self.store.backend()).increment(1);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_DATA_MISS, "backend" => self.store.backend()).increment(1);
    }

    fn record_error(&self, op: &'static str, err: &CacheStoreError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_DATA_ERROR, "backend" => self.store.backend(), "op" => op).increment(1);
        debug!(target = "folio::cache", op, error = %err, "cache store error recorded");
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use serde_json::Value;

    use super::*;
    use crate::cache::store::MemoryCacheStore;
    use crate::infra::kv::KvError;

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        fn backend(&self) -> &'static str {
            "broken"
        }

        async fn get(&self, _key: &str) -> Result<Option<Value>, CacheStoreError> {
            Err(KvError::Command("down".to_string()).into())
        }

        async fn set(&self, _key: &str, _payload: Value, _ttl: Duration) -> Result<(), CacheStoreError> {
            Err(KvError::Command("down".to_string()).into())
        }

        async fn delete(&self, _key: &str) -> Result<bool, CacheStoreError> {
            Err(KvError::Command("down".to_string()).into())
        }

        async fn clear(&self, _prefix: &str) -> Result<u64, CacheStoreError> {
            Err(KvError::Command("down".to_string()).into())
        }

        async fn len(&self) -> Result<Option<u64>, CacheStoreError> {
            Err(KvError::Command("down".to_string()).into())
        }
    }

    #[derive(Debug, Error)]
    #[error("compute failed")]
    struct ComputeFailed;

    fn memory_cache() -> DataCache {
        let store = MemoryCacheStore::new(
            NonZeroUsize::new(8).expect("non-zero"),
            Duration::from_secs(60),
        );
        DataCache::new(Arc::new(store), FailurePolicy::Open)
    }

    #[tokio::test]
    async fn second_lookup_is_served_from_cache() {
        let cache = memory_cache();
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        for _ in 0..2 {
            let value: String = cache
                .get_or_compute("post:a", Duration::from_secs(60), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ComputeFailed>("rendered".to_string())
                })
                .await
                .expect("lookup");
            assert_eq!(value, "rendered");
        }

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        let stats = cache.stats().await;
        assert_eq!((stats.hits, stats.misses, stats.errors), (1, 1, 0));
        assert_eq!(stats.entries, Some(1));
    }

    #[tokio::test]
    async fn open_policy_computes_through_store_failures() {
        let cache = DataCache::new(Arc::new(BrokenStore), FailurePolicy::Open);
        let value: u32 = cache
            .get_or_compute("post:a", Duration::from_secs(60), || async {
                Ok::<_, ComputeFailed>(7)
            })
            .await
            .expect("fail open");
        assert_eq!(value, 7);
        assert_eq!(cache.clear("").await.expect("clear is absorbed"), 0);
        assert_eq!(cache.stats().await.errors, 4);
    }

    #[tokio::test]
    async fn closed_policy_surfaces_store_failures() {
        let cache = DataCache::new(Arc::new(BrokenStore), FailurePolicy::Closed);
        let result: Result<u32, _> = cache
            .get_or_compute("post:a", Duration::from_secs(60), || async {
                Ok::<_, ComputeFailed>(7)
            })
            .await;
        assert!(matches!(result, Err(CacheLookupError::Store(_))));
    }

    #[tokio::test]
    async fn compute_errors_are_not_cached() {
        let cache = memory_cache();
        let result: Result<u32, _> = cache
            .get_or_compute("post:a", Duration::from_secs(60), || async { Err(ComputeFailed) })
            .await;
        assert!(matches!(result, Err(CacheLookupError::Compute(ComputeFailed))));
        assert_eq!(cache.stats().await.entries, Some(0));
    }
}
