//! Fixed-capacity LRU whose entries also expire after a time-to-live.
//!
//! Every process-local map that is keyed by caller-controlled input (search
//! queries, upstream hosts, proxied URLs) goes through this type so memory stays
//! bounded regardless of traffic.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;

use super::lock::mutex_lock;

const SOURCE: &str = "cache::ttl";

#[derive(Debug, Clone)]
struct Stamped<V> {
    value: V,
    stored_at: Instant,
    ttl: Duration,
}

impl<V> Stamped<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) > self.ttl
    }
}

pub struct BoundedTtlCache<K: Hash + Eq, V> {
    entries: Mutex<LruCache<K, Stamped<V>>>,
    default_ttl: Duration,
}

impl<K: Hash + Eq, V: Clone> BoundedTtlCache<K, V> {
    pub fn new(capacity: NonZeroUsize, default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            default_ttl,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    /// Look up `key` as of `now`, dropping the entry if it has expired.
    pub fn get_at(&self, key: &K, now: Instant) -> Option<V> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "get");
        let expired = match entries.get(key) {
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => return Some(entry.value.clone()),
            None => return None,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    /// Insert with the default TTL. Returns the key evicted for capacity, if any.
    pub fn insert(&self, key: K, value: V) -> Option<K> {
        self.insert_at(key, value, self.default_ttl, Instant::now())
    }

    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) -> Option<K> {
        self.insert_at(key, value, ttl, Instant::now())
    }

    pub fn insert_at(&self, key: K, value: V, ttl: Duration, now: Instant) -> Option<K> {
        let stamped = Stamped {
            value,
            stored_at: now,
            ttl,
        };
        let mut entries = mutex_lock(&self.entries, SOURCE, "insert");
        let replaced = entries.contains(&key);
        let evicted = entries.push(key, stamped);
        if replaced {
            None
        } else {
            evicted.map(|(key, _)| key)
        }
    }

    /// Read-modify-write under a single lock acquisition.
    ///
    /// `update` receives the live (non-expired) value, if any, and returns the value
    /// to store. The entry keeps its original timestamp when `restamp` is false.
    pub fn upsert_at<F>(&self, key: K, now: Instant, restamp: bool, update: F) -> V
    where
        F: FnOnce(Option<V>) -> V,
    {
        let mut entries = mutex_lock(&self.entries, SOURCE, "upsert");
        let (current, stored_at, ttl) = match entries.pop(&key) {
            Some(entry) if !entry.is_expired(now) => {
                (Some(entry.value), entry.stored_at, entry.ttl)
            }
            _ => (None, now, self.default_ttl),
        };
        let stored_at = if restamp || current.is_none() {
            now
        } else {
            stored_at
        };
        let value = update(current);
        entries.put(
            key,
            Stamped {
                value: value.clone(),
                stored_at,
                ttl,
            },
        );
        value
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        mutex_lock(&self.entries, SOURCE, "remove")
            .pop(key)
            .map(|entry| entry.value)
    }

    /// Remove every entry for which `predicate` holds. Returns how many were dropped.
    pub fn remove_where<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&K) -> bool,
        K: Clone,
    {
        let mut entries = mutex_lock(&self.entries, SOURCE, "remove_where");
        let doomed: Vec<K> = entries
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }

    pub fn clear(&self) -> usize {
        let mut entries = mutex_lock(&self.entries, SOURCE, "clear");
        let count = entries.len();
        entries.clear();
        count
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "capacity").cap().get()
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    fn cache(capacity: usize, ttl_ms: u64) -> BoundedTtlCache<String, u32> {
        BoundedTtlCache::new(
            NonZeroUsize::new(capacity).expect("non-zero"),
            Duration::from_millis(ttl_ms),
        )
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = cache(4, 100);
        let start = Instant::now();
        cache.insert_at("a".into(), 1, Duration::from_millis(100), start);

        assert_eq!(cache.get_at(&"a".into(), start + Duration::from_millis(100)), Some(1));
        assert_eq!(cache.get_at(&"a".into(), start + Duration::from_millis(101)), None);
        assert!(cache.is_empty(), "expired entry is dropped on read");
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let cache = cache(2, 60_000);
        cache.insert("a".into(), 1);
        cache.insert("b".into(), 2);
        assert_eq!(cache.get(&"a".into()), Some(1));

        let evicted = cache.insert("c".into(), 3);
        assert_eq!(evicted.as_deref(), Some("b"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.capacity(), 2);
    }

    #[test]
    fn upsert_keeps_original_timestamp_unless_restamped() {
        let cache = cache(4, 100);
        let start = Instant::now();
        cache.upsert_at("k".into(), start, false, |current| current.unwrap_or(0) + 1);
        cache.upsert_at("k".into(), start + Duration::from_millis(80), false, |current| {
            current.unwrap_or(0) + 1
        });
        assert_eq!(cache.get_at(&"k".into(), start + Duration::from_millis(90)), Some(2));
        assert_eq!(cache.get_at(&"k".into(), start + Duration::from_millis(120)), None);
    }

    #[test]
    fn remove_where_filters_by_key() {
        let cache = cache(8, 60_000);
        cache.insert("post:a".into(), 1);
        cache.insert("post:b".into(), 2);
        cache.insert("list".into(), 3);
        assert_eq!(cache.remove_where(|key| key.starts_with("post:")), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn recovers_from_poisoned_lock() {
        let cache = cache(2, 60_000);
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = cache.entries.lock().expect("lock should be acquired");
            panic!("poison the cache lock");
        }));

        cache.insert("a".into(), 1);
        assert_eq!(cache.get(&"a".into()), Some(1));
    }
}
