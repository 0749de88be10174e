//! Data cache configuration.
//!
//! Controlled via the `[cache]` table of `folio.toml`.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::infra::kv::KvClient;

use super::policy::FailurePolicy;
use super::remote::RemoteCacheStore;
use super::store::{CacheStore, MemoryCacheStore};

const DEFAULT_CAPACITY: usize = 512;
const DEFAULT_POST_TTL_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Remote when a KV endpoint is configured, memory otherwise.
    #[default]
    Auto,
    Memory,
    Remote,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// Maximum entries held by the in-process store.
    pub capacity: usize,
    /// Lifetime of rendered post payloads.
    pub post_ttl_seconds: u64,
    pub failure_policy: FailurePolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Auto,
            capacity: DEFAULT_CAPACITY,
            post_ttl_seconds: DEFAULT_POST_TTL_SECS,
            failure_policy: FailurePolicy::Open,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            backend: settings.backend,
            capacity: settings.capacity,
            post_ttl_seconds: settings.post_ttl_seconds,
            failure_policy: settings.failure_policy,
        }
    }
}

impl CacheConfig {
    /// Returns the capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.capacity).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn post_ttl(&self) -> Duration {
        Duration::from_secs(self.post_ttl_seconds.max(1))
    }

    /// Build the store selected by `backend`, given an optional KV client.
    pub fn build_store(&self, kv: Option<KvClient>) -> Arc<dyn CacheStore> {
        match (self.backend, kv) {
            (CacheBackend::Memory, _) | (CacheBackend::Auto, None) => {
                Arc::new(MemoryCacheStore::new(self.capacity_non_zero(), self.post_ttl()))
            }
            (CacheBackend::Remote | CacheBackend::Auto, Some(client)) => {
                Arc::new(RemoteCacheStore::new(client))
            }
            (CacheBackend::Remote, None) => {
                warn!(
                    target = "folio::cache",
                    "remote cache requested without KV credentials; using memory store"
                );
                Arc::new(MemoryCacheStore::new(self.capacity_non_zero(), self.post_ttl()))
            }
        }
    }
}
