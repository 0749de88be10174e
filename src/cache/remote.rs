use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::infra::kv::KvClient;
use crate::util::clock::now_ms;

use super::store::{CacheEntry, CacheStore, CacheStoreError};

const NAMESPACE: &str = "folio:cache:";

/// [`CacheStore`] backed by a REST key-value service.
///
/// Entries are stored as serialized [`CacheEntry`] values with a server-side expiry;
/// the embedded timestamp is checked again on read so clock skew never serves stale data.
pub struct RemoteCacheStore {
    client: KvClient,
}

impl RemoteCacheStore {
    pub fn new(client: KvClient) -> Self {
        Self { client }
    }

    fn namespaced(key: &str) -> String {
        format!("{NAMESPACE}{key}")
    }
}

#[async_trait]
impl CacheStore for RemoteCacheStore {
    fn backend(&self) -> &'static str {
        "remote"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheStoreError> {
        let Some(raw) = self.client.get(&Self::namespaced(key)).await? else {
            return Ok(None);
        };
        let entry: CacheEntry = serde_json::from_str(&raw).map_err(CacheStoreError::Decode)?;
        if entry.is_expired(now_ms()) {
            return Ok(None);
        }
        Ok(Some(entry.payload))
    }

    async fn set(&self, key: &str, payload: Value, ttl: Duration) -> Result<(), CacheStoreError> {
        let entry = CacheEntry::new(key, payload, now_ms(), ttl);
        let raw = serde_json::to_string(&entry).map_err(CacheStoreError::Encode)?;
        self.client
            .set(&Self::namespaced(key), &raw, Some(ttl))
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheStoreError> {
        Ok(self.client.del(&[Self::namespaced(key)]).await? > 0)
    }

    async fn clear(&self, prefix: &str) -> Result<u64, CacheStoreError> {
        let pattern = format!("{}*", Self::namespaced(prefix));
        let keys = self.client.scan_all(&pattern).await?;
        let mut removed = 0;
        for batch in keys.chunks(100) {
            removed += self.client.del(batch).await?;
        }
        Ok(removed)
    }

    async fn len(&self) -> Result<Option<u64>, CacheStoreError> {
        let pattern = format!("{NAMESPACE}*");
        Ok(Some(self.client.scan_all(&pattern).await?.len() as u64))
    }
}
