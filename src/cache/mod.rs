//! Folio cache primitives.
//!
//! - [`BoundedTtlCache`]: fixed-capacity LRU with per-entry expiry, used for every
//!   process-local map (search results, host cooldowns, signed-URL failures).
//! - [`CacheStore`]: JSON payload store, in memory or in a remote KV service.
//! - [`DataCache`]: read-through wrapper with hit/miss accounting and a named
//!   [`FailurePolicy`].
//!
//! ```toml
//! [cache]
//! backend = "auto"     # auto | memory | remote
//! capacity = 512
//! post_ttl_seconds = 300
//! fail_open = true
//! ```

mod config;
mod data;
pub(crate) mod lock;
mod policy;
mod remote;
mod store;
mod ttl;

pub use config::{CacheBackend, CacheConfig};
pub use data::{CacheLookupError, DataCache, DataCacheStats};
pub use policy::FailurePolicy;
pub use remote::RemoteCacheStore;
pub use store::{CacheEntry, CacheStore, CacheStoreError, MemoryCacheStore};
pub use ttl::BoundedTtlCache;
