//! Fixed-window request counters keyed by policy and client.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};

use crate::cache::FailurePolicy;
use crate::config::{PolicyLimit, RateLimitSettings};
use crate::infra::kv::{KvClient, KvError};

const METRIC_DECISIONS: &str = "folio_rate_limit_decisions_total";
const METRIC_STORE_ERRORS: &str = "folio_rate_limit_store_errors_total";
const REMOTE_KEY_PREFIX: &str = "ratelimit:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RatePolicy {
    /// Cache management and revalidation.
    Sensitive,
    /// Search and post reads.
    Public,
    /// Image proxy and placeholders.
    Images,
}

impl RatePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sensitive => "sensitive",
            Self::Public => "public",
            Self::Images => "images",
        }
    }
}

/// Count within the current window and time until it resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u64,
    pub reset_after: Duration,
}

#[derive(Debug, Error)]
pub enum CounterStoreError {
    #[error(transparent)]
    Kv(#[from] KvError),
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Record one hit for `key` and return the window state after it.
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowCount, CounterStoreError>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    resets_at: Instant,
    count: u64,
}

/// In-process counters holding at most `capacity` windows. At capacity, expired
/// windows are swept first, then the windows closest to reset are evicted.
#[derive(Debug)]
pub struct MemoryCounterStore {
    windows: DashMap<String, Window>,
    capacity: usize,
}

impl MemoryCounterStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            windows: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn hit_at(&self, key: &str, window: Duration, now: Instant) -> WindowCount {
        if self.windows.len() >= self.capacity && !self.windows.contains_key(key) {
            self.make_room(now);
        }

        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            resets_at: now + window,
            count: 0,
        });
        if entry.resets_at <= now {
            *entry = Window {
                resets_at: now + window,
                count: 0,
            };
        }
        entry.count += 1;
        WindowCount {
            count: entry.count,
            reset_after: entry.resets_at.saturating_duration_since(now),
        }
    }

    fn make_room(&self, now: Instant) {
        self.windows.retain(|_, entry| entry.resets_at > now);
        if self.windows.len() < self.capacity {
            return;
        }

        let mut by_reset: Vec<(Instant, String)> = self
            .windows
            .iter()
            .map(|entry| (entry.resets_at, entry.key().clone()))
            .collect();
        by_reset.sort_unstable();
        // Evict an eighth at a time so a flood of new keys does not rescan on every hit.
        let excess = self.windows.len() + 1 - self.capacity;
        let batch = excess.max(self.capacity / 8);
        for (_, key) in by_reset.into_iter().take(batch) {
            self.windows.remove(&key);
        }
        debug!(
            target = "folio::rate_limit",
            capacity = self.capacity,
            evicted = batch,
            "rate limit windows evicted before reset"
        );
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowCount, CounterStoreError> {
        Ok(self.hit_at(key, window, Instant::now()))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Counters shared through the key-value store (`INCR` + `PEXPIRE`).
pub struct RemoteCounterStore {
    client: KvClient,
}

impl RemoteCounterStore {
    pub fn new(client: KvClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CounterStore for RemoteCounterStore {
    async fn hit(&self, key: &str, window: Duration) -> Result<WindowCount, CounterStoreError> {
        let key = format!("{REMOTE_KEY_PREFIX}{key}");
        let count = self.client.incr(&key).await?;
        if count == 1 {
            self.client.pexpire(&key, window).await?;
            return Ok(WindowCount {
                count: 1,
                reset_after: window,
            });
        }

        let ttl_ms = self.client.pttl(&key).await?;
        let reset_after = if ttl_ms < 0 {
            // Expiry was lost between INCR and PEXPIRE; start the window over.
            self.client.pexpire(&key, window).await?;
            window
        } else {
            Duration::from_millis(ttl_ms as u64)
        };
        Ok(WindowCount {
            count: count.max(0) as u64,
            reset_after,
        })
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed {
        limit: u32,
        /// Absent when the store failed and the policy let the request through.
        remaining: Option<u32>,
    },
    Limited {
        limit: u32,
        retry_after_secs: u64,
    },
    /// The store failed and the failure policy is closed.
    Unavailable,
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    failure_policy: FailurePolicy,
    sensitive: PolicyLimit,
    public: PolicyLimit,
    images: PolicyLimit,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, settings: &RateLimitSettings) -> Self {
        Self {
            store,
            failure_policy: settings.failure_policy,
            sensitive: settings.sensitive,
            public: settings.public,
            images: settings.images,
        }
    }

    /// Memory store unless KV credentials are supplied.
    pub fn from_settings(settings: &RateLimitSettings, kv: Option<KvClient>) -> Self {
        let store: Arc<dyn CounterStore> = match kv {
            Some(client) => Arc::new(RemoteCounterStore::new(client)),
            None => Arc::new(MemoryCounterStore::new(settings.capacity.get() as usize)),
        };
        Self::new(store, settings)
    }

    pub fn backend(&self) -> &'static str {
        self.store.name()
    }

    pub fn limit_for(&self, policy: RatePolicy) -> PolicyLimit {
        match policy {
            RatePolicy::Sensitive => self.sensitive,
            RatePolicy::Public => self.public,
            RatePolicy::Images => self.images,
        }
    }

    pub async fn check(&self, policy: RatePolicy, client: &str) -> RateDecision {
        let limit = self.limit_for(policy);
        let max = limit.max_requests.get();
        let key = format!("{}:{client}", policy.as_str());

        let decision = match self.store.hit(&key, limit.window).await {
            Ok(window) if window.count <= u64::from(max) => RateDecision::Allowed {
                limit: max,
                remaining: Some(max - window.count as u32),
            },
            Ok(window) => RateDecision::Limited {
                limit: max,
                retry_after_secs: window.reset_after.as_secs_f64().ceil().max(1.0) as u64,
            },
            Err(err) => {
                counter!(METRIC_STORE_ERRORS, "policy" => self.failure_policy.as_str())
                    .increment(1);
                warn!(
                    target = "folio::rate_limit",
                    policy = policy.as_str(),
                    failure_policy = self.failure_policy.as_str(),
                    error = %err,
                    "rate limit store failed"
                );
                if self.failure_policy.is_open() {
                    RateDecision::Allowed {
                        limit: max,
                        remaining: None,
                    }
                } else {
                    RateDecision::Unavailable
                }
            }
        };

        let outcome = match decision {
            RateDecision::Allowed { .. } => "allowed",
            RateDecision::Limited { .. } => "limited",
            RateDecision::Unavailable => "unavailable",
        };
        counter!(METRIC_DECISIONS, "policy" => policy.as_str(), "outcome" => outcome)
            .increment(1);
        decision
    }
}
