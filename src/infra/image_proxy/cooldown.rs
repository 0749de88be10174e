//! Minimum spacing between requests to the same upstream host.

use std::num::NonZeroUsize;
use std::time::Duration;

use tokio::time::{Instant, sleep_until};

use crate::cache::BoundedTtlCache;

/// Idle hosts are forgotten after this long on top of the interval itself.
const IDLE_GRACE: Duration = Duration::from_secs(60);

/// Hands out per-host start slots `interval` apart. Each caller reserves the next
/// free slot under the cache lock and then sleeps until it arrives, so concurrent
/// callers for one host are spread out instead of released together.
pub struct HostCooldown {
    interval: Duration,
    next_free: BoundedTtlCache<String, Instant>,
}

impl HostCooldown {
    pub fn new(capacity: NonZeroUsize, interval: Duration) -> Self {
        Self {
            interval,
            next_free: BoundedTtlCache::new(capacity, interval + IDLE_GRACE),
        }
    }

    /// Reserve a slot for `host` and return when it starts.
    pub fn reserve(&self, host: &str) -> Instant {
        let now = Instant::now();
        if self.interval.is_zero() {
            return now;
        }
        let interval = self.interval;
        let next_free = self.next_free.upsert_at(
            host.to_ascii_lowercase(),
            std::time::Instant::now(),
            true,
            |previous| previous.map_or(now, |slot| slot.max(now)) + interval,
        );
        next_free - interval
    }

    pub async fn wait_turn(&self, host: &str) {
        let slot = self.reserve(host);
        if slot > Instant::now() {
            sleep_until(slot).await;
        }
    }

    pub fn tracked_hosts(&self) -> usize {
        self.next_free.len()
    }
}
