//! Time-limited storage links and their failure budget.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use url::Url;

use crate::cache::BoundedTtlCache;

const SIGNATURE_PARAMS: [&str; 2] = ["x-amz-signature", "x-amz-expires"];
const SECURE_BUCKET_PREFIX: &str = "prod-files-secure.";

/// Signed S3 links (Notion's file bucket) expire roughly hourly.
pub fn is_signed_url(url: &Url) -> bool {
    let signed_query = url.query_pairs().any(|(key, _)| {
        SIGNATURE_PARAMS
            .iter()
            .any(|param| key.eq_ignore_ascii_case(param))
    });
    signed_query
        || url
            .host_str()
            .is_some_and(|host| host.to_ascii_lowercase().starts_with(SECURE_BUCKET_PREFIX))
}

/// Counts failed proxy requests per signed URL inside a window that starts at the
/// first failure. Exhausted URLs are refused without contacting upstream.
pub struct SignedUrlTracker {
    failures: BoundedTtlCache<String, u32>,
    limit: u32,
}

impl SignedUrlTracker {
    pub fn new(capacity: NonZeroUsize, limit: u32, window: Duration) -> Self {
        Self {
            failures: BoundedTtlCache::new(capacity, window),
            limit: limit.max(1),
        }
    }

    pub fn is_exhausted(&self, url: &Url) -> bool {
        self.is_exhausted_at(url, Instant::now())
    }

    pub fn is_exhausted_at(&self, url: &Url, now: Instant) -> bool {
        self.failures
            .get_at(&url.as_str().to_string(), now)
            .is_some_and(|count| count >= self.limit)
    }

    /// Record one failed request and return the running count.
    pub fn record_failure(&self, url: &Url) -> u32 {
        self.record_failure_at(url, Instant::now())
    }

    pub fn record_failure_at(&self, url: &Url, now: Instant) -> u32 {
        self.failures
            .upsert_at(url.as_str().to_string(), now, false, |count| {
                count.unwrap_or(0).saturating_add(1)
            })
    }

    pub fn record_success(&self, url: &Url) {
        self.failures.remove(&url.as_str().to_string());
    }

    pub fn tracked(&self) -> usize {
        self.failures.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signed() -> Url {
        Url::parse(
            "https://prod-files-secure.s3.us-west-2.amazonaws.com/a/b.png?X-Amz-Expires=3600&X-Amz-Signature=abc",
        )
        .expect("url")
    }

    #[test]
    fn detects_signed_urls() {
        assert!(is_signed_url(&signed()));
        assert!(is_signed_url(
            &Url::parse("https://bucket.s3.amazonaws.com/x.png?x-amz-signature=1").expect("url")
        ));
        assert!(!is_signed_url(
            &Url::parse("https://images.unsplash.com/photo?w=800").expect("url")
        ));
    }

    #[test]
    fn exhausts_after_limit_within_window() {
        let tracker = SignedUrlTracker::new(
            NonZeroUsize::new(8).expect("non-zero"),
            3,
            Duration::from_secs(600),
        );
        let url = signed();
        let start = Instant::now();

        for expected in 1..=3 {
            assert!(!tracker.is_exhausted_at(&url, start));
            assert_eq!(tracker.record_failure_at(&url, start), expected);
        }
        assert!(tracker.is_exhausted_at(&url, start + Duration::from_secs(599)));
        assert!(!tracker.is_exhausted_at(&url, start + Duration::from_secs(601)));
    }

    #[test]
    fn success_resets_budget() {
        let tracker = SignedUrlTracker::new(
            NonZeroUsize::new(8).expect("non-zero"),
            1,
            Duration::from_secs(600),
        );
        let url = signed();
        tracker.record_failure(&url);
        assert!(tracker.is_exhausted(&url));
        tracker.record_success(&url);
        assert!(!tracker.is_exhausted(&url));
    }
}
