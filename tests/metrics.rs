use std::collections::HashSet;
use std::convert::Infallible;
use std::num::{NonZeroU32, NonZeroUsize};
use std::sync::Arc;
use std::time::Duration;

use metrics_util::debugging::DebuggingRecorder;
use tempfile::TempDir;

use folio::application::content::ContentStore;
use folio::application::render::MarkdownRenderer;
use folio::application::search::{SearchConfig, SearchRequest, SearchService};
use folio::cache::{DataCache, FailurePolicy, MemoryCacheStore};
use folio::config::{PolicyLimit, RateLimitSettings};
use folio::infra::http::api::rate_limit::{
    MemoryCounterStore, RateDecision, RateLimiter, RatePolicy,
};

#[tokio::test]
async fn service_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    // Data cache miss then hit
    let store = MemoryCacheStore::new(NonZeroUsize::new(8).expect("non-zero"), Duration::from_secs(60));
    let cache = DataCache::new(Arc::new(store), FailurePolicy::Open);
    for _ in 0..2 {
        let value: u32 = cache
            .get_or_compute("post:metrics", Duration::from_secs(60), || async {
                Ok::<_, Infallible>(7)
            })
            .await
            .expect("cached value");
        assert_eq!(value, 7);
    }

    // Search miss then hit over an empty content directory
    let root = TempDir::new().expect("tempdir");
    let content = Arc::new(ContentStore::new(root.path().to_path_buf()));
    content.reload().await.expect("reload");
    let search = SearchService::new(
        content,
        Arc::new(MarkdownRenderer::new()),
        SearchConfig::default(),
    );
    let request = SearchRequest {
        q: "metrics".to_string(),
        ..SearchRequest::default()
    };
    search.search(&request);
    search.search(&request);

    // Rate limiter allow then limit
    let limit = PolicyLimit {
        max_requests: NonZeroU32::new(1).expect("non-zero"),
        window: Duration::from_secs(60),
    };
    let settings = RateLimitSettings {
        failure_policy: FailurePolicy::Open,
        capacity: NonZeroU32::new(16).expect("non-zero"),
        sensitive: limit,
        public: limit,
        images: limit,
    };
    let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new(16)), &settings);
    assert!(matches!(
        limiter.check(RatePolicy::Public, "203.0.113.9").await,
        RateDecision::Allowed { .. }
    ));
    assert!(matches!(
        limiter.check(RatePolicy::Public, "203.0.113.9").await,
        RateDecision::Limited { .. }
    ));

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    let expected = [
        "folio_cache_hit_total",
        "folio_cache_miss_total",
        "folio_search_queries_total",
        "folio_search_ms",
        "folio_rate_limit_decisions_total",
    ];

    for metric in expected {
        assert!(names.contains(metric), "missing metric: {metric}");
    }
}
