use std::collections::BTreeMap;
use std::io::Cursor;
use std::num::{NonZeroU32, NonZeroUsize};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{Request, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures::StreamExt;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use time::macros::datetime;
use tower::ServiceExt;
use url::Url;

use folio::application::content::ContentStore;
use folio::application::posts::PostService;
use folio::application::render::MarkdownRenderer;
use folio::application::search::{SearchConfig, SearchService};
use folio::cache::{DataCache, FailurePolicy, MemoryCacheStore};
use folio::config::{AuthSettings, PolicyLimit, RateLimitSettings};
use folio::domain::frontmatter::render_document;
use folio::domain::posts::Post;
use folio::infra::cache_warmer::CacheWarmer;
use folio::infra::http::api::rate_limit::{MemoryCounterStore, RateLimiter};
use folio::infra::http::{ApiState, build_router};
use folio::infra::image_proxy::{
    ImageProxy, ProxyConfig, UpstreamClient, UpstreamError, UpstreamResponse,
};

const ADMIN: &str = "admin-secret-token";
const WEBHOOK: &str = "webhook-secret";

struct FakeUpstream {
    calls: AtomicUsize,
}

#[async_trait]
impl UpstreamClient for FakeUpstream {
    async fn fetch(&self, _url: &Url) -> Result<UpstreamResponse, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let bytes = png();
        Ok(UpstreamResponse {
            status: 200,
            content_type: Some("image/png".to_string()),
            content_length: Some(bytes.len() as u64),
            body: futures::stream::iter(vec![Ok(bytes)]).boxed(),
        })
    }
}

fn png() -> Bytes {
    let image = image::RgbImage::from_pixel(16, 12, image::Rgb([10, 120, 200]));
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    Bytes::from(out.into_inner())
}

fn write_post(dir: &Path, slug: &str, title: &str, tags: &[&str], body: &str) {
    let post = Post {
        id: format!("id-{slug}"),
        slug: slug.to_string(),
        title: title.to_string(),
        description: format!("About {title}"),
        published_at: datetime!(2024-01-15 08:00 UTC),
        modified_at: datetime!(2024-01-16 08:00 UTC),
        draft: false,
        featured: false,
        tags: tags.iter().map(|tag| tag.to_string()).collect(),
        author: "Ada".to_string(),
        reading_time_minutes: Some(1),
        canonical_url: None,
        cover: None,
        body_markdown: body.to_string(),
    };
    let document = render_document(&post).expect("render document");
    std::fs::write(dir.join(format!("{slug}.md")), document).expect("write post");
}

struct Harness {
    _root: TempDir,
    posts_dir: std::path::PathBuf,
    state: ApiState,
    upstream: Arc<FakeUpstream>,
}

impl Harness {
    async fn new(auth: AuthSettings, sensitive_max: u32) -> Self {
        let root = TempDir::new().expect("tempdir");
        let posts_dir = root.path().join("posts");
        std::fs::create_dir_all(&posts_dir).expect("posts dir");
        write_post(
            &posts_dir,
            "rust-ownership",
            "Rust Ownership",
            &["rust"],
            "Borrowing and **lifetimes** explained.",
        );
        write_post(
            &posts_dir,
            "async-tokio",
            "Async with Tokio",
            &["rust", "async"],
            "Futures, executors and tasks.",
        );

        let limit = |max: u32, secs: u64| PolicyLimit {
            max_requests: NonZeroU32::new(max).expect("non-zero"),
            window: Duration::from_secs(secs),
        };
        let rate_limit = RateLimitSettings {
            failure_policy: FailurePolicy::Open,
            capacity: NonZeroU32::new(1024).expect("non-zero"),
            sensitive: limit(sensitive_max, 900),
            public: limit(100, 60),
            images: limit(300, 60),
        };

        let content = Arc::new(ContentStore::new(posts_dir.clone()));
        let renderer = Arc::new(MarkdownRenderer::new());
        let store = MemoryCacheStore::new(NonZeroUsize::new(64).expect("non-zero"), Duration::from_secs(300));
        let data_cache = Arc::new(DataCache::new(Arc::new(store), FailurePolicy::Open));
        let posts = Arc::new(PostService::new(
            Arc::clone(&content),
            Arc::clone(&data_cache),
            Arc::clone(&renderer),
            Duration::from_secs(300),
        ));
        let search = Arc::new(SearchService::new(
            Arc::clone(&content),
            renderer,
            SearchConfig::default(),
        ));
        let upstream = Arc::new(FakeUpstream {
            calls: AtomicUsize::new(0),
        });
        let proxy_config = ProxyConfig {
            host_cooldown: Duration::ZERO,
            ..ProxyConfig::default()
        };
        let image_proxy = Arc::new(ImageProxy::new(proxy_config, upstream.clone()));

        let mut environment = BTreeMap::new();
        environment.insert("NOTION_TOKEN".to_string(), "missing".to_string());

        let state = ApiState {
            warmer: Arc::new(CacheWarmer::new(Arc::clone(&posts), Arc::clone(&search))),
            content,
            posts,
            search,
            image_proxy,
            rate_limiter: Arc::new(RateLimiter::new(
                Arc::new(MemoryCounterStore::new(1024)),
                &rate_limit,
            )),
            auth: Arc::new(auth),
            sync: None,
            data_cache,
            started: Instant::now(),
            environment: Arc::new(environment),
        };
        state.reload_content().await.expect("initial load");

        Self {
            _root: root,
            posts_dir,
            state,
            upstream,
        }
    }

    fn router(&self) -> Router {
        build_router(self.state.clone())
    }
}

fn admin_auth() -> AuthSettings {
    AuthSettings {
        admin_token: Some(ADMIN.to_string()),
        webhook_secret: Some(WEBHOOK.to_string()),
        cron_secret: None,
    }
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Bytes) {
    let response = router.oneshot(request).await.expect("response");
    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    (status, headers, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).expect("request")
}

fn json(bytes: &Bytes) -> Value {
    serde_json::from_slice(bytes).expect("json body")
}

#[tokio::test]
async fn health_reports_content_and_masked_environment() {
    let harness = Harness::new(admin_auth(), 5).await;
    let (status, headers, body) = send(harness.router(), get("/api/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert!(headers.contains_key("x-request-id"));
    let body = json(&body);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["content"]["posts"], 2);
    assert_eq!(body["image_proxy"]["max_concurrency"], 4);
    assert_eq!(body["environment"]["NOTION_TOKEN"], "missing");

    let traced = Request::builder()
        .uri("/api/health")
        .header("x-request-id", "edge-42")
        .body(Body::empty())
        .expect("request");
    let (_, headers, _) = send(harness.router(), traced).await;
    assert_eq!(
        headers.get("x-request-id").and_then(|v| v.to_str().ok()),
        Some("edge-42")
    );
}

#[tokio::test]
async fn posts_list_detail_and_missing() {
    let harness = Harness::new(admin_auth(), 5).await;

    let (status, headers, body) = send(harness.router(), get("/api/posts?tag=async")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get("x-ratelimit-limit").and_then(|v| v.to_str().ok()), Some("100"));
    assert_eq!(headers.get("x-ratelimit-remaining").and_then(|v| v.to_str().ok()), Some("99"));
    let body = json(&body);
    assert_eq!(body["total"], 1);
    assert_eq!(body["posts"][0]["slug"], "async-tokio");

    let (status, _, body) = send(harness.router(), get("/api/posts/rust-ownership")).await;
    assert_eq!(status, StatusCode::OK);
    let body = json(&body);
    assert_eq!(body["title"], "Rust Ownership");
    assert!(body["html"].as_str().expect("html").contains("<strong>lifetimes</strong>"));

    let (status, _, body) = send(harness.router(), get("/api/posts/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json(&body)["error"]["code"], "not_found");
}

#[tokio::test]
async fn search_ranks_title_matches_and_paginates() {
    let harness = Harness::new(admin_auth(), 5).await;

    let (status, _, body) = send(harness.router(), get("/api/search?q=tokio&limit=5")).await;
    assert_eq!(status, StatusCode::OK);
    let body = json(&body);
    assert_eq!(body["query"], "tokio");
    assert_eq!(body["results"][0]["post"]["slug"], "async-tokio");
    assert_eq!(body["results"][0]["matches"]["title"], true);
    assert_eq!(body["limit"], 5);

    let (status, _, body) = send(harness.router(), get("/api/search?q=rust&limit=1")).await;
    assert_eq!(status, StatusCode::OK);
    let body = json(&body);
    assert_eq!(body["total"], 2);
    assert_eq!(body["results"].as_array().expect("results").len(), 1);
    assert_eq!(body["has_more"], true);

    let (status, _, body) = send(harness.router(), get("/api/search?q=rust&limit=abc")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["error"]["code"], "bad_request");
}

#[tokio::test]
async fn sensitive_routes_require_credentials() {
    let harness = Harness::new(admin_auth(), 50).await;

    let (status, _, body) = send(harness.router(), get("/api/cache/stats")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json(&body)["error"]["code"], "unauthorized");

    let wrong = Request::builder()
        .uri("/api/cache/stats")
        .header(header::AUTHORIZATION, "Bearer nope")
        .body(Body::empty())
        .expect("request");
    assert_eq!(send(harness.router(), wrong).await.0, StatusCode::UNAUTHORIZED);

    // The webhook secret only opens revalidation.
    let webhook_on_stats = Request::builder()
        .uri("/api/cache/stats")
        .header("x-api-key", WEBHOOK)
        .body(Body::empty())
        .expect("request");
    assert_eq!(
        send(harness.router(), webhook_on_stats).await.0,
        StatusCode::UNAUTHORIZED
    );

    let admin = Request::builder()
        .uri("/api/cache/stats")
        .header(header::AUTHORIZATION, format!("Bearer {ADMIN}"))
        .body(Body::empty())
        .expect("request");
    let (status, _, body) = send(harness.router(), admin).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["backend"], "memory");
}

#[tokio::test]
async fn refresh_without_notion_or_cron_secret_is_unavailable() {
    let auth = AuthSettings {
        admin_token: None,
        webhook_secret: None,
        cron_secret: None,
    };
    let harness = Harness::new(auth, 50).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/cache/refresh")
        .header(header::AUTHORIZATION, "Bearer anything")
        .body(Body::empty())
        .expect("request");
    let (status, _, body) = send(harness.router(), request).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json(&body)["error"]["code"], "not_configured");
}

#[tokio::test]
async fn revalidate_reloads_content_from_disk() {
    let harness = Harness::new(admin_auth(), 50).await;
    write_post(
        &harness.posts_dir,
        "new-arrival",
        "New Arrival",
        &["news"],
        "Fresh content.",
    );

    let (_, _, body) = send(harness.router(), get("/api/posts")).await;
    assert_eq!(json(&body)["total"], 2);

    let request = Request::builder()
        .method("POST")
        .uri("/api/revalidate")
        .header("x-api-key", WEBHOOK)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"slugs":["rust-ownership"]}"#))
        .expect("request");
    let (status, _, body) = send(harness.router(), request).await;
    assert_eq!(status, StatusCode::OK);
    let body = json(&body);
    assert_eq!(body["revalidated"], true);
    assert_eq!(body["posts"], 3);

    let (_, _, body) = send(harness.router(), get("/api/search?q=arrival")).await;
    assert_eq!(json(&body)["results"][0]["post"]["slug"], "new-arrival");
}

#[tokio::test]
async fn warm_stats_and_clear_cycle() {
    let harness = Harness::new(admin_auth(), 50).await;
    let authed = |method: &str, uri: &str| {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {ADMIN}"))
            .body(Body::empty())
            .expect("request")
    };

    let (status, _, body) = send(harness.router(), authed("POST", "/api/cache/warm")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["warmed"], 2);

    let (_, _, body) = send(harness.router(), authed("GET", "/api/cache/stats")).await;
    let stats = json(&body);
    assert_eq!(stats["entries"], 2);
    assert!(stats["search_entries"].as_u64().expect("search entries") >= 1);

    let (status, _, body) = send(harness.router(), authed("DELETE", "/api/cache")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(json(&body)["cleared"].as_u64().expect("cleared") >= 2);

    let (_, _, body) = send(harness.router(), authed("GET", "/api/cache/stats")).await;
    assert_eq!(json(&body)["entries"], 0);
}

#[tokio::test]
async fn sensitive_policy_limits_before_auth() {
    let harness = Harness::new(admin_auth(), 2).await;
    let request = || {
        Request::builder()
            .uri("/api/cache/stats")
            .header("x-forwarded-for", "198.51.100.4")
            .body(Body::empty())
            .expect("request")
    };

    assert_eq!(send(harness.router(), request()).await.0, StatusCode::UNAUTHORIZED);
    assert_eq!(send(harness.router(), request()).await.0, StatusCode::UNAUTHORIZED);
    let (status, headers, body) = send(harness.router(), request()).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = headers
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .expect("retry-after");
    assert!((1..=900).contains(&retry_after));
    assert_eq!(json(&body)["error"]["code"], "rate_limited");

    // A different client still has its own window.
    let other = Request::builder()
        .uri("/api/cache/stats")
        .header("x-forwarded-for", "198.51.100.5")
        .header(header::AUTHORIZATION, format!("Bearer {ADMIN}"))
        .body(Body::empty())
        .expect("request");
    assert_eq!(send(harness.router(), other).await.0, StatusCode::OK);
}

#[tokio::test]
async fn image_proxy_serves_allowed_hosts_only() {
    let harness = Harness::new(admin_auth(), 5).await;
    let target = "https://images.unsplash.com/photo-1?w=200";

    let uri = format!("/api/image-proxy?url={}", urlencode(target));
    let (status, headers, body) = send(harness.router(), get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()), Some("image/png"));
    assert_eq!(
        headers.get(header::X_CONTENT_TYPE_OPTIONS).and_then(|v| v.to_str().ok()),
        Some("nosniff")
    );
    assert_eq!(body, png());

    let encoded = URL_SAFE_NO_PAD.encode(target);
    let (status, _, _) = send(harness.router(), get(&format!("/api/image-proxy/{encoded}"))).await;
    assert_eq!(status, StatusCode::OK);

    let blocked = format!("/api/image-proxy?url={}", urlencode("https://evil.example.com/x.png"));
    let (status, headers, body) = send(harness.router(), get(&blocked)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(
        headers.get(header::CACHE_CONTROL).and_then(|v| v.to_str().ok()),
        Some("public, max-age=30")
    );
    assert_eq!(json(&body)["error"]["code"], "host_not_allowed");

    for uri in ["/api/image-proxy", "/api/image-proxy/!!not-base64!!"] {
        let (status, headers, body) = send(harness.router(), get(uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert_eq!(
            headers.get(header::CACHE_CONTROL).and_then(|v| v.to_str().ok()),
            Some("public, max-age=30"),
            "{uri}"
        );
        assert_eq!(json(&body)["error"]["code"], "bad_request");
    }

    assert_eq!(harness.upstream.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn lqip_returns_a_small_png() {
    let harness = Harness::new(admin_auth(), 5).await;
    let uri = format!(
        "/api/lqip?url={}",
        urlencode("https://images.unsplash.com/photo-2")
    );
    let (status, headers, body) = send(harness.router(), get(&uri)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()), Some("image/png"));
    let decoded = image::load_from_memory(&body).expect("png");
    assert!(decoded.width() <= 16);
}

fn urlencode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
