use axum::Json;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use folio_api_types::{
    CacheStats, ClearResponse, ContentHealth, HealthResponse, ImageProxyHealth, PostDetail,
    PostList, RefreshResponse, RevalidateRequest, RevalidateResponse, SyncFailureView,
    WarmResponse,
};
use serde::Deserialize;
use tracing::info;

use crate::application::search::SearchRequest;
use crate::infra::cache_warmer::CacheWarmError;
use crate::infra::image_proxy::ProxiedImage;

use super::error::ApiError;
use super::state::ApiState;

#[derive(Debug, Default, Deserialize)]
pub struct TagFilter {
    pub tag: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ImageQuery {
    pub url: Option<String>,
}

pub async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let snapshot = state.content.snapshot();
    let proxy = state.image_proxy.health();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started.elapsed().as_secs(),
        content: ContentHealth {
            posts: snapshot.len(),
            loaded_at: snapshot.loaded_at(),
        },
        cache: cache_stats(&state).await,
        image_proxy: ImageProxyHealth {
            max_concurrency: proxy.max_concurrency,
            available_slots: proxy.available_slots,
            tracked_hosts: proxy.tracked_hosts,
            tracked_signed_urls: proxy.tracked_signed_urls,
        },
        environment: state.environment.as_ref().clone(),
    })
}

pub async fn search(
    State(state): State<ApiState>,
    query: Result<Query<SearchRequest>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(request) =
        query.map_err(|err| ApiError::bad_request("Invalid search parameters", Some(err.body_text())))?;
    let response = state.search.search(&request);
    Ok(Json(response.as_ref()).into_response())
}

pub async fn list_posts(
    State(state): State<ApiState>,
    Query(filter): Query<TagFilter>,
) -> Json<PostList> {
    Json(state.posts.list(filter.tag.as_deref()))
}

pub async fn get_post(
    State(state): State<ApiState>,
    Path(slug): Path<String>,
) -> Result<Json<PostDetail>, ApiError> {
    Ok(Json(state.posts.detail(&slug).await?))
}

pub async fn image_proxy(
    State(state): State<ApiState>,
    Query(query): Query<ImageQuery>,
) -> Response {
    let Some(url) = query.url.filter(|url| !url.trim().is_empty()) else {
        return missing_url();
    };
    match state.image_proxy.fetch(&url).await {
        Ok(image) => image_response(image),
        Err(err) => ApiError::from_proxy(&err),
    }
}

pub async fn image_proxy_encoded(
    State(state): State<ApiState>,
    Path(encoded): Path<String>,
) -> Response {
    let url = match decode_path_url(&encoded) {
        Some(url) => url,
        None => return invalid_image_url("path must be base64url-encoded"),
    };
    match state.image_proxy.fetch(&url).await {
        Ok(image) => image_response(image),
        Err(err) => ApiError::from_proxy(&err),
    }
}

pub async fn lqip(State(state): State<ApiState>, Query(query): Query<ImageQuery>) -> Response {
    let Some(url) = query.url.filter(|url| !url.trim().is_empty()) else {
        return missing_url();
    };
    match state.image_proxy.placeholder(&url).await {
        Ok(image) => image_response(image),
        Err(err) => ApiError::from_proxy(&err),
    }
}

pub async fn revalidate(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<RevalidateResponse>, ApiError> {
    let request: RevalidateRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RevalidateRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|err| ApiError::bad_request("Invalid revalidation body", Some(err.to_string())))?
    };

    let snapshot = state.content.reload().await?;
    let cleared = state.posts.invalidate(&request.slugs).await?;
    let search_cleared = state.search.invalidate() as u64;
    info!(
        target = "folio::api::revalidate",
        slugs = request.slugs.len(),
        posts = snapshot.len(),
        cleared,
        search_cleared,
        "content revalidated"
    );

    Ok(Json(RevalidateResponse {
        revalidated: true,
        posts: snapshot.len(),
        cleared: cleared + search_cleared,
    }))
}

pub async fn refresh(State(state): State<ApiState>) -> Result<Json<RefreshResponse>, ApiError> {
    let Some(sync) = state.sync.as_ref() else {
        return Err(ApiError::not_configured("NOTION_TOKEN or NOTION_DATABASE_ID"));
    };
    let report = sync.run().await?;
    let posts = state.reload_content().await?;

    Ok(Json(RefreshResponse {
        pages_seen: report.pages_seen,
        written: report.written,
        unchanged: report.unchanged,
        removed: report.removed,
        skipped: report.skipped,
        images_downloaded: report.images_downloaded,
        images_reused: report.images_reused,
        failures: report
            .failures
            .into_iter()
            .map(|failure| SyncFailureView {
                page_id: failure.page_id,
                title: failure.title,
                error: failure.error,
            })
            .collect(),
        posts,
    }))
}

pub async fn warm(State(state): State<ApiState>) -> Result<Json<WarmResponse>, ApiError> {
    let summary = state
        .warmer
        .warm()
        .await
        .map_err(|CacheWarmError::PostDetail { source, .. }| ApiError::from(source))?;
    Ok(Json(WarmResponse {
        warmed: summary.posts,
    }))
}

pub async fn stats(State(state): State<ApiState>) -> Json<CacheStats> {
    Json(cache_stats(&state).await)
}

pub async fn clear(State(state): State<ApiState>) -> Result<Json<ClearResponse>, ApiError> {
    let data = state.posts.invalidate(&[]).await?;
    let search = state.search.invalidate() as u64;
    Ok(Json(ClearResponse {
        cleared: data + search,
    }))
}

async fn cache_stats(state: &ApiState) -> CacheStats {
    let stats = state.data_cache.stats().await;
    CacheStats {
        backend: stats.backend.to_string(),
        entries: stats.entries,
        hits: stats.hits,
        misses: stats.misses,
        errors: stats.errors,
        search_entries: state.search.cached_responses() as u64,
    }
}

fn image_response(image: ProxiedImage) -> Response {
    let cache_control = image.cache_control();
    let content_type = HeaderValue::from_str(&image.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let mut response = (StatusCode::OK, image.bytes).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(cache_control));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response
}

fn missing_url() -> Response {
    invalid_image_url("the `url` query parameter is required")
}

fn invalid_image_url(hint: &str) -> Response {
    let mut response =
        ApiError::bad_request("Invalid image URL", Some(hint.to_string())).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(crate::infra::image_proxy::ERROR_CACHE_CONTROL),
    );
    response
}

fn decode_path_url(encoded: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('=').as_bytes())
        .ok()?;
    String::from_utf8(bytes).ok()
}
