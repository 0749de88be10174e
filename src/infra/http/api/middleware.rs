use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, Request, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use subtle::ConstantTimeEq;
use tracing::debug;

use super::error::ApiError;
use super::rate_limit::{RateDecision, RatePolicy};
use super::state::ApiState;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";
const ANONYMOUS_CLIENT: &str = "anonymous";

/// Which shared secrets a route accepts besides the admin token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credential {
    Admin,
    AdminOrWebhook,
    AdminOrCron,
}

pub async fn require_admin(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    authorize(&state, Credential::Admin, request, next).await
}

pub async fn require_webhook(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    authorize(&state, Credential::AdminOrWebhook, request, next).await
}

pub async fn require_cron(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    authorize(&state, Credential::AdminOrCron, request, next).await
}

async fn authorize(
    state: &ApiState,
    credential: Credential,
    request: Request<Body>,
    next: Next,
) -> Response {
    let auth = &state.auth;
    let mut secrets: Vec<&str> = Vec::with_capacity(2);
    secrets.extend(auth.admin_token.as_deref());
    match credential {
        Credential::Admin => {}
        Credential::AdminOrWebhook => secrets.extend(auth.webhook_secret.as_deref()),
        Credential::AdminOrCron => secrets.extend(auth.cron_secret.as_deref()),
    }
    if secrets.is_empty() {
        let what = match credential {
            Credential::Admin => "ADMIN_TOKEN",
            Credential::AdminOrWebhook => "ADMIN_TOKEN or WEBHOOK_SECRET",
            Credential::AdminOrCron => "ADMIN_TOKEN or CRON_SECRET",
        };
        return ApiError::not_configured(what).into_response();
    }

    let Some(token) = extract_token(request.headers()) else {
        return ApiError::unauthorized().into_response();
    };

    // Compare against every candidate so timing does not reveal which one matched.
    let matched = secrets.iter().fold(false, |matched, secret| {
        let equal: bool = token.as_bytes().ct_eq(secret.as_bytes()).into();
        matched | equal
    });
    if !matched {
        return ApiError::unauthorized().into_response();
    }

    next.run(request).await
}

pub async fn limit_sensitive(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    enforce(&state, RatePolicy::Sensitive, request, next).await
}

pub async fn limit_public(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    enforce(&state, RatePolicy::Public, request, next).await
}

pub async fn limit_images(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    enforce(&state, RatePolicy::Images, request, next).await
}

async fn enforce(
    state: &ApiState,
    policy: RatePolicy,
    request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0);
    let client = client_id(request.headers(), peer);

    match state.rate_limiter.check(policy, &client).await {
        RateDecision::Allowed { limit, remaining } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(LIMIT_HEADER, HeaderValue::from(limit));
            if let Some(remaining) = remaining {
                headers.insert(REMAINING_HEADER, HeaderValue::from(remaining));
            }
            response
        }
        RateDecision::Limited {
            limit,
            retry_after_secs,
        } => {
            debug!(
                target = "folio::rate_limit",
                policy = policy.as_str(),
                client = %client,
                retry_after_secs,
                "request limited"
            );
            let mut response = ApiError::rate_limited(retry_after_secs);
            let headers = response.headers_mut();
            headers.insert(LIMIT_HEADER, HeaderValue::from(limit));
            headers.insert(REMAINING_HEADER, HeaderValue::from(0u32));
            response
        }
        RateDecision::Unavailable => ApiError::rate_limit_unavailable().into_response(),
    }
}

/// First forwarded address, then `X-Real-IP`, then the socket peer.
pub fn client_id(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| ANONYMOUS_CLIENT.to_string())
}

fn extract_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| raw.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }
    headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}
