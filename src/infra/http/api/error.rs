use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use folio_api_types::{ErrorBody, ErrorMessage};

use crate::application::error::{AppError, ErrorReport};
use crate::application::sync::SyncError;
use crate::domain::error::DomainError;
use crate::infra::image_proxy::{ERROR_CACHE_CONTROL, ProxyError};

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const NOT_FOUND: &str = "not_found";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const RATE_LIMIT_UNAVAILABLE: &str = "rate_limit_unavailable";
    pub const NOT_CONFIGURED: &str = "not_configured";
    pub const SYNC_BUSY: &str = "sync_in_progress";
    pub const SYNC_FAILED: &str = "sync_failed";
    pub const CACHE: &str = "cache_unavailable";
    pub const RENDER: &str = "render_error";
    pub const INTERNAL: &str = "internal_error";
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: &'static str,
    hint: Option<String>,
    source: &'static str,
    detail: Option<String>,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &'static str,
        message: &'static str,
        hint: Option<String>,
    ) -> Self {
        Self {
            status,
            code,
            message,
            hint,
            source: "infra::http::api",
            detail: None,
        }
    }

    /// Log-only diagnostic; never sent to the client.
    fn with_detail(mut self, source: &'static str, detail: impl Into<String>) -> Self {
        self.source = source;
        self.detail = Some(detail.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn bad_request(message: &'static str, hint: Option<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message, hint)
    }

    pub fn unauthorized() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            codes::UNAUTHORIZED,
            "Valid credentials required",
            None,
        )
    }

    pub fn not_found(message: &'static str) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message, None)
    }

    pub fn not_configured(what: &'static str) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::NOT_CONFIGURED,
            "Endpoint is not configured",
            Some(format!("{what} is not set")),
        )
    }

    pub fn rate_limit_unavailable() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            codes::RATE_LIMIT_UNAVAILABLE,
            "Rate limiting is temporarily unavailable",
            None,
        )
    }

    pub fn rate_limited(retry_after: u64) -> Response {
        let body = ErrorBody {
            error: ErrorMessage {
                code: codes::RATE_LIMITED.to_string(),
                message: "Rate limit exceeded".to_string(),
                hint: Some(format!("Retry after {retry_after} seconds")),
            },
        };
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        ErrorReport::from_message(
            "infra::http::api::rate_limit",
            StatusCode::TOO_MANY_REQUESTS,
            format!("rate_limited: retry_after={retry_after}"),
        )
        .attach(&mut response);
        response
    }

    /// Proxy failures keep the proxy's own status and code, with a short cache lifetime.
    pub fn from_proxy(err: &ProxyError) -> Response {
        let message = match err.status() {
            StatusCode::BAD_REQUEST => "Invalid image URL",
            StatusCode::FORBIDDEN => "Image host not allowed",
            StatusCode::GONE => "Image URL expired",
            StatusCode::PAYLOAD_TOO_LARGE => "Image too large",
            StatusCode::UNSUPPORTED_MEDIA_TYPE => "Unsupported image",
            _ => "Image could not be fetched",
        };
        let mut response = Self::new(err.status(), err.code(), message, None)
            .with_detail("infra::http::api::image_proxy", err.to_string())
            .into_response();
        response.headers_mut().insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static(ERROR_CACHE_CONTROL),
        );
        response
    }
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let status = err.status_code();
        let code = match &err {
            AppError::NotFound | AppError::Domain(DomainError::NotFound { .. }) => codes::NOT_FOUND,
            AppError::Validation(_) | AppError::Domain(DomainError::Validation { .. }) => {
                codes::BAD_REQUEST
            }
            AppError::Cache(_) => codes::CACHE,
            AppError::Render(_) => codes::RENDER,
            _ => codes::INTERNAL,
        };
        let hint = match &err {
            AppError::Validation(message) => Some(message.clone()),
            _ => None,
        };
        Self::new(status, code, err.presentation_message(), hint)
            .with_detail("application::error::AppError", err.to_string())
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Busy => Self::new(
                StatusCode::CONFLICT,
                codes::SYNC_BUSY,
                "A sync is already running",
                None,
            ),
            other => Self::new(
                StatusCode::BAD_GATEWAY,
                codes::SYNC_FAILED,
                "Content sync failed",
                None,
            )
            .with_detail("application::sync", other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let diagnostic = self
            .detail
            .clone()
            .or_else(|| self.hint.clone())
            .unwrap_or_else(|| self.message.to_string());
        let body = ErrorBody {
            error: ErrorMessage {
                code: self.code.to_string(),
                message: self.message.to_string(),
                hint: self.hint,
            },
        };
        let mut response = (self.status, Json(body)).into_response();
        // Attach a structured report so shared logging middleware can emit rich diagnostics.
        ErrorReport::from_message(self.source, self.status, format!("{}: {diagnostic}", self.code))
            .attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_sync_maps_to_conflict() {
        let err = ApiError::from(SyncError::Busy);
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn proxy_errors_carry_short_cache_lifetime() {
        let response = ApiError::from_proxy(&ProxyError::TooLarge { limit: 10 });
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).and_then(|v| v.to_str().ok()),
            Some(ERROR_CACHE_CONTROL)
        );
        assert!(response.extensions().get::<ErrorReport>().is_some());
    }

    #[test]
    fn app_errors_render_as_json_error_bodies() {
        let err = ApiError::from(AppError::from(crate::cache::CacheStoreError::Backend(
            crate::infra::kv::KvError::Command("ERR wrong type".into()),
        )));
        assert_eq!(err.code, codes::CACHE);
        assert_eq!(err.message, "Cache store temporarily unavailable");

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
            Some("application/json")
        );
        let report = response.extensions().get::<ErrorReport>().expect("report");
        assert!(report.messages[0].contains("wrong type"));
    }

    #[test]
    fn app_validation_keeps_hint() {
        let err = ApiError::from(AppError::validation("limit must be a number"));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.hint.as_deref(), Some("limit must be a number"));
    }
}
