pub mod error;
pub mod handlers;
pub mod middleware;
pub mod rate_limit;
pub mod state;

pub use state::ApiState;

use axum::{
    Router, middleware as axum_middleware,
    routing::{delete, get, post},
};

/// Routes grouped by rate-limit policy; authenticated routes are limited before auth runs.
pub fn build_api_router(state: ApiState) -> Router {
    let public = Router::new()
        .route("/api/search", get(handlers::search))
        .route("/api/posts", get(handlers::list_posts))
        .route("/api/posts/{slug}", get(handlers::get_post))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::limit_public,
        ));

    let images = Router::new()
        .route("/api/image-proxy", get(handlers::image_proxy))
        .route("/api/image-proxy/{encoded}", get(handlers::image_proxy_encoded))
        .route("/api/lqip", get(handlers::lqip))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::limit_images,
        ));

    let revalidate = Router::new()
        .route("/api/revalidate", post(handlers::revalidate))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_webhook,
        ));

    let refresh = Router::new()
        .route("/api/cache/refresh", post(handlers::refresh))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_cron,
        ));

    let admin = Router::new()
        .route("/api/cache/warm", post(handlers::warm))
        .route("/api/cache/stats", get(handlers::stats))
        .route("/api/cache", delete(handlers::clear))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_admin,
        ));

    let sensitive = revalidate
        .merge(refresh)
        .merge(admin)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::limit_sensitive,
        ));

    Router::new()
        .route("/api/health", get(handlers::health))
        .merge(public)
        .merge(images)
        .merge(sensitive)
        .with_state(state)
}
