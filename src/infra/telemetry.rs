use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register metric descriptions with the installed recorder. Idempotent.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "folio_cache_hit_total",
            Unit::Count,
            "Data cache lookups answered from the store."
        );
        describe_counter!(
            "folio_cache_miss_total",
            Unit::Count,
            "Data cache lookups that had to compute the payload."
        );
        describe_counter!(
            "folio_cache_error_total",
            Unit::Count,
            "Data cache store operations that failed."
        );
        describe_counter!(
            "folio_search_queries_total",
            Unit::Count,
            "Search queries served, labelled by cache outcome."
        );
        describe_histogram!(
            "folio_search_ms",
            Unit::Milliseconds,
            "Latency of uncached search scoring in milliseconds."
        );
        describe_counter!(
            "folio_rate_limit_decisions_total",
            Unit::Count,
            "Rate limit decisions, labelled by policy and outcome."
        );
        describe_counter!(
            "folio_rate_limit_store_errors_total",
            Unit::Count,
            "Rate limit counter store failures, labelled by failure policy."
        );
        describe_counter!(
            "folio_image_proxy_requests_total",
            Unit::Count,
            "Image proxy requests, labelled by outcome."
        );
        describe_counter!(
            "folio_image_proxy_upstream_attempts_total",
            Unit::Count,
            "Upstream fetch attempts made by the image proxy."
        );
        describe_histogram!(
            "folio_image_proxy_fetch_ms",
            Unit::Milliseconds,
            "End-to-end image proxy fetch latency in milliseconds."
        );
        describe_gauge!(
            "folio_image_proxy_available_slots",
            Unit::Count,
            "Free image proxy concurrency slots."
        );
        describe_counter!(
            "folio_sync_runs_total",
            Unit::Count,
            "Content sync runs, labelled by outcome."
        );
        describe_counter!(
            "folio_sync_page_failures_total",
            Unit::Count,
            "Notion pages that failed to convert during a sync."
        );
        describe_histogram!(
            "folio_sync_ms",
            Unit::Milliseconds,
            "Content sync duration in milliseconds."
        );
    });
}
