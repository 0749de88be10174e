//! Allow-listed, rate-shaped image relay.
//!
//! Every request passes through, in order: URL admission ([`AllowList`]), the
//! signed-URL failure budget, a FIFO slot pool, the per-host cooldown, and up to
//! `max_attempts` upstream fetches whose bodies are read under a byte ceiling.

mod allow_list;
mod cooldown;
mod error;
mod signed;
mod upstream;

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use metrics::{counter, gauge, histogram};
use rand::Rng;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use url::Url;

use crate::infra::imaging;

pub use allow_list::{AllowList, HostRule};
pub use cooldown::HostCooldown;
pub use error::ProxyError;
pub use signed::{SignedUrlTracker, is_signed_url};
pub use upstream::{ByteStream, HttpUpstream, UpstreamClient, UpstreamError, UpstreamResponse};

const METRIC_REQUESTS: &str = "folio_image_proxy_requests_total";
const METRIC_ATTEMPTS: &str = "folio_image_proxy_upstream_attempts_total";
const METRIC_FETCH_MS: &str = "folio_image_proxy_fetch_ms";
const METRIC_SLOTS: &str = "folio_image_proxy_available_slots";

pub const SUCCESS_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";
/// Below the roughly one hour lifetime of signed storage links.
pub const SIGNED_CACHE_CONTROL: &str = "public, max-age=3000";
pub const ERROR_CACHE_CONTROL: &str = "public, max-age=30";

#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub allowed_schemes: Vec<String>,
    pub allowed_hosts: Vec<String>,
    pub max_concurrency: usize,
    pub fetch_timeout: Duration,
    pub host_cooldown: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub max_bytes: u64,
    pub host_capacity: usize,
    pub signed_failure_limit: u32,
    pub signed_failure_window: Duration,
    pub signed_capacity: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            allowed_schemes: vec!["https".to_string()],
            allowed_hosts: vec![
                "*.amazonaws.com".to_string(),
                "*.notion.so".to_string(),
                "*.notion-static.com".to_string(),
                "images.unsplash.com".to_string(),
            ],
            max_concurrency: 4,
            fetch_timeout: Duration::from_secs(8),
            host_cooldown: Duration::from_millis(400),
            max_attempts: 3,
            backoff_base: Duration::from_millis(250),
            backoff_max: Duration::from_secs(4),
            max_bytes: 4 * 1024 * 1024,
            host_capacity: 256,
            signed_failure_limit: 3,
            signed_failure_window: Duration::from_secs(600),
            signed_capacity: 1024,
        }
    }
}

impl From<&crate::config::ImageProxySettings> for ProxyConfig {
    fn from(settings: &crate::config::ImageProxySettings) -> Self {
        Self {
            allowed_schemes: settings.allowed_schemes.clone(),
            allowed_hosts: settings.allowed_hosts.clone(),
            max_concurrency: settings.max_concurrency.get() as usize,
            fetch_timeout: Duration::from_millis(settings.timeout_ms.get()),
            host_cooldown: Duration::from_millis(settings.cooldown_ms),
            max_attempts: settings.max_attempts.get(),
            backoff_base: Duration::from_millis(settings.backoff_base_ms),
            backoff_max: Duration::from_millis(settings.backoff_max_ms),
            max_bytes: settings.max_bytes.get(),
            host_capacity: settings.host_capacity.get() as usize,
            signed_failure_limit: settings.signed_failure_limit.get(),
            signed_failure_window: Duration::from_secs(settings.signed_failure_window_secs.get()),
            signed_capacity: settings.signed_capacity.get() as usize,
        }
    }
}

/// A fully read upstream image.
#[derive(Debug, Clone)]
pub struct ProxiedImage {
    pub bytes: Bytes,
    pub content_type: String,
    pub signed: bool,
}

impl ProxiedImage {
    pub fn cache_control(&self) -> &'static str {
        if self.signed {
            SIGNED_CACHE_CONTROL
        } else {
            SUCCESS_CACHE_CONTROL
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyHealth {
    pub max_concurrency: usize,
    pub available_slots: usize,
    pub tracked_hosts: usize,
    pub tracked_signed_urls: usize,
}

pub struct ImageProxy {
    config: ProxyConfig,
    allow_list: AllowList,
    upstream: Arc<dyn UpstreamClient>,
    slots: Semaphore,
    cooldown: HostCooldown,
    signed: SignedUrlTracker,
}

impl ImageProxy {
    pub fn new(config: ProxyConfig, upstream: Arc<dyn UpstreamClient>) -> Self {
        let allow_list = AllowList::new(&config.allowed_schemes, &config.allowed_hosts);
        let max_concurrency = config.max_concurrency.max(1);
        Self {
            allow_list,
            upstream,
            slots: Semaphore::new(max_concurrency),
            cooldown: HostCooldown::new(non_zero(config.host_capacity), config.host_cooldown),
            signed: SignedUrlTracker::new(
                non_zero(config.signed_capacity),
                config.signed_failure_limit,
                config.signed_failure_window,
            ),
            config: ProxyConfig {
                max_concurrency,
                ..config
            },
        }
    }

    /// Build a proxy that talks to the network through reqwest.
    pub fn with_http(config: ProxyConfig) -> Result<Self, reqwest::Error> {
        let allow_list = AllowList::new(&config.allowed_schemes, &config.allowed_hosts);
        let upstream = HttpUpstream::new(allow_list, config.fetch_timeout)?;
        Ok(Self::new(config, Arc::new(upstream)))
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    pub fn health(&self) -> ProxyHealth {
        ProxyHealth {
            max_concurrency: self.config.max_concurrency,
            available_slots: self.slots.available_permits(),
            tracked_hosts: self.cooldown.tracked_hosts(),
            tracked_signed_urls: self.signed.tracked(),
        }
    }

    /// Fetch `raw` through every guard and return the full body.
    pub async fn fetch(&self, raw: &str) -> Result<ProxiedImage, ProxyError> {
        let started = Instant::now();
        let result = self.fetch_admitted(raw).await;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.code(),
        };
        counter!(METRIC_REQUESTS, "outcome" => outcome).increment(1);
        histogram!(METRIC_FETCH_MS, "outcome" => outcome)
            .record(started.elapsed().as_secs_f64() * 1000.0);
        result
    }

    /// Fetch `raw` and reduce it to a blurred placeholder PNG.
    pub async fn placeholder(&self, raw: &str) -> Result<ProxiedImage, ProxyError> {
        let image = self.fetch(raw).await?;
        let source = image.bytes.clone();
        let png = tokio::task::spawn_blocking(move || imaging::placeholder_png(&source))
            .await
            .map_err(|err| ProxyError::Decode(err.to_string()))?
            .map_err(|err| ProxyError::Decode(err.to_string()))?;
        Ok(ProxiedImage {
            bytes: Bytes::from(png),
            content_type: "image/png".to_string(),
            signed: image.signed,
        })
    }

    async fn fetch_admitted(&self, raw: &str) -> Result<ProxiedImage, ProxyError> {
        let url = self.allow_list.check(raw)?;
        let signed = is_signed_url(&url);
        if signed && self.signed.is_exhausted(&url) {
            return Err(ProxyError::SignedUrlExhausted);
        }

        let permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| ProxyError::Transport("image proxy is shutting down".to_string()))?;
        gauge!(METRIC_SLOTS).set(self.slots.available_permits() as f64);
        let result = self.fetch_with_retry(&url).await;
        drop(permit);
        gauge!(METRIC_SLOTS).set(self.slots.available_permits() as f64);

        if signed {
            match &result {
                Ok(_) => self.signed.record_success(&url),
                Err(err) if err.is_upstream_failure() => {
                    let failures = self.signed.record_failure(&url);
                    warn!(
                        target = "folio::image_proxy",
                        host = url.host_str().unwrap_or_default(),
                        failures,
                        error = %err,
                        "signed image url failed"
                    );
                }
                Err(_) => {}
            }
        }

        result.map(|(bytes, content_type)| ProxiedImage {
            bytes,
            content_type,
            signed,
        })
    }

    async fn fetch_with_retry(&self, url: &Url) -> Result<(Bytes, String), ProxyError> {
        let host = url.host_str().unwrap_or_default().to_string();
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            self.cooldown.wait_turn(&host).await;
            counter!(METRIC_ATTEMPTS).increment(1);

            let outcome = match tokio::time::timeout(self.config.fetch_timeout, self.attempt(url)).await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(ProxyError::Timeout),
            };

            match outcome {
                Ok(image) => return Ok(image),
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    let delay = backoff_delay(self.config.backoff_base, self.config.backoff_max, attempt);
                    debug!(
                        target = "folio::image_proxy",
                        host = host.as_str(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying upstream image fetch"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt(&self, url: &Url) -> Result<(Bytes, String), ProxyError> {
        let response = self
            .upstream
            .fetch(url)
            .await
            .map_err(|err| ProxyError::Transport(err.to_string()))?;

        if !(200..300).contains(&response.status) {
            return Err(ProxyError::Upstream {
                status: response.status,
            });
        }

        let content_type = image_content_type(response.content_type.as_deref(), url)?;
        if let Some(declared) = response.content_length {
            if declared > self.config.max_bytes {
                return Err(ProxyError::TooLarge {
                    limit: self.config.max_bytes,
                });
            }
        }

        let bytes = read_capped(response.body, self.config.max_bytes).await?;
        Ok((bytes, content_type))
    }
}

/// Resolve the media type, falling back to the URL path when upstream sends none.
/// SVG is refused because it can carry script when served from our origin.
fn image_content_type(declared: Option<&str>, url: &Url) -> Result<String, ProxyError> {
    let media_type = match declared {
        Some(value) => value
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase(),
        None => mime_guess::from_path(url.path())
            .first_raw()
            .unwrap_or("application/octet-stream")
            .to_string(),
    };

    if media_type.starts_with("image/") && media_type != "image/svg+xml" {
        Ok(media_type)
    } else {
        Err(ProxyError::UnsupportedType(media_type))
    }
}

/// Read the body, aborting as soon as more than `limit` bytes have arrived.
pub async fn read_capped(mut body: ByteStream, limit: u64) -> Result<Bytes, ProxyError> {
    let mut buffer = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|err| ProxyError::Transport(err.to_string()))?;
        if buffer.len() as u64 + chunk.len() as u64 > limit {
            return Err(ProxyError::TooLarge { limit });
        }
        buffer.extend_from_slice(&chunk);
    }
    Ok(buffer.freeze())
}

/// `base * 2^(attempt-1)` capped at `max`, plus up to half of that again as jitter.
fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let delay = base.saturating_mul(1 << exponent).min(max);
    let jitter_ms = (delay.as_millis() as u64) / 2;
    if jitter_ms == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
}

fn non_zero(value: usize) -> NonZeroUsize {
    NonZeroUsize::new(value).unwrap_or(NonZeroUsize::MIN)
}
