//! Paced, retrying client for the Notion REST API.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use reqwest::header::RETRY_AFTER;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, warn};
use url::Url;

use super::types::{Block, Page, Paginated};

pub const NOTION_VERSION: &str = "2022-06-28";
const PAGE_SIZE: u32 = 100;

/// An HTTP error status with its message and `Retry-After` hint.
type StatusHint = (StatusCode, String, Option<Duration>);

#[derive(Debug, Error)]
pub enum NotionError {
    #[error("notion request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("notion responded with {status}: {message}")]
    Status { status: u16, message: String },
    #[error("failed to decode notion response: {0}")]
    Decode(String),
    #[error("invalid notion url: {0}")]
    Url(String),
    #[error("download exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },
    #[error("notion credentials are not configured")]
    MissingCredentials,
}

impl NotionError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotionClientConfig {
    pub api_base: Url,
    pub token: String,
    pub database_id: String,
    pub min_interval: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub timeout: Duration,
    pub max_download_bytes: u64,
}

impl NotionClientConfig {
    /// `None` until both the token and the database id are configured.
    pub fn from_settings(settings: &crate::config::NotionSettings) -> Option<Self> {
        Some(Self {
            api_base: settings.api_base.clone(),
            token: settings.token.clone()?,
            database_id: settings.database_id.clone()?,
            min_interval: settings.min_interval,
            max_attempts: settings.max_attempts.get(),
            backoff_base: settings.backoff_base,
            timeout: settings.timeout,
            max_download_bytes: settings.max_download_bytes.get(),
        })
    }
}

pub struct NotionClient {
    http: reqwest::Client,
    config: NotionClientConfig,
    next_slot: Mutex<Instant>,
}

impl NotionClient {
    pub fn new(config: NotionClientConfig) -> Result<Self, NotionError> {
        if config.token.trim().is_empty() || config.database_id.trim().is_empty() {
            return Err(NotionError::MissingCredentials);
        }
        if config.api_base.cannot_be_a_base() {
            return Err(NotionError::Url(config.api_base.to_string()));
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("folio/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            http,
            config,
            next_slot: Mutex::new(Instant::now()),
        })
    }

    pub fn database_id(&self) -> &str {
        &self.config.database_id
    }

    /// Every page of the configured database, following cursors.
    pub async fn query_database(&self) -> Result<Vec<Page>, NotionError> {
        let mut pages = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut body = json!({ "page_size": PAGE_SIZE });
            if let Some(cursor) = &cursor {
                body["start_cursor"] = Value::String(cursor.clone());
            }
            let batch: Paginated<Page> = self
                .api(
                    Method::POST,
                    &["databases", &self.config.database_id, "query"],
                    &[],
                    Some(&body),
                )
                .await?;
            pages.extend(batch.results);
            match (batch.has_more, batch.next_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }
        debug!(target = "folio::notion", pages = pages.len(), "database query complete");
        Ok(pages)
    }

    /// Direct children of a block (or page), following cursors.
    pub async fn block_children(&self, block_id: &str) -> Result<Vec<Block>, NotionError> {
        let mut blocks = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut query = vec![("page_size", PAGE_SIZE.to_string())];
            if let Some(cursor) = &cursor {
                query.push(("start_cursor", cursor.clone()));
            }
            let batch: Paginated<Block> = self
                .api(Method::GET, &["blocks", block_id, "children"], &query, None)
                .await?;
            blocks.extend(batch.results);
            match (batch.has_more, batch.next_cursor) {
                (true, Some(next)) => cursor = Some(next),
                _ => break,
            }
        }
        Ok(blocks)
    }

    /// Download a file URL (usually a signed S3 link) under the byte limit.
    pub async fn download(&self, url: &str) -> Result<Bytes, NotionError> {
        let url = Url::parse(url).map_err(|err| NotionError::Url(err.to_string()))?;
        let limit = self.config.max_download_bytes;
        let (http, url) = (&self.http, &url);
        self.with_retry("download", move || async move {
            let response = http.get(url.clone()).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(NotionError::Status {
                    status: status.as_u16(),
                    message: status.canonical_reason().unwrap_or_default().to_string(),
                });
            }
            let mut body = response.bytes_stream();
            let mut buffer = BytesMut::new();
            while let Some(chunk) = body.next().await {
                let chunk = chunk?;
                if buffer.len() as u64 + chunk.len() as u64 > limit {
                    return Err(NotionError::TooLarge { limit });
                }
                buffer.extend_from_slice(&chunk);
            }
            Ok((buffer.freeze(), None))
        })
        .await
    }

    async fn api<T: DeserializeOwned>(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<T, NotionError> {
        let mut url = self.config.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| NotionError::Url(self.config.api_base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }

        let operation = segments.first().copied().unwrap_or("api");
        let (method, url) = (&method, &url);
        let value = self
            .with_retry(operation, move || async move {
                self.pace().await;
                let mut request = self
                    .http
                    .request(method.clone(), url.clone())
                    .bearer_auth(&self.config.token)
                    .header("Notion-Version", NOTION_VERSION);
                if let Some(body) = body {
                    request = request.json(body);
                }
                let response = request.send().await?;
                let status = response.status();
                if status.is_success() {
                    let value = response
                        .json::<Value>()
                        .await
                        .map_err(|err| NotionError::Decode(err.to_string()))?;
                    return Ok((value, None));
                }
                let retry_after = retry_after(&response);
                let message = error_message(response.text().await.unwrap_or_default(), status);
                Ok((Value::Null, Some((status, message, retry_after))))
            })
            .await?;

        serde_json::from_value(value).map_err(|err| NotionError::Decode(err.to_string()))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` reports HTTP error responses as `Ok((_, Some(hint)))` so `Retry-After`
    /// can steer the next delay.
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, NotionError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<(T, Option<StatusHint>), NotionError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let (err, hint) = match op().await {
                Ok((value, None)) => return Ok(value),
                Ok((_, Some((status, message, retry_after)))) => (
                    NotionError::Status {
                        status: status.as_u16(),
                        message,
                    },
                    retry_after,
                ),
                Err(err) => (err, None),
            };

            if !err.is_retryable() || attempt >= max_attempts {
                return Err(err);
            }

            let backoff = self.config.backoff_base.saturating_mul(1 << (attempt - 1).min(10));
            let delay = hint.map_or(backoff, |hint| hint.max(backoff));
            warn!(
                target = "folio::notion",
                operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying notion request"
            );
            sleep(delay).await;
        }
    }

    /// Keep consecutive API calls at least `min_interval` apart.
    async fn pace(&self) {
        let mut next_slot = self.next_slot.lock().await;
        if *next_slot > Instant::now() {
            sleep_until(*next_slot).await;
        }
        *next_slot = Instant::now() + self.config.min_interval;
    }
}

fn retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

fn error_message(body: String, status: StatusCode) -> String {
    serde_json::from_str::<Value>(&body)
        .ok()
        .and_then(|value| value.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string())
}
