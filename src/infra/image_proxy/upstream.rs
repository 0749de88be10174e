//! The network edge of the proxy, behind a trait so tests can count calls.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::redirect::Policy;
use thiserror::Error;
use url::Url;

use super::allow_list::AllowList;

const MAX_REDIRECTS: usize = 3;

pub type ByteStream = BoxStream<'static, Result<Bytes, UpstreamError>>;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("{0}")]
    Transport(String),
    #[error("body stream failed: {0}")]
    Body(String),
}

pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<UpstreamResponse, UpstreamError>;
}

/// reqwest-backed upstream. Redirects are followed only while they stay on the
/// allow-list.
pub struct HttpUpstream {
    client: reqwest::Client,
}

impl HttpUpstream {
    pub fn new(allow_list: AllowList, connect_timeout: Duration) -> Result<Self, reqwest::Error> {
        let policy = Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else if allow_list.permits(attempt.url()) {
                attempt.follow()
            } else {
                attempt.stop()
            }
        });
        let client = reqwest::Client::builder()
            .user_agent(concat!("folio-image-proxy/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(connect_timeout)
            .redirect(policy)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl UpstreamClient for HttpUpstream {
    async fn fetch(&self, url: &Url) -> Result<UpstreamResponse, UpstreamError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| UpstreamError::Transport(err.to_string()))?;

        let headers = response.headers();
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let content_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse().ok());

        Ok(UpstreamResponse {
            status: response.status().as_u16(),
            content_type,
            content_length,
            body: response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|err| UpstreamError::Body(err.to_string())))
                .boxed(),
        })
    }
}
