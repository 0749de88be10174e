//! HTTP client for the cache management routes of a running server.

use folio_api_types::{CacheStats, ClearResponse, ErrorBody, HealthResponse, WarmResponse};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

use crate::config::ClientSettings;

#[derive(Debug, Error)]
pub enum AdminClientError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("server responded {status}: {message}")]
    Status { status: u16, message: String },
    #[error("invalid server url: {0}")]
    Url(#[from] url::ParseError),
    #[error("failed to decode server response: {0}")]
    Decode(#[source] reqwest::Error),
}

pub struct AdminClient {
    http: reqwest::Client,
    base: Url,
    token: Option<String>,
}

impl AdminClient {
    pub fn new(settings: &ClientSettings, token: Option<String>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("folio-cli/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout)
            .build()?;
        Ok(Self {
            http,
            base: settings.server_url.clone(),
            token,
        })
    }

    pub async fn stats(&self) -> Result<CacheStats, AdminClientError> {
        self.send(Method::GET, "api/cache/stats").await
    }

    pub async fn clear(&self) -> Result<ClearResponse, AdminClientError> {
        self.send(Method::DELETE, "api/cache").await
    }

    pub async fn warm(&self) -> Result<WarmResponse, AdminClientError> {
        self.send(Method::POST, "api/cache/warm").await
    }

    pub async fn health(&self) -> Result<HealthResponse, AdminClientError> {
        self.send(Method::GET, "api/health").await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
    ) -> Result<T, AdminClientError> {
        let url = self.base.join(path)?;
        let mut request: RequestBuilder = self.http.request(method, url.clone());
        if let Some(token) = self.token.as_deref() {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|source| AdminClientError::Transport {
                url: url.to_string(),
                source,
            })?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, AdminClientError> {
    let status = response.status();
    if status.is_success() {
        return response.json().await.map_err(AdminClientError::Decode);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| match body.error.hint {
            Some(hint) => format!("{} ({hint})", body.error.message),
            None => body.error.message,
        })
        .unwrap_or(text);
    Err(AdminClientError::Status {
        status: status.as_u16(),
        message,
    })
}
