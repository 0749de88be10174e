//! Client for an Upstash-compatible REST key-value store.
//!
//! Each command is a path (`/get/<key>`, `/incr/<key>`, ...) authenticated with a
//! bearer token. Replies are `{"result": ...}` on success and `{"error": "..."}` when
//! the command itself failed.

use std::time::Duration;

use reqwest::{Client, Method, Url};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

const SCAN_BATCH: &str = "200";

#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("kv endpoint returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("kv command failed: {0}")]
    Command(String),
    #[error("unexpected kv reply: {0}")]
    Decode(String),
    #[error("kv base url `{0}` cannot carry command paths")]
    BaseUrl(String),
}

#[derive(Debug, Deserialize)]
struct KvReply {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct KvClient {
    http: Client,
    base: Url,
    token: String,
}

impl KvClient {
    pub fn new(base: Url, token: impl Into<String>, timeout: Duration) -> Result<Self, KvError> {
        if base.cannot_be_a_base() {
            return Err(KvError::BaseUrl(base.to_string()));
        }
        let http = Client::builder()
            .user_agent(concat!("folio/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base,
            token: token.into(),
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        match self.call(Method::GET, &["get", key], &[], None).await? {
            Value::Null => Ok(None),
            Value::String(value) => Ok(Some(value)),
            other => Err(KvError::Decode(format!("GET returned {other}"))),
        }
    }

    /// `SET key value`, with a millisecond expiry when `ttl` is given.
    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), KvError> {
        let query: Vec<(&str, String)> = ttl
            .map(|ttl| vec![("PX", duration_ms(ttl).max(1).to_string())])
            .unwrap_or_default();
        self.call(Method::POST, &["set", key], &query, Some(value.to_string()))
            .await?;
        Ok(())
    }

    pub async fn del(&self, keys: &[String]) -> Result<u64, KvError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut segments = vec!["del"];
        segments.extend(keys.iter().map(String::as_str));
        as_u64(self.call(Method::POST, &segments, &[], None).await?)
    }

    pub async fn incr(&self, key: &str) -> Result<i64, KvError> {
        as_i64(self.call(Method::POST, &["incr", key], &[], None).await?)
    }

    pub async fn pexpire(&self, key: &str, ttl: Duration) -> Result<bool, KvError> {
        let millis = duration_ms(ttl).max(1).to_string();
        let reply = self
            .call(Method::POST, &["pexpire", key, &millis], &[], None)
            .await?;
        Ok(as_i64(reply)? == 1)
    }

    /// Remaining time to live in milliseconds; negative when the key has no expiry
    /// (`-1`) or does not exist (`-2`).
    pub async fn pttl(&self, key: &str) -> Result<i64, KvError> {
        as_i64(self.call(Method::GET, &["pttl", key], &[], None).await?)
    }

    /// One `SCAN` step. Returns the next cursor (`"0"` when done) and the batch.
    pub async fn scan(&self, cursor: &str, pattern: &str) -> Result<(String, Vec<String>), KvError> {
        let reply = self
            .call(
                Method::GET,
                &["scan", cursor, "match", pattern, "count", SCAN_BATCH],
                &[],
                None,
            )
            .await?;
        let Value::Array(mut parts) = reply else {
            return Err(KvError::Decode("SCAN reply is not an array".to_string()));
        };
        if parts.len() != 2 {
            return Err(KvError::Decode(format!(
                "SCAN reply has {} elements",
                parts.len()
            )));
        }
        let keys = match parts.pop() {
            Some(Value::Array(keys)) => keys
                .into_iter()
                .filter_map(|key| key.as_str().map(str::to_string))
                .collect(),
            _ => return Err(KvError::Decode("SCAN keys are not an array".to_string())),
        };
        let next = match parts.pop() {
            Some(Value::String(cursor)) => cursor,
            Some(Value::Number(cursor)) => cursor.to_string(),
            _ => return Err(KvError::Decode("SCAN cursor missing".to_string())),
        };
        Ok((next, keys))
    }

    /// Collect every key matching `pattern` by walking `SCAN` to completion.
    pub async fn scan_all(&self, pattern: &str) -> Result<Vec<String>, KvError> {
        let mut cursor = "0".to_string();
        let mut keys = Vec::new();
        loop {
            let (next, batch) = self.scan(&cursor, pattern).await?;
            keys.extend(batch);
            if next == "0" {
                return Ok(keys);
            }
            cursor = next;
        }
    }

    pub async fn dbsize(&self) -> Result<u64, KvError> {
        as_u64(self.call(Method::GET, &["dbsize"], &[], None).await?)
    }

    pub async fn ping(&self) -> Result<(), KvError> {
        self.call(Method::GET, &["ping"], &[], None).await?;
        Ok(())
    }

    async fn call(
        &self,
        method: Method,
        segments: &[&str],
        query: &[(&str, String)],
        body: Option<String>,
    ) -> Result<Value, KvError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| KvError::BaseUrl(self.base.to_string()))?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }

        let mut request = self.http.request(method, url).bearer_auth(&self.token);
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        let reply: Option<KvReply> = serde_json::from_slice(&bytes).ok();

        if let Some(KvReply {
            error: Some(message),
            ..
        }) = &reply
        {
            return Err(KvError::Command(message.clone()));
        }
        if !status.is_success() {
            return Err(KvError::Status {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&bytes).chars().take(200).collect(),
            });
        }
        reply
            .map(|reply| reply.result)
            .ok_or_else(|| KvError::Decode("reply is not a JSON object".to_string()))
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn as_i64(value: Value) -> Result<i64, KvError> {
    match &value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| KvError::Decode(format!("expected integer, got {value}")))
}

fn as_u64(value: Value) -> Result<u64, KvError> {
    let signed = as_i64(value)?;
    u64::try_from(signed).map_err(|_| KvError::Decode(format!("expected unsigned, got {signed}")))
}
