use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid image url: {0}")]
    InvalidUrl(String),
    #[error("host `{0}` is not on the image allow-list")]
    Disallowed(String),
    #[error("signed url has expired or keeps failing")]
    SignedUrlExhausted,
    #[error("image exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },
    #[error("unsupported content type `{0}`")]
    UnsupportedType(String),
    #[error("upstream responded with status {status}")]
    Upstream { status: u16 },
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("upstream request timed out")]
    Timeout,
    #[error("image could not be decoded: {0}")]
    Decode(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            Self::Disallowed(_) => StatusCode::FORBIDDEN,
            Self::SignedUrlExhausted => StatusCode::GONE,
            Self::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnsupportedType(_) | Self::Decode(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Upstream { .. } | Self::Transport(_) | Self::Timeout => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidUrl(_) => "invalid_url",
            Self::Disallowed(_) => "host_not_allowed",
            Self::SignedUrlExhausted => "signed_url_expired",
            Self::TooLarge { .. } => "image_too_large",
            Self::UnsupportedType(_) => "unsupported_media_type",
            Self::Decode(_) => "image_decode_failed",
            Self::Upstream { .. } => "upstream_status",
            Self::Transport(_) => "upstream_unreachable",
            Self::Timeout => "upstream_timeout",
        }
    }

    /// 429, 5xx, transport failures and timeouts are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream { status } => *status == 429 || (500..600).contains(status),
            Self::Transport(_) | Self::Timeout => true,
            _ => false,
        }
    }

    /// Whether the failure says something about the upstream URL itself.
    pub(crate) fn is_upstream_failure(&self) -> bool {
        matches!(
            self,
            Self::Upstream { .. } | Self::Transport(_) | Self::Timeout
        )
    }
}
