use thiserror::Error;

use crate::domain::error::DomainError;
use crate::domain::slug::SlugError;
use crate::infra::notion::NotionError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("a sync is already running")]
    Busy,
    #[error(transparent)]
    Source(#[from] NotionError),
    #[error("image `{url}` could not be localized: {message}")]
    Image { url: String, message: String },
    #[error(transparent)]
    Document(#[from] DomainError),
    #[error(transparent)]
    Slug(#[from] SlugError),
    #[error("failed to encode image manifest: {0}")]
    Manifest(#[source] serde_json::Error),
    #[error("content directory update failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("sync task failed: {0}")]
    Task(String),
}
