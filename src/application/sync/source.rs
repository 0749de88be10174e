use async_trait::async_trait;
use bytes::Bytes;

use crate::infra::notion::NotionError;
use crate::infra::notion::types::{Block, Page};

/// Where synced posts come from. Implemented by the Notion client and by test
/// fixtures.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Human readable origin, used in logs.
    fn describe(&self) -> String;

    /// All database pages, published or not.
    async fn query_pages(&self) -> Result<Vec<Page>, NotionError>;

    async fn block_children(&self, block_id: &str) -> Result<Vec<Block>, NotionError>;

    async fn download(&self, url: &str) -> Result<Bytes, NotionError>;
}
