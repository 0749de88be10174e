//! Notion API access for content sync.

mod client;
pub mod types;

use async_trait::async_trait;
use bytes::Bytes;

pub use client::{NOTION_VERSION, NotionClient, NotionClientConfig, NotionError};

use crate::application::sync::ContentSource;
use types::{Block, Page};

#[async_trait]
impl ContentSource for NotionClient {
    fn describe(&self) -> String {
        format!("notion database {}", self.database_id())
    }

    async fn query_pages(&self) -> Result<Vec<Page>, NotionError> {
        self.query_database().await
    }

    async fn block_children(&self, block_id: &str) -> Result<Vec<Block>, NotionError> {
        NotionClient::block_children(self, block_id).await
    }

    async fn download(&self, url: &str) -> Result<Bytes, NotionError> {
        NotionClient::download(self, url).await
    }
}
