use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::application::error::AppError;
use crate::application::posts::PostService;
use crate::application::search::{SearchRequest, SearchService};

#[derive(Debug, Error)]
pub enum CacheWarmError {
    #[error("failed to render post `{slug}`: {source}")]
    PostDetail {
        slug: String,
        #[source]
        source: AppError,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmSummary {
    pub posts: usize,
    pub searches: usize,
}

/// Fills the post payload cache and the search cache from the current snapshot.
pub struct CacheWarmer {
    posts: Arc<PostService>,
    search: Arc<SearchService>,
}

impl CacheWarmer {
    pub fn new(posts: Arc<PostService>, search: Arc<SearchService>) -> Self {
        Self { posts, search }
    }

    pub async fn warm(&self) -> Result<WarmSummary, CacheWarmError> {
        info!(target = "folio::cache_warmer", "warming caches");
        let snapshot = self.posts.content().snapshot();

        let mut warmed_posts = HashSet::new();
        for post in snapshot.posts() {
            if !warmed_posts.insert(post.slug.clone()) {
                continue;
            }
            self.posts
                .detail(&post.slug)
                .await
                .map_err(|source| CacheWarmError::PostDetail {
                    slug: post.slug.clone(),
                    source,
                })?;
        }

        // Tag pages issue tag-name searches; prime those too.
        let mut searches = 0;
        for tag in snapshot.tag_counts().into_keys() {
            self.search.search(&SearchRequest {
                q: tag,
                ..SearchRequest::default()
            });
            searches += 1;
        }

        let summary = WarmSummary {
            posts: warmed_posts.len(),
            searches,
        };
        info!(
            target = "folio::cache_warmer",
            posts = summary.posts,
            searches = summary.searches,
            "caches warmed"
        );
        Ok(summary)
    }

    /// Startup variant: failures are logged, never fatal.
    pub async fn warm_initial(&self) {
        if let Err(err) = self.warm().await {
            warn!(target = "folio::cache_warmer", error = %err, "initial cache warm failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::time::Duration;

    use time::OffsetDateTime;
    use time::macros::datetime;

    use super::*;
    use crate::application::content::tests::post;
    use crate::application::content::{ContentSnapshot, ContentStore};
    use crate::application::render::MarkdownRenderer;
    use crate::application::search::SearchConfig;
    use crate::cache::{DataCache, FailurePolicy, MemoryCacheStore};

    #[tokio::test]
    async fn warms_every_post_and_tag() {
        let mut a = post("a", datetime!(2024-01-01 00:00 UTC));
        a.tags = vec!["rust".to_string(), "web".to_string()];
        let mut b = post("b", datetime!(2024-02-01 00:00 UTC));
        b.tags = vec!["Rust".to_string()];

        let content = Arc::new(ContentStore::new("unused"));
        content.replace(ContentSnapshot::from_posts(vec![a, b], OffsetDateTime::UNIX_EPOCH));
        let renderer = Arc::new(MarkdownRenderer::new());
        let store = MemoryCacheStore::new(NonZeroUsize::new(8).expect("non-zero"), Duration::from_secs(60));
        let cache = Arc::new(DataCache::new(Arc::new(store), FailurePolicy::Open));
        let posts = Arc::new(PostService::new(
            Arc::clone(&content),
            Arc::clone(&cache),
            Arc::clone(&renderer),
            Duration::from_secs(60),
        ));
        let search = Arc::new(SearchService::new(content, renderer, SearchConfig::default()));

        let warmer = CacheWarmer::new(posts, Arc::clone(&search));
        let summary = warmer.warm().await.expect("warm");
        assert_eq!(summary, WarmSummary { posts: 2, searches: 2 });
        assert_eq!(cache.stats().await.entries, Some(2));
        assert_eq!(search.cached_responses(), 2);
    }
}
