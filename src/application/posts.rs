//! Read side of the content store: listings and rendered post payloads.

use std::sync::Arc;
use std::time::Duration;

use folio_api_types::{CoverImage as CoverView, PostDetail, PostList, PostSummary};
use tracing::debug;

use crate::cache::{CacheLookupError, DataCache};
use crate::domain::posts::Post;

use super::content::ContentStore;
use super::error::AppError;
use super::render::{MarkdownRenderer, RenderError};

pub const POST_KEY_PREFIX: &str = "post:";

pub fn cache_key(slug: &str) -> String {
    format!("{POST_KEY_PREFIX}{slug}")
}

pub fn summary(post: &Post) -> PostSummary {
    PostSummary {
        id: post.id.clone(),
        slug: post.slug.clone(),
        title: post.title.clone(),
        description: post.description.clone(),
        published_at: post.published_at,
        modified_at: post.modified_at,
        featured: post.featured,
        tags: post.tags.clone(),
        author: post.author.clone(),
        reading_time_minutes: post.reading_time_minutes,
        canonical_url: post.canonical_url.clone(),
        cover: post.cover.as_ref().map(|cover| CoverView {
            src: cover.src.clone(),
            width: cover.width,
            height: cover.height,
            placeholder: cover.placeholder.clone(),
        }),
    }
}

pub struct PostService {
    content: Arc<ContentStore>,
    cache: Arc<DataCache>,
    renderer: Arc<MarkdownRenderer>,
    ttl: Duration,
}

impl PostService {
    pub fn new(
        content: Arc<ContentStore>,
        cache: Arc<DataCache>,
        renderer: Arc<MarkdownRenderer>,
        ttl: Duration,
    ) -> Self {
        Self {
            content,
            cache,
            renderer,
            ttl,
        }
    }

    pub fn content(&self) -> &Arc<ContentStore> {
        &self.content
    }

    /// Published posts newest first, optionally restricted to one tag.
    pub fn list(&self, tag: Option<&str>) -> PostList {
        let snapshot = self.content.snapshot();
        let posts: Vec<PostSummary> = match tag.map(str::trim).filter(|tag| !tag.is_empty()) {
            Some(tag) => snapshot.with_tag(tag).iter().map(|post| summary(post)).collect(),
            None => snapshot.posts().iter().map(|post| summary(post)).collect(),
        };
        PostList {
            total: posts.len(),
            posts,
        }
    }

    /// Summary plus sanitized HTML, read through the data cache.
    pub async fn detail(&self, slug: &str) -> Result<PostDetail, AppError> {
        let post = self.content.snapshot().get(slug).ok_or(AppError::NotFound)?;
        let renderer = Arc::clone(&self.renderer);
        self.cache
            .get_or_compute(&cache_key(slug), self.ttl, move || async move {
                render_detail(&renderer, &post)
            })
            .await
            .map_err(|err| match err {
                CacheLookupError::Store(err) => AppError::Cache(err),
                CacheLookupError::Compute(err) => AppError::Render(err),
            })
    }

    /// Drop cached payloads for `slugs`, or every post payload when empty.
    pub async fn invalidate(&self, slugs: &[String]) -> Result<u64, AppError> {
        if slugs.is_empty() {
            return Ok(self.cache.clear(POST_KEY_PREFIX).await?);
        }
        let mut removed = 0;
        for slug in slugs {
            if self.cache.invalidate(&cache_key(slug)).await? {
                removed += 1;
            }
        }
        debug!(target = "folio::posts", removed, "post cache entries invalidated");
        Ok(removed)
    }
}

fn render_detail(renderer: &MarkdownRenderer, post: &Post) -> Result<PostDetail, RenderError> {
    Ok(PostDetail {
        summary: summary(post),
        html: renderer.render_html(&post.body_markdown)?,
    })
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use time::OffsetDateTime;
    use time::macros::datetime;

    use super::*;
    use crate::application::content::ContentSnapshot;
    use crate::application::content::tests::post;
    use crate::cache::{FailurePolicy, MemoryCacheStore};

    fn service(posts: Vec<Post>) -> PostService {
        let content = Arc::new(ContentStore::new("unused"));
        content.replace(ContentSnapshot::from_posts(posts, OffsetDateTime::UNIX_EPOCH));
        let store = MemoryCacheStore::new(NonZeroUsize::new(16).expect("non-zero"), Duration::from_secs(60));
        let cache = Arc::new(DataCache::new(Arc::new(store), FailurePolicy::Open));
        PostService::new(content, cache, Arc::new(MarkdownRenderer::new()), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn detail_renders_once_and_then_hits_cache() {
        let mut hello = post("hello", datetime!(2024-01-01 00:00 UTC));
        hello.body_markdown = "Some **bold** text.".to_string();
        let service = service(vec![hello]);

        let first = service.detail("hello").await.expect("detail");
        assert!(first.html.contains("<strong>bold</strong>"));
        service.detail("hello").await.expect("cached detail");

        let stats = service.cache.stats().await;
        assert_eq!((stats.hits, stats.misses), (1, 1));
    }

    #[tokio::test]
    async fn unknown_slug_is_not_found() {
        let service = service(Vec::new());
        let err = service.detail("missing").await.expect_err("missing");
        assert!(matches!(err, AppError::NotFound));
    }

    #[tokio::test]
    async fn invalidate_one_then_everything() {
        let service = service(vec![
            post("a", datetime!(2024-01-01 00:00 UTC)),
            post("b", datetime!(2024-02-01 00:00 UTC)),
        ]);
        service.detail("a").await.expect("a");
        service.detail("b").await.expect("b");
        assert_eq!(service.invalidate(&["a".to_string()]).await.expect("one"), 1);
        assert_eq!(service.invalidate(&[]).await.expect("all"), 1);
    }

    #[test]
    fn list_filters_by_tag() {
        let mut tagged = post("tagged", datetime!(2024-01-01 00:00 UTC));
        tagged.tags = vec!["Rust".to_string()];
        let service = service(vec![tagged, post("plain", datetime!(2024-02-01 00:00 UTC))]);

        assert_eq!(service.list(None).total, 2);
        let rust = service.list(Some("rust"));
        assert_eq!(rust.total, 1);
        assert_eq!(rust.posts[0].slug, "tagged");
    }
}
