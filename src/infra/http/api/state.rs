use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::application::content::ContentStore;
use crate::application::posts::PostService;
use crate::application::render::MarkdownRenderer;
use crate::application::search::{SearchConfig, SearchService};
use crate::application::sync::{SyncPaths, SyncService};
use crate::cache::{CacheConfig, DataCache};
use crate::config::{AuthSettings, Settings};
use crate::infra::cache_warmer::CacheWarmer;
use crate::infra::error::InfraError;
use crate::infra::image_proxy::{ImageProxy, ProxyConfig};
use crate::infra::kv::KvClient;
use crate::infra::notion::{NotionClient, NotionClientConfig};

use super::rate_limit::RateLimiter;

#[derive(Clone)]
pub struct ApiState {
    pub content: Arc<ContentStore>,
    pub posts: Arc<PostService>,
    pub search: Arc<SearchService>,
    pub image_proxy: Arc<ImageProxy>,
    pub rate_limiter: Arc<RateLimiter>,
    pub auth: Arc<AuthSettings>,
    /// Present only when Notion credentials are configured.
    pub sync: Option<Arc<SyncService>>,
    pub warmer: Arc<CacheWarmer>,
    pub data_cache: Arc<DataCache>,
    pub started: Instant,
    pub environment: Arc<BTreeMap<String, String>>,
}

impl ApiState {
    /// Wire every service from resolved settings. Content is not loaded yet.
    pub fn from_settings(settings: &Settings) -> Result<Self, InfraError> {
        let kv = match settings.kv.credentials() {
            Some((url, token)) => Some(KvClient::new(url.clone(), token, settings.kv.timeout)?),
            None => None,
        };

        let cache_config = CacheConfig::from(&settings.cache);
        let data_cache = Arc::new(DataCache::new(
            cache_config.build_store(kv.clone()),
            cache_config.failure_policy,
        ));
        let rate_limiter = Arc::new(RateLimiter::from_settings(&settings.rate_limit, kv));

        let content = Arc::new(ContentStore::new(settings.content.posts_dir.clone()));
        let renderer = Arc::new(MarkdownRenderer::new());
        let posts = Arc::new(PostService::new(
            Arc::clone(&content),
            Arc::clone(&data_cache),
            Arc::clone(&renderer),
            cache_config.post_ttl(),
        ));
        let search = Arc::new(SearchService::new(
            Arc::clone(&content),
            renderer,
            SearchConfig::from(&settings.search),
        ));
        let image_proxy = Arc::new(ImageProxy::with_http(ProxyConfig::from(&settings.image_proxy))?);

        let sync = match NotionClientConfig::from_settings(&settings.notion) {
            Some(config) => {
                let client = NotionClient::new(config)
                    .map_err(|err| InfraError::configuration(err.to_string()))?;
                Some(Arc::new(SyncService::new(
                    Arc::new(client),
                    SyncPaths {
                        posts_dir: settings.content.posts_dir.clone(),
                        images_dir: settings.content.images_dir.clone(),
                        image_url_prefix: settings.content.image_url_prefix.clone(),
                    },
                )))
            }
            None => None,
        };

        info!(
            target = "folio::bootstrap",
            cache_backend = data_cache.backend(),
            rate_limit_backend = rate_limiter.backend(),
            sync_enabled = sync.is_some(),
            "services wired"
        );

        Ok(Self {
            warmer: Arc::new(CacheWarmer::new(Arc::clone(&posts), Arc::clone(&search))),
            content,
            posts,
            search,
            image_proxy,
            rate_limiter,
            auth: Arc::new(settings.auth.clone()),
            sync,
            data_cache,
            started: Instant::now(),
            environment: Arc::new(settings.environment_report()),
        })
    }

    /// Reload content from disk and drop every derived cache.
    pub async fn reload_content(&self) -> Result<usize, crate::application::error::AppError> {
        let snapshot = self.content.reload().await?;
        self.posts.invalidate(&[]).await?;
        self.search.invalidate();
        Ok(snapshot.len())
    }
}
