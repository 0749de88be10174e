//! Full-text search over the loaded posts.
//!
//! Every visible post is indexed once per content generation. Responses are cached
//! per content generation and normalized `(query, limit, offset, suggestions)` tuple
//! in a bounded TTL map that is dropped whenever the content generation moves.

mod query;
mod scorer;

use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use folio_api_types::{SearchHit, SearchResponse};
use metrics::{counter, histogram};
use time::OffsetDateTime;
use tracing::debug;

pub use query::{DEFAULT_LIMIT, MAX_LIMIT, SearchQuery, SearchRequest, normalize_query};
pub use scorer::{
    BODY_WEIGHT, DESCRIPTION_WEIGHT, FEATURED_BOOST, MIN_SCORE, RECENT_BOOST, TAGS_WEIGHT,
    TITLE_WEIGHT, field_score, fuzzy_ratio,
};

use crate::cache::BoundedTtlCache;
use crate::cache::lock::{rw_read, rw_write};

use super::content::{ContentSnapshot, ContentStore};
use super::posts::summary;
use super::render::MarkdownRenderer;
use scorer::{SearchDocument, rank, score_document};

const METRIC_QUERIES: &str = "folio_search_queries_total";
const METRIC_DURATION_MS: &str = "folio_search_ms";
const SOURCE: &str = "application::search";
const MAX_SUGGESTIONS: usize = 5;

#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub cache_ttl: Duration,
    pub cache_capacity: NonZeroUsize,
    /// Characters of plain body text considered per post.
    pub body_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(60),
            cache_capacity: NonZeroUsize::new(256).unwrap_or(NonZeroUsize::MIN),
            body_chars: 5_000,
        }
    }
}

impl From<&crate::config::SearchSettings> for SearchConfig {
    fn from(settings: &crate::config::SearchSettings) -> Self {
        Self {
            cache_ttl: Duration::from_secs(settings.cache_ttl_seconds.get()),
            cache_capacity: NonZeroUsize::new(settings.cache_capacity.get() as usize)
                .unwrap_or(NonZeroUsize::MIN),
            body_chars: settings.body_chars.get() as usize,
        }
    }
}

struct SearchIndex {
    generation: u64,
    snapshot: Arc<ContentSnapshot>,
    documents: Vec<SearchDocument>,
}

pub struct SearchService {
    content: Arc<ContentStore>,
    renderer: Arc<MarkdownRenderer>,
    config: SearchConfig,
    index: RwLock<Option<Arc<SearchIndex>>>,
    /// Keyed by index generation so a search that outlives a reload cannot
    /// publish results from the old content.
    results: BoundedTtlCache<(u64, SearchQuery), Arc<SearchResponse>>,
}

impl SearchService {
    pub fn new(
        content: Arc<ContentStore>,
        renderer: Arc<MarkdownRenderer>,
        config: SearchConfig,
    ) -> Self {
        let results = BoundedTtlCache::new(config.cache_capacity, config.cache_ttl);
        Self {
            content,
            renderer,
            config,
            index: RwLock::new(None),
            results,
        }
    }

    pub fn search(&self, request: &SearchRequest) -> Arc<SearchResponse> {
        self.search_at(
            &SearchQuery::from_request(request),
            OffsetDateTime::now_utc(),
            Instant::now(),
        )
    }

    /// `now` drives the recency boost; `clock` drives result-cache expiry.
    pub fn search_at(
        &self,
        query: &SearchQuery,
        now: OffsetDateTime,
        clock: Instant,
    ) -> Arc<SearchResponse> {
        let index = self.current_index();
        self.search_in(&index, query, now, clock)
    }

    fn search_in(
        &self,
        index: &SearchIndex,
        query: &SearchQuery,
        now: OffsetDateTime,
        clock: Instant,
    ) -> Arc<SearchResponse> {
        let started = Instant::now();
        let key = (index.generation, query.clone());

        if let Some(cached) = self.results.get_at(&key, clock) {
            counter!(METRIC_QUERIES, "cache" => "hit").increment(1);
            return cached;
        }

        let response = Arc::new(self.execute(index, query, now));
        self.results
            .insert_at(key, Arc::clone(&response), self.config.cache_ttl, clock);
        counter!(METRIC_QUERIES, "cache" => "miss").increment(1);
        histogram!(METRIC_DURATION_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        debug!(
            target = "folio::search",
            query = %query.text,
            total = response.total,
            "search executed"
        );
        response
    }

    /// Drop the index and every cached response.
    pub fn invalidate(&self) -> usize {
        *rw_write(&self.index, SOURCE, "invalidate") = None;
        self.results.clear()
    }

    pub fn cached_responses(&self) -> usize {
        self.results.len()
    }

    fn current_index(&self) -> Arc<SearchIndex> {
        let generation = self.content.generation();
        if let Some(index) = rw_read(&self.index, SOURCE, "read_index").as_ref() {
            if index.generation == generation {
                return Arc::clone(index);
            }
        }

        let snapshot = self.content.snapshot();
        let documents = snapshot
            .posts()
            .iter()
            .map(|post| {
                let body = self.renderer.plain_text(&post.body_markdown);
                SearchDocument::new(Arc::clone(post), &body, self.config.body_chars)
            })
            .collect();
        let index = Arc::new(SearchIndex {
            generation,
            snapshot,
            documents,
        });

        let mut slot = rw_write(&self.index, SOURCE, "write_index");
        let stale = slot
            .as_ref()
            .is_some_and(|current| current.generation != generation);
        *slot = Some(Arc::clone(&index));
        drop(slot);
        if stale {
            let dropped = self.results.clear();
            debug!(target = "folio::search", generation, dropped, "search cache reset");
        }
        index
    }

    fn execute(&self, index: &SearchIndex, query: &SearchQuery, now: OffsetDateTime) -> SearchResponse {
        let suggestions = query
            .suggestions
            .then(|| suggest(&index.snapshot, &query.text));

        let words = query.words();
        let mut scored: Vec<_> = index
            .documents
            .iter()
            .filter_map(|document| score_document(document, &query.text, &words, now))
            .collect();
        rank(&mut scored);

        let total = scored.len();
        let results: Vec<SearchHit> = scored
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .map(|hit| SearchHit {
                post: summary(&hit.post),
                score: (hit.score * 1000.0).round() / 1000.0,
                matches: hit.matches,
            })
            .collect();

        SearchResponse {
            query: query.text.clone(),
            has_more: query.offset.saturating_add(results.len()) < total,
            results,
            total,
            limit: query.limit,
            offset: query.offset,
            suggestions,
        }
    }
}

/// Titles then tags that contain the query, prefix matches first.
fn suggest(snapshot: &ContentSnapshot, query: &str) -> Vec<String> {
    if query.is_empty() {
        return Vec::new();
    }

    let mut seen: Vec<String> = Vec::new();
    let mut candidates: Vec<&str> = Vec::new();
    let titles = snapshot.posts().iter().map(|post| post.title.as_str());
    let tags = snapshot.posts().iter().flat_map(|post| post.tags.iter().map(String::as_str));
    for candidate in titles.chain(tags) {
        let lowered = candidate.to_lowercase();
        if lowered.contains(query) && !seen.contains(&lowered) {
            seen.push(lowered);
            candidates.push(candidate);
        }
    }

    let (mut prefixed, rest): (Vec<&str>, Vec<&str>) = candidates
        .into_iter()
        .partition(|candidate| candidate.to_lowercase().starts_with(query));
    prefixed.extend(rest);
    prefixed
        .into_iter()
        .take(MAX_SUGGESTIONS)
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::application::content::tests::post;
    use crate::domain::posts::Post;

    const NOW: OffsetDateTime = datetime!(2024-06-01 00:00 UTC);

    fn posts() -> Vec<Post> {
        let mut rust = post("rust-async", datetime!(2024-01-10 00:00 UTC));
        rust.title = "Async Rust in practice".to_string();
        rust.tags = vec!["rust".to_string(), "async".to_string()];
        rust.body_markdown = "Futures, **wakers** and executors.".to_string();

        let mut trust = post("trust", datetime!(2022-01-10 00:00 UTC));
        trust.title = "Building trust".to_string();
        trust.description = "Notes about rust belts and teams.".to_string();

        let mut draft = post("draft-rust", datetime!(2024-02-01 00:00 UTC));
        draft.title = "Rust draft".to_string();
        draft.draft = true;

        let mut cooking = post("cooking", datetime!(2024-03-01 00:00 UTC));
        cooking.title = "Cooking pasta".to_string();
        cooking.tags = vec!["food".to_string()];

        vec![rust, trust, draft, cooking]
    }

    fn service() -> SearchService {
        let content = Arc::new(ContentStore::new("unused"));
        content.replace(ContentSnapshot::from_posts(posts(), NOW));
        SearchService::new(content, Arc::new(MarkdownRenderer::new()), SearchConfig::default())
    }

    fn query(text: &str) -> SearchQuery {
        SearchQuery::from_request(&SearchRequest {
            q: text.to_string(),
            ..SearchRequest::default()
        })
    }

    #[test]
    fn ranks_title_and_tag_matches_above_description_matches() {
        let service = service();
        let response = service.search_at(&query("Rust"), NOW, Instant::now());
        let slugs: Vec<_> = response.results.iter().map(|hit| hit.post.slug.as_str()).collect();
        assert_eq!(slugs, ["rust-async", "trust"]);
        assert!(response.results[0].matches.title);
        assert!(response.results[0].matches.tags);
        assert!(!response.has_more);
    }

    #[test]
    fn drafts_are_never_returned() {
        let service = service();
        let response = service.search_at(&query("draft"), NOW, Instant::now());
        assert!(response.results.iter().all(|hit| hit.post.slug != "draft-rust"));
    }

    #[test]
    fn empty_query_returns_nothing() {
        let service = service();
        let response = service.search_at(&query("   "), NOW, Instant::now());
        assert_eq!(response.total, 0);
        assert!(response.results.is_empty());
    }

    #[test]
    fn body_text_is_searched_as_plain_text() {
        let service = service();
        let response = service.search_at(&query("wakers"), NOW, Instant::now());
        assert_eq!(response.total, 1);
        assert!(response.results[0].matches.content);
    }

    #[test]
    fn pagination_reports_more() {
        let service = service();
        let mut paged = query("rust");
        paged.limit = 1;
        let response = service.search_at(&paged, NOW, Instant::now());
        assert_eq!((response.total, response.results.len()), (2, 1));
        assert!(response.has_more);
    }

    #[test]
    fn repeated_queries_hit_the_cache_until_content_changes() {
        let service = service();
        let clock = Instant::now();
        let first = service.search_at(&query("rust"), NOW, clock);
        let second = service.search_at(&query("rust"), NOW, clock);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(service.cached_responses(), 1);

        service
            .content
            .replace(ContentSnapshot::from_posts(Vec::new(), NOW));
        let third = service.search_at(&query("rust"), NOW, clock);
        assert_eq!(third.total, 0);
        assert_eq!(service.cached_responses(), 1);
    }

    #[test]
    fn search_finishing_after_a_reload_does_not_serve_old_content() {
        let service = service();
        let clock = Instant::now();
        let before_reload = service.current_index();

        service
            .content
            .replace(ContentSnapshot::from_posts(Vec::new(), NOW));
        service.invalidate();

        let late = service.search_in(&before_reload, &query("rust"), NOW, clock);
        assert_eq!(late.total, 2);
        let fresh = service.search_at(&query("rust"), NOW, clock);
        assert_eq!(fresh.total, 0);
    }

    #[test]
    fn cached_responses_expire() {
        let service = service();
        let clock = Instant::now();
        let first = service.search_at(&query("rust"), NOW, clock);
        let later = clock + Duration::from_secs(61);
        let second = service.search_at(&query("rust"), NOW, later);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn suggestions_prefer_prefix_matches() {
        let service = service();
        let mut with_suggestions = query("rust");
        with_suggestions.suggestions = true;
        let response = service.search_at(&with_suggestions, NOW, Instant::now());
        assert_eq!(
            response.suggestions.as_deref(),
            Some(&["rust".to_string(), "Async Rust in practice".to_string(), "Building trust".to_string()][..])
        );
    }
}
