use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use metrics::{counter, histogram};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::frontmatter::{parse_document, render_document};
use crate::domain::posts::{CoverImage, Post, reading_time_minutes};
use crate::domain::slug::{derive_slug, generate_unique_slug};
use crate::infra::notion::types::Page;

use super::blocks::{fetch_tree, image_urls, render_blocks};
use super::error::SyncError;
use super::images::{ImageAsset, ImageLocalizer};
use super::mapping::{PageFields, extract_fields, parse_notion_date};
use super::source::ContentSource;
use super::writer::replace_dir;

const METRIC_RUNS: &str = "folio_sync_runs_total";
const METRIC_PAGE_FAILURES: &str = "folio_sync_page_failures_total";
const METRIC_DURATION_MS: &str = "folio_sync_ms";

#[derive(Debug, Clone)]
pub struct SyncPaths {
    pub posts_dir: PathBuf,
    pub images_dir: PathBuf,
    /// Public URL prefix under which `images_dir` is served.
    pub image_url_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFailure {
    pub page_id: String,
    pub title: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub pages_seen: usize,
    pub written: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub skipped: usize,
    pub images_downloaded: usize,
    pub images_reused: usize,
    pub posts: Vec<String>,
    pub failures: Vec<PageFailure>,
}

impl SyncReport {
    /// True when the run left the content directory exactly as it found it.
    pub fn is_noop(&self) -> bool {
        self.written == 0 && self.removed == 0
    }
}

/// Pulls published pages from a [`ContentSource`] into the content directories.
pub struct SyncService {
    source: Arc<dyn ContentSource>,
    paths: SyncPaths,
    running: Mutex<()>,
}

impl SyncService {
    pub fn new(source: Arc<dyn ContentSource>, paths: SyncPaths) -> Self {
        Self {
            source,
            paths,
            running: Mutex::new(()),
        }
    }

    pub fn paths(&self) -> &SyncPaths {
        &self.paths
    }

    /// Run one sync. Fails only when the page list cannot be fetched, another run
    /// is in progress, or the output directories cannot be replaced.
    pub async fn run(&self) -> Result<SyncReport, SyncError> {
        let _guard = self.running.try_lock().map_err(|_| SyncError::Busy)?;
        let started = Instant::now();

        let result = self.run_locked().await;
        let outcome = if result.is_ok() { "ok" } else { "error" };
        counter!(METRIC_RUNS, "outcome" => outcome).increment(1);
        histogram!(METRIC_DURATION_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        result
    }

    async fn run_locked(&self) -> Result<SyncReport, SyncError> {
        info!(target = "folio::sync", source = %self.source.describe(), "sync started");
        let pages = self.source.query_pages().await?;

        let existing = load_existing(&self.paths.posts_dir);
        let mut localizer = ImageLocalizer::new(self.source.as_ref(), &self.paths.images_dir);
        let mut report = SyncReport {
            pages_seen: pages.len(),
            ..SyncReport::default()
        };
        let mut taken: HashSet<String> = HashSet::new();
        let mut documents: BTreeMap<String, Bytes> = BTreeMap::new();

        for page in &pages {
            let fields = extract_fields(page);
            if page.archived || page.in_trash || !fields.is_published() {
                report.skipped += 1;
                continue;
            }
            let Some(title) = fields.title.clone() else {
                report.skipped += 1;
                continue;
            };

            let converted = match allocate_slug(&fields, &title, &taken) {
                Ok(slug) => self
                    .convert(page, &fields, title.clone(), slug, &mut localizer)
                    .await,
                Err(err) => Err(err),
            };

            match converted {
                Ok((slug, document)) => {
                    taken.insert(slug.clone());
                    documents.insert(format!("{slug}.md"), Bytes::from(document));
                    report.posts.push(slug);
                }
                Err(err) => {
                    counter!(METRIC_PAGE_FAILURES).increment(1);
                    warn!(
                        target = "folio::sync",
                        page_id = %page.id,
                        title = %title,
                        error = %err,
                        "page failed to sync"
                    );
                    if let Some(previous) = existing.get(&page.id) {
                        if taken.insert(previous.slug.clone()) {
                            localizer.carry_referenced(&previous.document);
                            documents.insert(
                                format!("{}.md", previous.slug),
                                Bytes::from(previous.document.clone()),
                            );
                            report.posts.push(previous.slug.clone());
                        }
                    }
                    report.failures.push(PageFailure {
                        page_id: page.id.clone(),
                        title: Some(title),
                        error: err.to_string(),
                    });
                }
            }
        }

        report.images_downloaded = localizer.downloaded;
        report.images_reused = localizer.reused;
        let images = localizer.into_files()?;

        let posts_dir = self.paths.posts_dir.clone();
        let images_dir = self.paths.images_dir.clone();
        let (image_outcome, post_outcome) = tokio::task::spawn_blocking(move || {
            let image_outcome = replace_dir(&images_dir, &images)?;
            let post_outcome = replace_dir(&posts_dir, &documents)?;
            Ok::<_, std::io::Error>((image_outcome, post_outcome))
        })
        .await
        .map_err(|err| SyncError::Task(err.to_string()))??;

        report.written = post_outcome.written + image_outcome.written;
        report.unchanged = post_outcome.unchanged + image_outcome.unchanged;
        report.removed = post_outcome.removed + image_outcome.removed;
        report.posts.sort();

        info!(
            target = "folio::sync",
            pages = report.pages_seen,
            posts = report.posts.len(),
            written = report.written,
            unchanged = report.unchanged,
            skipped = report.skipped,
            failures = report.failures.len(),
            "sync finished"
        );
        Ok(report)
    }

    async fn convert(
        &self,
        page: &Page,
        fields: &PageFields,
        title: String,
        slug: String,
        localizer: &mut ImageLocalizer<'_>,
    ) -> Result<(String, String), SyncError> {
        let tree = fetch_tree(self.source.as_ref(), &page.id).await?;

        let mut image_paths = HashMap::new();
        for url in image_urls(&tree) {
            let asset = localizer.localize(&url).await?;
            image_paths.insert(url, self.public_path(&asset));
        }

        let cover = match &fields.cover_url {
            Some(url) => {
                let asset = localizer.localize(url).await?;
                Some(CoverImage {
                    src: self.public_path(&asset),
                    width: Some(asset.width),
                    height: Some(asset.height),
                    placeholder: asset.placeholder.clone(),
                })
            }
            None => None,
        };

        let body = render_blocks(&tree, &image_paths);
        let modified_at = page
            .last_edited_time
            .as_deref()
            .and_then(parse_notion_date)
            .or(fields.published_at)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);

        let post = Post {
            id: page.id.clone(),
            slug: slug.clone(),
            title,
            description: fields.description.clone().unwrap_or_default(),
            published_at: fields.published_at.unwrap_or(modified_at),
            modified_at,
            draft: false,
            featured: fields.featured,
            tags: fields.tags.clone(),
            author: fields.author.clone().unwrap_or_default(),
            reading_time_minutes: Some(reading_time_minutes(&body)),
            canonical_url: fields.canonical_url.clone(),
            cover,
            body_markdown: body,
        };
        Ok((slug, render_document(&post)?))
    }

    fn public_path(&self, asset: &ImageAsset) -> String {
        format!(
            "{}/{}",
            self.paths.image_url_prefix.trim_end_matches('/'),
            asset.file
        )
    }
}

/// Explicit slug property first, then the title; later duplicates get `-2`, `-3`.
fn allocate_slug(
    fields: &PageFields,
    title: &str,
    taken: &HashSet<String>,
) -> Result<String, SyncError> {
    let base = match fields.slug.as_deref().map(derive_slug) {
        Some(Ok(slug)) => slug,
        _ => derive_slug(title)?,
    };
    Ok(generate_unique_slug(&base, |candidate| !taken.contains(candidate))?)
}

struct ExistingDocument {
    slug: String,
    document: String,
}

/// Current documents keyed by page id, used to carry over failed pages.
fn load_existing(posts_dir: &Path) -> HashMap<String, ExistingDocument> {
    let mut existing = HashMap::new();
    let Ok(entries) = std::fs::read_dir(posts_dir) else {
        return existing;
    };
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("md") {
            continue;
        }
        let Ok(document) = std::fs::read_to_string(&path) else {
            continue;
        };
        if let Ok(post) = parse_document(&document) {
            existing.insert(
                post.id.clone(),
                ExistingDocument {
                    slug: post.slug,
                    document,
                },
            );
        }
    }
    existing
}
