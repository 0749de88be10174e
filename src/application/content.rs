//! In-memory view of the content directory.
//!
//! The store owns one immutable [`ContentSnapshot`] at a time. A reload parses the
//! directory off the runtime, builds a new snapshot and swaps it in; readers that
//! already hold the previous `Arc` keep a consistent view.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use time::OffsetDateTime;
use tracing::{info, warn};

use crate::cache::lock::{rw_read, rw_write};
use crate::domain::frontmatter::parse_document;
use crate::domain::posts::{Post, sort_newest_first};

use super::error::AppError;

/// Posts loaded from one pass over the content directory.
#[derive(Debug)]
pub struct ContentSnapshot {
    posts: Vec<Arc<Post>>,
    by_slug: HashMap<String, usize>,
    tags: BTreeMap<String, Vec<usize>>,
    loaded_at: Option<OffsetDateTime>,
    skipped: usize,
}

impl ContentSnapshot {
    pub fn empty() -> Self {
        Self {
            posts: Vec::new(),
            by_slug: HashMap::new(),
            tags: BTreeMap::new(),
            loaded_at: None,
            skipped: 0,
        }
    }

    /// Drafts are dropped and the rest ordered newest first. When two documents
    /// claim the same slug the first one in that order wins.
    pub fn from_posts(posts: Vec<Post>, loaded_at: OffsetDateTime) -> Self {
        let mut visible: Vec<Post> = posts.into_iter().filter(Post::is_visible).collect();
        sort_newest_first(&mut visible);

        let mut snapshot = Self {
            loaded_at: Some(loaded_at),
            ..Self::empty()
        };
        for post in visible {
            if snapshot.by_slug.contains_key(&post.slug) {
                warn!(
                    target = "folio::content",
                    slug = %post.slug,
                    id = %post.id,
                    "duplicate slug ignored"
                );
                snapshot.skipped += 1;
                continue;
            }
            let index = snapshot.posts.len();
            snapshot.by_slug.insert(post.slug.clone(), index);
            for tag in &post.tags {
                let entry = snapshot.tags.entry(tag.to_lowercase()).or_default();
                if !entry.contains(&index) {
                    entry.push(index);
                }
            }
            snapshot.posts.push(Arc::new(post));
        }
        snapshot
    }

    /// Visible posts, newest first.
    pub fn posts(&self) -> &[Arc<Post>] {
        &self.posts
    }

    pub fn get(&self, slug: &str) -> Option<Arc<Post>> {
        self.by_slug.get(slug).map(|index| Arc::clone(&self.posts[*index]))
    }

    /// Posts carrying `tag` (case-insensitive), newest first.
    pub fn with_tag(&self, tag: &str) -> Vec<Arc<Post>> {
        self.tags
            .get(&tag.to_lowercase())
            .map(|indexes| indexes.iter().map(|i| Arc::clone(&self.posts[*i])).collect())
            .unwrap_or_default()
    }

    /// Lowercased tag to number of posts.
    pub fn tag_counts(&self) -> BTreeMap<String, usize> {
        self.tags
            .iter()
            .map(|(tag, indexes)| (tag.clone(), indexes.len()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn loaded_at(&self) -> Option<OffsetDateTime> {
        self.loaded_at
    }

    /// Documents that were present but could not be used.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

pub struct ContentStore {
    posts_dir: PathBuf,
    current: RwLock<Arc<ContentSnapshot>>,
    generation: AtomicU64,
}

impl ContentStore {
    /// An empty store; call [`ContentStore::reload`] to read the directory.
    pub fn new(posts_dir: impl Into<PathBuf>) -> Self {
        Self {
            posts_dir: posts_dir.into(),
            current: RwLock::new(Arc::new(ContentSnapshot::empty())),
            generation: AtomicU64::new(0),
        }
    }

    pub fn posts_dir(&self) -> &Path {
        &self.posts_dir
    }

    pub fn snapshot(&self) -> Arc<ContentSnapshot> {
        Arc::clone(&rw_read(&self.current, "application::content", "snapshot"))
    }

    /// Bumped on every swap; caches derived from the snapshot compare against it.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Install an already built snapshot.
    pub fn replace(&self, snapshot: ContentSnapshot) -> Arc<ContentSnapshot> {
        let snapshot = Arc::new(snapshot);
        *rw_write(&self.current, "application::content", "replace") = Arc::clone(&snapshot);
        self.generation.fetch_add(1, Ordering::AcqRel);
        snapshot
    }

    /// Re-read the posts directory and swap in the result.
    pub async fn reload(&self) -> Result<Arc<ContentSnapshot>, AppError> {
        let dir = self.posts_dir.clone();
        let (posts, malformed) = tokio::task::spawn_blocking(move || load_dir(&dir))
            .await
            .map_err(|err| AppError::unexpected(format!("content load task failed: {err}")))?
            .map_err(|err| AppError::Infra(err.into()))?;

        let mut snapshot = ContentSnapshot::from_posts(posts, OffsetDateTime::now_utc());
        snapshot.skipped += malformed;
        info!(
            target = "folio::content",
            dir = %self.posts_dir.display(),
            posts = snapshot.len(),
            skipped = snapshot.skipped,
            "content loaded"
        );
        Ok(self.replace(snapshot))
    }
}

/// Parse every `*.md` file directly inside `dir`. Returns the posts and the number
/// of files that were skipped. A missing directory is an empty content set.
pub fn load_dir(dir: &Path) -> io::Result<(Vec<Post>, usize)> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            warn!(target = "folio::content", dir = %dir.display(), "content directory missing");
            return Ok((Vec::new(), 0));
        }
        Err(err) => return Err(err),
    };

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|ext| ext.to_str()) == Some("md") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut posts = Vec::with_capacity(paths.len());
    let mut skipped = 0;
    for path in paths {
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) => {
                warn!(target = "folio::content", path = %path.display(), error = %err, "unreadable post");
                skipped += 1;
                continue;
            }
        };
        match parse_document(&text) {
            Ok(post) => posts.push(post),
            Err(err) => {
                warn!(target = "folio::content", path = %path.display(), error = %err, "malformed post skipped");
                skipped += 1;
            }
        }
    }
    Ok((posts, skipped))
}
