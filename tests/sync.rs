use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::Notify;

use folio::application::content::load_dir;
use folio::application::sync::{ContentSource, SyncError, SyncPaths, SyncService};
use folio::infra::notion::NotionError;
use folio::infra::notion::types::{Block, Page};

const IMAGE_URL: &str = "https://prod-files-secure.s3.us-west-2.amazonaws.com/a/photo.png?X-Amz-Signature=1";

fn png() -> Bytes {
    let image = image::RgbImage::from_pixel(8, 6, image::Rgb([200, 40, 40]));
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("encode png");
    Bytes::from(out.into_inner())
}

fn page(id: &str, title: &str, status: &str) -> Page {
    serde_json::from_value(json!({
        "id": id,
        "last_edited_time": "2024-03-01T10:00:00.000Z",
        "properties": {
            "Name": {"type": "title", "title": [{"type": "text", "plain_text": title}]},
            "Status": {"type": "status", "status": {"name": status}},
            "Date": {"type": "date", "date": {"start": "2024-02-01"}},
            "Tags": {"type": "multi_select", "multi_select": [{"name": "rust"}]}
        }
    }))
    .expect("page")
}

fn paragraph(id: &str, text: &str) -> Value {
    json!({
        "id": id,
        "type": "paragraph",
        "paragraph": {"rich_text": [{"type": "text", "plain_text": text}]}
    })
}

fn image_block(id: &str) -> Value {
    json!({
        "id": id,
        "type": "image",
        "image": {"type": "file", "file": {"url": IMAGE_URL}, "caption": []}
    })
}

#[derive(Default)]
struct FakeSource {
    pages: Vec<Page>,
    blocks: HashMap<String, Vec<Value>>,
    failing_pages: std::sync::Mutex<Vec<String>>,
    downloads: AtomicUsize,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
    entered: AtomicBool,
}

#[async_trait]
impl ContentSource for FakeSource {
    fn describe(&self) -> String {
        "fake".to_string()
    }

    async fn query_pages(&self) -> Result<Vec<Page>, NotionError> {
        if let Some((started, release)) = &self.gate {
            if !self.entered.swap(true, Ordering::SeqCst) {
                let released = release.notified();
                started.notify_one();
                released.await;
            }
        }
        Ok(self.pages.clone())
    }

    async fn block_children(&self, block_id: &str) -> Result<Vec<Block>, NotionError> {
        if self
            .failing_pages
            .lock()
            .expect("lock")
            .iter()
            .any(|id| id == block_id)
        {
            return Err(NotionError::Status {
                status: 502,
                message: "bad gateway".to_string(),
            });
        }
        self.blocks
            .get(block_id)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(|err| NotionError::Decode(err.to_string())))
            .collect()
    }

    async fn download(&self, _url: &str) -> Result<Bytes, NotionError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(png())
    }
}

fn fixture() -> FakeSource {
    let mut blocks = HashMap::new();
    blocks.insert(
        "page-a".to_string(),
        vec![paragraph("a1", "Alpha body text."), image_block("a2")],
    );
    blocks.insert("page-b".to_string(), vec![paragraph("b1", "Beta body text.")]);
    FakeSource {
        pages: vec![
            page("page-a", "Alpha Post", "Published"),
            page("page-b", "Beta Post", "Published"),
            page("page-c", "Gamma Draft", "Draft"),
        ],
        blocks,
        ..FakeSource::default()
    }
}

fn paths(root: &TempDir) -> SyncPaths {
    SyncPaths {
        posts_dir: root.path().join("posts"),
        images_dir: root.path().join("images"),
        image_url_prefix: "/images/posts".to_string(),
    }
}

#[tokio::test]
async fn sync_writes_published_pages_and_localizes_images() {
    let root = TempDir::new().expect("tempdir");
    let source = Arc::new(fixture());
    let service = SyncService::new(source.clone(), paths(&root));

    let report = service.run().await.expect("sync");
    assert_eq!(report.pages_seen, 3);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.posts, vec!["alpha-post".to_string(), "beta-post".to_string()]);
    assert_eq!(report.images_downloaded, 1);
    assert!(report.failures.is_empty());

    let (posts, malformed) = load_dir(&root.path().join("posts")).expect("load");
    assert_eq!(malformed, 0);
    assert_eq!(posts.len(), 2);
    let alpha = posts.iter().find(|post| post.slug == "alpha-post").expect("alpha");
    assert!(alpha.body_markdown.contains("/images/posts/"));
    assert!(!alpha.body_markdown.contains("X-Amz-Signature"));
    assert!(root.path().join("images").join(".manifest.json").exists());
}

#[tokio::test]
async fn second_run_reuses_images_and_leaves_files_untouched() {
    let root = TempDir::new().expect("tempdir");
    let source = Arc::new(fixture());
    let service = SyncService::new(source.clone(), paths(&root));

    service.run().await.expect("first sync");
    let second = service.run().await.expect("second sync");

    assert_eq!(second.written, 0);
    assert_eq!(second.removed, 0);
    assert_eq!(second.images_reused, 1);
    assert_eq!(second.images_downloaded, 0);
    assert_eq!(source.downloads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_page_keeps_previous_document() {
    let root = TempDir::new().expect("tempdir");
    let source = Arc::new(fixture());
    let service = SyncService::new(source.clone(), paths(&root));
    service.run().await.expect("first sync");

    source
        .failing_pages
        .lock()
        .expect("lock")
        .push("page-a".to_string());
    let report = service.run().await.expect("partial sync");

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].page_id, "page-a");
    assert_eq!(report.failures[0].title.as_deref(), Some("Alpha Post"));
    assert!(report.posts.contains(&"alpha-post".to_string()));

    let (posts, _) = load_dir(&root.path().join("posts")).expect("load");
    let alpha = posts.iter().find(|post| post.slug == "alpha-post").expect("alpha kept");
    let image_file = alpha
        .body_markdown
        .split("/images/posts/")
        .nth(1)
        .and_then(|rest| rest.split(')').next())
        .expect("image reference");
    assert!(root.path().join("images").join(image_file).exists());
}

#[tokio::test]
async fn overlapping_runs_are_rejected() {
    let root = TempDir::new().expect("tempdir");
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let source = FakeSource {
        gate: Some((Arc::clone(&started), Arc::clone(&release))),
        ..fixture()
    };
    let service = Arc::new(SyncService::new(Arc::new(source), paths(&root)));

    let first = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.run().await })
    };
    started.notified().await;

    let err = service.run().await.expect_err("busy");
    assert!(matches!(err, SyncError::Busy));

    release.notify_one();
    first.await.expect("join").expect("first run");
}
