//! `folio new-post`: writes a frontmatter skeleton into the posts directory.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::domain::frontmatter::render_document;
use crate::domain::posts::Post;
use crate::domain::slug::generate_unique_slug;

use super::error::AppError;

const PLACEHOLDER_BODY: &str = "Write the introduction here.\n\n## Section\n\nMore text.\n";

#[derive(Debug, Clone, Default)]
pub struct NewPost {
    pub title: String,
    pub tags: Vec<String>,
    pub draft: bool,
    pub author: String,
}

/// Create `<slug>.md`, suffixing the slug until the file name is free.
pub fn scaffold_post(posts_dir: &Path, request: &NewPost, now: OffsetDateTime) -> Result<PathBuf, AppError> {
    let title = request.title.trim();
    if title.is_empty() {
        return Err(AppError::validation("post title must not be empty"));
    }
    std::fs::create_dir_all(posts_dir).map_err(|err| AppError::Infra(err.into()))?;

    let slug = generate_unique_slug(title, |candidate| {
        !posts_dir.join(format!("{candidate}.md")).exists()
    })
    .map_err(|err| AppError::validation(err.to_string()))?;

    let tags = request
        .tags
        .iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .collect();
    let post = Post {
        id: format!("local-{}", Uuid::new_v4()),
        slug: slug.clone(),
        title: title.to_string(),
        description: String::new(),
        published_at: now,
        modified_at: now,
        draft: request.draft,
        featured: false,
        tags,
        author: request.author.clone(),
        reading_time_minutes: None,
        canonical_url: None,
        cover: None,
        body_markdown: PLACEHOLDER_BODY.to_string(),
    };
    let document = render_document(&post)?;

    let path = posts_dir.join(format!("{slug}.md"));
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|err| AppError::Infra(err.into()))?;
    file.write_all(document.as_bytes())
        .map_err(|err| AppError::Infra(err.into()))?;

    info!(target = "folio::scaffold", path = %path.display(), "post scaffolded");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::domain::frontmatter::parse_document;

    #[test]
    fn scaffolds_parseable_documents_with_unique_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let request = NewPost {
            title: "Hello, World".to_string(),
            tags: vec!["rust".to_string(), " ".to_string()],
            draft: true,
            author: "Ada".to_string(),
        };
        let now = datetime!(2024-05-01 10:00 UTC);

        let first = scaffold_post(dir.path(), &request, now).expect("first");
        let second = scaffold_post(dir.path(), &request, now).expect("second");
        assert_eq!(first.file_name().and_then(|n| n.to_str()), Some("hello-world.md"));
        assert_eq!(second.file_name().and_then(|n| n.to_str()), Some("hello-world-2.md"));

        let post = parse_document(&std::fs::read_to_string(&first).expect("read")).expect("parse");
        assert!(post.draft);
        assert_eq!(post.tags, ["rust"]);
        assert_eq!(post.published_at, now);
    }

    #[test]
    fn blank_titles_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let request = NewPost {
            title: "  ".to_string(),
            ..NewPost::default()
        };
        assert!(matches!(
            scaffold_post(dir.path(), &request, OffsetDateTime::UNIX_EPOCH),
            Err(AppError::Validation(_))
        ));
    }
}
