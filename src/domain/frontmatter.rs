//! Markdown documents with a YAML frontmatter header.
//!
//! The field order of [`Frontmatter`] is the serialization order, so rendering the
//! same post twice always produces the same bytes.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::error::DomainError;
use super::posts::{CoverImage, Post};

const DELIMITER: &str = "---";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frontmatter {
    pub id: String,
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(with = "time::serde::rfc3339")]
    pub published: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub modified: OffsetDateTime,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub featured: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reading_time: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub canonical_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<FrontmatterCover>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontmatterCover {
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
}

impl Frontmatter {
    pub fn into_post(self, body_markdown: String) -> Post {
        Post {
            id: self.id,
            slug: self.slug,
            title: self.title,
            description: self.description,
            published_at: self.published,
            modified_at: self.modified,
            draft: self.draft,
            featured: self.featured,
            tags: self.tags,
            author: self.author,
            reading_time_minutes: self.reading_time,
            canonical_url: self.canonical_url,
            cover: self.cover.map(|cover| CoverImage {
                src: cover.src,
                width: cover.width,
                height: cover.height,
                placeholder: cover.placeholder,
            }),
            body_markdown,
        }
    }

    pub fn from_post(post: &Post) -> Self {
        Self {
            id: post.id.clone(),
            slug: post.slug.clone(),
            title: post.title.clone(),
            description: post.description.clone(),
            published: post.published_at,
            modified: post.modified_at,
            draft: post.draft,
            featured: post.featured,
            tags: post.tags.clone(),
            author: post.author.clone(),
            reading_time: post.reading_time_minutes,
            canonical_url: post.canonical_url.clone(),
            cover: post.cover.as_ref().map(|cover| FrontmatterCover {
                src: cover.src.clone(),
                width: cover.width,
                height: cover.height,
                placeholder: cover.placeholder.clone(),
            }),
        }
    }
}

/// Split a document into its frontmatter and markdown body.
pub fn parse_document(text: &str) -> Result<Post, DomainError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = text.split_inclusive('\n');

    let first = lines
        .next()
        .ok_or_else(|| DomainError::malformed("document is empty"))?;
    if first.trim_end() != DELIMITER {
        return Err(DomainError::malformed("missing opening frontmatter delimiter"));
    }

    let mut header = String::new();
    let mut consumed = first.len();
    let mut closed = false;
    for line in lines {
        consumed += line.len();
        if line.trim_end() == DELIMITER {
            closed = true;
            break;
        }
        header.push_str(line);
    }

    if !closed {
        return Err(DomainError::malformed("missing closing frontmatter delimiter"));
    }

    let frontmatter: Frontmatter = serde_yaml::from_str(&header)
        .map_err(|err| DomainError::malformed(format!("invalid frontmatter: {err}")))?;

    if frontmatter.slug.trim().is_empty() {
        return Err(DomainError::validation("frontmatter slug must not be empty"));
    }
    if frontmatter.title.trim().is_empty() {
        return Err(DomainError::validation("frontmatter title must not be empty"));
    }

    let body = text[consumed..].trim_start_matches(['\r', '\n']).to_string();
    Ok(frontmatter.into_post(body))
}

/// Render a post as a frontmatter document terminated by a single newline.
pub fn render_document(post: &Post) -> Result<String, DomainError> {
    let header = serde_yaml::to_string(&Frontmatter::from_post(post))
        .map_err(|err| DomainError::malformed(format!("failed to encode frontmatter: {err}")))?;

    let body = post.body_markdown.trim_end();
    let mut document = String::with_capacity(header.len() + body.len() + 16);
    document.push_str(DELIMITER);
    document.push('\n');
    document.push_str(&header);
    if !header.ends_with('\n') {
        document.push('\n');
    }
    document.push_str(DELIMITER);
    document.push('\n');
    if !body.is_empty() {
        document.push('\n');
        document.push_str(body);
        document.push('\n');
    }
    Ok(document)
}
