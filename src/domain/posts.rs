use time::OffsetDateTime;

const WORDS_PER_MINUTE: usize = 200;

/// Cover image attached to a post after the sync localized it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverImage {
    pub src: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub placeholder: Option<String>,
}

/// A published (or draft) article as stored in the content directory.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub description: String,
    pub published_at: OffsetDateTime,
    pub modified_at: OffsetDateTime,
    pub draft: bool,
    pub featured: bool,
    pub tags: Vec<String>,
    pub author: String,
    pub reading_time_minutes: Option<u32>,
    pub canonical_url: Option<String>,
    pub cover: Option<CoverImage>,
    pub body_markdown: String,
}

impl Post {
    pub fn is_visible(&self) -> bool {
        !self.draft
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|candidate| candidate.eq_ignore_ascii_case(tag))
    }
}

/// Newest first; ties resolved by slug so listings are stable.
pub fn sort_newest_first(posts: &mut [Post]) {
    posts.sort_by(|a, b| {
        b.published_at
            .cmp(&a.published_at)
            .then_with(|| a.slug.cmp(&b.slug))
    });
}

/// Estimated reading time in whole minutes, never below one.
pub fn reading_time_minutes(markdown: &str) -> u32 {
    let words = markdown.split_whitespace().count();
    let minutes = words.div_ceil(WORDS_PER_MINUTE).max(1);
    u32::try_from(minutes).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn post(slug: &str, published_at: OffsetDateTime) -> Post {
        Post {
            id: slug.to_string(),
            slug: slug.to_string(),
            title: slug.to_string(),
            description: String::new(),
            published_at,
            modified_at: published_at,
            draft: false,
            featured: false,
            tags: vec!["Rust".to_string()],
            author: String::new(),
            reading_time_minutes: None,
            canonical_url: None,
            cover: None,
            body_markdown: String::new(),
        }
    }

    #[test]
    fn reading_time_rounds_up_and_has_a_floor() {
        assert_eq!(reading_time_minutes(""), 1);
        assert_eq!(reading_time_minutes(&"word ".repeat(200)), 1);
        assert_eq!(reading_time_minutes(&"word ".repeat(201)), 2);
    }

    #[test]
    fn newest_first_breaks_ties_by_slug() {
        let mut posts = vec![
            post("b", datetime!(2024-01-01 0:00 UTC)),
            post("a", datetime!(2024-01-01 0:00 UTC)),
            post("c", datetime!(2024-06-01 0:00 UTC)),
        ];
        sort_newest_first(&mut posts);
        let slugs: Vec<_> = posts.iter().map(|p| p.slug.as_str()).collect();
        assert_eq!(slugs, ["c", "a", "b"]);
    }

    #[test]
    fn tag_lookup_ignores_case() {
        let post = post("a", datetime!(2024-01-01 0:00 UTC));
        assert!(post.has_tag("rust"));
        assert!(!post.has_tag("go"));
    }
}
