//! Weighted field scoring.
//!
//! Each field scores `phrase + word_fraction + fuzzy / 2` where `phrase` is 1.0
//! when the whole query occurs in the field, `word_fraction` is the share of query
//! words found, and `fuzzy` is the mean best in-order character ratio of the query
//! words against the field's tokens, counted only from [`FUZZY_THRESHOLD`] up.

use std::cmp::Ordering;
use std::sync::Arc;

use folio_api_types::SearchMatches;
use time::{Duration, OffsetDateTime};

use crate::domain::posts::Post;

pub const TITLE_WEIGHT: f64 = 3.0;
pub const TAGS_WEIGHT: f64 = 2.5;
pub const DESCRIPTION_WEIGHT: f64 = 2.0;
pub const BODY_WEIGHT: f64 = 1.0;

pub const FUZZY_THRESHOLD: f64 = 0.75;
pub const RECENT_BOOST: f64 = 1.1;
pub const FEATURED_BOOST: f64 = 1.2;
pub const MIN_SCORE: f64 = 0.5;

const RECENT_WINDOW: Duration = Duration::days(365);

/// Lowercased searchable text of one post.
#[derive(Debug)]
pub struct SearchDocument {
    pub post: Arc<Post>,
    title: String,
    description: String,
    tags: String,
    body: String,
}

impl SearchDocument {
    /// `body` is the plain text of the post; it is cut to `body_chars` characters.
    pub fn new(post: Arc<Post>, body: &str, body_chars: usize) -> Self {
        let body: String = body.chars().take(body_chars).collect();
        Self {
            title: post.title.to_lowercase(),
            description: post.description.to_lowercase(),
            tags: post.tags.join(" ").to_lowercase(),
            body: body.to_lowercase(),
            post,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Scored {
    pub post: Arc<Post>,
    pub score: f64,
    pub matches: SearchMatches,
}

/// Score `document` for a normalized query; `None` below [`MIN_SCORE`].
pub fn score_document(
    document: &SearchDocument,
    query: &str,
    words: &[&str],
    now: OffsetDateTime,
) -> Option<Scored> {
    if query.is_empty() || words.is_empty() {
        return None;
    }

    let title = field_score(&document.title, query, words);
    let tags = field_score(&document.tags, query, words);
    let description = field_score(&document.description, query, words);
    let body = field_score(&document.body, query, words);

    let mut score = title * TITLE_WEIGHT
        + tags * TAGS_WEIGHT
        + description * DESCRIPTION_WEIGHT
        + body * BODY_WEIGHT;
    if document.post.published_at >= now - RECENT_WINDOW {
        score *= RECENT_BOOST;
    }
    if document.post.featured {
        score *= FEATURED_BOOST;
    }
    if score < MIN_SCORE {
        return None;
    }

    Some(Scored {
        post: Arc::clone(&document.post),
        score,
        matches: SearchMatches {
            title: title > 0.0,
            description: description > 0.0,
            tags: tags > 0.0,
            content: body > 0.0,
        },
    })
}

pub fn field_score(text: &str, query: &str, words: &[&str]) -> f64 {
    if text.is_empty() || words.is_empty() {
        return 0.0;
    }
    let phrase = if text.contains(query) { 1.0 } else { 0.0 };
    let present = words.iter().filter(|word| text.contains(**word)).count();
    let fraction = present as f64 / words.len() as f64;

    let tokens: Vec<&str> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .collect();
    let fuzzy = words
        .iter()
        .map(|word| {
            tokens
                .iter()
                .map(|token| fuzzy_ratio(word, token))
                .fold(0.0, f64::max)
        })
        .sum::<f64>()
        / words.len() as f64;
    let fuzzy = if fuzzy >= FUZZY_THRESHOLD { fuzzy / 2.0 } else { 0.0 };

    phrase + fraction + fuzzy
}

/// Characters of `needle` found in order in `haystack`, over the longer length.
pub fn fuzzy_ratio(needle: &str, haystack: &str) -> f64 {
    let needle_len = needle.chars().count();
    let haystack_len = haystack.chars().count();
    let longest = needle_len.max(haystack_len);
    if longest == 0 {
        return 0.0;
    }

    let mut remaining = haystack.chars();
    let mut matched = 0usize;
    for wanted in needle.chars() {
        if remaining.by_ref().any(|c| c == wanted) {
            matched += 1;
        } else {
            break;
        }
    }
    matched as f64 / longest as f64
}

/// Score descending, then newest, then slug.
pub fn rank(results: &mut [Scored]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.post.published_at.cmp(&a.post.published_at))
            .then_with(|| a.post.slug.cmp(&b.post.slug))
    });
}
