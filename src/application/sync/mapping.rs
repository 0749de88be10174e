//! Notion database properties to post fields.
//!
//! Databases drift: a column may be called `Name` or `Title`, `Published` may be a
//! date in one workspace and a checkbox in another. [`FIELD_TABLE`] lists, for every
//! post field, the candidate property names in priority order and the extractor that
//! must accept the property's type. The first candidate that yields a value wins.

use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

use crate::infra::notion::types::{Page, PropertyValue, plain_text};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostField {
    Title,
    Slug,
    Description,
    PublishedAt,
    Status,
    PublishedFlag,
    Draft,
    Featured,
    Tags,
    Author,
    CanonicalUrl,
    Cover,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extractor {
    /// The page title property.
    Title,
    /// Rich text, or any property with an obvious text rendering.
    Text,
    /// Name of a select or status option.
    Choice,
    /// Multi-select names, or comma separated text.
    Tags,
    Date,
    Checkbox,
    Url,
    /// People names joined with commas, falling back to text.
    People,
    /// First file or external link of a files property.
    Files,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
    Flag(bool),
    Timestamp(OffsetDateTime),
}

#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub field: PostField,
    pub candidates: &'static [&'static str],
    pub extractor: Extractor,
}

pub const FIELD_TABLE: &[FieldRule] = &[
    FieldRule {
        field: PostField::Title,
        candidates: &["Name", "Title", "title", "Page"],
        extractor: Extractor::Title,
    },
    FieldRule {
        field: PostField::Slug,
        candidates: &["Slug", "slug", "URL Slug", "Permalink"],
        extractor: Extractor::Text,
    },
    FieldRule {
        field: PostField::Description,
        candidates: &["Description", "Summary", "Excerpt", "Subtitle"],
        extractor: Extractor::Text,
    },
    FieldRule {
        field: PostField::PublishedAt,
        candidates: &["Published", "Publish Date", "Date", "Published At", "Created"],
        extractor: Extractor::Date,
    },
    FieldRule {
        field: PostField::Status,
        candidates: &["Status", "State", "Stage"],
        extractor: Extractor::Choice,
    },
    FieldRule {
        field: PostField::PublishedFlag,
        candidates: &["Published", "Public", "Publish"],
        extractor: Extractor::Checkbox,
    },
    FieldRule {
        field: PostField::Draft,
        candidates: &["Draft", "draft"],
        extractor: Extractor::Checkbox,
    },
    FieldRule {
        field: PostField::Featured,
        candidates: &["Featured", "Pinned", "Highlight"],
        extractor: Extractor::Checkbox,
    },
    FieldRule {
        field: PostField::Tags,
        candidates: &["Tags", "Categories", "Topics", "Tag"],
        extractor: Extractor::Tags,
    },
    FieldRule {
        field: PostField::Author,
        candidates: &["Author", "Authors", "Written By", "Created by"],
        extractor: Extractor::People,
    },
    FieldRule {
        field: PostField::CanonicalUrl,
        candidates: &["Canonical URL", "Canonical", "Original URL"],
        extractor: Extractor::Url,
    },
    FieldRule {
        field: PostField::Cover,
        candidates: &["Cover", "Cover Image", "Image", "Thumbnail"],
        extractor: Extractor::Files,
    },
];

impl Extractor {
    pub fn extract(self, value: &PropertyValue) -> Option<FieldValue> {
        match (self, value) {
            (Self::Title, PropertyValue::Title { title }) => non_empty(plain_text(title)),
            (Self::Text, PropertyValue::RichText { rich_text }) => non_empty(plain_text(rich_text)),
            (Self::Text, PropertyValue::Title { title }) => non_empty(plain_text(title)),
            (Self::Text | Self::Choice, PropertyValue::Select { select: Some(option) })
            | (Self::Text | Self::Choice, PropertyValue::Status { status: Some(option) }) => {
                non_empty(option.name.clone())
            }
            (Self::Text | Self::Url, PropertyValue::Url { url: Some(url) }) => non_empty(url.clone()),
            (Self::Url, PropertyValue::RichText { rich_text }) => non_empty(plain_text(rich_text)),
            (Self::Tags, PropertyValue::MultiSelect { multi_select }) => Some(FieldValue::List(
                multi_select
                    .iter()
                    .map(|option| option.name.trim().to_string())
                    .filter(|name| !name.is_empty())
                    .collect(),
            )),
            (Self::Tags, PropertyValue::Select { select: Some(option) }) => {
                Some(FieldValue::List(vec![option.name.trim().to_string()]))
            }
            (Self::Tags, PropertyValue::RichText { rich_text }) => Some(FieldValue::List(
                plain_text(rich_text)
                    .split(',')
                    .map(|tag| tag.trim().to_string())
                    .filter(|tag| !tag.is_empty())
                    .collect(),
            )),
            (Self::Date, PropertyValue::Date { date: Some(date) }) => {
                parse_notion_date(&date.start).map(FieldValue::Timestamp)
            }
            (Self::Date, PropertyValue::CreatedTime { created_time }) => {
                parse_notion_date(created_time).map(FieldValue::Timestamp)
            }
            (Self::Checkbox, PropertyValue::Checkbox { checkbox }) => Some(FieldValue::Flag(*checkbox)),
            (Self::People, PropertyValue::People { people }) => {
                let names: Vec<&str> = people
                    .iter()
                    .filter_map(|person| person.name.as_deref())
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .collect();
                non_empty(names.join(", "))
            }
            (Self::People, PropertyValue::RichText { rich_text }) => non_empty(plain_text(rich_text)),
            (Self::People, PropertyValue::Select { select: Some(option) }) => {
                non_empty(option.name.clone())
            }
            (Self::Files, PropertyValue::Files { files }) => files
                .first()
                .map(|file| FieldValue::Text(file.url().to_string())),
            (Self::Files, PropertyValue::Url { url: Some(url) }) => non_empty(url.clone()),
            _ => None,
        }
    }
}

fn non_empty(text: String) -> Option<FieldValue> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(FieldValue::Text(trimmed.to_string()))
    }
}

/// Notion dates are either RFC 3339 timestamps or bare `YYYY-MM-DD` days (UTC).
pub fn parse_notion_date(value: &str) -> Option<OffsetDateTime> {
    let value = value.trim();
    if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(parsed);
    }
    Date::parse(value, format_description!("[year]-[month]-[day]"))
        .ok()
        .map(|date| date.midnight().assume_utc())
}

/// Post fields extracted from one page, before slugs and assets are resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageFields {
    pub title: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub published_at: Option<OffsetDateTime>,
    pub status: Option<String>,
    pub published_flag: Option<bool>,
    pub draft: bool,
    pub featured: bool,
    pub tags: Vec<String>,
    pub author: Option<String>,
    pub canonical_url: Option<String>,
    pub cover_url: Option<String>,
}

impl PageFields {
    /// Published means a `Published` status or checkbox, and not marked draft.
    pub fn is_published(&self) -> bool {
        let by_status = self
            .status
            .as_deref()
            .is_some_and(|status| status.eq_ignore_ascii_case("published"));
        (by_status || self.published_flag == Some(true)) && !self.draft
    }
}

/// Resolve one field through the table, or `None` if no candidate matched.
pub fn resolve(page: &Page, rule: &FieldRule) -> Option<FieldValue> {
    rule.candidates.iter().find_map(|name| {
        page.properties
            .get(*name)
            .and_then(|value| rule.extractor.extract(value))
    })
}

pub fn extract_fields(page: &Page) -> PageFields {
    let mut fields = PageFields::default();
    for rule in FIELD_TABLE {
        let Some(value) = resolve(page, rule) else {
            continue;
        };
        match (rule.field, value) {
            (PostField::Title, FieldValue::Text(text)) => fields.title = Some(text),
            (PostField::Slug, FieldValue::Text(text)) => fields.slug = Some(text),
            (PostField::Description, FieldValue::Text(text)) => fields.description = Some(text),
            (PostField::PublishedAt, FieldValue::Timestamp(at)) => fields.published_at = Some(at),
            (PostField::Status, FieldValue::Text(text)) => fields.status = Some(text),
            (PostField::PublishedFlag, FieldValue::Flag(flag)) => fields.published_flag = Some(flag),
            (PostField::Draft, FieldValue::Flag(flag)) => fields.draft = flag,
            (PostField::Featured, FieldValue::Flag(flag)) => fields.featured = flag,
            (PostField::Tags, FieldValue::List(tags)) => fields.tags = dedupe(tags),
            (PostField::Author, FieldValue::Text(text)) => fields.author = Some(text),
            (PostField::CanonicalUrl, FieldValue::Text(text)) => fields.canonical_url = Some(text),
            (PostField::Cover, FieldValue::Text(text)) => fields.cover_url = Some(text),
            _ => {}
        }
    }

    if fields.published_at.is_none() {
        fields.published_at = page.created_time.as_deref().and_then(parse_notion_date);
    }
    if fields.cover_url.is_none() {
        fields.cover_url = page.cover.as_ref().map(|cover| cover.url().to_string());
    }
    fields
}

fn dedupe(tags: Vec<String>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        if !seen.iter().any(|existing| existing.eq_ignore_ascii_case(&tag)) {
            seen.push(tag);
        }
    }
    seen
}
