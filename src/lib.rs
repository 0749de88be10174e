//! Folio: a Notion-backed blog content service.
//!
//! Content is synced from a Notion database into markdown files, loaded into an
//! in-memory snapshot and served over a small JSON API with search, an image
//! proxy and cache management routes.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod util;
