//! Notion to content-directory sync.
//!
//! A run queries the database once, converts each published page to a frontmatter
//! document with localized images, and then replaces the posts and images
//! directories. Page failures are collected in the [`SyncReport`]; a failing page
//! keeps its previously synced document.

pub mod blocks;
mod error;
pub mod images;
pub mod mapping;
mod service;
mod source;
mod writer;

pub use error::SyncError;
pub use service::{PageFailure, SyncPaths, SyncReport, SyncService};
pub use source::ContentSource;
pub use writer::{DirOutcome, digest_dir, replace_dir};
