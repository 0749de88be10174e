//! Application services: sync, content, search and rendering.

pub mod content;
pub mod error;
pub mod posts;
pub mod render;
pub mod scaffold;
pub mod search;
pub mod sync;
