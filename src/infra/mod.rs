//! Infrastructure adapters and runtime bootstrap.

pub mod admin_client;
pub mod cache_warmer;
pub mod error;
pub mod http;
pub mod image_proxy;
pub mod imaging;
pub mod kv;
pub mod notion;
pub mod telemetry;
