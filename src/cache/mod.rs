//! Named response stores and the caching strategies that run against them.
//!
//! This module provides the offline caching core:
//! - Named key -> response-snapshot stores behind a small capability trait
//! - SQLite and in-memory backends
//! - The three fetch strategies (network-first, cache-first,
//!   stale-while-revalidate) with offline fallback synthesis

mod layer;
mod storage;
mod traits;

pub use layer::{BackgroundReport, BackgroundTask, CacheLayer, OFFLINE_PAGE};
pub use storage::{MemoryStorage, SqliteStorage};
pub use traits::{first_match, request_key, CacheStorage, CachedResponse, Served, ServedSource};
