//! Per-map access caches.
//!
//! A map talks to its cache only through the [`EntryCache`] capability trait.
//! Two implementations exist:
//!
//! - [`AccessCache`]: bounded LRU storage of decoded values with a
//!   decaying-frequency sweep
//! - [`NoCache`]: always misses, used when caching is disabled
//!
//! The cache is never a source of truth: a miss only means the value has to
//! be read from `SQLite`.

mod access;
mod traits;

pub use access::AccessCache;
pub use traits::{EntryCache, NoCache};

use crate::config::CacheConfig;
use std::sync::Arc;

/// Builds the cache for a map according to configuration.
#[must_use]
pub fn for_config(config: &CacheConfig, enabled: bool) -> Arc<dyn EntryCache> {
    if enabled {
        Arc::new(AccessCache::from_config(config))
    } else {
        Arc::new(NoCache)
    }
}
