//! Per-map options.

use super::CacheConfig;

/// Options for [`Store::get_or_create_map`](crate::Store::get_or_create_map).
#[derive(Debug, Clone, Copy, Default)]
pub struct MapOptions {
    /// Overrides the store's default for caching values of this map.
    ///
    /// `None` keeps the store default.
    pub cache: Option<bool>,
}

impl MapOptions {
    /// Options that disable the access cache for the map.
    #[must_use]
    pub const fn uncached() -> Self {
        Self { cache: Some(false) }
    }

    /// Options that enable the access cache for the map.
    #[must_use]
    pub const fn cached() -> Self {
        Self { cache: Some(true) }
    }

    /// Resolves whether caching is on, given the store defaults.
    #[must_use]
    pub fn cache_enabled(&self, defaults: &CacheConfig) -> bool {
        self.cache.unwrap_or(defaults.enabled)
    }
}
