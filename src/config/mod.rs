//! Configuration management.
//!
//! Configuration is layered: defaults, then an optional TOML file, then
//! `SQLMAP_*` environment variables.
//!
//! # Example TOML
//!
//! ```toml
//! path = "/var/lib/app/state.db"
//! page_size = 512
//!
//! [cache]
//! enabled = true
//! capacity = 20000
//! sweep_interval_secs = 21600
//! min_hourly_rate = 3.0
//! ```

mod options;

pub use options::MapOptions;

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Location string that opens a private in-memory database.
pub const IN_MEMORY: &str = ":memory:";

/// Default interval between cache decay sweeps (6 hours).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Default minimum accesses per hour for a cache entry to survive a sweep.
pub const DEFAULT_MIN_HOURLY_RATE: f64 = 3.0;

/// Default number of cached entries per map.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// Default number of rows fetched per iteration page.
pub const DEFAULT_PAGE_SIZE: usize = 256;

/// Main configuration for a [`Store`](crate::Store).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database file path, or a `:`-prefixed special name such as `:memory:`.
    pub path: PathBuf,
    /// Default cache settings for maps created by the store.
    pub cache: CacheConfig,
    /// Rows fetched per query while iterating a map.
    pub page_size: usize,
}

/// Access cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether maps cache values by default.
    pub enabled: bool,
    /// Maximum cached entries per map.
    pub capacity: usize,
    /// Interval between background decay sweeps.
    pub sweep_interval: Duration,
    /// Entries accessed less often than this per hour are evicted by a sweep.
    pub min_hourly_rate: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: DEFAULT_CACHE_CAPACITY,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            min_hourly_rate: DEFAULT_MIN_HOURLY_RATE,
        }
    }
}

/// Configuration file structure (for TOML parsing).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    /// Database path.
    pub path: Option<String>,
    /// Rows per iteration page.
    pub page_size: Option<usize>,
    /// Cache section.
    pub cache: Option<ConfigFileCache>,
}

/// Cache section in config file.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFileCache {
    /// Whether caching is enabled.
    pub enabled: Option<bool>,
    /// Entries per map.
    pub capacity: Option<usize>,
    /// Seconds between sweeps.
    pub sweep_interval_secs: Option<u64>,
    /// Eviction threshold in accesses per hour.
    pub min_hourly_rate: Option<f64>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("sqlmap.db"),
            cache: CacheConfig::default(),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl StoreConfig {
    /// Creates a configuration for the database at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Creates a configuration for a private in-memory database.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(IN_MEMORY)
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::OperationFailed {
            operation: "read_config_file".to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;

        let file: ConfigFile = toml::from_str(&contents).map_err(|e| Error::OperationFailed {
            operation: "parse_config_file".to_string(),
            cause: e.to_string(),
        })?;

        let config = Self::from_config_file(file);
        config.validate()?;
        Ok(config)
    }

    /// Converts a `ConfigFile` to `StoreConfig`.
    fn from_config_file(file: ConfigFile) -> Self {
        let mut config = Self::default();

        if let Some(path) = file.path {
            config.path = PathBuf::from(path);
        }
        if let Some(page_size) = file.page_size {
            config.page_size = page_size;
        }
        if let Some(cache) = file.cache {
            if let Some(v) = cache.enabled {
                config.cache.enabled = v;
            }
            if let Some(v) = cache.capacity {
                config.cache.capacity = v;
            }
            if let Some(v) = cache.sweep_interval_secs {
                config.cache.sweep_interval = Duration::from_secs(v);
            }
            if let Some(v) = cache.min_hourly_rate {
                config.cache.min_hourly_rate = v;
            }
        }

        config
    }

    /// Applies environment variable overrides.
    ///
    /// | Variable | Description |
    /// |----------|-------------|
    /// | `SQLMAP_PATH` | Database path |
    /// | `SQLMAP_PAGE_SIZE` | Rows per iteration page |
    /// | `SQLMAP_CACHE_ENABLED` | `true`/`1` to cache values |
    /// | `SQLMAP_CACHE_CAPACITY` | Entries per map |
    /// | `SQLMAP_CACHE_SWEEP_SECS` | Seconds between decay sweeps |
    /// | `SQLMAP_CACHE_MIN_RATE` | Reads per hour below which a cached entry is evicted |
    ///
    /// Unparseable values are ignored, as is a negative or non-finite rate.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = var("SQLMAP_PATH")
            && !v.is_empty()
        {
            self.path = PathBuf::from(v);
        }
        if let Some(v) = var("SQLMAP_PAGE_SIZE")
            && let Ok(parsed) = v.parse::<usize>()
        {
            self.page_size = parsed.max(1);
        }
        if let Some(v) = var("SQLMAP_CACHE_ENABLED") {
            self.cache.enabled = v.to_lowercase() == "true" || v == "1";
        }
        if let Some(v) = var("SQLMAP_CACHE_CAPACITY")
            && let Ok(parsed) = v.parse::<usize>()
        {
            self.cache.capacity = parsed.max(1);
        }
        if let Some(v) = var("SQLMAP_CACHE_SWEEP_SECS")
            && let Ok(parsed) = v.parse::<u64>()
        {
            self.cache.sweep_interval = Duration::from_secs(parsed.max(1));
        }
        if let Some(v) = var("SQLMAP_CACHE_MIN_RATE")
            && let Ok(parsed) = v.trim().parse::<f64>()
            && parsed.is_finite()
            && parsed >= 0.0
        {
            self.cache.min_hourly_rate = parsed;
        }
        self
    }

    /// Checks that every setting is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for a zero page size, zero cache
    /// capacity, zero sweep interval, or a negative/non-finite eviction rate.
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(Error::InvalidInput("page_size must be at least 1".to_string()));
        }
        if self.cache.capacity == 0 {
            return Err(Error::InvalidInput(
                "cache capacity must be at least 1".to_string(),
            ));
        }
        if self.cache.sweep_interval.is_zero() {
            return Err(Error::InvalidInput(
                "cache sweep interval must be non-zero".to_string(),
            ));
        }
        if !self.cache.min_hourly_rate.is_finite() || self.cache.min_hourly_rate < 0.0 {
            return Err(Error::InvalidInput(format!(
                "cache min_hourly_rate must be a non-negative number, got {}",
                self.cache.min_hourly_rate
            )));
        }
        Ok(())
    }

    /// Sets the database path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Enables or disables caching by default.
    #[must_use]
    pub const fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache.enabled = enabled;
        self
    }

    /// Sets the per-map cache capacity.
    #[must_use]
    pub const fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache.capacity = capacity;
        self
    }

    /// Sets the interval between cache decay sweeps.
    #[must_use]
    pub const fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.cache.sweep_interval = interval;
        self
    }

    /// Sets the number of rows fetched per iteration page.
    #[must_use]
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}
