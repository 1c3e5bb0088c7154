//! Bounded access cache with decaying-frequency eviction.

use super::traits::EntryCache;
use crate::config::CacheConfig;
use crate::models::Value;
use crate::storage::sqlite::acquire_lock;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Instant;

const SECS_PER_HOUR: f64 = 3600.0;

/// Entry in the access cache.
#[derive(Debug, Clone)]
struct CacheEntry {
    /// Decoded value.
    value: Value,
    /// Hits since the entry was last set.
    count: u64,
    /// When the entry was last set.
    created_at: Instant,
}

impl CacheEntry {
    /// Accesses per hour between creation and `now`.
    ///
    /// `None` when no time has passed, so a fresh entry is never judged.
    #[allow(clippy::cast_precision_loss)]
    fn hourly_rate(&self, now: Instant) -> Option<f64> {
        let age = now.saturating_duration_since(self.created_at);
        if age.is_zero() {
            return None;
        }
        Some(self.count as f64 * SECS_PER_HOUR / age.as_secs_f64())
    }
}

/// In-memory cache of decoded values for one map.
///
/// # How it works
///
/// 1. `set` stores the value with an access count of zero
/// 2. every `get` hit increments the count
/// 3. a sweep computes `count * 3600 / age_secs` for each entry and evicts the
///    ones below `min_hourly_rate`
///
/// This prunes entries that are rarely read relative to their age, however
/// recently they were last touched. Capacity is bounded separately by LRU
/// order.
///
/// # Thread Safety
///
/// The LRU is behind a `Mutex` that is held only for the duration of a single
/// call. A sweep snapshots entry statistics, decides outside the lock, then
/// evicts one key at a time, re-checking each entry so one that was reset in
/// between survives.
pub struct AccessCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    min_hourly_rate: f64,
}

impl AccessCache {
    /// Creates a cache holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: NonZeroUsize, min_hourly_rate: f64) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            min_hourly_rate,
        }
    }

    /// Creates a cache from configuration. A zero capacity is raised to one.
    #[must_use]
    pub fn from_config(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self::new(capacity, config.min_hourly_rate)
    }

    /// Access count of a cached entry, without counting this lookup.
    #[must_use]
    pub fn access_count(&self, key: &str) -> Option<u64> {
        acquire_lock(&self.entries).peek(key).map(|entry| entry.count)
    }

    fn is_stale(&self, entry: &CacheEntry, now: Instant) -> bool {
        entry
            .hourly_rate(now)
            .is_some_and(|rate| rate < self.min_hourly_rate)
    }
}

impl EntryCache for AccessCache {
    fn has(&self, key: &str) -> bool {
        acquire_lock(&self.entries).contains(key)
    }

    fn get(&self, key: &str) -> Option<Value> {
        let mut entries = acquire_lock(&self.entries);
        let entry = entries.get_mut(key)?;
        entry.count += 1;
        Some(entry.value.clone())
    }

    fn set(&self, key: &str, value: Value) {
        let entry = CacheEntry {
            value,
            count: 0,
            created_at: Instant::now(),
        };
        let displaced = acquire_lock(&self.entries).push(key.to_string(), entry);
        if displaced.is_some_and(|(old_key, _)| old_key != key) {
            metrics::counter!("sqlmap_cache_evictions_total", "reason" => "capacity").increment(1);
        }
    }

    fn delete(&self, key: &str) {
        acquire_lock(&self.entries).pop(key);
    }

    fn clear(&self) {
        acquire_lock(&self.entries).clear();
    }

    fn len(&self) -> usize {
        acquire_lock(&self.entries).len()
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let candidates: Vec<String> = {
            let entries = acquire_lock(&self.entries);
            entries
                .iter()
                .filter(|(_, entry)| self.is_stale(entry, now))
                .map(|(key, _)| key.clone())
                .collect()
        };

        let mut evicted = 0;
        for key in candidates {
            let mut entries = acquire_lock(&self.entries);
            if entries
                .peek(&key)
                .is_some_and(|entry| self.is_stale(entry, now))
            {
                entries.pop(&key);
                evicted += 1;
            }
        }

        if evicted > 0 {
            metrics::counter!("sqlmap_cache_evictions_total", "reason" => "decay")
                .increment(evicted as u64);
        }
        tracing::debug!(evicted, remaining = self.len(), "Access cache swept");
        evicted
    }
}
