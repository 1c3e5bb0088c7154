//! Cache capability trait.

use crate::models::Value;
use std::time::Instant;

/// Key/value cache consulted by a map before it touches `SQLite`.
///
/// Implementations use interior mutability and must tolerate concurrent
/// callers; a sweep racing a read at worst turns a hit into a miss.
pub trait EntryCache: Send + Sync {
    /// Returns `true` if `key` is cached.
    fn has(&self, key: &str) -> bool;

    /// Returns the cached value and counts the access.
    fn get(&self, key: &str) -> Option<Value>;

    /// Caches `value`, resetting the access count and creation time.
    fn set(&self, key: &str, value: Value);

    /// Removes `key`.
    fn delete(&self, key: &str);

    /// Removes every entry.
    fn clear(&self);

    /// Number of cached entries.
    fn len(&self) -> usize;

    /// Returns `true` if nothing is cached.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evicts entries whose access rate, measured at `now`, is too low.
    ///
    /// Returns the number of evicted entries.
    fn sweep_at(&self, now: Instant) -> usize;

    /// Runs [`sweep_at`](Self::sweep_at) with the current time.
    fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }
}

/// Cache used when caching is disabled: stores nothing, always misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

impl EntryCache for NoCache {
    fn has(&self, _key: &str) -> bool {
        false
    }

    fn get(&self, _key: &str) -> Option<Value> {
        None
    }

    fn set(&self, _key: &str, _value: Value) {}

    fn delete(&self, _key: &str) {}

    fn clear(&self) {}

    fn len(&self) -> usize {
        0
    }

    fn sweep_at(&self, _now: Instant) -> usize {
        0
    }
}
