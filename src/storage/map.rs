//! Map-like access to a single table.

use super::iter::{Entries, Keys, Values};
use super::sqlite::{ConnectionCell, acquire_lock, observe, sql};
use crate::cache::EntryCache;
use crate::codec;
use crate::models::Value;
use crate::{Error, Result};
use rusqlite::{Connection, OptionalExtension, params};
use std::sync::{Arc, RwLock, Weak};
use std::time::Instant;
use tracing::instrument;

/// Handles that exist only while the map is open.
#[derive(Clone)]
struct MapState {
    /// Non-owning reference to the store's connection.
    conn: Weak<ConnectionCell>,
    /// Cache consulted before any query.
    cache: Arc<dyn EntryCache>,
}

struct MapInner {
    table: String,
    page_size: usize,
    state: RwLock<Option<MapState>>,
}

/// A persistent map backed by one `SQLite` table.
///
/// Maps are created by [`Store::get_or_create_map`](crate::Store::get_or_create_map)
/// and are cheap to clone; clones share the same cache and open/closed state.
///
/// # Schema
///
/// `(id TEXT PRIMARY KEY UNIQUE, value TEXT) WITHOUT ROWID`, where `value`
/// holds the [codec](crate::codec) text of the stored [`Value`].
///
/// # Caching
///
/// `set` writes through the access cache and `get` answers from it on a hit.
/// A `get` miss reads from `SQLite` but does not populate the cache, so cold
/// reads never displace entries that were written.
///
/// # Concurrency Model
///
/// Each call locks the shared connection for one statement and releases it.
/// Methods block on `SQLite`; async callers go through [`SqlMap::blocking`].
#[derive(Clone)]
pub struct SqlMap {
    inner: Arc<MapInner>,
}

impl SqlMap {
    pub(crate) fn new(
        table: String,
        conn: Weak<ConnectionCell>,
        cache: Arc<dyn EntryCache>,
        page_size: usize,
    ) -> Self {
        Self {
            inner: Arc::new(MapInner {
                table,
                page_size: page_size.max(1),
                state: RwLock::new(Some(MapState { conn, cache })),
            }),
        }
    }

    /// Sanitized table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.table
    }

    /// Rows fetched per query while iterating.
    #[must_use]
    pub fn page_size(&self) -> usize {
        self.inner.page_size
    }

    /// Returns `true` once the map, or its store, was closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state().is_err()
    }

    fn closed(&self) -> Error {
        Error::Closed {
            table: self.inner.table.clone(),
        }
    }

    fn state(&self) -> Result<MapState> {
        let state = match self.inner.state.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };
        state.ok_or_else(|| self.closed())
    }

    fn cache(&self) -> Result<Arc<dyn EntryCache>> {
        self.state().map(|state| state.cache)
    }

    /// Runs `f` against the live connection.
    ///
    /// Fails with [`Error::Closed`] if the map was closed or the store has
    /// released the connection.
    fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let cell = self.state()?.conn.upgrade().ok_or_else(|| self.closed())?;
        let guard = acquire_lock(&cell);
        let conn = guard.as_ref().ok_or_else(|| self.closed())?;
        f(conn)
    }

    /// Number of stored entries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] on a closed map, [`Error::Database`] if the
    /// query fails.
    #[instrument(skip(self), fields(operation = "size", table = %self.name()))]
    pub fn size(&self) -> Result<usize> {
        let start = Instant::now();
        let result = self.with_connection(|conn| {
            let count: i64 = conn
                .prepare_cached(&sql::count(self.name()))
                .and_then(|mut stmt| stmt.query_row([], |row| row.get(0)))
                .map_err(Error::database("count"))?;
            Ok(usize::try_from(count).unwrap_or_default())
        });
        observe("size", start, result)
    }

    /// Returns `true` if an entry exists for `id`.
    ///
    /// Answers from the cache when possible, otherwise probes the table
    /// without reading or decoding the value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] on a closed map, [`Error::Database`] if the
    /// query fails.
    #[instrument(skip(self), fields(operation = "has", table = %self.name()))]
    pub fn has(&self, id: &str) -> Result<bool> {
        if self.cache()?.has(id) {
            return Ok(true);
        }

        let start = Instant::now();
        let result = self.with_connection(|conn| {
            let exists: i64 = conn
                .prepare_cached(&sql::exists(self.name()))
                .and_then(|mut stmt| stmt.query_row(params![id], |row| row.get(0)))
                .map_err(Error::database("exists"))?;
            Ok(exists != 0)
        });
        observe("has", start, result)
    }

    /// Returns the value stored for `id`, or `None` if there is none.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] if the stored text cannot be decoded,
    /// [`Error::Closed`] on a closed map, [`Error::Database`] if the query
    /// fails.
    #[instrument(skip(self), fields(operation = "get", table = %self.name()))]
    pub fn get(&self, id: &str) -> Result<Option<Value>> {
        let cache = self.cache()?;
        if let Some(value) = cache.get(id) {
            metrics::counter!("sqlmap_cache_hits_total").increment(1);
            tracing::debug!(id, "Cache hit");
            return Ok(Some(value));
        }
        metrics::counter!("sqlmap_cache_misses_total").increment(1);

        let start = Instant::now();
        let result = self.with_connection(|conn| {
            conn.prepare_cached(&sql::select_value(self.name()))
                .and_then(|mut stmt| {
                    stmt.query_row(params![id], |row| row.get::<_, Option<String>>(0))
                        .optional()
                })
                .map_err(Error::database("select_value"))
        });

        let result = result.and_then(|row| {
            row.map(|raw| codec::decode_column(id, raw.as_deref()))
                .transpose()
        });
        observe("get", start, result)
    }

    /// Stores `value` under `id`, overwriting any previous value.
    ///
    /// The value is encoded before anything is touched, so an unencodable
    /// value leaves both the table and the cache unchanged. The cache is
    /// updated while the connection is still held, so concurrent writers to
    /// one id leave the cache agreeing with the row.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for values containing `NaN` or negative
    /// infinity, [`Error::Closed`] on a closed map, [`Error::Database`] if the
    /// upsert fails.
    #[instrument(skip(self, value), fields(operation = "set", table = %self.name(), kind = value.kind()))]
    pub fn set(&self, id: &str, value: &Value) -> Result<()> {
        let encoded = codec::encode(value)?;
        let cache = self.cache()?;

        let start = Instant::now();
        let result = self.with_connection(|conn| {
            conn.prepare_cached(&sql::upsert(self.name()))
                .and_then(|mut stmt| stmt.execute(params![id, encoded]))
                .map_err(Error::database("upsert"))?;
            // Still under the connection lock, so cache writes follow row order.
            cache.set(id, value.clone());
            Ok(())
        });
        observe("set", start, result)
    }

    /// Removes the entry for `id`.
    ///
    /// Returns whether a row was deleted; deleting a missing id is not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] on a closed map, [`Error::Database`] if the
    /// delete fails.
    #[instrument(skip(self), fields(operation = "delete", table = %self.name()))]
    pub fn delete(&self, id: &str) -> Result<bool> {
        let cache = self.cache()?;

        let start = Instant::now();
        let result = self.with_connection(|conn| {
            cache.delete(id);
            let deleted = conn
                .prepare_cached(&sql::delete(self.name()))
                .and_then(|mut stmt| stmt.execute(params![id]))
                .map_err(Error::database("delete"))?;
            Ok(deleted > 0)
        });
        observe("delete", start, result)
    }

    /// Removes every entry, keeping the table.
    ///
    /// Returns the number of deleted rows.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] on a closed map, [`Error::Database`] if the
    /// delete fails.
    #[instrument(skip(self), fields(operation = "clear", table = %self.name()))]
    pub fn clear(&self) -> Result<usize> {
        let cache = self.cache()?;

        let start = Instant::now();
        let result = self.with_connection(|conn| {
            cache.clear();
            conn.execute(&sql::clear(self.name()), [])
                .map_err(Error::database("clear"))
        });
        observe("clear", start, result)
    }

    /// Lazily iterates over ids in storage order.
    ///
    /// Every call starts a fresh scan. Rows are fetched a page at a time, so
    /// dropping the iterator early leaves no open statement behind.
    #[must_use]
    pub fn keys(&self) -> Keys {
        Keys::new(self.clone())
    }

    /// Lazily iterates over decoded values in storage order.
    #[must_use]
    pub fn values(&self) -> Values {
        Values::new(self.clone())
    }

    /// Lazily iterates over `(id, value)` pairs in storage order.
    #[must_use]
    pub fn entries(&self) -> Entries {
        Entries::new(self.clone())
    }

    /// Calls `callback(value, id, map)` for every entry in storage order.
    ///
    /// Returns the number of visited entries.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first error met while reading or decoding.
    pub fn for_each<F>(&self, mut callback: F) -> Result<usize>
    where
        F: FnMut(Value, String, &Self),
    {
        let mut visited = 0;
        for entry in self.entries() {
            let (id, value) = entry?;
            callback(value, id, self);
            visited += 1;
        }
        Ok(visited)
    }

    /// Fetches the page of rows after `after` in primary key order.
    ///
    /// The statement is finished before this returns.
    pub(crate) fn fetch_page(
        &self,
        after: Option<&str>,
        with_values: bool,
    ) -> Result<Vec<(String, Option<String>)>> {
        let limit = i64::try_from(self.inner.page_size).unwrap_or(i64::MAX);
        let start = Instant::now();
        let result = self.with_connection(|conn| {
            let mut stmt = conn
                .prepare_cached(&sql::page(self.name(), with_values, after.is_some()))
                .map_err(Error::database("prepare_page"))?;
            let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(String, Option<String>)> {
                let id: String = row.get(0)?;
                let value = if with_values { row.get(1)? } else { None };
                Ok((id, value))
            };
            let rows = match after {
                Some(cursor) => stmt.query_map(params![cursor, limit], map_row),
                None => stmt.query_map(params![limit], map_row),
            };
            rows.and_then(Iterator::collect)
                .map_err(Error::database("page"))
        });
        observe("page", start, result)
    }

    /// Runs a decay sweep over this map's cache now.
    ///
    /// Returns the number of evicted entries; a closed map has nothing to
    /// evict.
    pub fn sweep_cache(&self) -> usize {
        self.cache().map_or(0, |cache| cache.sweep())
    }

    /// Number of values currently cached.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache().map_or(0, |cache| cache.len())
    }

    /// Closes the map, releasing its cache and its connection reference.
    ///
    /// Any later call on this map or its clones fails with [`Error::Closed`].
    /// Closing twice is harmless.
    pub fn close(&self) {
        let taken = match self.inner.state.write() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(state) = taken {
            state.cache.clear();
            tracing::debug!(table = %self.name(), "Map closed");
        }
    }

    /// Runs `f` with a clone of this map on tokio's blocking pool.
    ///
    /// Lets async callers await map operations without stalling the runtime.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns, or [`Error::OperationFailed`] if the
    /// blocking task panicked or was cancelled.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let value = map.blocking(|m| m.get("u1")).await?;
    /// ```
    pub async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let map = self.clone();
        tokio::task::spawn_blocking(move || f(&map))
            .await
            .map_err(|e| Error::OperationFailed {
                operation: "blocking_map_task".to_string(),
                cause: e.to_string(),
            })?
    }
}

impl std::fmt::Debug for SqlMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlMap")
            .field("table", &self.inner.table)
            .field("page_size", &self.inner.page_size)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl IntoIterator for &SqlMap {
    type Item = Result<(String, Value)>;
    type IntoIter = Entries;

    fn into_iter(self) -> Self::IntoIter {
        self.entries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{AccessCache, NoCache};
    use crate::config::CacheConfig;
    use rusqlite::Connection;
    use std::sync::Mutex;

    /// Builds a map over a fresh in-memory table; the returned cell keeps the
    /// connection alive.
    fn map_with(cache: Arc<dyn EntryCache>, page_size: usize) -> (Arc<ConnectionCell>, SqlMap) {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(&sql::create_table("items"), []).unwrap();
        let cell = Arc::new(Mutex::new(Some(conn)));
        let map = SqlMap::new("items".to_string(), Arc::downgrade(&cell), cache, page_size);
        (cell, map)
    }

    fn cached_map() -> (Arc<ConnectionCell>, SqlMap) {
        map_with(Arc::new(AccessCache::from_config(&CacheConfig::default())), 4)
    }

    fn raw_insert(cell: &ConnectionCell, id: &str, value: Option<&str>) {
        acquire_lock(cell)
            .as_ref()
            .unwrap()
            .execute("INSERT INTO \"items\" (id, value) VALUES (?1, ?2)", params![id, value])
            .unwrap();
    }

    #[test]
    fn test_set_get_has_delete() {
        let (_cell, map) = cached_map();

        assert!(!map.has("a").unwrap());
        assert_eq!(map.get("a").unwrap(), None);

        map.set("a", &Value::from(1)).unwrap();
        assert!(map.has("a").unwrap());
        assert_eq!(map.get("a").unwrap(), Some(Value::from(1)));
        assert_eq!(map.size().unwrap(), 1);

        assert!(map.delete("a").unwrap());
        assert!(!map.has("a").unwrap());
        assert_eq!(map.get("a").unwrap(), None);
        assert!(!map.delete("a").unwrap());
    }

    #[test]
    fn test_upsert_keeps_one_row() {
        let (_cell, map) = cached_map();
        map.set("id", &Value::from("v1")).unwrap();
        map.set("id", &Value::from("v2")).unwrap();

        assert_eq!(map.size().unwrap(), 1);
        assert_eq!(map.get("id").unwrap(), Some(Value::from("v2")));
    }

    #[test]
    fn test_get_miss_does_not_populate_cache() {
        let (cell, map) = cached_map();
        raw_insert(&cell, "cold", Some("42"));

        assert_eq!(map.get("cold").unwrap(), Some(Value::Int(42)));
        assert_eq!(map.cache_len(), 0);

        map.set("warm", &Value::from(1)).unwrap();
        assert_eq!(map.cache_len(), 1);
    }

    #[test]
    fn test_decode_error_surfaces_from_get() {
        let (cell, map) = cached_map();
        raw_insert(&cell, "broken", Some("{oops"));

        match map.get("broken") {
            Err(Error::Decode { id, .. }) => assert_eq!(id, "broken"),
            other => panic!("expected decode error, got {other:?}"),
        }
        // Existence checks never decode.
        assert!(map.has("broken").unwrap());
    }

    #[test]
    fn test_null_column_reads_as_null() {
        let (cell, map) = cached_map();
        raw_insert(&cell, "nothing", None);
        assert_eq!(map.get("nothing").unwrap(), Some(Value::Null));
    }

    #[test]
    fn test_unencodable_value_touches_nothing() {
        let (_cell, map) = cached_map();
        let result = map.set("nan", &Value::Float(f64::NAN));

        assert!(matches!(result, Err(Error::InvalidInput(_))));
        assert!(!map.has("nan").unwrap());
        assert_eq!(map.cache_len(), 0);
    }

    #[test]
    fn test_over_deep_value_touches_nothing() {
        let (_cell, map) = cached_map();
        let mut deep = Value::Null;
        for _ in 0..=codec::MAX_NESTING_DEPTH {
            deep = Value::Array(vec![deep]);
        }

        assert!(matches!(map.set("deep", &deep), Err(Error::InvalidInput(_))));
        assert!(!map.has("deep").unwrap());
        assert_eq!(map.cache_len(), 0);

        let Value::Array(mut items) = deep else { unreachable!() };
        let fits = items.pop().unwrap();
        map.set("deep", &fits).unwrap();
        assert_eq!(map.get("deep").unwrap(), Some(fits.clone()));
        // Entries always read the table.
        assert_eq!(map.entries().next().unwrap().unwrap(), ("deep".to_string(), fits));
    }

    #[test]
    fn test_clear_empties_table_and_cache() {
        let (_cell, map) = cached_map();
        for i in 0..5 {
            map.set(&format!("k{i}"), &Value::from(i)).unwrap();
        }

        assert_eq!(map.clear().unwrap(), 5);
        assert_eq!(map.size().unwrap(), 0);
        assert_eq!(map.cache_len(), 0);

        map.set("again", &Value::Null).unwrap();
        assert_eq!(map.size().unwrap(), 1);
    }

    #[test]
    fn test_for_each_passes_map_and_counts() {
        let (_cell, map) = cached_map();
        map.set("a", &Value::from(1)).unwrap();
        map.set("b", &Value::from(2)).unwrap();

        let mut seen = Vec::new();
        let visited = map
            .for_each(|value, id, m| {
                assert_eq!(m.name(), "items");
                seen.push((id, value));
            })
            .unwrap();

        assert_eq!(visited, 2);
        assert_eq!(
            seen,
            vec![
                ("a".to_string(), Value::from(1)),
                ("b".to_string(), Value::from(2))
            ]
        );
    }

    #[test]
    fn test_closed_map_fails_fast() {
        let (_cell, map) = cached_map();
        map.set("a", &Value::from(1)).unwrap();
        let clone = map.clone();

        map.close();
        map.close();

        assert!(clone.is_closed());
        assert!(matches!(clone.get("a"), Err(Error::Closed { .. })));
        assert!(matches!(clone.set("a", &Value::Null), Err(Error::Closed { .. })));
        assert!(matches!(clone.size(), Err(Error::Closed { .. })));
        assert!(matches!(clone.keys().next(), Some(Err(Error::Closed { .. }))));
        assert_eq!(clone.sweep_cache(), 0);
    }

    #[test]
    fn test_dropped_connection_reports_closed() {
        let (cell, map) = cached_map();
        drop(cell);
        assert!(matches!(map.has("a"), Err(Error::Closed { .. })));
    }

    #[test]
    fn test_released_connection_reports_closed() {
        let (cell, map) = cached_map();
        acquire_lock(&cell).take();
        assert!(matches!(map.size(), Err(Error::Closed { .. })));
    }

    #[test]
    fn test_uncached_map_behaves_the_same() {
        let (_cell, map) = map_with(Arc::new(NoCache), 2);
        map.set("a", &Value::from("x")).unwrap();

        assert_eq!(map.cache_len(), 0);
        assert!(map.has("a").unwrap());
        assert_eq!(map.get("a").unwrap(), Some(Value::from("x")));
    }

    #[test]
    fn test_concurrent_writers_leave_cache_matching_row() {
        for _ in 0..50 {
            let (cell, map) = cached_map();
            let writers: Vec<_> = (0..4)
                .map(|t| {
                    let map = map.clone();
                    std::thread::spawn(move || {
                        for i in 0..20 {
                            map.set("shared", &Value::from(t * 100 + i)).unwrap();
                            if i % 7 == 0 {
                                map.delete("shared").unwrap();
                            }
                        }
                    })
                })
                .collect();
            for writer in writers {
                writer.join().unwrap();
            }

            let row: Option<String> = acquire_lock(&cell)
                .as_ref()
                .unwrap()
                .query_row("SELECT value FROM \"items\" WHERE id = 'shared'", [], |row| {
                    row.get(0)
                })
                .optional()
                .unwrap();
            let stored = row.map(|raw| codec::decode("shared", &raw).unwrap());
            assert_eq!(map.get("shared").unwrap(), stored);
            assert_eq!(map.cache_len(), usize::from(stored.is_some()));
        }
    }

    #[tokio::test]
    async fn test_blocking_runs_on_pool() {
        let (_cell, map) = cached_map();
        map.blocking(|m| m.set("async", &Value::from(true))).await.unwrap();

        let value = map.blocking(|m| m.get("async")).await.unwrap();
        assert_eq!(value, Some(Value::Bool(true)));
    }
}
