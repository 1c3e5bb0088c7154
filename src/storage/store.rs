//! Store manager: connection ownership, table registry, lifecycle.

use super::map::SqlMap;
use super::sqlite::{ConnectionCell, acquire_lock, observe, open_connection, sanitize_identifier, sql};
use super::sweeper::{self, MapRegistry, Sweeper};
use crate::cache;
use crate::config::{MapOptions, StoreConfig};
use crate::{Error, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::instrument;

/// Where a store keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// A special `SQLite` name such as `:memory:`, or the empty path for a
    /// temporary database. Nothing is created on disk by the store.
    Memory(String),
    /// A database file and the directory holding it.
    File {
        /// Path of the database file.
        path: PathBuf,
        /// Parent directory, created on `init` if missing.
        dir: PathBuf,
    },
}

impl Location {
    /// Classifies a configured path.
    #[must_use]
    pub fn parse(path: &Path) -> Self {
        let text = path.to_string_lossy();
        if text.is_empty() || text.starts_with(':') {
            return Self::Memory(text.into_owned());
        }
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self::File {
            path: path.to_path_buf(),
            dir,
        }
    }

    /// Path handed to `SQLite` when opening.
    #[must_use]
    pub fn as_path(&self) -> &Path {
        match self {
            Self::Memory(name) => Path::new(name),
            Self::File { path, .. } => path,
        }
    }

    /// Returns `true` for locations that never touch the filesystem.
    #[must_use]
    pub const fn is_memory(&self) -> bool {
        matches!(self, Self::Memory(_))
    }
}

/// Owner of one `SQLite` connection and the maps built on it.
///
/// # Lifecycle
///
/// `Store::new` does no I/O. [`Store::init`] creates the database directory
/// and opens the connection. The cache sweeper starts with the first map that
/// has caching enabled. [`Store::teardown`]
/// closes every map and then the connection; dropping an initialized store
/// does the same and logs any error.
///
/// # Concurrency Model
///
/// The connection sits in an `Arc<Mutex<Option<Connection>>>`. Maps hold only
/// a `Weak` to it, so once the store lets go of the connection every map call
/// fails with [`Error::Closed`] instead of reaching a closed handle.
///
/// # Example
///
/// ```rust
/// use sqlmap::{MapOptions, Store, StoreConfig, Value};
///
/// let dir = tempfile::TempDir::new()?;
/// let mut store = Store::new(StoreConfig::new(dir.path().join("data/app.db")));
/// store.init()?;
///
/// let sessions = store.get_or_create_map("sessions", MapOptions::uncached())?;
/// sessions.set("s1", &Value::from(true))?;
/// store.backup(dir.path().join("backups/app.db"))?;
/// store.teardown()?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Store {
    config: StoreConfig,
    location: Location,
    conn: Option<Arc<ConnectionCell>>,
    maps: Arc<MapRegistry>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl Store {
    /// Creates an uninitialized store for `config`.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        let location = Location::parse(&config.path);
        Self {
            config,
            location,
            conn: None,
            maps: Arc::new(Mutex::new(HashMap::new())),
            sweeper: Mutex::new(None),
        }
    }

    /// Creates and initializes a store.
    ///
    /// # Errors
    ///
    /// Returns any error from [`Store::init`].
    pub fn open(config: StoreConfig) -> Result<Self> {
        let mut store = Self::new(config);
        store.init()?;
        Ok(store)
    }

    /// Default database path under the platform data directory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OperationFailed`] if the platform has no data
    /// directory for the current user.
    pub fn default_path() -> Result<PathBuf> {
        directories::BaseDirs::new()
            .map(|dirs| dirs.data_local_dir().join("sqlmap").join("sqlmap.db"))
            .ok_or_else(|| Error::OperationFailed {
                operation: "default_path".to_string(),
                cause: "could not determine user data directory".to_string(),
            })
    }

    /// Opens the database.
    ///
    /// For file locations the parent directory is created first. Calling
    /// `init` on an initialized store does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for an invalid configuration,
    /// [`Error::Io`] if the directory cannot be created, [`Error::Database`]
    /// if the connection cannot be opened.
    #[instrument(skip(self), fields(operation = "init", location = ?self.location))]
    pub fn init(&mut self) -> Result<&mut Self> {
        if self.conn.is_some() {
            return Ok(self);
        }
        self.config.validate()?;

        if let Location::File { dir, .. } = &self.location
            && !dir.exists()
        {
            std::fs::create_dir_all(dir).map_err(|source| Error::Io {
                operation: "create_database_dir".to_string(),
                path: dir.clone(),
                source,
            })?;
        }

        let conn = open_connection(self.location.as_path())?;
        self.conn = Some(Arc::new(Mutex::new(Some(conn))));

        tracing::info!("Store initialized");
        Ok(self)
    }

    /// Returns `true` between a successful `init` and `teardown`.
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.conn.is_some()
    }

    /// Where this store keeps its data.
    #[must_use]
    pub const fn location(&self) -> &Location {
        &self.location
    }

    /// Configuration the store was built with.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn connection(&self) -> Result<&Arc<ConnectionCell>> {
        self.conn.as_ref().ok_or(Error::NotInitialized)
    }

    /// Runs `f` against the store's connection.
    fn with_connection<T>(
        &self,
        f: impl FnOnce(&rusqlite::Connection) -> Result<T>,
    ) -> Result<T> {
        let cell = self.connection()?;
        let guard = acquire_lock(cell);
        let conn = guard.as_ref().ok_or(Error::NotInitialized)?;
        f(conn)
    }

    /// Returns the map for `name`, creating its table if needed.
    ///
    /// `name` is sanitized before use, so any string is accepted; names that
    /// sanitize to the same identifier share one table. While a map for a
    /// table is open, later calls return a handle to that same map (and its
    /// cache) regardless of `options`.
    ///
    /// Creating the first cached map starts the decay sweeper, which runs
    /// every `cache.sweep_interval` on the current tokio runtime or, outside
    /// one, on a runtime owned by the sweeper.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] before `init` or after `teardown`,
    /// [`Error::Database`] if the table cannot be created.
    #[instrument(skip(self, options), fields(operation = "get_or_create_map"))]
    pub fn get_or_create_map(&self, name: &str, options: MapOptions) -> Result<SqlMap> {
        let cell = self.connection()?;
        let table = sanitize_identifier(name);

        let mut maps = acquire_lock(&self.maps);
        if let Some(existing) = maps.get(&table)
            && !existing.is_closed()
        {
            return Ok(existing.clone());
        }

        let start = Instant::now();
        let created = self.with_connection(|conn| {
            conn.execute(&sql::create_table(&table), [])
                .map_err(Error::database("create_table"))
        });
        observe("create_table", start, created)?;

        let cached = options.cache_enabled(&self.config.cache);
        let cache = cache::for_config(&self.config.cache, cached);
        if cached {
            self.ensure_sweeper();
        }
        let map = SqlMap::new(
            table.clone(),
            Arc::downgrade(cell),
            cache,
            self.config.page_size,
        );
        maps.insert(table.clone(), map.clone());

        tracing::debug!(table = %table, requested = name, "Map ready");
        Ok(map)
    }

    /// Starts the sweeper unless it is already running.
    ///
    /// A sweeper that cannot start is logged; [`Store::sweep_caches`] still
    /// works on demand.
    fn ensure_sweeper(&self) {
        let mut slot = acquire_lock(&self.sweeper);
        if slot.is_some() {
            return;
        }
        match Sweeper::start(Arc::downgrade(&self.maps), self.config.cache.sweep_interval) {
            Ok(started) => {
                tracing::debug!(own_runtime = started.owns_runtime(), "Cache sweeper started");
                *slot = Some(started);
            },
            Err(e) => tracing::warn!(error = %e, "Cache sweeper not started"),
        }
    }

    /// Returns `true` while the periodic cache sweeper is running.
    #[must_use]
    pub fn is_sweeping(&self) -> bool {
        acquire_lock(&self.sweeper).is_some()
    }

    /// Sanitized names of the maps registered with this store, sorted.
    #[must_use]
    pub fn map_names(&self) -> Vec<String> {
        let mut names: Vec<String> = acquire_lock(&self.maps).keys().cloned().collect();
        names.sort();
        names
    }

    /// Runs a decay sweep over every open map now.
    ///
    /// Returns the number of evicted cache entries.
    pub fn sweep_caches(&self) -> usize {
        sweeper::sweep_all(&self.maps)
    }

    /// Copies the whole database to `destination` with `SQLite`'s online
    /// backup API.
    ///
    /// The destination's parent directory is created if missing. Writers are
    /// blocked on the connection lock for the duration of the copy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] on an uninitialized store,
    /// [`Error::Io`] if the directory cannot be created, [`Error::Database`]
    /// if the copy fails.
    #[instrument(skip(self, destination), fields(operation = "backup", destination = %destination.as_ref().display()))]
    pub fn backup(&self, destination: impl AsRef<Path>) -> Result<()> {
        let destination = destination.as_ref();
        self.connection()?;

        if let Some(dir) = destination
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty() && !dir.exists())
        {
            std::fs::create_dir_all(dir).map_err(|source| Error::Io {
                operation: "create_backup_dir".to_string(),
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let start = Instant::now();
        let result = self.with_connection(|src| {
            let mut dst =
                rusqlite::Connection::open(destination).map_err(Error::database("open_backup"))?;
            let backup = rusqlite::backup::Backup::new(src, &mut dst)
                .map_err(Error::database("start_backup"))?;
            backup
                .run_to_completion(100, Duration::ZERO, None)
                .map_err(Error::database("run_backup"))
        });
        let result = observe("backup", start, result);
        if result.is_ok() {
            tracing::info!("Backup completed");
        }
        result
    }

    /// Closes every registered map, then the connection.
    ///
    /// The sweeper is stopped first. Maps handed out earlier, and their
    /// clones, fail with [`Error::Closed`] from here on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotInitialized`] if the store is not initialized, or
    /// [`Error::Database`] if `SQLite` reports an error while closing. The
    /// store counts as torn down either way.
    #[instrument(skip(self), fields(operation = "teardown", location = ?self.location))]
    pub fn teardown(&mut self) -> Result<()> {
        let cell = self.conn.take().ok_or(Error::NotInitialized)?;

        if let Some(running) = acquire_lock(&self.sweeper).take() {
            running.stop();
        }

        let maps: Vec<SqlMap> = acquire_lock(&self.maps).drain().map(|(_, map)| map).collect();
        for map in &maps {
            map.close();
        }

        let conn = acquire_lock(&cell).take();
        let closed = conn.map_or(Ok(()), |conn| {
            conn.close()
                .map_err(|(_, source)| Error::database("close_sqlite")(source))
        });

        tracing::info!(maps = maps.len(), "Store torn down");
        closed
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, statement: &str) -> Result<usize> {
        self.with_connection(|conn| {
            conn.execute(statement, [])
                .map_err(Error::database("execute_raw"))
        })
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if self.is_initialized()
            && let Err(e) = self.teardown()
        {
            tracing::warn!(error = %e, "Store teardown on drop failed");
        }
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("location", &self.location)
            .field("initialized", &self.is_initialized())
            .field("maps", &self.map_names())
            .finish_non_exhaustive()
    }
}
