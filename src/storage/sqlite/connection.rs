//! Shared connection handling.
//!
//! A [`Store`](crate::Store) owns exactly one `SQLite` connection. It lives in a
//! [`ConnectionCell`] so that teardown can take it out (and close it) while
//! maps that still hold a weak reference simply find it gone.

use crate::{Error, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Slot holding the store's connection; `None` once the store is torn down.
pub type ConnectionCell = Mutex<Option<Connection>>;

/// Number of prepared statements kept per connection.
///
/// Each map uses a handful of statements, so the rusqlite default of 16 would
/// churn as soon as a few maps are active.
pub const STATEMENT_CACHE_CAPACITY: usize = 128;

/// Helper to acquire mutex lock with poison recovery.
///
/// If the mutex is poisoned (due to a panic in a previous critical section),
/// we recover the inner value and log a warning. Neither the connection nor
/// the caches hold invariants that a panic mid-call can break.
///
/// # Examples
///
/// ```
/// use std::sync::Mutex;
/// use sqlmap::storage::sqlite::acquire_lock;
///
/// let mutex = Mutex::new(42);
/// assert_eq!(*acquire_lock(&mutex), 42);
/// ```
pub fn acquire_lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!("sqlmap mutex was poisoned, recovering");
            metrics::counter!("sqlmap_mutex_poison_recovery_total").increment(1);
            poisoned.into_inner()
        },
    }
}

/// Opens a connection for `path`.
///
/// `:`-prefixed names (`:memory:`) and the empty path are handed to `SQLite`
/// unchanged, which opens a private in-memory or temporary database.
///
/// # Errors
///
/// Returns [`Error::Database`] if the database cannot be opened or configured.
pub fn open_connection(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).map_err(Error::database("open_sqlite"))?;
    configure_connection(&conn)?;
    Ok(conn)
}

/// Configures a `SQLite` connection with settings for performance and concurrency.
///
/// # Configuration Applied
///
/// - **WAL mode**: Enables Write-Ahead Logging for concurrent readers with a single writer
/// - **NORMAL synchronous**: Balances durability with performance
/// - **`busy_timeout`**: Waits up to 5 seconds for locks held by other processes
/// - **Statement cache**: Raised to [`STATEMENT_CACHE_CAPACITY`]
///
/// # Errors
///
/// Returns [`Error::Database`] naming the setting that `SQLite` refused.
pub fn configure_connection(conn: &Connection) -> Result<()> {
    // journal_mode answers with the resulting mode: "wal", or "memory" for
    // in-memory databases, which cannot use WAL.
    let journal_mode: String = conn
        .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))
        .map_err(Error::database("configure_journal_mode"))?;
    tracing::debug!(journal_mode = %journal_mode, "Journal mode set");
    conn.pragma_update(None, "synchronous", "NORMAL")
        .map_err(Error::database("configure_synchronous"))?;
    conn.busy_timeout(std::time::Duration::from_secs(5))
        .map_err(Error::database("configure_busy_timeout"))?;
    conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);

    Ok(())
}
