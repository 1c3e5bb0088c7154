//! # sqlmap
//!
//! Persistent map-like tables over an embedded `SQLite` database.
//!
//! A [`Store`] owns a single `SQLite` connection and hands out [`SqlMap`]s, one
//! per logical table. Each map behaves like an associative container
//! (`get`/`set`/`has`/`delete`/iterate) whose values are stored as JSON text,
//! extended with markers for big integers and positive infinity.
//!
//! ## Features
//!
//! - Table names are sanitized before being spliced into SQL
//! - Conflict-free upserts (last writer wins)
//! - Lazy, page-at-a-time iteration that never loads a whole table
//! - Bounded per-table access cache with decaying-frequency eviction
//! - Online backup through `SQLite`'s backup API
//!
//! ## Example
//!
//! ```rust
//! use sqlmap::{MapOptions, Store, StoreConfig, Value};
//!
//! let mut store = Store::open(StoreConfig::in_memory())?;
//! let users = store.get_or_create_map("users", MapOptions::default())?;
//!
//! users.set("u1", &Value::from("alice"))?;
//! assert_eq!(users.get("u1")?, Some(Value::from("alice")));
//!
//! store.teardown()?;
//! # Ok::<(), sqlmap::Error>(())
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use std::path::PathBuf;
use thiserror::Error as ThisError;

// Module declarations
pub mod cache;
pub mod codec;
pub mod config;
pub mod models;
pub mod observability;
pub mod storage;

// Re-exports for convenience
pub use cache::{AccessCache, EntryCache, NoCache};
pub use config::{CacheConfig, MapOptions, StoreConfig};
pub use models::Value;
pub use storage::{Location, SqlMap, Store};

/// Error type for sqlmap operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `Decode` | A stored value is not valid codec text |
/// | `Database` | `SQLite` returns an error (I/O, constraint, syntax) |
/// | `Io` | The database directory cannot be created |
/// | `InvalidInput` | A value cannot be encoded, or configuration is invalid |
/// | `Closed` | A map is used after `close()` or after its store was torn down |
/// | `NotInitialized` | A store is used before `init()` or after `teardown()` |
/// | `OperationFailed` | Config files cannot be read, blocking tasks fail to join |
#[derive(Debug, ThisError)]
pub enum Error {
    /// A stored value could not be decoded.
    ///
    /// Always surfaced to the caller of `get`, never replaced by a default.
    #[error("failed to decode value {raw:?} for id '{id}': {source}")]
    Decode {
        /// Id of the offending row.
        id: String,
        /// Raw text found in the value column.
        raw: String,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The `SQLite` engine reported an error.
    #[error("database operation '{operation}' failed: {source}")]
    Database {
        /// The operation that failed.
        operation: String,
        /// The engine error, unchanged.
        #[source]
        source: rusqlite::Error,
    },

    /// A filesystem operation failed.
    #[error("i/o operation '{operation}' failed for {}: {source}", path.display())]
    Io {
        /// The operation that failed.
        operation: String,
        /// Path involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Invalid input was provided.
    ///
    /// Raised when:
    /// - A value contains `NaN` or negative infinity
    /// - Configuration values are out of range
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The map was closed, directly or by store teardown.
    #[error("map '{table}' is closed")]
    Closed {
        /// Sanitized table name of the map.
        table: String,
    },

    /// The store has not been initialized or was already torn down.
    #[error("store is not initialized")]
    NotInitialized,

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

impl Error {
    /// Builds a [`Error::Database`] for the named operation.
    ///
    /// Meant for `map_err` chains: `.map_err(Error::database("get"))`.
    pub fn database(operation: &'static str) -> impl FnOnce(rusqlite::Error) -> Self {
        move |source| Self::Database {
            operation: operation.to_string(),
            source,
        }
    }
}

/// Result type alias for sqlmap operations.
pub type Result<T> = std::result::Result<T, Error>;
