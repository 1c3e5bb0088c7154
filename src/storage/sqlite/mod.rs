//! Shared `SQLite` infrastructure.
//!
//! ## Module Structure
//!
//! - [`connection`]: connection cell, lock acquisition, pragmas
//! - [`sql`]: identifier sanitizing and statement text
//! - [`metrics`]: operation metrics helpers

mod connection;
mod metrics;
pub mod sql;

pub use connection::{
    ConnectionCell, STATEMENT_CACHE_CAPACITY, acquire_lock, configure_connection, open_connection,
};
pub use metrics::{observe, record_operation_metrics};
pub use sql::sanitize_identifier;
