//! Storage layer.
//!
//! - [`Store`]: owns the `SQLite` connection and the registry of maps
//! - [`SqlMap`]: map-like access to one table
//! - [`Keys`], [`Values`], [`Entries`]: paged lazy iteration over a map
//! - [`sqlite`]: connection setup, statement text and metrics shared by both

// Allow significant_drop_tightening - guards are scoped to a single statement.
#![allow(clippy::significant_drop_tightening)]

mod iter;
mod map;
pub mod sqlite;
mod store;
mod sweeper;

pub use iter::{Entries, Keys, Values};
pub use map::SqlMap;
pub use store::{Location, Store};
