//! Data models for sqlmap.
//!
//! This module contains the in-memory value type stored in every map.

mod value;

pub use value::Value;
