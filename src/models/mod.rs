//! Data models for the access layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;
pub mod row;

// Re-export commonly used types
pub use connection::DatabaseType;
pub use query::{QueryParam, QueryResult};
pub use row::{Column, Row, Value};
