//! Transactional database access layer.
//!
//! Connection acquisition with retry and liveness checks, reentrant
//! transactions on a caller-held [`TxContext`], a parameterized statement
//! builder and a type-coercing row model, over SQLite, PostgreSQL and MySQL.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{Config, DbConfig};
pub use db::{AccessService, DbPool, Query, TxContext};
pub use error::{DbError, DbResult};
pub use models::{Column, QueryParam, QueryResult, Row, Value};
