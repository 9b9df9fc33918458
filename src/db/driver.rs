//! Driver abstraction consumed by the access service.
//!
//! [`Driver`] hands out pooled connections and runs one-shot statements;
//! [`DriverConnection`] is a single checked-out connection that can carry a
//! transaction. The sqlx-backed implementation lives in [`crate::db::pool`].

use crate::error::{DbError, DbResult};
use crate::models::{Column, QueryParam, Row, Value};
use std::future::Future;

/// Rows as reported by the driver: column names in order, then one raw value
/// per column for each row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRows {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl RawRows {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Append one row of raw values; its width must match the column list.
    pub fn push(&mut self, values: Vec<Value>) -> DbResult<()> {
        if values.len() != self.columns.len() {
            return Err(DbError::internal(format!(
                "driver returned {} values for {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        self.rows.push(values);
        Ok(())
    }

    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Decode every row column-by-column into [`Row`]s.
    pub fn decode(self) -> Vec<Row> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|values| {
                columns
                    .iter()
                    .zip(values)
                    .map(|(name, value)| Column::new(name.as_str(), value))
                    .collect()
            })
            .collect()
    }
}

/// A single connection checked out of the driver's pool.
pub trait DriverConnection: Send + Sized + 'static {
    /// Liveness check.
    fn ping(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn begin(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn commit(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn rollback(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn fetch(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> impl Future<Output = DbResult<RawRows>> + Send;

    /// Run a statement and return the number of affected rows.
    fn execute(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> impl Future<Output = DbResult<u64>> + Send;

    /// Hand the connection back to the pool.
    fn release(self) -> impl Future<Output = DbResult<()>> + Send;

    /// Drop the connection without returning it to the pool.
    fn discard(self);
}

/// Connection source plus a connectionless one-shot path.
pub trait Driver: Send + Sync + 'static {
    type Connection: DriverConnection;

    /// Check out a new connection. Liveness is not verified here.
    fn acquire(&self) -> impl Future<Output = DbResult<Self::Connection>> + Send;

    /// Service-level liveness check.
    fn ping(&self) -> impl Future<Output = DbResult<()>> + Send;

    fn fetch(
        &self,
        sql: &str,
        params: &[QueryParam],
    ) -> impl Future<Output = DbResult<RawRows>> + Send;

    fn execute(
        &self,
        sql: &str,
        params: &[QueryParam],
    ) -> impl Future<Output = DbResult<u64>> + Send;
}
