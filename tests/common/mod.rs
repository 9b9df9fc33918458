//! In-memory driver used by the service tests.
//!
//! Every driver call is counted and logged in a shared [`MockState`];
//! failures are switched on per test through the same state.

#![allow(dead_code)]

use db_access::db::{Driver, DriverConnection, MetricsSink, Outcome, RawRows};
use db_access::{DbConfig, DbError, DbResult, QueryParam, Value};
use std::sync::{Arc, Mutex, MutexGuard};

/// Where a statement was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Checked-out connection with this id.
    Connection(usize),
    OneShot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub route: Route,
    pub sql: String,
    pub params: Vec<QueryParam>,
}

#[derive(Debug, Default)]
pub struct MockState {
    pub acquires: usize,
    pub pings: usize,
    pub begins: usize,
    pub commits: usize,
    pub rollbacks: usize,
    pub releases: usize,
    pub discards: usize,

    /// Number of upcoming pings that fail.
    pub ping_failures: usize,
    pub fail_acquire: bool,
    pub fail_begin: bool,
    pub fail_commit: bool,
    pub fail_rollback: bool,
    pub fail_release: bool,
    pub panic_on_begin: bool,

    pub rows: RawRows,
    pub affected: u64,
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn set_rows(&self, rows: RawRows) {
        self.state().rows = rows;
    }

    pub fn set_affected(&self, affected: u64) {
        self.state().affected = affected;
    }

    /// Connections handed out and not yet released or discarded.
    pub fn outstanding(&self) -> usize {
        let state = self.state();
        state.acquires - state.releases - state.discards
    }
}

fn lock(state: &Arc<Mutex<MockState>>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap()
}

fn driver_error(message: &str, code: &str) -> DbError {
    DbError::database(message, Some(code.to_string()), "mock failure")
}

impl Driver for MockDriver {
    type Connection = MockConnection;

    async fn acquire(&self) -> DbResult<MockConnection> {
        let mut state = self.state();
        if state.fail_acquire {
            return Err(DbError::connection("acquire refused", "mock failure"));
        }
        state.acquires += 1;
        Ok(MockConnection {
            id: state.acquires,
            state: Arc::clone(&self.state),
        })
    }

    async fn ping(&self) -> DbResult<()> {
        let mut state = self.state();
        state.pings += 1;
        Ok(())
    }

    async fn fetch(&self, sql: &str, params: &[QueryParam]) -> DbResult<RawRows> {
        let mut state = self.state();
        state.statements.push(Statement {
            route: Route::OneShot,
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        Ok(state.rows.clone())
    }

    async fn execute(&self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let mut state = self.state();
        state.statements.push(Statement {
            route: Route::OneShot,
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        Ok(state.affected)
    }
}

#[derive(Debug)]
pub struct MockConnection {
    id: usize,
    state: Arc<Mutex<MockState>>,
}

impl DriverConnection for MockConnection {
    async fn ping(&mut self) -> DbResult<()> {
        let mut state = lock(&self.state);
        state.pings += 1;
        if state.ping_failures > 0 {
            state.ping_failures -= 1;
            return Err(DbError::connection("ping failed", "mock failure"));
        }
        Ok(())
    }

    async fn begin(&mut self) -> DbResult<()> {
        let mut state = lock(&self.state);
        if state.panic_on_begin {
            drop(state);
            panic!("driver blew up in begin");
        }
        if state.fail_begin {
            return Err(driver_error("begin refused", "25000"));
        }
        state.begins += 1;
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        let mut state = lock(&self.state);
        if state.fail_commit {
            return Err(driver_error("serialization failure", "40001"));
        }
        state.commits += 1;
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        let mut state = lock(&self.state);
        if state.fail_rollback {
            return Err(driver_error("rollback refused", "25P01"));
        }
        state.rollbacks += 1;
        Ok(())
    }

    async fn fetch(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<RawRows> {
        let mut state = lock(&self.state);
        state.statements.push(Statement {
            route: Route::Connection(self.id),
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        Ok(state.rows.clone())
    }

    async fn execute(&mut self, sql: &str, params: &[QueryParam]) -> DbResult<u64> {
        let mut state = lock(&self.state);
        state.statements.push(Statement {
            route: Route::Connection(self.id),
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        Ok(state.affected)
    }

    async fn release(self) -> DbResult<()> {
        let mut state = lock(&self.state);
        state.releases += 1;
        if state.fail_release {
            return Err(DbError::connection("release failed", "mock failure"));
        }
        Ok(())
    }

    fn discard(self) {
        lock(&self.state).discards += 1;
    }
}

/// Metrics sink that keeps every sample.
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    samples: Mutex<Vec<(String, Outcome, Option<String>)>>,
}

impl RecordingMetrics {
    pub fn samples(&self) -> Vec<(String, Outcome, Option<String>)> {
        self.samples.lock().unwrap().clone()
    }
}

impl MetricsSink for RecordingMetrics {
    fn record(&self, operation: &str, outcome: Outcome, error_code: Option<&str>) {
        self.samples.lock().unwrap().push((
            operation.to_string(),
            outcome,
            error_code.map(str::to_string),
        ));
    }
}

pub fn test_config() -> DbConfig {
    DbConfig {
        max_connection_retries: 3,
        metric_prefix: "test".to_string(),
        ..DbConfig::new("sqlite::memory:")
    }
}

/// Three columns by two rows, as a driver would report them.
pub fn sample_rows() -> RawRows {
    let mut rows = RawRows::new(vec!["id".into(), "name".into(), "active".into()]);
    rows.push(vec![Value::Int(1), Value::Text("alice".into()), Value::Bool(true)])
        .unwrap();
    rows.push(vec![
        Value::Int(2),
        Value::Bytes(b"bob".to_vec()),
        Value::Int(0),
    ])
    .unwrap();
    rows
}
