//! Database access layer.
//!
//! - Statement builder with Plain, Placeholder and Begin/End strategies
//! - Caller-held transaction context with nesting
//! - Access service routing statements through the context
//! - Driver abstraction and its sqlx implementation (pools, binding, decoding)
//! - Metrics sink notified after each operation

#[macro_use]
pub mod macros;
pub mod builder;
pub mod context;
pub mod driver;
pub mod metrics;
pub mod params;
pub mod pool;
pub mod service;
pub mod types;

pub use builder::{Query, Strategy, append_lock_clause};
pub use context::TxContext;
pub use driver::{Driver, DriverConnection, RawRows};
pub use metrics::{MetricsSink, NoopMetrics, Outcome, TracingMetrics};
pub use pool::{DbConnection, DbPool, SqlxConnection};
pub use service::{AccessService, Context};
