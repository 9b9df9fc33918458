//! Metrics sink notified after every database operation.
//!
//! Recording is best-effort: sinks must not block and cannot fail the
//! operation they observe.

use tracing::debug;

/// Outcome tag attached to each recorded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait MetricsSink: Send + Sync {
    /// `error_code` is the driver's code (SQLSTATE) when one is known.
    fn record(&self, operation: &str, outcome: Outcome, error_code: Option<&str>);
}

/// Discards every sample.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record(&self, _operation: &str, _outcome: Outcome, _error_code: Option<&str>) {}
}

/// Emits each sample as a `tracing` event under the `db_access::metrics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record(&self, operation: &str, outcome: Outcome, error_code: Option<&str>) {
        debug!(
            target: "db_access::metrics",
            operation = %operation,
            outcome = %outcome,
            error_code = ?error_code,
            "Database operation"
        );
    }
}
