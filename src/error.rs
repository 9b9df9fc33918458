//! Error types for the database access layer.
//!
//! All failures are reported through [`DbError`], built with `thiserror`.
//! The variants follow the failure classes callers need to tell apart:
//! connectivity, driver, statement validation, column coercion, result
//! cardinality and transaction discipline.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Schema error: {message} (object: {object})")]
    Schema { message: String, object: String },

    #[error("Timeout: {operation} exceeded {budget_secs}s")]
    Timeout {
        operation: String,
        budget_secs: u32,
    },

    #[error("Invalid query: {message}")]
    InvalidQuery { message: String },

    #[error("Invalid type for column '{column}': expected {expected}, found {found}")]
    InvalidType {
        column: String,
        expected: &'static str,
        found: String,
    },

    #[error("Required field returned empty value: {column}")]
    RequiredEmpty { column: String },

    #[error("Unexpected record count: expected {expected}, got {actual}")]
    UnexpectedRecordCount { expected: String, actual: usize },

    #[error("Unable to find record")]
    RecordNotFound,

    #[error("Unexpected affected row count: expected {expected}, got {actual}")]
    UnexpectedAffectedRows { expected: u64, actual: u64 },

    #[error("Transaction error: {message} (context: {context_id})")]
    Transaction { message: String, context_id: String },

    #[error("{source}; rollback also failed: {rollback}")]
    RollbackFailed {
        source: Box<DbError>,
        rollback: Box<DbError>,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            object: object.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, budget_secs: u32) -> Self {
        Self::Timeout {
            operation: operation.into(),
            budget_secs,
        }
    }

    /// Create a statement validation error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Create a coercion error for a column.
    pub fn invalid_type(
        column: impl Into<String>,
        expected: &'static str,
        found: impl Into<String>,
    ) -> Self {
        Self::InvalidType {
            column: column.into(),
            expected,
            found: found.into(),
        }
    }

    /// Create a required-value error for a column.
    pub fn required_empty(column: impl Into<String>) -> Self {
        Self::RequiredEmpty {
            column: column.into(),
        }
    }

    /// Create a record count error.
    pub fn unexpected_record_count(expected: impl Into<String>, actual: usize) -> Self {
        Self::UnexpectedRecordCount {
            expected: expected.into(),
            actual,
        }
    }

    /// Create a transaction discipline error.
    pub fn transaction(message: impl Into<String>, context_id: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            context_id: context_id.into(),
        }
    }

    /// Combine a caller error with the error of the rollback that followed it.
    pub fn rollback_failed(source: DbError, rollback: DbError) -> Self {
        Self::RollbackFailed {
            source: Box::new(source),
            rollback: Box::new(rollback),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Driver-specific error code (SQLSTATE) reported to the metrics sink.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. } => sql_state.as_deref(),
            Self::RollbackFailed { source, .. } => source.error_code(),
            _ => None,
        }
    }

    /// Check whether this error came from the connection rather than the statement.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::RecordNotFound,
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out acquiring a connection from the pool",
                "Raise max_open_connections or release connections sooner",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::TypeNotFound { type_name } => DbError::schema(
                format!("Type not found: {}", type_name),
                type_name.to_string(),
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::schema(format!("Column not found: {}", col), col.to_string())
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::AnyDriverError(err) => DbError::connection(
                format!("Driver error: {}", err),
                "Check database driver configuration",
            ),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
