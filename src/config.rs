//! Configuration handling for the database access layer.
//!
//! [`DbConfig`] is supplied once when the access service is built. It can be
//! parsed from command-line arguments and environment variables (clap) or
//! deserialized (serde).

use crate::models::DatabaseType;
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

// Pool configuration defaults
pub const DEFAULT_MAX_OPEN_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_IDLE_CONNECTIONS: u32 = 1;
pub const DEFAULT_CONN_MAX_LIFETIME_SECS: u64 = 1800;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

// Timeout defaults
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_READ_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_WRITE_TIMEOUT_SECS: u64 = 30;

pub const DEFAULT_MAX_CONNECTION_RETRIES: u32 = 3;
pub const DEFAULT_METRIC_PREFIX: &str = "db";

/// Connection settings for the access service.
#[derive(Clone, Args, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// Database URL: host and database, e.g. mysql://db.internal:3306/orders
    #[arg(long = "database-url", value_name = "URL", env = "DB_URL")]
    pub database_url: String,

    /// User name, overrides the one in the URL
    #[arg(long, env = "DB_USER")]
    pub user: Option<String>,

    /// Password, overrides the one in the URL (sensitive - not logged)
    #[arg(long, env = "DB_PASSWORD", hide_env_values = true)]
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Maximum number of open connections
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_OPEN_CONNECTIONS,
        env = "DB_MAX_OPEN_CONNECTIONS"
    )]
    pub max_open_connections: u32,

    /// Connections kept open while idle
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_IDLE_CONNECTIONS,
        env = "DB_MAX_IDLE_CONNECTIONS"
    )]
    pub max_idle_connections: u32,

    /// Maximum lifetime of a connection in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_CONN_MAX_LIFETIME_SECS,
        env = "DB_CONN_MAX_LIFETIME"
    )]
    pub conn_max_lifetime_secs: u64,

    /// Idle connections are closed after this many seconds
    #[arg(
        long,
        default_value_t = DEFAULT_IDLE_TIMEOUT_SECS,
        env = "DB_IDLE_TIMEOUT"
    )]
    pub idle_timeout_secs: u64,

    /// Connection acquire and liveness timeout in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_CONNECT_TIMEOUT_SECS,
        env = "DB_CONNECT_TIMEOUT"
    )]
    pub connect_timeout_secs: u64,

    /// Timeout for select statements in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_READ_TIMEOUT_SECS,
        env = "DB_READ_TIMEOUT"
    )]
    pub read_timeout_secs: u64,

    /// Timeout for writes, commits and rollbacks in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_WRITE_TIMEOUT_SECS,
        env = "DB_WRITE_TIMEOUT"
    )]
    pub write_timeout_secs: u64,

    /// Attempts made to obtain a verified connection
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_CONNECTION_RETRIES,
        env = "DB_MAX_CONNECTION_RETRIES"
    )]
    pub max_connection_retries: u32,

    /// Prefix for operation names reported to the metrics sink
    #[arg(long, default_value = DEFAULT_METRIC_PREFIX, env = "DB_METRIC_PREFIX")]
    pub metric_prefix: String,
}

impl DbConfig {
    /// Create a configuration for `database_url` with default settings.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            ..Self::default()
        }
    }

    /// Detect the backend from the URL scheme.
    pub fn database_type(&self) -> Option<DatabaseType> {
        DatabaseType::from_connection_string(&self.database_url)
    }

    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.database_url.trim().is_empty() {
            return Err("database_url must be set".to_string());
        }
        if self.database_type().is_none() {
            return Err(format!(
                "unsupported database URL scheme: {}",
                self.masked_url()
            ));
        }
        if self.max_open_connections == 0 {
            return Err("max_open_connections must be greater than 0".to_string());
        }
        if self.max_idle_connections > self.max_open_connections {
            return Err(format!(
                "max_idle_connections ({}) cannot exceed max_open_connections ({})",
                self.max_idle_connections, self.max_open_connections
            ));
        }
        if self.max_connection_retries == 0 {
            return Err("max_connection_retries must be greater than 0".to_string());
        }
        if self.connect_timeout_secs == 0
            || self.read_timeout_secs == 0
            || self.write_timeout_secs == 0
        {
            return Err("timeouts must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Connection URL with `user` and `password` applied.
    pub fn connection_url(&self) -> Result<String, String> {
        let uses_credentials = self
            .database_type()
            .is_some_and(|db_type| db_type.uses_credentials());
        if !uses_credentials || (self.user.is_none() && self.password.is_none()) {
            return Ok(self.database_url.clone());
        }

        let mut url = Url::parse(&self.database_url).map_err(|e| format!("Invalid URL: {e}"))?;
        if let Some(user) = &self.user {
            url.set_username(user)
                .map_err(|_| "URL cannot carry a user name".to_string())?;
        }
        if let Some(password) = &self.password {
            url.set_password(Some(password))
                .map_err(|_| "URL cannot carry a password".to_string())?;
        }
        Ok(url.to_string())
    }

    /// Display-safe version of the URL (password masked).
    pub fn masked_url(&self) -> String {
        match Url::parse(&self.database_url) {
            Ok(mut url) if url.password().is_some() => {
                let _ = url.set_password(Some("****"));
                url.to_string()
            }
            _ => self.database_url.clone(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn conn_max_lifetime(&self) -> Duration {
        Duration::from_secs(self.conn_max_lifetime_secs)
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            user: None,
            password: None,
            max_open_connections: DEFAULT_MAX_OPEN_CONNECTIONS,
            max_idle_connections: DEFAULT_MAX_IDLE_CONNECTIONS,
            conn_max_lifetime_secs: DEFAULT_CONN_MAX_LIFETIME_SECS,
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            read_timeout_secs: DEFAULT_READ_TIMEOUT_SECS,
            write_timeout_secs: DEFAULT_WRITE_TIMEOUT_SECS,
            max_connection_retries: DEFAULT_MAX_CONNECTION_RETRIES,
            metric_prefix: DEFAULT_METRIC_PREFIX.to_string(),
        }
    }
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("database_url", &self.masked_url())
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "****"))
            .field("max_open_connections", &self.max_open_connections)
            .field("max_idle_connections", &self.max_idle_connections)
            .field("conn_max_lifetime_secs", &self.conn_max_lifetime_secs)
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("read_timeout_secs", &self.read_timeout_secs)
            .field("write_timeout_secs", &self.write_timeout_secs)
            .field("max_connection_retries", &self.max_connection_retries)
            .field("metric_prefix", &self.metric_prefix)
            .finish()
    }
}

/// Command-line configuration for the `db-access` binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-access",
    about = "Run statements through the transactional database access layer",
    version
)]
pub struct Config {
    #[command(flatten)]
    pub db: DbConfig,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DB_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DB_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Verify that a connection can be established
    Ping,

    /// Run a select statement and print the rows as JSON
    Select {
        sql: String,
        /// Positional parameter, repeat for each `?`
        #[arg(short, long = "param")]
        params: Vec<String>,
        /// Append a FOR UPDATE locking clause (runs inside a transaction)
        #[arg(long)]
        for_update: bool,
        /// Fail unless at most one row is returned
        #[arg(long)]
        unique: bool,
    },

    /// Run a write statement inside a transaction
    Execute {
        sql: String,
        #[arg(short, long = "param")]
        params: Vec<String>,
        /// Roll back unless exactly one row is affected
        #[arg(long)]
        expect_one: bool,
    },
}
