//! Backend identification.

use serde::{Deserialize, Serialize};

/// Backends the access layer can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Backend named by the URL scheme of a connection string.
    ///
    /// `mariadb` maps to MySQL; `sqlite:` accepts both `sqlite://path` and
    /// `sqlite::memory:`.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let (scheme, _) = connection_string.split_once(':')?;
        match scheme.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::PostgreSQL),
            "mysql" | "mariadb" => Some(Self::MySQL),
            "sqlite" => Some(Self::SQLite),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Whether credentials can be carried in the connection URL.
    pub fn uses_credentials(&self) -> bool {
        !matches!(self, Self::SQLite)
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_connection_string() {
        assert_eq!(
            DatabaseType::from_connection_string("postgres://localhost/db"),
            Some(DatabaseType::PostgreSQL)
        );
        assert_eq!(
            DatabaseType::from_connection_string("MARIADB://host/db"),
            Some(DatabaseType::MySQL)
        );
        assert_eq!(
            DatabaseType::from_connection_string("sqlite::memory:"),
            Some(DatabaseType::SQLite)
        );
        assert_eq!(DatabaseType::from_connection_string("redis://x"), None);
        assert_eq!(DatabaseType::from_connection_string("no-scheme"), None);
    }

    #[test]
    fn test_credentials_support() {
        assert!(DatabaseType::MySQL.uses_credentials());
        assert!(!DatabaseType::SQLite.uses_credentials());
    }
}
