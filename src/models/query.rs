//! Statement parameters and operation results.

use crate::models::Row;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A positional parameter bound to a `?` marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    Float(f64),
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    Json(JsonValue),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }

    /// Parse a command-line parameter: integers, floats, `true`/`false` and
    /// `null` are recognized, anything else is bound as a string.
    pub fn parse_literal(s: &str) -> Self {
        if s.eq_ignore_ascii_case("null") {
            Self::Null
        } else if let Ok(v) = s.parse::<i64>() {
            Self::Int(v)
        } else if let Ok(v) = s.parse::<f64>() {
            Self::Float(v)
        } else if let Ok(v) = s.parse::<bool>() {
            Self::Bool(v)
        } else {
            Self::String(s.to_string())
        }
    }
}

impl From<i64> for QueryParam {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for QueryParam {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<u32> for QueryParam {
    fn from(v: u32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for QueryParam {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for QueryParam {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for QueryParam {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for QueryParam {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Vec<u8>> for QueryParam {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<JsonValue> for QueryParam {
    fn from(v: JsonValue) -> Self {
        Self::Json(v)
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

/// Build a `Vec<QueryParam>` from heterogeneous values.
///
/// ```ignore
/// let params = params![10, "alice", None::<i64>];
/// ```
#[macro_export]
macro_rules! params {
    () => { ::std::vec::Vec::<$crate::models::QueryParam>::new() };
    ($($value:expr),+ $(,)?) => {
        vec![$($crate::models::QueryParam::from($value)),+]
    };
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Outcome of a select or execute call.
///
/// Reads fill `rows` and leave `affected_rows` at 0; writes do the opposite.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub affected_rows: u64,
    pub rows: Vec<Row>,
}

impl QueryResult {
    /// Create a result for read operations.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self {
            affected_rows: 0,
            rows,
        }
    }

    /// Create a result for write operations (INSERT/UPDATE/DELETE).
    pub fn write_result(affected_rows: u64) -> Self {
        Self {
            affected_rows,
            rows: Vec::new(),
        }
    }

    /// Get the number of rows in the result.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Take the single row of the result.
    ///
    /// Zero rows gives `None`; more than one is an error.
    pub fn into_unique(self) -> crate::error::DbResult<Option<Row>> {
        match self.rows.len() {
            0 | 1 => Ok(self.rows.into_iter().next()),
            n => Err(crate::error::DbError::unexpected_record_count(
                "at most 1", n,
            )),
        }
    }
}
