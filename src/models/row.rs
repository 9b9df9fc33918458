//! Row and column model for decoded query results.
//!
//! Drivers hand back values whose dynamic type depends on the backend and on
//! whether the value travelled over the text or the binary protocol. Each
//! value is classified once into [`Value`] when the row is decoded, and the
//! `get_*` accessors project it into the type the caller asks for.

use crate::error::{DbError, DbResult};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashMap;

/// A single untyped column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bool(bool),
    Bytes(Vec<u8>),
}

impl Value {
    /// Name of the value kind, used in coercion errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int(_) => "int64",
            Self::UInt(_) => "uint64",
            Self::Float(_) => "float64",
            Self::Text(_) => "string",
            Self::Bool(_) => "bool",
            Self::Bytes(_) => "bytes",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Null, an empty string, or an empty buffer.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Text(s) => s.is_empty(),
            Self::Bytes(b) => b.is_empty(),
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Self::Null)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use base64::{Engine as _, engine::general_purpose::STANDARD};

        match self {
            Self::Null => serializer.serialize_none(),
            Self::Int(v) => serializer.serialize_i64(*v),
            Self::UInt(v) => serializer.serialize_u64(*v),
            Self::Float(v) => serializer.serialize_f64(*v),
            Self::Text(v) => serializer.serialize_str(v),
            Self::Bool(v) => serializer.serialize_bool(*v),
            Self::Bytes(v) => serializer.serialize_str(&STANDARD.encode(v)),
        }
    }
}

/// A named column value with type coercion.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    value: Value,
}

impl Column {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Coerce to a signed 64-bit integer.
    ///
    /// Accepts any numeric kind that fits and textual integers (including
    /// UTF-8 byte buffers, as produced by text protocols).
    pub fn get_int64(&self) -> DbResult<Option<i64>> {
        const EXPECTED: &str = "int64";
        match &self.value {
            Value::Null => Ok(None),
            Value::Int(v) => Ok(Some(*v)),
            Value::UInt(v) => i64::try_from(*v)
                .map(Some)
                .map_err(|_| self.invalid(EXPECTED, "uint64 out of range")),
            Value::Float(v) => integral_f64(*v, i64::MIN as f64, i64::MAX as f64)
                .map(|v| Some(v as i64))
                .ok_or_else(|| self.invalid(EXPECTED, "non-integral float64")),
            Value::Text(s) => self.parse(s, EXPECTED).map(Some),
            Value::Bytes(b) => self.parse(self.utf8(b, EXPECTED)?, EXPECTED).map(Some),
            Value::Bool(_) => Err(self.invalid(EXPECTED, self.value.kind())),
        }
    }

    /// Coerce to an unsigned 64-bit integer, rejecting negative values.
    pub fn get_uint64(&self) -> DbResult<Option<u64>> {
        const EXPECTED: &str = "uint64";
        match &self.value {
            Value::Null => Ok(None),
            Value::Int(v) => u64::try_from(*v)
                .map(Some)
                .map_err(|_| self.invalid(EXPECTED, "negative int64")),
            Value::UInt(v) => Ok(Some(*v)),
            Value::Float(v) => integral_f64(*v, 0.0, u64::MAX as f64)
                .map(|v| Some(v as u64))
                .ok_or_else(|| self.invalid(EXPECTED, "negative or non-integral float64")),
            Value::Text(s) => self.parse(s, EXPECTED).map(Some),
            Value::Bytes(b) => self.parse(self.utf8(b, EXPECTED)?, EXPECTED).map(Some),
            Value::Bool(_) => Err(self.invalid(EXPECTED, self.value.kind())),
        }
    }

    pub fn get_float64(&self) -> DbResult<Option<f64>> {
        const EXPECTED: &str = "float64";
        match &self.value {
            Value::Null => Ok(None),
            Value::Int(v) => Ok(Some(*v as f64)),
            Value::UInt(v) => Ok(Some(*v as f64)),
            Value::Float(v) => Ok(Some(*v)),
            Value::Text(s) => self.parse(s, EXPECTED).map(Some),
            Value::Bytes(b) => self.parse(self.utf8(b, EXPECTED)?, EXPECTED).map(Some),
            Value::Bool(_) => Err(self.invalid(EXPECTED, self.value.kind())),
        }
    }

    /// Strings come from text values or from UTF-8 byte buffers.
    pub fn get_string(&self) -> DbResult<Option<&str>> {
        match &self.value {
            Value::Null => Ok(None),
            Value::Text(s) => Ok(Some(s.as_str())),
            Value::Bytes(b) => self.utf8(b, "string").map(Some),
            other => Err(self.invalid("string", other.kind())),
        }
    }

    /// Booleans are taken as-is; anything else must coerce to an integer,
    /// where nonzero means true.
    pub fn get_bool(&self) -> DbResult<Option<bool>> {
        match &self.value {
            Value::Null => Ok(None),
            Value::Bool(v) => Ok(Some(*v)),
            other => match self.get_int64() {
                Ok(v) => Ok(v.map(|v| v != 0)),
                Err(_) => Err(self.invalid("bool", other.kind())),
            },
        }
    }

    pub fn get_buffer(&self) -> DbResult<Option<&[u8]>> {
        match &self.value {
            Value::Null => Ok(None),
            Value::Bytes(b) => Ok(Some(b.as_slice())),
            Value::Text(s) => Ok(Some(s.as_bytes())),
            other => Err(self.invalid("bytes", other.kind())),
        }
    }

    fn invalid(&self, expected: &'static str, found: &str) -> DbError {
        DbError::invalid_type(&self.name, expected, found)
    }

    fn utf8<'a>(&self, bytes: &'a [u8], expected: &'static str) -> DbResult<&'a str> {
        std::str::from_utf8(bytes).map_err(|_| self.invalid(expected, "non-utf8 bytes"))
    }

    fn parse<T: std::str::FromStr>(&self, s: &str, expected: &'static str) -> DbResult<T> {
        s.trim()
            .parse::<T>()
            .map_err(|_| self.invalid(expected, &format!("string {:?}", s)))
    }
}

fn integral_f64(v: f64, min: f64, max_exclusive: f64) -> Option<f64> {
    (v.fract() == 0.0 && v >= min && v < max_exclusive).then_some(v)
}

/// One decoded result row: columns keyed by their unique names.
///
/// Column order follows the driver, but equality ignores it.
#[derive(Debug, Clone, Default)]
pub struct Row {
    columns: Vec<Column>,
    /// Column name to position in `columns`.
    index: HashMap<String, usize>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// A later column with the same name replaces the earlier one in place.
    pub(crate) fn insert(&mut self, column: Column) {
        match self.index.get(&column.name) {
            Some(&pos) => self.columns[pos] = column,
            None => {
                self.index.insert(column.name.clone(), self.columns.len());
                self.columns.push(column);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name())
    }

    pub fn get(&self, name: &str) -> Option<&Column> {
        self.index.get(name).map(|&pos| &self.columns[pos])
    }

    pub fn get_int64(&self, name: &str) -> DbResult<Option<i64>> {
        self.get(name).map_or(Ok(None), Column::get_int64)
    }

    pub fn get_uint64(&self, name: &str) -> DbResult<Option<u64>> {
        self.get(name).map_or(Ok(None), Column::get_uint64)
    }

    pub fn get_float64(&self, name: &str) -> DbResult<Option<f64>> {
        self.get(name).map_or(Ok(None), Column::get_float64)
    }

    pub fn get_string(&self, name: &str) -> DbResult<Option<&str>> {
        self.get(name).map_or(Ok(None), Column::get_string)
    }

    pub fn get_bool(&self, name: &str) -> DbResult<Option<bool>> {
        self.get(name).map_or(Ok(None), Column::get_bool)
    }

    pub fn get_buffer(&self, name: &str) -> DbResult<Option<&[u8]>> {
        self.get(name).map_or(Ok(None), Column::get_buffer)
    }

    // Required accessors: a missing column, a null value and an empty value
    // all fail with the same error.

    pub fn get_int64_required(&self, name: &str) -> DbResult<i64> {
        self.required(name)?
            .get_int64()?
            .ok_or_else(|| DbError::required_empty(name))
    }

    pub fn get_uint64_required(&self, name: &str) -> DbResult<u64> {
        self.required(name)?
            .get_uint64()?
            .ok_or_else(|| DbError::required_empty(name))
    }

    pub fn get_float64_required(&self, name: &str) -> DbResult<f64> {
        self.required(name)?
            .get_float64()?
            .ok_or_else(|| DbError::required_empty(name))
    }

    pub fn get_string_required(&self, name: &str) -> DbResult<&str> {
        self.required(name)?
            .get_string()?
            .ok_or_else(|| DbError::required_empty(name))
    }

    pub fn get_bool_required(&self, name: &str) -> DbResult<bool> {
        self.required(name)?
            .get_bool()?
            .ok_or_else(|| DbError::required_empty(name))
    }

    pub fn get_buffer_required(&self, name: &str) -> DbResult<&[u8]> {
        self.required(name)?
            .get_buffer()?
            .ok_or_else(|| DbError::required_empty(name))
    }

    fn required(&self, name: &str) -> DbResult<&Column> {
        self.get(name)
            .filter(|c| !c.value.is_empty())
            .ok_or_else(|| DbError::required_empty(name))
    }
}

impl FromIterator<Column> for Row {
    fn from_iter<I: IntoIterator<Item = Column>>(iter: I) -> Self {
        let mut row = Row::new();
        for column in iter {
            row.insert(column);
        }
        row
    }
}

impl PartialEq for Row {
    fn eq(&self, other: &Self) -> bool {
        self.columns.len() == other.columns.len()
            && self
                .columns
                .iter()
                .all(|c| other.get(&c.name).is_some_and(|o| o == c))
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for column in &self.columns {
            map.serialize_entry(&column.name, &column.value)?;
        }
        map.end()
    }
}
