//! Decoding of sqlx rows into driver-level [`RawRows`].
//!
//! Decoding is two-phase:
//! 1. `TypeCategory` classifies each column's reported type name
//! 2. database-specific decoders extract the value into a [`Value`]
//!
//! Exact numerics (DECIMAL/NUMERIC) and temporal values are surfaced as text
//! so no precision or zone information is lost on the way out.

use crate::db::driver::RawRows;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, Value};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Row, Type, TypeInfo, ValueRef};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    UnsignedInteger,
    Float,
    Decimal,
    Boolean,
    Temporal,
    Binary,
    Json,
    Uuid,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC is actually a float
        if db == DatabaseType::SQLite && lower == "numeric" {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower == "interval" || lower == "point" {
        return TypeCategory::Unknown;
    }

    if lower.contains("unsigned") {
        return TypeCategory::UnsignedInteger;
    }

    if lower.contains("int") || lower.contains("serial") || lower.contains("tiny") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    if lower.starts_with("timestamp")
        || lower.starts_with("datetime")
        || lower == "date"
        || lower == "time"
        || lower == "timetz"
    {
        return TypeCategory::Temporal;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    // UUID (PostgreSQL)
    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    // varchar, text, char, enum, ...
    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Raw DECIMAL/NUMERIC value in its exact textual form.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("NUMERIC")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => Ok(RawDecimal(pg_numeric_to_string(value.as_bytes()?)?)),
        }
    }
}

const PG_NUMERIC_NEG: u16 = 0x4000;
const PG_NUMERIC_NAN: u16 = 0xC000;

/// Render PostgreSQL's binary NUMERIC (base-10000 digit groups) as text.
fn pg_numeric_to_string(buf: &[u8]) -> Result<String, sqlx::error::BoxDynError> {
    let read_u16 = |at: usize| -> Result<u16, sqlx::error::BoxDynError> {
        buf.get(at..at + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated NUMERIC value".into())
    };

    let ndigits = read_u16(0)? as usize;
    let weight = read_u16(2)? as i16 as i32;
    let sign = read_u16(4)?;
    let dscale = read_u16(6)? as usize;

    if sign == PG_NUMERIC_NAN {
        return Ok("NaN".to_string());
    }

    let digits = (0..ndigits)
        .map(|i| read_u16(8 + i * 2))
        .collect::<Result<Vec<_>, _>>()?;
    let digit_at = |pos: i32| -> u16 {
        usize::try_from(pos)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == PG_NUMERIC_NEG {
        out.push('-');
    }

    if weight < 0 {
        out.push('0');
    } else {
        for pos in 0..=weight {
            let group = digit_at(pos);
            if pos == 0 {
                out.push_str(&group.to_string());
            } else {
                out.push_str(&format!("{:04}", group));
            }
        }
    }

    if dscale > 0 {
        let mut fraction = String::new();
        let mut pos = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit_at(pos)));
            pos += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }

    Ok(out)
}

// =============================================================================
// Row Conversion
// =============================================================================

/// Conversion of a driver row into column names and raw values.
pub trait RowToValues {
    fn column_names(&self) -> Vec<String>;
    fn to_values(&self) -> DbResult<Vec<Value>>;
}

macro_rules! impl_row_to_values {
    ($row:ty, $db:expr, $decoder:ident) => {
        impl RowToValues for $row {
            fn column_names(&self) -> Vec<String> {
                self.columns()
                    .iter()
                    .map(|col| col.name().to_string())
                    .collect()
            }

            /// Only SQL NULL becomes [`Value::Null`]; a present value no
            /// decoder accepts is an error.
            fn to_values(&self) -> DbResult<Vec<Value>> {
                self.columns()
                    .iter()
                    .enumerate()
                    .map(|(idx, col)| {
                        if self.try_get_raw(idx)?.is_null() {
                            return Ok(Value::Null);
                        }
                        let type_name = col.type_info().name();
                        let category = categorize_type(type_name, $db);
                        $decoder::decode_column(self, idx, category).ok_or_else(|| {
                            DbError::invalid_type(
                                col.name(),
                                "decodable value",
                                format!("undecodable {}", type_name),
                            )
                        })
                    })
                    .collect()
            }
        }
    };
}

impl_row_to_values!(MySqlRow, DatabaseType::MySQL, mysql);
impl_row_to_values!(PgRow, DatabaseType::PostgreSQL, postgres);
impl_row_to_values!(SqliteRow, DatabaseType::SQLite, sqlite);

/// Collect fetched rows into [`RawRows`].
///
/// Column names come from the first row; an empty result has no columns.
pub fn raw_rows<R: RowToValues>(rows: &[R]) -> DbResult<RawRows> {
    let mut raw = RawRows::new(rows.first().map(|r| r.column_names()).unwrap_or_default());
    for row in rows {
        raw.push(row.to_values()?)?;
    }
    Ok(raw)
}

// =============================================================================
// Shared Decoders
// =============================================================================
//
// Decoders run on non-NULL values only. `None` means the value does not fit
// the tried type and the next fallback should run.

fn decode_boolean<'r, R>(row: &'r R, idx: usize) -> Option<Value>
where
    R: Row,
    usize: ColumnIndex<R>,
    bool: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<bool, _>(idx).ok().map(Value::Bool)
}

fn decode_float<'r, R>(row: &'r R, idx: usize) -> Option<Value>
where
    R: Row,
    usize: ColumnIndex<R>,
    f64: Decode<'r, R::Database> + Type<R::Database>,
    f32: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<f64, _>(idx)
        .or_else(|_| row.try_get::<f32, _>(idx).map(f64::from))
        .ok()
        .map(Value::Float)
}

fn decode_binary<'r, R>(row: &'r R, idx: usize) -> Option<Value>
where
    R: Row,
    usize: ColumnIndex<R>,
    Vec<u8>: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<Vec<u8>, _>(idx).ok().map(Value::Bytes)
}

/// Temporal columns are rendered as RFC 3339 / ISO 8601 text.
fn decode_temporal<'r, R>(row: &'r R, idx: usize) -> Option<Value>
where
    R: Row,
    usize: ColumnIndex<R>,
    DateTime<Utc>: Decode<'r, R::Database> + Type<R::Database>,
    NaiveDateTime: Decode<'r, R::Database> + Type<R::Database>,
    NaiveDate: Decode<'r, R::Database> + Type<R::Database>,
    NaiveTime: Decode<'r, R::Database> + Type<R::Database>,
{
    if let Ok(t) = row.try_get::<DateTime<Utc>, _>(idx) {
        return Some(Value::Text(t.to_rfc3339()));
    }
    if let Ok(t) = row.try_get::<NaiveDateTime, _>(idx) {
        return Some(Value::Text(t.format("%Y-%m-%d %H:%M:%S%.f").to_string()));
    }
    if let Ok(d) = row.try_get::<NaiveDate, _>(idx) {
        return Some(Value::Text(d.to_string()));
    }
    row.try_get::<NaiveTime, _>(idx)
        .ok()
        .map(|t| Value::Text(t.to_string()))
}

fn decode_text<'r, R>(row: &'r R, idx: usize) -> Option<Value>
where
    R: Row,
    usize: ColumnIndex<R>,
    String: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<String, _>(idx).ok().map(Value::Text)
}

fn decode_json<'r, R>(row: &'r R, idx: usize) -> Option<Value>
where
    R: Row,
    usize: ColumnIndex<R>,
    serde_json::Value: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<serde_json::Value, _>(idx)
        .ok()
        .map(|json| Value::Text(json.to_string()))
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod mysql {
    use super::*;

    /// Typed decode by category, then text, then raw bytes. MySQL reports
    /// binary-collated strings as text types, which only the bytes path reads.
    pub fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> Option<Value> {
        let typed = match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::UnsignedInteger => decode_unsigned(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Temporal => decode_temporal(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Uuid | TypeCategory::Unknown => None,
        };
        typed
            .or_else(|| decode_text(row, idx))
            .or_else(|| decode_binary(row, idx))
    }

    fn decode_decimal(row: &MySqlRow, idx: usize) -> Option<Value> {
        row.try_get::<RawDecimal, _>(idx)
            .ok()
            .map(|v| Value::Text(v.0))
    }

    fn decode_integer(row: &MySqlRow, idx: usize) -> Option<Value> {
        if let Ok(v) = row.try_get::<i8, _>(idx) {
            return Some(Value::Int(v.into()));
        }
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return Some(Value::Int(v.into()));
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return Some(Value::Int(v.into()));
        }
        if let Ok(v) = row.try_get::<i64, _>(idx) {
            return Some(Value::Int(v));
        }
        decode_unsigned(row, idx)
    }

    fn decode_unsigned(row: &MySqlRow, idx: usize) -> Option<Value> {
        if let Ok(v) = row.try_get::<u8, _>(idx) {
            return Some(Value::UInt(v.into()));
        }
        if let Ok(v) = row.try_get::<u16, _>(idx) {
            return Some(Value::UInt(v.into()));
        }
        if let Ok(v) = row.try_get::<u32, _>(idx) {
            return Some(Value::UInt(v.into()));
        }
        row.try_get::<u64, _>(idx).ok().map(Value::UInt)
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, category: TypeCategory) -> Option<Value> {
        let typed = match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer | TypeCategory::UnsignedInteger => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Temporal => decode_temporal(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Uuid => decode_uuid(row, idx),
            TypeCategory::Unknown => None,
        };
        typed
            .or_else(|| decode_text(row, idx))
            .or_else(|| decode_binary(row, idx))
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> Option<Value> {
        row.try_get::<RawDecimal, _>(idx)
            .ok()
            .map(|v| Value::Text(v.0))
    }

    fn decode_integer(row: &PgRow, idx: usize) -> Option<Value> {
        if let Ok(v) = row.try_get::<i16, _>(idx) {
            return Some(Value::Int(v.into()));
        }
        if let Ok(v) = row.try_get::<i32, _>(idx) {
            return Some(Value::Int(v.into()));
        }
        row.try_get::<i64, _>(idx).ok().map(Value::Int)
    }

    fn decode_uuid(row: &PgRow, idx: usize) -> Option<Value> {
        row.try_get::<sqlx::types::Uuid, _>(idx)
            .ok()
            .map(|id| Value::Text(id.to_string()))
    }
}

mod sqlite {
    use super::*;

    /// Declared types are only affinities in SQLite, so a value whose
    /// storage class does not match falls back to [`decode_dynamic`].
    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> Option<Value> {
        let typed = match category {
            TypeCategory::Integer | TypeCategory::UnsignedInteger => {
                row.try_get::<i64, _>(idx).ok().map(Value::Int)
            }
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float | TypeCategory::Decimal => decode_float(row, idx),
            TypeCategory::Temporal => decode_temporal(row, idx),
            TypeCategory::Binary => decode_binary(row, idx),
            _ => None,
        };
        typed.or_else(|| decode_dynamic(row, idx))
    }

    /// Expression columns report the storage class of the value, so try
    /// each in turn.
    fn decode_dynamic(row: &SqliteRow, idx: usize) -> Option<Value> {
        decode_text(row, idx)
            .or_else(|| row.try_get::<i64, _>(idx).ok().map(Value::Int))
            .or_else(|| row.try_get::<f64, _>(idx).ok().map(Value::Float))
            .or_else(|| decode_binary(row, idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(
            categorize_type("INT", DatabaseType::MySQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("BIGINT", DatabaseType::PostgreSQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("TINYINT", DatabaseType::MySQL),
            TypeCategory::Integer
        );
        assert_eq!(
            categorize_type("BIGINT UNSIGNED", DatabaseType::MySQL),
            TypeCategory::UnsignedInteger
        );
        assert_eq!(
            categorize_type("INTERVAL", DatabaseType::PostgreSQL),
            TypeCategory::Unknown
        );
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(
            categorize_type("DECIMAL", DatabaseType::MySQL),
            TypeCategory::Decimal
        );
        assert_eq!(
            categorize_type("NUMERIC", DatabaseType::PostgreSQL),
            TypeCategory::Decimal
        );
        // SQLite NUMERIC is a float
        assert_eq!(
            categorize_type("numeric", DatabaseType::SQLite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_categorize_type_temporal() {
        for name in ["TIMESTAMPTZ", "TIMESTAMP", "DATETIME", "DATE", "TIME"] {
            assert_eq!(
                categorize_type(name, DatabaseType::PostgreSQL),
                TypeCategory::Temporal,
                "{name}"
            );
        }
        assert_eq!(
            categorize_type("VARCHAR", DatabaseType::MySQL),
            TypeCategory::Unknown
        );
    }

    #[test]
    fn test_categorize_type_json_and_binary() {
        assert_eq!(
            categorize_type("jsonb", DatabaseType::PostgreSQL),
            TypeCategory::Json
        );
        assert_eq!(
            categorize_type("VARBINARY", DatabaseType::MySQL),
            TypeCategory::Binary
        );
        assert_eq!(
            categorize_type("BYTEA", DatabaseType::PostgreSQL),
            TypeCategory::Binary
        );
    }

    fn numeric(ndigits: u16, weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut buf = Vec::new();
        for v in [ndigits, weight as u16, sign, dscale] {
            buf.extend_from_slice(&v.to_be_bytes());
        }
        for d in digits {
            buf.extend_from_slice(&d.to_be_bytes());
        }
        buf
    }

    #[test]
    fn test_pg_numeric_to_string() {
        // 12345.678
        let buf = numeric(3, 1, 0, 3, &[1, 2345, 6780]);
        assert_eq!(pg_numeric_to_string(&buf).unwrap(), "12345.678");

        // -0.05
        let buf = numeric(1, -1, PG_NUMERIC_NEG, 2, &[500]);
        assert_eq!(pg_numeric_to_string(&buf).unwrap(), "-0.05");

        // 10000 with trailing zero groups elided
        let buf = numeric(1, 1, 0, 0, &[1]);
        assert_eq!(pg_numeric_to_string(&buf).unwrap(), "10000");

        let buf = numeric(0, 0, PG_NUMERIC_NAN, 0, &[]);
        assert_eq!(pg_numeric_to_string(&buf).unwrap(), "NaN");

        assert!(pg_numeric_to_string(&[0, 1]).is_err());
    }
}
