//! Parameter binding for sqlx queries.
//!
//! Binds `QueryParam` values positionally onto database-specific query
//! objects. [`BindParams`] lets dispatch code bind a whole parameter list
//! without naming the backend.

use crate::models::QueryParam;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{MySql, Postgres, Sqlite};

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    param: &'q QueryParam,
) -> Query<'q, MySql, MySqlArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
        QueryParam::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a PostgreSQL query.
pub(crate) fn bind_postgres_param<'q>(
    query: Query<'q, Postgres, PgArguments>,
    param: &'q QueryParam,
) -> Query<'q, Postgres, PgArguments> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
        QueryParam::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q QueryParam,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match param {
        QueryParam::Null => query.bind(None::<String>),
        QueryParam::Bool(v) => query.bind(*v),
        QueryParam::Int(v) => query.bind(*v),
        QueryParam::Float(v) => query.bind(*v),
        QueryParam::String(v) => query.bind(v.as_str()),
        QueryParam::Bytes(v) => query.bind(v.as_slice()),
        // SQLite doesn't have native JSON type, store as string
        QueryParam::Json(v) => query.bind(v.to_string()),
    }
}

/// Bind a full positional parameter list onto a query.
pub(crate) trait BindParams<'q>: Sized {
    fn bind_params(self, params: &'q [QueryParam]) -> Self;
}

impl<'q> BindParams<'q> for Query<'q, MySql, MySqlArguments> {
    fn bind_params(self, params: &'q [QueryParam]) -> Self {
        params.iter().fold(self, bind_mysql_param)
    }
}

impl<'q> BindParams<'q> for Query<'q, Postgres, PgArguments> {
    fn bind_params(self, params: &'q [QueryParam]) -> Self {
        params.iter().fold(self, bind_postgres_param)
    }
}

impl<'q> BindParams<'q> for Query<'q, Sqlite, SqliteArguments<'q>> {
    fn bind_params(self, params: &'q [QueryParam]) -> Self {
        params.iter().fold(self, bind_sqlite_param)
    }
}
