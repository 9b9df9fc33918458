//! Backend dispatch macro.
//!
//! Pools and pooled connections are enums with one variant per backend. The
//! macro expands a match over those variants so each arm is type-checked
//! against its own concrete sqlx type, with no runtime overhead.

/// Match on a backend enum (`DbPool` or `DbConnection`).
///
/// Either spell out one arm per backend, or give a single body that is
/// repeated for every variant:
///
/// ```ignore
/// impl_db_dispatch!(DbPool, pool, {
///     MySql(p) => do_mysql(p),
///     Postgres(p) => do_postgres(p),
///     SQLite(p) => do_sqlite(p),
/// });
///
/// impl_db_dispatch!(DbConnection, conn, |c| c.ping().await);
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($kind:ident, $value:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $value {
            $(
                $kind::$variant($p) => $body,
            )+
        }
    };
    ($kind:ident, $value:expr, |$p:ident| $body:expr) => {
        match $value {
            $kind::MySql($p) => $body,
            $kind::Postgres($p) => $body,
            $kind::SQLite($p) => $body,
        }
    };
}

pub use impl_db_dispatch;
