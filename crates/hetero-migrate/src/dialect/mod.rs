//! Canonical type system and per-engine type dialects.

pub mod canonical;
pub mod mssql;
pub mod mysql;
pub mod postgres;

pub use canonical::{CanonicalInfo, CanonicalKind, CanonicalType, TypeDialect, TypeMapping};
pub use mssql::MssqlDialect;
pub use mysql::{is_valid_native_type, MysqlDialect};
pub use postgres::PostgresDialect;

static POSTGRES: PostgresDialect = PostgresDialect;
static MSSQL: MssqlDialect = MssqlDialect;
static MYSQL: MysqlDialect = MysqlDialect;

/// Look up the type dialect for an engine name.
pub fn type_dialect(engine: &str) -> Option<&'static dyn TypeDialect> {
    match engine {
        "postgres" => Some(&POSTGRES),
        "mssql" => Some(&MSSQL),
        "mysql" => Some(&MYSQL),
        _ => None,
    }
}
