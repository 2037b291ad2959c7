//! Error types for the migration pipeline.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, bad flag values).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cannot reach the source or target database.
    #[error("Connection to {engine} failed: {message}")]
    Connect { engine: String, message: String },

    /// Extraction found inconsistent catalog data for one table.
    #[error("Schema error for table {table}: {message}")]
    Schema { table: String, message: String },

    /// A mapping is invalid (unknown canonical type, missing column, ...).
    /// Non-fatal during propose; fatal during apply-schema and migrate.
    #[error("Mapping error for table {table}: {message}")]
    Mapping { table: String, message: String },

    /// The target rejected a DDL statement.
    #[error("DDL rejected for table {table}: {message}")]
    Ddl { table: String, message: String },

    /// A chunk-level load failure. Rows are routed to the DLQ and the
    /// migration continues; this surfaces only when a table must abort.
    #[error("Load failed for table {table} ({kind}): {message}")]
    Load {
        table: String,
        kind: LoadErrorKind,
        message: String,
    },

    /// Migration finished but rows were diverted to the DLQ.
    #[error("Migration aborted for {table}: {dlq_rows} row(s) in dead letter queue")]
    MigrationAborted { table: String, dlq_rows: u64 },

    /// Validator-level failure; the stage completes and reports.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// LLM client failure (network, rate limit, unparseable response).
    #[error("LLM error: {0}")]
    Llm(String),

    /// PostgreSQL driver error.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// MSSQL driver error.
    #[error("MSSQL error: {0}")]
    Mssql(#[from] tiberius::error::Error),

    /// MySQL driver error.
    #[error("MySQL error: {0}")]
    Mysql(#[from] mysql_async::Error),

    /// IO error (artifact files, checkpoints, DLQ).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parse error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Cooperative cancellation (SIGINT/SIGTERM). Never a corruption hazard:
    /// the in-flight chunk completes and checkpoints before exit.
    #[error("Migration cancelled")]
    Cancelled,
}

/// Classification of a failed row or chunk, recorded in the DLQ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadErrorKind {
    ConstraintViolation,
    TypeConversion,
    Encoding,
    Unknown,
}

impl std::fmt::Display for LoadErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LoadErrorKind::ConstraintViolation => "constraint_violation",
            LoadErrorKind::TypeConversion => "type_conversion",
            LoadErrorKind::Encoding => "encoding",
            LoadErrorKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl MigrateError {
    /// Create a Connect error.
    pub fn connect(engine: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Connect {
            engine: engine.into(),
            message: message.into(),
        }
    }

    /// Create a Schema error for a specific table.
    pub fn schema(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Schema {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Mapping error for a specific table.
    pub fn mapping(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Mapping {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Create a Ddl error for a specific table.
    pub fn ddl(table: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Ddl {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error.
    ///
    /// 2 = configuration, 3 = validation failure, 4 = migration aborted
    /// with DLQ contents, 5 = unrecoverable engine error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 2,
            MigrateError::Validation(_) => 3,
            MigrateError::MigrationAborted { .. } => 4,
            MigrateError::Connect { .. }
            | MigrateError::Ddl { .. }
            | MigrateError::Postgres(_)
            | MigrateError::Mssql(_)
            | MigrateError::Mysql(_) => 5,
            _ => 1,
        }
    }

    /// Format error with the full source chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}", self);
        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }
        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::Config("bad".into()).exit_code(), 2);
        assert_eq!(MigrateError::Validation("mismatch".into()).exit_code(), 3);
        assert_eq!(
            MigrateError::MigrationAborted {
                table: "users".into(),
                dlq_rows: 1
            }
            .exit_code(),
            4
        );
        assert_eq!(MigrateError::connect("mysql", "refused").exit_code(), 5);
        assert_eq!(MigrateError::Cancelled.exit_code(), 1);
    }

    #[test]
    fn test_load_error_kind_display() {
        assert_eq!(
            LoadErrorKind::ConstraintViolation.to_string(),
            "constraint_violation"
        );
        assert_eq!(LoadErrorKind::TypeConversion.to_string(), "type_conversion");
        assert_eq!(LoadErrorKind::Encoding.to_string(), "encoding");
        assert_eq!(LoadErrorKind::Unknown.to_string(), "unknown");
    }
}
