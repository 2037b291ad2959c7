//! Connector traits: the only boundary between the pipeline core and
//! engine-specific code.
//!
//! Every engine driver exposes the same capability set. Sources stream
//! schema and data out; targets accept DDL and bulk loads. The migrator,
//! validator and extractor are written purely against these traits.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::core::schema::TableSpec;
use crate::core::value::{Row, SqlValue};
use crate::error::{LoadErrorKind, Result};

/// A `schema.table` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: String,
    pub name: String,
}

impl TableRef {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for TableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Cursor for keyset pagination over a single integer PK.
#[derive(Debug, Clone)]
pub struct KeysetCursor {
    /// PK column name.
    pub column: String,
    /// Last key already loaded (exclusive lower bound).
    pub last: i64,
}

/// One chunked read request.
///
/// Ordering over `order_by` must be deterministic so that OFFSET-based
/// resumption never re-reads or skips rows. When `after_key` is set the
/// connector uses `WHERE pk > last ORDER BY pk` instead of OFFSET, which
/// stays correct under concurrent source writes; OFFSET resumption over a
/// PK-less table is fragile if the source is being written concurrently.
#[derive(Debug, Clone)]
pub struct ChunkQuery {
    pub table: TableRef,
    pub columns: Vec<String>,
    pub order_by: Vec<String>,
    pub chunk_size: usize,
    pub offset: i64,
    pub after_key: Option<KeysetCursor>,
}

/// Aggregate functions used by validator L2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Sum,
    Min,
    Max,
    CountDistinct,
}

/// Per-column statistics collected by the extractor's stats pass.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ColumnStats {
    pub null_rate: Option<f64>,
    pub distinct_count: Option<i64>,
    pub min: Option<String>,
    pub max: Option<String>,
}

/// Sampling request for L3 sample-hash validation.
#[derive(Debug, Clone)]
pub struct SampleSpec {
    /// Key columns identifying each sampled row.
    pub pk_columns: Vec<String>,
    /// Columns to hash, in mapping order.
    pub columns: Vec<String>,
    /// Number of rows to sample.
    pub sample_rows: usize,
    /// RNG seed; both sides must use the same seed.
    pub seed: u64,
}

/// One sampled row: its key and the hash over its column values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyHash {
    pub key: String,
    pub hash: String,
}

/// A single failed row from a bulk load.
#[derive(Debug, Clone)]
pub struct RowError {
    /// Index of the row within the submitted batch.
    pub row_index: usize,
    pub kind: LoadErrorKind,
    pub detail: String,
}

/// Outcome of a bulk load attempt.
///
/// On a batch-level constraint failure the connector must narrow to
/// per-row retries so that successful rows still land; the failures come
/// back in `per_row_errors`.
#[derive(Debug, Clone, Default)]
pub struct BulkLoadOutcome {
    pub inserted: u64,
    pub per_row_errors: Vec<RowError>,
}

/// Canonical key string for a row's PK values (joined with `|`).
pub fn encode_key(pk_values: &[SqlValue]) -> String {
    pk_values
        .iter()
        .map(SqlValue::canonical_encoding)
        .collect::<Vec<_>>()
        .join("|")
}

/// Deterministic hash over a row's canonical-encoded column values.
/// Both sides of a migration compute this with the same function.
pub fn hash_row(values: &[SqlValue]) -> String {
    let mut hasher = Sha256::new();
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(value.canonical_encoding().as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Read-side capability set every source engine implements.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Engine identifier (`postgres`, `mssql`).
    fn engine(&self) -> &'static str;

    /// Introspect the catalog. Column order matches storage order; the
    /// canonical type of every column is already resolved.
    async fn list_tables(&self, schema: &str) -> Result<Vec<TableSpec>>;

    /// Exact row count via `COUNT(*)`.
    async fn row_count(&self, table: &TableRef) -> Result<i64>;

    /// Fetch one chunk of rows. Restartable: the same query with the same
    /// offset (or cursor) returns the same rows on a quiescent source.
    async fn fetch_chunk(&self, query: &ChunkQuery) -> Result<Vec<Row>>;

    /// Run an aggregate over one column.
    async fn aggregate(
        &self,
        table: &TableRef,
        column: &str,
        func: AggregateFn,
    ) -> Result<SqlValue>;

    /// Hash a seeded uniform sample of rows. See [`hash_row`].
    async fn sample_hash(&self, table: &TableRef, spec: &SampleSpec) -> Result<Vec<KeyHash>>;

    /// Cheap per-column statistics for the stats artifact.
    async fn column_stats(
        &self,
        table: &TableRef,
        columns: &[String],
    ) -> Result<BTreeMap<String, ColumnStats>>;

    /// Close the connection pool.
    async fn close(&self);
}

/// Write-side capability set every target engine implements.
#[async_trait]
pub trait TargetConnector: Send + Sync {
    /// Engine identifier (`mysql`).
    fn engine(&self) -> &'static str;

    /// Execute a single DDL statement.
    async fn exec_ddl(&self, statement: &str) -> Result<()>;

    /// Insert a batch of rows, narrowing to per-row retries on failure.
    async fn bulk_load(
        &self,
        table: &TableRef,
        columns: &[String],
        rows: Vec<Row>,
    ) -> Result<BulkLoadOutcome>;

    /// Exact row count via `COUNT(*)`.
    async fn row_count(&self, table: &TableRef) -> Result<i64>;

    /// Run an aggregate over one column.
    async fn aggregate(
        &self,
        table: &TableRef,
        column: &str,
        func: AggregateFn,
    ) -> Result<SqlValue>;

    /// Hash a seeded uniform sample of rows. See [`hash_row`].
    async fn sample_hash(&self, table: &TableRef, spec: &SampleSpec) -> Result<Vec<KeyHash>>;

    /// Enable or disable FK enforcement for subsequent loads. Returns
    /// whether the engine actually supports toggling.
    async fn toggle_fk(&self, enabled: bool) -> Result<bool>;

    /// Close the connection pool.
    async fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_row_deterministic() {
        let row = vec![SqlValue::I64(1), SqlValue::Text("alice".into())];
        assert_eq!(hash_row(&row), hash_row(&row));
    }

    #[test]
    fn test_hash_row_separator_prevents_collision() {
        // ("ab", "c") must not hash like ("a", "bc").
        let a = vec![SqlValue::Text("ab".into()), SqlValue::Text("c".into())];
        let b = vec![SqlValue::Text("a".into()), SqlValue::Text("bc".into())];
        assert_ne!(hash_row(&a), hash_row(&b));
    }

    #[test]
    fn test_hash_row_normalises_representation() {
        // A source bool and the transformed target TINYINT hash identically.
        let src = vec![SqlValue::Bool(true)];
        let tgt = vec![SqlValue::I16(1)];
        assert_eq!(hash_row(&src), hash_row(&tgt));
    }

    #[test]
    fn test_encode_key_composite() {
        let key = encode_key(&[SqlValue::I64(7), SqlValue::Text("x".into())]);
        assert_eq!(key, "7|x");
    }

    #[test]
    fn test_table_ref_display() {
        assert_eq!(TableRef::new("public", "users").to_string(), "public.users");
    }
}
