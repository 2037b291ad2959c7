//! Schema metadata types shared across the pipeline.
//!
//! These types are the engine-neutral description of a source database:
//! extraction writes them, the proposer and mapping validator read them,
//! and the migrator consults them for key and FK information.

use serde::{Deserialize, Serialize};

use crate::dialect::CanonicalType;

/// Role of a column within its table, as discovered in the source catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    PrimaryKey,
    Unique,
    Indexed,
    #[default]
    None,
}

/// Column metadata. Immutable after extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,

    /// Native type string as reported by the source catalog,
    /// e.g. `varchar(255)` or `numeric(18,4)`.
    pub source_type_raw: String,

    /// Canonical type derived from `source_type_raw`.
    pub canonical_type: CanonicalType,

    /// Whether the column allows NULL.
    pub nullable: bool,

    /// Key/index role of the column.
    #[serde(default)]
    pub role: ColumnRole,

    /// Default expression, kept as opaque text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    /// Catalog comment, if any.
    #[serde(default)]
    pub comment: String,
}

/// Foreign key metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Local column names.
    pub columns: Vec<String>,

    /// Referenced table name (unqualified).
    pub ref_table: String,

    /// Referenced column names.
    pub ref_columns: Vec<String>,
}

/// Table metadata as extracted from the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSpec {
    /// Schema name.
    pub schema: String,

    /// Table name.
    pub name: String,

    /// Columns in storage order.
    pub columns: Vec<ColumnSpec>,

    /// Primary key column names, in key order.
    pub primary_key: Vec<String>,

    /// Foreign key constraints.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,

    /// Approximate row count from catalog statistics.
    #[serde(default)]
    pub row_count_estimate: i64,
}

impl TableSpec {
    /// Fully qualified `schema.table` name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Whether the table has a primary key.
    pub fn has_pk(&self) -> bool {
        !self.primary_key.is_empty()
    }

    /// The single integer PK column, if the table has one.
    ///
    /// Keyset resumption (`WHERE pk > last_key`) is only safe for a
    /// single-column integer key; everything else falls back to OFFSET
    /// pagination over a deterministic ORDER BY.
    pub fn keyset_column(&self) -> Option<&ColumnSpec> {
        if self.primary_key.len() != 1 {
            return None;
        }
        let col = self
            .columns
            .iter()
            .find(|c| c.name == self.primary_key[0])?;
        match col.canonical_type {
            CanonicalType::Int1
            | CanonicalType::Int2
            | CanonicalType::Int4
            | CanonicalType::Int8 => Some(col),
            _ => None,
        }
    }

    /// Deterministic ordering for chunked reads: the PK if present,
    /// otherwise every column in storage order.
    pub fn deterministic_order(&self) -> Vec<String> {
        if self.has_pk() {
            self.primary_key.clone()
        } else {
            self.columns.iter().map(|c| c.name.clone()).collect()
        }
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Manifest summarising one extraction run, written alongside the
/// per-table spec files under `schemas/<run_id>/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaArtifact {
    /// Source engine name (`postgres` or `mssql`).
    pub source_engine: String,

    /// Source database name.
    pub database: String,

    /// When the extraction ran (UTC, RFC 3339).
    pub extracted_at: String,

    /// Names of successfully extracted tables, in catalog order.
    pub tables: Vec<String>,

    /// Tables that failed extraction, with the reason. A per-table failure
    /// does not abort the stage.
    #[serde(default, skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    pub extract_errors: std::collections::BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, canonical: CanonicalType) -> ColumnSpec {
        ColumnSpec {
            name: name.to_string(),
            source_type_raw: "integer".to_string(),
            canonical_type: canonical,
            nullable: false,
            role: ColumnRole::None,
            default: None,
            comment: String::new(),
        }
    }

    fn table(columns: Vec<ColumnSpec>, pk: Vec<&str>) -> TableSpec {
        TableSpec {
            schema: "public".to_string(),
            name: "users".to_string(),
            columns,
            primary_key: pk.into_iter().map(String::from).collect(),
            foreign_keys: vec![],
            row_count_estimate: 0,
        }
    }

    #[test]
    fn test_full_name() {
        let t = table(vec![], vec![]);
        assert_eq!(t.full_name(), "public.users");
    }

    #[test]
    fn test_keyset_column_integer_pk() {
        let t = table(
            vec![col("id", CanonicalType::Int8), col("age", CanonicalType::Int2)],
            vec!["id"],
        );
        assert_eq!(t.keyset_column().unwrap().name, "id");
    }

    #[test]
    fn test_keyset_column_text_pk_rejected() {
        let t = table(vec![col("code", CanonicalType::Text(Some(10)))], vec!["code"]);
        assert!(t.keyset_column().is_none());
    }

    #[test]
    fn test_keyset_column_composite_pk_rejected() {
        let t = table(
            vec![col("a", CanonicalType::Int4), col("b", CanonicalType::Int4)],
            vec!["a", "b"],
        );
        assert!(t.keyset_column().is_none());
    }

    #[test]
    fn test_deterministic_order_falls_back_to_all_columns() {
        let t = table(
            vec![col("x", CanonicalType::Int4), col("y", CanonicalType::Int4)],
            vec![],
        );
        assert_eq!(t.deterministic_order(), vec!["x", "y"]);
    }
}
