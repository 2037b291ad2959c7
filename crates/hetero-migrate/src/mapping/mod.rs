//! Table mappings and the draft → approved approval store.
//!
//! A mapping is proposed into `mappings/<run_id>/draft/`, reviewed (and
//! possibly hand-edited), then promoted to `mappings/<run_id>/approved/`
//! by an atomic rename. Only approved mappings feed schema generation and
//! data migration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::schema::{ColumnRole, TableSpec};
use crate::dialect::{is_valid_native_type, CanonicalType, MysqlDialect, TypeDialect};
use crate::error::{MigrateError, Result};
use crate::runs::RunContext;
use crate::transform::transform_for;

/// Lifecycle state of a table mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingStatus {
    Draft,
    Approved,
}

/// Per-column mapping from a source column to a target column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// Source column name.
    pub source: String,

    /// Native source type string, carried for review context.
    pub source_type_raw: String,

    /// Canonical type of the source column.
    pub canonical_type: CanonicalType,

    /// Target column name.
    pub target: String,

    /// Native target type string, e.g. `VARCHAR(255)`.
    pub target_type: String,

    /// Whether the target column allows NULL.
    pub nullable: bool,

    /// Key/index role carried from the source.
    #[serde(default)]
    pub role: ColumnRole,

    /// Human-readable name of the value transform, when not an identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform_hint: Option<String>,

    /// Warning attached by the proposer (lossy mapping, fallback, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Mapping of one source table onto one target table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableMapping {
    /// Qualified source table, `schema.name`.
    pub source_table: String,

    /// Unqualified target table name.
    pub target_table: String,

    pub source_engine: String,
    pub target_engine: String,

    pub status: MappingStatus,

    /// Column mappings in source storage order.
    pub columns: Vec<ColumnMapping>,

    /// Position hint from FK analysis; the migrator recomputes the real
    /// order from the schema artifact.
    #[serde(default)]
    pub load_order_hint: i64,

    /// Load this table with FK enforcement disabled (cycle member).
    #[serde(default)]
    pub disable_fk_during_load: bool,

    /// Table-level warning, e.g. `llm_fallback`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl TableMapping {
    /// Unqualified source table name.
    pub fn source_table_name(&self) -> &str {
        self.source_table
            .rsplit('.')
            .next()
            .unwrap_or(&self.source_table)
    }

    /// Source column names in mapping order.
    pub fn source_columns(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.source.clone()).collect()
    }

    /// Target column names in mapping order.
    pub fn target_columns(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.target.clone()).collect()
    }
}

/// Validate a mapping structurally and semantically.
///
/// Structural: required fields present, canonical types members of the
/// canonical set, native target types parse against the engine grammar.
/// Semantic (when the table spec is available): the column sets match
/// exactly, PK columns stay NOT NULL, and every column's canonical pair
/// has a registered row transform.
pub fn validate_mapping(mapping: &TableMapping, spec: Option<&TableSpec>) -> Result<()> {
    let table = mapping.source_table.clone();
    let fail = |message: String| Err(MigrateError::mapping(table.clone(), message));

    if mapping.source_table.is_empty() || mapping.target_table.is_empty() {
        return fail("source_table and target_table are required".into());
    }
    if mapping.columns.is_empty() {
        return fail("mapping has no columns".into());
    }
    if mapping.target_engine != "mysql" {
        return fail(format!("unsupported target engine {}", mapping.target_engine));
    }

    let mysql = MysqlDialect;
    for column in &mapping.columns {
        if column.source.is_empty() || column.target.is_empty() {
            return fail("column mapping with empty source or target name".into());
        }
        if !is_valid_native_type(&column.target_type) {
            return fail(format!(
                "column {}: target type `{}` does not parse as a mysql type",
                column.source, column.target_type
            ));
        }
        let target_canonical = mysql.to_canonical(&column.target_type).canonical;
        if transform_for(&column.canonical_type, &target_canonical).is_none() {
            return fail(format!(
                "column {}: no row transform for {} -> {}",
                column.source, column.canonical_type, target_canonical
            ));
        }
        if column.role == ColumnRole::PrimaryKey && column.nullable {
            return fail(format!(
                "primary key column {} must be NOT NULL",
                column.source
            ));
        }
    }

    if let Some(spec) = spec {
        if mapping.columns.len() != spec.columns.len() {
            return fail(format!(
                "mapping has {} columns but table has {}",
                mapping.columns.len(),
                spec.columns.len()
            ));
        }
        for (mapped, actual) in mapping.columns.iter().zip(&spec.columns) {
            if mapped.source != actual.name {
                return fail(format!(
                    "column order mismatch: mapping has {} where table has {}",
                    mapped.source, actual.name
                ));
            }
        }
        for pk in &spec.primary_key {
            let Some(mapped) = mapping.columns.iter().find(|c| &c.source == pk) else {
                return fail(format!("primary key column {} missing from mapping", pk));
            };
            if mapped.nullable {
                return fail(format!("primary key column {} must be NOT NULL", pk));
            }
        }
        for fk in &spec.foreign_keys {
            for fk_col in &fk.columns {
                if !mapping.columns.iter().any(|c| &c.source == fk_col) {
                    return fail(format!(
                        "foreign key column {} missing from mapping",
                        fk_col
                    ));
                }
            }
        }
    }

    Ok(())
}

/// Filesystem store for one run's draft and approved mappings.
#[derive(Debug, Clone)]
pub struct MappingStore {
    draft_dir: PathBuf,
    approved_dir: PathBuf,
}

impl MappingStore {
    pub fn new(run: &RunContext) -> Self {
        Self {
            draft_dir: run.draft_mappings_dir(),
            approved_dir: run.approved_mappings_dir(),
        }
    }

    /// Store rooted at explicit directories (tests).
    pub fn at(draft_dir: impl Into<PathBuf>, approved_dir: impl Into<PathBuf>) -> Self {
        Self {
            draft_dir: draft_dir.into(),
            approved_dir: approved_dir.into(),
        }
    }

    fn load_file(path: &Path) -> Result<TableMapping> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn list_dir(dir: &Path) -> Result<Vec<TableMapping>> {
        let mut mappings = Vec::new();
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Ok(mappings);
        };
        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        paths.sort();
        for path in paths {
            mappings.push(Self::load_file(&path)?);
        }
        Ok(mappings)
    }

    /// Write a draft mapping as `draft/<table>.json`.
    pub fn write_draft(&self, mapping: &TableMapping) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.draft_dir)?;
        let path = self
            .draft_dir
            .join(format!("{}.json", mapping.source_table_name()));
        std::fs::write(&path, serde_json::to_string_pretty(mapping)?)?;
        Ok(path)
    }

    pub fn load_draft(&self, table: &str) -> Result<TableMapping> {
        Self::load_file(&self.draft_dir.join(format!("{}.json", table)))
    }

    pub fn list_drafts(&self) -> Result<Vec<TableMapping>> {
        Self::list_dir(&self.draft_dir)
    }

    pub fn load_approved(&self, table: &str) -> Result<TableMapping> {
        Self::load_file(&self.approved_dir.join(format!("{}.json", table)))
    }

    pub fn list_approved(&self) -> Result<Vec<TableMapping>> {
        Self::list_dir(&self.approved_dir)
    }

    /// Promote a draft to approved: validate, then atomically rename into
    /// the approved directory with `status = approved`.
    pub fn approve(&self, table: &str, spec: Option<&TableSpec>) -> Result<()> {
        let mut mapping = self.load_draft(table)?;
        validate_mapping(&mapping, spec)?;
        mapping.status = MappingStatus::Approved;

        std::fs::create_dir_all(&self.approved_dir)?;
        let final_path = self.approved_dir.join(format!("{}.json", table));
        let tmp = final_path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&mapping)?)?;
        std::fs::rename(&tmp, &final_path)?;
        std::fs::remove_file(self.draft_dir.join(format!("{}.json", table)))?;
        info!(table = table, "mapping approved");
        Ok(())
    }

    /// Approve every draft. Failures are reported per table and do not
    /// roll back prior successes.
    pub fn approve_all(
        &self,
        specs: &BTreeMap<String, TableSpec>,
    ) -> Result<Vec<(String, Result<()>)>> {
        let mut outcomes = Vec::new();
        for mapping in self.list_drafts()? {
            let table = mapping.source_table_name().to_string();
            let spec = specs.get(&table);
            let outcome = self.approve(&table, spec);
            if let Err(ref e) = outcome {
                warn!(table = %table, error = %e, "approval failed");
            }
            outcomes.push((table, outcome));
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::ColumnSpec;
    use tempfile::TempDir;

    fn column(source: &str, canonical: CanonicalType, target_type: &str) -> ColumnMapping {
        ColumnMapping {
            source: source.to_string(),
            source_type_raw: "integer".to_string(),
            canonical_type: canonical,
            target: source.to_string(),
            target_type: target_type.to_string(),
            nullable: true,
            role: ColumnRole::None,
            transform_hint: None,
            warning: None,
        }
    }

    fn mapping() -> TableMapping {
        let mut id = column("id", CanonicalType::Int4, "INT");
        id.role = ColumnRole::PrimaryKey;
        id.nullable = false;
        TableMapping {
            source_table: "public.users".to_string(),
            target_table: "users".to_string(),
            source_engine: "postgres".to_string(),
            target_engine: "mysql".to_string(),
            status: MappingStatus::Draft,
            columns: vec![id, column("age", CanonicalType::Int2, "SMALLINT")],
            load_order_hint: 0,
            disable_fk_during_load: false,
            warning: None,
        }
    }

    fn spec() -> TableSpec {
        TableSpec {
            schema: "public".to_string(),
            name: "users".to_string(),
            columns: vec![
                ColumnSpec {
                    name: "id".to_string(),
                    source_type_raw: "integer".to_string(),
                    canonical_type: CanonicalType::Int4,
                    nullable: false,
                    role: ColumnRole::PrimaryKey,
                    default: None,
                    comment: String::new(),
                },
                ColumnSpec {
                    name: "age".to_string(),
                    source_type_raw: "smallint".to_string(),
                    canonical_type: CanonicalType::Int2,
                    nullable: true,
                    role: ColumnRole::None,
                    default: None,
                    comment: String::new(),
                },
            ],
            primary_key: vec!["id".to_string()],
            foreign_keys: vec![],
            row_count_estimate: 2,
        }
    }

    #[test]
    fn test_validate_accepts_good_mapping() {
        validate_mapping(&mapping(), Some(&spec())).unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_target_type() {
        let mut bad = mapping();
        bad.columns[1].target_type = "SMALLINTT".to_string();
        assert!(validate_mapping(&bad, None).is_err());
    }

    #[test]
    fn test_validate_rejects_nullable_pk() {
        let mut bad = mapping();
        bad.columns[0].nullable = true;
        assert!(validate_mapping(&bad, Some(&spec())).is_err());
    }

    #[test]
    fn test_validate_rejects_missing_column() {
        let mut bad = mapping();
        bad.columns.pop();
        assert!(validate_mapping(&bad, Some(&spec())).is_err());
    }

    #[test]
    fn test_validate_rejects_untransformable_pair() {
        let mut bad = mapping();
        // DATETIME source cannot become INT.
        bad.columns[1].canonical_type = CanonicalType::DateTime;
        bad.columns[1].target_type = "INT".to_string();
        assert!(validate_mapping(&bad, None).is_err());
    }

    #[test]
    fn test_approve_moves_draft_atomically() {
        let tmp = TempDir::new().unwrap();
        let store = MappingStore::at(tmp.path().join("draft"), tmp.path().join("approved"));
        store.write_draft(&mapping()).unwrap();

        store.approve("users", Some(&spec())).unwrap();

        assert!(!tmp.path().join("draft/users.json").exists());
        let approved = store.load_approved("users").unwrap();
        assert_eq!(approved.status, MappingStatus::Approved);
    }

    #[test]
    fn test_approve_rejects_invalid_and_keeps_draft() {
        let tmp = TempDir::new().unwrap();
        let store = MappingStore::at(tmp.path().join("draft"), tmp.path().join("approved"));
        let mut bad = mapping();
        bad.columns[0].nullable = true;
        store.write_draft(&bad).unwrap();

        assert!(store.approve("users", Some(&spec())).is_err());
        assert!(tmp.path().join("draft/users.json").exists());
        assert!(!tmp.path().join("approved/users.json").exists());
    }

    #[test]
    fn test_approve_all_reports_partial_failures() {
        let tmp = TempDir::new().unwrap();
        let store = MappingStore::at(tmp.path().join("draft"), tmp.path().join("approved"));

        store.write_draft(&mapping()).unwrap();
        let mut bad = mapping();
        bad.source_table = "public.broken".to_string();
        bad.target_table = "broken".to_string();
        bad.columns[1].target_type = "NOT A TYPE".to_string();
        store.write_draft(&bad).unwrap();

        let mut specs = BTreeMap::new();
        specs.insert("users".to_string(), spec());

        let outcomes = store.approve_all(&specs).unwrap();
        assert_eq!(outcomes.len(), 2);
        let ok_count = outcomes.iter().filter(|(_, r)| r.is_ok()).count();
        assert_eq!(ok_count, 1);
        assert!(store.load_approved("users").is_ok());
    }
}
