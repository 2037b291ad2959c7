//! Validator: multi-level source ↔ target comparison.
//!
//! Three levels run in order: L1 row counts, L2 aggregates, L3 sample
//! hashes. By default a later level only runs when the earlier ones pass
//! (`validation.run_all_levels` overrides). Known lossy mappings produce
//! warnings rather than failures at L2.

pub mod report;

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::core::schema::ColumnRole;
use crate::core::traits::{
    AggregateFn, SampleSpec, SourceConnector, TableRef, TargetConnector,
};
use crate::core::value::SqlValue;
use crate::dialect::CanonicalKind;
use crate::error::{MigrateError, Result};
use crate::events::{Event, EventSink};
use crate::mapping::{MappingStore, TableMapping};
use crate::runs::RunContext;

/// Validation level selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ValidationLevel {
    L1,
    L2,
    L3,
}

impl FromStr for ValidationLevel {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "L1" => Ok(ValidationLevel::L1),
            "L2" => Ok(ValidationLevel::L2),
            "L3" => Ok(ValidationLevel::L3),
            other => Err(MigrateError::Config(format!(
                "unknown validation level: {} (expected L1, L2 or L3)",
                other
            ))),
        }
    }
}

/// One check within a table's validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    /// Check kind, e.g. `L1_rowcount`, `L2_sum`, `L3_samplehash`.
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    pub pass: bool,

    /// Set when a mismatch is tolerated because the mapping is known
    /// lossy (e.g. CHAR trailing-space differences).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,

    /// Failure classification (`row_count_mismatch`, `sample_mismatch`)
    /// or diverging-key list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Validation outcome for one table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub source_table: String,
    pub target_table: String,
    pub checks: Vec<CheckResult>,
    pub pass: bool,
}

/// Whole-run validation report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub validated_at: String,
    pub source_engine: String,
    pub target_engine: String,
    pub level: String,
    pub tables: Vec<ValidationResult>,
    pub all_pass: bool,
}

/// Compare two aggregate values. Numerics use relative float tolerance;
/// everything else falls back to canonical-encoding equality, which
/// already truncates timestamps to second granularity.
fn aggregates_match(source: &SqlValue, target: &SqlValue, float_tolerance: f64) -> bool {
    fn as_f64(v: &SqlValue) -> Option<f64> {
        match v {
            SqlValue::I16(v) => Some(f64::from(*v)),
            SqlValue::I32(v) => Some(f64::from(*v)),
            SqlValue::I64(v) => Some(*v as f64),
            SqlValue::F32(v) => Some(f64::from(*v)),
            SqlValue::F64(v) => Some(*v),
            SqlValue::Decimal(v) => v.to_string().parse().ok(),
            SqlValue::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    match (source.is_null(), target.is_null()) {
        (true, true) => return true,
        (true, false) | (false, true) => return false,
        _ => {}
    }

    if let (Some(s), Some(t)) = (as_f64(source), as_f64(target)) {
        if s == 0.0 {
            return t.abs() < 1e-9;
        }
        return ((s - t) / s).abs() <= float_tolerance;
    }

    source.canonical_encoding() == target.canonical_encoding()
}

/// Whether a canonical kind participates in L2 numeric aggregates.
fn is_aggregatable(kind: CanonicalKind) -> bool {
    use CanonicalKind::*;
    matches!(
        kind,
        Int1 | Int2 | Int4 | Int8 | Float4 | Float8 | Decimal | Date | DateTime | DateTimeTz
    )
}

/// Temporal kinds skip SUM (summing dates is meaningless on both sides).
fn is_temporal(kind: CanonicalKind) -> bool {
    use CanonicalKind::*;
    matches!(kind, Date | DateTime | DateTimeTz)
}

fn source_ref(mapping: &TableMapping) -> TableRef {
    match mapping.source_table.split_once('.') {
        Some((schema, name)) => TableRef::new(schema, name),
        None => TableRef::new("", mapping.source_table.clone()),
    }
}

/// Run validation checks for one table up to `level`.
pub async fn validate_table(
    source: &dyn SourceConnector,
    target: &dyn TargetConnector,
    config: &Config,
    mapping: &TableMapping,
    level: ValidationLevel,
) -> Result<ValidationResult> {
    let cfg = &config.validation;
    let src_ref = source_ref(mapping);
    let tgt_ref = TableRef::new("", mapping.target_table.clone());
    let mut checks = Vec::new();

    // L1: row count within tolerance.
    let source_count = source.row_count(&src_ref).await?;
    let target_count = target.row_count(&tgt_ref).await?;
    let allowed = (source_count as f64 * cfg.row_count_tolerance).abs();
    let l1_pass = ((source_count - target_count).abs() as f64) <= allowed;
    checks.push(CheckResult {
        kind: "L1_rowcount".into(),
        column: None,
        source: Some(source_count.to_string()),
        target: Some(target_count.to_string()),
        pass: l1_pass,
        warning: None,
        detail: (!l1_pass).then(|| "row_count_mismatch".to_string()),
    });

    let proceed = |previous_pass: bool| previous_pass || cfg.run_all_levels;

    // L2: aggregates on numeric columns, COUNT(DISTINCT) on key columns.
    let mut l2_pass = true;
    if level >= ValidationLevel::L2 && proceed(l1_pass) {
        for column in &mapping.columns {
            let kind = column.canonical_type.kind();
            let lossy = column.warning.is_some();

            if is_aggregatable(kind) {
                for func in [AggregateFn::Sum, AggregateFn::Min, AggregateFn::Max] {
                    if func == AggregateFn::Sum && is_temporal(kind) {
                        continue;
                    }
                    let src_val = source.aggregate(&src_ref, &column.source, func).await?;
                    let tgt_val = target.aggregate(&tgt_ref, &column.target, func).await?;
                    let matched = aggregates_match(&src_val, &tgt_val, cfg.float_tolerance);
                    // Known lossy mappings warn instead of failing.
                    let (pass, warning) = if matched {
                        (true, None)
                    } else if lossy {
                        (true, column.warning.clone())
                    } else {
                        (false, None)
                    };
                    if !pass {
                        l2_pass = false;
                    }
                    checks.push(CheckResult {
                        kind: format!("L2_{}", format!("{:?}", func).to_lowercase()),
                        column: Some(column.target.clone()),
                        source: Some(src_val.canonical_encoding()),
                        target: Some(tgt_val.canonical_encoding()),
                        pass,
                        warning,
                        detail: None,
                    });
                }
            }

            // High-cardinality proxy: key and unique columns.
            if matches!(column.role, ColumnRole::PrimaryKey | ColumnRole::Unique) {
                let src_val = source
                    .aggregate(&src_ref, &column.source, AggregateFn::CountDistinct)
                    .await?;
                let tgt_val = target
                    .aggregate(&tgt_ref, &column.target, AggregateFn::CountDistinct)
                    .await?;
                let pass = aggregates_match(&src_val, &tgt_val, 0.0);
                if !pass {
                    l2_pass = false;
                }
                checks.push(CheckResult {
                    kind: "L2_count_distinct".into(),
                    column: Some(column.target.clone()),
                    source: Some(src_val.canonical_encoding()),
                    target: Some(tgt_val.canonical_encoding()),
                    pass,
                    warning: None,
                    detail: None,
                });
            }
        }
    }

    // L3: seeded sample hash diff.
    if level >= ValidationLevel::L3 && proceed(l1_pass && l2_pass) {
        let pk_source: Vec<String> = mapping
            .columns
            .iter()
            .filter(|c| c.role == ColumnRole::PrimaryKey)
            .map(|c| c.source.clone())
            .collect();
        let pk_target: Vec<String> = mapping
            .columns
            .iter()
            .filter(|c| c.role == ColumnRole::PrimaryKey)
            .map(|c| c.target.clone())
            .collect();

        if pk_source.is_empty() {
            checks.push(CheckResult {
                kind: "L3_samplehash".into(),
                column: None,
                source: None,
                target: None,
                pass: true,
                warning: Some("table has no primary key; sample hash skipped".into()),
                detail: None,
            });
        } else {
            let source_sample = source
                .sample_hash(
                    &src_ref,
                    &SampleSpec {
                        pk_columns: pk_source,
                        columns: mapping.source_columns(),
                        sample_rows: cfg.sample_rows,
                        seed: cfg.sample_seed,
                    },
                )
                .await?;
            let target_sample = target
                .sample_hash(
                    &tgt_ref,
                    &SampleSpec {
                        pk_columns: pk_target,
                        columns: mapping.target_columns(),
                        sample_rows: cfg.sample_rows,
                        seed: cfg.sample_seed,
                    },
                )
                .await?;

            let source_map: BTreeMap<&str, &str> = source_sample
                .iter()
                .map(|kh| (kh.key.as_str(), kh.hash.as_str()))
                .collect();
            let target_map: BTreeMap<&str, &str> = target_sample
                .iter()
                .map(|kh| (kh.key.as_str(), kh.hash.as_str()))
                .collect();

            let mut diverging: Vec<String> = Vec::new();
            for (key, source_hash) in &source_map {
                match target_map.get(key) {
                    Some(target_hash) if target_hash == source_hash => {}
                    _ => diverging.push((*key).to_string()),
                }
            }
            for key in target_map.keys() {
                if !source_map.contains_key(key) {
                    diverging.push((*key).to_string());
                }
            }
            diverging.sort();
            diverging.dedup();

            let pass = diverging.is_empty();
            let detail = if pass {
                None
            } else {
                let shown: Vec<String> =
                    diverging.iter().take(cfg.max_reported_keys).cloned().collect();
                Some(format!(
                    "sample_mismatch: {} diverging key(s): {}",
                    diverging.len(),
                    shown.join(", ")
                ))
            };
            checks.push(CheckResult {
                kind: "L3_samplehash".into(),
                column: None,
                source: Some(source_map.len().to_string()),
                target: Some(target_map.len().to_string()),
                pass,
                warning: None,
                detail,
            });
        }
    }

    let pass = checks.iter().all(|c| c.pass);
    Ok(ValidationResult {
        source_table: mapping.source_table.clone(),
        target_table: mapping.target_table.clone(),
        checks,
        pass,
    })
}

/// Validate every approved mapping and write the JSON + HTML reports.
pub async fn validate_all(
    source: &dyn SourceConnector,
    target: &dyn TargetConnector,
    config: &Config,
    run: &RunContext,
    level: ValidationLevel,
    events: &EventSink,
) -> Result<(ValidationReport, std::path::PathBuf)> {
    let store = MappingStore::new(run);
    let mappings = store.list_approved()?;
    if mappings.is_empty() {
        return Err(MigrateError::Config(
            "no approved mappings to validate".into(),
        ));
    }

    let mut tables = Vec::new();
    for mapping in &mappings {
        info!(table = %mapping.target_table, "validating");
        let result = validate_table(source, target, config, mapping, level).await?;
        if result.pass {
            info!(table = %result.target_table, "validation passed");
        } else {
            warn!(table = %result.target_table, "validation FAILED");
        }
        events.emit(Event::TableDone {
            stage: "validate".into(),
            table: result.target_table.clone(),
            rows_loaded: 0,
            rows_failed: i64::from(!result.pass),
        });
        tables.push(result);
    }

    let report = ValidationReport {
        validated_at: chrono::Utc::now().to_rfc3339(),
        source_engine: source.engine().to_string(),
        target_engine: target.engine().to_string(),
        level: format!("{:?}", level),
        all_pass: tables.iter().all(|t| t.pass),
        tables,
    };

    let path = report::write_reports(run, &report)?;
    events.emit(Event::Done {
        stage: "validate".into(),
        tables: report.tables.len(),
    });
    Ok((report, path))
}
