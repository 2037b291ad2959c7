//! In-memory source and target connectors for end-to-end pipeline tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use hetero_migrate::core::{
    encode_key, hash_row, AggregateFn, BulkLoadOutcome, ChunkQuery, ColumnStats, KeyHash,
    RowError, SampleSpec, SourceConnector, TableRef, TargetConnector,
};
use hetero_migrate::{
    ColumnRole, ColumnSpec, LoadErrorKind, MigrateError, Result, Row, SqlValue, TableSpec,
};

pub fn column(name: &str, raw: &str, canonical: &str, nullable: bool) -> ColumnSpec {
    ColumnSpec {
        name: name.to_string(),
        source_type_raw: raw.to_string(),
        canonical_type: canonical.parse().unwrap(),
        nullable,
        role: ColumnRole::None,
        default: None,
        comment: String::new(),
    }
}

pub fn pk_column(name: &str, raw: &str, canonical: &str) -> ColumnSpec {
    let mut spec = column(name, raw, canonical, false);
    spec.role = ColumnRole::PrimaryKey;
    spec
}

/// Seeded sample ranks, mirroring the production connectors so source and
/// target sample identical rows.
fn sample_offsets(row_count: i64, sample_rows: usize, seed: u64) -> Vec<i64> {
    if row_count <= 0 {
        return Vec::new();
    }
    if row_count <= sample_rows as i64 {
        return (0..row_count).collect();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = BTreeSet::new();
    while picked.len() < sample_rows {
        picked.insert(rng.gen_range(0..row_count));
    }
    picked.into_iter().collect()
}

fn numeric(v: &SqlValue) -> Option<f64> {
    match v {
        SqlValue::Bool(b) => Some(f64::from(u8::from(*b))),
        SqlValue::I16(v) => Some(f64::from(*v)),
        SqlValue::I32(v) => Some(f64::from(*v)),
        SqlValue::I64(v) => Some(*v as f64),
        SqlValue::F32(v) => Some(f64::from(*v)),
        SqlValue::F64(v) => Some(*v),
        SqlValue::Decimal(v) => v.to_string().parse().ok(),
        _ => None,
    }
}

fn aggregate_values(values: &[SqlValue], func: AggregateFn) -> SqlValue {
    let non_null: Vec<&SqlValue> = values.iter().filter(|v| !v.is_null()).collect();
    match func {
        AggregateFn::Sum => SqlValue::F64(non_null.iter().filter_map(|v| numeric(v)).sum()),
        AggregateFn::CountDistinct => {
            let distinct: BTreeSet<String> = non_null
                .iter()
                .map(|v| v.canonical_encoding())
                .collect();
            SqlValue::I64(distinct.len() as i64)
        }
        AggregateFn::Min | AggregateFn::Max => {
            let mut encoded: Vec<(Option<f64>, String)> = non_null
                .iter()
                .map(|v| (numeric(v), v.canonical_encoding()))
                .collect();
            encoded.sort_by(|a, b| match (a.0, b.0) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
                _ => a.1.cmp(&b.1),
            });
            let chosen = match func {
                AggregateFn::Min => encoded.first(),
                _ => encoded.last(),
            };
            match chosen {
                Some((Some(n), _)) => SqlValue::F64(*n),
                Some((None, s)) => SqlValue::Text(s.clone()),
                None => SqlValue::Null,
            }
        }
    }
}

fn sample_rows_to_hashes(
    rows: &[Row],
    all_columns: &[String],
    spec: &SampleSpec,
) -> Result<Vec<KeyHash>> {
    let index_of = |name: &String| {
        all_columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| MigrateError::Config(format!("unknown column {}", name)))
    };
    let pk_idx: Vec<usize> = spec
        .pk_columns
        .iter()
        .map(index_of)
        .collect::<Result<_>>()?;
    let col_idx: Vec<usize> = spec.columns.iter().map(index_of).collect::<Result<_>>()?;

    // Deterministic PK order, numeric when the key is numeric.
    let mut sorted: Vec<&Row> = rows.iter().collect();
    sorted.sort_by(|a, b| {
        for &i in &pk_idx {
            let ordering = match (numeric(&a[i]), numeric(&b[i])) {
                (Some(x), Some(y)) => {
                    x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal)
                }
                _ => a[i].canonical_encoding().cmp(&b[i].canonical_encoding()),
            };
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        std::cmp::Ordering::Equal
    });

    let offsets = sample_offsets(sorted.len() as i64, spec.sample_rows, spec.seed);
    Ok(offsets
        .into_iter()
        .filter_map(|offset| sorted.get(offset as usize))
        .map(|row| {
            let key_values: Vec<SqlValue> = pk_idx.iter().map(|&i| row[i].clone()).collect();
            let hash_values: Vec<SqlValue> = col_idx.iter().map(|&i| row[i].clone()).collect();
            KeyHash {
                key: encode_key(&key_values),
                hash: hash_row(&hash_values),
            }
        })
        .collect())
}

/// In-memory source database.
pub struct MemorySource {
    pub tables: BTreeMap<String, (TableSpec, Vec<Row>)>,
}

impl MemorySource {
    pub fn new(tables: Vec<(TableSpec, Vec<Row>)>) -> Self {
        Self {
            tables: tables
                .into_iter()
                .map(|(spec, rows)| (spec.name.clone(), (spec, rows)))
                .collect(),
        }
    }

    fn table(&self, name: &str) -> Result<&(TableSpec, Vec<Row>)> {
        self.tables
            .get(name)
            .ok_or_else(|| MigrateError::schema(name, "no such table"))
    }
}

#[async_trait]
impl SourceConnector for MemorySource {
    fn engine(&self) -> &'static str {
        "postgres"
    }

    async fn list_tables(&self, _schema: &str) -> Result<Vec<TableSpec>> {
        Ok(self.tables.values().map(|(spec, _)| spec.clone()).collect())
    }

    async fn row_count(&self, table: &TableRef) -> Result<i64> {
        Ok(self.table(&table.name)?.1.len() as i64)
    }

    async fn fetch_chunk(&self, query: &ChunkQuery) -> Result<Vec<Row>> {
        let (spec, rows) = self.table(&query.table.name)?;
        let index_of = |name: &String| {
            spec.columns
                .iter()
                .position(|c| &c.name == name)
                .ok_or_else(|| MigrateError::schema(&query.table.name, "unknown column"))
        };
        let selected: Vec<usize> = query
            .columns
            .iter()
            .map(index_of)
            .collect::<Result<_>>()?;

        let window: Vec<&Row> = match &query.after_key {
            Some(cursor) => {
                let pk = index_of(&cursor.column)?;
                rows.iter()
                    .filter(|row| numeric(&row[pk]).map(|v| v as i64 > cursor.last).unwrap_or(false))
                    .take(query.chunk_size)
                    .collect()
            }
            None => rows
                .iter()
                .skip(query.offset as usize)
                .take(query.chunk_size)
                .collect(),
        };

        Ok(window
            .into_iter()
            .map(|row| selected.iter().map(|&i| row[i].clone()).collect())
            .collect())
    }

    async fn aggregate(
        &self,
        table: &TableRef,
        column: &str,
        func: AggregateFn,
    ) -> Result<SqlValue> {
        let (spec, rows) = self.table(&table.name)?;
        let idx = spec
            .columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| MigrateError::schema(&table.name, "unknown column"))?;
        let values: Vec<SqlValue> = rows.iter().map(|r| r[idx].clone()).collect();
        Ok(aggregate_values(&values, func))
    }

    async fn sample_hash(&self, table: &TableRef, spec: &SampleSpec) -> Result<Vec<KeyHash>> {
        let (table_spec, rows) = self.table(&table.name)?;
        let all_columns: Vec<String> =
            table_spec.columns.iter().map(|c| c.name.clone()).collect();
        // Source rows hash through the same canonical encoding the target
        // uses, so lossless mappings compare equal.
        sample_rows_to_hashes(rows, &all_columns, spec)
    }

    async fn column_stats(
        &self,
        table: &TableRef,
        columns: &[String],
    ) -> Result<BTreeMap<String, ColumnStats>> {
        let (spec, rows) = self.table(&table.name)?;
        let mut stats = BTreeMap::new();
        for column in columns {
            let idx = spec.columns.iter().position(|c| &c.name == column);
            let entry = match idx {
                Some(idx) => {
                    let total = rows.len().max(1) as f64;
                    let nulls = rows.iter().filter(|r| r[idx].is_null()).count() as f64;
                    let distinct: BTreeSet<String> = rows
                        .iter()
                        .filter(|r| !r[idx].is_null())
                        .map(|r| r[idx].canonical_encoding())
                        .collect();
                    ColumnStats {
                        null_rate: Some(nulls / total),
                        distinct_count: Some(distinct.len() as i64),
                        min: distinct.iter().next().cloned(),
                        max: distinct.iter().last().cloned(),
                    }
                }
                None => ColumnStats::default(),
            };
            stats.insert(column.clone(), entry);
        }
        Ok(stats)
    }

    async fn close(&self) {}
}

#[derive(Default)]
struct TargetTable {
    columns: Vec<String>,
    rows: Vec<Row>,
}

/// In-memory target database with optional unique constraints and fault
/// injection.
#[derive(Default)]
pub struct MemoryTarget {
    tables: Mutex<BTreeMap<String, TargetTable>>,
    unique: Mutex<BTreeMap<String, Vec<String>>>,
    pub ddl_log: Mutex<Vec<String>>,
    pub fk_log: Mutex<Vec<bool>>,
    /// Successful bulk_load calls (the chunk-commit log).
    pub chunk_commits: AtomicUsize,
    /// When set, bulk_load fails with an engine error once the count of
    /// successful commits reaches this value.
    fail_after_commits: Mutex<Option<usize>>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unique(self, table: &str, column: &str) -> Self {
        self.unique
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(column.to_string());
        self
    }

    pub fn fail_after(&self, commits: usize) {
        *self.fail_after_commits.lock().unwrap() = Some(commits);
    }

    pub fn clear_failure(&self) {
        *self.fail_after_commits.lock().unwrap() = None;
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TargetConnector for MemoryTarget {
    fn engine(&self) -> &'static str {
        "mysql"
    }

    async fn exec_ddl(&self, statement: &str) -> Result<()> {
        self.ddl_log.lock().unwrap().push(statement.to_string());
        Ok(())
    }

    async fn bulk_load(
        &self,
        table: &TableRef,
        columns: &[String],
        rows: Vec<Row>,
    ) -> Result<BulkLoadOutcome> {
        if let Some(limit) = *self.fail_after_commits.lock().unwrap() {
            if self.chunk_commits.load(Ordering::SeqCst) >= limit {
                return Err(MigrateError::connect("mysql", "simulated connection loss"));
            }
        }

        let unique_columns = self
            .unique
            .lock()
            .unwrap()
            .get(&table.name)
            .cloned()
            .unwrap_or_default();

        let mut tables = self.tables.lock().unwrap();
        let entry = tables.entry(table.name.clone()).or_default();
        if entry.columns.is_empty() {
            entry.columns = columns.to_vec();
        }

        let unique_idx: Vec<usize> = unique_columns
            .iter()
            .filter_map(|u| columns.iter().position(|c| c == u))
            .collect();
        let mut seen: BTreeSet<String> = entry
            .rows
            .iter()
            .flat_map(|row| unique_idx.iter().map(|&i| row[i].canonical_encoding()))
            .collect();

        let mut outcome = BulkLoadOutcome::default();
        for (row_index, row) in rows.into_iter().enumerate() {
            let mut conflict = None;
            for &i in &unique_idx {
                let encoded = row[i].canonical_encoding();
                if seen.contains(&encoded) {
                    conflict = Some(format!("duplicate value for {}", columns[i]));
                    break;
                }
            }
            match conflict {
                Some(detail) => outcome.per_row_errors.push(RowError {
                    row_index,
                    kind: LoadErrorKind::ConstraintViolation,
                    detail,
                }),
                None => {
                    for &i in &unique_idx {
                        seen.insert(row[i].canonical_encoding());
                    }
                    entry.rows.push(row);
                    outcome.inserted += 1;
                }
            }
        }

        self.chunk_commits.fetch_add(1, Ordering::SeqCst);
        Ok(outcome)
    }

    async fn row_count(&self, table: &TableRef) -> Result<i64> {
        Ok(self.rows(&table.name).len() as i64)
    }

    async fn aggregate(
        &self,
        table: &TableRef,
        column: &str,
        func: AggregateFn,
    ) -> Result<SqlValue> {
        let tables = self.tables.lock().unwrap();
        let Some(entry) = tables.get(&table.name) else {
            return Ok(SqlValue::Null);
        };
        let idx = entry
            .columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| MigrateError::schema(&table.name, "unknown column"))?;
        let values: Vec<SqlValue> = entry.rows.iter().map(|r| r[idx].clone()).collect();
        Ok(aggregate_values(&values, func))
    }

    async fn sample_hash(&self, table: &TableRef, spec: &SampleSpec) -> Result<Vec<KeyHash>> {
        let tables = self.tables.lock().unwrap();
        let Some(entry) = tables.get(&table.name) else {
            return Ok(Vec::new());
        };
        sample_rows_to_hashes(&entry.rows, &entry.columns, spec)
    }

    async fn toggle_fk(&self, enabled: bool) -> Result<bool> {
        self.fk_log.lock().unwrap().push(enabled);
        Ok(true)
    }

    async fn close(&self) {}
}
