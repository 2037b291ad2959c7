//! Data migrator: topologically-ordered, chunked, resumable loading with
//! a dead letter queue and per-row transforms.
//!
//! Per table the loop is: acquire checkpoint → stream chunks from the
//! source (read of chunk N+1 overlaps the write of chunk N through a
//! single-slot channel) → transform rows → bulk load → route failures to
//! the DLQ → persist the checkpoint atomically. Chunk size follows an
//! additive-increase / multiplicative-decrease policy.

pub mod checkpoint;
pub mod dlq;
pub mod topo;

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::schema::TableSpec;
use crate::core::traits::{
    ChunkQuery, KeysetCursor, SourceConnector, TableRef, TargetConnector,
};
use crate::core::value::{Row, SqlValue};
use crate::dialect::{MysqlDialect, TypeDialect};
use crate::error::{LoadErrorKind, MigrateError, Result};
use crate::events::{Event, EventSink};
use crate::extract;
use crate::mapping::{MappingStore, TableMapping};
use crate::runs::RunContext;
use crate::transform::{transform_for, ValueTransform};

pub use checkpoint::{Checkpoint, CheckpointStatus, CheckpointStore};
pub use dlq::DlqWriter;
pub use topo::{load_order, LoadSlot};

/// Options for one migrate invocation.
#[derive(Debug, Clone, Default)]
pub struct MigrateOptions {
    /// Restrict to these source tables (unqualified names).
    pub tables_filter: Option<Vec<String>>,

    /// Override the configured initial chunk size.
    pub chunk_size: Option<usize>,
}

/// Outcome for one table.
#[derive(Debug, Clone)]
pub struct TableResult {
    pub target_table: String,
    pub rows_loaded: i64,
    pub rows_failed: i64,
    pub status: CheckpointStatus,
}

/// Outcome of the whole migrate stage.
#[derive(Debug, Clone, Default)]
pub struct MigrationSummary {
    pub tables: Vec<TableResult>,
    pub dlq_rows: u64,
}

/// AIMD chunk sizing shared between the reader task and the write loop.
#[derive(Debug)]
struct ChunkSizer {
    current: AtomicUsize,
    step: usize,
    max: usize,
    floor: usize,
}

impl ChunkSizer {
    fn new(initial: usize, max: usize) -> Self {
        let initial = initial.max(1);
        Self {
            current: AtomicUsize::new(initial),
            step: initial,
            max: max.max(initial),
            floor: (initial / 10).max(1),
        }
    }

    fn get(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }

    /// Additive increase after a successful load.
    fn grow(&self) {
        let next = (self.get() + self.step).min(self.max);
        self.current.store(next, Ordering::Relaxed);
    }

    /// Multiplicative decrease after a failed or timed-out load.
    fn shrink(&self) {
        let next = (self.get() / 2).max(self.floor);
        self.current.store(next, Ordering::Relaxed);
    }
}

/// One table's migration job, resolved from the mapping and schema
/// artifacts before any data moves.
struct TableJob {
    mapping: TableMapping,
    spec: Option<TableSpec>,
    in_cycle: bool,
}

/// Migrate all approved tables (or a filtered subset).
///
/// FK parents complete before children start, enforced by the topological
/// order rather than locks. If any table needs FK enforcement disabled,
/// it is turned off for the stage and re-enabled on every exit path.
pub async fn migrate_all(
    source: Arc<dyn SourceConnector>,
    target: Arc<dyn TargetConnector>,
    config: &Config,
    run: &RunContext,
    options: &MigrateOptions,
    cancel: CancellationToken,
    events: EventSink,
) -> Result<MigrationSummary> {
    let mut config = config.clone();
    if let Some(chunk) = options.chunk_size {
        config.migration.chunk_size = chunk;
        config.migration.max_chunk_size = config.migration.max_chunk_size.max(chunk);
    }
    let config = &config;

    let store = MappingStore::new(run);
    let mut mappings = store.list_approved()?;
    if let Some(filter) = &options.tables_filter {
        mappings.retain(|m| {
            filter.iter().any(|f| {
                f == m.source_table_name() || f == &m.source_table || f == &m.target_table
            })
        });
    }
    if mappings.is_empty() {
        return Err(MigrateError::Config(
            "no approved mappings to migrate (run propose and approve first)".into(),
        ));
    }

    let specs = extract::load_table_specs(run)?;

    // FK-aware order over the mapped tables.
    let edges: Vec<(String, Vec<String>)> = mappings
        .iter()
        .map(|m| {
            let name = m.source_table_name().to_string();
            let parents = specs
                .get(&name)
                .map(|s| s.foreign_keys.iter().map(|fk| fk.ref_table.clone()).collect())
                .unwrap_or_default();
            (name, parents)
        })
        .collect();
    let slots = load_order(&edges);

    let by_name: BTreeMap<String, TableMapping> = mappings
        .into_iter()
        .map(|m| (m.source_table_name().to_string(), m))
        .collect();

    let fk_toggle_needed = config.migration.disable_fk_during_load
        || slots.iter().any(|s| s.in_cycle)
        || by_name.values().any(|m| m.disable_fk_during_load);

    if fk_toggle_needed {
        let supported = target.toggle_fk(false).await?;
        info!(supported, "fk enforcement disabled for load");
    }

    // Run the stage body, then re-enable FKs regardless of outcome.
    let outcome = run_levels(
        Arc::clone(&source),
        Arc::clone(&target),
        config,
        run,
        &slots,
        by_name,
        specs,
        cancel,
        events,
    )
    .await;

    if fk_toggle_needed {
        if let Err(e) = target.toggle_fk(true).await {
            warn!(error = %e, "failed to re-enable fk enforcement");
        }
    }

    outcome
}

#[allow(clippy::too_many_arguments)]
async fn run_levels(
    source: Arc<dyn SourceConnector>,
    target: Arc<dyn TargetConnector>,
    config: &Config,
    run: &RunContext,
    slots: &[LoadSlot],
    mut by_name: BTreeMap<String, TableMapping>,
    mut specs: BTreeMap<String, TableSpec>,
    cancel: CancellationToken,
    events: EventSink,
) -> Result<MigrationSummary> {
    let checkpoint_store = CheckpointStore::new(run.checkpoints_dir());
    let run_id = run.run_id.clone().unwrap_or_else(|| "legacy".to_string());
    let dlq_dir = run.dlq_dir();

    let max_level = slots.iter().map(|s| s.level).max().unwrap_or(0);
    let pool = Arc::new(Semaphore::new(config.migration.table_parallelism));

    let mut results = Vec::new();
    let mut failed_tables: HashSet<String> = HashSet::new();
    let mut cancelled = false;

    for level in 0..=max_level {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }

        let mut join_set: JoinSet<(String, String, Result<TableResult>)> = JoinSet::new();
        for slot in slots.iter().filter(|s| s.level == level) {
            let Some(mapping) = by_name.remove(&slot.table) else {
                continue;
            };
            let spec = specs.remove(&slot.table);

            // Topological correctness: a child whose parent failed must
            // not load while FK enforcement may be active.
            let parent_failed = spec
                .as_ref()
                .map(|s| {
                    s.foreign_keys
                        .iter()
                        .any(|fk| failed_tables.contains(&fk.ref_table))
                })
                .unwrap_or(false);
            if parent_failed {
                warn!(table = %slot.table, "skipped: a foreign key parent failed");
                results.push(TableResult {
                    target_table: mapping.target_table.clone(),
                    rows_loaded: 0,
                    rows_failed: 0,
                    status: CheckpointStatus::Failed,
                });
                failed_tables.insert(slot.table.clone());
                continue;
            }

            let source = Arc::clone(&source);
            let target = Arc::clone(&target);
            let pool = Arc::clone(&pool);
            let config = config.clone();
            let checkpoint_store = checkpoint_store.clone();
            let run_id = run_id.clone();
            let dlq_dir = dlq_dir.clone();
            let cancel = cancel.clone();
            let source_name = slot.table.clone();
            let in_cycle = slot.in_cycle;

            join_set.spawn(async move {
                let _permit = pool.acquire_owned().await;
                let job = TableJob {
                    mapping,
                    spec,
                    in_cycle,
                };
                let target_table = job.mapping.target_table.clone();
                let result = migrate_table(
                    source,
                    target,
                    &config,
                    &checkpoint_store,
                    &run_id,
                    &dlq_dir,
                    job,
                    cancel,
                    events,
                )
                .await;
                (source_name, target_table, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            let (source_name, target_table, result) = joined.map_err(|e| {
                MigrateError::Config(format!("migration task panicked: {}", e))
            })?;
            match result {
                Ok(table_result) => {
                    if table_result.status == CheckpointStatus::Failed {
                        failed_tables.insert(source_name);
                    }
                    results.push(table_result);
                }
                Err(MigrateError::Cancelled) => {
                    cancelled = true;
                    results.push(TableResult {
                        target_table,
                        rows_loaded: 0,
                        rows_failed: 0,
                        status: CheckpointStatus::Running,
                    });
                }
                Err(e) => {
                    warn!(table = %source_name, error = %e, "table migration failed");
                    events.emit(Event::Error {
                        stage: "migrate".into(),
                        message: format!("{}: {}", source_name, e),
                    });
                    failed_tables.insert(source_name);
                    results.push(TableResult {
                        target_table,
                        rows_loaded: 0,
                        rows_failed: 0,
                        status: CheckpointStatus::Failed,
                    });
                }
            }
        }

        if cancelled {
            break;
        }
    }

    if cancelled {
        return Err(MigrateError::Cancelled);
    }

    let mut dlq_rows = 0;
    for result in &results {
        dlq_rows += dlq::count_records(&dlq_dir, &result.target_table)?;
    }

    results.sort_by(|a, b| a.target_table.cmp(&b.target_table));
    events.emit(Event::Done {
        stage: "migrate".into(),
        tables: results.len(),
    });
    Ok(MigrationSummary {
        tables: results,
        dlq_rows,
    })
}

/// Resolve per-column transforms for a mapping. Missing pairs are a
/// mapping error, fatal during migrate.
fn resolve_transforms(mapping: &TableMapping) -> Result<Vec<ValueTransform>> {
    let mysql = MysqlDialect;
    mapping
        .columns
        .iter()
        .map(|column| {
            let target_canonical = mysql.to_canonical(&column.target_type).canonical;
            transform_for(&column.canonical_type, &target_canonical).ok_or_else(|| {
                MigrateError::mapping(
                    mapping.source_table.clone(),
                    format!(
                        "no row transform for column {} ({} -> {})",
                        column.source, column.canonical_type, target_canonical
                    ),
                )
            })
        })
        .collect()
}

/// Open the table's DLQ writer on first use. The file (and its header)
/// only exists once a row actually fails.
fn open_dlq<'a>(
    slot: &'a mut Option<DlqWriter>,
    dir: &std::path::Path,
    table: &str,
    columns: &[String],
) -> Result<&'a mut DlqWriter> {
    if slot.is_none() {
        *slot = Some(DlqWriter::open(dir, table, columns)?);
    }
    Ok(slot.as_mut().expect("dlq writer just created"))
}

/// Extract an integer key from a row for keyset pagination.
fn key_of_row(row: &Row, pk_index: usize) -> Option<i64> {
    match row.get(pk_index)? {
        SqlValue::I16(v) => Some(i64::from(*v)),
        SqlValue::I32(v) => Some(i64::from(*v)),
        SqlValue::I64(v) => Some(*v),
        _ => None,
    }
}

#[allow(clippy::too_many_arguments)]
async fn migrate_table(
    source: Arc<dyn SourceConnector>,
    target: Arc<dyn TargetConnector>,
    config: &Config,
    checkpoint_store: &CheckpointStore,
    run_id: &str,
    dlq_dir: &std::path::Path,
    job: TableJob,
    cancel: CancellationToken,
    events: EventSink,
) -> Result<TableResult> {
    let mapping = &job.mapping;
    let target_table = mapping.target_table.clone();
    if job.in_cycle {
        debug!(table = %target_table, "table is part of an FK cycle; loading under disabled FK enforcement");
    }

    let mut checkpoint = checkpoint_store.acquire(run_id, &target_table)?;
    if checkpoint.status == CheckpointStatus::Done {
        info!(table = %target_table, "already done, skipping");
        return Ok(TableResult {
            target_table,
            rows_loaded: checkpoint.rows_loaded,
            rows_failed: checkpoint.rows_failed,
            status: CheckpointStatus::Done,
        });
    }
    if checkpoint.last_offset > 0 {
        info!(
            table = %target_table,
            offset = checkpoint.last_offset,
            "resuming from checkpoint"
        );
    }

    let transforms = resolve_transforms(mapping)?;
    let source_columns = mapping.source_columns();
    let target_columns = mapping.target_columns();

    let (source_schema, source_name) = match mapping.source_table.split_once('.') {
        Some((schema, name)) => (schema.to_string(), name.to_string()),
        None => (String::new(), mapping.source_table.clone()),
    };
    let source_ref = TableRef::new(source_schema, source_name);
    let target_ref = TableRef::new("", &target_table);

    let source_count = source.row_count(&source_ref).await?;

    // Keyset pagination needs a single integer PK; everything else pages
    // with OFFSET over a deterministic ORDER BY.
    let keyset = job.spec.as_ref().and_then(|s| s.keyset_column()).and_then(|pk| {
        source_columns
            .iter()
            .position(|c| c == &pk.name)
            .map(|idx| (pk.name.clone(), idx))
    });
    let order_by = job
        .spec
        .as_ref()
        .map(|s| s.deterministic_order())
        .unwrap_or_else(|| source_columns.clone());

    checkpoint.mark_running();
    checkpoint_store.save(&checkpoint)?;

    let sizer = Arc::new(ChunkSizer::new(
        config.migration.chunk_size,
        config.migration.max_chunk_size,
    ));

    // Reader task: fetches chunk N+1 while the write loop loads chunk N.
    // Channel capacity 1 is the single-slot read-ahead buffer.
    let (chunk_tx, mut chunk_rx) = mpsc::channel::<Result<Vec<Row>>>(1);
    let reader = {
        let source = Arc::clone(&source);
        let sizer = Arc::clone(&sizer);
        let source_ref = source_ref.clone();
        let source_columns = source_columns.clone();
        let order_by = order_by.clone();
        let keyset = keyset.clone();
        let cancel = cancel.clone();
        let mut offset = checkpoint.last_offset;
        let mut last_key = checkpoint.last_key;

        tokio::spawn(async move {
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let chunk_size = sizer.get();
                let query = ChunkQuery {
                    table: source_ref.clone(),
                    columns: source_columns.clone(),
                    order_by: order_by.clone(),
                    chunk_size,
                    offset,
                    after_key: keyset.as_ref().and_then(|(column, _)| {
                        last_key.map(|last| KeysetCursor {
                            column: column.clone(),
                            last,
                        })
                    }),
                };
                match source.fetch_chunk(&query).await {
                    Ok(rows) => {
                        if rows.is_empty() {
                            break;
                        }
                        offset += rows.len() as i64;
                        if let Some((_, pk_index)) = &keyset {
                            if let Some(last_row) = rows.last() {
                                last_key = key_of_row(last_row, *pk_index);
                            }
                        }
                        if chunk_tx.send(Ok(rows)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = chunk_tx.send(Err(e)).await;
                        break;
                    }
                }
            }
        })
    };

    let chunk_timeout = Duration::from_secs(config.migration.chunk_timeout_secs);
    let mut dlq_writer: Option<DlqWriter> = None;
    let mut stream_error: Option<MigrateError> = None;
    let mut was_cancelled = false;

    while let Some(message) = chunk_rx.recv().await {
        let rows = match message {
            Ok(rows) => rows,
            Err(e) => {
                stream_error = Some(e);
                break;
            }
        };
        let chunk_len = rows.len();
        let chunk_last_key = keyset
            .as_ref()
            .and_then(|(_, pk_index)| rows.last().and_then(|r| key_of_row(r, *pk_index)));

        // Transform every row; conversion failures go straight to the DLQ.
        let mut submitted = Vec::with_capacity(chunk_len);
        let mut submitted_sources = Vec::with_capacity(chunk_len);
        let mut failed: u64 = 0;
        for row in rows {
            match crate::transform::apply_row(&transforms, row.clone()) {
                Ok(transformed) => {
                    submitted.push(transformed);
                    submitted_sources.push(row);
                }
                Err(e) => {
                    let writer = open_dlq(&mut dlq_writer, dlq_dir, &target_table, &source_columns)?;
                    writer.append(&row, LoadErrorKind::TypeConversion, &e.to_string())?;
                    failed += 1;
                }
            }
        }

        // Bulk load with the per-chunk timeout. A timeout is treated as a
        // bulk_load failure: the whole chunk goes to the DLQ.
        let mut inserted: u64 = 0;
        if !submitted.is_empty() {
            let load = tokio::time::timeout(
                chunk_timeout,
                target.bulk_load(&target_ref, &target_columns, submitted),
            )
            .await;
            match load {
                Ok(Ok(outcome)) => {
                    inserted = outcome.inserted;
                    if outcome.per_row_errors.is_empty() {
                        sizer.grow();
                    } else {
                        let writer = open_dlq(&mut dlq_writer, dlq_dir, &target_table, &source_columns)?;
                        for row_error in &outcome.per_row_errors {
                            let source_row = submitted_sources
                                .get(row_error.row_index)
                                .cloned()
                                .unwrap_or_default();
                            writer.append(&source_row, row_error.kind, &row_error.detail)?;
                            failed += 1;
                        }
                    }
                }
                Ok(Err(e)) => {
                    // Engine-level failure: fatal for this table. The
                    // checkpoint still reflects the last committed chunk.
                    reader.abort();
                    checkpoint.mark_failed();
                    checkpoint_store.save(&checkpoint)?;
                    return Err(e);
                }
                Err(_elapsed) => {
                    warn!(
                        table = %target_table,
                        rows = submitted_sources.len(),
                        "chunk timed out; routing to DLQ"
                    );
                    let writer = open_dlq(&mut dlq_writer, dlq_dir, &target_table, &source_columns)?;
                    for source_row in &submitted_sources {
                        writer.append(
                            source_row,
                            LoadErrorKind::Unknown,
                            &format!("chunk timeout after {}s", chunk_timeout.as_secs()),
                        )?;
                        failed += 1;
                    }
                    sizer.shrink();
                }
            }
        }

        // Commit the chunk: checkpoint atomically, fsync the DLQ.
        checkpoint.advance(chunk_len, inserted, failed, chunk_last_key)?;
        checkpoint_store.save(&checkpoint)?;
        if let Some(writer) = dlq_writer.as_mut() {
            writer.sync()?;
        }
        debug!(
            table = %target_table,
            offset = checkpoint.last_offset,
            loaded = checkpoint.rows_loaded,
            "chunk committed"
        );
        events.emit(Event::Progress {
            stage: "migrate".into(),
            table: target_table.clone(),
            rows_done: checkpoint.rows_loaded + checkpoint.rows_failed,
            rows_total: source_count,
        });

        // Cooperative cancellation: the chunk above completed and was
        // checkpointed, so stopping here is always safe.
        if cancel.is_cancelled() {
            was_cancelled = true;
            break;
        }
    }

    reader.abort();

    if let Some(e) = stream_error {
        checkpoint.mark_failed();
        checkpoint_store.save(&checkpoint)?;
        return Err(e);
    }
    if was_cancelled {
        checkpoint_store.save(&checkpoint)?;
        return Err(MigrateError::Cancelled);
    }

    debug_assert!(checkpoint.rows_loaded + checkpoint.rows_failed <= source_count);
    checkpoint.mark_done();
    checkpoint_store.save(&checkpoint)?;

    info!(
        table = %target_table,
        rows_loaded = checkpoint.rows_loaded,
        rows_failed = checkpoint.rows_failed,
        "table complete"
    );
    events.emit(Event::TableDone {
        stage: "migrate".into(),
        table: target_table.clone(),
        rows_loaded: checkpoint.rows_loaded,
        rows_failed: checkpoint.rows_failed,
    });

    Ok(TableResult {
        target_table,
        rows_loaded: checkpoint.rows_loaded,
        rows_failed: checkpoint.rows_failed,
        status: CheckpointStatus::Done,
    })
}
