//! Extractor: reads source schema and statistics into run-scoped JSON
//! artifacts.
//!
//! Catalog-only: no rows are sampled here. Each table lands in its own
//! `schemas/<run_id>/<table>.json`; the `_manifest.json` summary records
//! the run, the table list and any per-table failures. A per-table
//! failure is isolated; only a connection-level failure aborts the stage.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::Config;
use crate::core::schema::{SchemaArtifact, TableSpec};
use crate::core::traits::{SourceConnector, TableRef};
use crate::dialect::type_dialect;
use crate::error::Result;
use crate::events::{Event, EventSink};
use crate::runs::RunContext;

/// Result of one extract stage invocation.
#[derive(Debug)]
pub struct ExtractOutcome {
    pub manifest: SchemaArtifact,
    pub tables: Vec<TableSpec>,
    pub manifest_path: PathBuf,
}

/// Extract the source schema into per-table artifacts plus a manifest.
pub async fn extract_schema(
    source: &dyn SourceConnector,
    config: &Config,
    run: &RunContext,
    events: &EventSink,
) -> Result<ExtractOutcome> {
    let schema_dir = run.schemas_dir();
    std::fs::create_dir_all(&schema_dir)?;

    info!(
        engine = source.engine(),
        database = %config.source.database,
        schema = %config.source.schema,
        "extracting schema"
    );

    // Connection-level failure here is fatal for the stage.
    let tables = source.list_tables(&config.source.schema).await?;
    info!(count = tables.len(), "tables discovered");

    let dialect = type_dialect(source.engine());
    let mut extracted = Vec::new();
    let mut table_names = Vec::new();
    let mut extract_errors = BTreeMap::new();

    for (i, table) in tables.into_iter().enumerate() {
        events.emit(Event::Progress {
            stage: "extract".into(),
            table: table.name.clone(),
            rows_done: i as i64,
            rows_total: -1,
        });

        // Loss annotations are recorded per column for review context.
        if let Some(dialect) = dialect {
            for column in &table.columns {
                let info = dialect.to_canonical(&column.source_type_raw);
                if let Some(loss) = info.loss {
                    warn!(
                        table = %table.name,
                        column = %column.name,
                        loss = %loss,
                        "lossy canonical conversion"
                    );
                }
            }
        }

        let path = schema_dir.join(format!("{}.json", table.name));
        match serde_json::to_string_pretty(&table)
            .map_err(crate::error::MigrateError::from)
            .and_then(|json| std::fs::write(&path, json).map_err(Into::into))
        {
            Ok(()) => {
                table_names.push(table.name.clone());
                extracted.push(table);
            }
            Err(e) => {
                warn!(table = %table.name, error = %e, "table extraction failed");
                extract_errors.insert(table.name.clone(), e.to_string());
            }
        }
    }

    let manifest = SchemaArtifact {
        source_engine: source.engine().to_string(),
        database: config.source.database.clone(),
        extracted_at: Utc::now().to_rfc3339(),
        tables: table_names,
        extract_errors,
    };

    let manifest_path = schema_dir.join("_manifest.json");
    std::fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;

    events.emit(Event::Done {
        stage: "extract".into(),
        tables: manifest.tables.len(),
    });

    Ok(ExtractOutcome {
        manifest,
        tables: extracted,
        manifest_path,
    })
}

/// Collect per-column statistics for every extracted table into
/// `stats/<run_id>/<table>.json`. Failures are isolated per table.
pub async fn extract_stats(
    source: &dyn SourceConnector,
    tables: &[TableSpec],
    run: &RunContext,
) -> Result<()> {
    let stats_dir = run.stats_dir();
    std::fs::create_dir_all(&stats_dir)?;

    for table in tables {
        let columns: Vec<String> = table.columns.iter().map(|c| c.name.clone()).collect();
        let table_ref = TableRef::new(&table.schema, &table.name);
        match source.column_stats(&table_ref, &columns).await {
            Ok(stats) => {
                let path = stats_dir.join(format!("{}.json", table.name));
                std::fs::write(&path, serde_json::to_string_pretty(&stats)?)?;
            }
            Err(e) => {
                warn!(table = %table.name, error = %e, "stats collection failed");
            }
        }
    }
    Ok(())
}

/// Load previously extracted table specs for a run, keyed by table name.
pub fn load_table_specs(run: &RunContext) -> Result<BTreeMap<String, TableSpec>> {
    let mut specs = BTreeMap::new();
    let dir = run.schemas_dir();
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Ok(specs);
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if name.starts_with('_') || path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let raw = std::fs::read_to_string(&path)?;
        let spec: TableSpec = serde_json::from_str(&raw)?;
        specs.insert(spec.name.clone(), spec);
    }
    Ok(specs)
}

/// Load the extraction manifest for a run, if present.
pub fn load_manifest(run: &RunContext) -> Result<Option<SchemaArtifact>> {
    let path = run.schemas_dir().join("_manifest.json");
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&raw)?))
}
