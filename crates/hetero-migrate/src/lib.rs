//! # hetero-migrate
//!
//! Heterogeneous relational database migration: PostgreSQL or Microsoft
//! SQL Server sources into MySQL targets, as a six-stage pipeline:
//! **extract → propose → review → apply-schema → migrate → validate**.
//!
//! The library provides:
//!
//! - **Canonical type mapping** between engines through a closed
//!   intermediate type set, with loss annotations
//! - **LLM-assisted mapping proposals** with a deterministic rule-based
//!   fallback (the pipeline succeeds with the LLM disabled)
//! - **Chunked, resumable data migration** with durable checkpoints, a
//!   per-table dead letter queue, and FK-aware load ordering
//! - **Multi-level validation** (row counts, aggregates, sample hashes)
//! - **Run isolation**: every artifact is namespaced by a run ID
//!
//! ## Example
//!
//! ```rust,no_run
//! use hetero_migrate::{connectors, Config, EventSink, MigrateOptions, RunRegistry};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> hetero_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let registry = RunRegistry::new(&config.runs.artifact_root);
//!     let run = registry.open(None, &config.source.engine, &config.target.engine, false)?;
//!
//!     let source = connectors::connect_source(&config).await?;
//!     let target = connectors::connect_target(&config).await?;
//!     let summary = hetero_migrate::migrate::migrate_all(
//!         source,
//!         target,
//!         &config,
//!         &run,
//!         &MigrateOptions::default(),
//!         CancellationToken::new(),
//!         EventSink::default(),
//!     )
//!     .await?;
//!     println!("loaded {} tables", summary.tables.len());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connectors;
pub mod core;
pub mod dialect;
pub mod error;
pub mod events;
pub mod extract;
pub mod mapping;
pub mod migrate;
pub mod propose;
pub mod runs;
pub mod schema_gen;
pub mod transform;
pub mod validate;

// Re-exports for convenient access
pub use crate::config::{
    Config, LlmConfig, MigrationConfig, SourceConfig, TargetConfig, ValidationConfig,
};
pub use crate::core::{
    AggregateFn, BulkLoadOutcome, ChunkQuery, ColumnRole, ColumnSpec, ForeignKey, KeyHash, Row,
    RowError, SampleSpec, SchemaArtifact, SourceConnector, SqlValue, TableRef, TableSpec,
    TargetConnector,
};
pub use crate::dialect::{CanonicalType, TypeDialect, TypeMapping};
pub use crate::error::{LoadErrorKind, MigrateError, Result};
pub use crate::events::{Event, EventSink};
pub use crate::mapping::{ColumnMapping, MappingStatus, MappingStore, TableMapping};
pub use crate::migrate::{
    Checkpoint, CheckpointStatus, CheckpointStore, MigrateOptions, MigrationSummary, TableResult,
};
pub use crate::propose::llm::MappingModel;
pub use crate::runs::{generate_run_id, RunContext, RunRegistry};
pub use crate::validate::{ValidationLevel, ValidationReport, ValidationResult};
