//! End-to-end pipeline tests over in-memory connectors:
//! extract → propose → approve → apply-schema → migrate → validate.

mod common;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use common::{column, pk_column, MemorySource, MemoryTarget};
use hetero_migrate::core::{SourceConnector, TargetConnector};
use hetero_migrate::migrate::CheckpointStatus;
use hetero_migrate::propose::llm::DisabledModel;
use hetero_migrate::validate::ValidationLevel;
use hetero_migrate::{
    extract, migrate, propose, schema_gen, validate, Config, EventSink, ForeignKey,
    MappingStore, MigrateOptions, RunRegistry, SqlValue, TableSpec,
};

fn test_config() -> Config {
    serde_yaml::from_str(
        r#"
source:
  engine: postgres
  host: localhost
  database: appdb
  user: app
  password: secret
target:
  host: localhost
  database: appdb
  user: loader
  password: secret
migration:
  chunk_size: 50000
  max_chunk_size: 50000
"#,
    )
    .unwrap()
}

fn users_table() -> (TableSpec, Vec<Vec<SqlValue>>) {
    let spec = TableSpec {
        schema: "public".to_string(),
        name: "users".to_string(),
        columns: vec![
            pk_column("id", "integer", "INT4"),
            column("age", "smallint", "INT2", true),
        ],
        primary_key: vec!["id".to_string()],
        foreign_keys: vec![],
        row_count_estimate: 2,
    };
    let rows = vec![
        vec![SqlValue::I32(1), SqlValue::I16(20)],
        vec![SqlValue::I32(2), SqlValue::I16(30)],
    ];
    (spec, rows)
}

/// Scenario: a two-row integer table migrates end to end; DDL, data,
/// checkpoint and validation all line up.
#[tokio::test]
async fn test_integer_table_end_to_end() {
    let tmp = tempfile::TempDir::new().unwrap();
    let registry = RunRegistry::new(tmp.path());
    let run = registry.open(None, "postgres", "mysql", true).unwrap();
    let config = test_config();
    let events = EventSink::default();

    let source = Arc::new(MemorySource::new(vec![users_table()]));
    let target = Arc::new(MemoryTarget::new());

    // Extract.
    let outcome = extract::extract_schema(source.as_ref(), &config, &run, &events)
        .await
        .unwrap();
    assert_eq!(outcome.manifest.tables, vec!["users"]);
    assert!(outcome.manifest.extract_errors.is_empty());
    extract::extract_stats(source.as_ref(), &outcome.tables, &run)
        .await
        .unwrap();
    assert!(run.stats_dir().join("users.json").exists());

    // Propose (LLM disabled -> deterministic fallback) and approve.
    propose::propose_all(
        Arc::new(DisabledModel),
        &config,
        &run,
        &outcome.tables,
        &events,
    )
    .await
    .unwrap();
    let store = MappingStore::new(&run);
    let specs = extract::load_table_specs(&run).unwrap();
    let approvals = store.approve_all(&specs).unwrap();
    assert!(approvals.iter().all(|(_, outcome)| outcome.is_ok()));

    // Generate DDL and check the expected shape.
    let mappings = store.list_approved().unwrap();
    schema_gen::generate_ddl(&run, &mappings, &specs, "appdb").unwrap();
    let ddl = std::fs::read_to_string(run.ddl_dir().join("users.sql")).unwrap();
    assert!(ddl.contains("CREATE TABLE IF NOT EXISTS `appdb`.`users`"));
    assert!(ddl.contains("`id` INT NOT NULL"));
    assert!(ddl.contains("`age` SMALLINT"));
    assert!(ddl.contains("PRIMARY KEY (`id`)"));

    schema_gen::apply_schema(target.as_ref(), &run, false)
        .await
        .unwrap();
    assert_eq!(target.ddl_log.lock().unwrap().len(), 1);

    // Migrate.
    let source_dyn: Arc<dyn SourceConnector> = source.clone();
    let target_dyn: Arc<dyn TargetConnector> = target.clone();
    let summary = migrate::migrate_all(
        source_dyn,
        target_dyn,
        &config,
        &run,
        &MigrateOptions::default(),
        CancellationToken::new(),
        events,
    )
    .await
    .unwrap();

    assert_eq!(summary.dlq_rows, 0);
    assert_eq!(summary.tables.len(), 1);
    assert_eq!(summary.tables[0].rows_loaded, 2);
    assert_eq!(summary.tables[0].rows_failed, 0);
    assert_eq!(summary.tables[0].status, CheckpointStatus::Done);

    // Target rows are identical (integer transforms are identities).
    let rows = target.rows("users");
    assert_eq!(
        rows,
        vec![
            vec![SqlValue::I32(1), SqlValue::I16(20)],
            vec![SqlValue::I32(2), SqlValue::I16(30)],
        ]
    );

    // Checkpoint after completion.
    let checkpoints = migrate::CheckpointStore::new(run.checkpoints_dir());
    let checkpoint = checkpoints.load("users").unwrap().unwrap();
    assert_eq!(checkpoint.rows_loaded, 2);
    assert_eq!(checkpoint.rows_failed, 0);
    assert_eq!(checkpoint.status, CheckpointStatus::Done);

    // Validate L1-L3.
    let (report, report_path) = validate::validate_all(
        source.as_ref(),
        target.as_ref(),
        &config,
        &run,
        ValidationLevel::L3,
        &events,
    )
    .await
    .unwrap();
    assert!(report.all_pass, "report: {:?}", report);
    assert!(report_path.exists());
    assert!(run.reports_dir().join("summary.html").exists());
}

/// Scenario: mutual FK cycle. Both tables load with FK enforcement
/// disabled for the stage, and enforcement is restored afterwards.
#[tokio::test]
async fn test_cyclic_fk_tables_load_with_fk_disabled() {
    let tmp = tempfile::TempDir::new().unwrap();
    let registry = RunRegistry::new(tmp.path());
    let run = registry.open(None, "postgres", "mysql", true).unwrap();
    let config = test_config();
    let events = EventSink::default();

    let table_a = TableSpec {
        schema: "public".to_string(),
        name: "a".to_string(),
        columns: vec![
            pk_column("id", "integer", "INT4"),
            column("b_id", "integer", "INT4", true),
        ],
        primary_key: vec!["id".to_string()],
        foreign_keys: vec![ForeignKey {
            columns: vec!["b_id".to_string()],
            ref_table: "b".to_string(),
            ref_columns: vec!["id".to_string()],
        }],
        row_count_estimate: 1,
    };
    let table_b = TableSpec {
        schema: "public".to_string(),
        name: "b".to_string(),
        columns: vec![
            pk_column("id", "integer", "INT4"),
            column("a_id", "integer", "INT4", true),
        ],
        primary_key: vec!["id".to_string()],
        foreign_keys: vec![ForeignKey {
            columns: vec!["a_id".to_string()],
            ref_table: "a".to_string(),
            ref_columns: vec!["id".to_string()],
        }],
        row_count_estimate: 1,
    };

    let source = Arc::new(MemorySource::new(vec![
        (table_a, vec![vec![SqlValue::I32(1), SqlValue::I32(1)]]),
        (table_b, vec![vec![SqlValue::I32(1), SqlValue::I32(1)]]),
    ]));
    let target = Arc::new(MemoryTarget::new());

    let outcome = extract::extract_schema(source.as_ref(), &config, &run, &events)
        .await
        .unwrap();
    propose::propose_all(
        Arc::new(DisabledModel),
        &config,
        &run,
        &outcome.tables,
        &events,
    )
    .await
    .unwrap();
    let store = MappingStore::new(&run);
    let specs = extract::load_table_specs(&run).unwrap();
    store.approve_all(&specs).unwrap();

    let source_dyn: Arc<dyn SourceConnector> = source.clone();
    let target_dyn: Arc<dyn TargetConnector> = target.clone();
    let summary = migrate::migrate_all(
        source_dyn,
        target_dyn,
        &config,
        &run,
        &MigrateOptions::default(),
        CancellationToken::new(),
        events,
    )
    .await
    .unwrap();

    assert_eq!(summary.tables.len(), 2);
    assert!(summary
        .tables
        .iter()
        .all(|t| t.status == CheckpointStatus::Done && t.rows_loaded == 1));

    // FK enforcement off at stage start, back on at stage end.
    let fk_log = target.fk_log.lock().unwrap().clone();
    assert_eq!(fk_log, vec![false, true]);

    assert_eq!(target.rows("a").len(), 1);
    assert_eq!(target.rows("b").len(), 1);
}

/// Parents load before children when FK enforcement stays on.
#[tokio::test]
async fn test_parent_loads_before_child() {
    let tmp = tempfile::TempDir::new().unwrap();
    let registry = RunRegistry::new(tmp.path());
    let run = registry.open(None, "postgres", "mysql", true).unwrap();
    let mut config = test_config();
    config.migration.disable_fk_during_load = false;
    let events = EventSink::default();

    let parent = TableSpec {
        schema: "public".to_string(),
        name: "users".to_string(),
        columns: vec![pk_column("id", "integer", "INT4")],
        primary_key: vec!["id".to_string()],
        foreign_keys: vec![],
        row_count_estimate: 1,
    };
    let child = TableSpec {
        schema: "public".to_string(),
        name: "orders".to_string(),
        columns: vec![
            pk_column("id", "integer", "INT4"),
            column("user_id", "integer", "INT4", false),
        ],
        primary_key: vec!["id".to_string()],
        foreign_keys: vec![ForeignKey {
            columns: vec!["user_id".to_string()],
            ref_table: "users".to_string(),
            ref_columns: vec!["id".to_string()],
        }],
        row_count_estimate: 1,
    };

    let source = Arc::new(MemorySource::new(vec![
        (child, vec![vec![SqlValue::I32(10), SqlValue::I32(1)]]),
        (parent, vec![vec![SqlValue::I32(1)]]),
    ]));
    let target = Arc::new(MemoryTarget::new());

    let outcome = extract::extract_schema(source.as_ref(), &config, &run, &events)
        .await
        .unwrap();
    propose::propose_all(
        Arc::new(DisabledModel),
        &config,
        &run,
        &outcome.tables,
        &events,
    )
    .await
    .unwrap();
    let store = MappingStore::new(&run);
    let specs = extract::load_table_specs(&run).unwrap();
    store.approve_all(&specs).unwrap();

    let source_dyn: Arc<dyn SourceConnector> = source.clone();
    let target_dyn: Arc<dyn TargetConnector> = target.clone();
    let summary = migrate::migrate_all(
        source_dyn,
        target_dyn,
        &config,
        &run,
        &MigrateOptions::default(),
        CancellationToken::new(),
        events,
    )
    .await
    .unwrap();

    assert_eq!(summary.tables.len(), 2);
    assert!(summary.tables.iter().all(|t| t.status == CheckpointStatus::Done));
    // No FK toggling was needed for an acyclic graph with FK discipline off.
    assert!(target.fk_log.lock().unwrap().is_empty());
}
