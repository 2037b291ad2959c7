//! hetero-migrate CLI - heterogeneous database migration pipeline.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

use hetero_migrate::propose::llm;
use hetero_migrate::validate::ValidationLevel;
use hetero_migrate::{
    connectors, extract, migrate, propose, runs, schema_gen, validate, Config, EventSink,
    MappingStore, MigrateError, MigrateOptions, RunRegistry,
};

#[derive(Parser)]
#[command(name = "hetero-migrate")]
#[command(about = "Migrate PostgreSQL/MSSQL databases to MySQL")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Print progress events as JSON lines to stdout
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract schema and statistics from the source database
    Extract {
        /// Run identifier; a new one is generated if omitted
        #[arg(long)]
        run_id: Option<String>,

        /// Override the source database name
        #[arg(long)]
        database: Option<String>,

        /// Override the source schema
        #[arg(long)]
        schema: Option<String>,
    },

    /// Generate draft mappings (LLM-assisted, rule-based fallback)
    Propose {
        #[arg(long)]
        run_id: Option<String>,

        /// Override the LLM provider
        #[arg(long)]
        provider: Option<String>,

        /// Override the LLM model
        #[arg(long)]
        model: Option<String>,
    },

    /// Validate mapping files (approved set by default, or a given path)
    ValidateMapping {
        /// Mapping file or directory to validate
        path: Option<PathBuf>,

        #[arg(long)]
        run_id: Option<String>,
    },

    /// Approve draft mappings (all drafts, or selected tables)
    Approve {
        /// Tables to approve; approves every draft if omitted
        tables: Vec<String>,

        #[arg(long)]
        run_id: Option<String>,
    },

    /// Generate DDL and optionally apply it to the target
    ApplySchema {
        #[arg(long)]
        run_id: Option<String>,

        /// Preview DDL without touching the target (default)
        #[arg(long, default_value_t = true)]
        dry_run: bool,

        /// Execute the DDL against the target
        #[arg(long)]
        apply: bool,
    },

    /// Run the chunked data migration
    Migrate {
        #[arg(long)]
        run_id: Option<String>,

        /// Comma-separated source table filter
        #[arg(long)]
        tables: Option<String>,

        /// Override the initial chunk size
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Run post-migration validation
    Validate {
        #[arg(long)]
        run_id: Option<String>,

        /// Deepest level to run: L1, L2 or L3
        #[arg(long, default_value = "L3")]
        level: String,
    },

    /// Show checkpoint status for a run
    ShowCheckpoints {
        #[arg(long)]
        run_id: String,
    },

    /// List supported engines
    ListEngines,

    /// Delete run artifacts older than the configured age
    Prune,

    /// Remove all generated artifacts
    Clean,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);
    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// SIGINT/SIGTERM cancel the pipeline cooperatively: in-flight chunks
/// finish and checkpoint before the process exits.
fn setup_signal_handler() -> CancellationToken {
    let cancel = CancellationToken::new();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let for_int = cancel.clone();
        tokio::spawn(async move {
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                eprintln!("\nReceived SIGINT; finishing the current chunk...");
                for_int.cancel();
            }
        });
        let for_term = cancel.clone();
        tokio::spawn(async move {
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                eprintln!("\nReceived SIGTERM; finishing the current chunk...");
                for_term.cancel();
            }
        });
    }

    #[cfg(not(unix))]
    {
        let for_ctrl_c = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nReceived Ctrl-C; finishing the current chunk...");
                for_ctrl_c.cancel();
            }
        });
    }

    cancel
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();
    setup_logging(&cli.verbosity, &cli.log_format);

    // `list-engines` needs no configuration.
    if matches!(cli.command, Commands::ListEngines) {
        println!("Source engines:");
        for engine in connectors::SOURCE_ENGINES {
            println!("  - {}", engine);
        }
        println!("Target engines:");
        for engine in connectors::TARGET_ENGINES {
            println!("  - {}", engine);
        }
        return Ok(());
    }

    let mut config = Config::load(&cli.config)?;
    info!("loaded configuration from {}", cli.config.display());

    let registry = RunRegistry::new(&config.runs.artifact_root);
    let events = EventSink::new(cli.progress);
    let cancel = setup_signal_handler();

    match cli.command {
        Commands::ListEngines => unreachable!("handled above"),

        Commands::Extract {
            run_id,
            database,
            schema,
        } => {
            if let Some(database) = database {
                config.source.database = database;
            }
            if let Some(schema) = schema {
                config.source.schema = schema;
            }
            let run_id = run_id.or_else(|| Some(runs::generate_run_id()));
            let run = registry.open(
                run_id.as_deref(),
                &config.source.engine,
                &config.target.engine,
                true,
            )?;
            println!(
                "Run ID: {}",
                run.run_id.as_deref().unwrap_or("(legacy)")
            );

            let source = connectors::connect_source(&config).await?;
            let outcome = extract::extract_schema(source.as_ref(), &config, &run, &events).await?;
            extract::extract_stats(source.as_ref(), &outcome.tables, &run).await?;
            source.close().await;

            println!(
                "Extracted {} table(s) ({} failed) to {}",
                outcome.manifest.tables.len(),
                outcome.manifest.extract_errors.len(),
                run.schemas_dir().display()
            );
        }

        Commands::Propose {
            run_id,
            provider,
            model,
        } => {
            if let Some(provider) = provider {
                config.llm.provider = provider;
            }
            if let Some(model) = model {
                config.llm.model = model;
            }
            let run = registry.open(
                run_id.as_deref(),
                &config.source.engine,
                &config.target.engine,
                false,
            )?;

            let specs = extract::load_table_specs(&run)?;
            if specs.is_empty() {
                return Err(MigrateError::Config(
                    "no schema artifacts found; run extract first".into(),
                ));
            }
            let tables: Vec<_> = specs.into_values().collect();
            let model = llm::build_model(&config.llm);
            let written = propose::propose_all(model, &config, &run, &tables, &events).await?;
            println!(
                "Wrote {} draft mapping(s) to {}",
                written,
                run.draft_mappings_dir().display()
            );
            println!(
                "Review them, then promote with `approve` (or move files to {}).",
                run.approved_mappings_dir().display()
            );
        }

        Commands::ValidateMapping { path, run_id } => {
            let mappings = match path {
                Some(path) => {
                    let mut files = Vec::new();
                    if path.is_dir() {
                        for entry in std::fs::read_dir(&path)?.flatten() {
                            if entry.path().extension().and_then(|e| e.to_str())
                                == Some("json")
                            {
                                files.push(entry.path());
                            }
                        }
                        files.sort();
                    } else {
                        files.push(path);
                    }
                    let mut mappings = Vec::new();
                    for file in files {
                        let raw = std::fs::read_to_string(&file)?;
                        mappings.push(serde_json::from_str(&raw)?);
                    }
                    mappings
                }
                None => {
                    let run = registry.open(
                        run_id.as_deref(),
                        &config.source.engine,
                        &config.target.engine,
                        false,
                    )?;
                    MappingStore::new(&run).list_approved()?
                }
            };

            if mappings.is_empty() {
                return Err(MigrateError::Config("no mapping files found".into()));
            }

            let mut errors = 0;
            for mapping in &mappings {
                match hetero_migrate::mapping::validate_mapping(mapping, None) {
                    Ok(()) => println!(
                        "  ok {} ({} columns)",
                        mapping.source_table,
                        mapping.columns.len()
                    ),
                    Err(e) => {
                        errors += 1;
                        println!("  FAIL {}: {}", mapping.source_table, e);
                    }
                }
            }
            if errors > 0 {
                return Err(MigrateError::Validation(format!(
                    "{} mapping(s) failed validation",
                    errors
                )));
            }
            println!("All {} mapping(s) valid.", mappings.len());
        }

        Commands::Approve { tables, run_id } => {
            let run = registry.open(
                run_id.as_deref(),
                &config.source.engine,
                &config.target.engine,
                false,
            )?;
            let store = MappingStore::new(&run);
            let specs = extract::load_table_specs(&run)?;

            let outcomes = if tables.is_empty() {
                store.approve_all(&specs)?
            } else {
                tables
                    .into_iter()
                    .map(|table| {
                        let outcome = store.approve(&table, specs.get(&table));
                        (table, outcome)
                    })
                    .collect()
            };

            let mut failed = 0;
            for (table, outcome) in &outcomes {
                match outcome {
                    Ok(()) => println!("  approved {}", table),
                    Err(e) => {
                        failed += 1;
                        println!("  FAIL {}: {}", table, e);
                    }
                }
            }
            if failed > 0 {
                return Err(MigrateError::Validation(format!(
                    "{} mapping(s) could not be approved",
                    failed
                )));
            }
        }

        Commands::ApplySchema {
            run_id,
            dry_run,
            apply,
        } => {
            let dry_run = dry_run && !apply;
            let run = registry.open(
                run_id.as_deref(),
                &config.source.engine,
                &config.target.engine,
                false,
            )?;
            let store = MappingStore::new(&run);
            let mappings = store.list_approved()?;
            if mappings.is_empty() {
                return Err(MigrateError::Config(
                    "no approved mappings to generate DDL from".into(),
                ));
            }
            let specs = extract::load_table_specs(&run)?;
            let paths =
                schema_gen::generate_ddl(&run, &mappings, &specs, &config.target.database)?;
            println!("Generated DDL for {} table(s)", paths.len());

            if dry_run {
                let target = NoTarget;
                schema_gen::apply_schema(&target, &run, true).await?;
                println!("Dry run only; re-run with --apply to execute.");
            } else {
                let target = connectors::connect_target(&config).await?;
                let applied = schema_gen::apply_schema(target.as_ref(), &run, false).await?;
                target.close().await;
                println!("Applied {} DDL file(s)", applied);
            }
        }

        Commands::Migrate {
            run_id,
            tables,
            chunk_size,
        } => {
            if let Some(chunk_size) = chunk_size {
                config.migration.chunk_size = chunk_size;
                config.migration.max_chunk_size =
                    config.migration.max_chunk_size.max(chunk_size);
            }
            let run = registry.open(
                run_id.as_deref(),
                &config.source.engine,
                &config.target.engine,
                false,
            )?;
            let options = MigrateOptions {
                tables_filter: tables
                    .map(|t| t.split(',').map(|s| s.trim().to_string()).collect()),
                chunk_size,
            };

            let source = connectors::connect_source(&config).await?;
            let target = connectors::connect_target(&config).await?;
            let summary = migrate::migrate_all(
                source.clone(),
                target.clone(),
                &config,
                &run,
                &options,
                cancel,
                events,
            )
            .await?;
            source.close().await;
            target.close().await;

            println!("\n{:<40} {:>12} {:>12}", "Table", "Loaded", "Failed");
            println!("{}", "-".repeat(66));
            for table in &summary.tables {
                println!(
                    "{:<40} {:>12} {:>12}",
                    table.target_table, table.rows_loaded, table.rows_failed
                );
            }
            println!("\nRun ID: {}", run.run_id.as_deref().unwrap_or("(legacy)"));

            if summary.dlq_rows > 0 {
                return Err(MigrateError::MigrationAborted {
                    table: "see dlq/".into(),
                    dlq_rows: summary.dlq_rows,
                });
            }
        }

        Commands::Validate { run_id, level } => {
            let level: ValidationLevel = level.parse()?;
            let run = registry.open(
                run_id.as_deref(),
                &config.source.engine,
                &config.target.engine,
                false,
            )?;

            let source = connectors::connect_source(&config).await?;
            let target = connectors::connect_target(&config).await?;
            let (report, path) = validate::validate_all(
                source.as_ref(),
                target.as_ref(),
                &config,
                &run,
                level,
                &events,
            )
            .await?;
            source.close().await;
            target.close().await;

            println!(
                "\nValidation: {}",
                if report.all_pass { "ALL PASS" } else { "FAILURES" }
            );
            println!("Report: {}", path.display());
            if !report.all_pass {
                let failed: Vec<_> = report
                    .tables
                    .iter()
                    .filter(|t| !t.pass)
                    .map(|t| t.target_table.clone())
                    .collect();
                return Err(MigrateError::Validation(format!(
                    "validation failed for: {}",
                    failed.join(", ")
                )));
            }
        }

        Commands::ShowCheckpoints { run_id } => {
            let run = registry.open(
                Some(&run_id),
                &config.source.engine,
                &config.target.engine,
                false,
            )?;
            let store = hetero_migrate::migrate::CheckpointStore::new(run.checkpoints_dir());
            let checkpoints = store.list()?;
            if checkpoints.is_empty() {
                println!("No checkpoints found for run {}", run_id);
                return Ok(());
            }
            println!(
                "{:<32} {:>10} {:>10} {:>10} {:<8} Updated",
                "Table", "Offset", "Loaded", "Failed", "Status"
            );
            println!("{}", "-".repeat(96));
            for checkpoint in checkpoints {
                println!(
                    "{:<32} {:>10} {:>10} {:>10} {:<8} {}",
                    checkpoint.target_table,
                    checkpoint.last_offset,
                    checkpoint.rows_loaded,
                    checkpoint.rows_failed,
                    format!("{:?}", checkpoint.status).to_lowercase(),
                    checkpoint.updated_at.to_rfc3339()
                );
            }
        }

        Commands::Prune => {
            let pruned = registry.prune(config.runs.prune_after_days)?;
            println!("Pruned {} run(s)", pruned.len());
        }

        Commands::Clean => {
            registry.clean()?;
            println!("All generated artifacts removed.");
        }
    }

    Ok(())
}

/// Stand-in target for dry-run schema application; `exec_ddl` is never
/// reached because dry-run mode only prints.
struct NoTarget;

#[async_trait::async_trait]
impl hetero_migrate::TargetConnector for NoTarget {
    fn engine(&self) -> &'static str {
        "none"
    }

    async fn exec_ddl(&self, _statement: &str) -> hetero_migrate::Result<()> {
        Err(MigrateError::Config("dry-run target cannot execute DDL".into()))
    }

    async fn bulk_load(
        &self,
        _table: &hetero_migrate::TableRef,
        _columns: &[String],
        _rows: Vec<hetero_migrate::Row>,
    ) -> hetero_migrate::Result<hetero_migrate::BulkLoadOutcome> {
        Err(MigrateError::Config("dry-run target cannot load data".into()))
    }

    async fn row_count(&self, _table: &hetero_migrate::TableRef) -> hetero_migrate::Result<i64> {
        Ok(0)
    }

    async fn aggregate(
        &self,
        _table: &hetero_migrate::TableRef,
        _column: &str,
        _func: hetero_migrate::AggregateFn,
    ) -> hetero_migrate::Result<hetero_migrate::SqlValue> {
        Ok(hetero_migrate::SqlValue::Null)
    }

    async fn sample_hash(
        &self,
        _table: &hetero_migrate::TableRef,
        _spec: &hetero_migrate::SampleSpec,
    ) -> hetero_migrate::Result<Vec<hetero_migrate::KeyHash>> {
        Ok(Vec::new())
    }

    async fn toggle_fk(&self, _enabled: bool) -> hetero_migrate::Result<bool> {
        Ok(false)
    }

    async fn close(&self) {}
}
