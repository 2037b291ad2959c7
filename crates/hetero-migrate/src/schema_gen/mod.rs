//! Schema generator: renders MySQL DDL from approved mappings.
//!
//! Tables are emitted as `CREATE TABLE IF NOT EXISTS` so re-running apply
//! is idempotent. Foreign keys are deliberately deferred to a single
//! `_foreign_keys.sql` batch executed after every table exists, so table
//! creation order never matters.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{info, warn};

use crate::core::schema::{ColumnRole, TableSpec};
use crate::core::traits::TargetConnector;
use crate::error::{MigrateError, Result};
use crate::mapping::TableMapping;
use crate::runs::RunContext;

/// Quote a MySQL identifier, doubling embedded backticks.
pub fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Target types that need a key prefix length when indexed.
fn needs_index_prefix(target_type: &str) -> bool {
    let upper = target_type.to_ascii_uppercase();
    upper.contains("TEXT") || upper.contains("BLOB") || upper == "JSON"
}

/// Render the `CREATE TABLE` statement for one approved mapping.
pub fn render_create_table(mapping: &TableMapping, schema: &str) -> String {
    let mut lines = Vec::new();
    let mut pk_columns = Vec::new();

    for column in &mapping.columns {
        let nullable = if column.nullable { "" } else { " NOT NULL" };
        lines.push(format!(
            "    {} {}{}",
            quote_ident(&column.target),
            column.target_type,
            nullable
        ));
        if column.role == ColumnRole::PrimaryKey {
            pk_columns.push(quote_ident(&column.target));
        }
    }
    if !pk_columns.is_empty() {
        lines.push(format!("    PRIMARY KEY ({})", pk_columns.join(", ")));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {}.{} (\n{}\n) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;",
        quote_ident(schema),
        quote_ident(&mapping.target_table),
        lines.join(",\n")
    )
}

/// Render secondary index statements implied by column roles.
pub fn render_indexes(mapping: &TableMapping, schema: &str) -> Vec<String> {
    let mut statements = Vec::new();
    for column in &mapping.columns {
        let (prefix, unique) = match column.role {
            ColumnRole::Unique => ("ux", "UNIQUE "),
            ColumnRole::Indexed => ("ix", ""),
            _ => continue,
        };
        // TEXT/BLOB keys require an explicit prefix length on MySQL.
        let key = if needs_index_prefix(&column.target_type) {
            format!("{}(64)", quote_ident(&column.target))
        } else {
            quote_ident(&column.target)
        };
        statements.push(format!(
            "CREATE {}INDEX {} ON {}.{} ({});",
            unique,
            quote_ident(&format!("{}_{}_{}", prefix, mapping.target_table, column.target)),
            quote_ident(schema),
            quote_ident(&mapping.target_table),
            key
        ));
    }
    statements
}

/// Render the deferred FK batch for all approved mappings.
///
/// Column names are translated through each table's mapping; FKs pointing
/// at tables outside the approved set are skipped with a warning.
pub fn render_foreign_keys(
    mappings: &[TableMapping],
    specs: &BTreeMap<String, TableSpec>,
    schema: &str,
) -> Vec<String> {
    let by_source: BTreeMap<&str, &TableMapping> = mappings
        .iter()
        .map(|m| (m.source_table_name(), m))
        .collect();

    let mut statements = Vec::new();
    for mapping in mappings {
        let Some(spec) = specs.get(mapping.source_table_name()) else {
            continue;
        };
        for (i, fk) in spec.foreign_keys.iter().enumerate() {
            let Some(parent) = by_source.get(fk.ref_table.as_str()) else {
                warn!(
                    table = %mapping.target_table,
                    parent = %fk.ref_table,
                    "skipping foreign key to table outside the approved set"
                );
                continue;
            };

            let rename = |m: &TableMapping, source: &str| {
                m.columns
                    .iter()
                    .find(|c| c.source == source)
                    .map(|c| c.target.clone())
                    .unwrap_or_else(|| source.to_string())
            };
            let local: Vec<String> = fk
                .columns
                .iter()
                .map(|c| quote_ident(&rename(mapping, c)))
                .collect();
            let referenced: Vec<String> = fk
                .ref_columns
                .iter()
                .map(|c| quote_ident(&rename(parent, c)))
                .collect();

            statements.push(format!(
                "ALTER TABLE {}.{} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {}.{} ({});",
                quote_ident(schema),
                quote_ident(&mapping.target_table),
                quote_ident(&format!("fk_{}_{}", mapping.target_table, i)),
                local.join(", "),
                quote_ident(schema),
                quote_ident(&parent.target_table),
                referenced.join(", ")
            ));
        }
    }
    statements
}

/// Write DDL files for every approved mapping into `ddl/<run_id>/`.
/// Returns the per-table file paths (the FK batch file is extra).
pub fn generate_ddl(
    run: &RunContext,
    mappings: &[TableMapping],
    specs: &BTreeMap<String, TableSpec>,
    schema: &str,
) -> Result<Vec<PathBuf>> {
    let ddl_dir = run.ddl_dir();
    std::fs::create_dir_all(&ddl_dir)?;

    let mut paths = Vec::new();
    for mapping in mappings {
        let mut ddl = render_create_table(mapping, schema);
        for statement in render_indexes(mapping, schema) {
            ddl.push_str("\n\n");
            ddl.push_str(&statement);
        }
        ddl.push('\n');

        let path = ddl_dir.join(format!("{}.sql", mapping.target_table));
        std::fs::write(&path, &ddl)?;
        info!(path = %path.display(), "ddl written");
        paths.push(path);
    }

    let fk_statements = render_foreign_keys(mappings, specs, schema);
    if !fk_statements.is_empty() {
        let path = ddl_dir.join("_foreign_keys.sql");
        std::fs::write(&path, fk_statements.join("\n\n") + "\n")?;
        info!(path = %path.display(), "deferred fk batch written");
    }

    Ok(paths)
}

/// Split a DDL file into statements. Statements end with `;` at a line
/// boundary; inline semicolons inside quoted ENUM values are untouched.
fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    for line in sql.lines() {
        current.push_str(line);
        current.push('\n');
        if line.trim_end().ends_with(';') {
            let statement = current.trim().to_string();
            if !statement.is_empty() {
                statements.push(statement);
            }
            current.clear();
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        statements.push(tail.to_string());
    }
    statements
}

/// Apply previously generated DDL to the target.
///
/// Tables first (any order; `IF NOT EXISTS` makes re-runs idempotent),
/// then the deferred FK batch. Stops at the first failure and reports the
/// offending file; already-created tables are left in place.
pub async fn apply_schema(
    target: &dyn TargetConnector,
    run: &RunContext,
    dry_run: bool,
) -> Result<usize> {
    let ddl_dir = run.ddl_dir();
    let mut table_files: Vec<PathBuf> = std::fs::read_dir(&ddl_dir)
        .map_err(|e| {
            MigrateError::Config(format!(
                "no DDL found at {} (run apply-schema after approval): {}",
                ddl_dir.display(),
                e
            ))
        })?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("sql"))
        .collect();
    table_files.sort();

    // The FK batch always runs last.
    let fk_file = ddl_dir.join("_foreign_keys.sql");
    table_files.retain(|p| p != &fk_file);
    if fk_file.exists() {
        table_files.push(fk_file);
    }

    let mut applied = 0;
    for path in &table_files {
        let sql = std::fs::read_to_string(path)?;
        let file_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        if dry_run {
            println!("-- {}", path.display());
            println!("{}", sql);
            continue;
        }

        for statement in split_statements(&sql) {
            target.exec_ddl(&statement).await.map_err(|e| {
                MigrateError::ddl(file_name.clone(), e.to_string())
            })?;
        }
        info!(file = %file_name, "ddl applied");
        applied += 1;
    }
    Ok(applied)
}
