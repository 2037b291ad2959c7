//! Proposer: turns extracted table specs into draft mappings.
//!
//! The LLM is an accelerator, never a correctness-critical component. A
//! proposal is validated against hard invariants (column set matches, the
//! target types parse, a row transform exists, PK columns stay NOT NULL);
//! invalid responses are retried with the violations fed back, and after
//! `max_retries` the deterministic rule-based mapping takes over with
//! `warning = llm_fallback`.

pub mod llm;

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::Config;
use crate::core::schema::{ColumnRole, TableSpec};
use crate::dialect::{is_valid_native_type, CanonicalKind, MysqlDialect, TypeDialect};
use crate::error::Result;
use crate::events::{Event, EventSink};
use crate::mapping::{ColumnMapping, MappingStatus, MappingStore, TableMapping};
use crate::runs::RunContext;
use crate::transform::transform_for;

use llm::MappingModel;

/// Warning attached when the rule-based fallback produced the mapping.
pub const LLM_FALLBACK_WARNING: &str = "llm_fallback";

/// Human-readable transform label for review output.
fn transform_hint(source: CanonicalKind, target: CanonicalKind) -> Option<String> {
    use CanonicalKind::*;
    let hint = match (source, target) {
        (Bool, Bool) | (Bool, Int1 | Int2 | Int4 | Int8) => "bool_to_tinyint",
        (Uuid, Uuid) | (Uuid, Text | NText) => "uuid_to_char36",
        (Json, Json) | (Json, Text | NText | Clob) => "json_canonicalize",
        (DateTimeTz, DateTime) => "utc_drop_zone",
        (Unknown, _) => "carry_as_text",
        _ => return None,
    };
    Some(hint.to_string())
}

/// Deterministic canonical → MySQL mapping for one table. This is the
/// complete fallback path; the pipeline must succeed with only this.
pub fn rule_based_mapping(table: &TableSpec, source_engine: &str) -> TableMapping {
    let mysql = MysqlDialect;
    let columns = table
        .columns
        .iter()
        .map(|column| {
            let native = mysql.from_canonical(&column.canonical_type);
            let target_canonical = mysql.to_canonical(&native.target_type).canonical;
            ColumnMapping {
                source: column.name.clone(),
                source_type_raw: column.source_type_raw.clone(),
                canonical_type: column.canonical_type.clone(),
                target: column.name.clone(),
                target_type: native.target_type,
                nullable: column.nullable,
                role: column.role,
                transform_hint: transform_hint(
                    column.canonical_type.kind(),
                    target_canonical.kind(),
                ),
                warning: native.warning,
            }
        })
        .collect();

    TableMapping {
        source_table: table.full_name(),
        target_table: table.name.clone(),
        source_engine: source_engine.to_string(),
        target_engine: "mysql".to_string(),
        status: MappingStatus::Draft,
        columns,
        load_order_hint: 0,
        disable_fk_during_load: false,
        warning: None,
    }
}

/// Canonical → MySQL reference table injected into the system prompt.
fn canonical_reference() -> String {
    use crate::dialect::CanonicalType::*;
    let mysql = MysqlDialect;
    let samples = [
        Int1,
        Int2,
        Int4,
        Int8,
        Float4,
        Float8,
        Decimal {
            precision: 18,
            scale: 4,
        },
        Bool,
        Text(Some(255)),
        NText(Some(255)),
        Clob,
        Blob,
        Date,
        Time,
        DateTime,
        DateTimeTz,
        Json,
        Uuid,
        BinaryFixed(16),
    ];
    let mut lines = vec![format!("{:<16} mysql", "canonical")];
    lines.push("-".repeat(36));
    for canonical in samples {
        lines.push(format!(
            "{:<16} {}",
            canonical.to_string(),
            mysql.from_canonical(&canonical).target_type
        ));
    }
    lines.join("\n")
}

fn system_prompt(source_engine: &str) -> String {
    format!(
        "You translate relational schemas from {} to mysql.\n\
         Respond with a single JSON object of the form:\n\
         {{\"target_table\": \"<name>\", \"columns\": [{{\"source\": \"<col>\", \
         \"target\": \"<col>\", \"target_type\": \"<mysql type>\", \
         \"transform_hint\": \"<optional>\", \"warning\": \"<optional>\"}}]}}\n\
         Every source column must appear exactly once, in order. Use only \
         native mysql types. Canonical type reference:\n{}",
        source_engine,
        canonical_reference()
    )
}

fn user_prompt(table: &TableSpec) -> String {
    // Serialization of a TableSpec cannot fail.
    let table_json = serde_json::to_string_pretty(table).unwrap_or_default();
    format!("Propose the mysql mapping for this table:\n{}", table_json)
}

/// Shape of an LLM proposal response.
#[derive(Debug, Deserialize)]
struct LlmProposal {
    #[serde(default)]
    target_table: Option<String>,
    columns: Vec<LlmProposalColumn>,
}

#[derive(Debug, Deserialize)]
struct LlmProposalColumn {
    source: String,
    #[serde(default)]
    target: Option<String>,
    target_type: String,
    #[serde(default)]
    transform_hint: Option<String>,
    #[serde(default)]
    warning: Option<String>,
}

/// Check a parsed proposal against the hard invariants. Returns the list
/// of violations (empty when valid).
fn proposal_violations(table: &TableSpec, proposal: &LlmProposal) -> Vec<String> {
    let mut violations = Vec::new();
    let mysql = MysqlDialect;

    if proposal.columns.len() != table.columns.len() {
        violations.push(format!(
            "expected {} columns, got {}",
            table.columns.len(),
            proposal.columns.len()
        ));
        return violations;
    }

    for (expected, proposed) in table.columns.iter().zip(&proposal.columns) {
        if proposed.source != expected.name {
            violations.push(format!(
                "column order mismatch: expected {}, got {}",
                expected.name, proposed.source
            ));
            continue;
        }
        if !is_valid_native_type(&proposed.target_type) {
            violations.push(format!(
                "column {}: `{}` is not a valid mysql type",
                proposed.source, proposed.target_type
            ));
            continue;
        }
        let target_canonical = mysql.to_canonical(&proposed.target_type).canonical;
        if transform_for(&expected.canonical_type, &target_canonical).is_none() {
            violations.push(format!(
                "column {}: no row transform from {} to {}",
                proposed.source, expected.canonical_type, target_canonical
            ));
        }
    }
    violations
}

/// Merge a validated proposal with the table spec into a draft mapping.
fn mapping_from_proposal(
    table: &TableSpec,
    source_engine: &str,
    proposal: LlmProposal,
) -> TableMapping {
    let columns = table
        .columns
        .iter()
        .zip(proposal.columns)
        .map(|(spec, proposed)| ColumnMapping {
            source: spec.name.clone(),
            source_type_raw: spec.source_type_raw.clone(),
            canonical_type: spec.canonical_type.clone(),
            target: proposed.target.unwrap_or_else(|| spec.name.clone()),
            target_type: proposed.target_type,
            nullable: spec.nullable,
            role: spec.role,
            transform_hint: proposed.transform_hint,
            warning: proposed.warning,
        })
        .collect();

    TableMapping {
        source_table: table.full_name(),
        target_table: proposal
            .target_table
            .filter(|t| !t.is_empty())
            .map(|t| t.rsplit('.').next().unwrap_or(&t).to_string())
            .unwrap_or_else(|| table.name.clone()),
        source_engine: source_engine.to_string(),
        target_engine: "mysql".to_string(),
        status: MappingStatus::Draft,
        columns,
        load_order_hint: 0,
        disable_fk_during_load: false,
        warning: None,
    }
}

/// Propose a mapping for one table: LLM with retry-and-feedback, then the
/// rule-based fallback.
pub async fn propose_table(
    model: &dyn MappingModel,
    config: &Config,
    table: &TableSpec,
) -> TableMapping {
    let source_engine = &config.source.engine;
    let system = system_prompt(source_engine);
    let mut user = user_prompt(table);

    for attempt in 1..=config.llm.max_retries {
        let response = match model.complete(&system, &user).await {
            Ok(response) => response,
            Err(e) => {
                warn!(table = %table.name, attempt, error = %e, "llm call failed");
                user = format!(
                    "{}\n\nThe previous attempt failed with: {}. Respond with valid JSON only.",
                    user_prompt(table),
                    e
                );
                continue;
            }
        };

        let proposal: LlmProposal = match serde_json::from_str(response.trim()) {
            Ok(proposal) => proposal,
            Err(e) => {
                warn!(table = %table.name, attempt, error = %e, "llm returned invalid json");
                user = format!(
                    "{}\n\nYour previous response was not valid JSON ({}). \
                     Respond with the JSON object only.",
                    user_prompt(table),
                    e
                );
                continue;
            }
        };

        let violations = proposal_violations(table, &proposal);
        if violations.is_empty() {
            info!(table = %table.name, attempt, "llm proposal accepted");
            return mapping_from_proposal(table, source_engine, proposal);
        }
        warn!(
            table = %table.name,
            attempt,
            violations = violations.len(),
            "llm proposal rejected"
        );
        user = format!(
            "{}\n\nYour previous response violated these constraints:\n- {}\nFix them.",
            user_prompt(table),
            violations.join("\n- ")
        );
    }

    info!(table = %table.name, "falling back to rule-based mapping");
    let mut mapping = rule_based_mapping(table, source_engine);
    mapping.warning = Some(LLM_FALLBACK_WARNING.to_string());
    mapping
}

/// Propose draft mappings for every table, bounded by the propose pool
/// size. Returns the number of drafts written; per-table write failures
/// are reported and skipped.
pub async fn propose_all(
    model: Arc<dyn MappingModel>,
    config: &Config,
    run: &RunContext,
    tables: &[TableSpec],
    events: &EventSink,
) -> Result<usize> {
    let store = MappingStore::new(run);
    let pool = Arc::new(Semaphore::new(config.llm.propose_parallelism.max(1)));

    let mut jobs = FuturesUnordered::new();
    for table in tables.iter().cloned() {
        let model = Arc::clone(&model);
        let pool = Arc::clone(&pool);
        let config = config.clone();
        jobs.push(async move {
            // Holding a permit bounds concurrent LLM exposure.
            let _permit = pool.acquire_owned().await;
            let mapping = propose_table(model.as_ref(), &config, &table).await;
            (table.name.clone(), mapping)
        });
    }

    let mut ordered: BTreeMap<String, TableMapping> = BTreeMap::new();
    while let Some((name, mapping)) = jobs.next().await {
        ordered.insert(name, mapping);
    }

    let mut written = 0;
    for (name, mapping) in ordered {
        match store.write_draft(&mapping) {
            Ok(path) => {
                info!(table = %name, path = %path.display(), "draft written");
                written += 1;
            }
            Err(e) => warn!(table = %name, error = %e, "draft write failed"),
        }
    }

    events.emit(Event::Done {
        stage: "propose".into(),
        tables: written,
    });
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::ColumnSpec;
    use crate::dialect::CanonicalType;
    use crate::error::MigrateError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn users_table() -> TableSpec {
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
                    name: "created_at".to_string(),
                    source_type_raw: "timestamp with time zone".to_string(),
                    canonical_type: CanonicalType::DateTimeTz,
                    nullable: true,
                    role: ColumnRole::None,
                    default: None,
                    comment: String::new(),
                },
            ],
            primary_key: vec!["id".to_string()],
            foreign_keys: vec![],
            row_count_estimate: 0,
        }
    }

    fn test_config() -> Config {
        serde_yaml::from_str(
            r#"
source:
  engine: postgres
  host: localhost
  database: db
  user: u
  password: p
target:
  host: localhost
  database: db
  user: u
  password: p
"#,
        )
        .unwrap()
    }

    /// Mock model that always returns malformed JSON.
    struct MalformedModel {
        calls: AtomicU32,
    }

    #[async_trait]
    impl MappingModel for MalformedModel {
        fn name(&self) -> &str {
            "malformed"
        }

        async fn complete(&self, _system: &str, _user: &str) -> crate::error::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("{not valid json at all".to_string())
        }
    }

    /// Mock model that returns a valid proposal.
    struct GoodModel;

    #[async_trait]
    impl MappingModel for GoodModel {
        fn name(&self) -> &str {
            "good"
        }

        async fn complete(&self, _system: &str, _user: &str) -> crate::error::Result<String> {
            Ok(r#"{
                "target_table": "users",
                "columns": [
                    {"source": "id", "target_type": "INT"},
                    {"source": "created_at", "target_type": "DATETIME",
                     "warning": "loss=timezone"}
                ]
            }"#
            .to_string())
        }
    }

    #[tokio::test]
    async fn test_malformed_llm_retries_then_falls_back() {
        // Scenario: mock LLM returns malformed JSON; proposer retries
        // max_retries times, then writes the rule-based mapping flagged
        // llm_fallback.
        let model = MalformedModel {
            calls: AtomicU32::new(0),
        };
        let config = test_config();
        let table = users_table();

        let mapping = propose_table(&model, &config, &table).await;

        assert_eq!(model.calls.load(Ordering::SeqCst), 3);
        assert_eq!(mapping.warning.as_deref(), Some(LLM_FALLBACK_WARNING));
        assert_eq!(mapping.columns.len(), 2);
        assert_eq!(mapping.columns[0].target_type, "INT");
        assert_eq!(mapping.columns[1].target_type, "DATETIME");
    }

    #[tokio::test]
    async fn test_valid_proposal_accepted_first_try() {
        let config = test_config();
        let mapping = propose_table(&GoodModel, &config, &users_table()).await;
        assert!(mapping.warning.is_none());
        assert_eq!(mapping.target_table, "users");
        assert_eq!(
            mapping.columns[1].warning.as_deref(),
            Some("loss=timezone")
        );
        // Nullability and role come from the spec, not the LLM.
        assert!(!mapping.columns[0].nullable);
        assert_eq!(mapping.columns[0].role, ColumnRole::PrimaryKey);
    }

    #[tokio::test]
    async fn test_disabled_model_goes_straight_to_fallback() {
        let config = test_config();
        let mapping = propose_table(&llm::DisabledModel, &config, &users_table()).await;
        assert_eq!(mapping.warning.as_deref(), Some(LLM_FALLBACK_WARNING));
    }

    #[test]
    fn test_rule_based_mapping_spec_types() {
        let mapping = rule_based_mapping(&users_table(), "postgres");
        assert_eq!(mapping.columns[0].target_type, "INT");
        assert_eq!(mapping.columns[1].target_type, "DATETIME");
        assert_eq!(
            mapping.columns[1].warning.as_deref(),
            Some("loss=timezone")
        );
        assert_eq!(
            mapping.columns[1].transform_hint.as_deref(),
            Some("utc_drop_zone")
        );
    }

    #[test]
    fn test_rule_based_mapping_validates() {
        let table = users_table();
        let mapping = rule_based_mapping(&table, "postgres");
        crate::mapping::validate_mapping(&mapping, Some(&table)).unwrap();
    }

    #[test]
    fn test_proposal_violations_catch_bad_types() {
        let table = users_table();
        let proposal = LlmProposal {
            target_table: None,
            columns: vec![
                LlmProposalColumn {
                    source: "id".to_string(),
                    target: None,
                    target_type: "NVARCHAR(MAX)".to_string(),
                    transform_hint: None,
                    warning: None,
                },
                LlmProposalColumn {
                    source: "created_at".to_string(),
                    target: None,
                    target_type: "DATETIME".to_string(),
                    transform_hint: None,
                    warning: None,
                },
            ],
        };
        let violations = proposal_violations(&table, &proposal);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("NVARCHAR"));
    }

    #[tokio::test]
    async fn test_propose_all_writes_drafts() {
        let tmp = tempfile::TempDir::new().unwrap();
        let registry = crate::runs::RunRegistry::new(tmp.path());
        let run = registry.open(None, "postgres", "mysql", true).unwrap();
        let config = test_config();

        let written = propose_all(
            Arc::new(llm::DisabledModel),
            &config,
            &run,
            &[users_table()],
            &EventSink::default(),
        )
        .await
        .unwrap();

        assert_eq!(written, 1);
        let store = MappingStore::new(&run);
        let drafts = store.list_drafts().unwrap();
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].status, MappingStatus::Draft);
    }

    #[allow(dead_code)]
    fn assert_error_is_llm(e: MigrateError) {
        assert!(matches!(e, MigrateError::Llm(_)));
    }
}
