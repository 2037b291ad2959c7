//! Configuration loading and types.
//!
//! The config file is YAML; `${VAR}` references are expanded from the
//! environment before parsing so credentials never live in the file.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

static ENV_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{(\w+)\}").expect("static env-ref pattern must compile"));

/// Expand `${VAR}` references from the environment. Unset variables expand
/// to the empty string, matching the original loader's behavior.
fn expand_env(raw: &str) -> String {
    ENV_REF
        .replace_all(raw, |caps: &regex::Captures<'_>| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source database (postgres or mssql).
    pub source: SourceConfig,

    /// Target database (mysql).
    pub target: TargetConfig,

    /// LLM proposer settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Migration behavior.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Validator behavior.
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Run registry behavior.
    #[serde(default)]
    pub runs: RunsConfig,
}

impl Config {
    /// Load a YAML config file, expanding `${VAR}` references.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            MigrateError::Config(format!(
                "cannot read config {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: Config = serde_yaml::from_str(&expand_env(&raw))?;
        config.validate()?;
        Ok(config)
    }

    /// Structural sanity checks beyond what serde enforces.
    pub fn validate(&self) -> Result<()> {
        match self.source.engine.as_str() {
            "postgres" | "mssql" => {}
            other => {
                return Err(MigrateError::Config(format!(
                    "unsupported source engine: {}",
                    other
                )))
            }
        }
        if self.target.engine != "mysql" {
            return Err(MigrateError::Config(format!(
                "unsupported target engine: {}",
                self.target.engine
            )));
        }
        if self.migration.chunk_size == 0 {
            return Err(MigrateError::Config("chunk_size must be positive".into()));
        }
        if self.migration.max_chunk_size < self.migration.chunk_size {
            return Err(MigrateError::Config(
                "max_chunk_size must be >= chunk_size".into(),
            ));
        }
        if self.migration.table_parallelism == 0 {
            return Err(MigrateError::Config(
                "table_parallelism must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn default_source_schema() -> String {
    "public".to_string()
}

/// Source database configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Engine name (`postgres` or `mssql`).
    pub engine: String,

    pub host: String,

    /// Port; 0 selects the engine default (5432 / 1433).
    #[serde(default)]
    pub port: u16,

    pub database: String,

    pub user: String,

    pub password: String,

    /// Schema to extract (`public` for postgres, `dbo` for mssql).
    #[serde(default = "default_source_schema")]
    pub schema: String,
}

impl SourceConfig {
    /// Port with the engine default applied.
    pub fn effective_port(&self) -> u16 {
        if self.port != 0 {
            return self.port;
        }
        match self.engine.as_str() {
            "mssql" => 1433,
            _ => 5432,
        }
    }
}

impl std::fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceConfig")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("schema", &self.schema)
            .finish()
    }
}

fn default_mysql_engine() -> String {
    "mysql".to_string()
}

fn default_mysql_port() -> u16 {
    3306
}

/// Target database configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Engine name (always `mysql`).
    #[serde(default = "default_mysql_engine")]
    pub engine: String,

    pub host: String,

    #[serde(default = "default_mysql_port")]
    pub port: u16,

    /// Database (MySQL schema) receiving the migrated tables.
    pub database: String,

    pub user: String,

    pub password: String,
}

impl std::fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetConfig")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_retries() -> u32 {
    3
}

fn default_rpm() -> u32 {
    60
}

fn default_propose_parallelism() -> usize {
    2
}

/// LLM proposer configuration. The pipeline must succeed end-to-end with
/// `enabled = false`; the LLM is an accelerator, never a dependency.
#[derive(Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Override the provider endpoint (e.g. an Azure deployment URL).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// API key, typically `${LLM_API_KEY}` in the file.
    #[serde(default)]
    pub api_key: String,

    /// Validation-failure retries before the rule-based fallback.
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,

    #[serde(default = "default_rpm")]
    pub requests_per_minute: u32,

    /// Concurrent proposal requests (bounds rate-limit exposure).
    #[serde(default = "default_propose_parallelism")]
    pub propose_parallelism: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            model: default_model(),
            endpoint: None,
            api_key: String::new(),
            max_retries: default_llm_retries(),
            requests_per_minute: default_rpm(),
            propose_parallelism: default_propose_parallelism(),
        }
    }
}

impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("enabled", &self.enabled)
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .field("max_retries", &self.max_retries)
            .field("requests_per_minute", &self.requests_per_minute)
            .field("propose_parallelism", &self.propose_parallelism)
            .finish()
    }
}

fn default_chunk_size() -> usize {
    5_000
}

fn default_max_chunk_size() -> usize {
    100_000
}

fn default_table_parallelism() -> usize {
    4
}

fn default_chunk_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Initial rows per chunk. The migrator grows this additively while
    /// loads succeed and halves it on failure (AIMD).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Upper bound for chunk growth.
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,

    /// Tables migrated in parallel, subject to FK ordering.
    #[serde(default = "default_table_parallelism")]
    pub table_parallelism: usize,

    /// Per-chunk timeout; on expiry the chunk is treated as a bulk-load
    /// failure and routed to the DLQ.
    #[serde(default = "default_chunk_timeout_secs")]
    pub chunk_timeout_secs: u64,

    /// Disable target FK enforcement for the duration of the load.
    #[serde(default = "default_true")]
    pub disable_fk_during_load: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_chunk_size: default_max_chunk_size(),
            table_parallelism: default_table_parallelism(),
            chunk_timeout_secs: default_chunk_timeout_secs(),
            disable_fk_during_load: true,
        }
    }
}

fn default_float_tolerance() -> f64 {
    1e-4
}

fn default_sample_rows() -> usize {
    1_000
}

fn default_sample_seed() -> u64 {
    42
}

fn default_max_reported_keys() -> usize {
    20
}

/// Validator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// L1 row-count tolerance as a fraction of the source count.
    #[serde(default)]
    pub row_count_tolerance: f64,

    /// Relative tolerance for float aggregate comparison.
    #[serde(default = "default_float_tolerance")]
    pub float_tolerance: f64,

    /// Rows sampled for L3.
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,

    /// Seed for L3 sampling; change per run for a fresh sample.
    #[serde(default = "default_sample_seed")]
    pub sample_seed: u64,

    /// Maximum diverging keys listed in a sample_mismatch failure.
    #[serde(default = "default_max_reported_keys")]
    pub max_reported_keys: usize,

    /// Run later levels even when an earlier level failed.
    #[serde(default)]
    pub run_all_levels: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            row_count_tolerance: 0.0,
            float_tolerance: default_float_tolerance(),
            sample_rows: default_sample_rows(),
            sample_seed: default_sample_seed(),
            max_reported_keys: default_max_reported_keys(),
            run_all_levels: false,
        }
    }
}

fn default_artifact_root() -> String {
    ".".to_string()
}

fn default_prune_after_days() -> u32 {
    30
}

/// Run registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunsConfig {
    /// Directory under which all artifact trees live.
    #[serde(default = "default_artifact_root")]
    pub artifact_root: String,

    /// Runs older than this are deleted by pruning.
    #[serde(default = "default_prune_after_days")]
    pub prune_after_days: u32,
}

impl Default for RunsConfig {
    fn default() -> Self {
        Self {
            artifact_root: default_artifact_root(),
            prune_after_days: default_prune_after_days(),
        }
    }
}
