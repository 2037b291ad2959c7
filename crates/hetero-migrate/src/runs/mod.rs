//! Run registry: run IDs, artifact directory layout, resumption state,
//! and pruning.
//!
//! Every artifact of a migration attempt is namespaced by a run ID of the
//! form `YYYYMMDD-HHMMSS-<6 hex>`. When no run ID is supplied the shared
//! top-level directories are used (legacy mode). `run_state.json` under
//! the artifact root records the last active run so stages and the UI can
//! resume without being told the ID.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{MigrateError, Result};

/// Artifact kinds that get a per-run subdirectory.
const ARTIFACT_KINDS: &[&str] = &[
    "schemas",
    "stats",
    "mappings",
    "ddl",
    "checkpoints",
    "dlq",
    "reports",
];

static RUN_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{8}-\d{6}-[0-9a-f]{6}$").expect("static run-id pattern must compile")
});

/// Generate a timestamped run ID: `YYYYMMDD-HHMMSS-<6 hex>`.
pub fn generate_run_id() -> String {
    let ts = Utc::now().format("%Y%m%d-%H%M%S");
    let entropy = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}", ts, &entropy[..6])
}

/// Check whether a string is a well-formed run ID.
pub fn is_run_id(s: &str) -> bool {
    RUN_ID.is_match(s)
}

/// Creation time encoded in a run ID, if parseable.
fn run_created_at(run_id: &str) -> Option<DateTime<Utc>> {
    let ts = run_id.get(..15)?;
    NaiveDateTime::parse_from_str(ts, "%Y%m%d-%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Last-active-run marker written at the artifact root.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RunState {
    run_id: String,
    updated_at: DateTime<Utc>,
}

/// Context for one migration attempt: the run ID (None in legacy mode)
/// and the directory layout rooted under `artifact_root`.
#[derive(Debug, Clone, Serialize)]
pub struct RunContext {
    pub run_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub source_engine: String,
    pub target_engine: String,
    pub artifact_root: PathBuf,
}

impl RunContext {
    fn kind_dir(&self, kind: &str) -> PathBuf {
        match &self.run_id {
            Some(id) => self.artifact_root.join(kind).join(id),
            None => self.artifact_root.join(kind),
        }
    }

    pub fn schemas_dir(&self) -> PathBuf {
        self.kind_dir("schemas")
    }

    pub fn stats_dir(&self) -> PathBuf {
        self.kind_dir("stats")
    }

    pub fn draft_mappings_dir(&self) -> PathBuf {
        self.kind_dir("mappings").join("draft")
    }

    pub fn approved_mappings_dir(&self) -> PathBuf {
        self.kind_dir("mappings").join("approved")
    }

    pub fn ddl_dir(&self) -> PathBuf {
        self.kind_dir("ddl")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.kind_dir("checkpoints")
    }

    pub fn dlq_dir(&self) -> PathBuf {
        self.kind_dir("dlq")
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.kind_dir("reports")
    }

    /// Create every artifact directory for this run.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.schemas_dir(),
            self.stats_dir(),
            self.draft_mappings_dir(),
            self.approved_mappings_dir(),
            self.ddl_dir(),
            self.checkpoints_dir(),
            self.dlq_dir(),
            self.reports_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }
}

/// The run registry: creates, resolves, records and prunes runs.
#[derive(Debug, Clone)]
pub struct RunRegistry {
    root: PathBuf,
}

impl RunRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open a run context. An explicit ID wins; otherwise the last active
    /// run from `run_state.json` is used; `create_if_missing` mints a new
    /// ID when neither exists, and legacy shared directories are the final
    /// fallback.
    pub fn open(
        &self,
        explicit: Option<&str>,
        source_engine: &str,
        target_engine: &str,
        create_if_missing: bool,
    ) -> Result<RunContext> {
        let run_id = match explicit {
            Some(id) => {
                if !is_run_id(id) {
                    return Err(MigrateError::Config(format!(
                        "malformed run id: {} (expected YYYYMMDD-HHMMSS-xxxxxx)",
                        id
                    )));
                }
                Some(id.to_string())
            }
            None => match self.last_active_run() {
                Some(id) => Some(id),
                None if create_if_missing => Some(generate_run_id()),
                None => None,
            },
        };

        if let Some(ref id) = run_id {
            self.record_active_run(id)?;
        } else {
            warn!("no run id available; using legacy shared artifact directories");
        }

        let context = RunContext {
            created_at: run_id
                .as_deref()
                .and_then(run_created_at)
                .unwrap_or_else(Utc::now),
            run_id,
            source_engine: source_engine.to_string(),
            target_engine: target_engine.to_string(),
            artifact_root: self.root.clone(),
        };
        context.ensure_dirs()?;
        Ok(context)
    }

    fn run_state_path(&self) -> PathBuf {
        self.root.join("run_state.json")
    }

    /// The last active run recorded in `run_state.json`, if any.
    pub fn last_active_run(&self) -> Option<String> {
        let raw = std::fs::read_to_string(self.run_state_path()).ok()?;
        let state: RunState = serde_json::from_str(&raw).ok()?;
        is_run_id(&state.run_id).then_some(state.run_id)
    }

    /// Record the active run (atomic write).
    pub fn record_active_run(&self, run_id: &str) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let state = RunState {
            run_id: run_id.to_string(),
            updated_at: Utc::now(),
        };
        let path = self.run_state_path();
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&state)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// All run IDs present under any artifact kind.
    pub fn list_runs(&self) -> Vec<String> {
        let mut runs = std::collections::BTreeSet::new();
        for kind in ARTIFACT_KINDS {
            let Ok(entries) = std::fs::read_dir(self.root.join(kind)) else {
                continue;
            };
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                if entry.path().is_dir() && is_run_id(&name) {
                    runs.insert(name);
                }
            }
        }
        runs.into_iter().collect()
    }

    /// Delete entire run directories older than `max_age_days`. Whole runs
    /// only, never individual files. Returns the pruned run IDs.
    pub fn prune(&self, max_age_days: u32) -> Result<Vec<String>> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(max_age_days));
        let mut pruned = Vec::new();
        for run_id in self.list_runs() {
            let Some(created) = run_created_at(&run_id) else {
                continue;
            };
            if created >= cutoff {
                continue;
            }
            for kind in ARTIFACT_KINDS {
                let dir = self.root.join(kind).join(&run_id);
                if dir.is_dir() {
                    std::fs::remove_dir_all(&dir)?;
                }
            }
            info!(run_id = %run_id, "pruned run artifacts");
            pruned.push(run_id);
        }
        Ok(pruned)
    }

    /// Remove every generated artifact directory (the `clean` command).
    pub fn clean(&self) -> Result<()> {
        for kind in ARTIFACT_KINDS {
            let dir = self.root.join(kind);
            if dir.is_dir() {
                std::fs::remove_dir_all(&dir)?;
            }
        }
        let state = self.run_state_path();
        if state.exists() {
            std::fs::remove_file(state)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_run_id_format() {
        let id = generate_run_id();
        assert!(is_run_id(&id), "bad run id: {}", id);
    }

    #[test]
    fn test_run_id_rejects_malformed() {
        assert!(!is_run_id("run-20240101-120000-abc123"));
        assert!(!is_run_id("20240101-120000"));
        assert!(!is_run_id("20240101-120000-XYZ123"));
    }

    #[test]
    fn test_open_creates_layout() {
        let tmp = TempDir::new().unwrap();
        let registry = RunRegistry::new(tmp.path());
        let run = registry
            .open(None, "postgres", "mysql", true)
            .unwrap();
        let id = run.run_id.clone().unwrap();
        assert!(tmp.path().join("schemas").join(&id).is_dir());
        assert!(tmp
            .path()
            .join("mappings")
            .join(&id)
            .join("approved")
            .is_dir());
        assert!(tmp.path().join("dlq").join(&id).is_dir());
    }

    #[test]
    fn test_last_active_run_resolution() {
        let tmp = TempDir::new().unwrap();
        let registry = RunRegistry::new(tmp.path());
        let first = registry.open(None, "postgres", "mysql", true).unwrap();
        let id = first.run_id.clone().unwrap();

        // A later stage with no explicit id picks up the recorded run.
        let second = registry.open(None, "postgres", "mysql", false).unwrap();
        assert_eq!(second.run_id.as_deref(), Some(id.as_str()));
    }

    #[test]
    fn test_explicit_run_id_wins() {
        let tmp = TempDir::new().unwrap();
        let registry = RunRegistry::new(tmp.path());
        registry.open(None, "postgres", "mysql", true).unwrap();
        let run = registry
            .open(Some("20240101-000000-abc123"), "postgres", "mysql", false)
            .unwrap();
        assert_eq!(run.run_id.as_deref(), Some("20240101-000000-abc123"));
    }

    #[test]
    fn test_legacy_mode_uses_shared_dirs() {
        let tmp = TempDir::new().unwrap();
        let registry = RunRegistry::new(tmp.path());
        let run = registry.open(None, "postgres", "mysql", false).unwrap();
        assert!(run.run_id.is_none());
        assert_eq!(run.schemas_dir(), tmp.path().join("schemas"));
    }

    #[test]
    fn test_prune_removes_old_runs_entirely() {
        let tmp = TempDir::new().unwrap();
        let registry = RunRegistry::new(tmp.path());

        let old_id = "20200101-000000-aaaaaa";
        let new_id = generate_run_id();
        for kind in ["schemas", "dlq"] {
            std::fs::create_dir_all(tmp.path().join(kind).join(old_id)).unwrap();
            std::fs::create_dir_all(tmp.path().join(kind).join(&new_id)).unwrap();
        }

        let pruned = registry.prune(30).unwrap();
        assert_eq!(pruned, vec![old_id.to_string()]);
        assert!(!tmp.path().join("schemas").join(old_id).exists());
        assert!(tmp.path().join("schemas").join(&new_id).exists());
    }

    #[test]
    fn test_clean_removes_everything() {
        let tmp = TempDir::new().unwrap();
        let registry = RunRegistry::new(tmp.path());
        registry.open(None, "postgres", "mysql", true).unwrap();
        registry.clean().unwrap();
        assert!(!tmp.path().join("schemas").exists());
        assert!(!tmp.path().join("run_state.json").exists());
    }
}
