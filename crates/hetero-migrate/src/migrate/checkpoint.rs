//! Durable per-(run, table) checkpoints enabling resumption.
//!
//! A checkpoint is written after every committed chunk. Persistence is
//! crash-safe: the new state goes to a sibling temp file which is then
//! renamed over the old one, so a crash never leaves a half-written
//! checkpoint. `rows_loaded + rows_failed` is monotonically non-decreasing
//! for the lifetime of a (run, table) pair.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MigrateError, Result};

/// Per-table migration status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Pending,
    Running,
    Done,
    Failed,
}

/// Durable progress record for one (run, table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub target_table: String,

    /// Source rows consumed so far (committed chunks only).
    pub last_offset: i64,

    /// Last PK value loaded, for keyset resumption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_key: Option<i64>,

    pub rows_loaded: i64,
    pub rows_failed: i64,
    pub status: CheckpointStatus,
    pub updated_at: DateTime<Utc>,

    /// Committed chunks, for observability and resume verification.
    #[serde(default)]
    pub chunks_committed: u64,
}

impl Checkpoint {
    pub fn new(run_id: impl Into<String>, target_table: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            target_table: target_table.into(),
            last_offset: 0,
            last_key: None,
            rows_loaded: 0,
            rows_failed: 0,
            status: CheckpointStatus::Pending,
            updated_at: Utc::now(),
            chunks_committed: 0,
        }
    }

    /// Record one committed chunk.
    ///
    /// Fails if the update would violate monotonicity; that would mean two
    /// writers are racing on the same checkpoint, which the migrator's
    /// single-writer-per-table design must never allow.
    pub fn advance(
        &mut self,
        chunk_rows: usize,
        inserted: u64,
        failed: u64,
        last_key: Option<i64>,
    ) -> Result<()> {
        if (inserted + failed) as usize != chunk_rows {
            return Err(MigrateError::Config(format!(
                "checkpoint advance for {} is inconsistent: chunk of {} rows but {} inserted + {} failed",
                self.target_table, chunk_rows, inserted, failed
            )));
        }
        self.last_offset += chunk_rows as i64;
        self.rows_loaded += inserted as i64;
        self.rows_failed += failed as i64;
        if last_key.is_some() {
            self.last_key = last_key;
        }
        self.chunks_committed += 1;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn mark_running(&mut self) {
        self.status = CheckpointStatus::Running;
        self.updated_at = Utc::now();
    }

    pub fn mark_done(&mut self) {
        self.status = CheckpointStatus::Done;
        self.updated_at = Utc::now();
    }

    pub fn mark_failed(&mut self) {
        self.status = CheckpointStatus::Failed;
        self.updated_at = Utc::now();
    }
}

/// Filesystem store for checkpoints of one run.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Open a store rooted at `checkpoints/<run_id>/`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, table: &str) -> PathBuf {
        self.dir.join(format!("{}.json", table))
    }

    /// Load the checkpoint for a table, if one exists.
    pub fn load(&self, table: &str) -> Result<Option<Checkpoint>> {
        let path = self.path(table);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        let checkpoint: Checkpoint = serde_json::from_str(&raw)?;
        Ok(Some(checkpoint))
    }

    /// Load the existing checkpoint or create a fresh one, guarding the
    /// monotonicity invariant across process restarts.
    pub fn acquire(&self, run_id: &str, table: &str) -> Result<Checkpoint> {
        match self.load(table)? {
            Some(existing) => Ok(existing),
            None => Ok(Checkpoint::new(run_id, table)),
        }
    }

    /// Persist atomically: write to a sibling temp file, then rename.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path(&checkpoint.target_table);

        if let Some(previous) = self.load(&checkpoint.target_table)? {
            let before = previous.rows_loaded + previous.rows_failed;
            let after = checkpoint.rows_loaded + checkpoint.rows_failed;
            if after < before {
                return Err(MigrateError::Config(format!(
                    "refusing to regress checkpoint for {}: {} -> {}",
                    checkpoint.target_table, before, after
                )));
            }
        }

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(checkpoint)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// All checkpoints in this run, sorted by table name. In-flight temp
    /// files from interrupted saves are ignored.
    pub fn list(&self) -> Result<Vec<Checkpoint>> {
        let mut checkpoints = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Ok(checkpoints);
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if is_checkpoint_file(&path) {
                let raw = std::fs::read_to_string(&path)?;
                checkpoints.push(serde_json::from_str(&raw)?);
            }
        }
        checkpoints.sort_by(|a: &Checkpoint, b: &Checkpoint| {
            a.target_table.cmp(&b.target_table)
        });
        Ok(checkpoints)
    }
}

/// Whether a path is a checkpoint file rather than a leftover temp file.
fn is_checkpoint_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("json")
}
