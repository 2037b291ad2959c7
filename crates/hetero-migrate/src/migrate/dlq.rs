//! Dead letter queue: per-(run, table) append-only CSV of rows that
//! failed to load, with error classification.
//!
//! Crash-safety contract: the file is opened in append mode, the header is
//! written exactly once at creation, every record is flushed immediately,
//! and the file is fsynced at chunk boundaries. DLQ contents are never
//! rewritten during a run.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::core::value::SqlValue;
use crate::error::{LoadErrorKind, Result};

/// RFC 4180 field escaping: quote when needed, double inner quotes.
fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Append-only writer for one table's DLQ file.
#[derive(Debug)]
pub struct DlqWriter {
    file: File,
    path: PathBuf,
    rows_written: u64,
}

impl DlqWriter {
    /// Open (or create) `dlq/<run_id>/<table>.csv`. The header row is
    /// written only when the file is new.
    pub fn open(dir: &Path, table: &str, columns: &[String]) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.csv", table));
        let is_new = !path.exists();

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;

        if is_new {
            let mut header: Vec<String> = columns.iter().map(|c| csv_escape(c)).collect();
            header.push("error_kind".to_string());
            header.push("error_detail".to_string());
            header.push("occurred_at".to_string());
            writeln!(file, "{}", header.join(","))?;
            file.flush()?;
        }

        Ok(Self {
            file,
            path,
            rows_written: 0,
        })
    }

    /// Append one failed row. Flushed immediately so a crash loses at most
    /// the record being written.
    pub fn append(&mut self, row: &[SqlValue], kind: LoadErrorKind, detail: &str) -> Result<()> {
        let mut fields: Vec<String> = row
            .iter()
            .map(|v| csv_escape(&v.display_for_dlq()))
            .collect();
        fields.push(kind.to_string());
        fields.push(csv_escape(detail));
        fields.push(Utc::now().to_rfc3339());
        writeln!(self.file, "{}", fields.join(","))?;
        self.file.flush()?;
        self.rows_written += 1;
        Ok(())
    }

    /// fsync, called at chunk boundaries.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        Ok(())
    }

    /// Rows appended through this writer (not counting earlier runs).
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Count DLQ records for a table across the run (excludes the header).
pub fn count_records(dir: &Path, table: &str) -> Result<u64> {
    let path = dir.join(format!("{}.csv", table));
    if !path.exists() {
        return Ok(0);
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(raw.lines().skip(1).filter(|l| !l.is_empty()).count() as u64)
}
