//! Progress event stream.
//!
//! Long-running stages emit JSON lines on stdout when enabled, one object
//! per event: `{"type": "progress", ...}`. A web UI or wrapper process can
//! forward these over SSE; the pipeline itself only writes lines.

use serde::Serialize;

/// One pipeline event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Log {
        stage: String,
        message: String,
    },
    Progress {
        stage: String,
        table: String,
        rows_done: i64,
        rows_total: i64,
    },
    TableDone {
        stage: String,
        table: String,
        rows_loaded: i64,
        rows_failed: i64,
    },
    Done {
        stage: String,
        tables: usize,
    },
    Error {
        stage: String,
        message: String,
    },
}

/// Sink for pipeline events. Disabled by default; the CLI enables it with
/// `--progress`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventSink {
    enabled: bool,
}

impl EventSink {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn emit(&self, event: Event) {
        if !self.enabled {
            return;
        }
        // Serialization of Event cannot fail; all fields are plain data.
        if let Ok(line) = serde_json::to_string(&event) {
            println!("{}", line);
        }
    }
}
