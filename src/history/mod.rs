// src/history/mod.rs

//! Run-history storage.
//!
//! Append-only records of finished node runs. The cost model reads them to
//! compute priorities; the `HistoryRecorder` event subscriber writes them.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::NodePath;

/// File name (below the state dir) of the file-backed history.
pub const HISTORY_FILE_NAME: &str = "history.jsonl";

/// One finished node run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRunRecord {
    pub node_path: NodePath,
    pub run_id: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub succeeded: bool,
    pub is_pipeline: bool,
}

impl NodeRunRecord {
    pub fn duration_secs(&self) -> f64 {
        (self.end_time - self.start_time)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

pub trait RunHistory: Send + Sync {
    fn append(&self, record: NodeRunRecord) -> Result<()>;

    /// All records at or below `prefix`.
    fn records_under(&self, prefix: &NodePath) -> Result<Vec<NodeRunRecord>>;
}

#[derive(Debug, Default)]
pub struct MemoryRunHistory {
    records: Mutex<Vec<NodeRunRecord>>,
}

impl MemoryRunHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<NodeRunRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }
}

impl RunHistory for MemoryRunHistory {
    fn append(&self, record: NodeRunRecord) -> Result<()> {
        self.records.lock().push(record);
        Ok(())
    }

    fn records_under(&self, prefix: &NodePath) -> Result<Vec<NodeRunRecord>> {
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.node_path.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// JSON-lines history at `<state_dir>/history.jsonl`.
#[derive(Debug)]
pub struct FileRunHistory {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileRunHistory {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: state_dir.into().join(HISTORY_FILE_NAME),
            write_lock: Mutex::new(()),
        }
    }
}

impl RunHistory for FileRunHistory {
    fn append(&self, record: NodeRunRecord) -> Result<()> {
        let _guard = self.write_lock.lock();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating state directory at {:?}", parent))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening run history at {:?}", self.path))?;
        let line = serde_json::to_string(&record)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn records_under(&self, prefix: &NodePath) -> Result<Vec<NodeRunRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)
            .with_context(|| format!("opening run history at {:?}", self.path))?;

        let mut records = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<NodeRunRecord>(&line) {
                Ok(record) if record.node_path.starts_with(prefix) => records.push(record),
                Ok(_) => {}
                Err(e) => warn!(error = %e, "skipping unreadable run history line"),
            }
        }
        Ok(records)
    }
}
