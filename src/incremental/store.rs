// src/incremental/store.rs

//! Key-value storage backing the incremental state tracker.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::types::NodePath;

/// File name (below the state dir) of the file-backed store.
pub const INCREMENTAL_FILE_NAME: &str = "incremental.json";

/// What a stored value means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    /// Hash over a set of dependency files.
    FileDependency,
    /// A file consumed by a `parallel_files` generator; value is unused.
    ProcessedFile,
    /// Last seen maximum of an incremental comparison column.
    ComparisonValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateKey {
    pub node_path: NodePath,
    pub kind: StateKind,
    pub key: String,
}

impl StateKey {
    pub fn new(node_path: &NodePath, kind: StateKind, key: impl Into<String>) -> Self {
        Self {
            node_path: node_path.clone(),
            kind,
            key: key.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateValue {
    pub value: String,
    pub timestamp: DateTime<Utc>,
}

/// Abstract storage for incremental state.
pub trait IncrementalStore: Send + Sync {
    fn get(&self, key: &StateKey) -> Result<Option<StateValue>>;
    fn put(&mut self, key: StateKey, value: StateValue) -> Result<()>;
    fn remove(&mut self, key: &StateKey) -> Result<()>;

    /// All entries of one node with the given kind.
    fn entries(&self, node_path: &NodePath, kind: StateKind) -> Result<Vec<(String, StateValue)>>;

    /// Remove every entry at or below `prefix`; returns how many were removed.
    fn reset(&mut self, prefix: &NodePath) -> Result<usize>;
}

fn entries_of(
    map: &BTreeMap<StateKey, StateValue>,
    node_path: &NodePath,
    kind: StateKind,
) -> Vec<(String, StateValue)> {
    map.iter()
        .filter(|(k, _)| &k.node_path == node_path && k.kind == kind)
        .map(|(k, v)| (k.key.clone(), v.clone()))
        .collect()
}

fn reset_prefix(map: &mut BTreeMap<StateKey, StateValue>, prefix: &NodePath) -> usize {
    let before = map.len();
    map.retain(|k, _| !k.node_path.starts_with(prefix));
    before - map.len()
}

/// Stores state in memory only.
#[derive(Debug, Default)]
pub struct MemoryIncrementalStore {
    map: BTreeMap<StateKey, StateValue>,
}

impl MemoryIncrementalStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IncrementalStore for MemoryIncrementalStore {
    fn get(&self, key: &StateKey) -> Result<Option<StateValue>> {
        Ok(self.map.get(key).cloned())
    }

    fn put(&mut self, key: StateKey, value: StateValue) -> Result<()> {
        debug!(node = %key.node_path, key = %key.key, "stored incremental state (memory)");
        self.map.insert(key, value);
        Ok(())
    }

    fn remove(&mut self, key: &StateKey) -> Result<()> {
        self.map.remove(key);
        Ok(())
    }

    fn entries(&self, node_path: &NodePath, kind: StateKind) -> Result<Vec<(String, StateValue)>> {
        Ok(entries_of(&self.map, node_path, kind))
    }

    fn reset(&mut self, prefix: &NodePath) -> Result<usize> {
        let removed = reset_prefix(&mut self.map, prefix);
        info!(prefix = %prefix, removed, "reset incremental state (memory)");
        Ok(removed)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    #[serde(flatten)]
    key: StateKey,
    #[serde(flatten)]
    value: StateValue,
}

/// Stores state in a JSON document (`<state_dir>/incremental.json`).
///
/// The document is loaded once and replaced after every change.
#[derive(Debug)]
pub struct FileIncrementalStore {
    path: PathBuf,
    map: BTreeMap<StateKey, StateValue>,
}

impl FileIncrementalStore {
    pub fn open(state_dir: impl Into<PathBuf>) -> Result<Self> {
        let path = state_dir.into().join(INCREMENTAL_FILE_NAME);
        let mut map = BTreeMap::new();

        if path.exists() {
            let file = File::open(&path)
                .with_context(|| format!("opening incremental state at {:?}", path))?;
            let entries: Vec<StoredEntry> = serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("parsing incremental state at {:?}", path))?;
            for entry in entries {
                map.insert(entry.key, entry.value);
            }
        }

        Ok(Self { path, map })
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating state directory at {:?}", parent))?;
        }

        let entries: Vec<StoredEntry> = self
            .map
            .iter()
            .map(|(k, v)| StoredEntry {
                key: k.clone(),
                value: v.clone(),
            })
            .collect();

        // Written beside the document and renamed over it, so a crash
        // leaves either the old or the new state.
        let tmp_path = self.path.with_extension("json.tmp");
        let file = File::create(&tmp_path)
            .with_context(|| format!("creating incremental state at {:?}", tmp_path))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &entries)?;
        let file = writer
            .into_inner()
            .map_err(|e| e.into_error())
            .with_context(|| format!("writing incremental state at {:?}", tmp_path))?;
        file.sync_all()
            .with_context(|| format!("syncing incremental state at {:?}", tmp_path))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("replacing incremental state at {:?}", self.path))?;
        Ok(())
    }
}

impl IncrementalStore for FileIncrementalStore {
    fn get(&self, key: &StateKey) -> Result<Option<StateValue>> {
        Ok(self.map.get(key).cloned())
    }

    fn put(&mut self, key: StateKey, value: StateValue) -> Result<()> {
        debug!(node = %key.node_path, key = %key.key, "stored incremental state (file)");
        self.map.insert(key, value);
        self.save()
    }

    fn remove(&mut self, key: &StateKey) -> Result<()> {
        if self.map.remove(key).is_some() {
            self.save()?;
        }
        Ok(())
    }

    fn entries(&self, node_path: &NodePath, kind: StateKind) -> Result<Vec<(String, StateValue)>> {
        Ok(entries_of(&self.map, node_path, kind))
    }

    fn reset(&mut self, prefix: &NodePath) -> Result<usize> {
        let removed = reset_prefix(&mut self.map, prefix);
        if removed > 0 {
            self.save()?;
        }
        info!(prefix = %prefix, removed, "reset incremental state (file)");
        Ok(removed)
    }
}
