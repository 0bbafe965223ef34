// src/incremental/tracker.rs

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::errors::Result;
use crate::incremental::store::{
    IncrementalStore, MemoryIncrementalStore, StateKey, StateKind, StateValue,
};
use crate::types::NodePath;

/// Answers "can prior work be skipped?" for commands.
///
/// The tracker never decides whether a node runs; commands consult it and
/// report success with zero work when nothing changed. Cloning is cheap and
/// all clones share the same store. Writes are keyed per node path, and the
/// coordinator never runs two attempts of one node at the same time.
#[derive(Clone)]
pub struct IncrementalTracker {
    store: Arc<Mutex<Box<dyn IncrementalStore>>>,
}

impl std::fmt::Debug for IncrementalTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementalTracker").finish_non_exhaustive()
    }
}

impl Default for IncrementalTracker {
    fn default() -> Self {
        Self::new(Box::new(MemoryIncrementalStore::new()))
    }
}

impl IncrementalTracker {
    pub fn new(store: Box<dyn IncrementalStore>) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    /// True if no hash is stored for `(path, key)` or it differs from `current_hash`.
    pub fn is_modified(&self, path: &NodePath, key: &str, current_hash: &str) -> Result<bool> {
        let stored = self
            .store
            .lock()
            .get(&StateKey::new(path, StateKind::FileDependency, key))?;
        let modified = stored.is_none_or(|v| v.value != current_hash);
        debug!(node = %path, key, modified, "checked file dependency hash");
        Ok(modified)
    }

    /// Upsert the hash for `(path, key)`.
    pub fn update(
        &self,
        path: &NodePath,
        key: &str,
        hash: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        self.store.lock().put(
            StateKey::new(path, StateKind::FileDependency, key),
            StateValue {
                value: hash.to_string(),
                timestamp,
            },
        )?;
        Ok(())
    }

    /// Forget the hash for `(path, key)`.
    pub fn delete_dependency(&self, path: &NodePath, key: &str) -> Result<()> {
        self.store
            .lock()
            .remove(&StateKey::new(path, StateKind::FileDependency, key))?;
        Ok(())
    }

    /// Remove all incremental state of exactly this node.
    pub fn delete(&self, path: &NodePath) -> Result<()> {
        let mut store = self.store.lock();
        for kind in [
            StateKind::FileDependency,
            StateKind::ProcessedFile,
            StateKind::ComparisonValue,
        ] {
            for (key, _) in store.entries(path, kind)? {
                store.remove(&StateKey::new(path, kind, key))?;
            }
        }
        Ok(())
    }

    pub fn last_comparison_value(&self, path: &NodePath, key: &str) -> Result<Option<String>> {
        let stored = self
            .store
            .lock()
            .get(&StateKey::new(path, StateKind::ComparisonValue, key))?;
        Ok(stored.map(|v| v.value))
    }

    pub fn set_last_comparison_value(&self, path: &NodePath, key: &str, value: &str) -> Result<()> {
        self.store.lock().put(
            StateKey::new(path, StateKind::ComparisonValue, key),
            StateValue {
                value: value.to_string(),
                timestamp: Utc::now(),
            },
        )?;
        Ok(())
    }

    /// Files already consumed by a node, with their modification time at
    /// the time they were processed.
    pub fn processed_files(&self, path: &NodePath) -> Result<HashMap<String, DateTime<Utc>>> {
        let entries = self.store.lock().entries(path, StateKind::ProcessedFile)?;
        Ok(entries
            .into_iter()
            .map(|(name, value)| (name, value.timestamp))
            .collect())
    }

    pub fn track_processed_file(
        &self,
        path: &NodePath,
        file_name: &str,
        modified: DateTime<Utc>,
    ) -> Result<()> {
        self.store.lock().put(
            StateKey::new(path, StateKind::ProcessedFile, file_name),
            StateValue {
                value: String::new(),
                timestamp: modified,
            },
        )?;
        Ok(())
    }

    /// Clear all state at or below `prefix`.
    pub fn reset(&self, prefix: &NodePath) -> Result<usize> {
        let removed = self.store.lock().reset(prefix)?;
        info!(prefix = %prefix, removed, "incremental processing reset");
        Ok(removed)
    }
}
