// src/dag/cost.rs

//! Cost model: expected node durations from run history.

use std::collections::{BTreeMap, HashMap};

use crate::errors::Result;
use crate::history::{NodeRunRecord, RunHistory};
use crate::types::NodePath;

/// Average historical durations, in seconds.
///
/// The own cost of a node is the summed average of every succeeded leaf
/// task at or below its path; nodes without history cost `0.0`. The
/// expected duration is the average of the node's own succeeded runs.
#[derive(Debug, Clone, Default)]
pub struct CostModel {
    leaf_averages: BTreeMap<NodePath, f64>,
    node_averages: HashMap<NodePath, f64>,
}

impl CostModel {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load averages for everything below `root` from a history store.
    pub fn load(history: &dyn RunHistory, root: &NodePath) -> Result<Self> {
        let records = history.records_under(root)?;
        Ok(Self::from_records(&records))
    }

    pub fn from_records(records: &[NodeRunRecord]) -> Self {
        let mut sums: HashMap<&NodePath, (f64, u32, bool)> = HashMap::new();
        for record in records.iter().filter(|r| r.succeeded) {
            let entry = sums.entry(&record.node_path).or_insert((0.0, 0, false));
            entry.0 += record.duration_secs();
            entry.1 += 1;
            entry.2 |= record.is_pipeline;
        }

        let mut leaf_averages = BTreeMap::new();
        let mut node_averages = HashMap::new();
        for (path, (sum, count, is_pipeline)) in sums {
            let average = sum / f64::from(count);
            if !is_pipeline {
                leaf_averages.insert(path.clone(), average);
            }
            node_averages.insert(path.clone(), average);
        }
        Self {
            leaf_averages,
            node_averages,
        }
    }

    /// Build a model from explicit per-task averages.
    pub fn with_costs<I>(costs: I) -> Self
    where
        I: IntoIterator<Item = (NodePath, f64)>,
    {
        let leaf_averages: BTreeMap<NodePath, f64> = costs.into_iter().collect();
        Self {
            node_averages: leaf_averages.clone().into_iter().collect(),
            leaf_averages,
        }
    }

    /// Expected duration of a node in seconds.
    pub fn own_cost(&self, path: &NodePath) -> f64 {
        self.leaf_averages
            .range(path.clone()..)
            .take_while(|(p, _)| p.starts_with(path))
            .map(|(_, avg)| *avg)
            .sum()
    }

    /// Average duration of the node's own succeeded runs.
    pub fn expected_duration(&self, path: &NodePath) -> Option<f64> {
        self.node_averages.get(path).copied()
    }

    pub fn has_history(&self, path: &NodePath) -> bool {
        self.own_cost(path) > 0.0
    }
}

/// Human readable duration: `5.6s`, `1:10m`, `1:06h`.
pub fn format_duration(secs: f64) -> String {
    let secs = secs.max(0.0);
    if secs < 60.0 {
        format!("{secs:.1}s")
    } else if secs < 3600.0 {
        let whole = secs as u64;
        format!("{}:{:02}m", whole / 60, whole % 60)
    } else {
        let whole = secs as u64;
        format!("{}:{:02}h", whole / 3600, (whole % 3600) / 60)
    }
}
