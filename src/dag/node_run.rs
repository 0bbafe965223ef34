// src/dag/node_run.rs

//! Per-run node state and the units of work handed to the executor.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::command::Command;
use crate::types::NodePath;

/// Status of a node within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeStatus {
    /// In the execution set, waiting on upstreams.
    Pending,
    /// Upstreams are terminal; waiting for a slot.
    Ready,
    /// Dispatched (tasks) or administratively active (pipelines, generating tasks).
    Running,
    Succeeded,
    Failed,
    /// Never reached `Running`: blocked by a failure or a stop request.
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            NodeStatus::Succeeded | NodeStatus::Failed | NodeStatus::Skipped
        )
    }
}

/// Record of one node within a run.
///
/// Created when the node enters the execution set; never changes once
/// terminal.
#[derive(Debug, Clone)]
pub struct NodeRun {
    pub path: NodePath,
    pub is_pipeline: bool,
    pub status: NodeStatus,
    pub attempt_count: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Effective upstreams within the enclosing scope.
    pub upstreams: Vec<NodePath>,
    /// Effective dependents within the enclosing scope.
    pub downstreams: Vec<NodePath>,
}

impl NodeRun {
    pub fn new(path: NodePath, is_pipeline: bool) -> Self {
        Self {
            path,
            is_pipeline,
            status: NodeStatus::Pending,
            attempt_count: 0,
            start_time: None,
            end_time: None,
            upstreams: Vec::new(),
            downstreams: Vec::new(),
        }
    }
}

/// Description of a task attempt that the scheduler wants the executor to
/// run now.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub path: NodePath,
    /// All attempts of one run share the same `run_id`.
    pub run_id: u64,
    /// 1 for the first attempt.
    pub attempt: u32,
    pub commands: Vec<Arc<dyn Command>>,
    pub base_path: PathBuf,
}
