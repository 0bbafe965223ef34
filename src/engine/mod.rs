// src/engine/mod.rs

//! Orchestration engine for rundag.
//!
//! This module ties together:
//! - the run coordinator ([`crate::dag::Scheduler`])
//! - the main runtime event loop that reacts to:
//!   - task attempt completions
//!   - generator expansion results
//!   - stop requests (Ctrl-C)
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use crate::expand::{Expansion, LaunchError};
use crate::types::NodePath;

/// How one task attempt ended, as seen by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    /// A command reported failure. Retryable.
    Failed { exit_code: Option<i32> },
    /// The attempt was killed by a forced stop.
    Cancelled,
    /// The attempt could not be started at all. Not retried.
    LaunchFailed(String),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded)
    }
}

/// Events flowing into the runtime from executors, expanders and signals.
#[derive(Debug)]
pub enum RuntimeEvent {
    /// A task attempt ended.
    TaskCompleted {
        path: NodePath,
        attempt: u32,
        outcome: TaskOutcome,
    },
    /// A generator finished enumerating its items.
    ExpansionFinished {
        path: NodePath,
        result: Result<Expansion, LaunchError>,
    },
    /// Stop the run. `forced` also kills running tasks.
    StopRequested { forced: bool },
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub run_id: u64,
    pub succeeded: bool,
    /// Tasks that ended `Failed`, sorted.
    pub failed: Vec<NodePath>,
    pub peak_running_tasks: usize,
}

pub mod core;
pub mod event_handlers;
pub mod runtime;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::Runtime;
