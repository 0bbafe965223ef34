// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - sending `ScheduledTask`s to the executor
//! - running generators
//! - publishing events on the bus
//!
//! The core is unit tested without any Tokio, channels, filesystem, or
//! processes.

use crate::dag::{NodeStatus, Scheduler};
use crate::engine::event_handlers::{
    commands_from_step, handle_expansion, handle_stop, handle_task_completion, CoreStep,
};
use crate::engine::{RunReport, RuntimeEvent};

/// Pure core runtime state.
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    scheduler: Scheduler,
}

impl CoreRuntime {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn is_finished(&self) -> bool {
        self.scheduler.is_finished()
    }

    /// Begin the run.
    pub fn start(&mut self) -> CoreStep {
        commands_from_step(self.scheduler.start())
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::TaskCompleted {
                path,
                attempt,
                outcome,
            } => handle_task_completion(&mut self.scheduler, path, attempt, outcome),
            RuntimeEvent::ExpansionFinished { path, result } => {
                handle_expansion(&mut self.scheduler, path, result)
            }
            RuntimeEvent::StopRequested { forced } => handle_stop(&mut self.scheduler, forced),
        }
    }

    pub fn report(&self) -> RunReport {
        let mut failed: Vec<_> = self
            .scheduler
            .node_runs()
            .filter(|r| !r.is_pipeline && r.status == NodeStatus::Failed)
            .map(|r| r.path.clone())
            .collect();
        failed.sort();
        RunReport {
            run_id: self.scheduler.run_id(),
            succeeded: self.scheduler.succeeded().unwrap_or(false),
            failed,
            peak_running_tasks: self.scheduler.peak_running_tasks(),
        }
    }
}
