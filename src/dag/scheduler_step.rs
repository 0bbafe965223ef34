// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::node_run::ScheduledTask;
use crate::events::Event;
use crate::expand::ExpansionRequest;

/// Structured result of a single scheduler "step".
///
/// This is useful for tests that want to manually step the run and make
/// assertions about what changed.
#[derive(Debug, Default)]
pub struct SchedulerStep {
    /// Task attempts to hand to the executor.
    pub dispatch: Vec<ScheduledTask>,
    /// Generating tasks whose generator must run now.
    pub expand: Vec<ExpansionRequest>,
    /// Events to publish, in order.
    pub events: Vec<Event>,
    /// `Some(forced)` when running tasks must be told to stop.
    pub cancel_running: Option<bool>,
    /// `Some(succeeded)` when this step finished the run.
    pub run_finished: Option<bool>,
}

impl SchedulerStep {
    pub fn is_empty(&self) -> bool {
        self.dispatch.is_empty()
            && self.expand.is_empty()
            && self.events.is_empty()
            && self.cancel_running.is_none()
            && self.run_finished.is_none()
    }
}
