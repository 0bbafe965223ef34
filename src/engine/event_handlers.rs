// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use crate::dag::{ScheduledTask, Scheduler, SchedulerStep};
use crate::engine::TaskOutcome;
use crate::events::Event;
use crate::expand::{Expansion, ExpansionRequest, LaunchError};
use crate::types::NodePath;

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug)]
pub enum CoreCommand {
    /// Publish these events on the bus, in order.
    Publish(Vec<Event>),
    /// Send these task attempts to the executor.
    DispatchTasks(Vec<ScheduledTask>),
    /// Run these generators.
    Expand(Vec<ExpansionRequest>),
    /// Tell running attempts to stop; `forced` kills them.
    CancelRunning { forced: bool },
    /// The run finished; the shell should shut down.
    RequestExit { succeeded: bool },
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug)]
pub struct CoreStep {
    /// Commands the IO shell should execute, in order.
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// Translate a scheduler step into shell commands.
///
/// Events are published before anything is dispatched so that a node's
/// `NodeStarted` always precedes its output.
pub fn commands_from_step(step: SchedulerStep) -> CoreStep {
    let mut commands = Vec::new();
    if !step.events.is_empty() {
        commands.push(CoreCommand::Publish(step.events));
    }
    if let Some(forced) = step.cancel_running {
        commands.push(CoreCommand::CancelRunning { forced });
    }
    if !step.dispatch.is_empty() {
        commands.push(CoreCommand::DispatchTasks(step.dispatch));
    }
    if !step.expand.is_empty() {
        commands.push(CoreCommand::Expand(step.expand));
    }
    let keep_running = match step.run_finished {
        Some(succeeded) => {
            commands.push(CoreCommand::RequestExit { succeeded });
            false
        }
        None => true,
    };
    CoreStep {
        commands,
        keep_running,
    }
}

pub fn handle_task_completion(
    scheduler: &mut Scheduler,
    path: NodePath,
    attempt: u32,
    outcome: TaskOutcome,
) -> CoreStep {
    commands_from_step(scheduler.on_task_completed(&path, attempt, outcome))
}

pub fn handle_expansion(
    scheduler: &mut Scheduler,
    path: NodePath,
    result: Result<Expansion, LaunchError>,
) -> CoreStep {
    commands_from_step(scheduler.on_expansion_finished(&path, result))
}

pub fn handle_stop(scheduler: &mut Scheduler, forced: bool) -> CoreStep {
    commands_from_step(scheduler.request_stop(forced))
}
