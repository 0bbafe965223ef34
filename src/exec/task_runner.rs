// src/exec/task_runner.rs

//! Individual task attempt runner.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::command::shell::SpawnError;
use crate::command::{CommandContext, CommandOutcome, ExecutionEnv};
use crate::dag::ScheduledTask;
use crate::engine::{RuntimeEvent, TaskOutcome};

/// Run the commands of a single attempt in order, then report a
/// `TaskCompleted` event.
///
/// The attempt stops at the first command that fails or errors. A process
/// that cannot be started ends the attempt as `TaskOutcome::LaunchFailed`,
/// which is not retried. If the cancel channel fires, the running command
/// is dropped (its child process is killed on drop) and the attempt reports
/// `TaskOutcome::Cancelled`.
pub async fn run_task(
    task: ScheduledTask,
    env: Arc<ExecutionEnv>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    let path = task.path.clone();
    let attempt = task.attempt;
    let run_id = task.run_id;
    info!(node = %path, run_id, attempt, commands = task.commands.len(), "starting task attempt");

    let ctx = CommandContext::new(env, task.path.clone(), task.base_path.clone());

    let run = run_commands(&task, &ctx);
    tokio::pin!(run);

    let outcome = tokio::select! {
        outcome = &mut run => outcome,
        cancel = &mut cancel_rx => {
            match cancel {
                Ok(()) => {
                    info!(
                        node = %path,
                        run_id,
                        attempt,
                        "cancellation requested; dropping running command"
                    );
                    TaskOutcome::Cancelled
                }
                Err(_) => {
                    // Sender dropped without cancelling: finish normally.
                    debug!(
                        node = %path,
                        run_id,
                        attempt,
                        "cancel channel closed without explicit cancellation"
                    );
                    run.await
                }
            }
        }
    };

    info!(node = %path, run_id, attempt, ?outcome, "task attempt finished");

    if let Err(e) = runtime_tx
        .send(RuntimeEvent::TaskCompleted {
            path: path.clone(),
            attempt,
            outcome,
        })
        .await
    {
        warn!(node = %path, error = %e, "runtime gone; dropping TaskCompleted event");
    }
}

async fn run_commands(task: &ScheduledTask, ctx: &CommandContext) -> TaskOutcome {
    for command in task.commands.iter() {
        let description = command.describe();
        if !description.is_empty() {
            ctx.output().status(description.clone());
        }

        match command.execute(ctx).await {
            Ok(CommandOutcome::Succeeded) => {}
            Ok(CommandOutcome::Failed { exit_code }) => {
                debug!(node = %task.path, command = %description, ?exit_code, "command failed");
                return TaskOutcome::Failed { exit_code };
            }
            Err(err) => {
                if let Some(spawn) = err.chain().find_map(|e| e.downcast_ref::<SpawnError>()) {
                    error!(
                        node = %task.path,
                        command = %description,
                        error = %spawn,
                        "command could not be started"
                    );
                    return TaskOutcome::LaunchFailed(spawn.to_string());
                }
                error!(node = %task.path, command = %description, error = %err, "command error");
                ctx.output().error_verbatim(format!("{err:#}"));
                return TaskOutcome::Failed { exit_code: None };
            }
        }
    }
    TaskOutcome::Succeeded
}
