// src/exec/executor_loop.rs

//! Main executor loop that manages running task attempts.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::command::ExecutionEnv;
use crate::dag::ScheduledTask;
use crate::engine::RuntimeEvent;
use crate::exec::task_runner::run_task;
use crate::types::NodePath;

/// Requests accepted by the executor loop.
#[derive(Debug)]
pub enum ExecutorRequest {
    Run(ScheduledTask),
    Stop { forced: bool },
}

/// Internal handle for a currently-running attempt.
///
/// - `cancel` is used by the executor to request that the attempt be killed
///   (forced stop).
/// - `handle` is the Tokio task that is actually running the commands.
struct ActiveTask {
    attempt: u32,
    cancel: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

/// Spawn the background executor loop.
///
/// Each attempt is executed in its own Tokio task. The scheduler never
/// dispatches a node twice at once, so an attempt arriving for a node that
/// still has a live attempt is a bug upstream and is logged.
pub fn spawn_executor(
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    env: Arc<ExecutionEnv>,
) -> mpsc::Sender<ExecutorRequest> {
    let (tx, mut rx) = mpsc::channel::<ExecutorRequest>(32);

    tokio::spawn(async move {
        info!("executor loop started");

        let mut active: HashMap<NodePath, ActiveTask> = HashMap::new();

        while let Some(request) = rx.recv().await {
            active.retain(|_, t| !t.handle.is_finished());
            match request {
                ExecutorRequest::Run(task) => {
                    handle_scheduled_task(task, &mut active, &runtime_tx, &env);
                }
                ExecutorRequest::Stop { forced } => stop_active(&mut active, forced),
            }
        }

        info!("executor loop finished (channel closed)");
    });

    tx
}

fn handle_scheduled_task(
    task: ScheduledTask,
    active: &mut HashMap<NodePath, ActiveTask>,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
    env: &Arc<ExecutionEnv>,
) {
    if let Some(existing) = active.get(&task.path) {
        warn!(
            node = %task.path,
            running_attempt = existing.attempt,
            attempt = task.attempt,
            "attempt dispatched while another attempt is live"
        );
    }

    let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
    let rt_tx = runtime_tx.clone();
    let env = Arc::clone(env);
    let path = task.path.clone();
    let attempt = task.attempt;
    let spawn_path = path.clone();

    let handle = tokio::spawn(async move {
        run_task(task, env, rt_tx, cancel_rx).await;
        debug!(node = %spawn_path, attempt, "task runner future finished");
    });

    active.insert(
        path,
        ActiveTask {
            attempt,
            cancel: Some(cancel_tx),
            handle,
        },
    );
}

fn stop_active(active: &mut HashMap<NodePath, ActiveTask>, forced: bool) {
    if !forced {
        info!(running = active.len(), "graceful stop; letting running attempts finish");
        return;
    }

    info!(running = active.len(), "forced stop; cancelling running attempts");
    for (path, task) in active.iter_mut() {
        match task.cancel.take() {
            Some(cancel) => {
                if cancel.send(()).is_err() {
                    debug!(node = %path, "attempt already finished while cancelling");
                }
            }
            None => debug!(node = %path, "attempt was already cancelled"),
        }
    }
}
