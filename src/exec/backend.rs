// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of a raw mpsc sender.
//! This makes it easy to swap in a scripted executor in tests while keeping
//! the production executor implementation in [`super::executor_loop`].
//!
//! - `RealExecutorBackend` is the default implementation used by `rundag`.
//!   It wraps the `spawn_executor` loop and forwards requests over an mpsc
//!   channel.
//! - Tests can provide their own `ExecutorBackend` that, for example, records
//!   which attempts were dispatched and directly emits `TaskCompleted` events.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::mpsc;

use crate::command::ExecutionEnv;
use crate::dag::ScheduledTask;
use crate::engine::RuntimeEvent;
use crate::errors::Result;

use super::executor_loop::{spawn_executor, ExecutorRequest};

/// Trait abstracting how scheduled task attempts are executed.
///
/// Every dispatched attempt must eventually be answered with exactly one
/// `RuntimeEvent::TaskCompleted` carrying the same path and attempt.
pub trait ExecutorBackend: Send {
    /// Dispatch the given attempts for execution.
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Stop running attempts. A graceful stop lets them finish; a forced
    /// stop kills them, and they report `TaskOutcome::Cancelled`.
    fn cancel_running(
        &mut self,
        forced: bool,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Real executor backend used in production.
///
/// The runtime calls `spawn_ready_tasks`, which forwards the attempts to the
/// background executor loop via an mpsc channel.
pub struct RealExecutorBackend {
    tx: mpsc::Sender<ExecutorRequest>,
}

impl RealExecutorBackend {
    /// Create a new real executor backend, wiring it to the given runtime
    /// event sender.
    ///
    /// This spawns the background executor loop immediately.
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, env: Arc<ExecutionEnv>) -> Self {
        let tx = spawn_executor(runtime_tx, env);
        Self { tx }
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone the sender so the future doesn't borrow `self` across `await`.
        let tx = self.tx.clone();

        Box::pin(async move {
            for task in tasks {
                tx.send(ExecutorRequest::Run(task))
                    .await
                    .map_err(|_| anyhow!("executor loop stopped"))?;
            }
            Ok(())
        })
    }

    fn cancel_running(
        &mut self,
        forced: bool,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.tx.clone();
        Box::pin(async move {
            tx.send(ExecutorRequest::Stop { forced })
                .await
                .map_err(|_| anyhow!("executor loop stopped"))?;
            Ok(())
        })
    }
}
