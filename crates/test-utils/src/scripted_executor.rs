use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use rundag::dag::ScheduledTask;
use rundag::engine::{RuntimeEvent, TaskOutcome};
use rundag::errors::Result;
use rundag::exec::ExecutorBackend;
use rundag::types::NodePath;

#[derive(Debug, Default)]
struct LogState {
    dispatched: Vec<(NodePath, u32)>,
    running: usize,
    peak_running: usize,
    stop_requests: Vec<bool>,
}

/// Shared view of what a [`ScriptedExecutor`] was asked to do.
#[derive(Debug, Clone, Default)]
pub struct DispatchLog {
    inner: Arc<Mutex<LogState>>,
}

impl DispatchLog {
    /// Every dispatched `(path, attempt)`, in dispatch order.
    pub fn dispatched(&self) -> Vec<(NodePath, u32)> {
        self.inner.lock().dispatched.clone()
    }

    /// Dispatched paths, in dispatch order (retries repeat the path).
    pub fn paths(&self) -> Vec<String> {
        self.inner
            .lock()
            .dispatched
            .iter()
            .map(|(p, _)| p.to_string())
            .collect()
    }

    pub fn attempts(&self, path: &str) -> usize {
        self.inner
            .lock()
            .dispatched
            .iter()
            .filter(|(p, _)| p.to_string() == path)
            .count()
    }

    pub fn peak_running(&self) -> usize {
        self.inner.lock().peak_running
    }

    /// `forced` flag of every stop request, in order.
    pub fn stop_requests(&self) -> Vec<bool> {
        self.inner.lock().stop_requests.clone()
    }
}

/// A fake executor that:
/// - records which attempts were dispatched
/// - reports the next scripted outcome for the path (default: success),
///   optionally after a delay
/// - tracks how many attempts were in flight at once.
pub struct ScriptedExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    script: Arc<Mutex<HashMap<NodePath, VecDeque<TaskOutcome>>>>,
    delay: Option<Duration>,
    cancelled: Arc<AtomicBool>,
    log: DispatchLog,
}

impl ScriptedExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            runtime_tx,
            script: Arc::new(Mutex::new(HashMap::new())),
            delay: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            log: DispatchLog::default(),
        }
    }

    /// Outcomes for successive attempts of `path` (`"a/b"`). Once used up,
    /// the last outcome repeats.
    pub fn script(self, path: &str, outcomes: Vec<TaskOutcome>) -> Self {
        let path: NodePath = path.parse().expect("valid node path");
        self.script.lock().insert(path, outcomes.into());
        self
    }

    /// Shorthand for a path whose every attempt fails with exit code 1.
    pub fn always_fail(self, path: &str) -> Self {
        self.script(path, vec![TaskOutcome::Failed { exit_code: Some(1) }])
    }

    /// Delay before each attempt completes.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn log(&self) -> DispatchLog {
        self.log.clone()
    }

    fn next_outcome(&self, path: &NodePath) -> TaskOutcome {
        let mut script = self.script.lock();
        match script.get_mut(path) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(TaskOutcome::Succeeded),
            Some(queue) => queue.front().cloned().unwrap_or(TaskOutcome::Succeeded),
            None => TaskOutcome::Succeeded,
        }
    }
}

impl ExecutorBackend for ScriptedExecutor {
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            for t in tasks {
                let outcome = self.next_outcome(&t.path);
                {
                    let mut state = self.log.inner.lock();
                    state.dispatched.push((t.path.clone(), t.attempt));
                    state.running += 1;
                    state.peak_running = state.peak_running.max(state.running);
                }

                let tx = self.runtime_tx.clone();
                let log = self.log.clone();
                let delay = self.delay;
                let cancelled = Arc::clone(&self.cancelled);
                // Complete from a separate task so the runtime loop never
                // waits on its own channel.
                tokio::spawn(async move {
                    if let Some(delay) = delay {
                        tokio::time::sleep(delay).await;
                    }
                    let outcome = if cancelled.load(Ordering::SeqCst) {
                        TaskOutcome::Cancelled
                    } else {
                        outcome
                    };
                    log.inner.lock().running -= 1;
                    let _ = tx
                        .send(RuntimeEvent::TaskCompleted {
                            path: t.path,
                            attempt: t.attempt,
                            outcome,
                        })
                        .await;
                });
            }
            Ok(())
        })
    }

    fn cancel_running(
        &mut self,
        forced: bool,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        self.log.inner.lock().stop_requests.push(forced);
        if forced {
            self.cancelled.store(true, Ordering::SeqCst);
        }
        Box::pin(async { Ok(()) })
    }
}
