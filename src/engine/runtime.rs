// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dag::ScheduledTask;
use crate::errors::Result;
use crate::events::{Event, EventPublisher};
use crate::exec::ExecutorBackend;
use crate::expand::{Expander, ExpansionRequest};

use super::core::CoreRuntime;
use super::{CoreCommand, RunReport, RuntimeEvent};

/// Drives the run coordinator in response to `RuntimeEvent`s, and
/// delegates actual command execution to an `ExecutorBackend`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// runtime semantics. This struct handles async IO: reading events from
/// channels, dispatching attempts to the executor, running generators and
/// publishing lifecycle events.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    event_tx: mpsc::Sender<RuntimeEvent>,
    executor: E,
    expander: Expander,
    publisher: EventPublisher,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    /// `event_tx` must feed `event_rx`; generator results are sent on it.
    pub fn new(
        core: CoreRuntime,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        event_tx: mpsc::Sender<RuntimeEvent>,
        executor: E,
        expander: Expander,
        publisher: EventPublisher,
    ) -> Self {
        Self {
            core,
            event_rx,
            event_tx,
            executor,
            expander,
            publisher,
        }
    }

    /// Main event loop.
    ///
    /// - Starts the run.
    /// - Consumes `RuntimeEvent`s from `event_rx`.
    /// - Feeds them into the core runtime.
    /// - Executes commands returned by the core.
    ///
    /// Returns once the run finished. Fails if the event bus closed.
    pub async fn run(mut self) -> Result<RunReport> {
        info!(run_id = self.core.scheduler().run_id(), "rundag runtime started");

        let step = self.core.start();
        let mut keep_running = step.keep_running;
        for command in step.commands {
            self.execute_command(command).await?;
        }

        while keep_running {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    warn!("runtime event channel closed before the run finished");
                    break;
                }
            };

            debug!(?event, "runtime received event");

            // Feed the event into the pure core and get commands back.
            let step = self.core.step(event);

            for command in step.commands {
                self.execute_command(command).await?;
            }

            if !step.keep_running {
                info!("core reported run finished; stopping runtime");
                keep_running = false;
            }
        }

        info!("runtime exiting");
        Ok(self.core.report())
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::Publish(events) => self.publish(events)?,
            CoreCommand::DispatchTasks(tasks) => self.spawn_ready(tasks).await?,
            CoreCommand::Expand(requests) => self.spawn_expansions(requests),
            CoreCommand::CancelRunning { forced } => {
                if let Err(e) = self.executor.cancel_running(forced).await {
                    warn!(error = %e, forced, "failed to forward stop request to executor");
                }
            }
            CoreCommand::RequestExit { succeeded } => {
                info!(succeeded, "core issued RequestExit command");
            }
        }
        Ok(())
    }

    fn publish(&self, events: Vec<Event>) -> Result<()> {
        for event in events {
            self.publisher.publish(event)?;
        }
        Ok(())
    }

    async fn spawn_ready(&mut self, tasks: Vec<ScheduledTask>) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        let paths: Vec<String> = tasks.iter().map(|t| t.path.to_string()).collect();
        debug!(?paths, "spawning ready tasks");

        self.executor.spawn_ready_tasks(tasks).await
    }

    fn spawn_expansions(&self, requests: Vec<ExpansionRequest>) {
        for request in requests {
            let expander = self.expander.clone();
            let tx = self.event_tx.clone();
            tokio::spawn(async move {
                let result = expander.expand(&request).await;
                let event = RuntimeEvent::ExpansionFinished {
                    path: request.path,
                    result,
                };
                if tx.send(event).await.is_err() {
                    debug!("runtime gone; dropping expansion result");
                }
            });
        }
    }
}
