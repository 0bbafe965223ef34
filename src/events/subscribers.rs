// src/events/subscribers.rs

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use colored::Colorize;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::dag::cost::format_duration;
use crate::events::{Event, EventEnvelope};
use crate::history::{NodeRunRecord, RunHistory};
use crate::types::{NodePath, OutputFormat};

/// Receives every event published on the bus, in order.
///
/// Subscribers run on the bus dispatcher task. Errors are logged and do not
/// affect other subscribers or the run.
pub trait EventSubscriber: Send {
    fn name(&self) -> &str;

    fn handle(&mut self, envelope: &EventEnvelope) -> Result<()>;

    /// Called once when the bus shuts down.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Mirrors lifecycle events into `tracing`.
#[derive(Debug, Default)]
pub struct LoggingSubscriber;

impl EventSubscriber for LoggingSubscriber {
    fn name(&self) -> &str {
        "logging"
    }

    fn handle(&mut self, envelope: &EventEnvelope) -> Result<()> {
        let seq = envelope.sequence;
        match &envelope.event {
            Event::RunStarted { run_id, node_path } => {
                info!(seq, run_id, node = %node_path, "run started");
            }
            Event::RunFinished { run_id, succeeded } => {
                info!(seq, run_id, succeeded, "run finished");
            }
            Event::NodeStarted {
                node_path,
                is_pipeline,
            } => {
                debug!(seq, node = %node_path, is_pipeline, "node started");
            }
            Event::NodeFinished {
                node_path,
                is_pipeline,
                succeeded,
            } => {
                if *succeeded {
                    debug!(seq, node = %node_path, is_pipeline, "node succeeded");
                } else {
                    warn!(seq, node = %node_path, is_pipeline, "node failed");
                }
            }
            Event::Output {
                node_path,
                message,
                is_error,
                ..
            } => {
                debug!(seq, node = %node_path, is_error, "{}", message);
            }
            Event::SystemStatistics(stats) => {
                debug!(seq, ?stats, "system statistics");
            }
        }
        Ok(())
    }
}

/// Renders events on STDOUT.
#[derive(Debug)]
pub struct ConsoleSubscriber {
    styled: bool,
    started: HashMap<NodePath, DateTime<Utc>>,
}

impl ConsoleSubscriber {
    pub fn new(styled: bool) -> Self {
        Self {
            styled,
            started: HashMap::new(),
        }
    }

    fn render(&mut self, envelope: &EventEnvelope) -> Option<String> {
        let time = envelope.timestamp.format("%H:%M:%S").to_string();
        let line = match &envelope.event {
            Event::RunStarted { run_id, node_path } => {
                self.paint(format!("run {run_id} started ({node_path})"), Style::Bold)
            }
            Event::RunFinished { run_id, succeeded } => {
                let (text, style) = if *succeeded {
                    (format!("run {run_id} succeeded"), Style::Success)
                } else {
                    (format!("run {run_id} failed"), Style::Failure)
                };
                self.paint(text, style)
            }
            Event::NodeStarted { node_path, .. } => {
                self.started.insert(node_path.clone(), envelope.timestamp);
                return None;
            }
            Event::NodeFinished {
                node_path,
                is_pipeline,
                succeeded,
            } => {
                let elapsed = self
                    .started
                    .remove(node_path)
                    .and_then(|start| (envelope.timestamp - start).to_std().ok())
                    .map(|d| format_duration(d.as_secs_f64()))
                    .unwrap_or_default();
                let kind = if *is_pipeline { "pipeline" } else { "task" };
                let (text, style) = if *succeeded {
                    (format!("{node_path}: {kind} succeeded {elapsed}"), Style::Success)
                } else {
                    (format!("{node_path}: {kind} failed {elapsed}"), Style::Failure)
                };
                self.paint(text.trim_end().to_string(), style)
            }
            Event::Output {
                node_path,
                message,
                format,
                is_error,
            } => {
                let prefix = self.paint(format!("{node_path}:"), Style::Dim);
                let body = match (format, is_error) {
                    (_, true) => self.paint(message.clone(), Style::Failure),
                    (OutputFormat::Italics, false) => self.paint(message.clone(), Style::Italic),
                    _ => message.clone(),
                };
                format!("{prefix} {body}")
            }
            Event::SystemStatistics(_) => return None,
        };
        Some(format!("{} {}", self.paint(time, Style::Dim), line))
    }

    fn paint(&self, text: String, style: Style) -> String {
        if !self.styled {
            return text;
        }
        match style {
            Style::Bold => text.bold().to_string(),
            Style::Success => text.green().to_string(),
            Style::Failure => text.red().to_string(),
            Style::Dim => text.dimmed().to_string(),
            Style::Italic => text.italic().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Style {
    Bold,
    Success,
    Failure,
    Dim,
    Italic,
}

impl EventSubscriber for ConsoleSubscriber {
    fn name(&self) -> &str {
        "console"
    }

    fn handle(&mut self, envelope: &EventEnvelope) -> Result<()> {
        if let Some(line) = self.render(envelope) {
            let mut out = std::io::stdout().lock();
            writeln!(out, "{line}")?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        std::io::stdout().flush()?;
        Ok(())
    }
}

/// Appends a [`NodeRunRecord`] for every finished node.
pub struct HistoryRecorder {
    history: Arc<dyn RunHistory>,
    run_id: u64,
    started: HashMap<NodePath, DateTime<Utc>>,
}

impl std::fmt::Debug for HistoryRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryRecorder")
            .field("run_id", &self.run_id)
            .finish_non_exhaustive()
    }
}

impl HistoryRecorder {
    pub fn new(history: Arc<dyn RunHistory>) -> Self {
        Self {
            history,
            run_id: 0,
            started: HashMap::new(),
        }
    }
}

impl EventSubscriber for HistoryRecorder {
    fn name(&self) -> &str {
        "history"
    }

    fn handle(&mut self, envelope: &EventEnvelope) -> Result<()> {
        match &envelope.event {
            Event::RunStarted { run_id, .. } => {
                self.run_id = *run_id;
                self.started.clear();
            }
            Event::NodeStarted { node_path, .. } => {
                self.started.insert(node_path.clone(), envelope.timestamp);
            }
            Event::NodeFinished {
                node_path,
                is_pipeline,
                succeeded,
            } => {
                let start_time = self
                    .started
                    .remove(node_path)
                    .unwrap_or(envelope.timestamp);
                self.history.append(NodeRunRecord {
                    node_path: node_path.clone(),
                    run_id: self.run_id,
                    start_time,
                    end_time: envelope.timestamp,
                    succeeded: *succeeded,
                    is_pipeline: *is_pipeline,
                })?;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Shared, inspectable log of delivered events.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    envelopes: Arc<Mutex<Vec<EventEnvelope>>>,
}

impl EventLog {
    pub fn envelopes(&self) -> Vec<EventEnvelope> {
        self.envelopes.lock().clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.envelopes.lock().iter().map(|e| e.event.clone()).collect()
    }

    /// Position (index in the log) of the first `NodeStarted` for `path`.
    pub fn started_at(&self, path: &NodePath) -> Option<usize> {
        self.events().iter().position(|e| {
            matches!(e, Event::NodeStarted { node_path, .. } if node_path == path)
        })
    }

    /// Position of the first `NodeFinished` for `path`.
    pub fn finished_at(&self, path: &NodePath) -> Option<usize> {
        self.events().iter().position(|e| {
            matches!(e, Event::NodeFinished { node_path, .. } if node_path == path)
        })
    }

    /// All `NodeFinished` outcomes reported for `path`.
    pub fn finished(&self, path: &NodePath) -> Vec<bool> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                Event::NodeFinished {
                    node_path,
                    succeeded,
                    ..
                } if node_path == path => Some(*succeeded),
                _ => None,
            })
            .collect()
    }

    /// Output messages for `path`.
    pub fn outputs(&self, path: &NodePath) -> Vec<String> {
        self.events()
            .iter()
            .filter_map(|e| match e {
                Event::Output {
                    node_path, message, ..
                } if node_path == path => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn run_finished(&self) -> Option<bool> {
        self.events().iter().find_map(|e| match e {
            Event::RunFinished { succeeded, .. } => Some(*succeeded),
            _ => None,
        })
    }
}

/// Keeps every event in memory; read back through its [`EventLog`].
#[derive(Debug, Default)]
pub struct CollectingSubscriber {
    log: EventLog,
}

impl CollectingSubscriber {
    pub fn new() -> (Self, EventLog) {
        let log = EventLog::default();
        (Self { log: log.clone() }, log)
    }
}

impl EventSubscriber for CollectingSubscriber {
    fn name(&self) -> &str {
        "collecting"
    }

    fn handle(&mut self, envelope: &EventEnvelope) -> Result<()> {
        self.log.envelopes.lock().push(envelope.clone());
        Ok(())
    }
}
