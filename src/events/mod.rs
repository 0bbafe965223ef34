// src/events/mod.rs

//! Run and node lifecycle events.
//!
//! - [`bus`] owns the ordered, process-wide event stream and fans events out
//!   to subscribers on a dedicated task, so a slow subscriber never stalls
//!   scheduling.
//! - [`subscribers`] contains the built-in subscribers (logging, console,
//!   run history, in-memory collection).

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::types::{NodePath, OutputFormat};

pub mod bus;
pub mod subscribers;

pub use bus::{EventBus, EventPublisher, OutputSink};
pub use subscribers::{
    CollectingSubscriber, ConsoleSubscriber, EventLog, EventSubscriber, HistoryRecorder,
    LoggingSubscriber,
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    RunStarted {
        run_id: u64,
        node_path: NodePath,
    },
    RunFinished {
        run_id: u64,
        succeeded: bool,
    },
    NodeStarted {
        node_path: NodePath,
        is_pipeline: bool,
    },
    NodeFinished {
        node_path: NodePath,
        is_pipeline: bool,
        succeeded: bool,
    },
    Output {
        node_path: NodePath,
        message: String,
        format: OutputFormat,
        is_error: bool,
    },
    /// Host metrics produced by an external sampler and relayed as-is.
    SystemStatistics(SystemStatistics),
}

impl Event {
    pub fn output(
        node_path: &NodePath,
        message: impl Into<String>,
        format: OutputFormat,
        is_error: bool,
    ) -> Self {
        Event::Output {
            node_path: node_path.clone(),
            message: message.into(),
            format,
            is_error,
        }
    }

    /// Node path the event refers to, if any.
    pub fn node_path(&self) -> Option<&NodePath> {
        match self {
            Event::NodeStarted { node_path, .. }
            | Event::NodeFinished { node_path, .. }
            | Event::Output { node_path, .. } => Some(node_path),
            Event::RunStarted { node_path, .. } => Some(node_path),
            Event::RunFinished { .. } | Event::SystemStatistics(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStatistics {
    pub timestamp: DateTime<Utc>,
    pub cpu_usage: Option<f64>,
    pub disc_read: Option<f64>,
    pub disc_write: Option<f64>,
    pub net_recv: Option<f64>,
    pub net_sent: Option<f64>,
    pub mem_usage: Option<f64>,
    pub swap_usage: Option<f64>,
    pub iowait: Option<f64>,
}

/// An event as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventEnvelope {
    /// Position in the process-wide stream, starting at 1.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}
