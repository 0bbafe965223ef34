// src/events/bus.rs

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::{Result, RundagError};
use crate::events::{Event, EventEnvelope, EventSubscriber};
use crate::types::{NodePath, OutputFormat};

enum BusMessage {
    Event(Event),
    Shutdown(oneshot::Sender<()>),
}

/// Ordered publish/subscribe bus.
///
/// Events are sequenced in the order the dispatcher receives them. Every
/// subscriber sees every event, in registration order.
pub struct EventBus {
    tx: mpsc::UnboundedSender<BusMessage>,
    handle: JoinHandle<()>,
    masks: Arc<Vec<String>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

impl EventBus {
    /// Spawn the dispatcher task. Must be called inside a Tokio runtime.
    pub fn start(subscribers: Vec<Box<dyn EventSubscriber>>) -> Self {
        Self::with_password_masks(subscribers, Vec::new())
    }

    /// Like [`EventBus::start`], replacing every mask in `Output` messages by `***`.
    pub fn with_password_masks(
        subscribers: Vec<Box<dyn EventSubscriber>>,
        masks: Vec<String>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<BusMessage>();
        let handle = tokio::spawn(dispatch_loop(rx, subscribers));
        Self {
            tx,
            handle,
            masks: Arc::new(masks.into_iter().filter(|m| !m.is_empty()).collect()),
        }
    }

    pub fn publisher(&self) -> EventPublisher {
        EventPublisher {
            tx: self.tx.clone(),
            masks: Arc::clone(&self.masks),
        }
    }

    /// Deliver everything published so far, flush subscribers and stop the
    /// dispatcher. Events published afterwards are dropped.
    pub async fn shutdown(self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(BusMessage::Shutdown(ack_tx))
            .map_err(|_| RundagError::EventBusClosed)?;
        ack_rx.await.map_err(|_| RundagError::EventBusClosed)?;
        self.handle
            .await
            .map_err(|e| RundagError::Other(anyhow::Error::from(e)))?;
        Ok(())
    }
}

async fn dispatch_loop(
    mut rx: mpsc::UnboundedReceiver<BusMessage>,
    mut subscribers: Vec<Box<dyn EventSubscriber>>,
) {
    debug!(subscribers = subscribers.len(), "event dispatcher started");
    let mut sequence: u64 = 0;

    while let Some(message) = rx.recv().await {
        match message {
            BusMessage::Event(event) => {
                sequence += 1;
                let envelope = EventEnvelope {
                    sequence,
                    timestamp: Utc::now(),
                    event,
                };
                for subscriber in subscribers.iter_mut() {
                    if let Err(e) = subscriber.handle(&envelope) {
                        warn!(
                            subscriber = subscriber.name(),
                            sequence,
                            error = %e,
                            "event subscriber failed"
                        );
                    }
                }
            }
            BusMessage::Shutdown(ack) => {
                for subscriber in subscribers.iter_mut() {
                    if let Err(e) = subscriber.flush() {
                        warn!(
                            subscriber = subscriber.name(),
                            error = %e,
                            "flushing subscriber failed"
                        );
                    }
                }
                let _ = ack.send(());
                break;
            }
        }
    }

    info!(events = sequence, "event dispatcher finished");
}

/// Cheap, cloneable handle for publishing events.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: mpsc::UnboundedSender<BusMessage>,
    masks: Arc<Vec<String>>,
}

impl EventPublisher {
    pub fn publish(&self, event: Event) -> Result<()> {
        let event = self.mask(event);
        self.tx
            .send(BusMessage::Event(event))
            .map_err(|_| RundagError::EventBusClosed)
    }

    pub fn output_sink(&self, node_path: &NodePath) -> OutputSink {
        OutputSink {
            publisher: self.clone(),
            node_path: node_path.clone(),
        }
    }

    fn mask(&self, event: Event) -> Event {
        match event {
            Event::Output {
                node_path,
                message,
                format,
                is_error,
            } if !self.masks.is_empty() => {
                let message = self
                    .masks
                    .iter()
                    .fold(message, |msg, mask| msg.replace(mask.as_str(), "***"));
                Event::Output {
                    node_path,
                    message,
                    format,
                    is_error,
                }
            }
            other => other,
        }
    }
}

/// `Output` events for one node.
///
/// Output streaming is best effort: if the bus is already gone the line is
/// dropped.
#[derive(Debug, Clone)]
pub struct OutputSink {
    publisher: EventPublisher,
    node_path: NodePath,
}

impl OutputSink {
    pub fn node_path(&self) -> &NodePath {
        &self.node_path
    }

    pub fn emit(&self, message: impl Into<String>, format: OutputFormat, is_error: bool) {
        let event = Event::output(&self.node_path, message, format, is_error);
        if self.publisher.publish(event).is_err() {
            debug!(node = %self.node_path, "dropping output line; event bus closed");
        }
    }

    pub fn log(&self, message: impl Into<String>) {
        self.emit(message, OutputFormat::Text, false);
    }

    pub fn status(&self, message: impl Into<String>) {
        self.emit(message, OutputFormat::Italics, false);
    }

    pub fn verbatim(&self, message: impl Into<String>) {
        self.emit(message, OutputFormat::Verbatim, false);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(message, OutputFormat::Text, true);
    }

    pub fn error_verbatim(&self, message: impl Into<String>) {
        self.emit(message, OutputFormat::Verbatim, true);
    }
}
