//! Notification port for appended events.
//!
//! [`ThreadManager`](super::ThreadManager) calls [`EventSink::notify`] after
//! every successful append. Delivery is fire-and-forget: a sink cannot fail
//! the append, and a lost notification never rolls the log back.
//!
//! | Sink | Use case |
//! |------|----------|
//! | [`NoopSink`] | Tests, offline tools |
//! | [`LoggingSink`] | Structured logging via `tracing` |
//! | [`FnSink`] | Quick closures |
//! | [`BroadcastSink`] | Live-update channels (SSE, WebSocket) |
//! | [`CompositeSink`] | Several sinks in order |

use crate::thread::ThreadStatus;
use crate::thread::event::{Event, EventData};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

/// What a sink receives after an append.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadNotification {
    pub thread_id: String,
    /// Wire name of the event type.
    pub event_type: String,
    /// Thread status after the append.
    pub status: ThreadStatus,
    pub event: Event,
}

/// Receives a notification after every state-changing append.
pub trait EventSink: Send + Sync {
    fn notify(&self, notification: &ThreadNotification) {
        let _ = notification;
    }
}

/// Discards every notification.
pub struct NoopSink;
impl EventSink for NoopSink {}

/// A sink backed by a closure.
pub struct FnSink<F>(F)
where
    F: Fn(&ThreadNotification) + Send + Sync;

impl<F> FnSink<F>
where
    F: Fn(&ThreadNotification) + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F> EventSink for FnSink<F>
where
    F: Fn(&ThreadNotification) + Send + Sync,
{
    fn notify(&self, notification: &ThreadNotification) {
        (self.0)(notification)
    }
}

/// Dispatches to several sinks in registration order.
pub struct CompositeSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl CompositeSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with(mut self, sink: impl EventSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Conditionally add a sink without breaking the builder chain.
    pub fn with_if(self, condition: bool, sink: impl EventSink + 'static) -> Self {
        if condition { self.with(sink) } else { self }
    }
}

impl Default for CompositeSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for CompositeSink {
    fn notify(&self, notification: &ThreadNotification) {
        for sink in &self.sinks {
            sink.notify(notification);
        }
    }
}

/// Logs appended events via `tracing`.
pub struct LoggingSink;

impl EventSink for LoggingSink {
    fn notify(&self, n: &ThreadNotification) {
        match &n.event.data {
            EventData::ErrorOccurred {
                message,
                recoverable,
                ..
            } => {
                warn!(
                    "[{}] error (recoverable={recoverable}): {message} -> {}",
                    n.thread_id, n.status
                );
            }
            EventData::ToolExecuted {
                tool_name, success, ..
            } => {
                debug!("[{}] tool {tool_name} success={success}", n.thread_id);
            }
            EventData::UserMessage { content } | EventData::AssistantMessage { content } => {
                let preview: String = content.chars().take(120).collect();
                trace!(
                    "[{}] {}: {preview}{}",
                    n.thread_id,
                    n.event_type,
                    if content.chars().count() > 120 { "..." } else { "" }
                );
            }
            _ => {
                debug!("[{}] {} -> {}", n.thread_id, n.event_type, n.status);
            }
        }
    }
}

/// Fans notifications out over a `tokio::sync::broadcast` channel.
///
/// Sending with no live subscribers is not an error.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<ThreadNotification>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ThreadNotification> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventSink for BroadcastSink {
    fn notify(&self, notification: &ThreadNotification) {
        let _ = self.tx.send(notification.clone());
    }
}
