use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::trace;

use crate::protocol::{EventEnvelope, QueueEvent};

// ---------------------------------------------------------------------------
// EventSink
// ---------------------------------------------------------------------------

/// Where the scheduler publishes its events.
///
/// The queue manager takes this as an injected dependency so the core runs
/// without any live socket; tests substitute a capturing sink.
pub trait EventSink: Send + Sync {
    fn publish(&self, workspace_id: &str, event: QueueEvent);
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// A broadcast-style event bus built on top of flume channels.
///
/// Each call to [`subscribe`](EventBus::subscribe) creates a new receiver
/// that will receive all envelopes published after the subscription was
/// created. The bus is thread-safe and can be cloned cheaply.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Vec<flume::Sender<EventEnvelope>>>>,
}

impl EventBus {
    /// Create a new, empty event bus with no subscribers.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a new subscriber and return its receiving end.
    pub fn subscribe(&self) -> flume::Receiver<EventEnvelope> {
        let (tx, rx) = flume::unbounded();
        let mut senders = self.inner.lock().expect("EventBus lock poisoned");
        senders.push(tx);
        rx
    }

    /// Return the number of currently active subscribers.
    pub fn subscriber_count(&self) -> usize {
        let senders = self.inner.lock().expect("EventBus lock poisoned");
        senders.len()
    }
}

impl EventSink for EventBus {
    /// Publish an event to all current subscribers.
    ///
    /// Disconnected subscribers (whose receivers have been dropped) are
    /// automatically pruned.
    fn publish(&self, workspace_id: &str, event: QueueEvent) {
        let envelope = EventEnvelope {
            workspace_id: workspace_id.to_string(),
            event,
            timestamp: Utc::now(),
        };
        trace!(workspace_id, event = ?envelope.event, "publishing event");
        let mut senders = self.inner.lock().expect("EventBus lock poisoned");
        senders.retain(|tx| tx.send(envelope.clone()).is_ok());
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
