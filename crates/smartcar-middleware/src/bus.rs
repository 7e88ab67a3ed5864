//! Publish/subscribe bus for outbound [`Notification`]s.
//!
//! Uses [`tokio::sync::broadcast`] so every attached transport receives every
//! notification and a slow one never blocks the control path. Publishing
//! with nobody listening is normal (no client connected) and is not an
//! error.

use smartcar_types::{Event, Notification};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Number of buffered notifications before a slow subscriber starts lagging.
const DEFAULT_CAPACITY: usize = 64;

/// Shared notification bus. Clones share the same channel.
#[derive(Clone, Debug)]
pub struct NotificationBus {
    sender: broadcast::Sender<Event>,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Wrap `payload` in an [`Event`] from `source` and publish it.
    ///
    /// Returns the number of subscribers that were handed the event.
    pub fn publish(&self, source: &str, payload: Notification) -> usize {
        let event = Event::new(source, payload);
        match self.sender.send(event) {
            Ok(n) => n,
            Err(broadcast::error::SendError(event)) => {
                debug!(source = %event.source, "notification dropped, no subscribers");
                0
            }
        }
    }

    /// Publish a recognised voice transcript.
    pub fn command(&self, source: &str, text: impl Into<String>) -> usize {
        self.publish(source, Notification::Command { command: text.into() })
    }

    /// Publish an assistant or voice-command reply.
    pub fn response(&self, source: &str, text: impl Into<String>) -> usize {
        self.publish(
            source,
            Notification::Response {
                response: text.into(),
            },
        )
    }

    pub fn subscribe(&self) -> NotificationSubscriber {
        NotificationSubscriber {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Receiving end of a [`NotificationBus`].
pub struct NotificationSubscriber {
    receiver: broadcast::Receiver<Event>,
}

impl NotificationSubscriber {
    /// Wait for the next notification.
    ///
    /// Lag is logged and skipped. Returns `None` once every bus handle has
    /// been dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "notification subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`][Self::recv].
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "notification subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }
}

/// Render an event as the JSON object a client expects on the wire,
/// e.g. `{"response":"Moving forward"}`.
pub fn to_wire(event: &Event) -> serde_json::Value {
    serde_json::to_value(&event.payload).unwrap_or(serde_json::Value::Null)
}
