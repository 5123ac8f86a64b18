//! Callback delivery
//!
//! The engine hands every observed change to its sinks exactly once. Sinks
//! decide the transport: a closure, an mpsc channel, or the event bus.

use ctx_core::events::ContextChangedData;
use ctx_core::{EventOrigin, Outcome, Timestamp, TriState};
use ctx_event_bus::EventBus;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A change of a registered expression's result
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Registered expression id
    pub id: String,
    pub outcome: Outcome,
    /// Callback targets selected for this outcome
    pub targets: Vec<String>,
}

impl Notification {
    /// Tri-state and timestamp of a boolean result
    pub fn state(&self) -> Option<(TriState, Timestamp)> {
        match &self.outcome {
            Outcome::State { state, timestamp } => Some((*state, *timestamp)),
            Outcome::Values { .. } => None,
        }
    }
}

/// Receiver of change notifications
pub trait CallbackSink: Send + Sync {
    fn deliver(&self, notification: &Notification);
}

impl<F> CallbackSink for F
where
    F: Fn(&Notification) + Send + Sync,
{
    fn deliver(&self, notification: &Notification) {
        self(notification)
    }
}

/// Sink forwarding notifications into an unbounded channel
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    /// Create a sink and the receiver it feeds
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl CallbackSink for ChannelSink {
    fn deliver(&self, notification: &Notification) {
        if self.tx.send(notification.clone()).is_err() {
            warn!(expression_id = %notification.id, "Callback receiver dropped");
        }
    }
}

/// Sink firing one bus event per callback target
///
/// The event type is the target name and the payload is
/// [`ContextChangedData`].
pub struct BusSink {
    bus: Arc<EventBus>,
}

impl BusSink {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

impl CallbackSink for BusSink {
    fn deliver(&self, notification: &Notification) {
        let data = ContextChangedData {
            id: notification.id.clone(),
            outcome: notification.outcome.clone(),
        };
        for target in &notification.targets {
            let delivered = self.bus.fire_as(target.as_str(), &data, EventOrigin::Local);
            debug!(expression_id = %notification.id, target, delivered, "Callback fired");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn notification(targets: &[&str]) -> Notification {
        Notification {
            id: "too_hot".to_string(),
            outcome: Outcome::State {
                state: TriState::True,
                timestamp: Timestamp::from_millis(7),
            },
            targets: targets.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_closure_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let sink = move |n: &Notification| seen_clone.lock().unwrap().push(n.id.clone());

        sink.deliver(&notification(&[]));
        assert_eq!(*seen.lock().unwrap(), vec!["too_hot".to_string()]);
    }

    #[test]
    fn test_channel_sink() {
        let (sink, mut rx) = ChannelSink::channel();
        sink.deliver(&notification(&["a"]));
        let received = rx.try_recv().unwrap();
        assert_eq!(received.state(), Some((TriState::True, Timestamp::from_millis(7))));
    }

    #[tokio::test]
    async fn test_bus_sink_fires_per_target() {
        let bus = Arc::new(EventBus::new());
        let mut alerts = bus.subscribe("alerts");
        let mut changes = bus.subscribe("changes");

        BusSink::new(bus.clone()).deliver(&notification(&["alerts", "changes"]));

        let event = alerts.recv().await.unwrap();
        let data: ContextChangedData = serde_json::from_value(event.data).unwrap();
        assert_eq!(data.id, "too_hot");
        assert_eq!(data.outcome.state(), Some(TriState::True));
        assert!(changes.recv().await.is_ok());
    }
}
