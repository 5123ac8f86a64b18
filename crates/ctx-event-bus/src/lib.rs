//! Event bus with typed pub/sub
//!
//! The bus carries two kinds of traffic: sensor push notifications
//! (`sensor_updated`) from the reading buffer to the scheduler, and context
//! callbacks from the scheduler to whoever subscribed to a callback target.

use ctx_core::{Event, EventData, EventOrigin, EventType};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Per-channel buffer before slow receivers start lagging
const CHANNEL_CAPACITY: usize = 1024;

/// Event with an untyped JSON payload
pub type RawEvent = Event<serde_json::Value>;

/// Broadcast fan-out keyed by event type
///
/// Channels are created on first subscription, so firing an event type
/// nobody subscribed to costs a map lookup. Wildcard receivers see all
/// traffic.
pub struct EventBus {
    channels: DashMap<EventType, broadcast::Sender<RawEvent>>,
    wildcard: broadcast::Sender<RawEvent>,
    capacity: usize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            wildcard: broadcast::channel(capacity).0,
            capacity,
        }
    }

    /// Receiver for one event type, or for everything with `*`
    pub fn subscribe(&self, event_type: impl Into<EventType>) -> broadcast::Receiver<RawEvent> {
        let event_type = event_type.into();
        if event_type.is_wildcard() {
            return self.subscribe_all();
        }
        trace!(event_type = %event_type, "New subscriber");
        let capacity = self.capacity;
        self.channels
            .entry(event_type)
            .or_insert_with(|| broadcast::channel(capacity).0)
            .subscribe()
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<RawEvent> {
        self.wildcard.subscribe()
    }

    /// Receiver that decodes payloads of `T`'s event type
    pub fn subscribe_typed<T: EventData + DeserializeOwned>(&self) -> TypedEventReceiver<T> {
        TypedEventReceiver {
            rx: self.subscribe(T::event_type()),
            _data: PhantomData,
        }
    }

    /// Deliver an event; returns how many receivers got it
    pub fn fire(&self, event: RawEvent) -> usize {
        debug!(event_type = %event.event_type, origin = ?event.origin, "Firing event");

        // Send only fails when there are no receivers
        let typed = self
            .channels
            .get(&event.event_type)
            .map_or(0, |tx| tx.send(event.clone()).unwrap_or(0));
        typed + self.wildcard.send(event).unwrap_or(0)
    }

    /// Fire typed data as a local event
    pub fn fire_typed<T: EventData + Serialize>(&self, data: T) -> usize {
        self.fire_as(T::event_type(), &data, EventOrigin::Local)
    }

    /// Fire any serializable payload under the given type
    pub fn fire_as<T: Serialize>(
        &self,
        event_type: impl Into<EventType>,
        data: &T,
        origin: EventOrigin,
    ) -> usize {
        let payload = serde_json::to_value(data).unwrap_or_default();
        self.fire(Event::new(event_type, payload).with_origin(origin))
    }

    /// Event types that have had a subscriber
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedEventBus = Arc<EventBus>;

/// Receiver yielding events whose payload decodes as `T`
///
/// Payloads that fail to decode are skipped.
pub struct TypedEventReceiver<T> {
    rx: broadcast::Receiver<RawEvent>,
    _data: PhantomData<T>,
}

impl<T: EventData + DeserializeOwned> TypedEventReceiver<T> {
    pub async fn recv(&mut self) -> Result<Event<T>, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            match T::deserialize(&event.data) {
                Ok(data) => return Ok(event.map(data)),
                Err(e) => trace!(event_type = %event.event_type, error = %e, "Undecodable payload"),
            }
        }
    }
}
