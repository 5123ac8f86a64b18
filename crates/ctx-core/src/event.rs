//! Events carried between the reading buffer, the scheduler and callback
//! consumers

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Timestamp;

/// Payload with a fixed event type
pub trait EventData: Clone + Send + Sync + 'static {
    fn event_type() -> &'static str;
}

/// Event type name
///
/// Callback targets double as event types, so any string is valid. `*`
/// subscribes to everything.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventType(String);

impl EventType {
    /// Wildcard subscription name
    pub const WILDCARD: &'static str = "*";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == Self::WILDCARD
    }
}

impl From<&str> for EventType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for EventType {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where an event was produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOrigin {
    /// On this device
    #[default]
    Local,
    /// Pushed in from another device
    Remote,
}

/// An event on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T = serde_json::Value> {
    pub event_type: EventType,
    pub data: T,
    pub origin: EventOrigin,
    /// Wall-clock time the event was fired
    pub fired_at: Timestamp,
}

impl<T> Event<T> {
    /// A local event stamped with the wall clock
    pub fn new(event_type: impl Into<EventType>, data: T) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            origin: EventOrigin::Local,
            fired_at: Timestamp::now(),
        }
    }

    pub fn with_origin(mut self, origin: EventOrigin) -> Self {
        self.origin = origin;
        self
    }

    /// Replace the payload, keeping type, origin and time
    pub fn map<U>(self, data: U) -> Event<U> {
        Event {
            event_type: self.event_type,
            data,
            origin: self.origin,
            fired_at: self.fired_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_wildcard() {
        assert!(EventType::from("*").is_wildcard());
        assert!(!EventType::from("alerts").is_wildcard());
        assert_eq!(EventType::new("alerts").to_string(), "alerts");
    }

    #[test]
    fn test_event_serializes_type_as_string() {
        let event = Event::new("alerts", 5).with_origin(EventOrigin::Remote);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "alerts");
        assert_eq!(json["origin"], "remote");
        assert_eq!(json["data"], 5);
    }
}
