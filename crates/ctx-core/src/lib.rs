//! Core types for context expressions
//!
//! This crate provides the fundamental types shared by the evaluation engine
//! and the scheduler: Timestamp, Scalar, TimestampedValue, Expression,
//! Evaluation, Clock, and the sensor-access contract.

mod clock;
mod evaluation;
mod event;
mod expression;
mod sensor;
mod timestamp;
mod value;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use evaluation::{Evaluation, Outcome, TriState};
pub use event::{Event, EventData, EventOrigin, EventType};
pub use expression::{
    Comparator, Expression, HistoryReductionMode, Location, LogicOp, MathOp, SensorLeaf, Strategy,
};
pub use sensor::{SensorAccess, SensorError, SensorResult};
pub use timestamp::Timestamp;
pub use value::{GeoPoint, Scalar, TimestampedValue};

/// Path segment appended to a node id for its left operand
pub const LEFT_SUFFIX: &str = "/l";

/// Path segment appended to a node id for its right operand
pub const RIGHT_SUFFIX: &str = "/r";

/// Path segment appended to a node id for the operand of a unary node
pub const CHILD_SUFFIX: &str = "/c";

/// Standard event types used by the engine
pub mod events {
    use super::*;

    /// Event type fired when new readings arrive for bound leaves
    pub const SENSOR_UPDATED: &str = "sensor_updated";

    /// Data for SENSOR_UPDATED events
    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    pub struct SensorUpdatedData {
        /// Sensor path the reading was recorded for
        pub path: String,
        /// Leaf ids bound to that sensor
        pub leaf_ids: Vec<String>,
        /// Timestamp of the new reading
        pub timestamp: Timestamp,
    }

    impl EventData for SensorUpdatedData {
        fn event_type() -> &'static str {
            SENSOR_UPDATED
        }
    }

    /// Data carried by a callback delivered through the event bus
    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    pub struct ContextChangedData {
        /// Registered expression id
        pub id: String,
        /// The new outcome
        pub outcome: Outcome,
    }
}

/// Id of the left operand of the node `id`
pub fn left_id(id: &str) -> String {
    format!("{id}{LEFT_SUFFIX}")
}

/// Id of the right operand of the node `id`
pub fn right_id(id: &str) -> String {
    format!("{id}{RIGHT_SUFFIX}")
}

/// Id of the single operand of the unary node `id`
pub fn child_id(id: &str) -> String {
    format!("{id}{CHILD_SUFFIX}")
}

/// Whether `node_id` lies in the tree rooted at `root_id`
pub fn is_under(node_id: &str, root_id: &str) -> bool {
    node_id == root_id
        || (node_id.starts_with(root_id) && node_id[root_id.len()..].starts_with('/'))
}
