//! Sensor-access contract
//!
//! The engine never talks to hardware. It binds each sensor leaf to a
//! collaborator implementing [`SensorAccess`] under the leaf's path id and
//! asks it for buffered readings during evaluation.

use std::time::Duration;
use thiserror::Error;

use crate::{Timestamp, TimestampedValue};

/// Sensor collaborator errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SensorError {
    #[error("Unknown sensor: {0}")]
    UnknownSensor(String),

    #[error("Leaf not bound to a sensor: {0}")]
    NotBound(String),

    #[error("Binding rejected for {path}: {reason}")]
    Rejected { path: String, reason: String },

    #[error("Reading failed for {id}: {reason}")]
    ReadFailed { id: String, reason: String },
}

/// Result type for sensor operations
pub type SensorResult<T> = Result<T, SensorError>;

/// Access to buffered sensor readings
///
/// Implementations are shared between the worker and registration threads.
/// `suspend`/`resume` are power hints; failing them never affects results.
pub trait SensorAccess: Send + Sync {
    /// Bind leaf `id` to the sensor at `path`
    fn register(&self, id: &str, path: &str, config: &serde_json::Value) -> SensorResult<()>;

    /// Release the binding of leaf `id`
    fn unregister(&self, id: &str);

    /// Readings for leaf `id` in `[now - history_length_ms, now]`, newest first
    ///
    /// A zero history length asks for the latest reading only.
    fn get_values(
        &self,
        id: &str,
        now: Timestamp,
        history_length_ms: i64,
    ) -> SensorResult<Vec<TimestampedValue>>;

    /// Stop active sensing for leaf `id` until `until`
    fn suspend(&self, _id: &str, _until: Timestamp) -> SensorResult<()> {
        Ok(())
    }

    /// Resume active sensing for leaf `id`
    fn resume(&self, _id: &str) -> SensorResult<()> {
        Ok(())
    }

    /// Relative cost of reading leaf `id`, None when unknown
    fn cost(&self, _id: &str) -> Option<f64> {
        None
    }

    /// Time the sensor needs to produce readings after a resume
    fn startup_time(&self, _id: &str) -> Duration {
        Duration::ZERO
    }
}
