//! In-memory sensor reading buffer
//!
//! This crate provides the SensorStore, which buffers timestamped readings
//! per sensor path, binds expression leaves to sensors, and publishes
//! `sensor_updated` events on the event bus whenever a bound sensor
//! receives a new reading. It implements [`SensorAccess`] so the engine can
//! run against it directly.

use ctx_core::events::SensorUpdatedData;
use ctx_core::{SensorAccess, SensorError, SensorResult, Timestamp, TimestampedValue};
use ctx_event_bus::EventBus;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, trace};

/// Default number of milliseconds of readings kept per sensor (one hour)
pub const DEFAULT_RETENTION_MS: i64 = 3_600_000;

/// Static description of a declared sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSpec {
    /// Relative cost of keeping the sensor active
    #[serde(default = "default_cost")]
    pub cost: f64,

    /// Warm-up time after a resume, in milliseconds
    #[serde(default)]
    pub startup_ms: u64,

    /// How far back readings are kept, in milliseconds
    #[serde(default = "default_retention")]
    pub retention_ms: i64,
}

fn default_cost() -> f64 {
    1.0
}

fn default_retention() -> i64 {
    DEFAULT_RETENTION_MS
}

impl Default for SensorSpec {
    fn default() -> Self {
        Self {
            cost: default_cost(),
            startup_ms: 0,
            retention_ms: default_retention(),
        }
    }
}

/// A leaf bound to a sensor path
#[derive(Debug, Clone)]
struct Binding {
    path: String,
    config: serde_json::Value,
}

/// The sensor store buffers readings and tracks leaf bindings
///
/// The SensorStore is responsible for:
/// - Keeping a bounded, time-ordered history of readings per sensor path
/// - Binding leaf ids to sensor paths (and rejecting unknown sensors)
/// - Answering windowed reads for bound leaves
/// - Remembering suspend hints
/// - Firing SENSOR_UPDATED events for leaves bound to an updated sensor
pub struct SensorStore {
    /// Declared sensors keyed by path
    sensors: DashMap<String, SensorSpec>,
    /// Readings per path, oldest first
    readings: DashMap<String, VecDeque<TimestampedValue>>,
    /// Leaf id to binding
    bindings: DashMap<String, Binding>,
    /// Index of leaf ids by sensor path
    path_index: DashMap<String, Vec<String>>,
    /// Suspend hints by leaf id
    suspended: DashMap<String, Timestamp>,
    /// Number of reads served per leaf id
    reads: DashMap<String, usize>,
    /// Event bus for push notifications
    event_bus: Option<Arc<EventBus>>,
    /// Whether binding to an undeclared path fails
    strict: bool,
}

impl SensorStore {
    /// Create a store that publishes updates on the given bus
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self::build(Some(event_bus))
    }

    /// Create a store without push notifications
    pub fn detached() -> Self {
        Self::build(None)
    }

    fn build(event_bus: Option<Arc<EventBus>>) -> Self {
        Self {
            sensors: DashMap::new(),
            readings: DashMap::new(),
            bindings: DashMap::new(),
            path_index: DashMap::new(),
            suspended: DashMap::new(),
            reads: DashMap::new(),
            event_bus,
            strict: true,
        }
    }

    /// Allow binding leaves to sensors that were never declared
    pub fn accept_undeclared(mut self) -> Self {
        self.strict = false;
        self
    }

    /// Declare a sensor so leaves can bind to it
    pub fn declare(&self, path: impl Into<String>, spec: SensorSpec) {
        let path = path.into();
        debug!(path = %path, cost = spec.cost, startup_ms = spec.startup_ms, "Declaring sensor");
        self.sensors.insert(path, spec);
    }

    /// Record a reading for a sensor path
    ///
    /// Readings are kept ordered by timestamp and pruned to the sensor's
    /// retention. Fires SENSOR_UPDATED for the leaves bound to `path` and
    /// returns their ids.
    #[instrument(skip(self, reading), fields(path = %path))]
    pub fn record(&self, path: &str, reading: TimestampedValue) -> Vec<String> {
        let retention = self
            .sensors
            .get(path)
            .map(|s| s.retention_ms)
            .unwrap_or(DEFAULT_RETENTION_MS);
        let timestamp = reading.timestamp;

        {
            let mut buffer = self.readings.entry(path.to_string()).or_default();
            let pos = buffer.partition_point(|r| r.timestamp <= timestamp);
            buffer.insert(pos, reading);

            let newest = buffer.back().map(|r| r.timestamp).unwrap_or(timestamp);
            let cutoff = newest.minus_millis(retention);
            while buffer.front().is_some_and(|r| r.timestamp < cutoff) {
                buffer.pop_front();
            }
            trace!(buffered = buffer.len(), "Recorded reading");
        }

        let leaf_ids = self.bound_leaves(path);
        if !leaf_ids.is_empty() {
            if let Some(bus) = &self.event_bus {
                bus.fire_typed(SensorUpdatedData {
                    path: path.to_string(),
                    leaf_ids: leaf_ids.clone(),
                    timestamp,
                });
            }
        }
        leaf_ids
    }

    /// Leaf ids currently bound to a sensor path
    pub fn bound_leaves(&self, path: &str) -> Vec<String> {
        self.path_index
            .get(path)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    /// Sensor path a leaf is bound to
    pub fn binding(&self, id: &str) -> Option<String> {
        self.bindings.get(id).map(|b| b.path.clone())
    }

    /// Configuration a leaf was bound with
    pub fn binding_config(&self, id: &str) -> Option<serde_json::Value> {
        self.bindings.get(id).map(|b| b.config.clone())
    }

    /// Suspend hint currently recorded for a leaf
    pub fn suspended_until(&self, id: &str) -> Option<Timestamp> {
        self.suspended.get(id).map(|t| *t)
    }

    /// Number of reads served for a leaf
    pub fn read_count(&self, id: &str) -> usize {
        self.reads.get(id).map(|n| *n).unwrap_or(0)
    }

    /// Number of bound leaves
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    fn spec_for(&self, id: &str) -> Option<SensorSpec> {
        let path = self.binding(id)?;
        self.sensors.get(&path).map(|s| s.clone())
    }
}

impl SensorAccess for SensorStore {
    fn register(&self, id: &str, path: &str, config: &serde_json::Value) -> SensorResult<()> {
        if self.strict && !self.sensors.contains_key(path) {
            return Err(SensorError::UnknownSensor(path.to_string()));
        }

        debug!(leaf_id = id, path, "Binding leaf to sensor");
        let previous = self.bindings.insert(
            id.to_string(),
            Binding {
                path: path.to_string(),
                config: config.clone(),
            },
        );
        if let Some(previous) = previous {
            if let Some(mut ids) = self.path_index.get_mut(&previous.path) {
                ids.retain(|leaf| leaf != id);
            }
        }
        self.path_index
            .entry(path.to_string())
            .or_default()
            .push(id.to_string());
        Ok(())
    }

    fn unregister(&self, id: &str) {
        if let Some((_, binding)) = self.bindings.remove(id) {
            trace!(leaf_id = id, path = %binding.path, "Unbinding leaf");
            if let Some(mut ids) = self.path_index.get_mut(&binding.path) {
                ids.retain(|leaf| leaf != id);
            }
        }
        self.suspended.remove(id);
        self.reads.remove(id);
    }

    fn get_values(
        &self,
        id: &str,
        now: Timestamp,
        history_length_ms: i64,
    ) -> SensorResult<Vec<TimestampedValue>> {
        let path = self
            .binding(id)
            .ok_or_else(|| SensorError::NotBound(id.to_string()))?;
        *self.reads.entry(id.to_string()).or_insert(0) += 1;

        let Some(buffer) = self.readings.get(&path) else {
            return Ok(Vec::new());
        };

        let visible = buffer.iter().rev().filter(|r| r.timestamp <= now);
        let values: Vec<TimestampedValue> = if history_length_ms <= 0 {
            visible.take(1).cloned().collect()
        } else {
            let start = now.minus_millis(history_length_ms);
            visible
                .take_while(|r| r.timestamp >= start)
                .cloned()
                .collect()
        };

        trace!(leaf_id = id, path = %path, count = values.len(), "Served readings");
        Ok(values)
    }

    fn suspend(&self, id: &str, until: Timestamp) -> SensorResult<()> {
        if !self.bindings.contains_key(id) {
            return Err(SensorError::NotBound(id.to_string()));
        }
        debug!(leaf_id = id, until = %until, "Suspending sensing");
        self.suspended.insert(id.to_string(), until);
        Ok(())
    }

    fn resume(&self, id: &str) -> SensorResult<()> {
        if self.suspended.remove(id).is_some() {
            debug!(leaf_id = id, "Resuming sensing");
        }
        Ok(())
    }

    fn cost(&self, id: &str) -> Option<f64> {
        self.spec_for(id).map(|s| s.cost)
    }

    fn startup_time(&self, id: &str) -> Duration {
        self.spec_for(id)
            .map(|s| Duration::from_millis(s.startup_ms))
            .unwrap_or(Duration::ZERO)
    }
}

/// Thread-safe wrapper for SensorStore
pub type SharedSensorStore = Arc<SensorStore>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ts(ms: i64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn store_with(path: &str) -> SensorStore {
        let store = SensorStore::detached();
        store.declare(path, SensorSpec::default());
        store
    }

    #[test]
    fn test_register_unknown_sensor_fails() {
        let store = SensorStore::detached();
        let err = store.register("x/l", "sensor.missing", &json!(null)).unwrap_err();
        assert_eq!(err, SensorError::UnknownSensor("sensor.missing".to_string()));

        let lenient = SensorStore::detached().accept_undeclared();
        assert!(lenient.register("x/l", "sensor.missing", &json!(null)).is_ok());
    }

    #[test]
    fn test_window_read_newest_first() {
        let store = store_with("sensor.a");
        store.register("x/l", "sensor.a", &json!(null)).unwrap();
        store.record("sensor.a", TimestampedValue::new(5, ts(0)));
        store.record("sensor.a", TimestampedValue::new(9, ts(500)));
        store.record("sensor.a", TimestampedValue::new(7, ts(700)));

        // Reading at 700 lies in the future of `now`
        let values = store.get_values("x/l", ts(600), 1000).unwrap();
        let raw: Vec<i64> = values
            .iter()
            .map(|v| v.value.as_f64().unwrap() as i64)
            .collect();
        assert_eq!(raw, vec![9, 5]);

        // Reading at 0 has left a 300ms window
        let values = store.get_values("x/l", ts(600), 300).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(store.read_count("x/l"), 2);
    }

    #[test]
    fn test_zero_history_reads_latest_only() {
        let store = store_with("sensor.a");
        store.register("x/l", "sensor.a", &json!(null)).unwrap();
        store.record("sensor.a", TimestampedValue::new(1, ts(10)));
        store.record("sensor.a", TimestampedValue::new(2, ts(20)));

        let values = store.get_values("x/l", ts(100), 0).unwrap();
        assert_eq!(values, vec![TimestampedValue::new(2, ts(20))]);
    }

    #[test]
    fn test_out_of_order_readings_are_sorted() {
        let store = store_with("sensor.a");
        store.register("x/l", "sensor.a", &json!(null)).unwrap();
        store.record("sensor.a", TimestampedValue::new(2, ts(20)));
        store.record("sensor.a", TimestampedValue::new(1, ts(10)));

        let values = store.get_values("x/l", ts(100), 1000).unwrap();
        assert_eq!(values[0].timestamp, ts(20));
        assert_eq!(values[1].timestamp, ts(10));
    }

    #[test]
    fn test_retention_prunes_old_readings() {
        let store = SensorStore::detached();
        store.declare(
            "sensor.a",
            SensorSpec {
                retention_ms: 100,
                ..Default::default()
            },
        );
        store.register("x/l", "sensor.a", &json!(null)).unwrap();
        store.record("sensor.a", TimestampedValue::new(1, ts(0)));
        store.record("sensor.a", TimestampedValue::new(2, ts(500)));

        let values = store.get_values("x/l", ts(500), 10_000).unwrap();
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_unbound_read_fails() {
        let store = store_with("sensor.a");
        assert_eq!(
            store.get_values("nope", ts(0), 0).unwrap_err(),
            SensorError::NotBound("nope".to_string())
        );
    }

    #[test]
    fn test_suspend_resume_and_unregister() {
        let store = store_with("sensor.a");
        store.register("x/l", "sensor.a", &json!(null)).unwrap();
        store.suspend("x/l", ts(900)).unwrap();
        assert_eq!(store.suspended_until("x/l"), Some(ts(900)));
        store.resume("x/l").unwrap();
        assert_eq!(store.suspended_until("x/l"), None);

        store.unregister("x/l");
        assert!(store.bound_leaves("sensor.a").is_empty());
        assert!(store.suspend("x/l", ts(1)).is_err());
    }

    #[test]
    fn test_cost_and_startup_from_spec() {
        let store = SensorStore::detached();
        store.declare(
            "sensor.gps",
            SensorSpec {
                cost: 5.0,
                startup_ms: 250,
                retention_ms: DEFAULT_RETENTION_MS,
            },
        );
        store.register("x/l", "sensor.gps", &json!(null)).unwrap();
        assert_eq!(store.cost("x/l"), Some(5.0));
        assert_eq!(store.startup_time("x/l"), Duration::from_millis(250));
        assert_eq!(store.cost("unbound"), None);
    }

    #[tokio::test]
    async fn test_record_fires_sensor_updated() {
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe_typed::<SensorUpdatedData>();
        let store = SensorStore::new(bus.clone());
        store.declare("sensor.a", SensorSpec::default());
        store.register("root/l", "sensor.a", &json!(null)).unwrap();
        store.register("other/r", "sensor.a", &json!(null)).unwrap();

        let ids = store.record("sensor.a", TimestampedValue::new(1, ts(5)));
        assert_eq!(ids, vec!["root/l".to_string(), "other/r".to_string()]);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.data.path, "sensor.a");
        assert_eq!(event.data.leaf_ids.len(), 2);
        assert_eq!(event.data.timestamp, ts(5));
    }
}
