//! Replay of recorded sensor readings
//!
//! Input is JSON lines:
//!
//! ```text
//! {"sensor": "sensor.temperature", "value": 21.5, "timestamp": "2024-05-01T12:00:00Z"}
//! {"sensor": "sensor.door", "value": "open", "timestamp": 1714564805000}
//! ```
//!
//! The manual clock jumps from deadline to deadline between readings, so
//! every evaluation happens at the instant the scheduler asked for.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ctx_core::{Clock, ManualClock, Scalar, Timestamp, TimestampedValue};
use serde::Deserialize;
use std::io::BufRead;
use tracing::{debug, warn};

use crate::daemon::ContextDaemon;

/// Reading time as epoch milliseconds or RFC 3339
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ReadingTime {
    Millis(i64),
    Rfc3339(DateTime<Utc>),
}

impl From<ReadingTime> for Timestamp {
    fn from(time: ReadingTime) -> Self {
        match time {
            ReadingTime::Millis(ms) => Timestamp::from_millis(ms),
            ReadingTime::Rfc3339(dt) => Timestamp::from(dt),
        }
    }
}

/// One input line
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Reading {
    pub sensor: String,
    pub value: Scalar,
    pub timestamp: ReadingTime,
    #[serde(default)]
    pub expire_at: Option<ReadingTime>,
}

impl Reading {
    pub fn at(&self) -> Timestamp {
        self.timestamp.into()
    }

    pub fn into_value(self) -> TimestampedValue {
        let value = TimestampedValue::new(self.value, self.timestamp.into());
        match self.expire_at {
            Some(expire_at) => value.expiring_at(expire_at.into()),
            None => value,
        }
    }
}

/// Parse one line; blank lines and `#` comments yield None
pub fn parse_line(line: &str) -> Result<Option<Reading>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line)?))
}

/// Read every reading from a JSON-lines source
pub fn read_readings(input: impl BufRead) -> Result<Vec<Reading>> {
    let mut readings = Vec::new();
    for (n, line) in input.lines().enumerate() {
        let line = line.with_context(|| format!("reading line {}", n + 1))?;
        if let Some(reading) = parse_line(&line).with_context(|| format!("parsing line {}", n + 1))? {
            readings.push(reading);
        }
    }
    Ok(readings)
}

/// Counters of a finished replay
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub readings: usize,
    pub evaluations: usize,
}

/// Feed readings through the daemon in timestamp order of arrival
///
/// Readings older than the clock are recorded at their own timestamp but
/// do not move the clock back.
pub fn replay(daemon: &ContextDaemon, clock: &ManualClock, readings: Vec<Reading>) -> ReplaySummary {
    let mut summary = ReplaySummary::default();

    for reading in readings {
        let at = reading.at();
        if at < clock.now() {
            warn!(sensor = %reading.sensor, timestamp = %at, "Reading arrived out of order");
        }
        summary.evaluations += advance_to(daemon, clock, at);

        let sensor = reading.sensor.clone();
        let leaves = daemon.sensors.record(&sensor, reading.into_value());
        let preempted = daemon.engine.notify(&leaves);
        debug!(sensor = %sensor, leaves = leaves.len(), preempted, "Replayed reading");

        summary.evaluations += daemon.engine.run_due();
        summary.readings += 1;
    }
    summary
}

/// Run every deadline up to `at`, then leave the clock at `at`
fn advance_to(daemon: &ContextDaemon, clock: &ManualClock, at: Timestamp) -> usize {
    let mut evaluated = 0;
    loop {
        evaluated += daemon.engine.run_due();
        match daemon.engine.next_deadline() {
            Some(deadline) if deadline <= at && deadline > clock.now() => clock.set(deadline),
            _ => break,
        }
    }
    if at > clock.now() {
        clock.set(at);
    }
    evaluated
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctx_config::Settings;
    use ctx_core::TriState;
    use ctx_scheduler::ChannelSink;
    use std::sync::Arc;

    #[test]
    fn test_parse_line_formats() {
        let reading = parse_line(r#"{"sensor": "s", "value": 21.5, "timestamp": 1000}"#)
            .unwrap()
            .unwrap();
        assert_eq!(reading.at(), Timestamp::from_millis(1000));
        assert_eq!(reading.value, Scalar::Double(21.5));

        let reading = parse_line(r#"{"sensor": "s", "value": "on", "timestamp": "1970-01-01T00:00:02Z"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(reading.at(), Timestamp::from_millis(2000));

        assert!(parse_line("   ").unwrap().is_none());
        assert!(parse_line("# comment").unwrap().is_none());
        assert!(parse_line("{not json").is_err());
    }

    #[test]
    fn test_read_readings_reports_line() {
        let input = "{\"sensor\": \"s\", \"value\": 1, \"timestamp\": 0}\nbroken\n";
        let err = read_readings(input.as_bytes()).unwrap_err();
        assert!(format!("{err:#}").contains("line 2"));
    }

    #[test]
    fn test_replay_delivers_changes() {
        let settings = Settings::from_yaml_str(
            r#"
expressions:
  - id: door_open
    expression:
      type: comparison
      op: eq
      left: { type: sensor, entity: sensor.door }
      right: { type: constant, value: open }
"#,
        )
        .unwrap();
        let input = r#"
{"sensor": "sensor.door", "value": "closed", "timestamp": 1000}
{"sensor": "sensor.door", "value": "open", "timestamp": 2000}
{"sensor": "sensor.door", "value": "open", "timestamp": 3000}
{"sensor": "sensor.door", "value": "closed", "timestamp": 4000}
"#;
        let readings = read_readings(input.as_bytes()).unwrap();
        let clock = ManualClock::at(readings[0].at());
        let daemon = ContextDaemon::new(&settings, Arc::new(clock.clone())).unwrap();
        let (sink, mut rx) = ChannelSink::channel();
        daemon.engine.add_sink(Arc::new(sink));

        let summary = replay(&daemon, &clock, readings);
        assert_eq!(summary.readings, 4);
        assert_eq!(clock.now(), Timestamp::from_millis(4000));

        let mut states = Vec::new();
        while let Ok(n) = rx.try_recv() {
            states.push(n.state().map(|(s, _)| s));
        }
        // Registration runs before the first reading arrives
        assert_eq!(
            states,
            vec![
                Some(TriState::Undefined),
                Some(TriState::False),
                Some(TriState::True),
                Some(TriState::False),
            ]
        );
    }

    #[test]
    fn test_replay_follows_window_deadlines() {
        let settings = Settings::from_yaml_str(
            r#"
expressions:
  - id: too_hot
    expression:
      type: comparison
      op: gt
      left: { type: sensor, entity: sensor.temperature, history_reduction: max, history_length_ms: 1000 }
      right: { type: constant, value: 25 }
"#,
        )
        .unwrap();
        let readings = read_readings(
            "{\"sensor\": \"sensor.temperature\", \"value\": 30, \"timestamp\": 0}\n\
             {\"sensor\": \"sensor.temperature\", \"value\": 20, \"timestamp\": 5000}\n"
                .as_bytes(),
        )
        .unwrap();
        let clock = ManualClock::at(Timestamp::ZERO);
        let daemon = ContextDaemon::new(&settings, Arc::new(clock.clone())).unwrap();

        replay(&daemon, &clock, readings);

        // The 30 left the window at 1000, long before the 20 arrived
        let stats = daemon.engine.stats("too_hot").unwrap();
        assert!(stats.changes >= 3);
        assert_eq!(
            daemon.engine.result("too_hot").unwrap().tri_state(),
            Some(TriState::False)
        );
    }
}
