//! History reduction
//!
//! Collapses a window of readings into a single representative value, or
//! keeps it whole for element-wise comparison.

use ctx_core::{HistoryReductionMode, Scalar, Timestamp, TimestampedValue};
use std::cmp::Ordering;
use tracing::trace;

use crate::error::{EvalError, EvalResult};

/// Reduce `values` according to `mode`
///
/// The returned sequence is newest first. MAX, MIN and MEDIAN return an
/// element of the input; MEAN synthesizes a double stamped with the oldest
/// reading it covers.
pub fn reduce(
    mode: HistoryReductionMode,
    mut values: Vec<TimestampedValue>,
    now: Timestamp,
) -> EvalResult<Vec<TimestampedValue>> {
    values.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    if values.is_empty() || !mode.collapses() {
        return Ok(values);
    }

    let reduced = match mode {
        HistoryReductionMode::Max => extreme(&values, Ordering::Greater),
        HistoryReductionMode::Min => extreme(&values, Ordering::Less),
        HistoryReductionMode::Median => median(&values),
        HistoryReductionMode::Mean => time_weighted_mean(&values, now)?,
        _ => return Ok(values),
    };

    trace!(?mode, value = %reduced.value, timestamp = %reduced.timestamp, "Reduced history");
    Ok(vec![reduced])
}

/// Element that wins every comparison in direction `want`
///
/// Input is newest first, so on ties the most recent reading is kept.
fn extreme(values: &[TimestampedValue], want: Ordering) -> TimestampedValue {
    let mut best = &values[0];
    for candidate in &values[1..] {
        if candidate.cmp_value(best) == Some(want) {
            best = candidate;
        }
    }
    best.clone()
}

fn median(values: &[TimestampedValue]) -> TimestampedValue {
    let mut sorted: Vec<&TimestampedValue> = values.iter().collect();
    sorted.sort_by(|a, b| a.cmp_value(b).unwrap_or(Ordering::Equal));
    sorted[(sorted.len() - 1) / 2].clone()
}

/// Average where each reading is weighted by how long it stayed current
///
/// A reading is current until the next one arrives; the newest is current
/// until `now`. Falls back to the plain mean when all weights are zero.
fn time_weighted_mean(values: &[TimestampedValue], now: Timestamp) -> EvalResult<TimestampedValue> {
    let mut numbers = Vec::with_capacity(values.len());
    for v in values {
        let n = v
            .value
            .as_f64()
            .ok_or_else(|| EvalError::UnsupportedOperator {
                op: "mean".to_string(),
                kind: v.value.kind().to_string(),
            })?;
        numbers.push(n);
    }

    // values are newest first: the reading at i is superseded by the one at i - 1
    let mut weighted = 0.0;
    let mut total = 0.0;
    for (i, v) in values.iter().enumerate() {
        let until = if i == 0 { now } else { values[i - 1].timestamp };
        let weight = until.duration_since(v.timestamp).as_millis() as f64;
        weighted += numbers[i] * weight;
        total += weight;
    }

    let mean = if total > 0.0 {
        weighted / total
    } else {
        numbers.iter().sum::<f64>() / numbers.len() as f64
    };

    let oldest = values[values.len() - 1].timestamp;
    let expire_at = values.iter().filter_map(|v| v.expire_at).min();
    Ok(TimestampedValue {
        value: Scalar::Double(mean),
        timestamp: oldest,
        expire_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(ms: i64) -> Timestamp {
        Timestamp::from_millis(ms)
    }

    fn readings(pairs: &[(i64, i64)]) -> Vec<TimestampedValue> {
        pairs
            .iter()
            .map(|(v, t)| TimestampedValue::new(*v, ts(*t)))
            .collect()
    }

    #[test]
    fn test_max_returns_input_element() {
        let input = readings(&[(5, 0), (9, 500), (7, 550)]);
        let out = reduce(HistoryReductionMode::Max, input.clone(), ts(600)).unwrap();
        assert_eq!(out, vec![TimestampedValue::new(9, ts(500))]);
        assert!(input.contains(&out[0]));
    }

    #[test]
    fn test_ties_keep_most_recent() {
        let input = readings(&[(3, 0), (3, 100), (1, 200)]);
        let max = reduce(HistoryReductionMode::Max, input.clone(), ts(300)).unwrap();
        assert_eq!(max[0].timestamp, ts(100));

        let input = readings(&[(1, 0), (1, 100), (3, 200)]);
        let min = reduce(HistoryReductionMode::Min, input, ts(300)).unwrap();
        assert_eq!(min[0].timestamp, ts(100));
    }

    #[test]
    fn test_median_lower_middle() {
        let input = readings(&[(4, 0), (1, 10), (3, 20), (2, 30)]);
        let out = reduce(HistoryReductionMode::Median, input, ts(40)).unwrap();
        assert_eq!(out[0].value, Scalar::Int(2));

        let input = readings(&[(4, 0), (1, 10), (3, 20)]);
        let out = reduce(HistoryReductionMode::Median, input, ts(40)).unwrap();
        assert_eq!(out[0].value, Scalar::Int(3));
    }

    #[test]
    fn test_time_weighted_mean() {
        // 10 held for 100ms, 20 held for 300ms
        let input = readings(&[(10, 0), (20, 100)]);
        let out = reduce(HistoryReductionMode::Mean, input, ts(400)).unwrap();
        assert_eq!(out[0].value, Scalar::Double(17.5));
        assert_eq!(out[0].timestamp, ts(0));
    }

    #[test]
    fn test_mean_without_duration_is_plain_average() {
        let input = readings(&[(10, 100), (20, 100)]);
        let out = reduce(HistoryReductionMode::Mean, input, ts(100)).unwrap();
        assert_eq!(out[0].value, Scalar::Double(15.0));
    }

    #[test]
    fn test_mean_rejects_strings() {
        let input = vec![TimestampedValue::new("home", ts(0))];
        let err = reduce(HistoryReductionMode::Mean, input, ts(10)).unwrap_err();
        assert!(matches!(err, EvalError::UnsupportedOperator { .. }));
    }

    #[test]
    fn test_non_collapsing_modes_sort_newest_first() {
        let input = readings(&[(1, 0), (2, 200), (3, 100)]);
        for mode in [
            HistoryReductionMode::None,
            HistoryReductionMode::Any,
            HistoryReductionMode::All,
        ] {
            let out = reduce(mode, input.clone(), ts(300)).unwrap();
            let stamps: Vec<i64> = out.iter().map(|v| v.timestamp.as_millis()).collect();
            assert_eq!(stamps, vec![200, 100, 0]);
        }
    }

    #[test]
    fn test_empty_stays_empty() {
        assert!(reduce(HistoryReductionMode::Max, vec![], ts(0)).unwrap().is_empty());
    }
}
