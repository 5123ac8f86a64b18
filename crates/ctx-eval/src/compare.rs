//! Pairwise comparison and the ANY/ALL strategy loop

use ctx_core::{Comparator, Strategy, Timestamp, TimestampedValue, TriState};
use dashmap::DashMap;
use regex::Regex;
use std::cmp::Ordering;
use tracing::trace;

use crate::error::{EvalError, EvalResult};

/// Compiled regular expressions keyed by pattern
#[derive(Default)]
pub struct PatternCache {
    patterns: DashMap<String, Regex>,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `text` matches `pattern`, compiling the pattern once
    pub fn is_match(&self, pattern: &str, text: &str) -> EvalResult<bool> {
        if let Some(re) = self.patterns.get(pattern) {
            return Ok(re.is_match(text));
        }
        let re = compile(pattern)?;
        let matched = re.is_match(text);
        self.patterns.insert(pattern.to_string(), re);
        Ok(matched)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Compile a pattern, mapping failures to [`EvalError::InvalidRegex`]
pub fn compile(pattern: &str) -> EvalResult<Regex> {
    Regex::new(pattern).map_err(|e| EvalError::InvalidRegex {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// Compare one pair of readings
///
/// Expired readings and NaN comparisons are `Undefined`.
pub fn compare_pair(
    op: Comparator,
    left: &TimestampedValue,
    right: &TimestampedValue,
    now: Timestamp,
    patterns: &PatternCache,
) -> EvalResult<TriState> {
    if left.is_expired(now) || right.is_expired(now) {
        return Ok(TriState::Undefined);
    }

    if op.is_string_only() {
        let (Some(text), Some(needle)) = (left.value.as_str(), right.value.as_str()) else {
            return Err(EvalError::mismatch(op, left.value.kind(), right.value.kind()));
        };
        let matched = match op {
            Comparator::Regex => patterns.is_match(needle, text)?,
            _ => text.contains(needle),
        };
        return Ok(matched.into());
    }

    if !left.value.is_comparable_with(&right.value) {
        return Err(EvalError::mismatch(op, left.value.kind(), right.value.kind()));
    }

    let Some(ordering) = left.cmp_value(right) else {
        return Ok(TriState::Undefined);
    };

    let holds = match op {
        Comparator::Lt => ordering == Ordering::Less,
        Comparator::Lte => ordering != Ordering::Greater,
        Comparator::Gt => ordering == Ordering::Greater,
        Comparator::Gte => ordering != Ordering::Less,
        Comparator::Eq => ordering == Ordering::Equal,
        Comparator::Neq => ordering != Ordering::Equal,
        Comparator::Regex | Comparator::Contains => false,
    };
    Ok(holds.into())
}

/// Result of running the strategy loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyOutcome {
    pub state: TriState,
    /// Index into the left sequence where the loop stopped
    pub left_index: usize,
    /// Index into the right sequence where the loop stopped
    pub right_index: usize,
}

/// Run the cross-product comparison under `strategy`
///
/// Iterates outer over `left`, inner over `right`, newest first. The
/// decisive pair state (FALSE for ALL, TRUE for ANY) ends both loops; an
/// `Undefined` pair is remembered but does not stop the loop. Both
/// sequences must be non-empty.
pub fn apply_strategy(
    strategy: Strategy,
    op: Comparator,
    left: &[TimestampedValue],
    right: &[TimestampedValue],
    now: Timestamp,
    patterns: &PatternCache,
) -> EvalResult<StrategyOutcome> {
    let (mut state, decisive) = match strategy {
        Strategy::All => (TriState::True, TriState::False),
        Strategy::Any => (TriState::False, TriState::True),
    };
    let mut stop = (0, 0);

    'outer: for (i, l) in left.iter().enumerate() {
        for (j, r) in right.iter().enumerate() {
            stop = (i, j);
            let pair = compare_pair(op, l, r, now, patterns)?;
            trace!(left = %l.value, right = %r.value, %op, %pair, "Compared pair");
            if pair == decisive {
                state = decisive;
                break 'outer;
            }
            if pair == TriState::Undefined {
                state = TriState::Undefined;
            }
        }
    }

    Ok(StrategyOutcome {
        state,
        left_index: stop.0,
        right_index: stop.1,
    })
}
