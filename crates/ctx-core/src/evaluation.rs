//! Evaluation results

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Timestamp, TimestampedValue};

/// Three-valued logic result
///
/// `Undefined` means "no data to decide" and is never treated as `False`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriState {
    True,
    False,
    Undefined,
}

impl TriState {
    /// Negation; `Undefined` stays `Undefined`
    pub fn not(self) -> TriState {
        match self {
            TriState::True => TriState::False,
            TriState::False => TriState::True,
            TriState::Undefined => TriState::Undefined,
        }
    }

    /// Conjunction: any `False` decides, otherwise `Undefined` dominates
    pub fn and(self, other: TriState) -> TriState {
        match (self, other) {
            (TriState::False, _) | (_, TriState::False) => TriState::False,
            (TriState::Undefined, _) | (_, TriState::Undefined) => TriState::Undefined,
            _ => TriState::True,
        }
    }

    /// Disjunction: any `True` decides, otherwise `Undefined` dominates
    pub fn or(self, other: TriState) -> TriState {
        match (self, other) {
            (TriState::True, _) | (_, TriState::True) => TriState::True,
            (TriState::Undefined, _) | (_, TriState::Undefined) => TriState::Undefined,
            _ => TriState::False,
        }
    }

    pub fn is_true(self) -> bool {
        self == TriState::True
    }
}

impl From<bool> for TriState {
    fn from(b: bool) -> Self {
        if b {
            TriState::True
        } else {
            TriState::False
        }
    }
}

impl fmt::Display for TriState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriState::True => "true",
            TriState::False => "false",
            TriState::Undefined => "undefined",
        };
        write!(f, "{s}")
    }
}

/// What a node evaluated to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Outcome {
    /// Result of a boolean expression
    State {
        state: TriState,
        timestamp: Timestamp,
    },
    /// Result of a value expression, newest first
    Values { values: Vec<TimestampedValue> },
}

impl Outcome {
    pub fn state(&self) -> Option<TriState> {
        match self {
            Outcome::State { state, .. } => Some(*state),
            Outcome::Values { .. } => None,
        }
    }

    pub fn values(&self) -> Option<&[TimestampedValue]> {
        match self {
            Outcome::Values { values } => Some(values),
            Outcome::State { .. } => None,
        }
    }

    pub fn is_values(&self) -> bool {
        matches!(self, Outcome::Values { .. })
    }

    /// Whether `other` is an observable change from `self`
    ///
    /// Boolean outcomes change when the tri-state does; timestamps alone do
    /// not count. Value outcomes change when the sequence of values does.
    pub fn differs_from(&self, other: &Outcome) -> bool {
        match (self, other) {
            (Outcome::State { state: a, .. }, Outcome::State { state: b, .. }) => a != b,
            (Outcome::Values { values: a }, Outcome::Values { values: b }) => {
                a.len() != b.len() || a.iter().zip(b).any(|(x, y)| x.value != y.value)
            }
            _ => true,
        }
    }
}

/// Result of evaluating a node at some instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub outcome: Outcome,

    /// Earliest instant at which re-evaluation could give a different result
    pub defer_until: Timestamp,

    /// True only if no sensor push can invalidate `defer_until`
    pub defer_is_guaranteed: bool,
}

impl Evaluation {
    pub fn state(state: TriState, timestamp: Timestamp, defer_until: Timestamp, guaranteed: bool) -> Self {
        Self {
            outcome: Outcome::State { state, timestamp },
            defer_until,
            defer_is_guaranteed: guaranteed,
        }
    }

    pub fn values(values: Vec<TimestampedValue>, defer_until: Timestamp, guaranteed: bool) -> Self {
        Self {
            outcome: Outcome::Values { values },
            defer_until,
            defer_is_guaranteed: guaranteed,
        }
    }

    /// Whether a cached copy can be reused at `now`
    pub fn is_valid_at(&self, now: Timestamp) -> bool {
        now < self.defer_until
    }

    /// Tri-state of a boolean evaluation
    pub fn tri_state(&self) -> Option<TriState> {
        self.outcome.state()
    }
}
