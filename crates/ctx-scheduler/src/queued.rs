//! Registered expressions and their running statistics

use ctx_core::{Evaluation, Expression, Outcome, Timestamp, TriState};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Named targets notified when an expression's result changes
///
/// The state-specific target matching the new tri-state is notified, plus
/// `on_change` for every change. Value expressions only use `on_change`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackTargets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_true: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_false: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_undefined: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_change: Option<String>,
}

impl CallbackTargets {
    pub fn when_true(mut self, target: impl Into<String>) -> Self {
        self.on_true = Some(target.into());
        self
    }

    pub fn when_false(mut self, target: impl Into<String>) -> Self {
        self.on_false = Some(target.into());
        self
    }

    pub fn when_undefined(mut self, target: impl Into<String>) -> Self {
        self.on_undefined = Some(target.into());
        self
    }

    pub fn when_changed(mut self, target: impl Into<String>) -> Self {
        self.on_change = Some(target.into());
        self
    }

    /// Targets to notify for a new outcome
    pub fn targets_for(&self, outcome: &Outcome) -> Vec<String> {
        let specific = match outcome.state() {
            Some(TriState::True) => self.on_true.as_ref(),
            Some(TriState::False) => self.on_false.as_ref(),
            Some(TriState::Undefined) => self.on_undefined.as_ref(),
            None => None,
        };
        specific
            .into_iter()
            .chain(self.on_change.as_ref())
            .cloned()
            .collect()
    }
}

/// Running evaluation statistics of one registered expression
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpressionStats {
    pub evaluations: u64,
    /// Evaluations whose outcome differed from the previous one
    pub changes: u64,
    pub errors: u64,
    pub true_count: u64,
    pub last_evaluated: Option<Timestamp>,
    pub total_eval_time: Duration,
}

impl ExpressionStats {
    /// Mean wall time spent per evaluation
    pub fn mean_eval_time(&self) -> Duration {
        if self.evaluations == 0 {
            return Duration::ZERO;
        }
        self.total_eval_time / u32::try_from(self.evaluations).unwrap_or(u32::MAX)
    }
}

/// A registered root expression
#[derive(Debug, Clone)]
pub struct QueuedExpression {
    pub id: String,
    pub expression: Expression,
    pub callbacks: CallbackTargets,
    /// Most recent successful result
    pub cached: Option<Evaluation>,
    pub stats: ExpressionStats,
    /// Registration generation; results computed for an older one are dropped
    pub(crate) generation: u64,
    /// Ids of leaves bound through the sensor collaborator
    pub(crate) local_leaves: Vec<String>,
}

impl QueuedExpression {
    pub(crate) fn new(
        id: &str,
        expression: Expression,
        callbacks: CallbackTargets,
        generation: u64,
        local_leaves: Vec<String>,
    ) -> Self {
        Self {
            id: id.to_string(),
            expression,
            callbacks,
            cached: None,
            stats: ExpressionStats::default(),
            generation,
            local_leaves,
        }
    }

    /// Whether a sensor push should pull this expression forward
    ///
    /// Value expressions always are; boolean ones only while their current
    /// defer-until is not guaranteed.
    pub fn preempted_by_push(&self) -> bool {
        match &self.cached {
            None => true,
            Some(eval) => eval.outcome.is_values() || !eval.defer_is_guaranteed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(state: TriState) -> Outcome {
        Outcome::State {
            state,
            timestamp: Timestamp::ZERO,
        }
    }

    #[test]
    fn test_targets_for_outcome() {
        let targets = CallbackTargets::default()
            .when_true("too_hot")
            .when_undefined("sensor_gone")
            .when_changed("changes");

        assert_eq!(targets.targets_for(&state(TriState::True)), vec!["too_hot", "changes"]);
        assert_eq!(targets.targets_for(&state(TriState::False)), vec!["changes"]);
        assert_eq!(
            targets.targets_for(&state(TriState::Undefined)),
            vec!["sensor_gone", "changes"]
        );
        assert_eq!(
            targets.targets_for(&Outcome::Values { values: vec![] }),
            vec!["changes"]
        );
    }

    #[test]
    fn test_targets_deserialize_partial() {
        let targets: CallbackTargets = serde_json::from_str(r#"{"on_false": "ok"}"#).unwrap();
        assert_eq!(targets, CallbackTargets::default().when_false("ok"));
    }

    #[test]
    fn test_preemption_rule() {
        let mut queued = QueuedExpression::new(
            "x",
            Expression::constant(1),
            CallbackTargets::default(),
            0,
            vec![],
        );
        assert!(queued.preempted_by_push());

        queued.cached = Some(Evaluation::state(TriState::True, Timestamp::ZERO, Timestamp::MAX, true));
        assert!(!queued.preempted_by_push());

        queued.cached = Some(Evaluation::state(TriState::True, Timestamp::ZERO, Timestamp::MAX, false));
        assert!(queued.preempted_by_push());

        queued.cached = Some(Evaluation::values(vec![], Timestamp::MAX, true));
        assert!(queued.preempted_by_push());
    }

    #[test]
    fn test_mean_eval_time() {
        let stats = ExpressionStats {
            evaluations: 4,
            total_eval_time: Duration::from_millis(10),
            ..Default::default()
        };
        assert_eq!(stats.mean_eval_time(), Duration::from_micros(2500));
        assert_eq!(ExpressionStats::default().mean_eval_time(), Duration::ZERO);
    }
}
