//! Recursive expression evaluation
//!
//! The evaluator walks an expression tree top-down, synthesizing a path id
//! for every position (`root`, `root/l`, `root/r/c`, ...). Each position is
//! cached under its id while its defer-until lies in the future, so a tree
//! that is re-evaluated early only recomputes the parts that may have
//! changed.

use ctx_core::{
    child_id, is_under, left_id, right_id, Comparator, Evaluation, Expression, LogicOp, MathOp,
    SensorAccess, SensorLeaf, Strategy, Timestamp, TimestampedValue, TriState,
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::compare::{self, PatternCache};
use crate::cost::{self, Estimate, NodeStats, Order};
use crate::defer::{self, Side};
use crate::error::{EvalError, EvalResult};
use crate::math;
use crate::reduce;

/// Tunables for evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct EvalConfig {
    /// Retry delay for leaves without readings
    pub no_data_retry: Duration,
    /// Cost assumed for sensors that report none
    pub default_sensor_cost: f64,
    /// Cost added for every comparison node
    pub comparison_cost: f64,
    /// Extra cost for reading a currently suspended sensor
    pub resume_penalty: f64,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            no_data_retry: Duration::from_millis(1000),
            default_sensor_cost: 1.0,
            comparison_cost: 0.01,
            resume_penalty: 0.5,
        }
    }
}

/// Expression evaluator
///
/// Evaluates expression trees against a sensor collaborator, caching every
/// tree position and recording per-node outcome statistics for the
/// short-circuit heuristic.
pub struct Evaluator {
    sensors: Arc<dyn SensorAccess>,
    config: EvalConfig,
    /// Last result per node id
    cache: DashMap<String, Evaluation>,
    /// Outcome counts per boolean node id
    stats: DashMap<String, NodeStats>,
    /// Leaves currently told to suspend, with the instant they were given
    suspended: DashMap<String, Timestamp>,
    /// Last result pushed for each remote leaf
    remote: DashMap<String, Evaluation>,
    patterns: PatternCache,
}

impl Evaluator {
    /// Create a new evaluator
    pub fn new(sensors: Arc<dyn SensorAccess>, config: EvalConfig) -> Self {
        Self {
            sensors,
            config,
            cache: DashMap::new(),
            stats: DashMap::new(),
            suspended: DashMap::new(),
            remote: DashMap::new(),
            patterns: PatternCache::new(),
        }
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Evaluate `expr` at position `id`
    ///
    /// Returns the cached result while it is still valid at `now`.
    pub fn evaluate(&self, id: &str, expr: &Expression, now: Timestamp) -> EvalResult<Evaluation> {
        if let Some(cached) = self.cache.get(id) {
            if cached.is_valid_at(now) {
                trace!(node_id = id, defer_until = %cached.defer_until, "Cache hit");
                return Ok(cached.clone());
            }
        }

        let result = match expr {
            Expression::Constant { value } => Ok(Evaluation::values(
                vec![TimestampedValue::new(value.clone(), now)],
                Timestamp::MAX,
                true,
            )),
            Expression::Sensor(leaf) => self.eval_sensor(id, leaf, now),
            Expression::Math { left, op, right } => self.eval_math(id, left, *op, right, now),
            Expression::Comparison {
                left,
                op,
                strategy,
                right,
            } => self.eval_comparison(id, left, *op, *strategy, right, now),
            Expression::Logic {
                left,
                op: LogicOp::Not,
                right,
            } => {
                if right.is_some() {
                    return Err(EvalError::invalid(id, "not takes a single operand"));
                }
                self.eval_not(id, left, now)
            }
            Expression::Logic { left, op, right } => {
                let right = right
                    .as_deref()
                    .ok_or_else(|| EvalError::invalid(id, format!("{op:?} needs two operands")))?;
                self.eval_binary(id, left, *op, right, now)
            }
        }?;

        if let Some(state) = result.tri_state() {
            self.stats.entry(id.to_string()).or_default().record(state);
        }
        self.cache.insert(id.to_string(), result.clone());
        Ok(result)
    }

    fn eval_sensor(&self, id: &str, leaf: &SensorLeaf, now: Timestamp) -> EvalResult<Evaluation> {
        if leaf.is_remote() {
            return Ok(self
                .remote
                .get(id)
                .map(|pushed| pushed.clone())
                .unwrap_or_else(|| Evaluation::values(Vec::new(), Timestamp::MAX, false)));
        }

        if self.suspended.remove(id).is_some() {
            debug!(leaf_id = id, "Resuming suspended leaf");
            if let Err(e) = self.sensors.resume(id) {
                warn!(leaf_id = id, error = %e, "Failed to resume sensing");
            }
        }

        let readings = match self.sensors.get_values(id, now, leaf.history_length_ms) {
            Ok(readings) => readings,
            Err(e) => {
                warn!(leaf_id = id, error = %e, "Sensor read failed; treating as no data");
                Vec::new()
            }
        };

        if readings.is_empty() {
            trace!(leaf_id = id, "No readings in window");
            return Ok(Evaluation::values(
                Vec::new(),
                now.plus(self.config.no_data_retry),
                false,
            ));
        }

        let values = reduce::reduce(leaf.history_reduction, readings, now)?;

        let defer_until = if leaf.history_length_ms > 0 {
            let oldest = values.iter().map(|v| v.timestamp).min().unwrap_or(now);
            oldest.plus_millis(leaf.history_length_ms)
        } else {
            Timestamp::MAX
        };

        // Any new reading can change the sequence, so a leaf never guarantees
        let defer_until = defer_until.min(next_expiry(&values, now)).max(now);
        trace!(leaf_id = id, count = values.len(), defer_until = %defer_until, "Evaluated leaf");
        Ok(Evaluation::values(values, defer_until, false))
    }

    fn eval_math(
        &self,
        id: &str,
        left: &Expression,
        op: MathOp,
        right: &Expression,
        now: Timestamp,
    ) -> EvalResult<Evaluation> {
        let l = self.evaluate(&left_id(id), left, now)?;
        let r = self.evaluate(&right_id(id), right, now)?;

        let values = math::apply(op, values_of(&l, op)?, values_of(&r, op)?)?;
        Ok(Evaluation::values(
            values,
            l.defer_until.min(r.defer_until),
            l.defer_is_guaranteed && r.defer_is_guaranteed,
        ))
    }

    fn eval_comparison(
        &self,
        id: &str,
        left: &Expression,
        op: Comparator,
        strategy: Strategy,
        right: &Expression,
        now: Timestamp,
    ) -> EvalResult<Evaluation> {
        let l = self.evaluate(&left_id(id), left, now)?;
        let r = self.evaluate(&right_id(id), right, now)?;
        let (lv, rv) = (values_of(&l, op)?, values_of(&r, op)?);

        if lv.is_empty() || rv.is_empty() {
            let defer_until = l.defer_until.min(r.defer_until).max(now);
            let guaranteed = l.defer_is_guaranteed && r.defer_is_guaranteed;
            return Ok(Evaluation::state(TriState::Undefined, now, defer_until, guaranteed));
        }

        let outcome = compare::apply_strategy(strategy, op, lv, rv, now, &self.patterns)?;

        let (left_until, left_guaranteed) = remains_valid_until(
            left,
            &l,
            lv[outcome.left_index].timestamp,
            op,
            outcome.state,
            Side::Left,
        );
        let (right_until, right_guaranteed) = remains_valid_until(
            right,
            &r,
            rv[outcome.right_index].timestamp,
            op,
            outcome.state,
            Side::Right,
        );

        let defer_until = left_until
            .min(right_until)
            .min(next_expiry(lv, now))
            .min(next_expiry(rv, now))
            .max(now);

        trace!(
            node_id = id,
            state = %outcome.state,
            left_until = %left_until,
            right_until = %right_until,
            "Evaluated comparison"
        );
        Ok(Evaluation::state(
            outcome.state,
            now,
            defer_until,
            left_guaranteed && right_guaranteed,
        ))
    }

    fn eval_not(&self, id: &str, child: &Expression, now: Timestamp) -> EvalResult<Evaluation> {
        let c = self.evaluate(&child_id(id), child, now)?;
        let (state, timestamp) = state_of(&c, LogicOp::Not)?;
        Ok(Evaluation::state(
            state.not(),
            timestamp,
            c.defer_until,
            c.defer_is_guaranteed,
        ))
    }

    fn eval_binary(
        &self,
        id: &str,
        left: &Expression,
        op: LogicOp,
        right: &Expression,
        now: Timestamp,
    ) -> EvalResult<Evaluation> {
        let (lid, rid) = (left_id(id), right_id(id));
        let order = cost::choose_order(
            op,
            self.estimate(&lid, left, now),
            self.estimate(&rid, right, now),
        );
        let ((first_id, first), (second_id, second)) = match order {
            Order::LeftFirst => ((lid, left), (rid, right)),
            Order::RightFirst => ((rid, right), (lid, left)),
        };
        debug!(node_id = id, ?op, first = %first_id, "Chose evaluation order");

        let a = self.evaluate(&first_id, first, now)?;
        let (a_state, a_time) = state_of(&a, op)?;

        let decisive = if op == LogicOp::Or {
            TriState::True
        } else {
            TriState::False
        };
        if a_state == decisive {
            debug!(node_id = id, skipped = %second_id, "Short-circuited");
            self.suspend_subtree(&second_id, second, a.defer_until, now);
            return Ok(Evaluation::state(
                a_state,
                a_time,
                a.defer_until,
                a.defer_is_guaranteed,
            ));
        }

        let b = self.evaluate(&second_id, second, now)?;
        let (b_state, b_time) = state_of(&b, op)?;

        let state = if op == LogicOp::Or {
            a_state.or(b_state)
        } else {
            a_state.and(b_state)
        };

        // A TRUE second side of an OR holds the result on its own
        let (defer_until, guaranteed) = if op == LogicOp::Or && b_state == TriState::True {
            (b.defer_until, b.defer_is_guaranteed)
        } else {
            (
                a.defer_until.min(b.defer_until),
                a.defer_is_guaranteed && b.defer_is_guaranteed,
            )
        };

        Ok(Evaluation::state(state, a_time.max(b_time), defer_until, guaranteed))
    }

    /// Tell every local leaf under a skipped branch it may sleep until it
    /// has to be warm again at `ready`
    fn suspend_subtree(&self, id: &str, expr: &Expression, ready: Timestamp, now: Timestamp) {
        expr.for_each_leaf(id, &mut |leaf_id, leaf| {
            if leaf.is_remote() {
                return;
            }
            let until = ready.minus(self.sensors.startup_time(leaf_id));
            if until <= now {
                return;
            }
            match self.sensors.suspend(leaf_id, until) {
                Ok(()) => {
                    debug!(leaf_id, until = %until, "Suspend hint sent");
                    self.suspended.insert(leaf_id.to_string(), until);
                }
                Err(e) => warn!(leaf_id, error = %e, "Failed to suspend sensing"),
            }
        });
    }

    /// Cost and P(TRUE) estimate for the node at `id`
    fn estimate(&self, id: &str, expr: &Expression, now: Timestamp) -> Estimate {
        if let Some(cached) = self.cache.get(id) {
            if cached.is_valid_at(now) {
                let p_true = match cached.tri_state() {
                    Some(TriState::True) => 1.0,
                    Some(TriState::False) => 0.0,
                    _ => 0.5,
                };
                return Estimate::new(0.0, p_true);
            }
        }

        let observed = self.stats.get(id).and_then(|s| s.p_true());
        match expr {
            Expression::Constant { .. } => Estimate::new(0.0, 0.5),
            Expression::Sensor(leaf) if leaf.is_remote() => Estimate::new(0.0, 0.5),
            Expression::Sensor(_) => {
                let mut cost = self
                    .sensors
                    .cost(id)
                    .unwrap_or(self.config.default_sensor_cost);
                if self.suspended.contains_key(id) {
                    cost += self.config.resume_penalty;
                }
                Estimate::new(cost, 0.5)
            }
            Expression::Math { left, right, .. } => {
                let (l, r) = (
                    self.estimate(&left_id(id), left, now),
                    self.estimate(&right_id(id), right, now),
                );
                Estimate::new(l.cost + r.cost, 0.5)
            }
            Expression::Comparison { left, right, .. } => {
                let (l, r) = (
                    self.estimate(&left_id(id), left, now),
                    self.estimate(&right_id(id), right, now),
                );
                Estimate::new(
                    l.cost + r.cost + self.config.comparison_cost,
                    observed.unwrap_or(0.5),
                )
            }
            Expression::Logic {
                left,
                op: LogicOp::Not,
                ..
            } => {
                let c = self.estimate(&child_id(id), left, now);
                Estimate::new(c.cost, observed.unwrap_or(1.0 - c.p_true))
            }
            Expression::Logic { left, op, right } => {
                let l = self.estimate(&left_id(id), left, now);
                let Some(right) = right else {
                    return l;
                };
                let r = self.estimate(&right_id(id), right, now);
                let prior = if *op == LogicOp::Or {
                    1.0 - (1.0 - l.p_true) * (1.0 - r.p_true)
                } else {
                    l.p_true * r.p_true
                };
                Estimate::new(l.cost + r.cost, observed.unwrap_or(prior))
            }
        }
    }

    /// Drop cached results for the tree rooted at `root`
    pub fn invalidate(&self, root: &str) {
        self.cache.retain(|id, _| !is_under(id, root));
    }

    /// Drop cached results for a node and every ancestor position
    pub fn invalidate_path(&self, node_id: &str) {
        self.cache.remove(node_id);
        let mut id = node_id;
        while let Some(pos) = id.rfind('/') {
            id = &id[..pos];
            self.cache.remove(id);
        }
    }

    /// Forget everything known about the tree rooted at `root`
    pub fn forget(&self, root: &str) {
        self.invalidate(root);
        self.stats.retain(|id, _| !is_under(id, root));
        self.suspended.retain(|id, _| !is_under(id, root));
        self.remote.retain(|id, _| !is_under(id, root));
    }

    /// Store a result pushed for a remote leaf
    pub fn push_remote(&self, leaf_id: &str, result: Evaluation) {
        debug!(leaf_id, defer_until = %result.defer_until, "Remote result received");
        self.remote.insert(leaf_id.to_string(), result);
        self.invalidate_path(leaf_id);
    }

    /// Last cached result for a node
    pub fn cached(&self, id: &str) -> Option<Evaluation> {
        self.cache.get(id).map(|e| e.clone())
    }

    /// Outcome statistics for a boolean node
    pub fn node_stats(&self, id: &str) -> Option<NodeStats> {
        self.stats.get(id).map(|s| *s)
    }

    /// Instant until which a leaf was told it may sleep
    pub fn suspended_until(&self, id: &str) -> Option<Timestamp> {
        self.suspended.get(id).map(|t| *t)
    }

    /// Number of cached node results
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}

/// Instant until which a comparison operand keeps deciding the result, and
/// whether no push can change that before then
///
/// A windowed leaf holds only through a usable rule-table candidate: new
/// readings then cannot flip the comparison. Other operands keep their own
/// flag, which is set for constant subtrees alone.
fn remains_valid_until(
    operand: &Expression,
    eval: &Evaluation,
    determining: Timestamp,
    op: Comparator,
    state: TriState,
    side: Side,
) -> (Timestamp, bool) {
    match operand {
        Expression::Sensor(leaf) if !leaf.is_remote() && leaf.history_length_ms > 0 => {
            if defer::candidate_usable(op, leaf.history_reduction, state, side) {
                (determining.plus_millis(leaf.history_length_ms), true)
            } else {
                (Timestamp::ZERO, false)
            }
        }
        _ => (eval.defer_until, eval.defer_is_guaranteed),
    }
}

/// Earliest expiry after `now` among `values`
fn next_expiry(values: &[TimestampedValue], now: Timestamp) -> Timestamp {
    values
        .iter()
        .filter_map(|v| v.expire_at)
        .filter(|at| *at > now)
        .min()
        .unwrap_or(Timestamp::MAX)
}

fn values_of(eval: &Evaluation, op: impl ToString) -> EvalResult<&[TimestampedValue]> {
    eval.outcome
        .values()
        .ok_or_else(|| EvalError::mismatch(op, "boolean", "values"))
}

fn state_of(eval: &Evaluation, op: LogicOp) -> EvalResult<(TriState, Timestamp)> {
    match &eval.outcome {
        ctx_core::Outcome::State { state, timestamp } => Ok((*state, *timestamp)),
        ctx_core::Outcome::Values { .. } => {
            Err(EvalError::mismatch(format!("{op:?}"), "values", "boolean"))
        }
    }
}
