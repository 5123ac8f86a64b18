//! Short-circuit ordering heuristic for AND/OR

use ctx_core::{LogicOp, TriState};

/// Running outcome counts for one node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeStats {
    pub evaluations: u64,
    pub trues: u64,
}

impl NodeStats {
    pub fn record(&mut self, state: TriState) {
        self.evaluations += 1;
        if state.is_true() {
            self.trues += 1;
        }
    }

    /// Laplace-smoothed probability of the node being TRUE
    pub fn p_true(&self) -> Option<f64> {
        if self.evaluations == 0 {
            return None;
        }
        Some((self.trues as f64 + 1.0) / (self.evaluations as f64 + 2.0))
    }
}

/// Static estimate for one side of a binary logic node
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    /// Expected cost of evaluating the side
    pub cost: f64,
    /// Probability of the side being TRUE
    pub p_true: f64,
}

impl Estimate {
    pub fn new(cost: f64, p_true: f64) -> Self {
        Self {
            cost,
            p_true: p_true.clamp(0.0, 1.0),
        }
    }
}

/// Evaluation order of a binary logic node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    LeftFirst,
    RightFirst,
}

/// Expected cost of evaluating `first` then, if undecided, `second`
pub fn expected_cost(op: LogicOp, first: Estimate, second: Estimate) -> f64 {
    let p_continue = match op {
        LogicOp::Or => 1.0 - first.p_true,
        _ => first.p_true,
    };
    first.cost + p_continue * second.cost
}

/// Pick the cheaper order; ties keep the written order
pub fn choose_order(op: LogicOp, left: Estimate, right: Estimate) -> Order {
    if expected_cost(op, right, left) < expected_cost(op, left, right) {
        Order::RightFirst
    } else {
        Order::LeftFirst
    }
}
