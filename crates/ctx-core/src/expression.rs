//! Expression tree types
//!
//! An expression is a closed tree of constants, sensor leaves, arithmetic,
//! comparisons and boolean logic. Nodes carry no ids; ids are synthesized
//! top-down as path strings (`root/l/r`) while walking the tree.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{child_id, left_id, right_id, Scalar};

/// How a window of readings is collapsed before comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryReductionMode {
    /// Keep every reading
    #[default]
    None,
    Max,
    Min,
    /// Time-weighted average over reading validity intervals
    Mean,
    /// Middle element by value (lower middle on even length)
    Median,
    /// Keep every reading; comparisons succeed if any reading does
    Any,
    /// Keep every reading; comparisons succeed if all readings do
    All,
}

impl HistoryReductionMode {
    /// Whether this mode collapses the window to a single value
    pub fn collapses(&self) -> bool {
        matches!(
            self,
            HistoryReductionMode::Max
                | HistoryReductionMode::Min
                | HistoryReductionMode::Mean
                | HistoryReductionMode::Median
        )
    }
}

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = "<=")]
    Lte,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = ">=")]
    Gte,
    #[serde(alias = "==")]
    Eq,
    #[serde(alias = "!=")]
    Neq,
    /// Left string matches the right string as a regular expression
    Regex,
    /// Left string contains the right string
    Contains,
}

impl Comparator {
    /// Whether the operator only applies to strings
    pub fn is_string_only(&self) -> bool {
        matches!(self, Comparator::Regex | Comparator::Contains)
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Comparator::Lt => "<",
            Comparator::Lte => "<=",
            Comparator::Gt => ">",
            Comparator::Gte => ">=",
            Comparator::Eq => "==",
            Comparator::Neq => "!=",
            Comparator::Regex => "regex",
            Comparator::Contains => "contains",
        };
        write!(f, "{s}")
    }
}

/// Cross-product strategy for comparisons over sequences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Every pair must hold
    #[default]
    All,
    /// At least one pair must hold
    Any,
}

/// Arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MathOp {
    #[serde(alias = "+")]
    Add,
    #[serde(alias = "-")]
    Sub,
    #[serde(alias = "*")]
    Mul,
    #[serde(alias = "/")]
    Div,
    #[serde(alias = "%")]
    Rem,
}

impl fmt::Display for MathOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MathOp::Add => "+",
            MathOp::Sub => "-",
            MathOp::Mul => "*",
            MathOp::Div => "/",
            MathOp::Rem => "%",
        };
        write!(f, "{s}")
    }
}

/// Boolean operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogicOp {
    And,
    Or,
    Not,
}

/// Where a sensor leaf is sensed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    /// Sensed on this device
    #[default]
    Local,
    /// Can be sensed anywhere; treated as local
    Anywhere,
    /// Sensed on another device; results are pushed in
    Remote { device: String },
}

/// A leaf reading a window of values from one sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorLeaf {
    /// Sensor identifier (e.g. "sensor.temperature")
    pub entity: String,

    /// Optional channel within the sensor
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,

    /// Sensor-specific binding configuration
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub config: serde_json::Value,

    /// How the window is reduced
    #[serde(default)]
    pub history_reduction: HistoryReductionMode,

    /// Window length in milliseconds; 0 means "latest reading only"
    #[serde(default)]
    pub history_length_ms: i64,

    #[serde(default)]
    pub location: Location,
}

impl SensorLeaf {
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            path: String::new(),
            config: serde_json::Value::Null,
            history_reduction: HistoryReductionMode::None,
            history_length_ms: 0,
            location: Location::Local,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_reduction(mut self, mode: HistoryReductionMode) -> Self {
        self.history_reduction = mode;
        self
    }

    pub fn with_history_ms(mut self, millis: i64) -> Self {
        self.history_length_ms = millis;
        self
    }

    pub fn remote(mut self, device: impl Into<String>) -> Self {
        self.location = Location::Remote {
            device: device.into(),
        };
        self
    }

    /// Key the sensor collaborator binds this leaf to
    pub fn sensor_path(&self) -> String {
        if self.path.is_empty() {
            self.entity.clone()
        } else {
            format!("{}:{}", self.entity, self.path)
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self.location, Location::Remote { .. })
    }
}

/// Expression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expression {
    /// A fixed value
    Constant { value: Scalar },

    /// A window of sensor readings
    Sensor(SensorLeaf),

    /// Arithmetic over two value expressions
    Math {
        left: Box<Expression>,
        op: MathOp,
        right: Box<Expression>,
    },

    /// Comparison of two value expressions, producing a tri-state
    Comparison {
        left: Box<Expression>,
        op: Comparator,
        #[serde(default)]
        strategy: Strategy,
        right: Box<Expression>,
    },

    /// Boolean composition; `right` is absent for NOT
    Logic {
        left: Box<Expression>,
        op: LogicOp,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        right: Option<Box<Expression>>,
    },
}

impl Expression {
    pub fn constant(value: impl Into<Scalar>) -> Self {
        Expression::Constant {
            value: value.into(),
        }
    }

    pub fn sensor(leaf: SensorLeaf) -> Self {
        Expression::Sensor(leaf)
    }

    pub fn math(left: Expression, op: MathOp, right: Expression) -> Self {
        Expression::Math {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    /// Comparison with the default ALL strategy
    pub fn compare(left: Expression, op: Comparator, right: Expression) -> Self {
        Self::compare_with(left, op, Strategy::All, right)
    }

    pub fn compare_with(left: Expression, op: Comparator, strategy: Strategy, right: Expression) -> Self {
        Expression::Comparison {
            left: Box::new(left),
            op,
            strategy,
            right: Box::new(right),
        }
    }

    pub fn and(left: Expression, right: Expression) -> Self {
        Expression::Logic {
            left: Box::new(left),
            op: LogicOp::And,
            right: Some(Box::new(right)),
        }
    }

    pub fn or(left: Expression, right: Expression) -> Self {
        Expression::Logic {
            left: Box::new(left),
            op: LogicOp::Or,
            right: Some(Box::new(right)),
        }
    }

    pub fn not(child: Expression) -> Self {
        Expression::Logic {
            left: Box::new(child),
            op: LogicOp::Not,
            right: None,
        }
    }

    /// Whether the node produces a tri-state rather than values
    pub fn is_boolean(&self) -> bool {
        matches!(self, Expression::Comparison { .. } | Expression::Logic { .. })
    }

    /// Visit every sensor leaf with its synthesized id
    pub fn for_each_leaf<F>(&self, id: &str, f: &mut F)
    where
        F: FnMut(&str, &SensorLeaf),
    {
        match self {
            Expression::Constant { .. } => {}
            Expression::Sensor(leaf) => f(id, leaf),
            Expression::Math { left, right, .. } | Expression::Comparison { left, right, .. } => {
                left.for_each_leaf(&left_id(id), f);
                right.for_each_leaf(&right_id(id), f);
            }
            Expression::Logic {
                left,
                op: LogicOp::Not,
                ..
            } => left.for_each_leaf(&child_id(id), f),
            Expression::Logic { left, right, .. } => {
                left.for_each_leaf(&left_id(id), f);
                if let Some(right) = right {
                    right.for_each_leaf(&right_id(id), f);
                }
            }
        }
    }

    /// Collect `(id, leaf)` for every sensor leaf
    pub fn leaves(&self, id: &str) -> Vec<(String, SensorLeaf)> {
        let mut out = Vec::new();
        self.for_each_leaf(id, &mut |leaf_id, leaf| out.push((leaf_id.to_string(), leaf.clone())));
        out
    }

    /// Number of nodes in the tree
    pub fn node_count(&self) -> usize {
        match self {
            Expression::Constant { .. } | Expression::Sensor(_) => 1,
            Expression::Math { left, right, .. } | Expression::Comparison { left, right, .. } => {
                1 + left.node_count() + right.node_count()
            }
            Expression::Logic { left, right, .. } => {
                1 + left.node_count() + right.as_ref().map_or(0, |r| r.node_count())
            }
        }
    }
}
