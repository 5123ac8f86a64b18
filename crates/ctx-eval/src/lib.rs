//! Context expression evaluation
//!
//! This crate evaluates expression trees and predicts, for every node, the
//! earliest instant at which its result could change:
//! - History reduction of sensor windows (MAX, MIN, MEAN, MEDIAN, ...)
//! - Arithmetic over value sequences
//! - ANY/ALL comparison strategies
//! - The defer-until rule table for comparison operands
//! - Cost-ordered short-circuiting of AND/OR with sensor suspend hints

pub mod compare;
pub mod cost;
pub mod defer;
mod error;
mod evaluator;
pub mod math;
pub mod reduce;

pub use error::{EvalError, EvalResult};
pub use evaluator::{EvalConfig, Evaluator};

use ctx_core::{child_id, left_id, right_id, Comparator, Expression, LogicOp, Scalar};

/// Check that an expression tree is well formed
///
/// Operands of math and comparison nodes must produce values, operands of
/// logic nodes must produce tri-states, NOT takes exactly one operand and
/// AND/OR exactly two. Constant regex patterns must compile.
pub fn validate(id: &str, expr: &Expression) -> EvalResult<()> {
    match expr {
        Expression::Constant { .. } => Ok(()),
        Expression::Sensor(leaf) => {
            if leaf.history_length_ms < 0 {
                return Err(EvalError::invalid(id, "history length must not be negative"));
            }
            if leaf.entity.is_empty() {
                return Err(EvalError::invalid(id, "sensor entity is empty"));
            }
            Ok(())
        }
        Expression::Math { left, right, .. } => {
            require_values(&left_id(id), left)?;
            require_values(&right_id(id), right)?;
            validate(&left_id(id), left)?;
            validate(&right_id(id), right)
        }
        Expression::Comparison {
            left, op, right, ..
        } => {
            require_values(&left_id(id), left)?;
            require_values(&right_id(id), right)?;
            if *op == Comparator::Regex {
                if let Expression::Constant {
                    value: Scalar::Text(pattern),
                } = &**right
                {
                    compare::compile(pattern)?;
                }
            }
            validate(&left_id(id), left)?;
            validate(&right_id(id), right)
        }
        Expression::Logic {
            left,
            op: LogicOp::Not,
            right,
        } => {
            if right.is_some() {
                return Err(EvalError::invalid(id, "not takes a single operand"));
            }
            require_boolean(&child_id(id), left)?;
            validate(&child_id(id), left)
        }
        Expression::Logic { left, op, right } => {
            let Some(right) = right else {
                return Err(EvalError::invalid(id, format!("{op:?} needs two operands")));
            };
            require_boolean(&left_id(id), left)?;
            require_boolean(&right_id(id), right)?;
            validate(&left_id(id), left)?;
            validate(&right_id(id), right)
        }
    }
}

fn require_values(id: &str, expr: &Expression) -> EvalResult<()> {
    if expr.is_boolean() {
        return Err(EvalError::invalid(id, "expected a value-producing operand"));
    }
    Ok(())
}

fn require_boolean(id: &str, expr: &Expression) -> EvalResult<()> {
    if !expr.is_boolean() {
        return Err(EvalError::invalid(id, "expected a boolean operand"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctx_core::SensorLeaf;

    fn temp() -> Expression {
        Expression::sensor(SensorLeaf::new("sensor.temperature"))
    }

    #[test]
    fn test_valid_tree() {
        let expr = Expression::and(
            Expression::compare(temp(), Comparator::Gt, Expression::constant(25)),
            Expression::not(Expression::compare(
                Expression::math(temp(), ctx_core::MathOp::Sub, Expression::constant(1)),
                Comparator::Lt,
                Expression::constant(0),
            )),
        );
        assert!(validate("root", &expr).is_ok());
    }

    #[test]
    fn test_logic_over_values_rejected() {
        let expr = Expression::and(temp(), temp());
        let err = validate("root", &expr).unwrap_err();
        assert_eq!(
            err,
            EvalError::InvalidExpression {
                id: "root/l".to_string(),
                reason: "expected a boolean operand".to_string(),
            }
        );
    }

    #[test]
    fn test_comparison_of_booleans_rejected() {
        let inner = Expression::compare(temp(), Comparator::Gt, Expression::constant(1));
        let expr = Expression::compare(inner, Comparator::Eq, Expression::constant(1));
        assert!(validate("root", &expr).is_err());
    }

    #[test]
    fn test_operand_counts() {
        let cmp = Expression::compare(temp(), Comparator::Gt, Expression::constant(1));
        let bad_and = Expression::Logic {
            left: Box::new(cmp.clone()),
            op: LogicOp::And,
            right: None,
        };
        assert!(validate("root", &bad_and).is_err());

        let bad_not = Expression::Logic {
            left: Box::new(cmp.clone()),
            op: LogicOp::Not,
            right: Some(Box::new(cmp)),
        };
        assert!(validate("root", &bad_not).is_err());
    }

    #[test]
    fn test_negative_history_and_bad_regex() {
        let leaf = Expression::sensor(SensorLeaf::new("s").with_history_ms(-1));
        assert!(validate("root", &leaf).is_err());

        let expr = Expression::compare(temp(), Comparator::Regex, Expression::constant("(["));
        assert!(matches!(
            validate("root", &expr),
            Err(EvalError::InvalidRegex { .. })
        ));
    }
}
