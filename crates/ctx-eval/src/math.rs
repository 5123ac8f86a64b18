//! Arithmetic over value sequences

use ctx_core::{MathOp, Scalar, TimestampedValue};

use crate::error::{EvalError, EvalResult};

/// Apply `op` across the cross product of `left` and `right`
///
/// At least one side must hold a single value. An empty side yields an
/// empty result. Each output reading is stamped with the newer of its two
/// inputs and expires with the earlier.
pub fn apply(
    op: MathOp,
    left: &[TimestampedValue],
    right: &[TimestampedValue],
) -> EvalResult<Vec<TimestampedValue>> {
    if left.len() > 1 && right.len() > 1 {
        return Err(EvalError::ArrayMath {
            left: left.len(),
            right: right.len(),
        });
    }

    let mut out = Vec::with_capacity(left.len().max(right.len()));
    for l in left {
        for r in right {
            out.push(TimestampedValue {
                value: apply_scalar(op, &l.value, &r.value)?,
                timestamp: l.timestamp.max(r.timestamp),
                expire_at: match (l.expire_at, r.expire_at) {
                    (Some(a), Some(b)) => Some(a.min(b)),
                    (a, b) => a.or(b),
                },
            });
        }
    }
    Ok(out)
}

/// Apply `op` to two scalars
pub fn apply_scalar(op: MathOp, left: &Scalar, right: &Scalar) -> EvalResult<Scalar> {
    match (left, right) {
        (Scalar::Int(a), Scalar::Int(b)) => int_op(op, *a, *b).map(Scalar::Int),
        (Scalar::Int(_) | Scalar::Double(_), Scalar::Int(_) | Scalar::Double(_)) => {
            let (a, b) = (left.as_f64().unwrap_or(f64::NAN), right.as_f64().unwrap_or(f64::NAN));
            Ok(Scalar::Double(match op {
                MathOp::Add => a + b,
                MathOp::Sub => a - b,
                MathOp::Mul => a * b,
                MathOp::Div => a / b,
                MathOp::Rem => a % b,
            }))
        }
        (Scalar::Text(a), Scalar::Text(b)) => match op {
            MathOp::Add => Ok(Scalar::Text(format!("{a}{b}"))),
            _ => Err(unsupported(op, left)),
        },
        (Scalar::Geo(a), Scalar::Geo(b)) => match op {
            MathOp::Sub => Ok(Scalar::Double(a.distance_to(b))),
            _ => Err(unsupported(op, left)),
        },
        _ => Err(EvalError::mismatch(op, left.kind(), right.kind())),
    }
}

fn int_op(op: MathOp, a: i64, b: i64) -> EvalResult<i64> {
    if b == 0 && matches!(op, MathOp::Div | MathOp::Rem) {
        return Err(EvalError::Arithmetic("division by zero".to_string()));
    }
    let result = match op {
        MathOp::Add => a.checked_add(b),
        MathOp::Sub => a.checked_sub(b),
        MathOp::Mul => a.checked_mul(b),
        MathOp::Div => a.checked_div(b),
        MathOp::Rem => a.checked_rem(b),
    };
    result.ok_or_else(|| EvalError::Arithmetic(format!("integer overflow in {a} {op} {b}")))
}

fn unsupported(op: MathOp, value: &Scalar) -> EvalError {
    EvalError::UnsupportedOperator {
        op: op.to_string(),
        kind: value.kind().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctx_core::{GeoPoint, Timestamp};

    fn tv(v: impl Into<Scalar>, t: i64) -> TimestampedValue {
        TimestampedValue::new(v, Timestamp::from_millis(t))
    }

    #[test]
    fn test_integer_arithmetic() {
        assert_eq!(apply_scalar(MathOp::Add, &2.into(), &3.into()).unwrap(), Scalar::Int(5));
        assert_eq!(apply_scalar(MathOp::Div, &7.into(), &2.into()).unwrap(), Scalar::Int(3));
        assert_eq!(apply_scalar(MathOp::Rem, &7.into(), &2.into()).unwrap(), Scalar::Int(1));
    }

    #[test]
    fn test_mixed_numbers_become_double() {
        assert_eq!(
            apply_scalar(MathOp::Mul, &2.into(), &1.5.into()).unwrap(),
            Scalar::Double(3.0)
        );
    }

    #[test]
    fn test_integer_errors() {
        assert!(matches!(
            apply_scalar(MathOp::Div, &1.into(), &0.into()),
            Err(EvalError::Arithmetic(_))
        ));
        assert!(matches!(
            apply_scalar(MathOp::Add, &i64::MAX.into(), &1.into()),
            Err(EvalError::Arithmetic(_))
        ));
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(
            apply_scalar(MathOp::Add, &"living".into(), &"_room".into()).unwrap(),
            Scalar::from("living_room")
        );
        assert!(matches!(
            apply_scalar(MathOp::Mul, &"a".into(), &"b".into()),
            Err(EvalError::UnsupportedOperator { .. })
        ));
    }

    #[test]
    fn test_geo_difference_is_distance() {
        let a = Scalar::Geo(GeoPoint::new(0.0, 0.0));
        let b = Scalar::Geo(GeoPoint::new(0.0, 1.0));
        let Scalar::Double(d) = apply_scalar(MathOp::Sub, &a, &b).unwrap() else {
            panic!("expected a double");
        };
        // One degree of longitude at the equator
        assert!((d - 111_195.0).abs() < 10.0, "distance was {d}");
    }

    #[test]
    fn test_mismatched_kinds() {
        assert!(matches!(
            apply_scalar(MathOp::Add, &"a".into(), &1.into()),
            Err(EvalError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_cross_product_with_single_value() {
        let left = vec![tv(1, 300), tv(2, 200), tv(3, 100)];
        let right = vec![tv(10, 250).expiring_at(Timestamp::from_millis(900))];

        let out = apply(MathOp::Add, &left, &right).unwrap();
        let values: Vec<Scalar> = out.iter().map(|v| v.value.clone()).collect();
        assert_eq!(values, vec![Scalar::Int(11), Scalar::Int(12), Scalar::Int(13)]);
        assert_eq!(out[0].timestamp.as_millis(), 300);
        assert_eq!(out[2].timestamp.as_millis(), 250);
        assert_eq!(out[1].expire_at, Some(Timestamp::from_millis(900)));
    }

    #[test]
    fn test_array_times_array_fails() {
        let left = vec![tv(1, 0), tv(2, 1)];
        let err = apply(MathOp::Add, &left, &left).unwrap_err();
        assert_eq!(err, EvalError::ArrayMath { left: 2, right: 2 });
    }

    #[test]
    fn test_empty_side_yields_empty() {
        assert!(apply(MathOp::Add, &[], &[tv(1, 0)]).unwrap().is_empty());
    }
}
