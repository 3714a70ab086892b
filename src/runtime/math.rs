//! Total operations over value pairs. Arithmetic promotes Integer to Float
//! on mixed operands; integer arithmetic wraps (two's complement).

use std::cmp::Ordering;
use std::rc::Rc;

use crate::ast::{BinOp, UnOp};
use crate::diagnostics::RuntimeError;
use crate::runtime::value::Value;
use crate::span::Span;

pub fn do_binary_op(span: Span, op: BinOp, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    match op {
        BinOp::Add => add_values(span, left, right),
        BinOp::Subtract => arith(span, op, left, right),
        BinOp::Multiply => arith(span, op, left, right),
        BinOp::Divide => arith(span, op, left, right),
        BinOp::Modulo => arith(span, op, left, right),
        BinOp::Power => power(span, left, right),
        BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr => {
            bitwise(span, op, left, right)
        }
        BinOp::Eq => Ok(do_eq_comparison(left, right)),
        BinOp::Neq => Ok(Value::Bool(!values_equal(left, right))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => relational(span, op, left, right),
        BinOp::And => Ok(Value::Bool(is_truthy(left) && is_truthy(right))),
        BinOp::Or => Ok(Value::Bool(is_truthy(left) || is_truthy(right))),
    }
}

pub fn do_unary_op(span: Span, op: UnOp, value: &Value) -> Result<Value, RuntimeError> {
    match op {
        UnOp::Negate => match value {
            Value::Int(v) => Ok(Value::Int(v.wrapping_neg())),
            Value::Float(v) => Ok(Value::Float(-v)),
            other => Err(RuntimeError::Conversion {
                span,
                message: format!("Cannot negate a {}.", other.type_name()),
            }),
        },
        UnOp::Not => Ok(Value::Bool(!is_truthy(value))),
        UnOp::BitNot => do_bitwise_not(span, value),
    }
}

pub fn do_bitwise_not(span: Span, value: &Value) -> Result<Value, RuntimeError> {
    match value {
        Value::Int(v) => Ok(Value::Int(!v)),
        other => Err(RuntimeError::Conversion {
            span,
            message: format!("Expected an integer operand, got a {}.", other.type_name()),
        }),
    }
}

/// Non-zero numbers, non-empty strings/lists/hashes, and `true` are truthy;
/// everything else is falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Int(v) => *v != 0,
        Value::Float(v) => *v != 0.0,
        Value::Bool(v) => *v,
        Value::String(v) => !v.is_empty(),
        Value::List(list) => !list.borrow().elements.is_empty(),
        Value::Hash(hash) => !hash.borrow().entries.is_empty(),
        Value::Object(_) | Value::ClassRef(_) | Value::LambdaRef(_) => false,
    }
}

pub fn do_eq_comparison(left: &Value, right: &Value) -> Value {
    Value::Bool(values_equal(left, right))
}

/// Structural equality; hash key order is irrelevant here even though it is
/// observable during iteration.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a == b,
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::List(a), Value::List(b)) => {
            if Rc::ptr_eq(a, b) {
                return true;
            }
            let a = a.borrow();
            let b = b.borrow();
            a.elements.len() == b.elements.len()
                && a.elements
                    .iter()
                    .zip(b.elements.iter())
                    .all(|(x, y)| values_equal(x, y))
        }
        (Value::Hash(a), Value::Hash(b)) => {
            if Rc::ptr_eq(a, b) {
                return true;
            }
            let a = a.borrow();
            let b = b.borrow();
            a.entries.len() == b.entries.len()
                && a.entries.iter().all(|(key, value)| {
                    b.entries
                        .get(key)
                        .is_some_and(|other| values_equal(value, other))
                })
        }
        (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
        (Value::ClassRef(a), Value::ClassRef(b)) => a == b,
        (Value::LambdaRef(a), Value::LambdaRef(b)) => a == b,
        _ => false,
    }
}

/// Ordering used by `sort` and the reflector's name lists. Values order by
/// kind first (numbers, then strings, then booleans, then the rest), then
/// by value within the kind.
pub fn compare_values(left: &Value, right: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Int(_) | Value::Float(_) => 0,
            Value::String(_) => 1,
            Value::Bool(_) => 2,
            _ => 3,
        }
    }
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (Value::Int(a), Value::Float(b)) => {
            (*a as f64).partial_cmp(b).unwrap_or(Ordering::Equal)
        }
        (Value::Float(a), Value::Int(b)) => {
            a.partial_cmp(&(*b as f64)).unwrap_or(Ordering::Equal)
        }
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (a, b) => rank(a).cmp(&rank(b)),
    }
}

fn add_values(span: Span, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f64 + b)),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a + *b as f64)),
        (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
        (Value::String(a), b) => Ok(Value::String(format!(
            "{a}{}",
            crate::runtime::serializer::serialize(b)
        ))),
        (a, Value::String(b)) => Ok(Value::String(format!(
            "{}{b}",
            crate::runtime::serializer::serialize(a)
        ))),
        (Value::List(a), Value::List(b)) => {
            let mut elements = a.borrow().elements.clone();
            elements.extend(b.borrow().elements.iter().cloned());
            Ok(Value::list(elements))
        }
        (a, b) => Err(RuntimeError::InvalidOperation {
            span,
            message: format!(
                "Cannot add a {} and a {}.",
                a.type_name(),
                b.type_name()
            ),
        }),
    }
}

fn arith(span: Span, op: BinOp, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => int_arith(span, op, *a, *b),
        (Value::Float(a), Value::Float(b)) => float_arith(span, op, *a, *b),
        (Value::Int(a), Value::Float(b)) => float_arith(span, op, *a as f64, *b),
        (Value::Float(a), Value::Int(b)) => float_arith(span, op, *a, *b as f64),
        (a, b) => Err(RuntimeError::InvalidOperation {
            span,
            message: format!(
                "Expected numeric operands, got a {} and a {}.",
                a.type_name(),
                b.type_name()
            ),
        }),
    }
}

fn int_arith(span: Span, op: BinOp, a: i64, b: i64) -> Result<Value, RuntimeError> {
    let result = match op {
        BinOp::Subtract => a.wrapping_sub(b),
        BinOp::Multiply => a.wrapping_mul(b),
        BinOp::Divide => {
            if b == 0 {
                return Err(RuntimeError::DivideByZero { span });
            }
            a.wrapping_div(b)
        }
        BinOp::Modulo => {
            if b == 0 {
                return Err(RuntimeError::DivideByZero { span });
            }
            a.wrapping_rem(b)
        }
        _ => unreachable!("non-arithmetic operator"),
    };
    Ok(Value::Int(result))
}

fn float_arith(span: Span, op: BinOp, a: f64, b: f64) -> Result<Value, RuntimeError> {
    let result = match op {
        BinOp::Subtract => a - b,
        BinOp::Multiply => a * b,
        BinOp::Divide => {
            if b == 0.0 {
                return Err(RuntimeError::DivideByZero { span });
            }
            a / b
        }
        BinOp::Modulo => {
            if b == 0.0 {
                return Err(RuntimeError::DivideByZero { span });
            }
            a % b
        }
        _ => unreachable!("non-arithmetic operator"),
    };
    Ok(Value::Float(result))
}

fn power(span: Span, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => {
            if *b < 0 {
                Ok(Value::Float((*a as f64).powf(*b as f64)))
            } else {
                let exp = u32::try_from(*b).unwrap_or(u32::MAX);
                Ok(Value::Int(a.wrapping_pow(exp)))
            }
        }
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a.powf(*b))),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float((*a as f64).powf(*b))),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a.powf(*b as f64))),
        (a, b) => Err(RuntimeError::InvalidOperation {
            span,
            message: format!(
                "Expected numeric operands, got a {} and a {}.",
                a.type_name(),
                b.type_name()
            ),
        }),
    }
}

fn bitwise(span: Span, op: BinOp, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => {
            let result = match op {
                BinOp::BitAnd => a & b,
                BinOp::BitOr => a | b,
                BinOp::BitXor => a ^ b,
                BinOp::Shl => a.wrapping_shl(*b as u32),
                BinOp::Shr => a.wrapping_shr(*b as u32),
                _ => unreachable!("non-bitwise operator"),
            };
            Ok(Value::Int(result))
        }
        (a, b) => Err(RuntimeError::Conversion {
            span,
            message: format!(
                "Expected integer operands, got a {} and a {}.",
                a.type_name(),
                b.type_name()
            ),
        }),
    }
}

fn relational(span: Span, op: BinOp, left: &Value, right: &Value) -> Result<Value, RuntimeError> {
    let ordering = match (left, right) {
        (Value::Int(_), Value::Int(_))
        | (Value::Int(_), Value::Float(_))
        | (Value::Float(_), Value::Int(_))
        | (Value::Float(_), Value::Float(_))
        | (Value::String(_), Value::String(_)) => compare_values(left, right),
        (a, b) => {
            return Err(RuntimeError::InvalidOperation {
                span,
                message: format!(
                    "Cannot compare a {} and a {}.",
                    a.type_name(),
                    b.type_name()
                ),
            })
        }
    };
    let result = match op {
        BinOp::Lt => ordering == Ordering::Less,
        BinOp::Le => ordering != Ordering::Greater,
        BinOp::Gt => ordering == Ordering::Greater,
        BinOp::Ge => ordering != Ordering::Less,
        _ => unreachable!("non-relational operator"),
    };
    Ok(Value::Bool(result))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> Span {
        Span::empty()
    }

    #[test]
    fn mixed_arithmetic_promotes_to_float() {
        let result = do_binary_op(span(), BinOp::Add, &Value::Int(1), &Value::Float(0.5)).unwrap();
        assert!(matches!(result, Value::Float(v) if v == 1.5));
        let result =
            do_binary_op(span(), BinOp::Multiply, &Value::Float(2.0), &Value::Int(3)).unwrap();
        assert!(matches!(result, Value::Float(v) if v == 6.0));
    }

    #[test]
    fn integer_arithmetic_wraps() {
        let result =
            do_binary_op(span(), BinOp::Add, &Value::Int(i64::MAX), &Value::Int(1)).unwrap();
        assert!(matches!(result, Value::Int(i64::MIN)));
    }

    #[test]
    fn division_by_zero_is_typed() {
        let err = do_binary_op(span(), BinOp::Divide, &Value::Int(1), &Value::Int(0)).unwrap_err();
        assert!(matches!(err, RuntimeError::DivideByZero { .. }));
        let err =
            do_binary_op(span(), BinOp::Modulo, &Value::Float(1.0), &Value::Float(0.0)).unwrap_err();
        assert!(matches!(err, RuntimeError::DivideByZero { .. }));
    }

    #[test]
    fn string_and_list_addition_concatenate() {
        let result = do_binary_op(
            span(),
            BinOp::Add,
            &Value::String("ab".into()),
            &Value::String("cd".into()),
        )
        .unwrap();
        assert!(matches!(result, Value::String(s) if s == "abcd"));

        let result = do_binary_op(
            span(),
            BinOp::Add,
            &Value::list(vec![Value::Int(1)]),
            &Value::list(vec![Value::Int(2), Value::Int(3)]),
        )
        .unwrap();
        match result {
            Value::List(list) => assert_eq!(list.borrow().elements.len(), 3),
            other => panic!("expected list, got {other:?}"),
        }
    }

    #[test]
    fn equality_is_structural_and_ignores_hash_order() {
        let a = Value::hash(
            [
                ("x".to_string(), Value::Int(1)),
                ("y".to_string(), Value::Int(2)),
            ]
            .into_iter()
            .collect(),
        );
        let b = Value::hash(
            [
                ("y".to_string(), Value::Int(2)),
                ("x".to_string(), Value::Int(1)),
            ]
            .into_iter()
            .collect(),
        );
        assert!(values_equal(&a, &b));

        let l1 = Value::list(vec![Value::Int(1), Value::String("s".into())]);
        let l2 = Value::list(vec![Value::Int(1), Value::String("s".into())]);
        assert!(values_equal(&l1, &l2));
    }

    #[test]
    fn truthiness_follows_emptiness_and_zero() {
        assert!(!is_truthy(&Value::Int(0)));
        assert!(is_truthy(&Value::Int(-1)));
        assert!(!is_truthy(&Value::String(String::new())));
        assert!(is_truthy(&Value::String("x".into())));
        assert!(!is_truthy(&Value::list(Vec::new())));
        assert!(!is_truthy(&Value::empty_hash()));
        assert!(!is_truthy(&Value::Bool(false)));
    }

    #[test]
    fn bitwise_not_requires_integers() {
        assert!(matches!(
            do_bitwise_not(span(), &Value::Int(0)).unwrap(),
            Value::Int(-1)
        ));
        assert!(do_bitwise_not(span(), &Value::Float(1.0)).is_err());
    }
}
