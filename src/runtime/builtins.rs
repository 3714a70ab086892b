//! The closed set of built-in names and the dispatch for the pure
//! method-style helpers. The console, serializer, reflector, and
//! list-lambda shims need interpreter state and live on `Interpreter`.

use crate::diagnostics::RuntimeError;
use crate::runtime::math;
use crate::runtime::serializer;
use crate::runtime::value::Value;
use crate::span::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    // Console and host shims, callable as free functions.
    Input,
    Silent,
    Serialize,
    Deserialize,
    RList,
    // List specials; the lambda-driven ones run in the caller's frame.
    Max,
    Min,
    Sum,
    Sort,
    Each,
    Map,
    Select,
    None,
    Reduce,
    // General method helpers.
    Size,
    Empty,
    Contains,
    Join,
    Split,
    Upcase,
    Downcase,
    Trim,
    Replace,
    BeginsWith,
    EndsWith,
    IndexOf,
    Push,
    Pop,
    First,
    Last,
    Reverse,
    Keys,
    Values,
    HasKey,
    ToString,
    ToInt,
    ToFloat,
    Type,
    Abs,
}

impl Builtin {
    pub fn from_name(name: &str) -> Option<Builtin> {
        let builtin = match name {
            "input" => Builtin::Input,
            "silent" => Builtin::Silent,
            "serialize" => Builtin::Serialize,
            "deserialize" => Builtin::Deserialize,
            "rlist" => Builtin::RList,
            "max" => Builtin::Max,
            "min" => Builtin::Min,
            "sum" => Builtin::Sum,
            "sort" => Builtin::Sort,
            "each" => Builtin::Each,
            "map" => Builtin::Map,
            "select" => Builtin::Select,
            "none" => Builtin::None,
            "reduce" => Builtin::Reduce,
            "size" => Builtin::Size,
            "empty" => Builtin::Empty,
            "contains" => Builtin::Contains,
            "join" => Builtin::Join,
            "split" => Builtin::Split,
            "upcase" => Builtin::Upcase,
            "downcase" => Builtin::Downcase,
            "trim" => Builtin::Trim,
            "replace" => Builtin::Replace,
            "begins_with" => Builtin::BeginsWith,
            "ends_with" => Builtin::EndsWith,
            "index_of" => Builtin::IndexOf,
            "push" => Builtin::Push,
            "pop" => Builtin::Pop,
            "first" => Builtin::First,
            "last" => Builtin::Last,
            "reverse" => Builtin::Reverse,
            "keys" => Builtin::Keys,
            "values" => Builtin::Values,
            "has_key" => Builtin::HasKey,
            "to_string" => Builtin::ToString,
            "to_int" => Builtin::ToInt,
            "to_float" => Builtin::ToFloat,
            "type" => Builtin::Type,
            "abs" => Builtin::Abs,
            _ => return Option::None,
        };
        Some(builtin)
    }

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Input => "input",
            Builtin::Silent => "silent",
            Builtin::Serialize => "serialize",
            Builtin::Deserialize => "deserialize",
            Builtin::RList => "rlist",
            Builtin::Max => "max",
            Builtin::Min => "min",
            Builtin::Sum => "sum",
            Builtin::Sort => "sort",
            Builtin::Each => "each",
            Builtin::Map => "map",
            Builtin::Select => "select",
            Builtin::None => "none",
            Builtin::Reduce => "reduce",
            Builtin::Size => "size",
            Builtin::Empty => "empty",
            Builtin::Contains => "contains",
            Builtin::Join => "join",
            Builtin::Split => "split",
            Builtin::Upcase => "upcase",
            Builtin::Downcase => "downcase",
            Builtin::Trim => "trim",
            Builtin::Replace => "replace",
            Builtin::BeginsWith => "begins_with",
            Builtin::EndsWith => "ends_with",
            Builtin::IndexOf => "index_of",
            Builtin::Push => "push",
            Builtin::Pop => "pop",
            Builtin::First => "first",
            Builtin::Last => "last",
            Builtin::Reverse => "reverse",
            Builtin::Keys => "keys",
            Builtin::Values => "values",
            Builtin::HasKey => "has_key",
            Builtin::ToString => "to_string",
            Builtin::ToInt => "to_int",
            Builtin::ToFloat => "to_float",
            Builtin::Type => "type",
            Builtin::Abs => "abs",
        }
    }

    /// Callable by bare name, without a receiver.
    pub fn is_free_function(self) -> bool {
        matches!(
            self,
            Builtin::Input
                | Builtin::Silent
                | Builtin::Serialize
                | Builtin::Deserialize
                | Builtin::RList
        )
    }

    /// Specialized list builtins the interpreter handles itself.
    pub fn is_list_special(self) -> bool {
        matches!(
            self,
            Builtin::Max
                | Builtin::Min
                | Builtin::Sum
                | Builtin::Sort
                | Builtin::Each
                | Builtin::Map
                | Builtin::Select
                | Builtin::None
                | Builtin::Reduce
        )
    }
}

pub fn ensure_arity(
    span: Span,
    builtin: Builtin,
    args: &[Value],
    expected: usize,
) -> Result<(), RuntimeError> {
    if args.len() != expected {
        return Err(RuntimeError::BuiltinUnexpectedArgument {
            span,
            name: builtin.name().to_string(),
        });
    }
    Ok(())
}

fn expect_string(span: Span, value: &Value) -> Result<String, RuntimeError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        other => Err(RuntimeError::Conversion {
            span,
            message: format!("Expected a String value, got a {}.", other.type_name()),
        }),
    }
}

/// Dispatch for the general method-style helpers.
pub fn execute(
    span: Span,
    builtin: Builtin,
    receiver: &Value,
    args: &[Value],
) -> Result<Value, RuntimeError> {
    match builtin {
        Builtin::Size => {
            ensure_arity(span, builtin, args, 0)?;
            let size = match receiver {
                Value::String(s) => s.chars().count() as i64,
                Value::List(list) => list.borrow().elements.len() as i64,
                Value::Hash(hash) => hash.borrow().entries.len() as i64,
                other => {
                    return Err(RuntimeError::InvalidOperation {
                        span,
                        message: format!("A {} has no size.", other.type_name()),
                    })
                }
            };
            Ok(Value::Int(size))
        }
        Builtin::Empty => {
            let size = execute(span, Builtin::Size, receiver, args)?;
            match size {
                Value::Int(n) => Ok(Value::Bool(n == 0)),
                _ => Ok(Value::Bool(false)),
            }
        }
        Builtin::Contains => {
            ensure_arity(span, builtin, args, 1)?;
            match receiver {
                Value::String(s) => {
                    let needle = expect_string(span, &args[0])?;
                    Ok(Value::Bool(s.contains(&needle)))
                }
                Value::List(list) => Ok(Value::Bool(
                    list.borrow()
                        .elements
                        .iter()
                        .any(|element| math::values_equal(element, &args[0])),
                )),
                other => Err(RuntimeError::InvalidOperation {
                    span,
                    message: format!("Cannot search a {}.", other.type_name()),
                }),
            }
        }
        Builtin::Join => {
            let separator = match args {
                [] => String::new(),
                [sep] => expect_string(span, sep)?,
                _ => {
                    return Err(RuntimeError::BuiltinUnexpectedArgument {
                        span,
                        name: builtin.name().to_string(),
                    })
                }
            };
            match receiver {
                Value::List(list) => {
                    let joined = list
                        .borrow()
                        .elements
                        .iter()
                        .map(serializer::serialize)
                        .collect::<Vec<_>>()
                        .join(&separator);
                    Ok(Value::String(joined))
                }
                other => Err(RuntimeError::InvalidOperation {
                    span,
                    message: format!("Cannot join a {}.", other.type_name()),
                }),
            }
        }
        Builtin::Split => {
            ensure_arity(span, builtin, args, 1)?;
            let text = expect_string(span, receiver)?;
            let separator = expect_string(span, &args[0])?;
            let parts: Vec<Value> = if separator.is_empty() {
                text.chars().map(|ch| Value::String(ch.to_string())).collect()
            } else {
                text.split(&separator)
                    .map(|part| Value::String(part.to_string()))
                    .collect()
            };
            Ok(Value::list(parts))
        }
        Builtin::Upcase => {
            ensure_arity(span, builtin, args, 0)?;
            Ok(Value::String(expect_string(span, receiver)?.to_uppercase()))
        }
        Builtin::Downcase => {
            ensure_arity(span, builtin, args, 0)?;
            Ok(Value::String(expect_string(span, receiver)?.to_lowercase()))
        }
        Builtin::Trim => {
            ensure_arity(span, builtin, args, 0)?;
            Ok(Value::String(
                expect_string(span, receiver)?.trim().to_string(),
            ))
        }
        Builtin::Replace => {
            ensure_arity(span, builtin, args, 2)?;
            let text = expect_string(span, receiver)?;
            let from = expect_string(span, &args[0])?;
            let to = expect_string(span, &args[1])?;
            Ok(Value::String(text.replace(&from, &to)))
        }
        Builtin::BeginsWith => {
            ensure_arity(span, builtin, args, 1)?;
            let text = expect_string(span, receiver)?;
            let prefix = expect_string(span, &args[0])?;
            Ok(Value::Bool(text.starts_with(&prefix)))
        }
        Builtin::EndsWith => {
            ensure_arity(span, builtin, args, 1)?;
            let text = expect_string(span, receiver)?;
            let suffix = expect_string(span, &args[0])?;
            Ok(Value::Bool(text.ends_with(&suffix)))
        }
        Builtin::IndexOf => {
            ensure_arity(span, builtin, args, 1)?;
            match receiver {
                Value::String(s) => {
                    let needle = expect_string(span, &args[0])?;
                    let index = s
                        .find(&needle)
                        .map(|byte| s[..byte].chars().count() as i64)
                        .unwrap_or(-1);
                    Ok(Value::Int(index))
                }
                Value::List(list) => {
                    let index = list
                        .borrow()
                        .elements
                        .iter()
                        .position(|element| math::values_equal(element, &args[0]))
                        .map(|i| i as i64)
                        .unwrap_or(-1);
                    Ok(Value::Int(index))
                }
                other => Err(RuntimeError::InvalidOperation {
                    span,
                    message: format!("Cannot search a {}.", other.type_name()),
                }),
            }
        }
        Builtin::Push => {
            ensure_arity(span, builtin, args, 1)?;
            match receiver {
                Value::List(list) => {
                    list.borrow_mut().elements.push(args[0].clone());
                    Ok(receiver.clone())
                }
                other => Err(RuntimeError::InvalidOperation {
                    span,
                    message: format!("Cannot push onto a {}.", other.type_name()),
                }),
            }
        }
        Builtin::Pop => {
            ensure_arity(span, builtin, args, 0)?;
            match receiver {
                Value::List(list) => list
                    .borrow_mut()
                    .elements
                    .pop()
                    .ok_or(RuntimeError::EmptyList { span }),
                other => Err(RuntimeError::InvalidOperation {
                    span,
                    message: format!("Cannot pop from a {}.", other.type_name()),
                }),
            }
        }
        Builtin::First => {
            ensure_arity(span, builtin, args, 0)?;
            match receiver {
                Value::List(list) => list
                    .borrow()
                    .elements
                    .first()
                    .cloned()
                    .ok_or(RuntimeError::EmptyList { span }),
                other => Err(RuntimeError::InvalidOperation {
                    span,
                    message: format!("A {} has no first element.", other.type_name()),
                }),
            }
        }
        Builtin::Last => {
            ensure_arity(span, builtin, args, 0)?;
            match receiver {
                Value::List(list) => list
                    .borrow()
                    .elements
                    .last()
                    .cloned()
                    .ok_or(RuntimeError::EmptyList { span }),
                other => Err(RuntimeError::InvalidOperation {
                    span,
                    message: format!("A {} has no last element.", other.type_name()),
                }),
            }
        }
        Builtin::Reverse => {
            ensure_arity(span, builtin, args, 0)?;
            match receiver {
                Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
                Value::List(list) => {
                    list.borrow_mut().elements.reverse();
                    Ok(receiver.clone())
                }
                other => Err(RuntimeError::InvalidOperation {
                    span,
                    message: format!("Cannot reverse a {}.", other.type_name()),
                }),
            }
        }
        Builtin::Keys => {
            ensure_arity(span, builtin, args, 0)?;
            match receiver {
                Value::Hash(hash) => Ok(Value::list(
                    hash.borrow()
                        .entries
                        .keys()
                        .map(|key| Value::String(key.clone()))
                        .collect(),
                )),
                other => Err(RuntimeError::InvalidOperation {
                    span,
                    message: format!("A {} has no keys.", other.type_name()),
                }),
            }
        }
        Builtin::Values => {
            ensure_arity(span, builtin, args, 0)?;
            match receiver {
                Value::Hash(hash) => Ok(Value::list(
                    hash.borrow().entries.values().cloned().collect(),
                )),
                other => Err(RuntimeError::InvalidOperation {
                    span,
                    message: format!("A {} has no values.", other.type_name()),
                }),
            }
        }
        Builtin::HasKey => {
            ensure_arity(span, builtin, args, 1)?;
            match receiver {
                Value::Hash(hash) => {
                    let key = expect_string(span, &args[0])?;
                    Ok(Value::Bool(hash.borrow().has_key(&key)))
                }
                other => Err(RuntimeError::InvalidOperation {
                    span,
                    message: format!("A {} has no keys.", other.type_name()),
                }),
            }
        }
        Builtin::ToString => {
            ensure_arity(span, builtin, args, 0)?;
            Ok(Value::String(serializer::serialize(receiver)))
        }
        Builtin::ToInt => {
            ensure_arity(span, builtin, args, 0)?;
            match receiver {
                Value::Int(v) => Ok(Value::Int(*v)),
                Value::Float(v) => Ok(Value::Int(*v as i64)),
                Value::Bool(v) => Ok(Value::Int(i64::from(*v))),
                Value::String(s) => {
                    s.trim()
                        .parse::<i64>()
                        .map(Value::Int)
                        .map_err(|_| RuntimeError::Conversion {
                            span,
                            message: format!("Cannot convert `{s}` to an Integer."),
                        })
                }
                other => Err(RuntimeError::Conversion {
                    span,
                    message: format!("Cannot convert a {} to an Integer.", other.type_name()),
                }),
            }
        }
        Builtin::ToFloat => {
            ensure_arity(span, builtin, args, 0)?;
            match receiver {
                Value::Int(v) => Ok(Value::Float(*v as f64)),
                Value::Float(v) => Ok(Value::Float(*v)),
                Value::String(s) => {
                    s.trim()
                        .parse::<f64>()
                        .map(Value::Float)
                        .map_err(|_| RuntimeError::Conversion {
                            span,
                            message: format!("Cannot convert `{s}` to a Float."),
                        })
                }
                other => Err(RuntimeError::Conversion {
                    span,
                    message: format!("Cannot convert a {} to a Float.", other.type_name()),
                }),
            }
        }
        Builtin::Type => {
            ensure_arity(span, builtin, args, 0)?;
            Ok(Value::String(receiver.type_name().to_string()))
        }
        Builtin::Abs => {
            ensure_arity(span, builtin, args, 0)?;
            match receiver {
                Value::Int(v) => Ok(Value::Int(v.wrapping_abs())),
                Value::Float(v) => Ok(Value::Float(v.abs())),
                other => Err(RuntimeError::Conversion {
                    span,
                    message: format!("A {} has no absolute value.", other.type_name()),
                }),
            }
        }
        other => Err(RuntimeError::UnknownBuiltin {
            span,
            name: other.name().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> Span {
        Span::empty()
    }

    #[test]
    fn size_and_empty_cover_the_container_kinds() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2)]);
        assert!(matches!(
            execute(span(), Builtin::Size, &list, &[]).unwrap(),
            Value::Int(2)
        ));
        assert!(matches!(
            execute(span(), Builtin::Empty, &Value::String(String::new()), &[]).unwrap(),
            Value::Bool(true)
        ));
        assert!(execute(span(), Builtin::Size, &Value::Int(3), &[]).is_err());
    }

    #[test]
    fn push_and_pop_mutate_the_shared_list() {
        let list = Value::list(vec![Value::Int(1)]);
        let alias = list.clone();
        execute(span(), Builtin::Push, &list, &[Value::Int(2)]).unwrap();
        match &alias {
            Value::List(inner) => assert_eq!(inner.borrow().elements.len(), 2),
            _ => unreachable!(),
        }
        assert!(matches!(
            execute(span(), Builtin::Pop, &list, &[]).unwrap(),
            Value::Int(2)
        ));
        execute(span(), Builtin::Pop, &list, &[]).unwrap();
        let err = execute(span(), Builtin::Pop, &list, &[]).unwrap_err();
        assert!(matches!(err, RuntimeError::EmptyList { .. }));
    }

    #[test]
    fn arity_violations_are_typed() {
        let err = execute(span(), Builtin::Trim, &Value::String("x".into()), &[Value::Int(1)])
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::BuiltinUnexpectedArgument { .. }
        ));
    }

    #[test]
    fn conversions_error_on_bad_input() {
        let err = execute(span(), Builtin::ToInt, &Value::String("abc".into()), &[]).unwrap_err();
        assert!(matches!(err, RuntimeError::Conversion { .. }));
        assert!(matches!(
            execute(span(), Builtin::ToInt, &Value::String(" 42 ".into()), &[]).unwrap(),
            Value::Int(42)
        ));
    }
}
