//! Slice normalization and in-place slice assignment over lists and
//! strings. Negative indices add the container length; a negative step with
//! `stop == len` turns the stop into the `-1` sentinel so reverse walks can
//! run past index zero.

use crate::diagnostics::RuntimeError;
use crate::runtime::value::{List, Value};
use crate::span::Span;

#[derive(Debug, Clone)]
pub struct SliceIndex {
    pub is_slice: bool,
    pub start: Value,
    pub stop: Value,
    pub step: Value,
}

fn slice_ints(span: Span, slice: &SliceIndex) -> Result<(i64, i64, i64), RuntimeError> {
    let Value::Int(start) = slice.start else {
        return Err(RuntimeError::Index {
            span,
            message: "Start index must be an integer.".into(),
        });
    };
    let Value::Int(stop) = slice.stop else {
        return Err(RuntimeError::Index {
            span,
            message: "Stop index must be an integer.".into(),
        });
    };
    let Value::Int(step) = slice.step else {
        return Err(RuntimeError::Index {
            span,
            message: "Step value must be an integer.".into(),
        });
    };
    if slice.is_slice && step == 0 {
        return Err(RuntimeError::Index {
            span,
            message: "Step value must be non-zero.".into(),
        });
    }
    Ok((start, stop, step))
}

pub fn list_slice(span: Span, slice: &SliceIndex, list: &List) -> Result<Value, RuntimeError> {
    let elements = sliced_elements(span, slice, &list.elements)?;
    Ok(Value::list(elements))
}

pub fn string_slice(span: Span, slice: &SliceIndex, text: &str) -> Result<Value, RuntimeError> {
    let chars: Vec<Value> = text
        .chars()
        .map(|ch| Value::String(ch.to_string()))
        .collect();
    let sliced = sliced_elements(span, slice, &chars)?;
    let mut result = String::new();
    for value in sliced {
        if let Value::String(s) = value {
            result.push_str(&s);
        }
    }
    Ok(Value::String(result))
}

fn sliced_elements(
    span: Span,
    slice: &SliceIndex,
    elements: &[Value],
) -> Result<Vec<Value>, RuntimeError> {
    let (start, stop, step) = slice_ints(span, slice)?;
    let len = elements.len() as i64;

    if !slice.is_slice {
        let mut index = start;
        if index < 0 {
            index += len;
        }
        if index < 0 || index >= len {
            return Err(RuntimeError::Range {
                span,
                message: "The index was outside the bounds of the container.".into(),
            });
        }
        return Ok(vec![elements[index as usize].clone()]);
    }

    let mut start = if start < 0 { (start + len).max(0) } else { start };
    let mut stop = if stop < 0 { stop + len } else { stop.min(len) };
    if step < 0 && stop == len {
        stop = -1;
    }

    let mut sliced = Vec::new();
    if step < 0 {
        if start == 0 {
            start = len - 1;
        }
        let mut i = start;
        while i >= stop {
            if i < 0 || i >= len {
                break;
            }
            sliced.push(elements[i as usize].clone());
            i += step;
        }
    } else {
        let mut i = start;
        while i < stop {
            if i >= len {
                break;
            }
            if i >= 0 {
                sliced.push(elements[i as usize].clone());
            }
            i += step;
        }
    }
    Ok(sliced)
}

/// In-place slice assignment. With `step == 1` the range `[start, stop)` is
/// erased and the right-hand elements spliced in at `start` (a pure
/// insertion when `start == stop`). Any other step walks the positions and
/// stops when either side runs out.
pub fn update_list_slice(
    span: Span,
    insert_op: bool,
    target: &mut List,
    slice: &SliceIndex,
    rhs: &List,
) -> Result<(), RuntimeError> {
    let (start, stop, step) = slice_ints(span, slice)?;
    let mut start = start;
    let mut stop = stop;

    if !slice.is_slice && insert_op {
        // Single-element store addressed by position.
        stop = start;
    }

    let len = target.elements.len() as i64;
    if start < 0 {
        start += len;
    }
    if stop < 0 {
        stop += len;
    }
    start = start.max(0);
    if stop > len {
        stop = len;
    }
    if step < 0 && stop == len {
        stop = -1;
    }

    if step == 1 {
        let start = (start as usize).min(target.elements.len());
        let upper = (stop.max(start as i64) as usize).min(target.elements.len());
        target
            .elements
            .splice(start..upper, rhs.elements.iter().cloned());
    } else {
        let mut rhs_index = 0usize;
        let mut i = start;
        while i != stop && rhs_index < rhs.elements.len() {
            if (step > 0 && i < len) || (step < 0 && i >= 0) {
                target.elements[i as usize] = rhs.elements[rhs_index].clone();
                rhs_index += 1;
            } else {
                break;
            }
            i += step;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> Span {
        Span::empty()
    }

    fn int_list(values: &[i64]) -> List {
        List {
            elements: values.iter().map(|v| Value::Int(*v)).collect(),
        }
    }

    fn ints(value: &Value) -> Vec<i64> {
        match value {
            Value::List(list) => list
                .borrow()
                .elements
                .iter()
                .map(|v| match v {
                    Value::Int(i) => *i,
                    other => panic!("expected int, got {other:?}"),
                })
                .collect(),
            other => panic!("expected list, got {other:?}"),
        }
    }

    fn slice(start: i64, stop: i64, step: i64) -> SliceIndex {
        SliceIndex {
            is_slice: true,
            start: Value::Int(start),
            stop: Value::Int(stop),
            step: Value::Int(step),
        }
    }

    #[test]
    fn forward_slice_reads_half_open_range() {
        let list = int_list(&[1, 2, 3, 4, 5]);
        let result = list_slice(span(), &slice(1, 4, 1), &list).unwrap();
        assert_eq!(ints(&result), vec![2, 3, 4]);
    }

    #[test]
    fn negative_indices_add_length() {
        let list = int_list(&[1, 2, 3, 4, 5]);
        let result = list_slice(span(), &slice(-3, 5, 1), &list).unwrap();
        assert_eq!(ints(&result), vec![3, 4, 5]);
    }

    #[test]
    fn reverse_slice_walks_downward() {
        let list = int_list(&[1, 2, 3, 4, 5]);
        let result = list_slice(span(), &slice(0, 5, -1), &list).unwrap();
        assert_eq!(ints(&result), vec![5, 4, 3, 2, 1]);
    }

    #[test]
    fn step_zero_is_an_index_error() {
        let list = int_list(&[1, 2, 3]);
        let err = list_slice(span(), &slice(0, 3, 0), &list).unwrap_err();
        assert!(matches!(err, RuntimeError::Index { .. }));
    }

    #[test]
    fn step_one_assignment_splices() {
        let mut list = int_list(&[1, 2, 3, 4, 5]);
        let rhs = int_list(&[9, 9]);
        update_list_slice(span(), false, &mut list, &slice(1, 4, 1), &rhs).unwrap();
        assert_eq!(
            ints(&Value::list(list.elements.clone())),
            vec![1, 9, 9, 5]
        );
    }

    #[test]
    fn equal_bounds_assignment_is_pure_insertion() {
        let mut list = int_list(&[1, 2, 3]);
        let rhs = int_list(&[7, 8]);
        update_list_slice(span(), false, &mut list, &slice(1, 1, 1), &rhs).unwrap();
        assert_eq!(ints(&Value::list(list.elements.clone())), vec![1, 7, 8, 2, 3]);
    }

    #[test]
    fn slice_assignment_preserves_length_arithmetic() {
        // len(L) - (e - s) + len(R)
        let mut list = int_list(&[1, 2, 3, 4, 5, 6]);
        let rhs = int_list(&[0]);
        update_list_slice(span(), false, &mut list, &slice(2, 5, 1), &rhs).unwrap();
        assert_eq!(list.elements.len(), 6 - 3 + 1);
    }

    #[test]
    fn stepped_assignment_stops_when_rhs_runs_out() {
        let mut list = int_list(&[1, 2, 3, 4, 5, 6]);
        let rhs = int_list(&[9, 9]);
        update_list_slice(span(), false, &mut list, &slice(0, 6, 2), &rhs).unwrap();
        assert_eq!(
            ints(&Value::list(list.elements.clone())),
            vec![9, 2, 9, 4, 5, 6]
        );
    }

    #[test]
    fn single_index_reads_wrap_negatives() {
        let list = int_list(&[1, 2, 3]);
        let index = SliceIndex {
            is_slice: false,
            start: Value::Int(-1),
            stop: Value::Int(0),
            step: Value::Int(1),
        };
        assert_eq!(ints(&list_slice(span(), &index, &list).unwrap()), vec![3]);

        let index = SliceIndex {
            is_slice: false,
            start: Value::Int(-4),
            stop: Value::Int(0),
            step: Value::Int(1),
        };
        let err = list_slice(span(), &index, &list).unwrap_err();
        assert!(matches!(err, RuntimeError::Range { .. }));
    }

    #[test]
    fn single_position_store_with_insert_op_splices_in() {
        // A non-slice store with the insert flag collapses the range to the
        // start position.
        let mut list = int_list(&[1, 2, 3]);
        let rhs = int_list(&[9]);
        let index = SliceIndex {
            is_slice: false,
            start: Value::Int(1),
            stop: Value::Int(99),
            step: Value::Int(1),
        };
        update_list_slice(span(), true, &mut list, &index, &rhs).unwrap();
        assert_eq!(
            ints(&Value::list(list.elements.clone())),
            vec![1, 9, 2, 3]
        );
    }

    #[test]
    fn string_slice_returns_by_value() {
        let result = string_slice(span(), &slice(1, 4, 1), "vesper").unwrap();
        assert!(matches!(result, Value::String(s) if s == "esp"));
        let result = string_slice(span(), &slice(0, 6, -1), "vesper").unwrap();
        assert!(matches!(result, Value::String(s) if s == "repsev"));
    }
}
