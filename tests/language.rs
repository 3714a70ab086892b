use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use vesper::parser;
use vesper::runtime::frame::FrameFlags;
use vesper::{Interpreter, Value, VesperError};

#[derive(Clone, Default)]
struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn run_program(source: &str) -> (Result<Value, VesperError>, String, Interpreter) {
    let buffer = SharedBuffer::default();
    let mut interpreter = Interpreter::with_output(Box::new(buffer.clone()));
    let result = parser::parse(source)
        .and_then(|program| interpreter.interpret(&program).map_err(VesperError::from));
    let output = String::from_utf8(buffer.0.borrow().clone()).expect("output should be utf-8");
    (result, output, interpreter)
}

fn run_output(source: &str) -> String {
    let (result, output, _) = run_program(source);
    result.expect("program should evaluate");
    output
}

#[test]
fn slice_assignment_splices_in_place() {
    let output = run_output("x = [1, 2, 3, 4, 5]\nx[1:4] = [9, 9]\nprintln x");
    assert_eq!(output, "[1, 9, 9, 5]\n");
}

#[test]
fn base_class_methods_resolve_through_derived_objects() {
    let output = run_output(
        r#"
class A
  def greet()
    return "A"
  end
end
class B < A
end
b = B.new()
println b.greet()
"#,
    );
    assert_eq!(output, "A\n");
}

#[test]
fn lambdas_map_over_lists_by_reference() {
    let output = run_output("f = (x) -> x * 2\nprintln [1, 2, 3].map(f)");
    assert_eq!(output, "[2, 4, 6]\n");
}

#[test]
fn catch_runs_before_finally() {
    let output = run_output(
        r#"
try
  throw "oops"
catch (e, m)
  println m
finally
  println "done"
end
"#,
    );
    assert_eq!(output, "oops\ndone\n");
}

#[test]
fn for_loop_breaks_on_guarded_condition() {
    let output = run_output(
        r#"
r = 0
for i in [1, 2, 3, 4, 5] do
  break when i > 3
  r += i
end
println r
"#,
    );
    assert_eq!(output, "6\n");
}

#[test]
fn hash_iteration_preserves_insertion_order() {
    let output = run_output(
        r#"
h = {}
h["b"] = 1
h["a"] = 2
h["b"] = 3
for k in h do
  println k
end
"#,
    );
    assert_eq!(output, "b\na\n");
}

#[test]
fn hash_for_loop_index_iterator_receives_the_value() {
    let output = run_output(
        r#"
h = {}
h["x"] = 10
h["y"] = 20
for key, value in h do
  println key + "=" + value
end
"#,
    );
    assert_eq!(output, "x=10\ny=20\n");
}

#[test]
fn terminated_programs_leave_a_single_quiet_root_frame() {
    let (result, _, interpreter) = run_program(
        r#"
def work(n)
  return n * 2
end
total = 0
for i in [1..4] do
  total += work(i)
end
total
"#,
    );
    assert!(matches!(result.unwrap(), Value::Int(20)));
    assert_eq!(interpreter.call_stack_depth(), 1);
    let flags = interpreter.root_frame_flags().expect("root frame");
    assert!(!flags.contains(FrameFlags::RETURN));
}

#[test]
fn ranges_have_inclusive_endpoints_and_exact_length() {
    let (result, _, _) = run_program("r = [3..7]\n[r.size(), r.first(), r.last()]");
    match result.unwrap() {
        Value::List(list) => {
            let list = list.borrow();
            assert!(matches!(list.elements[0], Value::Int(5)));
            assert!(matches!(list.elements[1], Value::Int(3)));
            assert!(matches!(list.elements[2], Value::Int(7)));
        }
        other => panic!("expected a list, got {other:?}"),
    }
}

#[test]
fn slice_assignment_length_arithmetic_holds() {
    // len(L) - (e - s) + len(R), and s == e is a pure insertion.
    let (result, _, _) = run_program(
        r#"
x = [1, 2, 3, 4, 5, 6]
x[2:5] = [0]
a = x.size()
y = [1, 2, 3]
y[1:1] = [8, 9]
b = y.size()
[a, b]
"#,
    );
    match result.unwrap() {
        Value::List(list) => {
            let list = list.borrow();
            assert!(matches!(list.elements[0], Value::Int(4)));
            assert!(matches!(list.elements[1], Value::Int(5)));
        }
        other => panic!("expected a list, got {other:?}"),
    }
}

#[test]
fn reading_then_writing_an_index_is_identity() {
    let output = run_output("x = [4, 5, 6]\nx[1] = x[1]\nprintln x");
    assert_eq!(output, "[4, 5, 6]\n");
}

#[test]
fn serializer_round_trips_composite_values() {
    let (result, _, _) = run_program(
        r#"
v = [1, 2.5, "three", true, {"k": [4]}]
deserialize(serialize(v)) == v
"#,
    );
    assert!(matches!(result.unwrap(), Value::Bool(true)));
}

#[test]
fn negative_index_boundaries() {
    let (result, _, _) = run_program("x = [1, 2, 3]\nx[-3]");
    assert!(matches!(result.unwrap(), Value::Int(1)));

    let (result, _, _) = run_program("x = [1, 2, 3]\nx[-4]");
    match result {
        Err(VesperError::Runtime(err)) => assert_eq!(err.error_type(), "RangeError"),
        other => panic!("expected a range error, got {other:?}"),
    }
}

#[test]
fn zero_step_slices_are_rejected() {
    let (result, _, _) = run_program("x = [1, 2, 3]\nx[0:3:0]");
    match result {
        Err(VesperError::Runtime(err)) => assert_eq!(err.error_type(), "IndexError"),
        other => panic!("expected an index error, got {other:?}"),
    }
}

#[test]
fn empty_list_lambda_builtins() {
    let (result, _, _) = run_program("f = (x) -> x\n[].each(f)");
    assert!(matches!(result.unwrap(), Value::Int(0)));

    let (result, _, _) = run_program("f = (x) -> x\n[].map(f).size()");
    assert!(matches!(result.unwrap(), Value::Int(0)));
}

#[test]
fn aliased_lists_observe_mutation_through_either_name() {
    let output = run_output(
        r#"
a = [1, 2]
b = a
b.push(3)
a[0] = 9
println a
println b
"#,
    );
    assert_eq!(output, "[9, 2, 3]\n[9, 2, 3]\n");
}

#[test]
fn uncaught_errors_surface_with_their_kind() {
    let (result, _, interpreter) = run_program("x = [1]\nx[9]");
    match result {
        Err(VesperError::Runtime(err)) => {
            assert_eq!(err.error_type(), "RangeError");
            assert!(!err.message().is_empty());
        }
        other => panic!("expected a runtime error, got {other:?}"),
    }
    // The failing statement ran in the root frame; nothing leaked.
    assert_eq!(interpreter.call_stack_depth(), 1);
}

#[test]
fn repl_style_scripts_share_the_root_frame() {
    let buffer = SharedBuffer::default();
    let mut interpreter = Interpreter::with_output(Box::new(buffer.clone()));
    let first = parser::parse("x = 2").expect("parse");
    interpreter.interpret(&first).expect("interpret");
    let second = parser::parse_script("x * 21").expect("parse");
    let result = interpreter.interpret(&second).expect("interpret");
    assert!(matches!(result, Value::Int(42)));
    assert_eq!(interpreter.call_stack_depth(), 1);
}
