use std::cell::RefCell;
use std::io::{self, Write};
use std::rc::Rc;

use crate::diagnostics::{RuntimeError, VesperError};
use crate::parser;
use crate::runtime::value::Value;
use crate::runtime::Interpreter;

fn run(source: &str) -> Result<Value, VesperError> {
    crate::run_script(source)
}

fn eval(source: &str) -> Value {
    run(source).expect("script should evaluate")
}

fn eval_err(source: &str) -> RuntimeError {
    match run(source) {
        Err(VesperError::Runtime(err)) => err,
        Ok(value) => panic!("expected a runtime error, got {value:?}"),
        Err(other) => panic!("expected a runtime error, got {other}"),
    }
}

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

fn eval_output(source: &str) -> String {
    let program = parser::parse(source).expect("script should parse");
    let buffer = SharedBuffer::default();
    let mut interpreter = Interpreter::with_output(Box::new(buffer.clone()));
    interpreter
        .interpret(&program)
        .expect("script should evaluate");
    let bytes = buffer.0.borrow().clone();
    String::from_utf8(bytes).expect("output should be utf-8")
}

fn int(value: &Value) -> i64 {
    match value {
        Value::Int(v) => *v,
        other => panic!("expected an integer, got {other:?}"),
    }
}

fn text(value: &Value) -> String {
    match value {
        Value::String(v) => v.clone(),
        other => panic!("expected a string, got {other:?}"),
    }
}

#[test]
fn arithmetic_and_precedence() {
    assert_eq!(int(&eval("1 + 2 * 3")), 7);
    assert_eq!(int(&eval("(1 + 2) * 3")), 9);
    assert_eq!(int(&eval("2 ** 3 ** 2")), 512);
    assert_eq!(int(&eval("7 % 3")), 1);
    assert!(matches!(eval("1 + 0.5"), Value::Float(v) if v == 1.5));
    assert!(matches!(eval("\"a\" + \"b\""), Value::String(s) if s == "ab"));
}

#[test]
fn short_circuit_skips_the_right_operand() {
    // The right-hand call would be undefined; short-circuiting skips it.
    assert!(matches!(eval("false && missing()"), Value::Bool(false)));
    assert!(matches!(eval("true || missing()"), Value::Bool(true)));
}

#[test]
fn unresolved_identifiers_yield_zero() {
    assert_eq!(int(&eval("nothing_bound")), 0);
}

#[test]
fn compound_assignment_requires_a_binding() {
    let err = eval_err("missing += 1");
    assert!(matches!(err, RuntimeError::VariableUndefined { .. }));
}

#[test]
fn rebinding_global_is_illegal() {
    let err = eval_err("global = 1");
    assert!(matches!(err, RuntimeError::IllegalName { .. }));
}

#[test]
fn global_hash_is_shared_with_callees() {
    let result = eval(
        r#"
global["count"] = 1
def touch()
  global["count"] += 2
end
touch()
global["count"]
"#,
    );
    assert_eq!(int(&result), 3);
}

#[test]
fn caller_locals_flow_into_and_back_out_of_calls() {
    let result = eval(
        r#"
x = 1
def bump()
  x = x + 5
end
bump()
x
"#,
    );
    assert_eq!(int(&result), 6);
}

#[test]
fn if_elsif_else_chooses_the_first_truthy_branch() {
    let source = r#"
def classify(n)
  if n < 0
    return "negative"
  elsif n == 0
    return "zero"
  else
    return "positive"
  end
end
classify(%N%)
"#;
    assert_eq!(text(&eval(&source.replace("%N%", "-3"))), "negative");
    assert_eq!(text(&eval(&source.replace("%N%", "0"))), "zero");
    assert_eq!(text(&eval(&source.replace("%N%", "9"))), "positive");
}

#[test]
fn case_matches_structurally() {
    let result = eval(
        r#"
x = [1, 2]
case x
when [1]
  r = "one"
when [1, 2]
  r = "pair"
else
  r = "other"
end
r
"#,
    );
    assert_eq!(text(&result), "pair");
}

#[test]
fn ternary_evaluates_one_arm() {
    assert_eq!(int(&eval("x = 5\nx > 3 ? 1 : 2")), 1);
    assert_eq!(int(&eval("x = 1\nx > 3 ? 1 : 2")), 2);
}

#[test]
fn while_loop_with_next_and_break() {
    let result = eval(
        r#"
i = 0
s = 0
while i < 5 do
  i += 1
  next when i == 2
  s += i
end
s
"#,
    );
    assert_eq!(int(&result), 13);

    let result = eval(
        r#"
i = 0
while true do
  i += 1
  break when i == 4
end
i
"#,
    );
    assert_eq!(int(&result), 4);
}

#[test]
fn repeat_binds_and_erases_its_alias() {
    let result = eval(
        r#"
total = 0
repeat 4 as n do
  total += n
end
total
"#,
    );
    assert_eq!(int(&result), 10);
    // The alias is erased on loop exit, so it reads as unresolved.
    assert_eq!(int(&eval("repeat 2 as n do\nend\nn")), 0);
}

#[test]
fn for_loop_erases_iterators_and_binds_indices() {
    let result = eval(
        r#"
pairs = []
for value, index in [10, 20, 30] do
  pairs.push(value + index)
end
pairs
"#,
    );
    match result {
        Value::List(list) => {
            let list = list.borrow();
            assert_eq!(list.elements.len(), 3);
            assert_eq!(int(&list.elements[0]), 10);
            assert_eq!(int(&list.elements[2]), 32);
        }
        other => panic!("expected a list, got {other:?}"),
    }
    assert_eq!(int(&eval("for v in [1, 2] do\nend\nv")), 0);
}

#[test]
fn return_flag_terminates_loop_iteration() {
    let result = eval(
        r#"
def first_over(limit, values)
  for v in values do
    return v when v > limit
  end
  return -1
end
first_over(2, [1, 2, 3, 4])
"#,
    );
    assert_eq!(int(&result), 3);
}

#[test]
fn functions_bind_defaults_and_check_arity() {
    let source = r#"
def greet(name, greeting = "hello")
  return greeting + " " + name
end
greet("vesper")
"#;
    assert_eq!(text(&eval(source)), "hello vesper");
    let err = eval_err("def two(a, b)\nreturn a + b\nend\ntwo(1)");
    assert!(matches!(err, RuntimeError::ParameterCountMismatch { .. }));
}

#[test]
fn unknown_callables_are_typed_errors() {
    let err = eval_err("no_such_function()");
    assert!(matches!(err, RuntimeError::FunctionUndefined { .. }));
}

#[test]
fn recursion_works_through_the_frame_stack() {
    // Arguments are evaluated before the callee frame is pushed, so
    // accumulator-style recursion threads cleanly through the stack.
    let result = eval(
        r#"
def fact(n, acc = 1)
  return acc when n <= 1
  return fact(n - 1, acc * n)
end
fact(5)
"#,
    );
    assert_eq!(int(&result), 120);
}

#[test]
fn lambdas_pass_through_parameters_by_name() {
    let result = eval(
        r#"
def apply(f, v)
  return f(v)
end
g = (x) -> x + 1
apply(g, 2)
"#,
    );
    assert_eq!(int(&result), 3);
}

#[test]
fn lambda_block_form_and_defaults() {
    let result = eval(
        r#"
add = (a, b = 10) do
  return a + b
end
add(5)
"#,
    );
    assert_eq!(int(&result), 15);
}

#[test]
fn list_lambda_builtins_run_in_the_caller_frame() {
    let mapped = eval("f = (x) -> x * 2\n[1, 2, 3].map(f)");
    match mapped {
        Value::List(list) => {
            let values: Vec<i64> = list.borrow().elements.iter().map(int).collect();
            assert_eq!(values, vec![2, 4, 6]);
        }
        other => panic!("expected a list, got {other:?}"),
    }

    let selected = eval("odd = (x) -> x % 2 == 1\n[1, 2, 3, 4, 5].select(odd)");
    match selected {
        Value::List(list) => {
            let values: Vec<i64> = list.borrow().elements.iter().map(int).collect();
            assert_eq!(values, vec![1, 3, 5]);
        }
        other => panic!("expected a list, got {other:?}"),
    }

    assert!(matches!(
        eval("neg = (x) -> x < 0\n[1, 2].none(neg)"),
        Value::Bool(true)
    ));

    let reduced = eval(
        r#"
sum = (acc, v) do
  acc += v
end
[1, 2, 3, 4].reduce(0, sum)
"#,
    );
    assert_eq!(int(&reduced), 10);

    // The parameter name is erased after the walk.
    assert_eq!(int(&eval("f = (item) -> item\n[1].each(f)\nitem")), 0);
}

#[test]
fn each_and_map_on_empty_lists() {
    assert_eq!(int(&eval("f = (x) -> x\n[].each(f)")), 0);
    match eval("f = (x) -> x\n[].map(f)") {
        Value::List(list) => assert!(list.borrow().elements.is_empty()),
        other => panic!("expected a list, got {other:?}"),
    }
}

#[test]
fn list_helpers_sum_min_max_sort() {
    assert_eq!(int(&eval("[3, 1, 2].sum()")), 6);
    assert_eq!(int(&eval("[3, 1, 2].min()")), 1);
    assert_eq!(int(&eval("[3, 1, 2].max()")), 3);
    let sorted = eval("x = [3, 1, 2]\nx.sort()\nx");
    match sorted {
        Value::List(list) => {
            let values: Vec<i64> = list.borrow().elements.iter().map(int).collect();
            assert_eq!(values, vec![1, 2, 3]);
        }
        other => panic!("expected a list, got {other:?}"),
    }
    assert!(matches!(
        eval_err("[].min()"),
        RuntimeError::EmptyList { .. }
    ));
}

#[test]
fn ranges_realize_inclusive_lists() {
    match eval("[1..5]") {
        Value::List(list) => {
            let values: Vec<i64> = list.borrow().elements.iter().map(int).collect();
            assert_eq!(values, vec![1, 2, 3, 4, 5]);
        }
        other => panic!("expected a list, got {other:?}"),
    }
    match eval("[5..1]") {
        Value::List(list) => {
            let values: Vec<i64> = list.borrow().elements.iter().map(int).collect();
            assert_eq!(values, vec![5, 4, 3, 2, 1]);
        }
        other => panic!("expected a list, got {other:?}"),
    }
    assert!(matches!(
        eval_err("[1.5..3]"),
        RuntimeError::Range { .. }
    ));
}

#[test]
fn indexing_wraps_negatives_and_bounds_checks() {
    assert_eq!(int(&eval("x = [1, 2, 3]\nx[-1]")), 3);
    assert_eq!(int(&eval("x = [1, 2, 3]\nx[-3]")), 1);
    assert!(matches!(
        eval_err("x = [1, 2, 3]\nx[-4]"),
        RuntimeError::Range { .. }
    ));
    assert!(matches!(
        eval_err("x = [1, 2, 3]\nx[3]"),
        RuntimeError::Range { .. }
    ));
    assert_eq!(text(&eval("s = \"abc\"\ns[-1]")), "c");
}

#[test]
fn index_assignment_with_compound_ops() {
    assert_eq!(int(&eval("x = [1, 2, 3]\nx[1] += 10\nx[1]")), 12);
    assert_eq!(int(&eval("x = [1, 2, 3]\nx[-1] = 9\nx[2]")), 9);
    assert!(matches!(
        eval_err("x = [1, 2]\nx[5] = 0"),
        RuntimeError::Index { .. }
    ));
}

#[test]
fn nested_index_assignment_descends() {
    let result = eval(
        r#"
m = [[1, 2], [3, 4]]
m[1][0] = 9
m[0][1] += 10
m[1][0] + m[0][1]
"#,
    );
    assert_eq!(int(&result), 21);

    let result = eval(
        r#"
h = {"a": {"b": 1}}
h["a"]["b"] += 2
h["a"]["b"]
"#,
    );
    assert_eq!(int(&result), 3);
}

#[test]
fn hash_index_assignment_creates_but_compound_requires_key() {
    assert_eq!(int(&eval("h = {}\nh[\"k\"] = 5\nh[\"k\"]")), 5);
    assert!(matches!(
        eval_err("h = {}\nh[\"k\"] += 1"),
        RuntimeError::HashKey { .. }
    ));
}

#[test]
fn member_access_and_assignment_on_hashes() {
    assert_eq!(int(&eval("h = {\"size\": 1}\nh.size")), 1);
    assert_eq!(int(&eval("h = {}\nh.count = 2\nh.count")), 2);
    assert_eq!(int(&eval("h = {\"count\": 2}\nh.count += 3\nh.count")), 5);
    assert!(matches!(
        eval_err("h = {}\nh.missing"),
        RuntimeError::HashKey { .. }
    ));
}

#[test]
fn hash_iteration_follows_insertion_order() {
    let result = eval(
        r#"
h = {}
h["b"] = 1
h["a"] = 2
h["b"] = 3
h.keys()
"#,
    );
    match result {
        Value::List(list) => {
            let keys: Vec<String> = list.borrow().elements.iter().map(text).collect();
            assert_eq!(keys, vec!["b".to_string(), "a".to_string()]);
        }
        other => panic!("expected a list, got {other:?}"),
    }
}

#[test]
fn slices_read_and_write() {
    let result = eval("x = [1, 2, 3, 4, 5]\nx[1:4]");
    match result {
        Value::List(list) => {
            let values: Vec<i64> = list.borrow().elements.iter().map(int).collect();
            assert_eq!(values, vec![2, 3, 4]);
        }
        other => panic!("expected a list, got {other:?}"),
    }
    assert_eq!(text(&eval("\"vesper\"[1:4]")), "esp");
    assert_eq!(int(&eval("x = [1, 2, 3]\nx[1:1] = [9]\nx.size()")), 4);
    assert!(matches!(
        eval_err("x = [1, 2, 3]\nx[0:3:0]"),
        RuntimeError::Index { .. }
    ));
}

#[test]
fn classes_construct_and_dispatch() {
    let result = eval(
        r#"
class Point
  def ctor(x, y)
    @x = x
    @y = y
  end
  def total()
    return @x + @y
  end
end
p = Point.new(3, 4)
p.total()
"#,
    );
    assert_eq!(int(&result), 7);
}

#[test]
fn self_and_sigil_address_the_same_slot() {
    let result = eval(
        r#"
class Counter
  def ctor()
    @count = 0
  end
  def bump()
    self.count += 1
    return @count
  end
end
c = Counter.new()
c.bump()
c.bump()
"#,
    );
    assert_eq!(int(&result), 2);
}

#[test]
fn inheritance_walks_the_base_chain() {
    let result = eval(
        r#"
class A
  def greet()
    return "A"
  end
end
class B < A
end
b = B.new()
b.greet()
"#,
    );
    assert_eq!(text(&result), "A");

    let err = eval_err("class Orphan < Missing\nend");
    assert!(matches!(err, RuntimeError::ClassUndefined { .. }));
}

#[test]
fn private_methods_reject_outside_callers() {
    let source = r#"
class C
  private def hidden()
    return 1
  end
  def reveal()
    return hidden()
  end
end
c = C.new()
"#;
    assert_eq!(int(&eval(&format!("{source}c.reveal()"))), 1);
    let err = eval_err(&format!("{source}c.hidden()"));
    assert!(matches!(err, RuntimeError::InvalidContext { .. }));
}

#[test]
fn static_and_instance_dispatch_on_class_references() {
    let result = eval(
        r#"
class Util
  static def twice(x)
    return x * 2
  end
  def instance_only()
    return 1
  end
end
Util.twice(21)
"#,
    );
    assert_eq!(int(&result), 42);

    let err = eval_err(
        r#"
class Util
  def instance_only()
    return 1
  end
end
Util.instance_only()
"#,
    );
    assert!(matches!(err, RuntimeError::InvalidContext { .. }));

    let err = eval_err(
        r#"
class C
end
c = C.new()
c.missing()
"#,
    );
    assert!(matches!(err, RuntimeError::UnimplementedMethod { .. }));
}

#[test]
fn try_catch_binds_type_and_message() {
    let result = eval(
        r#"
kind = ""
try
  q = 1 / 0
catch (t, m)
  kind = t
end
kind
"#,
    );
    assert_eq!(text(&result), "DivideByZeroError");
}

#[test]
fn try_without_catch_absorbs_and_finally_runs() {
    let result = eval(
        r#"
r = 0
try
  throw "ignored"
finally
  r = 7
end
r
"#,
    );
    assert_eq!(int(&result), 7);
}

#[test]
fn throw_carries_custom_error_hashes() {
    let result = eval(
        r#"
caught = ""
try
  throw {"error": "CustomError", "message": "boom"}
catch (t, m)
  caught = t + ":" + m
end
caught
"#,
    );
    assert_eq!(text(&result), "CustomError:boom");
}

#[test]
fn throw_when_guard_gates_the_failure() {
    assert_eq!(int(&eval("throw \"no\" when false\n1")), 1);
    let err = eval_err("throw \"yes\" when true");
    assert!(matches!(err, RuntimeError::Thrown { .. }));
}

#[test]
fn uncaught_failures_unwind_call_frames() {
    let result = eval(
        r#"
def boom()
  throw "bad"
end
msg = ""
try
  boom()
catch (m)
  msg = m
end
msg
"#,
    );
    assert_eq!(text(&result), "bad");
}

#[test]
fn packages_prefix_declared_functions() {
    let result = eval(
        r#"
package math
  def double(x)
    return x * 2
  end
end
import "math"
math::double(4)
"#,
    );
    assert_eq!(int(&result), 8);

    let err = eval_err("import \"no_such_package\"");
    assert!(matches!(err, RuntimeError::PackageUndefined { .. }));
}

#[test]
fn serializer_round_trips_through_the_pipeline() {
    assert_eq!(text(&eval("serialize([1, 2])")), "[1, 2]");
    assert!(matches!(
        eval("deserialize(\"[1, 2]\") == [1, 2]"),
        Value::Bool(true)
    ));
    assert!(matches!(
        eval("v = {\"a\": 1, \"b\": [2, 3]}\ndeserialize(serialize(v)) == v"),
        Value::Bool(true)
    ));
}

#[test]
fn reflector_lists_registries_and_stack() {
    let result = eval(
        r#"
def helper()
  return 0
end
class Widget
end
r = rlist()
r["functions"]
"#,
    );
    match result {
        Value::List(list) => {
            let names: Vec<String> = list.borrow().elements.iter().map(text).collect();
            assert_eq!(names, vec!["helper".to_string()]);
        }
        other => panic!("expected a list, got {other:?}"),
    }

    assert_eq!(int(&eval("r = rlist()\nr[\"stack\"].size()")), 1);
}

#[test]
fn silent_suppresses_print_output() {
    assert_eq!(eval_output("silent(true)\nprintln \"hidden\""), "");
    assert_eq!(
        eval_output("silent(true)\nsilent(false)\nprintln \"shown\""),
        "shown\n"
    );
}

#[test]
fn print_serializes_values() {
    assert_eq!(eval_output("println [1, 2, 3]"), "[1, 2, 3]\n");
    assert_eq!(eval_output("print \"a\"\nprint \"b\""), "ab");
    assert_eq!(eval_output("println {\"k\": 1}"), "{\"k\": 1}\n");
}

#[test]
fn builtin_helpers_cover_strings_and_collections() {
    assert_eq!(int(&eval("\"vesper\".size()")), 6);
    assert_eq!(text(&eval("\"a,b\".split(\",\").join(\"-\")")), "a-b");
    assert_eq!(text(&eval("\"Vesper\".downcase()")), "vesper");
    assert!(matches!(eval("[1, 2].contains(2)"), Value::Bool(true)));
    assert_eq!(text(&eval("(3.5).type()")), "Float");
    assert_eq!(int(&eval("\" 42 \".to_int()")), 42);
    assert!(matches!(
        eval_err("\"abc\".to_int()"),
        RuntimeError::Conversion { .. }
    ));
}
