use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::io::{self, Write};
use std::path::Path;
use std::rc::Rc;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::debug;

use crate::ast::{AssignOp, AssignTarget, BinOp, Literal, Node, Parameter};
use crate::diagnostics::RuntimeError;
use crate::span::Span;
use crate::{lexer, parser};

pub mod builtins;
pub mod frame;
pub mod math;
pub mod serializer;
pub mod slice;
pub mod value;

use builtins::Builtin;
use frame::{CallFrame, FrameFlags};
use slice::SliceIndex;
use value::{instance_key, Hash, List, Object, Value};

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// A named block of statements; `import`/`export` runs it with the package
/// name pushed so declared functions pick up the `pkg::` prefix.
pub struct Package {
    pub body: Rc<Vec<Node>>,
}

pub struct Function {
    pub name: String,
    pub parameters: Vec<(String, Value)>,
    pub default_parameters: HashSet<String>,
    pub body: Rc<Vec<Node>>,
    pub is_private: bool,
    pub is_static: bool,
}

pub struct Lambda {
    pub parameters: Vec<(String, Value)>,
    pub default_parameters: HashSet<String>,
    pub body: Rc<Vec<Node>>,
}

pub struct Class {
    pub name: String,
    pub base_class: Option<String>,
    pub methods: HashMap<String, Rc<Function>>,
}

enum Callable {
    Builtin(Builtin),
    Function,
    Lambda(String),
    Method(Rc<Function>),
}

pub struct Interpreter {
    call_stack: Vec<Rc<RefCell<CallFrame>>>,
    packages: HashMap<String, Package>,
    functions: HashMap<String, Rc<Function>>,
    /// Staging area for methods while a class declaration is evaluated.
    methods: HashMap<String, Rc<Function>>,
    lambdas: HashMap<String, Rc<Lambda>>,
    classes: HashMap<String, Class>,
    /// Binding name -> stable lambda id. Parameter passing records the
    /// mapping here instead of copying lambda bodies.
    lambda_table: HashMap<String, String>,
    class_stack: Vec<String>,
    package_stack: Vec<String>,
    silence: bool,
    out: Box<dyn Write>,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()))
    }

    pub fn with_output(out: Box<dyn Write>) -> Self {
        Self {
            call_stack: Vec::new(),
            packages: HashMap::new(),
            functions: HashMap::new(),
            methods: HashMap::new(),
            lambdas: HashMap::new(),
            classes: HashMap::new(),
            lambda_table: HashMap::new(),
            class_stack: Vec::new(),
            package_stack: Vec::new(),
            silence: false,
            out,
        }
    }

    pub fn call_stack_depth(&self) -> usize {
        self.call_stack.len()
    }

    pub fn root_frame_flags(&self) -> Option<FrameFlags> {
        self.call_stack.first().map(|frame| frame.borrow().flags)
    }

    pub fn interpret(&mut self, node: &Node) -> RuntimeResult<Value> {
        match node {
            Node::Program {
                statements,
                is_script,
                ..
            } => self.visit_program(statements, *is_script),
            Node::Literal { value, .. } => Ok(literal_value(value)),
            Node::ListLiteral { elements, .. } => self.visit_list_literal(elements),
            Node::RangeLiteral {
                start, end, span, ..
            } => self.visit_range_literal(start, end, *span),
            Node::HashLiteral { entries, span } => self.visit_hash_literal(entries, *span),
            Node::Identifier { name, .. } => self.visit_identifier(name),
            Node::SelfRef { name, span } => self.visit_self(name.as_deref(), *span),
            Node::MemberAccess {
                object,
                member,
                span,
            } => self.visit_member_access(object, member, *span),
            Node::Index {
                object,
                index,
                span,
            } => self.visit_index(object, index, *span),
            Node::Slice {
                object,
                start,
                stop,
                step,
                span,
            } => self.visit_slice(object, start, stop, step, *span),
            Node::Unary { op, operand, span } => {
                let value = self.interpret(operand)?;
                math::do_unary_op(*span, *op, &value)
            }
            Node::Binary {
                op,
                left,
                right,
                span,
            } => self.visit_binary(*op, left, right, *span),
            Node::Ternary {
                condition,
                then_expr,
                else_expr,
                ..
            } => {
                let test = self.interpret(condition)?;
                if math::is_truthy(&test) {
                    self.interpret(then_expr)
                } else {
                    self.interpret(else_expr)
                }
            }
            Node::Lambda {
                parameters, body, ..
            } => self.visit_lambda(parameters, body),
            Node::Assignment {
                target,
                op,
                value,
                span,
            } => self.visit_assignment(target, *op, value, *span),
            Node::IndexAssignment {
                object,
                op,
                value,
                span,
            } => self.visit_index_assignment(object, *op, value, *span),
            Node::MemberAssignment {
                object,
                member,
                op,
                value,
                span,
            } => self.visit_member_assignment(object, member, *op, value, *span),
            Node::FunctionDeclaration {
                name,
                parameters,
                body,
                is_private,
                is_static,
                ..
            } => self.visit_function_declaration(name, parameters, body, *is_private, *is_static),
            Node::FunctionCall {
                name,
                arguments,
                span,
            } => self.visit_function_call(name, arguments, *span),
            Node::MethodCall {
                object,
                method,
                arguments,
                span,
            } => self.visit_method_call(object, method, arguments, *span),
            Node::ClassDeclaration {
                name,
                base_class,
                methods,
                span,
            } => self.visit_class_declaration(name, base_class.as_deref(), methods, *span),
            Node::PackageDeclaration { name, body, .. } => {
                self.packages.insert(
                    name.clone(),
                    Package {
                        body: Rc::new(body.clone()),
                    },
                );
                Ok(Value::default())
            }
            Node::Import { target, span } | Node::Export { target, span } => {
                let package_name = self.interpret(target)?;
                self.import_package(&package_name, *span)
            }
            Node::If {
                condition,
                body,
                elsif_blocks,
                else_body,
                ..
            } => self.visit_if(condition, body, elsif_blocks, else_body),
            Node::Case {
                test,
                when_blocks,
                else_body,
                ..
            } => self.visit_case(test, when_blocks, else_body),
            Node::ForLoop {
                value_iterator,
                index_iterator,
                collection,
                body,
                span,
            } => self.visit_for(value_iterator, index_iterator.as_deref(), collection, body, *span),
            Node::WhileLoop {
                condition, body, ..
            } => self.visit_while(condition, body),
            Node::RepeatLoop {
                count,
                alias,
                body,
                span,
            } => self.visit_repeat(count, alias.as_deref(), body, *span),
            Node::Break { .. } | Node::Next { .. } => {
                // Recognized structurally by the enclosing loop.
                Ok(Value::default())
            }
            Node::Try {
                try_body,
                catch,
                finally_body,
                ..
            } => self.visit_try(try_body, catch.as_ref(), finally_body),
            Node::Return {
                value,
                condition,
                ..
            } => self.visit_return(value.as_deref(), condition.as_deref()),
            Node::Throw {
                value,
                condition,
                span,
            } => self.visit_throw(value.as_deref(), condition.as_deref(), *span),
            Node::Exit {
                value, condition, ..
            } => self.visit_exit(value.as_deref(), condition.as_deref()),
            Node::Print {
                expression,
                newline,
                ..
            } => self.visit_print(expression, *newline),
        }
    }

    fn top(&self) -> Rc<RefCell<CallFrame>> {
        self.call_stack
            .last()
            .expect("the call stack always holds a frame during evaluation")
            .clone()
    }

    /// Snapshot the caller into a fresh frame. Non-method calls copy the
    /// caller's locals, which is what gives ordinary calls closure over the
    /// calling scope; method calls start with empty locals but inherit the
    /// object context.
    fn create_frame(&self, is_method_invocation: bool) -> CallFrame {
        let caller = self.top();
        let caller = caller.borrow();
        let mut frame = CallFrame::new();
        if !is_method_invocation {
            frame.variables = caller.variables.clone();
        }
        if caller.in_object_context() {
            if let Some(object) = caller.object_context() {
                frame.set_object_context(object);
            }
        }
        if caller.is_flag_set(FrameFlags::IN_TRY) {
            frame.set_flag(FrameFlags::IN_TRY);
        }
        if caller.is_flag_set(FrameFlags::SUB_FRAME) {
            frame.set_flag(FrameFlags::SUB_FRAME);
        }
        frame
    }

    /// Pop the top frame: the callee's return value lands in the caller's
    /// return slot, and names shared between both frames are copied back.
    fn drop_frame(&mut self) {
        let Some(frame) = self.call_stack.pop() else {
            return;
        };
        let (return_value, variables) = {
            let frame = frame.borrow();
            (frame.return_value.clone(), frame.variables.clone())
        };
        if let Some(caller) = self.call_stack.last() {
            let mut caller = caller.borrow_mut();
            caller.return_value = return_value;
            if caller.is_flag_set(FrameFlags::SUB_FRAME) {
                caller.set_flag(FrameFlags::RETURN);
            }
            for (name, value) in variables {
                if caller.variables.contains_key(&name) {
                    caller.variables.insert(name, value);
                }
            }
        }
    }

    fn visit_program(&mut self, statements: &[Node], is_script: bool) -> RuntimeResult<Value> {
        if !is_script || self.call_stack.is_empty() {
            let mut frame = CallFrame::new();
            frame
                .variables
                .insert("global".to_string(), Value::empty_hash());
            self.call_stack.push(Rc::new(RefCell::new(frame)));
        }
        let mut result = Value::default();
        for statement in statements {
            result = self.interpret(statement)?;
        }
        Ok(result)
    }

    fn visit_list_literal(&mut self, elements: &[Node]) -> RuntimeResult<Value> {
        let mut values = Vec::with_capacity(elements.len());
        for element in elements {
            values.push(self.interpret(element)?);
        }
        Ok(Value::list(values))
    }

    fn visit_range_literal(&mut self, start: &Node, end: &Node, span: Span) -> RuntimeResult<Value> {
        let start_value = self.interpret(start)?;
        let end_value = self.interpret(end)?;
        let (Value::Int(start), Value::Int(stop)) = (start_value, end_value) else {
            return Err(RuntimeError::Range {
                span,
                message: "Range value must be an integer.".into(),
            });
        };
        let step = if stop < start { -1 } else { 1 };
        let count = start.abs_diff(stop) as usize + 1;
        let mut elements = Vec::with_capacity(count);
        let mut i = start;
        while i != stop {
            elements.push(Value::Int(i));
            i += step;
        }
        elements.push(Value::Int(stop));
        Ok(Value::list(elements))
    }

    fn visit_hash_literal(&mut self, entries: &[(Node, Node)], span: Span) -> RuntimeResult<Value> {
        let mut hash = Hash::default();
        for (key_node, value_node) in entries {
            let key = self.interpret(key_node)?;
            let value = self.interpret(value_node)?;
            let Value::String(key) = key else {
                return Err(RuntimeError::Syntax {
                    span,
                    message: "Hash key must be a string value.".into(),
                });
            };
            hash.insert(key, value);
        }
        Ok(Value::Hash(Rc::new(RefCell::new(hash))))
    }

    /// Resolution order: frame local, class registry, lambda registry, then
    /// the lambda indirection table. Unresolved names yield integer zero.
    fn visit_identifier(&mut self, name: &str) -> RuntimeResult<Value> {
        let frame = self.top();
        {
            let frame = frame.borrow();
            if frame.in_object_context() && name.starts_with('@') {
                let object = frame.object_context().expect("object context");
                let value = object
                    .borrow()
                    .instance_variables
                    .get(instance_key(name))
                    .cloned();
                return Ok(value.unwrap_or_default());
            }
            if let Some(value) = frame.variables.get(name) {
                return Ok(value.clone());
            }
        }
        if self.classes.contains_key(name) {
            return Ok(Value::ClassRef(name.to_string()));
        }
        if self.lambdas.contains_key(name) {
            return Ok(Value::LambdaRef(name.to_string()));
        }
        if let Some(mapped) = self.lambda_table.get(name) {
            if self.lambdas.contains_key(mapped) {
                return Ok(Value::LambdaRef(mapped.clone()));
            }
        }
        Ok(Value::default())
    }

    fn visit_self(&mut self, name: Option<&str>, span: Span) -> RuntimeResult<Value> {
        let frame = self.top();
        let object = {
            let frame = frame.borrow();
            if !frame.in_object_context() {
                return Err(RuntimeError::InvalidContext {
                    span,
                    message: "Invalid context for `self`.".into(),
                });
            }
            frame.object_context().expect("object context")
        };
        match name {
            None => Ok(Value::Object(object)),
            Some(member) => {
                let mut object = object.borrow_mut();
                Ok(object
                    .instance_variables
                    .entry(member.to_string())
                    .or_default()
                    .clone())
            }
        }
    }

    fn visit_member_access(&mut self, object: &Node, member: &str, span: Span) -> RuntimeResult<Value> {
        let object = self.interpret(object)?;
        if let Value::Hash(hash) = object {
            let value = hash.borrow().get(member);
            return value.ok_or_else(|| RuntimeError::HashKey {
                span,
                key: member.to_string(),
            });
        }
        Ok(Value::default())
    }

    fn visit_binary(&mut self, op: BinOp, left: &Node, right: &Node, span: Span) -> RuntimeResult<Value> {
        let left = self.interpret(left)?;
        // Short-circuit before the right operand is evaluated.
        if op == BinOp::And && !math::is_truthy(&left) {
            return Ok(Value::Bool(false));
        }
        if op == BinOp::Or && math::is_truthy(&left) {
            return Ok(Value::Bool(true));
        }
        let right = self.interpret(right)?;
        math::do_binary_op(span, op, &left, &right)
    }

    fn visit_print(&mut self, expression: &Node, newline: bool) -> RuntimeResult<Value> {
        let value = self.interpret(expression)?;
        if !self.silence {
            let text = serializer::serialize(&value);
            let _ = if newline {
                writeln!(self.out, "{text}")
            } else {
                write!(self.out, "{text}")
            };
            let _ = self.out.flush();
        }
        Ok(Value::default())
    }

    fn visit_if(
        &mut self,
        condition: &Node,
        body: &[Node],
        elsif_blocks: &[(Node, Vec<Node>)],
        else_body: &[Node],
    ) -> RuntimeResult<Value> {
        let frame = self.top();
        let condition = self.interpret(condition)?;
        if math::is_truthy(&condition) {
            for statement in body {
                self.interpret(statement)?;
                if frame.borrow().is_flag_set(FrameFlags::RETURN) {
                    break;
                }
            }
            return Ok(Value::default());
        }
        for (elsif_condition, elsif_body) in elsif_blocks {
            let condition = self.interpret(elsif_condition)?;
            if math::is_truthy(&condition) {
                for statement in elsif_body {
                    self.interpret(statement)?;
                    if frame.borrow().is_flag_set(FrameFlags::RETURN) {
                        break;
                    }
                }
                return Ok(Value::default());
            }
        }
        for statement in else_body {
            self.interpret(statement)?;
            if frame.borrow().is_flag_set(FrameFlags::RETURN) {
                break;
            }
        }
        Ok(Value::default())
    }

    fn visit_case(
        &mut self,
        test: &Node,
        when_blocks: &[(Node, Vec<Node>)],
        else_body: &[Node],
    ) -> RuntimeResult<Value> {
        let test_value = self.interpret(test)?;
        for (condition, body) in when_blocks {
            let when_value = self.interpret(condition)?;
            if math::values_equal(&test_value, &when_value) {
                for statement in body {
                    self.interpret(statement)?;
                }
                return Ok(Value::default());
            }
        }
        for statement in else_body {
            self.interpret(statement)?;
        }
        Ok(Value::default())
    }

    fn visit_for(
        &mut self,
        value_iterator: &str,
        index_iterator: Option<&str>,
        collection: &Node,
        body: &[Node],
        span: Span,
    ) -> RuntimeResult<Value> {
        let collection = self.interpret(collection)?;
        match collection {
            Value::List(list) => {
                let elements = list.borrow().elements.clone();
                let bindings: Vec<(Value, Option<Value>)> = elements
                    .into_iter()
                    .enumerate()
                    .map(|(i, element)| (element, Some(Value::Int(i as i64))))
                    .collect();
                self.run_for_loop(value_iterator, index_iterator, &bindings, body)
            }
            Value::Hash(hash) => {
                // The value iterator receives the key and the optional
                // index iterator receives the value, in insertion order.
                let bindings: Vec<(Value, Option<Value>)> = hash
                    .borrow()
                    .entries
                    .iter()
                    .map(|(key, value)| (Value::String(key.clone()), Some(value.clone())))
                    .collect();
                self.run_for_loop(value_iterator, index_iterator, &bindings, body)
            }
            _ => Err(RuntimeError::InvalidOperation {
                span,
                message: "Expected a list value in for-loop.".into(),
            }),
        }
    }

    fn run_for_loop(
        &mut self,
        value_iterator: &str,
        index_iterator: Option<&str>,
        bindings: &[(Value, Option<Value>)],
        body: &[Node],
    ) -> RuntimeResult<Value> {
        let frame = self.top();
        let mut result = Value::default();
        let mut fall_out = false;
        for (value, index) in bindings {
            if fall_out {
                break;
            }
            {
                let mut frame = frame.borrow_mut();
                frame
                    .variables
                    .insert(value_iterator.to_string(), value.clone());
                if let (Some(name), Some(index)) = (index_iterator, index) {
                    frame.variables.insert(name.to_string(), index.clone());
                }
            }
            match self.run_loop_body(&frame, body, &mut result)? {
                LoopSignal::None => {}
                LoopSignal::Break | LoopSignal::Return => fall_out = true,
            }
        }
        let mut frame = frame.borrow_mut();
        frame.variables.remove(value_iterator);
        if let Some(name) = index_iterator {
            frame.variables.remove(name);
        }
        Ok(result)
    }

    /// One pass over a loop body. `break` and `next` are recognized
    /// structurally among the body's own statements; a `when` guard gates
    /// either. The `Return` flag terminates iteration immediately.
    fn run_loop_body(
        &mut self,
        frame: &Rc<RefCell<CallFrame>>,
        body: &[Node],
        result: &mut Value,
    ) -> RuntimeResult<LoopSignal> {
        for statement in body {
            match statement {
                Node::Next { condition, .. } => {
                    if self.guard_passes(condition.as_deref())? {
                        return Ok(LoopSignal::None);
                    }
                }
                Node::Break { condition, .. } => {
                    if self.guard_passes(condition.as_deref())? {
                        return Ok(LoopSignal::Break);
                    }
                }
                _ => {
                    *result = self.interpret(statement)?;
                    if frame.borrow().is_flag_set(FrameFlags::RETURN) {
                        return Ok(LoopSignal::Return);
                    }
                }
            }
        }
        Ok(LoopSignal::None)
    }

    fn guard_passes(&mut self, condition: Option<&Node>) -> RuntimeResult<bool> {
        match condition {
            None => Ok(true),
            Some(condition) => {
                let value = self.interpret(condition)?;
                Ok(math::is_truthy(&value))
            }
        }
    }

    fn visit_while(&mut self, condition: &Node, body: &[Node]) -> RuntimeResult<Value> {
        let frame = self.top();
        let mut result = Value::default();
        loop {
            let test = self.interpret(condition)?;
            if !math::is_truthy(&test) {
                break;
            }
            match self.run_loop_body(&frame, body, &mut result)? {
                LoopSignal::None => {}
                LoopSignal::Break | LoopSignal::Return => return Ok(result),
            }
        }
        Ok(result)
    }

    fn visit_repeat(
        &mut self,
        count: &Node,
        alias: Option<&str>,
        body: &[Node],
        span: Span,
    ) -> RuntimeResult<Value> {
        let count_value = self.interpret(count)?;
        let Value::Int(count) = count_value else {
            return Err(RuntimeError::InvalidOperation {
                span,
                message: "Repeat loop count must be an integer.".into(),
            });
        };
        let frame = self.top();
        let mut result = Value::default();
        let mut i: i64 = 1;
        while i <= count {
            if let Some(alias) = alias {
                frame
                    .borrow_mut()
                    .variables
                    .insert(alias.to_string(), Value::Int(i));
            }
            match self.run_loop_body(&frame, body, &mut result)? {
                LoopSignal::None => {}
                LoopSignal::Break | LoopSignal::Return => break,
            }
            i += 1;
        }
        if let Some(alias) = alias {
            frame.borrow_mut().variables.remove(alias);
        }
        Ok(result)
    }

    fn visit_try(
        &mut self,
        try_body: &[Node],
        catch: Option<&crate::ast::CatchClause>,
        finally_body: &[Node],
    ) -> RuntimeResult<Value> {
        let mut failure = None;
        for statement in try_body {
            if let Err(error) = self.interpret(statement) {
                failure = Some(error);
                break;
            }
        }
        if let Some(error) = failure {
            if let Some(catch) = catch {
                let frame = self.top();
                {
                    let mut frame = frame.borrow_mut();
                    frame.set_error_state(error.clone());
                    if let Some(name) = &catch.error_type_name {
                        frame.variables.insert(
                            name.clone(),
                            Value::String(error.error_type().to_string()),
                        );
                    }
                    if let Some(name) = &catch.error_message_name {
                        frame
                            .variables
                            .insert(name.clone(), Value::String(error.message()));
                    }
                }
                // A failure inside the catch body propagates immediately;
                // the outer handler deals with it.
                for statement in &catch.body {
                    self.interpret(statement)?;
                }
                let mut frame = frame.borrow_mut();
                if let Some(name) = &catch.error_type_name {
                    frame.variables.remove(name);
                }
                if let Some(name) = &catch.error_message_name {
                    frame.variables.remove(name);
                }
                frame.clear_error_state();
            }
        }
        for statement in finally_body {
            self.interpret(statement)?;
        }
        Ok(Value::default())
    }

    fn visit_return(
        &mut self,
        value: Option<&Node>,
        condition: Option<&Node>,
    ) -> RuntimeResult<Value> {
        let return_value = match value {
            Some(node) => self.interpret(node)?,
            None => Value::default(),
        };
        if self.guard_passes(condition)? {
            let frame = self.top();
            let mut frame = frame.borrow_mut();
            frame.set_flag(FrameFlags::RETURN);
            frame.return_value = return_value.clone();
        }
        Ok(return_value)
    }

    fn visit_throw(
        &mut self,
        value: Option<&Node>,
        condition: Option<&Node>,
        span: Span,
    ) -> RuntimeResult<Value> {
        let mut error_type = "VesperError".to_string();
        let mut message = String::new();
        if let Some(node) = value {
            match self.interpret(node)? {
                Value::Hash(hash) => {
                    let hash = hash.borrow();
                    if let Some(Value::String(t)) = hash.get("error") {
                        error_type = t;
                    }
                    if let Some(Value::String(m)) = hash.get("message") {
                        message = m;
                    }
                }
                Value::String(s) => message = s,
                _ => {}
            }
        }
        if self.guard_passes(condition)? {
            return Err(RuntimeError::Thrown {
                span,
                error_type,
                message,
            });
        }
        Ok(Value::default())
    }

    fn visit_exit(
        &mut self,
        value: Option<&Node>,
        condition: Option<&Node>,
    ) -> RuntimeResult<Value> {
        let exit_value = match value {
            Some(node) => self.interpret(node)?,
            None => Value::default(),
        };
        let code = match exit_value {
            Value::Int(code) => code,
            _ => 1,
        };
        if self.guard_passes(condition)? {
            std::process::exit(code as i32);
        }
        Ok(Value::default())
    }

    fn visit_lambda(&mut self, parameters: &[Parameter], body: &[Node]) -> RuntimeResult<Value> {
        let (parameters, default_parameters) = self.evaluate_parameters(parameters)?;
        let id = temporary_id();
        self.lambdas.insert(
            id.clone(),
            Rc::new(Lambda {
                parameters,
                default_parameters,
                body: Rc::new(body.to_vec()),
            }),
        );
        self.lambda_table.insert(id.clone(), id.clone());
        Ok(Value::LambdaRef(id))
    }

    fn evaluate_parameters(
        &mut self,
        parameters: &[Parameter],
    ) -> RuntimeResult<(Vec<(String, Value)>, HashSet<String>)> {
        let mut evaluated = Vec::with_capacity(parameters.len());
        let mut defaults = HashSet::new();
        for parameter in parameters {
            let value = match &parameter.default {
                Some(node) => {
                    defaults.insert(parameter.name.clone());
                    self.interpret(node)?
                }
                None => Value::default(),
            };
            evaluated.push((parameter.name.clone(), value));
        }
        Ok((evaluated, defaults))
    }

    fn visit_function_declaration(
        &mut self,
        name: &str,
        parameters: &[Parameter],
        body: &[Node],
        is_private: bool,
        is_static: bool,
    ) -> RuntimeResult<Value> {
        let name = self.qualified_name(name);
        let (parameters, default_parameters) = self.evaluate_parameters(parameters)?;
        let function = Rc::new(Function {
            name: name.clone(),
            parameters,
            default_parameters,
            body: Rc::new(body.to_vec()),
            is_private,
            is_static,
        });
        if self.class_stack.is_empty() {
            self.functions.insert(name, function);
        } else {
            self.methods.insert(name, function);
        }
        Ok(Value::default())
    }

    fn qualified_name(&self, name: &str) -> String {
        match self.package_stack.last() {
            Some(package) => format!("{package}::{name}"),
            None => name.to_string(),
        }
    }

    fn visit_class_declaration(
        &mut self,
        name: &str,
        base_class: Option<&str>,
        methods: &[Node],
        span: Span,
    ) -> RuntimeResult<Value> {
        if let Some(base) = base_class {
            if !self.classes.contains_key(base) {
                return Err(RuntimeError::ClassUndefined {
                    span,
                    name: base.to_string(),
                });
            }
        }
        self.class_stack.push(name.to_string());
        let mut class = Class {
            name: name.to_string(),
            base_class: base_class.map(str::to_string),
            methods: HashMap::new(),
        };
        for method in methods {
            let Node::FunctionDeclaration {
                name: method_name, ..
            } = method
            else {
                continue;
            };
            self.interpret(method)?;
            let staged_key = self.qualified_name(method_name);
            if let Some(function) = self.methods.remove(&staged_key) {
                // The declared constructor installs as `new`.
                let install_name = if method_name == "ctor" {
                    "new".to_string()
                } else {
                    method_name.clone()
                };
                class.methods.insert(install_name, function);
            }
        }
        self.classes.insert(class.name.clone(), class);
        self.class_stack.pop();
        self.methods.clear();
        Ok(Value::default())
    }

    /// Resolution order for a bare callable name: top-level functions, the
    /// lambda registry, the builtin name set, the lambda indirection table,
    /// and finally the current object's method set.
    fn get_callable(&self, span: Span, name: &str) -> RuntimeResult<Callable> {
        if self.functions.contains_key(name) {
            return Ok(Callable::Function);
        }
        if self.lambdas.contains_key(name) {
            return Ok(Callable::Lambda(name.to_string()));
        }
        if let Some(builtin) = Builtin::from_name(name) {
            if builtin.is_free_function() {
                return Ok(Callable::Builtin(builtin));
            }
        }
        if let Some(mapped) = self.lambda_table.get(name) {
            return Ok(Callable::Lambda(mapped.clone()));
        }
        let frame = self.top();
        let in_object = frame.borrow().in_object_context();
        if in_object {
            let object = frame.borrow().object_context().expect("object context");
            let class_name = object.borrow().class_name.clone();
            if let Some(function) = self.resolve_method(span, &class_name, name)? {
                return Ok(Callable::Method(function));
            }
        }
        Err(RuntimeError::FunctionUndefined {
            span,
            name: name.to_string(),
        })
    }

    /// Walks the base-class chain; base methods are never copied down.
    fn resolve_method(
        &self,
        span: Span,
        class_name: &str,
        method: &str,
    ) -> RuntimeResult<Option<Rc<Function>>> {
        let mut current = Some(class_name.to_string());
        while let Some(name) = current {
            let Some(class) = self.classes.get(&name) else {
                return Err(RuntimeError::ClassUndefined { span, name });
            };
            if let Some(function) = class.methods.get(method) {
                return Ok(Some(function.clone()));
            }
            current = class.base_class.clone();
        }
        Ok(None)
    }

    fn visit_function_call(
        &mut self,
        name: &str,
        arguments: &[Node],
        span: Span,
    ) -> RuntimeResult<Value> {
        match self.get_callable(span, name)? {
            Callable::Builtin(builtin) => self.call_builtin_function(builtin, arguments, span),
            Callable::Function => {
                let function = self.functions.get(name).cloned().expect("checked above");
                self.invoke_callable(&function.as_callable(), arguments, span, name, false)
            }
            Callable::Lambda(target) => {
                let target = if self.lambdas.contains_key(&target) {
                    target
                } else {
                    self.lambda_table.get(&target).cloned().unwrap_or(target)
                };
                let Some(lambda) = self.lambdas.get(&target).cloned() else {
                    return Err(RuntimeError::FunctionUndefined {
                        span,
                        name: target,
                    });
                };
                self.invoke_callable(&lambda.as_callable(), arguments, span, name, false)
            }
            Callable::Method(function) => {
                let frame = self.top();
                if !frame.borrow().in_object_context() {
                    return Err(RuntimeError::InvalidContext {
                        span,
                        message: "Invalid context for method invocation.".into(),
                    });
                }
                self.invoke_callable(&function.as_callable(), arguments, span, name, true)
            }
        }
    }

    fn visit_method_call(
        &mut self,
        object: &Node,
        method: &str,
        arguments: &[Node],
        span: Span,
    ) -> RuntimeResult<Value> {
        let object_value = self.interpret(object)?;
        match object_value {
            Value::Object(obj) => self.call_object_method(obj, method, arguments, span),
            Value::ClassRef(class_name) => {
                self.call_class_method(&class_name, method, arguments, span)
            }
            receiver => {
                let Some(builtin) = Builtin::from_name(method) else {
                    return Err(RuntimeError::UnknownBuiltin {
                        span,
                        name: method.to_string(),
                    });
                };
                let args = self.evaluate_arguments(arguments)?;
                if builtin.is_list_special() {
                    self.interpret_list_builtin(span, &receiver, builtin, args)
                } else {
                    builtins::execute(span, builtin, &receiver, &args)
                }
            }
        }
    }

    fn evaluate_arguments(&mut self, arguments: &[Node]) -> RuntimeResult<Vec<Value>> {
        let mut values = Vec::with_capacity(arguments.len());
        for argument in arguments {
            values.push(self.interpret(argument)?);
        }
        Ok(values)
    }

    fn call_object_method(
        &mut self,
        object: Rc<RefCell<Object>>,
        method: &str,
        arguments: &[Node],
        span: Span,
    ) -> RuntimeResult<Value> {
        let class_name = object.borrow().class_name.clone();
        let function = self
            .resolve_method(span, &class_name, method)?
            .ok_or_else(|| RuntimeError::UnimplementedMethod {
                span,
                class_name: class_name.clone(),
                method: method.to_string(),
            })?;
        if function.is_private {
            return Err(RuntimeError::InvalidContext {
                span,
                message: "Cannot invoke private method outside of class.".into(),
            });
        }
        let is_ctor = method == "new";
        let frame = self.top();
        let previous_context = {
            let frame = frame.borrow();
            if frame.in_object_context() {
                frame.object_context()
            } else {
                None
            }
        };
        frame.borrow_mut().set_object_context(object.clone());
        let result = self.invoke_callable(&function.as_callable(), arguments, span, method, true)?;
        if let Some(previous) = previous_context {
            frame.borrow_mut().set_object_context(previous);
        }
        if is_ctor {
            return Ok(Value::Object(object));
        }
        Ok(result)
    }

    fn call_class_method(
        &mut self,
        class_name: &str,
        method: &str,
        arguments: &[Node],
        span: Span,
    ) -> RuntimeResult<Value> {
        if !self.classes.contains_key(class_name) {
            return Err(RuntimeError::ClassUndefined {
                span,
                name: class_name.to_string(),
            });
        }
        let is_ctor = method == "new";
        let function = self.resolve_method(span, class_name, method)?;
        let Some(function) = function else {
            if is_ctor {
                // Default constructor: a fresh object of this class.
                let object = Object {
                    class_name: class_name.to_string(),
                    ..Object::default()
                };
                return Ok(Value::Object(Rc::new(RefCell::new(object))));
            }
            return Err(RuntimeError::UnimplementedMethod {
                span,
                class_name: class_name.to_string(),
                method: method.to_string(),
            });
        };
        if !function.is_static && !is_ctor {
            return Err(RuntimeError::InvalidContext {
                span,
                message: "Cannot invoke non-static method on class.".into(),
            });
        }
        if is_ctor {
            let object = Rc::new(RefCell::new(Object {
                class_name: class_name.to_string(),
                ..Object::default()
            }));
            let frame = self.top();
            frame.borrow_mut().set_object_context(object.clone());
            self.invoke_callable(&function.as_callable(), arguments, span, method, true)?;
            frame.borrow_mut().clear_flag(FrameFlags::IN_OBJECT);
            return Ok(Value::Object(object));
        }
        self.invoke_callable(&function.as_callable(), arguments, span, method, true)
    }

    /// Shared call path for functions, methods, and lambdas: bind
    /// parameters in the caller's context, push a frame, run the body until
    /// the `Return` flag or end of body, then pop.
    fn invoke_callable(
        &mut self,
        callable: &CallableParts,
        arguments: &[Node],
        span: Span,
        name: &str,
        is_method_invocation: bool,
    ) -> RuntimeResult<Value> {
        let mut frame = self.create_frame(is_method_invocation);
        for (i, (parameter, default)) in callable.parameters.iter().enumerate() {
            let argument = if i < arguments.len() {
                self.interpret(&arguments[i])?
            } else if callable.default_parameters.contains(parameter) {
                default.clone()
            } else {
                return Err(RuntimeError::ParameterCountMismatch {
                    span,
                    name: name.to_string(),
                });
            };
            if let Value::LambdaRef(lambda_id) = &argument {
                self.lambda_table
                    .insert(parameter.clone(), lambda_id.clone());
            } else {
                frame.variables.insert(parameter.clone(), argument);
            }
        }
        let frame = Rc::new(RefCell::new(frame));
        self.call_stack.push(frame.clone());
        let mut result = Value::default();
        for statement in callable.body.iter() {
            match self.interpret(statement) {
                Ok(value) => result = value,
                Err(error) => {
                    self.drop_frame();
                    return Err(error);
                }
            }
            if frame.borrow().is_flag_set(FrameFlags::RETURN) {
                result = frame.borrow().return_value.clone();
                break;
            }
        }
        self.drop_frame();
        Ok(result)
    }

    fn call_builtin_function(
        &mut self,
        builtin: Builtin,
        arguments: &[Node],
        span: Span,
    ) -> RuntimeResult<Value> {
        let args = self.evaluate_arguments(arguments)?;
        match builtin {
            Builtin::Input => {
                if args.len() > 1 {
                    return Err(RuntimeError::BuiltinUnexpectedArgument {
                        span,
                        name: builtin.name().to_string(),
                    });
                }
                if let Some(prompt) = args.first() {
                    let _ = write!(self.out, "{}", serializer::serialize(prompt));
                    let _ = self.out.flush();
                }
                let mut line = String::new();
                let _ = io::stdin().read_line(&mut line);
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
                Ok(Value::String(line))
            }
            Builtin::Silent => {
                builtins::ensure_arity(span, builtin, &args, 1)?;
                let Value::Bool(flag) = args[0] else {
                    return Err(RuntimeError::Conversion {
                        span,
                        message: "Expected a Boolean value.".into(),
                    });
                };
                self.silence = flag;
                Ok(Value::Bool(flag))
            }
            Builtin::Serialize => {
                builtins::ensure_arity(span, builtin, &args, 1)?;
                Ok(Value::String(serializer::serialize_quoted(&args[0])))
            }
            Builtin::Deserialize => {
                builtins::ensure_arity(span, builtin, &args, 1)?;
                let Value::String(text) = &args[0] else {
                    return Err(RuntimeError::Conversion {
                        span,
                        message: "Expected a String value.".into(),
                    });
                };
                self.interpolate_string(span, text)
            }
            Builtin::RList => {
                builtins::ensure_arity(span, builtin, &args, 0)?;
                Ok(self.reflect_rlist())
            }
            other => Err(RuntimeError::UnknownBuiltin {
                span,
                name: other.name().to_string(),
            }),
        }
    }

    /// `deserialize` runs the serialized text back through the language
    /// pipeline: lex, parse as a script, interpret.
    fn interpolate_string(&mut self, span: Span, input: &str) -> RuntimeResult<Value> {
        let tokens = lexer::lex(input).map_err(|error| RuntimeError::Syntax {
            span,
            message: error.to_string(),
        })?;
        let program = parser::parse_tokens(tokens, true).map_err(|error| RuntimeError::Syntax {
            span,
            message: error.to_string(),
        })?;
        self.interpret(&program)
    }

    /// Snapshot of the registries and the call stack:
    /// `{packages, classes, functions, stack}` with sorted name lists; the
    /// stack lists frames bottom-first (top of stack last), each frame a
    /// hash of its variables sorted by name.
    fn reflect_rlist(&self) -> Value {
        fn sorted_names<'a>(names: impl Iterator<Item = &'a String>) -> Value {
            let mut names: Vec<&String> = names.collect();
            names.sort();
            Value::list(names.into_iter().map(|n| Value::String(n.clone())).collect())
        }

        let mut stack_frames = Vec::with_capacity(self.call_stack.len());
        for frame in &self.call_stack {
            let frame = frame.borrow();
            let mut variables: Vec<(&String, &Value)> = frame.variables.iter().collect();
            variables.sort_by(|a, b| a.0.cmp(b.0));
            let variable_list = variables
                .into_iter()
                .map(|(name, value)| {
                    let mut entry = Hash::default();
                    entry.insert(name.clone(), value.clone());
                    Value::Hash(Rc::new(RefCell::new(entry)))
                })
                .collect();
            let mut frame_hash = Hash::default();
            frame_hash.insert("variables".to_string(), Value::list(variable_list));
            stack_frames.push(Value::Hash(Rc::new(RefCell::new(frame_hash))));
        }

        let mut rlist = Hash::default();
        rlist.insert("packages".to_string(), sorted_names(self.packages.keys()));
        rlist.insert("classes".to_string(), sorted_names(self.classes.keys()));
        rlist.insert("functions".to_string(), sorted_names(self.functions.keys()));
        rlist.insert("stack".to_string(), Value::list(stack_frames));
        Value::Hash(Rc::new(RefCell::new(rlist)))
    }

    fn import_package(&mut self, package_name: &Value, span: Span) -> RuntimeResult<Value> {
        let Value::String(name) = package_name else {
            return Err(RuntimeError::InvalidOperation {
                span,
                message: "Expected the name of a package to import.".into(),
            });
        };
        if !self.packages.contains_key(name) {
            if is_script_path(name) {
                return self.import_external(name, span);
            }
            return Err(RuntimeError::PackageUndefined {
                span,
                name: name.clone(),
            });
        }
        debug!(package = %name, "importing package");
        self.package_stack.push(name.clone());
        let body = self.packages.get(name).expect("checked above").body.clone();
        for statement in body.iter() {
            if let Err(error) = self.interpret(statement) {
                self.package_stack.pop();
                return Err(error);
            }
        }
        self.package_stack.pop();
        Ok(Value::default())
    }

    fn import_external(&mut self, path: &str, span: Span) -> RuntimeResult<Value> {
        let content = std::fs::read_to_string(path).unwrap_or_default();
        if content.is_empty() {
            return Ok(Value::default());
        }
        debug!(%path, "importing external script");
        let tokens = lexer::lex(&content).map_err(|error| RuntimeError::Syntax {
            span,
            message: error.to_string(),
        })?;
        let program = parser::parse_tokens(tokens, true).map_err(|error| RuntimeError::Syntax {
            span,
            message: error.to_string(),
        })?;
        self.interpret(&program)?;
        Ok(Value::default())
    }

    fn visit_assignment(
        &mut self,
        target: &AssignTarget,
        op: AssignOp,
        value: &Node,
        span: Span,
    ) -> RuntimeResult<Value> {
        let value = self.interpret(value)?;
        let frame = self.top();
        match op {
            AssignOp::Assign => {
                let name = match target {
                    AssignTarget::Name(name) => name,
                    AssignTarget::SelfMember(name) => name,
                };
                if name == "global" {
                    return Err(RuntimeError::IllegalName {
                        span,
                        name: name.clone(),
                    });
                }
                // A lambda gains the new name while staying the same
                // callable: the registry entry moves under the new key.
                if let Value::LambdaRef(lambda_id) = &value {
                    if let Some(lambda) = self.lambdas.remove(lambda_id) {
                        self.lambdas.insert(name.clone(), lambda);
                    }
                    return Ok(value);
                }
                let is_self_target = matches!(target, AssignTarget::SelfMember(_));
                let frame_ref = frame.borrow();
                if frame_ref.in_object_context() && (is_self_target || name.starts_with('@')) {
                    let object = frame_ref.object_context().expect("object context");
                    drop(frame_ref);
                    object
                        .borrow_mut()
                        .instance_variables
                        .insert(instance_key(name).to_string(), value.clone());
                    return Ok(value);
                }
                drop(frame_ref);
                if let Value::Object(object) = &value {
                    object.borrow_mut().identifier = Some(name.clone());
                }
                frame
                    .borrow_mut()
                    .variables
                    .insert(name.clone(), value.clone());
                Ok(value)
            }
            _ => self.compound_assignment(target, op, value, &frame, span),
        }
    }

    /// Compound assignment reads the current binding — local first, then
    /// the instance variable when in an object context — and writes back.
    fn compound_assignment(
        &mut self,
        target: &AssignTarget,
        op: AssignOp,
        value: Value,
        frame: &Rc<RefCell<CallFrame>>,
        span: Span,
    ) -> RuntimeResult<Value> {
        let name = match target {
            AssignTarget::Name(name) => name,
            AssignTarget::SelfMember(name) => name,
        };
        let is_self_target = matches!(target, AssignTarget::SelfMember(_));

        if !is_self_target && frame.borrow().has_variable(name) {
            let old = frame
                .borrow()
                .variables
                .get(name)
                .cloned()
                .expect("checked above");
            let updated = apply_compound_op(span, op, &old, &value)?;
            frame
                .borrow_mut()
                .variables
                .insert(name.clone(), updated.clone());
            return Ok(updated);
        }

        let in_object = frame.borrow().in_object_context();
        if in_object {
            let object = frame.borrow().object_context().expect("object context");
            let key = instance_key(name).to_string();
            let old = object.borrow().instance_variables.get(&key).cloned();
            let Some(old) = old else {
                return Err(RuntimeError::VariableUndefined {
                    span,
                    name: name.clone(),
                });
            };
            let updated = apply_compound_op(span, op, &old, &value)?;
            object
                .borrow_mut()
                .instance_variables
                .insert(key, updated.clone());
            return Ok(updated);
        }

        Err(RuntimeError::VariableUndefined {
            span,
            name: name.clone(),
        })
    }

    fn visit_index_assignment(
        &mut self,
        object: &Node,
        op: AssignOp,
        value: &Node,
        span: Span,
    ) -> RuntimeResult<Value> {
        let new_value = self.interpret(value)?;
        match object {
            Node::Slice {
                object: sliced,
                start,
                stop,
                step,
                span: slice_span,
            } => {
                let base = self.interpret(sliced)?;
                if let (Value::List(target), Value::List(rhs)) = (&base, &new_value) {
                    let slice = self.build_slice(
                        *slice_span,
                        start.as_deref(),
                        stop.as_deref(),
                        step.as_deref(),
                        &base,
                    )?;
                    // Snapshot the right-hand side so `x[a:b] = x` works.
                    let rhs = List {
                        elements: rhs.borrow().elements.clone(),
                    };
                    slice::update_list_slice(
                        *slice_span,
                        false,
                        &mut target.borrow_mut(),
                        &slice,
                        &rhs,
                    )?;
                }
                Ok(Value::default())
            }
            Node::Index { .. } => {
                self.assign_into(object, op, new_value)?;
                Ok(Value::default())
            }
            _ => Err(RuntimeError::Index {
                span,
                message: "Invalid index expression.".into(),
            }),
        }
    }

    /// Store into `container[index]`. Nested targets recurse through the
    /// read path: the inner legs resolve as ordinary index reads, then the
    /// final leg stores. Negative list indices wrap once from the length.
    fn assign_into(&mut self, target: &Node, op: AssignOp, new_value: Value) -> RuntimeResult<()> {
        let Node::Index {
            object,
            index,
            span,
        } = target
        else {
            return Err(RuntimeError::Index {
                span: target.span(),
                message: "Invalid index expression.".into(),
            });
        };
        let span = *span;
        let container = self.interpret(object)?;
        let index_value = self.interpret(index)?;
        match (&container, &index_value) {
            (Value::List(list), Value::Int(index)) => {
                let len = list.borrow().elements.len() as i64;
                let mut i = *index;
                if i < 0 {
                    i += len;
                }
                if i < 0 || i >= len {
                    return Err(RuntimeError::Index {
                        span,
                        message: "The index was outside the bounds of the list.".into(),
                    });
                }
                let i = i as usize;
                let stored = match op {
                    AssignOp::Assign => new_value,
                    AssignOp::BitNot => {
                        let old = list.borrow().elements[i].clone();
                        math::do_bitwise_not(span, &old)?
                    }
                    _ => {
                        let old = list.borrow().elements[i].clone();
                        math::do_binary_op(span, compound_bin_op(op), &old, &new_value)?
                    }
                };
                list.borrow_mut().elements[i] = stored;
                Ok(())
            }
            (Value::Hash(hash), Value::String(key)) => {
                let stored = match op {
                    AssignOp::Assign => new_value,
                    AssignOp::BitNot => {
                        let old = hash.borrow().get(key).ok_or_else(|| RuntimeError::HashKey {
                            span,
                            key: key.clone(),
                        })?;
                        math::do_bitwise_not(span, &old)?
                    }
                    _ => {
                        let old = hash.borrow().get(key).ok_or_else(|| RuntimeError::HashKey {
                            span,
                            key: key.clone(),
                        })?;
                        math::do_binary_op(span, compound_bin_op(op), &old, &new_value)?
                    }
                };
                hash.borrow_mut().insert(key.clone(), stored);
                Ok(())
            }
            _ => Err(RuntimeError::Index {
                span,
                message: "Invalid index expression.".into(),
            }),
        }
    }

    fn visit_member_assignment(
        &mut self,
        object: &Node,
        member: &str,
        op: AssignOp,
        value: &Node,
        span: Span,
    ) -> RuntimeResult<Value> {
        let object = self.interpret(object)?;
        let initializer = self.interpret(value)?;
        if let Value::Hash(hash) = object {
            match op {
                AssignOp::Assign => {
                    hash.borrow_mut().insert(member.to_string(), initializer);
                }
                AssignOp::BitNot => {
                    let old = hash.borrow().get(member).ok_or_else(|| RuntimeError::HashKey {
                        span,
                        key: member.to_string(),
                    })?;
                    let updated = math::do_bitwise_not(span, &old)?;
                    hash.borrow_mut().insert(member.to_string(), updated);
                }
                _ => {
                    let old = hash.borrow().get(member).ok_or_else(|| RuntimeError::HashKey {
                        span,
                        key: member.to_string(),
                    })?;
                    let updated =
                        math::do_binary_op(span, compound_bin_op(op), &old, &initializer)?;
                    hash.borrow_mut().insert(member.to_string(), updated);
                }
            }
        }
        Ok(Value::default())
    }

    fn visit_index(&mut self, object: &Node, index: &Node, span: Span) -> RuntimeResult<Value> {
        let object = self.interpret(object)?;
        let index_value = self.interpret(index)?;
        match object {
            Value::List(list) => {
                let index = self.expect_int(span, &index_value)?;
                let list = list.borrow();
                let len = list.elements.len() as i64;
                let mut i = index;
                if i < 0 {
                    i += len;
                }
                if i < 0 || i >= len {
                    return Err(RuntimeError::Range {
                        span,
                        message: "The index was outside the bounds of the list.".into(),
                    });
                }
                Ok(list.elements[i as usize].clone())
            }
            Value::Hash(hash) => {
                let key = self.expect_string(span, &index_value)?;
                let value = hash.borrow().get(&key);
                value.ok_or(RuntimeError::HashKey { span, key })
            }
            Value::String(text) => {
                let index = self.expect_int(span, &index_value)?;
                let chars: Vec<char> = text.chars().collect();
                let len = chars.len() as i64;
                let mut i = index;
                if i < 0 {
                    i += len;
                }
                if i < 0 || i >= len {
                    return Err(RuntimeError::Range {
                        span,
                        message: "The index was outside the bounds of the string.".into(),
                    });
                }
                Ok(Value::String(chars[i as usize].to_string()))
            }
            _ => Err(RuntimeError::Index {
                span,
                message: "Invalid indexing operation.".into(),
            }),
        }
    }

    fn visit_slice(
        &mut self,
        object: &Node,
        start: &Option<Box<Node>>,
        stop: &Option<Box<Node>>,
        step: &Option<Box<Node>>,
        span: Span,
    ) -> RuntimeResult<Value> {
        let object = self.interpret(object)?;
        let slice = self.build_slice(
            span,
            start.as_deref(),
            stop.as_deref(),
            step.as_deref(),
            &object,
        )?;
        match object {
            Value::String(text) => slice::string_slice(span, &slice, &text),
            Value::List(list) => slice::list_slice(span, &slice, &list.borrow()),
            _ => Err(RuntimeError::InvalidOperation {
                span,
                message: "You can only slice lists and strings.".into(),
            }),
        }
    }

    /// Defaults: start 0, stop the container length, step 1; provided
    /// components override.
    fn build_slice(
        &mut self,
        _span: Span,
        start: Option<&Node>,
        stop: Option<&Node>,
        step: Option<&Node>,
        object: &Value,
    ) -> RuntimeResult<SliceIndex> {
        let default_stop = match object {
            Value::List(list) => list.borrow().elements.len() as i64,
            Value::String(text) => text.chars().count() as i64,
            _ => 0,
        };
        let mut slice = SliceIndex {
            is_slice: true,
            start: Value::Int(0),
            stop: Value::Int(default_stop),
            step: Value::Int(1),
        };
        if let Some(node) = start {
            slice.start = self.interpret(node)?;
        }
        if let Some(node) = stop {
            slice.stop = self.interpret(node)?;
        }
        if let Some(node) = step {
            slice.step = self.interpret(node)?;
        }
        Ok(slice)
    }

    fn interpret_list_builtin(
        &mut self,
        span: Span,
        object: &Value,
        builtin: Builtin,
        arguments: Vec<Value>,
    ) -> RuntimeResult<Value> {
        let Value::List(list) = object else {
            return Err(RuntimeError::InvalidOperation {
                span,
                message: "Expected a list for specialized list builtin.".into(),
            });
        };
        match builtin {
            Builtin::Max => {
                if list.borrow().elements.is_empty() {
                    return Err(RuntimeError::EmptyList { span });
                }
                let list = list.borrow();
                let mut best = list.elements[0].clone();
                for element in &list.elements[1..] {
                    if math::compare_values(element, &best) == std::cmp::Ordering::Greater {
                        best = element.clone();
                    }
                }
                Ok(best)
            }
            Builtin::Min => {
                if list.borrow().elements.is_empty() {
                    return Err(RuntimeError::EmptyList { span });
                }
                let list = list.borrow();
                let mut best = list.elements[0].clone();
                for element in &list.elements[1..] {
                    if math::compare_values(element, &best) == std::cmp::Ordering::Less {
                        best = element.clone();
                    }
                }
                Ok(best)
            }
            Builtin::Sum => {
                let list = list.borrow();
                let mut int_sum: i64 = 0;
                let mut float_sum: f64 = 0.0;
                let mut saw_float = false;
                for element in &list.elements {
                    match element {
                        Value::Int(v) => int_sum = int_sum.wrapping_add(*v),
                        Value::Float(v) => {
                            saw_float = true;
                            float_sum += v;
                        }
                        other => {
                            return Err(RuntimeError::InvalidOperation {
                                span,
                                message: format!("Cannot sum a {}.", other.type_name()),
                            })
                        }
                    }
                }
                if saw_float {
                    Ok(Value::Float(float_sum + int_sum as f64))
                } else {
                    Ok(Value::Int(int_sum))
                }
            }
            Builtin::Sort => {
                list.borrow_mut().elements.sort_by(math::compare_values);
                Ok(object.clone())
            }
            Builtin::Each | Builtin::Map | Builtin::Select | Builtin::None => {
                let [argument] = arguments.as_slice() else {
                    return Err(RuntimeError::InvalidOperation {
                        span,
                        message: "Invalid specialized list builtin invocation.".into(),
                    });
                };
                let lambda = self.expect_lambda(span, argument)?;
                match builtin {
                    Builtin::Each => self.lambda_each(&lambda, list.clone()),
                    Builtin::Map => self.lambda_map(&lambda, list.clone()),
                    Builtin::Select => self.lambda_select(&lambda, list.clone()),
                    Builtin::None => {
                        let selected = self.lambda_select(&lambda, list.clone())?;
                        match selected {
                            Value::List(selected) => {
                                Ok(Value::Bool(selected.borrow().elements.is_empty()))
                            }
                            _ => Ok(Value::Bool(false)),
                        }
                    }
                    _ => unreachable!(),
                }
            }
            Builtin::Reduce => {
                let [seed, argument] = arguments.as_slice() else {
                    return Err(RuntimeError::InvalidOperation {
                        span,
                        message: "Invalid specialized list builtin invocation.".into(),
                    });
                };
                let lambda = self.expect_lambda(span, argument)?;
                self.lambda_reduce(&lambda, seed.clone(), list.clone())
            }
            _ => Err(RuntimeError::InvalidOperation {
                span,
                message: "Invalid specialized list builtin invocation.".into(),
            }),
        }
    }

    fn expect_lambda(&self, span: Span, value: &Value) -> RuntimeResult<Rc<Lambda>> {
        let Value::LambdaRef(id) = value else {
            return Err(RuntimeError::InvalidOperation {
                span,
                message: "Expected a lambda in specialized list builtin.".into(),
            });
        };
        self.lambdas
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::InvalidOperation {
                span,
                message: format!("Unrecognized lambda '{id}'."),
            })
    }

    /// The list-lambda builtins run the body in the caller's frame: the
    /// parameter names are bound directly and erased afterwards.
    fn lambda_each(&mut self, lambda: &Rc<Lambda>, list: Rc<RefCell<List>>) -> RuntimeResult<Value> {
        if lambda.parameters.is_empty() {
            return Ok(Value::default());
        }
        let value_name = lambda.parameters[0].0.clone();
        let index_name = lambda.parameters.get(1).map(|p| p.0.clone());
        let frame = self.top();
        let elements = list.borrow().elements.clone();
        for (i, element) in elements.iter().enumerate() {
            {
                let mut frame = frame.borrow_mut();
                frame.variables.insert(value_name.clone(), element.clone());
                if let Some(name) = &index_name {
                    frame.variables.insert(name.clone(), Value::Int(i as i64));
                }
            }
            for statement in lambda.body.iter() {
                self.interpret(statement)?;
            }
        }
        let mut frame = frame.borrow_mut();
        frame.variables.remove(&value_name);
        if let Some(name) = &index_name {
            frame.variables.remove(name);
        }
        Ok(Value::default())
    }

    fn lambda_map(&mut self, lambda: &Rc<Lambda>, list: Rc<RefCell<List>>) -> RuntimeResult<Value> {
        if lambda.parameters.is_empty() {
            return Ok(Value::List(list));
        }
        let value_name = lambda.parameters[0].0.clone();
        let frame = self.top();
        let elements = list.borrow().elements.clone();
        let mut results = Vec::with_capacity(elements.len());
        for element in &elements {
            frame
                .borrow_mut()
                .variables
                .insert(value_name.clone(), element.clone());
            let mut last = Value::default();
            for statement in lambda.body.iter() {
                last = self.interpret(statement)?;
            }
            results.push(last);
        }
        frame.borrow_mut().variables.remove(&value_name);
        Ok(Value::list(results))
    }

    fn lambda_select(
        &mut self,
        lambda: &Rc<Lambda>,
        list: Rc<RefCell<List>>,
    ) -> RuntimeResult<Value> {
        if lambda.parameters.is_empty() {
            return Ok(Value::list(Vec::new()));
        }
        let value_name = lambda.parameters[0].0.clone();
        let index_name = lambda.parameters.get(1).map(|p| p.0.clone());
        let frame = self.top();
        let elements = list.borrow().elements.clone();
        let mut selected = Vec::new();
        for (i, element) in elements.iter().enumerate() {
            {
                let mut frame = frame.borrow_mut();
                frame.variables.insert(value_name.clone(), element.clone());
                if let Some(name) = &index_name {
                    frame.variables.insert(name.clone(), Value::Int(i as i64));
                }
            }
            let mut last = Value::default();
            for statement in lambda.body.iter() {
                last = self.interpret(statement)?;
            }
            if math::is_truthy(&last) {
                selected.push(element.clone());
            }
        }
        let mut frame = frame.borrow_mut();
        frame.variables.remove(&value_name);
        if let Some(name) = &index_name {
            frame.variables.remove(name);
        }
        Ok(Value::list(selected))
    }

    /// The two-parameter lambda's first binding is the accumulator; the
    /// body updates it, and its final binding is the result.
    fn lambda_reduce(
        &mut self,
        lambda: &Rc<Lambda>,
        accumulator: Value,
        list: Rc<RefCell<List>>,
    ) -> RuntimeResult<Value> {
        if lambda.parameters.len() != 2 {
            return Ok(accumulator);
        }
        let accumulator_name = lambda.parameters[0].0.clone();
        let value_name = lambda.parameters[1].0.clone();
        let frame = self.top();
        frame
            .borrow_mut()
            .variables
            .insert(accumulator_name.clone(), accumulator);
        let elements = list.borrow().elements.clone();
        for element in &elements {
            frame
                .borrow_mut()
                .variables
                .insert(value_name.clone(), element.clone());
            for statement in lambda.body.iter() {
                self.interpret(statement)?;
            }
        }
        let mut frame = frame.borrow_mut();
        let result = frame
            .variables
            .get(&accumulator_name)
            .cloned()
            .unwrap_or_default();
        frame.variables.remove(&accumulator_name);
        frame.variables.remove(&value_name);
        Ok(result)
    }

    fn expect_int(&self, span: Span, value: &Value) -> RuntimeResult<i64> {
        match value {
            Value::Int(v) => Ok(*v),
            other => Err(RuntimeError::Conversion {
                span,
                message: format!("Expected an Integer value, got a {}.", other.type_name()),
            }),
        }
    }

    fn expect_string(&self, span: Span, value: &Value) -> RuntimeResult<String> {
        match value {
            Value::String(v) => Ok(v.clone()),
            other => Err(RuntimeError::Conversion {
                span,
                message: format!("Expected a String value, got a {}.", other.type_name()),
            }),
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

enum LoopSignal {
    None,
    Break,
    Return,
}

/// The pieces the shared call path needs, independent of whether the
/// callable is a function, a method, or a lambda.
struct CallableParts {
    parameters: Vec<(String, Value)>,
    default_parameters: HashSet<String>,
    body: Rc<Vec<Node>>,
}

impl Function {
    fn as_callable(&self) -> CallableParts {
        CallableParts {
            parameters: self.parameters.clone(),
            default_parameters: self.default_parameters.clone(),
            body: self.body.clone(),
        }
    }
}

impl Lambda {
    fn as_callable(&self) -> CallableParts {
        CallableParts {
            parameters: self.parameters.clone(),
            default_parameters: self.default_parameters.clone(),
            body: self.body.clone(),
        }
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Int(v) => Value::Int(*v),
        Literal::Float(v) => Value::Float(*v),
        Literal::String(v) => Value::String(v.clone()),
        Literal::Bool(v) => Value::Bool(*v),
    }
}

fn compound_bin_op(op: AssignOp) -> BinOp {
    match op {
        AssignOp::Add => BinOp::Add,
        AssignOp::Subtract => BinOp::Subtract,
        AssignOp::Multiply => BinOp::Multiply,
        AssignOp::Divide => BinOp::Divide,
        AssignOp::Modulo => BinOp::Modulo,
        AssignOp::Power => BinOp::Power,
        AssignOp::BitAnd => BinOp::BitAnd,
        AssignOp::BitOr => BinOp::BitOr,
        AssignOp::BitXor => BinOp::BitXor,
        AssignOp::Shl => BinOp::Shl,
        AssignOp::Shr => BinOp::Shr,
        AssignOp::Assign | AssignOp::BitNot => {
            unreachable!("plain and bitwise-not assignment handled separately")
        }
    }
}

fn apply_compound_op(
    span: Span,
    op: AssignOp,
    old: &Value,
    value: &Value,
) -> RuntimeResult<Value> {
    if op == AssignOp::BitNot {
        math::do_bitwise_not(span, old)
    } else {
        math::do_binary_op(span, compound_bin_op(op), old, value)
    }
}

fn temporary_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    format!("temporary_{suffix}")
}

fn is_script_path(name: &str) -> bool {
    name.ends_with(".vsp") && Path::new(name).exists()
}
