use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

/// The tagged value universe. Lists, hashes, and objects are shared:
/// assignment aliases them and mutation is observed through every alias.
#[derive(Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    List(Rc<RefCell<List>>),
    Hash(Rc<RefCell<Hash>>),
    Object(Rc<RefCell<Object>>),
    ClassRef(String),
    LambdaRef(String),
}

impl Value {
    pub fn list(elements: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(List { elements })))
    }

    pub fn hash(entries: IndexMap<String, Value>) -> Value {
        Value::Hash(Rc::new(RefCell::new(Hash { entries })))
    }

    pub fn empty_hash() -> Value {
        Value::hash(IndexMap::new())
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "Integer",
            Value::Float(_) => "Float",
            Value::Bool(_) => "Boolean",
            Value::String(_) => "String",
            Value::List(_) => "List",
            Value::Hash(_) => "Hash",
            Value::Object(_) => "Object",
            Value::ClassRef(_) => "Class",
            Value::LambdaRef(_) => "Lambda",
        }
    }
}

impl Default for Value {
    /// Integer zero is the unit result throughout the evaluator.
    fn default() -> Self {
        Value::Int(0)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v:?}"),
            Value::List(list) => write!(f, "<list len={}>", list.borrow().elements.len()),
            Value::Hash(hash) => write!(f, "<hash len={}>", hash.borrow().entries.len()),
            Value::Object(obj) => write!(f, "<object {}>", obj.borrow().class_name),
            Value::ClassRef(name) => write!(f, "<class {name}>"),
            Value::LambdaRef(id) => write!(f, "<lambda {id}>"),
        }
    }
}

#[derive(Debug, Default)]
pub struct List {
    pub elements: Vec<Value>,
}

/// String-keyed map with an observable insertion order: iteration follows
/// insertion, and re-inserting an existing key updates the value without
/// moving it.
#[derive(Debug, Default)]
pub struct Hash {
    pub entries: IndexMap<String, Value>,
}

impl Hash {
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.get(key).cloned()
    }

    pub fn insert(&mut self, key: String, value: Value) {
        self.entries.insert(key, value);
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

#[derive(Debug, Default)]
pub struct Object {
    pub class_name: String,
    pub instance_variables: HashMap<String, Value>,
    pub identifier: Option<String>,
}

/// Instance variables are keyed without the `@` sigil; `@x` and `self.x`
/// address the same slot.
pub fn instance_key(name: &str) -> &str {
    name.strip_prefix('@').unwrap_or(name)
}
