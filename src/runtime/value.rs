//! Dynamic value types
//!
//! This module defines the runtime representation of the payloads carried by
//! deferred values: primitives, records, callables, error values and deferred
//! values themselves.

use crate::deferred::Deferred;
use crate::error::{messages, Error, ErrorKind, Result};
use rustc_hash::FxHashMap as HashMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Type alias for native function implementations (`this`, arguments)
pub type NativeFn = Rc<dyn Fn(&Value, &[Value]) -> Result<Value>>;

/// A dynamic value
#[derive(Clone)]
pub enum Value {
    /// undefined
    Undefined,
    /// null
    Null,
    /// Boolean value
    Boolean(bool),
    /// Number (IEEE 754 double)
    Number(f64),
    /// String
    String(String),
    /// Record with string-keyed properties
    Object(Rc<RefCell<Object>>),
    /// Callable entity
    Function(Function),
    /// Error value (kind + message)
    Error(ErrorValue),
    /// A deferred value
    Deferred(Deferred),
}

impl Value {
    /// Create a new empty record
    pub fn new_object() -> Self {
        Value::Object(Rc::new(RefCell::new(Object::new())))
    }

    /// Create a record from key/value pairs
    pub fn record<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let mut object = Object::new();
        for (key, value) in entries {
            object.set(key, value);
        }
        Value::Object(Rc::new(RefCell::new(object)))
    }

    /// Check if value is undefined
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Records, callables and deferred values may carry a `then` member
    pub fn is_object_like(&self) -> bool {
        matches!(
            self,
            Value::Object(_) | Value::Function(_) | Value::Deferred(_)
        )
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_deferred(&self) -> Option<&Deferred> {
        match self {
            Value::Deferred(d) => Some(d),
            _ => None,
        }
    }

    /// Read a property.
    ///
    /// Getters run with this value as receiver and may fail. Reading from
    /// `undefined` or `null` is a TypeError.
    pub fn get(&self, key: &str) -> Result<Value> {
        match self {
            Value::Object(obj) => {
                let property = obj.borrow().properties.get(key).cloned();
                match property {
                    Some(Property::Data(value)) => Ok(value),
                    Some(Property::Getter(getter)) => getter.call(self, &[]),
                    None => Ok(Value::Undefined),
                }
            }
            Value::Function(func) => Ok(func.get_property(key).unwrap_or(Value::Undefined)),
            Value::Deferred(deferred) => Ok(match key {
                "then" => Value::Function(deferred.then_function()),
                "catch" => Value::Function(deferred.catch_function()),
                _ => Value::Undefined,
            }),
            Value::Error(err) => Ok(match key {
                "name" => Value::String(err.kind.to_string()),
                "message" => Value::String(err.message.clone()),
                _ => Value::Undefined,
            }),
            Value::Undefined | Value::Null => Err(Error::type_error(
                messages::cannot_read_property(key, &self.to_string()),
            )),
            _ => Ok(Value::Undefined),
        }
    }

    /// Set a data property on a record or callable
    pub fn set_property(&self, key: impl Into<String>, value: Value) {
        match self {
            Value::Object(obj) => obj.borrow_mut().set(key, value),
            Value::Function(func) => func.set_property(key, value),
            _ => {}
        }
    }

    /// Define a getter on a record
    pub fn define_getter(&self, key: impl Into<String>, getter: Function) {
        if let Value::Object(obj) = self {
            obj.borrow_mut().define_getter(key, getter);
        }
    }

    /// Call this value as a function
    pub fn call(&self, this: &Value, args: &[Value]) -> Result<Value> {
        match self {
            Value::Function(func) => func.call(this, args),
            other => Err(Error::type_error(messages::not_a_function(
                &other.to_string(),
            ))),
        }
    }

    /// Strict equality: primitives by value, references by identity
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Error(a), Value::Error(b)) => a == b,
            (Value::Deferred(a), Value::Deferred(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

/// Format a number the way a console prints it
fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n == f64::INFINITY {
        "Infinity".to_string()
    } else if n == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        format!("{}", n)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_equals(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Object(obj) => match obj.try_borrow() {
                Ok(obj) => {
                    let mut keys: Vec<&String> = obj.properties.keys().collect();
                    keys.sort();
                    write!(f, "{{ ")?;
                    for (i, key) in keys.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        match &obj.properties[*key] {
                            Property::Data(value) => write!(f, "{}: {:?}", key, value)?,
                            Property::Getter(_) => write!(f, "{}: [Getter]", key)?,
                        }
                    }
                    write!(f, " }}")
                }
                Err(_) => write!(f, "{{...}}"),
            },
            Value::Function(func) => write!(f, "[Function: {}]", func.name()),
            Value::Error(err) => write!(f, "{}", err),
            Value::Deferred(deferred) => write!(f, "{:?}", deferred),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{}", s),
            Value::Object(_) => write!(f, "[object Object]"),
            Value::Function(func) => write!(f, "[Function: {}]", func.name()),
            Value::Error(err) => write!(f, "{}", err),
            Value::Deferred(_) => write!(f, "[object Deferred]"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Function> for Value {
    fn from(func: Function) -> Self {
        Value::Function(func)
    }
}

impl From<ErrorValue> for Value {
    fn from(err: ErrorValue) -> Self {
        Value::Error(err)
    }
}

impl From<Deferred> for Value {
    fn from(deferred: Deferred) -> Self {
        Value::Deferred(deferred)
    }
}

/// A record property: a data slot or a getter
#[derive(Clone)]
pub enum Property {
    /// Plain value
    Data(Value),
    /// Accessor invoked with the record as receiver
    Getter(Function),
}

/// A record
#[derive(Clone, Default)]
pub struct Object {
    /// Properties
    pub properties: HashMap<String, Property>,
}

impl Object {
    /// Create a new empty record
    pub fn new() -> Self {
        Self {
            properties: HashMap::default(),
        }
    }

    /// Set a data property, replacing any getter of the same name
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.properties.insert(key.into(), Property::Data(value));
    }

    /// Define a getter property
    pub fn define_getter(&mut self, key: impl Into<String>, getter: Function) {
        self.properties.insert(key.into(), Property::Getter(getter));
    }
}

/// A callable entity
#[derive(Clone)]
pub struct Function {
    inner: Rc<FunctionInner>,
}

struct FunctionInner {
    name: String,
    func: NativeFn,
    properties: RefCell<HashMap<String, Value>>,
}

impl Function {
    /// Creates a new named function from a closure taking `this` and arguments.
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Value, &[Value]) -> Result<Value> + 'static,
    {
        Self {
            inner: Rc::new(FunctionInner {
                name: name.into(),
                func: Rc::new(f),
                properties: RefCell::new(HashMap::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Calls the function with the given receiver and arguments.
    pub fn call(&self, this: &Value, args: &[Value]) -> Result<Value> {
        let func = Rc::clone(&self.inner.func);
        func(this, args)
    }

    pub fn get_property(&self, key: &str) -> Option<Value> {
        self.inner.properties.borrow().get(key).cloned()
    }

    pub fn set_property(&self, key: impl Into<String>, value: Value) {
        self.inner.properties.borrow_mut().insert(key.into(), value);
    }

    /// Identity comparison
    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Function: {}]", self.name())
    }
}

/// Argument at `index`, or undefined when absent
pub fn arg(args: &[Value], index: usize) -> Value {
    args.get(index).cloned().unwrap_or(Value::Undefined)
}

/// An error value: what runtime errors turn into when they become rejection reasons
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorValue {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorValue {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}
