//! Value Model
//!
//! Dynamic values that flow through promises: fulfillment values, rejection
//! reasons, reaction callbacks and duck-typed thenables. Reference-typed
//! values (arrays, objects, functions, promises) are shared through `Rc` and
//! compared by identity where the resolution procedure needs it.

use rustc_hash::FxHashMap as HashMap;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::{Error, ErrorKind, Result};
use crate::promise::{Promise, Thenable};

/// Signature of every native callable
pub type NativeFn = dyn Fn(&[Value]) -> Result<Value>;

/// A named native callable.
///
/// Returning `Err` is how a callback throws: the error is turned into a
/// rejection reason by whichever promise invoked it.
#[derive(Clone)]
pub struct Function {
    name: Rc<str>,
    func: Rc<NativeFn>,
}

impl Function {
    /// Wrap a closure taking the raw argument list
    pub fn new(
        name: impl Into<String>,
        func: impl Fn(&[Value]) -> Result<Value> + 'static,
    ) -> Self {
        Self {
            name: Rc::from(name.into()),
            func: Rc::new(func),
        }
    }

    /// Wrap a closure that only looks at its first argument (`undefined` if missing)
    pub fn unary(name: impl Into<String>, func: impl Fn(Value) -> Result<Value> + 'static) -> Self {
        Self::new(name, move |args: &[Value]| {
            func(args.first().cloned().unwrap_or_default())
        })
    }

    /// Function name, for diagnostics
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke with the given arguments
    pub fn call(&self, args: &[Value]) -> Result<Value> {
        (self.func)(args)
    }

    /// Whether both handles refer to the same closure
    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Function: {}]", self.name)
    }
}

/// A plain property bag
#[derive(Debug, Clone, Default)]
pub struct Object {
    pub properties: HashMap<String, Value>,
}

/// An error object used as a rejection reason
#[derive(Debug, Clone, PartialEq, Eq)]
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

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// A dynamically typed value
#[derive(Clone, Default)]
pub enum Value {
    /// undefined
    #[default]
    Undefined,
    /// null
    Null,
    /// Boolean value
    Boolean(bool),
    /// Number (IEEE 754 double)
    Number(f64),
    /// String
    String(String),
    /// Ordered, shared sequence
    Array(Rc<RefCell<Vec<Value>>>),
    /// Shared property bag; thenable when its `then` property is callable
    Object(Rc<RefCell<Object>>),
    /// Native callable
    Function(Function),
    /// A promise from this crate
    Promise(Promise),
    /// A thenable implemented in Rust outside this crate's promise type
    Thenable(Rc<dyn Thenable>),
    /// Error object
    Error(ErrorValue),
}

impl Value {
    /// Create an array value
    pub fn array(items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(items)))
    }

    /// Create an empty object
    pub fn new_object() -> Value {
        Value::Object(Rc::new(RefCell::new(Object::default())))
    }

    /// Create an object from key/value pairs
    pub fn object<'a>(pairs: impl IntoIterator<Item = (&'a str, Value)>) -> Value {
        let properties = pairs
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect();
        Value::Object(Rc::new(RefCell::new(Object { properties })))
    }

    /// Wrap a Rust thenable
    pub fn thenable(thenable: impl Thenable + 'static) -> Value {
        Value::Thenable(Rc::new(thenable))
    }

    /// Set a property (no-op on non-objects)
    pub fn set_property(&self, key: &str, value: Value) {
        if let Value::Object(obj) = self {
            obj.borrow_mut().properties.insert(key.to_string(), value);
        }
    }

    /// Read a property of an object
    pub fn get_property(&self, key: &str) -> Option<Value> {
        match self {
            Value::Object(obj) => obj.borrow().properties.get(key).cloned(),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_))
    }

    pub fn as_function(&self) -> Option<Function> {
        match self {
            Value::Function(func) => Some(func.clone()),
            _ => None,
        }
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

    /// Snapshot of an array's elements
    pub fn as_array(&self) -> Option<Vec<Value>> {
        match self {
            Value::Array(items) => Some(items.borrow().clone()),
            _ => None,
        }
    }

    pub fn as_promise(&self) -> Option<&Promise> {
        match self {
            Value::Promise(promise) => Some(promise),
            _ => None,
        }
    }

    /// Name of the value's type, for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) | Value::Thenable(_) => "object",
            Value::Function(_) => "function",
            Value::Promise(_) => "promise",
            Value::Error(_) => "error",
        }
    }

    /// Elements produced by iterating this value.
    ///
    /// Arrays yield their elements and strings yield one-character strings;
    /// anything else is not iterable.
    pub fn iterate(&self) -> Result<Vec<Value>> {
        match self {
            Value::Array(items) => Ok(items.borrow().clone()),
            Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
            other => Err(Error::NotIterable {
                found: other.to_string(),
            }),
        }
    }

    /// Reference identity; always false for primitives
    pub fn same_identity(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Promise(a), Value::Promise(b)) => a.ptr_eq(b),
            (Value::Thenable(a), Value::Thenable(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { "" } else { "-" };
        format!("{}Infinity", sign)
    } else if n == 0.0 {
        "0".to_string()
    } else {
        format!("{}", n)
    }
}

fn sorted_properties(obj: &Object) -> Vec<(&String, &Value)> {
    let mut entries: Vec<_> = obj.properties.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(items) => {
                let parts: Vec<String> = items.borrow().iter().map(|v| v.to_string()).collect();
                write!(f, "{}", parts.join(","))
            }
            Value::Object(_) | Value::Thenable(_) => write!(f, "[object Object]"),
            Value::Function(func) => write!(f, "function {}() {{ [native code] }}", func.name()),
            Value::Promise(_) => write!(f, "[object Promise]"),
            Value::Error(e) => write!(f, "{}", e),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s),
            Value::Array(items) => f.debug_list().entries(items.borrow().iter()).finish(),
            Value::Object(obj) => {
                let obj = obj.borrow();
                f.debug_map().entries(sorted_properties(&obj)).finish()
            }
            Value::Function(func) => write!(f, "{:?}", func),
            // Nested promises show only id and state; a result may refer back to its own promise.
            Value::Promise(promise) => match promise.try_state() {
                Some(state) => write!(f, "Promise {{ id: {}, state: {:?} }}", promise.id(), state),
                None => write!(f, "Promise {{ id: {}, state: <busy> }}", promise.id()),
            },
            Value::Thenable(_) => write!(f, "[Thenable]"),
            other => write!(f, "{}", other),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Object(a), Value::Object(b)) => {
                Rc::ptr_eq(a, b) || a.borrow().properties == b.borrow().properties
            }
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => self.same_identity(other),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::Undefined | Value::Null => serializer.serialize_unit(),
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Number(n) => serializer.serialize_f64(*n),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(items) => {
                let items = items.borrow();
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items.iter() {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(obj) => {
                let obj = obj.borrow();
                let mut map = serializer.serialize_map(Some(obj.properties.len()))?;
                for (key, value) in sorted_properties(&obj) {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            Value::Error(e) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("name", &e.kind.to_string())?;
                map.serialize_entry("message", &e.message)?;
                map.end()
            }
            Value::Promise(promise) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("id", &promise.id())?;
                map.serialize_entry("state", &promise.try_state())?;
                map.end()
            }
            Value::Function(_) | Value::Thenable(_) => serializer.serialize_str(&self.to_string()),
        }
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

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
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

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::array(items)
    }
}

impl From<Function> for Value {
    fn from(func: Function) -> Self {
        Value::Function(func)
    }
}

impl From<Promise> for Value {
    fn from(promise: Promise) -> Self {
        Value::Promise(promise)
    }
}

impl From<ErrorValue> for Value {
    fn from(error: ErrorValue) -> Self {
        Value::Error(error)
    }
}
