//! Host-side values: what callers hand to the engines and get back from them.
//!
//! Scalars, strings, byte strings and tuples are immutable and compare by
//! content. Host lists and dicts are shared, mutable and may contain
//! themselves; their identity is the address of their shared cell. Lazy
//! collections are handles to collections that live in a store.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::collections::{LazyDict, LazyList};

pub type SharedList = Rc<RefCell<Vec<Value>>>;

/// Insertion-ordered pairs. Lookup is linear; host dicts exist to be stored.
pub type SharedDict = Rc<RefCell<Vec<(Value, Value)>>>;

#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Tuple(Vec<Value>),
    List(SharedList),
    Dict(SharedDict),
    LazyList(LazyList),
    LazyDict(LazyDict),
}

impl Value {
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn dict(pairs: Vec<(Value, Value)>) -> Value {
        Value::Dict(Rc::new(RefCell::new(pairs)))
    }

    pub fn str(text: impl Into<String>) -> Value {
        Value::Str(text.into())
    }

    pub fn bytes(data: impl Into<Vec<u8>>) -> Value {
        Value::Bytes(data.into())
    }

    /// Identity of a shared host collection; `None` for everything else.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::List(list) => Some(Rc::as_ptr(list) as *const () as usize),
            Value::Dict(dict) => Some(Rc::as_ptr(dict) as *const () as usize),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Tuple(_) => "tuple",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::LazyList(_) => "LazyList",
            Value::LazyDict(_) => "LazyDict",
        }
    }

    /// Immutable all the way down, so usable as a dict key.
    pub fn is_hashable(&self) -> bool {
        match self {
            Value::Tuple(items) => items.iter().all(Value::is_hashable),
            Value::List(_) | Value::Dict(_) | Value::LazyList(_) | Value::LazyDict(_) => false,
            _ => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_lazy_list(&self) -> Option<&LazyList> {
        match self {
            Value::LazyList(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_lazy_dict(&self) -> Option<&LazyDict> {
        match self {
            Value::LazyDict(dict) => Some(dict),
            _ => None,
        }
    }

    fn write_repr(&self, f: &mut fmt::Formatter<'_>, open: &mut Vec<usize>) -> fmt::Result {
        if let Some(identity) = self.identity() {
            if open.contains(&identity) {
                return match self {
                    Value::Dict(_) => write!(f, "{{...}}"),
                    _ => write!(f, "[...]"),
                };
            }
        }
        match self {
            Value::Null => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Bytes(b) => {
                write!(f, "b\"")?;
                for byte in b {
                    write!(f, "{}", std::ascii::escape_default(*byte))?;
                }
                write!(f, "\"")
            }
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.write_repr(f, open)?;
                }
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Value::List(list) => {
                open.push(Rc::as_ptr(list) as *const () as usize);
                write!(f, "[")?;
                for (i, item) in list.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.write_repr(f, open)?;
                }
                open.pop();
                write!(f, "]")
            }
            Value::Dict(dict) => {
                open.push(Rc::as_ptr(dict) as *const () as usize);
                write!(f, "{{")?;
                for (i, (key, value)) in dict.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    key.write_repr(f, open)?;
                    write!(f, ": ")?;
                    value.write_repr(f, open)?;
                }
                open.pop();
                write!(f, "}}")
            }
            Value::LazyList(list) => write!(f, "LazyList(id={})", list.id()),
            Value::LazyDict(dict) => write!(f, "LazyDict(id={})", dict.id()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_repr(f, &mut Vec::new())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_repr(f, &mut Vec::new())
    }
}

/// Structural equality without touching a store. Lazy collections are equal
/// only to handles of the same collection; use `compare::values_equal` to
/// compare their contents.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Tuple(a), Value::Tuple(b)) => a == b,
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len()
                    && a.iter().all(|(key, value)| {
                        b.iter().any(|(other_key, other_value)| {
                            key == other_key && value == other_value
                        })
                    })
            }
            (Value::LazyList(a), Value::LazyList(b)) => a.same_collection(b),
            (Value::LazyDict(a), Value::LazyDict(b)) => a.same_collection(b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Bytes(value.to_vec())
    }
}

impl From<LazyList> for Value {
    fn from(value: LazyList) -> Self {
        Value::LazyList(value)
    }
}

impl From<LazyDict> for Value {
    fn from(value: LazyDict) -> Self {
        Value::LazyDict(value)
    }
}
