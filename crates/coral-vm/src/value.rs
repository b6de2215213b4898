use std::fmt;
use std::rc::Rc;

use coral_compiler::Constant;
use rustc_hash::FxHashMap;

/// A runtime value in the Coral VM.
#[derive(Debug, Clone)]
pub enum Value {
    /// 64-bit signed integer
    Int(i64),
    /// Boolean
    Bool(bool),
    /// Immutable string
    Str(Rc<str>),
    /// Ordered sequence of values
    Array(Rc<Vec<Value>>),
    /// Mapping from hashable values to values
    Hash(Rc<FxHashMap<HashKey, Value>>),
    /// The absent value
    Null,
}

/// Canonical true.
pub const TRUE: Value = Value::Bool(true);
/// Canonical false.
pub const FALSE: Value = Value::Bool(false);
/// Canonical null.
pub const NULL: Value = Value::Null;

/// The kind tag of a value, queryable without matching on the variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Integer,
    Boolean,
    String,
    Array,
    Hash,
    Null,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueKind::Integer => "INTEGER",
            ValueKind::Boolean => "BOOLEAN",
            ValueKind::String => "STRING",
            ValueKind::Array => "ARRAY",
            ValueKind::Hash => "HASH",
            ValueKind::Null => "NULL",
        };
        f.write_str(s)
    }
}

/// A value usable as a hash key. Only integers, booleans and strings
/// hash; everything else is rejected at hash construction time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Int(i64),
    Bool(bool),
    Str(Rc<str>),
}

impl fmt::Display for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashKey::Int(value) => write!(f, "{}", value),
            HashKey::Bool(value) => write!(f, "{}", value),
            HashKey::Str(value) => f.write_str(value),
        }
    }
}

impl Value {
    /// The kind tag of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Integer,
            Value::Bool(_) => ValueKind::Boolean,
            Value::Str(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Hash(_) => ValueKind::Hash,
            Value::Null => ValueKind::Null,
        }
    }

    /// The canonical boolean for a native bool.
    pub fn from_bool(value: bool) -> Value {
        if value {
            TRUE
        } else {
            FALSE
        }
    }

    /// Truthiness for conditional branching: false and null are falsy,
    /// everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(value) => *value,
            Value::Null => false,
            _ => true,
        }
    }

    /// The hash key for this value, if it is hashable.
    pub fn hash_key(&self) -> Option<HashKey> {
        match self {
            Value::Int(value) => Some(HashKey::Int(*value)),
            Value::Bool(value) => Some(HashKey::Bool(*value)),
            Value::Str(value) => Some(HashKey::Str(value.clone())),
            _ => None,
        }
    }
}

impl From<&Constant> for Value {
    fn from(constant: &Constant) -> Self {
        match constant {
            Constant::Int(value) => Value::Int(*value),
            Constant::Str(value) => Value::Str(Rc::from(value.as_str())),
        }
    }
}

impl PartialEq for Value {
    /// Integers and strings compare by value; booleans and null are
    /// canonical, so tag-and-value equality reproduces singleton
    /// identity; arrays and hashes compare by reference.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Null, Value::Null) => true,
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Hash(a), Value::Hash(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(value) => write!(f, "{}", value),
            Value::Bool(value) => write!(f, "{}", value),
            Value::Str(value) => f.write_str(value),
            Value::Array(elements) => {
                write!(f, "[")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", element)?;
                }
                write!(f, "]")
            }
            Value::Hash(pairs) => {
                // entries ordered by printed key so output is stable
                let mut entries: Vec<(String, &Value)> =
                    pairs.iter().map(|(k, v)| (k.to_string(), v)).collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
            Value::Null => f.write_str("null"),
        }
    }
}
