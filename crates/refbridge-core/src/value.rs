//! Script-level values seen by the bridge
//!
//! Primitive values are stored inline. Wrapper objects (pointers, records,
//! references) are shared through `Rc`, so two values holding the same
//! wrapper denote the same script object. Type objects are `Arc`-shared
//! descriptors from the process-wide registry.

use crate::memory::PointerInstance;
use crate::record::RecordInstance;
use crate::reference::ReferenceInstance;
use crate::types::TypeDescriptor;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// A value owned by the scripting runtime
#[derive(Clone, Default)]
pub enum Value {
    /// `undefined`
    #[default]
    Undefined,

    /// `null`
    Null,

    /// Boolean
    Bool(bool),

    /// IEEE-754 double
    Number(f64),

    /// Arbitrary-width integer, wide enough for every 64-bit native integer
    BigInt(i128),

    /// Immutable string
    String(Rc<str>),

    /// Raw pointer wrapper (a Memory Handle)
    Pointer(Rc<PointerInstance>),

    /// Native struct wrapper
    Record(Rc<RecordInstance>),

    /// Addressable typed cell
    Reference(Rc<ReferenceInstance>),

    /// Native type object
    Type(Arc<TypeDescriptor>),
}

impl Value {
    /// Create a string value
    pub fn string(s: &str) -> Self {
        Value::String(Rc::from(s))
    }

    /// Check for `null` or `undefined`
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Check for `undefined`
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Extract a number
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Extract a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Extract a pointer wrapper
    pub fn as_pointer(&self) -> Option<&Rc<PointerInstance>> {
        match self {
            Value::Pointer(p) => Some(p),
            _ => None,
        }
    }

    /// Extract a record wrapper
    pub fn as_record(&self) -> Option<&Rc<RecordInstance>> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Extract a reference wrapper
    pub fn as_reference(&self) -> Option<&Rc<ReferenceInstance>> {
        match self {
            Value::Reference(r) => Some(r),
            _ => None,
        }
    }

    /// Extract a type object
    pub fn as_type(&self) -> Option<&Arc<TypeDescriptor>> {
        match self {
            Value::Type(t) => Some(t),
            _ => None,
        }
    }

    /// Type name for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::BigInt(_) => "bigint",
            Value::String(_) => "string",
            Value::Pointer(_) => "Pointer",
            Value::Record(_) => "Record",
            Value::Reference(_) => "Reference",
            Value::Type(_) => "Type",
        }
    }

    /// The pointer wrapper behind a pointer, record or backed reference
    pub fn handle(&self) -> Option<Rc<PointerInstance>> {
        match self {
            Value::Pointer(pointer) => Some(pointer.clone()),
            Value::Record(record) => Some(record.pointer().clone()),
            Value::Reference(reference) => reference.pointer(),
            _ => None,
        }
    }

    /// Identity comparison for wrappers, value comparison for primitives
    pub fn same_value(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Pointer(a), Value::Pointer(b)) => Rc::ptr_eq(a, b),
            (Value::Record(a), Value::Record(b)) => Rc::ptr_eq(a, b),
            (Value::Reference(a), Value::Reference(b)) => Rc::ptr_eq(a, b),
            (Value::Type(a), Value::Type(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
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

impl From<Rc<PointerInstance>> for Value {
    fn from(p: Rc<PointerInstance>) -> Self {
        Value::Pointer(p)
    }
}

impl From<Rc<RecordInstance>> for Value {
    fn from(r: Rc<RecordInstance>) -> Self {
        Value::Record(r)
    }
}

impl From<Rc<ReferenceInstance>> for Value {
    fn from(r: Rc<ReferenceInstance>) -> Self {
        Value::Reference(r)
    }
}

impl From<Arc<TypeDescriptor>> for Value {
    fn from(t: Arc<TypeDescriptor>) -> Self {
        Value::Type(t)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "bool({})", b),
            Value::Number(n) => write!(f, "number({})", n),
            Value::BigInt(i) => write!(f, "bigint({})", i),
            Value::String(s) => write!(f, "string({:?})", s),
            Value::Pointer(p) => write!(f, "{:?}", p),
            Value::Record(r) => write!(f, "{:?}", r),
            Value::Reference(r) => write!(f, "{:?}", r),
            Value::Type(t) => write!(f, "type({})", t.name()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::BigInt(i) => write!(f, "{}n", i),
            Value::String(s) => write!(f, "{}", s),
            Value::Pointer(p) => write!(f, "{}", p),
            Value::Record(r) => write!(f, "{}", r),
            Value::Reference(r) => write!(f, "{}", r),
            Value::Type(t) => write!(f, "[type {}]", t.name()),
        }
    }
}
