//! Purpose: Define the values produced by interpreting JSON against a mapping.
//! Exports: `Mapped`.
//! Role: Typed output tree; objects are shared references so graphs may contain cycles.
//! Invariants: Equality on `Object` is pointer identity, never structural.
//! Invariants: Extra properties copied verbatim are kept as `Json`.
use serde_json::{Number, Value};
use std::sync::Arc;

use super::class::{Class, ObjectRef};

#[derive(Clone, Debug)]
pub enum Mapped {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Json(Value),
    Option(Option<Box<Mapped>>),
    Array(Vec<Mapped>),
    Object(ObjectRef),
}

impl Mapped {
    pub fn some(value: Mapped) -> Self {
        Mapped::Option(Some(Box::new(value)))
    }

    pub fn none() -> Self {
        Mapped::Option(None)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Mapped::Null | Mapped::Json(Value::Null))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Mapped::String(value) => Some(value),
            Mapped::Json(Value::String(value)) => Some(value),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Mapped::Number(value) => value.as_f64(),
            Mapped::Json(Value::Number(value)) => value.as_f64(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Mapped::Number(value) => value.as_i64(),
            Mapped::Json(Value::Number(value)) => value.as_i64(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Mapped::Bool(value) => Some(*value),
            Mapped::Json(Value::Bool(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Mapped::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Mapped]> {
        match self {
            Mapped::Array(items) => Some(items),
            _ => None,
        }
    }

    /// `Some(inner)` for a present option, `None` for an empty one or a non-option.
    pub fn as_option(&self) -> Option<&Mapped> {
        match self {
            Mapped::Option(Some(inner)) => Some(inner),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Mapped::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_instance_of(&self, class: &Class) -> bool {
        self.as_object()
            .is_some_and(|object| object.is_instance_of(class))
    }
}

impl PartialEq for Mapped {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Mapped::Null, Mapped::Null) => true,
            (Mapped::Bool(a), Mapped::Bool(b)) => a == b,
            (Mapped::Number(a), Mapped::Number(b)) => a == b,
            (Mapped::String(a), Mapped::String(b)) => a == b,
            (Mapped::Json(a), Mapped::Json(b)) => a == b,
            (Mapped::Option(a), Mapped::Option(b)) => a == b,
            (Mapped::Array(a), Mapped::Array(b)) => a == b,
            (Mapped::Object(a), Mapped::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for Mapped {
    fn from(value: bool) -> Self {
        Mapped::Bool(value)
    }
}

impl From<Number> for Mapped {
    fn from(value: Number) -> Self {
        Mapped::Number(value)
    }
}

impl From<String> for Mapped {
    fn from(value: String) -> Self {
        Mapped::String(value)
    }
}

impl From<&str> for Mapped {
    fn from(value: &str) -> Self {
        Mapped::String(value.to_string())
    }
}

impl From<ObjectRef> for Mapped {
    fn from(value: ObjectRef) -> Self {
        Mapped::Object(value)
    }
}

impl From<Option<Mapped>> for Mapped {
    fn from(value: Option<Mapped>) -> Self {
        Mapped::Option(value.map(Box::new))
    }
}
