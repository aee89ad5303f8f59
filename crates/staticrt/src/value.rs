//! Tagged runtime values and their static graph types.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::tensor::{Tensor, TensorSpec};

/// Generic value stored in input, constant and node-output cells.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    None,
    Tensor(Tensor),
    Double(f64),
    Int(i64),
    Bool(bool),
    Str(Arc<str>),
    List(Vec<Value>),
    Tuple(Vec<Value>),
}

impl Value {
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Value::Tensor(tensor) => Some(tensor),
            _ => None,
        }
    }

    pub fn as_tensor_mut(&mut self) -> Option<&mut Tensor> {
        match self {
            Value::Tensor(tensor) => Some(tensor),
            _ => None,
        }
    }

    pub fn into_tensor(self) -> Option<Tensor> {
        match self {
            Value::Tensor(tensor) => Some(tensor),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Reads a floating-point scalar, widening integers.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(value) => Some(*value),
            Value::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Tensor(_) => "Tensor",
            Value::Double(_) => "float",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::Str(_) => "str",
            Value::List(_) => "List",
            Value::Tuple(_) => "Tuple",
        }
    }
}

impl From<Tensor> for Value {
    fn from(tensor: Tensor) -> Self {
        Value::Tensor(tensor)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Double(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Tensor(tensor) => write!(f, "{tensor}"),
            Value::Double(value) => write!(f, "{value}"),
            Value::Int(value) => write!(f, "{value}"),
            Value::Bool(value) => write!(f, "{value}"),
            Value::Str(value) => write!(f, "{value:?}"),
            Value::List(items) => write_items(f, "[", items, "]"),
            Value::Tuple(items) => write_items(f, "(", items, ")"),
        }
    }
}

fn write_items(f: &mut fmt::Formatter<'_>, open: &str, items: &[Value], close: &str) -> fmt::Result {
    write!(f, "{open}")?;
    for (idx, item) in items.iter().enumerate() {
        if idx > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    write!(f, "{close}")
}

/// Static type attached to every graph value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Tensor(TensorSpec),
    Int,
    Double,
    Bool,
    Str,
    List(Box<ValueType>),
    Tuple(Vec<ValueType>),
    /// The `self` argument of a weighted module.
    Module,
    /// A type the frontend produced but the engine has no representation for.
    Opaque(String),
}

impl ValueType {
    pub fn tensor(spec: TensorSpec) -> Self {
        ValueType::Tensor(spec)
    }

    pub fn as_tensor(&self) -> Option<&TensorSpec> {
        match self {
            ValueType::Tensor(spec) => Some(spec),
            _ => None,
        }
    }

    /// Returns the first nested type the engine cannot lower.
    pub fn unsupported_part(&self) -> Option<&ValueType> {
        match self {
            ValueType::Opaque(_) => Some(self),
            ValueType::List(inner) => inner.unsupported_part(),
            ValueType::Tuple(items) => items.iter().find_map(ValueType::unsupported_part),
            _ => None,
        }
    }

    /// Checks a runtime value against this type, describing the first mismatch.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        match (self, value) {
            (ValueType::Tensor(spec), Value::Tensor(tensor)) => {
                if tensor.dtype() != spec.dtype {
                    return Err(format!(
                        "expected dtype {}, got {}",
                        spec.dtype.as_str(),
                        tensor.dtype().as_str()
                    ));
                }
                if !spec.shape.accepts(tensor.dims()) {
                    return Err(format!(
                        "expected shape {}, got {:?}",
                        spec.shape,
                        tensor.dims()
                    ));
                }
                Ok(())
            }
            (ValueType::Int, Value::Int(_))
            | (ValueType::Double, Value::Double(_) | Value::Int(_))
            | (ValueType::Bool, Value::Bool(_))
            | (ValueType::Str, Value::Str(_)) => Ok(()),
            (ValueType::List(inner), Value::List(items)) => {
                for (idx, item) in items.iter().enumerate() {
                    inner
                        .check(item)
                        .map_err(|detail| format!("list element {idx}: {detail}"))?;
                }
                Ok(())
            }
            (ValueType::Tuple(types), Value::Tuple(items)) => {
                if types.len() != items.len() {
                    return Err(format!(
                        "expected tuple of {} elements, got {}",
                        types.len(),
                        items.len()
                    ));
                }
                for (idx, (ty, item)) in types.iter().zip(items).enumerate() {
                    ty.check(item)
                        .map_err(|detail| format!("tuple element {idx}: {detail}"))?;
                }
                Ok(())
            }
            (expected, actual) => Err(format!("expected {expected}, got {}", actual.kind_name())),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Tensor(spec) => write!(f, "{spec}"),
            ValueType::Int => write!(f, "int"),
            ValueType::Double => write!(f, "float"),
            ValueType::Bool => write!(f, "bool"),
            ValueType::Str => write!(f, "str"),
            ValueType::List(inner) => write!(f, "list<{inner}>"),
            ValueType::Tuple(items) => {
                write!(f, "tuple<")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ">")
            }
            ValueType::Module => write!(f, "module"),
            ValueType::Opaque(name) => write!(f, "opaque<{name}>"),
        }
    }
}
