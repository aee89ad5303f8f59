//! Weighted modules: a graph whose first input is the module itself plus its attributes.

use std::collections::BTreeMap;
use std::fmt;

use crate::graph::Graph;
use crate::value::{Value, ValueType};

/// One declared forward argument, excluding `self`.
#[derive(Debug, Clone)]
pub struct Argument {
    pub name: String,
    pub ty: ValueType,
    pub default: Option<Value>,
}

impl Argument {
    pub fn new(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            ty,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Signature of a module's forward method.
#[derive(Debug, Clone, Default)]
pub struct FunctionSchema {
    pub name: String,
    pub arguments: Vec<Argument>,
}

impl FunctionSchema {
    pub fn new(name: impl Into<String>, arguments: Vec<Argument>) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    pub fn argument_index(&self, name: &str) -> Option<usize> {
        self.arguments.iter().position(|arg| arg.name == name)
    }

    /// Schema derived from a graph's inputs, skipping `self` when present.
    pub fn from_graph(name: impl Into<String>, graph: &Graph) -> Self {
        let arguments = graph
            .inputs
            .iter()
            .enumerate()
            .filter(|(_, id)| !matches!(graph.value_type(**id), Some(ValueType::Module)))
            .map(|(index, id)| {
                let name = graph
                    .input_name(index)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("input{index}"));
                let ty = graph
                    .value_type(*id)
                    .cloned()
                    .unwrap_or_else(|| ValueType::Opaque("untyped".to_string()));
                Argument::new(name, ty)
            })
            .collect();
        Self::new(name, arguments)
    }
}

impl fmt::Display for FunctionSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (idx, arg) in self.arguments.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", arg.name, arg.ty)?;
            if let Some(default) = &arg.default {
                write!(f, " = {default}")?;
            }
        }
        write!(f, ")")
    }
}

/// Frozen module: forward graph with `self` as input 0 and named attribute values.
#[derive(Debug, Clone)]
pub struct ScriptModule {
    pub name: String,
    pub graph: Graph,
    pub attributes: BTreeMap<String, Value>,
    pub schema: FunctionSchema,
}

impl ScriptModule {
    /// Builds a module whose schema is derived from the graph inputs.
    pub fn new(name: impl Into<String>, graph: Graph) -> Self {
        let schema = FunctionSchema::from_graph("forward", &graph);
        Self {
            name: name.into(),
            graph,
            attributes: BTreeMap::new(),
            schema,
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_schema(mut self, schema: FunctionSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}
