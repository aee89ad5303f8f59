//! Frozen dataflow graph handed over by the model frontend.
//!
//! The graph is the input of compilation only. Once a [`crate::StaticModule`] has been built the
//! graph is kept for introspection, but execution never walks it again.

mod builder;
mod topology;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::{Value, ValueType};

pub use builder::GraphBuilder;
pub use topology::{validate_graph_topology, TopologyError};

/// Unique identifier for SSA values in a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Operation performed by a graph node.
#[derive(Debug, Clone)]
pub enum Operation {
    /// Compile-time fixed value.
    Constant(Value),
    /// Reads a named attribute from the module's `self` input.
    GetAttr(String),
    /// Invokes the operator registered under this name.
    Call(String),
    If { then_block: Block, else_block: Block },
    Loop { body: Block },
}

impl Operation {
    pub fn kind(&self) -> &str {
        match self {
            Operation::Constant(_) => "prim::Constant",
            Operation::GetAttr(_) => "prim::GetAttr",
            Operation::Call(name) => name,
            Operation::If { .. } => "prim::If",
            Operation::Loop { .. } => "prim::Loop",
        }
    }

    pub fn is_control_flow(&self) -> bool {
        matches!(self, Operation::If { .. } | Operation::Loop { .. })
    }
}

/// Single graph node consuming and producing SSA values.
#[derive(Debug, Clone)]
pub struct Node {
    pub op: Operation,
    pub inputs: Vec<ValueId>,
    pub outputs: Vec<ValueId>,
}

/// Nested node list owned by a control-flow node.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub nodes: Vec<Node>,
    pub outputs: Vec<ValueId>,
}

/// Single-entry, single-exit dataflow graph in topological node order.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub inputs: Vec<ValueId>,
    pub input_names: Vec<String>,
    pub nodes: Vec<Node>,
    pub outputs: Vec<ValueId>,
    pub types: HashMap<ValueId, ValueType>,
}

impl Graph {
    pub fn value_type(&self, id: ValueId) -> Option<&ValueType> {
        self.types.get(&id)
    }

    pub fn input_name(&self, index: usize) -> Option<&str> {
        self.input_names.get(index).map(String::as_str)
    }

    fn write_type(&self, f: &mut fmt::Formatter<'_>, id: ValueId) -> fmt::Result {
        match self.types.get(&id) {
            Some(ty) => write!(f, "{id} : {ty}"),
            None => write!(f, "{id}"),
        }
    }

    fn write_node(&self, f: &mut fmt::Formatter<'_>, node: &Node, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);
        write!(f, "{pad}")?;
        for (idx, output) in node.outputs.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            self.write_type(f, *output)?;
        }
        if !node.outputs.is_empty() {
            write!(f, " = ")?;
        }
        write!(f, "{}", node.op.kind())?;
        match &node.op {
            Operation::Constant(value) => write!(f, "[value={value}]")?,
            Operation::GetAttr(name) => write!(f, "[name=\"{name}\"]")?,
            _ => {}
        }
        write!(f, "(")?;
        for (idx, input) in node.inputs.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{input}")?;
        }
        writeln!(f, ")")?;
        let blocks: Vec<&Block> = match &node.op {
            Operation::If {
                then_block,
                else_block,
            } => vec![then_block, else_block],
            Operation::Loop { body } => vec![body],
            _ => Vec::new(),
        };
        for (idx, block) in blocks.into_iter().enumerate() {
            writeln!(f, "{pad}  block{idx}():")?;
            for inner in &block.nodes {
                self.write_node(f, inner, indent + 2)?;
            }
            let outputs: Vec<String> = block.outputs.iter().map(ToString::to_string).collect();
            writeln!(f, "{pad}    -> ({})", outputs.join(", "))?;
        }
        Ok(())
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph(")?;
        for (idx, input) in self.inputs.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            self.write_type(f, *input)?;
        }
        writeln!(f, "):")?;
        for node in &self.nodes {
            self.write_node(f, node, 1)?;
        }
        let outputs: Vec<String> = self.outputs.iter().map(ToString::to_string).collect();
        writeln!(f, "  return ({})", outputs.join(", "))
    }
}
