use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::graph::ValueId;
use crate::kernels::{AliasKind, NodeKernel};
use crate::value::ValueType;

/// Location of a value in the compiled module.
///
/// Constants live in the module's constant table; inputs and node outputs live in the cell table
/// of each [`crate::StaticRuntime`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValueSlot {
    Constant(usize),
    Input(usize),
    NodeOutput { node: usize, output: usize },
}

impl ValueSlot {
    pub fn output(node: usize, output: usize) -> Self {
        ValueSlot::NodeOutput { node, output }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, ValueSlot::Constant(_))
    }

    pub fn is_input(&self) -> bool {
        matches!(self, ValueSlot::Input(_))
    }

    pub fn node(&self) -> Option<usize> {
        match self {
            ValueSlot::NodeOutput { node, .. } => Some(*node),
            _ => None,
        }
    }
}

impl fmt::Display for ValueSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSlot::Constant(index) => write!(f, "c{index}"),
            ValueSlot::Input(index) => write!(f, "i{index}"),
            ValueSlot::NodeOutput { node, output } => write!(f, "n{node}.{output}"),
        }
    }
}

pub type InputSlots = SmallVec<[ValueSlot; 4]>;

/// Executable node of a compiled module. Immutable after compilation.
#[derive(Debug, Clone)]
pub struct ProcessedNode {
    pub(crate) op: String,
    pub(crate) kernel: NodeKernel,
    pub(crate) alias: AliasKind,
    pub(crate) inputs: InputSlots,
    pub(crate) output_types: Vec<ValueType>,
    pub(crate) output_ids: Vec<ValueId>,
    pub(crate) output_offset: usize,
}

impl ProcessedNode {
    pub fn op(&self) -> &str {
        &self.op
    }

    pub fn kernel(&self) -> NodeKernel {
        self.kernel
    }

    pub fn alias(&self) -> AliasKind {
        self.alias
    }

    pub fn inputs(&self) -> &[ValueSlot] {
        &self.inputs
    }

    pub fn num_outputs(&self) -> usize {
        self.output_types.len()
    }

    pub fn output_types(&self) -> &[ValueType] {
        &self.output_types
    }

    /// Graph values this node defines, in output order.
    pub fn output_ids(&self) -> &[ValueId] {
        &self.output_ids
    }

    /// First cell of this node's outputs in the instance cell table.
    pub fn output_offset(&self) -> usize {
        self.output_offset
    }

    pub fn is_out_variant(&self) -> bool {
        self.kernel.is_out_variant()
    }
}
