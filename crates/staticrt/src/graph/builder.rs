use std::collections::HashMap;

use crate::value::{Value, ValueType};

use super::{Graph, Node, Operation, ValueId};

/// Lightweight builder for constructing graphs programmatically.
#[derive(Default)]
pub struct GraphBuilder {
    next_value_id: u32,
    inputs: Vec<(ValueId, String)>,
    nodes: Vec<Node>,
    types: HashMap<ValueId, ValueType>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a value id with a type but no producer; used for hand-built nodes.
    pub fn fresh_value(&mut self, ty: ValueType) -> ValueId {
        let id = ValueId(self.next_value_id);
        self.next_value_id += 1;
        self.types.insert(id, ty);
        id
    }

    pub fn add_input(&mut self, name: impl Into<String>, ty: ValueType) -> ValueId {
        let id = self.fresh_value(ty);
        self.inputs.push((id, name.into()));
        id
    }

    /// Adds the `self` argument of a weighted module. Must be the first input.
    pub fn add_self_input(&mut self) -> ValueId {
        self.add_input("self", ValueType::Module)
    }

    pub fn constant(&mut self, value: Value, ty: ValueType) -> ValueId {
        let id = self.fresh_value(ty);
        self.nodes.push(Node {
            op: Operation::Constant(value),
            inputs: Vec::new(),
            outputs: vec![id],
        });
        id
    }

    pub fn get_attr(&mut self, module: ValueId, name: impl Into<String>, ty: ValueType) -> ValueId {
        let id = self.fresh_value(ty);
        self.nodes.push(Node {
            op: Operation::GetAttr(name.into()),
            inputs: vec![module],
            outputs: vec![id],
        });
        id
    }

    pub fn call(&mut self, op: impl Into<String>, inputs: &[ValueId], output: ValueType) -> ValueId {
        let id = self.fresh_value(output);
        self.nodes.push(Node {
            op: Operation::Call(op.into()),
            inputs: inputs.to_vec(),
            outputs: vec![id],
        });
        id
    }

    pub fn call_multi(
        &mut self,
        op: impl Into<String>,
        inputs: &[ValueId],
        outputs: Vec<ValueType>,
    ) -> Vec<ValueId> {
        let ids: Vec<ValueId> = outputs.into_iter().map(|ty| self.fresh_value(ty)).collect();
        self.nodes.push(Node {
            op: Operation::Call(op.into()),
            inputs: inputs.to_vec(),
            outputs: ids.clone(),
        });
        ids
    }

    /// Appends an arbitrary node, e.g. control flow produced by a frontend.
    pub fn push_node(&mut self, node: Node) {
        self.nodes.push(node);
    }

    pub fn value_type(&self, id: ValueId) -> Option<&ValueType> {
        self.types.get(&id)
    }

    pub fn finish(self, outputs: Vec<ValueId>) -> Graph {
        let (inputs, input_names): (Vec<_>, Vec<_>) = self.inputs.into_iter().unzip();
        Graph {
            inputs,
            input_names,
            nodes: self.nodes,
            outputs,
            types: self.types,
        }
    }
}
