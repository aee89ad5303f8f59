//! Lowers a frozen graph into a flat list of processed nodes addressed by [`ValueSlot`]s.

use std::collections::{BTreeMap, HashMap};

use crate::error::{RuntimeError, RuntimeResult};
use crate::graph::{validate_graph_topology, Graph, Operation, ValueId};
use crate::kernels::{AliasKind, KernelRegistry, NodeKernel};
use crate::value::{Value, ValueType};

use super::node::{InputSlots, ProcessedNode, ValueSlot};

/// Result of lowering, consumed by analysis and by [`super::StaticModule`].
#[derive(Debug, Clone)]
pub(crate) struct LoweredGraph {
    pub constants: Vec<Value>,
    pub nodes: Vec<ProcessedNode>,
    pub input_types: Vec<ValueType>,
    pub output_slots: Vec<ValueSlot>,
    pub output_types: Vec<ValueType>,
    pub first_input_is_self: bool,
    pub num_cells: usize,
}

/// Where `prim::GetAttr` reads its values from.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Attributes<'a> {
    /// Free graph: there is no `self` input.
    Absent,
    /// Weighted module whose input 0 is `self`.
    Frozen(&'a BTreeMap<String, Value>),
    /// Legality check only. A module-typed input 0 is taken as `self` and attribute reads are
    /// not resolved.
    Unresolved,
}

/// Whether `graph` can be compiled against `registry`, without building a module.
///
/// Runs the same walk as compilation, so a `true` here means only attribute lookups (for module
/// graphs) can still fail.
pub fn can_enable_static_runtime(graph: &Graph, registry: &KernelRegistry) -> bool {
    match lower_graph(graph, Attributes::Unresolved, registry, false) {
        Ok(_) => true,
        Err(err) => {
            tracing::debug!(error = %err, "graph cannot run on the static runtime");
            false
        }
    }
}

/// Lowers `graph` into processed nodes over flat value slots.
pub(crate) fn lower_graph(
    graph: &Graph,
    attributes: Attributes<'_>,
    registry: &KernelRegistry,
    enable_out_variant: bool,
) -> RuntimeResult<LoweredGraph> {
    validate_graph_topology(graph).map_err(|err| RuntimeError::unsupported(err.to_string()))?;

    let takes_self = match attributes {
        Attributes::Absent => false,
        Attributes::Frozen(_) => true,
        Attributes::Unresolved => graph
            .inputs
            .first()
            .is_some_and(|id| matches!(graph.value_type(*id), Some(ValueType::Module))),
    };
    let self_id = if takes_self {
        let Some(first) = graph.inputs.first().copied() else {
            return Err(RuntimeError::unsupported("module graph has no `self` input"));
        };
        if !matches!(graph.value_type(first), Some(ValueType::Module)) {
            return Err(RuntimeError::unsupported(format!(
                "module graph input {first} must have module type"
            )));
        }
        Some(first)
    } else {
        None
    };

    let mut slots: HashMap<ValueId, ValueSlot> = HashMap::new();
    let mut input_types = Vec::new();
    for id in &graph.inputs {
        if Some(*id) == self_id {
            continue;
        }
        let ty = lowerable_type(graph, *id)?;
        if matches!(ty, ValueType::Module) {
            return Err(RuntimeError::unsupported(format!(
                "input {id} has module type but is not the `self` argument of a weighted module"
            )));
        }
        slots.insert(*id, ValueSlot::Input(input_types.len()));
        input_types.push(ty.clone());
    }

    let mut constants: Vec<Value> = Vec::new();
    let mut nodes: Vec<ProcessedNode> = Vec::new();
    let mut next_cell = input_types.len();

    for (graph_index, node) in graph.nodes.iter().enumerate() {
        let mut output_types = Vec::with_capacity(node.outputs.len());
        for output in &node.outputs {
            let ty = lowerable_type(graph, *output)?;
            if matches!(ty, ValueType::Module) {
                return Err(RuntimeError::unsupported(format!(
                    "value {output} of module type cannot be produced by a node"
                )));
            }
            output_types.push(ty.clone());
        }

        if node.op.is_control_flow() {
            return Err(RuntimeError::unsupported(format!(
                "control flow {} at graph node {graph_index}",
                node.op.kind()
            )));
        }

        match &node.op {
            Operation::Constant(value) => {
                let [output] = node.outputs.as_slice() else {
                    return Err(RuntimeError::unsupported(format!(
                        "constant at graph node {graph_index} must define exactly one value"
                    )));
                };
                if !node.inputs.is_empty() {
                    return Err(RuntimeError::unsupported(format!(
                        "constant at graph node {graph_index} takes no inputs"
                    )));
                }
                if !value.is_none() {
                    output_types[0].check(value).map_err(|detail| {
                        RuntimeError::unsupported(format!("constant {output}: {detail}"))
                    })?;
                }
                slots.insert(*output, ValueSlot::Constant(constants.len()));
                constants.push(value.clone());
            }
            Operation::GetAttr(name) => {
                let Some(self_id) = self_id else {
                    return Err(RuntimeError::unsupported(format!(
                        "attribute access `{name}` outside a weighted module"
                    )));
                };
                if node.inputs.as_slice() != [self_id] {
                    return Err(RuntimeError::unsupported(format!(
                        "attribute access `{name}` must read from `self`"
                    )));
                }
                let [output] = node.outputs.as_slice() else {
                    return Err(RuntimeError::unsupported(format!(
                        "attribute access `{name}` must define exactly one value"
                    )));
                };
                let value = match attributes {
                    Attributes::Frozen(attributes) => {
                        let value = attributes.get(name).ok_or_else(|| {
                            RuntimeError::unsupported(format!("module has no attribute `{name}`"))
                        })?;
                        output_types[0].check(value).map_err(|detail| {
                            RuntimeError::unsupported(format!("attribute `{name}`: {detail}"))
                        })?;
                        value.clone()
                    }
                    Attributes::Absent | Attributes::Unresolved => Value::None,
                };
                slots.insert(*output, ValueSlot::Constant(constants.len()));
                constants.push(value);
            }
            Operation::Call(op) => {
                if self_id.is_some_and(|id| node.inputs.contains(&id)) {
                    return Err(RuntimeError::unsupported(format!(
                        "`self` passed to {op} at graph node {graph_index}"
                    )));
                }
                let def = registry.get(op).ok_or_else(|| {
                    RuntimeError::unsupported(format!("no kernel registered for {op}"))
                })?;
                if def.alias == AliasKind::View && node.inputs.is_empty() {
                    return Err(RuntimeError::unsupported(format!(
                        "view operator {op} at graph node {graph_index} has no input to alias"
                    )));
                }
                let inputs = node
                    .inputs
                    .iter()
                    .map(|id| {
                        slots.get(id).copied().ok_or_else(|| {
                            RuntimeError::unsupported(format!(
                                "value {id} used by {op} is not defined"
                            ))
                        })
                    })
                    .collect::<RuntimeResult<InputSlots>>()?;
                let index = nodes.len();
                for (output_index, output) in node.outputs.iter().enumerate() {
                    slots.insert(*output, ValueSlot::output(index, output_index));
                }
                nodes.push(ProcessedNode {
                    op: op.clone(),
                    kernel: NodeKernel::resolve(def, enable_out_variant),
                    alias: def.alias,
                    inputs,
                    output_types,
                    output_ids: node.outputs.clone(),
                    output_offset: next_cell,
                });
                next_cell += node.outputs.len();
            }
            Operation::If { .. } | Operation::Loop { .. } => {}
        }
    }

    let mut output_slots = Vec::with_capacity(graph.outputs.len());
    let mut output_types = Vec::with_capacity(graph.outputs.len());
    for id in &graph.outputs {
        if Some(*id) == self_id {
            return Err(RuntimeError::unsupported(
                "`self` cannot be returned from a module",
            ));
        }
        let slot = slots.get(id).copied().ok_or_else(|| {
            RuntimeError::unsupported(format!("graph output {id} is never produced"))
        })?;
        output_slots.push(slot);
        output_types.push(lowerable_type(graph, *id)?.clone());
    }

    Ok(LoweredGraph {
        constants,
        nodes,
        input_types,
        output_slots,
        output_types,
        first_input_is_self: self_id.is_some(),
        num_cells: next_cell,
    })
}

fn lowerable_type(graph: &Graph, id: ValueId) -> RuntimeResult<&ValueType> {
    let ty = graph
        .value_type(id)
        .ok_or_else(|| RuntimeError::unsupported(format!("value {id} has no type")))?;
    if let Some(part) = ty.unsupported_part() {
        return Err(RuntimeError::unsupported(format!(
            "value {id} has unsupported type {part}"
        )));
    }
    Ok(ty)
}
