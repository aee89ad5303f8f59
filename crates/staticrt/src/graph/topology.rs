use std::collections::HashSet;
use std::fmt;

use super::{Graph, ValueId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// A node reads a value that is not defined by an input or an earlier node.
    MissingOperand { value: ValueId, node: usize },
    /// A value is produced more than once.
    Redefined { value: ValueId, node: Option<usize> },
    /// A graph output is never produced.
    MissingOutput { value: ValueId },
}

impl fmt::Display for TopologyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyError::MissingOperand { value, node } => {
                write!(f, "operand value {value} is missing before node {node}")
            }
            TopologyError::Redefined {
                value,
                node: Some(node),
            } => write!(f, "value {value} is redefined by node {node}"),
            TopologyError::Redefined { value, node: None } => {
                write!(f, "value {value} is listed twice as a graph input")
            }
            TopologyError::MissingOutput { value } => {
                write!(f, "graph output {value} is never produced")
            }
        }
    }
}

/// Checks that top-level nodes only read values defined earlier in emission order.
pub fn validate_graph_topology(graph: &Graph) -> Result<(), TopologyError> {
    let mut available = HashSet::new();
    for id in &graph.inputs {
        if !available.insert(*id) {
            return Err(TopologyError::Redefined {
                value: *id,
                node: None,
            });
        }
    }

    for (index, node) in graph.nodes.iter().enumerate() {
        for input in &node.inputs {
            if !available.contains(input) {
                return Err(TopologyError::MissingOperand {
                    value: *input,
                    node: index,
                });
            }
        }
        for output in &node.outputs {
            if !available.insert(*output) {
                return Err(TopologyError::Redefined {
                    value: *output,
                    node: Some(index),
                });
            }
        }
    }

    for output in &graph.outputs {
        if !available.contains(output) {
            return Err(TopologyError::MissingOutput { value: *output });
        }
    }

    Ok(())
}
