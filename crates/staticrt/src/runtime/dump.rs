use std::collections::HashMap;
use std::fmt::Write as _;
use std::time::Duration;

use crate::compile::ProcessedNode;
use crate::error::RuntimeResult;
use crate::value::Value;

use super::{ExecutionObserver, StaticRuntime};

struct NodeDump {
    text: String,
}

impl ExecutionObserver for NodeDump {
    const TIMED: bool = false;

    fn node_finished(
        &mut self,
        index: usize,
        node: &ProcessedNode,
        inputs: &[&Value],
        outputs: &[Value],
        _elapsed: Duration,
    ) {
        let _ = writeln!(
            self.text,
            "node {index}: {} [{}]",
            node.op(),
            node.kernel().label()
        );
        for (slot, value) in node.inputs().iter().zip(inputs) {
            let _ = writeln!(self.text, "  in  {slot}: {value}");
        }
        for (output, value) in outputs.iter().enumerate() {
            let _ = writeln!(self.text, "  out {}: {value}", node.output_ids()[output]);
        }
    }
}

impl StaticRuntime {
    /// Runs one invocation and renders every node with the values it consumed and produced.
    pub fn display_nodes(
        &mut self,
        args: Vec<Value>,
        kwargs: HashMap<String, Value>,
    ) -> RuntimeResult<String> {
        let inputs = self.bind_arguments(args, kwargs)?;
        let mut dump = NodeDump {
            text: String::new(),
        };
        let outputs = self.invoke(inputs, &mut dump)?;
        for (index, value) in outputs.iter().enumerate() {
            let _ = writeln!(dump.text, "output {index}: {value}");
        }
        tracing::debug!(nodes = self.module.num_nodes(), "rendered node dump");
        Ok(dump.text)
    }
}
