use crate::compile::ValueSlot;
use crate::error::{LeakReport, LeakedCell, RuntimeError, RuntimeResult};
use crate::value::Value;

use super::StaticRuntime;

impl StaticRuntime {
    /// Verifies that no cell still owns data it should have released.
    ///
    /// Inputs must be empty. Planner-managed cells may only hold a detached shell. With
    /// `cleanup_activations` every other intermediate must be empty too. Graph outputs are only
    /// inspected when `output_returned` is false.
    pub fn check_for_memory_leak(&self, output_returned: bool) -> RuntimeResult<()> {
        let module = &self.module;
        let analysis = module.analysis();
        let cleanup = module.opts().cleanup_activations;
        let mut report = LeakReport::default();

        for (cell, value) in self.cells[..module.num_inputs()].iter().enumerate() {
            if !value.is_none() {
                report.leaks.push(LeakedCell {
                    cell,
                    description: format!("input {cell} still holds a {}", value.kind_name()),
                });
            }
        }

        for (index, node) in module.nodes().iter().enumerate() {
            for output in 0..node.num_outputs() {
                let slot = ValueSlot::output(index, output);
                let cell = node.output_offset() + output;
                let value = &self.cells[cell];
                let is_output = module.output_indices().contains(&slot);
                if is_output && output_returned {
                    continue;
                }
                let leaked = if analysis.is_managed(slot) {
                    match value {
                        Value::None => false,
                        Value::Tensor(tensor) => !tensor.storage().is_detached(),
                        _ => true,
                    }
                } else {
                    (cleanup || is_output) && !value.is_none()
                };
                if leaked {
                    report.leaks.push(LeakedCell {
                        cell,
                        description: format!(
                            "{} output {output} of node {index} ({}) still holds {value}",
                            if is_output { "graph" } else { "intermediate" },
                            node.op()
                        ),
                    });
                }
            }
        }

        if report.is_empty() {
            Ok(())
        } else {
            tracing::warn!(leaks = report.leaks.len(), "memory leak check failed");
            Err(RuntimeError::MemoryInvariantViolation(report))
        }
    }
}
