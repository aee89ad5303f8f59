use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::compile::{StaticModule, ValueSlot};
use crate::error::RuntimeResult;
use crate::tensor::{DType, Storage, Tensor};
use crate::value::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerStats {
    /// Cells whose storage comes from a planner slot.
    pub managed_tensors: usize,
    /// Managed cells placed in a slot opened by another value.
    pub reused_tensors: usize,
    /// Bytes allocated for slots on every invocation.
    pub managed_bytes: usize,
    /// Bytes allocated up front for graph outputs.
    pub output_bytes: usize,
    /// Number of batch allocations performed so far.
    pub allocations: usize,
}

#[derive(Debug, Clone)]
struct CellBinding {
    cell: usize,
    buffer: usize,
    dtype: DType,
    dims: Vec<usize>,
}

/// Per-instance owner of activation storage.
///
/// Storage for every slot of the module's plan is allocated in one batch before the nodes run and
/// released in one batch afterwards. Managed cells keep their tensor shell between invocations.
#[derive(Debug)]
pub(crate) struct MemoryPlanner {
    buffer_bytes: Vec<usize>,
    managed: Vec<CellBinding>,
    outputs: Vec<CellBinding>,
    buffers: Vec<Arc<Storage>>,
    stats: PlannerStats,
}

impl MemoryPlanner {
    pub(crate) fn new(module: &StaticModule) -> Self {
        let plan = module.storage_plan();
        let mut buffer_bytes: Vec<usize> = plan.slots.iter().map(|slot| slot.byte_len).collect();

        let mut managed = Vec::with_capacity(plan.assignment.len());
        for (value, slot) in &plan.assignment {
            if let Some(binding) = binding_for(module, *value, *slot) {
                managed.push(binding);
            }
        }

        let mut outputs = Vec::with_capacity(plan.planned_outputs.len());
        for planned in &plan.planned_outputs {
            let buffer = buffer_bytes.len();
            if let Some(binding) = binding_for(module, planned.value, buffer) {
                buffer_bytes.push(planned.byte_len);
                outputs.push(binding);
            }
        }

        let stats = PlannerStats {
            managed_tensors: managed.len(),
            reused_tensors: plan.num_reused(),
            managed_bytes: plan.managed_bytes(),
            output_bytes: plan.planned_output_bytes(),
            allocations: 0,
        };
        tracing::debug!(
            slots = plan.slots.len(),
            managed = stats.managed_tensors,
            reused = stats.reused_tensors,
            managed_bytes = stats.managed_bytes,
            output_bytes = stats.output_bytes,
            "created memory planner"
        );

        Self {
            buffer_bytes,
            managed,
            outputs,
            buffers: Vec::new(),
            stats,
        }
    }

    /// Allocates every buffer and binds the managed and planned output cells onto them.
    pub(crate) fn allocate(&mut self, cells: &mut [Value]) -> RuntimeResult<()> {
        self.buffers = self
            .buffer_bytes
            .iter()
            .map(|bytes| Arc::new(Storage::zeroed(*bytes)))
            .collect();
        for binding in self.managed.iter().chain(&self.outputs) {
            let storage = Arc::clone(&self.buffers[binding.buffer]);
            cells[binding.cell] = Value::Tensor(Tensor::with_storage(
                binding.dtype,
                &binding.dims,
                storage,
            )?);
        }
        self.stats.allocations += 1;
        Ok(())
    }

    /// Releases all planner storage. Managed cells keep a detached shell.
    pub(crate) fn deallocate(&mut self, cells: &mut [Value]) {
        for binding in &self.managed {
            if let Value::Tensor(tensor) = &mut cells[binding.cell] {
                tensor.detach_storage();
            }
        }
        for binding in &self.outputs {
            cells[binding.cell] = Value::None;
        }
        self.buffers.clear();
    }

    pub(crate) fn stats(&self) -> PlannerStats {
        self.stats
    }
}

fn binding_for(module: &StaticModule, value: ValueSlot, buffer: usize) -> Option<CellBinding> {
    let ValueSlot::NodeOutput { node, output } = value else {
        return None;
    };
    let spec = module.nodes().get(node)?.output_types().get(output)?.as_tensor()?;
    Some(CellBinding {
        cell: module.cell_index(value)?,
        buffer,
        dtype: spec.dtype,
        dims: spec.shape.static_dims()?,
    })
}
