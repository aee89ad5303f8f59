use std::sync::Arc;
use std::time::{Duration, Instant};

use smallvec::SmallVec;

use crate::compile::{ProcessedNode, StaticModule, ValueSlot};
use crate::error::{RuntimeError, RuntimeResult};
use crate::kernels::{KernelError, NodeKernel};
use crate::value::Value;

use super::{ExecState, StaticRuntime};

/// Invocation phases reported to an [`ExecutionObserver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Argument checks and input binding.
    Setup,
    MemoryAlloc,
    MemoryDealloc,
    /// Moving graph outputs out of their cells.
    OutputDealloc,
}

/// Hooks used by diagnostics to watch an invocation without a second execution path.
pub(crate) trait ExecutionObserver {
    /// Whether the engine should take timestamps at all.
    const TIMED: bool;

    fn phase(&mut self, _phase: Phase, _elapsed: Duration) {}

    fn node_finished(
        &mut self,
        _index: usize,
        _node: &ProcessedNode,
        _inputs: &[&Value],
        _outputs: &[Value],
        _elapsed: Duration,
    ) {
    }
}

pub(crate) struct NoopObserver;

impl ExecutionObserver for NoopObserver {
    const TIMED: bool = false;
}

fn start_timer<O: ExecutionObserver>() -> Option<Instant> {
    O::TIMED.then(Instant::now)
}

fn elapsed(start: Option<Instant>) -> Duration {
    start.map(|start| start.elapsed()).unwrap_or_default()
}

impl StaticRuntime {
    /// Runs one invocation over already-bound positional values.
    pub(crate) fn invoke<O: ExecutionObserver>(
        &mut self,
        inputs: Vec<Value>,
        observer: &mut O,
    ) -> RuntimeResult<Vec<Value>> {
        let module = Arc::clone(&self.module);
        let setup = start_timer::<O>();
        check_inputs(&module, &inputs)?;
        for (cell, value) in self.cells.iter_mut().zip(inputs) {
            *cell = value;
        }
        self.state = ExecState::InputsBound;
        observer.phase(Phase::Setup, elapsed(setup));

        let result = self.execute(&module, observer);

        let dealloc = start_timer::<O>();
        self.reset_cells(&module);
        self.state = ExecState::Idle;
        observer.phase(Phase::MemoryDealloc, elapsed(dealloc));

        match &result {
            Ok(_) => tracing::trace!(nodes = module.num_nodes(), "invocation finished"),
            Err(err) => tracing::debug!(error = %err, "invocation failed"),
        }
        result
    }

    fn execute<O: ExecutionObserver>(
        &mut self,
        module: &StaticModule,
        observer: &mut O,
    ) -> RuntimeResult<Vec<Value>> {
        if let Some(planner) = self.planner.as_mut() {
            let alloc = start_timer::<O>();
            planner.allocate(&mut self.cells)?;
            observer.phase(Phase::MemoryAlloc, elapsed(alloc));
        }

        for (index, node) in module.nodes().iter().enumerate() {
            self.state = ExecState::Running { node: index };
            let start = start_timer::<O>();
            let (before, rest) = self.cells.split_at_mut(node.output_offset());
            let outputs = &mut rest[..node.num_outputs()];
            let inputs: SmallVec<[&Value; 4]> = node
                .inputs()
                .iter()
                .map(|slot| resolve(module, before, *slot))
                .collect();
            run_kernel(node, &inputs, outputs)
                .map_err(|source| RuntimeError::operator(index, node.op(), source))?;
            observer.node_finished(index, node, &inputs, outputs, elapsed(start));
        }

        let collect = start_timer::<O>();
        let mut results = Vec::with_capacity(module.num_outputs());
        for slot in module.output_indices() {
            let value = match slot {
                ValueSlot::Constant(index) => deep_clone(&module.constants()[*index])?,
                _ => resolve(module, &self.cells, *slot).clone(),
            };
            results.push(value);
        }
        self.state = ExecState::OutputsReady;
        observer.phase(Phase::OutputDealloc, elapsed(collect));
        Ok(results)
    }

    /// Returns the instance to a clean state after an invocation, successful or not.
    fn reset_cells(&mut self, module: &StaticModule) {
        if let Some(planner) = self.planner.as_mut() {
            planner.deallocate(&mut self.cells);
        }
        for cell in &mut self.cells[..module.num_inputs()] {
            *cell = Value::None;
        }

        let cleanup = module.opts().cleanup_activations;
        let analysis = module.analysis();
        for (index, node) in module.nodes().iter().enumerate() {
            for output in 0..node.num_outputs() {
                let slot = ValueSlot::output(index, output);
                if analysis.is_managed(slot) {
                    continue;
                }
                let cell = &mut self.cells[node.output_offset() + output];
                let retain = !cleanup
                    && node.is_out_variant()
                    && !analysis.external.contains(&slot)
                    && matches!(cell, Value::Tensor(tensor) if Arc::strong_count(tensor.storage()) == 1);
                if !retain {
                    *cell = Value::None;
                }
            }
        }
    }
}

fn resolve<'a>(module: &'a StaticModule, cells: &'a [Value], slot: ValueSlot) -> &'a Value {
    match slot {
        ValueSlot::Constant(index) => &module.constants()[index],
        ValueSlot::Input(index) => &cells[index],
        ValueSlot::NodeOutput { node, output } => {
            &cells[module.nodes()[node].output_offset() + output]
        }
    }
}

fn run_kernel(node: &ProcessedNode, inputs: &[&Value], outputs: &mut [Value]) -> Result<(), KernelError> {
    match node.kernel() {
        NodeKernel::Out(kernel) => {
            kernel(inputs, outputs)?;
            if let Some(unset) = outputs.iter().position(Value::is_none) {
                return Err(KernelError::invalid(format!(
                    "out variant left output {unset} unset"
                )));
            }
        }
        NodeKernel::Default(kernel) | NodeKernel::View(kernel) => {
            let produced = kernel(inputs)?;
            if produced.len() != outputs.len() {
                return Err(KernelError::invalid(format!(
                    "expected {} outputs, kernel produced {}",
                    outputs.len(),
                    produced.len()
                )));
            }
            for (cell, value) in outputs.iter_mut().zip(produced) {
                *cell = value;
            }
        }
    }
    Ok(())
}

fn check_inputs(module: &StaticModule, inputs: &[Value]) -> RuntimeResult<()> {
    if inputs.len() != module.num_inputs() {
        return Err(RuntimeError::invalid_argument(format!(
            "expected {} inputs, got {}",
            module.num_inputs(),
            inputs.len()
        )));
    }
    for (index, (ty, value)) in module.input_types().iter().zip(inputs).enumerate() {
        ty.check(value).map_err(|detail| {
            let name = module
                .schema()
                .and_then(|schema| schema.arguments.get(index))
                .map(|arg| arg.name.clone())
                .unwrap_or_else(|| format!("input {index}"));
            RuntimeError::invalid_argument(format!("{name}: {detail}"))
        })?;
    }
    Ok(())
}

/// Copies tensors held by `value` so callers cannot write into module constants.
fn deep_clone(value: &Value) -> RuntimeResult<Value> {
    Ok(match value {
        Value::Tensor(tensor) => Value::Tensor(tensor.deep_clone()?),
        Value::List(items) => Value::List(items.iter().map(deep_clone).collect::<RuntimeResult<_>>()?),
        Value::Tuple(items) => {
            Value::Tuple(items.iter().map(deep_clone).collect::<RuntimeResult<_>>()?)
        }
        other => other.clone(),
    })
}
