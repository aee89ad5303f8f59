//! Execution instances of compiled modules.

mod dump;
mod executor;
mod leak;
mod planner;

use std::collections::HashMap;
use std::sync::Arc;

use crate::compile::StaticModule;
use crate::error::{RuntimeError, RuntimeResult};
use crate::tensor::{Tensor, TensorError};
use crate::value::Value;

pub(crate) use executor::{ExecutionObserver, NoopObserver, Phase};
pub use planner::PlannerStats;

use planner::MemoryPlanner;

/// Where an instance is within an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Idle,
    InputsBound,
    Running { node: usize },
    OutputsReady,
}

/// Cells and planner of an idle instance, kept by its module between module-level calls.
///
/// Holds no reference to the module, so parking it inside the module creates no cycle.
#[derive(Debug)]
pub(crate) struct ParkedInstance {
    cells: Vec<Value>,
    planner: Option<MemoryPlanner>,
}

/// Mutable execution state for one thread.
///
/// Holds the input and node-output cells, reused across invocations, and the optional memory
/// planner. An instance is not shareable; use one per thread or an external pool.
#[derive(Debug)]
pub struct StaticRuntime {
    module: Arc<StaticModule>,
    cells: Vec<Value>,
    planner: Option<MemoryPlanner>,
    state: ExecState,
}

impl StaticRuntime {
    pub fn new(module: Arc<StaticModule>) -> Self {
        let planner = module
            .opts()
            .plans_memory()
            .then(|| MemoryPlanner::new(&module));
        let cells = vec![Value::None; module.num_cells()];
        Self {
            module,
            cells,
            planner,
            state: ExecState::Idle,
        }
    }

    fn unpark(module: Arc<StaticModule>, parked: ParkedInstance) -> Self {
        Self {
            module,
            cells: parked.cells,
            planner: parked.planner,
            state: ExecState::Idle,
        }
    }

    fn park(self) -> ParkedInstance {
        ParkedInstance {
            cells: self.cells,
            planner: self.planner,
        }
    }

    pub fn module(&self) -> &Arc<StaticModule> {
        &self.module
    }

    pub fn state(&self) -> ExecState {
        self.state
    }

    /// Input cells followed by every node's output cells.
    pub fn cells(&self) -> &[Value] {
        &self.cells
    }

    pub fn planner_stats(&self) -> Option<PlannerStats> {
        self.planner.as_ref().map(MemoryPlanner::stats)
    }

    /// Positional tensor invocation. Graph outputs must all be tensors.
    pub fn run(&mut self, inputs: Vec<Tensor>) -> RuntimeResult<Vec<Tensor>> {
        if let Some(index) = self
            .module
            .output_types()
            .iter()
            .position(|ty| ty.as_tensor().is_none())
        {
            return Err(RuntimeError::invalid_argument(format!(
                "output {index} is not a tensor; use `call` for this module"
            )));
        }
        let inputs = inputs.into_iter().map(Value::Tensor).collect();
        let outputs = self.invoke(inputs, &mut NoopObserver)?;
        outputs
            .into_iter()
            .enumerate()
            .map(|(index, value)| {
                value.into_tensor().ok_or_else(|| {
                    RuntimeError::invalid_argument(format!("output {index} is not a tensor"))
                })
            })
            .collect()
    }

    /// Generic invocation with positional and keyword arguments.
    ///
    /// Keywords and defaults require a module compiled from a [`crate::ScriptModule`]. A single
    /// output is returned as is, several outputs as a tuple.
    pub fn call(&mut self, args: Vec<Value>, kwargs: HashMap<String, Value>) -> RuntimeResult<Value> {
        let inputs = self.bind_arguments(args, kwargs)?;
        let mut outputs = self.invoke(inputs, &mut NoopObserver)?;
        Ok(match outputs.len() {
            0 => Value::None,
            1 => outputs.remove(0),
            _ => Value::Tuple(outputs),
        })
    }

    pub(crate) fn bind_arguments(
        &self,
        args: Vec<Value>,
        mut kwargs: HashMap<String, Value>,
    ) -> RuntimeResult<Vec<Value>> {
        let Some(schema) = self.module.schema() else {
            if !kwargs.is_empty() {
                let mut names: Vec<&String> = kwargs.keys().collect();
                names.sort();
                return Err(RuntimeError::invalid_argument(format!(
                    "keyword arguments {names:?} need a module schema"
                )));
            }
            return Ok(args);
        };

        if args.len() > schema.arguments.len() {
            return Err(RuntimeError::invalid_argument(format!(
                "{} takes {} arguments, got {}",
                schema.name,
                schema.arguments.len(),
                args.len()
            )));
        }
        let positional = args.len();
        let mut bound: Vec<Option<Value>> = args.into_iter().map(Some).collect();
        bound.resize(schema.arguments.len(), None);

        for (index, argument) in schema.arguments.iter().enumerate() {
            let Some(value) = kwargs.remove(&argument.name) else {
                continue;
            };
            if index < positional {
                return Err(RuntimeError::invalid_argument(format!(
                    "{} got multiple values for argument `{}`",
                    schema.name, argument.name
                )));
            }
            bound[index] = Some(value);
        }
        if !kwargs.is_empty() {
            let mut names: Vec<String> = kwargs.into_keys().collect();
            names.sort();
            return Err(RuntimeError::invalid_argument(format!(
                "{} got unexpected keyword arguments {names:?}",
                schema.name
            )));
        }

        bound
            .into_iter()
            .zip(&schema.arguments)
            .map(|(value, argument)| {
                value
                    .or_else(|| argument.default.clone())
                    .ok_or_else(|| {
                        RuntimeError::invalid_argument(format!(
                            "{} missing argument `{}`",
                            schema.name, argument.name
                        ))
                    })
            })
            .collect()
    }
}

impl StaticModule {
    /// Runs the module on an instance it keeps for itself, created on first use.
    ///
    /// Concurrent callers are serialized. Threads that should run in parallel each take their own
    /// instance from [`StaticModule::runtime`].
    pub fn run(self: &Arc<Self>, inputs: Vec<Tensor>) -> RuntimeResult<Vec<Tensor>> {
        self.with_cached_runtime(|runtime| runtime.run(inputs))
    }

    /// Module-level counterpart of [`StaticRuntime::call`].
    pub fn call(
        self: &Arc<Self>,
        args: Vec<Value>,
        kwargs: HashMap<String, Value>,
    ) -> RuntimeResult<Value> {
        self.with_cached_runtime(|runtime| runtime.call(args, kwargs))
    }

    fn with_cached_runtime<T>(
        self: &Arc<Self>,
        f: impl FnOnce(&mut StaticRuntime) -> RuntimeResult<T>,
    ) -> RuntimeResult<T> {
        let mut cached = self
            .cached_runtime()
            .lock()
            .map_err(|_| TensorError::Poisoned)?;
        let mut runtime = match cached.take() {
            Some(parked) => StaticRuntime::unpark(Arc::clone(self), parked),
            None => {
                tracing::debug!(nodes = self.num_nodes(), "creating cached runtime");
                StaticRuntime::new(Arc::clone(self))
            }
        };
        let result = f(&mut runtime);
        *cached = Some(runtime.park());
        result
    }
}
