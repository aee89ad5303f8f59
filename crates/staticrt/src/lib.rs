//! Ahead-of-time compiled executor for frozen tensor dataflow graphs.
//!
//! A [`Graph`] (or a weighted [`ScriptModule`]) is compiled once into a [`StaticModule`]: a flat
//! list of processed nodes addressed through [`ValueSlot`]s, together with a static storage plan.
//! Each thread then drives its own [`StaticRuntime`], which reuses its value cells and planner
//! storage across invocations.
//!
//! ```ignore
//! let module = Arc::new(StaticModule::new(graph, StaticModuleOptions::default())?);
//! let mut runtime = module.runtime();
//! let outputs = runtime.run(vec![input])?;
//! ```

pub use linkme;

pub mod compile;
mod env;
pub mod error;
pub mod graph;
pub mod kernels;
pub mod module;
pub mod options;
pub mod profiling;
pub mod runtime;
pub mod tensor;
pub mod value;

pub use compile::{
    can_enable_static_runtime, ProcessedNode, StaticModule, StoragePlan, ValueSlot,
};
pub use error::{LeakReport, RuntimeError, RuntimeResult};
pub use graph::{Graph, GraphBuilder, ValueId};
pub use kernels::{KernelError, KernelRegistry, OperatorDef};
pub use module::{Argument, FunctionSchema, ScriptModule};
pub use options::StaticModuleOptions;
pub use profiling::{BenchmarkSummary, IndividualMetrics};
pub use runtime::{ExecState, PlannerStats, StaticRuntime};
pub use tensor::{DType, Tensor, TensorSpec};
pub use value::{Value, ValueType};
