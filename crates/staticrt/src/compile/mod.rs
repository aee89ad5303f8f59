//! Compilation of frozen graphs into [`StaticModule`]s.

mod analysis;
mod lower;
mod node;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use crate::error::{RuntimeError, RuntimeResult};
use crate::graph::Graph;
use crate::kernels::KernelRegistry;
use crate::module::{FunctionSchema, ScriptModule};
use crate::options::StaticModuleOptions;
use crate::runtime::{ParkedInstance, StaticRuntime};
use crate::value::{Value, ValueType};

pub use lower::can_enable_static_runtime;

pub use analysis::{LiveRange, PlannedOutput, StorageAnalysis, StoragePlan, StorageSlot};
pub use node::{InputSlots, ProcessedNode, ValueSlot};

/// What a [`StaticModule`] was compiled from.
#[derive(Debug)]
enum Source {
    Graph(Graph),
    Module(ScriptModule),
}

/// Compiled, immutable form of a graph. Share it between threads through an [`Arc`] and give
/// every thread its own [`StaticRuntime`].
#[derive(Debug)]
pub struct StaticModule {
    source: Source,
    options: StaticModuleOptions,
    constants: Vec<Value>,
    nodes: Vec<ProcessedNode>,
    input_types: Vec<ValueType>,
    output_slots: Vec<ValueSlot>,
    output_types: Vec<ValueType>,
    first_input_is_self: bool,
    num_cells: usize,
    analysis: StorageAnalysis,
    cached_runtime: Mutex<Option<ParkedInstance>>,
}

impl StaticModule {
    /// Compiles a free-standing graph against the global kernel registry.
    pub fn new(graph: Graph, options: StaticModuleOptions) -> RuntimeResult<Self> {
        Self::with_registry(graph, options, KernelRegistry::global())
    }

    pub fn with_registry(
        graph: Graph,
        options: StaticModuleOptions,
        registry: &KernelRegistry,
    ) -> RuntimeResult<Self> {
        Self::build(Source::Graph(graph), options, registry)
    }

    /// Compiles a weighted module, freezing its attributes into constants.
    pub fn from_module(module: ScriptModule, options: StaticModuleOptions) -> RuntimeResult<Self> {
        Self::from_module_with_registry(module, options, KernelRegistry::global())
    }

    pub fn from_module_with_registry(
        module: ScriptModule,
        options: StaticModuleOptions,
        registry: &KernelRegistry,
    ) -> RuntimeResult<Self> {
        tracing::debug!(
            module = %module.name,
            attributes = module.attributes.len(),
            "freezing module"
        );
        Self::build(Source::Module(module), options, registry)
    }

    fn build(
        source: Source,
        options: StaticModuleOptions,
        registry: &KernelRegistry,
    ) -> RuntimeResult<Self> {
        options.validate()?;
        let (graph, attributes) = match &source {
            Source::Graph(graph) => (graph, lower::Attributes::Absent),
            Source::Module(module) => {
                (&module.graph, lower::Attributes::Frozen(&module.attributes))
            }
        };
        let lowered = lower::lower_graph(graph, attributes, registry, options.enable_out_variant)?;
        if let Source::Module(module) = &source {
            check_schema(&module.schema, &lowered.input_types)?;
        }
        let analysis = analysis::analyze(&lowered, &options);

        tracing::debug!(
            nodes = lowered.nodes.len(),
            constants = lowered.constants.len(),
            inputs = lowered.input_types.len(),
            outputs = lowered.output_slots.len(),
            external = analysis.external.len(),
            managed = analysis.plan.num_managed(),
            slots = analysis.plan.slots.len(),
            managed_bytes = analysis.plan.managed_bytes(),
            "compiled static module"
        );

        Ok(Self {
            source,
            options,
            constants: lowered.constants,
            nodes: lowered.nodes,
            input_types: lowered.input_types,
            output_slots: lowered.output_slots,
            output_types: lowered.output_types,
            first_input_is_self: lowered.first_input_is_self,
            num_cells: lowered.num_cells,
            analysis,
            cached_runtime: Mutex::new(None),
        })
    }

    /// Creates a fresh execution instance over this module.
    pub fn runtime(self: &Arc<Self>) -> StaticRuntime {
        StaticRuntime::new(Arc::clone(self))
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> &[ProcessedNode] {
        &self.nodes
    }

    /// Input slots of every processed node, indexed by node.
    pub fn index_map(&self) -> Vec<&[ValueSlot]> {
        self.nodes.iter().map(ProcessedNode::inputs).collect()
    }

    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    pub fn output_indices(&self) -> &[ValueSlot] {
        &self.output_slots
    }

    pub fn output_types(&self) -> &[ValueType] {
        &self.output_types
    }

    pub fn input_types(&self) -> &[ValueType] {
        &self.input_types
    }

    pub fn num_inputs(&self) -> usize {
        self.input_types.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.output_slots.len()
    }

    pub fn first_input_is_self(&self) -> bool {
        self.first_input_is_self
    }

    pub fn graph(&self) -> &Graph {
        match &self.source {
            Source::Graph(graph) => graph,
            Source::Module(module) => &module.graph,
        }
    }

    /// The weighted module this was compiled from, with the attributes it was frozen with.
    pub fn module(&self) -> Option<&ScriptModule> {
        match &self.source {
            Source::Graph(_) => None,
            Source::Module(module) => Some(module),
        }
    }

    pub fn schema(&self) -> Option<&FunctionSchema> {
        self.module().map(|module| &module.schema)
    }

    pub fn opts(&self) -> &StaticModuleOptions {
        &self.options
    }

    pub fn external_values(&self) -> &BTreeSet<ValueSlot> {
        &self.analysis.external
    }

    pub fn is_external(&self, value: ValueSlot) -> bool {
        self.analysis.external.contains(&value)
    }

    pub fn storage_plan(&self) -> &StoragePlan {
        &self.analysis.plan
    }

    pub fn analysis(&self) -> &StorageAnalysis {
        &self.analysis
    }

    /// Other values placed in the same planner slot as `value`.
    pub fn sharing_candidates(&self, value: ValueSlot) -> &[ValueSlot] {
        self.analysis
            .sharing
            .get(&value)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whether two values may be backed by the same storage, either through a planner slot or
    /// through aliasing (views and containers).
    pub fn values_share_same_storage(&self, a: ValueSlot, b: ValueSlot) -> bool {
        if a == b {
            return true;
        }
        let plan = &self.analysis.plan;
        if let (Some(left), Some(right)) = (plan.assignment.get(&a), plan.assignment.get(&b)) {
            if left == right {
                return true;
            }
        }
        self.analysis.same_alias_group(a, b)
    }

    pub fn live_range(&self, value: ValueSlot) -> Option<LiveRange> {
        self.analysis.live_ranges.get(&value).copied()
    }

    /// Cell holding `value` in an instance, `None` for constants.
    pub fn cell_index(&self, value: ValueSlot) -> Option<usize> {
        match value {
            ValueSlot::Constant(_) => None,
            ValueSlot::Input(index) => (index < self.input_types.len()).then_some(index),
            ValueSlot::NodeOutput { node, output } => {
                let processed = self.nodes.get(node)?;
                (output < processed.num_outputs()).then(|| processed.output_offset() + output)
            }
        }
    }

    pub fn num_cells(&self) -> usize {
        self.num_cells
    }

    pub(crate) fn cached_runtime(&self) -> &Mutex<Option<ParkedInstance>> {
        &self.cached_runtime
    }
}

/// The schema must describe exactly the graph's non-`self` inputs.
fn check_schema(schema: &FunctionSchema, input_types: &[ValueType]) -> RuntimeResult<()> {
    if schema.arguments.len() != input_types.len() {
        return Err(RuntimeError::unsupported(format!(
            "schema {schema} declares {} arguments but the graph takes {}",
            schema.arguments.len(),
            input_types.len()
        )));
    }
    for (argument, ty) in schema.arguments.iter().zip(input_types) {
        if argument.ty != *ty {
            return Err(RuntimeError::unsupported(format!(
                "argument `{}` of {} is declared {} but the graph input is {ty}",
                argument.name, schema.name, argument.ty
            )));
        }
        if let Some(default) = &argument.default {
            ty.check(default).map_err(|detail| {
                RuntimeError::unsupported(format!(
                    "default of argument `{}`: {detail}",
                    argument.name
                ))
            })?;
        }
    }
    Ok(())
}
