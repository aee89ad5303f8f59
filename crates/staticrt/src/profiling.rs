//! Benchmark harness for compiled modules.
//!
//! Every measurement goes through the regular invocation path of [`StaticRuntime`], so the
//! numbers include argument checks, planner allocation and output handling.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::compile::ProcessedNode;
use crate::error::RuntimeResult;
use crate::runtime::{ExecutionObserver, NoopObserver, Phase, StaticRuntime};
use crate::value::Value;

/// Per-node timing breakdown averaged over the main runs. Times are in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndividualMetrics {
    pub setup_time: f64,
    pub memory_alloc_time: f64,
    pub memory_dealloc_time: f64,
    pub output_dealloc_time: f64,
    pub total_time: f64,
    pub time_per_node: Vec<f64>,
    pub time_per_node_type: BTreeMap<String, f64>,
    pub percent_per_node_type: BTreeMap<String, f64>,
    pub instances_per_node_type: BTreeMap<String, usize>,
    pub out_nodes: Vec<String>,
    pub out_nodes_count: usize,
    pub total_nodes_count: usize,
}

/// Model-level and node-level results of [`StaticRuntime::benchmark`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSummary {
    pub warmup_runs: usize,
    pub main_runs: usize,
    /// Mean milliseconds per invocation.
    pub model_time: f64,
    pub individual: IndividualMetrics,
}

impl BenchmarkSummary {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1e3
}

#[derive(Default)]
struct TimingObserver {
    setup: Duration,
    alloc: Duration,
    dealloc: Duration,
    outputs: Duration,
    per_node: Vec<Duration>,
}

impl ExecutionObserver for TimingObserver {
    const TIMED: bool = true;

    fn phase(&mut self, phase: Phase, elapsed: Duration) {
        match phase {
            Phase::Setup => self.setup += elapsed,
            Phase::MemoryAlloc => self.alloc += elapsed,
            Phase::MemoryDealloc => self.dealloc += elapsed,
            Phase::OutputDealloc => self.outputs += elapsed,
        }
    }

    fn node_finished(
        &mut self,
        index: usize,
        _node: &ProcessedNode,
        _inputs: &[&Value],
        _outputs: &[Value],
        elapsed: Duration,
    ) {
        if let Some(slot) = self.per_node.get_mut(index) {
            *slot += elapsed;
        }
    }
}

impl StaticRuntime {
    /// Mean milliseconds per invocation over `main_runs` after `warmup_runs` discarded ones.
    pub fn benchmark_model(
        &mut self,
        args: &[Value],
        kwargs: &HashMap<String, Value>,
        warmup_runs: usize,
        main_runs: usize,
    ) -> RuntimeResult<f64> {
        for _ in 0..warmup_runs {
            let inputs = self.bind_arguments(args.to_vec(), kwargs.clone())?;
            self.invoke(inputs, &mut NoopObserver)?;
        }
        if main_runs == 0 {
            return Ok(0.0);
        }
        let start = Instant::now();
        for _ in 0..main_runs {
            let inputs = self.bind_arguments(args.to_vec(), kwargs.clone())?;
            self.invoke(inputs, &mut NoopObserver)?;
        }
        Ok(ms(start.elapsed()) / main_runs as f64)
    }

    /// Times every phase and node, averaged over `main_runs`.
    pub fn benchmark_individual_ops(
        &mut self,
        args: &[Value],
        kwargs: &HashMap<String, Value>,
        warmup_runs: usize,
        main_runs: usize,
    ) -> RuntimeResult<IndividualMetrics> {
        let module = Arc::clone(self.module());
        let nodes = module.nodes();

        let mut metrics = IndividualMetrics {
            total_nodes_count: nodes.len(),
            ..IndividualMetrics::default()
        };
        for node in nodes {
            *metrics
                .instances_per_node_type
                .entry(node.op().to_string())
                .or_default() += 1;
            if node.is_out_variant() {
                metrics.out_nodes.push(node.op().to_string());
            }
        }
        metrics.out_nodes.sort();
        metrics.out_nodes.dedup();
        metrics.out_nodes_count = nodes.iter().filter(|node| node.is_out_variant()).count();

        for _ in 0..warmup_runs {
            let inputs = self.bind_arguments(args.to_vec(), kwargs.clone())?;
            self.invoke(inputs, &mut NoopObserver)?;
        }
        if main_runs == 0 {
            metrics.time_per_node = vec![0.0; nodes.len()];
            return Ok(metrics);
        }

        let mut timing = TimingObserver {
            per_node: vec![Duration::ZERO; nodes.len()],
            ..TimingObserver::default()
        };
        let start = Instant::now();
        for _ in 0..main_runs {
            let setup = Instant::now();
            let inputs = self.bind_arguments(args.to_vec(), kwargs.clone())?;
            timing.setup += setup.elapsed();
            self.invoke(inputs, &mut timing)?;
        }
        let runs = main_runs as f64;
        metrics.total_time = ms(start.elapsed()) / runs;
        metrics.setup_time = ms(timing.setup) / runs;
        metrics.memory_alloc_time = ms(timing.alloc) / runs;
        metrics.memory_dealloc_time = ms(timing.dealloc) / runs;
        metrics.output_dealloc_time = ms(timing.outputs) / runs;
        metrics.time_per_node = timing.per_node.iter().map(|d| ms(*d) / runs).collect();

        for (node, time) in nodes.iter().zip(&metrics.time_per_node) {
            *metrics
                .time_per_node_type
                .entry(node.op().to_string())
                .or_default() += *time;
        }
        let node_total: f64 = metrics.time_per_node.iter().sum();
        for (op, time) in &metrics.time_per_node_type {
            let percent = if node_total > 0.0 {
                time / node_total * 100.0
            } else {
                0.0
            };
            metrics.percent_per_node_type.insert(op.clone(), percent);
        }
        Ok(metrics)
    }

    /// Runs both benchmarks and bundles them into a printable summary.
    pub fn benchmark(
        &mut self,
        args: &[Value],
        kwargs: &HashMap<String, Value>,
        warmup_runs: usize,
        main_runs: usize,
    ) -> RuntimeResult<BenchmarkSummary> {
        let model_time = self.benchmark_model(args, kwargs, warmup_runs, main_runs)?;
        let individual = self.benchmark_individual_ops(args, kwargs, warmup_runs, main_runs)?;
        tracing::debug!(model_time, main_runs, "benchmark finished");
        Ok(BenchmarkSummary {
            warmup_runs,
            main_runs,
            model_time,
            individual,
        })
    }
}

impl fmt::Display for BenchmarkSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let metrics = &self.individual;
        writeln!(
            f,
            "Static runtime ms per iter: {:.4}. Iters per second: {:.2}",
            self.model_time,
            if self.model_time > 0.0 {
                1e3 / self.model_time
            } else {
                0.0
            }
        )?;
        for (index, time) in metrics.time_per_node.iter().enumerate() {
            writeln!(f, "node #{index}: {time:.4} ms/iter")?;
        }

        let mut rows: Vec<(&String, f64)> = metrics
            .time_per_node_type
            .iter()
            .map(|(op, time)| (op, *time))
            .collect();
        rows.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        let column = "op";
        let name_width = rows
            .iter()
            .map(|(op, _)| op.len())
            .max()
            .unwrap_or(column.len())
            .max(column.len());
        writeln!(f, "Time per node type:")?;
        writeln!(
            f,
            "| {column:<name_width$} | {:^10} | {:^7} | {:^5} |",
            "ms/iter", "%", "nodes"
        )?;
        writeln!(
            f,
            "|-{}-|-{}-|-{}-|-{}-|",
            "-".repeat(name_width),
            "-".repeat(10),
            "-".repeat(7),
            "-".repeat(5)
        )?;
        for (op, time) in rows {
            let percent = metrics.percent_per_node_type.get(op).copied().unwrap_or(0.0);
            let count = metrics.instances_per_node_type.get(op).copied().unwrap_or(0);
            writeln!(
                f,
                "| {op:<name_width$} | {time:>10.4} | {percent:>6.2}% | {count:>5} |"
            )?;
        }

        writeln!(f, "{:>10.4} ms. in Total", metrics.total_time)?;
        writeln!(f, "Static runtime setup time: {:.4} ms", metrics.setup_time)?;
        writeln!(f, "Memory allocation time: {:.4} ms", metrics.memory_alloc_time)?;
        writeln!(f, "Memory deallocation time: {:.4} ms", metrics.memory_dealloc_time)?;
        writeln!(f, "Outputs deallocation time: {:.4} ms", metrics.output_dealloc_time)?;
        writeln!(
            f,
            "Total number of nodes: {}, out variant nodes: {} ({:.2}%)",
            metrics.total_nodes_count,
            metrics.out_nodes_count,
            if metrics.total_nodes_count > 0 {
                metrics.out_nodes_count as f64 * 100.0 / metrics.total_nodes_count as f64
            } else {
                0.0
            }
        )
    }
}
