use std::collections::HashMap;
use std::sync::Arc;

use staticrt::{
    BenchmarkSummary, DType, GraphBuilder, StaticModule, StaticModuleOptions, StaticRuntime,
    Tensor, TensorSpec, Value, ValueType,
};

fn vec2() -> ValueType {
    ValueType::Tensor(TensorSpec::fixed(DType::F32, &[2]))
}

/// relu -> add(y, y) -> reshape -> tanh
fn runtime_with(options: StaticModuleOptions) -> StaticRuntime {
    let mut b = GraphBuilder::new();
    let x = b.add_input("x", vec2());
    let y = b.call("aten::relu", &[x], vec2());
    let z = b.call("aten::add", &[y, y], vec2());
    let shape = b.constant(
        Value::List(vec![Value::Int(1), Value::Int(2)]),
        ValueType::List(Box::new(ValueType::Int)),
    );
    let row = ValueType::Tensor(TensorSpec::fixed(DType::F32, &[1, 2]));
    let v = b.call("aten::reshape", &[z, shape], row.clone());
    let t = b.call("aten::tanh", &[v], row);
    let module = StaticModule::with_registry(
        b.finish(vec![t]),
        options,
        &staticrt_ref_cpu::kernel_registry(),
    )
    .expect("compile");
    Arc::new(module).runtime()
}

fn input(data: &[f32]) -> Value {
    Value::Tensor(Tensor::from_slice(&[2], data).expect("tensor"))
}

#[test]
fn display_nodes_shows_values_flowing_through() {
    let mut runtime = runtime_with(StaticModuleOptions::default());
    let dump = runtime
        .display_nodes(vec![input(&[-1.0, 2.0])], HashMap::new())
        .expect("dump");
    let lines: Vec<&str> = dump.lines().collect();

    assert_eq!(lines[0], "node 0: aten::relu [out]");
    assert_eq!(lines[1], "  in  i0: tensor<f32[2]> [-1.0, 2.0]");
    assert_eq!(lines[2], "  out %1: tensor<f32[2]> [0.0, 2.0]");
    assert_eq!(lines[3], "node 1: aten::add [out]");
    assert_eq!(lines[4], "  in  n0.0: tensor<f32[2]> [0.0, 2.0]");
    assert_eq!(lines[5], "  in  n0.0: tensor<f32[2]> [0.0, 2.0]");
    assert_eq!(lines[6], "  out %2: tensor<f32[2]> [0.0, 4.0]");
    assert_eq!(lines[7], "node 2: aten::reshape [view]");
    assert_eq!(lines[8], "  in  n1.0: tensor<f32[2]> [0.0, 4.0]");
    assert_eq!(lines[9], "  in  c0: [1, 2]");
    assert_eq!(lines[10], "  out %4: tensor<f32[1, 2]> [0.0, 4.0]");
    assert!(lines[11].starts_with("node 3: aten::tanh [out]"));
    assert!(dump.trim_end().lines().last().expect("output line").starts_with("output 0: tensor<f32[1, 2]>"));

    runtime
        .check_for_memory_leak(false)
        .expect("dump goes through the regular invocation path");
}

#[test]
fn display_nodes_labels_allocating_kernels() {
    let mut runtime = runtime_with(StaticModuleOptions::disabled());
    let dump = runtime
        .display_nodes(vec![input(&[1.0, 1.0])], HashMap::new())
        .expect("dump");
    assert!(dump.contains("node 0: aten::relu [default]"));
    assert!(dump.contains("node 2: aten::reshape [view]"));
}

#[test]
fn individual_metrics_count_nodes() {
    let mut runtime = runtime_with(StaticModuleOptions::default());
    let metrics = runtime
        .benchmark_individual_ops(&[input(&[1.0, -1.0])], &HashMap::new(), 1, 3)
        .expect("benchmark");

    assert_eq!(metrics.total_nodes_count, 4);
    assert_eq!(metrics.out_nodes_count, 3);
    assert_eq!(metrics.out_nodes, vec!["aten::add", "aten::relu", "aten::tanh"]);
    assert_eq!(metrics.time_per_node.len(), 4);
    assert_eq!(metrics.instances_per_node_type.get("aten::reshape"), Some(&1));
    assert_eq!(metrics.time_per_node_type.len(), 4);
    assert!(metrics.total_time >= 0.0);

    let percent: f64 = metrics.percent_per_node_type.values().sum();
    let node_time: f64 = metrics.time_per_node.iter().sum();
    if node_time > 0.0 {
        assert!((percent - 100.0).abs() < 1e-6, "percentages sum to {percent}");
    }

    runtime
        .check_for_memory_leak(false)
        .expect("benchmark leaves the instance clean");
}

#[test]
fn zero_main_runs_reports_zero_times() {
    let mut runtime = runtime_with(StaticModuleOptions::default());
    let summary = runtime
        .benchmark(&[input(&[1.0, 2.0])], &HashMap::new(), 2, 0)
        .expect("benchmark");
    assert_eq!(summary.model_time, 0.0);
    assert_eq!(summary.individual.time_per_node, vec![0.0; 4]);
    assert_eq!(summary.individual.total_time, 0.0);
}

#[test]
fn summary_renders_table_and_json() {
    let mut runtime = runtime_with(StaticModuleOptions::default());
    let summary = runtime
        .benchmark(&[input(&[1.0, 2.0])], &HashMap::new(), 1, 2)
        .expect("benchmark");
    assert_eq!(summary.warmup_runs, 1);
    assert_eq!(summary.main_runs, 2);

    let text = summary.to_string();
    assert!(text.starts_with("Static runtime ms per iter:"));
    assert!(text.contains("node #3:"));
    assert!(text.contains("| aten::reshape"));
    assert!(text.contains("Total number of nodes: 4, out variant nodes: 3 (75.00%)"));

    let json = summary.to_json().expect("json");
    let parsed: BenchmarkSummary = serde_json::from_str(&json).expect("round trip");
    assert_eq!(parsed.individual.out_nodes_count, 3);
    assert_eq!(parsed.main_runs, 2);
}

#[test]
fn benchmark_propagates_argument_errors() {
    let mut runtime = runtime_with(StaticModuleOptions::default());
    let err = runtime
        .benchmark_model(&[Value::Int(3)], &HashMap::new(), 0, 1)
        .expect_err("bad input");
    assert!(matches!(err, staticrt::RuntimeError::InvalidArgument(_)));
}
