use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use staticrt::{
    DType, ExecState, Graph, GraphBuilder, RuntimeError, StaticModule, StaticModuleOptions,
    StaticRuntime, Tensor, TensorSpec, Value, ValueType,
};

fn f32_ty(dims: &[usize]) -> ValueType {
    ValueType::Tensor(TensorSpec::fixed(DType::F32, dims))
}

fn tensor(dims: &[usize], data: &[f32]) -> Tensor {
    Tensor::from_slice(dims, data).expect("tensor")
}

fn values(tensor: &Tensor) -> Vec<f32> {
    tensor.to_vec::<f32>().expect("f32 data")
}

fn instance(graph: Graph, options: StaticModuleOptions) -> StaticRuntime {
    let module = StaticModule::with_registry(graph, options, &staticrt_ref_cpu::kernel_registry())
        .expect("compile");
    Arc::new(module).runtime()
}

/// y = relu(x); return y + y
fn relu_double() -> Graph {
    let mut b = GraphBuilder::new();
    let x = b.add_input("x", f32_ty(&[2]));
    let y = b.call("aten::relu", &[x], f32_ty(&[2]));
    let z = b.call("aten::add", &[y, y], f32_ty(&[2]));
    b.finish(vec![z])
}

/// Mixes out-variant, view and allocating nodes; returns two tensors.
fn mixed_graph() -> Graph {
    let mut b = GraphBuilder::new();
    let x = b.add_input("x", f32_ty(&[4, 3]));
    let w = b.add_input("w", f32_ty(&[3, 2]));
    let a = b.call("aten::matmul", &[x, w], f32_ty(&[4, 2]));
    let r = b.call("aten::relu", &[a], f32_ty(&[4, 2]));
    let s = b.call("aten::sigmoid", &[a], f32_ty(&[4, 2]));
    let m = b.call("aten::mul", &[r, s], f32_ty(&[4, 2]));
    let f = b.call("aten::flatten", &[m], f32_ty(&[8]));
    let t = b.call("aten::tanh", &[f], f32_ty(&[8]));
    let c = b.call("aten::clone", &[t], f32_ty(&[8]));
    let total = b.call("aten::sum", &[c], f32_ty(&[]));
    let half = b.constant(Value::Double(0.5), ValueType::Double);
    let sc = b.call("aten::mul_scalar", &[t, half], f32_ty(&[8]));
    let two = b.constant(Value::Int(2), ValueType::Int);
    let d = b.call("aten::sub", &[sc, c, two], f32_ty(&[8]));
    b.finish(vec![d, total])
}

fn random_inputs(seed: u64) -> Vec<Tensor> {
    let mut rng = StdRng::seed_from_u64(seed);
    let x: Vec<f32> = (0..12).map(|_| rng.gen_range(-2.0..2.0)).collect();
    let w: Vec<f32> = (0..6).map(|_| rng.gen_range(-1.0..1.0)).collect();
    vec![tensor(&[4, 3], &x), tensor(&[3, 2], &w)]
}

fn run_mixed(runtime: &mut StaticRuntime, seed: u64) -> Vec<Vec<f32>> {
    runtime
        .run(random_inputs(seed))
        .expect("run")
        .iter()
        .map(values)
        .collect()
}

#[test]
fn instance_is_reusable_across_invocations() {
    let mut runtime = instance(relu_double(), StaticModuleOptions::default());

    let first = runtime.run(vec![tensor(&[2], &[-1.0, 2.0])]).expect("first run");
    assert_eq!(values(&first[0]), vec![0.0, 4.0]);
    assert_eq!(runtime.state(), ExecState::Idle);

    let second = runtime.run(vec![tensor(&[2], &[3.0, -3.0])]).expect("second run");
    assert_eq!(values(&second[0]), vec![6.0, 0.0]);

    // Results handed out earlier are not overwritten by later invocations.
    assert_eq!(values(&first[0]), vec![0.0, 4.0]);
    assert!(!first[0].shares_storage(&second[0]));
}

#[test]
fn wrong_arity_fails_and_leaves_instance_usable() {
    let mut b = GraphBuilder::new();
    let x = b.add_input("x", f32_ty(&[2]));
    let y = b.add_input("y", f32_ty(&[2]));
    let z = b.call("aten::mul", &[x, y], f32_ty(&[2]));
    let mut runtime = instance(b.finish(vec![z]), StaticModuleOptions::default());

    let err = runtime
        .run(vec![tensor(&[2], &[1.0, 2.0])])
        .expect_err("missing input");
    assert!(matches!(err, RuntimeError::InvalidArgument(_)), "{err}");
    assert_eq!(runtime.state(), ExecState::Idle);

    let out = runtime
        .run(vec![tensor(&[2], &[1.0, 2.0]), tensor(&[2], &[3.0, 4.0])])
        .expect("valid run");
    assert_eq!(values(&out[0]), vec![3.0, 8.0]);
}

#[test]
fn input_type_mismatch_names_the_argument() {
    let mut runtime = instance(relu_double(), StaticModuleOptions::default());

    let ints = Tensor::from_slice(&[2], &[1i64, 2]).expect("tensor");
    let err = runtime.run(vec![ints]).expect_err("dtype mismatch");
    match err {
        RuntimeError::InvalidArgument(detail) => {
            assert!(detail.contains("input 0"), "{detail}");
            assert!(detail.contains("dtype"), "{detail}");
        }
        other => panic!("unexpected error {other}"),
    }

    let err = runtime
        .run(vec![tensor(&[3], &[1.0, 2.0, 3.0])])
        .expect_err("shape mismatch");
    assert!(matches!(err, RuntimeError::InvalidArgument(_)));
    runtime
        .check_for_memory_leak(false)
        .expect("nothing bound after a rejected call");
}

#[test]
fn fresh_instances_are_deterministic() {
    let module = Arc::new(
        StaticModule::with_registry(
            mixed_graph(),
            StaticModuleOptions::default(),
            &staticrt_ref_cpu::kernel_registry(),
        )
        .expect("compile"),
    );
    let mut first = module.runtime();
    let mut second = module.runtime();
    for seed in 0..4 {
        assert_eq!(run_mixed(&mut first, seed), run_mixed(&mut second, seed));
    }
    // Reused instance gives the same answer as a fresh one.
    assert_eq!(run_mixed(&mut first, 1), run_mixed(&mut module.runtime(), 1));
}

#[test]
fn option_combinations_agree() {
    let configs = [
        StaticModuleOptions::default(),
        StaticModuleOptions::disabled(),
        StaticModuleOptions {
            optimize_memory: false,
            ..StaticModuleOptions::default()
        },
        StaticModuleOptions {
            cleanup_activations: false,
            ..StaticModuleOptions::default()
        },
        StaticModuleOptions {
            optimize_graph_output_memory: true,
            ..StaticModuleOptions::default()
        },
    ];
    let mut runtimes: Vec<StaticRuntime> = configs
        .iter()
        .map(|options| instance(mixed_graph(), *options))
        .collect();

    for seed in [7, 11, 7] {
        let (reference, rest) = runtimes.split_first_mut().expect("configs");
        let expected = run_mixed(reference, seed);
        for (runtime, options) in rest.iter_mut().zip(&configs[1..]) {
            assert_eq!(run_mixed(runtime, seed), expected, "options {options:?}");
        }
    }
}

#[test]
fn mixed_graph_matches_hand_computation() {
    let mut runtime = instance(mixed_graph(), StaticModuleOptions::default());
    let inputs = random_inputs(3);
    let x = values(&inputs[0]);
    let w = values(&inputs[1]);

    let mut expected_d = Vec::new();
    let mut expected_total = 0.0f32;
    for row in 0..4 {
        for col in 0..2 {
            let mut a = 0.0f32;
            for k in 0..3 {
                a += x[row * 3 + k] * w[k * 2 + col];
            }
            let m = a.max(0.0) * (1.0 / (1.0 + (-a).exp()));
            let t = m.tanh();
            expected_total += t;
            expected_d.push(t * 0.5 - 2.0 * t);
        }
    }

    let outputs = runtime.run(inputs).expect("run");
    for (got, want) in values(&outputs[0]).iter().zip(&expected_d) {
        assert!((got - want).abs() < 1e-5, "{got} vs {want}");
    }
    assert!((values(&outputs[1])[0] - expected_total).abs() < 1e-4);
}

#[test]
fn no_leaks_after_invocations() {
    for options in [
        StaticModuleOptions::default(),
        StaticModuleOptions::disabled(),
        StaticModuleOptions {
            optimize_graph_output_memory: true,
            ..StaticModuleOptions::default()
        },
    ] {
        let mut runtime = instance(mixed_graph(), options);
        run_mixed(&mut runtime, 5);
        runtime
            .check_for_memory_leak(true)
            .unwrap_or_else(|err| panic!("leak with {options:?}: {err}"));
        runtime
            .check_for_memory_leak(false)
            .unwrap_or_else(|err| panic!("output leak with {options:?}: {err}"));
    }
}

#[test]
fn without_cleanup_out_variant_results_stay_in_their_cells() {
    let options = StaticModuleOptions {
        cleanup_activations: false,
        optimize_memory: false,
        ..StaticModuleOptions::default()
    };
    let mut runtime = instance(relu_double(), options);
    assert!(runtime.planner_stats().is_none());

    runtime.run(vec![tensor(&[2], &[-1.0, 2.0])]).expect("run");
    let kept = Arc::as_ptr(
        runtime.cells()[1]
            .as_tensor()
            .expect("relu output retained")
            .storage(),
    );
    assert!(runtime.cells()[0].is_none());
    assert!(runtime.cells()[2].is_none());
    runtime.check_for_memory_leak(true).expect("retention is allowed");

    let out = runtime.run(vec![tensor(&[2], &[3.0, -3.0])]).expect("run");
    assert_eq!(values(&out[0]), vec![6.0, 0.0]);
    let reused = runtime.cells()[1].as_tensor().expect("relu output retained");
    assert_eq!(Arc::as_ptr(reused.storage()), kept);
}

#[test]
fn planner_counts_batches() {
    let mut runtime = instance(mixed_graph(), StaticModuleOptions::default());
    let stats = runtime.planner_stats().expect("planner");
    assert_eq!(stats.allocations, 0);
    assert!(stats.managed_tensors > 0);
    assert_eq!(stats.managed_tensors, runtime.module().storage_plan().num_managed());
    assert_eq!(stats.managed_bytes, runtime.module().storage_plan().managed_bytes());

    run_mixed(&mut runtime, 1);
    run_mixed(&mut runtime, 2);
    assert_eq!(runtime.planner_stats().expect("planner").allocations, 2);

    let disabled = instance(mixed_graph(), StaticModuleOptions::disabled());
    assert!(disabled.planner_stats().is_none());
}

#[test]
fn kernel_failure_aborts_invocation_but_not_instance() {
    let mut b = GraphBuilder::new();
    let x = b.add_input("x", f32_ty(&[2, 3]));
    let dims = b.add_input("dims", ValueType::List(Box::new(ValueType::Int)));
    let a = b.call("aten::relu", &[x], f32_ty(&[2, 3]));
    let s = b.call("aten::sum", &[a, dims], f32_ty(&[3]));
    let module = Arc::new(
        StaticModule::with_registry(
            b.finish(vec![s]),
            StaticModuleOptions::default(),
            &staticrt_ref_cpu::kernel_registry(),
        )
        .expect("compile"),
    );
    let mut runtime = module.runtime();
    let x = Value::Tensor(tensor(&[2, 3], &[1.0, -2.0, 3.0, 4.0, 5.0, -6.0]));

    let bad_dims = Value::List(vec![Value::Int(5)]);
    let err = runtime
        .call(vec![x.clone(), bad_dims], HashMap::new())
        .expect_err("axis out of range");
    match err {
        RuntimeError::OperatorExecution { node, op, .. } => {
            assert_eq!(node, 1);
            assert_eq!(op, "aten::sum");
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(runtime.state(), ExecState::Idle);
    runtime
        .check_for_memory_leak(false)
        .expect("failed invocation cleaned up");

    let good_dims = Value::List(vec![Value::Int(0)]);
    let out = runtime
        .call(vec![x, good_dims], HashMap::new())
        .expect("valid call");
    let out = out.as_tensor().expect("tensor output");
    assert_eq!(values(out), vec![5.0, 5.0, 3.0]);
}

#[test]
fn instances_run_concurrently_over_one_module() {
    let module = Arc::new(
        StaticModule::with_registry(
            mixed_graph(),
            StaticModuleOptions::default(),
            &staticrt_ref_cpu::kernel_registry(),
        )
        .expect("compile"),
    );
    let expected: Vec<Vec<Vec<f32>>> = (0..4)
        .map(|seed| run_mixed(&mut module.runtime(), seed))
        .collect();

    let handles: Vec<_> = (0..4u64)
        .map(|seed| {
            let module = Arc::clone(&module);
            thread::spawn(move || {
                let mut runtime = module.runtime();
                (0..8).map(|_| run_mixed(&mut runtime, seed)).collect::<Vec<_>>()
            })
        })
        .collect();

    for (seed, handle) in handles.into_iter().enumerate() {
        let results = handle.join().expect("worker thread");
        for result in results {
            assert_eq!(result, expected[seed]);
        }
    }
}

#[test]
fn inputs_and_constants_can_be_returned() {
    let mut b = GraphBuilder::new();
    let x = b.add_input("x", f32_ty(&[2]));
    let bias = b.constant(Value::Tensor(tensor(&[2], &[1.0, 2.0])), f32_ty(&[2]));
    let y = b.call("aten::relu", &[x], f32_ty(&[2]));
    let mut runtime = instance(b.finish(vec![x, bias, y]), StaticModuleOptions::default());

    let input = tensor(&[2], &[-5.0, 5.0]);
    let outputs = runtime.run(vec![input.clone()]).expect("run");
    assert!(outputs[0].shares_storage(&input));
    assert_eq!(values(&outputs[1]), vec![1.0, 2.0]);
    assert_eq!(values(&outputs[2]), vec![0.0, 5.0]);

    // Writing through a returned constant must not change the module.
    outputs[1].write::<f32>().expect("write").fill(42.0);
    let again = runtime.run(vec![input]).expect("run");
    assert_eq!(values(&again[1]), vec![1.0, 2.0]);
}

#[test]
fn run_rejects_non_tensor_outputs() {
    let mut b = GraphBuilder::new();
    let x = b.add_input("x", f32_ty(&[2]));
    let t = b.call(
        "prim::TupleConstruct",
        &[x, x],
        ValueType::Tuple(vec![f32_ty(&[2]), f32_ty(&[2])]),
    );
    let mut runtime = instance(b.finish(vec![t]), StaticModuleOptions::default());
    let err = runtime
        .run(vec![tensor(&[2], &[1.0, 2.0])])
        .expect_err("tuple output");
    assert!(matches!(err, RuntimeError::InvalidArgument(_)));

    let out = runtime
        .call(vec![Value::Tensor(tensor(&[2], &[1.0, 2.0]))], HashMap::new())
        .expect("call");
    let Value::Tuple(items) = out else {
        panic!("expected a tuple, got {out}");
    };
    assert_eq!(items.len(), 2);
}
