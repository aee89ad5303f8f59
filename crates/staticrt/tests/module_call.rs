use std::collections::HashMap;
use std::sync::Arc;

use staticrt::{
    Argument, DType, FunctionSchema, GraphBuilder, RuntimeError, ScriptModule, StaticModule,
    StaticModuleOptions, StaticRuntime, Tensor, TensorSpec, Value, ValueType,
};

fn vec2() -> ValueType {
    ValueType::Tensor(TensorSpec::fixed(DType::F32, &[2]))
}

fn tensor(data: &[f32]) -> Value {
    Value::Tensor(Tensor::from_slice(&[2], data).expect("tensor"))
}

fn values(value: &Value) -> Vec<f32> {
    value
        .as_tensor()
        .expect("tensor value")
        .to_vec::<f32>()
        .expect("f32 data")
}

fn kwargs(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

/// forward(self, x, scale: float = 1.0) -> (x * self.weight * scale, relu(that))
fn scaled_module() -> ScriptModule {
    let mut b = GraphBuilder::new();
    let this = b.add_self_input();
    let x = b.add_input("x", vec2());
    let scale = b.add_input("scale", ValueType::Double);
    let weight = b.get_attr(this, "weight", vec2());
    let y = b.call("aten::mul", &[x, weight], vec2());
    let z = b.call("aten::mul_scalar", &[y, scale], vec2());
    let r = b.call("aten::relu", &[z], vec2());
    let schema = FunctionSchema::new(
        "forward",
        vec![
            Argument::new("x", vec2()),
            Argument::new("scale", ValueType::Double).with_default(Value::Double(1.0)),
        ],
    );
    ScriptModule::new("Scaled", b.finish(vec![z, r]))
        .with_attribute("weight", Tensor::from_slice(&[2], &[2.0f32, -1.0]).expect("weight"))
        .with_schema(schema)
}

fn scaled_runtime() -> StaticRuntime {
    let module = StaticModule::from_module_with_registry(
        scaled_module(),
        StaticModuleOptions::default(),
        &staticrt_ref_cpu::kernel_registry(),
    )
    .expect("compile");
    Arc::new(module).runtime()
}

fn unpack_pair(value: Value) -> (Vec<f32>, Vec<f32>) {
    let Value::Tuple(items) = value else {
        panic!("expected a tuple, got {value}");
    };
    assert_eq!(items.len(), 2);
    (values(&items[0]), values(&items[1]))
}

fn expect_invalid(result: Result<Value, RuntimeError>, needle: &str) {
    match result {
        Err(RuntimeError::InvalidArgument(detail)) => {
            assert!(detail.contains(needle), "expected `{needle}` in `{detail}`")
        }
        Err(other) => panic!("expected InvalidArgument, got {other}"),
        Ok(value) => panic!("expected failure, got {value}"),
    }
}

#[test]
fn positional_call_uses_frozen_weights() {
    let mut runtime = scaled_runtime();
    let out = runtime
        .call(vec![tensor(&[1.0, 3.0]), Value::Double(0.5)], HashMap::new())
        .expect("call");
    let (scaled, relu) = unpack_pair(out);
    assert_eq!(scaled, vec![1.0, -1.5]);
    assert_eq!(relu, vec![1.0, 0.0]);
}

#[test]
fn default_fills_trailing_argument() {
    let mut runtime = scaled_runtime();
    let out = runtime
        .call(vec![tensor(&[1.0, 3.0])], HashMap::new())
        .expect("call");
    let (scaled, _) = unpack_pair(out);
    assert_eq!(scaled, vec![2.0, -3.0]);
}

#[test]
fn keywords_bind_by_name() {
    let mut runtime = scaled_runtime();
    let out = runtime
        .call(
            Vec::new(),
            kwargs(&[("scale", Value::Double(2.0)), ("x", tensor(&[1.0, 1.0]))]),
        )
        .expect("call");
    let (scaled, relu) = unpack_pair(out);
    assert_eq!(scaled, vec![4.0, -2.0]);
    assert_eq!(relu, vec![4.0, 0.0]);

    let out = runtime
        .call(vec![tensor(&[1.0, 1.0])], kwargs(&[("scale", Value::Int(3))]))
        .expect("int widens to float");
    assert_eq!(unpack_pair(out).0, vec![6.0, -3.0]);
}

#[test]
fn binding_errors_are_reported() {
    let mut runtime = scaled_runtime();
    expect_invalid(
        runtime.call(
            vec![tensor(&[1.0, 1.0])],
            kwargs(&[("x", tensor(&[1.0, 1.0]))]),
        ),
        "multiple values for argument `x`",
    );
    expect_invalid(
        runtime.call(
            vec![tensor(&[1.0, 1.0])],
            kwargs(&[("bias", Value::Double(1.0))]),
        ),
        "unexpected keyword arguments [\"bias\"]",
    );
    expect_invalid(
        runtime.call(Vec::new(), kwargs(&[("scale", Value::Double(1.0))])),
        "missing argument `x`",
    );
    expect_invalid(
        runtime.call(
            vec![tensor(&[1.0, 1.0]), Value::Double(1.0), Value::Double(1.0)],
            HashMap::new(),
        ),
        "takes 2 arguments, got 3",
    );
    expect_invalid(
        runtime.call(vec![Value::Int(1)], HashMap::new()),
        "x:",
    );

    runtime
        .check_for_memory_leak(false)
        .expect("rejected calls leave nothing behind");
    let out = runtime
        .call(vec![tensor(&[1.0, 1.0])], HashMap::new())
        .expect("valid call after failures");
    assert_eq!(unpack_pair(out).0, vec![2.0, -1.0]);
}

#[test]
fn keywords_need_a_schema() {
    let mut b = GraphBuilder::new();
    let x = b.add_input("x", vec2());
    let y = b.call("aten::relu", &[x], vec2());
    let module = StaticModule::with_registry(
        b.finish(vec![y]),
        StaticModuleOptions::default(),
        &staticrt_ref_cpu::kernel_registry(),
    )
    .expect("compile");
    assert!(module.schema().is_none());

    let mut runtime = Arc::new(module).runtime();
    expect_invalid(
        runtime.call(Vec::new(), kwargs(&[("x", tensor(&[1.0, 1.0]))])),
        "need a module schema",
    );
    let out = runtime
        .call(vec![tensor(&[-1.0, 1.0])], HashMap::new())
        .expect("positional call");
    assert_eq!(values(&out), vec![0.0, 1.0]);
}

#[test]
fn attributes_are_frozen_at_compile_time() {
    let mut module = scaled_module();
    let compiled = Arc::new(
        StaticModule::from_module_with_registry(
            module.clone(),
            StaticModuleOptions::default(),
            &staticrt_ref_cpu::kernel_registry(),
        )
        .expect("compile"),
    );
    assert!(compiled.first_input_is_self());
    assert_eq!(compiled.num_inputs(), 2);

    // Replacing the attribute afterwards has no effect on the compiled module.
    module
        .attributes
        .insert("weight".to_string(), tensor(&[100.0, 100.0]));
    assert_eq!(values(module.attribute("weight").expect("weight")), vec![100.0, 100.0]);

    let out = compiled
        .runtime()
        .call(vec![tensor(&[1.0, 1.0])], HashMap::new())
        .expect("call");
    assert_eq!(unpack_pair(out).0, vec![2.0, -1.0]);

    let frozen = compiled.module().expect("compiled from a module");
    assert_eq!(frozen.name, "Scaled");
    assert_eq!(values(frozen.attribute("weight").expect("weight")), vec![2.0, -1.0]);
    assert_eq!(compiled.graph().inputs.len(), 3);
}

#[test]
fn free_graph_has_no_source_module() {
    let mut b = GraphBuilder::new();
    let x = b.add_input("x", vec2());
    let y = b.call("aten::relu", &[x], vec2());
    let module = StaticModule::with_registry(
        b.finish(vec![y]),
        StaticModuleOptions::default(),
        &staticrt_ref_cpu::kernel_registry(),
    )
    .expect("compile");
    assert!(module.module().is_none());
    assert_eq!(module.graph().nodes.len(), 1);
}

#[test]
fn module_calls_itself_through_a_cached_instance() {
    let module = Arc::new(
        StaticModule::from_module_with_registry(
            scaled_module(),
            StaticModuleOptions::default(),
            &staticrt_ref_cpu::kernel_registry(),
        )
        .expect("compile"),
    );

    let (scaled, relu) = unpack_pair(
        module
            .call(vec![tensor(&[1.0, 3.0]), Value::Double(0.5)], HashMap::new())
            .expect("first call"),
    );
    assert_eq!(scaled, vec![1.0, -1.5]);
    assert_eq!(relu, vec![1.0, 0.0]);

    expect_invalid(
        module.call(Vec::new(), HashMap::new()),
        "missing argument `x`",
    );
    let (scaled, _) = unpack_pair(
        module
            .call(Vec::new(), kwargs(&[("x", tensor(&[2.0, 2.0]))]))
            .expect("call after a failure"),
    );
    assert_eq!(scaled, vec![4.0, -2.0]);

    let err = module
        .run(vec![Tensor::from_slice(&[2], &[1.0f32, 1.0]).expect("x")])
        .expect_err("`scale` has no tensor form and is missing");
    assert!(matches!(err, RuntimeError::InvalidArgument(_)), "{err}");

    // The parked instance does not keep the module alive.
    assert_eq!(Arc::strong_count(&module), 1);
}

#[test]
fn module_level_run_is_shared_between_threads() {
    let mut b = GraphBuilder::new();
    let x = b.add_input("x", vec2());
    let y = b.call("aten::relu", &[x], vec2());
    let z = b.call("aten::add", &[y, y], vec2());
    let module = Arc::new(
        StaticModule::with_registry(
            b.finish(vec![z]),
            StaticModuleOptions::default(),
            &staticrt_ref_cpu::kernel_registry(),
        )
        .expect("compile"),
    );

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let module = Arc::clone(&module);
            std::thread::spawn(move || {
                for step in 0..5 {
                    let value = (worker * 10 + step) as f32;
                    let input = Tensor::from_slice(&[2], &[value, -value]).expect("input");
                    let outputs = module.run(vec![input]).expect("run");
                    assert_eq!(
                        outputs[0].to_vec::<f32>().expect("f32"),
                        vec![2.0 * value, 0.0]
                    );
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("worker");
    }
}

#[test]
fn derived_schema_skips_self() {
    let mut b = GraphBuilder::new();
    let this = b.add_self_input();
    let x = b.add_input("x", vec2());
    let w = b.get_attr(this, "w", vec2());
    let y = b.call("aten::add", &[x, w], vec2());
    let module = ScriptModule::new("Bias", b.finish(vec![y])).with_attribute(
        "w",
        Tensor::from_slice(&[2], &[1.0f32, 1.0]).expect("w"),
    );
    assert_eq!(module.schema.arguments.len(), 1);
    assert_eq!(module.schema.argument_index("x"), Some(0));
    assert!(module.schema.to_string().starts_with("forward(x: "));

    let compiled = StaticModule::from_module_with_registry(
        module,
        StaticModuleOptions::default(),
        &staticrt_ref_cpu::kernel_registry(),
    )
    .expect("compile");
    let mut runtime = Arc::new(compiled).runtime();
    let out = runtime
        .call(Vec::new(), kwargs(&[("x", tensor(&[1.0, 2.0]))]))
        .expect("call");
    assert_eq!(values(&out), vec![2.0, 3.0]);
}

#[test]
fn schema_must_match_graph_inputs() {
    let module = scaled_module().with_schema(FunctionSchema::new(
        "forward",
        vec![Argument::new("x", vec2())],
    ));
    let err = StaticModule::from_module_with_registry(
        module,
        StaticModuleOptions::default(),
        &staticrt_ref_cpu::kernel_registry(),
    )
    .expect_err("schema arity mismatch");
    assert!(matches!(err, RuntimeError::UnsupportedConstruct(_)), "{err}");
}

fn expect_schema_rejected(schema: FunctionSchema, needle: &str) {
    let err = StaticModule::from_module_with_registry(
        scaled_module().with_schema(schema),
        StaticModuleOptions::default(),
        &staticrt_ref_cpu::kernel_registry(),
    )
    .expect_err("schema disagrees with the graph");
    match err {
        RuntimeError::UnsupportedConstruct(detail) => {
            assert!(detail.contains(needle), "expected `{needle}` in `{detail}`")
        }
        other => panic!("expected UnsupportedConstruct, got {other}"),
    }
}

#[test]
fn schema_types_and_defaults_must_match_graph_inputs() {
    expect_schema_rejected(
        FunctionSchema::new(
            "forward",
            vec![
                Argument::new("x", vec2()),
                Argument::new("scale", ValueType::Int),
            ],
        ),
        "argument `scale` of forward is declared",
    );
    expect_schema_rejected(
        FunctionSchema::new(
            "forward",
            vec![
                Argument::new("x", ValueType::Tensor(TensorSpec::fixed(DType::F64, &[2]))),
                Argument::new("scale", ValueType::Double),
            ],
        ),
        "argument `x`",
    );
    expect_schema_rejected(
        FunctionSchema::new(
            "forward",
            vec![
                Argument::new("x", vec2()),
                Argument::new("scale", ValueType::Double)
                    .with_default(Value::Str("half".into())),
            ],
        ),
        "default of argument `scale`",
    );
}

#[test]
fn graph_without_outputs_returns_none() {
    let mut b = GraphBuilder::new();
    let x = b.add_input("x", vec2());
    let _ = b.call("aten::relu", &[x], vec2());
    let module = StaticModule::with_registry(
        b.finish(Vec::new()),
        StaticModuleOptions::default(),
        &staticrt_ref_cpu::kernel_registry(),
    )
    .expect("compile");
    let mut runtime = Arc::new(module).runtime();
    let out = runtime
        .call(vec![tensor(&[1.0, 2.0])], HashMap::new())
        .expect("call");
    assert!(out.is_none());
    runtime
        .check_for_memory_leak(false)
        .expect("unused result released");
}
