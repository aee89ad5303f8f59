use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{anyhow, Result};
use staticrt::{
    DType, Graph, GraphBuilder, StaticModule, StaticModuleOptions, StaticRuntime, Tensor,
    TensorSpec, ValueType,
};

/// Hands out runtimes for one module; an instance is never used by two threads at once.
struct RuntimePool {
    module: Arc<StaticModule>,
    idle: Mutex<Vec<StaticRuntime>>,
}

impl RuntimePool {
    fn new(module: Arc<StaticModule>) -> Self {
        Self {
            module,
            idle: Mutex::new(Vec::new()),
        }
    }

    fn run(&self, inputs: Vec<Tensor>) -> Result<Vec<Tensor>> {
        let mut runtime = self
            .idle
            .lock()
            .map_err(|_| anyhow!("runtime pool poisoned"))?
            .pop()
            .unwrap_or_else(|| self.module.runtime());
        let outputs = runtime.run(inputs);
        self.idle
            .lock()
            .map_err(|_| anyhow!("runtime pool poisoned"))?
            .push(runtime);
        Ok(outputs?)
    }

    fn size(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }
}

fn mlp() -> Graph {
    let f32_ty = |dims: &[usize]| ValueType::Tensor(TensorSpec::fixed(DType::F32, dims));
    let mut b = GraphBuilder::new();
    let x = b.add_input("x", f32_ty(&[1, 4]));
    let w1 = b.add_input("w1", f32_ty(&[4, 8]));
    let w2 = b.add_input("w2", f32_ty(&[8, 2]));
    let h = b.call("aten::matmul", &[x, w1], f32_ty(&[1, 8]));
    let a = b.call("aten::relu", &[h], f32_ty(&[1, 8]));
    let o = b.call("aten::matmul", &[a, w2], f32_ty(&[1, 2]));
    let p = b.call("aten::sigmoid", &[o], f32_ty(&[1, 2]));
    b.finish(vec![p])
}

fn main() -> Result<()> {
    let options = StaticModuleOptions::from_json_str(r#"{ "optimize_graph_output_memory": true }"#)?
        .with_env_overrides();
    let module = StaticModule::with_registry(mlp(), options, &staticrt_ref_cpu::kernel_registry())?;
    let plan = module.storage_plan();
    println!(
        "compiled {} nodes, {} managed values in {} slots ({} bytes)",
        module.num_nodes(),
        plan.num_managed(),
        plan.slots.len(),
        plan.managed_bytes()
    );

    let pool = Arc::new(RuntimePool::new(Arc::new(module)));
    let w1 = Tensor::from_vec(&[4, 8], (0..32).map(|i| (i as f32 - 16.0) / 32.0).collect())?;
    let w2 = Tensor::from_vec(&[8, 2], (0..16).map(|i| (i as f32 - 8.0) / 16.0).collect())?;

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let pool = Arc::clone(&pool);
            let (w1, w2) = (w1.clone(), w2.clone());
            thread::spawn(move || -> Result<()> {
                for step in 0..3 {
                    let x = Tensor::from_vec(&[1, 4], vec![worker as f32, step as f32, 1.0, -1.0])?;
                    let outputs = pool.run(vec![x, w1.clone(), w2.clone()])?;
                    println!("worker {worker} step {step}: {:?}", outputs[0].to_vec::<f32>()?);
                }
                Ok(())
            })
        })
        .collect();
    for worker in workers {
        worker.join().map_err(|_| anyhow!("worker panicked"))??;
    }

    println!("pool holds {} idle runtimes", pool.size());
    Ok(())
}
