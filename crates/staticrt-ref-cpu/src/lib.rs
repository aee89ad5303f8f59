//! Reference CPU kernels for `staticrt`.
//!
//! Linking this crate is enough to make its operators visible through
//! [`staticrt::KernelRegistry::global`]. Tests and embedders that want an explicit registry can
//! use [`kernel_registry`].

mod cpu;
mod elementwise;
mod linalg;
mod prim;
mod views;

use staticrt::kernels::{KernelRegistry, OperatorDef, KERNEL_REGISTRARS};

/// Every operator provided by this crate.
pub const OPERATORS: &[OperatorDef] = &[
    OperatorDef::new("aten::relu", elementwise::relu).with_out(elementwise::relu_out),
    OperatorDef::new("aten::sigmoid", elementwise::sigmoid).with_out(elementwise::sigmoid_out),
    OperatorDef::new("aten::tanh", elementwise::tanh).with_out(elementwise::tanh_out),
    OperatorDef::new("aten::add", elementwise::add).with_out(elementwise::add_out),
    OperatorDef::new("aten::sub", elementwise::sub).with_out(elementwise::sub_out),
    OperatorDef::new("aten::mul", elementwise::mul).with_out(elementwise::mul_out),
    OperatorDef::new("aten::mul_scalar", elementwise::mul_scalar)
        .with_out(elementwise::mul_scalar_out),
    OperatorDef::new("aten::clone", elementwise::clone).with_out(elementwise::clone_out),
    OperatorDef::new("aten::matmul", linalg::matmul).with_out(linalg::matmul_out),
    OperatorDef::new("aten::sum", linalg::sum).with_out(linalg::sum_out),
    OperatorDef::view("aten::reshape", views::reshape),
    OperatorDef::view("aten::flatten", views::flatten),
    OperatorDef::view("aten::detach", views::detach),
    OperatorDef::container("prim::ListConstruct", prim::list_construct),
    OperatorDef::container("prim::TupleConstruct", prim::tuple_construct),
    OperatorDef::container("prim::ListUnpack", prim::list_unpack),
    OperatorDef::container("prim::TupleUnpack", prim::tuple_unpack),
];

/// Adds the reference operators to `registry`.
pub fn register_ref_cpu_kernels(registry: &mut KernelRegistry) {
    registry.register_all(OPERATORS);
    tracing::debug!(operators = OPERATORS.len(), "registered reference cpu kernels");
}

/// Fresh registry holding only the reference operators.
pub fn kernel_registry() -> KernelRegistry {
    let mut registry = KernelRegistry::new();
    register_ref_cpu_kernels(&mut registry);
    registry
}

#[linkme::distributed_slice(KERNEL_REGISTRARS)]
static REGISTER_REF_CPU_KERNELS: fn(&mut KernelRegistry) = register_ref_cpu_kernels;
