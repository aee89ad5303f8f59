//! Operator kernel contract.
//!
//! Kernels live outside the engine (see the `staticrt-ref-cpu` crate). The engine only knows an
//! operator by name and by the function pointers in its [`OperatorDef`]. The form used by each
//! node is fixed once at compile time as a [`NodeKernel`].

mod registry;

use thiserror::Error;

use crate::tensor::{DType, Tensor, TensorError};
use crate::value::Value;

pub use registry::{KernelRegistry, KERNEL_REGISTRARS};

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

impl KernelError {
    pub fn invalid(detail: impl Into<String>) -> Self {
        KernelError::InvalidInput(detail.into())
    }

    pub fn unsupported(detail: impl Into<String>) -> Self {
        KernelError::Unsupported(detail.into())
    }
}

pub type KernelResult<T> = Result<T, KernelError>;

/// Allocating form: returns freshly produced output values.
pub type AllocKernelFn = fn(&[&Value]) -> KernelResult<Vec<Value>>;

/// Destination-passing form: writes into the node's output cells.
///
/// A cell may hold `Value::None` (allocate), a tensor left from a previous invocation, or a
/// tensor bound to a planner region. Use [`prepare_output`] to obtain the destination.
pub type OutKernelFn = fn(&[&Value], &mut [Value]) -> KernelResult<()>;

/// How an operator's outputs relate to its inputs' storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AliasKind {
    /// Outputs own fresh storage.
    None,
    /// Outputs are views over the first input's storage.
    View,
    /// Outputs are containers that may hold any of the inputs.
    Contains,
}

/// Registry entry describing one operator.
#[derive(Clone, Copy)]
pub struct OperatorDef {
    pub name: &'static str,
    pub alias: AliasKind,
    pub default: AllocKernelFn,
    pub out: Option<OutKernelFn>,
}

impl OperatorDef {
    pub const fn new(name: &'static str, default: AllocKernelFn) -> Self {
        Self {
            name,
            alias: AliasKind::None,
            default,
            out: None,
        }
    }

    pub const fn with_out(mut self, out: OutKernelFn) -> Self {
        self.out = Some(out);
        self
    }

    pub const fn view(name: &'static str, default: AllocKernelFn) -> Self {
        Self {
            name,
            alias: AliasKind::View,
            default,
            out: None,
        }
    }

    pub const fn container(name: &'static str, default: AllocKernelFn) -> Self {
        Self {
            name,
            alias: AliasKind::Contains,
            default,
            out: None,
        }
    }
}

impl std::fmt::Debug for OperatorDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperatorDef")
            .field("name", &self.name)
            .field("alias", &self.alias)
            .field("has_out_variant", &self.out.is_some())
            .finish()
    }
}

/// Kernel form selected for a processed node.
#[derive(Clone, Copy)]
pub enum NodeKernel {
    Out(OutKernelFn),
    Default(AllocKernelFn),
    View(AllocKernelFn),
}

impl NodeKernel {
    pub fn resolve(def: &OperatorDef, enable_out_variant: bool) -> Self {
        match (def.alias, def.out) {
            (AliasKind::View, _) => NodeKernel::View(def.default),
            (AliasKind::None, Some(out)) if enable_out_variant => NodeKernel::Out(out),
            (AliasKind::None | AliasKind::Contains, _) => NodeKernel::Default(def.default),
        }
    }

    pub fn is_out_variant(&self) -> bool {
        matches!(self, NodeKernel::Out(_))
    }

    pub fn is_view(&self) -> bool {
        matches!(self, NodeKernel::View(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            NodeKernel::Out(_) => "out",
            NodeKernel::Default(_) => "default",
            NodeKernel::View(_) => "view",
        }
    }
}

impl std::fmt::Debug for NodeKernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Fetches input `index` as a tensor.
pub fn tensor_arg<'a>(inputs: &[&'a Value], index: usize) -> KernelResult<&'a Tensor> {
    let value = inputs
        .get(index)
        .ok_or_else(|| KernelError::invalid(format!("missing input {index}")))?;
    value.as_tensor().ok_or_else(|| {
        KernelError::invalid(format!(
            "input {index} must be a Tensor, got {}",
            value.kind_name()
        ))
    })
}

/// Fetches input `index` as a floating-point scalar.
pub fn scalar_arg(inputs: &[&Value], index: usize) -> KernelResult<f64> {
    let value = inputs
        .get(index)
        .ok_or_else(|| KernelError::invalid(format!("missing input {index}")))?;
    value.as_double().ok_or_else(|| {
        KernelError::invalid(format!(
            "input {index} must be a number, got {}",
            value.kind_name()
        ))
    })
}

/// Fetches input `index` as an integer list.
pub fn int_list_arg(inputs: &[&Value], index: usize) -> KernelResult<Vec<i64>> {
    let value = inputs
        .get(index)
        .ok_or_else(|| KernelError::invalid(format!("missing input {index}")))?;
    let Value::List(items) = value else {
        return Err(KernelError::invalid(format!(
            "input {index} must be an int list, got {}",
            value.kind_name()
        )));
    };
    items
        .iter()
        .map(|item| {
            item.as_int()
                .ok_or_else(|| KernelError::invalid(format!("input {index} holds a non-int")))
        })
        .collect()
}

/// Turns an output cell into a destination tensor of the requested layout.
///
/// Existing storage is reused when it is large enough and does not alias any of `sources`;
/// otherwise the destination gets private storage.
pub fn prepare_output<'a>(
    cell: &'a mut Value,
    dtype: DType,
    dims: &[usize],
    sources: &[&Tensor],
) -> KernelResult<&'a mut Tensor> {
    if !matches!(cell, Value::Tensor(_)) {
        *cell = Value::Tensor(Tensor::zeros(dtype, dims)?);
    }
    let dest = cell
        .as_tensor_mut()
        .ok_or_else(|| KernelError::invalid("output cell does not hold a tensor"))?;
    dest.ensure_layout(dtype, dims)?;
    if sources.iter().any(|source| dest.shares_storage(source)) {
        dest.reallocate();
    }
    Ok(dest)
}
