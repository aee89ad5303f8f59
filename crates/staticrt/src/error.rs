use std::fmt;

use thiserror::Error;

use crate::kernels::KernelError;
use crate::tensor::TensorError;

/// Errors surfaced by compilation and invocation.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The graph contains something the engine cannot lower. Raised at compile time only.
    #[error("unsupported construct: {0}")]
    UnsupportedConstruct(String),
    /// Invocation inputs do not match the compiled signature.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// A node's kernel failed; the whole invocation is aborted.
    #[error("operator {op} failed at node {node}: {source}")]
    OperatorExecution {
        node: usize,
        op: String,
        #[source]
        source: KernelError,
    },
    /// Planner-managed cells still own data after an invocation.
    #[error("memory invariant violated: {0}")]
    MemoryInvariantViolation(LeakReport),
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

impl RuntimeError {
    pub fn unsupported(detail: impl Into<String>) -> Self {
        RuntimeError::UnsupportedConstruct(detail.into())
    }

    pub fn invalid_argument(detail: impl Into<String>) -> Self {
        RuntimeError::InvalidArgument(detail.into())
    }

    pub fn operator(node: usize, op: impl Into<String>, source: KernelError) -> Self {
        RuntimeError::OperatorExecution {
            node,
            op: op.into(),
            source,
        }
    }
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// One cell found holding data it should have released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakedCell {
    pub cell: usize,
    pub description: String,
}

/// Result of a failed leak check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeakReport {
    pub leaks: Vec<LeakedCell>,
}

impl LeakReport {
    pub fn is_empty(&self) -> bool {
        self.leaks.is_empty()
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cell(s) not cleaned up", self.leaks.len())?;
        for leak in &self.leaks {
            write!(f, "; cell {}: {}", leak.cell, leak.description)?;
        }
        Ok(())
    }
}
