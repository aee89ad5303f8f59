//! Shared helpers for the reference kernels.

use std::ops::{Add, Mul, Sub};

use staticrt::kernels::{KernelError, KernelResult, OutKernelFn};
use staticrt::tensor::{DType, Element};
use staticrt::value::Value;

/// Numeric element types the arithmetic kernels accept.
pub(crate) trait Scalar:
    Element + PartialOrd + Add<Output = Self> + Sub<Output = Self> + Mul<Output = Self>
{
    const ZERO: Self;

    fn from_f64(value: f64) -> Self;
}

impl Scalar for f32 {
    const ZERO: Self = 0.0;

    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl Scalar for f64 {
    const ZERO: Self = 0.0;

    fn from_f64(value: f64) -> Self {
        value
    }
}

impl Scalar for i32 {
    const ZERO: Self = 0;

    fn from_f64(value: f64) -> Self {
        value as i32
    }
}

impl Scalar for i64 {
    const ZERO: Self = 0;

    fn from_f64(value: f64) -> Self {
        value as i64
    }
}

pub(crate) trait Float: Scalar {
    fn tanh(self) -> Self;
    fn sigmoid(self) -> Self;
}

impl Float for f32 {
    fn tanh(self) -> Self {
        f32::tanh(self)
    }

    fn sigmoid(self) -> Self {
        1.0 / (1.0 + (-self).exp())
    }
}

impl Float for f64 {
    fn tanh(self) -> Self {
        f64::tanh(self)
    }

    fn sigmoid(self) -> Self {
        1.0 / (1.0 + (-self).exp())
    }
}

/// Runs an out variant against a fresh output cell, giving the allocating form.
pub(crate) fn allocating(inputs: &[&Value], out: OutKernelFn) -> KernelResult<Vec<Value>> {
    let mut outputs = vec![Value::None];
    out(inputs, &mut outputs)?;
    Ok(outputs)
}

pub(crate) fn output_cell<'a>(outputs: &'a mut [Value], index: usize) -> KernelResult<&'a mut Value> {
    let available = outputs.len();
    outputs.get_mut(index).ok_or_else(|| {
        KernelError::invalid(format!(
            "output {index} requested but only {available} output cells were provided"
        ))
    })
}

pub(crate) fn expect_arity(op: &str, inputs: &[&Value], min: usize, max: usize) -> KernelResult<()> {
    if inputs.len() < min || inputs.len() > max {
        let expected = if min == max {
            format!("{min}")
        } else {
            format!("{min}..={max}")
        };
        return Err(KernelError::invalid(format!(
            "{op} expects {expected} inputs, got {}",
            inputs.len()
        )));
    }
    Ok(())
}

pub(crate) fn unsupported_dtype(op: &str, dtype: DType) -> KernelError {
    KernelError::unsupported(format!("{op} does not support dtype {}", dtype.as_str()))
}

/// Resolves a possibly negative axis against `rank`.
pub(crate) fn normalize_axis(axis: i64, rank: usize) -> KernelResult<usize> {
    let rank_i = rank as i64;
    let resolved = if axis < 0 { axis + rank_i } else { axis };
    if resolved < 0 || resolved >= rank_i.max(1) {
        return Err(KernelError::invalid(format!(
            "axis {axis} out of range for rank {rank}"
        )));
    }
    Ok(resolved as usize)
}

pub(crate) fn compute_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; dims.len()];
    for axis in (0..dims.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * dims[axis + 1];
    }
    strides
}
