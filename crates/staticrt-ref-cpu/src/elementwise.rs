use staticrt::kernels::{prepare_output, scalar_arg, tensor_arg, KernelError, KernelResult};
use staticrt::tensor::{DType, Element, Tensor};
use staticrt::value::Value;

use crate::cpu::{allocating, expect_arity, output_cell, unsupported_dtype, Float, Scalar};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Relu,
    Sigmoid,
    Tanh,
    Copy,
}

impl UnaryOp {
    fn name(self) -> &'static str {
        match self {
            UnaryOp::Relu => "aten::relu",
            UnaryOp::Sigmoid => "aten::sigmoid",
            UnaryOp::Tanh => "aten::tanh",
            UnaryOp::Copy => "aten::clone",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
}

impl BinaryOp {
    fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "aten::add",
            BinaryOp::Sub => "aten::sub",
            BinaryOp::Mul => "aten::mul",
        }
    }
}

pub(crate) fn relu_out(inputs: &[&Value], outputs: &mut [Value]) -> KernelResult<()> {
    unary_out(inputs, outputs, UnaryOp::Relu)
}

pub(crate) fn relu(inputs: &[&Value]) -> KernelResult<Vec<Value>> {
    allocating(inputs, relu_out)
}

pub(crate) fn sigmoid_out(inputs: &[&Value], outputs: &mut [Value]) -> KernelResult<()> {
    unary_out(inputs, outputs, UnaryOp::Sigmoid)
}

pub(crate) fn sigmoid(inputs: &[&Value]) -> KernelResult<Vec<Value>> {
    allocating(inputs, sigmoid_out)
}

pub(crate) fn tanh_out(inputs: &[&Value], outputs: &mut [Value]) -> KernelResult<()> {
    unary_out(inputs, outputs, UnaryOp::Tanh)
}

pub(crate) fn tanh(inputs: &[&Value]) -> KernelResult<Vec<Value>> {
    allocating(inputs, tanh_out)
}

pub(crate) fn clone_out(inputs: &[&Value], outputs: &mut [Value]) -> KernelResult<()> {
    unary_out(inputs, outputs, UnaryOp::Copy)
}

pub(crate) fn clone(inputs: &[&Value]) -> KernelResult<Vec<Value>> {
    allocating(inputs, clone_out)
}

/// `add(a, b, alpha = 1)` computes `a + alpha * b`.
pub(crate) fn add_out(inputs: &[&Value], outputs: &mut [Value]) -> KernelResult<()> {
    binary_out(inputs, outputs, BinaryOp::Add)
}

pub(crate) fn add(inputs: &[&Value]) -> KernelResult<Vec<Value>> {
    allocating(inputs, add_out)
}

/// `sub(a, b, alpha = 1)` computes `a - alpha * b`.
pub(crate) fn sub_out(inputs: &[&Value], outputs: &mut [Value]) -> KernelResult<()> {
    binary_out(inputs, outputs, BinaryOp::Sub)
}

pub(crate) fn sub(inputs: &[&Value]) -> KernelResult<Vec<Value>> {
    allocating(inputs, sub_out)
}

pub(crate) fn mul_out(inputs: &[&Value], outputs: &mut [Value]) -> KernelResult<()> {
    binary_out(inputs, outputs, BinaryOp::Mul)
}

pub(crate) fn mul(inputs: &[&Value]) -> KernelResult<Vec<Value>> {
    allocating(inputs, mul_out)
}

pub(crate) fn mul_scalar_out(inputs: &[&Value], outputs: &mut [Value]) -> KernelResult<()> {
    expect_arity("aten::mul_scalar", inputs, 2, 2)?;
    let input = tensor_arg(inputs, 0)?;
    let factor = scalar_arg(inputs, 1)?;
    let dest = prepare_output(output_cell(outputs, 0)?, input.dtype(), input.dims(), &[input])?;
    match input.dtype() {
        DType::F32 => scale::<f32>(input, dest, factor),
        DType::F64 => scale::<f64>(input, dest, factor),
        DType::Si32 => scale::<i32>(input, dest, factor),
        DType::Si64 => scale::<i64>(input, dest, factor),
        other => Err(unsupported_dtype("aten::mul_scalar", other)),
    }
}

pub(crate) fn mul_scalar(inputs: &[&Value]) -> KernelResult<Vec<Value>> {
    allocating(inputs, mul_scalar_out)
}

fn unary_out(inputs: &[&Value], outputs: &mut [Value], op: UnaryOp) -> KernelResult<()> {
    expect_arity(op.name(), inputs, 1, 1)?;
    let input = tensor_arg(inputs, 0)?;
    let dest = prepare_output(output_cell(outputs, 0)?, input.dtype(), input.dims(), &[input])?;
    match (op, input.dtype()) {
        (UnaryOp::Copy, DType::F32) => copy_elements::<f32>(input, dest),
        (UnaryOp::Copy, DType::F64) => copy_elements::<f64>(input, dest),
        (UnaryOp::Copy, DType::Si32) => copy_elements::<i32>(input, dest),
        (UnaryOp::Copy, DType::Si64) => copy_elements::<i64>(input, dest),
        (UnaryOp::Copy, DType::I1) => copy_elements::<u8>(input, dest),
        (UnaryOp::Relu, DType::F32) => map::<f32>(input, dest, relu_scalar),
        (UnaryOp::Relu, DType::F64) => map::<f64>(input, dest, relu_scalar),
        (UnaryOp::Relu, DType::Si32) => map::<i32>(input, dest, relu_scalar),
        (UnaryOp::Relu, DType::Si64) => map::<i64>(input, dest, relu_scalar),
        (UnaryOp::Sigmoid, DType::F32) => map::<f32>(input, dest, Float::sigmoid),
        (UnaryOp::Sigmoid, DType::F64) => map::<f64>(input, dest, Float::sigmoid),
        (UnaryOp::Tanh, DType::F32) => map::<f32>(input, dest, Float::tanh),
        (UnaryOp::Tanh, DType::F64) => map::<f64>(input, dest, Float::tanh),
        (op, dtype) => Err(unsupported_dtype(op.name(), dtype)),
    }
}

fn binary_out(inputs: &[&Value], outputs: &mut [Value], op: BinaryOp) -> KernelResult<()> {
    let max_inputs = if op == BinaryOp::Mul { 2 } else { 3 };
    expect_arity(op.name(), inputs, 2, max_inputs)?;
    let lhs = tensor_arg(inputs, 0)?;
    let rhs = tensor_arg(inputs, 1)?;
    let alpha = if inputs.len() > 2 {
        scalar_arg(inputs, 2)?
    } else {
        1.0
    };
    if lhs.dtype() != rhs.dtype() {
        return Err(KernelError::invalid(format!(
            "{} dtype mismatch: {} vs {}",
            op.name(),
            lhs.dtype().as_str(),
            rhs.dtype().as_str()
        )));
    }
    let dims = broadcast_dims(op.name(), lhs, rhs)?;
    let dest = prepare_output(output_cell(outputs, 0)?, lhs.dtype(), &dims, &[lhs, rhs])?;
    match lhs.dtype() {
        DType::F32 => zip_with::<f32>(lhs, rhs, dest, op, alpha),
        DType::F64 => zip_with::<f64>(lhs, rhs, dest, op, alpha),
        DType::Si32 => zip_with::<i32>(lhs, rhs, dest, op, alpha),
        DType::Si64 => zip_with::<i64>(lhs, rhs, dest, op, alpha),
        other => Err(unsupported_dtype(op.name(), other)),
    }
}

/// Equal dims, or one side holding a single element.
fn broadcast_dims(op: &str, lhs: &Tensor, rhs: &Tensor) -> KernelResult<Vec<usize>> {
    if lhs.dims() == rhs.dims() || rhs.numel() == 1 {
        return Ok(lhs.dims().to_vec());
    }
    if lhs.numel() == 1 {
        return Ok(rhs.dims().to_vec());
    }
    Err(KernelError::invalid(format!(
        "{op} cannot broadcast {:?} with {:?}",
        lhs.dims(),
        rhs.dims()
    )))
}

fn relu_scalar<T: Scalar>(value: T) -> T {
    if value > T::ZERO {
        value
    } else {
        T::ZERO
    }
}

fn copy_elements<T: Element>(input: &Tensor, dest: &Tensor) -> KernelResult<()> {
    let src = input.read::<T>()?;
    dest.write::<T>()?.copy_from_slice(&src);
    Ok(())
}

fn map<T: Scalar>(input: &Tensor, dest: &Tensor, f: fn(T) -> T) -> KernelResult<()> {
    let src = input.read::<T>()?;
    let mut dst = dest.write::<T>()?;
    for (out, value) in dst.iter_mut().zip(src.iter()) {
        *out = f(*value);
    }
    Ok(())
}

fn scale<T: Scalar>(input: &Tensor, dest: &Tensor, factor: f64) -> KernelResult<()> {
    let factor = T::from_f64(factor);
    let src = input.read::<T>()?;
    let mut dst = dest.write::<T>()?;
    for (out, value) in dst.iter_mut().zip(src.iter()) {
        *out = *value * factor;
    }
    Ok(())
}

fn zip_with<T: Scalar>(
    lhs: &Tensor,
    rhs: &Tensor,
    dest: &Tensor,
    op: BinaryOp,
    alpha: f64,
) -> KernelResult<()> {
    let alpha = T::from_f64(alpha);
    let a = lhs.read::<T>()?;
    let b = if lhs.shares_storage(rhs) {
        None
    } else {
        Some(rhs.read::<T>()?)
    };
    let b: &[T] = match &b {
        Some(guard) => &guard[..],
        None => &a[..rhs.numel()],
    };
    let mut dst = dest.write::<T>()?;
    let len = dst.len();
    for index in 0..len {
        let x = a[if a.len() == 1 { 0 } else { index }];
        let y = b[if b.len() == 1 { 0 } else { index }];
        dst[index] = match op {
            BinaryOp::Add => x + alpha * y,
            BinaryOp::Sub => x - alpha * y,
            BinaryOp::Mul => x * y,
        };
    }
    Ok(())
}
