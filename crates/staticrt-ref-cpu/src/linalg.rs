use staticrt::kernels::{int_list_arg, prepare_output, tensor_arg, KernelError, KernelResult};
use staticrt::tensor::{DType, Tensor};
use staticrt::value::Value;

use crate::cpu::{
    allocating, compute_strides, expect_arity, normalize_axis, output_cell, unsupported_dtype,
    Scalar,
};

/// `matmul(a: [m, k], b: [k, n]) -> [m, n]`.
pub(crate) fn matmul_out(inputs: &[&Value], outputs: &mut [Value]) -> KernelResult<()> {
    expect_arity("aten::matmul", inputs, 2, 2)?;
    let lhs = tensor_arg(inputs, 0)?;
    let rhs = tensor_arg(inputs, 1)?;
    let (m, k, n) = match (lhs.dims(), rhs.dims()) {
        ([m, k], [k2, n]) if k == k2 => (*m, *k, *n),
        (a, b) => {
            return Err(KernelError::invalid(format!(
                "aten::matmul expects [m, k] x [k, n], got {a:?} x {b:?}"
            )))
        }
    };
    if lhs.dtype() != rhs.dtype() {
        return Err(KernelError::invalid(format!(
            "aten::matmul dtype mismatch: {} vs {}",
            lhs.dtype().as_str(),
            rhs.dtype().as_str()
        )));
    }
    let dest = prepare_output(output_cell(outputs, 0)?, lhs.dtype(), &[m, n], &[lhs, rhs])?;
    match lhs.dtype() {
        DType::F32 => gemm::<f32>(lhs, rhs, dest, m, k, n),
        DType::F64 => gemm::<f64>(lhs, rhs, dest, m, k, n),
        DType::Si32 => gemm::<i32>(lhs, rhs, dest, m, k, n),
        DType::Si64 => gemm::<i64>(lhs, rhs, dest, m, k, n),
        other => Err(unsupported_dtype("aten::matmul", other)),
    }
}

pub(crate) fn matmul(inputs: &[&Value]) -> KernelResult<Vec<Value>> {
    allocating(inputs, matmul_out)
}

/// `sum(x)` reduces everything to a scalar; `sum(x, dims)` reduces the listed axes.
pub(crate) fn sum_out(inputs: &[&Value], outputs: &mut [Value]) -> KernelResult<()> {
    expect_arity("aten::sum", inputs, 1, 2)?;
    let input = tensor_arg(inputs, 0)?;
    let rank = input.rank();
    let mut reduced = vec![inputs.len() == 1; rank];
    if inputs.len() == 2 {
        for axis in int_list_arg(inputs, 1)? {
            reduced[normalize_axis(axis, rank)?] = true;
        }
    }
    let out_dims: Vec<usize> = input
        .dims()
        .iter()
        .zip(&reduced)
        .filter(|(_, reduce)| !**reduce)
        .map(|(dim, _)| *dim)
        .collect();
    let dest = prepare_output(output_cell(outputs, 0)?, input.dtype(), &out_dims, &[input])?;
    match input.dtype() {
        DType::F32 => reduce_sum::<f32>(input, dest, &reduced),
        DType::F64 => reduce_sum::<f64>(input, dest, &reduced),
        DType::Si32 => reduce_sum::<i32>(input, dest, &reduced),
        DType::Si64 => reduce_sum::<i64>(input, dest, &reduced),
        other => Err(unsupported_dtype("aten::sum", other)),
    }
}

pub(crate) fn sum(inputs: &[&Value]) -> KernelResult<Vec<Value>> {
    allocating(inputs, sum_out)
}

fn gemm<T: Scalar>(
    lhs: &Tensor,
    rhs: &Tensor,
    dest: &Tensor,
    m: usize,
    k: usize,
    n: usize,
) -> KernelResult<()> {
    let a = lhs.read::<T>()?;
    let b = if lhs.shares_storage(rhs) {
        None
    } else {
        Some(rhs.read::<T>()?)
    };
    let b: &[T] = match &b {
        Some(guard) => &guard[..],
        None => &a[..],
    };
    let mut c = dest.write::<T>()?;
    for row in 0..m {
        for col in 0..n {
            let mut acc = T::ZERO;
            for inner in 0..k {
                acc = acc + a[row * k + inner] * b[inner * n + col];
            }
            c[row * n + col] = acc;
        }
    }
    Ok(())
}

fn reduce_sum<T: Scalar>(input: &Tensor, dest: &Tensor, reduced: &[bool]) -> KernelResult<()> {
    let src = input.read::<T>()?;
    let mut dst = dest.write::<T>()?;
    dst.fill(T::ZERO);

    let dims = input.dims();
    let in_strides = compute_strides(dims);
    let kept: Vec<usize> = (0..dims.len()).filter(|axis| !reduced[*axis]).collect();
    let kept_dims: Vec<usize> = kept.iter().map(|axis| dims[*axis]).collect();
    let out_strides = compute_strides(&kept_dims);

    for (flat, value) in src.iter().enumerate() {
        let mut out_index = 0;
        for (out_axis, axis) in kept.iter().enumerate() {
            let coord = (flat / in_strides[*axis]) % dims[*axis];
            out_index += coord * out_strides[out_axis];
        }
        dst[out_index] = dst[out_index] + *value;
    }
    Ok(())
}
