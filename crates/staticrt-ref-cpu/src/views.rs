//! Operators whose outputs alias the first input's storage.

use staticrt::kernels::{int_list_arg, tensor_arg, KernelError, KernelResult};
use staticrt::value::Value;

use crate::cpu::{expect_arity, normalize_axis};

/// `reshape(x, shape)`; one entry of `shape` may be `-1`.
pub(crate) fn reshape(inputs: &[&Value]) -> KernelResult<Vec<Value>> {
    expect_arity("aten::reshape", inputs, 2, 2)?;
    let input = tensor_arg(inputs, 0)?;
    let requested = int_list_arg(inputs, 1)?;
    let dims = infer_shape(&requested, input.numel())?;
    Ok(vec![Value::Tensor(input.view(&dims)?)])
}

/// `flatten(x, start_dim = 0, end_dim = -1)`.
pub(crate) fn flatten(inputs: &[&Value]) -> KernelResult<Vec<Value>> {
    expect_arity("aten::flatten", inputs, 1, 3)?;
    let input = tensor_arg(inputs, 0)?;
    let rank = input.rank();
    if rank == 0 {
        return Ok(vec![Value::Tensor(input.view(&[1])?)]);
    }
    let start = int_input(inputs, 1, 0)?;
    let end = int_input(inputs, 2, -1)?;
    let start = normalize_axis(start, rank)?;
    let end = normalize_axis(end, rank)?;
    if start > end {
        return Err(KernelError::invalid(format!(
            "aten::flatten start_dim {start} is after end_dim {end}"
        )));
    }
    let dims = input.dims();
    let mut flat = Vec::with_capacity(rank - (end - start));
    flat.extend_from_slice(&dims[..start]);
    flat.push(dims[start..=end].iter().product());
    flat.extend_from_slice(&dims[end + 1..]);
    Ok(vec![Value::Tensor(input.view(&flat)?)])
}

pub(crate) fn detach(inputs: &[&Value]) -> KernelResult<Vec<Value>> {
    expect_arity("aten::detach", inputs, 1, 1)?;
    let input = tensor_arg(inputs, 0)?;
    Ok(vec![Value::Tensor(input.view(input.dims())?)])
}

fn int_input(inputs: &[&Value], index: usize, default: i64) -> KernelResult<i64> {
    match inputs.get(index) {
        None => Ok(default),
        Some(value) => value.as_int().ok_or_else(|| {
            KernelError::invalid(format!(
                "input {index} must be an int, got {}",
                value.kind_name()
            ))
        }),
    }
}

fn infer_shape(requested: &[i64], numel: usize) -> KernelResult<Vec<usize>> {
    let mut inferred = None;
    let mut known = 1usize;
    for (axis, dim) in requested.iter().enumerate() {
        match *dim {
            -1 if inferred.is_none() => inferred = Some(axis),
            dim if dim >= 0 => known *= dim as usize,
            _ => {
                return Err(KernelError::invalid(format!(
                    "invalid reshape target {requested:?}"
                )))
            }
        }
    }
    let mut dims: Vec<usize> = requested.iter().map(|dim| (*dim).max(0) as usize).collect();
    if let Some(axis) = inferred {
        if known == 0 || numel % known != 0 {
            return Err(KernelError::invalid(format!(
                "cannot reshape {numel} elements into {requested:?}"
            )));
        }
        dims[axis] = numel / known;
    }
    Ok(dims)
}
