//! Container construction and unpacking.

use staticrt::kernels::{KernelError, KernelResult};
use staticrt::value::Value;

pub(crate) fn list_construct(inputs: &[&Value]) -> KernelResult<Vec<Value>> {
    Ok(vec![Value::List(inputs.iter().map(|value| (*value).clone()).collect())])
}

pub(crate) fn tuple_construct(inputs: &[&Value]) -> KernelResult<Vec<Value>> {
    Ok(vec![Value::Tuple(inputs.iter().map(|value| (*value).clone()).collect())])
}

pub(crate) fn tuple_unpack(inputs: &[&Value]) -> KernelResult<Vec<Value>> {
    match inputs {
        [Value::Tuple(items)] => Ok(items.clone()),
        [other] => Err(KernelError::invalid(format!(
            "prim::TupleUnpack expects a Tuple, got {}",
            other.kind_name()
        ))),
        _ => Err(KernelError::invalid(format!(
            "prim::TupleUnpack expects 1 input, got {}",
            inputs.len()
        ))),
    }
}

pub(crate) fn list_unpack(inputs: &[&Value]) -> KernelResult<Vec<Value>> {
    match inputs {
        [Value::List(items)] => Ok(items.clone()),
        [other] => Err(KernelError::invalid(format!(
            "prim::ListUnpack expects a List, got {}",
            other.kind_name()
        ))),
        _ => Err(KernelError::invalid(format!(
            "prim::ListUnpack expects 1 input, got {}",
            inputs.len()
        ))),
    }
}
