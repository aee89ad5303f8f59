//! Enumerates the scalar element types the engine can plan storage for.

use serde::{Deserialize, Serialize};

/// Logical dtype identifier shared by tensors, graph types and the memory planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DType {
    /// 32-bit floating point following IEEE-754 semantics.
    F32,
    /// 64-bit floating point.
    F64,
    /// 32-bit signed integer.
    Si32,
    /// 64-bit signed integer, the default integer type of most frontends.
    Si64,
    /// Boolean stored as one byte per element.
    I1,
}

impl DType {
    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::I1 => 1,
            DType::F32 | DType::Si32 => 4,
            DType::F64 | DType::Si64 => 8,
        }
    }

    /// Returns `true` when the dtype is a floating-point representation.
    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    /// Short lowercase name used by textual dumps.
    pub fn as_str(self) -> &'static str {
        match self {
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::Si32 => "si32",
            DType::Si64 => "si64",
            DType::I1 => "i1",
        }
    }
}

/// Scalar types that can be viewed directly inside tensor storage.
pub trait Element: bytemuck::Pod + Send + Sync + 'static {
    const DTYPE: DType;
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;
}

impl Element for f64 {
    const DTYPE: DType = DType::F64;
}

impl Element for i32 {
    const DTYPE: DType = DType::Si32;
}

impl Element for i64 {
    const DTYPE: DType = DType::Si64;
}

impl Element for u8 {
    const DTYPE: DType = DType::I1;
}
