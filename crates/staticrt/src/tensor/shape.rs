//! Shape descriptors for graph-level tensor types.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::DType;

/// Single tensor axis, either fixed at compile time or left open by the frontend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Static(usize),
    Dynamic,
}

/// Ordered list of dimensions describing a tensor's logical layout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<Dimension>,
}

impl Shape {
    pub fn new(dims: impl Into<Vec<Dimension>>) -> Self {
        Self { dims: dims.into() }
    }

    /// Builds a fully static shape from concrete extents.
    pub fn fixed(dims: &[usize]) -> Self {
        Self::new(
            dims.iter()
                .copied()
                .map(Dimension::Static)
                .collect::<Vec<_>>(),
        )
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[Dimension] {
        &self.dims
    }

    /// Returns the concrete extents when every dimension is static.
    pub fn static_dims(&self) -> Option<Vec<usize>> {
        self.dims
            .iter()
            .map(|dim| match dim {
                Dimension::Static(value) => Some(*value),
                Dimension::Dynamic => None,
            })
            .collect()
    }

    pub fn element_count(&self) -> Option<usize> {
        let dims = self.static_dims()?;
        dims.iter()
            .try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
    }

    /// Checks concrete extents against this shape, treating dynamic axes as wildcards.
    pub fn accepts(&self, dims: &[usize]) -> bool {
        self.dims.len() == dims.len()
            && self.dims.iter().zip(dims).all(|(expected, actual)| match expected {
                Dimension::Static(value) => value == actual,
                Dimension::Dynamic => true,
            })
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (idx, dim) in self.dims.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            match dim {
                Dimension::Static(value) => write!(f, "{value}")?,
                Dimension::Dynamic => write!(f, "?")?,
            }
        }
        write!(f, "]")
    }
}

/// Static type of a tensor value in the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: DType,
    pub shape: Shape,
}

impl TensorSpec {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        Self { dtype, shape }
    }

    pub fn fixed(dtype: DType, dims: &[usize]) -> Self {
        Self::new(dtype, Shape::fixed(dims))
    }

    pub fn element_count(&self) -> Option<usize> {
        self.shape.element_count()
    }

    /// Storage footprint in bytes, `None` for dynamic shapes or on overflow.
    pub fn byte_len(&self) -> Option<usize> {
        self.element_count()?
            .checked_mul(self.dtype.size_in_bytes())
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor<{}{}>", self.dtype.as_str(), self.shape)
    }
}
