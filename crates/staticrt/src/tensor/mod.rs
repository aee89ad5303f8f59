//! Host tensors with shareable, planner-bindable storage.

mod dtype;
mod shape;
mod storage;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

pub use dtype::{DType, Element};
pub use shape::{Dimension, Shape, TensorSpec};
pub use storage::{Storage, StorageRead, StorageWrite};

#[derive(Debug, Error)]
pub enum TensorError {
    #[error("dtype mismatch: expected {expected:?}, found {actual:?}")]
    DTypeMismatch { expected: DType, actual: DType },
    #[error("element count mismatch: dims {dims:?} need {expected} elements, got {actual}")]
    ElementCount {
        dims: Vec<usize>,
        expected: usize,
        actual: usize,
    },
    #[error("storage holds {capacity} bytes but {needed} are required")]
    CapacityExceeded { needed: usize, capacity: usize },
    #[error("cannot view dims {from:?} as {to:?}")]
    InvalidView { from: Vec<usize>, to: Vec<usize> },
    #[error("tensor byte length overflows usize")]
    ByteLenOverflow,
    #[error("tensor storage lock poisoned")]
    Poisoned,
}

pub type TensorResult<T> = Result<T, TensorError>;

/// Contiguous row-major tensor.
///
/// Cloning a tensor is shallow: both handles point at the same [`Storage`]. Views created through
/// [`Tensor::view`] share storage as well, which is what the aliasing analysis tracks.
#[derive(Clone)]
pub struct Tensor {
    dtype: DType,
    dims: Vec<usize>,
    storage: Arc<Storage>,
}

impl Tensor {
    pub fn zeros(dtype: DType, dims: &[usize]) -> TensorResult<Self> {
        let byte_len = byte_len_for(dtype, dims)?;
        Ok(Self {
            dtype,
            dims: dims.to_vec(),
            storage: Arc::new(Storage::zeroed(byte_len)),
        })
    }

    pub fn from_vec<T: Element>(dims: &[usize], data: Vec<T>) -> TensorResult<Self> {
        Self::from_slice(dims, &data)
    }

    pub fn from_slice<T: Element>(dims: &[usize], data: &[T]) -> TensorResult<Self> {
        let expected = element_count(dims)?;
        if expected != data.len() {
            return Err(TensorError::ElementCount {
                dims: dims.to_vec(),
                expected,
                actual: data.len(),
            });
        }
        let tensor = Self::zeros(T::DTYPE, dims)?;
        tensor.write::<T>()?.copy_from_slice(data);
        Ok(tensor)
    }

    /// Tensor shell whose storage is detached; it must be bound or resized before use.
    pub fn empty(dtype: DType, dims: &[usize]) -> Self {
        Self {
            dtype,
            dims: dims.to_vec(),
            storage: Arc::new(Storage::detached()),
        }
    }

    /// Binds a tensor onto an existing storage region.
    pub fn with_storage(dtype: DType, dims: &[usize], storage: Arc<Storage>) -> TensorResult<Self> {
        let needed = byte_len_for(dtype, dims)?;
        if needed > storage.capacity() {
            return Err(TensorError::CapacityExceeded {
                needed,
                capacity: storage.capacity(),
            });
        }
        Ok(Self {
            dtype,
            dims: dims.to_vec(),
            storage,
        })
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn byte_len(&self) -> usize {
        self.numel() * self.dtype.size_in_bytes()
    }

    pub fn spec(&self) -> TensorSpec {
        TensorSpec::fixed(self.dtype, &self.dims)
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// `true` when the tensor needs bytes but its storage has been released.
    pub fn is_detached(&self) -> bool {
        self.storage.is_detached() && self.byte_len() > 0
    }

    pub fn shares_storage(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    pub fn read<T: Element>(&self) -> TensorResult<StorageRead<'_, T>> {
        self.check_dtype::<T>()?;
        self.storage.read::<T>(self.numel())
    }

    pub fn write<T: Element>(&self) -> TensorResult<StorageWrite<'_, T>> {
        self.check_dtype::<T>()?;
        self.storage.write::<T>(self.numel())
    }

    pub fn to_vec<T: Element>(&self) -> TensorResult<Vec<T>> {
        Ok(self.read::<T>()?.to_vec())
    }

    /// Reinterprets the tensor with new dims over the same storage.
    pub fn view(&self, dims: &[usize]) -> TensorResult<Tensor> {
        if element_count(dims)? != self.numel() {
            return Err(TensorError::InvalidView {
                from: self.dims.clone(),
                to: dims.to_vec(),
            });
        }
        Ok(Self {
            dtype: self.dtype,
            dims: dims.to_vec(),
            storage: Arc::clone(&self.storage),
        })
    }

    /// Copies the contents into freshly allocated storage.
    pub fn deep_clone(&self) -> TensorResult<Tensor> {
        let copy = Self::zeros(self.dtype, &self.dims)?;
        let len = self.byte_len();
        let src = self.storage.read::<u8>(len)?;
        copy.storage.write::<u8>(len)?.copy_from_slice(&src);
        Ok(copy)
    }

    /// Prepares this tensor as a kernel destination.
    ///
    /// The current storage is kept when it is large enough, which is how out-variant kernels
    /// write into planner-provided regions; otherwise the tensor allocates its own storage.
    /// Returns `true` when the existing storage was reused.
    pub fn ensure_layout(&mut self, dtype: DType, dims: &[usize]) -> TensorResult<bool> {
        let needed = byte_len_for(dtype, dims)?;
        self.dtype = dtype;
        self.dims = dims.to_vec();
        if needed <= self.storage.capacity() {
            return Ok(true);
        }
        self.storage = Arc::new(Storage::zeroed(needed));
        Ok(false)
    }

    /// Replaces the storage with a private allocation, dropping any sharing.
    pub fn reallocate(&mut self) {
        self.storage = Arc::new(Storage::zeroed(self.byte_len()));
    }

    /// Releases the storage while keeping dtype and dims.
    pub fn detach_storage(&mut self) {
        if !self.storage.is_detached() {
            self.storage = Arc::new(Storage::detached());
        }
    }

    fn check_dtype<T: Element>(&self) -> TensorResult<()> {
        if T::DTYPE != self.dtype {
            return Err(TensorError::DTypeMismatch {
                expected: self.dtype,
                actual: T::DTYPE,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("dtype", &self.dtype)
            .field("dims", &self.dims)
            .field("storage_nbytes", &self.storage.capacity())
            .finish()
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor<{}{:?}>", self.dtype.as_str(), self.dims)?;
        if self.is_detached() {
            return write!(f, " (detached)");
        }
        let preview = match self.dtype {
            DType::F32 => preview::<f32>(self),
            DType::F64 => preview::<f64>(self),
            DType::Si32 => preview::<i32>(self),
            DType::Si64 => preview::<i64>(self),
            DType::I1 => preview::<u8>(self),
        };
        match preview {
            Some(values) => write!(f, " {values}"),
            None => Ok(()),
        }
    }
}

fn preview<T: Element + fmt::Debug>(tensor: &Tensor) -> Option<String> {
    const LIMIT: usize = 8;
    let data = tensor.read::<T>().ok()?;
    let shown = &data[..data.len().min(LIMIT)];
    if data.len() > LIMIT {
        Some(format!("{shown:?}.."))
    } else {
        Some(format!("{shown:?}"))
    }
}

fn element_count(dims: &[usize]) -> TensorResult<usize> {
    dims.iter()
        .try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
        .ok_or(TensorError::ByteLenOverflow)
}

fn byte_len_for(dtype: DType, dims: &[usize]) -> TensorResult<usize> {
    element_count(dims)?
        .checked_mul(dtype.size_in_bytes())
        .ok_or(TensorError::ByteLenOverflow)
}
