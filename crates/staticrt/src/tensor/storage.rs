//! Reference-counted byte buffers backing tensors and planner regions.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{Element, TensorError, TensorResult};

const WORD_BYTES: usize = std::mem::size_of::<u64>();

/// Contiguous, 8-byte aligned storage region.
///
/// The capacity is fixed at construction. A storage with zero capacity is *detached*: it is what
/// planner-managed tensors point at between invocations.
pub struct Storage {
    words: RwLock<Vec<u64>>,
    capacity: usize,
}

impl Storage {
    /// Allocates a zero-filled region of at least `byte_len` bytes.
    pub fn zeroed(byte_len: usize) -> Self {
        let words = byte_len.div_ceil(WORD_BYTES);
        Self {
            words: RwLock::new(vec![0u64; words]),
            capacity: byte_len,
        }
    }

    pub fn detached() -> Self {
        Self {
            words: RwLock::new(Vec::new()),
            capacity: 0,
        }
    }

    /// Usable size in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_detached(&self) -> bool {
        self.capacity == 0
    }

    pub(crate) fn read<T: Element>(&self, len: usize) -> TensorResult<StorageRead<'_, T>> {
        self.check_fits::<T>(len)?;
        let guard = self.words.read().map_err(|_| TensorError::Poisoned)?;
        Ok(StorageRead {
            guard,
            len,
            _elem: PhantomData,
        })
    }

    pub(crate) fn write<T: Element>(&self, len: usize) -> TensorResult<StorageWrite<'_, T>> {
        self.check_fits::<T>(len)?;
        let guard = self.words.write().map_err(|_| TensorError::Poisoned)?;
        Ok(StorageWrite {
            guard,
            len,
            _elem: PhantomData,
        })
    }

    fn check_fits<T: Element>(&self, len: usize) -> TensorResult<()> {
        let needed = len
            .checked_mul(std::mem::size_of::<T>())
            .ok_or(TensorError::ByteLenOverflow)?;
        if needed > self.capacity {
            return Err(TensorError::CapacityExceeded {
                needed,
                capacity: self.capacity,
            });
        }
        Ok(())
    }
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// Shared typed view over a storage prefix.
pub struct StorageRead<'a, T> {
    guard: RwLockReadGuard<'a, Vec<u64>>,
    len: usize,
    _elem: PhantomData<T>,
}

impl<T: Element> Deref for StorageRead<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &bytemuck::cast_slice::<u64, T>(self.guard.as_slice())[..self.len]
    }
}

/// Exclusive typed view over a storage prefix.
pub struct StorageWrite<'a, T> {
    guard: RwLockWriteGuard<'a, Vec<u64>>,
    len: usize,
    _elem: PhantomData<T>,
}

impl<T: Element> Deref for StorageWrite<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &bytemuck::cast_slice::<u64, T>(self.guard.as_slice())[..self.len]
    }
}

impl<T: Element> DerefMut for StorageWrite<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut bytemuck::cast_slice_mut::<u64, T>(self.guard.as_mut_slice())[..self.len]
    }
}
