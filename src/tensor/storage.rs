//! Storage: aligned host memory with Arc-based sharing

use crate::dtype::{DType, Element};
use crate::error::{Error, Result};
use std::alloc::{alloc_zeroed, dealloc, Layout as AllocLayout};
use std::sync::Arc;

/// Allocation alignment in bytes.
///
/// 64 bytes keeps every freshly allocated buffer aligned for the widest
/// vector width any kernel selects, so alignment-offset handling is only
/// exercised by views that start mid-buffer.
pub(crate) const STORAGE_ALIGN: usize = 64;

/// Storage for tensor data
///
/// Storage wraps an aligned, zero-initialized heap buffer with reference
/// counting, enabling zero-copy views (transpose, reshape, offset views)
/// that share the underlying buffer.
///
/// Memory is deallocated when the last reference is dropped.
pub struct Storage {
    inner: Arc<StorageInner>,
}

struct StorageInner {
    /// Base pointer of the allocation
    ptr: *mut u8,
    /// Number of elements (not bytes)
    len: usize,
    /// Element type
    dtype: DType,
}

// The buffer is plain bytes behind an Arc; sharing across threads is safe as
// long as writers partition the element range, which kernels guarantee.
unsafe impl Send for StorageInner {}
unsafe impl Sync for StorageInner {}

impl Storage {
    /// Allocate zero-filled storage for `len` elements of type `dtype`
    pub fn new(len: usize, dtype: DType) -> Result<Self> {
        let size_bytes = len * dtype.size_in_bytes();
        let ptr = if size_bytes == 0 {
            std::ptr::null_mut()
        } else {
            let layout = AllocLayout::from_size_align(size_bytes, STORAGE_ALIGN)
                .map_err(|_| Error::OutOfMemory { size: size_bytes })?;
            let ptr = unsafe { alloc_zeroed(layout) };
            if ptr.is_null() {
                return Err(Error::OutOfMemory { size: size_bytes });
            }
            ptr
        };

        Ok(Self {
            inner: Arc::new(StorageInner { ptr, len, dtype }),
        })
    }

    /// Create storage from existing data with inferred dtype
    pub fn from_slice<T: Element>(data: &[T]) -> Result<Self> {
        let storage = Self::new(data.len(), T::DTYPE)?;
        if !data.is_empty() {
            let bytes: &[u8] = bytemuck::cast_slice(data);
            unsafe {
                std::ptr::copy_nonoverlapping(bytes.as_ptr(), storage.inner.ptr, bytes.len());
            }
        }
        Ok(storage)
    }

    /// Create storage from raw bytes with explicit dtype
    pub fn from_bytes(data: &[u8], dtype: DType) -> Result<Self> {
        let len = data.len() / dtype.size_in_bytes();
        let storage = Self::new(len, dtype)?;
        if !data.is_empty() {
            unsafe {
                std::ptr::copy_nonoverlapping(data.as_ptr(), storage.inner.ptr, data.len());
            }
        }
        Ok(storage)
    }

    /// Get the base pointer as an address
    #[inline]
    pub fn ptr(&self) -> u64 {
        self.inner.ptr as u64
    }

    /// Get the number of elements
    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len
    }

    /// Check if storage is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.len == 0
    }

    /// Get the element type
    #[inline]
    pub fn dtype(&self) -> DType {
        self.inner.dtype
    }

    /// Get size in bytes
    #[inline]
    pub fn size_in_bytes(&self) -> usize {
        self.inner.len * self.inner.dtype.size_in_bytes()
    }

    /// Copy the full buffer to a host vector
    pub fn to_vec<T: bytemuck::Pod>(&self) -> Vec<T> {
        // Allocate with correct alignment for T, then cast to bytes for the
        // copy. Casting a Vec<u8> to stricter-aligned types would violate
        // alignment.
        let mut result = vec![T::zeroed(); self.inner.len];
        if self.inner.len > 0 {
            let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut result);
            unsafe {
                std::ptr::copy_nonoverlapping(self.inner.ptr, bytes.as_mut_ptr(), bytes.len());
            }
        }
        result
    }
}

impl Clone for Storage {
    /// Clone increments the reference count (zero-copy)
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Drop for StorageInner {
    fn drop(&mut self) {
        let size_bytes = self.len * self.dtype.size_in_bytes();
        if !self.ptr.is_null() && size_bytes != 0 {
            let layout = AllocLayout::from_size_align(size_bytes, STORAGE_ALIGN)
                .expect("Invalid allocation layout");
            unsafe {
                dealloc(self.ptr, layout);
            }
        }
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("ptr", &format!("0x{:x}", self.inner.ptr as usize))
            .field("len", &self.inner.len)
            .field("dtype", &self.inner.dtype)
            .field("refs", &Arc::strong_count(&self.inner))
            .finish()
    }
}
