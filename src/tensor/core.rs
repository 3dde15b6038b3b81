//! Core Tensor type

use super::{Layout, Storage};
use crate::dtype::{DType, Element};
use crate::error::{Error, Result};

/// N-dimensional array backed by aligned host storage
///
/// `Tensor` consists of:
/// - **Storage**: reference-counted, 64-byte-aligned memory
/// - **Layout**: shape, strides, and offset defining the view into storage
/// - **DType**: element type (determined at runtime)
///
/// Operations like `transpose`, `reshape`, and `offset_view` create new
/// tensors that share the same underlying storage.
pub struct Tensor {
    storage: Storage,
    layout: Layout,
}

impl Tensor {
    /// Create a tensor from storage and layout
    pub fn from_parts(storage: Storage, layout: Layout) -> Self {
        Self { storage, layout }
    }

    /// Create a tensor from a slice of data
    ///
    /// # Panics
    ///
    /// Panics if `data.len()` does not equal the product of the `shape`
    /// dimensions. For a fallible alternative, use [`Self::try_from_slice`].
    pub fn from_slice<T: Element>(data: &[T], shape: &[usize], _device: &crate::exec::Device) -> Self {
        Self::try_from_slice(data, shape).expect("Tensor::from_slice failed")
    }

    /// Create a tensor from a slice of data (fallible version)
    pub fn try_from_slice<T: Element>(data: &[T], shape: &[usize]) -> Result<Self> {
        let expected_len: usize = shape.iter().product();
        if data.len() != expected_len {
            return Err(Error::ShapeMismatch {
                expected: shape.to_vec(),
                got: vec![data.len()],
            });
        }

        Ok(Self {
            storage: Storage::from_slice(data)?,
            layout: Layout::contiguous(shape),
        })
    }

    /// Create a zero-initialized tensor
    ///
    /// Allocation is zero-filled, so this is also the cheapest way to get a
    /// defined output buffer.
    pub fn empty(shape: &[usize], dtype: DType, _device: &crate::exec::Device) -> Self {
        Self::try_empty(shape, dtype).expect("Tensor::empty failed")
    }

    /// Create a zero-initialized tensor (fallible version)
    pub fn try_empty(shape: &[usize], dtype: DType) -> Result<Self> {
        let len: usize = shape.iter().product();
        Ok(Self {
            storage: Storage::new(len, dtype)?,
            layout: Layout::contiguous(shape),
        })
    }

    /// Create a tensor filled with zeros
    pub fn zeros(shape: &[usize], dtype: DType, device: &crate::exec::Device) -> Self {
        Self::empty(shape, dtype, device)
    }

    /// Create a tensor filled with a scalar value
    ///
    /// The scalar is converted to the target dtype. Complex dtypes are not
    /// supported (there is no scalar fill for them here).
    pub fn try_full_scalar(shape: &[usize], dtype: DType, value: f64) -> Result<Self> {
        #[inline]
        fn typed_to_bytes<T: bytemuck::NoUninit>(v: Vec<T>) -> Vec<u8> {
            bytemuck::cast_slice::<T, u8>(&v).to_vec()
        }

        let len: usize = shape.iter().product();
        if len == 0 {
            return Self::try_empty(shape, dtype);
        }

        let bytes: Vec<u8> = match dtype {
            DType::F64 => typed_to_bytes(vec![value; len]),
            DType::F32 => typed_to_bytes(vec![value as f32; len]),
            #[cfg(feature = "f16")]
            DType::F16 => typed_to_bytes(vec![half::f16::from_f64(value); len]),
            #[cfg(feature = "f16")]
            DType::BF16 => typed_to_bytes(vec![half::bf16::from_f64(value); len]),
            DType::I64 => typed_to_bytes(vec![value as i64; len]),
            DType::I32 => typed_to_bytes(vec![value as i32; len]),
            DType::I16 => typed_to_bytes(vec![value as i16; len]),
            DType::I8 => typed_to_bytes(vec![value as i8; len]),
            DType::U64 => typed_to_bytes(vec![value as u64; len]),
            DType::U32 => typed_to_bytes(vec![value as u32; len]),
            DType::U16 => typed_to_bytes(vec![value as u16; len]),
            DType::U8 => vec![value as u8; len],
            DType::Bool => vec![if value != 0.0 { 1u8 } else { 0u8 }; len],
            _ => return Err(Error::unsupported_dtype(dtype, "full_scalar")),
        };

        Ok(Self {
            storage: Storage::from_bytes(&bytes, dtype)?,
            layout: Layout::contiguous(shape),
        })
    }

    // ===== Accessors =====

    /// Get the storage
    #[inline]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Get the layout
    #[inline]
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Get the shape
    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.layout.shape()
    }

    /// Get the strides (in elements)
    #[inline]
    pub fn strides(&self) -> &[isize] {
        self.layout.strides()
    }

    /// Get the element type
    #[inline]
    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    /// Total number of elements
    #[inline]
    pub fn numel(&self) -> usize {
        self.layout.elem_count()
    }

    /// Number of dimensions
    #[inline]
    pub fn ndim(&self) -> usize {
        self.layout.ndim()
    }

    /// Check if memory layout is contiguous (row-major)
    #[inline]
    pub fn is_contiguous(&self) -> bool {
        self.layout.is_contiguous()
    }

    /// Address of the first element of this view
    ///
    /// This is the storage base plus the layout offset; it is what kernels
    /// receive and what alignment decisions are made from.
    #[inline]
    pub fn data_ptr(&self) -> u64 {
        self.storage.ptr() + (self.layout.offset() * self.dtype().size_in_bytes()) as u64
    }

    /// Whether every element offset of this view fits 32-bit index math
    ///
    /// Gates the fast and reference softmax paths, which use 32-bit offset
    /// arithmetic; larger tensors take the 64-bit kernels.
    pub fn can_use_32bit_index(&self) -> bool {
        (self.layout.offset() + self.numel()) <= u32::MAX as usize
    }

    // ===== Views =====

    /// Zero-copy reshape of a contiguous tensor
    pub fn reshape(&self, shape: &[usize]) -> Result<Tensor> {
        let new_len: usize = shape.iter().product();
        if new_len != self.numel() {
            return Err(Error::shape_mismatch(shape, self.shape()));
        }
        if !self.is_contiguous() {
            return Err(Error::NotContiguous);
        }
        Ok(Self {
            storage: self.storage.clone(),
            layout: Layout::contiguous(shape),
        })
    }

    /// Zero-copy transpose view swapping dimensions `d0` and `d1`
    pub fn transpose(&self, d0: isize, d1: isize) -> Result<Tensor> {
        let ndim = self.ndim();
        let d0 = self
            .layout
            .normalize_dim(d0)
            .ok_or(Error::InvalidDimension { dim: d0, ndim })?;
        let d1 = self
            .layout
            .normalize_dim(d1)
            .ok_or(Error::InvalidDimension { dim: d1, ndim })?;
        Ok(Self {
            storage: self.storage.clone(),
            layout: self.layout.transposed(d0, d1),
        })
    }

    /// View starting `delta` elements into this tensor's buffer
    ///
    /// The view is contiguous with the given shape. Used to construct inputs
    /// whose base address is not vector-aligned.
    pub fn offset_view(&self, delta: usize, shape: &[usize]) -> Result<Tensor> {
        let len: usize = shape.iter().product();
        if self.layout.offset() + delta + len > self.storage.len() {
            return Err(Error::invalid_argument(
                "delta",
                format!(
                    "view of {} elements at offset {} exceeds storage of {}",
                    len,
                    self.layout.offset() + delta,
                    self.storage.len()
                ),
            ));
        }
        Ok(Self {
            storage: self.storage.clone(),
            layout: Layout::contiguous(shape).with_offset(self.layout.offset() + delta),
        })
    }

    /// Materialize this view into a new contiguous tensor
    pub fn contiguous(&self) -> Tensor {
        if self.is_contiguous() {
            return self.clone();
        }

        let out = Tensor::try_empty(self.shape(), self.dtype()).expect("allocation failed");
        let numel = self.numel();
        if numel == 0 {
            return out;
        }

        let elem_size = self.dtype().size_in_bytes();
        let src_base = self.data_ptr() as *const u8;
        let dst_base = out.storage().ptr() as *mut u8;
        let shape = self.shape();
        let strides = self.strides();

        // Gather element-by-element in row-major order of the view.
        let mut indices = vec![0usize; shape.len()];
        for dst_idx in 0..numel {
            let mut src_elem_offset: isize = 0;
            for (i, &idx) in indices.iter().enumerate() {
                src_elem_offset += idx as isize * strides[i];
            }
            unsafe {
                std::ptr::copy_nonoverlapping(
                    src_base.offset(src_elem_offset * elem_size as isize),
                    dst_base.add(dst_idx * elem_size),
                    elem_size,
                );
            }
            for dim in (0..shape.len()).rev() {
                indices[dim] += 1;
                if indices[dim] < shape[dim] {
                    break;
                }
                indices[dim] = 0;
            }
        }

        out
    }

    /// Copy this tensor's elements to a host vector (view order)
    pub fn to_vec<T: Element>(&self) -> Vec<T> {
        debug_assert_eq!(T::DTYPE.size_in_bytes(), self.dtype().size_in_bytes());
        if self.is_contiguous() && self.layout.offset() == 0 && self.numel() == self.storage.len() {
            return self.storage.to_vec::<T>();
        }
        let contig = self.contiguous();
        let mut result = vec![T::zeroed(); contig.numel()];
        if !result.is_empty() {
            let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut result);
            unsafe {
                std::ptr::copy_nonoverlapping(
                    contig.data_ptr() as *const u8,
                    bytes.as_mut_ptr(),
                    bytes.len(),
                );
            }
        }
        result
    }
}

impl Clone for Tensor {
    fn clone(&self) -> Self {
        Self {
            storage: self.storage.clone(),
            layout: self.layout.clone(),
        }
    }
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape())
            .field("dtype", &self.dtype())
            .field("contiguous", &self.is_contiguous())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_slice_shape_check() {
        assert!(Tensor::try_from_slice(&[1.0f32, 2.0], &[3]).is_err());
        let t = Tensor::try_from_slice(&[1.0f32, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        assert_eq!(t.shape(), &[2, 2]);
        assert_eq!(t.dtype(), DType::F32);
    }

    #[test]
    fn test_transpose_contiguous_roundtrip() {
        let t = Tensor::try_from_slice(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]).unwrap();
        let tt = t.transpose(0, 1).unwrap();
        assert!(!tt.is_contiguous());
        assert_eq!(tt.shape(), &[3, 2]);
        assert_eq!(tt.contiguous().to_vec::<f32>(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_offset_view() {
        let t = Tensor::try_from_slice(&[0.0f32, 1.0, 2.0, 3.0, 4.0], &[5]).unwrap();
        let v = t.offset_view(1, &[3]).unwrap();
        assert_eq!(v.to_vec::<f32>(), vec![1.0, 2.0, 3.0]);
        assert_eq!(v.data_ptr(), t.data_ptr() + 4);
        assert!(t.offset_view(3, &[3]).is_err());
    }

    #[test]
    fn test_full_scalar() {
        let t = Tensor::try_full_scalar(&[2, 2], DType::F64, 3.5).unwrap();
        assert_eq!(t.to_vec::<f64>(), vec![3.5; 4]);
    }
}
