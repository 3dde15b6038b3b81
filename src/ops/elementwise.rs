//! Elementwise composition ops backing the fallback branches
//!
//! These are deliberately simple collaborators: linear walks over contiguous
//! buffers with a broadcast offset map for the second operand. The fast
//! softmax paths never call them; only the dispatcher's fallback branches
//! (compose add-then-softmax, materialize a masked fill) do.

use crate::dtype::{DType, Element};
use crate::error::{Error, Result};
use crate::exec::Client;
use crate::kernel::offset::BroadcastOffsets;
use crate::tensor::Tensor;

use super::helpers::{dispatch_ordered_dtype, ensure_contiguous};
use super::traits::ElementwiseOps;

impl ElementwiseOps for Client {
    fn add_alpha(&self, a: &Tensor, b: &Tensor, alpha: f64) -> Result<Tensor> {
        let dtype = a.dtype();
        if b.dtype() != dtype {
            return Err(Error::DTypeMismatch {
                lhs: dtype,
                rhs: b.dtype(),
            });
        }
        let offsets = BroadcastOffsets::new(a.shape(), b.shape())
            .ok_or_else(|| Error::broadcast(a.shape(), b.shape()))?;

        let a_contig = ensure_contiguous(a);
        let b_contig = ensure_contiguous(b);
        let out = self.alloc_output(a.shape(), dtype)?;
        let numel = a.numel();

        dispatch_ordered_dtype!(dtype, T => {
            unsafe {
                add_alpha_kernel::<T>(
                    a_contig.data_ptr() as *const T,
                    b_contig.data_ptr() as *const T,
                    out.data_ptr() as *mut T,
                    numel,
                    T::from_f64(alpha),
                    &offsets,
                );
            }
        }, "add_alpha");

        Ok(out)
    }

    fn add_scalar(&self, a: &Tensor, scalar: f64, alpha: f64) -> Result<Tensor> {
        let dtype = a.dtype();
        let a_contig = ensure_contiguous(a);
        let out = self.alloc_output(a.shape(), dtype)?;
        let numel = a.numel();

        dispatch_ordered_dtype!(dtype, T => {
            let addend = T::from_f64(alpha * scalar);
            unsafe {
                let src = a_contig.data_ptr() as *const T;
                let dst = out.data_ptr() as *mut T;
                for i in 0..numel {
                    *dst.add(i) = *src.add(i) + addend;
                }
            }
        }, "add_scalar");

        Ok(out)
    }

    fn masked_fill(&self, a: &Tensor, mask: &Tensor, value: f64) -> Result<Tensor> {
        let dtype = a.dtype();
        if mask.dtype() != DType::Bool {
            return Err(Error::invalid_argument(
                "mask",
                "masked_fill expects a Bool mask",
            ));
        }
        let offsets = BroadcastOffsets::new(a.shape(), mask.shape())
            .ok_or_else(|| Error::shape_mismatch(a.shape(), mask.shape()))?;

        let a_contig = ensure_contiguous(a);
        let mask_contig = ensure_contiguous(mask);
        let out = self.alloc_output(a.shape(), dtype)?;
        let numel = a.numel();

        dispatch_ordered_dtype!(dtype, T => {
            unsafe {
                masked_fill_kernel::<T>(
                    a_contig.data_ptr() as *const T,
                    mask_contig.data_ptr() as *const u8,
                    out.data_ptr() as *mut T,
                    numel,
                    T::from_f64(value),
                    &offsets,
                );
            }
        }, "masked_fill");

        Ok(out)
    }

    fn add_view(&self, a: &Tensor, b: &Tensor, alpha: f64, sizes: &[usize]) -> Result<Tensor> {
        self.add_alpha(a, b, alpha)?.reshape(sizes)
    }

    fn add_scalar_view(
        &self,
        a: &Tensor,
        scalar: f64,
        alpha: f64,
        sizes: &[usize],
    ) -> Result<Tensor> {
        self.add_scalar(a, scalar, alpha)?.reshape(sizes)
    }
}

/// `out[i] = a[i] + alpha * b[offsets(i)]`
///
/// # Safety
/// `a` and `out` cover `numel` elements; `b` covers every offset the map
/// produces for linear positions below `numel`.
unsafe fn add_alpha_kernel<T: Element>(
    a: *const T,
    b: *const T,
    out: *mut T,
    numel: usize,
    alpha: T,
    offsets: &BroadcastOffsets,
) {
    for i in 0..numel {
        let bv = unsafe { *b.add(offsets.get(i)) };
        unsafe {
            *out.add(i) = *a.add(i) + alpha * bv;
        }
    }
}

/// `out[i] = mask[offsets(i)] ? value : a[i]`
///
/// # Safety
/// `a` and `out` cover `numel` elements; `mask` covers every offset the map
/// produces for linear positions below `numel`.
unsafe fn masked_fill_kernel<T: Element>(
    a: *const T,
    mask: *const u8,
    out: *mut T,
    numel: usize,
    value: T,
    offsets: &BroadcastOffsets,
) {
    for i in 0..numel {
        let m = unsafe { *mask.add(offsets.get(i)) };
        unsafe {
            *out.add(i) = if m != 0 { value } else { *a.add(i) };
        }
    }
}
