//! Arg-reduction operator implementation

use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::exec::Client;
use crate::kernel::arg_reduce::arg_reduce_kernel;
use crate::kernel::compare::{IndexedReduceOp, MaxOps, MinOps};
use crate::kernel::dispatch::AxisGeometry;
use crate::tensor::Tensor;

use super::helpers::{atleast_1d, dispatch_ordered_dtype, ensure_contiguous};
use super::traits::ArgReduceOps;
use super::{normalize_dim, reduce_dim_output_shape};

impl ArgReduceOps for Client {
    fn max_dim(&self, a: &Tensor, dim: isize, keepdim: bool) -> Result<(Tensor, Tensor)> {
        arg_reduce_impl::<MaxOps>(self, a, dim, keepdim, "max_dim")
    }

    fn min_dim(&self, a: &Tensor, dim: isize, keepdim: bool) -> Result<(Tensor, Tensor)> {
        arg_reduce_impl::<MinOps>(self, a, dim, keepdim, "min_dim")
    }
}

fn arg_reduce_impl<O>(
    client: &Client,
    a: &Tensor,
    dim: isize,
    keepdim: bool,
    op_name: &'static str,
) -> Result<(Tensor, Tensor)>
where
    O: OpForAll,
{
    let dtype = a.dtype();
    if dtype.is_complex() {
        return Err(Error::unsupported_dtype(dtype, op_name));
    }

    let a = atleast_1d(a);
    let ndim = a.ndim();
    let dim_idx = normalize_dim(ndim, dim).ok_or(Error::InvalidDimension { dim, ndim })?;
    let out_shape = reduce_dim_output_shape(a.shape(), dim_idx, keepdim);

    // Zero-element input: reducing an empty axis has no extremum; any other
    // empty axis yields empty outputs without touching the kernel.
    if a.numel() == 0 {
        if a.shape()[dim_idx] == 0 {
            return Err(Error::invalid_argument(
                "dim",
                format!("{op_name}: cannot reduce over a zero-size axis"),
            ));
        }
        let values = client.alloc_output(&out_shape, dtype)?;
        let indices = client.alloc_output(&out_shape, DType::I64)?;
        return Ok((values, indices));
    }

    // Trivial reduction: a single element is its own extremum at index 0.
    if a.numel() == 1 {
        let src = ensure_contiguous(&a);
        let values = client.alloc_output(&out_shape, dtype)?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                src.data_ptr() as *const u8,
                values.data_ptr() as *mut u8,
                dtype.size_in_bytes(),
            );
        }
        let indices = client.alloc_output(&out_shape, DType::I64)?;
        return Ok((values, indices));
    }

    let geom = AxisGeometry::from_shape(a.shape(), dim_idx);
    let a_contig = ensure_contiguous(&a);
    let values = client.alloc_output(&out_shape, dtype)?;
    let indices = client.alloc_output(&out_shape, DType::I64)?;

    // Per-fold chunk span; mirrors a few vectors of work per lane. Any value
    // yields the same winner.
    let chunk = client.device.caps().largest_sub_group_size() * 4;

    dispatch_ordered_dtype!(dtype, T => {
        unsafe {
            arg_reduce_kernel::<T, O>(
                a_contig.data_ptr() as *const T,
                values.data_ptr() as *mut T,
                indices.data_ptr() as *mut i64,
                geom.dim_size,
                geom.outer_size,
                geom.inner_size,
                chunk,
            );
        }
    }, op_name);

    Ok((values, indices))
}

/// Helper bound: an op usable for every ordered element type
trait OpForAll:
    IndexedReduceOp<f64>
    + IndexedReduceOp<f32>
    + IndexedReduceOp<i64>
    + IndexedReduceOp<i32>
    + IndexedReduceOp<i16>
    + IndexedReduceOp<i8>
    + IndexedReduceOp<u64>
    + IndexedReduceOp<u32>
    + IndexedReduceOp<u16>
    + IndexedReduceOp<u8>
    + MaybeHalfOps
{
}

#[cfg(feature = "f16")]
trait MaybeHalfOps: IndexedReduceOp<half::f16> + IndexedReduceOp<half::bf16> {}
#[cfg(feature = "f16")]
impl<O: IndexedReduceOp<half::f16> + IndexedReduceOp<half::bf16>> MaybeHalfOps for O {}

#[cfg(not(feature = "f16"))]
trait MaybeHalfOps {}
#[cfg(not(feature = "f16"))]
impl<O> MaybeHalfOps for O {}

impl OpForAll for MaxOps {}
impl OpForAll for MinOps {}
