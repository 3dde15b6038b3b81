//! Per-axis argmin/argmax kernel
//!
//! The generic entry point folds every `(outer, inner)` coordinate's slice
//! along the reduction axis with an [`IndexedReduceOp`]. The axis is walked
//! in fixed-size chunks: each chunk folds locally with chunk-relative
//! indices, is translated to the chunk's base offset, and is combined into
//! the running accumulator, the same partial-combine shape a parallel tree
//! would produce, so chunking never changes the winner.

use crate::dtype::Element;
use crate::exec::for_each_group;

use super::compare::IndexedReduceOp;
use super::{ConstPtr, MutPtr};

/// Argmin/argmax over one axis, writing both extremum and index
///
/// `chunk` is the per-fold span along the axis (the iterator machinery's
/// per-thread item count); any positive value yields identical results.
///
/// # Safety
/// - `in_data` points to `outer_size * dim_size * inner_size` elements
/// - `values_out` and `indices_out` point to `outer_size * inner_size`
///   elements each
pub unsafe fn arg_reduce_kernel<T, O>(
    in_data: *const T,
    values_out: *mut T,
    indices_out: *mut i64,
    dim_size: usize,
    outer_size: usize,
    inner_size: usize,
    chunk: usize,
) where
    T: Element,
    O: IndexedReduceOp<T>,
{
    debug_assert!(chunk > 0);
    let input = ConstPtr(in_data);
    let values = MutPtr(values_out);
    let indices = MutPtr(indices_out);

    for_each_group(outer_size * inner_size, |coord| {
        // Force whole-struct capture of the Send/Sync pointer wrappers
        // (Rust 2021 would otherwise capture only the raw `.0` field).
        let (input, values, indices) = (input, values, indices);
        let in_data = input.0;
        let outer = coord / inner_size;
        let inner = coord % inner_size;
        let base = outer * dim_size * inner_size + inner;

        let mut acc = O::identity();
        let mut chunk_start = 0;
        while chunk_start < dim_size {
            let len = chunk.min(dim_size - chunk_start);
            let mut local = O::identity();
            for k in 0..len {
                let v = unsafe { *in_data.add(base + (chunk_start + k) * inner_size) };
                local = O::reduce(local, v, k as i64);
            }
            acc = O::combine(acc, O::translate_idx(local, chunk_start as i64));
            chunk_start += len;
        }

        unsafe {
            *values.0.add(coord) = acc.value;
            *indices.0.add(coord) = acc.index;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::compare::{MaxOps, MinOps};

    fn run<O: IndexedReduceOp<f32>>(
        data: &[f32],
        dim: usize,
        outer: usize,
        inner: usize,
        chunk: usize,
    ) -> (Vec<f32>, Vec<i64>) {
        let mut values = vec![0.0f32; outer * inner];
        let mut indices = vec![0i64; outer * inner];
        unsafe {
            arg_reduce_kernel::<f32, O>(
                data.as_ptr(),
                values.as_mut_ptr(),
                indices.as_mut_ptr(),
                dim,
                outer,
                inner,
                chunk,
            );
        }
        (values, indices)
    }

    #[test]
    fn test_chunk_size_invariance() {
        let data: Vec<f32> = (0..64).map(|i| ((i * 23) % 19) as f32).collect();
        let baseline = run::<MaxOps>(&data, 64, 1, 1, 64);
        for chunk in [1, 2, 3, 7, 16, 63, 200] {
            assert_eq!(run::<MaxOps>(&data, 64, 1, 1, chunk), baseline);
        }
    }

    #[test]
    fn test_strided_axis() {
        // [2, 3, 2]: reduce the middle axis (inner_size = 2)
        let data = [
            1.0f32, 9.0, //
            5.0, 2.0, //
            5.0, 7.0, //
            0.0, 0.0, //
            -1.0, 4.0, //
            3.0, 4.0,
        ];
        let (values, indices) = run::<MaxOps>(&data, 3, 2, 2, 4);
        assert_eq!(values, vec![5.0, 9.0, 3.0, 4.0]);
        assert_eq!(indices, vec![1, 0, 2, 1]);
        let (values, indices) = run::<MinOps>(&data, 3, 2, 2, 4);
        assert_eq!(values, vec![1.0, 2.0, -1.0, 0.0]);
        assert_eq!(indices, vec![0, 1, 1, 0]);
    }

    #[test]
    fn test_nan_poisons_with_lowest_index() {
        let data = [2.0f32, f32::NAN, 8.0, f32::NAN];
        let (values, indices) = run::<MaxOps>(&data, 4, 1, 1, 2);
        assert!(values[0].is_nan());
        assert_eq!(indices[0], 1);
    }
}
