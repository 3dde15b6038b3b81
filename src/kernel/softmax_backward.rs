//! Softmax / log-softmax backward kernels
//!
//! Given the saved forward output `y` and incoming gradient `g` along the
//! axis, the gradient of the input is
//!
//! - log-softmax: `g - exp(y) * sum(g)`
//! - softmax:     `y * (g - sum(y * g))`
//!
//! where the row sum is the only cooperative step. The strategy split
//! mirrors the forward family: a register-resident fast path for the
//! contiguous axis, a streaming reference path, and a spatial path for a
//! strided axis. The masked fast path zeroes the saved output at masked
//! positions before the sum, which excludes those positions from the
//! gradient's cross term.

use crate::dtype::{AccFloat, FloatElement};
use crate::exec::for_each_group;

use super::group::{group_reduce, group_reduce_all, group_reduce_spatial};
use super::offset::BroadcastOffsets;
use super::plan::{LinearPlan, SpatialPlan};
use super::{element_align_offset, Acc, ConstPtr, KernelIndex, MutPtr};

/// Fast register-resident backward kernel over the contiguous axis
///
/// Loads `num` vectors of both the saved output and the incoming gradient
/// per lane, computes the row sum with the subgroup primitive, and writes
/// the gradient once. Preconditions match the forward fast path.
///
/// # Safety
/// - `grad_input`, `output`, `grad_output` point to
///   `outer_size * dim_size` elements
/// - `mask`, when present, pairs a byte buffer with the offset map of its
///   broadcast onto `[outer_size, dim_size]`
#[allow(clippy::too_many_arguments)]
pub unsafe fn dispatch_softmax_backward<T, I>(
    grad_input: *mut T,
    output: *const T,
    grad_output: *const T,
    dim_size: usize,
    outer_size: usize,
    vec_size: usize,
    num: usize,
    simd: usize,
    log_softmax: bool,
    mask: Option<(*const u8, BroadcastOffsets)>,
    plan: &LinearPlan,
) where
    T: FloatElement,
    I: KernelIndex,
{
    let gradin = MutPtr(grad_input);
    let out = ConstPtr(output);
    let gradout = ConstPtr(grad_output);
    let mask = mask.map(|(p, c)| (ConstPtr(p), c));
    let local_size = plan.local_size;
    let local_size_row = plan.local_size_row;

    for_each_group(plan.global_size_row, |group| {
        // Force whole-struct capture of the Send/Sync pointer wrappers
        // (Rust 2021 would otherwise capture only the raw `.0` field).
        let (gradin, out, gradout) = (gradin, out, gradout);
        let grad_input = gradin.0;
        let output = out.0;
        let grad_output = gradout.0;

        for lid_row in 0..local_size_row {
            let row = group * local_size_row + lid_row;
            if row >= outer_size {
                break;
            }
            let group_offset = I::from_usize(row * dim_size).to_usize();

            // Load both operands and take per-lane partial sums.
            let mut reg_out = vec![T::zero(); local_size * num * vec_size];
            let mut reg_gradout = vec![T::zero(); local_size * num * vec_size];
            let mut sum_lanes = vec![Acc::<T>::zero(); local_size];
            for lid_col in 0..local_size {
                let mut sum_value = Acc::<T>::zero();
                for i in 0..num {
                    let index = (lid_col + i * local_size) * vec_size;
                    if index >= dim_size {
                        break;
                    }
                    for j in 0..vec_size {
                        let linear = group_offset + index + j;
                        let mut y = unsafe { *output.add(linear) };
                        let g = unsafe { *grad_output.add(linear) };
                        if let Some((mask_data, offsets)) = &mask {
                            if unsafe { *mask_data.0.add(offsets.get(linear)) } != 0 {
                                y = T::zero();
                            }
                        }
                        let slot = (lid_col * num + i) * vec_size + j;
                        reg_out[slot] = y;
                        reg_gradout[slot] = g;
                        if log_softmax {
                            sum_value = sum_value + g.to_acc();
                        } else {
                            sum_value = sum_value + y.to_acc() * g.to_acc();
                        }
                    }
                }
                sum_lanes[lid_col] = sum_value;
            }
            if local_size > 1 {
                group_reduce(&mut sum_lanes, simd, Acc::<T>::zero(), |a, b| a + b);
            }

            // Write the gradient.
            for lid_col in 0..local_size {
                let sum_value = sum_lanes[lid_col];
                for i in 0..num {
                    let index = (lid_col + i * local_size) * vec_size;
                    if index >= dim_size {
                        break;
                    }
                    for j in 0..vec_size {
                        let slot = (lid_col * num + i) * vec_size + j;
                        let y = reg_out[slot];
                        let g = reg_gradout[slot];
                        let r = if log_softmax {
                            T::from_acc(g.to_acc() - y.to_acc().exp() * sum_value)
                        } else {
                            T::from_acc(y.to_acc() * (g.to_acc() - sum_value))
                        };
                        unsafe {
                            *grad_input.add(group_offset + index + j) = r;
                        }
                    }
                }
            }
        }
    });
}

/// Reference streaming backward kernel over the contiguous axis
///
/// One work-group per row, two streamed passes (sum, write). All three
/// buffers share one element-relative alignment offset when `vec_size > 1`
/// (the dispatcher degrades to `vec_size == 1` otherwise); head and tail
/// chunks take the scalar branch.
///
/// # Safety
/// `grad_input`, `output`, `grad_output` point to `outer_size * dim_size`
/// elements.
#[allow(clippy::too_many_arguments)]
pub unsafe fn softmax_backward_kernel<T, I>(
    grad_input: *mut T,
    output: *const T,
    grad_output: *const T,
    dim_size: usize,
    outer_size: usize,
    vec_size: usize,
    local_size: usize,
    log_softmax: bool,
) where
    T: FloatElement,
    I: KernelIndex,
{
    let gradin = MutPtr(grad_input);
    let out = ConstPtr(output);
    let gradout = ConstPtr(grad_output);
    let elem_size = std::mem::size_of::<T>();

    for_each_group(outer_size, |group| {
        // Force whole-struct capture of the Send/Sync pointer wrappers
        // (Rust 2021 would otherwise capture only the raw `.0` field).
        let (gradin, out, gradout) = (gradin, out, gradout);
        let grad_input = gradin.0;
        let output = out.0;
        let grad_output = gradout.0;
        let group_offset = I::from_usize(group * dim_size).to_usize();

        let row_addr = unsafe { output.add(group_offset) } as u64;
        let start = element_align_offset(row_addr, vec_size, elem_size);
        let loops_end = (dim_size + start + vec_size - 1) / vec_size;

        // Row sum of g (log) or y*g (plain).
        let mut sum_lanes = vec![Acc::<T>::zero(); local_size];
        for (lid, lane_sum) in sum_lanes.iter_mut().enumerate() {
            let mut sum_value = Acc::<T>::zero();
            let mut i = lid;
            while i < loops_end {
                for j in 0..vec_size {
                    let linear = (i * vec_size + j) as isize - start as isize;
                    if linear >= 0 && (linear as usize) < dim_size {
                        let off = group_offset + linear as usize;
                        let g = unsafe { *grad_output.add(off) };
                        if log_softmax {
                            sum_value = sum_value + g.to_acc();
                        } else {
                            let y = unsafe { *output.add(off) };
                            sum_value = sum_value + y.to_acc() * g.to_acc();
                        }
                    }
                }
                i += local_size;
            }
            *lane_sum = sum_value;
        }
        group_reduce_all(&mut sum_lanes, |a, b| a + b);
        let sum_value = sum_lanes[0];

        // Write pass with scalar head/tail handling.
        for lid in 0..local_size {
            let mut i = lid;
            while i < loops_end {
                let remaining = dim_size + start - i * vec_size;
                if (start > 0 && i == 0) || remaining < vec_size {
                    for j in 0..vec_size {
                        let linear = (i * vec_size + j) as isize - start as isize;
                        if linear >= 0 && (linear as usize) < dim_size {
                            let off = group_offset + linear as usize;
                            let y = unsafe { *output.add(off) };
                            let g = unsafe { *grad_output.add(off) };
                            let r = if log_softmax {
                                T::from_acc(g.to_acc() - y.to_acc().exp() * sum_value)
                            } else {
                                T::from_acc(y.to_acc() * (g.to_acc() - sum_value))
                            };
                            unsafe {
                                *grad_input.add(off) = r;
                            }
                        }
                    }
                } else {
                    let base = i * vec_size - start;
                    for j in 0..vec_size {
                        let off = group_offset + base + j;
                        let y = unsafe { *output.add(off) };
                        let g = unsafe { *grad_output.add(off) };
                        let r = if log_softmax {
                            T::from_acc(g.to_acc() - y.to_acc().exp() * sum_value)
                        } else {
                            T::from_acc(y.to_acc() * (g.to_acc() - sum_value))
                        };
                        unsafe {
                            *grad_input.add(off) = r;
                        }
                    }
                }
                i += local_size;
            }
        }
    });
}

/// Strided-axis (spatial) backward kernel
///
/// Each lane owns `vec_size` columns, accumulates the per-column row sum
/// over its rows, combines through the spatial tree fold when
/// `block_row > 1`, and writes the gradient for its rows.
///
/// # Safety
/// `grad_input`, `output`, `grad_output` point to
/// `outer_size * dim_size * inner_size` elements. When `vec_size > 1`,
/// `inner_size` is a multiple of `vec_size`.
#[allow(clippy::too_many_arguments)]
pub unsafe fn spatial_softmax_backward<T, I>(
    grad_input: *mut T,
    output: *const T,
    grad_output: *const T,
    dim_size: usize,
    inner_size: usize,
    outer_size: usize,
    vec_size: usize,
    plan: &SpatialPlan,
    log_softmax: bool,
) where
    T: FloatElement,
    I: KernelIndex,
{
    let gradin = MutPtr(grad_input);
    let out = ConstPtr(output);
    let gradout = ConstPtr(grad_output);
    let local_size = plan.local_size;
    let block_row = plan.block_row;
    let group_num = plan.group_num;
    let row_stride = local_size * vec_size;

    for_each_group(outer_size * group_num, |g| {
        // Force whole-struct capture of the Send/Sync pointer wrappers
        // (Rust 2021 would otherwise capture only the raw `.0` field).
        let (gradin, out, gradout) = (gradin, out, gradout);
        let grad_input = gradin.0;
        let output = out.0;
        let grad_output = gradout.0;
        let outer = g / group_num;
        let inner_group = g % group_num;
        let group_offset = I::from_usize(outer * dim_size * inner_size).to_usize();

        // Per-lane partial row sums per column.
        let mut sums = vec![Acc::<T>::zero(); block_row * row_stride];
        for lr in 0..block_row {
            for lc in 0..local_size {
                let col = (inner_group * local_size + lc) * vec_size;
                if col >= inner_size {
                    continue;
                }
                let slot = lr * row_stride + lc * vec_size;
                let mut i = lr;
                while i < dim_size {
                    let offset = i * inner_size + col;
                    for j in 0..vec_size {
                        let goff = group_offset + offset + j;
                        let gv = unsafe { *grad_output.add(goff) };
                        if log_softmax {
                            sums[slot + j] = sums[slot + j] + gv.to_acc();
                        } else {
                            let yv = unsafe { *output.add(goff) };
                            sums[slot + j] = sums[slot + j] + gv.to_acc() * yv.to_acc();
                        }
                    }
                    i += block_row;
                }
            }
        }
        if block_row > 1 {
            group_reduce_spatial(&mut sums, block_row, local_size, vec_size, |a, b| a + b);
        }

        // Write the gradient for every row a lane owns.
        for lr in 0..block_row {
            for lc in 0..local_size {
                let col = (inner_group * local_size + lc) * vec_size;
                if col >= inner_size {
                    continue;
                }
                for j in 0..vec_size {
                    let sum_value = sums[lc * vec_size + j];
                    let mut i = lr;
                    while i < dim_size {
                        let off = group_offset + i * inner_size + col + j;
                        let y = unsafe { *output.add(off) };
                        let g = unsafe { *grad_output.add(off) };
                        let r = if log_softmax {
                            T::from_acc(g.to_acc() - y.to_acc().exp() * sum_value)
                        } else {
                            T::from_acc(y.to_acc() * (g.to_acc() - sum_value))
                        };
                        unsafe {
                            *grad_input.add(off) = r;
                        }
                        i += block_row;
                    }
                }
            }
        }
    });
}
