//! Softmax / log-softmax forward kernels
//!
//! Three execution strategies share one numerical policy: subtract the row
//! maximum before exponentiating, keep log-softmax in log space, and
//! normalize plain softmax by a single reciprocal multiply.
//!
//! - [`dispatch_softmax_forward`]: fast register-resident path for the
//!   contiguous axis. Loads the whole row once into per-lane registers
//!   (optionally substituting `-inf` under a boolean mask), reduces max and
//!   exp-sum with the subgroup primitive, writes once. An all-masked row has
//!   a zero exp-sum and produces NaN for plain softmax; defined behavior,
//!   not an error.
//! - [`dispatch_softmax_forward_add`]: fast path fused with
//!   `input + alpha * other` (other may be broadcast), same three phases.
//! - [`softmax_forward_kernel`]: reference streaming path. The row is read
//!   once per pass (max, sum, write) in vector-width chunks; the
//!   element-relative alignment offset of the row start decides which head
//!   and tail elements fall outside `[0, dim_size)` and are excluded from
//!   every pass.
//! - [`spatial_softmax_forward`]: strided-axis path. Each lane owns
//!   `vec_size` columns of the inner dimension and walks the axis with
//!   stride `block_row`; rows combine through the spatial tree fold only
//!   when `block_row > 1`.

use crate::dtype::{AccFloat, FloatElement};
use crate::exec::for_each_group;

use super::group::{group_reduce, group_reduce_all, group_reduce_spatial};
use super::offset::BroadcastOffsets;
use super::plan::{LinearPlan, SpatialPlan};
use super::{element_align_offset, Acc, ConstPtr, KernelIndex, MutPtr};

/// Fast register-resident forward kernel over the contiguous axis
///
/// Preconditions (enforced by the dispatcher): `inner_size == 1`, every
/// offset fits the index type `I`, and one work-group's register capacity
/// (`local_size * outer_loop * vec_size`) covers `dim_size`. When `vec_size
/// > 1`, `dim_size` is a multiple of `vec_size` and both buffers are
/// vector-aligned.
///
/// # Safety
/// - `in_data` points to `outer_size * dim_size` elements
/// - `out_data` points to `outer_size * dim_size` elements
/// - `mask`, when present, pairs a buffer of at least
///   `offsets.get(max_linear)+1` bytes with the offset map of its broadcast
///   onto `[outer_size, dim_size]`
#[allow(clippy::too_many_arguments)]
pub unsafe fn dispatch_softmax_forward<T, I>(
    in_data: *const T,
    out_data: *mut T,
    dim_size: usize,
    outer_size: usize,
    vec_size: usize,
    outer_loop: usize,
    simd: usize,
    log_softmax: bool,
    mask: Option<(*const u8, BroadcastOffsets)>,
    plan: &LinearPlan,
) where
    T: FloatElement,
    I: KernelIndex,
{
    let input = ConstPtr(in_data);
    let output = MutPtr(out_data);
    let mask = mask.map(|(p, c)| (ConstPtr(p), c));
    let local_size = plan.local_size;
    let local_size_row = plan.local_size_row;
    let local_stride = local_size * vec_size;

    for_each_group(plan.global_size_row, |group| {
        // Force whole-struct capture of the Send/Sync pointer wrappers
        // (Rust 2021 would otherwise capture only the raw `.0` field).
        let (input, output) = (input, output);
        let in_data = input.0;
        let out_data = output.0;

        for lid_row in 0..local_size_row {
            let row = group * local_size_row + lid_row;
            if row >= outer_size {
                break;
            }
            let group_offset = I::from_usize(row * dim_size).to_usize();

            // Load the row into per-lane registers and take per-lane maxima.
            let mut regs = vec![T::zero(); local_size * outer_loop * vec_size];
            let mut max_lanes = vec![Acc::<T>::lowest(); local_size];
            for lid_col in 0..local_size {
                let lid_offset = lid_col * vec_size;
                let mut max_value = Acc::<T>::lowest();
                for i in 0..outer_loop {
                    let index = i * local_stride + lid_offset;
                    if index >= dim_size {
                        break;
                    }
                    for j in 0..vec_size {
                        let linear = group_offset + index + j;
                        let mut v = unsafe { *in_data.add(linear) };
                        if let Some((mask_data, offsets)) = &mask {
                            if unsafe { *mask_data.0.add(offsets.get(linear)) } != 0 {
                                v = T::neg_infinity();
                            }
                        }
                        regs[(lid_col * outer_loop + i) * vec_size + j] = v;
                        max_value = max_value.max(v.to_acc());
                    }
                }
                max_lanes[lid_col] = max_value;
            }
            if local_size > 1 {
                group_reduce(&mut max_lanes, simd, Acc::<T>::lowest(), |a, b| a.max(b));
            }

            // Exp-sum pass over the registers.
            let mut sum_lanes = vec![Acc::<T>::zero(); local_size];
            for lid_col in 0..local_size {
                let lid_offset = lid_col * vec_size;
                let max_value = max_lanes[lid_col];
                let mut sum_value = Acc::<T>::zero();
                for i in 0..outer_loop {
                    let index = i * local_stride + lid_offset;
                    if index >= dim_size {
                        break;
                    }
                    for j in 0..vec_size {
                        let v = regs[(lid_col * outer_loop + i) * vec_size + j];
                        sum_value = sum_value + (v.to_acc() - max_value).exp();
                    }
                }
                sum_lanes[lid_col] = sum_value;
            }
            if local_size > 1 {
                group_reduce(&mut sum_lanes, simd, Acc::<T>::zero(), |a, b| a + b);
            }

            // Finalize and write once.
            for lid_col in 0..local_size {
                let lid_offset = lid_col * vec_size;
                let max_value = max_lanes[lid_col];
                let mut sum_value = sum_lanes[lid_col];
                let sum_is_zero = sum_value == Acc::<T>::zero();
                if log_softmax {
                    sum_value = sum_value.ln();
                } else if !sum_is_zero {
                    sum_value = sum_value.recip();
                }
                for i in 0..outer_loop {
                    let index = i * local_stride + lid_offset;
                    if index >= dim_size {
                        break;
                    }
                    for j in 0..vec_size {
                        let v = regs[(lid_col * outer_loop + i) * vec_size + j];
                        let r = if log_softmax {
                            T::from_acc(v.to_acc() - max_value - sum_value)
                        } else if sum_is_zero {
                            T::nan()
                        } else {
                            T::from_acc((v.to_acc() - max_value).exp() * sum_value)
                        };
                        unsafe {
                            *out_data.add(group_offset + index + j) = r;
                        }
                    }
                }
            }
        }
    });
}

/// Fast forward kernel fused with `input + alpha * other`
///
/// Same phase structure and preconditions as [`dispatch_softmax_forward`];
/// the row is formed in registers as `in_data[l] + alpha * other[offsets(l)]`
/// before the max pass, so no intermediate add result is materialized.
///
/// # Safety
/// Same as [`dispatch_softmax_forward`]; `other_data` must cover every
/// offset the map produces for `outer_size * dim_size` linear positions.
#[allow(clippy::too_many_arguments)]
pub unsafe fn dispatch_softmax_forward_add<T, I>(
    in_data: *const T,
    other_data: *const T,
    out_data: *mut T,
    dim_size: usize,
    outer_size: usize,
    alpha: T,
    vec_size: usize,
    outer_loop: usize,
    simd: usize,
    log_softmax: bool,
    other_offsets: &BroadcastOffsets,
    plan: &LinearPlan,
) where
    T: FloatElement,
    I: KernelIndex,
{
    let input = ConstPtr(in_data);
    let other = ConstPtr(other_data);
    let output = MutPtr(out_data);
    let local_size = plan.local_size;
    let local_size_row = plan.local_size_row;
    let local_stride = local_size * vec_size;

    for_each_group(plan.global_size_row, |group| {
        // Force whole-struct capture of the Send/Sync pointer wrappers
        // (Rust 2021 would otherwise capture only the raw `.0` field).
        let (input, other, output) = (input, other, output);
        let in_data = input.0;
        let other_data = other.0;
        let out_data = output.0;

        for lid_row in 0..local_size_row {
            let row = group * local_size_row + lid_row;
            if row >= outer_size {
                break;
            }
            let group_offset = I::from_usize(row * dim_size).to_usize();

            let mut regs = vec![T::zero(); local_size * outer_loop * vec_size];
            let mut max_lanes = vec![Acc::<T>::lowest(); local_size];
            for lid_col in 0..local_size {
                let lid_offset = lid_col * vec_size;
                let mut max_value = Acc::<T>::lowest();
                for i in 0..outer_loop {
                    let index = i * local_stride + lid_offset;
                    if index >= dim_size {
                        break;
                    }
                    for j in 0..vec_size {
                        let linear = group_offset + index + j;
                        let input_value = unsafe { *in_data.add(linear) };
                        let other_value =
                            unsafe { *other_data.add(other_offsets.get(linear)) };
                        let v = input_value + alpha * other_value;
                        regs[(lid_col * outer_loop + i) * vec_size + j] = v;
                        max_value = max_value.max(v.to_acc());
                    }
                }
                max_lanes[lid_col] = max_value;
            }
            if local_size > 1 {
                group_reduce(&mut max_lanes, simd, Acc::<T>::lowest(), |a, b| a.max(b));
            }

            let mut sum_lanes = vec![Acc::<T>::zero(); local_size];
            for lid_col in 0..local_size {
                let lid_offset = lid_col * vec_size;
                let max_value = max_lanes[lid_col];
                let mut sum_value = Acc::<T>::zero();
                for i in 0..outer_loop {
                    let index = i * local_stride + lid_offset;
                    if index >= dim_size {
                        break;
                    }
                    for j in 0..vec_size {
                        let v = regs[(lid_col * outer_loop + i) * vec_size + j];
                        sum_value = sum_value + (v.to_acc() - max_value).exp();
                    }
                }
                sum_lanes[lid_col] = sum_value;
            }
            if local_size > 1 {
                group_reduce(&mut sum_lanes, simd, Acc::<T>::zero(), |a, b| a + b);
            }

            for lid_col in 0..local_size {
                let lid_offset = lid_col * vec_size;
                let max_value = max_lanes[lid_col];
                let mut sum_value = sum_lanes[lid_col];
                if log_softmax {
                    sum_value = sum_value.ln();
                } else {
                    sum_value = sum_value.recip();
                }
                for i in 0..outer_loop {
                    let index = i * local_stride + lid_offset;
                    if index >= dim_size {
                        break;
                    }
                    for j in 0..vec_size {
                        let v = regs[(lid_col * outer_loop + i) * vec_size + j];
                        let r = if log_softmax {
                            T::from_acc(v.to_acc() - max_value - sum_value)
                        } else {
                            T::from_acc((v.to_acc() - max_value).exp() * sum_value)
                        };
                        unsafe {
                            *out_data.add(group_offset + index + j) = r;
                        }
                    }
                }
            }
        }
    });
}

/// Reference streaming forward kernel over the contiguous axis
///
/// One work-group per row; the row is streamed three times in
/// `vec_size`-wide chunks. `local_size` lanes stride across the chunks.
/// When `vec_size > 1` the caller has verified input and output share the
/// same element-relative alignment offset; chunk index 0 and the final
/// chunk take the scalar head/tail branch.
///
/// # Safety
/// `in_data` and `out_data` point to `outer_size * dim_size` elements.
#[allow(clippy::too_many_arguments)]
pub unsafe fn softmax_forward_kernel<T, I>(
    in_data: *const T,
    out_data: *mut T,
    dim_size: usize,
    outer_size: usize,
    vec_size: usize,
    local_size: usize,
    log_softmax: bool,
) where
    T: FloatElement,
    I: KernelIndex,
{
    let input = ConstPtr(in_data);
    let output = MutPtr(out_data);
    let elem_size = std::mem::size_of::<T>();

    for_each_group(outer_size, |group| {
        // Force whole-struct capture of the Send/Sync pointer wrappers
        // (Rust 2021 would otherwise capture only the raw `.0` field).
        let (input, output) = (input, output);
        let in_data = input.0;
        let out_data = output.0;
        let group_offset = I::from_usize(group * dim_size).to_usize();

        let row_addr = unsafe { in_data.add(group_offset) } as u64;
        let start = element_align_offset(row_addr, vec_size, elem_size);
        let loops_end = (dim_size + start + vec_size - 1) / vec_size;

        // Max pass.
        let mut max_lanes = vec![Acc::<T>::lowest(); local_size];
        for (lid, lane_max) in max_lanes.iter_mut().enumerate() {
            let mut max_value = Acc::<T>::lowest();
            let mut i = lid;
            while i < loops_end {
                for j in 0..vec_size {
                    let linear = (i * vec_size + j) as isize - start as isize;
                    if linear >= 0 && (linear as usize) < dim_size {
                        let v = unsafe { *in_data.add(group_offset + linear as usize) };
                        max_value = max_value.max(v.to_acc());
                    }
                }
                i += local_size;
            }
            *lane_max = max_value;
        }
        group_reduce_all(&mut max_lanes, |a, b| a.max(b));
        let max_value = max_lanes[0];

        // Sum pass.
        let mut sum_lanes = vec![Acc::<T>::zero(); local_size];
        for (lid, lane_sum) in sum_lanes.iter_mut().enumerate() {
            let mut sum_value = Acc::<T>::zero();
            let mut i = lid;
            while i < loops_end {
                for j in 0..vec_size {
                    let linear = (i * vec_size + j) as isize - start as isize;
                    if linear >= 0 && (linear as usize) < dim_size {
                        let v = unsafe { *in_data.add(group_offset + linear as usize) };
                        sum_value = sum_value + (v.to_acc() - max_value).exp();
                    }
                }
                i += local_size;
            }
            *lane_sum = sum_value;
        }
        group_reduce_all(&mut sum_lanes, |a, b| a + b);
        let sum_value = if log_softmax {
            sum_lanes[0].ln()
        } else {
            sum_lanes[0].recip()
        };

        // Write pass.
        for lid in 0..local_size {
            let mut i = lid;
            while i < loops_end {
                let remaining = dim_size + start - i * vec_size;
                if (start > 0 && i == 0) || remaining < vec_size {
                    // Head or tail chunk: scalar element-by-element.
                    for j in 0..vec_size {
                        let linear = (i * vec_size + j) as isize - start as isize;
                        if linear >= 0 && (linear as usize) < dim_size {
                            let off = group_offset + linear as usize;
                            let v = unsafe { *in_data.add(off) };
                            let r = if log_softmax {
                                T::from_acc(v.to_acc() - max_value - sum_value)
                            } else {
                                T::from_acc((v.to_acc() - max_value).exp() * sum_value)
                            };
                            unsafe {
                                *out_data.add(off) = r;
                            }
                        }
                    }
                } else {
                    // Whole chunk in range: vectorized load/store.
                    let base = i * vec_size - start;
                    for j in 0..vec_size {
                        let off = group_offset + base + j;
                        let v = unsafe { *in_data.add(off) };
                        let r = if log_softmax {
                            T::from_acc(v.to_acc() - max_value - sum_value)
                        } else {
                            T::from_acc((v.to_acc() - max_value).exp() * sum_value)
                        };
                        unsafe {
                            *out_data.add(off) = r;
                        }
                    }
                }
                i += local_size;
            }
        }
    });
}

/// Strided-axis (spatial) forward kernel
///
/// Launch space is `outer_size x block_row x (group_num * local_size)`.
/// Each lane accumulates a `vec_size`-wide max and exp-sum over the rows it
/// owns; the spatial tree fold combines rows when `block_row > 1`.
///
/// # Safety
/// `in_data` and `out_data` point to `outer_size * dim_size * inner_size`
/// elements. When `vec_size > 1`, `inner_size` is a multiple of `vec_size`.
#[allow(clippy::too_many_arguments)]
pub unsafe fn spatial_softmax_forward<T, I>(
    in_data: *const T,
    out_data: *mut T,
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
    let input = ConstPtr(in_data);
    let output = MutPtr(out_data);
    let local_size = plan.local_size;
    let block_row = plan.block_row;
    let group_num = plan.group_num;
    let row_stride = local_size * vec_size;

    for_each_group(outer_size * group_num, |g| {
        // Force whole-struct capture of the Send/Sync pointer wrappers
        // (Rust 2021 would otherwise capture only the raw `.0` field).
        let (input, output) = (input, output);
        let in_data = input.0;
        let out_data = output.0;
        let outer = g / group_num;
        let inner_group = g % group_num;
        let group_offset = I::from_usize(outer * dim_size * inner_size).to_usize();
        let lane_col = |lc: usize| inner_group * local_size + lc;

        // Per-lane running max over the rows each lane owns.
        let mut maxs = vec![Acc::<T>::lowest(); block_row * row_stride];
        for lr in 0..block_row {
            for lc in 0..local_size {
                let col = lane_col(lc) * vec_size;
                if col >= inner_size {
                    continue;
                }
                let slot = lr * row_stride + lc * vec_size;
                let offset = lr * inner_size + col;
                for j in 0..vec_size {
                    maxs[slot + j] =
                        unsafe { *in_data.add(group_offset + offset + j) }.to_acc();
                }
                let mut i = lr + block_row;
                while i < dim_size {
                    let offset = i * inner_size + col;
                    for j in 0..vec_size {
                        let v = unsafe { *in_data.add(group_offset + offset + j) };
                        maxs[slot + j] = maxs[slot + j].max(v.to_acc());
                    }
                    i += block_row;
                }
            }
        }
        if block_row > 1 {
            group_reduce_spatial(&mut maxs, block_row, local_size, vec_size, |a, b| {
                a.max(b)
            });
        }

        // Per-lane exp-sum against the column maxima (row 0 after the fold).
        let mut sums = vec![Acc::<T>::zero(); block_row * row_stride];
        for lr in 0..block_row {
            for lc in 0..local_size {
                let col = lane_col(lc) * vec_size;
                if col >= inner_size {
                    continue;
                }
                let slot = lr * row_stride + lc * vec_size;
                let offset = lr * inner_size + col;
                for j in 0..vec_size {
                    let v = unsafe { *in_data.add(group_offset + offset + j) };
                    sums[slot + j] = (v.to_acc() - maxs[lc * vec_size + j]).exp();
                }
                let mut i = lr + block_row;
                while i < dim_size {
                    let offset = i * inner_size + col;
                    for j in 0..vec_size {
                        let v = unsafe { *in_data.add(group_offset + offset + j) };
                        sums[slot + j] =
                            sums[slot + j] + (v.to_acc() - maxs[lc * vec_size + j]).exp();
                    }
                    i += block_row;
                }
            }
        }
        if block_row > 1 {
            group_reduce_spatial(&mut sums, block_row, local_size, vec_size, |a, b| a + b);
        }

        // Finalize per column, then write every row a lane owns.
        for lr in 0..block_row {
            for lc in 0..local_size {
                let col = lane_col(lc) * vec_size;
                if col >= inner_size {
                    continue;
                }
                for j in 0..vec_size {
                    let max_value = maxs[lc * vec_size + j];
                    let sum_value = if log_softmax {
                        sums[lc * vec_size + j].ln()
                    } else {
                        sums[lc * vec_size + j].recip()
                    };
                    let mut i = lr;
                    while i < dim_size {
                        let off = group_offset + i * inner_size + col + j;
                        let v = unsafe { *in_data.add(off) };
                        let r = if log_softmax {
                            T::from_acc(v.to_acc() - max_value - sum_value)
                        } else {
                            T::from_acc((v.to_acc() - max_value).exp() * sum_value)
                        };
                        unsafe {
                            *out_data.add(off) = r;
                        }
                        i += block_row;
                    }
                }
            }
        }
    });
}
