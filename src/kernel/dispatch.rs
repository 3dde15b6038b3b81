//! Strategy selection for the softmax kernel family
//!
//! Pure decision logic. Inputs: axis contiguity (`inner_size`), row length
//! versus the device's register budget, element-relative alignment of every
//! operand buffer, whether the tensors fit 32-bit index math, and the
//! device's native subgroup widths. The policy never rejects an operation:
//! when the aligned/fast conditions fail it degrades the vector width to 1
//! and/or doubles the unroll factor, trading speed, never correctness.

use crate::exec::DeviceCaps;

use super::element_align_offset;
use super::plan::{SIMD16, SIMD32};

/// Vector register width in bytes (a `float4`)
pub const VEC_BYTES: usize = 16;

/// Largest vector width for an element size: how many elements fill one
/// 16-byte vector register
#[inline]
pub const fn max_vec_size(elem_size: usize) -> usize {
    VEC_BYTES / elem_size
}

/// Reduction-axis geometry: `outer_size x dim_size x inner_size`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AxisGeometry {
    /// Product of dimensions before the axis
    pub outer_size: usize,
    /// Length of the reduction axis
    pub dim_size: usize,
    /// Product of dimensions after the axis (the axis stride)
    pub inner_size: usize,
}

impl AxisGeometry {
    /// Decompose a shape around the reduction axis
    pub fn from_shape(shape: &[usize], dim: usize) -> Self {
        Self {
            outer_size: shape[..dim].iter().product::<usize>().max(1),
            dim_size: shape[dim],
            inner_size: shape[dim + 1..].iter().product::<usize>().max(1),
        }
    }
}

/// In-kernel index width, chosen by tensor size only
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IndexWidth {
    /// 32-bit offsets
    U32,
    /// 64-bit offsets
    U64,
}

impl IndexWidth {
    fn for_fit(can_use_32bit: bool) -> Self {
        if can_use_32bit {
            Self::U32
        } else {
            Self::U64
        }
    }
}

/// Selected forward execution strategy
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ForwardStrategy {
    /// Register-resident fast path (32-bit indexed by precondition)
    Fast {
        /// Subgroup width
        simd: usize,
        /// Elements per vector access
        vec_size: usize,
        /// Vectors per lane
        outer_loop: usize,
    },
    /// Streaming reference path
    Reference {
        /// Elements per vector access
        vec_size: usize,
        /// Offset arithmetic width
        index: IndexWidth,
    },
    /// Strided-axis path
    Spatial {
        /// Elements per vector access
        vec_size: usize,
        /// Offset arithmetic width
        index: IndexWidth,
    },
}

/// Selected backward execution strategy
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BackwardStrategy {
    /// Register-resident fast path (32-bit indexed by precondition)
    Fast {
        /// Subgroup width
        simd: usize,
        /// Elements per vector access
        vec_size: usize,
        /// Vectors (of output + gradient each) per lane
        num: usize,
    },
    /// Streaming reference path
    Reference {
        /// Elements per vector access
        vec_size: usize,
        /// Offset arithmetic width
        index: IndexWidth,
    },
    /// Strided-axis path
    Spatial {
        /// Elements per vector access
        vec_size: usize,
        /// Offset arithmetic width
        index: IndexWidth,
    },
}

/// Pick the subgroup width for a row length
///
/// Prefers 32-wide subgroups; short rows (below `16 * inner_loop` elements)
/// drop to 16-wide, which uses fewer registers and occupies better, with the
/// caller doubling the unroll factor to compensate.
fn select_simd(caps: &DeviceCaps, dim_size: usize, inner_loop: usize) -> usize {
    let mut simd = caps.largest_sub_group_size();
    if simd == SIMD32 && dim_size < SIMD16 * inner_loop && caps.supports_sub_group(SIMD16) {
        simd = SIMD16;
    }
    simd
}

/// Choose the forward strategy
///
/// `input_addr`/`output_addr` are the operand base addresses used for the
/// element-relative alignment offsets; `can_use_32bit` must hold for every
/// operand.
pub fn choose_forward_strategy(
    geom: AxisGeometry,
    elem_size: usize,
    input_addr: u64,
    output_addr: u64,
    can_use_32bit: bool,
    caps: &DeviceCaps,
) -> ForwardStrategy {
    let max_vec = max_vec_size(elem_size);
    let inner_loop = max_vec * 2;
    let input_start = element_align_offset(input_addr, max_vec, elem_size);
    let output_start = element_align_offset(output_addr, max_vec, elem_size);

    if geom.inner_size == 1 {
        if can_use_32bit && caps.max_work_group_size * inner_loop >= geom.dim_size {
            let simd = select_simd(caps, geom.dim_size, inner_loop);
            let aligned =
                input_start == 0 && output_start == 0 && geom.dim_size % max_vec == 0;
            if simd == SIMD32 {
                if aligned {
                    ForwardStrategy::Fast {
                        simd,
                        vec_size: max_vec,
                        outer_loop: inner_loop / max_vec,
                    }
                } else {
                    ForwardStrategy::Fast {
                        simd,
                        vec_size: 1,
                        outer_loop: inner_loop,
                    }
                }
            } else if aligned {
                if max_vec >= 4 && geom.dim_size <= 4 * simd {
                    // Short rows: a smaller vector with a single unroll beats
                    // idle lanes.
                    ForwardStrategy::Fast {
                        simd,
                        vec_size: 4,
                        outer_loop: 1,
                    }
                } else if geom.dim_size <= max_vec * simd {
                    ForwardStrategy::Fast {
                        simd,
                        vec_size: max_vec,
                        outer_loop: 1,
                    }
                } else {
                    // 16-wide subgroups free registers; unroll doubles to
                    // keep the row resident.
                    ForwardStrategy::Fast {
                        simd,
                        vec_size: max_vec,
                        outer_loop: inner_loop / max_vec * 2,
                    }
                }
            } else {
                ForwardStrategy::Fast {
                    simd,
                    vec_size: 1,
                    outer_loop: inner_loop * 2,
                }
            }
        } else {
            // The streaming kernel handles misaligned heads and tails itself;
            // it only needs both buffers to share one alignment phase.
            let vec_size = if input_start == output_start { max_vec } else { 1 };
            ForwardStrategy::Reference {
                vec_size,
                index: IndexWidth::for_fit(can_use_32bit),
            }
        }
    } else {
        let vec_size = if input_start == output_start && geom.inner_size % max_vec == 0 {
            max_vec
        } else {
            1
        };
        ForwardStrategy::Spatial {
            vec_size,
            index: IndexWidth::for_fit(can_use_32bit),
        }
    }
}

/// Choose the backward strategy
///
/// Mirrors the forward policy with a halved register budget (`inner_loop =
/// max_vec`), since the backward kernel keeps two operands resident.
pub fn choose_backward_strategy(
    geom: AxisGeometry,
    elem_size: usize,
    gradin_addr: u64,
    output_addr: u64,
    gradout_addr: u64,
    can_use_32bit: bool,
    caps: &DeviceCaps,
) -> BackwardStrategy {
    let max_vec = max_vec_size(elem_size);
    let inner_loop = max_vec;
    let gradin_start = element_align_offset(gradin_addr, max_vec, elem_size);
    let output_start = element_align_offset(output_addr, max_vec, elem_size);
    let gradout_start = element_align_offset(gradout_addr, max_vec, elem_size);

    if geom.inner_size == 1 {
        if can_use_32bit && caps.max_work_group_size * inner_loop >= geom.dim_size {
            let simd = select_simd(caps, geom.dim_size, max_vec);
            let aligned = gradin_start == 0
                && output_start == 0
                && gradout_start == 0
                && geom.dim_size % max_vec == 0;
            let vec_size = if aligned { max_vec } else { 1 };
            BackwardStrategy::Fast {
                simd,
                vec_size,
                num: inner_loop / vec_size * (SIMD32 / simd),
            }
        } else {
            let vec_size = if gradin_start == output_start && gradin_start == gradout_start {
                max_vec
            } else {
                1
            };
            BackwardStrategy::Reference {
                vec_size,
                index: IndexWidth::for_fit(can_use_32bit),
            }
        }
    } else {
        let vec_size = if gradin_start == output_start
            && gradin_start == gradout_start
            && geom.inner_size % max_vec == 0
        {
            max_vec
        } else {
            1
        };
        BackwardStrategy::Spatial {
            vec_size,
            index: IndexWidth::for_fit(can_use_32bit),
        }
    }
}

/// Work-group size for the streaming reference kernels
#[inline]
pub fn reference_local_size(dim_size: usize, vec_size: usize, caps: &DeviceCaps) -> usize {
    dim_size
        .div_ceil(vec_size)
        .clamp(1, caps.max_work_group_size)
}
