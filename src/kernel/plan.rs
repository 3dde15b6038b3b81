//! Work partitioning: turning axis geometry into an execution shape
//!
//! Two planners cover the two axis layouts. Both are pure functions of
//! `(dim_size, outer_size, inner_size, caps)`: deterministic, stateless,
//! recomputed per launch.

use crate::exec::DeviceCaps;

/// 32-wide subgroup
pub const SIMD32: usize = 32;
/// 16-wide subgroup
pub const SIMD16: usize = 16;

/// Group-count floor for row coalescing
///
/// When `outer_size` is huge and each group is small, rows are folded
/// together (two rows per group, half the groups) until the launch would
/// drop below this many groups.
pub const MIN_GROUP_NUM: usize = 32768;

/// Execution shape for the register-resident path over the contiguous axis
///
/// A work-group holds `local_size_row * local_size` lanes: `local_size`
/// lanes cooperate on one row, `local_size_row` rows share the group. The
/// launch covers `global_size_row` groups.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LinearPlan {
    /// Subgroups per row (`local_size / simd`)
    pub sub_group_num: usize,
    /// Lanes cooperating on one row; 1 when a single lane holds a whole row
    pub local_size: usize,
    /// Rows per work-group
    pub local_size_row: usize,
    /// Number of work-groups
    pub global_size_row: usize,
}

impl LinearPlan {
    /// Total lanes in one work-group
    #[inline]
    pub fn group_lanes(&self) -> usize {
        self.local_size_row * self.local_size
    }
}

/// Compute the register-resident plan
///
/// `unroll` is the per-lane register budget in vectors (the inner-loop
/// count); each lane owns `unroll * vec_size` elements of the row.
///
/// - `local_size` is the smallest multiple of `simd` covering
///   `dim_size / (unroll * vec_size)`, capped by the work-group limit.
/// - If one lane covers the whole row, the group instead stacks `simd` rows
///   (one lane each) and groups shrink to `ceil(outer / simd)`.
/// - If `outer_size` is large while groups are small, rows-per-group doubles
///   (and group count halves) until the [`MIN_GROUP_NUM`] floor, the group
///   size cap, or an odd group count stops it.
pub fn linear_plan(
    dim_size: usize,
    outer_size: usize,
    simd: usize,
    vec_size: usize,
    unroll: usize,
    caps: &DeviceCaps,
) -> LinearPlan {
    let max_group_size = caps.max_work_group_size;

    let local_size = dim_size.div_ceil(unroll * vec_size).clamp(1, max_group_size);
    let sub_group_num = local_size.div_ceil(simd);
    let local_size = sub_group_num * simd;

    // One lane covers the whole row: coalesce simd rows into each group.
    if dim_size <= vec_size * unroll {
        return LinearPlan {
            sub_group_num,
            local_size: 1,
            local_size_row: simd,
            global_size_row: outer_size.div_ceil(simd),
        };
    }

    let mut local_size_row = 1;
    let mut global_size_row = outer_size;
    while (global_size_row >> 1) > MIN_GROUP_NUM
        && (local_size_row << 1) * local_size <= max_group_size
        && global_size_row % 2 == 0
    {
        global_size_row >>= 1;
        local_size_row <<= 1;
    }

    LinearPlan {
        sub_group_num,
        local_size,
        local_size_row,
        global_size_row,
    }
}

/// Execution shape for the strided-axis (spatial) path
///
/// The group is a `block_row x local_size` tile: `local_size` lanes each own
/// `vec_size` columns of the inner dimension, `block_row` rows of the
/// reduction axis run cooperatively. `group_num` groups tile the inner
/// dimension; the full launch is `outer_size x block_row x
/// (group_num * local_size)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SpatialPlan {
    /// Lanes per group along the inner dimension
    pub local_size: usize,
    /// Rows of the reduction axis processed cooperatively per group
    pub block_row: usize,
    /// Groups along the inner dimension
    pub group_num: usize,
}

/// Compute the spatial plan
///
/// The column width is kept small (at most [`SIMD32`] lanes) so tail groups
/// waste little; `block_row` then grows to saturate the device's total
/// execution resources, never exceeding `dim_size`.
pub fn spatial_plan(
    dim_size: usize,
    outer_size: usize,
    inner_size: usize,
    vec_size: usize,
    caps: &DeviceCaps,
) -> SpatialPlan {
    let max_group_size = caps.max_work_group_size;
    let total_resource = caps.max_work_items;

    let local_size = inner_size.div_ceil(vec_size).clamp(1, SIMD32);
    let local_group_num = inner_size.div_ceil(local_size);

    let mut block_row = 1usize;
    while outer_size * block_row * local_group_num * local_size < total_resource * vec_size {
        block_row <<= 1;
        if block_row * SIMD32 == max_group_size {
            break;
        }
    }
    let block_row = block_row.min(dim_size).max(1);

    SpatialPlan {
        local_size,
        block_row,
        group_num: inner_size.div_ceil(local_size * vec_size),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> DeviceCaps {
        DeviceCaps::emulated()
    }

    #[test]
    fn test_linear_plan_covers_dim() {
        let plan = linear_plan(4096, 8, SIMD32, 4, 4, &caps());
        // Enough lanes that unroll*vec*local_size >= dim_size
        assert!(plan.local_size * 4 * 4 >= 4096);
        assert_eq!(plan.local_size % SIMD32, 0);
        assert_eq!(plan.sub_group_num, plan.local_size / SIMD32);
        assert_eq!(plan.local_size_row, 1);
        assert_eq!(plan.global_size_row, 8);
    }

    #[test]
    fn test_linear_plan_single_lane_rows() {
        // dim fits in one lane's registers: simd rows per group
        let plan = linear_plan(8, 1000, SIMD16, 4, 4, &caps());
        assert_eq!(plan.local_size, 1);
        assert_eq!(plan.local_size_row, SIMD16);
        assert_eq!(plan.global_size_row, 1000usize.div_ceil(SIMD16));
    }

    #[test]
    fn test_linear_plan_row_coalescing_floor() {
        // Large outer with a small row: group count halves but never below
        // the floor, and the group stays within the device cap.
        let outer = 1 << 20;
        let plan = linear_plan(256, outer, SIMD32, 4, 4, &caps());
        assert!(plan.global_size_row > MIN_GROUP_NUM);
        assert!(plan.group_lanes() <= caps().max_work_group_size);
        assert_eq!(plan.global_size_row * plan.local_size_row, outer);
    }

    #[test]
    fn test_linear_plan_deterministic() {
        let a = linear_plan(777, 33, SIMD32, 2, 8, &caps());
        let b = linear_plan(777, 33, SIMD32, 2, 8, &caps());
        assert_eq!(a, b);
    }

    #[test]
    fn test_spatial_plan_rows_bounded_by_dim() {
        let plan = spatial_plan(3, 2, 64, 1, &caps());
        assert!(plan.block_row <= 3);
        assert!(plan.local_size <= SIMD32);
        // Groups x lanes x vec covers the inner dimension
        assert!(plan.group_num * plan.local_size >= 64);
    }

    #[test]
    fn test_spatial_plan_saturates_small_device() {
        let caps = DeviceCaps {
            max_work_group_size: 128,
            sub_group_sizes: vec![16, 32],
            max_work_items: 256,
        };
        let plan = spatial_plan(64, 1, 8, 1, &caps);
        assert!(plan.block_row >= 1);
        assert!(plan.block_row <= 64);
        // block_row stops at the group-size cap: block_row * 32 <= 128
        assert!(plan.block_row * SIMD32 <= caps.max_work_group_size || plan.block_row == 1);
    }
}
