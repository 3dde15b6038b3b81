//! Execution backend: device capabilities, client, and the work-group driver
//!
//! Kernels in this crate are written against a work-group/subgroup machine.
//! The backend here executes every work-group on the host, lock-step, and
//! (with the `rayon` feature) runs independent groups in parallel. Groups
//! never synchronize with each other, matching the device model where
//! inter-group ordering is unspecified.

use crate::dtype::DType;
use crate::error::Result;
use crate::tensor::Tensor;

/// Capabilities of the execution target
///
/// Always passed explicitly into planning, never read from a hidden global:
/// capability can legitimately vary across execution contexts within
/// one process (and tests construct reduced-capability devices to force
/// strategy selection).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceCaps {
    /// Maximum number of lanes in one work-group
    pub max_work_group_size: usize,
    /// Hardware-native subgroup widths, ascending
    pub sub_group_sizes: Vec<usize>,
    /// Total number of lanes the device can keep in flight
    pub max_work_items: usize,
}

impl DeviceCaps {
    /// Capabilities of the default emulated target: 1024-lane work-groups,
    /// 16/32-wide subgroups, 64Ki resident lanes.
    pub fn emulated() -> Self {
        Self {
            max_work_group_size: 1024,
            sub_group_sizes: vec![16, 32],
            max_work_items: 65536,
        }
    }

    /// Largest native subgroup width
    #[inline]
    pub fn largest_sub_group_size(&self) -> usize {
        self.sub_group_sizes.iter().copied().max().unwrap_or(1)
    }

    /// Whether `width` is a native subgroup width
    #[inline]
    pub fn supports_sub_group(&self, width: usize) -> bool {
        self.sub_group_sizes.contains(&width)
    }
}

impl Default for DeviceCaps {
    fn default() -> Self {
        Self::emulated()
    }
}

/// The emulated data-parallel device
#[derive(Clone, Debug, Default)]
pub struct Device {
    caps: DeviceCaps,
}

impl Device {
    /// Create the default device
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a device with explicit capabilities
    pub fn with_caps(caps: DeviceCaps) -> Self {
        Self { caps }
    }

    /// Device capabilities
    #[inline]
    pub fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    /// Human-readable name
    pub fn name(&self) -> String {
        format!(
            "emulated(wg={}, simd={:?})",
            self.caps.max_work_group_size, self.caps.sub_group_sizes
        )
    }
}

/// Client for operation dispatch
///
/// All public operators are trait methods implemented on `Client`
/// (see [`crate::ops`]); the client carries the device whose capabilities
/// drive planning, and allocates output tensors.
#[derive(Clone, Debug, Default)]
pub struct Client {
    pub(crate) device: Device,
}

impl Client {
    /// Create a client for a device
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    /// The client's device
    #[inline]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Wait for outstanding work
    ///
    /// Emulated launches complete before the call returns, so this is a
    /// no-op; it exists so callers can treat submission as asynchronous.
    pub fn synchronize(&self) {}

    /// Allocate a zero-initialized output tensor on this client's device
    pub(crate) fn alloc_output(&self, shape: &[usize], dtype: DType) -> Result<Tensor> {
        Tensor::try_empty(shape, dtype)
    }
}

/// Run `f` once per work-group
///
/// Groups are independent by construction (each writes a disjoint slice of
/// the output), so they may run in any order or in parallel.
pub(crate) fn for_each_group<F>(groups: usize, f: F)
where
    F: Fn(usize) + Send + Sync,
{
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        (0..groups).into_par_iter().for_each(f);
    }
    #[cfg(not(feature = "rayon"))]
    {
        for g in 0..groups {
            f(g);
        }
    }
}
