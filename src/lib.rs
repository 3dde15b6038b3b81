//! # kernr
//!
//! **Dimension-wise reduction and normalization kernels for Rust, built on an
//! explicit data-parallel execution model.**
//!
//! kernr implements the hard core of a tensor library's reduction stack:
//! argmin/argmax-with-index over one axis, and softmax / log-softmax forward
//! and backward (including masked and fused add+softmax variants). A single
//! logical operation is turned into an execution plan (work-group size,
//! work-group count, vector width, unroll factor, subgroup width) that
//! adapts to element type, axis position, tensor size, buffer alignment, and
//! device limits, while preserving exact numerical semantics (NaN
//! propagation, first-occurrence tie-breaking, overflow-safe exponentials).
//!
//! ## Execution model
//!
//! Kernels are written against a work-group/subgroup machine: lanes cooperate
//! through subgroup shuffles and barrier-separated shared memory. The crate
//! ships one backend, a lockstep emulator that runs every work-group on the
//! host (in parallel across groups with the `rayon` feature) and reproduces
//! the exact reduction-tree shapes of the shuffle machine, so results are
//! reproducible across launch configurations.
//!
//! ## Quick start
//!
//! ```
//! use kernr::prelude::*;
//!
//! let device = Device::new();
//! let client = Client::new(device.clone());
//!
//! let x = Tensor::from_slice(&[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3], &device);
//! let y = client.softmax(&x, -1)?;
//! let (values, indices) = client.max_dim(&x, 1, false)?;
//! # Ok::<(), kernr::error::Error>(())
//! ```
//!
//! ## Feature flags
//!
//! - `f16` (default): half-precision floats (F16, BF16) via the `half` crate
//! - `rayon` (default): parallel work-group execution

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dtype;
pub mod error;
pub mod exec;
pub mod kernel;
pub mod ops;
pub mod tensor;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::dtype::DType;
    pub use crate::error::{Error, Result};
    pub use crate::exec::{Client, Device, DeviceCaps};
    pub use crate::ops::{ArgReduceOps, ElementwiseOps, SoftmaxOps};
    pub use crate::tensor::Tensor;
}
