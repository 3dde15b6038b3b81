//! Softmax operator implementation: validation, geometry, and kernel launch
//!
//! The launch decision trees here mirror the strategy policy in
//! [`crate::kernel::dispatch`]: fast register-resident kernels when the row
//! is register-resident and 32-bit indexable, streaming kernels for long
//! rows, spatial kernels for a strided axis, and composed fallbacks
//! (materialized add / masked fill) whenever a fused precondition fails.

use crate::dtype::{DType, Element, FloatElement};
use crate::error::{Error, Result};
use crate::exec::Client;
use crate::kernel::dispatch::{
    choose_backward_strategy, choose_forward_strategy, reference_local_size, AxisGeometry,
    BackwardStrategy, ForwardStrategy, IndexWidth,
};
use crate::kernel::offset::BroadcastOffsets;
use crate::kernel::plan::{linear_plan, spatial_plan};
use crate::kernel::softmax_backward::{
    dispatch_softmax_backward, softmax_backward_kernel, spatial_softmax_backward,
};
use crate::kernel::softmax_forward::{
    dispatch_softmax_forward, dispatch_softmax_forward_add, softmax_forward_kernel,
    spatial_softmax_forward,
};
use crate::tensor::Tensor;

use super::helpers::{atleast_1d, dispatch_float_dtype, ensure_contiguous};
use super::normalize_dim;
use super::traits::{ElementwiseOps, SoftmaxOps};

impl SoftmaxOps for Client {
    fn softmax(&self, a: &Tensor, dim: isize) -> Result<Tensor> {
        host_softmax(self, a, dim, false)
    }

    fn log_softmax(&self, a: &Tensor, dim: isize) -> Result<Tensor> {
        host_softmax(self, a, dim, true)
    }

    fn softmax_backward(
        &self,
        grad_output: &Tensor,
        output: &Tensor,
        dim: isize,
        input_dtype: DType,
    ) -> Result<Tensor> {
        host_softmax_backward(self, grad_output, output, dim, false, input_dtype)
    }

    fn log_softmax_backward(
        &self,
        grad_output: &Tensor,
        output: &Tensor,
        dim: isize,
        input_dtype: DType,
    ) -> Result<Tensor> {
        host_softmax_backward(self, grad_output, output, dim, true, input_dtype)
    }

    fn masked_softmax(&self, input: &Tensor, mask: &Tensor, dim: isize) -> Result<Tensor> {
        let dtype = input.dtype();
        if mask.dtype() != DType::Bool {
            return Err(Error::invalid_argument(
                "mask",
                "mask should be a boolean tensor",
            ));
        }

        let input = atleast_1d(input);
        let mask = atleast_1d(mask);
        let ndim = input.ndim();
        let dim_idx = normalize_dim(ndim, dim).ok_or(Error::InvalidDimension { dim, ndim })?;
        let offsets = BroadcastOffsets::new(input.shape(), mask.shape())
            .ok_or_else(|| Error::shape_mismatch(input.shape(), mask.shape()))?;

        let out = self.alloc_output(input.shape(), dtype)?;
        if input.numel() == 0 {
            return Ok(out);
        }

        let input_c = ensure_contiguous(&input);
        let mask_c = ensure_contiguous(&mask);
        let geom = AxisGeometry::from_shape(input_c.shape(), dim_idx);
        let caps = self.device.caps();
        let can32 = input_c.can_use_32bit_index() && out.can_use_32bit_index();

        dispatch_float_dtype!(dtype, T => {
            let strategy = choose_forward_strategy(
                geom,
                std::mem::size_of::<T>(),
                input_c.data_ptr(),
                out.data_ptr(),
                can32,
                caps,
            );
            if let ForwardStrategy::Fast { simd, vec_size, outer_loop } = strategy {
                let plan = linear_plan(geom.dim_size, geom.outer_size, simd, vec_size, outer_loop, caps);
                unsafe {
                    dispatch_softmax_forward::<T, u32>(
                        input_c.data_ptr() as *const T,
                        out.data_ptr() as *mut T,
                        geom.dim_size,
                        geom.outer_size,
                        vec_size,
                        outer_loop,
                        simd,
                        false,
                        Some((mask_c.data_ptr() as *const u8, offsets)),
                        &plan,
                    );
                }
            } else {
                // Strided axis, long row, or 64-bit indexing: materialize the
                // fill and run the plain kernels.
                let filled = self.masked_fill(&input, &mask, f64::NEG_INFINITY)?;
                return host_softmax(self, &filled, dim_idx as isize, false);
            }
        }, "masked_softmax");

        Ok(out)
    }

    fn masked_softmax_backward(
        &self,
        grad_output: &Tensor,
        output: &Tensor,
        mask: &Tensor,
        dim: isize,
    ) -> Result<Tensor> {
        let dtype = grad_output.dtype();
        if mask.dtype() != DType::Bool {
            return Err(Error::invalid_argument(
                "mask",
                "mask should be a boolean tensor",
            ));
        }
        if output.dtype() != dtype {
            return Err(Error::DTypeMismatch {
                lhs: dtype,
                rhs: output.dtype(),
            });
        }
        if grad_output.shape() != mask.shape() {
            return Err(Error::shape_mismatch(grad_output.shape(), mask.shape()));
        }
        if grad_output.shape() != output.shape() {
            return Err(Error::shape_mismatch(grad_output.shape(), output.shape()));
        }

        let grad_input = self.alloc_output(grad_output.shape(), dtype)?;
        if grad_output.numel() == 0 {
            return Ok(grad_input);
        }

        let grad = ensure_contiguous(&atleast_1d(grad_output));
        let out_saved = ensure_contiguous(&atleast_1d(output));
        let mask = ensure_contiguous(&atleast_1d(mask));
        let ndim = grad.ndim();
        let dim_idx = normalize_dim(ndim, dim).ok_or(Error::InvalidDimension { dim, ndim })?;
        let geom = AxisGeometry::from_shape(grad.shape(), dim_idx);
        let caps = self.device.caps();
        let can32 = grad.can_use_32bit_index()
            && out_saved.can_use_32bit_index()
            && grad_input.can_use_32bit_index();

        dispatch_float_dtype!(dtype, T => {
            let strategy = choose_backward_strategy(
                geom,
                std::mem::size_of::<T>(),
                grad_input.data_ptr(),
                out_saved.data_ptr(),
                grad.data_ptr(),
                can32,
                caps,
            );
            if let BackwardStrategy::Fast { simd, vec_size, num } = strategy {
                let offsets = BroadcastOffsets::identity(grad.shape());
                let plan = linear_plan(geom.dim_size, geom.outer_size, simd, vec_size, num, caps);
                unsafe {
                    dispatch_softmax_backward::<T, u32>(
                        grad_input.data_ptr() as *mut T,
                        out_saved.data_ptr() as *const T,
                        grad.data_ptr() as *const T,
                        geom.dim_size,
                        geom.outer_size,
                        vec_size,
                        num,
                        simd,
                        false,
                        Some((mask.data_ptr() as *const u8, offsets)),
                        &plan,
                    );
                }
            } else {
                // Zeroing the saved output at masked positions excludes them
                // from the cross term; the plain kernels do the rest.
                let masked_out = self.masked_fill(&out_saved, &mask, 0.0)?;
                return host_softmax_backward(self, &grad, &masked_out, dim_idx as isize, false, dtype);
            }
        }, "masked_softmax_backward");

        Ok(grad_input)
    }

    fn add_softmax(
        &self,
        input: &Tensor,
        other: &Tensor,
        alpha: f64,
        dim: isize,
        out_dtype: Option<DType>,
    ) -> Result<Tensor> {
        let sizes: Vec<usize> = input.shape().to_vec();
        self.add_view_softmax(input, other, alpha, &sizes, dim, out_dtype)
    }

    fn add_view_softmax(
        &self,
        input: &Tensor,
        other: &Tensor,
        alpha: f64,
        sizes: &[usize],
        dim: isize,
        out_dtype: Option<DType>,
    ) -> Result<Tensor> {
        let dtype = input.dtype();

        // Unfusable shape or an explicit dtype change: compose.
        let fusable = BroadcastOffsets::new(input.shape(), other.shape()).is_some()
            && input.dtype() == other.dtype()
            && out_dtype.map_or(true, |d| d == dtype);
        if !fusable {
            let added = self.add_alpha(input, other, alpha)?.reshape(sizes)?;
            return host_softmax(self, &added, dim, false);
        }

        let ndim = sizes.len();
        let dim_idx = normalize_dim(ndim, dim).ok_or(Error::InvalidDimension { dim, ndim })?;
        let input_c = ensure_contiguous(input);
        let viewed = input_c.reshape(sizes)?;
        let geom = AxisGeometry::from_shape(viewed.shape(), dim_idx);

        let other_c = ensure_contiguous(other);
        let offsets = BroadcastOffsets::new(input.shape(), other.shape())
            .expect("fusable implies broadcastable");

        let out = self.alloc_output(sizes, dtype)?;
        if viewed.numel() == 0 {
            return Ok(out);
        }
        let caps = self.device.caps();
        let can32 = viewed.can_use_32bit_index() && out.can_use_32bit_index();

        dispatch_float_dtype!(dtype, T => {
            let strategy = choose_forward_strategy(
                geom,
                std::mem::size_of::<T>(),
                input_c.data_ptr(),
                out.data_ptr(),
                can32,
                caps,
            );
            if let ForwardStrategy::Fast { simd, vec_size, outer_loop } = strategy {
                let plan = linear_plan(geom.dim_size, geom.outer_size, simd, vec_size, outer_loop, caps);
                unsafe {
                    dispatch_softmax_forward_add::<T, u32>(
                        input_c.data_ptr() as *const T,
                        other_c.data_ptr() as *const T,
                        out.data_ptr() as *mut T,
                        geom.dim_size,
                        geom.outer_size,
                        T::from_f64(alpha),
                        vec_size,
                        outer_loop,
                        simd,
                        false,
                        &offsets,
                        &plan,
                    );
                }
            } else {
                let added = self.add_alpha(input, other, alpha)?.reshape(sizes)?;
                return host_softmax(self, &added, dim_idx as isize, false);
            }
        }, "add_view_softmax");

        Ok(out)
    }
}

/// Forward entry: wrap the axis, materialize contiguity, pick and launch a
/// strategy
fn host_softmax(client: &Client, input: &Tensor, dim: isize, log_softmax: bool) -> Result<Tensor> {
    let dtype = input.dtype();
    let input = atleast_1d(input);
    let ndim = input.ndim();
    let dim_idx = normalize_dim(ndim, dim).ok_or(Error::InvalidDimension { dim, ndim })?;

    let out = client.alloc_output(input.shape(), dtype)?;
    if input.numel() == 0 {
        return Ok(out);
    }

    let input_c = ensure_contiguous(&input);
    let geom = AxisGeometry::from_shape(input_c.shape(), dim_idx);

    dispatch_float_dtype!(dtype, T => {
        run_softmax_forward::<T>(client, &input_c, &out, geom, log_softmax);
    }, "softmax");

    Ok(out)
}

fn run_softmax_forward<T: FloatElement>(
    client: &Client,
    input: &Tensor,
    out: &Tensor,
    geom: AxisGeometry,
    log_softmax: bool,
) {
    let caps = client.device.caps();
    let can32 = input.can_use_32bit_index() && out.can_use_32bit_index();
    let strategy = choose_forward_strategy(
        geom,
        std::mem::size_of::<T>(),
        input.data_ptr(),
        out.data_ptr(),
        can32,
        caps,
    );

    let in_ptr = input.data_ptr() as *const T;
    let out_ptr = out.data_ptr() as *mut T;

    match strategy {
        ForwardStrategy::Fast {
            simd,
            vec_size,
            outer_loop,
        } => {
            let plan = linear_plan(
                geom.dim_size,
                geom.outer_size,
                simd,
                vec_size,
                outer_loop,
                caps,
            );
            unsafe {
                dispatch_softmax_forward::<T, u32>(
                    in_ptr,
                    out_ptr,
                    geom.dim_size,
                    geom.outer_size,
                    vec_size,
                    outer_loop,
                    simd,
                    log_softmax,
                    None,
                    &plan,
                );
            }
        }
        ForwardStrategy::Reference { vec_size, index } => {
            let local_size = reference_local_size(geom.dim_size, vec_size, caps);
            match index {
                IndexWidth::U32 => unsafe {
                    softmax_forward_kernel::<T, u32>(
                        in_ptr,
                        out_ptr,
                        geom.dim_size,
                        geom.outer_size,
                        vec_size,
                        local_size,
                        log_softmax,
                    );
                },
                IndexWidth::U64 => unsafe {
                    softmax_forward_kernel::<T, u64>(
                        in_ptr,
                        out_ptr,
                        geom.dim_size,
                        geom.outer_size,
                        vec_size,
                        local_size,
                        log_softmax,
                    );
                },
            }
        }
        ForwardStrategy::Spatial { vec_size, index } => {
            let plan = spatial_plan(
                geom.dim_size,
                geom.outer_size,
                geom.inner_size,
                vec_size,
                caps,
            );
            match index {
                IndexWidth::U32 => unsafe {
                    spatial_softmax_forward::<T, u32>(
                        in_ptr,
                        out_ptr,
                        geom.dim_size,
                        geom.inner_size,
                        geom.outer_size,
                        vec_size,
                        &plan,
                        log_softmax,
                    );
                },
                IndexWidth::U64 => unsafe {
                    spatial_softmax_forward::<T, u64>(
                        in_ptr,
                        out_ptr,
                        geom.dim_size,
                        geom.inner_size,
                        geom.outer_size,
                        vec_size,
                        &plan,
                        log_softmax,
                    );
                },
            }
        }
    }
}

/// Backward entry
fn host_softmax_backward(
    client: &Client,
    grad_output: &Tensor,
    output: &Tensor,
    dim: isize,
    log_softmax: bool,
    input_dtype: DType,
) -> Result<Tensor> {
    let dtype = grad_output.dtype();
    if input_dtype != dtype {
        // Promoting the gradient dtype inside the kernel is not supported;
        // this is an explicit configuration error, never a silent downgrade.
        return Err(Error::NotImplemented {
            feature: "softmax backward with half-to-float promotion",
        });
    }
    if output.dtype() != dtype {
        return Err(Error::DTypeMismatch {
            lhs: dtype,
            rhs: output.dtype(),
        });
    }
    if grad_output.shape() != output.shape() {
        return Err(Error::shape_mismatch(grad_output.shape(), output.shape()));
    }

    let grad = atleast_1d(grad_output);
    let ndim = grad.ndim();
    let dim_idx = normalize_dim(ndim, dim).ok_or(Error::InvalidDimension { dim, ndim })?;

    let grad_input = client.alloc_output(grad.shape(), dtype)?;
    if output.numel() == 0 {
        return Ok(grad_input);
    }

    let grad_c = ensure_contiguous(&grad);
    let out_c = ensure_contiguous(&atleast_1d(output));
    let geom = AxisGeometry::from_shape(grad_c.shape(), dim_idx);

    dispatch_float_dtype!(dtype, T => {
        run_softmax_backward::<T>(client, &grad_c, &out_c, &grad_input, geom, log_softmax);
    }, "softmax_backward");

    Ok(grad_input)
}

fn run_softmax_backward<T: FloatElement>(
    client: &Client,
    grad_output: &Tensor,
    output: &Tensor,
    grad_input: &Tensor,
    geom: AxisGeometry,
    log_softmax: bool,
) {
    let caps = client.device.caps();
    let can32 = grad_output.can_use_32bit_index()
        && output.can_use_32bit_index()
        && grad_input.can_use_32bit_index();
    let strategy = choose_backward_strategy(
        geom,
        std::mem::size_of::<T>(),
        grad_input.data_ptr(),
        output.data_ptr(),
        grad_output.data_ptr(),
        can32,
        caps,
    );

    let gi_ptr = grad_input.data_ptr() as *mut T;
    let y_ptr = output.data_ptr() as *const T;
    let g_ptr = grad_output.data_ptr() as *const T;

    match strategy {
        BackwardStrategy::Fast {
            simd,
            vec_size,
            num,
        } => {
            let plan = linear_plan(geom.dim_size, geom.outer_size, simd, vec_size, num, caps);
            unsafe {
                dispatch_softmax_backward::<T, u32>(
                    gi_ptr,
                    y_ptr,
                    g_ptr,
                    geom.dim_size,
                    geom.outer_size,
                    vec_size,
                    num,
                    simd,
                    log_softmax,
                    None,
                    &plan,
                );
            }
        }
        BackwardStrategy::Reference { vec_size, index } => {
            let local_size = reference_local_size(geom.dim_size, vec_size, caps);
            match index {
                IndexWidth::U32 => unsafe {
                    softmax_backward_kernel::<T, u32>(
                        gi_ptr,
                        y_ptr,
                        g_ptr,
                        geom.dim_size,
                        geom.outer_size,
                        vec_size,
                        local_size,
                        log_softmax,
                    );
                },
                IndexWidth::U64 => unsafe {
                    softmax_backward_kernel::<T, u64>(
                        gi_ptr,
                        y_ptr,
                        g_ptr,
                        geom.dim_size,
                        geom.outer_size,
                        vec_size,
                        local_size,
                        log_softmax,
                    );
                },
            }
        }
        BackwardStrategy::Spatial { vec_size, index } => {
            let plan = spatial_plan(
                geom.dim_size,
                geom.outer_size,
                geom.inner_size,
                vec_size,
                caps,
            );
            match index {
                IndexWidth::U32 => unsafe {
                    spatial_softmax_backward::<T, u32>(
                        gi_ptr,
                        y_ptr,
                        g_ptr,
                        geom.dim_size,
                        geom.inner_size,
                        geom.outer_size,
                        vec_size,
                        &plan,
                        log_softmax,
                    );
                },
                IndexWidth::U64 => unsafe {
                    spatial_softmax_backward::<T, u64>(
                        gi_ptr,
                        y_ptr,
                        g_ptr,
                        geom.dim_size,
                        geom.inner_size,
                        geom.outer_size,
                        vec_size,
                        &plan,
                        log_softmax,
                    );
                },
            }
        }
    }
}
