//! Operation traits implemented by the client

use crate::dtype::DType;
use crate::error::Result;
use crate::tensor::Tensor;

/// Extremum-with-index reduction over one axis
pub trait ArgReduceOps {
    /// Maximum and first-occurrence index along `dim`
    ///
    /// Returns `(values, indices)`; `indices` has dtype I64. NaN wins over
    /// every number, equal values resolve to the lower axis position, and a
    /// negative `dim` wraps. Complex inputs are rejected (ordering is
    /// undefined for them).
    fn max_dim(&self, a: &Tensor, dim: isize, keepdim: bool) -> Result<(Tensor, Tensor)>;

    /// Minimum and first-occurrence index along `dim`
    ///
    /// Same contract as [`Self::max_dim`] with the order reversed.
    fn min_dim(&self, a: &Tensor, dim: isize, keepdim: bool) -> Result<(Tensor, Tensor)>;
}

/// Softmax / log-softmax forward and backward over one axis
pub trait SoftmaxOps {
    /// `softmax(a)` along `dim`
    fn softmax(&self, a: &Tensor, dim: isize) -> Result<Tensor>;

    /// `log_softmax(a)` along `dim`
    fn log_softmax(&self, a: &Tensor, dim: isize) -> Result<Tensor>;

    /// Gradient of softmax given the saved output and incoming gradient
    ///
    /// `input_dtype` is the dtype of the forward input; requesting a dtype
    /// different from the gradient's (half-to-float promotion) is an
    /// unsupported configuration and fails immediately.
    fn softmax_backward(
        &self,
        grad_output: &Tensor,
        output: &Tensor,
        dim: isize,
        input_dtype: DType,
    ) -> Result<Tensor>;

    /// Gradient of log-softmax given the saved output and incoming gradient
    fn log_softmax_backward(
        &self,
        grad_output: &Tensor,
        output: &Tensor,
        dim: isize,
        input_dtype: DType,
    ) -> Result<Tensor>;

    /// Softmax with masked positions excluded
    ///
    /// `mask` is a Bool tensor broadcastable to `input`; true positions are
    /// treated as `-inf` before the reduction. A fully-masked row produces
    /// NaN output; this is defined behavior, not an error.
    fn masked_softmax(&self, input: &Tensor, mask: &Tensor, dim: isize) -> Result<Tensor>;

    /// Gradient of [`Self::masked_softmax`]
    ///
    /// `mask` must match the gradient's shape exactly; masked positions are
    /// excluded from the gradient's cross term.
    fn masked_softmax_backward(
        &self,
        grad_output: &Tensor,
        output: &Tensor,
        mask: &Tensor,
        dim: isize,
    ) -> Result<Tensor>;

    /// `softmax(input + alpha * other)` along `dim`
    ///
    /// Fuses the add into the softmax load when the fast-path preconditions
    /// hold; otherwise composes `add_alpha` then `softmax` (same result,
    /// only performance differs). A requested `out_dtype` differing from the
    /// input dtype always takes the composed path.
    fn add_softmax(
        &self,
        input: &Tensor,
        other: &Tensor,
        alpha: f64,
        dim: isize,
        out_dtype: Option<DType>,
    ) -> Result<Tensor>;

    /// `softmax((input + alpha * other).reshape(sizes))` along `dim`
    fn add_view_softmax(
        &self,
        input: &Tensor,
        other: &Tensor,
        alpha: f64,
        sizes: &[usize],
        dim: isize,
        out_dtype: Option<DType>,
    ) -> Result<Tensor>;
}

/// Elementwise composition ops used by the fallback branches
pub trait ElementwiseOps {
    /// `a + alpha * b`, with `b` broadcastable to `a`
    fn add_alpha(&self, a: &Tensor, b: &Tensor, alpha: f64) -> Result<Tensor>;

    /// `a + alpha * scalar`
    fn add_scalar(&self, a: &Tensor, scalar: f64, alpha: f64) -> Result<Tensor>;

    /// Copy of `a` with `value` written where `mask` is true
    ///
    /// `mask` is a Bool tensor broadcastable to `a`.
    fn masked_fill(&self, a: &Tensor, mask: &Tensor, value: f64) -> Result<Tensor>;

    /// `(a + alpha * b).reshape(sizes)`
    fn add_view(&self, a: &Tensor, b: &Tensor, alpha: f64, sizes: &[usize]) -> Result<Tensor>;

    /// `(a + alpha * scalar).reshape(sizes)`
    fn add_scalar_view(
        &self,
        a: &Tensor,
        scalar: f64,
        alpha: f64,
        sizes: &[usize],
    ) -> Result<Tensor>;
}
