//! Shared helpers for operator implementations

use crate::tensor::Tensor;

/// Macro for float dtype dispatch to typed kernel calls
///
/// Matches on dtype and executes the code block with the appropriate type.
/// Usage: `dispatch_float_dtype!(dtype, T => { code using T }, "op_name")`
///
/// F16 and BF16 are supported when the "f16" feature is enabled; without it
/// they return `UnsupportedDType`, as does every non-float dtype.
macro_rules! dispatch_float_dtype {
    ($dtype:expr, $T:ident => $body:block, $error_op:expr) => {
        match $dtype {
            $crate::dtype::DType::F64 => {
                type $T = f64;
                $body
            }
            $crate::dtype::DType::F32 => {
                type $T = f32;
                $body
            }
            #[cfg(feature = "f16")]
            $crate::dtype::DType::F16 => {
                type $T = half::f16;
                $body
            }
            #[cfg(feature = "f16")]
            $crate::dtype::DType::BF16 => {
                type $T = half::bf16;
                $body
            }
            _ => {
                return Err($crate::error::Error::UnsupportedDType {
                    dtype: $dtype,
                    op: $error_op,
                })
            }
        }
    };
}

/// Macro for dtype dispatch over every ordered type
///
/// Covers floats, signed/unsigned integers, and Bool (dispatched as its u8
/// storage type, where false < true holds). Complex dtypes are rejected.
macro_rules! dispatch_ordered_dtype {
    ($dtype:expr, $T:ident => $body:block, $error_op:expr) => {
        match $dtype {
            $crate::dtype::DType::F64 => {
                type $T = f64;
                $body
            }
            $crate::dtype::DType::F32 => {
                type $T = f32;
                $body
            }
            #[cfg(feature = "f16")]
            $crate::dtype::DType::F16 => {
                type $T = half::f16;
                $body
            }
            #[cfg(feature = "f16")]
            $crate::dtype::DType::BF16 => {
                type $T = half::bf16;
                $body
            }
            $crate::dtype::DType::I64 => {
                type $T = i64;
                $body
            }
            $crate::dtype::DType::I32 => {
                type $T = i32;
                $body
            }
            $crate::dtype::DType::I16 => {
                type $T = i16;
                $body
            }
            $crate::dtype::DType::I8 => {
                type $T = i8;
                $body
            }
            $crate::dtype::DType::U64 => {
                type $T = u64;
                $body
            }
            $crate::dtype::DType::U32 => {
                type $T = u32;
                $body
            }
            $crate::dtype::DType::U16 => {
                type $T = u16;
                $body
            }
            $crate::dtype::DType::U8 | $crate::dtype::DType::Bool => {
                type $T = u8;
                $body
            }
            _ => {
                return Err($crate::error::Error::UnsupportedDType {
                    dtype: $dtype,
                    op: $error_op,
                })
            }
        }
    };
}

pub(crate) use dispatch_float_dtype;
pub(crate) use dispatch_ordered_dtype;

/// Ensure a tensor is contiguous, cloning if already contiguous or copying
/// if not
#[inline]
pub(crate) fn ensure_contiguous(tensor: &Tensor) -> Tensor {
    if tensor.is_contiguous() {
        tensor.clone()
    } else {
        tensor.contiguous()
    }
}

/// View a 0-d tensor as `[1]`; higher ranks pass through
#[inline]
pub(crate) fn atleast_1d(tensor: &Tensor) -> Tensor {
    if tensor.ndim() == 0 {
        ensure_contiguous(tensor)
            .reshape(&[1])
            .expect("0-d reshape cannot fail")
    } else {
        tensor.clone()
    }
}
