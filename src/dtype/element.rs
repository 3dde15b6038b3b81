//! Element traits mapping Rust types to DType

use super::DType;
use bytemuck::{Pod, Zeroable};
use std::ops::{Add, Div, Mul, Sub};

/// Trait for types that can be elements of a tensor
///
/// This trait connects Rust's type system to kernr's runtime dtype system.
/// It's implemented for all primitive numeric types (and, behind the `f16`
/// feature, `half::f16`/`half::bf16`).
///
/// # Bounds
/// - `Copy + Clone + Send + Sync + 'static` - Basic trait requirements
/// - `Pod + Zeroable` - Safe memory transmutation (bytemuck)
/// - `Add + Sub + Mul + Div` - Arithmetic operations (Output = Self)
/// - `PartialOrd` - Comparison for min/max operations
pub trait Element:
    Copy
    + Clone
    + Send
    + Sync
    + Pod
    + Zeroable
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + PartialOrd
{
    /// The corresponding DType for this Rust type
    const DTYPE: DType;

    /// Convert to f64 for generic numeric operations
    fn to_f64(self) -> f64;

    /// Convert from f64 to this type
    fn from_f64(v: f64) -> Self;

    /// Zero value
    fn zero() -> Self;

    /// One value
    fn one() -> Self;

    /// Identity for a min fold: no real element compares above it.
    ///
    /// `+inf` for floats, `MAX` for integers.
    fn upper_bound() -> Self;

    /// Identity for a max fold: no real element compares below it.
    ///
    /// `-inf` for floats, `MIN` for integers.
    fn lower_bound() -> Self;

    /// NaN check; always false for non-float types
    fn is_nan(self) -> bool {
        false
    }
}

macro_rules! impl_int_element {
    ($t:ty, $dtype:expr) => {
        impl Element for $t {
            const DTYPE: DType = $dtype;

            #[inline]
            fn to_f64(self) -> f64 {
                self as f64
            }

            #[inline]
            fn from_f64(v: f64) -> Self {
                v as $t
            }

            #[inline]
            fn zero() -> Self {
                0
            }

            #[inline]
            fn one() -> Self {
                1
            }

            #[inline]
            fn upper_bound() -> Self {
                <$t>::MAX
            }

            #[inline]
            fn lower_bound() -> Self {
                <$t>::MIN
            }
        }
    };
}

impl_int_element!(i64, DType::I64);
impl_int_element!(i32, DType::I32);
impl_int_element!(i16, DType::I16);
impl_int_element!(i8, DType::I8);
impl_int_element!(u64, DType::U64);
impl_int_element!(u32, DType::U32);
impl_int_element!(u16, DType::U16);
impl_int_element!(u8, DType::U8);

impl Element for f64 {
    const DTYPE: DType = DType::F64;

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        v
    }

    #[inline]
    fn zero() -> Self {
        0.0
    }

    #[inline]
    fn one() -> Self {
        1.0
    }

    #[inline]
    fn upper_bound() -> Self {
        f64::INFINITY
    }

    #[inline]
    fn lower_bound() -> Self {
        f64::NEG_INFINITY
    }

    #[inline]
    fn is_nan(self) -> bool {
        f64::is_nan(self)
    }
}

impl Element for f32 {
    const DTYPE: DType = DType::F32;

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        v as f32
    }

    #[inline]
    fn zero() -> Self {
        0.0
    }

    #[inline]
    fn one() -> Self {
        1.0
    }

    #[inline]
    fn upper_bound() -> Self {
        f32::INFINITY
    }

    #[inline]
    fn lower_bound() -> Self {
        f32::NEG_INFINITY
    }

    #[inline]
    fn is_nan(self) -> bool {
        f32::is_nan(self)
    }
}

// Note: bool doesn't implement Pod, so we can't implement Element for it
// directly. Boolean tensors use u8 internally.

// ============================================================================
// Half-precision floating point types (requires "f16" feature)
// ============================================================================

#[cfg(feature = "f16")]
impl Element for half::f16 {
    const DTYPE: DType = DType::F16;

    #[inline]
    fn to_f64(self) -> f64 {
        self.to_f64()
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        half::f16::from_f64(v)
    }

    #[inline]
    fn zero() -> Self {
        half::f16::ZERO
    }

    #[inline]
    fn one() -> Self {
        half::f16::ONE
    }

    #[inline]
    fn upper_bound() -> Self {
        half::f16::INFINITY
    }

    #[inline]
    fn lower_bound() -> Self {
        half::f16::NEG_INFINITY
    }

    #[inline]
    fn is_nan(self) -> bool {
        half::f16::is_nan(self)
    }
}

#[cfg(feature = "f16")]
impl Element for half::bf16 {
    const DTYPE: DType = DType::BF16;

    #[inline]
    fn to_f64(self) -> f64 {
        self.to_f64()
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        half::bf16::from_f64(v)
    }

    #[inline]
    fn zero() -> Self {
        half::bf16::ZERO
    }

    #[inline]
    fn one() -> Self {
        half::bf16::ONE
    }

    #[inline]
    fn upper_bound() -> Self {
        half::bf16::INFINITY
    }

    #[inline]
    fn lower_bound() -> Self {
        half::bf16::NEG_INFINITY
    }

    #[inline]
    fn is_nan(self) -> bool {
        half::bf16::is_nan(self)
    }
}

// ============================================================================
// Accumulation types
// ============================================================================

/// Accumulation scalar used inside normalization kernels.
///
/// Row maxima, exponential sums and gradient dot products are carried in this
/// type rather than the storage element type, so f16/bf16 rows accumulate in
/// f32 without drift.
pub trait AccFloat:
    Copy
    + Clone
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + PartialOrd
{
    /// Additive identity
    fn zero() -> Self;

    /// Multiplicative identity
    fn one() -> Self;

    /// Most negative finite value; identity for a running max
    fn lowest() -> Self;

    /// Quiet NaN
    fn nan() -> Self;

    /// `e^self`
    fn exp(self) -> Self;

    /// Natural logarithm
    fn ln(self) -> Self;

    /// IEEE max (NaN-propagating is not required here; both operands come
    /// from the same row and NaN poisons the sum regardless)
    fn max(self, other: Self) -> Self;

    /// Reciprocal
    fn recip(self) -> Self;

    /// Widen to f64 (used by tests and fallback paths)
    fn to_f64(self) -> f64;

    /// Narrow from f64
    fn from_f64(v: f64) -> Self;
}

impl AccFloat for f32 {
    #[inline]
    fn zero() -> Self {
        0.0
    }

    #[inline]
    fn one() -> Self {
        1.0
    }

    #[inline]
    fn lowest() -> Self {
        f32::MIN
    }

    #[inline]
    fn nan() -> Self {
        f32::NAN
    }

    #[inline]
    fn exp(self) -> Self {
        f32::exp(self)
    }

    #[inline]
    fn ln(self) -> Self {
        f32::ln(self)
    }

    #[inline]
    fn max(self, other: Self) -> Self {
        f32::max(self, other)
    }

    #[inline]
    fn recip(self) -> Self {
        f32::recip(self)
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        v as f32
    }
}

impl AccFloat for f64 {
    #[inline]
    fn zero() -> Self {
        0.0
    }

    #[inline]
    fn one() -> Self {
        1.0
    }

    #[inline]
    fn lowest() -> Self {
        f64::MIN
    }

    #[inline]
    fn nan() -> Self {
        f64::NAN
    }

    #[inline]
    fn exp(self) -> Self {
        f64::exp(self)
    }

    #[inline]
    fn ln(self) -> Self {
        f64::ln(self)
    }

    #[inline]
    fn max(self, other: Self) -> Self {
        f64::max(self, other)
    }

    #[inline]
    fn recip(self) -> Self {
        f64::recip(self)
    }

    #[inline]
    fn to_f64(self) -> f64 {
        self
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        v
    }
}

/// Float element accepted by the softmax/log-softmax kernels.
///
/// Associates each storage type with its accumulation type: f16/bf16/f32
/// accumulate in f32, f64 in f64.
pub trait FloatElement: Element {
    /// Accumulation scalar for this element type
    type Acc: AccFloat;

    /// Widen to the accumulation type
    fn to_acc(self) -> Self::Acc;

    /// Narrow from the accumulation type
    fn from_acc(v: Self::Acc) -> Self;

    /// Negative infinity in the storage type (mask substitution value)
    fn neg_infinity() -> Self;

    /// Quiet NaN in the storage type
    fn nan() -> Self;
}

impl FloatElement for f32 {
    type Acc = f32;

    #[inline]
    fn to_acc(self) -> f32 {
        self
    }

    #[inline]
    fn from_acc(v: f32) -> Self {
        v
    }

    #[inline]
    fn neg_infinity() -> Self {
        f32::NEG_INFINITY
    }

    #[inline]
    fn nan() -> Self {
        f32::NAN
    }
}

impl FloatElement for f64 {
    type Acc = f64;

    #[inline]
    fn to_acc(self) -> f64 {
        self
    }

    #[inline]
    fn from_acc(v: f64) -> Self {
        v
    }

    #[inline]
    fn neg_infinity() -> Self {
        f64::NEG_INFINITY
    }

    #[inline]
    fn nan() -> Self {
        f64::NAN
    }
}

#[cfg(feature = "f16")]
impl FloatElement for half::f16 {
    type Acc = f32;

    #[inline]
    fn to_acc(self) -> f32 {
        self.to_f32()
    }

    #[inline]
    fn from_acc(v: f32) -> Self {
        half::f16::from_f32(v)
    }

    #[inline]
    fn neg_infinity() -> Self {
        half::f16::NEG_INFINITY
    }

    #[inline]
    fn nan() -> Self {
        half::f16::NAN
    }
}

#[cfg(feature = "f16")]
impl FloatElement for half::bf16 {
    type Acc = f32;

    #[inline]
    fn to_acc(self) -> f32 {
        self.to_f32()
    }

    #[inline]
    fn from_acc(v: f32) -> Self {
        half::bf16::from_f32(v)
    }

    #[inline]
    fn neg_infinity() -> Self {
        half::bf16::NEG_INFINITY
    }

    #[inline]
    fn nan() -> Self {
        half::bf16::NAN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_dtype() {
        assert_eq!(f64::DTYPE, DType::F64);
        assert_eq!(f32::DTYPE, DType::F32);
        assert_eq!(i32::DTYPE, DType::I32);
        assert_eq!(u8::DTYPE, DType::U8);
    }

    #[test]
    fn test_fold_identities() {
        assert_eq!(f32::upper_bound(), f32::INFINITY);
        assert_eq!(f32::lower_bound(), f32::NEG_INFINITY);
        assert_eq!(i32::upper_bound(), i32::MAX);
        assert_eq!(u8::lower_bound(), 0);
    }

    #[test]
    fn test_nan_check() {
        assert!(Element::is_nan(f32::NAN));
        assert!(!Element::is_nan(1.0f32));
        assert!(!Element::is_nan(7i32));
    }

    #[test]
    fn test_acc_widening() {
        assert_eq!(1.5f32.to_acc(), 1.5f32);
        assert_eq!(<f64 as FloatElement>::to_acc(2.5), 2.5f64);
    }

    #[cfg(feature = "f16")]
    #[test]
    fn test_half_acc_is_f32() {
        let h = half::f16::from_f32(0.5);
        let acc: f32 = h.to_acc();
        assert_eq!(acc, 0.5);
    }
}
