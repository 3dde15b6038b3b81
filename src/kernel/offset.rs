//! Linear-offset translation for broadcast operands
//!
//! The masked and fused-add kernels walk the *input* tensor linearly but
//! read a second operand (mask or addend) that may be broadcast against the
//! input's shape. `BroadcastOffsets` maps an input linear offset to the
//! operand's element offset by decomposing the linear index into coordinates
//! and re-projecting through the operand's (zero-padded) strides.

use smallvec::SmallVec;

/// Maps linear offsets in an output shape to element offsets in a
/// broadcast operand
#[derive(Clone, Debug)]
pub struct BroadcastOffsets {
    /// Output shape, outermost first
    shape: SmallVec<[usize; 4]>,
    /// Operand strides per output dimension; 0 where the operand broadcasts
    strides: SmallVec<[usize; 4]>,
}

impl BroadcastOffsets {
    /// Build the mapping of `operand_shape` broadcast onto `shape`
    ///
    /// Returns `None` when the shapes are not broadcast-compatible
    /// (right-aligned, each operand dim must equal the output dim or 1).
    pub fn new(shape: &[usize], operand_shape: &[usize]) -> Option<Self> {
        if operand_shape.len() > shape.len() {
            return None;
        }

        // Contiguous strides of the operand itself.
        let mut operand_strides: SmallVec<[usize; 4]> =
            SmallVec::with_capacity(operand_shape.len());
        let mut stride = 1usize;
        for &d in operand_shape.iter().rev() {
            operand_strides.push(stride);
            stride *= d;
        }
        operand_strides.reverse();

        let pad = shape.len() - operand_shape.len();
        let mut strides: SmallVec<[usize; 4]> = SmallVec::with_capacity(shape.len());
        for (i, &out_d) in shape.iter().enumerate() {
            if i < pad {
                strides.push(0);
            } else {
                let op_d = operand_shape[i - pad];
                if op_d == out_d {
                    strides.push(operand_strides[i - pad]);
                } else if op_d == 1 {
                    strides.push(0);
                } else {
                    return None;
                }
            }
        }

        Some(Self {
            shape: shape.iter().copied().collect(),
            strides,
        })
    }

    /// Identity mapping (operand has exactly the output shape)
    pub fn identity(shape: &[usize]) -> Self {
        Self::new(shape, shape).expect("identity mapping is always broadcastable")
    }

    /// Operand element offset for an output linear offset
    #[inline]
    pub fn get(&self, mut linear: usize) -> usize {
        let mut offset = 0usize;
        for d in (0..self.shape.len()).rev() {
            let size = self.shape[d];
            let coord = linear % size;
            linear /= size;
            offset += coord * self.strides[d];
        }
        offset
    }
}
