//! Tensor shape, quantization, and element data type.

use serde::{Deserialize, Serialize};

/// `(N, H, W, C)`. `N` is always 1 for activations; weight tensors reuse
/// this 4-tuple for `(H, W, I, O)` (HWIO) or `(H, W, I, M)` (HWIM) layouts,
/// with the unused slot holding whichever of H/N is not meaningful for
/// that interpretation — callers that need HWIO/HWIM semantics go through
/// [`WeightLayout`](crate::weight_encoder::WeightLayout) rather than this
/// struct's field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorShape {
    pub n: u32,
    pub h: u32,
    pub w: u32,
    pub c: u32,
}

impl TensorShape {
    pub const fn new(n: u32, h: u32, w: u32, c: u32) -> Self {
        TensorShape { n, h, w, c }
    }

    pub fn num_elements(&self) -> u64 {
        self.n as u64 * self.h as u64 * self.w as u64 * self.c as u64
    }

    /// Index into the 4-tuple by axis (0=N, 1=H, 2=W, 3=C).
    pub fn axis(&self, dim: usize) -> u32 {
        match dim {
            0 => self.n,
            1 => self.h,
            2 => self.w,
            3 => self.c,
            _ => panic!("tensor shape axis out of range: {dim}"),
        }
    }

    pub fn axes(&self) -> [u32; 4] {
        [self.n, self.h, self.w, self.c]
    }
}

/// Element data type. `I32` is used for biases only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    U8,
    I8,
    I32,
}

impl DataType {
    pub fn size_bytes(&self) -> u32 {
        match self {
            DataType::U8 | DataType::I8 => 1,
            DataType::I32 => 4,
        }
    }
}

/// Per-tensor or per-channel quantization parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Quantization {
    PerTensor { zero_point: i32, scale: f32 },
    /// Per-channel scales along `axis`.
    PerChannel {
        zero_point: i32,
        scales: Vec<f32>,
        axis: usize,
    },
}

impl Quantization {
    pub fn zero_point(&self) -> i32 {
        match self {
            Quantization::PerTensor { zero_point, .. } => *zero_point,
            Quantization::PerChannel { zero_point, .. } => *zero_point,
        }
    }

    /// The scale to use for a given output channel index. Per-tensor
    /// quantization ignores `channel`.
    pub fn scale_for_channel(&self, channel: usize) -> f32 {
        match self {
            Quantization::PerTensor { scale, .. } => *scale,
            Quantization::PerChannel { scales, .. } => scales[channel],
        }
    }

    /// Quantization differences alone never require glue:
    /// two buffers that differ only in quantization metadata are still a
    /// free reinterpretation of the same bytes.
    pub fn is_reinterpretable_as(&self, _other: &Quantization) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn num_elements_multiplies_all_axes() {
        let shape = TensorShape::new(1, 4, 8, 16);
        assert_eq!(shape.num_elements(), 1 * 4 * 8 * 16);
    }

    #[test]
    fn axis_indexing_matches_nhwc_order() {
        let shape = TensorShape::new(1, 2, 3, 4);
        assert_eq!(shape.axis(0), 1);
        assert_eq!(shape.axis(1), 2);
        assert_eq!(shape.axis(2), 3);
        assert_eq!(shape.axis(3), 4);
    }

    #[test]
    fn per_channel_scale_indexes_by_channel() {
        let q = Quantization::PerChannel {
            zero_point: 0,
            scales: vec![0.1, 0.2, 0.3],
            axis: 3,
        };
        assert_eq!(q.scale_for_channel(1), 0.2);
    }

    #[test]
    fn quantization_always_reinterpretable() {
        let a = Quantization::PerTensor {
            zero_point: 0,
            scale: 1.0,
        };
        let b = Quantization::PerTensor {
            zero_point: 5,
            scale: 2.0,
        };
        assert!(a.is_reinterpretable_as(&b));
    }
}
