//! Buffer layout, location, and the `Buffer` type itself.

use serde::{Deserialize, Serialize};

use crate::capabilities::{FCAF_DEEP_CELL_SHAPE, FCAF_WIDE_CELL_SHAPE};
use crate::tensor::{DataType, Quantization, TensorShape};

/// Linear/tiled/compressed data layout tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Format {
    Nhwc,
    Nchw,
    /// Internal brick-group tiled format: 8x8 HW tiles, 16 channels/brick.
    Nhwcb,
    /// Fixed-cell activation-compression format, 8x8x32 cells.
    FcafDeep,
    /// Fixed-cell activation-compression format, 8x16x16 cells.
    FcafWide,
    /// Encoded weight stream (opaque to DMA, produced by the weight encoder).
    Weight,
}

impl Format {
    pub fn is_fcaf(&self) -> bool {
        matches!(self, Format::FcafDeep | Format::FcafWide)
    }

    pub fn fcaf_cell_shape(&self) -> Option<TensorShape> {
        match self {
            Format::FcafDeep => Some(FCAF_DEEP_CELL_SHAPE),
            Format::FcafWide => Some(FCAF_WIDE_CELL_SHAPE),
            _ => None,
        }
    }
}

/// Where the bytes physically live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Location {
    Dram,
    Sram,
    PleInputSram,
}

impl Location {
    pub fn is_sram(&self) -> bool {
        matches!(self, Location::Sram | Location::PleInputSram)
    }
}

/// Order in which stripes are traversed across a tensor's spatial/channel
/// axes. Only equality between two buffers' orders matters for
/// compatibility; the concrete ordering is opaque here since
/// the plan generator (an out-of-scope collaborator) is the only producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraversalOrder {
    Xyz,
    Xzy,
    Zxy,
}

/// A buffer in the internal op-graph: an activation/weight/intermediate
/// tensor together with its physical layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Buffer {
    pub location: Location,
    pub format: Format,
    pub tensor_shape: TensorShape,
    /// SRAM buffers record a per-stripe shape; DRAM buffers use the whole
    /// tensor shape here too (the invariant below enforces this).
    pub stripe_shape: TensorShape,
    pub traversal_order: TraversalOrder,
    pub size_bytes: u32,
    pub quantization: Quantization,
    pub data_type: DataType,
    pub constant_data: Option<Vec<u8>>,
    pub encoded_weights: Option<crate::weight_encoder::EncodedWeights>,
}

impl Buffer {
    /// Validate the buffer's own invariants:
    /// - DRAM buffers record whole-tensor layout (`stripe_shape == tensor_shape`).
    /// - FCAF-formatted buffers: every axis with >1 stripe is a whole
    ///   multiple of the cell shape on that axis.
    /// - NHWCB-formatted buffers: H and W must be multiples of 16 for any
    ///   DRAM access (only checked for DRAM buffers, since the constraint
    ///   is about DMA access granularity).
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.location == Location::Dram && self.stripe_shape != self.tensor_shape {
            return Err(format!(
                "DRAM buffer must record whole-tensor layout, got stripe {:?} != tensor {:?}",
                self.stripe_shape, self.tensor_shape
            ));
        }

        if self.format.is_fcaf() {
            let cell = self.format.fcaf_cell_shape().unwrap();
            if !is_compression_format_compatible_with_stripe_shape(
                self.format,
                self.stripe_shape,
                self.tensor_shape,
            ) {
                return Err(format!(
                    "FCAF buffer stripe shape {:?} is not a multiple of cell shape {:?} on a multi-stripe axis",
                    self.stripe_shape, cell
                ));
            }
        }

        if self.format == Format::Nhwcb && self.location == Location::Dram {
            if self.tensor_shape.h % 16 != 0 || self.tensor_shape.w % 16 != 0 {
                return Err(format!(
                    "NHWCB DRAM buffer height/width must be multiples of 16, got {}x{}",
                    self.tensor_shape.h, self.tensor_shape.w
                ));
            }
        }

        Ok(())
    }

    pub fn num_stripes(&self) -> u32 {
        num_stripes_total(self.tensor_shape, self.stripe_shape)
    }
}

fn div_round_up(numerator: u32, denominator: u32) -> u32 {
    (numerator + denominator - 1) / denominator
}

pub fn num_stripes_axis(tensor_axis: u32, stripe_axis: u32) -> u32 {
    div_round_up(tensor_axis, stripe_axis)
}

pub fn num_stripes_total(tensor_shape: TensorShape, stripe_shape: TensorShape) -> u32 {
    num_stripes_axis(tensor_shape.n, stripe_shape.n)
        * num_stripes_axis(tensor_shape.h, stripe_shape.h)
        * num_stripes_axis(tensor_shape.w, stripe_shape.w)
        * num_stripes_axis(tensor_shape.c, stripe_shape.c)
}

/// True iff for every axis where the tensor spans more than one stripe,
/// the stripe extent on that axis is a whole multiple of the compression
/// cell extent — a single stripe may be any size since there's nothing to
/// tile across.
pub fn is_compression_format_compatible_with_stripe_shape(
    format: Format,
    stripe_shape: TensorShape,
    dram_tensor_shape: TensorShape,
) -> bool {
    let cell_shape = match format.fcaf_cell_shape() {
        Some(c) => c,
        None => return false,
    };

    for dim in 0..4 {
        let num_stripes = num_stripes_axis(dram_tensor_shape.axis(dim), stripe_shape.axis(dim));
        if num_stripes > 1 && stripe_shape.axis(dim) % cell_shape.axis(dim) != 0 {
            return false;
        }
    }
    true
}
