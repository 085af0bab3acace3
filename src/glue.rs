//! Plan compatibility and glue synthesis.
//!
//! Glue is only ever allowed to introduce DMAs and temporary DRAM
//! buffers, never reshape logic — a shape mismatch that isn't a pure
//! reinterpretation of a full NHWC tensor makes two plans flatly
//! incompatible rather than triggering glue synthesis.

use crate::buffer::{is_compression_format_compatible_with_stripe_shape, Buffer, Format, Location};
use crate::capabilities::Capabilities;
use crate::op::{Op, OpGraph, OpHeader, OpId};

/// The op-graph inserted between two plans to make their buffers
/// compatible. Empty glue (`graph` has no ops) means the buffers are
/// shared directly.
#[derive(Debug, Clone, Default)]
pub struct Glue {
    pub graph: OpGraph,
    /// The op (and which of its inputs) that must be connected to the
    /// predecessor's output buffer. `None` when the glue is empty.
    pub input_slot: Option<(OpId, u32)>,
    /// The op whose output must be connected to the successor's mapped
    /// input buffer. `None` when the glue is empty.
    pub output: Option<OpId>,
}

impl Glue {
    pub fn is_empty(&self) -> bool {
        self.graph.num_ops() == 0
    }
}

#[derive(Debug, Clone)]
pub struct PlanCompatibilityResult {
    pub is_compatible: bool,
    pub requires_glue: bool,
    pub glue: Glue,
}

impl PlanCompatibilityResult {
    fn incompatible() -> Self {
        PlanCompatibilityResult {
            is_compatible: false,
            requires_glue: false,
            glue: Glue::default(),
        }
    }

    fn compatible_empty() -> Self {
        PlanCompatibilityResult {
            is_compatible: true,
            requires_glue: false,
            glue: Glue::default(),
        }
    }

    fn compatible_with_glue(glue: Glue) -> Self {
        PlanCompatibilityResult {
            is_compatible: true,
            requires_glue: true,
            glue,
        }
    }
}

/// A pure reinterpretation: same element count, and either the shapes are
/// equal or both are whole-tensor NHWC (linear, no tiling) so a DMA
/// round-trip can simply copy bytes without a reshape kernel.
fn is_pure_reinterpret(src: &Buffer, dst: &Buffer) -> bool {
    if src.tensor_shape == dst.tensor_shape {
        return true;
    }
    let same_elements = src.tensor_shape.num_elements() == dst.tensor_shape.num_elements();
    let both_linear_nhwc = matches!(src.format, Format::Nhwc) && matches!(dst.format, Format::Nhwc);
    same_elements && both_linear_nhwc
}

/// Compatible with empty glue iff both buffers agree on
/// location, format, stripe shape, traversal order, size, and stripe
/// count, and no MCE-accumulator-depth or block-config constraint is
/// violated by merging.
fn is_trivially_compatible(src: &Buffer, dst: &Buffer, block_config_ok: bool) -> bool {
    src.location == dst.location
        && src.format == dst.format
        && src.stripe_shape == dst.stripe_shape
        && src.traversal_order == dst.traversal_order
        && src.size_bytes == dst.size_bytes
        && src.num_stripes() == dst.num_stripes()
        && block_config_ok
}

/// Choose the strongest FCAF variant compatible with both sides' stripe
/// shapes (the intersection of per-side admissible formats); fall back to
/// NHWCB if neither FCAF variant fits.
fn choose_dram_format(src: &Buffer, dst: &Buffer) -> Format {
    for candidate in [Format::FcafDeep, Format::FcafWide] {
        let src_ok =
            is_compression_format_compatible_with_stripe_shape(candidate, src.stripe_shape, src.tensor_shape);
        let dst_ok =
            is_compression_format_compatible_with_stripe_shape(candidate, dst.stripe_shape, dst.tensor_shape);
        if src_ok && dst_ok {
            return candidate;
        }
    }
    Format::Nhwcb
}

fn dma_buffer_from(template: &Buffer, location: Location, format: Format) -> Buffer {
    Buffer {
        location,
        format,
        tensor_shape: template.tensor_shape,
        stripe_shape: if location == Location::Dram {
            template.tensor_shape
        } else {
            template.stripe_shape
        },
        traversal_order: template.traversal_order,
        size_bytes: template.size_bytes,
        quantization: template.quantization.clone(),
        data_type: template.data_type,
        constant_data: None,
        encoded_weights: None,
    }
}

/// A destination-side SRAM buffer being written out by glue must have at
/// most 2 stripes (double buffering).
pub fn respects_double_buffering_rule(sram_side: &Buffer) -> bool {
    sram_side.location != Location::Sram || sram_side.num_stripes() <= 2
}

/// Synthesize a single-DMA glue between an SRAM buffer and a DRAM buffer.
fn single_dma_glue(src: &Buffer, dst_template: &Buffer, dst_location: Location) -> Glue {
    let mut graph = OpGraph::new();
    let input_buffer = graph.add_buffer(src.clone());
    let output_buffer = dma_buffer_from(dst_template, dst_location, dst_template.format);
    let (op_id, _out) = graph.add_op(
        Op::Dma {
            header: OpHeader::default(),
        },
        vec![input_buffer],
        output_buffer,
    );
    Glue {
        graph,
        input_slot: Some((op_id, 0)),
        output: Some(op_id),
    }
}

/// Synthesize a DMA-out/DMA-in glue through a freshly allocated DRAM
/// buffer for an SRAM->SRAM (non-equivalent) transition.
fn sram_to_sram_glue(src: &Buffer, dst: &Buffer) -> Glue {
    let dram_format = choose_dram_format(src, dst);
    let mut graph = OpGraph::new();

    let sram_in = graph.add_buffer(src.clone());
    let dram_buffer = dma_buffer_from(src, Location::Dram, dram_format);
    let (dma_out_op, dram_id) = graph.add_op(
        Op::Dma {
            header: OpHeader::default(),
        },
        vec![sram_in],
        dram_buffer,
    );

    let sram_out_template = dma_buffer_from(dst, Location::Sram, dst.format);
    let (dma_in_op, _sram_out_id) = graph.add_op(
        Op::Dma {
            header: OpHeader::default(),
        },
        vec![dram_id],
        sram_out_template,
    );

    Glue {
        graph,
        input_slot: Some((dma_out_op, 0)),
        output: Some(dma_in_op),
    }
}

/// Determine compatibility between a source plan's output buffer
/// and a destination plan's input buffer, synthesizing glue as needed.
/// `force_glue` forces a DRAM round-trip even when a direct SRAM->SRAM
/// merge would otherwise be trivially compatible.
pub fn are_buffers_compatible(
    src: &Buffer,
    dst: &Buffer,
    block_config_ok: bool,
    force_glue: bool,
    _capabilities: &Capabilities,
) -> PlanCompatibilityResult {
    if !is_pure_reinterpret(src, dst) {
        return PlanCompatibilityResult::incompatible();
    }

    if !force_glue && is_trivially_compatible(src, dst, block_config_ok) {
        return PlanCompatibilityResult::compatible_empty();
    }

    match (src.location, dst.location) {
        (Location::Dram, sram) if sram.is_sram() => {
            PlanCompatibilityResult::compatible_with_glue(single_dma_glue(src, dst, dst.location))
        }
        (sram, Location::Dram) if sram.is_sram() => {
            if !respects_double_buffering_rule(src) {
                return PlanCompatibilityResult::incompatible();
            }
            PlanCompatibilityResult::compatible_with_glue(single_dma_glue(src, dst, Location::Dram))
        }
        (src_loc, dst_loc) if src_loc.is_sram() && dst_loc.is_sram() => {
            PlanCompatibilityResult::compatible_with_glue(sram_to_sram_glue(src, dst))
        }
        (Location::Dram, Location::Dram) => {
            // Two DRAM buffers that reach here disagree on format/shape
            // in a reinterpretable way (e.g. quantization only, or whole
            // element count match) — wire a straight DMA since a DRAM
            // buffer can't directly alias another DRAM buffer's bytes
            // under a different physical layout.
            PlanCompatibilityResult::compatible_with_glue(single_dma_glue(src, dst, Location::Dram))
        }
        _ => PlanCompatibilityResult::incompatible(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::TraversalOrder;
    use crate::tensor::{DataType, Quantization, TensorShape};

    fn quant() -> Quantization {
        Quantization::PerTensor {
            zero_point: 0,
            scale: 1.0,
        }
    }

    fn sram_buffer(stripe_h: u32, num_stripes_h: u32) -> Buffer {
        let h = stripe_h * num_stripes_h;
        Buffer {
            location: Location::Sram,
            format: Format::Nhwcb,
            tensor_shape: TensorShape::new(1, h, 16, 16),
            stripe_shape: TensorShape::new(1, stripe_h, 16, 16),
            traversal_order: TraversalOrder::Xyz,
            size_bytes: stripe_h * 16 * 16,
            quantization: quant(),
            data_type: DataType::U8,
            constant_data: None,
            encoded_weights: None,
        }
    }

    fn caps() -> Capabilities {
        Capabilities::default_profile()
    }

    #[test]
    fn identical_buffers_are_compatible_with_empty_glue() {
        let a = sram_buffer(8, 2);
        let b = a.clone();
        let result = are_buffers_compatible(&a, &b, true, false, &caps());
        assert!(result.is_compatible);
        assert!(!result.requires_glue);
        assert!(result.glue.is_empty());
    }

    #[test]
    fn quantization_only_difference_is_free_reinterpret() {
        let a = sram_buffer(8, 2);
        let mut b = a.clone();
        b.quantization = Quantization::PerTensor {
            zero_point: 5,
            scale: 2.0,
        };
        let result = are_buffers_compatible(&a, &b, true, false, &caps());
        assert!(result.is_compatible);
        assert!(!result.requires_glue);
    }

    #[test]
    fn block_config_mismatch_forces_glue_not_rejection() {
        let a = sram_buffer(8, 2);
        let b = a.clone();
        let result = are_buffers_compatible(&a, &b, false, false, &caps());
        assert!(result.is_compatible);
        assert!(result.requires_glue);
    }

    #[test]
    fn sram_to_sram_mismatch_synthesizes_dram_round_trip() {
        let a = sram_buffer(8, 2);
        let mut b = sram_buffer(4, 4);
        b.tensor_shape = a.tensor_shape;
        let result = are_buffers_compatible(&a, &b, true, false, &caps());
        assert!(result.is_compatible);
        assert!(result.requires_glue);
        assert_eq!(result.glue.graph.num_ops(), 2); // dma-out, dma-in
    }

    #[test]
    fn incompatible_shape_mismatch_is_rejected() {
        let a = sram_buffer(8, 2);
        let mut b = sram_buffer(8, 2);
        b.tensor_shape = TensorShape::new(1, 99, 17, 3);
        let result = are_buffers_compatible(&a, &b, true, false, &caps());
        assert!(!result.is_compatible);
    }

    #[test]
    fn force_glue_on_otherwise_trivial_pair_still_synthesizes_glue() {
        let a = sram_buffer(8, 2);
        let b = a.clone();
        let result = are_buffers_compatible(&a, &b, true, true, &caps());
        assert!(result.is_compatible);
        assert!(result.requires_glue);
    }

    #[test]
    fn double_buffering_rule_rejects_more_than_two_sram_stripes_on_writeout() {
        let src = sram_buffer(4, 3); // 3 stripes: violates <=2 rule when writing out
        let dst = {
            let mut b = sram_buffer(4, 1);
            b.location = Location::Dram;
            b.stripe_shape = b.tensor_shape;
            b
        };
        let result = are_buffers_compatible(&src, &dst, true, false, &caps());
        assert!(!result.is_compatible);
    }

    #[test]
    fn double_buffering_rule_does_not_apply_to_dram_to_sram_writein() {
        let src = {
            let mut b = sram_buffer(4, 1);
            b.location = Location::Dram;
            b.stripe_shape = b.tensor_shape;
            b
        };
        let dst = sram_buffer(4, 3); // 3 stripes on the read-in side: no rule to violate
        let result = are_buffers_compatible(&src, &dst, true, false, &caps());
        assert!(result.is_compatible);
    }
}
