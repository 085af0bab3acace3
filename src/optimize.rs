//! Redundant-copy elimination: a DMA glue pass can leave behind a
//! copy whose source and destination buffers are byte-for-byte the same
//! layout — most commonly a DRAM round-trip either side of which the
//! buffer never actually changed shape, format, or location. Collapse
//! those into a single shared buffer.

use std::collections::HashMap;

use crate::buffer::Buffer;
use crate::op::{BufferId, Op, OpGraph};

/// True iff `a` and `b` describe the exact same physical layout, ignoring
/// their constant payloads (a DMA never changes those, only where and how
/// the bytes are laid out).
fn buffers_content_equivalent(a: &Buffer, b: &Buffer) -> bool {
    a.location == b.location
        && a.format == b.format
        && a.tensor_shape == b.tensor_shape
        && a.stripe_shape == b.stripe_shape
        && a.traversal_order == b.traversal_order
        && a.size_bytes == b.size_bytes
        && a.quantization == b.quantization
        && a.data_type == b.data_type
}

/// Remove every DMA op whose input and output buffers are layout-identical
/// and whose input has no other consumer, rewriting downstream references
/// to read from the input buffer directly.
fn resolve(
    graph: &OpGraph,
    out: &mut OpGraph,
    alias: &mut HashMap<BufferId, BufferId>,
    original: BufferId,
) -> BufferId {
    *alias
        .entry(original)
        .or_insert_with(|| out.add_buffer(graph.buffer(original).clone()))
}

pub fn eliminate_redundant_dma(graph: &OpGraph) -> OpGraph {
    let mut out = OpGraph::new();
    let mut alias: HashMap<BufferId, BufferId> = HashMap::new();

    for (_, node) in graph.ops_in_topo_order() {
        let translated_inputs: Vec<BufferId> = node
            .inputs
            .iter()
            .map(|&b| resolve(graph, &mut out, &mut alias, b))
            .collect();

        let is_redundant = matches!(node.op, Op::Dma { .. })
            && node.inputs.len() == 1
            && graph.consumers_of(node.inputs[0]).len() == 1
            && buffers_content_equivalent(graph.buffer(node.inputs[0]), graph.buffer(node.output));

        if is_redundant {
            alias.insert(node.output, translated_inputs[0]);
            continue;
        }

        let (_, new_output) = out.add_op(node.op.clone(), translated_inputs, graph.buffer(node.output).clone());
        alias.insert(node.output, new_output);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Format, Location, TraversalOrder};
    use crate::op::OpHeader;
    use crate::tensor::{DataType, Quantization, TensorShape};

    fn dram_buffer() -> Buffer {
        Buffer {
            location: Location::Dram,
            format: Format::Nhwc,
            tensor_shape: TensorShape::new(1, 8, 8, 8),
            stripe_shape: TensorShape::new(1, 8, 8, 8),
            traversal_order: TraversalOrder::Xyz,
            size_bytes: 512,
            quantization: Quantization::PerTensor { zero_point: 0, scale: 1.0 },
            data_type: DataType::U8,
            constant_data: None,
            encoded_weights: None,
        }
    }

    #[test]
    fn identical_layout_dma_is_removed_and_aliased() {
        let mut g = OpGraph::new();
        let a = g.add_buffer(dram_buffer());
        let (_, mid) = g.add_op(Op::Dma { header: OpHeader::default() }, vec![a], dram_buffer());
        g.add_op(Op::Dma { header: OpHeader::default() }, vec![mid], dram_buffer());

        let optimized = eliminate_redundant_dma(&g);
        assert_eq!(optimized.num_ops(), 0);
        assert_eq!(optimized.num_buffers(), 1);
    }

    #[test]
    fn dma_with_multiple_consumers_on_its_input_is_kept() {
        let mut g = OpGraph::new();
        let a = g.add_buffer(dram_buffer());
        g.add_op(Op::Dma { header: OpHeader::default() }, vec![a], dram_buffer());
        g.add_op(Op::Dma { header: OpHeader::default() }, vec![a], dram_buffer());

        let optimized = eliminate_redundant_dma(&g);
        assert_eq!(optimized.num_ops(), 2);
    }

    #[test]
    fn dma_that_changes_layout_is_kept() {
        let mut g = OpGraph::new();
        let a = g.add_buffer(dram_buffer());
        let mut reshaped = dram_buffer();
        reshaped.format = Format::Nhwcb;
        reshaped.tensor_shape = TensorShape::new(1, 16, 16, 16);
        reshaped.stripe_shape = reshaped.tensor_shape;
        g.add_op(Op::Dma { header: OpHeader::default() }, vec![a], reshaped);

        let optimized = eliminate_redundant_dma(&g);
        assert_eq!(optimized.num_ops(), 1);
    }
}
