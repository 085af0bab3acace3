//! Op and OpGraph.
//!
//! An arena of ops and buffers indexed by small integer IDs; no
//! back-references are stored inside either. Producer/consumer
//! relationships live in separate maps keyed by `BufferId` instead of a
//! cyclic pointer graph.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::buffer::Buffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OpId(pub u32);

/// MCE operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MceOperation {
    Convolution,
    DepthwiseConvolution,
    FullyConnected,
}

/// MCE convolution algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MceAlgorithm {
    Direct,
    Winograd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockConfig {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stride {
    pub x: u32,
    pub y: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Padding {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

/// PLE (programmable post-processing) operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PleOperation {
    Passthrough,
    AddMultiply,
    Pooling,
    Sigmoid,
    Relu,
    LeakyRelu,
    Softmax,
    Downsample2x2,
}

/// A header of fields shared by every op variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpHeader {
    /// Opaque user IDs from the front-end, propagated into perf reports.
    pub operation_ids: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    Dma {
        header: OpHeader,
    },
    Mce {
        header: OpHeader,
        op: MceOperation,
        algorithm: MceAlgorithm,
        block_config: BlockConfig,
        stride: Stride,
        padding: Padding,
    },
    Ple {
        header: OpHeader,
        op: PleOperation,
        block_config: BlockConfig,
    },
    /// An op that cannot be compiled for the MCE/PLE pipeline but can be
    /// estimated; propagated through so the estimator can report perf per
    /// operation ID rather than failing the whole compilation.
    EstimateOnly {
        header: OpHeader,
    },
}

impl Op {
    pub fn header(&self) -> &OpHeader {
        match self {
            Op::Dma { header }
            | Op::Mce { header, .. }
            | Op::Ple { header, .. }
            | Op::EstimateOnly { header } => header,
        }
    }

    pub fn header_mut(&mut self) -> &mut OpHeader {
        match self {
            Op::Dma { header }
            | Op::Mce { header, .. }
            | Op::Ple { header, .. }
            | Op::EstimateOnly { header } => header,
        }
    }

    pub fn is_estimate_only(&self) -> bool {
        matches!(self, Op::EstimateOnly { .. })
    }

    pub fn block_config(&self) -> Option<BlockConfig> {
        match self {
            Op::Mce { block_config, .. } | Op::Ple { block_config, .. } => Some(*block_config),
            _ => None,
        }
    }
}

/// An op's ordered list of input buffer references and single output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpNode {
    pub op: Op,
    pub inputs: Vec<BufferId>,
    pub output: BufferId,
}

/// A `(op, input slot index)` consumer reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Consumer {
    pub op: OpId,
    pub input_slot: u32,
}

/// Set of ops + set of buffers + producer map + consumer multimap + a
/// stable topological order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpGraph {
    ops: HashMap<OpId, OpNode>,
    buffers: HashMap<BufferId, Buffer>,
    producer: HashMap<BufferId, OpId>,
    consumers: HashMap<BufferId, Vec<Consumer>>,
    /// Buffers with no producer within this graph (external inputs).
    graph_inputs: std::collections::HashSet<BufferId>,
    topo_order: Vec<OpId>,
    next_buffer_id: u32,
    next_op_id: u32,
}

impl OpGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_buffer(&mut self, buffer: Buffer) -> BufferId {
        let id = BufferId(self.next_buffer_id);
        self.next_buffer_id += 1;
        self.buffers.insert(id, buffer);
        self.graph_inputs.insert(id);
        id
    }

    /// Insert an already-allocated buffer at a specific ID. Used by
    /// materialization when aliasing a buffer that already exists in a
    /// different graph — callers are responsible for keeping IDs
    /// dense via `next_buffer_id`.
    pub fn insert_buffer_with_id(&mut self, id: BufferId, buffer: Buffer) {
        self.buffers.insert(id, buffer);
        self.next_buffer_id = self.next_buffer_id.max(id.0 + 1);
        self.graph_inputs.insert(id);
    }

    pub fn add_op(&mut self, op: Op, inputs: Vec<BufferId>, output: Buffer) -> (OpId, BufferId) {
        let op_id = OpId(self.next_op_id);
        self.next_op_id += 1;
        let output_id = self.add_buffer(output);

        for (slot, &input) in inputs.iter().enumerate() {
            self.graph_inputs.remove(&input);
            self.consumers.entry(input).or_default().push(Consumer {
                op: op_id,
                input_slot: slot as u32,
            });
        }
        self.graph_inputs.remove(&output_id);
        self.producer.insert(output_id, op_id);
        self.ops.insert(
            op_id,
            OpNode {
                op,
                inputs,
                output: output_id,
            },
        );
        self.topo_order.push(op_id);
        (op_id, output_id)
    }

    /// Connect an already-created output buffer as the producer for `op`,
    /// used when materializing glue whose output op already exists and
    /// whose output buffer is supplied externally.
    pub fn set_producer(&mut self, buffer: BufferId, op: OpId) {
        self.producer.insert(buffer, op);
    }

    pub fn buffer(&self, id: BufferId) -> &Buffer {
        &self.buffers[&id]
    }

    pub fn buffer_mut(&mut self, id: BufferId) -> &mut Buffer {
        self.buffers.get_mut(&id).expect("buffer id must exist")
    }

    pub fn op(&self, id: OpId) -> &OpNode {
        &self.ops[&id]
    }

    pub fn op_mut(&mut self, id: OpId) -> &mut OpNode {
        self.ops.get_mut(&id).expect("op id must exist")
    }

    pub fn producer_of(&self, buffer: BufferId) -> Option<OpId> {
        self.producer.get(&buffer).copied()
    }

    pub fn consumers_of(&self, buffer: BufferId) -> &[Consumer] {
        self.consumers.get(&buffer).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn is_graph_input(&self, buffer: BufferId) -> bool {
        self.graph_inputs.contains(&buffer)
    }

    pub fn ops_in_topo_order(&self) -> impl Iterator<Item = (OpId, &OpNode)> {
        self.topo_order.iter().map(move |id| (*id, &self.ops[id]))
    }

    pub fn buffer_ids(&self) -> impl Iterator<Item = BufferId> + '_ {
        self.buffers.keys().copied()
    }

    pub fn num_ops(&self) -> usize {
        self.ops.len()
    }

    pub fn num_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Every op input must be a buffer in the graph; every buffer is
    /// produced by an op in the graph or is a graph-level input.
    pub fn check_invariants(&self) -> Result<(), String> {
        for (op_id, node) in &self.ops {
            for input in &node.inputs {
                if !self.buffers.contains_key(input) {
                    return Err(format!("op {op_id:?} references unknown buffer {input:?}"));
                }
            }
            if !self.buffers.contains_key(&node.output) {
                return Err(format!("op {op_id:?} produces unknown buffer {:?}", node.output));
            }
        }
        for buffer_id in self.buffers.keys() {
            let has_producer = self.producer.contains_key(buffer_id);
            let is_input = self.graph_inputs.contains(buffer_id);
            if !has_producer && !is_input {
                return Err(format!("buffer {buffer_id:?} has neither a producer nor is a graph input"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Format, Location, TraversalOrder};
    use crate::tensor::{DataType, Quantization, TensorShape};

    fn dummy_buffer() -> Buffer {
        Buffer {
            location: Location::Dram,
            format: Format::Nhwc,
            tensor_shape: TensorShape::new(1, 4, 4, 4),
            stripe_shape: TensorShape::new(1, 4, 4, 4),
            traversal_order: TraversalOrder::Xyz,
            size_bytes: 64,
            quantization: Quantization::PerTensor {
                zero_point: 0,
                scale: 1.0,
            },
            data_type: DataType::U8,
            constant_data: None,
            encoded_weights: None,
        }
    }

    #[test]
    fn fresh_buffer_is_a_graph_input_until_produced() {
        let mut g = OpGraph::new();
        let b = g.add_buffer(dummy_buffer());
        assert!(g.is_graph_input(b));

        let header = OpHeader::default();
        let (_op, out) = g.add_op(Op::Dma { header }, vec![b], dummy_buffer());
        assert!(!g.is_graph_input(b));
        assert!(!g.is_graph_input(out));
    }

    #[test]
    fn producer_and_consumer_maps_agree_with_add_op() {
        let mut g = OpGraph::new();
        let a = g.add_buffer(dummy_buffer());
        let (op_id, out) = g.add_op(Op::Dma { header: OpHeader::default() }, vec![a], dummy_buffer());
        assert_eq!(g.producer_of(out), Some(op_id));
        assert_eq!(g.consumers_of(a).len(), 1);
        assert_eq!(g.consumers_of(a)[0].op, op_id);
    }

    #[test]
    fn check_invariants_passes_for_well_formed_graph() {
        let mut g = OpGraph::new();
        let a = g.add_buffer(dummy_buffer());
        g.add_op(Op::Dma { header: OpHeader::default() }, vec![a], dummy_buffer());
        assert!(g.check_invariants().is_ok());
    }

    #[test]
    fn topo_order_preserves_insertion_order() {
        let mut g = OpGraph::new();
        let a = g.add_buffer(dummy_buffer());
        let (op1, b) = g.add_op(Op::Dma { header: OpHeader::default() }, vec![a], dummy_buffer());
        let (op2, _c) = g.add_op(Op::Dma { header: OpHeader::default() }, vec![b], dummy_buffer());
        let order: Vec<OpId> = g.ops_in_topo_order().map(|(id, _)| id).collect();
        assert_eq!(order, vec![op1, op2]);
    }
}
