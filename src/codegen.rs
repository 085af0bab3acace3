//! Command-stream serializer interface: turns a materialized,
//! buffer-assigned op-graph into the opaque byte blob the hardware
//! consumes. The concrete encoder is an out-of-scope collaborator; this
//! crate only defines the produced-artifact shape.

use crate::op::OpGraph;

/// `{id, offset, size, source_operation_id, source_operation_output_index, debug_name}`
/// for one input or output buffer. IDs are contiguous across types
/// starting at 0 but not contiguous within a type.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferLayoutEntry {
    pub id: u32,
    pub offset: u32,
    pub size: u32,
    pub source_operation_id: u32,
    pub source_operation_output_index: u32,
    pub debug_name: String,
}

/// The two concatenated constant blobs: weights/biases/PLE microcode,
/// and the command stream plus inline constants.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantBlobs {
    pub constant_dma: Vec<u8>,
    pub constant_control_unit: Vec<u8>,
}

/// Everything a compilation produces for the runtime to load. Buffer
/// ID 0 is always the command stream itself.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledArtifact {
    pub command_stream: Vec<u8>,
    pub constants: ConstantBlobs,
    pub buffer_layout: Vec<BufferLayoutEntry>,
    pub intermediate_total_size: u32,
}

pub trait CommandStreamSerializer {
    fn serialize(&self, graph: &OpGraph) -> CompiledArtifact;
}
