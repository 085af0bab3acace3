//! Front-end visitor interface: the network of user-facing
//! `Operation`s this crate lowers into a [`GraphOfParts`](crate::part::GraphOfParts)
//! is produced by an out-of-scope collaborator. Only the interface shape
//! and the supported/estimate-only/unsupported query it must answer are
//! specified here.

use crate::error::Result;
use crate::tensor::{DataType, Quantization, TensorShape};

/// A single user-visible tensor operand: shape, data type, and
/// quantization as seen by the front-end before any internal buffer
/// layout has been chosen.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    pub shape: TensorShape,
    pub data_type: DataType,
    pub quantization: Quantization,
}

/// The front-end's verdict on whether it can map a given operation onto
/// this hardware at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportQuery {
    Supported,
    EstimateOnly,
    Unsupported,
}

/// One user operation as the front-end visitor presents it. Op-specific
/// parameters are intentionally left to the collaborator implementing
/// this trait — this crate only needs the operand tensors and operation
/// IDs to build a part graph.
pub trait UserOperation {
    fn inputs(&self) -> &[TensorInfo];
    fn outputs(&self) -> &[TensorInfo];
    fn operation_ids(&self) -> &[u32];
    fn is_supported(&self) -> SupportQuery;
}

/// Lower a sequence of front-end operations into a graph of parts. The
/// concrete visitor (one method per operator kind, or a single-pass
/// translator) lives with the front-end; this crate only consumes its
/// output.
pub trait NetworkLowering {
    fn lower(&self, operations: &[Box<dyn UserOperation>]) -> Result<crate::part::GraphOfParts>;
}
