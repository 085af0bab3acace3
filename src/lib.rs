//! Compiler core that lowers a graph of parts into a scheduled,
//! buffer-assigned op-graph ready for command-stream serialization.
//!
//! The pipeline: metadata construction enumerates compatible
//! `(plan, glue)` triples per edge, the combiner searches those triples
//! for the best whole-graph combination, materialization flattens that
//! combination into one op-graph, the optimizer removes redundant DMAs,
//! and the buffer manager assigns final DRAM offsets. Weight encoding
//! runs independently, per plan, wherever a plan's buffer carries
//! constant weight data.

pub mod buffer;
pub mod buffer_manager;
pub mod capabilities;
pub mod codegen;
pub mod combiner;
pub mod config;
pub mod error;
pub mod estimator;
pub mod frontend;
pub mod glue;
pub mod materialize;
pub mod metadata;
pub mod op;
pub mod optimize;
pub mod part;
pub mod tensor;
pub mod threadpool;
pub mod weight_encoder;

use tracing::info;

use buffer_manager::{BufferRequest, DramLayout};
use capabilities::Capabilities;
use combiner::Combination;
use config::CompilationOptions;
use error::Result;
use estimator::Estimator;
use op::OpGraph;
use part::GraphOfParts;

/// Everything the pipeline in this crate produces for a graph of parts.
/// Command-stream bytes themselves come from an out-of-scope
/// [`CommandStreamSerializer`](codegen::CommandStreamSerializer).
#[derive(Debug, Clone)]
pub struct CompilationResult {
    pub combination: Combination,
    pub op_graph: OpGraph,
    pub dram_layout: DramLayout,
}

/// Run the full pipeline short of command-stream serialization: build
/// metadata, search for the best combination, materialize and optimize
/// the op-graph, then lay out DRAM. `buffer_requests` classifies each
/// materialized buffer by category and lifetime for the buffer manager —
/// producing that classification from the op-graph's producer/consumer
/// structure is the caller's job, since it depends on which buffers are
/// network inputs/outputs versus purely internal.
pub fn compile(
    graph: &GraphOfParts,
    capabilities: &Capabilities,
    options: &CompilationOptions,
    estimator: &dyn Estimator,
    buffer_requests: impl Fn(&OpGraph) -> Vec<BufferRequest>,
) -> Result<CompilationResult> {
    graph
        .verify_topological_order()
        .map_err(|reason| error::CompileError::unsupported(reason, Vec::new()))?;

    info!(num_parts = graph.num_parts(), "building metadata");
    let meta = metadata::build_metadata(graph, capabilities)?;

    info!("searching for the best combination");
    let combination = combiner::drive_combiner(graph, &meta, capabilities, estimator, &materialize::materialize)?;

    info!(num_elements = combination.elements.len(), "materializing op-graph");
    let raw = materialize::materialize(graph, &combination);

    info!(num_ops = raw.num_ops(), "eliminating redundant DMAs");
    let optimized = optimize::eliminate_redundant_dma(&raw);

    let requests = buffer_requests(&optimized);
    info!(num_buffers = requests.len(), "planning DRAM layout");
    let dram_layout = buffer_manager::plan_dram_layout(&requests, options.debug_disable_buffer_reuse);

    if let Some(dir) = &options.debug_dump_dir {
        dump_json(dir, "op_graph.json", &optimized);
        dump_json(dir, "dram_layout.json", &dram_layout);
    }

    Ok(CompilationResult {
        combination,
        op_graph: optimized,
        dram_layout,
    })
}

fn dump_json(dir: &std::path::Path, file_name: &str, value: &impl serde::Serialize) {
    if let Err(err) = std::fs::create_dir_all(dir).and_then(|_| {
        let text = serde_json::to_string_pretty(value).expect("dump targets always serialize");
        std::fs::write(dir.join(file_name), text)
    }) {
        tracing::warn!(%err, file_name, "failed to write debug dump");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Buffer, Format, Location, TraversalOrder};
    use crate::op::OpGraph as Graph;
    use crate::part::{InputSlot, OutputSlot, Part, PartId, Plan};
    use crate::tensor::{DataType, Quantization, TensorShape};

    fn quant() -> Quantization {
        Quantization::PerTensor { zero_point: 0, scale: 1.0 }
    }

    fn sram_buffer() -> Buffer {
        Buffer {
            location: Location::Sram,
            format: Format::Nhwcb,
            tensor_shape: TensorShape::new(1, 16, 16, 16),
            stripe_shape: TensorShape::new(1, 16, 16, 16),
            traversal_order: TraversalOrder::Xyz,
            size_bytes: 16 * 16 * 16,
            quantization: quant(),
            data_type: DataType::U8,
            constant_data: None,
            encoded_weights: None,
        }
    }

    fn linear_graph() -> GraphOfParts {
        let mut g = GraphOfParts::new();

        let mut part0 = Part::new(PartId(0), 0, 1);
        let mut plan0 = Plan::new(Graph::new());
        let b0 = plan0.graph.add_buffer(sram_buffer());
        plan0.map_output(b0, OutputSlot { part: PartId(0), slot: 0 });
        part0.add_plan(plan0);
        g.add_part(part0);

        let mut part1 = Part::new(PartId(1), 1, 0);
        let mut plan1 = Plan::new(Graph::new());
        let b1 = plan1.graph.add_buffer(sram_buffer());
        plan1.map_input(b1, InputSlot { part: PartId(1), slot: 0 });
        part1.add_plan(plan1);
        g.add_part(part1);

        g.connect(
            OutputSlot { part: PartId(0), slot: 0 },
            InputSlot { part: PartId(1), slot: 0 },
        );
        g
    }

    #[test]
    fn compile_runs_the_whole_pipeline_end_to_end() {
        let g = linear_graph();
        let caps = Capabilities::default_profile();
        let options = CompilationOptions::default();
        let est = estimator::OpCountEstimator;

        let result = compile(&g, &caps, &options, &est, |_| Vec::new()).unwrap();
        assert!(result.combination.is_complete(&g));
    }

    #[test]
    fn debug_dump_dir_writes_op_graph_and_layout() {
        let dir = tempfile::tempdir().unwrap();
        let g = linear_graph();
        let caps = Capabilities::default_profile();
        let options = CompilationOptions {
            debug_dump_dir: Some(dir.path().to_path_buf()),
            ..CompilationOptions::default()
        };
        let est = estimator::OpCountEstimator;

        compile(&g, &caps, &options, &est, |_| Vec::new()).unwrap();

        assert!(dir.path().join("op_graph.json").exists());
        assert!(dir.path().join("dram_layout.json").exists());
    }
}
