use criterion::{criterion_group, criterion_main, Criterion};

use npu_compile::buffer::{Buffer, Format, Location, TraversalOrder};
use npu_compile::capabilities::Capabilities;
use npu_compile::combiner::drive_combiner;
use npu_compile::estimator::OpCountEstimator;
use npu_compile::materialize::materialize;
use npu_compile::metadata::build_metadata;
use npu_compile::op::OpGraph;
use npu_compile::part::{GraphOfParts, InputSlot, OutputSlot, Part, PartId, Plan};
use npu_compile::tensor::{DataType, Quantization, TensorShape};

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

/// A chain of `num_parts` single-input/single-output parts, each with
/// `plans_per_part` interchangeable plans, to stress the combiner's
/// growth/prune loop.
fn chain_graph(num_parts: u32, plans_per_part: u32) -> GraphOfParts {
    let mut g = GraphOfParts::new();

    for id in 0..num_parts {
        let num_inputs = if id == 0 { 0 } else { 1 };
        let num_outputs = if id + 1 == num_parts { 0 } else { 1 };
        let mut part = Part::new(PartId(id), num_inputs, num_outputs);

        for _ in 0..plans_per_part {
            let mut plan = Plan::new(OpGraph::new());
            let buf = plan.graph.add_buffer(sram_buffer());
            if num_inputs > 0 {
                plan.map_input(buf, InputSlot { part: PartId(id), slot: 0 });
            }
            if num_outputs > 0 {
                plan.map_output(buf, OutputSlot { part: PartId(id), slot: 0 });
            }
            part.add_plan(plan);
        }
        g.add_part(part);

        if id > 0 {
            g.connect(
                OutputSlot { part: PartId(id - 1), slot: 0 },
                InputSlot { part: PartId(id), slot: 0 },
            );
        }
    }
    g
}

fn bench_combiner(c: &mut Criterion) {
    let graph = chain_graph(6, 3);
    let caps = Capabilities::default_profile();
    let metadata = build_metadata(&graph, &caps).unwrap();
    let estimator = OpCountEstimator;

    c.bench_function("combiner_search_6_parts_3_plans", |b| {
        b.iter(|| drive_combiner(&graph, &metadata, &caps, &estimator, &materialize).unwrap());
    });
}

criterion_group!(benches, bench_combiner);
criterion_main!(benches);
