//! Metadata construction: enumerate compatible `(src_plan, dst_plan,
//! glue)` triples for every edge in a graph of parts, in reverse
//! topological order so a part with no surviving successor drops out
//! before its predecessors are considered.

use std::collections::HashMap;

use crate::capabilities::Capabilities;
use crate::error::{CompileError, Result};
use crate::glue::{are_buffers_compatible, Glue};
use crate::part::{GraphOfParts, InputSlot, OutputSlot, PartId, PlanId};

/// One surviving `(src_plan, dst_plan, glue)` choice for a single edge.
#[derive(Debug, Clone)]
pub struct Triple {
    pub src_plan: PlanId,
    pub dst_plan: PlanId,
    pub glue: Glue,
    /// True when this triple was synthesized as the "back-to-DRAM"
    /// alternative to an otherwise-mergeable SRAM-to-SRAM pair.
    pub forced_dram_round_trip: bool,
}

/// All surviving triples for one outgoing edge, keyed by `(src_plan,
/// dst_plan)` so the combiner can look up whichever pair it's extending.
#[derive(Debug, Clone, Default)]
pub struct EdgeMetadata {
    pub triples: Vec<Triple>,
}

impl EdgeMetadata {
    pub fn triples_from(&self, src_plan: PlanId) -> impl Iterator<Item = &Triple> {
        self.triples.iter().filter(move |t| t.src_plan == src_plan)
    }
}

/// Metadata for the whole graph of parts: one `EdgeMetadata` per outgoing
/// edge, plus the set of `(part, plan)` pairs proven incompatible with
/// every successor so predecessors can skip them on the next pass.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub edges: HashMap<(OutputSlot, InputSlot), EdgeMetadata>,
    incompatible_plans: HashMap<PartId, Vec<PlanId>>,
}

impl Metadata {
    pub fn edge(&self, src: OutputSlot, dst: InputSlot) -> Option<&EdgeMetadata> {
        self.edges.get(&(src, dst))
    }

    pub fn is_incompatible(&self, part: PartId, plan: PlanId) -> bool {
        self.incompatible_plans
            .get(&part)
            .map(|v| v.contains(&plan))
            .unwrap_or(false)
    }

    fn mark_incompatible(&mut self, part: PartId, plan: PlanId) {
        self.incompatible_plans.entry(part).or_default().push(plan);
    }
}

/// A destination is forced to take its input from DRAM when the edge
/// branches (predecessor feeds more than one consumer) or the successor
/// itself needs more than one input: an SRAM buffer can't fan out
/// without forcing every consumer's stripe schedule into lockstep.
fn requires_dram_handoff(graph: &GraphOfParts, src: OutputSlot, dst: InputSlot) -> bool {
    graph.consumers_of(src).len() > 1 || graph.part(dst.part).num_inputs > 1
}

/// Build metadata for every edge in the graph, processing parts in
/// reverse topological order.
pub fn build_metadata(graph: &GraphOfParts, capabilities: &Capabilities) -> Result<Metadata> {
    let mut metadata = Metadata::default();
    let parts_reverse: Vec<PartId> = graph.parts_in_order().map(|p| p.id).rev().collect();

    for &part_id in &parts_reverse {
        let part = graph.part(part_id);
        let outgoing = graph.outgoing_edges(part_id);
        let is_terminal = outgoing.is_empty();

        if is_terminal {
            continue;
        }

        let mut any_plan_survives = false;

        for edge in &outgoing {
            let force_dram = requires_dram_handoff(graph, edge.src, edge.dst);
            let dst_part = graph.part(edge.dst.part);

            let mut edge_metadata = EdgeMetadata::default();

            for (src_plan_id, src_plan) in part.plans.iter().enumerate() {
                let src_plan_id = PlanId(src_plan_id as u32);
                if metadata.is_incompatible(part_id, src_plan_id) {
                    continue;
                }
                let Some(src_buffer_id) = src_plan.buffer_for_output_slot(edge.src) else {
                    continue;
                };
                let src_buffer = src_plan.graph.buffer(src_buffer_id);

                for (dst_plan_id, dst_plan) in dst_part.plans.iter().enumerate() {
                    let dst_plan_id = PlanId(dst_plan_id as u32);
                    if metadata.is_incompatible(edge.dst.part, dst_plan_id) {
                        continue;
                    }
                    let Some(dst_buffer_id) = dst_plan.buffer_for_input_slot(edge.dst) else {
                        continue;
                    };
                    let dst_buffer = dst_plan.graph.buffer(dst_buffer_id);

                    // a branching/fan-in edge can't hand off an
                    // empty-glue SRAM buffer directly — force the DRAM
                    // round-trip glue up front rather than considering the
                    // direct merge at all.
                    let result =
                        are_buffers_compatible(src_buffer, dst_buffer, true, force_dram, capabilities);
                    if !result.is_compatible {
                        continue;
                    }

                    let is_sram_to_sram_merge = !force_dram
                        && src_buffer.location.is_sram()
                        && dst_buffer.location.is_sram()
                        && result.glue.is_empty();

                    edge_metadata.triples.push(Triple {
                        src_plan: src_plan_id,
                        dst_plan: dst_plan_id,
                        glue: result.glue.clone(),
                        forced_dram_round_trip: force_dram,
                    });

                    // whenever a direct SRAM-to-SRAM merge survives,
                    // also emit the forced-round-trip alternative so the
                    // "DramOnly" search branch has something to grow from.
                    if is_sram_to_sram_merge {
                        let forced =
                            are_buffers_compatible(src_buffer, dst_buffer, true, true, capabilities);
                        if forced.is_compatible {
                            edge_metadata.triples.push(Triple {
                                src_plan: src_plan_id,
                                dst_plan: dst_plan_id,
                                glue: forced.glue,
                                forced_dram_round_trip: true,
                            });
                        }
                    }
                }
            }

            if edge_metadata.triples.is_empty() {
                // No plan pair survives this edge at all: every src plan on
                // this edge is dead since it has no way to reach dst.
                for (src_plan_id, _) in part.plans.iter().enumerate() {
                    metadata.mark_incompatible(part_id, PlanId(src_plan_id as u32));
                }
            } else {
                any_plan_survives = true;
            }

            metadata.edges.insert((edge.src, edge.dst), edge_metadata);
        }

        if !is_terminal && !any_plan_survives {
            return Err(CompileError::unsupported(
                format!("part {part_id:?} has no compatible plan for any outgoing edge"),
                Vec::new(),
            ));
        }
    }

    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Buffer, Format, Location, TraversalOrder};
    use crate::op::OpGraph;
    use crate::part::{Part, Plan};
    use crate::tensor::{DataType, Quantization, TensorShape};

    fn quant() -> Quantization {
        Quantization::PerTensor {
            zero_point: 0,
            scale: 1.0,
        }
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
        let mut plan0 = Plan::new(OpGraph::new());
        let b0 = plan0.graph.add_buffer(sram_buffer());
        plan0.map_output(b0, OutputSlot { part: PartId(0), slot: 0 });
        part0.add_plan(plan0);
        g.add_part(part0);

        let mut part1 = Part::new(PartId(1), 1, 0);
        let mut plan1 = Plan::new(OpGraph::new());
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
    fn linear_graph_yields_one_merge_triple_and_one_forced_round_trip() {
        let g = linear_graph();
        let metadata = build_metadata(&g, &Capabilities::default_profile()).unwrap();
        let edge = metadata
            .edge(
                OutputSlot { part: PartId(0), slot: 0 },
                InputSlot { part: PartId(1), slot: 0 },
            )
            .unwrap();
        assert_eq!(edge.triples.len(), 2);
        assert!(edge.triples.iter().any(|t| !t.forced_dram_round_trip));
        assert!(edge.triples.iter().any(|t| t.forced_dram_round_trip));
    }

    #[test]
    fn branching_edge_forces_dram_and_drops_empty_glue_merge() {
        let mut g = GraphOfParts::new();

        let mut part0 = Part::new(PartId(0), 0, 1);
        let mut plan0 = Plan::new(OpGraph::new());
        let b0 = plan0.graph.add_buffer(sram_buffer());
        plan0.map_output(b0, OutputSlot { part: PartId(0), slot: 0 });
        part0.add_plan(plan0);
        g.add_part(part0);

        for id in [1u32, 2] {
            let mut part = Part::new(PartId(id), 1, 0);
            let mut plan = Plan::new(OpGraph::new());
            let b = plan.graph.add_buffer(sram_buffer());
            plan.map_input(b, InputSlot { part: PartId(id), slot: 0 });
            part.add_plan(plan);
            g.add_part(part);
            g.connect(
                OutputSlot { part: PartId(0), slot: 0 },
                InputSlot { part: PartId(id), slot: 0 },
            );
        }

        let metadata = build_metadata(&g, &Capabilities::default_profile()).unwrap();
        let edge = metadata
            .edge(
                OutputSlot { part: PartId(0), slot: 0 },
                InputSlot { part: PartId(1), slot: 0 },
            )
            .unwrap();
        // The empty-glue direct merge is dropped; only the forced DRAM
        // round-trip triple (synthesized because glue becomes non-empty
        // once force_glue kicks in via the SRAM-SRAM branch) survives.
        assert!(edge.triples.iter().all(|t| !t.glue.is_empty()));
    }

    #[test]
    fn no_compatible_plan_on_non_terminal_part_is_unsupported() {
        let mut g = GraphOfParts::new();

        let mut part0 = Part::new(PartId(0), 0, 1);
        let mut plan0 = Plan::new(OpGraph::new());
        let b0 = plan0.graph.add_buffer(sram_buffer());
        plan0.map_output(b0, OutputSlot { part: PartId(0), slot: 0 });
        part0.add_plan(plan0);
        g.add_part(part0);

        let mut part1 = Part::new(PartId(1), 1, 0);
        let mut plan1 = Plan::new(OpGraph::new());
        let mut incompatible_buffer = sram_buffer();
        incompatible_buffer.tensor_shape = TensorShape::new(1, 3, 5, 7);
        let b1 = plan1.graph.add_buffer(incompatible_buffer);
        plan1.map_input(b1, InputSlot { part: PartId(1), slot: 0 });
        part1.add_plan(plan1);
        g.add_part(part1);

        g.connect(
            OutputSlot { part: PartId(0), slot: 0 },
            InputSlot { part: PartId(1), slot: 0 },
        );

        let result = build_metadata(&g, &Capabilities::default_profile());
        assert!(result.is_err());
    }
}
