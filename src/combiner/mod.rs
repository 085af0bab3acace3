//! Combiner: grows candidate combinations of `(plan, glue)`
//! choices across the graph of parts, pruning to the single best
//! combination by estimated cost at each growth wave.

pub mod sram_allocator;

use std::collections::HashMap;

use crate::capabilities::Capabilities;
use crate::error::{CompileError, Result};
use crate::estimator::{EstimateMetric, Estimator};
use crate::glue::Glue;
use crate::metadata::{Metadata, Triple};
use crate::op::OpGraph;
use crate::part::{GraphOfParts, InputSlot, PartId, PlanId};
use sram_allocator::{Preference, SramAllocator};

/// Scheme filter applied while extending a combination onto its next part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Only accept extensions whose source output stays in SRAM with
    /// empty glue (a true merge).
    MergeOnly,
    /// Only accept extensions that are NOT an SRAM merge (glue present or
    /// source forced to DRAM).
    DramOnly,
    Any,
}

/// The chosen plan for one part, plus the glue selected for each of its
/// incoming edges.
#[derive(Debug, Clone)]
pub struct Element {
    pub plan: PlanId,
    pub incoming_glue: HashMap<InputSlot, Glue>,
}

/// An ordered list of `(plan, per-edge glue)` choices across all parts,
/// plus the SRAM allocator state and score accumulated while growing it.
#[derive(Debug, Clone)]
pub struct Combination {
    pub elements: HashMap<PartId, Element>,
    pub sram: SramAllocator,
    pub score: u32,
}

impl Combination {
    fn new(sram_capacity: u32) -> Self {
        Combination {
            elements: HashMap::new(),
            sram: SramAllocator::new(sram_capacity),
            score: 0,
        }
    }

    pub fn is_complete(&self, graph: &GraphOfParts) -> bool {
        graph.num_parts() == self.elements.len()
    }

    pub fn plan_for(&self, part: PartId) -> Option<PlanId> {
        self.elements.get(&part).map(|e| e.plan)
    }
}

fn sram_capacity_per_bank(capabilities: &Capabilities) -> u32 {
    capabilities.total_sram_bytes() / capabilities.num_srams().max(1)
}

fn scheme_accepts(scheme: Scheme, is_merge: bool) -> bool {
    match scheme {
        Scheme::MergeOnly => is_merge,
        Scheme::DramOnly => !is_merge,
        Scheme::Any => true,
    }
}

/// Seed combinations from every compatible plan on the first part's
/// first outgoing edge.
pub fn create_seeds(
    graph: &GraphOfParts,
    metadata: &Metadata,
    capabilities: &Capabilities,
) -> Vec<Combination> {
    let Some(first_part) = graph.parts_in_order().next() else {
        return Vec::new();
    };
    let outgoing = graph.outgoing_edges(first_part.id);
    let Some(first_edge) = outgoing.first() else {
        // A graph of parts with a single, output-less part: seed with
        // every plan directly.
        return first_part
            .plans
            .iter()
            .enumerate()
            .map(|(idx, plan)| {
                let mut combination = Combination::new(sram_capacity_per_bank(capabilities));
                let demand = plan.total_sram_bytes() / capabilities.num_srams().max(1);
                combination.sram.allocate(demand, Preference::Start);
                combination.elements.insert(
                    first_part.id,
                    Element {
                        plan: PlanId(idx as u32),
                        incoming_glue: HashMap::new(),
                    },
                );
                combination
            })
            .collect();
    };

    let Some(edge_metadata) = metadata.edge(first_edge.src, first_edge.dst) else {
        return Vec::new();
    };

    let mut seen = std::collections::HashSet::new();
    let mut seeds = Vec::new();
    for triple in &edge_metadata.triples {
        if !seen.insert(triple.src_plan) {
            continue;
        }
        let plan = first_part.plan(triple.src_plan);
        let mut combination = Combination::new(sram_capacity_per_bank(capabilities));
        let demand = plan.total_sram_bytes() / capabilities.num_srams().max(1);
        combination.sram.allocate(demand, Preference::Start);
        combination.elements.insert(
            first_part.id,
            Element {
                plan: triple.src_plan,
                incoming_glue: HashMap::new(),
            },
        );
        seeds.push(combination);
    }
    seeds
}

/// The smallest-ID part not yet present in `combination`.
fn next_unhandled_part(graph: &GraphOfParts, combination: &Combination) -> Option<PartId> {
    graph
        .parts_in_order()
        .map(|p| p.id)
        .find(|id| !combination.elements.contains_key(id))
}

/// Find, for each incoming edge of `part`, the triple consistent with the
/// already-chosen producer plan and a shared candidate `dst_plan`,
/// filtered by `scheme`. Returns `None` if no `dst_plan` satisfies every
/// incoming edge simultaneously.
fn compatible_extensions(
    graph: &GraphOfParts,
    metadata: &Metadata,
    combination: &Combination,
    part: PartId,
    scheme: Scheme,
) -> Vec<(PlanId, HashMap<InputSlot, Triple>)> {
    let p = graph.part(part);
    let incoming: Vec<InputSlot> = (0..p.num_inputs).map(|slot| InputSlot { part, slot }).collect();

    let mut results = Vec::new();
    for (dst_plan_idx, _dst_plan) in p.plans.iter().enumerate() {
        let dst_plan_id = PlanId(dst_plan_idx as u32);
        let mut per_edge = HashMap::new();
        let mut all_ok = true;

        for &dst_slot in &incoming {
            let Some(src_slot) = graph.producer_of(dst_slot) else {
                continue; // an unconnected input slot has nothing to check
            };
            let Some(producer_plan) = combination.plan_for(src_slot.part) else {
                all_ok = false;
                break;
            };
            let Some(edge_metadata) = metadata.edge(src_slot, dst_slot) else {
                all_ok = false;
                break;
            };

            let chosen = edge_metadata
                .triples_from(producer_plan)
                .filter(|t| t.dst_plan == dst_plan_id)
                .find(|t| scheme_accepts(scheme, !t.forced_dram_round_trip && t.glue.is_empty()));

            match chosen {
                Some(triple) => {
                    per_edge.insert(dst_slot, triple.clone());
                }
                None => {
                    all_ok = false;
                    break;
                }
            }
        }

        if all_ok {
            results.push((dst_plan_id, per_edge));
        }
    }
    results
}

/// `GrowSeeds`: extend each input combination onto the next
/// unhandled part using compatible plans from the metadata, applying the
/// SRAM-demand bookkeeping rule. `one_seed` caps the result to the single
/// first successful extension per input combination.
pub fn grow_seeds(
    graph: &GraphOfParts,
    metadata: &Metadata,
    capabilities: &Capabilities,
    combinations: Vec<Combination>,
    scheme: Scheme,
    one_seed: bool,
) -> Vec<Combination> {
    let mut grown = Vec::new();

    for combination in combinations {
        let Some(part) = next_unhandled_part(graph, &combination) else {
            grown.push(combination); // terminal: nothing left to grow
            continue;
        };

        let extensions = compatible_extensions(graph, metadata, &combination, part, scheme);

        for (dst_plan, per_edge) in extensions {
            let mut next = combination.clone();
            let dst_plan_ref = graph.part(part).plan(dst_plan);

            let is_pure_merge = per_edge
                .values()
                .all(|t| !t.forced_dram_round_trip && t.glue.is_empty());

            let num_srams = capabilities.num_srams().max(1);
            let demand_bytes = if is_pure_merge {
                dst_plan_ref.total_sram_bytes().saturating_sub(dst_plan_ref.input_sram_bytes())
            } else {
                next.sram.reset();
                dst_plan_ref.total_sram_bytes()
            };
            let per_bank_demand = demand_bytes / num_srams;

            let Some(_offset) = next.sram.allocate(per_bank_demand, Preference::Start) else {
                continue; // allocation failed: reject this extension
            };

            if is_pure_merge {
                next.score += 1;
            }

            let incoming_glue = per_edge.into_iter().map(|(slot, t)| (slot, t.glue)).collect();
            next.elements.insert(
                part,
                Element {
                    plan: dst_plan,
                    incoming_glue,
                },
            );
            grown.push(next);

            if one_seed {
                break;
            }
        }
    }

    grown
}

/// Repeat grow/prune/re-seed until no further growth is possible,
/// then return the single best complete combination. `materialize` turns
/// a (possibly partial) combination into the op-graph the estimator
/// scores; it's injected rather than called directly so this module
/// doesn't depend on the materialization pass.
pub fn drive_combiner(
    graph: &GraphOfParts,
    metadata: &Metadata,
    capabilities: &Capabilities,
    estimator: &dyn Estimator,
    materialize: &dyn Fn(&GraphOfParts, &Combination) -> OpGraph,
) -> Result<Combination> {
    let mut frontier = create_seeds(graph, metadata, capabilities);
    if frontier.is_empty() {
        return Err(CompileError::unsupported("no seed combination for the graph of parts", Vec::new()));
    }

    loop {
        let merged = grow_seeds(graph, metadata, capabilities, frontier.clone(), Scheme::MergeOnly, false);
        let mut candidates = merged;
        candidates.extend(frontier.clone());

        if candidates.iter().all(|c| c.is_complete(graph)) {
            frontier = candidates;
            break;
        }

        // Prune: complete each candidate with DramOnly + one_seed, then
        // estimate and keep the single best by strict left-better
        // comparison (first candidate wins ties).
        let mut best: Option<(Combination, EstimateMetric)> = None;
        for candidate in &candidates {
            let mut completed = candidate.clone();
            loop {
                if completed.is_complete(graph) {
                    break;
                }
                let next = grow_seeds(
                    graph,
                    metadata,
                    capabilities,
                    vec![completed.clone()],
                    Scheme::DramOnly,
                    true,
                );
                match next.into_iter().next() {
                    Some(extended) if extended.elements.len() > completed.elements.len() => {
                        completed = extended;
                    }
                    _ => break,
                }
            }
            if !completed.is_complete(graph) {
                continue;
            }
            let op_graph = materialize(graph, &completed);
            let estimate = estimator.estimate(&op_graph);
            match &best {
                Some((_, best_estimate)) if !estimate.strictly_better_than(best_estimate) => {}
                _ => best = Some((candidate.clone(), estimate)),
            }
        }

        let Some((pruned, _)) = best else {
            return Err(CompileError::unsupported("combiner search exhausted with no surviving combination", Vec::new()));
        };

        let next_wave = grow_seeds(graph, metadata, capabilities, vec![pruned], Scheme::DramOnly, false);
        if next_wave.is_empty() {
            return Err(CompileError::unsupported("combiner growth stalled before reaching a complete combination", Vec::new()));
        }
        frontier = next_wave;
    }

    // Among the final, fully-grown combinations, pick the best by the
    // same strict left-better rule.
    let mut best: Option<(Combination, EstimateMetric)> = None;
    for candidate in frontier {
        let op_graph = materialize(graph, &candidate);
        let estimate = estimator.estimate(&op_graph);
        match &best {
            Some((_, best_estimate)) if !estimate.strictly_better_than(best_estimate) => {}
            _ => best = Some((candidate, estimate)),
        }
    }

    best.map(|(c, _)| c)
        .ok_or_else(|| CompileError::unsupported("no combination survived the combiner driver", Vec::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Buffer, Format, Location, TraversalOrder};
    use crate::metadata::build_metadata;
    use crate::op::OpGraph as Graph;
    use crate::part::{OutputSlot, Part, Plan};
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
            size_bytes: 1024,
            quantization: quant(),
            data_type: DataType::U8,
            constant_data: None,
            encoded_weights: None,
        }
    }

    fn two_part_graph() -> GraphOfParts {
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
    fn seeds_are_created_from_first_parts_plans() {
        let g = two_part_graph();
        let caps = Capabilities::default_profile();
        let metadata = build_metadata(&g, &caps).unwrap();
        let seeds = create_seeds(&g, &metadata, &caps);
        assert_eq!(seeds.len(), 1);
    }

    #[test]
    fn grow_seeds_extends_to_terminal_part() {
        let g = two_part_graph();
        let caps = Capabilities::default_profile();
        let metadata = build_metadata(&g, &caps).unwrap();
        let seeds = create_seeds(&g, &metadata, &caps);
        let grown = grow_seeds(&g, &metadata, &caps, seeds, Scheme::Any, false);
        assert!(grown.iter().any(|c| c.is_complete(&g)));
    }

    #[test]
    fn drive_combiner_returns_a_complete_combination() {
        let g = two_part_graph();
        let caps = Capabilities::default_profile();
        let metadata = build_metadata(&g, &caps).unwrap();
        let estimator = crate::estimator::OpCountEstimator;
        let materialize = |_: &GraphOfParts, _: &Combination| OpGraph::new();
        let result = drive_combiner(&g, &metadata, &caps, &estimator, &materialize).unwrap();
        assert!(result.is_complete(&g));
    }
}
