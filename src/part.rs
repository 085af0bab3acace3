//! Part, Plan, GraphOfParts.
//!
//! Edges are keyed by an `EdgeId` tuple `(src_part, src_slot, dst_part,
//! dst_slot)` rather than by pointer identity, which also makes the whole
//! graph trivially serializable for debug dumps.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::op::{BufferId, OpGraph};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanId(pub u32);

/// A named input slot on a part: the part plus the slot index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InputSlot {
    pub part: PartId,
    pub slot: u32,
}

/// A named output slot on a part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputSlot {
    pub part: PartId,
    pub slot: u32,
}

/// `(src_part, src_slot, dst_part, dst_slot)` — replaces pointer-keyed
/// edge lookups from the legacy graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId {
    pub src: OutputSlot,
    pub dst: InputSlot,
}

/// A fully specified schedule for a part: an op-graph plus the mapping
/// from its graph-level input/output buffers to the part's external
/// slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub graph: OpGraph,
    /// Mapped input buffers have no producer within `graph`.
    pub input_mappings: HashMap<BufferId, InputSlot>,
    /// Mapped output buffers have no consumer within `graph`.
    pub output_mappings: HashMap<BufferId, OutputSlot>,
}

impl Plan {
    pub fn new(graph: OpGraph) -> Self {
        Plan {
            graph,
            input_mappings: HashMap::new(),
            output_mappings: HashMap::new(),
        }
    }

    pub fn map_input(&mut self, buffer: BufferId, slot: InputSlot) {
        self.input_mappings.insert(buffer, slot);
    }

    pub fn map_output(&mut self, buffer: BufferId, slot: OutputSlot) {
        self.output_mappings.insert(buffer, slot);
    }

    pub fn buffer_for_input_slot(&self, slot: InputSlot) -> Option<BufferId> {
        self.input_mappings
            .iter()
            .find(|(_, s)| **s == slot)
            .map(|(b, _)| *b)
    }

    pub fn buffer_for_output_slot(&self, slot: OutputSlot) -> Option<BufferId> {
        self.output_mappings
            .iter()
            .find(|(_, s)| **s == slot)
            .map(|(b, _)| *b)
    }

    /// `tot(p)`: total SRAM bytes committed by every buffer this
    /// plan touches.
    pub fn total_sram_bytes(&self) -> u32 {
        self.graph
            .buffer_ids()
            .filter(|id| self.graph.buffer(*id).location.is_sram())
            .map(|id| self.graph.buffer(id).size_bytes)
            .sum()
    }

    /// `in(p)`: SRAM bytes occupied by this plan's mapped input
    /// buffer(s) alone, already accounted for by the predecessor.
    pub fn input_sram_bytes(&self) -> u32 {
        self.input_mappings
            .keys()
            .filter(|id| self.graph.buffer(**id).location.is_sram())
            .map(|id| self.graph.buffer(*id).size_bytes)
            .sum()
    }

    /// Invariant: a mapped input buffer has no producer inside the
    /// plan; a mapped output buffer has no consumer inside the plan.
    pub fn check_invariants(&self) -> Result<(), String> {
        for buffer in self.input_mappings.keys() {
            if self.graph.producer_of(*buffer).is_some() {
                return Err(format!(
                    "plan input buffer {buffer:?} has a producer inside the plan"
                ));
            }
        }
        for buffer in self.output_mappings.keys() {
            if !self.graph.consumers_of(*buffer).is_empty() {
                return Err(format!(
                    "plan output buffer {buffer:?} has a consumer inside the plan"
                ));
            }
        }
        self.graph.check_invariants()
    }
}

/// Identity + candidate plans + slot references for a node in the
/// graph-of-parts DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    pub id: PartId,
    pub plans: Vec<Plan>,
    pub num_inputs: u32,
    pub num_outputs: u32,
}

impl Part {
    pub fn new(id: PartId, num_inputs: u32, num_outputs: u32) -> Self {
        Part {
            id,
            plans: Vec::new(),
            num_inputs,
            num_outputs,
        }
    }

    pub fn add_plan(&mut self, plan: Plan) -> PlanId {
        let id = PlanId(self.plans.len() as u32);
        self.plans.push(plan);
        id
    }

    pub fn plan(&self, id: PlanId) -> &Plan {
        &self.plans[id.0 as usize]
    }

    pub fn is_terminal(&self, edges: &HashMap<InputSlot, OutputSlot>) -> bool {
        !(0..self.num_outputs).any(|slot| {
            edges
                .values()
                .any(|src| *src == OutputSlot { part: self.id, slot })
        })
    }
}

/// The DAG of parts. `edges` maps each consumer input slot to its single
/// producer output slot (one producer per consumer, any number of
/// consumers per producer).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphOfParts {
    parts: HashMap<PartId, Part>,
    /// Ascending-PartId order is the fixed topological order: the
    /// front-end is required to assign IDs in topo order already.
    order: Vec<PartId>,
    edges: HashMap<InputSlot, OutputSlot>,
}

impl GraphOfParts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_part(&mut self, part: Part) {
        self.order.push(part.id);
        self.parts.insert(part.id, part);
        self.order.sort();
    }

    pub fn connect(&mut self, src: OutputSlot, dst: InputSlot) {
        self.edges.insert(dst, src);
    }

    pub fn part(&self, id: PartId) -> &Part {
        &self.parts[&id]
    }

    pub fn part_mut(&mut self, id: PartId) -> &mut Part {
        self.parts.get_mut(&id).expect("part id must exist")
    }

    /// Parts in ascending-ID topological order.
    pub fn parts_in_order(&self) -> impl DoubleEndedIterator<Item = &Part> {
        self.order.iter().map(move |id| &self.parts[id])
    }

    pub fn num_parts(&self) -> usize {
        self.parts.len()
    }

    pub fn producer_of(&self, input: InputSlot) -> Option<OutputSlot> {
        self.edges.get(&input).copied()
    }

    /// All input slots fed by a given output slot, in ascending
    /// `(part, slot)` order for determinism.
    pub fn consumers_of(&self, output: OutputSlot) -> Vec<InputSlot> {
        let mut v: Vec<InputSlot> = self
            .edges
            .iter()
            .filter(|(_, src)| **src == output)
            .map(|(dst, _)| *dst)
            .collect();
        v.sort_by_key(|s| (s.part.0, s.slot));
        v
    }

    /// Outgoing edges from `part`, sorted by `(dst.part, dst.slot)` for
    /// the metadata map's deterministic iteration order.
    pub fn outgoing_edges(&self, part: PartId) -> Vec<EdgeId> {
        let p = &self.parts[&part];
        let mut edges = Vec::new();
        for slot in 0..p.num_outputs {
            let out = OutputSlot { part, slot };
            for dst in self.consumers_of(out) {
                edges.push(EdgeId { src: out, dst });
            }
        }
        edges.sort_by_key(|e| (e.dst.part.0, e.dst.slot));
        edges
    }

    pub fn edges(&self) -> impl Iterator<Item = (&InputSlot, &OutputSlot)> {
        self.edges.iter()
    }

    /// Verify that the edges form a DAG and that ascending-PartId order is
    /// indeed a valid topological order.
    pub fn verify_topological_order(&self) -> Result<(), String> {
        let mut graph = petgraph::graph::DiGraph::<PartId, ()>::new();
        let mut nodes = HashMap::new();
        for part_id in &self.order {
            nodes.insert(*part_id, graph.add_node(*part_id));
        }
        for (dst, src) in &self.edges {
            graph.add_edge(nodes[&src.part], nodes[&dst.part], ());
        }

        petgraph::algo::toposort(&graph, None)
            .map_err(|cycle| format!("graph of parts contains a cycle at {:?}", graph[cycle.node_id()]))?;

        for (dst, src) in &self.edges {
            if src.part.0 >= dst.part.0 {
                return Err(format!(
                    "edge {src:?} -> {dst:?} does not respect ascending-PartId topological order"
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_in_order_is_ascending_by_id() {
        let mut g = GraphOfParts::new();
        g.add_part(Part::new(PartId(2), 1, 1));
        g.add_part(Part::new(PartId(0), 1, 1));
        g.add_part(Part::new(PartId(1), 1, 1));
        let ids: Vec<u32> = g.parts_in_order().map(|p| p.id.0).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn connect_and_lookup_producer() {
        let mut g = GraphOfParts::new();
        g.add_part(Part::new(PartId(0), 0, 1));
        g.add_part(Part::new(PartId(1), 1, 0));
        let src = OutputSlot { part: PartId(0), slot: 0 };
        let dst = InputSlot { part: PartId(1), slot: 0 };
        g.connect(src, dst);
        assert_eq!(g.producer_of(dst), Some(src));
        assert_eq!(g.consumers_of(src), vec![dst]);
    }

    #[test]
    fn is_terminal_true_with_no_outgoing_edges() {
        let mut g = GraphOfParts::new();
        g.add_part(Part::new(PartId(0), 0, 1));
        let edges = HashMap::new();
        assert!(g.part(PartId(0)).is_terminal(&edges));
    }

    #[test]
    fn verify_topological_order_accepts_forward_edges() {
        let mut g = GraphOfParts::new();
        g.add_part(Part::new(PartId(0), 0, 1));
        g.add_part(Part::new(PartId(1), 1, 0));
        g.connect(
            OutputSlot { part: PartId(0), slot: 0 },
            InputSlot { part: PartId(1), slot: 0 },
        );
        assert!(g.verify_topological_order().is_ok());
    }

    #[test]
    fn verify_topological_order_rejects_backward_edges() {
        let mut g = GraphOfParts::new();
        g.add_part(Part::new(PartId(0), 1, 1));
        g.add_part(Part::new(PartId(1), 1, 1));
        g.connect(
            OutputSlot { part: PartId(1), slot: 0 },
            InputSlot { part: PartId(0), slot: 0 },
        );
        assert!(g.verify_topological_order().is_err());
    }

    #[test]
    fn outgoing_edges_sorted_by_destination() {
        let mut g = GraphOfParts::new();
        g.add_part(Part::new(PartId(0), 0, 1));
        g.add_part(Part::new(PartId(1), 1, 0));
        g.add_part(Part::new(PartId(2), 1, 0));
        let src = OutputSlot { part: PartId(0), slot: 0 };
        g.connect(src, InputSlot { part: PartId(2), slot: 0 });
        g.connect(src, InputSlot { part: PartId(1), slot: 0 });
        let edges = g.outgoing_edges(PartId(0));
        assert_eq!(edges[0].dst.part, PartId(1));
        assert_eq!(edges[1].dst.part, PartId(2));
    }
}
