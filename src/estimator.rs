//! Performance estimator interface: a pure function from a
//! materialized op-graph to a perf record, implemented by an out-of-scope
//! collaborator. Only the shape of the interface — and the ordering rule
//! the combiner's pruning step relies on — live here.

use crate::op::OpGraph;

/// A single comparable estimate. Lower is better; ordering is total so the
/// combiner's pruning step can do a strict "left-better" comparison with a
/// first-candidate-wins tie-break.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct EstimateMetric(pub f64);

impl EstimateMetric {
    /// True iff `self` is strictly better (lower) than `other` — ties are
    /// not an improvement, matching the driver's "first candidate wins
    /// ties" rule.
    pub fn strictly_better_than(&self, other: &EstimateMetric) -> bool {
        self.0 < other.0
    }
}

pub trait Estimator {
    fn estimate(&self, graph: &OpGraph) -> EstimateMetric;
}

/// A deterministic stand-in estimator used by tests and as a scaffold
/// default: counts ops weighted by kind, favoring fewer DMAs since those
/// are the cost glue synthesis introduces.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpCountEstimator;

impl Estimator for OpCountEstimator {
    fn estimate(&self, graph: &OpGraph) -> EstimateMetric {
        let mut cost = 0.0;
        for (_, node) in graph.ops_in_topo_order() {
            cost += match &node.op {
                crate::op::Op::Dma { .. } => 10.0,
                crate::op::Op::Mce { .. } => 1.0,
                crate::op::Op::Ple { .. } => 1.0,
                crate::op::Op::EstimateOnly { .. } => 5.0,
            };
        }
        EstimateMetric(cost)
    }
}
