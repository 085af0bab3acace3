//! Op-graph materialization: turn a complete combination into a
//! single flat op-graph by walking parts in topological order, aliasing
//! empty-glue edges directly to the predecessor's output buffer, and
//! splicing in glue ops/buffers for everything else.

use std::collections::HashMap;

use crate::combiner::Combination;
use crate::glue::Glue;
use crate::op::{BufferId, OpGraph};
use crate::part::{GraphOfParts, InputSlot, PartId, Plan};

/// Copy `glue`'s ops into `merged`, aliasing its own graph-input buffer to
/// `producer_buffer` instead of duplicating it, and return the merged
/// buffer id that now holds the glued-through data.
fn splice_glue(merged: &mut OpGraph, glue: &Glue, producer_buffer: BufferId) -> BufferId {
    let Some((input_op, input_idx)) = glue.input_slot else {
        return producer_buffer;
    };

    let input_local_buffer = glue.graph.op(input_op).inputs[input_idx as usize];
    let mut local_to_merged: HashMap<BufferId, BufferId> = HashMap::new();
    local_to_merged.insert(input_local_buffer, producer_buffer);

    for (op_id, node) in glue.graph.ops_in_topo_order() {
        let inputs = node
            .inputs
            .iter()
            .map(|b| {
                *local_to_merged
                    .entry(*b)
                    .or_insert_with(|| merged.add_buffer(glue.graph.buffer(*b).clone()))
            })
            .collect();
        let (_, merged_output) = merged.add_op(node.op.clone(), inputs, glue.graph.buffer(node.output).clone());
        local_to_merged.insert(node.output, merged_output);
        let _ = op_id;
    }

    let output_op = glue.output.expect("non-empty glue must have an output op");
    local_to_merged[&glue.graph.op(output_op).output]
}

/// Resolve the merged-graph buffer id that should feed `input_slot`,
/// splicing glue if the combination chose any for this edge.
fn resolve_input(
    graph: &GraphOfParts,
    combination: &Combination,
    merged: &mut OpGraph,
    alias: &HashMap<(PartId, BufferId), BufferId>,
    plan: &Plan,
    local_buffer: BufferId,
    input_slot: InputSlot,
) -> BufferId {
    let Some(producer_slot) = graph.producer_of(input_slot) else {
        // A true external input to the whole graph of parts: nothing to
        // alias it to, so it starts a fresh buffer in the merged graph.
        return merged.add_buffer(plan.graph.buffer(local_buffer).clone());
    };

    let producer_part = graph.part(producer_slot.part);
    let producer_element = &combination.elements[&producer_slot.part];
    let producer_plan = producer_part.plan(producer_element.plan);
    let producer_local_output = producer_plan
        .buffer_for_output_slot(producer_slot)
        .expect("producer plan must map the output slot it feeds");
    let producer_merged_buffer = alias[&(producer_slot.part, producer_local_output)];

    match combination
        .elements
        .get(&input_slot.part)
        .and_then(|e| e.incoming_glue.get(&input_slot))
    {
        Some(glue) if !glue.is_empty() => splice_glue(merged, glue, producer_merged_buffer),
        _ => producer_merged_buffer,
    }
}

/// Flatten every part's chosen plan into one op-graph, in ascending-PartId
/// (topological) order.
pub fn materialize(graph: &GraphOfParts, combination: &Combination) -> OpGraph {
    let mut merged = OpGraph::new();
    let mut alias: HashMap<(PartId, BufferId), BufferId> = HashMap::new();

    for part in graph.parts_in_order() {
        let Some(element) = combination.elements.get(&part.id) else {
            continue; // a combination covering only part of the graph: skip the rest
        };
        let plan = part.plan(element.plan);

        for (&local_buffer, &input_slot) in &plan.input_mappings {
            let resolved = resolve_input(graph, combination, &mut merged, &alias, plan, local_buffer, input_slot);
            alias.insert((part.id, local_buffer), resolved);
        }

        let mut local_to_merged: HashMap<BufferId, BufferId> = plan
            .input_mappings
            .keys()
            .map(|&b| (b, alias[&(part.id, b)]))
            .collect();

        for (_, node) in plan.graph.ops_in_topo_order() {
            let inputs = node
                .inputs
                .iter()
                .map(|b| {
                    *local_to_merged
                        .entry(*b)
                        .or_insert_with(|| merged.add_buffer(plan.graph.buffer(*b).clone()))
                })
                .collect();
            let (_, merged_output) =
                merged.add_op(node.op.clone(), inputs, plan.graph.buffer(node.output).clone());
            local_to_merged.insert(node.output, merged_output);
        }

        for (&local_buffer, _) in &plan.output_mappings {
            // A plan whose output is a pass-through buffer with no ops at
            // all (e.g. a constant) never appears on the left of an op,
            // so it needs copying here rather than during op traversal.
            let merged_buffer = *local_to_merged
                .entry(local_buffer)
                .or_insert_with(|| merged.add_buffer(plan.graph.buffer(local_buffer).clone()));
            alias.insert((part.id, local_buffer), merged_buffer);
        }
    }

    merged
}
