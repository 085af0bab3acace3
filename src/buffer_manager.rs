//! Buffer manager: assigns final DRAM offsets to every
//! buffer category once the op-graph is materialized and optimized.
//! Constants and the input/output buffers are bump-allocated in a fixed
//! order; intermediates get a first-fit, lifetime-aware packing so two
//! buffers whose live ranges never overlap can share the same bytes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::combiner::sram_allocator::{Preference, SramAllocator};
use crate::op::BufferId;

/// Where a buffer's bytes end up in the final layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferCategory {
    Input,
    Output,
    ConstantDma,
    ConstantControlUnit,
    Intermediate,
}

/// One buffer the manager needs to place. `lifetime` is only meaningful
/// for `Intermediate` buffers — `(first_use, last_use)` in the op-graph's
/// topological op index.
#[derive(Debug, Clone, Copy)]
pub struct BufferRequest {
    pub buffer: BufferId,
    pub category: BufferCategory,
    pub size_bytes: u32,
    pub lifetime: Option<(u32, u32)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutEntry {
    pub buffer: BufferId,
    pub offset: u32,
    pub size: u32,
}

/// The full DRAM layout: five independently-allocated regions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DramLayout {
    pub constant_dma: Vec<LayoutEntry>,
    pub constant_control_unit: Vec<LayoutEntry>,
    pub inputs: Vec<LayoutEntry>,
    pub outputs: Vec<LayoutEntry>,
    pub intermediates: Vec<LayoutEntry>,
    pub intermediate_total_size: u32,
}

const DRAM_ALIGNMENT: u32 = 64;

fn align_up(value: u32, alignment: u32) -> u32 {
    (value + alignment - 1) / alignment * alignment
}

/// Concatenate `requests` back to back, 64-byte aligned, in the order
/// given — used for constants and for the input/output region:
/// neither ever overlaps with anything else, so there's nothing to pack.
fn bump_allocate(requests: &[&BufferRequest]) -> Vec<LayoutEntry> {
    let mut offset = 0u32;
    let mut entries = Vec::with_capacity(requests.len());
    for req in requests {
        entries.push(LayoutEntry {
            buffer: req.buffer,
            offset,
            size: req.size_bytes,
        });
        offset = align_up(offset + req.size_bytes, DRAM_ALIGNMENT);
    }
    entries
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    Free,
    Allocate,
}

/// First-fit lifetime packing for intermediate buffers: process
/// allocate/free events in time order, freeing before allocating at the
/// same timestamp so a buffer whose lifetime ends exactly when another
/// begins can be reused immediately.
fn pack_intermediates(requests: &[&BufferRequest], debug_disable_buffer_reuse: bool) -> (Vec<LayoutEntry>, u32) {
    if requests.is_empty() {
        return (Vec::new(), 0);
    }

    if debug_disable_buffer_reuse {
        let entries = bump_allocate(requests);
        let total = entries
            .last()
            .map(|e| align_up(e.offset + e.size, DRAM_ALIGNMENT))
            .unwrap_or(0);
        return (entries, total);
    }

    let capacity: u32 = requests.iter().map(|r| align_up(r.size_bytes, DRAM_ALIGNMENT)).sum();
    let mut allocator = SramAllocator::new(capacity.max(1));

    let mut events: Vec<(u32, EventKind, usize)> = Vec::with_capacity(requests.len() * 2);
    for (idx, req) in requests.iter().enumerate() {
        let (start, end) = req.lifetime.expect("intermediate buffer must carry a lifetime");
        events.push((start, EventKind::Allocate, idx));
        events.push((end, EventKind::Free, idx));
    }
    events.sort_by_key(|(time, kind, idx)| {
        (*time, if *kind == EventKind::Free { 0 } else { 1 }, requests[*idx].buffer.0)
    });

    let mut offsets = vec![0u32; requests.len()];
    let mut high_water_mark = 0u32;

    for (_, kind, idx) in events {
        match kind {
            EventKind::Allocate => {
                let size = align_up(requests[idx].size_bytes, DRAM_ALIGNMENT);
                let offset = allocator
                    .allocate(size, Preference::Start)
                    .expect("intermediate packing capacity is an upper bound and must always fit");
                offsets[idx] = offset;
                high_water_mark = high_water_mark.max(offset + size);
            }
            EventKind::Free => {
                allocator.try_free(offsets[idx]);
            }
        }
    }

    let entries = requests
        .iter()
        .enumerate()
        .map(|(idx, req)| LayoutEntry {
            buffer: req.buffer,
            offset: offsets[idx],
            size: req.size_bytes,
        })
        .collect();

    (entries, high_water_mark)
}

/// Build the complete DRAM layout from every buffer request in the
/// materialized, optimized op-graph.
pub fn plan_dram_layout(requests: &[BufferRequest], debug_disable_buffer_reuse: bool) -> DramLayout {
    let by_category = |category: BufferCategory| -> Vec<&BufferRequest> {
        requests.iter().filter(|r| r.category == category).collect()
    };

    let intermediates_input: Vec<&BufferRequest> = by_category(BufferCategory::Intermediate);
    let (intermediates, intermediate_total_size) =
        pack_intermediates(&intermediates_input, debug_disable_buffer_reuse);

    DramLayout {
        constant_dma: bump_allocate(&by_category(BufferCategory::ConstantDma)),
        constant_control_unit: bump_allocate(&by_category(BufferCategory::ConstantControlUnit)),
        inputs: bump_allocate(&by_category(BufferCategory::Input)),
        outputs: bump_allocate(&by_category(BufferCategory::Output)),
        intermediates,
        intermediate_total_size,
    }
}

/// The contiguous ID ranges final buffer IDs are drawn from: DRAM buffers
/// start at 1, SRAM
/// buffer IDs start at a disjoint high base so the two spaces never
/// collide in debug dumps or the command stream's buffer table.
pub const DRAM_ID_BASE: u32 = 1;
pub const SRAM_ID_BASE: u32 = 0x8000_0000;

/// Assign final sequential IDs to every DRAM-resident buffer, in the
/// fixed category order constants -> inputs -> outputs -> intermediates.
pub fn assign_dram_buffer_ids(layout: &DramLayout) -> HashMap<BufferId, u32> {
    let mut ids = HashMap::new();
    let mut next = DRAM_ID_BASE;
    for entry in layout
        .constant_dma
        .iter()
        .chain(&layout.constant_control_unit)
        .chain(&layout.inputs)
        .chain(&layout.outputs)
        .chain(&layout.intermediates)
    {
        ids.insert(entry.buffer, next);
        next += 1;
    }
    ids
}
