//! Stage 2: once every OFM's stage-1 stream exists, regroup by
//! stripe, distribute round-robin across parallel OG streams, patch
//! length headers, and interleave into the final DMA-friendly byte
//! sequence.

use serde::{Deserialize, Serialize};

use crate::weight_encoder::stage1::OfmStream;

const ALIGNMENT: usize = 16;

fn round_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

/// Patch an OFM stream's 16-bit length placeholder to its actual
/// 16-byte-aligned length in 16-byte words, then pad the stream to that
/// aligned length.
fn patch_and_pad(mut stream: OfmStream) -> Vec<u8> {
    let aligned_len = round_up(stream.bytes.len(), ALIGNMENT);
    stream.bytes.resize(aligned_len, 0);
    let length_in_words = (aligned_len / ALIGNMENT) as u16;

    let byte_offset = (stream.length_placeholder_bit / 8) as usize;
    let bit_in_byte = (stream.length_placeholder_bit % 8) as u32;
    crate::error::invariant(bit_in_byte == 0, "stage-1 always starts the length field byte-aligned");
    let value = length_in_words.to_le_bytes();
    stream.bytes[byte_offset] = value[0];
    stream.bytes[byte_offset + 1] = value[1];
    stream.bytes
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct StripeMetadataEntry {
    pub offset: u32,
    pub size: u32,
}

/// Flatten the stripe table into the raw little-endian byte layout the
/// command-stream generator reads directly, with no serialization step.
pub fn stripe_metadata_as_bytes(entries: &[StripeMetadataEntry]) -> &[u8] {
    bytemuck::cast_slice(entries)
}

#[derive(Debug, Clone, Default)]
pub struct EncodedWeightStream {
    pub bytes: Vec<u8>,
    pub stripe_metadata: Vec<StripeMetadataEntry>,
}

/// Group size for one stripe's worth of OFM streams.
fn stripe_group_size(stripe_depth: u32, num_iterations_ofm: u32) -> usize {
    (stripe_depth * num_iterations_ofm).max(1) as usize
}

/// Distribute a stripe's OFM streams round-robin across
/// `num_ofm_in_parallel` groups, concatenating (and patching) within each
/// group.
fn round_robin_groups(stripe_streams: Vec<OfmStream>, num_ofm_in_parallel: u32) -> Vec<Vec<u8>> {
    let num_groups = num_ofm_in_parallel.max(1) as usize;
    let mut groups = vec![Vec::new(); num_groups];
    for (i, stream) in stripe_streams.into_iter().enumerate() {
        let group = i % num_groups;
        let patched = patch_and_pad(stream);
        groups[group].extend(patched);
    }
    groups
}

/// Re-interleave a group's bytes 16 bytes at a time across
/// `num_ofm_per_sram` sub-streams when one SRAM bank drives multiple OGs.
/// A `num_ofm_per_sram` of 1 is a no-op.
fn reinterleave_within_group(group: &[u8], num_ofm_per_sram: u32) -> Vec<u8> {
    if num_ofm_per_sram <= 1 {
        return group.to_vec();
    }
    let n = num_ofm_per_sram as usize;
    let chunk = ALIGNMENT;
    let per_stream_len = group.len() / n;
    let mut out = Vec::with_capacity(group.len());
    let num_chunks = per_stream_len.div_ceil(chunk);
    for c in 0..num_chunks {
        for s in 0..n {
            let start = s * per_stream_len + c * chunk;
            let end = (start + chunk).min(group.len()).max(start);
            if start < group.len() {
                out.extend_from_slice(&group[start..end]);
            }
        }
    }
    out
}

/// Assemble the encoded weight stream for one stripe across all OGs,
/// producing the padded, length-patched per-OG group bytes plus the
/// stripe metadata entry.
pub fn assemble_stripe(
    stripe_streams: Vec<OfmStream>,
    num_ofm_in_parallel: u32,
    num_ofm_per_sram: u32,
) -> (Vec<Vec<u8>>, StripeMetadataEntry) {
    let groups = round_robin_groups(stripe_streams, num_ofm_in_parallel);
    let max_len = groups.iter().map(|g| g.len()).max().unwrap_or(0);
    let aligned_max = round_up(max_len, ALIGNMENT);

    let padded: Vec<Vec<u8>> = groups
        .into_iter()
        .map(|mut g| {
            g.resize(aligned_max, 0);
            reinterleave_within_group(&g, num_ofm_per_sram)
        })
        .collect();

    let size: u32 = padded.iter().map(|g| g.len() as u32).sum();
    (padded, StripeMetadataEntry { offset: 0, size })
}

/// Merge every stripe's per-OG groups, round-robin per SRAM bank, then
/// interleave 16 bytes per SRAM bank to form the final DMA-friendly byte
/// sequence.
pub fn merge_stripes(stripes: Vec<Vec<Vec<u8>>>, num_srams: u32) -> EncodedWeightStream {
    let mut metadata = Vec::new();
    let mut out = Vec::new();

    for stripe_groups in stripes {
        let offset = out.len() as u32;
        let per_sram: Vec<&[u8]> = stripe_groups
            .iter()
            .enumerate()
            .map(|(i, g)| {
                let _ = i;
                g.as_slice()
            })
            .collect();

        let max_len = per_sram.iter().map(|g| g.len()).max().unwrap_or(0);
        let num_chunks = max_len.div_ceil(ALIGNMENT);
        let banks = num_srams.max(1) as usize;

        for chunk in 0..num_chunks {
            for bank in 0..banks {
                let stream = per_sram.get(bank % per_sram.len().max(1)).copied().unwrap_or(&[]);
                let start = chunk * ALIGNMENT;
                if start < stream.len() {
                    let end = (start + ALIGNMENT).min(stream.len());
                    out.extend_from_slice(&stream[start..end]);
                    if end - start < ALIGNMENT {
                        out.resize(out.len() + (ALIGNMENT - (end - start)), 0);
                    }
                } else {
                    out.resize(out.len() + ALIGNMENT, 0);
                }
            }
        }

        let size = out.len() as u32 - offset;
        metadata.push(StripeMetadataEntry { offset, size });
    }

    EncodedWeightStream {
        bytes: out,
        stripe_metadata: metadata,
    }
}

pub fn stripe_boundaries(total_ofms: u32, stripe_depth: u32, num_iterations_ofm: u32) -> Vec<(u32, u32)> {
    let group = stripe_group_size(stripe_depth, num_iterations_ofm) as u32;
    let mut bounds = Vec::new();
    let mut start = 0;
    while start < total_ofms {
        let end = (start + group).min(total_ofms);
        bounds.push((start, end));
        start = end;
    }
    bounds
}
