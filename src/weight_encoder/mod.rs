//! Weight encoder: a two-stage pipeline turning a quantized weight
//! tensor into the hardware's compressed bitstream format. Stage 1 runs
//! independently per output-group and is the unit of concurrency handed
//! to the thread pool; stage 2 regroups and interleaves once every
//! stage-1 future has resolved.

pub mod bitstream;
pub mod grc;
pub mod palette;
pub mod stage1;
pub mod stage2;

pub use stage1::{WeightEncodingRequest, WeightLayout};
pub use stage2::{stripe_metadata_as_bytes, StripeMetadataEntry};

use serde::{Deserialize, Serialize};

use stage1::encode_ofm;

/// The fully encoded weight stream plus the per-stripe offset/size table
/// the command-stream generator needs to index into it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncodedWeights {
    pub bytes: Vec<u8>,
    pub stripe_metadata: Vec<StripeMetadataEntry>,
}

/// Run stage 1 for every OFM in `request.weight_shape`'s output axis, then
/// stage 2's stripe regrouping/interleaving, returning the final encoded
/// stream.
///
/// `stripe_depth` and `num_ofm_in_parallel` come from the plan that will
/// consume this buffer, not from the request itself, since the same
/// weight tensor can be encoded differently for different stripe shapes.
pub fn encode_weights(
    request: &WeightEncodingRequest,
    stripe_depth: u32,
    num_ofm_in_parallel: u32,
    num_ofm_per_sram: u32,
) -> EncodedWeights {
    let total_ofms = request.weight_shape.c;

    let mut prev: Option<stage1::CompressionParams> = None;
    let mut ofm_streams = Vec::with_capacity(total_ofms as usize);
    for ofm in 0..total_ofms {
        let bias = request.biases.get(ofm as usize).copied().unwrap_or(0);
        let (stream, params) = encode_ofm(request, ofm, bias, prev.as_ref());
        ofm_streams.push(stream);
        prev = Some(params);
    }

    let boundaries = stage2::stripe_boundaries(total_ofms, stripe_depth, request.num_iterations_ofm);
    let mut stripe_groups = Vec::with_capacity(boundaries.len());
    for (start, end) in boundaries {
        let slice: Vec<_> = ofm_streams[start as usize..end as usize].to_vec();
        let (groups, _metadata) = stage2::assemble_stripe(slice, num_ofm_in_parallel, num_ofm_per_sram);
        stripe_groups.push(groups);
    }

    let merged = stage2::merge_stripes(stripe_groups, request.capabilities.num_srams());
    EncodedWeights {
        bytes: merged.bytes,
        stripe_metadata: merged.stripe_metadata,
    }
}
