//! Stage 1: per output-group, per-OFM, per
//! IFM-depth-iteration raw stream selection, compression parameter
//! search, symbol encoding, and header writing.

use std::collections::HashMap;

use crate::capabilities::Capabilities;
use crate::op::{MceAlgorithm, MceOperation};
use crate::tensor::{DataType, Quantization, TensorShape};
use crate::weight_encoder::bitstream::BitstreamWriter;
use crate::weight_encoder::grc::{search_weight_divisor, search_zero_run_divisor, Divisor};
use crate::weight_encoder::palette::build_palette;

/// HWIO weight layout (`[H, W, I, O]`) or HWIM depthwise layout
/// (`[H, W, I, M]`, `M` = channel multiplier).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightLayout {
    Hwio,
    Hwim,
}

#[derive(Debug, Clone)]
pub struct WeightEncodingRequest {
    /// Row-major `[H, W, I, O]` (or `[H, W, I, M]` for HWIM) signed
    /// deviations from the weight zero point, one byte's worth of range
    /// per element (`[-255, 255]` after zero-point subtraction).
    pub weights: Vec<i32>,
    pub biases: Vec<i64>,
    pub weight_shape: TensorShape,
    pub layout: WeightLayout,
    pub input_quantization: Quantization,
    pub weight_quantization: Quantization,
    pub output_quantization: Quantization,
    pub output_data_type: DataType,
    pub mce_op: MceOperation,
    pub algorithm: MceAlgorithm,
    pub stride_x: u32,
    pub stride_y: u32,
    pub num_iterations_ofm: u32,
    pub capabilities: Capabilities,
}

/// One OFM's fully encoded stage-1 stream.
#[derive(Debug, Clone)]
pub struct OfmStream {
    pub bytes: Vec<u8>,
    /// Bit offset of the 16-bit stream-length placeholder, patched by
    /// stage 2 once the stream's final 16-byte-aligned span is known.
    pub length_placeholder_bit: u64,
}

fn weight_symbol(deviation: i32) -> u32 {
    let magnitude = deviation.unsigned_abs();
    (magnitude << 1) - u32::from(deviation < 0)
}

/// HWIO + MCE convolution + Direct: slice the IFM axis into
/// `num_igs`-sized groups, emitting `H*W*num_channels` bytes per group in
/// row-major order; pad a short last slice with the weight zero point.
fn raw_stream_hwio_direct(shape: TensorShape, weights: &[i32], num_igs: u32, zero_point: i32) -> Vec<u32> {
    let (h, w, i, o) = (shape.h, shape.w, shape.n, shape.c);
    let mut out = Vec::new();
    let num_slices = i.div_ceil(num_igs.max(1));
    for slice in 0..num_slices {
        for ifm_in_slice in 0..num_igs {
            let ifm = slice * num_igs + ifm_in_slice;
            for row in 0..h {
                for col in 0..w {
                    for ofm in 0..o {
                        let value = if ifm < i {
                            let index = ((row * w + col) * i + ifm) * o + ofm;
                            weights.get(index as usize).copied().unwrap_or(zero_point)
                        } else {
                            zero_point
                        };
                        out.push(weight_symbol(value - zero_point));
                    }
                }
            }
        }
    }
    out
}

/// HWIO + Winograd, stride 1x1 only: one submap per wide
/// subfilter, emitting `H*W` bytes per channel; out-of-bounds positions
/// pad with the zero point.
fn raw_stream_hwio_winograd(shape: TensorShape, weights: &[i32], zero_point: i32) -> Vec<u32> {
    let (h, w, i, o) = (shape.h, shape.w, shape.n, shape.c);
    let mut out = Vec::new();
    for ifm in 0..i {
        for ofm in 0..o {
            for row in 0..h {
                for col in 0..w {
                    let index = ((row * w + col) * i + ifm) * o + ofm;
                    let value = weights.get(index as usize).copied().unwrap_or(zero_point);
                    out.push(weight_symbol(value - zero_point));
                }
            }
        }
    }
    out
}

/// HWIO + FullyConnected: requires `num_IFMs % 1024 == 0`.
/// Permutes each 1024-element block's index by
/// `qbrickIdx = (qbrickIdx % 4) * numSubBricks + qbrickIdx / 4` with
/// `numSubBricks = 16 / num_srams`, falling back to zero-point padding for
/// any permuted index that lands outside the block.
fn raw_stream_hwio_fully_connected(
    shape: TensorShape,
    weights: &[i32],
    zero_point: i32,
    num_srams: u32,
) -> Vec<u32> {
    crate::error::invariant(shape.n % 1024 == 0, "fully-connected weight stream requires IFM count % 1024 == 0");
    let num_sub_bricks = 16 / num_srams.max(1);
    let o = shape.c;
    let mut out = Vec::new();
    for ofm in 0..o {
        for block_start in (0..shape.n).step_by(1024) {
            for qbrick_idx in 0..1024u32 {
                let permuted = (qbrick_idx % 4) * num_sub_bricks + qbrick_idx / 4;
                let value = if permuted < 1024 {
                    let ifm = block_start + permuted;
                    let index = ifm * o + ofm;
                    weights.get(index as usize).copied().unwrap_or(zero_point)
                } else {
                    zero_point
                };
                out.push(weight_symbol(value - zero_point));
            }
        }
    }
    out
}

/// HWIM depthwise: decompose the output-channel index into
/// `(channel_multiplier, ifm)`; emit exactly `num_igs` rows per filter
/// coordinate but only the one real slice — the hardware zero-fills rest.
fn raw_stream_hwim(shape: TensorShape, weights: &[i32], zero_point: i32, num_igs: u32, channel_multiplier: u32) -> Vec<u32> {
    let (h, w, i) = (shape.h, shape.w, shape.n);
    let mut out = Vec::new();
    for row in 0..h {
        for col in 0..w {
            for ig in 0..num_igs {
                let ifm = ig;
                let value = if ifm < i {
                    let index = ((row * w + col) * i + ifm) * shape.c + channel_multiplier;
                    weights.get(index as usize).copied().unwrap_or(zero_point)
                } else {
                    zero_point
                };
                out.push(weight_symbol(value - zero_point));
            }
        }
    }
    out
}

fn select_raw_stream(request: &WeightEncodingRequest, channel_multiplier: u32) -> Vec<u32> {
    let zero_point = request.weight_quantization.zero_point();
    let num_igs = request.capabilities.num_igs();
    match (request.layout, request.algorithm, request.mce_op) {
        (WeightLayout::Hwim, _, _) => {
            raw_stream_hwim(request.weight_shape, &request.weights, zero_point, num_igs, channel_multiplier)
        }
        (WeightLayout::Hwio, _, MceOperation::FullyConnected) => raw_stream_hwio_fully_connected(
            request.weight_shape,
            &request.weights,
            zero_point,
            request.capabilities.num_srams(),
        ),
        (WeightLayout::Hwio, MceAlgorithm::Winograd, _) => {
            crate::error::invariant(
                request.stride_x == 1 && request.stride_y == 1,
                "Winograd weight encoding requires stride 1x1",
            );
            raw_stream_hwio_winograd(request.weight_shape, &request.weights, zero_point)
        }
        (WeightLayout::Hwio, MceAlgorithm::Direct, _) => {
            raw_stream_hwio_direct(request.weight_shape, &request.weights, num_igs, zero_point)
        }
    }
}

/// Encoded compression parameters for one OFM's payload.
#[derive(Debug, Clone)]
pub struct CompressionParams {
    pub rle_enabled: bool,
    pub zdiv: Option<u32>,
    pub wdiv: Divisor,
    pub truncation: bool,
    pub palette: Option<crate::weight_encoder::palette::Palette>,
    pub weight_offset: u32,
    pub cost_bits: u64,
}

/// The residual symbols' minimum, clamped to the 5-bit `weight_offset`
/// field range, subtracted from every residual symbol before GRC so the
/// divisor search sees the smallest possible quotients.
fn weight_offset_clamp(residual: &[u32]) -> u32 {
    residual.iter().copied().min().unwrap_or(0).min(31)
}

fn zero_run_lengths(symbols: &[u32]) -> Vec<u32> {
    let mut runs = Vec::new();
    let mut current = 0u32;
    for &s in symbols {
        if s == 0 {
            current += 1;
        } else if current > 0 {
            runs.push(current);
            current = 0;
        }
    }
    if current > 0 {
        runs.push(current);
    }
    runs
}

/// Build the frequency table, try RLE-off and RLE-on candidates
/// (each optionally with a palette), and keep the minimum-cost one.
fn select_compression_params(symbols: &[u32], capabilities: &Capabilities) -> CompressionParams {
    let mut counts: HashMap<u32, u32> = HashMap::new();
    for &s in symbols {
        *counts.entry(s).or_insert(0) += 1;
    }
    let max_symbol = symbols.iter().copied().max().unwrap_or(0);
    let max_abs_weight = max_symbol / 2 + 1;

    let pack_size = capabilities.grc_pack_size_three_quarters();
    let pack_size_half = capabilities.grc_pack_size_half();

    let mut candidates = Vec::new();

    // RLE disabled: encode every symbol directly.
    {
        let palette = build_palette(&counts, max_abs_weight);
        let residual: Vec<u32> = match &palette {
            Some(p) => symbols
                .iter()
                .filter_map(|&s| if p.index_of(s).is_some() { None } else { Some(s) })
                .collect(),
            None => symbols.to_vec(),
        };
        let weight_offset = weight_offset_clamp(&residual);
        let offset_residual: Vec<u32> = residual.iter().map(|&s| s.saturating_sub(weight_offset)).collect();
        let grc = search_weight_divisor(&offset_residual, pack_size);
        candidates.push(CompressionParams {
            rle_enabled: false,
            zdiv: None,
            wdiv: grc.divisor,
            truncation: grc.truncation,
            palette,
            weight_offset,
            cost_bits: grc.cost_bits,
        });
    }

    // RLE enabled, only worth trying when there's at least one zero.
    if counts.get(&0).copied().unwrap_or(0) > 0 {
        let runs = zero_run_lengths(symbols);
        let nonzero: Vec<u32> = symbols.iter().copied().filter(|&s| s != 0).collect();
        let palette = build_palette(&counts, max_abs_weight);
        let residual: Vec<u32> = match &palette {
            Some(p) => nonzero.iter().filter(|&&s| p.index_of(s).is_none()).copied().collect(),
            None => nonzero.clone(),
        };
        let weight_offset = weight_offset_clamp(&residual);
        let offset_residual: Vec<u32> = residual.iter().map(|&s| s.saturating_sub(weight_offset)).collect();
        let grc = search_weight_divisor(&offset_residual, pack_size);
        let zero_grc = search_zero_run_divisor(&runs, pack_size, pack_size_half);
        let zero_cost = zero_grc.as_ref().map(|z| z.cost_bits).unwrap_or(0);
        candidates.push(CompressionParams {
            rle_enabled: true,
            zdiv: zero_grc.map(|z| match z.divisor {
                Divisor::Grc(d) => d,
                Divisor::Uncompressed => 3,
            }),
            wdiv: grc.divisor,
            truncation: grc.truncation,
            palette,
            weight_offset,
            cost_bits: grc.cost_bits + zero_cost,
        });
    }

    candidates
        .into_iter()
        .min_by_key(|c| c.cost_bits)
        .expect("at least one candidate is always produced")
}

fn bias_bytes(data_type: DataType) -> u32 {
    match data_type {
        DataType::I32 => 5,
        _ => 4,
    }
}

/// Encode a single OFM's weights into a stage-1 stream.
pub fn encode_ofm(request: &WeightEncodingRequest, ofm_index: u32, bias: i64, prev: Option<&CompressionParams>) -> (OfmStream, CompressionParams) {
    let channel_multiplier = ofm_index;
    let symbols = select_raw_stream(request, channel_multiplier);
    let params = select_compression_params(&symbols, &request.capabilities);

    let mut writer = BitstreamWriter::new();
    let length_placeholder_bit = writer.len_bits();
    writer.write_bits(0, 16); // placeholder, patched in stage 2

    let bias_width = bias_bytes(request.output_data_type) * 8;
    writer.write_bits((bias & 0xFFFF_FFFF) as u32, bias_width.min(32));
    if bias_width > 32 {
        writer.write_bits(((bias >> 32) & 0xFF) as u32, bias_width - 32);
    }

    let ofm_reload = ofm_index == 0;
    writer.write_bit(ofm_reload);
    if ofm_reload {
        writer.write_bits(0, 16); // scale
        writer.write_bits(0, 6); // shift
        writer.write_bits(0, 8); // zero-point correction
    }

    writer.write_bits(symbols.len() as u32, 17);

    let palette_reload = prev.is_none()
        || prev.and_then(|p| p.palette.as_ref()).map(|p| &p.entries)
            != params.palette.as_ref().map(|p| &p.entries);
    let reload_compression_params = palette_reload
        || prev.map(|p| p.zdiv) != Some(params.zdiv)
        || prev.map(|p| p.wdiv) != Some(params.wdiv)
        || prev.map(|p| p.truncation) != Some(params.truncation)
        || prev.map(|p| p.weight_offset) != Some(params.weight_offset);

    writer.write_bit(reload_compression_params);
    if reload_compression_params {
        let zdiv_field = params.zdiv.unwrap_or(0b111);
        writer.write_bits(zdiv_field, 3);
        let wdiv_field = match params.wdiv {
            Divisor::Grc(d) => d,
            Divisor::Uncompressed => 0b111,
        };
        writer.write_bits(wdiv_field, 3);
        writer.write_bit(params.truncation);
        writer.write_bits(params.weight_offset, 5);
        writer.write_bit(palette_reload);
        if palette_reload {
            if let Some(palette) = &params.palette {
                writer.write_bits(palette.size() as u32 - 1, 5);
                writer.write_bits(palette.bits, 3);
                for &entry in &palette.entries {
                    writer.write_bits(entry, palette.bits + 2);
                }
            } else {
                writer.write_bits(0, 5);
                writer.write_bits(0, 3);
            }
        }
    }

    for &symbol in &symbols {
        let value = match params.palette.as_ref().and_then(|p| p.index_of(symbol)) {
            Some(idx) => idx,
            None => symbol.saturating_sub(params.weight_offset),
        };
        match params.wdiv {
            Divisor::Grc(d) => {
                let (q, r) = (value >> d, value & ((1u32 << d) - 1));
                if params.truncation {
                    // Quotients are admissible only up to 2 under
                    // truncation, so a 2-bit field replaces the unary
                    // code instead of q+1 bits.
                    writer.write_bits(q, 2);
                } else {
                    writer.write_zero_run(q);
                    writer.write_bit(true);
                }
                writer.write_bits(r, d);
            }
            Divisor::Uncompressed => {
                let width = (32 - symbols.iter().copied().max().unwrap_or(0).leading_zeros()).max(2);
                writer.write_bits(value, width);
            }
        }
    }

    let bytes = writer.into_bytes();
    (
        OfmStream {
            bytes,
            length_placeholder_bit,
        },
        params,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Quantization;

    fn quant(zero_point: i32) -> Quantization {
        Quantization::PerTensor { zero_point, scale: 1.0 }
    }

    fn request(shape: TensorShape, weights: Vec<i32>) -> WeightEncodingRequest {
        WeightEncodingRequest {
            weights,
            biases: vec![0; shape.c as usize],
            weight_shape: shape,
            layout: WeightLayout::Hwio,
            input_quantization: quant(0),
            weight_quantization: quant(0),
            output_quantization: quant(0),
            output_data_type: DataType::U8,
            mce_op: MceOperation::Convolution,
            algorithm: MceAlgorithm::Direct,
            stride_x: 1,
            stride_y: 1,
            num_iterations_ofm: 1,
            capabilities: Capabilities::default_profile(),
        }
    }

    #[test]
    fn weight_symbol_maps_sign_into_low_bit() {
        assert_eq!(weight_symbol(0), 0);
        assert_eq!(weight_symbol(3), 6);
        assert_eq!(weight_symbol(-3), 5);
    }

    #[test]
    fn raw_stream_direct_pads_short_last_ifm_slice() {
        let shape = TensorShape::new(3, 1, 1, 2); // I=3, H=1, W=1, O=2
        let weights = vec![1, 2, 3, 4, 5, 6]; // I*O = 6 entries
        let out = raw_stream_hwio_direct(shape, &weights, 2, 0);
        // num_igs=2 over I=3 -> 2 slices, second slice half-padded.
        assert_eq!(out.len(), 2 * 1 * 1 * 2 * 2);
    }

    #[test]
    fn encode_ofm_writes_a_nonempty_stream_with_reload_on_first_ofm() {
        let shape = TensorShape::new(4, 1, 1, 1);
        let weights = vec![0, 1, 2, 3];
        let req = request(shape, weights);
        let (stream, params) = encode_ofm(&req, 0, 10, None);
        assert!(!stream.bytes.is_empty());
        assert!(params.cost_bits > 0 || params.palette.is_some());
    }

    #[test]
    fn second_ofm_with_identical_params_skips_reload() {
        let shape = TensorShape::new(4, 1, 1, 1);
        let weights = vec![0, 1, 2, 3];
        let req = request(shape, weights);
        let (_first_stream, first_params) = encode_ofm(&req, 0, 0, None);
        let (_second_stream, second_params) = encode_ofm(&req, 0, 0, Some(&first_params));
        assert_eq!(first_params.wdiv, second_params.wdiv);
    }
}
