//! Golomb-Rice parameter search: `quotient = x >> d`,
//! `remainder = x & ((1<<d)-1)`. Two independent searches share this
//! module — the weight-residual search (`WDiv`) and the zero-run search
//! (`ZDiv`) — since both minimize the same chunk cost model over a
//! divisor exponent.

/// `WDiv` candidate, or the "uncompressed" fallback (no divisor at all).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Divisor {
    Uncompressed,
    Grc(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrcParams {
    pub divisor: Divisor,
    pub truncation: bool,
    pub cost_bits: u64,
}

fn quotient_remainder(symbol: u32, d: u32) -> (u32, u32) {
    (symbol >> d, symbol & ((1u32 << d) - 1))
}

/// True iff every symbol's quotient at divisor `d` fits in 5 bits (the
/// hardware's max unary-extension length).
fn all_quotients_admissible(symbols: &[u32], d: u32) -> bool {
    symbols.iter().all(|&s| (s >> d) <= 31)
}

fn truncation_admissible(symbols: &[u32], d: u32) -> bool {
    symbols.len() <= 3 && symbols.iter().all(|&s| (s >> d) <= 2)
}

/// Chunk cost model: unary0 contributes one bit per symbol
/// (folded into `sum_q - w_unary1_len` rounding against the pack size),
/// unary1 extends by one bit per symbol whose quotient needs continuation
/// (`q >= 2`), and remainders cost `d` bits each.
fn grc_cost_bits(symbols: &[u32], d: u32, pack_size: u32) -> u64 {
    let sum_q: u64 = symbols.iter().map(|&s| (s >> d) as u64).sum();
    let w_unary1_len: u64 = symbols.iter().filter(|&&s| (s >> d) >= 2).count() as u64;
    let sum_remainders: u64 = symbols.len() as u64 * d as u64;
    let base = sum_q.saturating_sub(w_unary1_len);
    let pack = pack_size.max(1) as u64;
    let rounded = base.div_ceil(pack) * pack;
    rounded + w_unary1_len + sum_remainders
}

fn truncation_cost_bits(symbols: &[u32], d: u32) -> u64 {
    let n = symbols.len() as u64;
    let extra_bits: u64 = symbols.iter().filter(|&&s| (s >> d) > 0).count() as u64;
    let sum_remainders: u64 = symbols.len() as u64 * d as u64;
    n + extra_bits + sum_remainders
}

fn uncompressed_cost_bits(symbols: &[u32]) -> u64 {
    let max_symbol = symbols.iter().copied().max().unwrap_or(0);
    let width = (32 - max_symbol.leading_zeros()).max(2);
    symbols.len() as u64 * width as u64
}

/// Search `WDiv in 0..=5` (plus the uncompressed fallback), minimizing
/// `grc_cost_bits`/`truncation_cost_bits`, and return the cheapest.
pub fn search_weight_divisor(symbols: &[u32], pack_size: u32) -> GrcParams {
    let mut best = GrcParams {
        divisor: Divisor::Uncompressed,
        truncation: false,
        cost_bits: uncompressed_cost_bits(symbols),
    };

    for d in 0..=5u32 {
        if !all_quotients_admissible(symbols, d) {
            continue;
        }
        let plain_cost = grc_cost_bits(symbols, d, pack_size);
        if plain_cost < best.cost_bits {
            best = GrcParams {
                divisor: Divisor::Grc(d),
                truncation: false,
                cost_bits: plain_cost,
            };
        }
        if truncation_admissible(symbols, d) {
            let truncated_cost = truncation_cost_bits(symbols, d);
            if truncated_cost < best.cost_bits {
                best = GrcParams {
                    divisor: Divisor::Grc(d),
                    truncation: true,
                    cost_bits: truncated_cost,
                };
            }
        }
    }

    best
}

/// Search `ZDiv in 0..=3` for the zero-run length table. Pack size is
/// `(3*igs*engines)/4` for `ZDiv < 3` and `(igs*engines)/2` for `ZDiv == 3`.
pub fn search_zero_run_divisor(
    run_lengths: &[u32],
    pack_size_three_quarters: u32,
    pack_size_half: u32,
) -> Option<GrcParams> {
    if run_lengths.is_empty() {
        return None;
    }
    let mut best: Option<GrcParams> = None;
    for d in 0..=3u32 {
        if !all_quotients_admissible(run_lengths, d) {
            continue;
        }
        let pack_size = if d < 3 { pack_size_three_quarters } else { pack_size_half };
        let cost = grc_cost_bits(run_lengths, d, pack_size);
        let better = match best {
            Some(b) => cost < b.cost_bits,
            None => true,
        };
        if better {
            best = Some(GrcParams {
                divisor: Divisor::Grc(d),
                truncation: false,
                cost_bits: cost,
            });
        }
    }
    best
}
