//! Hardware capability descriptor.
//!
//! Treated as an opaque record of numeric constants: this crate
//! never branches on a specific chip identity, only on the fields here.
//! Grounded on `HardwareCapabilities` in the Ethos-N driver stack
//! (`original_source/driver/support_library/src/Utils.hpp`).

use serde::{Deserialize, Serialize};

use crate::tensor::TensorShape;

/// 8x8x16 — the smallest unit of DMAable NHWCB data.
pub const BRICK_GROUP_SHAPE: TensorShape = TensorShape {
    n: 1,
    h: 8,
    w: 8,
    c: 16,
};

/// 4x4 patch, the MCE's atomic processing granule.
pub const PATCH_SHAPE: TensorShape = TensorShape {
    n: 1,
    h: 4,
    w: 4,
    c: 1,
};

/// FCAF "deep" compressed cell: 8x8x32.
pub const FCAF_DEEP_CELL_SHAPE: TensorShape = TensorShape {
    n: 1,
    h: 8,
    w: 8,
    c: 32,
};

/// FCAF "wide" compressed cell: 8x16x16.
pub const FCAF_WIDE_CELL_SHAPE: TensorShape = TensorShape {
    n: 1,
    h: 8,
    w: 16,
    c: 16,
};

/// Fixed compressed-cell size in bytes, shared by both FCAF variants.
pub const FCAF_CELL_SIZE_BYTES: u32 = 2112;

/// Immutable hardware capability record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    pub num_engines: u32,
    pub igs_per_engine: u32,
    pub ogs_per_engine: u32,
    pub srams_per_engine: u32,
    pub sram_size_bytes: u32,
    pub boundary_stripe_height: u32,
    pub num_slots: u32,
    pub macs_per_og: u32,
    pub accumulators_per_og: u32,
    pub max_ple_kernel_size: u32,
}

impl Capabilities {
    /// Total SRAM across all engines.
    pub fn total_sram_bytes(&self) -> u32 {
        self.sram_size_bytes * self.num_engines
    }

    /// Number of independent SRAM banks, used as the divisor when turning
    /// a total byte demand into a per-bank allocation.
    pub fn num_srams(&self) -> u32 {
        self.srams_per_engine * self.num_engines
    }

    pub fn num_ogs(&self) -> u32 {
        self.ogs_per_engine * self.num_engines
    }

    pub fn num_igs(&self) -> u32 {
        self.igs_per_engine * self.num_engines
    }

    /// `(3 * IGs * Engines) / 4`, the GRC chunk-packing size used for
    /// weight quotient padding and for ZDiv < 3 zero-run
    /// padding.
    pub fn grc_pack_size_three_quarters(&self) -> u32 {
        (3 * self.igs_per_engine * self.num_engines) / 4
    }

    /// `(IGs * Engines) / 2`, the zero-run pack size for ZDiv == 3.
    pub fn grc_pack_size_half(&self) -> u32 {
        (self.igs_per_engine * self.num_engines) / 2
    }

    /// A reasonable default profile, loosely modeled on a small
    /// single-engine Ethos-N configuration. Intended for tests and as a
    /// scaffold default, not a claim about any particular silicon SKU.
    pub fn default_profile() -> Self {
        Capabilities {
            num_engines: 1,
            igs_per_engine: 8,
            ogs_per_engine: 8,
            srams_per_engine: 4,
            sram_size_bytes: 1024 * 1024,
            boundary_stripe_height: 8,
            num_slots: 4,
            macs_per_og: 8,
            accumulators_per_og: 8,
            max_ple_kernel_size: 7,
        }
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_profile_is_self_consistent() {
        let caps = Capabilities::default_profile();
        assert_eq!(caps.total_sram_bytes(), 1024 * 1024);
        assert_eq!(caps.num_srams(), 4);
        assert_eq!(caps.num_ogs(), 8);
    }

    #[test]
    fn grc_pack_sizes_match_spec_formula() {
        let caps = Capabilities::default_profile();
        assert_eq!(caps.grc_pack_size_three_quarters(), (3 * 8 * 1) / 4);
        assert_eq!(caps.grc_pack_size_half(), (8 * 1) / 2);
    }

    #[test]
    fn round_trips_through_toml() {
        let caps = Capabilities::default_profile();
        let s = toml::to_string(&caps).unwrap();
        let back = Capabilities::from_toml_str(&s).unwrap();
        assert_eq!(caps, back);
    }
}
