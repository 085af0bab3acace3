//! Compilation options: the knobs a caller can set independently of
//! the hardware capability record itself.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Per-compilation tuning, as distinct from [`Capabilities`](crate::capabilities::Capabilities)
/// which describes the chip rather than this particular run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompilationOptions {
    /// Falls back intermediate DRAM packing to simple bump allocation
    /// instead of lifetime-aware first-fit reuse — useful when
    /// debugging a suspected buffer-aliasing bug, since every intermediate
    /// then gets its own disjoint region.
    #[serde(default)]
    pub debug_disable_buffer_reuse: bool,
    /// When set, the materialized op-graph and final DRAM layout are each
    /// dumped here as JSON after compilation.
    #[serde(default)]
    pub debug_dump_dir: Option<PathBuf>,
    /// Overrides the thread pool's worker count; `None` defers to
    /// `ETHOSN_SUPPORT_LIBRARY_NUM_THREADS` / available parallelism.
    #[serde(default)]
    pub thread_count_override: Option<usize>,
}

impl CompilationOptions {
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_disable_nothing() {
        let opts = CompilationOptions::default();
        assert!(!opts.debug_disable_buffer_reuse);
        assert!(opts.debug_dump_dir.is_none());
        assert!(opts.thread_count_override.is_none());
    }

    #[test]
    fn round_trips_through_toml() {
        let opts = CompilationOptions {
            debug_disable_buffer_reuse: true,
            debug_dump_dir: Some(PathBuf::from("/tmp/dump")),
            thread_count_override: Some(4),
        };
        let s = toml::to_string(&opts).unwrap();
        let back = CompilationOptions::from_toml_str(&s).unwrap();
        assert_eq!(opts, back);
    }
}
