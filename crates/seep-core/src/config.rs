//! Engine configuration supplied by the host.
//!
//! Plain data; config-file loading is the host's concern. Serde derives
//! are provided so hosts can deserialize from whatever format they use.

use serde::{Deserialize, Serialize};

/// Tuning knobs for a whole-program analysis run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Analyze every declared function/method not reached from call
    /// sites, with maximally tainted parameters, to surface sinks in
    /// otherwise-unreached code.
    pub scan_all_subroutines: bool,

    /// Analyze callee bodies for unknown functions instead of applying
    /// the conservative fully-tainted default.
    pub function_summaries: bool,

    /// Worker threads for the parallel phases. `0` lets rayon decide.
    pub threads: usize,

    /// Fixpoint backstop: a traversal aborts (keeping its partial,
    /// conservative result) after `max_passes_per_block * block_count`
    /// worklist pops.
    pub max_passes_per_block: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            scan_all_subroutines: false,
            function_summaries: true,
            threads: 0,
            max_passes_per_block: 64,
        }
    }
}

impl AnalysisConfig {
    /// Thread count handed to rayon; `0` means "use the default pool".
    pub fn effective_threads(&self) -> usize {
        self.threads
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_conservative() {
        let config = AnalysisConfig::default();
        assert!(!config.scan_all_subroutines);
        assert!(config.function_summaries);
        assert_eq!(config.effective_threads(), 0);
        assert!(config.max_passes_per_block > 0);
    }
}
