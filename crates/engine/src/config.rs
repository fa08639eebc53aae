use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_SETTLE_ITERATIONS: usize = 10_000;
pub const DEFAULT_MAX_CASCADE_DEPTH: usize = 64;

/// Engine tuning knobs. Missing fields fall back to their defaults when
/// deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Recomputations allowed per batch before it fails with
    /// `ComputeDivergence`.
    pub max_settle_iterations: usize,
    /// Levels of causal relations followed by a single delete.
    pub max_cascade_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_settle_iterations: DEFAULT_MAX_SETTLE_ITERATIONS,
            max_cascade_depth: DEFAULT_MAX_CASCADE_DEPTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct SettleOnly {
        max_settle_iterations: usize,
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let bytes = rmp_serde::to_vec_named(&SettleOnly { max_settle_iterations: 5 }).unwrap();
        let config: EngineConfig = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(config.max_settle_iterations, 5);
        assert_eq!(config.max_cascade_depth, DEFAULT_MAX_CASCADE_DEPTH);
    }
}
