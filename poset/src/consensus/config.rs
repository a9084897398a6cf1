use serde::{Deserialize, Serialize};

/// Consensus engine configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PosetConfig {
    /// Rounds a witness may stay undecided behind the last known round
    /// before the engine reports a stall
    pub max_round_lookahead: u64,
}

impl Default for PosetConfig {
    fn default() -> Self {
        Self {
            max_round_lookahead: 64,
        }
    }
}
