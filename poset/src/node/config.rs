use crate::consensus::PosetConfig;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Cap on transactions packed into one self-event; the rest wait for the
    /// next event
    pub max_transactions_in_event: usize,
    pub poset: PosetConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_transactions_in_event: 16384,
            poset: PosetConfig::default(),
        }
    }
}
