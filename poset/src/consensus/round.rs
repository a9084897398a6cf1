/// Per-round bookkeeping: which events belong to a round, which of them are
/// witnesses, their fame, and the events received in the round.

use crate::crypto::Hash;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Three-valued fame verdict
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trilean {
    #[default]
    Undefined,
    True,
    False,
}

impl From<bool> for Trilean {
    fn from(value: bool) -> Self {
        if value {
            Trilean::True
        } else {
            Trilean::False
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundEvent {
    pub witness: bool,
    pub famous: Trilean,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundInfo {
    pub events: BTreeMap<Hash, RoundEvent>,
    /// Events whose round received is this round, in decision order
    pub received_events: Vec<Hash>,
    /// Set once the round has been turned into consensus output
    pub queued: bool,
}

impl RoundInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_event(&mut self, hash: Hash, witness: bool) {
        self.events.entry(hash).or_insert(RoundEvent {
            witness,
            famous: Trilean::Undefined,
        });
    }

    /// Record a fame decision. Decided verdicts are never revised.
    pub fn set_fame(&mut self, hash: &Hash, famous: bool) {
        if let Some(event) = self.events.get_mut(hash) {
            if event.witness && event.famous == Trilean::Undefined {
                event.famous = famous.into();
            }
        }
    }

    pub fn add_received_event(&mut self, hash: Hash) {
        if !self.received_events.contains(&hash) {
            self.received_events.push(hash);
        }
    }

    pub fn is_witness(&self, hash: &Hash) -> bool {
        self.events.get(hash).map(|e| e.witness).unwrap_or(false)
    }

    pub fn witnesses(&self) -> Vec<Hash> {
        self.events
            .iter()
            .filter(|(_, e)| e.witness)
            .map(|(h, _)| *h)
            .collect()
    }

    pub fn famous_witnesses(&self) -> Vec<Hash> {
        self.events
            .iter()
            .filter(|(_, e)| e.witness && e.famous == Trilean::True)
            .map(|(h, _)| *h)
            .collect()
    }

    pub fn undecided_witnesses(&self) -> Vec<Hash> {
        self.events
            .iter()
            .filter(|(_, e)| e.witness && e.famous == Trilean::Undefined)
            .map(|(h, _)| *h)
            .collect()
    }

    /// True once every known witness has a fame verdict
    pub fn witnesses_decided(&self) -> bool {
        self.events
            .values()
            .filter(|e| e.witness)
            .all(|e| e.famous != Trilean::Undefined)
    }
}
