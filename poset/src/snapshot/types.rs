/// Snapshot types
///
/// A frame captures everything a node needs to resume consensus after a
/// decided round without the history below it.

use crate::crypto::{hash_data, Hash};
use crate::event::{Event, EventBody, EventError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reference to an event that may no longer be stored locally
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootEvent {
    pub hash: Hash,
    pub creator_id: usize,
    /// `None` for the genesis root of a participant with no events
    pub index: Option<u64>,
    pub lamport: Option<u64>,
    pub round: Option<u64>,
}

impl RootEvent {
    pub fn from_event(event: &Event) -> Self {
        Self {
            hash: event.hash(),
            creator_id: event.creator_id,
            index: Some(event.index()),
            lamport: event.lamport,
            round: event.round,
        }
    }
}

/// Per-participant frontier below which history is not kept
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    /// Synthetic self-parent of the participant's next event
    pub self_parent: RootEvent,
    /// Other-parents referenced from above the frontier, by hash
    pub others: BTreeMap<Hash, RootEvent>,
}

impl Root {
    /// Root of a participant that has not created any event
    pub fn genesis(creator_id: usize, pubkey_hex: &str) -> Self {
        Self {
            self_parent: RootEvent {
                hash: hash_data(format!("root:{}", pubkey_hex).as_bytes()),
                creator_id,
                index: None,
                lamport: None,
                round: None,
            },
            others: BTreeMap::new(),
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.self_parent.index.is_none()
    }

    /// Resolve `hash` against this root's references
    pub fn find(&self, hash: &Hash) -> Option<&RootEvent> {
        if self.self_parent.hash == *hash {
            return Some(&self.self_parent);
        }
        self.others.get(hash)
    }
}

/// Event shipped inside a frame, with the metadata the receiver cannot
/// recompute without the pruned history
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameEvent {
    pub body: EventBody,
    pub signature: Vec<u8>,
    pub round: u64,
    pub lamport: u64,
    pub witness: bool,
}

impl FrameEvent {
    pub fn to_event(&self) -> Result<Event, EventError> {
        let mut event = Event::new(self.body.clone(), self.signature.clone())?;
        event.round = Some(self.round);
        event.lamport = Some(self.lamport);
        Ok(event)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub round: u64,
    /// One root per participant id
    pub roots: Vec<Root>,
    /// Events received in `round`, in consensus order
    pub events: Vec<FrameEvent>,
}

impl Frame {
    pub fn hash(&self) -> Result<Hash, EventError> {
        let bytes = bincode::serialize(self).map_err(|e| EventError::Serialization(e.to_string()))?;
        Ok(hash_data(&bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_root_is_deterministic() {
        let a = Root::genesis(0, "0xABCD");
        let b = Root::genesis(0, "0xABCD");
        let c = Root::genesis(1, "0xBCDE");

        assert_eq!(a, b);
        assert_ne!(a.self_parent.hash, c.self_parent.hash);
        assert!(a.is_genesis());
        assert!(a.find(&a.self_parent.hash).is_some());
    }

    #[test]
    fn test_frame_hash_covers_roots() {
        let frame = Frame {
            round: 2,
            roots: vec![Root::genesis(0, "0x01")],
            events: vec![],
        };
        let mut other = frame.clone();
        other.roots[0].self_parent.round = Some(1);

        assert_eq!(frame.hash().unwrap(), frame.clone().hash().unwrap());
        assert_ne!(frame.hash().unwrap(), other.hash().unwrap());
    }
}
