/// Sync protocol types
///
/// Messages exchanged between nodes. Transport is left to the caller; every
/// message is serde-serializable.

use crate::consensus::Block;
use crate::event::WireEvent;
use crate::snapshot::Frame;
use crate::storage::KnownEvents;
use serde::{Deserialize, Serialize};

/// Pull request: "here is what I know, send me the rest"
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    pub from_id: usize,
    pub known: KnownEvents,
}

impl SyncRequest {
    pub fn new(from_id: usize, known: KnownEvents) -> Self {
        Self { from_id, known }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub from_id: usize,
    /// Set instead of `events` when the requester is too far behind
    pub sync_limit: bool,
    pub events: Vec<WireEvent>,
    pub known: KnownEvents,
}

impl SyncResponse {
    pub fn new(from_id: usize, events: Vec<WireEvent>, known: KnownEvents) -> Self {
        Self {
            from_id,
            sync_limit: false,
            events,
            known,
        }
    }

    pub fn over_limit(from_id: usize, known: KnownEvents) -> Self {
        Self {
            from_id,
            sync_limit: true,
            events: Vec::new(),
            known,
        }
    }
}

/// Push: events the sender believes the receiver is missing
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EagerSyncRequest {
    pub from_id: usize,
    pub events: Vec<WireEvent>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EagerSyncResponse {
    pub from_id: usize,
    pub success: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastForwardRequest {
    pub from_id: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastForwardResponse {
    pub from_id: usize,
    pub block: Block,
    pub frame: Frame,
}
