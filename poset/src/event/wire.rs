/// Compact gossip form of an event
///
/// Parents are referenced by `(creator id, index)` instead of by hash, and
/// the creator by participant id. The receiver resolves both against its own
/// store, which is why wire events must arrive in topological order.

use super::{BlockSignature, EventBody, InternalTransaction};
use crate::crypto::Hash;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireBody {
    pub transactions: Vec<Vec<u8>>,
    pub internal_transactions: Vec<InternalTransaction>,
    pub block_signatures: Vec<BlockSignature>,

    pub self_parent_index: Option<u64>,
    pub other_parent_creator_id: Option<usize>,
    pub other_parent_index: Option<u64>,
    pub creator_id: usize,

    pub index: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEvent {
    pub body: WireBody,
    pub signature: Vec<u8>,
}

impl WireBody {
    /// Rebuild the signed body once parent hashes and creator key are resolved
    pub fn into_event_body(
        self,
        creator: Vec<u8>,
        self_parent: Option<Hash>,
        other_parent: Option<Hash>,
    ) -> EventBody {
        EventBody {
            transactions: self.transactions,
            internal_transactions: self.internal_transactions,
            block_signatures: self.block_signatures,
            self_parent,
            other_parent,
            creator,
            index: self.index,
        }
    }
}
