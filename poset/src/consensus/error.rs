/// Consensus engine errors

use super::block::BlockError;
use crate::crypto::Hash;
use crate::event::EventError;
use crate::storage::StorageError;
use thiserror::Error;

/// Coarse classification callers use to decide how to react
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The offending unit is rejected and never partially applied
    Validation,
    /// Retry once more data has arrived
    Consistency,
    /// Propagated from the store
    Storage,
    /// Malformed payload from a peer
    Protocol,
}

#[derive(Error, Debug)]
pub enum PosetError {
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Unknown parent {0}")]
    UnknownParent(Hash),

    #[error("Duplicate event {0}")]
    DuplicateEvent(Hash),

    #[error("Unknown creator {0}")]
    UnknownCreator(String),

    #[error("Other-parent {0} belongs to the event's creator")]
    InvalidOtherParent(Hash),

    #[error("Fork detected: creator {creator} already has index {index}")]
    ForkDetected { creator: String, index: u64 },

    #[error("Block has {valid} valid signatures, needs more than {trust_count}")]
    InsufficientSignatures { valid: usize, trust_count: usize },

    #[error("Parent not inserted: creator {creator} index {index}, expected {expected}")]
    ParentNotInserted {
        creator: String,
        index: u64,
        expected: u64,
    },

    #[error("Missing parent {0}")]
    MissingParent(Hash),

    #[error("Unknown parent: creator {creator_id} index {index}")]
    UnknownWireParent { creator_id: usize, index: u64 },

    #[error("Consensus stalled at round {round}")]
    StalledConsensus { round: u64 },

    #[error("No anchor block")]
    NoAnchorBlock,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Malformed wire event: {0}")]
    MalformedWire(String),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Block error: {0}")]
    Block(#[from] BlockError),
}

impl PosetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PosetError::InvalidSignature
            | PosetError::UnknownParent(_)
            | PosetError::DuplicateEvent(_)
            | PosetError::UnknownCreator(_)
            | PosetError::InvalidOtherParent(_)
            | PosetError::ForkDetected { .. }
            | PosetError::InsufficientSignatures { .. } => ErrorKind::Validation,

            PosetError::ParentNotInserted { .. }
            | PosetError::MissingParent(_)
            | PosetError::UnknownWireParent { .. }
            | PosetError::StalledConsensus { .. }
            | PosetError::NoAnchorBlock => ErrorKind::Consistency,

            PosetError::Storage(_) => ErrorKind::Storage,

            PosetError::MalformedWire(_)
            | PosetError::MalformedFrame(_)
            | PosetError::Event(_)
            | PosetError::Block(_) => ErrorKind::Protocol,
        }
    }
}

pub type Result<T> = std::result::Result<T, PosetError>;
