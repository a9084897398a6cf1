/// Storage layer for the poset
///
/// The engine only talks to the [`Store`] trait. Two implementations:
/// - [`InmemStore`]: authoritative in-memory maps
/// - [`RocksStore`]: RocksDB write-through persistence over an `InmemStore` cache

use crate::consensus::{Block, RoundInfo};
use crate::crypto::Hash;
use crate::event::Event;
use crate::snapshot::{Frame, Root};
use std::collections::BTreeMap;
use thiserror::Error;

pub mod inmem;
pub mod rocks;

pub use inmem::InmemStore;
pub use rocks::RocksStore;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] rocksdb::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Known-events map: participant id to the index of its last known event
pub type KnownEvents = BTreeMap<usize, Option<u64>>;

/// Persistence collaborator of the consensus engine.
///
/// Participants are addressed by public-key hex. A participant with no
/// events stored above its root resolves to the root's self-parent, flagged
/// with `is_root = true`.
pub trait Store: Send {
    fn get_event(&self, hash: &Hash) -> Result<Event>;

    /// Insert a new event or overwrite the metadata of a stored one
    fn set_event(&mut self, event: Event) -> Result<()>;

    /// Hashes of the participant's events with index above `skip`, in index order
    fn participant_events(&self, pubkey_hex: &str, skip: Option<u64>) -> Result<Vec<Hash>>;

    /// Hash of the participant's event (or root) at `index`
    fn participant_event(&self, pubkey_hex: &str, index: u64) -> Result<Hash>;

    fn last_event_from(&self, pubkey_hex: &str) -> Result<(Hash, bool)>;

    fn last_consensus_event_from(&self, pubkey_hex: &str) -> Result<(Hash, bool)>;

    fn known_events(&self) -> KnownEvents;

    fn get_root(&self, pubkey_hex: &str) -> Result<Root>;

    fn roots(&self) -> BTreeMap<String, Root>;

    fn get_round(&self, round: u64) -> Result<RoundInfo>;

    fn set_round(&mut self, round: u64, info: RoundInfo) -> Result<()>;

    fn last_round(&self) -> Option<u64>;

    fn round_witnesses(&self, round: u64) -> Vec<Hash>;

    fn get_block(&self, index: u64) -> Result<Block>;

    fn set_block(&mut self, block: Block) -> Result<()>;

    fn last_block_index(&self) -> Option<u64>;

    /// Lowest stored block index; above zero after a reset from a snapshot
    fn first_block_index(&self) -> Option<u64>;

    fn get_frame(&self, round: u64) -> Result<Frame>;

    fn set_frame(&mut self, frame: Frame) -> Result<()>;

    fn add_consensus_event(&mut self, event: &Event) -> Result<()>;

    fn consensus_events(&self) -> Vec<Hash>;

    fn consensus_events_count(&self) -> u64;

    /// Every stored event in insertion order, read from the durable backend
    /// when there is one
    fn topological_events(&self) -> Result<Vec<Event>>;

    /// Drop all events, rounds, blocks and frames and start over from `roots`
    fn reset(&mut self, roots: BTreeMap<String, Root>) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}
