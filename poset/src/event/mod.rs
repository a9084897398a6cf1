/// DAG events
///
/// An event is a signed vertex with up to two parents: the creator's
/// previous event (self-parent) and an event received from another
/// participant (other-parent). The signed body is immutable; the engine
/// only attaches consensus metadata (Lamport timestamp, ancestry, round,
/// round received) after insertion.

pub mod flag_table;
pub mod ordering;
pub mod wire;

use crate::crypto::{hash_data, hash_parts, pub_key_hex, signature_r, ECDSAError, ECDSAPublicKey, ECDSASecretKey, ECDSASignature, Hash};
use crate::peers::Peer;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use flag_table::FlagTable;
pub use ordering::{consensus_order, topological_order};
pub use wire::{WireBody, WireEvent};

#[derive(Error, Debug)]
pub enum EventError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] ECDSAError),
}

pub type Result<T> = std::result::Result<T, EventError>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionType {
    PeerAdd,
    PeerRemove,
}

/// Administrative transaction carried alongside application payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalTransaction {
    pub kind: TransactionType,
    pub peer: Peer,
}

impl InternalTransaction {
    pub fn new(kind: TransactionType, peer: Peer) -> Self {
        Self { kind, peer }
    }
}

/// A validator's signature over a block, gossiped inside events
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSignature {
    /// Validator public key bytes
    pub validator: Vec<u8>,
    /// Index of the signed block
    pub index: u64,
    /// Hex encoded `r || s`
    pub signature: String,
}

impl BlockSignature {
    pub fn validator_hex(&self) -> String {
        pub_key_hex(&self.validator)
    }
}

/// The signed part of an event
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBody {
    pub transactions: Vec<Vec<u8>>,
    pub internal_transactions: Vec<InternalTransaction>,
    pub block_signatures: Vec<BlockSignature>,
    pub self_parent: Option<Hash>,
    pub other_parent: Option<Hash>,
    pub creator: Vec<u8>,
    pub index: u64,
}

impl EventBody {
    pub fn marshal(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| EventError::Serialization(e.to_string()))
    }

    /// Digest the creator signs
    pub fn hash(&self) -> Result<Hash> {
        Ok(hash_data(&self.marshal()?))
    }
}

/// Position of an event in its creator's chain
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventCoordinates {
    pub index: u64,
    pub hash: Hash,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    body: EventBody,
    signature: Vec<u8>,
    hash: Hash,

    /// Participant id of the creator, set on insertion
    pub creator_id: usize,
    /// Local insertion order, consistent with causality
    pub topological_index: u64,
    pub lamport: Option<u64>,
    /// Latest ancestor of this event per participant id
    pub last_ancestors: Vec<Option<EventCoordinates>>,
    pub flag_table: FlagTable,
    pub round: Option<u64>,
    pub round_received: Option<u64>,
}

impl Event {
    /// Wrap an already signed body
    pub fn new(body: EventBody, signature: Vec<u8>) -> Result<Self> {
        let hash = Self::compute_hash(&body, &signature)?;
        Ok(Self {
            body,
            signature,
            hash,
            creator_id: 0,
            topological_index: 0,
            lamport: None,
            last_ancestors: Vec::new(),
            flag_table: FlagTable::new(),
            round: None,
            round_received: None,
        })
    }

    pub fn new_unsigned(body: EventBody) -> Result<Self> {
        Self::new(body, Vec::new())
    }

    fn compute_hash(body: &EventBody, signature: &[u8]) -> Result<Hash> {
        Ok(hash_parts(&[&body.marshal()?, signature]))
    }

    /// Sign the body hash with the creator's key
    pub fn sign(&mut self, key: &ECDSASecretKey) -> Result<()> {
        let digest = self.body.hash()?;
        self.signature = key.sign(digest.as_bytes()).to_bytes();
        self.hash = Self::compute_hash(&self.body, &self.signature)?;
        Ok(())
    }

    /// Check the signature against the creator key in the body
    pub fn verify(&self) -> Result<bool> {
        let public_key = ECDSAPublicKey::from_bytes(&self.body.creator)?;
        let signature = match ECDSASignature::from_bytes(&self.signature) {
            Ok(signature) => signature,
            Err(_) => return Ok(false),
        };
        let digest = self.body.hash()?;
        Ok(public_key.verify(digest.as_bytes(), &signature))
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn body(&self) -> &EventBody {
        &self.body
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Numeric `r` of the signature, the consensus tie-breaker
    pub fn signature_r(&self) -> [u8; 32] {
        signature_r(&self.signature)
    }

    pub fn creator(&self) -> &[u8] {
        &self.body.creator
    }

    pub fn creator_hex(&self) -> String {
        pub_key_hex(&self.body.creator)
    }

    pub fn self_parent(&self) -> Option<Hash> {
        self.body.self_parent
    }

    pub fn other_parent(&self) -> Option<Hash> {
        self.body.other_parent
    }

    pub fn index(&self) -> u64 {
        self.body.index
    }

    pub fn transactions(&self) -> &[Vec<u8>] {
        &self.body.transactions
    }

    pub fn internal_transactions(&self) -> &[InternalTransaction] {
        &self.body.internal_transactions
    }

    pub fn block_signatures(&self) -> &[BlockSignature] {
        &self.body.block_signatures
    }

    /// True when the event carries any payload
    pub fn is_loaded(&self) -> bool {
        !self.body.transactions.is_empty()
            || !self.body.internal_transactions.is_empty()
            || !self.body.block_signatures.is_empty()
    }

    /// Copy of the signed part with all local metadata cleared
    pub fn stripped(&self) -> Event {
        Event {
            body: self.body.clone(),
            signature: self.signature.clone(),
            hash: self.hash,
            creator_id: 0,
            topological_index: 0,
            lamport: None,
            last_ancestors: Vec::new(),
            flag_table: FlagTable::new(),
            round: None,
            round_received: None,
        }
    }
}
