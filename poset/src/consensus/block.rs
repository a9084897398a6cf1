/// Blocks: the ordered, externally visible output of consensus

use crate::crypto::{hash_data, ECDSAError, ECDSAPublicKey, ECDSASecretKey, ECDSASignature, Hash};
use crate::event::{BlockSignature, InternalTransaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlockError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Signature for block {got} applied to block {expected}")]
    WrongIndex { expected: u64, got: u64 },

    #[error("Crypto error: {0}")]
    Crypto(#[from] ECDSAError),
}

pub type Result<T> = std::result::Result<T, BlockError>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockBody {
    pub index: u64,
    pub round_received: u64,
    /// Hash of the frame that defines `round_received`
    pub frame_hash: Hash,
    pub transactions: Vec<Vec<u8>>,
    pub internal_transactions: Vec<InternalTransaction>,
}

impl BlockBody {
    pub fn hash(&self) -> Result<Hash> {
        let bytes = bincode::serialize(self).map_err(|e| BlockError::Serialization(e.to_string()))?;
        Ok(hash_data(&bytes))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub body: BlockBody,
    /// Validator public-key hex to signature hex
    pub signatures: BTreeMap<String, String>,
}

impl Block {
    pub fn new(
        index: u64,
        round_received: u64,
        frame_hash: Hash,
        transactions: Vec<Vec<u8>>,
        internal_transactions: Vec<InternalTransaction>,
    ) -> Self {
        Self {
            body: BlockBody {
                index,
                round_received,
                frame_hash,
                transactions,
                internal_transactions,
            },
            signatures: BTreeMap::new(),
        }
    }

    pub fn index(&self) -> u64 {
        self.body.index
    }

    pub fn round_received(&self) -> u64 {
        self.body.round_received
    }

    pub fn frame_hash(&self) -> Hash {
        self.body.frame_hash
    }

    pub fn transactions(&self) -> &[Vec<u8>] {
        &self.body.transactions
    }

    /// Block hash; signatures are not part of it
    pub fn hash(&self) -> Result<Hash> {
        self.body.hash()
    }

    pub fn sign(&self, key: &ECDSASecretKey) -> Result<BlockSignature> {
        let hash = self.hash()?;
        Ok(BlockSignature {
            validator: key.public_key().to_bytes(),
            index: self.index(),
            signature: key.sign(hash.as_bytes()).to_hex(),
        })
    }

    pub fn verify(&self, signature: &BlockSignature) -> Result<bool> {
        if signature.index != self.index() {
            return Ok(false);
        }
        let public_key = ECDSAPublicKey::from_bytes(&signature.validator)?;
        let sig = match ECDSASignature::from_hex(&signature.signature) {
            Ok(sig) => sig,
            Err(_) => return Ok(false),
        };
        Ok(public_key.verify(self.hash()?.as_bytes(), &sig))
    }

    pub fn set_signature(&mut self, signature: BlockSignature) -> Result<()> {
        if signature.index != self.index() {
            return Err(BlockError::WrongIndex {
                expected: self.index(),
                got: signature.index,
            });
        }
        self.signatures
            .insert(signature.validator_hex(), signature.signature);
        Ok(())
    }

    /// Reassemble the gossip form of the signature held for `validator_hex`
    pub fn get_signature(&self, validator_hex: &str) -> Option<BlockSignature> {
        let signature = self.signatures.get(validator_hex)?;
        let validator = hex::decode(validator_hex.trim_start_matches("0x")).ok()?;
        Some(BlockSignature {
            validator,
            index: self.index(),
            signature: signature.clone(),
        })
    }
}
