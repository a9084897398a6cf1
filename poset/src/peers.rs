/// Static participant set
///
/// Every node must derive the same public-key to id mapping, so ids are
/// assigned densely (`0..n`) in order of the sorted public-key hex strings.
/// The set never changes for the lifetime of an engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PeersError {
    #[error("Peers file error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Empty participant set")]
    Empty,

    #[error("Duplicate participant: {0}")]
    Duplicate(String),

    #[error("Invalid public key for {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, PeersError>;

/// One participant of the consensus
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Dense id, assigned by [`ParticipantSet::new`]
    #[serde(default, skip_serializing)]
    pub id: usize,

    #[serde(rename = "PubKeyHex")]
    pub pubkey_hex: String,

    #[serde(rename = "NetAddr", default)]
    pub net_addr: String,
}

impl Peer {
    pub fn new(pubkey_hex: impl Into<String>, net_addr: impl Into<String>) -> Self {
        Self {
            id: 0,
            pubkey_hex: pubkey_hex.into(),
            net_addr: net_addr.into(),
        }
    }

    /// Raw public key bytes decoded from the hex identity
    pub fn pubkey_bytes(&self) -> Result<Vec<u8>> {
        hex::decode(self.pubkey_hex.trim_start_matches("0x"))
            .map_err(|_| PeersError::InvalidKey(self.pubkey_hex.clone()))
    }
}

/// Fixed mapping between public keys and participant ids
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParticipantSet {
    peers: Vec<Peer>,
    pubkeys: Vec<Vec<u8>>,
    by_pubkey: BTreeMap<String, usize>,
}

impl ParticipantSet {
    /// Build the set, assigning ids by sorted public-key hex
    pub fn new(mut peers: Vec<Peer>) -> Result<Self> {
        if peers.is_empty() {
            return Err(PeersError::Empty);
        }

        peers.sort_by(|a, b| a.pubkey_hex.cmp(&b.pubkey_hex));

        let mut by_pubkey = BTreeMap::new();
        let mut pubkeys = Vec::with_capacity(peers.len());
        for (id, peer) in peers.iter_mut().enumerate() {
            peer.id = id;
            if by_pubkey.insert(peer.pubkey_hex.clone(), id).is_some() {
                return Err(PeersError::Duplicate(peer.pubkey_hex.clone()));
            }
            pubkeys.push(peer.pubkey_bytes()?);
        }

        Ok(Self {
            peers,
            pubkeys,
            by_pubkey,
        })
    }

    /// Parse a JSON peers file: `[{"NetAddr": "...", "PubKeyHex": "0x..."}]`
    pub fn from_json(json: &str) -> Result<Self> {
        let peers: Vec<Peer> = serde_json::from_str(json)?;
        Self::new(peers)
    }

    /// Build from public-key hex strings with empty addresses
    pub fn from_pubkeys<I, T>(pubkeys: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self::new(pubkeys.into_iter().map(|pk| Peer::new(pk, "")).collect())
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Votes needed for a decision: strictly more than two thirds
    pub fn super_majority(&self) -> usize {
        2 * self.len() / 3 + 1
    }

    /// Signatures a block must exceed before it can anchor a fast-forward
    pub fn trust_count(&self) -> usize {
        (self.len() + 2) / 3
    }

    pub fn by_id(&self, id: usize) -> Option<&Peer> {
        self.peers.get(id)
    }

    pub fn by_pubkey(&self, pubkey_hex: &str) -> Option<&Peer> {
        self.id_of(pubkey_hex).and_then(|id| self.peers.get(id))
    }

    pub fn id_of(&self, pubkey_hex: &str) -> Option<usize> {
        self.by_pubkey.get(pubkey_hex).copied()
    }

    /// Public key bytes of participant `id`
    pub fn pubkey(&self, id: usize) -> Option<&[u8]> {
        self.pubkeys.get(id).map(Vec::as_slice)
    }

    /// Participants in id order
    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.iter()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.peers)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ECDSASecretKey;

    fn create_test_keys(n: usize) -> Vec<String> {
        (0..n)
            .map(|_| ECDSASecretKey::generate().public_key().to_hex())
            .collect()
    }

    #[test]
    fn test_ids_follow_sorted_pubkeys() {
        let keys = create_test_keys(5);
        let set = ParticipantSet::from_pubkeys(keys.clone()).unwrap();

        let mut sorted = keys.clone();
        sorted.sort();
        for (id, key) in sorted.iter().enumerate() {
            assert_eq!(set.id_of(key), Some(id));
            assert_eq!(set.by_id(id).unwrap().pubkey_hex, *key);
        }
    }

    #[test]
    fn test_same_mapping_regardless_of_input_order() {
        let keys = create_test_keys(4);
        let mut reversed = keys.clone();
        reversed.reverse();

        let a = ParticipantSet::from_pubkeys(keys).unwrap();
        let b = ParticipantSet::from_pubkeys(reversed).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_quorum_thresholds() {
        let cases = [(1, 1, 1), (3, 3, 1), (4, 3, 2), (5, 4, 2), (7, 5, 3), (10, 7, 4)];
        for (n, super_majority, trust) in cases {
            let set = ParticipantSet::from_pubkeys(create_test_keys(n)).unwrap();
            assert_eq!(set.super_majority(), super_majority, "n = {}", n);
            assert_eq!(set.trust_count(), trust, "n = {}", n);
        }
    }

    #[test]
    fn test_from_json() {
        let keys = create_test_keys(3);
        let json = format!(
            r#"[
                {{"NetAddr": "127.0.0.1:1337", "PubKeyHex": "{}"}},
                {{"NetAddr": "127.0.0.1:1338", "PubKeyHex": "{}"}},
                {{"NetAddr": "127.0.0.1:1339", "PubKeyHex": "{}"}}
            ]"#,
            keys[0], keys[1], keys[2]
        );

        let set = ParticipantSet::from_json(&json).unwrap();
        assert_eq!(set.len(), 3);
        let peer = set.by_pubkey(&keys[1]).unwrap();
        assert_eq!(peer.net_addr, "127.0.0.1:1338");
        assert_eq!(set.pubkey(peer.id).unwrap(), peer.pubkey_bytes().unwrap().as_slice());

        let restored = ParticipantSet::from_json(&set.to_json().unwrap()).unwrap();
        assert_eq!(restored, set);
    }

    #[test]
    fn test_rejects_duplicates_and_empty() {
        let key = create_test_keys(1).remove(0);
        assert!(matches!(
            ParticipantSet::from_pubkeys(vec![key.clone(), key]),
            Err(PeersError::Duplicate(_))
        ));
        assert!(matches!(
            ParticipantSet::from_pubkeys(Vec::<String>::new()),
            Err(PeersError::Empty)
        ));
    }
}
