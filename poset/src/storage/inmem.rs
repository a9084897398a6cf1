/// In-memory store

use super::{KnownEvents, Result, Store, StorageError};
use crate::consensus::{Block, RoundInfo};
use crate::crypto::Hash;
use crate::event::Event;
use crate::peers::ParticipantSet;
use crate::snapshot::{Frame, Root};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

pub struct InmemStore {
    participants: ParticipantSet,
    events: HashMap<Hash, Event>,
    /// Per participant: event index to hash
    participant_events: BTreeMap<String, BTreeMap<u64, Hash>>,
    topological: Vec<Hash>,
    roots: BTreeMap<String, Root>,
    rounds: BTreeMap<u64, RoundInfo>,
    blocks: BTreeMap<u64, Block>,
    frames: BTreeMap<u64, Frame>,
    consensus_events: Vec<Hash>,
    last_consensus_events: BTreeMap<String, Hash>,
}

impl InmemStore {
    /// Empty store with a genesis root for every participant
    pub fn new(participants: ParticipantSet) -> Self {
        let roots = genesis_roots(&participants);
        Self {
            participants,
            events: HashMap::new(),
            participant_events: BTreeMap::new(),
            topological: Vec::new(),
            roots,
            rounds: BTreeMap::new(),
            blocks: BTreeMap::new(),
            frames: BTreeMap::new(),
            consensus_events: Vec::new(),
            last_consensus_events: BTreeMap::new(),
        }
    }

    pub fn participants(&self) -> &ParticipantSet {
        &self.participants
    }

    pub fn contains_event(&self, hash: &Hash) -> bool {
        self.events.contains_key(hash)
    }

    fn root(&self, pubkey_hex: &str) -> Result<&Root> {
        self.roots
            .get(pubkey_hex)
            .ok_or_else(|| StorageError::NotFound(format!("root of {}", pubkey_hex)))
    }
}

pub(crate) fn genesis_roots(participants: &ParticipantSet) -> BTreeMap<String, Root> {
    participants
        .iter()
        .map(|peer| (peer.pubkey_hex.clone(), Root::genesis(peer.id, &peer.pubkey_hex)))
        .collect()
}

impl Store for InmemStore {
    fn get_event(&self, hash: &Hash) -> Result<Event> {
        self.events
            .get(hash)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("event {}", hash)))
    }

    fn set_event(&mut self, event: Event) -> Result<()> {
        let hash = event.hash();
        if !self.events.contains_key(&hash) {
            self.participant_events
                .entry(event.creator_hex())
                .or_default()
                .insert(event.index(), hash);
            self.topological.push(hash);
        }
        self.events.insert(hash, event);
        Ok(())
    }

    fn participant_events(&self, pubkey_hex: &str, skip: Option<u64>) -> Result<Vec<Hash>> {
        if self.participants.id_of(pubkey_hex).is_none() {
            return Err(StorageError::NotFound(format!("participant {}", pubkey_hex)));
        }
        let events = match self.participant_events.get(pubkey_hex) {
            Some(events) => events,
            None => return Ok(Vec::new()),
        };
        let hashes = match skip {
            Some(skip) => events
                .range((Bound::Excluded(skip), Bound::Unbounded))
                .map(|(_, h)| *h)
                .collect(),
            None => events.values().copied().collect(),
        };
        Ok(hashes)
    }

    fn participant_event(&self, pubkey_hex: &str, index: u64) -> Result<Hash> {
        if let Some(hash) = self
            .participant_events
            .get(pubkey_hex)
            .and_then(|events| events.get(&index))
        {
            return Ok(*hash);
        }
        let root = self.root(pubkey_hex)?;
        if root.self_parent.index == Some(index) {
            return Ok(root.self_parent.hash);
        }
        Err(StorageError::NotFound(format!(
            "event {} of {}",
            index, pubkey_hex
        )))
    }

    fn last_event_from(&self, pubkey_hex: &str) -> Result<(Hash, bool)> {
        if let Some((_, hash)) = self
            .participant_events
            .get(pubkey_hex)
            .and_then(|events| events.iter().next_back())
        {
            return Ok((*hash, false));
        }
        Ok((self.root(pubkey_hex)?.self_parent.hash, true))
    }

    fn last_consensus_event_from(&self, pubkey_hex: &str) -> Result<(Hash, bool)> {
        if let Some(hash) = self.last_consensus_events.get(pubkey_hex) {
            return Ok((*hash, false));
        }
        Ok((self.root(pubkey_hex)?.self_parent.hash, true))
    }

    fn known_events(&self) -> KnownEvents {
        self.participants
            .iter()
            .map(|peer| {
                let last = self
                    .participant_events
                    .get(&peer.pubkey_hex)
                    .and_then(|events| events.keys().next_back().copied())
                    .or_else(|| {
                        self.roots
                            .get(&peer.pubkey_hex)
                            .and_then(|root| root.self_parent.index)
                    });
                (peer.id, last)
            })
            .collect()
    }

    fn get_root(&self, pubkey_hex: &str) -> Result<Root> {
        self.root(pubkey_hex).cloned()
    }

    fn roots(&self) -> BTreeMap<String, Root> {
        self.roots.clone()
    }

    fn get_round(&self, round: u64) -> Result<RoundInfo> {
        self.rounds
            .get(&round)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("round {}", round)))
    }

    fn set_round(&mut self, round: u64, info: RoundInfo) -> Result<()> {
        self.rounds.insert(round, info);
        Ok(())
    }

    fn last_round(&self) -> Option<u64> {
        self.rounds.keys().next_back().copied()
    }

    fn round_witnesses(&self, round: u64) -> Vec<Hash> {
        self.rounds
            .get(&round)
            .map(RoundInfo::witnesses)
            .unwrap_or_default()
    }

    fn get_block(&self, index: u64) -> Result<Block> {
        self.blocks
            .get(&index)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("block {}", index)))
    }

    fn set_block(&mut self, block: Block) -> Result<()> {
        self.blocks.insert(block.index(), block);
        Ok(())
    }

    fn last_block_index(&self) -> Option<u64> {
        self.blocks.keys().next_back().copied()
    }

    fn first_block_index(&self) -> Option<u64> {
        self.blocks.keys().next().copied()
    }

    fn get_frame(&self, round: u64) -> Result<Frame> {
        self.frames
            .get(&round)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("frame {}", round)))
    }

    fn set_frame(&mut self, frame: Frame) -> Result<()> {
        self.frames.insert(frame.round, frame);
        Ok(())
    }

    fn add_consensus_event(&mut self, event: &Event) -> Result<()> {
        self.consensus_events.push(event.hash());
        self.last_consensus_events
            .insert(event.creator_hex(), event.hash());
        Ok(())
    }

    fn consensus_events(&self) -> Vec<Hash> {
        self.consensus_events.clone()
    }

    fn consensus_events_count(&self) -> u64 {
        self.consensus_events.len() as u64
    }

    fn topological_events(&self) -> Result<Vec<Event>> {
        self.topological.iter().map(|h| self.get_event(h)).collect()
    }

    fn reset(&mut self, roots: BTreeMap<String, Root>) -> Result<()> {
        let mut all_roots = genesis_roots(&self.participants);
        all_roots.extend(roots);

        self.events.clear();
        self.participant_events.clear();
        self.topological.clear();
        self.roots = all_roots;
        self.rounds.clear();
        self.blocks.clear();
        self.frames.clear();
        self.consensus_events.clear();
        self.last_consensus_events.clear();
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ECDSASecretKey;
    use crate::event::EventBody;
    use crate::snapshot::RootEvent;

    fn create_test_store(n: usize) -> (InmemStore, Vec<ECDSASecretKey>) {
        let mut keys: Vec<ECDSASecretKey> = (0..n).map(|_| ECDSASecretKey::generate()).collect();
        keys.sort_by_key(|k| k.public_key().to_hex());
        let participants =
            ParticipantSet::from_pubkeys(keys.iter().map(|k| k.public_key().to_hex())).unwrap();
        (InmemStore::new(participants), keys)
    }

    fn create_test_event(key: &ECDSASecretKey, index: u64, self_parent: Option<Hash>) -> Event {
        let body = EventBody {
            transactions: vec![vec![index as u8]],
            internal_transactions: vec![],
            block_signatures: vec![],
            self_parent,
            other_parent: None,
            creator: key.public_key().to_bytes(),
            index,
        };
        let mut event = Event::new_unsigned(body).unwrap();
        event.sign(key).unwrap();
        event
    }

    fn insert_chain(store: &mut InmemStore, key: &ECDSASecretKey, len: u64) -> Vec<Hash> {
        let mut hashes = Vec::new();
        let mut parent = None;
        for i in 0..len {
            let event = create_test_event(key, i, parent);
            parent = Some(event.hash());
            hashes.push(event.hash());
            store.set_event(event).unwrap();
        }
        hashes
    }

    #[test]
    fn test_set_and_get_event() {
        let (mut store, keys) = create_test_store(2);
        let event = create_test_event(&keys[0], 0, None);
        let hash = event.hash();

        store.set_event(event.clone()).unwrap();
        assert_eq!(store.get_event(&hash).unwrap(), event);
        assert!(store.get_event(&Hash::zero()).unwrap_err().is_not_found());
    }

    #[test]
    fn test_metadata_update_does_not_duplicate() {
        let (mut store, keys) = create_test_store(1);
        let mut event = create_test_event(&keys[0], 0, None);
        store.set_event(event.clone()).unwrap();

        event.round = Some(3);
        store.set_event(event.clone()).unwrap();

        assert_eq!(store.get_event(&event.hash()).unwrap().round, Some(3));
        assert_eq!(store.topological_events().unwrap().len(), 1);
    }

    #[test]
    fn test_participant_events_skip() {
        let (mut store, keys) = create_test_store(2);
        let hex = keys[0].public_key().to_hex();
        let hashes = insert_chain(&mut store, &keys[0], 3);

        assert_eq!(store.participant_events(&hex, None).unwrap(), hashes);
        assert_eq!(store.participant_events(&hex, Some(0)).unwrap(), hashes[1..].to_vec());
        assert!(store.participant_events(&hex, Some(2)).unwrap().is_empty());

        let other = keys[1].public_key().to_hex();
        assert!(store.participant_events(&other, None).unwrap().is_empty());
        assert!(store.participant_events("0xNOPE", None).is_err());
    }

    #[test]
    fn test_last_event_from_root_then_event() {
        let (mut store, keys) = create_test_store(2);
        let hex = keys[0].public_key().to_hex();

        let (root_hash, is_root) = store.last_event_from(&hex).unwrap();
        assert!(is_root);
        assert_eq!(root_hash, store.get_root(&hex).unwrap().self_parent.hash);

        let hashes = insert_chain(&mut store, &keys[0], 2);
        assert_eq!(store.last_event_from(&hex).unwrap(), (hashes[1], false));
    }

    #[test]
    fn test_known_events() {
        let (mut store, keys) = create_test_store(3);
        insert_chain(&mut store, &keys[0], 3);
        insert_chain(&mut store, &keys[2], 1);

        let known = store.known_events();
        assert_eq!(known[&0], Some(2));
        assert_eq!(known[&1], None);
        assert_eq!(known[&2], Some(0));
    }

    #[test]
    fn test_reset_to_roots() {
        let (mut store, keys) = create_test_store(2);
        let hex = keys[0].public_key().to_hex();
        let hashes = insert_chain(&mut store, &keys[0], 3);

        let root = Root {
            self_parent: RootEvent {
                hash: hashes[1],
                creator_id: 0,
                index: Some(1),
                lamport: Some(1),
                round: Some(0),
            },
            others: BTreeMap::new(),
        };
        store.reset(BTreeMap::from([(hex.clone(), root)])).unwrap();

        assert!(store.get_event(&hashes[0]).is_err());
        assert_eq!(store.last_event_from(&hex).unwrap(), (hashes[1], true));
        assert_eq!(store.participant_event(&hex, 1).unwrap(), hashes[1]);
        assert_eq!(store.known_events()[&0], Some(1));
        assert!(store.get_root(&keys[1].public_key().to_hex()).unwrap().is_genesis());
    }

    #[test]
    fn test_consensus_events() {
        let (mut store, keys) = create_test_store(1);
        let hex = keys[0].public_key().to_hex();
        let event = create_test_event(&keys[0], 0, None);
        store.set_event(event.clone()).unwrap();

        assert!(store.last_consensus_event_from(&hex).unwrap().1);
        store.add_consensus_event(&event).unwrap();

        assert_eq!(store.consensus_events(), vec![event.hash()]);
        assert_eq!(store.consensus_events_count(), 1);
        assert_eq!(store.last_consensus_event_from(&hex).unwrap(), (event.hash(), false));
    }

    #[test]
    fn test_rounds_and_blocks() {
        let (mut store, _) = create_test_store(1);
        assert_eq!(store.last_round(), None);

        let mut info = RoundInfo::new();
        info.add_event(Hash::zero(), true);
        store.set_round(2, info).unwrap();
        assert_eq!(store.last_round(), Some(2));
        assert_eq!(store.round_witnesses(2), vec![Hash::zero()]);
        assert!(store.round_witnesses(1).is_empty());

        let block = Block::new(0, 2, Hash::zero(), vec![b"tx".to_vec()], vec![]);
        store.set_block(block.clone()).unwrap();
        assert_eq!(store.get_block(0).unwrap(), block);
        assert_eq!(store.last_block_index(), Some(0));
    }
}
