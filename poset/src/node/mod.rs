/// Node core
///
/// Owns the local identity, the pending pools and the head of the local
/// event chain. Creates self-events, feeds gossip into the poset and drives
/// consensus cycles. Not shared: callers serialize access (see `sync`).

pub mod config;


pub use config::CoreConfig;

use crate::consensus::{Block, ErrorKind, Parent, Poset, PosetError};
use crate::crypto::{ECDSASecretKey, Hash};
use crate::event::{
    topological_order, BlockSignature, Event, EventBody, FlagTable, InternalTransaction,
    WireEvent,
};
use crate::peers::ParticipantSet;
use crate::snapshot::Frame;
use crate::storage::{KnownEvents, StorageError, Store};
use std::collections::BTreeMap;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Poset error: {0}")]
    Poset(#[from] PosetError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Frame hash mismatch: block commits to {expected}, frame hashes to {got}")]
    FrameHashMismatch { expected: Hash, got: Hash },

    #[error("Key {0} is not a participant")]
    UnknownParticipant(String),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Poset(e) => e.kind(),
            CoreError::Storage(_) => ErrorKind::Storage,
            CoreError::SigningFailed(_) | CoreError::UnknownParticipant(_) => ErrorKind::Protocol,
            CoreError::FrameHashMismatch { .. } => ErrorKind::Validation,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

pub struct Core<S: Store> {
    id: usize,
    key: ECDSASecretKey,
    pub_key: Vec<u8>,
    hex_id: String,

    poset: Poset<S>,
    config: CoreConfig,

    /// Other-parent references to each participant's latest event
    in_degrees: BTreeMap<String, u64>,

    head: Option<Hash>,
    seq: Option<u64>,
    /// Highest block this node has signed
    signed_through: Option<u64>,

    transaction_pool: Vec<Vec<u8>>,
    internal_transaction_pool: Vec<InternalTransaction>,
    block_signature_pool: Vec<BlockSignature>,
}

impl<S: Store> Core<S> {
    pub fn new(
        key: ECDSASecretKey,
        participants: ParticipantSet,
        store: S,
        commit_tx: Option<UnboundedSender<Block>>,
        config: CoreConfig,
    ) -> Result<Self> {
        let public_key = key.public_key();
        let hex_id = public_key.to_hex();
        let id = participants
            .id_of(&hex_id)
            .ok_or_else(|| CoreError::UnknownParticipant(hex_id.clone()))?;

        let in_degrees = participants
            .iter()
            .map(|p| (p.pubkey_hex.clone(), 0))
            .collect();

        let poset = Poset::new(participants, store, commit_tx, config.poset.clone());

        let mut core = Self {
            id,
            key,
            pub_key: public_key.to_bytes(),
            hex_id,
            poset,
            config,
            in_degrees,
            head: None,
            seq: None,
            signed_through: None,
            transaction_pool: Vec::new(),
            internal_transaction_pool: Vec::new(),
            block_signature_pool: Vec::new(),
        };
        core.set_head_and_seq()?;

        info!(id, hex_id = %core.hex_id, "Created core");
        Ok(core)
    }

    /// Create the first self-event unless one exists already
    pub fn init(&mut self) -> Result<()> {
        if self.head.is_none() {
            self.add_self_event_block(None)?;
        }
        Ok(())
    }

    /// Rebuild consensus state from the store
    pub fn bootstrap(&mut self) -> Result<()> {
        self.poset.bootstrap()?;
        self.set_head_and_seq()?;
        self.bootstrap_in_degrees()?;
        self.bootstrap_signed_through()?;
        Ok(())
    }

    /// Resume signing after the last stored block that carries our signature
    fn bootstrap_signed_through(&mut self) -> Result<()> {
        let store = self.poset.store();
        let mut signed_through = None;
        if let (Some(first), Some(last)) = (store.first_block_index(), store.last_block_index()) {
            signed_through = first.checked_sub(1);
            for index in first..=last {
                if store.get_block(index)?.get_signature(&self.hex_id).is_none() {
                    break;
                }
                signed_through = Some(index);
            }
        }
        self.signed_through = signed_through;
        Ok(())
    }

    pub fn set_head_and_seq(&mut self) -> Result<()> {
        let store = self.poset.store();
        let (last, is_root) = store.last_event_from(&self.hex_id)?;

        if is_root {
            let root = store.get_root(&self.hex_id)?;
            if root.is_genesis() {
                self.head = None;
                self.seq = None;
            } else {
                self.head = Some(root.self_parent.hash);
                self.seq = root.self_parent.index;
            }
        } else {
            let event = store.get_event(&last)?;
            self.head = Some(last);
            self.seq = Some(event.index());
        }

        debug!(head = ?self.head, seq = ?self.seq, "Set head and sequence");
        Ok(())
    }

    pub fn bootstrap_in_degrees(&mut self) -> Result<()> {
        let store = self.poset.store();
        let participants = self.poset.participants();
        let mut in_degrees = BTreeMap::new();

        for peer in participants.iter() {
            let (last, is_root) = store.last_event_from(&peer.pubkey_hex)?;
            let mut count = 0;
            if !is_root {
                for other in participants.iter().filter(|o| o.id != peer.id) {
                    for hash in store.participant_events(&other.pubkey_hex, None)? {
                        if store.get_event(&hash)?.other_parent() == Some(last) {
                            count += 1;
                        }
                    }
                }
            }
            in_degrees.insert(peer.pubkey_hex.clone(), count);
        }

        self.in_degrees = in_degrees;
        Ok(())
    }

    pub fn sign_and_insert_self_event(&mut self, mut event: Event) -> Result<()> {
        event
            .sign(&self.key)
            .map_err(|e| CoreError::SigningFailed(e.to_string()))?;
        event.creator_id = self.id;
        self.insert_event(event, true)
    }

    pub fn insert_event(&mut self, event: Event, verify_signature: bool) -> Result<()> {
        let creator = event.creator_hex();
        let other_parent = event.other_parent();
        let index = event.index();
        let hash = event.hash();

        self.poset.insert_event(event, verify_signature)?;

        if creator == self.hex_id {
            self.head = Some(hash);
            self.seq = Some(index);
        }

        self.in_degrees.insert(creator, 0);
        if let Some(other_parent) = other_parent {
            if let Ok(parent) = self.poset.store().get_event(&other_parent) {
                *self.in_degrees.entry(parent.creator_hex()).or_insert(0) += 1;
            }
        }
        Ok(())
    }

    /// Create a self-event on top of the head, with `other_head` as
    /// other-parent, packing the pending pools
    pub fn add_self_event_block(&mut self, other_head: Option<Hash>) -> Result<()> {
        let mut flag_table = self.parent_flag_table(self.head)?;
        flag_table.merge(&self.parent_flag_table(other_head)?);

        let take = self
            .transaction_pool
            .len()
            .min(self.config.max_transactions_in_event);

        let body = EventBody {
            transactions: self.transaction_pool[..take].to_vec(),
            internal_transactions: self.internal_transaction_pool.clone(),
            block_signatures: self.block_signature_pool.clone(),
            self_parent: self.head,
            other_parent: other_head,
            creator: self.pub_key.clone(),
            index: self.seq.map_or(0, |s| s + 1),
        };

        let mut event =
            Event::new_unsigned(body).map_err(|e| CoreError::SigningFailed(e.to_string()))?;
        event.flag_table = flag_table;
        self.sign_and_insert_self_event(event)?;

        self.transaction_pool.drain(..take);
        self.internal_transaction_pool.clear();
        if self.transaction_pool.is_empty() {
            self.block_signature_pool.clear();
        }

        debug!(
            index = ?self.seq,
            transactions = take,
            queued = self.transaction_pool.len(),
            "Created self-event"
        );
        Ok(())
    }

    fn parent_flag_table(&self, parent: Option<Hash>) -> Result<FlagTable> {
        let hash = match parent {
            Some(hash) => hash,
            None => return Ok(FlagTable::new()),
        };
        match self.poset.resolve_parent(&hash)? {
            Some(Parent::Event(event)) => Ok(event.flag_table.clone()),
            Some(Parent::Root(root)) => {
                Ok(FlagTable::single(hash, root.round.unwrap_or_default()))
            }
            None => {
                warn!(parent = %hash, "Parent missing while building flag table");
                Ok(FlagTable::single(hash, 0))
            }
        }
    }

    pub fn add_transactions(&mut self, transactions: Vec<Vec<u8>>) {
        self.transaction_pool.extend(transactions);
    }

    pub fn add_internal_transactions(&mut self, transactions: Vec<InternalTransaction>) {
        self.internal_transaction_pool.extend(transactions);
    }

    pub fn add_block_signature(&mut self, signature: BlockSignature) {
        self.block_signature_pool.push(signature);
    }

    fn has_pending_work(&self) -> bool {
        self.poset.pending_loaded_events() > 0
            || !self.transaction_pool.is_empty()
            || !self.internal_transaction_pool.is_empty()
            || !self.block_signature_pool.is_empty()
    }

    /// Events this node knows beyond `known`, parents first
    pub fn event_diff(&self, known: &KnownEvents) -> Result<Vec<Event>> {
        let store = self.poset.store();
        let mut events = Vec::new();
        for peer in self.poset.participants().iter() {
            let skip = known.get(&peer.id).copied().flatten();
            for hash in store.participant_events(&peer.pubkey_hex, skip)? {
                events.push(store.get_event(&hash)?);
            }
        }
        events.sort_by(topological_order);
        Ok(events)
    }

    /// Insert unknown wire events, then acknowledge them with a self-event
    /// when there is anything to gossip
    pub fn sync(&mut self, wire_events: Vec<WireEvent>) -> Result<()> {
        let known = self.known_events();
        let mut other_head = None;

        for wire in wire_events {
            let event = self.poset.read_wire_info(wire)?;
            let hash = event.hash();
            let local = known.get(&event.creator_id).copied().flatten();

            if Some(event.index()) > local {
                self.insert_event(event, false)?;
            }
            if self.poset.contains_event(&hash)? {
                other_head = Some(hash);
            }
        }

        if self.has_pending_work() {
            self.add_self_event_block(other_head)?;
        }
        Ok(())
    }

    /// True when `known` lags this node by more than `limit` events
    pub fn over_sync_limit(&self, known: &KnownEvents, limit: u64) -> bool {
        let mut total = 0;
        for (id, local) in self.known_events() {
            let local = match local {
                Some(local) => local,
                None => continue,
            };
            match known.get(&id).copied().flatten() {
                Some(theirs) if local > theirs => total += local - theirs,
                Some(_) => {}
                None => total += local + 1,
            }
        }
        total > limit
    }

    /// Replace local state with a signed block and its frame served by
    /// `peer_id`
    pub fn fast_forward(&mut self, peer_id: usize, block: Block, frame: Frame) -> Result<()> {
        self.poset.check_block(&block)?;

        let got = frame.hash().map_err(PosetError::from)?;
        let expected = block.frame_hash();
        if got != expected {
            warn!(peer = peer_id, block = block.index(), "Frame hash mismatch");
            return Err(CoreError::FrameHashMismatch { expected, got });
        }

        let index = block.index();
        let round = frame.round;
        self.poset.reset(block, frame)?;
        self.signed_through = Some(index);
        self.set_head_and_seq()?;
        self.bootstrap_in_degrees()?;
        self.run_consensus()?;

        info!(peer = peer_id, block = index, round, "Fast-forwarded");
        Ok(())
    }

    /// One consensus cycle, then sign any block produced by it
    pub fn run_consensus(&mut self) -> Result<()> {
        let start = Instant::now();
        self.poset.divide_rounds()?;
        debug!(elapsed_us = start.elapsed().as_micros() as u64, "DivideRounds");

        let start = Instant::now();
        self.poset.decide_fame()?;
        debug!(elapsed_us = start.elapsed().as_micros() as u64, "DecideFame");

        let start = Instant::now();
        self.poset.decide_round_received()?;
        debug!(elapsed_us = start.elapsed().as_micros() as u64, "DecideRoundReceived");

        let start = Instant::now();
        self.poset.process_decided_rounds()?;
        debug!(elapsed_us = start.elapsed().as_micros() as u64, "ProcessDecidedRounds");

        let start = Instant::now();
        self.poset.process_sig_pool()?;
        debug!(elapsed_us = start.elapsed().as_micros() as u64, "ProcessSigPool");

        if let Some(last) = self.poset.last_block_index() {
            let first = self.signed_through.map_or(0, |s| s + 1);
            for index in first..=last {
                self.sign_block(index)?;
            }
        }
        Ok(())
    }

    /// Sign a produced block, store it and queue the signature for gossip
    pub fn sign_block(&mut self, index: u64) -> Result<()> {
        let mut block = self.poset.store().get_block(index)?;
        let signature = block
            .sign(&self.key)
            .map_err(|e| CoreError::SigningFailed(e.to_string()))?;
        block
            .set_signature(signature.clone())
            .map_err(PosetError::from)?;
        self.poset.set_block(block)?;
        self.add_block_signature(signature);
        self.signed_through = Some(self.signed_through.map_or(index, |s| s.max(index)));
        debug!(index, "Signed block");
        Ok(())
    }

    /// Flush the store
    pub fn close(&mut self) -> Result<()> {
        self.poset.store.close()?;
        Ok(())
    }

    pub fn get_anchor_block_with_frame(&mut self) -> Result<(Block, Frame)> {
        Ok(self.poset.get_anchor_block_with_frame()?)
    }

    pub fn to_wire(&self, events: &[Event]) -> Result<Vec<WireEvent>> {
        events
            .iter()
            .map(|e| self.poset.to_wire(e).map_err(CoreError::from))
            .collect()
    }

    pub fn from_wire(&self, wire_events: Vec<WireEvent>) -> Result<Vec<Event>> {
        wire_events
            .into_iter()
            .map(|w| self.poset.read_wire_info(w).map_err(CoreError::from))
            .collect()
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn hex_id(&self) -> &str {
        &self.hex_id
    }

    pub fn head(&self) -> Option<Hash> {
        self.head
    }

    pub fn seq(&self) -> Option<u64> {
        self.seq
    }

    pub fn poset(&self) -> &Poset<S> {
        &self.poset
    }

    pub fn participants(&self) -> &ParticipantSet {
        self.poset.participants()
    }

    pub fn known_events(&self) -> KnownEvents {
        self.poset.store().known_events()
    }

    /// Number of events held per participant
    pub fn heights(&self) -> BTreeMap<String, u64> {
        let known = self.known_events();
        self.participants()
            .iter()
            .map(|p| {
                let height = known.get(&p.id).copied().flatten().map_or(0, |i| i + 1);
                (p.pubkey_hex.clone(), height)
            })
            .collect()
    }

    pub fn in_degrees(&self) -> &BTreeMap<String, u64> {
        &self.in_degrees
    }

    pub fn get_event(&self, hash: &Hash) -> Result<Event> {
        Ok(self.poset.store().get_event(hash)?)
    }

    pub fn get_event_transactions(&self, hash: &Hash) -> Result<Vec<Vec<u8>>> {
        Ok(self.get_event(hash)?.transactions().to_vec())
    }

    pub fn consensus_events(&self) -> Vec<Hash> {
        self.poset.store().consensus_events()
    }

    pub fn consensus_transactions(&self) -> u64 {
        self.poset.consensus_transactions()
    }

    pub fn undetermined_events(&self) -> &[Hash] {
        self.poset.undetermined_events()
    }

    pub fn last_block_index(&self) -> Option<u64> {
        self.poset.last_block_index()
    }

    pub fn last_consensus_round(&self) -> Option<u64> {
        self.poset.last_consensus_round()
    }

    pub fn get_block(&self, index: u64) -> Result<Block> {
        Ok(self.poset.store().get_block(index)?)
    }

    pub fn transaction_pool_len(&self) -> usize {
        self.transaction_pool.len()
    }

    pub fn internal_transaction_pool_len(&self) -> usize {
        self.internal_transaction_pool.len()
    }

    pub fn block_signature_pool_len(&self) -> usize {
        self.block_signature_pool.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::TransactionType;
    use crate::peers::Peer;
    use crate::storage::InmemStore;

    fn create_cores(n: usize) -> Vec<Core<InmemStore>> {
        let keys: Vec<ECDSASecretKey> = (0..n).map(|_| ECDSASecretKey::generate()).collect();
        let participants =
            ParticipantSet::from_pubkeys(keys.iter().map(|k| k.public_key().to_hex())).unwrap();
        let mut cores: Vec<Core<InmemStore>> = keys
            .into_iter()
            .map(|key| {
                let store = InmemStore::new(participants.clone());
                Core::new(key, participants.clone(), store, None, CoreConfig::default()).unwrap()
            })
            .collect();
        cores.sort_by_key(|c| c.id());
        cores
    }

    #[test]
    fn test_new_rejects_outsider_key() {
        let insider = ECDSASecretKey::generate();
        let participants =
            ParticipantSet::from_pubkeys([insider.public_key().to_hex()]).unwrap();
        let store = InmemStore::new(participants.clone());

        let result = Core::new(
            ECDSASecretKey::generate(),
            participants,
            store,
            None,
            CoreConfig::default(),
        );
        assert!(matches!(result, Err(CoreError::UnknownParticipant(_))));
    }

    #[test]
    fn test_init_creates_first_event() {
        let mut cores = create_cores(3);
        let core = &mut cores[0];
        assert_eq!(core.head(), None);

        core.init().unwrap();
        assert_eq!(core.seq(), Some(0));
        let head = core.head().unwrap();
        let event = core.get_event(&head).unwrap();
        assert_eq!(event.self_parent(), None);
        assert_eq!(event.other_parent(), None);

        // idempotent once a head exists
        core.init().unwrap();
        assert_eq!(core.head(), Some(head));
    }

    #[test]
    fn test_self_event_caps_transactions_and_drains_pools() {
        let mut cores = create_cores(2);
        let core = &mut cores[0];
        core.config.max_transactions_in_event = 2;

        core.add_transactions(vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        core.add_internal_transactions(vec![InternalTransaction::new(
            TransactionType::PeerAdd,
            Peer::new("0x02AB", "127.0.0.1:1337"),
        )]);
        core.add_block_signature(BlockSignature {
            validator: vec![2; 33],
            index: 0,
            signature: "00".into(),
        });

        core.add_self_event_block(None).unwrap();
        let first = core.get_event(&core.head().unwrap()).unwrap();
        assert_eq!(first.transactions(), &[b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(first.internal_transactions().len(), 1);
        assert_eq!(first.block_signatures().len(), 1);
        assert_eq!(core.transaction_pool_len(), 1);
        assert_eq!(core.internal_transaction_pool_len(), 0);
        // signatures wait until the transaction pool is empty
        assert_eq!(core.block_signature_pool_len(), 1);

        core.add_self_event_block(None).unwrap();
        let second = core.get_event(&core.head().unwrap()).unwrap();
        assert_eq!(second.transactions(), &[b"c".to_vec()]);
        assert_eq!(second.self_parent(), Some(first.hash()));
        assert_eq!(core.transaction_pool_len(), 0);
        assert_eq!(core.block_signature_pool_len(), 0);
    }

    #[test]
    fn test_large_pool_spreads_over_events() {
        let mut cores = create_cores(2);
        let core = &mut cores[0];
        core.config.max_transactions_in_event = 10;

        let txs = testutil::random_transactions(25);
        core.add_transactions(txs.clone());
        while core.transaction_pool_len() > 0 {
            core.add_self_event_block(None).unwrap();
        }

        assert_eq!(core.seq(), Some(2));
        let mut included = Vec::new();
        for hash in core.poset().store().participant_events(&core.hex_id(), None).unwrap() {
            included.extend(core.get_event(&hash).unwrap().transactions().iter().cloned());
        }
        assert_eq!(included, txs);
    }

    #[test]
    fn test_event_diff_returns_unknown_events_in_order() {
        let mut cores = create_cores(2);
        cores[0].init().unwrap();
        cores[0].add_self_event_block(None).unwrap();
        cores[0].add_self_event_block(None).unwrap();
        cores[1].init().unwrap();

        // cores[1] knows nothing of cores[0]
        let known: KnownEvents = [(0, None), (1, Some(0))].into_iter().collect();
        let diff = cores[0].event_diff(&known).unwrap();
        assert_eq!(diff.len(), 3);
        assert!(diff.iter().all(|e| e.creator_id == 0));
        let indexes: Vec<u64> = diff.iter().map(|e| e.index()).collect();
        assert_eq!(indexes, vec![0, 1, 2]);

        let known: KnownEvents = [(0, Some(1))].into_iter().collect();
        let diff = cores[0].event_diff(&known).unwrap();
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].index(), 2);
    }

    #[test]
    fn test_over_sync_limit() {
        let mut cores = create_cores(2);
        cores[0].init().unwrap();
        for _ in 0..4 {
            cores[0].add_self_event_block(None).unwrap();
        }

        let nothing: KnownEvents = [(0, None), (1, None)].into_iter().collect();
        assert!(cores[0].over_sync_limit(&nothing, 4));
        assert!(!cores[0].over_sync_limit(&nothing, 5));

        let some: KnownEvents = [(0, Some(2))].into_iter().collect();
        assert!(!cores[0].over_sync_limit(&some, 2));
        assert!(cores[0].over_sync_limit(&some, 1));
    }

    #[test]
    fn test_sync_inserts_and_acknowledges() {
        let mut cores = create_cores(2);
        cores[0].add_transactions(vec![b"hello".to_vec()]);
        cores[0].init().unwrap();

        let known = cores[1].known_events();
        let diff = cores[0].event_diff(&known).unwrap();
        let wire = cores[0].to_wire(&diff).unwrap();
        let sent = diff[0].hash();

        cores[1].sync(wire.clone()).unwrap();

        // the loaded event makes cores[1] acknowledge it
        let head = cores[1].head().unwrap();
        let ack = cores[1].get_event(&head).unwrap();
        assert_eq!(ack.other_parent(), Some(sent));
        assert_eq!(cores[1].in_degrees()[cores[0].hex_id()], 1);
        assert_eq!(cores[1].in_degrees()[cores[1].hex_id()], 0);

        // replaying the same payload only adds one more acknowledgement
        cores[1].sync(wire).unwrap();
        assert_eq!(cores[1].heights()[cores[0].hex_id()], 1);
        assert_eq!(cores[1].seq(), Some(1));
    }

    #[test]
    fn test_sync_without_pending_work_creates_no_event() {
        let mut cores = create_cores(2);
        cores[0].init().unwrap();

        let diff = cores[0].event_diff(&cores[1].known_events()).unwrap();
        let wire = cores[0].to_wire(&diff).unwrap();
        cores[1].sync(wire).unwrap();

        assert_eq!(cores[1].head(), None);
        assert_eq!(cores[1].heights()[cores[0].hex_id()], 1);
    }

    #[test]
    fn test_from_wire_round_trip() {
        let mut cores = create_cores(2);
        cores[0].init().unwrap();
        let events = cores[0].event_diff(&KnownEvents::new()).unwrap();
        let wire = cores[0].to_wire(&events).unwrap();

        let decoded = cores[0].from_wire(wire).unwrap();
        assert_eq!(decoded[0].hash(), events[0].hash());
    }

    #[test]
    fn test_core_error_kinds() {
        let err = CoreError::FrameHashMismatch {
            expected: Hash::zero(),
            got: crate::crypto::hash_data(b"x"),
        };
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(
            CoreError::from(PosetError::NoAnchorBlock).kind(),
            ErrorKind::Consistency
        );
    }
}
