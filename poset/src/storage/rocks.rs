/// RocksDB-backed store
///
/// Write-through persistence over an [`InmemStore`] cache. Events, roots,
/// blocks and frames go to their own column families; rounds and the
/// consensus event list are derived state and are rebuilt by replaying the
/// persisted events on bootstrap.

use super::inmem::genesis_roots;
use super::{InmemStore, KnownEvents, Result, Store, StorageError};
use crate::consensus::{Block, RoundInfo};
use crate::crypto::Hash;
use crate::event::Event;
use crate::peers::ParticipantSet;
use crate::snapshot::{Frame, Root};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info};

/// Column family names
const CF_EVENTS: &str = "events";
const CF_ROOTS: &str = "roots";
const CF_BLOCKS: &str = "blocks";
const CF_FRAMES: &str = "frames";

const ALL_CFS: [&str; 4] = [CF_EVENTS, CF_ROOTS, CF_BLOCKS, CF_FRAMES];

pub struct RocksStore {
    db: Arc<DB>,
    cache: InmemStore,
    /// Keeps the directory of a temporary store alive
    _temp_dir: Option<TempDir>,
}

impl RocksStore {
    /// Create a fresh store at `path`, overwriting nothing already there
    pub fn new(participants: ParticipantSet, path: &Path) -> Result<Self> {
        let db = Self::open_db(path)?;
        let mut store = Self {
            db: Arc::new(db),
            cache: InmemStore::new(participants),
            _temp_dir: None,
        };
        let roots = store.cache.roots();
        for (hex, root) in &roots {
            store.put(CF_ROOTS, hex.as_bytes(), root)?;
        }
        Ok(store)
    }

    /// Store in a temporary directory, removed on drop
    pub fn new_temp(participants: ParticipantSet) -> Result<Self> {
        let temp_dir = tempfile::tempdir().map_err(|e| StorageError::InvalidData(e.to_string()))?;
        let mut store = Self::new(participants, temp_dir.path())?;
        store._temp_dir = Some(temp_dir);
        Ok(store)
    }

    /// Reopen an existing store. Roots, blocks and frames are loaded into
    /// the cache; events stay on disk until the engine replays them.
    pub fn load(participants: ParticipantSet, path: &Path) -> Result<Self> {
        let db = Self::open_db(path)?;
        let mut store = Self {
            db: Arc::new(db),
            cache: InmemStore::new(participants),
            _temp_dir: None,
        };

        let mut roots = genesis_roots(store.cache.participants());
        roots.extend(store.read_all::<Root>(CF_ROOTS)?.into_iter().filter_map(
            |(key, root)| String::from_utf8(key).ok().map(|hex| (hex, root)),
        ));
        store.cache.reset(roots)?;

        let blocks = store.read_all::<Block>(CF_BLOCKS)?;
        let frames = store.read_all::<Frame>(CF_FRAMES)?;
        info!(blocks = blocks.len(), frames = frames.len(), "Loaded poset store");
        for (_, block) in blocks {
            store.cache.set_block(block)?;
        }
        for (_, frame) in frames {
            store.cache.set_frame(frame)?;
        }

        Ok(store)
    }

    fn open_db(path: &Path) -> Result<DB> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();

        Ok(DB::open_cf_descriptors(&opts, path, cfs)?)
    }

    fn get_cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::InvalidData(format!("Column family not found: {}", name)))
    }

    fn put<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<()> {
        let bytes = bincode::serialize(value)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        self.db.put_cf(self.get_cf(cf)?, key, bytes)?;
        Ok(())
    }

    fn read_all<T: DeserializeOwned>(&self, cf: &str) -> Result<Vec<(Vec<u8>, T)>> {
        let handle = self.get_cf(cf)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(handle, IteratorMode::Start) {
            let (key, value) = item?;
            let decoded = bincode::deserialize(&value)
                .map_err(|e| StorageError::SerializationError(e.to_string()))?;
            out.push((key.to_vec(), decoded));
        }
        Ok(out)
    }

    fn clear_cf(&self, batch: &mut WriteBatch, cf: &str) -> Result<()> {
        let handle = self.get_cf(cf)?;
        for item in self.db.iterator_cf(handle, IteratorMode::Start) {
            let (key, _) = item?;
            batch.delete_cf(handle, key);
        }
        Ok(())
    }
}

impl Store for RocksStore {
    fn get_event(&self, hash: &Hash) -> Result<Event> {
        self.cache.get_event(hash)
    }

    fn set_event(&mut self, event: Event) -> Result<()> {
        self.put(CF_EVENTS, &event.topological_index.to_be_bytes(), &event)?;
        self.cache.set_event(event)
    }

    fn participant_events(&self, pubkey_hex: &str, skip: Option<u64>) -> Result<Vec<Hash>> {
        self.cache.participant_events(pubkey_hex, skip)
    }

    fn participant_event(&self, pubkey_hex: &str, index: u64) -> Result<Hash> {
        self.cache.participant_event(pubkey_hex, index)
    }

    fn last_event_from(&self, pubkey_hex: &str) -> Result<(Hash, bool)> {
        self.cache.last_event_from(pubkey_hex)
    }

    fn last_consensus_event_from(&self, pubkey_hex: &str) -> Result<(Hash, bool)> {
        self.cache.last_consensus_event_from(pubkey_hex)
    }

    fn known_events(&self) -> KnownEvents {
        self.cache.known_events()
    }

    fn get_root(&self, pubkey_hex: &str) -> Result<Root> {
        self.cache.get_root(pubkey_hex)
    }

    fn roots(&self) -> BTreeMap<String, Root> {
        self.cache.roots()
    }

    fn get_round(&self, round: u64) -> Result<RoundInfo> {
        self.cache.get_round(round)
    }

    fn set_round(&mut self, round: u64, info: RoundInfo) -> Result<()> {
        self.cache.set_round(round, info)
    }

    fn last_round(&self) -> Option<u64> {
        self.cache.last_round()
    }

    fn round_witnesses(&self, round: u64) -> Vec<Hash> {
        self.cache.round_witnesses(round)
    }

    fn get_block(&self, index: u64) -> Result<Block> {
        self.cache.get_block(index)
    }

    fn set_block(&mut self, block: Block) -> Result<()> {
        self.put(CF_BLOCKS, &block.index().to_be_bytes(), &block)?;
        self.cache.set_block(block)
    }

    fn last_block_index(&self) -> Option<u64> {
        self.cache.last_block_index()
    }

    fn first_block_index(&self) -> Option<u64> {
        self.cache.first_block_index()
    }

    fn get_frame(&self, round: u64) -> Result<Frame> {
        self.cache.get_frame(round)
    }

    fn set_frame(&mut self, frame: Frame) -> Result<()> {
        self.put(CF_FRAMES, &frame.round.to_be_bytes(), &frame)?;
        self.cache.set_frame(frame)
    }

    fn add_consensus_event(&mut self, event: &Event) -> Result<()> {
        self.cache.add_consensus_event(event)
    }

    fn consensus_events(&self) -> Vec<Hash> {
        self.cache.consensus_events()
    }

    fn consensus_events_count(&self) -> u64 {
        self.cache.consensus_events_count()
    }

    /// Events as persisted, keyed by topological index
    fn topological_events(&self) -> Result<Vec<Event>> {
        Ok(self
            .read_all::<Event>(CF_EVENTS)?
            .into_iter()
            .map(|(_, event)| event)
            .collect())
    }

    fn reset(&mut self, roots: BTreeMap<String, Root>) -> Result<()> {
        let mut batch = WriteBatch::default();
        for cf in ALL_CFS {
            self.clear_cf(&mut batch, cf)?;
        }
        self.db.write(batch)?;

        self.cache.reset(roots)?;
        for (hex, root) in self.cache.roots() {
            self.put(CF_ROOTS, hex.as_bytes(), &root)?;
        }
        debug!("Reset poset store");
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::ECDSASecretKey;
    use crate::event::EventBody;

    fn create_test_participants() -> (ParticipantSet, ECDSASecretKey) {
        let key = ECDSASecretKey::generate();
        let other = ECDSASecretKey::generate();
        let participants = ParticipantSet::from_pubkeys(vec![
            key.public_key().to_hex(),
            other.public_key().to_hex(),
        ])
        .unwrap();
        (participants, key)
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
        event.topological_index = index;
        event
    }

    #[test]
    fn test_storage_creation() {
        let (participants, _) = create_test_participants();
        assert!(RocksStore::new_temp(participants).is_ok());
    }

    #[test]
    fn test_events_survive_reopen_in_order() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (participants, key) = create_test_participants();

        let first = create_test_event(&key, 0, None);
        let second = create_test_event(&key, 1, Some(first.hash()));

        {
            let mut store = RocksStore::new(participants.clone(), temp_dir.path()).unwrap();
            store.set_event(first.clone()).unwrap();
            store.set_event(second.clone()).unwrap();
            store.close().unwrap();
        }

        let store = RocksStore::load(participants, temp_dir.path()).unwrap();
        let replay: Vec<Hash> = store
            .topological_events()
            .unwrap()
            .iter()
            .map(Event::hash)
            .collect();
        assert_eq!(replay, vec![first.hash(), second.hash()]);

        // Cache starts empty until the engine replays
        assert!(store.get_event(&first.hash()).is_err());
    }

    #[test]
    fn test_blocks_and_frames_survive_reopen() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (participants, key) = create_test_participants();

        let mut block = Block::new(0, 1, Hash::zero(), vec![b"tx".to_vec()], vec![]);
        let signature = block.sign(&key).unwrap();
        block.set_signature(signature).unwrap();
        let frame = Frame {
            round: 1,
            roots: vec![],
            events: vec![],
        };

        {
            let mut store = RocksStore::new(participants.clone(), temp_dir.path()).unwrap();
            store.set_block(block.clone()).unwrap();
            store.set_frame(frame.clone()).unwrap();
        }

        let store = RocksStore::load(participants, temp_dir.path()).unwrap();
        assert_eq!(store.get_block(0).unwrap(), block);
        assert_eq!(store.get_frame(1).unwrap(), frame);
        assert_eq!(store.last_block_index(), Some(0));
    }

    #[test]
    fn test_reset_clears_disk() {
        let temp_dir = tempfile::tempdir().unwrap();
        let (participants, key) = create_test_participants();
        let hex = key.public_key().to_hex();
        let event = create_test_event(&key, 0, None);

        let mut store = RocksStore::new(participants.clone(), temp_dir.path()).unwrap();
        store.set_event(event.clone()).unwrap();

        let root = Root {
            self_parent: crate::snapshot::RootEvent {
                hash: event.hash(),
                creator_id: 0,
                index: Some(0),
                lamport: Some(0),
                round: Some(0),
            },
            others: BTreeMap::new(),
        };
        store.reset(BTreeMap::from([(hex.clone(), root.clone())])).unwrap();
        assert!(store.topological_events().unwrap().is_empty());
        drop(store);

        let reopened = RocksStore::load(participants, temp_dir.path()).unwrap();
        assert_eq!(reopened.get_root(&hex).unwrap(), root);
        assert_eq!(reopened.last_event_from(&hex).unwrap(), (event.hash(), true));
    }
}
