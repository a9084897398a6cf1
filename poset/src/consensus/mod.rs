/// Poset consensus engine
///
/// Events are inserted one at a time; each consensus cycle then runs five
/// phases in order:
/// 1. DivideRounds: assign rounds and witness flags
/// 2. DecideFame: hashgraph voting on witness fame
/// 3. DecideRoundReceived: find the round in which each event is finalised
/// 4. ProcessDecidedRounds: order finalised events and emit blocks
/// 5. ProcessSigPool: attach gossiped block signatures
///
/// Every phase is a no-op on already decided state, so the engine can be
/// rebuilt by replaying persisted events.

pub mod block;
pub mod config;
pub mod error;
pub mod round;

use crate::crypto::Hash;
use crate::event::{
    consensus_order, BlockSignature, Event, EventCoordinates, FlagTable, WireBody, WireEvent,
};
use crate::peers::ParticipantSet;
use crate::snapshot::RootEvent;
use crate::storage::Store;
use std::collections::{BTreeSet, HashMap, HashSet};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

pub use block::{Block, BlockBody, BlockError};
pub use config::PosetConfig;
pub use error::{ErrorKind, PosetError, Result};
pub use round::{RoundEvent, RoundInfo, Trilean};

/// A resolved parent: a stored event, or a root standing in for pruned history
pub(crate) enum Parent {
    Event(Box<Event>),
    Root(RootEvent),
}

impl Parent {
    pub(crate) fn creator_id(&self) -> usize {
        match self {
            Parent::Event(e) => e.creator_id,
            Parent::Root(r) => r.creator_id,
        }
    }

    pub(crate) fn index(&self) -> Option<u64> {
        match self {
            Parent::Event(e) => Some(e.index()),
            Parent::Root(r) => r.index,
        }
    }

    fn lamport(&self) -> Option<u64> {
        match self {
            Parent::Event(e) => e.lamport,
            Parent::Root(r) => r.lamport,
        }
    }

    fn coordinates(&self, n: usize) -> Vec<Option<EventCoordinates>> {
        match self {
            Parent::Event(e) => e.last_ancestors.clone(),
            Parent::Root(r) => {
                let mut coords = vec![None; n];
                if let (Some(index), Some(slot)) = (r.index, coords.get_mut(r.creator_id)) {
                    *slot = Some(EventCoordinates {
                        index,
                        hash: r.hash,
                    });
                }
                coords
            }
        }
    }

    pub(crate) fn to_root_event(&self) -> RootEvent {
        match self {
            Parent::Event(e) => RootEvent::from_event(e),
            Parent::Root(r) => r.clone(),
        }
    }
}

pub struct Poset<S: Store> {
    pub(crate) participants: ParticipantSet,
    pub(crate) store: S,
    pub(crate) config: PosetConfig,

    /// Inserted events without a round received, in insertion order
    pub(crate) undetermined_events: Vec<Hash>,
    /// Rounds created after the last consensus round, not yet processed
    pub(crate) pending_rounds: BTreeSet<u64>,
    pub(crate) last_consensus_round: Option<u64>,
    pub(crate) last_block_index: Option<u64>,
    /// Latest block with more than `trust_count` signatures
    pub(crate) anchor_block: Option<u64>,
    pub(crate) last_committed_round_events: usize,
    pub(crate) consensus_transactions: u64,
    /// Undetermined events that carry payload
    pub(crate) pending_loaded_events: usize,
    /// Block signatures waiting for their block
    pub(crate) sig_pool: Vec<BlockSignature>,
    pub(crate) topological_index: u64,

    commit_tx: Option<UnboundedSender<Block>>,
}

impl<S: Store> Poset<S> {
    pub fn new(
        participants: ParticipantSet,
        store: S,
        commit_tx: Option<UnboundedSender<Block>>,
        config: PosetConfig,
    ) -> Self {
        Self {
            participants,
            store,
            config,
            undetermined_events: Vec::new(),
            pending_rounds: BTreeSet::new(),
            last_consensus_round: None,
            last_block_index: None,
            anchor_block: None,
            last_committed_round_events: 0,
            consensus_transactions: 0,
            pending_loaded_events: 0,
            sig_pool: Vec::new(),
            topological_index: 0,
            commit_tx,
        }
    }

    /// Validate and store a new event.
    ///
    /// Computes its Lamport timestamp, last-ancestor coordinates and seed
    /// flag table, queues it for the consensus phases and buffers the block
    /// signatures it carries.
    pub fn insert_event(&mut self, mut event: Event, verify_signature: bool) -> Result<()> {
        if verify_signature && !event.verify()? {
            return Err(PosetError::InvalidSignature);
        }

        let hash = event.hash();
        if self.contains_event(&hash)? {
            return Err(PosetError::DuplicateEvent(hash));
        }

        self.prepare_event(&mut event)?;
        event.topological_index = self.next_topological_index();
        event.round = None;
        event.round_received = None;

        if event.is_loaded() {
            self.pending_loaded_events += 1;
        }
        self.sig_pool.extend(event.block_signatures().iter().cloned());

        debug!(
            hash = %hash,
            creator = event.creator_id,
            index = event.index(),
            lamport = ?event.lamport,
            "Inserted event"
        );

        self.store.set_event(event)?;
        self.undetermined_events.push(hash);
        Ok(())
    }

    pub(crate) fn next_topological_index(&mut self) -> u64 {
        let index = self.topological_index;
        self.topological_index += 1;
        index
    }

    pub(crate) fn contains_event(&self, hash: &Hash) -> Result<bool> {
        match self.store.get_event(hash) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Parent checks plus the metadata derived from parents
    pub(crate) fn prepare_event(&self, event: &mut Event) -> Result<()> {
        let creator_hex = event.creator_hex();
        let creator_id = self
            .participants
            .id_of(&creator_hex)
            .ok_or_else(|| PosetError::UnknownCreator(creator_hex.clone()))?;
        event.creator_id = creator_id;

        self.check_self_parent(event, &creator_hex)?;

        let self_parent = match event.self_parent() {
            Some(hash) => Some(
                self.resolve_parent(&hash)?
                    .ok_or(PosetError::UnknownParent(hash))?,
            ),
            None => None,
        };

        let other_parent = match event.other_parent() {
            Some(hash) => {
                let parent = self
                    .resolve_parent(&hash)?
                    .ok_or(PosetError::UnknownParent(hash))?;
                if parent.creator_id() == creator_id {
                    return Err(PosetError::InvalidOtherParent(hash));
                }
                Some(parent)
            }
            None => None,
        };

        let parents = [self_parent.as_ref(), other_parent.as_ref()];

        event.lamport = Some(
            parents
                .iter()
                .flatten()
                .filter_map(|p| p.lamport())
                .max()
                .map_or(0, |l| l + 1),
        );

        let n = self.participants.len();
        let mut ancestors: Vec<Option<EventCoordinates>> = vec![None; n];
        for parent in parents.iter().flatten() {
            for (slot, coord) in ancestors.iter_mut().zip(parent.coordinates(n)) {
                if let Some(coord) = coord {
                    if slot.map_or(true, |s| coord.index > s.index) {
                        *slot = Some(coord);
                    }
                }
            }
        }
        if let Some(slot) = ancestors.get_mut(creator_id) {
            *slot = Some(EventCoordinates {
                index: event.index(),
                hash: event.hash(),
            });
        }
        event.last_ancestors = ancestors;

        let mut table = match &self_parent {
            Some(Parent::Event(e)) => e.flag_table.clone(),
            Some(Parent::Root(r)) => FlagTable::single(r.hash, r.round.unwrap_or_default()),
            None => FlagTable::new(),
        };
        if let Some(Parent::Event(e)) = &other_parent {
            table.merge(&e.flag_table);
        }
        event.flag_table.merge(&table);

        Ok(())
    }

    fn check_self_parent(&self, event: &Event, creator_hex: &str) -> Result<()> {
        let (last, is_root) = self.store.last_event_from(creator_hex)?;

        let (expected_index, expected_parent) = if is_root {
            let root = self.store.get_root(creator_hex)?;
            match root.self_parent.index {
                Some(index) => (index + 1, Some(last)),
                None => (0, None),
            }
        } else {
            (self.store.get_event(&last)?.index() + 1, Some(last))
        };

        if event.index() > expected_index {
            return Err(PosetError::ParentNotInserted {
                creator: creator_hex.to_string(),
                index: event.index(),
                expected: expected_index,
            });
        }
        if event.index() < expected_index {
            return Err(PosetError::ForkDetected {
                creator: creator_hex.to_string(),
                index: event.index(),
            });
        }

        match (event.self_parent(), expected_parent) {
            (actual, expected) if actual == expected => Ok(()),
            (Some(actual), _) => Err(PosetError::UnknownParent(actual)),
            (None, Some(expected)) => Err(PosetError::UnknownParent(expected)),
            (None, None) => Ok(()),
        }
    }

    pub(crate) fn resolve_parent(&self, hash: &Hash) -> Result<Option<Parent>> {
        match self.store.get_event(hash) {
            Ok(event) => return Ok(Some(Parent::Event(Box::new(event)))),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        Ok(self.find_root_event(hash).map(Parent::Root))
    }

    fn find_root_event(&self, hash: &Hash) -> Option<RootEvent> {
        self.store
            .roots()
            .values()
            .find_map(|root| root.find(hash).cloned())
    }

    /// `x` sees witness `w`: flag-table lookup
    fn sees_witness(x: &Event, w: &Hash) -> bool {
        x.hash() == *w || x.flag_table.contains(w)
    }

    /// `x` sees any event `y`: last-ancestor coordinates
    fn sees(x: &Event, y: &Event) -> bool {
        x.last_ancestors
            .get(y.creator_id)
            .copied()
            .flatten()
            .map_or(false, |c| c.index >= y.index())
    }

    /// `x` strongly sees witness `w` when the latest ancestors of `x` from a
    /// supermajority of participants see `w`
    fn strongly_see(&self, x: &Event, w: &Hash) -> Result<bool> {
        let mut count = 0;
        for coord in x.last_ancestors.iter().flatten() {
            let sees = if coord.hash == x.hash() {
                Self::sees_witness(x, w)
            } else {
                match self.store.get_event(&coord.hash) {
                    Ok(ancestor) => Self::sees_witness(&ancestor, w),
                    Err(e) if e.is_not_found() => false,
                    Err(e) => return Err(e.into()),
                }
            };
            if sees {
                count += 1;
            }
        }
        Ok(count >= self.participants.super_majority())
    }

    pub(crate) fn round_info(&self, round: u64) -> Result<RoundInfo> {
        match self.store.get_round(round) {
            Ok(info) => Ok(info),
            Err(e) if e.is_not_found() => Ok(RoundInfo::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn parent_round(&self, parent: Option<Hash>) -> Result<Option<u64>> {
        let hash = match parent {
            Some(hash) => hash,
            None => return Ok(None),
        };
        match self.resolve_parent(&hash)? {
            Some(Parent::Event(e)) => e.round.map(Some).ok_or(PosetError::MissingParent(hash)),
            Some(Parent::Root(r)) => Ok(r.round),
            None => Err(PosetError::MissingParent(hash)),
        }
    }

    pub(crate) fn is_witness(&self, event: &Event) -> Result<bool> {
        match event.round {
            Some(round) => Ok(self.round_info(round)?.is_witness(&event.hash())),
            None => Ok(false),
        }
    }

    /// Fold the parents' tables and witness parents into `event`'s table
    pub(crate) fn finalise_flag_table(&self, event: &mut Event) -> Result<()> {
        for hash in [event.self_parent(), event.other_parent()].into_iter().flatten() {
            match self.resolve_parent(&hash)? {
                Some(Parent::Event(parent)) => {
                    event.flag_table.merge(&parent.flag_table);
                    if self.is_witness(&parent)? {
                        event.flag_table.insert(hash, parent.round.unwrap_or_default());
                    }
                }
                Some(Parent::Root(_)) => {}
                None => return Err(PosetError::MissingParent(hash)),
            }
        }
        Ok(())
    }

    fn round_and_witness(&self, event: &Event) -> Result<(u64, bool)> {
        let self_parent_round = self.parent_round(event.self_parent())?;
        let other_parent_round = self.parent_round(event.other_parent())?;

        let round = match self_parent_round.max(other_parent_round) {
            None => 0,
            Some(parent_round) => {
                let mut strongly_seen = 0;
                for w in self.store.round_witnesses(parent_round) {
                    if self.strongly_see(event, &w)? {
                        strongly_seen += 1;
                    }
                }
                if strongly_seen >= self.participants.super_majority() {
                    parent_round + 1
                } else {
                    parent_round
                }
            }
        };

        let witness = self_parent_round.map_or(true, |r| round > r);
        Ok((round, witness))
    }

    pub fn divide_rounds(&mut self) -> Result<()> {
        for hash in self.undetermined_events.clone() {
            let mut event = self.store.get_event(&hash)?;
            if event.round.is_some() {
                continue;
            }

            self.finalise_flag_table(&mut event)?;
            let (round, witness) = self.round_and_witness(&event)?;
            event.round = Some(round);
            event.flag_table.prune_below(round.saturating_sub(1));
            self.store.set_event(event)?;

            let mut info = self.round_info(round)?;
            info.add_event(hash, witness);
            if self.last_consensus_round.map_or(true, |lcr| round > lcr) {
                self.pending_rounds.insert(round);
            } else {
                info.queued = true;
            }
            self.store.set_round(round, info)?;

            debug!(hash = %hash, round, witness, "Assigned round");
        }
        Ok(())
    }

    pub fn decide_fame(&mut self) -> Result<()> {
        let last_round = match self.store.last_round() {
            Some(r) => r,
            None => return Ok(()),
        };
        let n = self.participants.len() as u64;
        let super_majority = self.participants.super_majority();

        // (voter, candidate) -> vote
        let mut votes: HashMap<(Hash, Hash), bool> = HashMap::new();

        let pending: Vec<u64> = self.pending_rounds.iter().copied().collect();
        for i in &pending {
            let i = *i;
            let mut info = self.round_info(i)?;
            let mut changed = false;

            for x in info.undecided_witnesses() {
                'voting: for j in (i + 1)..=last_round {
                    let diff = j - i;
                    for y in self.store.round_witnesses(j) {
                        let voter = self.store.get_event(&y)?;

                        if diff == 1 {
                            votes.insert((y, x), Self::sees_witness(&voter, &x));
                            continue;
                        }

                        let mut yays = 0;
                        let mut nays = 0;
                        for w in self.store.round_witnesses(j - 1) {
                            if self.strongly_see(&voter, &w)? {
                                if votes.get(&(w, x)).copied().unwrap_or(false) {
                                    yays += 1;
                                } else {
                                    nays += 1;
                                }
                            }
                        }
                        let vote = yays >= nays;
                        let tally = yays.max(nays);

                        if diff % n > 0 {
                            if tally >= super_majority {
                                info.set_fame(&x, vote);
                                changed = true;
                                debug!(witness = %x, round = i, famous = vote, decided_at = j, "Decided fame");
                                break 'voting;
                            }
                            votes.insert((y, x), vote);
                        } else if tally >= super_majority {
                            votes.insert((y, x), vote);
                        } else {
                            // coin round
                            votes.insert((y, x), y.middle_bit());
                        }
                    }
                }
            }

            if changed {
                self.store.set_round(i, info)?;
            }
        }

        for i in pending {
            if self.round_info(i)?.witnesses_decided() {
                continue;
            }
            if last_round > i + self.config.max_round_lookahead {
                warn!(round = i, last_round, "Fame undecided beyond lookahead");
                return Err(PosetError::StalledConsensus { round: i });
            }
        }
        Ok(())
    }

    pub fn decide_round_received(&mut self) -> Result<()> {
        let last_round = match self.store.last_round() {
            Some(r) => r,
            None => return Ok(()),
        };
        let mut decided = HashSet::new();

        for hash in self.undetermined_events.clone() {
            let mut event = self.store.get_event(&hash)?;
            let round = match event.round {
                Some(r) => r,
                None => continue,
            };
            if event.round_received.is_some() {
                decided.insert(hash);
                continue;
            }

            let start = (round + 1).max(self.last_consensus_round.map_or(0, |r| r + 1));
            for i in start..=last_round {
                let mut info = match self.store.get_round(i) {
                    Ok(info) => info,
                    Err(e) if e.is_not_found() => break,
                    Err(e) => return Err(e.into()),
                };
                if !info.witnesses_decided() {
                    break;
                }

                let famous = info.famous_witnesses();
                if famous.is_empty() {
                    continue;
                }
                let mut seen_by_all = true;
                for w in &famous {
                    if !Self::sees(&self.store.get_event(w)?, &event) {
                        seen_by_all = false;
                        break;
                    }
                }

                if seen_by_all {
                    event.round_received = Some(i);
                    self.store.set_event(event)?;
                    info.add_received_event(hash);
                    self.store.set_round(i, info)?;
                    decided.insert(hash);
                    break;
                }
            }
        }

        self.undetermined_events.retain(|h| !decided.contains(h));
        Ok(())
    }

    pub fn process_decided_rounds(&mut self) -> Result<()> {
        let pending: Vec<u64> = self.pending_rounds.iter().copied().collect();

        for round in pending {
            let mut info = self.round_info(round)?;
            if !info.witnesses_decided() {
                break;
            }

            let mut events = info
                .received_events
                .iter()
                .map(|h| self.store.get_event(h))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            events.sort_by(consensus_order);

            let transactions: Vec<Vec<u8>> = events
                .iter()
                .flat_map(|e| e.transactions().iter().cloned())
                .collect();
            let internal_transactions: Vec<_> = events
                .iter()
                .flat_map(|e| e.internal_transactions().iter().cloned())
                .collect();

            if !transactions.is_empty() || !internal_transactions.is_empty() {
                let frame = self.build_frame(round)?;
                let index = self.last_block_index.map_or(0, |i| i + 1);
                let tx_count = transactions.len();
                let mut block = Block::new(
                    index,
                    round,
                    frame.hash()?,
                    transactions,
                    internal_transactions,
                );

                // Replay rebuilds blocks; keep signatures already collected
                if let Ok(existing) = self.store.get_block(index) {
                    if existing.body == block.body {
                        block.signatures = existing.signatures;
                    }
                }

                self.store.set_block(block.clone())?;
                self.last_block_index = Some(index);
                info!(index, round, transactions = tx_count, "Produced block");

                if let Some(tx) = &self.commit_tx {
                    if tx.send(block).is_err() {
                        warn!(index, "Commit channel closed");
                    }
                }
            }

            for event in &events {
                self.store.add_consensus_event(event)?;
                self.consensus_transactions += event.transactions().len() as u64;
                if event.is_loaded() {
                    self.pending_loaded_events = self.pending_loaded_events.saturating_sub(1);
                }
            }

            self.last_committed_round_events = events.len();
            self.last_consensus_round = Some(round);
            info.queued = true;
            self.store.set_round(round, info)?;
            self.pending_rounds.remove(&round);

            debug!(round, events = events.len(), "Processed decided round");
        }
        Ok(())
    }

    pub fn process_sig_pool(&mut self) -> Result<()> {
        let pool = std::mem::take(&mut self.sig_pool);
        let mut kept = Vec::new();
        let mut remaining = pool.into_iter();

        while let Some(signature) = remaining.next() {
            match self.apply_block_signature(&signature) {
                Ok(true) => {}
                Ok(false) => kept.push(signature),
                Err(e) => {
                    kept.push(signature);
                    kept.extend(remaining);
                    self.sig_pool = kept;
                    return Err(e);
                }
            }
        }

        self.sig_pool = kept;
        Ok(())
    }

    /// Returns false when the signature must stay buffered
    fn apply_block_signature(&mut self, signature: &BlockSignature) -> Result<bool> {
        let validator = signature.validator_hex();
        if self.participants.id_of(&validator).is_none() {
            warn!(validator = %validator, index = signature.index, "Signature from unknown validator");
            return Ok(true);
        }

        let mut block = match self.store.get_block(signature.index) {
            Ok(block) => block,
            Err(e) if e.is_not_found() => {
                let future = self.last_block_index.map_or(true, |last| signature.index > last);
                if !future {
                    debug!(index = signature.index, "Dropping signature for pruned block");
                }
                return Ok(!future);
            }
            Err(e) => return Err(e.into()),
        };

        if !block.verify(signature)? {
            warn!(validator = %validator, index = signature.index, "Invalid block signature");
            return Ok(true);
        }

        block.set_signature(signature.clone())?;
        self.set_block(block)?;
        Ok(true)
    }

    /// Store a block, promoting it to anchor when it has enough signatures
    pub fn set_block(&mut self, block: Block) -> Result<()> {
        let index = block.index();
        if block.signatures.len() > self.participants.trust_count()
            && self.anchor_block.map_or(true, |a| index > a)
        {
            self.anchor_block = Some(index);
            debug!(index, signatures = block.signatures.len(), "New anchor block");
        }
        self.store.set_block(block)?;
        Ok(())
    }

    /// Verify a block carries more than `trust_count` valid signatures from
    /// known validators
    pub fn check_block(&self, block: &Block) -> Result<()> {
        let hash = block.hash()?;
        let mut valid = 0;
        for (validator, signature) in &block.signatures {
            if self.participants.id_of(validator).is_none() {
                return Err(PosetError::InvalidSignature);
            }
            let signature = BlockSignature {
                validator: hex::decode(validator.trim_start_matches("0x"))
                    .map_err(|_| PosetError::InvalidSignature)?,
                index: block.index(),
                signature: signature.clone(),
            };
            if !block.verify(&signature).map_err(|_| PosetError::InvalidSignature)? {
                return Err(PosetError::InvalidSignature);
            }
            valid += 1;
        }

        let trust_count = self.participants.trust_count();
        if valid <= trust_count {
            return Err(PosetError::InsufficientSignatures { valid, trust_count });
        }
        debug!(index = block.index(), hash = %hash, valid, "Block signatures checked");
        Ok(())
    }

    /// Replay persisted events through every phase and recover the anchor
    pub fn bootstrap(&mut self) -> Result<()> {
        let events = self.store.topological_events()?;
        if self.last_consensus_round.is_none() {
            self.restore_reset_point()?;
        }
        let mut replayed = 0;
        for event in events {
            if self.contains_event(&event.hash())? {
                self.topological_index = self.topological_index.max(event.topological_index + 1);
                continue;
            }
            self.insert_event(event.stripped(), false)?;
            replayed += 1;
        }

        self.divide_rounds()?;
        self.decide_fame()?;
        self.decide_round_received()?;
        self.process_decided_rounds()?;
        self.process_sig_pool()?;

        if let (Some(first), Some(last)) =
            (self.store.first_block_index(), self.store.last_block_index())
        {
            for index in first..=last {
                if let Ok(block) = self.store.get_block(index) {
                    if block.signatures.len() > self.participants.trust_count() {
                        self.anchor_block = Some(index);
                    }
                }
            }
            self.last_block_index = Some(self.last_block_index.map_or(last, |l| l.max(last)));
        }

        info!(
            replayed,
            last_consensus_round = ?self.last_consensus_round,
            last_block = ?self.last_block_index,
            "Bootstrapped poset"
        );
        Ok(())
    }

    pub fn to_wire(&self, event: &Event) -> Result<WireEvent> {
        let (other_parent_creator_id, other_parent_index) = match event.other_parent() {
            Some(hash) => {
                let parent = self
                    .resolve_parent(&hash)?
                    .ok_or(PosetError::UnknownParent(hash))?;
                let index = parent.index().ok_or(PosetError::UnknownParent(hash))?;
                (Some(parent.creator_id()), Some(index))
            }
            None => (None, None),
        };

        let body = event.body();
        Ok(WireEvent {
            body: WireBody {
                transactions: body.transactions.clone(),
                internal_transactions: body.internal_transactions.clone(),
                block_signatures: body.block_signatures.clone(),
                self_parent_index: event.self_parent().and(event.index().checked_sub(1)),
                other_parent_creator_id,
                other_parent_index,
                creator_id: event.creator_id,
                index: event.index(),
            },
            signature: event.signature().to_vec(),
        })
    }

    /// Decode a wire event, resolving parents locally and verifying the
    /// signature
    pub fn read_wire_info(&self, wire: WireEvent) -> Result<Event> {
        let creator_id = wire.body.creator_id;
        let creator = self
            .participants
            .pubkey(creator_id)
            .ok_or_else(|| PosetError::MalformedWire(format!("unknown creator id {}", creator_id)))?
            .to_vec();

        let self_parent = match wire.body.self_parent_index {
            Some(index) => Some(
                self.wire_parent(creator_id, index)?
                    .ok_or_else(|| self.self_parent_gap(creator_id, wire.body.index))?,
            ),
            None => None,
        };
        let other_parent = match (wire.body.other_parent_creator_id, wire.body.other_parent_index) {
            (Some(id), Some(index)) => Some(
                self.wire_parent(id, index)?
                    .ok_or(PosetError::UnknownWireParent { creator_id: id, index })?,
            ),
            (None, None) => None,
            _ => {
                return Err(PosetError::MalformedWire(
                    "incomplete other-parent reference".into(),
                ))
            }
        };

        let body = wire.body.into_event_body(creator, self_parent, other_parent);
        let mut event = Event::new(body, wire.signature)?;
        if !event.verify()? {
            return Err(PosetError::InvalidSignature);
        }
        event.creator_id = creator_id;
        Ok(event)
    }

    /// Hash of the creator's event (or root) at `index`, if known locally
    fn wire_parent(&self, creator_id: usize, index: u64) -> Result<Option<Hash>> {
        let peer = self
            .participants
            .by_id(creator_id)
            .ok_or_else(|| PosetError::MalformedWire(format!("unknown creator id {}", creator_id)))?;

        match self.store.participant_event(&peer.pubkey_hex, index) {
            Ok(hash) => return Ok(Some(hash)),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        Ok(self
            .store
            .roots()
            .values()
            .flat_map(|root| std::iter::once(&root.self_parent).chain(root.others.values()))
            .find(|r| r.creator_id == creator_id && r.index == Some(index))
            .map(|r| r.hash))
    }

    /// Error for a wire event whose self-parent is not stored
    fn self_parent_gap(&self, creator_id: usize, index: u64) -> PosetError {
        let known = self.store.known_events().get(&creator_id).copied().flatten();
        let expected = known.map_or(0, |k| k + 1);
        match self.participants.by_id(creator_id) {
            Some(peer) if index > expected => PosetError::ParentNotInserted {
                creator: peer.pubkey_hex.clone(),
                index,
                expected,
            },
            _ => PosetError::UnknownWireParent {
                creator_id,
                index: index.saturating_sub(1),
            },
        }
    }

    pub fn participants(&self) -> &ParticipantSet {
        &self.participants
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &PosetConfig {
        &self.config
    }

    pub fn last_consensus_round(&self) -> Option<u64> {
        self.last_consensus_round
    }

    pub fn last_block_index(&self) -> Option<u64> {
        self.last_block_index
    }

    pub fn anchor_block(&self) -> Option<u64> {
        self.anchor_block
    }

    pub fn consensus_transactions(&self) -> u64 {
        self.consensus_transactions
    }

    pub fn last_committed_round_events(&self) -> usize {
        self.last_committed_round_events
    }

    pub fn pending_loaded_events(&self) -> usize {
        self.pending_loaded_events
    }

    pub fn undetermined_events(&self) -> &[Hash] {
        &self.undetermined_events
    }

    pub fn pending_signatures(&self) -> usize {
        self.sig_pool.len()
    }
}
