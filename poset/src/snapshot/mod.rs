/// Snapshot module
///
/// Frames and anchor blocks let a node that fell behind skip the history it
/// missed: it adopts a signed block, rebuilds the poset from the block's
/// frame, and continues gossiping from there.

pub mod types;

pub use types::{Frame, FrameEvent, Root, RootEvent};

use crate::consensus::{Block, Parent, Poset, PosetError, Result};
use crate::event::{consensus_order, Event};
use crate::peers::Peer;
use crate::storage::inmem::genesis_roots;
use crate::storage::Store;
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

impl<S: Store> Poset<S> {
    /// Frame of a processed round.
    ///
    /// Frames are stored when their round produces a block; other processed
    /// rounds are built on demand.
    pub fn get_frame(&mut self, round: u64) -> Result<Frame> {
        match self.store.get_frame(round) {
            Ok(frame) => return Ok(frame),
            Err(e) if !e.is_not_found() => return Err(e.into()),
            Err(_) => {}
        }
        if self.last_consensus_round.map_or(true, |lcr| round > lcr) {
            return Err(PosetError::MalformedFrame(format!(
                "round {} has not been processed",
                round
            )));
        }
        self.build_frame(round)
    }

    /// Build and store the frame of `round` from the events received in it
    pub(crate) fn build_frame(&mut self, round: u64) -> Result<Frame> {
        let info = self.store.get_round(round)?;
        let mut events = info
            .received_events
            .iter()
            .map(|h| self.store.get_event(h))
            .collect::<std::result::Result<Vec<Event>, _>>()?;
        events.sort_by(consensus_order);

        let in_frame: HashSet<_> = events.iter().map(|e| e.hash()).collect();

        let mut roots = Vec::with_capacity(self.participants.len());
        for peer in self.participants.iter() {
            let first = events
                .iter()
                .filter(|e| e.creator_id == peer.id)
                .min_by_key(|e| e.index());
            let self_parent = match first {
                Some(event) => match event.self_parent() {
                    Some(parent) => self.root_event_for(&parent)?,
                    None => Root::genesis(peer.id, &peer.pubkey_hex).self_parent,
                },
                None => self.frontier_before(peer, round)?,
            };
            roots.push(Root {
                self_parent,
                others: BTreeMap::new(),
            });
        }

        for event in &events {
            if let Some(other) = event.other_parent() {
                if !in_frame.contains(&other) {
                    let root_event = self.root_event_for(&other)?;
                    if let Some(root) = roots.get_mut(event.creator_id) {
                        root.others.insert(other, root_event);
                    }
                }
            }
        }

        let mut frame_events = Vec::with_capacity(events.len());
        for event in &events {
            frame_events.push(FrameEvent {
                body: event.body().clone(),
                signature: event.signature().to_vec(),
                round: event.round.unwrap_or_default(),
                lamport: event.lamport.unwrap_or_default(),
                witness: self.is_witness(event)?,
            });
        }

        let frame = Frame {
            round,
            roots,
            events: frame_events,
        };
        self.store.set_frame(frame.clone())?;
        debug!(round, events = frame.events.len(), "Built frame");
        Ok(frame)
    }

    fn root_event_for(&self, hash: &crate::crypto::Hash) -> Result<RootEvent> {
        self.resolve_parent(hash)?
            .map(|p| p.to_root_event())
            .ok_or(PosetError::UnknownParent(*hash))
    }

    /// Latest event of `peer` received before `round`, or its root
    fn frontier_before(&self, peer: &Peer, round: u64) -> Result<RootEvent> {
        let (last, is_root) = self.store.last_consensus_event_from(&peer.pubkey_hex)?;
        if is_root {
            return Ok(self.store.get_root(&peer.pubkey_hex)?.self_parent);
        }

        let mut cursor = Some(last);
        while let Some(hash) = cursor {
            match self.resolve_parent(&hash)? {
                Some(Parent::Event(event)) => {
                    if event.round_received.map_or(false, |r| r < round) {
                        return Ok(RootEvent::from_event(&event));
                    }
                    cursor = event.self_parent();
                }
                Some(Parent::Root(root)) => return Ok(root),
                None => return Err(PosetError::UnknownParent(hash)),
            }
        }
        Ok(Root::genesis(peer.id, &peer.pubkey_hex).self_parent)
    }

    /// Latest block with enough signatures, plus the frame it commits to
    pub fn get_anchor_block_with_frame(&mut self) -> Result<(Block, Frame)> {
        let index = self.anchor_block.ok_or(PosetError::NoAnchorBlock)?;
        let block = self.store.get_block(index)?;
        let frame = self.get_frame(block.round_received())?;
        Ok((block, frame))
    }

    /// Discard all state and restart from `block` and its frame.
    ///
    /// Frame events are re-validated against the frame's roots and marked
    /// received in the frame round; the caller checks the block's signatures
    /// and frame hash beforehand.
    pub fn reset(&mut self, block: Block, frame: Frame) -> Result<()> {
        if frame.roots.len() != self.participants.len() {
            return Err(PosetError::MalformedFrame(format!(
                "{} roots for {} participants",
                frame.roots.len(),
                self.participants.len()
            )));
        }

        let roots: BTreeMap<String, Root> = self
            .participants
            .iter()
            .zip(frame.roots.iter())
            .map(|(peer, root)| (peer.pubkey_hex.clone(), root.clone()))
            .collect();

        self.undetermined_events.clear();
        self.pending_rounds.clear();
        self.sig_pool.clear();
        self.pending_loaded_events = 0;
        self.consensus_transactions = 0;
        self.topological_index = 0;
        self.store.reset(roots)?;

        let block_index = block.index();
        self.last_consensus_round = Some(frame.round);
        self.last_block_index = Some(block_index);
        self.anchor_block = None;
        self.set_block(block)?;
        self.anchor_block = Some(block_index);

        let mut received = self.round_info(frame.round)?;
        for frame_event in &frame.events {
            let mut event = frame_event.to_event()?;
            if !event.verify()? {
                return Err(PosetError::InvalidSignature);
            }
            let hash = event.hash();

            self.prepare_event(&mut event)?;
            event.topological_index = self.next_topological_index();
            event.round = Some(frame_event.round);
            event.lamport = Some(frame_event.lamport);
            event.round_received = Some(frame.round);
            self.finalise_flag_table(&mut event)?;
            event.flag_table.prune_below(frame_event.round.saturating_sub(1));

            if frame_event.round == frame.round {
                received.add_event(hash, frame_event.witness);
            } else {
                let mut info = self.round_info(frame_event.round)?;
                info.add_event(hash, frame_event.witness);
                info.queued = true;
                self.store.set_round(frame_event.round, info)?;
            }
            received.add_received_event(hash);

            self.consensus_transactions += event.transactions().len() as u64;
            self.store.set_event(event.clone())?;
            self.store.add_consensus_event(&event)?;
        }
        received.queued = true;
        self.store.set_round(frame.round, received)?;

        self.last_committed_round_events = frame.events.len();
        info!(
            block = block_index,
            round = frame.round,
            events = frame.events.len(),
            "Reset poset from frame"
        );
        self.store.set_frame(frame)?;
        Ok(())
    }

    /// Re-apply the reset a previous run started from.
    ///
    /// A store whose roots are not the genesis roots was reset from a frame;
    /// that frame belongs to the lowest stored block. Blocks above it are
    /// put back with their signatures so replay reproduces them unchanged.
    /// Returns false when the store was never reset.
    pub(crate) fn restore_reset_point(&mut self) -> Result<bool> {
        if self.store.roots() == genesis_roots(&self.participants) {
            return Ok(false);
        }
        let (first, last) = match (self.store.first_block_index(), self.store.last_block_index()) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                return Err(PosetError::MalformedFrame(
                    "reset store holds no anchor block".into(),
                ))
            }
        };

        let block = self.store.get_block(first)?;
        let frame = self.store.get_frame(block.round_received())?;
        let mut later = Vec::new();
        for index in (first + 1)..=last {
            match self.store.get_block(index) {
                Ok(block) => later.push(block),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.reset(block, frame)?;
        for block in later {
            self.store.set_block(block)?;
        }
        info!(block = first, restored = last - first, "Restored reset point");
        Ok(true)
    }
}
