/// Gossip synchronization
///
/// The SyncManager is the shared handle around a node's `Core`:
/// - Building pull requests from the local known-events map
/// - Answering peers with the events they miss, or a sync-limit flag
/// - Applying responses and pushes, then running a consensus cycle
/// - Serving and applying fast-forward snapshots
///
/// All Core access goes through one tokio mutex; handlers never hold it
/// across network I/O.

pub mod types;

use crate::node::{Core, CoreError};
use crate::storage::Store;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

pub use types::{
    EagerSyncRequest, EagerSyncResponse, FastForwardRequest, FastForwardResponse, SyncRequest,
    SyncResponse,
};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Fast-forward is disabled")]
    FastForwardDisabled,
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Events a requester may lag by before it is told to fast-forward
    pub sync_limit: u64,
    pub enable_fast_forward: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sync_limit: 1000,
            enable_fast_forward: true,
        }
    }
}

/// What the caller should do after applying a sync response
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced { events: usize },
    /// The peer refused to send a diff; request a snapshot instead
    FastForwardRequired,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub requests_served: u64,
    pub responses_applied: u64,
    pub events_received: u64,
    pub sync_limit_hits: u64,
    pub fast_forwards: u64,
}

pub struct SyncManager<S: Store> {
    core: Arc<Mutex<Core<S>>>,
    config: SyncConfig,
    stats: Arc<RwLock<SyncStats>>,
}

impl<S: Store> SyncManager<S> {
    pub fn new(core: Core<S>, config: SyncConfig) -> Self {
        Self {
            core: Arc::new(Mutex::new(core)),
            config,
            stats: Arc::new(RwLock::new(SyncStats::default())),
        }
    }

    pub fn core(&self) -> Arc<Mutex<Core<S>>> {
        self.core.clone()
    }

    pub async fn sync_request(&self) -> SyncRequest {
        let core = self.core.lock().await;
        SyncRequest::new(core.id(), core.known_events())
    }

    /// Answer a pull request with the events the requester is missing
    pub async fn process_sync_request(&self, request: SyncRequest) -> Result<SyncResponse> {
        let core = self.core.lock().await;

        if core.over_sync_limit(&request.known, self.config.sync_limit) {
            warn!(from = request.from_id, limit = self.config.sync_limit, "Peer over sync limit");
            self.stats.write().await.sync_limit_hits += 1;
            return Ok(SyncResponse::over_limit(core.id(), core.known_events()));
        }

        let diff = core.event_diff(&request.known)?;
        let events = core.to_wire(&diff)?;
        debug!(from = request.from_id, events = events.len(), "Serving sync request");

        self.stats.write().await.requests_served += 1;
        Ok(SyncResponse::new(core.id(), events, core.known_events()))
    }

    pub async fn process_sync_response(&self, response: SyncResponse) -> Result<SyncOutcome> {
        if response.sync_limit {
            info!(from = response.from_id, "Peer requests fast-forward");
            return Ok(SyncOutcome::FastForwardRequired);
        }

        let events = response.events.len();
        {
            let mut core = self.core.lock().await;
            core.sync(response.events)?;
            core.run_consensus()?;
        }

        let mut stats = self.stats.write().await;
        stats.responses_applied += 1;
        stats.events_received += events as u64;
        debug!(from = response.from_id, events, "Applied sync response");
        Ok(SyncOutcome::Synced { events })
    }

    pub async fn process_eager_sync_request(
        &self,
        request: EagerSyncRequest,
    ) -> Result<EagerSyncResponse> {
        let events = request.events.len();
        let from_id = {
            let mut core = self.core.lock().await;
            core.sync(request.events)?;
            core.run_consensus()?;
            core.id()
        };

        self.stats.write().await.events_received += events as u64;
        debug!(from = request.from_id, events, "Applied eager sync");
        Ok(EagerSyncResponse {
            from_id,
            success: true,
        })
    }

    pub async fn process_fast_forward_request(
        &self,
        request: FastForwardRequest,
    ) -> Result<FastForwardResponse> {
        let mut core = self.core.lock().await;
        let (block, frame) = core.get_anchor_block_with_frame()?;
        info!(from = request.from_id, block = block.index(), round = frame.round, "Serving fast-forward");
        Ok(FastForwardResponse {
            from_id: core.id(),
            block,
            frame,
        })
    }

    pub async fn process_fast_forward_response(&self, response: FastForwardResponse) -> Result<()> {
        if !self.config.enable_fast_forward {
            return Err(SyncError::FastForwardDisabled);
        }

        {
            let mut core = self.core.lock().await;
            core.fast_forward(response.from_id, response.block, response.frame)?;
        }
        self.stats.write().await.fast_forwards += 1;
        Ok(())
    }

    pub async fn submit_transactions(&self, transactions: Vec<Vec<u8>>) {
        self.core.lock().await.add_transactions(transactions);
    }

    pub async fn stats(&self) -> SyncStats {
        self.stats.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::PosetError;
    use crate::crypto::ECDSASecretKey;
    use crate::node::CoreConfig;
    use crate::peers::ParticipantSet;
    use crate::storage::InmemStore;

    fn create_managers(n: usize, config: SyncConfig) -> Vec<SyncManager<InmemStore>> {
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
            .into_iter()
            .map(|core| SyncManager::new(core, config.clone()))
            .collect()
    }

    async fn pull(from: &SyncManager<InmemStore>, to: &SyncManager<InmemStore>) -> SyncOutcome {
        let request = to.sync_request().await;
        let response = from.process_sync_request(request).await.unwrap();
        to.process_sync_response(response).await.unwrap()
    }

    #[tokio::test]
    async fn test_pull_delivers_events() {
        let managers = create_managers(2, SyncConfig::default());
        managers[0].submit_transactions(vec![b"tx".to_vec()]).await;
        managers[0].core().lock().await.init().unwrap();

        let outcome = pull(&managers[0], &managers[1]).await;
        assert_eq!(outcome, SyncOutcome::Synced { events: 1 });

        let core = managers[1].core();
        let core = core.lock().await;
        // received the loaded event and acknowledged it
        assert_eq!(core.heights().values().sum::<u64>(), 2);
        assert_eq!(core.seq(), Some(0));

        let served = managers[0].stats().await;
        assert_eq!(served.requests_served, 1);
        let applied = managers[1].stats().await;
        assert_eq!(applied.responses_applied, 1);
        assert_eq!(applied.events_received, 1);
    }

    #[tokio::test]
    async fn test_sync_limit_requests_fast_forward() {
        let config = SyncConfig {
            sync_limit: 2,
            enable_fast_forward: true,
        };
        let managers = create_managers(2, config);
        {
            let core = managers[0].core();
            let mut core = core.lock().await;
            core.init().unwrap();
            for _ in 0..3 {
                core.add_self_event_block(None).unwrap();
            }
        }

        let outcome = pull(&managers[0], &managers[1]).await;
        assert_eq!(outcome, SyncOutcome::FastForwardRequired);
        assert_eq!(managers[0].stats().await.sync_limit_hits, 1);
        assert_eq!(managers[1].core().lock().await.heights().values().sum::<u64>(), 0);
    }

    #[tokio::test]
    async fn test_eager_sync_pushes_events() {
        let managers = create_managers(2, SyncConfig::default());
        managers[0].core().lock().await.init().unwrap();

        let events = {
            let core = managers[0].core();
            let core = core.lock().await;
            let diff = core.event_diff(&Default::default()).unwrap();
            core.to_wire(&diff).unwrap()
        };
        let response = managers[1]
            .process_eager_sync_request(EagerSyncRequest { from_id: 0, events })
            .await
            .unwrap();

        assert!(response.success);
        assert_eq!(response.from_id, 1);
        assert_eq!(managers[1].stats().await.events_received, 1);
    }

    #[tokio::test]
    async fn test_fast_forward_without_anchor_fails() {
        let managers = create_managers(2, SyncConfig::default());
        let err = managers[0]
            .process_fast_forward_request(FastForwardRequest { from_id: 1 })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::Core(CoreError::Poset(PosetError::NoAnchorBlock))
        ));
    }

    #[tokio::test]
    async fn test_fast_forward_disabled() {
        let config = SyncConfig {
            sync_limit: 10,
            enable_fast_forward: false,
        };
        let managers = create_managers(2, config);
        let response = FastForwardResponse {
            from_id: 0,
            block: crate::consensus::Block::new(0, 0, crate::crypto::Hash::zero(), vec![], vec![]),
            frame: crate::snapshot::Frame {
                round: 0,
                roots: vec![],
                events: vec![],
            },
        };

        assert!(matches!(
            managers[1].process_fast_forward_response(response).await,
            Err(SyncError::FastForwardDisabled)
        ));
        assert_eq!(managers[1].stats().await.fast_forwards, 0);
    }

    #[tokio::test]
    async fn test_gossip_between_managers_reaches_consensus() {
        let managers = create_managers(4, SyncConfig::default());
        for (i, manager) in managers.iter().enumerate() {
            manager.core().lock().await.init().unwrap();
            manager
                .submit_transactions(vec![format!("node{}", i).into_bytes()])
                .await;
        }

        for step in 0..120 {
            let from = step % 4;
            let to = (step + 1) % 4;
            if step % 3 == 0 {
                managers[to]
                    .submit_transactions(vec![format!("step{}", step).into_bytes()])
                    .await;
            }
            pull(&managers[from], &managers[to]).await;
        }

        let mut blocks = Vec::new();
        for manager in &managers {
            let core = manager.core();
            let core = core.lock().await;
            assert!(core.last_block_index().is_some());
            blocks.push(core.get_block(0).unwrap().body);
        }
        assert!(blocks.windows(2).all(|w| w[0] == w[1]));
    }
}
