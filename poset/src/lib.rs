/// Poset Consensus
///
/// A leaderless, asynchronous BFT consensus engine over a DAG of signed
/// events (a hashgraph-style poset):
/// - Gossip about gossip: every event names a self-parent and an other-parent
/// - Virtual voting on witness fame; no extra vote messages
/// - Deterministic total order and signed blocks on every honest node
/// - Frame snapshots so lagging nodes can fast-forward

pub mod consensus;
pub mod crypto;
pub mod event;
pub mod node;
pub mod peers;
pub mod snapshot;
pub mod storage;
pub mod sync;

pub use consensus::{Block, ErrorKind, Poset, PosetConfig, PosetError};
pub use crypto::{ECDSAPublicKey, ECDSASecretKey, Hash};
pub use event::{Event, EventBody, WireEvent};
pub use node::{Core, CoreConfig, CoreError};
pub use peers::{ParticipantSet, Peer};
pub use snapshot::{Frame, Root};
pub use storage::{InmemStore, RocksStore, Store};
pub use sync::{SyncConfig, SyncManager};
