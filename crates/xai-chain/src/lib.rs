//! xai-chain — the canonical-chain engine: tip tracking, fork resolution and
//! reorganization, orphan buffering, the mining pipeline, the mining-streak
//! tracker, the coordinator facade, and the node event bus.

pub mod chain;
pub mod coordinator;
pub mod events;
pub mod genesis;
pub mod miner;
pub mod streak;

pub use chain::{branch_wins, ChainState, OrphanPool, Tip};
pub use coordinator::{BlockOutcome, Coordinator, Ledger};
pub use events::{EventBus, NodeEvent};
pub use genesis::genesis_block;
pub use streak::StreakTracker;
