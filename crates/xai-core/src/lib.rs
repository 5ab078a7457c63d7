//! xai-core — data model, canonical codec, and shared definitions for the
//! XAI ledger: amounts, addresses, transactions, blocks, errors, constants,
//! and node configuration.

pub mod address;
pub mod amount;
pub mod block;
pub mod codec;
pub mod config;
pub mod constants;
pub mod error;
pub mod transaction;
pub mod types;

pub use address::Address;
pub use amount::Amount;
pub use block::{Block, BlockHeader};
pub use config::{NetworkType, NodeConfig};
pub use error::XaiError;
pub use transaction::{Transaction, TxInput, TxKind, TxOutput, VoteChoice};
pub use types::{BlockHash, Difficulty, Hash256, Height, Timestamp, TxId};
