use thiserror::Error;

use crate::amount::Amount;
use crate::types::{BlockHash, TxId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum XaiError {
    // ── Encoding / structure ─────────────────────────────────────────────────
    #[error("malformed encoding: {0}")]
    MalformedEncoding(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    // ── Authentication ───────────────────────────────────────────────────────
    #[error("invalid signature")]
    InvalidSignature,

    // ── Ledger rules ─────────────────────────────────────────────────────────
    #[error("double spend: output {txid}:{vout} is not unspent")]
    DoubleSpend { txid: TxId, vout: u32 },

    #[error("nonce gap: expected {expected}, got {got}")]
    NonceGap { expected: u64, got: u64 },

    #[error("nonce conflict: nonce {nonce} already pending for sender")]
    NonceConflict { nonce: u64 },

    #[error("fee rate {offered} does not displace {required} (base units per kB)")]
    FeeTooLow { offered: u64, required: u64 },

    #[error("fee {fee} exceeds the per-transaction maximum {max}")]
    FeeExceedsMaximum { fee: Amount, max: Amount },

    #[error("insufficient funds: need {need}, have {have}")]
    InsufficientFunds { need: Amount, have: Amount },

    // ── Block rules ──────────────────────────────────────────────────────────
    #[error("block size {size} exceeds limit {max}")]
    BlockSizeExceeded { size: usize, max: usize },

    #[error("transaction count {count} exceeds limit {max}")]
    TxCountExceeded { count: usize, max: usize },

    #[error("invalid proof of work")]
    InvalidProofOfWork,

    #[error("merkle root mismatch")]
    MerkleMismatch,

    #[error("invalid block: {0}")]
    InvalidBlock(String),

    #[error("invalid coinbase: {0}")]
    InvalidCoinbase(String),

    #[error("supply cap would be exceeded by {excess}")]
    SupplyCapExceeded { excess: Amount },

    #[error("block timestamp not after the median of recent blocks")]
    TimestampOutOfRange,

    // ── Chain topology ───────────────────────────────────────────────────────
    /// A well-formed block whose parent is absent locally. The chain engine
    /// parks such blocks rather than failing the submitter; this kind exists
    /// for callers that cannot park.
    #[error("unknown parent block {0}")]
    UnknownParent(BlockHash),

    #[error("reorg depth {depth} exceeds limit {max}")]
    ReorgTooDeep { depth: u64, max: u64 },

    #[error("reorg would cross the checkpoint at height {checkpoint_height}")]
    CheckpointViolation { checkpoint_height: u64 },

    // ── Resource control ─────────────────────────────────────────────────────
    #[error("validation budget exceeded")]
    ResourceExhausted,

    #[error("cancelled: deadline expired")]
    Cancelled,

    // ── Infrastructure ───────────────────────────────────────────────────────
    #[error("storage failure: {0}")]
    StorageFailure(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    // ── Governance ───────────────────────────────────────────────────────────
    #[error("governance: {0}")]
    Governance(String),
}
