//! ─── XAI Protocol Constants ─────────────────────────────────────────────────
//!
//! Ticker:    XAI
//! Base unit: 1 XAI = 100_000_000 base units (8 decimal places)
//! Supply:    121,000,000 XAI hard cap (premine-free; PoW issuance only)

use crate::amount::Amount;
use crate::types::Difficulty;

// ── Supply & issuance ────────────────────────────────────────────────────────

/// Hard supply cap in base units. Issuance that would pass this fails the block.
pub const MAX_SUPPLY_BASE_UNITS: u64 = 121_000_000 * 100_000_000;

pub const MAX_SUPPLY: Amount = Amount::from_base_units(MAX_SUPPLY_BASE_UNITS);

/// Block subsidy at height 0 (before any halving).
pub const INITIAL_BLOCK_REWARD: Amount = Amount::from_xai(50);

/// Subsidy halves every this many blocks.
pub const HALVING_INTERVAL: u64 = 210_000;

/// Subsidy for a block at `height`, honoring the halving schedule.
/// Floors at one base unit rather than reaching zero.
pub fn block_reward(height: u64) -> Amount {
    let halvings = height / HALVING_INTERVAL;
    if halvings >= 63 {
        return Amount::ONE_BASE_UNIT;
    }
    let units = INITIAL_BLOCK_REWARD.base_units() >> halvings;
    Amount::from_base_units(units.max(1))
}

// ── Genesis ──────────────────────────────────────────────────────────────────

/// Genesis timestamp: 2024-01-01 00:00:00 UTC.
pub const GENESIS_TIMESTAMP: i64 = 1_704_067_200;

// ── Block limits ─────────────────────────────────────────────────────────────

/// Maximum canonical serialized block size in bytes.
pub const MAX_BLOCK_SIZE: usize = 2_000_000;

/// Maximum transactions per block (coinbase included).
pub const MAX_TX_PER_BLOCK: usize = 5_000;

/// Maximum canonical serialized transaction size in bytes.
pub const MAX_TX_SIZE: usize = 100_000;

/// Bytes the miner keeps free for the coinbase when filling a block.
pub const COINBASE_RESERVE_BYTES: usize = 1_000;

/// Block header format version.
pub const BLOCK_HEADER_VERSION: u32 = 1;

// ── Difficulty ───────────────────────────────────────────────────────────────

/// Target seconds between blocks.
pub const TARGET_BLOCK_TIME_SECS: i64 = 120;

/// Number of trailing blocks inspected when retargeting.
pub const DIFFICULTY_WINDOW: usize = 10;

/// Per-retarget bound: new/old difficulty stays within [1/R, R].
pub const MAX_ADJUSTMENT_FACTOR: u32 = 4;

pub const MIN_DIFFICULTY: Difficulty = 1;

/// 32 hex nibbles of zeros is far beyond any realistic target; acts as a
/// hard ceiling for the clamp.
pub const MAX_DIFFICULTY: Difficulty = 32;

/// Timestamp sanity window: a block must be later than the median of this
/// many preceding blocks.
pub const MEDIAN_TIME_WINDOW: usize = 11;

// ── Mempool ──────────────────────────────────────────────────────────────────

/// Default mempool capacity (transaction count).
pub const MEMPOOL_MAX: usize = 10_000;

/// RBF replacement must beat the incumbent fee-rate by at least this percent.
pub const MIN_RBF_FEE_BUMP_PERCENT: u64 = 10;

/// Per-transaction fee ceiling.
pub const MAX_FEE: Amount = Amount::from_xai(1000);

// ── Reorganization & checkpoints ─────────────────────────────────────────────

/// A fork point deeper than this below the tip is refused.
pub const MAX_REORG_DEPTH: u64 = 100;

/// Default blocks between checkpoints.
pub const CHECKPOINT_INTERVAL: u64 = 1_000;

/// Parked-block pool capacity; oldest entries evict beyond this.
pub const MAX_ORPHAN_BLOCKS: usize = 64;

// ── Transaction metadata caps ────────────────────────────────────────────────

pub const MAX_METADATA_ENTRIES: usize = 16;
pub const MAX_METADATA_KEY_BYTES: usize = 64;
pub const MAX_METADATA_VALUE_BYTES: usize = 512;

// ── Mining streak bonus ──────────────────────────────────────────────────────

/// Ceiling on the streak bonus, as a percent of the base reward. The streak
/// itself counts consecutive calendar days on which the miner produced a
/// block.
pub const MAX_STREAK_BONUS_PERCENT: u64 = 10;

// ── Governance ───────────────────────────────────────────────────────────────

/// Review approvals required to activate a proposal.
pub const GOVERNANCE_REVIEW_THRESHOLD: usize = 3;

/// Minimum total voting power (base units) for an execution to carry.
pub const GOVERNANCE_QUORUM_BASE_UNITS: u64 = 1_000 * 100_000_000;
