use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::XaiError;
use crate::transaction::Transaction;
use crate::types::{BlockHash, Difficulty, Hash256, Height, Timestamp};

// ── BlockHeader ──────────────────────────────────────────────────────────────

/// Block header. `hash` is SHA-256 of the canonical header bytes with `hash`
/// and `signature` excluded; the hash must carry `difficulty` leading zero
/// hex nibbles, and `signature` is the miner's ECDSA signature over the hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub index: Height,
    pub previous_hash: BlockHash,
    pub merkle_root: Hash256,
    pub timestamp: Timestamp,
    pub difficulty: Difficulty,
    pub nonce: u64,
    pub version: u32,

    /// Compressed secp256k1 public key of the mining node, hex.
    pub miner_pubkey: String,

    /// Miner's signature over `hash`, hex. Empty only for genesis.
    pub signature: String,

    /// Derived content hash.
    pub hash: BlockHash,
}

/// The header fields bound by the PoW hash. Excludes `hash` and `signature`.
#[derive(Serialize)]
pub struct HeaderPreimage<'a> {
    pub index: Height,
    pub previous_hash: &'a BlockHash,
    pub merkle_root: &'a Hash256,
    pub timestamp: Timestamp,
    pub difficulty: Difficulty,
    pub nonce: u64,
    pub version: u32,
    pub miner_pubkey: &'a str,
}

impl BlockHeader {
    pub fn preimage(&self) -> HeaderPreimage<'_> {
        HeaderPreimage {
            index: self.index,
            previous_hash: &self.previous_hash,
            merkle_root: &self.merkle_root,
            timestamp: self.timestamp,
            difficulty: self.difficulty,
            nonce: self.nonce,
            version: self.version,
            miner_pubkey: &self.miner_pubkey,
        }
    }

    /// Canonical bytes whose SHA-256 is the block hash.
    pub fn pow_bytes(&self) -> Result<Vec<u8>, XaiError> {
        codec::canonical_bytes(&self.preimage())
    }
}

impl<'a> HeaderPreimage<'a> {
    pub fn pow_bytes(&self) -> Result<Vec<u8>, XaiError> {
        codec::canonical_bytes(self)
    }
}

// ── Block ────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn height(&self) -> Height {
        self.header.index
    }

    pub fn hash(&self) -> BlockHash {
        self.header.hash
    }

    /// The mandatory leading coinbase, if well-formed.
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }

    /// Canonical serialized size in bytes; the unit of the block size limit.
    pub fn canonical_size(&self) -> Result<usize, XaiError> {
        Ok(codec::canonical_bytes(self)?.len())
    }
}
