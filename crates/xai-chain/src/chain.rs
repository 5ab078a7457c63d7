use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use xai_core::block::{Block, BlockHeader};
use xai_core::constants::MAX_ORPHAN_BLOCKS;
use xai_core::types::{BlockHash, Height};

// ── Tip ──────────────────────────────────────────────────────────────────────

/// The canonical chain head.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Tip {
    pub height: Height,
    pub hash: BlockHash,
    pub cumulative_difficulty: u128,
}

// ── ChainState ───────────────────────────────────────────────────────────────

/// Header index of the canonical chain. Headers live in memory; full blocks
/// are loaded lazily from storage.
pub struct ChainState {
    headers: Vec<BlockHeader>,
    /// cumulative[h] = Σ difficulty of blocks 0..=h.
    cumulative: Vec<u128>,
    by_hash: HashMap<BlockHash, Height>,
}

impl ChainState {
    pub fn new(genesis: BlockHeader) -> Self {
        let mut state = Self {
            headers: Vec::new(),
            cumulative: Vec::new(),
            by_hash: HashMap::new(),
        };
        state.push(genesis);
        state
    }

    pub fn push(&mut self, header: BlockHeader) {
        let prev = self.cumulative.last().copied().unwrap_or(0);
        self.by_hash.insert(header.hash, header.index);
        self.cumulative.push(prev + header.difficulty as u128);
        self.headers.push(header);
    }

    pub fn tip(&self) -> Tip {
        let header = self.headers.last().expect("chain always holds genesis");
        Tip {
            height: header.index,
            hash: header.hash,
            cumulative_difficulty: *self.cumulative.last().expect("parallel to headers"),
        }
    }

    pub fn tip_header(&self) -> &BlockHeader {
        self.headers.last().expect("chain always holds genesis")
    }

    pub fn height(&self) -> Height {
        (self.headers.len() - 1) as Height
    }

    pub fn header_at(&self, height: Height) -> Option<&BlockHeader> {
        self.headers.get(height as usize)
    }

    pub fn height_of(&self, hash: &BlockHash) -> Option<Height> {
        self.by_hash.get(hash).copied()
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.by_hash.contains_key(hash)
    }

    /// Σ difficulty of blocks 0..=height.
    pub fn cumulative_at(&self, height: Height) -> u128 {
        self.cumulative[height as usize]
    }

    pub fn headers(&self) -> &[BlockHeader] {
        &self.headers
    }

    /// Drop every header above `height`. The removed headers are returned
    /// oldest-first so a failed reorganization can push them straight back.
    pub fn truncate_to(&mut self, height: Height) -> Vec<BlockHeader> {
        let keep = (height + 1) as usize;
        let removed: Vec<BlockHeader> = self.headers.split_off(keep);
        self.cumulative.truncate(keep);
        for header in &removed {
            self.by_hash.remove(&header.hash);
        }
        removed
    }
}

// ── Fork choice ──────────────────────────────────────────────────────────────

/// Does a candidate branch displace the current tip? Longest cumulative
/// difficulty wins; equal difficulty falls to the earliest tip timestamp;
/// equal timestamps fall to the lowest tip hash.
pub fn branch_wins(
    candidate_cumulative: u128,
    candidate_tip: &BlockHeader,
    current: &Tip,
    current_tip_timestamp: i64,
) -> bool {
    if candidate_cumulative != current.cumulative_difficulty {
        return candidate_cumulative > current.cumulative_difficulty;
    }
    if candidate_tip.timestamp != current_tip_timestamp {
        return candidate_tip.timestamp < current_tip_timestamp;
    }
    candidate_tip.hash < current.hash
}

// ── OrphanPool ───────────────────────────────────────────────────────────────

/// Parked blocks: well-formed blocks whose parent is unknown, plus
/// side-branch blocks that do not (yet) displace the tip. Bounded; oldest
/// entries are evicted first.
#[derive(Default)]
pub struct OrphanPool {
    by_hash: HashMap<BlockHash, Block>,
    children: HashMap<BlockHash, Vec<BlockHash>>,
    arrivals: VecDeque<BlockHash>,
}

impl OrphanPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.by_hash.contains_key(hash)
    }

    /// Park a block, evicting the oldest entry when full.
    pub fn insert(&mut self, block: Block) {
        let hash = block.hash();
        if self.by_hash.contains_key(&hash) {
            return;
        }
        while self.by_hash.len() >= MAX_ORPHAN_BLOCKS {
            let Some(oldest) = self.arrivals.pop_front() else {
                break;
            };
            self.remove(&oldest);
        }
        self.children
            .entry(block.header.previous_hash)
            .or_default()
            .push(hash);
        self.arrivals.push_back(hash);
        self.by_hash.insert(hash, block);
    }

    pub fn remove(&mut self, hash: &BlockHash) -> Option<Block> {
        let block = self.by_hash.remove(hash)?;
        if let Some(siblings) = self.children.get_mut(&block.header.previous_hash) {
            siblings.retain(|h| h != hash);
            if siblings.is_empty() {
                self.children.remove(&block.header.previous_hash);
            }
        }
        self.arrivals.retain(|h| h != hash);
        Some(block)
    }

    /// Blocks whose parent is `parent`, removed from the pool for promotion.
    pub fn take_children(&mut self, parent: &BlockHash) -> Vec<Block> {
        let hashes = self.children.remove(parent).unwrap_or_default();
        hashes
            .into_iter()
            .filter_map(|h| {
                self.arrivals.retain(|a| *a != h);
                self.by_hash.remove(&h)
            })
            .collect()
    }

    /// Walk parent links backwards from `tip_parent` through the pool.
    /// Returns the pooled ancestor path (oldest first) and the hash that
    /// terminated the walk — the first parent not present in the pool.
    pub fn path_to(&self, tip_parent: &BlockHash) -> (Vec<&Block>, BlockHash) {
        let mut path = Vec::new();
        let mut cursor = *tip_parent;
        while let Some(block) = self.by_hash.get(&cursor) {
            cursor = block.header.previous_hash;
            path.push(block);
        }
        path.reverse();
        (path, cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xai_core::types::Hash256;

    fn header(index: Height, seed: u8, prev: u8, difficulty: u32) -> BlockHeader {
        BlockHeader {
            index,
            previous_hash: Hash256::from_bytes([prev; 32]),
            merkle_root: Hash256::zero(),
            timestamp: 1_000 + index as i64,
            difficulty,
            nonce: 0,
            version: 1,
            miner_pubkey: String::new(),
            signature: String::new(),
            hash: Hash256::from_bytes([seed; 32]),
        }
    }

    fn block(index: Height, seed: u8, prev: u8) -> Block {
        Block {
            header: header(index, seed, prev, 1),
            transactions: vec![],
        }
    }

    #[test]
    fn chain_tracks_cumulative_difficulty() {
        let mut chain = ChainState::new(header(0, 0, 255, 1));
        chain.push(header(1, 1, 0, 2));
        chain.push(header(2, 2, 1, 3));

        assert_eq!(chain.height(), 2);
        assert_eq!(chain.tip().cumulative_difficulty, 6);
        assert_eq!(chain.cumulative_at(1), 3);
        assert_eq!(chain.height_of(&Hash256::from_bytes([1; 32])), Some(1));
    }

    #[test]
    fn truncate_removes_hash_index() {
        let mut chain = ChainState::new(header(0, 0, 255, 1));
        chain.push(header(1, 1, 0, 1));
        chain.push(header(2, 2, 1, 1));

        let removed = chain.truncate_to(0);
        assert_eq!(removed.len(), 2);
        assert_eq!(removed[0].index, 1);
        assert_eq!(chain.height(), 0);
        assert!(!chain.contains(&Hash256::from_bytes([2; 32])));
    }

    #[test]
    fn fork_choice_prefers_difficulty_then_timestamp_then_hash() {
        let tip = Tip {
            height: 5,
            hash: Hash256::from_bytes([5; 32]),
            cumulative_difficulty: 10,
        };
        let mut candidate = header(5, 4, 3, 1);

        assert!(branch_wins(11, &candidate, &tip, 1_000));
        assert!(!branch_wins(9, &candidate, &tip, 1_000));

        // Equal difficulty: earlier timestamp wins.
        candidate.timestamp = 999;
        assert!(branch_wins(10, &candidate, &tip, 1_000));
        candidate.timestamp = 1_001;
        assert!(!branch_wins(10, &candidate, &tip, 1_000));

        // Equal timestamp: lowest hash wins.
        candidate.timestamp = 1_000;
        assert!(branch_wins(10, &candidate, &tip, 1_000));
    }

    #[test]
    fn orphan_path_walks_to_unknown_ancestor() {
        let mut pool = OrphanPool::new();
        pool.insert(block(2, 2, 1));
        pool.insert(block(3, 3, 2));

        let (path, terminus) = pool.path_to(&Hash256::from_bytes([3; 32]));
        assert_eq!(path.len(), 2);
        assert_eq!(path[0].height(), 2);
        assert_eq!(terminus, Hash256::from_bytes([1; 32]));

        let (empty, terminus) = pool.path_to(&Hash256::from_bytes([9; 32]));
        assert!(empty.is_empty());
        assert_eq!(terminus, Hash256::from_bytes([9; 32]));
    }

    #[test]
    fn take_children_promotes_and_removes() {
        let mut pool = OrphanPool::new();
        pool.insert(block(2, 2, 1));
        pool.insert(block(2, 3, 1));
        pool.insert(block(5, 4, 9));

        let children = pool.take_children(&Hash256::from_bytes([1; 32]));
        assert_eq!(children.len(), 2);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn pool_is_bounded() {
        let mut pool = OrphanPool::new();
        for i in 0..(MAX_ORPHAN_BLOCKS + 10) {
            pool.insert(block(i as Height, i as u8, 255));
        }
        assert!(pool.len() <= MAX_ORPHAN_BLOCKS);
    }
}
