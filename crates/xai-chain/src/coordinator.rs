use std::sync::RwLock;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use xai_consensus::difficulty::{next_difficulty, DifficultyParams};
use xai_consensus::validator::{validate_block, validate_coverage, validate_nonce, validate_transaction, TxContext};
use xai_core::address::Address;
use xai_core::amount::Amount;
use xai_core::block::{Block, BlockHeader};
use xai_core::codec;
use xai_core::config::{NetworkType, NodeConfig};
use xai_core::constants::{MAX_REORG_DEPTH, MAX_TX_PER_BLOCK};
use xai_core::error::XaiError;
use xai_core::transaction::{Transaction, TxKind};
use xai_core::types::{BlockHash, Difficulty, Height, TxId};
use xai_crypto::KeyPair;
use xai_governance::{GovernanceState, Proposal};
use xai_mempool::{AdmitOutcome, Mempool, MempoolStats, MempoolTxSummary};
use xai_state::checkpoint::{utxo_digest, Checkpoint, CheckpointStore};
use xai_state::nonce::NonceTracker;
use xai_state::storage::{StateSnapshot, Storage};
use xai_state::utxo::UtxoSet;

use crate::chain::{branch_wins, ChainState, OrphanPool, Tip};
use crate::events::{EventBus, NodeEvent};
use crate::genesis::genesis_block;
use crate::miner;
use crate::streak::StreakTracker;

/// Outcome of an inbound block, as reported to the submitter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum BlockOutcome {
    Extended,
    Reorganized { depth: u64 },
    Orphaned,
}

// ── Ledger ───────────────────────────────────────────────────────────────────

/// The composite mutable ledger state. Everything here is guarded as one
/// logical unit by the coordinator's write lock; internal operations take
/// `&mut Ledger`, so re-entrancy never arises.
pub struct Ledger {
    pub network: NetworkType,
    pub chain: ChainState,
    pub utxo: UtxoSet,
    pub nonces: NonceTracker,
    pub mempool: Mempool,
    pub governance: GovernanceState,
    pub orphans: OrphanPool,
    pub streaks: StreakTracker,
    /// Total coins issued so far (Σ coinbase amounts − Σ recycled fees).
    pub supply: Amount,
    pub difficulty_params: DifficultyParams,
    pub fast_mining_cap: Option<Difficulty>,
    pub checkpoint_interval: u64,
    pub mempool_capacity: usize,
}

impl Ledger {
    fn new(config: &NodeConfig, genesis_header: xai_core::block::BlockHeader) -> Self {
        Self {
            network: config.network_type,
            chain: ChainState::new(genesis_header),
            utxo: UtxoSet::new(),
            nonces: NonceTracker::new(),
            mempool: Mempool::new(config.mempool_max_size),
            governance: GovernanceState::new(),
            orphans: OrphanPool::new(),
            streaks: StreakTracker::new(),
            supply: Amount::ZERO,
            difficulty_params: DifficultyParams::default(),
            fast_mining_cap: config
                .fast_mining_enabled
                .then_some(config.max_test_mining_difficulty),
            checkpoint_interval: config.checkpoint_interval,
            mempool_capacity: config.mempool_max_size,
        }
    }

    /// Difficulty the next block must carry: the retarget output, capped in
    /// fast-mining (test) mode.
    pub fn effective_difficulty(&self) -> Difficulty {
        let next = next_difficulty(self.chain.headers(), &self.difficulty_params);
        match self.fast_mining_cap {
            Some(cap) => next.min(cap.max(1)),
            None => next,
        }
    }
}

/// Fees collected by a block and the fresh issuance its coinbase carries.
fn block_issuance(block: &Block) -> (Amount, Amount) {
    let fees = block
        .transactions
        .iter()
        .skip(1)
        .map(|tx| tx.fee)
        .sum::<Amount>();
    let issuance = block
        .coinbase()
        .map(|cb| cb.amount.checked_sub(fees).unwrap_or(Amount::ZERO))
        .unwrap_or(Amount::ZERO);
    (fees, issuance)
}

/// Stateful application of a validated block: strict per-sender nonce
/// sequencing, coverage against the evolving UTXO set, and the UTXO
/// mutations themselves. Returns the nonce advances to commit after the
/// block is durable. On error the caller restores the snapshots it took.
fn apply_block_state(ledger: &mut Ledger, block: &Block) -> Result<Vec<(Address, u64)>, XaiError> {
    ledger.nonces.clear_reservations();
    let height = block.height();
    let mut changes = Vec::new();

    for tx in &block.transactions {
        if tx.is_coinbase() {
            ledger.utxo.apply_outputs(tx);
            continue;
        }
        let expected = ledger.nonces.expected_next(&tx.sender);
        validate_nonce(tx, expected)?;
        validate_coverage(tx, &ledger.utxo)?;
        if let TxKind::GovernanceVote { voting_power, .. } = &tx.kind {
            if *voting_power > ledger.utxo.balance(&tx.sender) {
                return Err(XaiError::Governance(
                    "vote overstates the sender's voting power".into(),
                ));
            }
        }
        ledger.utxo.apply_inputs(tx, height)?;
        ledger.utxo.apply_outputs(tx);
        let nonce = tx.nonce.ok_or_else(|| XaiError::MalformedEncoding("missing nonce".into()))?;
        ledger.nonces.reserve(&tx.sender, nonce);
        changes.push((tx.sender.clone(), nonce));
    }
    Ok(changes)
}

// ── Coordinator ──────────────────────────────────────────────────────────────

/// The single-writer facade over the whole ledger core. External
/// collaborators (API, peers, the mining loop) talk only to this type.
pub struct Coordinator {
    config: NodeConfig,
    ledger: RwLock<Ledger>,
    storage: Storage,
    checkpoints: CheckpointStore,
    events: EventBus,
}

impl Coordinator {
    /// Open the data directory, bootstrap genesis on first run, and recover
    /// state — from the snapshot when it matches the stored chain, otherwise
    /// by replaying every block from genesis.
    pub fn open(config: NodeConfig) -> Result<Self, XaiError> {
        let storage = Storage::open(&config.data_dir)?;
        let checkpoints = CheckpointStore::open(&config.data_dir)?;
        let genesis = genesis_block(config.network_type);

        match storage.read_block(0)? {
            None => {
                info!(network = ?config.network_type, "fresh data dir, writing genesis");
                storage.write_block(&genesis)?;
            }
            Some(existing) if existing.hash() != genesis.hash() => {
                return Err(XaiError::ConfigError(
                    "data dir was initialised for a different network".into(),
                ));
            }
            Some(_) => {}
        }

        let ledger = Ledger::new(&config, genesis.header.clone());
        let coordinator = Self {
            config,
            ledger: RwLock::new(ledger),
            storage,
            checkpoints,
            events: EventBus::default(),
        };
        coordinator.bootstrap()?;
        Ok(coordinator)
    }

    // ── Public API ───────────────────────────────────────────────────────────

    /// Validate and pool a transaction. Ok means Accepted.
    pub fn submit_transaction(&self, tx: Transaction) -> Result<AdmitOutcome, XaiError> {
        let mut ledger = self.ledger.write().expect("ledger lock poisoned");
        let txid = tx.txid;
        let outcome = self.admit_into(&mut ledger, tx)?;
        let removed = match &outcome {
            AdmitOutcome::Inserted { evicted: Some(id) } => vec![*id],
            AdmitOutcome::Replaced { old } => vec![*old],
            _ => vec![],
        };
        if !matches!(outcome, AdmitOutcome::AlreadyKnown) {
            self.events.publish(NodeEvent::MempoolChanged {
                added: vec![txid],
                removed,
            });
        }
        Ok(outcome)
    }

    /// Process an inbound block: extend the tip, trigger a reorganization,
    /// or park it as an orphan.
    pub fn submit_block(&self, block: Block) -> Result<BlockOutcome, XaiError> {
        let mut ledger = self.ledger.write().expect("ledger lock poisoned");
        self.process_block(&mut ledger, block)
    }

    /// Assemble, mine, and durably commit one block. `deadline` bounds the
    /// PoW search; on expiry the ledger is untouched and Cancelled returns.
    pub fn mine_one(&self, keypair: &KeyPair, deadline: Option<Instant>) -> Result<Block, XaiError> {
        let mut ledger = self.ledger.write().expect("ledger lock poisoned");
        let now = chrono::Utc::now().timestamp();
        let block = miner::assemble_and_mine(&mut ledger, keypair, now, deadline)?;
        let mined = self.extend_tip(&mut ledger, &block, true)?;
        // The block is durable; only now does the miner's streak advance.
        ledger.streaks.record(&keypair.address, now);
        self.publish_tip(&ledger);
        if !mined.is_empty() {
            self.events.publish(NodeEvent::MempoolChanged {
                added: vec![],
                removed: mined,
            });
        }
        self.promote_orphans(&mut ledger);
        Ok(block)
    }

    pub fn get_tip(&self) -> Tip {
        self.ledger.read().expect("ledger lock poisoned").chain.tip()
    }

    pub fn get_block(&self, height: Height) -> Result<Option<Block>, XaiError> {
        self.storage.read_block(height)
    }

    pub fn get_block_by_hash(&self, hash: &BlockHash) -> Result<Option<Block>, XaiError> {
        self.storage.read_block_by_hash(hash)
    }

    pub fn get_balance(&self, address: &Address) -> Amount {
        self.ledger
            .read()
            .expect("ledger lock poisoned")
            .utxo
            .balance(address)
    }

    pub fn get_mempool_view(&self) -> Vec<MempoolTxSummary> {
        self.ledger
            .read()
            .expect("ledger lock poisoned")
            .mempool
            .view()
    }

    pub fn mempool_stats(&self) -> MempoolStats {
        self.ledger
            .read()
            .expect("ledger lock poisoned")
            .mempool
            .stats()
    }

    pub fn circulating_supply(&self) -> Amount {
        self.ledger.read().expect("ledger lock poisoned").supply
    }

    pub fn governance_proposals(&self) -> Vec<Proposal> {
        self.ledger
            .read()
            .expect("ledger lock poisoned")
            .governance
            .proposals()
            .cloned()
            .collect()
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    pub fn network(&self) -> NetworkType {
        self.config.network_type
    }

    // ── Admission ────────────────────────────────────────────────────────────

    fn admit_into(&self, ledger: &mut Ledger, tx: Transaction) -> Result<AdmitOutcome, XaiError> {
        if ledger.mempool.contains(&tx.txid) {
            return Ok(AdmitOutcome::AlreadyKnown);
        }
        // An RBF candidate validates against the slot it replaces; everything
        // else must carry the next contiguous nonce.
        let expected = match tx.nonce {
            Some(n) if ledger.mempool.incumbent_at(&tx.sender, n).is_some() => n,
            _ => ledger
                .mempool
                .next_nonce_for(&tx.sender, ledger.nonces.last_confirmed(&tx.sender)),
        };
        validate_transaction(
            &tx,
            &TxContext {
                utxo: &ledger.utxo,
                expected_nonce: expected,
            },
        )?;
        if let TxKind::GovernanceVote { voting_power, .. } = &tx.kind {
            if *voting_power > ledger.utxo.balance(&tx.sender) {
                return Err(XaiError::Governance(
                    "vote overstates the sender's voting power".into(),
                ));
            }
        }
        ledger.mempool.admit(tx)
    }

    // ── Block processing ─────────────────────────────────────────────────────

    fn process_block(&self, ledger: &mut Ledger, block: Block) -> Result<BlockOutcome, XaiError> {
        // Per-call validation budget: refuse absurd payloads outright.
        if block.transactions.len() > 2 * MAX_TX_PER_BLOCK {
            return Err(XaiError::ResourceExhausted);
        }

        let hash = block.hash();
        if ledger.chain.contains(&hash) {
            return Ok(BlockOutcome::Extended);
        }
        if ledger.orphans.contains(&hash) {
            return Ok(BlockOutcome::Orphaned);
        }

        let tip = ledger.chain.tip();
        if block.header.previous_hash == tip.hash {
            let mined = self.extend_tip(ledger, &block, true)?;
            self.publish_tip(ledger);
            if !mined.is_empty() {
                self.events.publish(NodeEvent::MempoolChanged {
                    added: vec![],
                    removed: mined,
                });
            }
            self.promote_orphans(ledger);
            return Ok(BlockOutcome::Extended);
        }

        // ── Side branch or orphan ────────────────────────────────────────────
        let (path, terminus) = ledger.orphans.path_to(&block.header.previous_hash);
        let Some(fork_height) = ledger.chain.height_of(&terminus) else {
            debug!(%hash, parent = %block.header.previous_hash, "parking block with unknown parent");
            ledger.orphans.insert(block);
            return Ok(BlockOutcome::Orphaned);
        };

        let branch_cumulative = ledger.chain.cumulative_at(fork_height)
            + path
                .iter()
                .map(|b| b.header.difficulty as u128)
                .sum::<u128>()
            + block.header.difficulty as u128;
        let tip_timestamp = ledger.chain.tip_header().timestamp;
        if !branch_wins(branch_cumulative, &block.header, &tip, tip_timestamp) {
            debug!(%hash, fork_height, "parking side-branch block that does not displace the tip");
            ledger.orphans.insert(block);
            return Ok(BlockOutcome::Orphaned);
        }

        let mut branch: Vec<Block> = path.into_iter().cloned().collect();
        branch.push(block);
        let depth = self.reorganize(ledger, fork_height, &branch)?;
        for b in &branch {
            ledger.orphans.remove(&b.hash());
        }
        let new_tip = ledger.chain.tip();
        self.events.publish(NodeEvent::ReorgCompleted {
            depth,
            new_tip: new_tip.hash,
        });
        self.publish_tip(ledger);
        self.promote_orphans(ledger);
        Ok(BlockOutcome::Reorganized { depth })
    }

    /// Validate `block` against the tip and commit it. The ordering is the
    /// system's most important invariant: state applies in memory, the block
    /// reaches disk, and only then do nonces advance; the state snapshot
    /// follows, and any failure rolls everything back.
    ///
    /// Returns the txids cleared from the mempool.
    fn extend_tip(
        &self,
        ledger: &mut Ledger,
        block: &Block,
        persist: bool,
    ) -> Result<Vec<TxId>, XaiError> {
        let parent = ledger.chain.tip_header().clone();
        let expected_difficulty = ledger.effective_difficulty();
        validate_block(
            block,
            &parent,
            ledger.chain.headers(),
            expected_difficulty,
            ledger.supply,
        )?;

        let supply_before = ledger.supply;
        let utxo_snapshot = ledger.utxo.snapshot();
        let nonce_snapshot = ledger.nonces.snapshot();

        let nonce_changes = match apply_block_state(ledger, block) {
            Ok(changes) => changes,
            Err(e) => {
                ledger.utxo.restore(utxo_snapshot);
                ledger.nonces.restore(nonce_snapshot);
                return Err(e);
            }
        };

        if persist {
            if let Err(e) = self.storage.write_block(block) {
                ledger.utxo.restore(utxo_snapshot);
                ledger.nonces.restore(nonce_snapshot);
                return Err(e);
            }
        }

        // Block is durable; advance nonces and the in-memory chain.
        for (sender, nonce) in &nonce_changes {
            ledger.nonces.commit(sender, *nonce);
        }
        ledger.chain.push(block.header.clone());
        let (_fees, issuance) = block_issuance(block);
        ledger.supply = ledger
            .supply
            .checked_add(issuance)
            .unwrap_or(supply_before);
        ledger.governance.replay_block(block);

        let mined: Vec<TxId> = block.transactions.iter().skip(1).map(|tx| tx.txid).collect();
        let evicted_backup: Vec<Transaction> = mined
            .iter()
            .filter_map(|id| ledger.mempool.get(id).map(|e| e.tx.clone()))
            .collect();
        ledger.mempool.remove_confirmed(mined.iter());

        if persist {
            if let Err(e) = self
                .maybe_checkpoint(ledger)
                .and_then(|_| self.write_snapshot(ledger))
            {
                warn!(height = block.height(), error = %e, "commit failed after block write, rolling back");
                self.rollback_commit(
                    ledger,
                    block,
                    utxo_snapshot,
                    nonce_snapshot,
                    supply_before,
                    evicted_backup,
                );
                return Err(e);
            }
        }

        ledger.utxo.clear_undo_log();
        debug!(height = block.height(), hash = %block.hash(), "tip extended");
        Ok(mined)
    }

    /// Undo a commit whose durable tail (checkpoint/snapshot) failed: the
    /// pre-call UTXO, nonces, chain, supply, governance, and mempool all
    /// come back, and the tentative block file is removed.
    fn rollback_commit(
        &self,
        ledger: &mut Ledger,
        block: &Block,
        utxo_snapshot: xai_state::utxo::UtxoSnapshot,
        nonce_snapshot: xai_state::nonce::NonceSnapshot,
        supply_before: Amount,
        evicted_backup: Vec<Transaction>,
    ) {
        ledger.utxo.restore(utxo_snapshot);
        ledger.nonces.restore(nonce_snapshot);
        ledger.chain.truncate_to(block.height() - 1);
        ledger.supply = supply_before;
        if let Err(e) = self.storage.remove_block(block.height(), &block.hash()) {
            warn!(error = %e, "could not remove tentative block file");
        }
        if let Err(e) = self.rebuild_governance(ledger) {
            warn!(error = %e, "could not rebuild governance after rollback");
        }
        for tx in evicted_backup {
            let _ = ledger.mempool.admit(tx);
        }
    }

    // ── Reorganization ───────────────────────────────────────────────────────

    /// Rewind to the fork point, apply the candidate branch, revalidate the
    /// mempool, and persist. Any failure mid-apply restores the pre-reorg
    /// state — partial reorgs are impossible.
    fn reorganize(
        &self,
        ledger: &mut Ledger,
        fork_height: Height,
        branch: &[Block],
    ) -> Result<u64, XaiError> {
        let tip = ledger.chain.tip();
        let depth = tip.height - fork_height;
        if depth > MAX_REORG_DEPTH {
            return Err(XaiError::ReorgTooDeep {
                depth,
                max: MAX_REORG_DEPTH,
            });
        }
        if let Some(checkpoint) = self.checkpoints.read_latest()? {
            if fork_height < checkpoint.height {
                return Err(XaiError::CheckpointViolation {
                    checkpoint_height: checkpoint.height,
                });
            }
        }

        info!(fork_height, depth, "chain reorganization started");
        let supply_before = ledger.supply;
        let utxo_snapshot = ledger.utxo.snapshot();
        let nonce_snapshot = ledger.nonces.snapshot();

        // ── Rewind to the fork point ─────────────────────────────────────────
        let mut rescue: Vec<Transaction> = Vec::new();
        for height in ((fork_height + 1)..=tip.height).rev() {
            let old = self.storage.read_block(height)?.ok_or_else(|| {
                XaiError::StorageFailure(format!("missing block file at height {height}"))
            })?;
            let (_, issuance) = block_issuance(&old);
            for tx in old.transactions.iter().rev() {
                if let Err(e) = ledger.utxo.reverse_apply(tx) {
                    ledger.utxo.restore(utxo_snapshot);
                    ledger.nonces.restore(nonce_snapshot.clone());
                    return Err(e);
                }
                if !tx.is_coinbase() {
                    ledger.nonces.rewind(&tx.sender, tx.nonce.unwrap_or(0));
                    rescue.push(tx.clone());
                }
            }
            ledger.supply = ledger.supply.checked_sub(issuance).unwrap_or(Amount::ZERO);
        }
        let removed_headers = ledger.chain.truncate_to(fork_height);

        // ── Advance along the new branch ─────────────────────────────────────
        for candidate in branch {
            let applied = self
                .extend_in_memory(ledger, candidate)
                .map(|changes| {
                    for (sender, nonce) in &changes {
                        ledger.nonces.commit(sender, *nonce);
                    }
                });
            if let Err(e) = applied {
                warn!(error = %e, hash = %candidate.hash(), "reorg branch failed validation, restoring");
                ledger.utxo.restore(utxo_snapshot);
                ledger.nonces.restore(nonce_snapshot.clone());
                ledger.chain.truncate_to(fork_height);
                for header in &removed_headers {
                    ledger.chain.push(header.clone());
                }
                ledger.supply = supply_before;
                return Err(e);
            }
        }

        // ── Persist the new branch ───────────────────────────────────────────
        for b in branch {
            if let Err(e) = self.storage.write_block(b) {
                warn!(error = %e, "reorg persistence failed, restoring pre-reorg state");
                ledger.utxo.restore(utxo_snapshot);
                ledger.nonces.restore(nonce_snapshot.clone());
                ledger.chain.truncate_to(fork_height);
                for header in &removed_headers {
                    ledger.chain.push(header.clone());
                }
                ledger.supply = supply_before;
                return Err(e);
            }
        }
        // Prune stale files when the displaced chain was longer.
        let new_tip_height = ledger.chain.height();
        for header in removed_headers
            .iter()
            .filter(|h| h.index > new_tip_height)
        {
            if let Err(e) = self.storage.remove_block(header.index, &header.hash) {
                warn!(height = header.index, error = %e, "could not prune stale block file");
            }
        }

        // ── Mempool revalidation: rescued + pooled, survivors only ───────────
        // Rescue was collected tip-down; re-admit oldest-first so per-sender
        // nonce chains stay contiguous.
        rescue.reverse();
        let pooled = ledger.mempool.all();
        let previous: Vec<TxId> = pooled.iter().map(|tx| tx.txid).collect();
        ledger.mempool = Mempool::new(ledger.mempool_capacity);
        let mut surviving: Vec<TxId> = Vec::new();
        for tx in rescue.into_iter().chain(pooled) {
            let txid = tx.txid;
            match self.admit_into(ledger, tx) {
                Ok(AdmitOutcome::Inserted { .. }) | Ok(AdmitOutcome::Replaced { .. }) => {
                    surviving.push(txid)
                }
                Ok(AdmitOutcome::AlreadyKnown) => {}
                Err(e) => {
                    debug!(%txid, error = %e, "transaction dropped during post-reorg revalidation")
                }
            }
        }
        let dropped: Vec<TxId> = previous
            .into_iter()
            .filter(|id| !ledger.mempool.contains(id))
            .collect();

        self.rebuild_governance(ledger)?;
        self.maybe_checkpoint(ledger)?;
        if let Err(e) = self.write_snapshot(ledger) {
            warn!(error = %e, "state snapshot failed after reorg; will retry at next commit");
        }
        ledger.utxo.clear_undo_log();

        if !dropped.is_empty() || !surviving.is_empty() {
            self.events.publish(NodeEvent::MempoolChanged {
                added: surviving,
                removed: dropped,
            });
        }
        info!(depth, new_tip = %ledger.chain.tip().hash, "chain reorganization complete");
        Ok(depth)
    }

    /// Validate and apply one branch block without touching storage,
    /// governance, or the mempool. Used only inside `reorganize`.
    fn extend_in_memory(
        &self,
        ledger: &mut Ledger,
        block: &Block,
    ) -> Result<Vec<(Address, u64)>, XaiError> {
        let parent = ledger.chain.tip_header().clone();
        let expected_difficulty = ledger.effective_difficulty();
        validate_block(
            block,
            &parent,
            ledger.chain.headers(),
            expected_difficulty,
            ledger.supply,
        )?;
        let changes = apply_block_state(ledger, block)?;
        ledger.chain.push(block.header.clone());
        let (_, issuance) = block_issuance(block);
        ledger.supply = ledger.supply.checked_add(issuance).unwrap_or(ledger.supply);
        Ok(changes)
    }

    // ── Orphan promotion ─────────────────────────────────────────────────────

    /// After every successful extension or reorg, admit any parked block
    /// whose parent became the tip, recursively.
    fn promote_orphans(&self, ledger: &mut Ledger) {
        loop {
            let tip_hash = ledger.chain.tip().hash;
            let children = ledger.orphans.take_children(&tip_hash);
            if children.is_empty() {
                return;
            }
            let mut advanced = false;
            for child in children {
                if ledger.chain.tip().hash != child.header.previous_hash {
                    // A sibling already extended the tip; park the rest back.
                    ledger.orphans.insert(child);
                    continue;
                }
                let hash = child.hash();
                match self.extend_tip(ledger, &child, true) {
                    Ok(mined) => {
                        info!(%hash, "promoted orphan block");
                        self.publish_tip(ledger);
                        if !mined.is_empty() {
                            self.events.publish(NodeEvent::MempoolChanged {
                                added: vec![],
                                removed: mined,
                            });
                        }
                        advanced = true;
                    }
                    Err(e) => {
                        warn!(%hash, error = %e, "discarding invalid orphan");
                    }
                }
            }
            if !advanced {
                return;
            }
        }
    }

    // ── Durability helpers ───────────────────────────────────────────────────

    fn maybe_checkpoint(&self, ledger: &mut Ledger) -> Result<(), XaiError> {
        let tip = ledger.chain.tip();
        if tip.height == 0 || tip.height % ledger.checkpoint_interval != 0 {
            return Ok(());
        }
        let entries = ledger.utxo.to_entries();
        let checkpoint = Checkpoint {
            height: tip.height,
            block_hash: tip.hash,
            utxo_digest: utxo_digest(&entries)?,
            total_supply: ledger.supply,
        };
        self.checkpoints.write(&checkpoint)?;
        ledger.utxo.prune_spent_below(tip.height);
        Ok(())
    }

    fn write_snapshot(&self, ledger: &Ledger) -> Result<(), XaiError> {
        let tip = ledger.chain.tip();
        let pending_txs = ledger
            .mempool
            .all()
            .iter()
            .map(codec::canonical_bytes)
            .collect::<Result<Vec<_>, _>>()?;
        let snapshot = StateSnapshot {
            tip_height: tip.height,
            tip_hash: tip.hash,
            utxo_entries: ledger.utxo.to_entries(),
            spent_entries: ledger.utxo.spent_entries(),
            nonces: ledger.nonces.to_entries(),
            pending_txs,
        };
        self.storage.write_state_snapshot(&snapshot)
    }

    fn rebuild_governance(&self, ledger: &mut Ledger) -> Result<(), XaiError> {
        let mut governance = GovernanceState::new();
        for height in 0..=ledger.chain.height() {
            if let Some(block) = self.storage.read_block(height)? {
                governance.replay_block(&block);
            }
        }
        ledger.governance = governance;
        Ok(())
    }

    // ── Startup recovery ─────────────────────────────────────────────────────

    fn bootstrap(&self) -> Result<(), XaiError> {
        let mut ledger = self.ledger.write().expect("ledger lock poisoned");
        if let Some(snapshot) = self.storage.read_state_snapshot()? {
            if self.try_fast_recovery(&mut ledger, snapshot)? {
                info!(
                    height = ledger.chain.height(),
                    "fast recovery from state snapshot"
                );
                return Ok(());
            }
            warn!("state snapshot did not match the stored chain, performing full replay");
        }
        self.full_replay(&mut ledger)
    }

    fn try_fast_recovery(
        &self,
        ledger: &mut Ledger,
        snapshot: StateSnapshot,
    ) -> Result<bool, XaiError> {
        let Some(tip_block) = self.storage.read_block(snapshot.tip_height)? else {
            return Ok(false);
        };
        if tip_block.hash() != snapshot.tip_hash {
            return Ok(false);
        }

        let mut headers: Vec<BlockHeader> = Vec::with_capacity(snapshot.tip_height as usize + 1);
        for height in 0..=snapshot.tip_height {
            let Some(block) = self.storage.read_block(height)? else {
                return Ok(false);
            };
            if let Some(prev) = headers.last() {
                if block.header.previous_hash != prev.hash {
                    return Ok(false);
                }
            }
            headers.push(block.header);
        }

        let mut iter = headers.into_iter();
        let mut chain = ChainState::new(iter.next().expect("genesis header present"));
        for header in iter {
            chain.push(header);
        }

        let utxo = UtxoSet::from_entries(snapshot.utxo_entries, snapshot.spent_entries);
        let report = utxo.verify_consistency();
        if !report.is_consistent {
            warn!(issues = ?report.issues, "snapshot UTXO set failed consistency check");
            return Ok(false);
        }

        ledger.chain = chain;
        ledger.supply = utxo.total_value();
        ledger.utxo = utxo;
        ledger.nonces = NonceTracker::from_entries(snapshot.nonces);
        self.rebuild_governance(ledger)?;
        for bytes in snapshot.pending_txs {
            match codec::decode::<Transaction>(&bytes) {
                Ok(tx) => {
                    let _ = ledger.mempool.admit(tx);
                }
                Err(e) => warn!(error = %e, "dropping undecodable pending transaction"),
            }
        }
        Ok(true)
    }

    fn full_replay(&self, ledger: &mut Ledger) -> Result<(), XaiError> {
        info!("replaying chain from genesis");
        let genesis = genesis_block(self.config.network_type);
        *ledger = Ledger::new(&self.config, genesis.header);

        let mut height: Height = 1;
        loop {
            let Some(block) = self.storage.read_block(height)? else {
                break;
            };
            if block.header.previous_hash != ledger.chain.tip().hash {
                warn!(height, "chain file divergence, truncating replay here");
                break;
            }
            if let Err(e) = self.extend_tip(ledger, &block, false) {
                warn!(height, error = %e, "stored block failed validation, truncating replay here");
                break;
            }
            if let Some(checkpoint) = self.checkpoints.read(height)? {
                if checkpoint.block_hash != block.hash() {
                    return Err(XaiError::StorageFailure(format!(
                        "stored chain contradicts checkpoint at height {height}"
                    )));
                }
            }
            height += 1;
        }

        let report = ledger.utxo.verify_consistency();
        if !report.is_consistent {
            return Err(XaiError::StorageFailure(format!(
                "UTXO set inconsistent after replay: {:?}",
                report.issues
            )));
        }
        info!(height = ledger.chain.height(), "full replay complete");
        Ok(())
    }

    fn publish_tip(&self, ledger: &Ledger) {
        let tip = ledger.chain.tip();
        self.events.publish(NodeEvent::TipChanged {
            height: tip.height,
            hash: tip.hash,
        });
    }
}
