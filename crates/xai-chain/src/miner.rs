use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, info, warn};

use xai_core::address::Address;
use xai_core::amount::Amount;
use xai_core::block::{Block, BlockHeader, HeaderPreimage};
use xai_core::constants::{
    block_reward, BLOCK_HEADER_VERSION, COINBASE_RESERVE_BYTES, MAX_BLOCK_SIZE, MAX_TX_PER_BLOCK,
};
use xai_core::error::XaiError;
use xai_core::transaction::{Transaction, TxKind};
use xai_core::types::{Hash256, Timestamp};
use xai_consensus::validator::{median_timestamp, validate_coverage, validate_nonce};
use xai_crypto::{hash_meets_difficulty, merkle_root, sha256, txid_from_preimage, KeyPair};

use crate::coordinator::Ledger;
use crate::streak::StreakTracker;

/// How many PoW nonces to try between deadline checks.
const POW_CANCEL_STRIDE: u64 = 4_096;

/// Assemble, mine, and sign a candidate block extending the current tip.
///
/// Selection walks the mempool by (fee-rate desc, arrival asc), enforcing
/// strict in-block nonce sequencing per sender and re-validating every
/// candidate against the hypothetical UTXO state (earlier in-block spends
/// included). The ledger is left exactly as found: staging is rolled back
/// before returning, and nothing is committed here.
pub fn assemble_and_mine(
    ledger: &mut Ledger,
    keypair: &KeyPair,
    now: Timestamp,
    deadline: Option<Instant>,
) -> Result<Block, XaiError> {
    let parent = ledger.chain.tip_header().clone();
    let height = parent.index + 1;
    let difficulty = ledger.effective_difficulty();

    // ── Candidate selection against a staged state ───────────────────────────
    let utxo_snapshot = ledger.utxo.snapshot();
    ledger.nonces.clear_reservations();

    let candidates: Vec<Transaction> = ledger
        .mempool
        .iter_top(MAX_TX_PER_BLOCK)
        .into_iter()
        .cloned()
        .collect();

    let size_budget = MAX_BLOCK_SIZE - COINBASE_RESERVE_BYTES;
    let mut selected: Vec<Transaction> = Vec::new();
    let mut total_size = 0usize;
    let mut fees = Amount::ZERO;

    for tx in candidates {
        if selected.len() + 1 >= MAX_TX_PER_BLOCK {
            debug!(limit = MAX_TX_PER_BLOCK, "transaction limit reached for block assembly");
            break;
        }
        let tx_size = tx.canonical_size()?;
        if total_size + tx_size > size_budget {
            break;
        }

        let expected = ledger.nonces.expected_next(&tx.sender);
        if let Err(e) = validate_nonce(&tx, expected) {
            warn!(txid = %tx.txid, error = %e, "skipping candidate with out-of-sequence nonce");
            continue;
        }
        if let Err(e) = validate_coverage(&tx, &ledger.utxo) {
            warn!(txid = %tx.txid, error = %e, "candidate failed re-validation, excluded from block");
            continue;
        }
        if let TxKind::GovernanceVote { voting_power, .. } = &tx.kind {
            if *voting_power > ledger.utxo.balance(&tx.sender) {
                warn!(txid = %tx.txid, "governance vote overstates its power, excluded");
                continue;
            }
        }
        if ledger.utxo.apply_inputs(&tx, height).is_err() {
            continue;
        }
        ledger.utxo.apply_outputs(&tx);
        let nonce = tx.nonce.expect("validated non-coinbase carries a nonce");
        ledger.nonces.reserve(&tx.sender, nonce);

        fees = fees
            .checked_add(tx.fee)
            .ok_or_else(|| XaiError::MalformedEncoding("fee total overflows".into()))?;
        total_size += tx_size;
        selected.push(tx);
    }

    // Undo the hypothetical application; the commit path re-applies for real.
    ledger.utxo.restore(utxo_snapshot);
    ledger.nonces.clear_reservations();

    // ── Coinbase ─────────────────────────────────────────────────────────────
    // The streak is only projected here; the commit path records it once the
    // block is durable, so cancelled attempts leave no trace.
    let miner_address = keypair.address.clone();
    let streak = ledger.streaks.projected(&miner_address, now);
    let reward = block_reward(height);
    let bonus = StreakTracker::bonus_for_streak(streak, reward, ledger.supply);
    if !bonus.is_zero() {
        info!(%miner_address, streak, %bonus, "streak bonus applied to coinbase");
    }
    let coinbase_amount = reward
        .checked_add(fees)
        .and_then(|a| a.checked_add(bonus))
        .ok_or_else(|| XaiError::MalformedEncoding("coinbase amount overflows".into()))?;

    let timestamp = now.max(median_timestamp(ledger.chain.headers()) + 1);
    let coinbase = build_coinbase(&miner_address, coinbase_amount, height, timestamp)?;

    let mut transactions = Vec::with_capacity(selected.len() + 1);
    transactions.push(coinbase);
    transactions.extend(selected);
    let txids: Vec<Hash256> = transactions.iter().map(|tx| tx.txid).collect();
    let merkle = merkle_root(&txids);

    // ── Proof of work ────────────────────────────────────────────────────────
    let miner_pubkey = keypair.public_key_hex();
    let mut preimage = HeaderPreimage {
        index: height,
        previous_hash: &parent.hash,
        merkle_root: &merkle,
        timestamp,
        difficulty,
        nonce: 0,
        version: BLOCK_HEADER_VERSION,
        miner_pubkey: &miner_pubkey,
    };

    let hash = loop {
        if preimage.nonce % POW_CANCEL_STRIDE == 0 {
            if let Some(limit) = deadline {
                if Instant::now() >= limit {
                    return Err(XaiError::Cancelled);
                }
            }
        }
        let candidate = sha256(&preimage.pow_bytes()?);
        if hash_meets_difficulty(&candidate, difficulty) {
            break candidate;
        }
        preimage.nonce += 1;
    };

    let signature = keypair.sign(hash.as_bytes());
    let header = BlockHeader {
        index: height,
        previous_hash: parent.hash,
        merkle_root: merkle,
        timestamp,
        difficulty,
        nonce: preimage.nonce,
        version: BLOCK_HEADER_VERSION,
        miner_pubkey,
        signature,
        hash,
    };

    info!(height, hash = %header.hash, tx_count = transactions.len(), "block mined");
    Ok(Block {
        header,
        transactions,
    })
}

fn build_coinbase(
    miner: &Address,
    amount: Amount,
    height: u64,
    timestamp: Timestamp,
) -> Result<Transaction, XaiError> {
    let mut metadata = BTreeMap::new();
    // Bind the coinbase to its height so its txid is unique across blocks.
    metadata.insert("height".to_string(), height.to_string());

    let mut coinbase = Transaction {
        txid: Hash256::zero(),
        sender: Address::coinbase(),
        recipient: miner.clone(),
        amount,
        fee: Amount::ZERO,
        public_key: None,
        signature: None,
        kind: TxKind::Coinbase,
        nonce: None,
        inputs: vec![],
        outputs: vec![xai_core::transaction::TxOutput {
            address: miner.clone(),
            amount,
        }],
        rbf_enabled: false,
        replaces_txid: None,
        timestamp,
        metadata,
    };
    coinbase.txid = txid_from_preimage(&coinbase.signing_bytes()?);
    Ok(coinbase)
}
