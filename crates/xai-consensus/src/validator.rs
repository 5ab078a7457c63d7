use xai_core::amount::Amount;
use xai_core::block::{Block, BlockHeader};
use xai_core::constants::{
    block_reward, MAX_BLOCK_SIZE, MAX_FEE, MAX_METADATA_ENTRIES, MAX_METADATA_KEY_BYTES,
    MAX_METADATA_VALUE_BYTES, MAX_SUPPLY, MAX_STREAK_BONUS_PERCENT, MAX_TX_PER_BLOCK, MAX_TX_SIZE,
    MEDIAN_TIME_WINDOW,
};
use xai_core::error::XaiError;
use xai_core::transaction::{Transaction, TxKind};
use xai_core::types::{Difficulty, Timestamp};
use xai_crypto::{hash_meets_difficulty, merkle_root, sha256, verify};
use xai_state::utxo::{OutPoint, UtxoSet};

/// State handed to stateful transaction checks. `expected_nonce` already
/// accounts for contiguous pending nonces of the same sender (mempool or
/// in-block reservations).
pub struct TxContext<'a> {
    pub utxo: &'a UtxoSet,
    pub expected_nonce: u64,
}

// ── Transaction validation ───────────────────────────────────────────────────

/// Full validation pipeline for a non-coinbase transaction, cheapest checks
/// first: structure, signature, nonce, coverage, policy. Returns the first
/// typed error encountered.
pub fn validate_transaction(tx: &Transaction, ctx: &TxContext<'_>) -> Result<(), XaiError> {
    validate_structure(tx)?;
    validate_signature(tx)?;
    validate_nonce(tx, ctx.expected_nonce)?;
    validate_coverage(tx, ctx.utxo)?;
    validate_policy(tx)
}

/// Check 1 — structural: field presence, txid binding, size and metadata
/// bounds. Address format and fixed-point precision are enforced by the
/// `Address` and `Amount` types at decode time.
pub fn validate_structure(tx: &Transaction) -> Result<(), XaiError> {
    if tx.is_coinbase() {
        return Err(XaiError::MalformedEncoding(
            "coinbase transactions are only valid inside a block".into(),
        ));
    }
    if tx.sender.is_special() {
        return Err(XaiError::InvalidAddress(format!(
            "reserved address {} cannot originate transactions",
            tx.sender
        )));
    }
    if tx.nonce.is_none() {
        return Err(XaiError::MalformedEncoding("missing nonce".into()));
    }
    if tx.public_key.is_none() || tx.signature.is_none() {
        return Err(XaiError::MalformedEncoding(
            "missing public key or signature".into(),
        ));
    }
    if matches!(tx.kind, TxKind::Normal) && tx.inputs.is_empty() {
        return Err(XaiError::MalformedEncoding("transfer with no inputs".into()));
    }

    let computed = xai_crypto::txid_from_preimage(&tx.signing_bytes()?);
    if computed != tx.txid {
        return Err(XaiError::MalformedEncoding("txid does not match content".into()));
    }

    let size = tx.canonical_size()?;
    if size > MAX_TX_SIZE {
        return Err(XaiError::MalformedEncoding(format!(
            "transaction size {size} exceeds {MAX_TX_SIZE} bytes"
        )));
    }

    if tx.metadata.len() > MAX_METADATA_ENTRIES {
        return Err(XaiError::MalformedEncoding(format!(
            "metadata holds {} entries, maximum {MAX_METADATA_ENTRIES}",
            tx.metadata.len()
        )));
    }
    for (key, value) in &tx.metadata {
        if key.len() > MAX_METADATA_KEY_BYTES || value.len() > MAX_METADATA_VALUE_BYTES {
            return Err(XaiError::MalformedEncoding(format!(
                "metadata entry {key:?} exceeds size caps"
            )));
        }
    }

    Ok(())
}

/// Check 2 — the signature must verify over the canonical preimage, and the
/// public key must control the claimed sender address.
pub fn validate_signature(tx: &Transaction) -> Result<(), XaiError> {
    let (public_key, signature) = match (&tx.public_key, &tx.signature) {
        (Some(pk), Some(sig)) => (pk, sig),
        _ => return Err(XaiError::MalformedEncoding("missing public key or signature".into())),
    };
    let preimage = tx.signing_bytes()?;
    if !verify(public_key, &preimage, signature) {
        return Err(XaiError::InvalidSignature);
    }
    if !xai_crypto::pubkey_controls_address(public_key, &tx.sender) {
        return Err(XaiError::InvalidAddress(format!(
            "public key does not control sender address {}",
            tx.sender
        )));
    }
    Ok(())
}

/// Check 3 — exact nonce sequencing.
pub fn validate_nonce(tx: &Transaction, expected: u64) -> Result<(), XaiError> {
    let got = tx
        .nonce
        .ok_or_else(|| XaiError::MalformedEncoding("missing nonce".into()))?;
    if got != expected {
        return Err(XaiError::NonceGap { expected, got });
    }
    Ok(())
}

/// Check 4 — coverage: inputs exist and are owned by the sender, outputs go
/// only to the sender (change) or recipient (payment), payment equals
/// `amount`, and the equation Σ inputs = amount + fee + Σ change holds
/// exactly.
pub fn validate_coverage(tx: &Transaction, utxo: &UtxoSet) -> Result<(), XaiError> {
    let mut input_total = Amount::ZERO;
    for input in &tx.inputs {
        let outpoint = OutPoint::new(input.prev_txid, input.prev_vout);
        let output = utxo.get(&outpoint).ok_or(XaiError::DoubleSpend {
            txid: input.prev_txid,
            vout: input.prev_vout,
        })?;
        if output.address != tx.sender {
            return Err(XaiError::InvalidAddress(format!(
                "input {}:{} is not owned by the sender",
                input.prev_txid, input.prev_vout
            )));
        }
        input_total = input_total
            .checked_add(output.amount)
            .ok_or_else(|| XaiError::MalformedEncoding("input total overflows".into()))?;
    }

    let mut payment_total = Amount::ZERO;
    let mut change_total = Amount::ZERO;
    for output in &tx.outputs {
        if output.address == tx.recipient {
            payment_total = payment_total
                .checked_add(output.amount)
                .ok_or_else(|| XaiError::MalformedEncoding("output total overflows".into()))?;
        } else if output.address == tx.sender {
            change_total = change_total
                .checked_add(output.amount)
                .ok_or_else(|| XaiError::MalformedEncoding("output total overflows".into()))?;
        } else {
            return Err(XaiError::MalformedEncoding(format!(
                "output to {} is neither payment nor change",
                output.address
            )));
        }
    }
    if payment_total != tx.amount {
        return Err(XaiError::MalformedEncoding(format!(
            "payment outputs total {payment_total}, declared amount {}",
            tx.amount
        )));
    }

    let need = tx
        .amount
        .checked_add(tx.fee)
        .and_then(|n| n.checked_add(change_total))
        .ok_or_else(|| XaiError::MalformedEncoding("amount + fee overflows".into()))?;
    if input_total < need {
        return Err(XaiError::InsufficientFunds {
            need,
            have: input_total,
        });
    }
    if input_total > need {
        return Err(XaiError::MalformedEncoding(format!(
            "inputs total {input_total} exceeds amount + fee + change {need}"
        )));
    }
    Ok(())
}

/// Check 5 — policy: dust, fee ceiling.
pub fn validate_policy(tx: &Transaction) -> Result<(), XaiError> {
    if matches!(tx.kind, TxKind::Normal) && tx.amount.is_zero() {
        return Err(XaiError::MalformedEncoding("dust transfer of zero".into()));
    }
    if tx.fee > MAX_FEE {
        return Err(XaiError::FeeExceedsMaximum {
            fee: tx.fee,
            max: MAX_FEE,
        });
    }
    Ok(())
}

// ── Block validation ─────────────────────────────────────────────────────────

/// Stateless block-level rules: linkage, size and count caps, exactly one
/// leading coinbase with an exact-banded amount, merkle root, header PoW and
/// signature, and the median-time rule. Stateful per-transaction checks
/// (nonce, coverage) run during application by the chain engine.
///
/// `recent_headers` are the trailing headers of the parent branch, parent
/// last. `supply_before` is the circulating supply below this block.
pub fn validate_block(
    block: &Block,
    parent: &BlockHeader,
    recent_headers: &[BlockHeader],
    expected_difficulty: Difficulty,
    supply_before: Amount,
) -> Result<(), XaiError> {
    let header = &block.header;

    if header.index != parent.index + 1 {
        return Err(XaiError::InvalidBlock(format!(
            "height {} does not follow parent height {}",
            header.index, parent.index
        )));
    }
    if header.previous_hash != parent.hash {
        return Err(XaiError::InvalidBlock("previous_hash does not match parent".into()));
    }

    let size = block.canonical_size()?;
    if size > MAX_BLOCK_SIZE {
        return Err(XaiError::BlockSizeExceeded {
            size,
            max: MAX_BLOCK_SIZE,
        });
    }
    if block.transactions.len() > MAX_TX_PER_BLOCK {
        return Err(XaiError::TxCountExceeded {
            count: block.transactions.len(),
            max: MAX_TX_PER_BLOCK,
        });
    }

    // ── Coinbase placement ───────────────────────────────────────────────────
    let coinbase = block
        .coinbase()
        .ok_or_else(|| XaiError::InvalidCoinbase("first transaction must be coinbase".into()))?;
    if block.transactions.iter().skip(1).any(|tx| tx.is_coinbase()) {
        return Err(XaiError::InvalidCoinbase("more than one coinbase".into()));
    }

    // ── Header binding ───────────────────────────────────────────────────────
    if header.difficulty != expected_difficulty {
        return Err(XaiError::InvalidBlock(format!(
            "difficulty {} does not match expected {expected_difficulty}",
            header.difficulty
        )));
    }
    let computed_hash = sha256(&header.pow_bytes()?);
    if computed_hash != header.hash {
        return Err(XaiError::InvalidBlock("header hash does not match content".into()));
    }
    if !hash_meets_difficulty(&header.hash, header.difficulty) {
        return Err(XaiError::InvalidProofOfWork);
    }
    if !verify(&header.miner_pubkey, header.hash.as_bytes(), &header.signature) {
        return Err(XaiError::InvalidSignature);
    }

    let txids: Vec<_> = block.transactions.iter().map(|tx| tx.txid).collect();
    if merkle_root(&txids) != header.merkle_root {
        return Err(XaiError::MerkleMismatch);
    }

    // ── Timestamp ────────────────────────────────────────────────────────────
    let median = median_timestamp(recent_headers);
    if header.timestamp <= median {
        return Err(XaiError::TimestampOutOfRange);
    }

    // ── Coinbase amount ──────────────────────────────────────────────────────
    let fees = Amount::checked_sum(block.transactions.iter().skip(1).map(|tx| tx.fee))
        .ok_or_else(|| XaiError::MalformedEncoding("fee total overflows".into()))?;
    let reward = block_reward(header.index);
    let floor = reward
        .checked_add(fees)
        .ok_or_else(|| XaiError::MalformedEncoding("reward total overflows".into()))?;
    let ceiling = floor
        .checked_add(reward.percent(MAX_STREAK_BONUS_PERCENT))
        .ok_or_else(|| XaiError::MalformedEncoding("reward total overflows".into()))?;
    if coinbase.amount < floor || coinbase.amount > ceiling {
        return Err(XaiError::InvalidCoinbase(format!(
            "coinbase amount {} outside [{floor}, {ceiling}]",
            coinbase.amount
        )));
    }
    let outputs_total = Amount::checked_sum(coinbase.outputs.iter().map(|o| o.amount))
        .ok_or_else(|| XaiError::MalformedEncoding("coinbase output total overflows".into()))?;
    if outputs_total != coinbase.amount {
        return Err(XaiError::InvalidCoinbase(
            "coinbase outputs do not equal coinbase amount".into(),
        ));
    }
    if !coinbase.inputs.is_empty() {
        return Err(XaiError::InvalidCoinbase("coinbase must have no inputs".into()));
    }

    // Issuance audit: new coins (amount minus recycled fees) must fit the cap.
    let issuance = coinbase
        .amount
        .checked_sub(fees)
        .unwrap_or(Amount::ZERO);
    let after = supply_before.checked_add(issuance);
    match after {
        Some(total) if total <= MAX_SUPPLY => {}
        _ => {
            let excess = after
                .and_then(|t| t.checked_sub(MAX_SUPPLY))
                .unwrap_or(issuance);
            return Err(XaiError::SupplyCapExceeded { excess });
        }
    }

    // ── Per-transaction stateless checks ─────────────────────────────────────
    for tx in block.transactions.iter().skip(1) {
        validate_structure(tx)?;
        validate_signature(tx)?;
        validate_policy(tx)?;
    }

    Ok(())
}

/// Median of the trailing `MEDIAN_TIME_WINDOW` header timestamps (upper
/// median for even counts). Zero when no history exists.
pub fn median_timestamp(recent_headers: &[BlockHeader]) -> Timestamp {
    if recent_headers.is_empty() {
        return 0;
    }
    let start = recent_headers.len().saturating_sub(MEDIAN_TIME_WINDOW);
    let mut stamps: Vec<Timestamp> = recent_headers[start..].iter().map(|h| h.timestamp).collect();
    stamps.sort_unstable();
    stamps[stamps.len() / 2]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use xai_core::address::Address;
    use xai_core::config::NetworkType;
    use xai_core::transaction::{TxInput, TxOutput};
    use xai_core::types::Hash256;
    use xai_crypto::KeyPair;

    fn seed_utxo(owner: &Address, amount: Amount) -> (UtxoSet, TxInput) {
        let mut utxo = UtxoSet::new();
        let funding = Transaction {
            txid: Hash256::from_bytes([1; 32]),
            sender: Address::coinbase(),
            recipient: owner.clone(),
            amount,
            fee: Amount::ZERO,
            public_key: None,
            signature: None,
            kind: TxKind::Coinbase,
            nonce: None,
            inputs: vec![],
            outputs: vec![TxOutput {
                address: owner.clone(),
                amount,
            }],
            rbf_enabled: false,
            replaces_txid: None,
            timestamp: 0,
            metadata: BTreeMap::new(),
        };
        utxo.apply_outputs(&funding);
        let input = TxInput {
            prev_txid: funding.txid,
            prev_vout: 0,
        };
        (utxo, input)
    }

    fn signed_transfer(kp: &KeyPair, recipient: &Address, input: TxInput) -> Transaction {
        let mut tx = Transaction {
            txid: Hash256::zero(),
            sender: kp.address.clone(),
            recipient: recipient.clone(),
            amount: Amount::from_xai(5),
            fee: Amount::parse("0.1").unwrap(),
            public_key: Some(kp.public_key_hex()),
            signature: None,
            kind: TxKind::Normal,
            nonce: Some(0),
            inputs: vec![input],
            outputs: vec![
                TxOutput {
                    address: recipient.clone(),
                    amount: Amount::from_xai(5),
                },
                TxOutput {
                    address: kp.address.clone(),
                    amount: Amount::parse("44.9").unwrap(),
                },
            ],
            rbf_enabled: false,
            replaces_txid: None,
            timestamp: 1_700_000_000,
            metadata: BTreeMap::new(),
        };
        let preimage = tx.signing_bytes().unwrap();
        tx.txid = xai_crypto::txid_from_preimage(&preimage);
        tx.signature = Some(kp.sign(&preimage));
        tx
    }

    fn other_addr() -> Address {
        Address::parse(&format!("XAI{}", hex::encode([9u8; 20]))).unwrap()
    }

    #[test]
    fn valid_transfer_passes() {
        let kp = KeyPair::generate(NetworkType::Mainnet);
        let (utxo, input) = seed_utxo(&kp.address, Amount::from_xai(50));
        let tx = signed_transfer(&kp, &other_addr(), input);
        let ctx = TxContext {
            utxo: &utxo,
            expected_nonce: 0,
        };
        validate_transaction(&tx, &ctx).unwrap();
    }

    #[test]
    fn tampered_amount_fails_signature() {
        let kp = KeyPair::generate(NetworkType::Mainnet);
        let (utxo, input) = seed_utxo(&kp.address, Amount::from_xai(50));
        let mut tx = signed_transfer(&kp, &other_addr(), input);
        tx.amount = Amount::from_xai(6);
        let ctx = TxContext {
            utxo: &utxo,
            expected_nonce: 0,
        };
        // The txid no longer matches the mutated content.
        assert!(matches!(
            validate_transaction(&tx, &ctx),
            Err(XaiError::MalformedEncoding(_))
        ));
    }

    #[test]
    fn wrong_signer_fails() {
        let kp = KeyPair::generate(NetworkType::Mainnet);
        let imposter = KeyPair::generate(NetworkType::Mainnet);
        let (utxo, input) = seed_utxo(&kp.address, Amount::from_xai(50));
        let mut tx = signed_transfer(&kp, &other_addr(), input);
        // Re-sign with the imposter's key over the same content.
        tx.public_key = Some(imposter.public_key_hex());
        let preimage = tx.signing_bytes().unwrap();
        tx.txid = xai_crypto::txid_from_preimage(&preimage);
        tx.signature = Some(imposter.sign(&preimage));
        let ctx = TxContext {
            utxo: &utxo,
            expected_nonce: 0,
        };
        assert!(matches!(
            validate_transaction(&tx, &ctx),
            Err(XaiError::InvalidAddress(_))
        ));
    }

    #[test]
    fn nonce_gap_detected() {
        let kp = KeyPair::generate(NetworkType::Mainnet);
        let (utxo, input) = seed_utxo(&kp.address, Amount::from_xai(50));
        let tx = signed_transfer(&kp, &other_addr(), input);
        let ctx = TxContext {
            utxo: &utxo,
            expected_nonce: 3,
        };
        assert!(matches!(
            validate_transaction(&tx, &ctx),
            Err(XaiError::NonceGap { expected: 3, got: 0 })
        ));
    }

    #[test]
    fn missing_input_is_double_spend() {
        let kp = KeyPair::generate(NetworkType::Mainnet);
        let (_, input) = seed_utxo(&kp.address, Amount::from_xai(50));
        let empty = UtxoSet::new();
        let tx = signed_transfer(&kp, &other_addr(), input);
        let ctx = TxContext {
            utxo: &empty,
            expected_nonce: 0,
        };
        assert!(matches!(
            validate_transaction(&tx, &ctx),
            Err(XaiError::DoubleSpend { .. })
        ));
    }

    #[test]
    fn unbalanced_outputs_rejected() {
        let kp = KeyPair::generate(NetworkType::Mainnet);
        let (utxo, input) = seed_utxo(&kp.address, Amount::from_xai(50));
        let mut tx = signed_transfer(&kp, &other_addr(), input);
        // Short-change: drop the change output and re-sign; residue would be
        // an undeclared fee.
        tx.outputs.pop();
        let preimage = tx.signing_bytes().unwrap();
        tx.txid = xai_crypto::txid_from_preimage(&preimage);
        tx.signature = Some(kp.sign(&preimage));
        let ctx = TxContext {
            utxo: &utxo,
            expected_nonce: 0,
        };
        assert!(matches!(
            validate_transaction(&tx, &ctx),
            Err(XaiError::MalformedEncoding(_))
        ));
    }

    #[test]
    fn fee_above_ceiling_rejected() {
        let kp = KeyPair::generate(NetworkType::Mainnet);
        let (utxo, input) = seed_utxo(&kp.address, Amount::from_xai(2000));
        let mut tx = signed_transfer(&kp, &other_addr(), input);
        tx.fee = Amount::from_xai(1001);
        tx.outputs[1].amount = Amount::parse("994").unwrap();
        let preimage = tx.signing_bytes().unwrap();
        tx.txid = xai_crypto::txid_from_preimage(&preimage);
        tx.signature = Some(kp.sign(&preimage));
        let ctx = TxContext {
            utxo: &utxo,
            expected_nonce: 0,
        };
        assert!(matches!(
            validate_transaction(&tx, &ctx),
            Err(XaiError::FeeExceedsMaximum { .. })
        ));
    }

    #[test]
    fn median_timestamp_upper_median() {
        let headers: Vec<BlockHeader> = [10, 30, 20]
            .iter()
            .enumerate()
            .map(|(i, ts)| BlockHeader {
                index: i as u64,
                previous_hash: Hash256::zero(),
                merkle_root: Hash256::zero(),
                timestamp: *ts,
                difficulty: 1,
                nonce: 0,
                version: 1,
                miner_pubkey: String::new(),
                signature: String::new(),
                hash: Hash256::zero(),
            })
            .collect();
        assert_eq!(median_timestamp(&headers), 20);
        assert_eq!(median_timestamp(&headers[..2]), 30);
        assert_eq!(median_timestamp(&[]), 0);
    }
}
