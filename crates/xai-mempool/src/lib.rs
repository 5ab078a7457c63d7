//! xai-mempool — the unconfirmed-transaction pool: fee-rate-ordered
//! admission, replace-by-fee, eviction under pressure, and per-sender nonce
//! sequencing for block assembly.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use xai_core::address::Address;
use xai_core::amount::Amount;
use xai_core::constants::MIN_RBF_FEE_BUMP_PERCENT;
use xai_core::error::XaiError;
use xai_core::transaction::Transaction;
use xai_core::types::TxId;

/// Fee rate in base units per kilobyte of canonical size.
pub fn fee_rate(fee: Amount, size: usize) -> u64 {
    if size == 0 {
        return 0;
    }
    ((fee.base_units() as u128 * 1_000) / size as u128) as u64
}

#[derive(Clone, Debug)]
pub struct MempoolEntry {
    pub tx: Transaction,
    pub size: usize,
    pub fee_rate: u64,
    arrival: u64,
}

/// Result of a successful admission.
#[derive(Debug, PartialEq, Eq)]
pub enum AdmitOutcome {
    /// Inserted; a lower-fee-rate entry may have been evicted to make room.
    Inserted { evicted: Option<TxId> },
    /// Replaced an RBF-enabled incumbent at the same (sender, nonce).
    Replaced { old: TxId },
    /// The exact txid was already pooled; admission is idempotent.
    AlreadyKnown,
}

/// One row of the external mempool view.
#[derive(Clone, Debug, Serialize)]
pub struct MempoolTxSummary {
    pub txid: TxId,
    pub sender: Address,
    pub nonce: Option<u64>,
    pub fee: Amount,
    pub fee_rate: u64,
    pub size: usize,
}

/// Point-in-time counters for eviction statistics.
#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct MempoolStats {
    pub pooled: usize,
    pub evicted_low_fee_total: u64,
    pub replaced_rbf_total: u64,
}

// ── Mempool ──────────────────────────────────────────────────────────────────

/// Unconfirmed transactions ordered by (fee-rate desc, arrival asc), with
/// secondary indexes by txid and by (sender, nonce). The caller (the
/// coordinator) validates transactions before admission and serializes all
/// access under its write lock.
pub struct Mempool {
    capacity: usize,
    entries: HashMap<TxId, MempoolEntry>,
    by_sender: HashMap<Address, BTreeMap<u64, TxId>>,
    /// (Reverse(fee_rate), arrival, txid): ascending iteration yields the
    /// best-paying, earliest-arrived entries first.
    order: std::collections::BTreeSet<(Reverse<u64>, u64, TxId)>,
    /// (prev_txid, prev_vout) → claiming txid; one spender per outpoint.
    claimed: HashMap<(TxId, u32), TxId>,
    arrival_counter: u64,
    evicted_low_fee_total: u64,
    replaced_rbf_total: u64,
}

impl Mempool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            by_sender: HashMap::new(),
            order: std::collections::BTreeSet::new(),
            claimed: HashMap::new(),
            arrival_counter: 0,
            evicted_low_fee_total: 0,
            replaced_rbf_total: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, txid: &TxId) -> bool {
        self.entries.contains_key(txid)
    }

    pub fn get(&self, txid: &TxId) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    /// The nonce a brand-new transaction from `sender` must carry: the last
    /// confirmed nonce plus one, advanced past every contiguously pooled
    /// nonce.
    pub fn next_nonce_for(&self, sender: &Address, last_confirmed: Option<u64>) -> u64 {
        let mut next = last_confirmed.map_or(0, |n| n + 1);
        if let Some(nonces) = self.by_sender.get(sender) {
            while nonces.contains_key(&next) {
                next += 1;
            }
        }
        next
    }

    /// The pooled transaction already holding (sender, nonce), if any.
    pub fn incumbent_at(&self, sender: &Address, nonce: u64) -> Option<&MempoolEntry> {
        let txid = self.by_sender.get(sender)?.get(&nonce)?;
        self.entries.get(txid)
    }

    /// Admit a validated transaction. Handles idempotent re-admission, RBF
    /// replacement, and eviction under capacity pressure.
    pub fn admit(&mut self, tx: Transaction) -> Result<AdmitOutcome, XaiError> {
        if self.entries.contains_key(&tx.txid) {
            return Ok(AdmitOutcome::AlreadyKnown);
        }

        let size = tx.canonical_size()?;
        let rate = fee_rate(tx.fee, size);

        // ── Outpoint conflicts with already-pooled spenders ──────────────────
        // Only an RBF-eligible incumbent at the same (sender, nonce) may have
        // its inputs re-spent by the newcomer; every other overlap is a
        // double spend.
        let replaceable_incumbent = tx
            .nonce
            .and_then(|n| self.incumbent_at(&tx.sender, n))
            .filter(|e| e.tx.rbf_enabled)
            .map(|e| e.tx.txid);
        for input in &tx.inputs {
            if let Some(holder) = self.claimed.get(&(input.prev_txid, input.prev_vout)) {
                if Some(*holder) != replaceable_incumbent {
                    return Err(XaiError::DoubleSpend {
                        txid: input.prev_txid,
                        vout: input.prev_vout,
                    });
                }
            }
        }

        // ── RBF path: same (sender, nonce) already pooled ────────────────────
        if let Some(nonce) = tx.nonce {
            if let Some(incumbent) = self.incumbent_at(&tx.sender, nonce) {
                let required = rbf_required_rate(incumbent.fee_rate);
                if !incumbent.tx.rbf_enabled || rate < required {
                    return Err(XaiError::NonceConflict { nonce });
                }
                let old = incumbent.tx.txid;
                self.remove(&old);
                self.insert(tx, size, rate);
                self.replaced_rbf_total += 1;
                debug!(%old, "mempool RBF replacement");
                return Ok(AdmitOutcome::Replaced { old });
            }
        }

        // ── Capacity pressure ────────────────────────────────────────────────
        let mut evicted = None;
        if self.entries.len() >= self.capacity {
            let victim = self
                .order
                .iter()
                .next_back()
                .map(|(Reverse(rate), _, txid)| (*rate, *txid))
                .expect("mempool at capacity cannot be empty");
            if victim.0 >= rate {
                return Err(XaiError::FeeTooLow {
                    offered: rate,
                    required: victim.0,
                });
            }
            self.remove(&victim.1);
            self.evicted_low_fee_total += 1;
            evicted = Some(victim.1);
            debug!(victim = %victim.1, "mempool evicted lowest fee-rate entry");
        }

        self.insert(tx, size, rate);
        Ok(AdmitOutcome::Inserted { evicted })
    }

    /// Remove an entry and its index rows.
    pub fn remove(&mut self, txid: &TxId) -> Option<Transaction> {
        let entry = self.entries.remove(txid)?;
        self.order
            .remove(&(Reverse(entry.fee_rate), entry.arrival, *txid));
        if let Some(nonce) = entry.tx.nonce {
            if let Some(nonces) = self.by_sender.get_mut(&entry.tx.sender) {
                nonces.remove(&nonce);
                if nonces.is_empty() {
                    self.by_sender.remove(&entry.tx.sender);
                }
            }
        }
        for input in &entry.tx.inputs {
            self.claimed.remove(&(input.prev_txid, input.prev_vout));
        }
        Some(entry.tx)
    }

    /// Drop every pooled transaction whose txid is in `mined`.
    pub fn remove_confirmed<'a, I: IntoIterator<Item = &'a TxId>>(&mut self, mined: I) {
        for txid in mined {
            self.remove(txid);
        }
    }

    /// The next `k` candidates by (fee-rate desc, arrival asc), yielding a
    /// transaction only once every lower pooled nonce of its sender has been
    /// yielded before it.
    pub fn iter_top(&self, k: usize) -> Vec<&Transaction> {
        let ordered: Vec<&MempoolEntry> = self
            .order
            .iter()
            .filter_map(|(_, _, txid)| self.entries.get(txid))
            .collect();

        let mut picked: Vec<&Transaction> = Vec::with_capacity(k.min(ordered.len()));
        let mut picked_ids: HashSet<TxId> = HashSet::new();

        // Repeated fee-ordered sweeps: each pass picks entries whose sender
        // prerequisites are satisfied, until k is reached or nothing moves.
        loop {
            let mut progressed = false;
            for entry in &ordered {
                if picked.len() >= k {
                    return picked;
                }
                if picked_ids.contains(&entry.tx.txid) {
                    continue;
                }
                if self.sender_prerequisites_met(entry, &picked_ids) {
                    picked_ids.insert(entry.tx.txid);
                    picked.push(&entry.tx);
                    progressed = true;
                }
            }
            if !progressed || picked.len() >= k {
                return picked;
            }
        }
    }

    fn sender_prerequisites_met(&self, entry: &MempoolEntry, picked: &HashSet<TxId>) -> bool {
        let Some(nonce) = entry.tx.nonce else {
            return true;
        };
        let Some(nonces) = self.by_sender.get(&entry.tx.sender) else {
            return true;
        };
        nonces
            .range(..nonce)
            .all(|(_, txid)| picked.contains(txid))
    }

    /// Keep only entries satisfying `keep`; used to revalidate the pool after
    /// a reorganization. Returns the txids that were dropped.
    pub fn retain<F: FnMut(&Transaction) -> bool>(&mut self, mut keep: F) -> Vec<TxId> {
        let doomed: Vec<TxId> = self
            .entries
            .values()
            .filter(|e| !keep(&e.tx))
            .map(|e| e.tx.txid)
            .collect();
        for txid in &doomed {
            self.remove(txid);
        }
        doomed
    }

    /// Sorted summaries for the external view.
    pub fn view(&self) -> Vec<MempoolTxSummary> {
        self.order
            .iter()
            .filter_map(|(_, _, txid)| self.entries.get(txid))
            .map(|e| MempoolTxSummary {
                txid: e.tx.txid,
                sender: e.tx.sender.clone(),
                nonce: e.tx.nonce,
                fee: e.tx.fee,
                fee_rate: e.fee_rate,
                size: e.size,
            })
            .collect()
    }

    pub fn stats(&self) -> MempoolStats {
        MempoolStats {
            pooled: self.entries.len(),
            evicted_low_fee_total: self.evicted_low_fee_total,
            replaced_rbf_total: self.replaced_rbf_total,
        }
    }

    /// All pooled transactions, unordered (snapshot persistence).
    pub fn all(&self) -> Vec<Transaction> {
        self.entries.values().map(|e| e.tx.clone()).collect()
    }

    fn insert(&mut self, tx: Transaction, size: usize, rate: u64) {
        let arrival = self.arrival_counter;
        self.arrival_counter += 1;
        if let Some(nonce) = tx.nonce {
            self.by_sender
                .entry(tx.sender.clone())
                .or_default()
                .insert(nonce, tx.txid);
        }
        for input in &tx.inputs {
            self.claimed.insert((input.prev_txid, input.prev_vout), tx.txid);
        }
        self.order.insert((Reverse(rate), arrival, tx.txid));
        self.entries.insert(
            tx.txid,
            MempoolEntry {
                tx,
                size,
                fee_rate: rate,
                arrival,
            },
        );
    }
}

/// Minimum fee rate a replacement must reach: the incumbent's rate plus the
/// RBF bump percentage.
fn rbf_required_rate(incumbent_rate: u64) -> u64 {
    incumbent_rate + (incumbent_rate * MIN_RBF_FEE_BUMP_PERCENT).div_ceil(100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as StdBTreeMap;
    use xai_core::transaction::TxKind;
    use xai_core::types::Hash256;

    fn addr(seed: u8) -> Address {
        Address::parse(&format!("XAI{}", hex::encode([seed; 20]))).unwrap()
    }

    fn tx(seed: u8, sender: Address, nonce: u64, fee: &str, rbf: bool) -> Transaction {
        Transaction {
            txid: Hash256::from_bytes([seed; 32]),
            sender,
            recipient: addr(200),
            amount: Amount::from_xai(1),
            fee: Amount::parse(fee).unwrap(),
            public_key: None,
            signature: None,
            kind: TxKind::Normal,
            nonce: Some(nonce),
            inputs: vec![],
            outputs: vec![],
            rbf_enabled: rbf,
            replaces_txid: None,
            timestamp: 0,
            metadata: StdBTreeMap::new(),
        }
    }

    #[test]
    fn admission_is_idempotent() {
        let mut pool = Mempool::new(10);
        let t = tx(1, addr(1), 0, "0.1", false);
        assert!(matches!(
            pool.admit(t.clone()).unwrap(),
            AdmitOutcome::Inserted { evicted: None }
        ));
        assert_eq!(pool.admit(t).unwrap(), AdmitOutcome::AlreadyKnown);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn ordering_is_fee_rate_desc_then_arrival() {
        let mut pool = Mempool::new(10);
        pool.admit(tx(1, addr(1), 0, "0.1", false)).unwrap();
        pool.admit(tx(2, addr(2), 0, "0.5", false)).unwrap();
        pool.admit(tx(3, addr(3), 0, "0.5", false)).unwrap();

        let view = pool.view();
        assert_eq!(view[0].txid, Hash256::from_bytes([2; 32]));
        assert_eq!(view[1].txid, Hash256::from_bytes([3; 32]));
        assert_eq!(view[2].txid, Hash256::from_bytes([1; 32]));
    }

    #[test]
    fn rbf_replaces_with_sufficient_bump() {
        let mut pool = Mempool::new(10);
        let t1 = tx(1, addr(1), 0, "0.1", true);
        pool.admit(t1.clone()).unwrap();

        let t2 = tx(2, addr(1), 0, "0.25", true);
        let outcome = pool.admit(t2).unwrap();
        assert_eq!(outcome, AdmitOutcome::Replaced { old: t1.txid });
        assert!(!pool.contains(&t1.txid));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn rbf_insufficient_bump_is_nonce_conflict() {
        let mut pool = Mempool::new(10);
        pool.admit(tx(1, addr(1), 0, "0.25", true)).unwrap();
        // 4% above the incumbent: below the 10% bump requirement.
        let t3 = tx(3, addr(1), 0, "0.26", false);
        assert!(matches!(
            pool.admit(t3).unwrap_err(),
            XaiError::NonceConflict { nonce: 0 }
        ));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn non_rbf_incumbent_blocks_replacement() {
        let mut pool = Mempool::new(10);
        pool.admit(tx(1, addr(1), 0, "0.1", false)).unwrap();
        let rich = tx(2, addr(1), 0, "5", true);
        assert!(matches!(
            pool.admit(rich).unwrap_err(),
            XaiError::NonceConflict { nonce: 0 }
        ));
    }

    #[test]
    fn eviction_drops_lowest_fee_rate() {
        let mut pool = Mempool::new(2);
        pool.admit(tx(1, addr(1), 0, "0.1", false)).unwrap();
        pool.admit(tx(2, addr(2), 0, "0.5", false)).unwrap();

        let outcome = pool.admit(tx(3, addr(3), 0, "0.3", false)).unwrap();
        assert_eq!(
            outcome,
            AdmitOutcome::Inserted {
                evicted: Some(Hash256::from_bytes([1; 32]))
            }
        );
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.stats().evicted_low_fee_total, 1);
    }

    #[test]
    fn full_pool_rejects_non_displacing_fee() {
        let mut pool = Mempool::new(2);
        pool.admit(tx(1, addr(1), 0, "0.3", false)).unwrap();
        pool.admit(tx(2, addr(2), 0, "0.5", false)).unwrap();

        assert!(matches!(
            pool.admit(tx(3, addr(3), 0, "0.3", false)).unwrap_err(),
            XaiError::FeeTooLow { .. }
        ));
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn next_nonce_walks_contiguous_pool() {
        let mut pool = Mempool::new(10);
        let sender = addr(1);
        pool.admit(tx(1, sender.clone(), 0, "0.1", false)).unwrap();
        pool.admit(tx(2, sender.clone(), 1, "0.1", false)).unwrap();
        assert_eq!(pool.next_nonce_for(&sender, None), 2);
        assert_eq!(pool.next_nonce_for(&addr(9), None), 0);
        assert_eq!(pool.next_nonce_for(&sender, Some(1)), 2);
    }

    #[test]
    fn iter_top_respects_sender_nonce_order() {
        let mut pool = Mempool::new(10);
        let sender = addr(1);
        // Higher nonce pays a better fee, but must not jump the queue.
        pool.admit(tx(1, sender.clone(), 0, "0.1", false)).unwrap();
        pool.admit(tx(2, sender.clone(), 1, "0.9", false)).unwrap();
        pool.admit(tx(3, addr(2), 0, "0.5", false)).unwrap();

        let top = pool.iter_top(3);
        let ids: Vec<TxId> = top.iter().map(|t| t.txid).collect();
        let pos = |seed: u8| {
            ids.iter()
                .position(|id| *id == Hash256::from_bytes([seed; 32]))
                .unwrap()
        };
        assert!(pos(1) < pos(2), "nonce 0 must precede nonce 1");
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn conflicting_spender_is_double_spend() {
        use xai_core::transaction::TxInput;
        let mut pool = Mempool::new(10);
        let shared = TxInput {
            prev_txid: Hash256::from_bytes([77; 32]),
            prev_vout: 0,
        };
        let mut a = tx(1, addr(1), 0, "0.1", false);
        a.inputs = vec![shared];
        pool.admit(a).unwrap();

        let mut b = tx(2, addr(2), 0, "0.9", false);
        b.inputs = vec![shared];
        assert!(matches!(
            pool.admit(b).unwrap_err(),
            XaiError::DoubleSpend { vout: 0, .. }
        ));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn rbf_replacement_may_respend_incumbent_inputs() {
        use xai_core::transaction::TxInput;
        let mut pool = Mempool::new(10);
        let shared = TxInput {
            prev_txid: Hash256::from_bytes([77; 32]),
            prev_vout: 0,
        };
        let mut t1 = tx(1, addr(1), 0, "0.1", true);
        t1.inputs = vec![shared];
        pool.admit(t1.clone()).unwrap();

        let mut t2 = tx(2, addr(1), 0, "0.25", true);
        t2.inputs = vec![shared];
        assert_eq!(pool.admit(t2).unwrap(), AdmitOutcome::Replaced { old: t1.txid });
    }

    #[test]
    fn retain_reports_dropped() {
        let mut pool = Mempool::new(10);
        pool.admit(tx(1, addr(1), 0, "0.1", false)).unwrap();
        pool.admit(tx(2, addr(2), 0, "0.5", false)).unwrap();

        let dropped = pool.retain(|t| t.sender == addr(2));
        assert_eq!(dropped, vec![Hash256::from_bytes([1; 32])]);
        assert_eq!(pool.len(), 1);
    }
}
