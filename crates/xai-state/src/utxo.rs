use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use xai_core::address::Address;
use xai_core::amount::Amount;
use xai_core::error::XaiError;
use xai_core::transaction::{Transaction, TxOutput};
use xai_core::types::{Height, TxId};

// ── OutPoint ─────────────────────────────────────────────────────────────────

/// Primary key of the UTXO set: the producing transaction and output index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: TxId,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: TxId, vout: u32) -> Self {
        Self { txid, vout }
    }
}

// ── Undo log ─────────────────────────────────────────────────────────────────

/// One reversible mutation. The log enables generation-indexed snapshots:
/// `snapshot()` is the current log position, `restore()` replays backwards.
enum UndoOp {
    /// A fresh output was inserted.
    Insert(OutPoint),
    /// A live output was spent (moved to the spent archive).
    Spend(OutPoint, TxOutput, Height),
    /// A spent output was resurrected during rewind.
    Unspend(OutPoint, Height),
    /// A live output was deleted during rewind (its creating tx unwound).
    Delete(OutPoint, TxOutput),
}

/// Opaque snapshot token; valid until the next `clear_undo_log`.
#[derive(Clone, Copy, Debug)]
pub struct UtxoSnapshot(usize);

/// Structural report produced by `verify_consistency`.
#[derive(Debug)]
pub struct UtxoConsistencyReport {
    pub is_consistent: bool,
    pub utxo_count: usize,
    pub total_value: Amount,
    pub issues: Vec<String>,
}

// ── UtxoSet ──────────────────────────────────────────────────────────────────

/// The set of unspent transaction outputs, with a per-address secondary
/// index for balance queries and a spent-output archive that makes block
/// rewinds self-contained.
#[derive(Default)]
pub struct UtxoSet {
    entries: HashMap<OutPoint, TxOutput>,
    by_address: HashMap<Address, BTreeSet<OutPoint>>,
    spent: HashMap<OutPoint, (TxOutput, Height)>,
    undo_log: Vec<UndoOp>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.entries.contains_key(outpoint)
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&TxOutput> {
        self.entries.get(outpoint)
    }

    /// Σ amounts of live outputs owned by `address`. O(k) in the owner's
    /// output count via the secondary index.
    pub fn balance(&self, address: &Address) -> Amount {
        let Some(points) = self.by_address.get(address) else {
            return Amount::ZERO;
        };
        points
            .iter()
            .filter_map(|p| self.entries.get(p))
            .map(|o| o.amount)
            .sum()
    }

    /// Σ amounts of every live output (the circulating supply check).
    pub fn total_value(&self) -> Amount {
        self.entries.values().map(|o| o.amount).sum()
    }

    // ── Forward application ──────────────────────────────────────────────────

    /// Insert each output of `tx` keyed by (txid, vout).
    pub fn apply_outputs(&mut self, tx: &Transaction) {
        for (vout, output) in tx.outputs.iter().enumerate() {
            let outpoint = OutPoint::new(tx.txid, vout as u32);
            self.index_insert(outpoint, output.clone());
            self.undo_log.push(UndoOp::Insert(outpoint));
        }
    }

    /// Spend each input of `tx`, failing with `DoubleSpend` if any referenced
    /// output is not live. On failure no inputs have been consumed.
    pub fn apply_inputs(&mut self, tx: &Transaction, height: Height) -> Result<(), XaiError> {
        let mark = self.undo_log.len();
        for input in &tx.inputs {
            let outpoint = OutPoint::new(input.prev_txid, input.prev_vout);
            if !self.entries.contains_key(&outpoint) {
                // Roll back the inputs consumed so far in this call.
                self.restore_ops_since(mark);
                return Err(XaiError::DoubleSpend {
                    txid: input.prev_txid,
                    vout: input.prev_vout,
                });
            }
            let output = self.index_remove(&outpoint).expect("presence checked above");
            self.spent.insert(outpoint, (output.clone(), height));
            self.undo_log.push(UndoOp::Spend(outpoint, output, height));
        }
        Ok(())
    }

    // ── Rewind (reorg) ───────────────────────────────────────────────────────

    /// Reverse-apply a confirmed transaction: delete the outputs it created
    /// and resurrect the outputs it spent.
    pub fn reverse_apply(&mut self, tx: &Transaction) -> Result<(), XaiError> {
        for (vout, _) in tx.outputs.iter().enumerate() {
            let outpoint = OutPoint::new(tx.txid, vout as u32);
            let output = self.index_remove(&outpoint).ok_or_else(|| {
                XaiError::InvalidBlock(format!(
                    "rewind: created output {}:{vout} is not live",
                    tx.txid
                ))
            })?;
            self.undo_log.push(UndoOp::Delete(outpoint, output));
        }
        for input in &tx.inputs {
            let outpoint = OutPoint::new(input.prev_txid, input.prev_vout);
            let (output, height) = self.spent.remove(&outpoint).ok_or_else(|| {
                XaiError::InvalidBlock(format!(
                    "rewind: spent output {}:{} missing from archive",
                    input.prev_txid, input.prev_vout
                ))
            })?;
            self.index_insert(outpoint, output);
            self.undo_log.push(UndoOp::Unspend(outpoint, height));
        }
        Ok(())
    }

    // ── Snapshots ────────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> UtxoSnapshot {
        UtxoSnapshot(self.undo_log.len())
    }

    /// Revert every mutation made after `snapshot` was taken.
    pub fn restore(&mut self, snapshot: UtxoSnapshot) {
        self.restore_ops_since(snapshot.0);
    }

    /// Drop accumulated undo history. Call after a commit, once no snapshot
    /// taken earlier can still be restored.
    pub fn clear_undo_log(&mut self) {
        self.undo_log.clear();
    }

    /// Drop spent-archive entries below `height`. Rewinds can never reach
    /// below the newest checkpoint, so its height is a safe bound.
    pub fn prune_spent_below(&mut self, height: Height) {
        self.spent.retain(|_, (_, h)| *h >= height);
    }

    fn restore_ops_since(&mut self, mark: usize) {
        while self.undo_log.len() > mark {
            match self.undo_log.pop().expect("len checked") {
                UndoOp::Insert(outpoint) => {
                    self.index_remove(&outpoint);
                }
                UndoOp::Spend(outpoint, output, _height) => {
                    self.spent.remove(&outpoint);
                    self.index_insert(outpoint, output);
                }
                UndoOp::Unspend(outpoint, height) => {
                    if let Some(output) = self.index_remove(&outpoint) {
                        self.spent.insert(outpoint, (output, height));
                    }
                }
                UndoOp::Delete(outpoint, output) => {
                    self.index_insert(outpoint, output);
                }
            }
        }
    }

    // ── Persistence ──────────────────────────────────────────────────────────

    /// Sorted live entries, e.g. for the state snapshot or checkpoint digest.
    pub fn to_entries(&self) -> Vec<(OutPoint, TxOutput)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        entries.sort_by_key(|(k, _)| *k);
        entries
    }

    pub fn spent_entries(&self) -> Vec<(OutPoint, TxOutput, Height)> {
        let mut entries: Vec<_> = self
            .spent
            .iter()
            .map(|(k, (o, h))| (*k, o.clone(), *h))
            .collect();
        entries.sort_by_key(|(k, _, _)| *k);
        entries
    }

    pub fn from_entries(
        live: Vec<(OutPoint, TxOutput)>,
        spent: Vec<(OutPoint, TxOutput, Height)>,
    ) -> Self {
        let mut set = Self::new();
        for (outpoint, output) in live {
            set.index_insert(outpoint, output);
        }
        for (outpoint, output, height) in spent {
            set.spent.insert(outpoint, (output, height));
        }
        set
    }

    /// Structural invariant check, run after load-from-disk and after reorg
    /// commit.
    pub fn verify_consistency(&self) -> UtxoConsistencyReport {
        let mut issues = Vec::new();

        for (outpoint, output) in &self.entries {
            match self.by_address.get(&output.address) {
                Some(points) if points.contains(outpoint) => {}
                _ => issues.push(format!("entry {}:{} missing from address index", outpoint.txid, outpoint.vout)),
            }
            if self.spent.contains_key(outpoint) {
                issues.push(format!("entry {}:{} is both live and spent", outpoint.txid, outpoint.vout));
            }
        }
        let indexed: usize = self.by_address.values().map(|s| s.len()).sum();
        if indexed != self.entries.len() {
            issues.push(format!(
                "address index holds {indexed} points for {} entries",
                self.entries.len()
            ));
        }

        UtxoConsistencyReport {
            is_consistent: issues.is_empty(),
            utxo_count: self.entries.len(),
            total_value: self.total_value(),
            issues,
        }
    }

    // ── Index maintenance ────────────────────────────────────────────────────

    fn index_insert(&mut self, outpoint: OutPoint, output: TxOutput) {
        self.by_address
            .entry(output.address.clone())
            .or_default()
            .insert(outpoint);
        self.entries.insert(outpoint, output);
    }

    fn index_remove(&mut self, outpoint: &OutPoint) -> Option<TxOutput> {
        let output = self.entries.remove(outpoint)?;
        if let Some(points) = self.by_address.get_mut(&output.address) {
            points.remove(outpoint);
            if points.is_empty() {
                self.by_address.remove(&output.address);
            }
        }
        Some(output)
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use xai_core::transaction::{TxInput, TxKind};
    use xai_core::types::Hash256;

    fn addr(seed: u8) -> Address {
        Address::parse(&format!("XAI{}", hex::encode([seed; 20]))).unwrap()
    }

    fn tx_with(txid: u8, inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Transaction {
        Transaction {
            txid: Hash256::from_bytes([txid; 32]),
            sender: addr(1),
            recipient: addr(2),
            amount: Amount::ZERO,
            fee: Amount::ZERO,
            public_key: None,
            signature: None,
            kind: TxKind::Normal,
            nonce: Some(0),
            inputs,
            outputs,
            rbf_enabled: false,
            replaces_txid: None,
            timestamp: 0,
            metadata: BTreeMap::new(),
        }
    }

    fn out(seed: u8, xai: u64) -> TxOutput {
        TxOutput {
            address: addr(seed),
            amount: Amount::from_xai(xai),
        }
    }

    #[test]
    fn apply_outputs_then_balance() {
        let mut set = UtxoSet::new();
        set.apply_outputs(&tx_with(1, vec![], vec![out(7, 5), out(7, 3), out(8, 1)]));
        assert_eq!(set.balance(&addr(7)), Amount::from_xai(8));
        assert_eq!(set.balance(&addr(8)), Amount::from_xai(1));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn double_spend_is_rejected() {
        let mut set = UtxoSet::new();
        set.apply_outputs(&tx_with(1, vec![], vec![out(7, 5)]));

        let spend = tx_with(
            2,
            vec![TxInput {
                prev_txid: Hash256::from_bytes([1; 32]),
                prev_vout: 0,
            }],
            vec![],
        );
        set.apply_inputs(&spend, 1).unwrap();
        let err = set.apply_inputs(&spend, 1).unwrap_err();
        assert!(matches!(err, XaiError::DoubleSpend { vout: 0, .. }));
    }

    #[test]
    fn failed_multi_input_spend_leaves_set_untouched() {
        let mut set = UtxoSet::new();
        set.apply_outputs(&tx_with(1, vec![], vec![out(7, 5)]));

        let spend = tx_with(
            2,
            vec![
                TxInput {
                    prev_txid: Hash256::from_bytes([1; 32]),
                    prev_vout: 0,
                },
                TxInput {
                    prev_txid: Hash256::from_bytes([9; 32]),
                    prev_vout: 0,
                },
            ],
            vec![],
        );
        assert!(set.apply_inputs(&spend, 1).is_err());
        // First input must have been rolled back.
        assert!(set.contains(&OutPoint::new(Hash256::from_bytes([1; 32]), 0)));
    }

    #[test]
    fn snapshot_restore_reverts_everything() {
        let mut set = UtxoSet::new();
        set.apply_outputs(&tx_with(1, vec![], vec![out(7, 5)]));
        set.clear_undo_log();

        let snap = set.snapshot();
        let spend = tx_with(
            2,
            vec![TxInput {
                prev_txid: Hash256::from_bytes([1; 32]),
                prev_vout: 0,
            }],
            vec![out(8, 5)],
        );
        set.apply_inputs(&spend, 1).unwrap();
        set.apply_outputs(&spend);
        assert_eq!(set.balance(&addr(7)), Amount::ZERO);

        set.restore(snap);
        assert_eq!(set.balance(&addr(7)), Amount::from_xai(5));
        assert_eq!(set.balance(&addr(8)), Amount::ZERO);
        assert!(set.verify_consistency().is_consistent);
    }

    #[test]
    fn reverse_apply_resurrects_spent_outputs() {
        let mut set = UtxoSet::new();
        let coinbase = tx_with(1, vec![], vec![out(7, 50)]);
        set.apply_outputs(&coinbase);

        let spend = tx_with(
            2,
            vec![TxInput {
                prev_txid: Hash256::from_bytes([1; 32]),
                prev_vout: 0,
            }],
            vec![out(8, 50)],
        );
        set.apply_inputs(&spend, 1).unwrap();
        set.apply_outputs(&spend);

        set.reverse_apply(&spend).unwrap();
        assert_eq!(set.balance(&addr(7)), Amount::from_xai(50));
        assert_eq!(set.balance(&addr(8)), Amount::ZERO);
        assert!(set.verify_consistency().is_consistent);
    }

    #[test]
    fn persistence_round_trip() {
        let mut set = UtxoSet::new();
        set.apply_outputs(&tx_with(1, vec![], vec![out(7, 5), out(8, 2)]));
        let restored = UtxoSet::from_entries(set.to_entries(), set.spent_entries());
        assert_eq!(restored.balance(&addr(7)), Amount::from_xai(5));
        assert_eq!(restored.balance(&addr(8)), Amount::from_xai(2));
        assert!(restored.verify_consistency().is_consistent);
    }
}
