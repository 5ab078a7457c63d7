use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::amount::Amount;
use crate::codec;
use crate::error::XaiError;
use crate::types::{Timestamp, TxId};

// ── TxKind ───────────────────────────────────────────────────────────────────

/// Ballot options for a governance vote.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    Yes,
    No,
    Abstain,
}

/// The closed set of ledger transaction kinds. Governance payloads are
/// sub-variants of the governance family and ride inside the transaction
/// itself; the governance state machine consumes them after confirmation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tx_type", rename_all = "snake_case")]
pub enum TxKind {
    /// Plain value transfer.
    Normal,

    /// First transaction of a block; no inputs, pays the miner.
    Coinbase,

    GovernanceProposal {
        title: String,
        description: String,
    },

    GovernanceVote {
        proposal_id: TxId,
        choice: VoteChoice,
        /// Weight claimed by the voter, audited against their balance at the
        /// containing block. Recording it in-chain keeps governance replay
        /// deterministic across reorganizations.
        voting_power: Amount,
    },

    GovernanceReview {
        proposal_id: TxId,
        approve: bool,
    },

    GovernanceExecution {
        proposal_id: TxId,
    },
}

impl TxKind {
    pub fn is_governance(&self) -> bool {
        !matches!(self, TxKind::Normal | TxKind::Coinbase)
    }
}

// ── Inputs / outputs ─────────────────────────────────────────────────────────

/// Reference to an unspent output of a prior confirmed transaction (or of an
/// earlier transaction in the same block under strict in-block ordering).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxInput {
    pub prev_txid: TxId,
    pub prev_vout: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub address: Address,
    pub amount: Amount,
}

// ── Transaction ──────────────────────────────────────────────────────────────

/// A fully-formed XAI transaction.
///
/// `txid` is SHA-256 of the canonical serialization of every field except
/// `txid` and `signature`; the signature covers the same preimage
/// (see [`Transaction::signing_bytes`]).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Content hash (derived, never an input to itself).
    pub txid: TxId,

    pub sender: Address,
    pub recipient: Address,

    /// Value delivered to `recipient`.
    pub amount: Amount,

    /// Miner fee: Σ inputs − amount − Σ change.
    pub fee: Amount,

    /// Compressed secp256k1 public key, hex. Absent for coinbase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,

    /// Compact 64-byte ECDSA signature, hex. Absent for coinbase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,

    #[serde(flatten)]
    pub kind: TxKind,

    /// Per-sender monotonic counter. Absent for coinbase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,

    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,

    /// Whether this transaction opts into replace-by-fee.
    pub rbf_enabled: bool,

    /// Txid this transaction intends to replace (RBF bookkeeping only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces_txid: Option<TxId>,

    pub timestamp: Timestamp,

    /// Opaque application data; size-capped by structural validation.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// Borrowed view of the fields covered by the txid and the signature.
/// Excludes `txid` and `signature`; everything else is bound.
#[derive(Serialize)]
pub struct TxPreimage<'a> {
    pub sender: &'a Address,
    pub recipient: &'a Address,
    pub amount: Amount,
    pub fee: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key: Option<&'a String>,
    #[serde(flatten)]
    pub kind: &'a TxKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<u64>,
    pub inputs: &'a [TxInput],
    pub outputs: &'a [TxOutput],
    pub rbf_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replaces_txid: Option<&'a TxId>,
    pub timestamp: Timestamp,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: &'a BTreeMap<String, String>,
}

impl Transaction {
    pub fn preimage(&self) -> TxPreimage<'_> {
        TxPreimage {
            sender: &self.sender,
            recipient: &self.recipient,
            amount: self.amount,
            fee: self.fee,
            public_key: self.public_key.as_ref(),
            kind: &self.kind,
            nonce: self.nonce,
            inputs: &self.inputs,
            outputs: &self.outputs,
            rbf_enabled: self.rbf_enabled,
            replaces_txid: self.replaces_txid.as_ref(),
            timestamp: self.timestamp,
            metadata: &self.metadata,
        }
    }

    /// Canonical bytes hashed into the txid and covered by the signature.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, XaiError> {
        codec::canonical_bytes(&self.preimage())
    }

    /// Canonical serialized size of the full transaction in bytes.
    pub fn canonical_size(&self) -> Result<usize, XaiError> {
        Ok(codec::canonical_bytes(self)?.len())
    }

    pub fn is_coinbase(&self) -> bool {
        matches!(self.kind, TxKind::Coinbase)
    }

    /// Change is every output paid back to the sender.
    pub fn change_total(&self) -> Option<Amount> {
        Amount::checked_sum(
            self.outputs
                .iter()
                .filter(|o| o.address == self.sender)
                .map(|o| o.amount),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Hash256;

    fn addr(seed: u8) -> Address {
        Address::parse(&format!("XAI{}", hex::encode([seed; 20]))).unwrap()
    }

    fn transfer(sender: Address, recipient: Address) -> Transaction {
        Transaction {
            txid: Hash256::zero(),
            sender,
            recipient,
            amount: Amount::from_xai(5),
            fee: Amount::parse("0.1").unwrap(),
            public_key: Some("02".repeat(33)),
            signature: None,
            kind: TxKind::Normal,
            nonce: Some(0),
            inputs: vec![TxInput {
                prev_txid: Hash256::zero(),
                prev_vout: 0,
            }],
            outputs: vec![],
            rbf_enabled: false,
            replaces_txid: None,
            timestamp: 1_700_000_000,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn preimage_excludes_signature() {
        let mut tx = transfer(addr(1), addr(2));
        let before = tx.signing_bytes().unwrap();
        tx.signature = Some("00".repeat(64));
        tx.txid = Hash256::from_bytes([9; 32]);
        assert_eq!(tx.signing_bytes().unwrap(), before);
    }

    #[test]
    fn tx_kind_serializes_as_tx_type_tag() {
        let tx = transfer(addr(1), addr(2));
        let value = serde_json::to_value(&tx).unwrap();
        assert_eq!(value["tx_type"], "normal");

        let gov = Transaction {
            kind: TxKind::GovernanceVote {
                proposal_id: Hash256::zero(),
                choice: VoteChoice::Yes,
                voting_power: Amount::from_xai(7),
            },
            ..transfer(addr(1), Address::governance())
        };
        let value = serde_json::to_value(&gov).unwrap();
        assert_eq!(value["tx_type"], "governance_vote");
        assert_eq!(value["choice"], "yes");
    }

    #[test]
    fn canonical_round_trip() {
        let tx = transfer(addr(1), addr(2));
        let bytes = codec::canonical_bytes(&tx).unwrap();
        let back: Transaction = codec::decode(&bytes).unwrap();
        assert_eq!(back, tx);
    }

    #[test]
    fn change_total_counts_only_sender_outputs() {
        let sender = addr(1);
        let mut tx = transfer(sender.clone(), addr(2));
        tx.outputs = vec![
            TxOutput {
                address: addr(2),
                amount: Amount::from_xai(5),
            },
            TxOutput {
                address: sender,
                amount: Amount::from_xai(3),
            },
        ];
        assert_eq!(tx.change_total().unwrap(), Amount::from_xai(3));
    }
}
