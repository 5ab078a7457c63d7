//! xai-governance — the on-chain proposal/review/vote/execute state machine.
//!
//! Governance rides on dedicated transaction kinds; this crate consumes
//! confirmed governance transactions and tracks proposal lifecycles:
//!
//!   Pending ──(review approvals)──▶ Active ──(quorum + majority)──▶ Approved
//!      │                              │                                │
//!      │                              │ (execution without approval)   │ (execution)
//!      └──(review rejections)──▶ Rejected                          Executed
//!
//! Votes move a proposal between Active and Approved as the tally crosses
//! (or falls back under) the quorum-and-majority bar; execution finalizes
//! whichever side the tally is on. The machine has no monetary side effects
//! and is fully replayable from the confirmed chain.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use xai_core::address::Address;
use xai_core::block::Block;
use xai_core::constants::{GOVERNANCE_QUORUM_BASE_UNITS, GOVERNANCE_REVIEW_THRESHOLD};
use xai_core::error::XaiError;
use xai_core::transaction::{Transaction, TxKind, VoteChoice};
use xai_core::types::{Timestamp, TxId};

// ── Proposal ─────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Active,
    Approved,
    Rejected,
    Executed,
}

#[derive(Clone, Debug, Serialize)]
pub struct Proposal {
    pub id: TxId,
    pub title: String,
    pub description: String,
    pub submitter: Address,
    pub submitted_at: Timestamp,
    pub status: ProposalStatus,
    pub review_approvals: BTreeSet<Address>,
    pub review_rejections: BTreeSet<Address>,
    /// voter → (choice, voting power in base units).
    pub votes: BTreeMap<Address, (VoteChoice, u64)>,
}

impl Proposal {
    pub fn yes_power(&self) -> u64 {
        self.power_for(VoteChoice::Yes)
    }

    pub fn no_power(&self) -> u64 {
        self.power_for(VoteChoice::No)
    }

    pub fn total_power(&self) -> u64 {
        self.votes.values().map(|(_, p)| p).sum()
    }

    /// Whether the current tally reaches quorum with a yes-majority.
    pub fn carries(&self) -> bool {
        self.total_power() >= GOVERNANCE_QUORUM_BASE_UNITS
            && self.yes_power() > self.no_power()
    }

    fn power_for(&self, choice: VoteChoice) -> u64 {
        self.votes
            .values()
            .filter(|(c, _)| *c == choice)
            .map(|(_, p)| p)
            .sum()
    }
}

/// What a single governance transaction did to the ledger of proposals.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum GovernanceOutcome {
    ProposalSubmitted { id: TxId },
    ReviewRecorded { id: TxId, status: ProposalStatus },
    VoteRecorded { id: TxId, vote_count: usize },
    ProposalExecuted { id: TxId },
    ProposalRejected { id: TxId },
}

// ── GovernanceState ──────────────────────────────────────────────────────────

/// In-memory governance ledger, rebuilt from the confirmed chain on startup.
#[derive(Default)]
pub struct GovernanceState {
    proposals: BTreeMap<TxId, Proposal>,
}

impl GovernanceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn proposal(&self, id: &TxId) -> Option<&Proposal> {
        self.proposals.get(id)
    }

    pub fn proposals(&self) -> impl Iterator<Item = &Proposal> {
        self.proposals.values()
    }

    pub fn proposals_with_status(&self, status: ProposalStatus) -> Vec<&Proposal> {
        self.proposals
            .values()
            .filter(|p| p.status == status)
            .collect()
    }

    /// Consume one confirmed governance transaction. Votes carry their own
    /// voting power, audited against the sender's balance before the
    /// containing block was accepted. Non-governance kinds are rejected.
    pub fn apply(&mut self, tx: &Transaction) -> Result<GovernanceOutcome, XaiError> {
        match &tx.kind {
            TxKind::GovernanceProposal { title, description } => {
                if self.proposals.contains_key(&tx.txid) {
                    return Err(XaiError::Governance(format!(
                        "proposal {} already exists",
                        tx.txid
                    )));
                }
                let proposal = Proposal {
                    id: tx.txid,
                    title: title.clone(),
                    description: description.clone(),
                    submitter: tx.sender.clone(),
                    submitted_at: tx.timestamp,
                    status: ProposalStatus::Pending,
                    review_approvals: BTreeSet::new(),
                    review_rejections: BTreeSet::new(),
                    votes: BTreeMap::new(),
                };
                debug!(id = %tx.txid, "governance proposal submitted");
                self.proposals.insert(tx.txid, proposal);
                Ok(GovernanceOutcome::ProposalSubmitted { id: tx.txid })
            }

            TxKind::GovernanceReview { proposal_id, approve } => {
                let proposal = self.get_mut(proposal_id)?;
                if proposal.status != ProposalStatus::Pending {
                    return Err(XaiError::Governance(format!(
                        "proposal {proposal_id} is not under review"
                    )));
                }
                if proposal.review_approvals.contains(&tx.sender)
                    || proposal.review_rejections.contains(&tx.sender)
                {
                    return Err(XaiError::Governance("reviewer already reviewed".into()));
                }
                if *approve {
                    proposal.review_approvals.insert(tx.sender.clone());
                } else {
                    proposal.review_rejections.insert(tx.sender.clone());
                }
                if proposal.review_approvals.len() >= GOVERNANCE_REVIEW_THRESHOLD {
                    proposal.status = ProposalStatus::Active;
                } else if proposal.review_rejections.len() >= GOVERNANCE_REVIEW_THRESHOLD {
                    proposal.status = ProposalStatus::Rejected;
                }
                Ok(GovernanceOutcome::ReviewRecorded {
                    id: *proposal_id,
                    status: self.proposals[proposal_id].status,
                })
            }

            TxKind::GovernanceVote {
                proposal_id,
                choice,
                voting_power,
            } => {
                let power = voting_power.base_units();
                let proposal = self.get_mut(proposal_id)?;
                if !matches!(
                    proposal.status,
                    ProposalStatus::Active | ProposalStatus::Approved
                ) {
                    return Err(XaiError::Governance(format!(
                        "proposal {proposal_id} is not open for voting"
                    )));
                }
                if proposal.votes.contains_key(&tx.sender) {
                    return Err(XaiError::Governance("sender already voted".into()));
                }
                proposal.votes.insert(tx.sender.clone(), (*choice, power));
                // Re-tally: the proposal sits at Approved exactly while the
                // vote carries quorum and a yes-majority.
                proposal.status = if proposal.carries() {
                    ProposalStatus::Approved
                } else {
                    ProposalStatus::Active
                };
                Ok(GovernanceOutcome::VoteRecorded {
                    id: *proposal_id,
                    vote_count: self.proposals[proposal_id].votes.len(),
                })
            }

            TxKind::GovernanceExecution { proposal_id } => {
                let proposal = self.get_mut(proposal_id)?;
                match proposal.status {
                    ProposalStatus::Approved => {
                        proposal.status = ProposalStatus::Executed;
                        debug!(id = %proposal_id, "governance proposal executed");
                        Ok(GovernanceOutcome::ProposalExecuted { id: *proposal_id })
                    }
                    ProposalStatus::Active => {
                        proposal.status = ProposalStatus::Rejected;
                        Ok(GovernanceOutcome::ProposalRejected { id: *proposal_id })
                    }
                    _ => Err(XaiError::Governance(format!(
                        "proposal {proposal_id} is not executable"
                    ))),
                }
            }

            TxKind::Normal | TxKind::Coinbase => Err(XaiError::Governance(
                "not a governance transaction".into(),
            )),
        }
    }

    /// Replay every governance transaction of a confirmed block. Individual
    /// failures (duplicate votes, wrong phase) do not invalidate the block;
    /// they simply leave no trace, identically on every node.
    pub fn replay_block(&mut self, block: &Block) {
        for tx in &block.transactions {
            if !tx.kind.is_governance() {
                continue;
            }
            if let Err(e) = self.apply(tx) {
                debug!(txid = %tx.txid, error = %e, "governance transaction had no effect");
            }
        }
    }

    fn get_mut(&mut self, id: &TxId) -> Result<&mut Proposal, XaiError> {
        self.proposals
            .get_mut(id)
            .ok_or_else(|| XaiError::Governance(format!("unknown proposal {id}")))
    }
}
