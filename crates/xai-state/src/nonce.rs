use std::collections::HashMap;

use xai_core::address::Address;

/// Per-sender account-nonce bookkeeping.
///
/// `confirmed` holds the last nonce buried in the canonical chain;
/// `pending` holds reservations made during block assembly. Reservations
/// commit only after the block is durably persisted.
#[derive(Debug, Default, Clone)]
pub struct NonceTracker {
    confirmed: HashMap<Address, u64>,
    pending: HashMap<Address, u64>,
}

/// Clone-based snapshot; the maps stay small (one entry per active sender).
#[derive(Clone)]
pub struct NonceSnapshot {
    confirmed: HashMap<Address, u64>,
    pending: HashMap<Address, u64>,
}

impl NonceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last confirmed nonce, or None if the sender has never transacted.
    pub fn last_confirmed(&self, sender: &Address) -> Option<u64> {
        self.confirmed.get(sender).copied()
    }

    /// The nonce the next transaction from `sender` must carry, counting
    /// in-flight reservations.
    pub fn expected_next(&self, sender: &Address) -> u64 {
        match self.pending.get(sender).or_else(|| self.confirmed.get(sender)) {
            Some(n) => n + 1,
            None => 0,
        }
    }

    /// Mark `nonce` as in-flight for `sender` during block assembly.
    pub fn reserve(&mut self, sender: &Address, nonce: u64) {
        self.pending.insert(sender.clone(), nonce);
    }

    /// Confirm `nonce` for `sender`. Only called after durable persistence.
    pub fn commit(&mut self, sender: &Address, nonce: u64) {
        self.confirmed.insert(sender.clone(), nonce);
        self.pending.remove(sender);
    }

    /// Step a sender's confirmed nonce back below `nonce` (reorg rewind).
    pub fn rewind(&mut self, sender: &Address, nonce: u64) {
        if nonce == 0 {
            self.confirmed.remove(sender);
        } else {
            self.confirmed.insert(sender.clone(), nonce - 1);
        }
    }

    pub fn clear_reservations(&mut self) {
        self.pending.clear();
    }

    pub fn snapshot(&self) -> NonceSnapshot {
        NonceSnapshot {
            confirmed: self.confirmed.clone(),
            pending: self.pending.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: NonceSnapshot) {
        self.confirmed = snapshot.confirmed;
        self.pending = snapshot.pending;
    }

    pub fn to_entries(&self) -> Vec<(Address, u64)> {
        let mut entries: Vec<_> = self
            .confirmed
            .iter()
            .map(|(a, n)| (a.clone(), *n))
            .collect();
        entries.sort();
        entries
    }

    pub fn from_entries(entries: Vec<(Address, u64)>) -> Self {
        Self {
            confirmed: entries.into_iter().collect(),
            pending: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(seed: u8) -> Address {
        Address::parse(&format!("XAI{}", hex::encode([seed; 20]))).unwrap()
    }

    #[test]
    fn fresh_sender_expects_zero() {
        let tracker = NonceTracker::new();
        assert_eq!(tracker.last_confirmed(&addr(1)), None);
        assert_eq!(tracker.expected_next(&addr(1)), 0);
    }

    #[test]
    fn reservations_advance_expectation_without_confirming() {
        let mut tracker = NonceTracker::new();
        tracker.reserve(&addr(1), 0);
        assert_eq!(tracker.expected_next(&addr(1)), 1);
        assert_eq!(tracker.last_confirmed(&addr(1)), None);

        tracker.clear_reservations();
        assert_eq!(tracker.expected_next(&addr(1)), 0);
    }

    #[test]
    fn commit_then_rewind() {
        let mut tracker = NonceTracker::new();
        tracker.commit(&addr(1), 0);
        tracker.commit(&addr(1), 1);
        assert_eq!(tracker.expected_next(&addr(1)), 2);

        tracker.rewind(&addr(1), 1);
        assert_eq!(tracker.last_confirmed(&addr(1)), Some(0));
        tracker.rewind(&addr(1), 0);
        assert_eq!(tracker.last_confirmed(&addr(1)), None);
    }

    #[test]
    fn snapshot_restore() {
        let mut tracker = NonceTracker::new();
        tracker.commit(&addr(1), 4);
        let snap = tracker.snapshot();
        tracker.commit(&addr(1), 5);
        tracker.reserve(&addr(2), 0);
        tracker.restore(snap);
        assert_eq!(tracker.last_confirmed(&addr(1)), Some(4));
        assert_eq!(tracker.expected_next(&addr(2)), 0);
    }
}
