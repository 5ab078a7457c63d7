use std::collections::HashMap;

use xai_core::address::Address;
use xai_core::amount::Amount;
use xai_core::constants::{MAX_STREAK_BONUS_PERCENT, MAX_SUPPLY};
use xai_core::types::Timestamp;

const SECS_PER_DAY: i64 = 86_400;

/// Consecutive-day mining streaks per miner. Mining on the day after the
/// last mined day extends the streak; several blocks within one day leave
/// it unchanged; a missed day resets it. The bonus is miner-local
/// accounting and is always audited against the supply cap.
#[derive(Debug, Default)]
pub struct StreakTracker {
    /// miner → (streak length in days, last mined day number).
    streaks: HashMap<Address, (u64, i64)>,
}

impl StreakTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The streak a block mined at `now` would have, without recording
    /// anything. Block assembly prices the bonus from this projection;
    /// only a durably committed block advances the streak.
    pub fn projected(&self, miner: &Address, now: Timestamp) -> u64 {
        let day = now.div_euclid(SECS_PER_DAY);
        match self.streaks.get(miner) {
            Some((count, last_day)) if day == *last_day => *count,
            Some((count, last_day)) if day == *last_day + 1 => count + 1,
            _ => 1,
        }
    }

    /// Record a durably committed block and return the updated streak.
    pub fn record(&mut self, miner: &Address, now: Timestamp) -> u64 {
        let streak = self.projected(miner, now);
        self.streaks
            .insert(miner.clone(), (streak, now.div_euclid(SECS_PER_DAY)));
        streak
    }

    pub fn current(&self, miner: &Address) -> u64 {
        self.streaks.get(miner).map(|(c, _)| *c).unwrap_or(0)
    }

    /// Bonus for a block paying `base_reward` at the given streak length and
    /// already-issued supply. One percent of the base reward per streak day
    /// beyond the first, capped, and never pushing issuance past the supply
    /// cap.
    pub fn bonus_for_streak(streak: u64, base_reward: Amount, supply: Amount) -> Amount {
        let percent = streak.saturating_sub(1).min(MAX_STREAK_BONUS_PERCENT);
        let mut bonus = base_reward.percent(percent);

        let headroom = MAX_SUPPLY
            .checked_sub(supply)
            .and_then(|room| room.checked_sub(base_reward))
            .unwrap_or(Amount::ZERO);
        if bonus > headroom {
            bonus = headroom;
        }
        bonus
    }
}
