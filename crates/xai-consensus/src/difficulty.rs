use xai_core::block::BlockHeader;
use xai_core::constants::{
    DIFFICULTY_WINDOW, MAX_ADJUSTMENT_FACTOR, MAX_DIFFICULTY, MIN_DIFFICULTY,
    TARGET_BLOCK_TIME_SECS,
};
use xai_core::types::Difficulty;

/// Retargeting parameters; defaults come from the protocol constants but the
/// node may narrow them for test networks.
#[derive(Clone, Debug)]
pub struct DifficultyParams {
    pub target_block_time_secs: i64,
    pub window: usize,
    /// New/old difficulty is clamped to [1/factor, factor] per retarget.
    pub max_adjustment_factor: u32,
    pub min_difficulty: Difficulty,
    pub max_difficulty: Difficulty,
}

impl Default for DifficultyParams {
    fn default() -> Self {
        Self {
            target_block_time_secs: TARGET_BLOCK_TIME_SECS,
            window: DIFFICULTY_WINDOW,
            max_adjustment_factor: MAX_ADJUSTMENT_FACTOR,
            min_difficulty: MIN_DIFFICULTY,
            max_difficulty: MAX_DIFFICULTY,
        }
    }
}

/// Difficulty for the block that will extend `headers`.
///
/// Inspects the last `min(window, chain_length)` blocks: elapsed is the
/// timestamp span across them, target is window × target_block_time, and
/// the new difficulty is current × target / elapsed, rounded, then clamped
/// by the per-retarget factor and the absolute bounds. Retrograde or
/// identical timestamps leave difficulty unchanged.
pub fn next_difficulty(headers: &[BlockHeader], params: &DifficultyParams) -> Difficulty {
    let current = headers
        .last()
        .map(|h| h.difficulty)
        .unwrap_or(params.min_difficulty)
        .max(1);
    if headers.len() < 2 {
        return current;
    }

    let window = params.window.min(headers.len());
    let slice = &headers[headers.len() - window..];
    let elapsed = slice[window - 1].timestamp - slice[0].timestamp;
    if elapsed <= 0 {
        return current;
    }

    let target_elapsed = window as i64 * params.target_block_time_secs;
    // round(current * target / elapsed) in integer arithmetic.
    let numerator = current as u128 * target_elapsed as u128;
    let elapsed = elapsed as u128;
    let rounded = (2 * numerator + elapsed) / (2 * elapsed);
    let mut next = rounded.min(Difficulty::MAX as u128) as Difficulty;

    let factor = params.max_adjustment_factor.max(1);
    let lower = (current / factor).max(1);
    let upper = current.saturating_mul(factor);
    next = next.clamp(lower, upper);
    next = next.clamp(params.min_difficulty, params.max_difficulty);
    next.max(1)
}
