//! Stage 4: homeostatic process through the rests between blocks

use crate::error::ComputeError;
use crate::sleepwake::model::{gap_time_delta, homeostatic_awake, homeostatic_sleep, offsets, ChainExt};
use crate::sleepwake::types::{SleepChain, CHAIN_WIDTH};

/// Highest homeostatic level preferred on the final wake-up of a rest
const MAX_END_SW: f64 = 13.9;

/// Stage 4 calculator
pub struct Stage4Calculator;

impl Stage4Calculator {
    /// Fill the NaN gaps of the homeostatic trace from the chosen sleep
    /// chain of every rest
    pub fn calculate(
        homeostatics: &[f64],
        gaps: &[(usize, usize)],
        sleeps: &[Vec<SleepChain>],
        last_sw: &[f64],
    ) -> Result<Vec<f64>, ComputeError> {
        let mut filled = homeostatics.to_vec();
        for (idx, &(start, end)) in gaps.iter().enumerate() {
            let chain = sleeps
                .get(idx)
                .and_then(|chains| choose_chain(chains))
                .ok_or_else(|| ComputeError::unsolvable(idx, "rest", "no sleep chain to fill the rest"))?;
            let sw = *last_sw
                .get(idx)
                .ok_or_else(|| ComputeError::Internal(format!("rest {idx} has no starting level")))?;

            let h = rest_homeostatics(&chain, sw);
            let last_wake = chain.wake_idx().max(0.0) as usize;
            let n = (last_wake + 1).min(end - start + 1).min(h.len());
            filled[start..start + n].copy_from_slice(&h[..n]);
        }
        Ok(filled)
    }
}

/// Prefer chains ending at most at 13.9, then the highest final level
fn choose_chain(chains: &[SleepChain]) -> Option<SleepChain> {
    let low: Vec<&SleepChain> = chains.iter().filter(|c| c.last_h() <= MAX_END_SW).collect();
    let candidates: Vec<&SleepChain> = if low.is_empty() { chains.iter().collect() } else { low };
    candidates
        .into_iter()
        .reduce(|best, c| if c.last_h() > best.last_h() { c } else { best })
        .cloned()
}

/// Homeostatic trace of a rest from the placed sleeps of one chain.
///
/// Every placed sleep contributes an awake stretch up to its sleep index,
/// seeded by its own level, then the sleep itself. The first placed sleep
/// starts from `last_sw`.
pub fn rest_homeostatics(chain: &[f64], last_sw: f64) -> Vec<f64> {
    let dt = gap_time_delta();
    let placed: Vec<&[f64]> = chain.chunks_exact(CHAIN_WIDTH).collect();
    let mut h: Vec<f64> = Vec::new();
    let mut last_end = 0usize;
    for (n, x) in placed.iter().enumerate() {
        let seed = if n == 0 { last_sw } else { x[2] };
        let begin = x[3].max(0.0) as usize;
        let end = x[4].max(0.0) as usize;

        h.extend(offsets(begin.saturating_sub(last_end), dt).map(|t| homeostatic_awake(t, seed)));
        let mut asleep = end.saturating_sub(begin);
        if n + 1 == placed.len() {
            asleep += 1;
        }
        let from = h.last().copied().unwrap_or(seed);
        h.extend(offsets(asleep, dt).map(|t| homeostatic_sleep(t, from)));
        last_end = end;
    }
    h
}
