//! Stage 6: per-duty features from the simulated traces
//!
//! Turning points of the homeostatic trace mark wake-ups (maxima) and sleep
//! onsets (minima). Each duty reads its features around those markers, then
//! the sleep length and alertness change are accumulated within each duty
//! block.

use std::collections::BTreeMap;

use chrono::Duration;

use crate::error::ComputeError;
use crate::sleepwake::model::{time_indexes, TIME_DELTA};
use crate::sleepwake::types::{DutyRow, LastWindow};

/// Sleep length treated as neutral for the cumulative sleep effect
const OPTIMAL_SLEEP_HOURS: f64 = 8.0;
/// Carry-over of the previous cumulative sleep effect
const SLEEP_CARRY_OVER: f64 = 0.9;
/// Base of the weights applied to the alertness change of each duty
const ALERTNESS_DECAY: f64 = 0.5;

/// Stage 6 calculator
pub struct Stage6Calculator;

impl Stage6Calculator {
    /// Fill the features of every row from the final window
    pub fn calculate(rows: &mut [DutyRow], window: &LastWindow) -> Result<(), ComputeError> {
        let h = &window.homeostatics;
        let c = &window.circadians;
        let range = &window.time_range;
        if h.len() != range.len() || c.len() != range.len() || range.is_empty() {
            return Err(ComputeError::Internal(format!(
                "final window has {} samples, {} homeostatic and {} circadian values",
                range.len(),
                h.len(),
                c.len()
            )));
        }
        let last = range.len() - 1;
        let alertness: Vec<f64> = h.iter().zip(c).map(|(h, c)| h + c).collect();
        let markers = markers(h, last);

        let begins = time_indexes(range, rows.iter().map(|r| r.commute_begin), Duration::zero());
        let ends = time_indexes(range, rows.iter().map(|r| r.commute_end), Duration::zero());

        for ((row, &start), &end) in rows.iter_mut().zip(&begins).zip(&ends) {
            let awake_idx = markers.iter().rev().find(|&&m| m <= start).copied().unwrap_or(0);
            let sleep_idx = markers.iter().find(|&&m| m >= end).copied().unwrap_or(last);

            let before: Vec<usize> = markers.iter().copied().filter(|&m| m <= start).collect();
            let woke = before.last().copied().unwrap_or(0);
            let slept = if before.len() > 1 { before[before.len() - 2] } else { 0 };

            let features = &mut row.features;
            features.awake_time = range.get(awake_idx).copied();
            features.sleep_time = range.get(sleep_idx).copied();
            features.alertness_when_awake = sample(h, start, row.row_index)?;
            features.alertness_when_sleep = sample(h, end, row.row_index)?;
            features.sleep_begin_before_operating = range.get(slept).copied();
            features.sleep_end_before_operating = range.get(woke).copied();
            features.sleep_length_before_operating = (woke - slept) as f64 * TIME_DELTA;
            features.alertness_before_duty = sample(&alertness, start, row.row_index)?;
            features.alertness_after_duty = sample(&alertness, end, row.row_index)?;
            features.sum_of_diffs = (start..end).map(|j| alertness[j + 1] - alertness[j]).sum();
        }

        accumulate(rows);
        Ok(())
    }
}

fn sample(values: &[f64], idx: usize, row_index: usize) -> Result<f64, ComputeError> {
    values.get(idx).copied().ok_or_else(|| {
        ComputeError::Internal(format!("duty {row_index} falls outside the simulated window at sample {idx}"))
    })
}

/// Sorted indexes of the local maxima and minima of `h`.
///
/// An unmatched maximum is paired with a closing minimum at `last`.
fn markers(h: &[f64], last: usize) -> Vec<usize> {
    let (mut maxima, mut minima) = turning_points(h);
    if maxima.len() != minima.len() {
        minima.push(last);
    }
    maxima.append(&mut minima);
    maxima.sort_unstable();
    maxima.dedup();
    maxima
}

fn turning_points(h: &[f64]) -> (Vec<usize>, Vec<usize>) {
    let rising: Vec<bool> = h.windows(2).map(|w| w[1] - w[0] > 0.0).collect();
    let mut maxima = Vec::new();
    let mut minima = Vec::new();
    for i in 1..rising.len() {
        match (rising[i - 1], rising[i]) {
            (true, false) => maxima.push(i),
            (false, true) => minima.push(i),
            _ => {}
        }
    }
    (maxima, minima)
}

/// Running sleep and alertness effects within each duty block
fn accumulate(rows: &mut [DutyRow]) {
    let mut blocks: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, row) in rows.iter().enumerate() {
        blocks.entry(row.block_id).or_default().push(i);
    }

    for members in blocks.values() {
        let n = members.len() as i32;
        let mut sleep = 0.0;
        let mut alert = 0.0;
        for (k, &i) in members.iter().enumerate() {
            let f = &mut rows[i].features;
            let surplus = f.sleep_length_before_operating - OPTIMAL_SLEEP_HOURS;
            sleep = if k == 0 { surplus } else { SLEEP_CARRY_OVER * sleep + surplus };
            alert += ALERTNESS_DECAY.powi(n - k as i32) * f.sum_of_diffs;
            f.cumulative_sleep_length = sleep;
            f.cumulative_alertness = alert;
        }
    }
}
