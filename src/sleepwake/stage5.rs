//! Stage 5: the window after the last duty
//!
//! Resamples the gap-filled traces onto a regular 10 minute grid and
//! extends them to the midnight that follows the last simulated sample,
//! placing one more sleep in that window.

use chrono::{Duration, NaiveDateTime};

use crate::error::ComputeError;
use crate::sleepwake::model::{
    circadian, datetime_range, find_a_sleep_episode, homeostatic_awake, homeostatic_sleep, hour_decimal,
    linear_interpolate, linspace, midnight, offsets, threshold_grid, CIRCADIAN_LENGTH, INTERVAL_MINUTES, TIME_DELTA,
};
use crate::sleepwake::types::{LastWindow, RsDuty};

/// Sleep found in the last window for one threshold pair
#[derive(Debug, Clone, Copy, PartialEq)]
struct LastSleep {
    lower: f64,
    upper: f64,
    awake: bool,
    h: f64,
    sleep_idx: usize,
    wake_idx: usize,
}

/// Stage 5 calculator
pub struct Stage5Calculator;

impl Stage5Calculator {
    /// Resample and extend the traces through the last day.
    ///
    /// `is_next_day` marks a last duty whose commute starts on a different
    /// day than the sample after the simulated range; the window then
    /// allows a sleep followed by a wake-up.
    pub fn calculate(
        range: &[NaiveDateTime],
        homeostatics: &[f64],
        circadians: &[f64],
        rs_duties: &[RsDuty],
        is_next_day: bool,
    ) -> Result<LastWindow, ComputeError> {
        let (Some(&first), Some(&last), Some(rs)) = (range.first(), range.last(), rs_duties.last())
        else {
            return Err(ComputeError::Internal("empty simulation timeline".to_string()));
        };
        let step = Duration::minutes(INTERVAL_MINUTES);

        let seconds = |t: &NaiveDateTime| (*t - first).num_seconds() as f64;
        let x: Vec<f64> = range.iter().map(seconds).collect();
        let grid = datetime_range_inclusive(first, last);
        let new_x: Vec<f64> = grid.iter().map(seconds).collect();
        let mut h = linear_interpolate(&x, homeostatics, &new_x)?;
        let mut c = linear_interpolate(&x, circadians, &new_x)?;

        let grid_last = grid.last().copied().unwrap_or(last);
        let initial_time = hour_decimal(grid_last);
        let initial_sw = h.last().copied().unwrap_or_default();
        let phase = rs.end_phase;

        let begin = last + step;
        let n = ((midnight(begin) + Duration::days(1) - begin).num_minutes() / INTERVAL_MINUTES).max(0) as usize;
        let c_ext: Vec<f64> = linspace(TIME_DELTA, n as f64 * TIME_DELTA, n as i64)
            .into_iter()
            .map(|t| circadian(t % CIRCADIAN_LENGTH, phase - initial_time))
            .collect();
        c.extend_from_slice(&c_ext);

        let sleeps: Vec<LastSleep> = threshold_grid(&linspace(6.0, 9.0, 4), &linspace(11.0, 14.0, 4))
            .into_iter()
            .map(|(lower, upper)| {
                let found = find_a_sleep_episode(0, n, lower, upper, initial_sw, TIME_DELTA, &c_ext);
                LastSleep {
                    lower,
                    upper,
                    awake: found.awake,
                    h: found.h,
                    sleep_idx: found.sleep_idx,
                    wake_idx: found.idx.saturating_sub(1),
                }
            })
            .collect();

        let tail = if is_next_day {
            sleep_and_wake(&sleeps, n, initial_sw)
        } else {
            sleep_to_midnight(&sleeps, n, initial_sw)
        };
        h.extend(tail);

        let time_range = datetime_range(first, midnight(begin) + Duration::days(1), INTERVAL_MINUTES);
        Ok(LastWindow {
            time_range,
            homeostatics: h,
            circadians: c,
        })
    }
}

fn datetime_range_inclusive(first: NaiveDateTime, last: NaiveDateTime) -> Vec<NaiveDateTime> {
    datetime_range(first, last + Duration::minutes(INTERVAL_MINUTES), INTERVAL_MINUTES)
}

/// First row with the highest final level
fn highest_h<'a>(rows: impl IntoIterator<Item = &'a LastSleep>) -> Option<&'a LastSleep> {
    rows.into_iter().reduce(|best, r| if r.h > best.h { r } else { best })
}

/// Awake until a sleep, asleep until waking, awake to midnight
fn sleep_and_wake(sleeps: &[LastSleep], n: usize, sw: f64) -> Vec<f64> {
    let woke: Vec<&LastSleep> = sleeps.iter().filter(|s| s.awake).collect();
    let selected = if woke.is_empty() {
        let earliest = sleeps.iter().map(|s| s.sleep_idx).min().unwrap_or(0);
        highest_h(sleeps.iter().filter(|s| s.sleep_idx == earliest))
    } else {
        let upper = woke.iter().map(|s| s.upper).fold(f64::NEG_INFINITY, f64::max);
        highest_h(woke.into_iter().filter(|s| s.upper == upper))
    };
    let Some(selected) = selected else {
        return offsets(n, TIME_DELTA).map(|t| homeostatic_awake(t, sw)).collect();
    };

    let awake = selected.sleep_idx.min(n);
    let asleep = selected.wake_idx.saturating_sub(awake).min(n - awake);
    let mut h: Vec<f64> = offsets(awake, TIME_DELTA).map(|t| homeostatic_awake(t, sw)).collect();
    let from = h.last().copied().unwrap_or(sw);
    h.extend(offsets(asleep, TIME_DELTA).map(|t| homeostatic_sleep(t, from)));
    let from = h.last().copied().unwrap_or(sw);
    h.extend(offsets(n - awake - asleep, TIME_DELTA).map(|t| homeostatic_awake(t, from)));
    h
}

/// Awake until a sleep that lasts to midnight
fn sleep_to_midnight(sleeps: &[LastSleep], n: usize, sw: f64) -> Vec<f64> {
    let asleep: Vec<&LastSleep> = sleeps.iter().filter(|s| !s.awake).collect();
    let rows: Vec<&LastSleep> = if asleep.is_empty() { sleeps.iter().collect() } else { asleep };
    let upper = rows.iter().map(|s| s.upper).fold(f64::NEG_INFINITY, f64::max);
    let rows: Vec<&LastSleep> = rows.into_iter().filter(|s| s.upper == upper).collect();
    let lower = rows.iter().map(|s| s.lower).fold(f64::INFINITY, f64::min);
    let selected = highest_h(rows.into_iter().filter(|s| s.lower == lower));

    let awake = selected.map_or(n, |s| s.sleep_idx.min(n));
    let mut h: Vec<f64> = offsets(awake, TIME_DELTA).map(|t| homeostatic_awake(t, sw)).collect();
    let from = h.last().copied().unwrap_or(sw);
    h.extend(offsets(n - awake, TIME_DELTA).map(|t| homeostatic_sleep(t, from)));
    h
}
