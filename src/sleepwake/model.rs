//! Two-process model primitives
//!
//! Homeostatic (process S) and circadian (process C) components, sample
//! grids, interpolation and the single sleep episode search shared by the
//! simulator stages. Time arguments are in hours.

use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};

use crate::error::ComputeError;
use crate::sleepwake::types::SleepChain;

/// Minutes between samples of the main grid
pub const INTERVAL_MINUTES: i64 = 10;
/// Hours between samples of the main grid
pub const TIME_DELTA: f64 = 1.0 / 6.0;
/// Samples per day on the main grid
pub const SAMPLES_PER_DAY: usize = 144;
pub const CIRCADIAN_LENGTH: f64 = 24.0;
/// Non-duty gaps are sampled every `N_DELTA` main-grid intervals
pub const N_DELTA: i64 = 3;
/// Step used by every widening filter
pub const PERCENT_DELTA: f64 = 0.005;
pub const INITIAL_PHASE: f64 = 16.2;
pub const INITIAL_SLEEP: f64 = 9.0;
pub const LONG_SLEEP_HOURS: f64 = 9.0;
pub const SHORT_SLEEP_HOURS: f64 = 6.0;
pub const MIN_ONE_DAY_OFF_HOURS: i64 = 36;
pub const MIN_REST_HOURS: i64 = 8;
pub const AWAKE_OFFSET_MINUTES: i64 = 30;

const LOWER_ASYMPTOTE: f64 = 2.4;
const AWAKE_DECAY: f64 = -0.0353;
const UPPER_ASYMPTOTE: f64 = 14.3;
const BREAK_LEVEL: f64 = 12.2;
const SLEEP_RATE: f64 = -0.3813;
const CIRCADIAN_AMPLITUDE: f64 = 2.5;

/// Hours between samples inside a non-duty gap
pub fn gap_time_delta() -> f64 {
    N_DELTA as f64 * TIME_DELTA
}

/// Wake-up reference time of day
pub fn awake_time() -> NaiveTime {
    NaiveTime::from_hms_opt(7, 0, 0).unwrap_or_default()
}

pub fn awake_offset() -> Duration {
    Duration::minutes(AWAKE_OFFSET_MINUTES)
}

/// Homeostatic level after `t` hours awake, starting from `sw`
pub fn homeostatic_awake(t: f64, sw: f64) -> f64 {
    LOWER_ASYMPTOTE + (sw - LOWER_ASYMPTOTE) * (AWAKE_DECAY * t).exp()
}

/// Homeostatic level after `t` hours asleep, starting from `ss`.
///
/// Linear recovery up to the break level, exponential approach to the upper
/// asymptote after it.
pub fn homeostatic_sleep(t: f64, ss: f64) -> f64 {
    let slope = SLEEP_RATE * (BREAK_LEVEL - UPPER_ASYMPTOTE);
    let linear = ss + t * slope;
    if linear <= BREAK_LEVEL {
        return linear;
    }
    let break_time = (BREAK_LEVEL - ss) / slope;
    UPPER_ASYMPTOTE - (UPPER_ASYMPTOTE - BREAK_LEVEL) * (SLEEP_RATE * (t - break_time)).exp()
}

/// Homeostatic level after `t` hours of napping, starting from `ss`
pub fn homeostatic_nap(t: f64, ss: f64) -> f64 {
    UPPER_ASYMPTOTE - (UPPER_ASYMPTOTE - ss) * (SLEEP_RATE * t).exp()
}

/// Circadian component with zero mesor and the default amplitude
pub fn circadian(t: f64, phase: f64) -> f64 {
    circadian_with(t, phase, 0.0, CIRCADIAN_AMPLITUDE)
}

pub fn circadian_with(t: f64, phase: f64, mesor: f64, amplitude: f64) -> f64 {
    mesor + amplitude * (2.0 * std::f64::consts::PI / CIRCADIAN_LENGTH * (t - phase)).cos()
}

/// Hour of day with minutes as a fraction
pub fn hour_decimal(t: NaiveDateTime) -> f64 {
    t.hour() as f64 + t.minute() as f64 / 60.0
}

/// Midnight at the start of the given instant's day
pub fn midnight(t: NaiveDateTime) -> NaiveDateTime {
    t.date().and_time(NaiveTime::default())
}

/// Evenly spaced values over `[start, end]`.
///
/// A single sample yields `[start]`; zero or negative counts yield nothing.
pub fn linspace(start: f64, end: f64, num: i64) -> Vec<f64> {
    match num {
        n if n <= 0 => Vec::new(),
        1 => vec![start],
        n => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + i as f64 * step).collect()
        }
    }
}

/// Values from `start` (inclusive) to `stop` (exclusive) by repeated addition
pub fn arange(start: f64, stop: f64, step: f64) -> Vec<f64> {
    let mut out = Vec::new();
    if step <= 0.0 {
        return out;
    }
    let mut value = start;
    while value < stop {
        out.push(value);
        value += step;
    }
    out
}

/// `n` sample offsets `0, dt, 2dt, ...`
pub(crate) fn offsets(n: usize, dt: f64) -> impl Iterator<Item = f64> {
    (0..n).map(move |i| i as f64 * dt)
}

/// Round half to even at the given number of decimals
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round_ties_even() / scale
}

/// Ordered cartesian product of lower and upper thresholds
pub fn threshold_grid(lowers: &[f64], uppers: &[f64]) -> Vec<(f64, f64)> {
    lowers
        .iter()
        .flat_map(|&l| uppers.iter().map(move |&u| (round_to(l, 2), round_to(u, 2))))
        .collect()
}

/// Ordered cartesian product of lower thresholds, upper thresholds and phases
pub fn phase_threshold_grid(lowers: &[f64], uppers: &[f64], phases: &[f64]) -> Vec<(f64, f64, f64)> {
    let mut out = Vec::with_capacity(lowers.len() * uppers.len() * phases.len());
    for &l in lowers {
        for &u in uppers {
            for &p in phases {
                out.push((round_to(l, 2), round_to(u, 2), round_to(p, 2)));
            }
        }
    }
    out
}

/// Piecewise linear interpolation of `(x, y)` at `new_x`, extrapolating
/// linearly beyond both ends
pub fn linear_interpolate(x: &[f64], y: &[f64], new_x: &[f64]) -> Result<Vec<f64>, ComputeError> {
    let n = x.len().min(y.len());
    if n < 2 {
        return Err(ComputeError::Internal(format!(
            "interpolation needs at least two samples, got {n}"
        )));
    }
    let (x, y) = (&x[..n], &y[..n]);
    let line = |j: usize, v: f64| y[j] + (y[j + 1] - y[j]) * (v - x[j]) / (x[j + 1] - x[j]);
    Ok(new_x
        .iter()
        .map(|&v| {
            if v <= x[0] {
                line(0, v)
            } else if v >= x[n - 1] {
                line(n - 2, v)
            } else {
                let j = x.partition_point(|&xi| xi <= v).saturating_sub(1).min(n - 2);
                line(j, v)
            }
        })
        .collect())
}

/// Replace NaN samples by interpolating over the valid ones
pub fn interpolate_nan(values: &[f64]) -> Result<Vec<f64>, ComputeError> {
    let (valid_x, valid_y): (Vec<f64>, Vec<f64>) = values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .map(|(i, &v)| (i as f64, v))
        .unzip();
    let all_x: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    linear_interpolate(&valid_x, &valid_y, &all_x)
}

/// Inclusive `(start, end)` index pairs of every NaN run
pub fn nan_runs(values: &[f64]) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    for (i, v) in values.iter().enumerate() {
        if v.is_nan() {
            current = match current {
                Some((start, end)) if end + 1 == i => Some((start, i)),
                Some(run) => {
                    runs.push(run);
                    Some((i, i))
                }
                None => Some((i, i)),
            };
        }
    }
    runs.extend(current);
    runs
}

/// Instants from `begin` (inclusive) to `end` (exclusive) every `step_minutes`
pub fn datetime_range(begin: NaiveDateTime, end: NaiveDateTime, step_minutes: i64) -> Vec<NaiveDateTime> {
    let step = Duration::minutes(step_minutes.max(1));
    let mut out = Vec::new();
    let mut t = begin;
    while t < end {
        out.push(t);
        t += step;
    }
    out
}

/// Insertion index of each shifted value in a sorted range
pub fn time_indexes(
    range: &[NaiveDateTime],
    values: impl IntoIterator<Item = NaiveDateTime>,
    offset: Duration,
) -> Vec<usize> {
    values
        .into_iter()
        .map(|v| {
            let target = v + offset;
            range.partition_point(|&t| t < target)
        })
        .collect()
}

/// Assumed wake-up time before a duty that begins at `begin`
pub fn set_initial_datetime(begin: NaiveDateTime) -> NaiveDateTime {
    let time = begin.time();
    if time >= NaiveTime::from_hms_opt(15, 0, 0).unwrap_or_default() {
        midnight(begin) + Duration::hours(8)
    } else if time <= awake_time() {
        begin - awake_offset()
    } else {
        linear_wake_time(begin)
    }
}

/// Wake-up on the `5.5 + 0.2 h` line, floored to 10 minutes
pub(crate) fn linear_wake_time(begin: NaiveDateTime) -> NaiveDateTime {
    let t = 5.5 + 0.2 * hour_decimal(begin);
    let hours = t.trunc();
    let minutes = ((t - hours) * 6.0).floor() * 10.0;
    midnight(begin) + Duration::hours(hours as i64) + Duration::minutes(minutes as i64)
}

/// Result of a single sleep episode search
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpisodeSearch {
    /// Awake at the end of the search
    pub awake: bool,
    /// Homeostatic level at the last evaluated sample
    pub h: f64,
    pub sleep_idx: usize,
    /// Wake index, or `end` when the search ran out
    pub idx: usize,
}

/// Simulate from `begin` awake until alertness falls to `lower`, then asleep
/// until it rises to `upper`.
pub fn find_a_sleep_episode(
    begin: usize,
    end: usize,
    lower: f64,
    upper: f64,
    sw: f64,
    t_delta: f64,
    c: &[f64],
) -> EpisodeSearch {
    let (mut tw, mut ts) = (0.0, 0.0);
    let mut awake = true;
    let mut sleep_idx = 0;
    let (mut h, mut ss) = (0.0, 0.0);
    for idx in begin..end.min(c.len()) {
        if awake {
            h = homeostatic_awake(tw, sw);
            tw += t_delta;
            ss = h;
        } else {
            h = homeostatic_sleep(ts, ss);
            ts += t_delta;
        }
        let a = h + c[idx];
        if a <= lower && awake {
            sleep_idx = idx;
            awake = false;
        }
        if a >= upper && !awake {
            return EpisodeSearch {
                awake: true,
                h,
                sleep_idx,
                idx,
            };
        }
    }
    EpisodeSearch {
        awake,
        h,
        sleep_idx,
        idx: end,
    }
}

/// Positional accessors on a [`SleepChain`]
pub(crate) trait ChainExt {
    fn from_back(&self, n: usize) -> f64;

    fn wake_idx(&self) -> f64 {
        self.from_back(1)
    }

    fn sleep_idx(&self) -> f64 {
        self.from_back(2)
    }

    fn last_h(&self) -> f64 {
        self.from_back(3)
    }

    /// Wake index of the previous placed sleep
    fn prev_wake_idx(&self) -> f64 {
        self.from_back(6)
    }

    /// Hours between the last sleep index and wake index
    fn sleep_hours(&self, t_delta: f64) -> f64 {
        (self.wake_idx() - self.sleep_idx()) * t_delta
    }
}

impl ChainExt for [f64] {
    fn from_back(&self, n: usize) -> f64 {
        self.len()
            .checked_sub(n)
            .and_then(|i| self.get(i))
            .copied()
            .unwrap_or(f64::NAN)
    }
}

/// Extend every chain by one more sleep episode.
///
/// Only chains that end awake with a homeostatic level of at least 13 are
/// kept. Parameters form the outer loop.
pub fn find_next_sleep_episode(
    chains: &[SleepChain],
    end: usize,
    t_delta: f64,
    c: &[f64],
    params: &[(f64, f64)],
) -> Vec<SleepChain> {
    let mut out = Vec::new();
    for &(lower, upper) in params {
        for chain in chains {
            let begin = chain.wake_idx().max(0.0) as usize;
            let found = find_a_sleep_episode(begin, end, lower, upper, chain.last_h(), t_delta, c);
            if found.awake && found.h >= 13.0 {
                let mut next = chain.clone();
                next.extend([lower, upper, found.h, found.sleep_idx as f64, found.idx as f64]);
                out.push(next);
            }
        }
    }
    out
}

/// Arithmetic mean, `NaN` for an empty iterator
pub(crate) fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, n) = values.into_iter().fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_homeostatic_components() {
        assert!((homeostatic_awake(0.0, 14.0) - 14.0).abs() < 1e-12);
        assert!(homeostatic_awake(16.0, 14.0) < 14.0);
        // linear branch below the break level
        let expected = 5.0 + 2.0 * 0.3813 * 2.1;
        assert!((homeostatic_sleep(2.0, 5.0) - expected).abs() < 1e-9);
        // continuous at the break point
        let tb = (12.2 - 5.0) / (0.3813 * 2.1);
        assert!((homeostatic_sleep(tb + 1e-9, 5.0) - 12.2).abs() < 1e-6);
        assert!(homeostatic_sleep(30.0, 5.0) < 14.3);
        assert!((homeostatic_nap(0.0, 10.0) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_circadian_peaks_at_phase() {
        assert!((circadian(16.2, 16.2) - 2.5).abs() < 1e-12);
        assert!((circadian(4.2, 16.2) + 2.5).abs() < 1e-12);
        assert!((circadian_with(16.2, 16.2, 1.0, 0.5) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_linspace() {
        assert_eq!(linspace(7.0, 9.0, 5), vec![7.0, 7.5, 8.0, 8.5, 9.0]);
        assert_eq!(linspace(3.0, 5.0, 1), vec![3.0]);
        assert!(linspace(3.0, 5.0, 0).is_empty());
        assert!(linspace(3.0, 5.0, -2).is_empty());
    }

    #[test]
    fn test_arange() {
        assert_eq!(arange(0.0, 2.0, 0.5), vec![0.0, 0.5, 1.0, 1.5]);
        assert!(arange(2.0, 2.0, 0.5).is_empty());
    }

    #[test]
    fn test_threshold_grid_order() {
        let grid = threshold_grid(&[6.0, 7.0], &[11.0, 12.0]);
        assert_eq!(grid, vec![(6.0, 11.0), (6.0, 12.0), (7.0, 11.0), (7.0, 12.0)]);
        let grid = phase_threshold_grid(&linspace(7.0, 9.0, 11), &[12.0], &[15.0, 16.0]);
        assert_eq!(grid.len(), 22);
        assert_eq!(grid[2], (7.2, 12.0, 15.0));
    }

    #[test]
    fn test_linear_interpolate_extrapolates() {
        let out = linear_interpolate(&[0.0, 1.0, 2.0], &[0.0, 10.0, 20.0], &[-1.0, 0.5, 1.5, 3.0]).unwrap();
        assert_eq!(out, vec![-10.0, 5.0, 15.0, 30.0]);
        assert!(linear_interpolate(&[0.0], &[1.0], &[0.0]).is_err());
    }

    #[test]
    fn test_interpolate_nan_fills_gaps() {
        let out = interpolate_nan(&[1.0, f64::NAN, 3.0, f64::NAN]).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_nan_runs() {
        let n = f64::NAN;
        assert_eq!(nan_runs(&[1.0, n, n, 2.0, n, 3.0, n, n]), vec![(1, 2), (4, 4), (6, 7)]);
        assert!(nan_runs(&[1.0, 2.0]).is_empty());
    }

    #[test]
    fn test_time_indexes_insertion_points() {
        let range = datetime_range(at(0, 0), at(2, 0), 10);
        assert_eq!(range.len(), 12);
        let idx = time_indexes(&range, [at(1, 0), at(1, 5), at(3, 0)], Duration::zero());
        assert_eq!(idx, vec![6, 7, 12]);
        let idx = time_indexes(&range, [at(1, 0)], -awake_offset());
        assert_eq!(idx, vec![3]);
    }

    #[test]
    fn test_set_initial_datetime() {
        assert_eq!(set_initial_datetime(at(16, 0)), at(8, 0));
        assert_eq!(set_initial_datetime(at(6, 20)), at(5, 50));
        assert_eq!(set_initial_datetime(at(7, 0)), at(6, 30));
        // 5.5 + 0.2 * 10 = 7.5
        assert_eq!(set_initial_datetime(at(10, 0)), at(7, 30));
        // 5.5 + 0.2 * 12.5 = 8.0
        assert_eq!(set_initial_datetime(at(12, 30)), at(8, 0));
    }

    #[test]
    fn test_find_a_sleep_episode_sleeps_and_wakes() {
        let c: Vec<f64> = offsets(96, 0.5).map(|t| circadian(t % 24.0, 16.2)).collect();
        let found = find_a_sleep_episode(0, c.len(), 7.0, 13.0, 14.0, 0.5, &c);
        assert!(found.awake);
        assert!(found.sleep_idx > 0);
        assert!(found.idx > found.sleep_idx);
        assert!(found.h + c[found.idx] >= 13.0);
    }

    #[test]
    fn test_find_a_sleep_episode_runs_out() {
        let c = vec![0.0; 4];
        let found = find_a_sleep_episode(0, 4, -100.0, 100.0, 14.0, 0.5, &c);
        assert!(found.awake);
        assert_eq!(found.idx, 4);
    }

    #[test]
    fn test_find_next_sleep_episode_extends_chains() {
        let c: Vec<f64> = offsets(144, 0.5).map(|t| circadian(t % 24.0, 16.2)).collect();
        let first = find_a_sleep_episode(0, c.len(), 7.0, 13.0, 14.0, 0.5, &c);
        let chain = vec![7.0, 13.0, first.h, first.sleep_idx as f64, first.idx as f64];
        let next = find_next_sleep_episode(&[chain.clone()], c.len(), 0.5, &c, &[(7.0, 13.0)]);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].len(), 10);
        assert_eq!(&next[0][..5], chain.as_slice());
        assert!(next[0].sleep_idx() > chain.wake_idx());
        assert_eq!(next[0].prev_wake_idx(), chain.wake_idx());
    }

    #[test]
    fn test_round_to_is_half_even() {
        assert_eq!(round_to(0.125, 2), 0.12);
        assert_eq!(round_to(7.2, 2), 7.2);
        assert_eq!(round_to(12.25, 1), 12.2);
    }
}
