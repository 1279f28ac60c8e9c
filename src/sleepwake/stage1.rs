//! Stage 1: traces over duty blocks
//!
//! Lays out the simulation timeline. Each duty block gets a 10 minute trace
//! from the assumed wake-up to half an hour after the last commute; blocks
//! with several duties search a sleep episode between every pair of
//! consecutive duties. Samples between blocks are left as NaN for the later
//! stages to fill.

use chrono::{Duration, NaiveDateTime, NaiveTime};
use tracing::debug;

use crate::error::ComputeError;
use crate::sleepwake::model::{
    awake_offset, circadian, circadian_with, datetime_range, hour_decimal, homeostatic_awake, homeostatic_nap,
    homeostatic_sleep, linear_wake_time, linspace, midnight, offsets, phase_threshold_grid, set_initial_datetime,
    time_indexes, arange, awake_time, CIRCADIAN_LENGTH, INITIAL_PHASE, INITIAL_SLEEP, INTERVAL_MINUTES,
    LONG_SLEEP_HOURS, N_DELTA, PERCENT_DELTA, SAMPLES_PER_DAY, SHORT_SLEEP_HOURS, TIME_DELTA,
};
use crate::sleepwake::types::{DutyRow, DutySpan, RsDuty, SimulationConfig, SleepEpisode, Stage1Trace};

/// Homeostatic level assumed on waking without a nap
const FRESH_SW: f64 = 14.0;
/// Homeostatic level on waking before an afternoon duty
const NAP_SW: f64 = 13.9;
/// Samples from 22:00 to midnight
const NIGHT_SAMPLES: usize = 12;

/// Fallback `(lowers, uppers)` linspace arguments, tried in order
const FALLBACK_GRIDS: [((f64, f64, i64), (f64, f64, i64)); 4] = [
    ((6.0, 10.0, 17), (10.0, 14.0, 17)),
    ((6.0, 9.0, 13), (9.0, 13.0, 17)),
    ((8.0, 11.0, 13), (11.0, 14.0, 13)),
    ((6.0, 9.5, 15), (9.5, 14.0, 19)),
];

/// Homeostatic and circadian prefix of a pre-duty nap
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Nap {
    pub homeostatics: Vec<f64>,
    pub circadians: Vec<f64>,
}

impl Nap {
    pub fn len(&self) -> usize {
        self.homeostatics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.homeostatics.is_empty()
    }
}

/// Stage 1 calculator
pub struct Stage1Calculator;

impl Stage1Calculator {
    /// Build the duty-block traces for every span in order
    pub fn calculate(
        rows: &[DutyRow],
        spans: &[DutySpan],
        config: &SimulationConfig,
    ) -> Result<Stage1Trace, ComputeError> {
        let first = spans
            .first()
            .ok_or_else(|| ComputeError::Internal("no duties to simulate".to_string()))?;
        let mut trace = Stage1Trace::default();

        // Night before the first duty
        let initial = set_initial_datetime(first.commute_begin);
        let range = datetime_range(midnight(initial), initial, INTERVAL_MINUTES);
        let n = range.len();
        trace.homeostatics.extend(initial_homeostatics(n, initial, first.commute_begin));
        trace
            .circadians
            .extend(offsets(n, TIME_DELTA).map(|t| circadian(t % CIRCADIAN_LENGTH, INITIAL_PHASE)));
        trace.datetime_range.extend(range);

        let mut last_phase = INITIAL_PHASE;
        let mut end = initial;
        for (idx, span) in spans.iter().enumerate() {
            let block: Vec<&DutyRow> = rows.iter().filter(|r| r.duty_id == span.duty_id).collect();
            let (begin, nap) = set_initial_datetime_with_nap(span.commute_begin, idx)?;
            end = span.commute_end + awake_offset();
            let range = datetime_range(begin, end, INTERVAL_MINUTES);

            let (c, h, start_phase) = if span.row_count <= 1 {
                let (c, h) = single_duty(range.len(), begin, &nap, last_phase);
                (c, h, last_phase)
            } else {
                let (c, h, episodes) = process_consecutive_duty(&block, idx, config)?;
                let start_phase = episodes.first().map_or(last_phase, |e| e.phase);
                last_phase = episodes.last().map_or(last_phase, |e| e.phase);
                (c, h, start_phase)
            };
            if c.len() != range.len() || h.len() != range.len() {
                return Err(ComputeError::Internal(format!(
                    "block {idx} trace has {} samples for {} instants",
                    h.len(),
                    range.len()
                )));
            }
            let rs = RsDuty::from_traces(start_phase, last_phase, &c, &h)
                .ok_or_else(|| ComputeError::Internal(format!("block {idx} has an empty trace")))?;
            debug!(block = idx, duties = span.row_count, samples = h.len(), phase = last_phase, "simulated duty block");
            trace.rs_duties.push(rs);
            trace.circadians.extend(c);
            trace.homeostatics.extend(h);
            trace.datetime_range.extend(range);

            if let Some(next) = spans.get(idx + 1) {
                let gap = datetime_range(end, set_initial_datetime(next.commute_begin), N_DELTA * INTERVAL_MINUTES);
                trace.circadians.extend(std::iter::repeat(f64::NAN).take(gap.len()));
                trace.homeostatics.extend(std::iter::repeat(f64::NAN).take(gap.len()));
                trace.datetime_range.extend(gap);
            }
        }

        if spans.len() == 1 {
            // Rest of the day after a single block
            let range = datetime_range(end, midnight(end) + Duration::days(1), INTERVAL_MINUTES);
            let n = range.len();
            let last_time = hour_decimal(end);
            let last_h = trace.homeostatics.last().copied().unwrap_or(FRESH_SW);
            trace
                .circadians
                .extend(offsets(n, TIME_DELTA).map(|t| circadian(t % CIRCADIAN_LENGTH, last_phase - last_time)));
            trace.homeostatics.extend(trailing_day(n, end, last_h));
            trace.datetime_range.extend(range);
        }

        trace.alertnesses = trace
            .circadians
            .iter()
            .zip(&trace.homeostatics)
            .map(|(c, h)| c + h)
            .collect();
        Ok(trace)
    }
}

/// Homeostatic trace from midnight up to the first wake-up
fn initial_homeostatics(n: usize, initial: NaiveDateTime, first_begin: NaiveDateTime) -> Vec<f64> {
    if initial.date() == first_begin.date() {
        let shift = INITIAL_SLEEP - hour_decimal(initial);
        return offsets(n, TIME_DELTA)
            .map(|t| homeostatic_sleep(t + shift, INITIAL_SLEEP))
            .collect();
    }
    let mut h: Vec<f64> = Vec::with_capacity(n);
    for t in offsets(n, TIME_DELTA) {
        let value = if t < 7.0 {
            homeostatic_sleep(t, 10.0)
        } else if t < 20.0 {
            homeostatic_awake(t - 7.0, h.last().copied().unwrap_or(10.0))
        } else {
            homeostatic_sleep(t - 20.0, 10.0)
        };
        h.push(value);
    }
    h
}

/// Awake trace of a block with a single duty
fn single_duty(n: usize, begin: NaiveDateTime, nap: &Nap, phase: f64) -> (Vec<f64>, Vec<f64>) {
    let sw = nap.homeostatics.last().copied().unwrap_or(FRESH_SW);
    let mut h: Vec<f64> = nap.homeostatics.iter().copied().take(n).collect();
    h.extend(offsets(n - h.len(), TIME_DELTA).map(|t| homeostatic_awake(t, sw)));
    let begin_time = hour_decimal(begin);
    let c = offsets(n, TIME_DELTA)
        .map(|t| circadian(t % CIRCADIAN_LENGTH, phase - begin_time))
        .collect();
    (c, h)
}

/// Homeostatic trace from the end of the only block to midnight.
///
/// An arrival before 09:00 sleeps first, stays up until 22:00 and sleeps
/// again; a later arrival stays awake.
fn trailing_day(n: usize, end: NaiveDateTime, last_h: f64) -> Vec<f64> {
    let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default();
    if end.time() >= nine {
        return offsets(n, TIME_DELTA).map(|t| homeostatic_awake(t, last_h)).collect();
    }
    let last_time = hour_decimal(end);
    let sleep_len = (9.0 - last_time).max(2.0);
    let sleep_n = arange(0.0, sleep_len, TIME_DELTA).len().min(n);
    let bedtime = n.saturating_sub(NIGHT_SAMPLES).max(sleep_n);

    let mut h: Vec<f64> = offsets(sleep_n, TIME_DELTA).map(|t| homeostatic_sleep(t, last_h)).collect();
    let woke = h.last().copied().unwrap_or(last_h);
    h.extend((1..=bedtime - sleep_n).map(|i| homeostatic_awake(i as f64 * TIME_DELTA, woke)));
    let tired = h.last().copied().unwrap_or(woke);
    h.extend(offsets(n - bedtime, TIME_DELTA).map(|t| homeostatic_sleep(t, tired)));
    h
}

/// Simulate a nap before an afternoon duty.
///
/// The nap starts at `0.25 * t_end + 6.25` and lasts until the nap recovery
/// meets the inverted low-amplitude circadian threshold.
pub fn find_a_nap(t_begin: f64, t_end: f64, t_delta: f64, phase: f64, sw: f64) -> Option<Nap> {
    let num = ((t_end - t_begin) / t_delta + 1.0) as i64;
    let times = linspace(t_begin, t_end, num);
    let rel_phase = phase - t_begin;
    let circadians: Vec<f64> = times.iter().map(|&t| circadian(t - t_begin, rel_phase)).collect();
    let threshold: Vec<f64> = times
        .iter()
        .map(|&t| sw - circadian_with(t - t_begin, rel_phase, 0.0, 0.5))
        .collect();
    let hw: Vec<f64> = times.iter().map(|&t| homeostatic_awake(t - t_begin, sw)).collect();

    let nap_begin = 0.25 * t_end + 6.25;
    let begin_idx = times.iter().position(|&t| t >= nap_begin)?;
    let ss = hw[begin_idx];
    let hs: Vec<f64> = times
        .iter()
        .map(|&t| if t < nap_begin { f64::NAN } else { homeostatic_nap(t - nap_begin, ss) })
        .collect();
    let end_idx = hs.iter().zip(&threshold).position(|(h, th)| h >= th)?;

    let mut homeostatics = hw[..begin_idx].to_vec();
    homeostatics.extend_from_slice(&hs[begin_idx..end_idx]);
    Some(Nap {
        homeostatics,
        circadians: circadians[..end_idx].to_vec(),
    })
}

/// Assumed wake-up before a block, with a nap before afternoon duties
pub fn set_initial_datetime_with_nap(begin: NaiveDateTime, block: usize) -> Result<(NaiveDateTime, Nap), ComputeError> {
    let time = begin.time();
    if time >= NaiveTime::from_hms_opt(15, 0, 0).unwrap_or_default() {
        let initial = midnight(begin) + Duration::hours(8);
        let nap = find_a_nap(8.0, hour_decimal(begin), TIME_DELTA, INITIAL_PHASE, NAP_SW)
            .ok_or_else(|| ComputeError::unsolvable(block, "nap", "nap never reaches the wake threshold"))?;
        Ok((initial, nap))
    } else if time <= awake_time() {
        Ok((begin - awake_offset(), Nap::default()))
    } else {
        Ok((linear_wake_time(begin), Nap::default()))
    }
}

/// Run `search` over the default grid, then over at most
/// `max_grid_escalations` fallback grids (never more than four) until one
/// yields an episode.
fn search_with_fallbacks(
    mut search: impl FnMut(&[(f64, f64, f64)]) -> Vec<SleepEpisode>,
    default_grid: &[(f64, f64, f64)],
    max_grid_escalations: usize,
    block_idx: usize,
    gap: usize,
) -> Result<Vec<SleepEpisode>, ComputeError> {
    let max_escalations = max_grid_escalations.min(FALLBACK_GRIDS.len());
    let mut results = search(default_grid);
    let mut escalation = 0;
    while results.is_empty() && escalation < max_escalations {
        let ((l0, l1, ln), (u0, u1, un)) = FALLBACK_GRIDS[escalation];
        escalation += 1;
        debug!(block = block_idx, gap, escalation, "no sleep episode found, widening threshold grid");
        let grid = phase_threshold_grid(&linspace(l0, l1, ln), &linspace(u0, u1, un), &linspace(15.0, 17.0, 11));
        results = search(&grid);
    }
    if results.is_empty() {
        return Err(ComputeError::unsolvable(
            gap,
            format!("block {block_idx} fallback {escalation}"),
            "no sleep episode between consecutive duties",
        ));
    }
    Ok(results)
}

/// Simulate a block of consecutive duties, choosing one sleep episode per
/// rest between duties.
///
/// Returns the circadian and homeostatic traces from the block wake-up to
/// half an hour after the last commute, and the chosen episodes.
pub fn process_consecutive_duty(
    block: &[&DutyRow],
    block_idx: usize,
    config: &SimulationConfig,
) -> Result<(Vec<f64>, Vec<f64>, Vec<SleepEpisode>), ComputeError> {
    let empty = || ComputeError::Internal(format!("block {block_idx} has no duties"));
    let first = block.first().ok_or_else(empty)?;
    let (initial, nap) = set_initial_datetime_with_nap(first.commute_begin, block_idx)?;
    let earliest = block.iter().map(|r| r.commute_begin).min().ok_or_else(empty)?.min(initial);
    let latest = block.iter().map(|r| r.commute_end).max().ok_or_else(empty)?;
    let range = datetime_range(
        midnight(earliest),
        midnight(latest + awake_offset()) + Duration::days(1),
        INTERVAL_MINUTES,
    );

    let mut begin_awake = time_indexes(&range, block.iter().map(|r| r.commute_begin), -awake_offset());
    begin_awake[0] = time_indexes(&range, [initial], Duration::zero())[0] + nap.len();
    let end_awake = time_indexes(&range, block.iter().map(|r| r.commute_end), awake_offset());

    let default_grid = phase_threshold_grid(
        &linspace(7.0, 9.0, 11),
        &linspace(12.0, 14.0, 11),
        &linspace(15.0, 17.0, 11),
    );

    let mut sw = nap.homeostatics.last().copied().unwrap_or(FRESH_SW);
    let mut phase: Option<f64> = None;
    let mut sleep_begin: Option<usize> = None;
    let mut begin_idx = begin_awake[0];
    let mut episodes: Vec<SleepEpisode> = Vec::with_capacity(block.len().saturating_sub(1));

    for gap in 0..block.len() - 1 {
        let end_idx = end_awake[gap];
        let next_idx = begin_awake[gap + 1];
        let transition = block[gap].duty_type != block[gap + 1].duty_type;
        let search = |grid: &[(f64, f64, f64)]| -> Vec<SleepEpisode> {
            grid.iter()
                .filter_map(|&(l, u, p)| find_sleep_episodes(begin_idx, end_idx, next_idx, l, u, p, sw))
                .collect()
        };

        let results = search_with_fallbacks(search, &default_grid, config.max_grid_escalations, block_idx, gap)?;
        let chosen = select_params(results, phase.unwrap_or(0.0), sleep_begin, transition, gap, config)?;
        if chosen.circadians.is_empty() {
            return Err(ComputeError::unsolvable(
                gap,
                format!("block {block_idx}"),
                "no candidate survived the similarity filters",
            ));
        }
        phase = Some(chosen.phase);
        sleep_begin = Some(chosen.sleep_start);
        begin_idx = chosen.sleep_end;
        sw = chosen.homeostatic;
        episodes.push(chosen);
    }

    let mut circadians: Vec<f64> = episodes.iter().flat_map(|e| e.circadians.iter().copied()).collect();
    let mut homeostatics: Vec<f64> = episodes.iter().flat_map(|e| e.homeostatics.iter().copied()).collect();

    // Awake from the last sleep until after the final duty
    let final_idx = end_awake.last().copied().unwrap_or(begin_idx);
    let sleep_end = episodes.last().map_or(begin_idx, |e| e.sleep_end);
    let sw = homeostatics.last().copied().unwrap_or(sw);
    let initial_time = sleep_end as f64 * TIME_DELTA;
    let phase = phase.unwrap_or(0.0);
    let n = final_idx.saturating_sub(sleep_end);
    homeostatics.extend(offsets(n, TIME_DELTA).map(|t| homeostatic_awake(t, sw)));
    circadians.extend(offsets(n, TIME_DELTA).map(|t| circadian(t % CIRCADIAN_LENGTH, phase - initial_time)));

    if !nap.is_empty() {
        homeostatics.splice(0..0, nap.homeostatics.iter().copied());
        circadians.splice(0..0, nap.circadians.iter().copied());
    }
    Ok((circadians, homeostatics, episodes))
}

/// Simulate from `begin` to `next` with fixed thresholds and phase.
///
/// The crew stays awake through the duty up to `end`, then sleeps when
/// alertness drops to `lower` and wakes when it rises to `upper`. Returns
/// the episode ending at the last wake-up, or `None` if they never woke.
pub fn find_sleep_episodes(
    begin: usize,
    end: usize,
    next: usize,
    lower: f64,
    upper: f64,
    phase: f64,
    sw: f64,
) -> Option<SleepEpisode> {
    let initial_time = begin as f64 * TIME_DELTA;
    let mut sw = sw;
    let (mut tw, mut ts, mut ss) = (0.0, 0.0, 0.0);
    let mut awake = true;
    let (mut sleep_start, mut sleep_end) = (0, 0);
    let n = next.saturating_sub(begin);
    let mut circadians = Vec::with_capacity(n);
    let mut homeostatics = Vec::with_capacity(n);

    for idx in begin..next {
        let t = (idx - begin) as f64 * TIME_DELTA;
        let c = circadian(t % CIRCADIAN_LENGTH, phase - initial_time);
        let h = if idx <= end {
            let h = homeostatic_awake(tw, sw);
            tw += TIME_DELTA;
            h
        } else {
            let h = if awake {
                let h = homeostatic_awake(tw, sw);
                tw += TIME_DELTA;
                ss = h;
                ts = 0.0;
                h
            } else {
                let h = homeostatic_sleep(ts, ss);
                ts += TIME_DELTA;
                sw = h;
                tw = 0.0;
                h
            };
            let a = h + c;
            if a <= lower && awake {
                sleep_start = idx;
                awake = false;
            }
            if a >= upper && !awake {
                sleep_end = idx;
                awake = true;
            }
            h
        };
        circadians.push(c);
        homeostatics.push(h);
    }

    if sleep_end == 0 {
        return None;
    }
    let keep = sleep_end - begin;
    circadians.truncate(keep);
    homeostatics.truncate(keep);
    let homeostatic = *homeostatics.last()?;
    let alertness = circadians.last()? + homeostatic;
    Some(SleepEpisode {
        lower,
        upper,
        phase,
        sleep_start,
        sleep_end,
        homeostatic,
        alertness,
        circadians,
        homeostatics,
    })
}

/// Choose one sleep episode among the grid results.
///
/// Candidates are narrowed by plausible sleep length, then (once a previous
/// phase is known) by phase and sleep-start similarity to the previous
/// rest. The most alert remaining candidate wins; an empty set yields the
/// default episode.
pub fn select_params(
    results: Vec<SleepEpisode>,
    phase: f64,
    prev_idx: Option<usize>,
    transition: bool,
    gap: usize,
    config: &SimulationConfig,
) -> Result<SleepEpisode, ComputeError> {
    if results.is_empty() {
        return Ok(SleepEpisode::default());
    }

    let min_size = if results.len() > 11 { 10 } else { 1 };
    let mut results = widen_until(results, 0.0, "sleep length", gap, config, |e, p| {
        let length = (e.sleep_end as f64 - e.sleep_start as f64) * TIME_DELTA;
        length > SHORT_SLEEP_HOURS * (1.0 - p) && length < LONG_SLEEP_HOURS * (1.0 + p)
    }, |_, kept| kept >= min_size)?;
    if results.is_empty() {
        return Ok(SleepEpisode::default());
    }

    if phase != 0.0 {
        results = widen_until(results, PERCENT_DELTA, "phase similarity", gap, config, |e, p| {
            e.phase >= phase * (1.0 - p) && e.phase <= phase * (1.0 + p)
        }, |p, kept| if transition { p > 0.15 } else { p > 0.02 && kept > 0 })?;

        let anchor = prev_idx.map(|i| i as f64 + SAMPLES_PER_DAY as f64);
        results = widen_until(results, PERCENT_DELTA, "sleep start similarity", gap, config, |e, p| {
            anchor.is_some_and(|a| {
                let (lo, hi) = ((a * (1.0 - p)) as i64, (a * (1.0 + p)) as i64);
                let start = e.sleep_start as i64;
                start > lo && start < hi
            })
        }, |p, kept| if transition { p > 0.20 } else { kept > 0 })?;

        if results.len() > 50 {
            results = phase_equality_filter(results, phase);
        }
    }

    Ok(results
        .into_iter()
        .reduce(|best, e| if e.alertness > best.alertness { e } else { best })
        .unwrap_or_default())
}

/// Re-apply `keep` with a growing tolerance until `stop` accepts the count
fn widen_until<K, S>(
    results: Vec<SleepEpisode>,
    start: f64,
    name: &str,
    gap: usize,
    config: &SimulationConfig,
    keep: K,
    stop: S,
) -> Result<Vec<SleepEpisode>, ComputeError>
where
    K: Fn(&SleepEpisode, f64) -> bool,
    S: Fn(f64, usize) -> bool,
{
    let mut percent = start;
    for _ in 0..config.max_filter_steps {
        let kept: Vec<bool> = results.iter().map(|e| keep(e, percent)).collect();
        let count = kept.iter().filter(|&&k| k).count();
        percent += PERCENT_DELTA;
        if stop(percent, count) {
            return Ok(results
                .into_iter()
                .zip(kept)
                .filter_map(|(e, k)| k.then_some(e))
                .collect());
        }
    }
    debug!(gap, filter = name, steps = config.max_filter_steps, "filter did not converge");
    Err(ComputeError::unsolvable(gap, "selection", format!("{name} filter did not converge")))
}

/// Keep the episodes with exactly the previous phase, or the nearest phase
pub fn phase_equality_filter(results: Vec<SleepEpisode>, phase: f64) -> Vec<SleepEpisode> {
    let target = if results.iter().any(|e| e.phase == phase) {
        phase
    } else {
        let mut distinct: Vec<f64> = Vec::new();
        for e in &results {
            if !distinct.contains(&e.phase) {
                distinct.push(e.phase);
            }
        }
        distinct
            .into_iter()
            .reduce(|best, p| if (p - phase).abs() < (best - phase).abs() { p } else { best })
            .unwrap_or(phase)
    };
    results.into_iter().filter(|e| e.phase == target).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::tests::make_test_request;
    use crate::sleepwake::preprocess::Preprocessor;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn episode(phase: f64, sleep_start: usize, sleep_end: usize, alertness: f64) -> SleepEpisode {
        SleepEpisode {
            phase,
            sleep_start,
            sleep_end,
            alertness,
            circadians: vec![0.0],
            homeostatics: vec![0.0],
            ..SleepEpisode::default()
        }
    }

    #[test]
    fn test_initial_datetime_with_nap() {
        let (initial, nap) = set_initial_datetime_with_nap(at(1, 6, 0), 0).unwrap();
        assert_eq!(initial, at(1, 5, 30));
        assert!(nap.is_empty());

        let (initial, nap) = set_initial_datetime_with_nap(at(1, 10, 0), 0).unwrap();
        assert_eq!(initial, at(1, 7, 30));
        assert!(nap.is_empty());

        let (initial, nap) = set_initial_datetime_with_nap(at(1, 16, 0), 0).unwrap();
        assert_eq!(initial, at(1, 8, 0));
        assert!(!nap.is_empty());
        assert_eq!(nap.homeostatics.len(), nap.circadians.len());
    }

    #[test]
    fn test_find_a_nap_starts_on_schedule() {
        let nap = find_a_nap(8.0, 16.0, TIME_DELTA, INITIAL_PHASE, NAP_SW).unwrap();
        // nap begins at 0.25 * 16 + 6.25 = 10.25, the 14th sample after 08:00
        let begin = 14;
        assert!(nap.len() > begin + 1);
        let awake = |i: usize| homeostatic_awake(i as f64 * TIME_DELTA, NAP_SW);
        assert!((nap.homeostatics[0] - NAP_SW).abs() < 1e-12);
        assert!((nap.homeostatics[begin - 1] - awake(begin - 1)).abs() < 1e-9);
        // the nap starts from the awake level five minutes before the sample
        assert!(nap.homeostatics[begin] > awake(begin));
        assert!(nap.homeostatics[begin + 1] > nap.homeostatics[begin]);
    }

    #[test]
    fn test_find_sleep_episodes_truncates_at_wake() {
        // awake 08:00 to 18:00 then free until 08:00 the next day
        let episode = find_sleep_episodes(48, 108, 192, 8.0, 11.0, 16.0, 14.0).unwrap();
        assert!(episode.sleep_start > 108);
        assert!(episode.sleep_end > episode.sleep_start);
        assert_eq!(episode.circadians.len(), episode.sleep_end - 48);
        assert_eq!(episode.homeostatics.len(), episode.circadians.len());
        assert!((episode.alertness - (episode.homeostatic + episode.circadians[episode.circadians.len() - 1])).abs() < 1e-12);
    }

    fn default_grid() -> Vec<(f64, f64, f64)> {
        phase_threshold_grid(&linspace(7.0, 9.0, 11), &linspace(12.0, 14.0, 11), &linspace(15.0, 17.0, 11))
    }

    #[test]
    fn test_fallback_grids_capped_at_four() {
        let mut sizes = Vec::new();
        let err = search_with_fallbacks(
            |grid| {
                sizes.push(grid.len());
                Vec::new()
            },
            &default_grid(),
            10,
            2,
            1,
        )
        .unwrap_err();
        // default grid, then the four fallbacks and nothing more
        assert_eq!(sizes, vec![1331, 3179, 2431, 1859, 3135]);
        match err {
            ComputeError::SimulationUnsolvable { gap, grid, .. } => {
                assert_eq!(gap, 1);
                assert_eq!(grid, "block 2 fallback 4");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_no_fallback_grids_is_unsolvable() {
        let mut calls = 0;
        let err = search_with_fallbacks(
            |_| {
                calls += 1;
                Vec::new()
            },
            &default_grid(),
            0,
            0,
            0,
        )
        .unwrap_err();
        assert_eq!(calls, 1);
        assert!(matches!(err, ComputeError::SimulationUnsolvable { .. }));
        assert_eq!(err.error_number(), 1004);
    }

    #[test]
    fn test_fallback_stops_at_first_hit() {
        let mut calls = 0;
        let results = search_with_fallbacks(
            |_| {
                calls += 1;
                if calls == 3 {
                    vec![SleepEpisode::default()]
                } else {
                    Vec::new()
                }
            },
            &default_grid(),
            4,
            0,
            0,
        )
        .unwrap();
        assert_eq!(calls, 3);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn test_find_sleep_episodes_none_without_wake() {
        assert!(find_sleep_episodes(48, 108, 120, 8.0, 30.0, 16.0, 14.0).is_none());
    }

    #[test]
    fn test_select_params_empty_yields_default() {
        let chosen = select_params(Vec::new(), 0.0, None, false, 0, &SimulationConfig::default()).unwrap();
        assert_eq!(chosen, SleepEpisode::default());
    }

    #[test]
    fn test_select_params_filters_length_then_alertness() {
        // 36 samples = 6h is not strictly longer than 6h; 42 samples = 7h is
        let results = vec![episode(16.0, 100, 136, 20.0), episode(16.0, 100, 142, 10.0), episode(16.0, 100, 145, 12.0)];
        let chosen = select_params(results, 0.0, None, false, 0, &SimulationConfig::default()).unwrap();
        assert_eq!(chosen.sleep_end, 145);
    }

    #[test]
    fn test_select_params_prefers_similar_phase_and_start() {
        let results = vec![
            episode(15.0, 140, 190, 30.0),
            episode(16.0, 140, 190, 10.0),
            episode(16.0, 60, 110, 40.0),
        ];
        let chosen = select_params(results, 16.0, Some(0), false, 1, &SimulationConfig::default()).unwrap();
        assert_eq!(chosen.phase, 16.0);
        assert_eq!(chosen.sleep_start, 140);
    }

    #[test]
    fn test_select_params_filter_cap() {
        let results = vec![episode(16.0, 10, 50, 1.0)];
        let config = SimulationConfig {
            max_filter_steps: 2,
            ..SimulationConfig::default()
        };
        // two steps cannot widen the phase tolerance past 2%
        let err = select_params(results, 16.0, Some(0), false, 3, &config).unwrap_err();
        assert!(matches!(err, ComputeError::SimulationUnsolvable { gap: 3, .. }));
    }

    #[test]
    fn test_phase_equality_filter_nearest() {
        let results = vec![episode(15.0, 0, 1, 0.0), episode(16.4, 0, 1, 0.0), episode(16.6, 0, 1, 0.0)];
        let kept = phase_equality_filter(results, 16.45);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].phase, 16.4);
    }

    #[test]
    fn test_trailing_day_lengths() {
        let h = trailing_day(60, at(1, 14, 0), 12.0);
        assert_eq!(h.len(), 60);
        assert!(h[59] < h[0]);
        let h = trailing_day(100, at(1, 7, 20), 12.0);
        assert_eq!(h.len(), 100);
        // sleeping straight after arrival
        assert!(h[1] > h[0]);
    }

    #[test]
    fn test_trailing_day_evening_sleep_continues_awake_level() {
        let h = trailing_day(100, at(1, 7, 20), 12.0);
        // the 22:00 sleep starts at t = 0 from the last awake sample
        let bedtime = 100 - NIGHT_SAMPLES;
        assert_eq!(h[bedtime], h[bedtime - 1]);
        assert!((h[bedtime + 1] - homeostatic_sleep(TIME_DELTA, h[bedtime - 1])).abs() < 1e-12);
        assert!(h[bedtime - 1] < h[bedtime - 2]);
    }

    #[test]
    fn test_single_block_trace_is_consistent() {
        let request = make_test_request(&[1, 2, 3]);
        let rows = Preprocessor::prepare(&request, &[0.0; 3]).unwrap();
        let spans = DutySpan::from_rows(&rows);
        let trace = Stage1Calculator::calculate(&rows, &spans, &SimulationConfig::default()).unwrap();
        assert_eq!(trace.rs_duties.len(), 1);
        assert_eq!(trace.circadians.len(), trace.datetime_range.len());
        assert_eq!(trace.homeostatics.len(), trace.datetime_range.len());
        assert!(trace.alertnesses.iter().all(|a| a.is_finite()));
        // runs through midnight after the last duty
        assert_eq!(trace.datetime_range.last().copied(), Some(at(3, 23, 50)));
    }

    #[test]
    fn test_two_blocks_leave_nan_gap() {
        let mut request = make_test_request(&[1, 1]);
        request.start_date_local_time = Some(vec!["1/3/2024".into(), "5/3/2024".into()]);
        request.end_date_local_time = request.start_date_local_time.clone();
        let rows = Preprocessor::prepare(&request, &[0.0; 2]).unwrap();
        let spans = DutySpan::from_rows(&rows);
        let trace = Stage1Calculator::calculate(&rows, &spans, &SimulationConfig::default()).unwrap();
        assert_eq!(trace.rs_duties.len(), 2);
        let nan = trace.alertnesses.iter().filter(|a| a.is_nan()).count();
        // 17:20 on day 1 to 06:50 on day 5, every 30 minutes
        assert_eq!(nan, 3 * 48 + 27);
    }
}
