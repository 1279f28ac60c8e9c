//! Stage 3: sleeps during the rests between duty blocks
//!
//! Each rest is searched on its 30 minute grid. Candidate sleep chains are
//! grown one night at a time from grids of alertness thresholds and narrowed
//! by sleep length and bedtime, until a chain wakes on the last sample of
//! the rest.

use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use tracing::debug;

use crate::error::ComputeError;
use crate::sleepwake::model::{
    awake_offset, awake_time, datetime_range, find_a_sleep_episode, find_next_sleep_episode, gap_time_delta,
    homeostatic_awake, homeostatic_sleep, linspace, mean, round_to, threshold_grid, ChainExt, CIRCADIAN_LENGTH,
    INTERVAL_MINUTES, LONG_SLEEP_HOURS, N_DELTA, SHORT_SLEEP_HOURS,
};
use crate::sleepwake::types::{CircadianFill, DutySpan, SimulationConfig, SleepChain};

/// Homeostatic level expected on the final wake-up of a rest
const END_SW: f64 = 13.9;
/// Eight hours on the rest grid
const MIN_AWAKE_SAMPLES: usize = 16;
/// Hours awake required between two sleeps
const MIN_AWAKE_BETWEEN_SLEEPS: f64 = 5.0;

/// Stage 3 calculator
pub struct Stage3Calculator;

impl Stage3Calculator {
    /// Candidate sleep chains for every rest, in rest order
    pub fn calculate(
        range: &[NaiveDateTime],
        spans: &[DutySpan],
        gaps: &[(usize, usize)],
        fill: &CircadianFill,
        config: &SimulationConfig,
    ) -> Result<Vec<Vec<SleepChain>>, ComputeError> {
        gaps.iter()
            .enumerate()
            .map(|(idx, &(start, end))| {
                let (Some(span), Some(next), Some(c), Some(&last_sw)) = (
                    spans.get(idx),
                    spans.get(idx + 1),
                    fill.gap_circadians.get(idx),
                    fill.last_sw.get(idx),
                ) else {
                    return Err(ComputeError::Internal(format!("rest {idx} has no surrounding duty blocks")));
                };
                let rest = Rest {
                    gap: idx,
                    end: end - start + 1,
                    offset: start,
                    c,
                    range,
                    config,
                };
                let chains = rest.solve(span, next, last_sw)?;
                debug!(gap = idx, samples = rest.end, chains = chains.len(), "placed sleeps in rest");
                Ok(chains)
            })
            .collect()
    }
}

/// Number of nights spent between the end of one block and the start of
/// the next
pub fn number_of_nights(end: NaiveDateTime, begin: NaiveDateTime) -> Result<usize, ComputeError> {
    if begin <= end {
        return Err(ComputeError::Internal(format!("rest from {end} to {begin} is empty")));
    }
    let mut nights = (begin - end).num_days() as usize;
    if end.time() > begin.time() {
        nights += 1;
    }
    if end.time() < awake_time() {
        nights += 1;
    }
    Ok(nights)
}

/// Threshold grid from `(start, stop, num)` linspace arguments
fn grid(lowers: (f64, f64, i64), uppers: (f64, f64, i64)) -> Vec<(f64, f64)> {
    threshold_grid(
        &linspace(lowers.0, lowers.1, lowers.2),
        &linspace(uppers.0, uppers.1, uppers.2),
    )
}

/// Keep the matching chains, or all of them when none match
fn keep_if_any(chains: Vec<SleepChain>, keep: impl Fn(&SleepChain) -> bool) -> Vec<SleepChain> {
    if chains.iter().any(&keep) {
        chains.into_iter().filter(|c| keep(c)).collect()
    } else {
        chains
    }
}

/// Prefer chains whose last sleep lasts from 6 to 9 hours
fn sleep_length_filter(chains: Vec<SleepChain>) -> Vec<SleepChain> {
    keep_if_any(chains, |c| {
        let hours = c.sleep_hours(gap_time_delta());
        (SHORT_SLEEP_HOURS..=LONG_SLEEP_HOURS).contains(&hours)
    })
}

fn minutes_of_day(hour: u32, minute: u32) -> u32 {
    hour * 60 + minute
}

/// Accepted bedtimes, in minutes after midnight
#[derive(Debug, Clone, Copy, PartialEq)]
struct BedtimeWindow {
    min: u32,
    max: u32,
}

impl Default for BedtimeWindow {
    fn default() -> Self {
        Self {
            min: minutes_of_day(22, 0),
            max: minutes_of_day(23, 59),
        }
    }
}

impl BedtimeWindow {
    fn contains(&self, minutes: u32) -> bool {
        minutes >= self.min && minutes <= self.max
    }
}

/// One rest between duty blocks
struct Rest<'a> {
    gap: usize,
    /// Samples in the rest
    end: usize,
    /// Index of the first rest sample on the whole timeline
    offset: usize,
    c: &'a [f64],
    range: &'a [NaiveDateTime],
    config: &'a SimulationConfig,
}

impl Rest<'_> {
    fn solve(&self, span: &DutySpan, next: &DutySpan, last_sw: f64) -> Result<Vec<SleepChain>, ComputeError> {
        let last_min_awake = span.commute_duration + awake_offset() * 2;
        let commute_end = span.commute_end;
        let commute_begin = next.commute_begin;
        let nights = number_of_nights(commute_end, commute_begin)?;

        let short_day = last_min_awake < Duration::hours(6) && commute_end.time() < hm(8, 0);
        let mut params = if short_day {
            grid((8.0, 11.0, 7), (11.0, 14.0, 7))
        } else {
            grid((6.0, 9.0, 7), (11.0, 14.0, 7))
        };
        let sleeps = self.first_sleeps(&params, last_sw);

        if nights == 1 {
            return self.single_night(sleeps, last_sw);
        }

        let awake_hours = last_min_awake.num_seconds() as f64 / 3600.0;
        let dt = gap_time_delta();
        let mut sleeps = keep_if_any(sleeps, |s| s.sleep_idx() * dt <= CIRCADIAN_LENGTH - awake_hours);
        if nights == 2 {
            return self.two_sleep_wake(sleeps, &params);
        }

        params = grid((7.0, 9.0, 3), (12.0, 14.0, 3));
        let mut window = BedtimeWindow::default();
        for night in 1..=nights {
            if night + 1 >= nights {
                let mut lowers = (6.0, 9.0, 7);
                let mut uppers = (10.0, 14.0, 9);
                if mean(sleeps.iter().map(|s| self.end as f64 - s.wake_idx())) <= 45.0 {
                    lowers = (6.0, 10.0, 9);
                    uppers = (10.0, 14.0, 9);
                }
                if commute_begin.time() <= hm(4, 0) {
                    lowers = (7.0, 11.0, 9);
                    uppers = (10.0, 14.0, 9);
                }
                params = grid(lowers, uppers);
            } else if night + 2 >= nights {
                params = grid((6.0, 9.0, 7), (11.0, 14.0, 7));
            }

            let fixed = night >= 2 && night + 3 <= nights;
            if fixed {
                sleeps = self.fixed_sleeps(&sleeps)?;
                if sleeps.is_empty() {
                    return Err(ComputeError::unsolvable(self.gap, format!("night {night}"), "no fixed sleep"));
                }
                sleeps = sleep_length_filter(sleeps);
                sleeps = keep_if_any(sleeps, |s| self.bedtime(s).is_some_and(|t| window.contains(t)));
            } else {
                sleeps = self.extend_night(sleeps, &mut params, night, nights - night == 1)?;
                if night + 2 <= nights {
                    sleeps = sleep_length_filter(sleeps);
                    window = BedtimeWindow::default();
                    let bedtimes: Vec<u32> = sleeps
                        .iter()
                        .filter_map(|s| self.bedtime(s))
                        .filter(|&t| window.contains(t))
                        .collect();
                    if let (Some(&min), Some(&max)) = (bedtimes.iter().min(), bedtimes.iter().max()) {
                        sleeps.retain(|s| self.bedtime(s).is_some_and(|t| window.contains(t)));
                        window = BedtimeWindow { min, max };
                        if min == max {
                            window.max += (N_DELTA * INTERVAL_MINUTES) as u32;
                        }
                    }
                }
            }

            if night + 1 == nights {
                return self.final_night(sleeps, &params);
            }
        }

        if sleeps.is_empty() {
            return Err(ComputeError::unsolvable(self.gap, "rest", "no sleep chain left"));
        }
        Ok(sleeps)
    }

    /// One chain per threshold pair, starting awake at the rest start
    fn first_sleeps(&self, params: &[(f64, f64)], sw: f64) -> Vec<SleepChain> {
        params
            .iter()
            .map(|&(lower, upper)| {
                let found = find_a_sleep_episode(0, self.end, lower, upper, sw, gap_time_delta(), self.c);
                vec![lower, upper, found.h, found.sleep_idx as f64, found.idx as f64]
            })
            .collect()
    }

    fn find_next(&self, chains: &[SleepChain], params: &[(f64, f64)]) -> Vec<SleepChain> {
        find_next_sleep_episode(chains, self.end, gap_time_delta(), self.c, params)
    }

    fn wakes_at_end(&self, chains: &[SleepChain]) -> Vec<SleepChain> {
        let last = self.end as f64 - 1.0;
        chains.iter().filter(|c| c.wake_idx() == last).cloned().collect()
    }

    /// Hours left after the average last wake-up
    fn remaining(&self, chains: &[SleepChain]) -> f64 {
        (self.end as f64 - mean(chains.iter().map(|c| c.wake_idx()))) * gap_time_delta()
    }

    /// Minutes after midnight at which the last sleep of `chain` starts
    fn bedtime(&self, chain: &[f64]) -> Option<u32> {
        let idx = chain.sleep_idx();
        if idx.is_nan() || idx < 0.0 {
            return None;
        }
        self.range
            .get(self.offset + idx as usize)
            .map(|t| t.time().num_seconds_from_midnight() / 60)
    }

    fn single_night(&self, sleeps: Vec<SleepChain>, last_sw: f64) -> Result<Vec<SleepChain>, ComputeError> {
        let ending = self.wakes_at_end(&sleeps);
        if !ending.is_empty() {
            return Ok(ending);
        }
        let params = grid((6.0, 10.0, 17), (10.0, 14.0, 17));
        let sleeps = self.first_sleeps(&params, last_sw);
        if self.remaining(&sleeps) > 12.0 {
            return self.two_sleep_wake(sleeps, &params);
        }
        let ending = self.wakes_at_end(&sleeps);
        if !ending.is_empty() {
            return Ok(ending);
        }
        let latest = sleeps.iter().map(|s| s.wake_idx()).fold(f64::NEG_INFINITY, f64::max);
        Ok(sleeps.into_iter().filter(|s| s.wake_idx() == latest).collect())
    }

    /// Keep adding sleeps until a chain wakes at the end of the rest
    fn two_sleep_wake(&self, data: Vec<SleepChain>, params: &[(f64, f64)]) -> Result<Vec<SleepChain>, ComputeError> {
        let mut data = data;
        for _ in 0..self.config.max_filter_steps {
            let next = self.find_next(&data, params);
            if next.is_empty() {
                return self.window_or_fail(&data, "two sleeps");
            }
            let ending = self.wakes_at_end(&next);
            if !ending.is_empty() {
                return Ok(ending);
            }
            data = next;
        }
        Err(ComputeError::unsolvable(self.gap, "two sleeps", "no chain reached the end of the rest"))
    }

    fn window_or_fail(&self, data: &[SleepChain], grid: &str) -> Result<Vec<SleepChain>, ComputeError> {
        let found = self.find_sleep_within_window(data);
        if found.is_empty() {
            Err(ComputeError::unsolvable(self.gap, grid, "no sleep fits before the end of the rest"))
        } else {
            Ok(found)
        }
    }

    /// Grow every chain by one night, keeping at least five hours awake
    /// between sleeps
    fn extend_night(
        &self,
        sleeps: Vec<SleepChain>,
        params: &mut Vec<(f64, f64)>,
        night: usize,
        last_chance: bool,
    ) -> Result<Vec<SleepChain>, ComputeError> {
        let mut next = self.find_next(&sleeps, params);
        if next.is_empty() {
            debug!(gap = self.gap, night, "no next sleep found, widening threshold grid");
            *params = grid((7.0, 10.5, 15), (10.5, 14.0, 15));
            next = self.find_next(&sleeps, params);
        }
        let dt = gap_time_delta();
        let rested: Vec<SleepChain> = next
            .iter()
            .filter(|s| (s.sleep_idx() - s.prev_wake_idx()) * dt > MIN_AWAKE_BETWEEN_SLEEPS)
            .cloned()
            .collect();
        if !rested.is_empty() {
            Ok(rested)
        } else if last_chance {
            Ok(next)
        } else {
            Err(ComputeError::unsolvable(
                self.gap,
                format!("night {night}"),
                "no chain stays awake five hours between sleeps",
            ))
        }
    }

    fn final_night(&self, sleeps: Vec<SleepChain>, params: &[(f64, f64)]) -> Result<Vec<SleepChain>, ComputeError> {
        let ending = self.wakes_at_end(&sleeps);
        if !ending.is_empty() {
            return Ok(ending);
        }
        let remaining = self.remaining(&sleeps);
        if remaining > 12.0 {
            let window = BedtimeWindow::default();
            let sleeps = sleep_length_filter(sleeps);
            let sleeps = keep_if_any(sleeps, |s| self.bedtime(s).is_some_and(|t| window.contains(t)));
            let ending = self.wakes_at_end(&self.find_next(&sleeps, params));
            if !ending.is_empty() {
                return Ok(ending);
            }
            self.window_or_fail(&sleeps, "final night")
        } else if remaining > 2.0 {
            self.window_or_fail(&sleeps, "final night")
        } else if remaining <= 2.0 {
            Ok(sleeps)
        } else {
            Err(ComputeError::unsolvable(self.gap, "final night", "no sleep chain left"))
        }
    }

    /// Stay awake at least eight hours, then sleep until waking exactly at
    /// the end of the rest
    fn find_sleep_within_window(&self, data: &[SleepChain]) -> Vec<SleepChain> {
        let dt = gap_time_delta();
        let mut results = Vec::new();
        for x in data {
            let sw = x.last_h();
            let wake = x.wake_idx();
            if wake.is_nan() || wake < 0.0 {
                continue;
            }
            let se = wake as usize;
            let t_gap = (self.end as f64 - se as f64) * dt;
            let hw: Vec<f64> = linspace(dt, t_gap, (t_gap / dt) as i64)
                .into_iter()
                .map(|t| homeostatic_awake(t, sw))
                .collect();
            let n_gap = hw.len();
            if n_gap <= MIN_AWAKE_SAMPLES {
                continue;
            }

            let mut n_size = n_gap - MIN_AWAKE_SAMPLES;
            let mut t_max = n_size as f64 * dt;
            for idx in 0..n_gap - MIN_AWAKE_SAMPLES {
                t_max -= dt;
                let onset = MIN_AWAKE_SAMPLES + idx;
                let hs: Vec<f64> = linspace(0.0, t_max, n_size as i64)
                    .into_iter()
                    .map(|t| homeostatic_sleep(t, hw[onset]))
                    .collect();
                n_size -= 1;
                let Some(b) = hs.iter().position(|&h| h >= END_SW) else {
                    continue;
                };
                if onset + 1 + b != n_gap {
                    continue;
                }
                let mut h = hw[..=onset].to_vec();
                h.extend_from_slice(&hs[1..=b]);
                let isb = se + onset;
                let ise = se + n_gap - 1;
                if isb == ise {
                    continue;
                }
                let (Some(&c_sb), Some(&c_se), Some(&last_h)) = (self.c.get(isb), self.c.get(ise), h.last()) else {
                    continue;
                };
                let low = round_to(hs[0] + c_sb, 1);
                let high = round_to(last_h + c_se, 1);
                if low == high {
                    continue;
                }
                let mut chain = x.clone();
                chain.extend([low, high, last_h, (isb + 1) as f64, ise as f64]);
                results.push(chain);
                break;
            }
        }
        results
    }

    /// Awake until 23:00, asleep until 07:00
    fn fixed_sleeps(&self, data: &[SleepChain]) -> Result<Vec<SleepChain>, ComputeError> {
        let dt = gap_time_delta();
        let step = N_DELTA * INTERVAL_MINUTES;
        let mut results = Vec::with_capacity(data.len());
        for x in data {
            let sw = x.last_h();
            let start = x.wake_idx().max(0.0) as usize;
            let start_dt = *self.range.get(self.offset + start).ok_or_else(|| {
                ComputeError::unsolvable(self.gap, "fixed sleeps", "wake-up outside the timeline")
            })?;
            let times = datetime_range(
                start_dt,
                start_dt + Duration::days(1) + Duration::minutes(step),
                step,
            );
            let bedtime = start_dt.date().and_time(hm(23, 0));
            let wake_up = (start_dt.date() + Duration::days(1)).and_time(hm(7, 0));

            let awake: Vec<usize> = (0..times.len()).filter(|&i| times[i] <= bedtime).collect();
            let sb_idx = start + awake.last().copied().unwrap_or(0);
            let h = homeostatic_awake(awake.len() as f64 * dt - dt, sw);

            let asleep: Vec<usize> = (0..times.len())
                .filter(|&i| times[i] > bedtime && times[i] <= wake_up)
                .collect();
            let se_idx = start + asleep.last().copied().unwrap_or(0);
            let h = homeostatic_sleep(asleep.len() as f64 * dt - dt, h);

            let mut chain = x.clone();
            chain.extend([7.0, 13.0, h, sb_idx as f64, se_idx as f64]);
            results.push(chain);
        }
        Ok(results)
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default()
}
