//! Stage 3: contributions that build on stage 2 signals

use crate::common::{capped_cubic, capped_square, hm, time_to_fraction};
use crate::error::ComputeError;
use crate::fram::{proximity_factor, run_factor};
use crate::types::{Stage2Signals, Stage3Signals};

/// Stage 3 calculator
pub struct Stage3Calculator;

impl Stage3Calculator {
    /// Compute early-to-night, contextual rest part two, sector and long duty
    /// contributions
    pub fn calculate(stage2: Stage2Signals) -> Result<Stage3Signals, ComputeError> {
        let long_duties = long_duties(&stage2)?;
        let sector = sector(&stage2);
        let contextual_rest_part_two = contextual_rest_part_two(&stage2);
        let early_to_night = early_to_night(&stage2)?;

        Ok(Stage3Signals {
            stage2,
            early_to_night,
            contextual_rest_part_two,
            sector,
            long_duties,
        })
    }
}

/// Night finish following an earlier morning start, counted once per block
fn early_to_night(stage2: &Stage2Signals) -> Result<Vec<f64>, ComputeError> {
    let duties = &stage2.block.duty_periods;
    let mut out: Vec<f64> = Vec::with_capacity(duties.len());
    for (i, duty) in duties.iter().enumerate() {
        let already_counted = out.iter().sum::<f64>() > 0.0;
        let transitioned = stage2.morning_to_evening[i] > 0.0;
        let last_morning_start = duties[..i].iter().rposition(|d| d.is_morning_start);
        let value = match last_morning_start {
            Some(last) if i > 0 && duty.is_night_finish && !already_counted && !transitioned => {
                let hbm = time_to_fraction(&duty.hours_between_midnight)?;
                midnight_factor(hbm) * proximity_factor(i - last)
            }
            _ => 0.0,
        };
        out.push(value);
    }
    Ok(out)
}

fn midnight_factor(hbm: f64) -> f64 {
    if hbm >= 1.01 {
        capped_square(374.0, hbm, -56.685, 1108.8, -1082.6)
    } else {
        0.0
    }
}

/// Part one minus the actual rest before the next duty
fn contextual_rest_part_two(stage2: &Stage2Signals) -> Vec<f64> {
    let duties = &stage2.block.duty_periods;
    (0..duties.len())
        .map(|i| match duties.get(i + 1) {
            Some(next) => {
                let gap = next.start_zulu - duties[i].end_zulu;
                stage2.contextual_rest_part_one[i] - gap.num_minutes() as f64 / 60.0 / 24.0
            }
            None => 0.0,
        })
        .collect()
}

fn sector(stage2: &Stage2Signals) -> Vec<f64> {
    stage2
        .block
        .duty_periods
        .iter()
        .zip(&stage2.consecutive_high_sector)
        .map(|(duty, &run)| {
            let sectors = duty.operational_sector_count;
            if sectors <= 0 {
                return 0.0;
            }
            let sector_factor = if sectors >= 2 {
                let s = sectors as f64;
                0.1566 * s * s + 4.8516 * s - 10.468
            } else {
                0.0
            };
            let run_multiplier = if run > 0 { run_factor(run) } else { 1.0 };
            sector_factor * run_multiplier
        })
        .collect()
}

fn long_duties(stage2: &Stage2Signals) -> Result<Vec<f64>, ComputeError> {
    let single_duty_block = stage2.block.duty_count() == 1;
    stage2
        .block
        .duty_periods
        .iter()
        .zip(&stage2.consecutive_elongated)
        .map(|(duty, &run)| {
            let length = time_to_fraction(&duty.duty_length)?;
            let ordinal = duty.duty_period_of_duty_block;
            let value = if ordinal == 1 && duty.is_morning_start {
                let factor = first_length_factor(length);
                if single_duty_block {
                    0.5 * factor
                } else {
                    factor
                }
            } else if ordinal > 4 {
                first_length_factor(length)
            } else if length > hm(9, 0) {
                let elongated = if run > 0 { run_factor(run) } else { 0.0 };
                second_length_factor(length) * elongated
            } else {
                0.0
            };
            Ok(value)
        })
        .collect()
}

fn first_length_factor(length: f64) -> f64 {
    if length > hm(9, 10) {
        capped_cubic(91.0, length, -2431.8, 5224.1, -2880.4, 473.59)
    } else {
        0.0
    }
}

fn second_length_factor(length: f64) -> f64 {
    if length > hm(9, 10) {
        capped_cubic(220.0, length, -1013.3, 2176.7, -1200.2, 197.33)
    } else {
        0.0
    }
}
