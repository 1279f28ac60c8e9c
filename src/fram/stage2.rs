//! Stage 2: signals derived directly from duty attributes
//!
//! - Consecutive elongated / high-sector run lengths
//! - Morning-to-evening transition
//! - Ineffective contextual rest (part one)
//! - Night-to-early transition
//! - Suboptimal night at the start of a block

use crate::common::{capped_cubic, capped_square, hm, time_to_fraction, Curve};
use crate::error::ComputeError;
use crate::fram::proximity_factor;
use crate::types::{DutyBlock, DutyPeriod, Stage2Signals};

/// Row of a contextual-rest lookup table: applies when the sector count
/// matches and the time threshold test passes.
struct CurveRule {
    sectors: i32,
    threshold: Threshold,
    curve: Curve,
}

#[derive(Clone, Copy)]
enum Threshold {
    Above(u32, u32),
    AtMost(u32, u32),
}

impl Threshold {
    fn matches(self, t: f64) -> bool {
        match self {
            Threshold::Above(h, m) => t > hm(h, m),
            Threshold::AtMost(h, m) => t <= hm(h, m),
        }
    }
}

const fn rule(sectors: i32, threshold: Threshold, curve: Curve) -> CurveRule {
    CurveRule { sectors, threshold, curve }
}

/// Duty-length factor of contextual rest, first match wins
const DUTY_LENGTH_RULES: [CurveRule; 9] = [
    rule(1, Threshold::Above(10, 0), Curve::cubic(1.29, 2.157, -3.4093, 2.4771, -0.0809)),
    rule(2, Threshold::Above(10, 0), Curve::cubic(1.33, 2.569, -4.3899, 3.2715, -0.2819)),
    rule(3, Threshold::Above(9, 0), Curve::cubic(1.33, 2.3158, -3.6912, 2.6364, -0.0834)),
    rule(4, Threshold::Above(7, 0), Curve::cubic(1.33, 1.1815, -1.0476, 0.6637, 0.3916)),
    rule(5, Threshold::Above(7, 0), Curve::cubic(1.33, 1.8899, -2.3873, 1.4646, 0.2485)),
    rule(6, Threshold::Above(7, 0), Curve::cubic(1.38, 1.8396, -2.4031, 1.5648, 0.2215)),
    rule(7, Threshold::Above(6, 0), Curve::cubic(1.38, 1.5975, -1.9603, 1.3104, 0.2881)),
    rule(8, Threshold::AtMost(5, 0), Curve::Constant(13.5 / 24.0)),
    rule(8, Threshold::Above(5, 0), Curve::cubic(1.42, 1.8492, -2.4548, 1.6057, 0.2602)),
];

/// Crew-reference end time factor of contextual rest, first match wins
const CREW_REFERENCE_RULES: [CurveRule; 8] = [
    rule(1, Threshold::Above(20, 0), Curve::cubic(0.38, 0.0323, 0.5163, -0.9803, 0.4447)),
    rule(2, Threshold::Above(20, 0), Curve::cubic(0.40, -0.1499, 1.1515, -1.6767, 0.6902)),
    rule(3, Threshold::Above(20, 0), Curve::cubic(0.40, -0.1304, 1.0585, -1.5252, 0.6148)),
    rule(4, Threshold::Above(20, 0), Curve::cubic(0.40, -0.066, 0.7852, -1.1484, 0.4515)),
    rule(5, Threshold::Above(19, 0), Curve::cubic(0.40, -0.3067, 1.6423, -2.1258, 0.8124)),
    rule(6, Threshold::Above(19, 0), Curve::cubic(0.41, -0.4560, 2.1415, -2.6687, 1.0070)),
    rule(7, Threshold::Above(19, 0), Curve::cubic(0.41, -0.5537, 2.4808, -3.0344, 1.1322)),
    rule(8, Threshold::Above(19, 0), Curve::cubic(0.42, -0.6076, 2.6023, -3.0838, 1.1202)),
];

/// Stage 2 calculator
pub struct Stage2Calculator;

impl Stage2Calculator {
    /// Derive stage 2 signals for a duty block
    pub fn calculate(block: DutyBlock) -> Result<Stage2Signals, ComputeError> {
        let consecutive_elongated = consecutive_runs(&block, |d| d.is_elongated);
        let consecutive_high_sector = consecutive_runs(&block, |d| d.is_high_sector);
        let morning_to_evening = morning_to_evening(&block)?;
        let contextual_rest_part_one = contextual_rest_part_one(&block)?;
        let night_to_early = night_to_early(&block)?;
        let suboptimal_night = suboptimal_night(&block)?;

        Ok(Stage2Signals {
            block,
            consecutive_elongated,
            consecutive_high_sector,
            morning_to_evening,
            contextual_rest_part_one,
            night_to_early,
            suboptimal_night,
        })
    }
}

/// Run length of a flag, restarting at the first duty of the block
fn consecutive_runs(block: &DutyBlock, flag: impl Fn(&DutyPeriod) -> bool) -> Vec<u32> {
    let mut runs: Vec<u32> = Vec::with_capacity(block.duty_count());
    for duty in &block.duty_periods {
        let run = if !flag(duty) {
            0
        } else if duty.duty_period_of_duty_block == 1 {
            1
        } else {
            runs.last().copied().unwrap_or(0) + 1
        };
        runs.push(run);
    }
    runs
}

/// Evening finish directly after a morning start
fn morning_to_evening(block: &DutyBlock) -> Result<Vec<f64>, ComputeError> {
    let threshold = hm(22, 0);
    let duties = &block.duty_periods;
    let mut out = Vec::with_capacity(duties.len());
    for (i, duty) in duties.iter().enumerate() {
        let value = if i > 0 && duty.is_evening_finish && duties[i - 1].is_morning_start {
            let hbm = time_to_fraction(&duty.hours_between_midnight)?;
            if hbm > threshold {
                capped_cubic(149.0, hbm, -1367.7, 6404.0, -8288.0, 3269.6)
            } else {
                0.0
            }
        } else {
            0.0
        };
        out.push(value);
    }
    Ok(out)
}

fn contextual_rest_part_one(block: &DutyBlock) -> Result<Vec<f64>, ComputeError> {
    let count = block.duty_count();
    block
        .duty_periods
        .iter()
        .map(|duty| {
            if duty.is_home_standby {
                Ok(hm(12, 0))
            } else if duty.operational_sector_count == 0 {
                Ok(hm(13, 0))
            } else if (duty.duty_period_of_duty_block as i64) < count as i64 {
                let length = time_to_fraction(&duty.duty_length)?;
                let crew_reference = time_to_fraction(&duty.end_time_crew_reference)?;
                let sectors = duty.operational_sector_count;
                Ok(lookup(&DUTY_LENGTH_RULES, sectors, length).unwrap_or(hm(13, 0))
                    + lookup(&CREW_REFERENCE_RULES, sectors, crew_reference).unwrap_or(0.0))
            } else {
                Ok(0.0)
            }
        })
        .collect()
}

/// Evaluate the first matching rule of a lookup table
fn lookup(rules: &[CurveRule], sectors: i32, t: f64) -> Option<f64> {
    rules
        .iter()
        .find(|r| r.sectors == sectors && r.threshold.matches(t))
        .map(|r| r.curve.eval(t))
}

/// Morning start following an earlier night finish, counted once per block
fn night_to_early(block: &DutyBlock) -> Result<Vec<f64>, ComputeError> {
    let duties = &block.duty_periods;
    let mut out: Vec<f64> = Vec::with_capacity(duties.len());
    for (i, duty) in duties.iter().enumerate() {
        let already_counted = out.iter().sum::<f64>() > 0.0;
        let last_night_finish = duties[..i].iter().rposition(|d| d.is_night_finish);
        let value = match last_night_finish {
            Some(last) if i > 0 && duty.is_morning_start && !already_counted => {
                let start = time_to_fraction(&duty.start_time_local)?;
                start_time_factor(start) * proximity_factor(i - last)
            }
            _ => 0.0,
        };
        out.push(value);
    }
    Ok(out)
}

fn start_time_factor(start: f64) -> f64 {
    if start < hm(9, 20) {
        capped_cubic(688.0, start, -33196.0, 34036.0, -12042.0, 1480.0)
    } else {
        0.0
    }
}

/// Night finish on the first duty of the block
fn suboptimal_night(block: &DutyBlock) -> Result<Vec<f64>, ComputeError> {
    let threshold = hm(24, 10);
    let mut out = vec![0.0; block.duty_count()];
    if let Some(first) = block.duty_periods.first() {
        if first.is_night_finish {
            let hbm = time_to_fraction(&first.hours_between_midnight)?;
            if hbm >= threshold {
                out[0] = capped_square(224.0, hbm, -34.011, 665.27, -649.58);
            }
        }
    }
    Ok(out)
}
