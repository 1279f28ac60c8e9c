//! Stage 5: preliminary score from the lagged contributions of earlier duties

use crate::types::{Stage4Signals, Stage5Signals};

/// Longest look-back, in duties
const MAX_LAG: usize = 8;

/// Lag weights for lags 1..=7 without a home standby in the window
const WEIGHTS: [f64; 7] = [0.92, 0.81, 0.70, 0.55, 0.40, 0.20, 0.10];
/// Lag weights for lags 1..=7 with a home standby in the window
const WEIGHTS_HOME_STANDBY: [f64; 7] = [0.82, 0.71, 0.60, 0.45, 0.30, 0.20, 0.00];

/// Stage 5 calculator
pub struct Stage5Calculator;

impl Stage5Calculator {
    pub fn calculate(stage4: Stage4Signals) -> Stage5Signals {
        let totals = contribution_totals(&stage4);
        let block = &stage4.stage3.stage2.block;
        let preliminary = (0..block.duty_count())
            .map(|i| {
                if i == 0 {
                    return 0.0;
                }
                (1..=i.min(MAX_LAG))
                    .map(|lag| {
                        let home_standby = block.duty_periods[..=lag].iter().any(|d| d.is_home_standby);
                        lag_weight(lag, home_standby) * totals[i - lag]
                    })
                    .sum()
            })
            .collect();

        Stage5Signals {
            stage4,
            preliminary,
        }
    }
}

/// Sum of the seven contributions per duty
fn contribution_totals(stage4: &Stage4Signals) -> Vec<f64> {
    let s3 = &stage4.stage3;
    let s2 = &s3.stage2;
    (0..s2.block.duty_count())
        .map(|i| {
            s2.morning_to_evening[i]
                + s3.long_duties[i]
                + s3.sector[i]
                + stage4.contextual_rest[i]
                + s3.early_to_night[i]
                + s2.night_to_early[i]
                + s2.suboptimal_night[i]
        })
        .collect()
}

fn lag_weight(lag: usize, home_standby: bool) -> f64 {
    let table = if home_standby { &WEIGHTS_HOME_STANDBY } else { &WEIGHTS };
    lag.checked_sub(1).and_then(|i| table.get(i)).copied().unwrap_or(0.0)
}
