//! Stage 4: ineffective contextual rest contribution

use crate::common::hm;
use crate::types::{Stage3Signals, Stage4Signals};

/// Stage 4 calculator
pub struct Stage4Calculator;

impl Stage4Calculator {
    pub fn calculate(stage3: Stage3Signals) -> Stage4Signals {
        let contextual_rest = stage3
            .contextual_rest_part_two
            .iter()
            .zip(&stage3.stage2.block.duty_periods)
            .map(|(&part_two, duty)| {
                if part_two == 0.0 || duty.duty_period_of_duty_block == 1 {
                    0.0
                } else {
                    rest_factor(part_two)
                }
            })
            .collect();

        Stage4Signals {
            stage3,
            contextual_rest,
        }
    }
}

/// Piecewise quartic over the rest deficit
fn rest_factor(p: f64) -> f64 {
    if p < -hm(7, 45) {
        -6.0
    } else if p < hm(19, 0) {
        1126.9 * p.powi(4) + 14.145 * p.powi(3) + 42.146 * p * p + 44.061 * p - 0.3455
    } else {
        500.0
    }
}
