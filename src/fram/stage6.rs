//! Stage 6: final per-duty FRAM score

use crate::types::{DutyBlockScore, DutyPeriodScore, Stage5Signals};

const TRANSITION_WEIGHT: f64 = 1.042;
const LONG_DUTY_WEIGHT: f64 = 0.989;
const SECTOR_WEIGHT: f64 = 1.046;
const CONTEXTUAL_REST_WEIGHT: f64 = 1.157;
const EARLY_TO_NIGHT_WEIGHT: f64 = 1.0;
const NIGHT_TO_EARLY_WEIGHT: f64 = 1.0;
const SUBOPTIMAL_NIGHT_WEIGHT: f64 = 1.0;
const PRELIMINARY_WEIGHT: f64 = 1.038;

/// Stage 6 calculator
pub struct Stage6Calculator;

impl Stage6Calculator {
    pub fn calculate(stage5: &Stage5Signals) -> DutyBlockScore {
        let s4 = &stage5.stage4;
        let s3 = &s4.stage3;
        let s2 = &s3.stage2;

        let duty_period_scores = (0..s2.block.duty_count())
            .map(|i| {
                let base = s2.morning_to_evening[i] * TRANSITION_WEIGHT
                    + s3.long_duties[i] * LONG_DUTY_WEIGHT
                    + s3.sector[i] * SECTOR_WEIGHT
                    + s4.contextual_rest[i] * CONTEXTUAL_REST_WEIGHT
                    + s3.early_to_night[i] * EARLY_TO_NIGHT_WEIGHT
                    + s2.night_to_early[i] * NIGHT_TO_EARLY_WEIGHT
                    + s2.suboptimal_night[i] * SUBOPTIMAL_NIGHT_WEIGHT;
                let preliminary = stage5.preliminary[i];
                let total = base + preliminary * PRELIMINARY_WEIGHT;
                let score = if i == 0 {
                    base.max(0.0)
                } else if total < 0.0 {
                    preliminary
                } else {
                    total
                };
                DutyPeriodScore { score }
            })
            .collect();

        DutyBlockScore { duty_period_scores }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fram::tests::make_test_block;
    use crate::fram::{Stage2Calculator, Stage3Calculator, Stage4Calculator, Stage5Calculator};

    fn score(block: crate::types::DutyBlock) -> (Stage5Signals, DutyBlockScore) {
        let s3 = Stage3Calculator::calculate(Stage2Calculator::calculate(block).unwrap()).unwrap();
        let s5 = Stage5Calculator::calculate(Stage4Calculator::calculate(s3));
        let scores = Stage6Calculator::calculate(&s5);
        (s5, scores)
    }

    #[test]
    fn test_first_duty_never_negative() {
        for sectors in 0..4 {
            let mut block = make_test_block(2);
            block.duty_periods[0].operational_sector_count = sectors;
            let (_, scores) = score(block);
            assert!(scores.duty_period_scores[0].score >= 0.0);
        }
    }

    #[test]
    fn test_negative_total_falls_back_to_preliminary() {
        let mut block = make_test_block(3);
        for duty in &mut block.duty_periods {
            duty.operational_sector_count = 0;
        }
        // A full day off after the second duty drives contextual rest to its floor
        let end = block.duty_periods[1].end_zulu;
        block.duty_periods[2].start_zulu = end + chrono::Duration::hours(24);
        block.duty_periods[2].end_zulu = end + chrono::Duration::hours(32);
        let (s5, scores) = score(block);
        assert_eq!(s5.stage4.contextual_rest[1], -6.0);
        assert_eq!(s5.preliminary[1], 0.0);
        assert_eq!(scores.duty_period_scores[1].score, 0.0);
    }

    #[test]
    fn test_total_combines_weights() {
        let mut block = make_test_block(2);
        block.duty_periods[0].operational_sector_count = 4;
        block.duty_periods[1].operational_sector_count = 4;
        let (s5, scores) = score(block);
        let s4 = &s5.stage4;
        let s3 = &s4.stage3;
        let base1 = s3.sector[1] * SECTOR_WEIGHT + s4.contextual_rest[1] * CONTEXTUAL_REST_WEIGHT;
        let total1 = base1 + s5.preliminary[1] * PRELIMINARY_WEIGHT;
        let expected = if total1 < 0.0 { s5.preliminary[1] } else { total1 };
        assert!((scores.duty_period_scores[1].score - expected).abs() < 1e-9);
        let base0 = s3.sector[0] * SECTOR_WEIGHT;
        assert!((scores.duty_period_scores[0].score - base0.max(0.0)).abs() < 1e-9);
    }
}
