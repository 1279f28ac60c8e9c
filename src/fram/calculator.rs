//! FRAM score calculator: runs every block through stages 2 to 6

use tracing::debug;

use crate::error::ComputeError;
use crate::fram::{Stage2Calculator, Stage3Calculator, Stage4Calculator, Stage5Calculator, Stage6Calculator};
use crate::types::{DutyBlock, DutyBlockScore, ScoreList};

/// Computes FRAM workload scores for a sequence of duty blocks
pub struct ScoreCalculator;

impl ScoreCalculator {
    /// Score every block independently, preserving block order
    pub fn calculate(blocks: Vec<DutyBlock>) -> Result<ScoreList, ComputeError> {
        let duty_block_scores = blocks
            .into_iter()
            .map(Self::score_block)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ScoreList { duty_block_scores })
    }

    /// Score a single block
    pub fn score_block(block: DutyBlock) -> Result<DutyBlockScore, ComputeError> {
        let duties = block.duty_count();

        // Stage 2: direct duty signals
        let stage2 = Stage2Calculator::calculate(block)?;

        // Stage 3: contributions over stage 2 signals
        let stage3 = Stage3Calculator::calculate(stage2)?;

        // Stage 4: contextual rest
        let stage4 = Stage4Calculator::calculate(stage3);

        // Stage 5: lagged preliminary score
        let stage5 = Stage5Calculator::calculate(stage4);

        // Stage 6: final score
        let scores = Stage6Calculator::calculate(&stage5);
        debug!(duties, "scored duty block");
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fram::tests::make_test_block;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_calculate_preserves_block_order_and_sizes() {
        let list = ScoreCalculator::calculate(vec![make_test_block(3), make_test_block(1), make_test_block(2)]).unwrap();
        let sizes: Vec<usize> = list.duty_block_scores.iter().map(|b| b.duty_period_scores.len()).collect();
        assert_eq!(sizes, vec![3, 1, 2]);
    }

    #[test]
    fn test_calculate_is_deterministic() {
        let mut block = make_test_block(4);
        block.duty_periods[1].is_morning_start = true;
        block.duty_periods[2].is_night_finish = true;
        block.duty_periods[2].hours_between_midnight = "25:10".to_string();
        let a = ScoreCalculator::calculate(vec![block.clone()]).unwrap();
        let b = ScoreCalculator::calculate(vec![block]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_malformed_duty_length_is_error() {
        let mut block = make_test_block(2);
        block.duty_periods[0].duty_length = "long".to_string();
        let err = ScoreCalculator::calculate(vec![block]).unwrap_err();
        assert_eq!(err.error_number(), 1004);
    }

    fn morning_start_block(n: usize, duty_length: &str) -> DutyBlock {
        let mut block = make_test_block(n);
        for duty in &mut block.duty_periods {
            duty.duty_length = duty_length.to_string();
        }
        block.duty_periods[0].is_morning_start = true;
        block
    }

    #[test]
    fn test_single_morning_start_duty_scores_each_term() {
        let block = morning_start_block(1, "08:00");
        let stage3 = Stage3Calculator::calculate(Stage2Calculator::calculate(block.clone()).unwrap()).unwrap();
        let stage5 = Stage5Calculator::calculate(Stage4Calculator::calculate(stage3));
        let s4 = &stage5.stage4;
        let s3 = &s4.stage3;
        let s2 = &s3.stage2;

        // eight hours is below the long duty knee, so the halved term is zero
        assert_eq!(s3.long_duties, vec![0.0]);
        // a single sector contributes nothing
        assert_eq!(s3.sector, vec![0.0]);
        assert_eq!(s2.night_to_early, vec![0.0]);
        assert_eq!(s2.suboptimal_night, vec![0.0]);
        assert_eq!(s3.early_to_night, vec![0.0]);
        assert_eq!(s2.morning_to_evening, vec![0.0]);
        assert_eq!(s4.contextual_rest, vec![0.0]);
        assert_eq!(stage5.preliminary, vec![0.0]);

        let list = ScoreCalculator::calculate(vec![block]).unwrap();
        assert_eq!(list.duty_block_scores.len(), 1);
        assert_eq!(list.duty_block_scores[0].duty_period_scores[0].score, 0.0);
    }

    #[test]
    fn test_single_morning_start_long_duty_is_halved() {
        let long = |n: usize| {
            let block = morning_start_block(n, "10:30");
            Stage3Calculator::calculate(Stage2Calculator::calculate(block).unwrap()).unwrap().long_duties[0]
        };
        let single = long(1);
        assert!(single > 0.0);
        assert!((2.0 * single - long(2)).abs() < 1e-9);

        // no preliminary term on the only duty of the block
        let list = ScoreCalculator::calculate(vec![morning_start_block(1, "10:30")]).unwrap();
        let score = list.duty_block_scores[0].duty_period_scores[0].score;
        assert!((score - (0.989 * single).max(0.0)).abs() < 1e-9);
    }

    #[test]
    fn test_empty_input() {
        let list = ScoreCalculator::calculate(Vec::new()).unwrap();
        assert!(list.duty_block_scores.is_empty());
    }
}
