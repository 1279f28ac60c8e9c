//! Two-process sleep/wake simulation
//!
//! Builds homeostatic and circadian traces over the whole roster and folds
//! the resulting alertness features into the final per-duty score.
//!
//! Pipeline: DutyRow → Stage1 (duty blocks) → Stage2 (rest circadian) →
//! Stage3 (rest sleeps) → Stage4 (rest homeostatic) → Stage5 (last window)
//! → Stage6 (features) → Scorer

pub mod model;
pub mod preprocess;
pub mod scoring;
pub mod stage1;
pub mod stage2;
pub mod stage3;
pub mod stage4;
pub mod stage5;
pub mod stage6;
pub mod types;

pub use preprocess::Preprocessor;
pub use scoring::{format_n2, Scorer};
pub use stage1::Stage1Calculator;
pub use stage2::Stage2Calculator;
pub use stage3::Stage3Calculator;
pub use stage4::Stage4Calculator;
pub use stage5::Stage5Calculator;
pub use stage6::Stage6Calculator;
pub use types::{DutyRow, SimulationConfig, SleepFeatures};

use chrono::{Datelike, Duration};
use tracing::debug;

use crate::error::ComputeError;
use crate::types::FrmModelRequest;
use model::{interpolate_nan, nan_runs, INTERVAL_MINUTES};
use types::DutySpan;

/// Run the simulation and return one formatted score per simulated duty.
///
/// `workload` holds the FRAM score of every request entry in request order.
pub fn process_sleep_wake(
    request: &FrmModelRequest,
    workload: &[f64],
    config: &SimulationConfig,
) -> Result<Vec<String>, ComputeError> {
    let mut rows = Preprocessor::prepare(request, workload)?;
    let spans = DutySpan::from_rows(&rows);

    let trace = Stage1Calculator::calculate(&rows, &spans, config)?;
    let gaps = nan_runs(&trace.alertnesses);
    let fill = Stage2Calculator::calculate(&trace, &spans, &gaps)?;
    let sleeps = Stage3Calculator::calculate(&trace.datetime_range, &spans, &gaps, &fill, config)?;
    let mut homeostatics = Stage4Calculator::calculate(&trace.homeostatics, &gaps, &sleeps, &fill.last_sw)?;
    let mut circadians = fill.circadians;

    if spans.len() > 1 {
        if circadians.iter().any(|c| c.is_nan()) {
            circadians = interpolate_nan(&circadians)?;
        }
        if homeostatics.iter().any(|h| h.is_nan()) {
            homeostatics = interpolate_nan(&homeostatics)?;
        }
    }

    let (Some(last_row), Some(&last_sample)) = (rows.last(), trace.datetime_range.last()) else {
        return Err(ComputeError::Internal("empty simulation timeline".to_string()));
    };
    let is_next_day = last_row.commute_begin.day() != (last_sample + Duration::minutes(INTERVAL_MINUTES)).day();

    let window =
        Stage5Calculator::calculate(&trace.datetime_range, &homeostatics, &circadians, &trace.rs_duties, is_next_day)?;
    Stage6Calculator::calculate(&mut rows, &window)?;
    debug!(
        duties = rows.len(),
        blocks = spans.len(),
        rests = gaps.len(),
        samples = window.time_range.len(),
        "simulated sleep/wake"
    );

    Ok(Scorer::scores(&rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::tests::make_test_request;
    use pretty_assertions::assert_eq;

    fn assert_scored(scores: &[String], n: usize) {
        assert_eq!(scores.len(), n);
        for s in scores {
            assert_ne!(s, "NaN");
            assert!(s.replace(',', "").parse::<f64>().is_ok(), "{s} is not a number");
        }
    }

    /// Duties on the given days of March 2024
    fn request_on_days(days: &[u32]) -> FrmModelRequest {
        let ordinals: Vec<i32> = (1..=days.len() as i32).collect();
        let mut request = make_test_request(&ordinals);
        let dates: Vec<String> = days.iter().map(|d| format!("{d}/3/2024")).collect();
        request.start_date_local_time = Some(dates.clone());
        request.end_date_local_time = Some(dates.clone());
        request.end_date_crew_reference_time = Some(dates);
        request.start_date_time_zulu = Some(days.iter().map(|d| format!("{d}/3/2024 07:00")).collect());
        request.end_date_time_zulu = Some(days.iter().map(|d| format!("{d}/3/2024 15:00")).collect());
        request
    }

    #[test]
    fn test_single_duty() {
        let request = make_test_request(&[1]);
        let scores = process_sleep_wake(&request, &[10.0], &SimulationConfig::default()).unwrap();
        assert_scored(&scores, 1);
    }

    #[test]
    fn test_consecutive_duties() {
        let request = make_test_request(&[1, 2, 3]);
        let scores = process_sleep_wake(&request, &[10.0, 12.0, 14.0], &SimulationConfig::default()).unwrap();
        assert_scored(&scores, 3);
    }

    #[test]
    fn test_two_blocks_with_rest() {
        let request = request_on_days(&[1, 2, 6]);
        let scores = process_sleep_wake(&request, &[10.0, 12.0, 10.0], &SimulationConfig::default()).unwrap();
        assert_scored(&scores, 3);
    }

    #[test]
    fn test_deterministic() {
        let request = request_on_days(&[1, 2, 5]);
        let config = SimulationConfig::default();
        let first = process_sleep_wake(&request, &[1.0, 2.0, 3.0], &config).unwrap();
        let second = process_sleep_wake(&request, &[1.0, 2.0, 3.0], &config).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_workload_shifts_score() {
        let request = make_test_request(&[1]);
        let config = SimulationConfig::default();
        let low: f64 = process_sleep_wake(&request, &[0.0], &config).unwrap()[0].replace(',', "").parse().unwrap();
        let high: f64 = process_sleep_wake(&request, &[100.0], &config).unwrap()[0].replace(',', "").parse().unwrap();
        assert!((high - low - 96.0).abs() < 0.011);
    }
}
