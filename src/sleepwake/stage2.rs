//! Stage 2: circadian rhythm through the rests between blocks

use crate::error::ComputeError;
use crate::sleepwake::model::{awake_offset, circadian, gap_time_delta, hour_decimal, linspace, CIRCADIAN_LENGTH};
use crate::sleepwake::types::{CircadianFill, DutySpan, Stage1Trace};

/// Stage 2 calculator
pub struct Stage2Calculator;

impl Stage2Calculator {
    /// Fill every NaN gap of the circadian trace.
    ///
    /// The phase drifts linearly across the gap from the end phase of the
    /// preceding block to the start phase of the following one.
    pub fn calculate(
        trace: &Stage1Trace,
        spans: &[DutySpan],
        gaps: &[(usize, usize)],
    ) -> Result<CircadianFill, ComputeError> {
        if gaps.len() + 1 != spans.len().max(1) || trace.rs_duties.len() != spans.len() {
            return Err(ComputeError::unsolvable(
                gaps.len(),
                "timeline",
                format!("{} rests found between {} duty blocks", gaps.len(), spans.len()),
            ));
        }

        let dt = gap_time_delta();
        let mut fill = CircadianFill {
            circadians: trace.circadians.clone(),
            ..CircadianFill::default()
        };
        for (idx, &(start, end)) in gaps.iter().enumerate() {
            let n = end - start + 1;
            let last = &trace.rs_duties[idx];
            let next = &trace.rs_duties[idx + 1];

            let mut end_time = spans[idx].commute_end;
            if idx > 0 {
                end_time += awake_offset();
            }
            let t_shift = hour_decimal(end_time);
            let shifts = linspace(t_shift, t_shift - (next.start_phase - last.end_phase), n as i64);
            let times = linspace(0.0, (n - 1) as f64 * dt, n as i64);

            let c: Vec<f64> = times
                .iter()
                .zip(&shifts)
                .map(|(t, shift)| circadian(t % CIRCADIAN_LENGTH, last.end_phase - shift))
                .collect();
            fill.circadians[start..=end].copy_from_slice(&c);
            fill.gap_circadians.push(c);
            fill.last_sw.push(last.end_homeostatic);
        }
        Ok(fill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sleepwake::model::nan_runs;
    use crate::sleepwake::types::RsDuty;
    use chrono::{Duration, NaiveDate, NaiveDateTime};
    use pretty_assertions::assert_eq;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    fn span(duty_id: usize, begin: NaiveDateTime, end: NaiveDateTime) -> DutySpan {
        DutySpan {
            duty_id,
            row_count: 1,
            commute_begin: begin,
            commute_end: end,
            min_rest_time: Duration::hours(12),
            commute_duration: end - begin,
        }
    }

    fn rs(start_phase: f64, end_phase: f64, end_homeostatic: f64) -> RsDuty {
        RsDuty {
            start_phase,
            end_phase,
            end_homeostatic,
            ..RsDuty::default()
        }
    }

    #[test]
    fn test_fills_gap_with_constant_phase() {
        let mut trace = Stage1Trace {
            circadians: vec![1.0; 10],
            rs_duties: vec![rs(16.2, 16.2, 11.5), rs(16.2, 16.2, 12.0)],
            ..Stage1Trace::default()
        };
        for c in &mut trace.circadians[3..7] {
            *c = f64::NAN;
        }
        let gaps = nan_runs(&trace.circadians);
        let spans = vec![span(1, at(1, 7, 0), at(1, 17, 0)), span(2, at(3, 7, 0), at(3, 17, 0))];
        let fill = Stage2Calculator::calculate(&trace, &spans, &gaps).unwrap();

        assert!(fill.circadians.iter().all(|c| c.is_finite()));
        assert_eq!(fill.gap_circadians.len(), 1);
        assert_eq!(fill.gap_circadians[0].len(), 4);
        assert_eq!(fill.last_sw, vec![11.5]);
        // first sample is the circadian value at 17:00
        assert!((fill.circadians[3] - circadian(17.0, 16.2)).abs() < 1e-12);
        // next sample half an hour later
        assert!((fill.circadians[4] - circadian(17.5, 16.2)).abs() < 1e-12);
        assert_eq!(fill.circadians[0], 1.0);
    }

    #[test]
    fn test_phase_drift_reaches_next_phase() {
        let mut trace = Stage1Trace {
            circadians: vec![f64::NAN; 5],
            rs_duties: vec![rs(16.0, 16.0, 12.0), rs(17.0, 17.0, 12.0)],
            ..Stage1Trace::default()
        };
        trace.circadians[0] = 0.0;
        let gaps = nan_runs(&trace.circadians);
        let spans = vec![span(1, at(1, 7, 0), at(1, 12, 0)), span(2, at(2, 7, 0), at(2, 12, 0))];
        let fill = Stage2Calculator::calculate(&trace, &spans, &gaps).unwrap();
        // the last of 4 samples sits 1.5h after 12:00 with phase 17
        assert!((fill.circadians[4] - circadian(13.5, 17.0)).abs() < 1e-9);
    }

    #[test]
    fn test_gap_count_mismatch_is_unsolvable() {
        let trace = Stage1Trace {
            circadians: vec![0.0; 4],
            rs_duties: vec![rs(16.0, 16.0, 12.0), rs(16.0, 16.0, 12.0)],
            ..Stage1Trace::default()
        };
        let spans = vec![span(1, at(1, 7, 0), at(1, 12, 0)), span(2, at(1, 13, 0), at(1, 18, 0))];
        let err = Stage2Calculator::calculate(&trace, &spans, &[]).unwrap_err();
        assert!(matches!(err, ComputeError::SimulationUnsolvable { .. }));
    }
}
