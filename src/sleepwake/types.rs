//! Data structures for the sleep/wake simulation

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Candidate sleep chain for a non-duty gap.
///
/// Flat sequence of `[lower, upper, h, sleep_idx, wake_idx]` tuples, one per
/// placed sleep, indexed on the gap's 30 minute grid.
pub type SleepChain = Vec<f64>;

/// Width of one placed sleep inside a [`SleepChain`]
pub const CHAIN_WIDTH: usize = 5;

/// Tunable limits for the simulator search loops
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Maximum iterations of any widening filter loop
    pub max_filter_steps: usize,
    /// Maximum fallback grids tried when the default grid finds nothing (at most 4)
    pub max_grid_escalations: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_filter_steps: 1000,
            max_grid_escalations: 4,
        }
    }
}

/// Duty classification by start time and finish time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DutyType {
    Morning,
    Evening,
    Dual,
    Neutral,
    Undefined,
}

/// Disruptive duty classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disruption {
    Late,
    Night,
    Early,
    NonDisruptive,
}

/// Features extracted from the simulated traces for one duty
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SleepFeatures {
    pub awake_time: Option<NaiveDateTime>,
    pub sleep_time: Option<NaiveDateTime>,
    /// Homeostatic level at commute begin
    pub alertness_when_awake: f64,
    /// Homeostatic level at commute end
    pub alertness_when_sleep: f64,
    pub sleep_begin_before_operating: Option<NaiveDateTime>,
    pub sleep_end_before_operating: Option<NaiveDateTime>,
    /// Hours
    pub sleep_length_before_operating: f64,
    pub alertness_before_duty: f64,
    pub alertness_after_duty: f64,
    pub sum_of_diffs: f64,
    /// Decayed running sum of sleep surplus over 8 hours within the block
    pub cumulative_sleep_length: f64,
    /// Weighted running sum of alertness change within the block
    pub cumulative_alertness: f64,
}

/// One duty after preprocessing
#[derive(Debug, Clone, PartialEq)]
pub struct DutyRow {
    /// 1-based position in the request
    pub row_index: usize,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub commute_time: Duration,
    pub crew_route: String,
    pub sby_callout: String,
    pub sector_count: i32,
    pub night_stop_flag: String,
    pub duty_id: usize,
    /// Time until the next duty begins
    pub rest_time: Duration,
    pub block_id: usize,
    pub day_in_block: usize,
    pub block_length: usize,
    pub commute_estimate: Duration,
    pub commute_begin: NaiveDateTime,
    pub commute_end: NaiveDateTime,
    /// Time between this commute end and the next commute begin
    pub min_rest_time: Duration,
    pub duty_type: DutyType,
    pub disruption: Disruption,
    pub is_contactable: bool,
    pub is_standby: bool,
    pub workload_score: f64,
    pub features: SleepFeatures,
}

/// Summary of a duty id used to lay out the simulation timeline
#[derive(Debug, Clone, PartialEq)]
pub struct DutySpan {
    pub duty_id: usize,
    pub row_count: usize,
    /// Commute begin of the first row
    pub commute_begin: NaiveDateTime,
    /// Commute end of the last row
    pub commute_end: NaiveDateTime,
    /// Minimum rest after the last row
    pub min_rest_time: Duration,
    /// Commute begin to commute end of the last row
    pub commute_duration: Duration,
}

impl DutySpan {
    /// Build one span per duty id, in row order
    pub fn from_rows(rows: &[DutyRow]) -> Vec<DutySpan> {
        let mut spans: Vec<DutySpan> = Vec::new();
        for row in rows {
            match spans.last_mut() {
                Some(span) if span.duty_id == row.duty_id => {
                    span.row_count += 1;
                    span.commute_end = row.commute_end;
                    span.min_rest_time = row.min_rest_time;
                    span.commute_duration = row.commute_end - row.commute_begin;
                }
                _ => spans.push(DutySpan {
                    duty_id: row.duty_id,
                    row_count: 1,
                    commute_begin: row.commute_begin,
                    commute_end: row.commute_end,
                    min_rest_time: row.min_rest_time,
                    commute_duration: row.commute_end - row.commute_begin,
                }),
            }
        }
        spans
    }
}

/// Phase and trace values at the start and end of a duty block
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RsDuty {
    pub start_phase: f64,
    pub end_phase: f64,
    pub start_circadian: f64,
    pub start_homeostatic: f64,
    pub start_alertness: f64,
    pub end_circadian: f64,
    pub end_homeostatic: f64,
    pub end_alertness: f64,
}

impl RsDuty {
    pub(crate) fn from_traces(start_phase: f64, end_phase: f64, c: &[f64], h: &[f64]) -> Option<Self> {
        let (c0, h0) = (*c.first()?, *h.first()?);
        let (c1, h1) = (*c.last()?, *h.last()?);
        Some(Self {
            start_phase,
            end_phase,
            start_circadian: c0,
            start_homeostatic: h0,
            start_alertness: c0 + h0,
            end_circadian: c1,
            end_homeostatic: h1,
            end_alertness: c1 + h1,
        })
    }
}

/// Sleep episode found between two consecutive duties
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SleepEpisode {
    pub lower: f64,
    pub upper: f64,
    pub phase: f64,
    pub sleep_start: usize,
    pub sleep_end: usize,
    /// Homeostatic level at the last sample before waking
    pub homeostatic: f64,
    pub alertness: f64,
    pub circadians: Vec<f64>,
    pub homeostatics: Vec<f64>,
}

/// Output of stage 1: traces over the whole timeline, NaN between blocks
#[derive(Debug, Clone, Default)]
pub struct Stage1Trace {
    pub circadians: Vec<f64>,
    pub homeostatics: Vec<f64>,
    pub alertnesses: Vec<f64>,
    pub datetime_range: Vec<NaiveDateTime>,
    pub rs_duties: Vec<RsDuty>,
}

/// Output of stage 2: circadian trace with the non-duty gaps filled
#[derive(Debug, Clone, Default)]
pub struct CircadianFill {
    pub circadians: Vec<f64>,
    /// Circadian values of each gap
    pub gap_circadians: Vec<Vec<f64>>,
    /// Homeostatic level at the start of each gap
    pub last_sw: Vec<f64>,
}

/// Output of stage 5: traces on a regular grid through the last day
#[derive(Debug, Clone, Default)]
pub struct LastWindow {
    pub time_range: Vec<NaiveDateTime>,
    pub homeostatics: Vec<f64>,
    pub circadians: Vec<f64>,
}
