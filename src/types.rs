//! Core types for the FRAM scoring pipeline
//!
//! This module defines the external request/response contract and the data
//! structures that flow through each regression stage: duty periods grouped
//! into blocks, the accumulating stage signals, and per-duty scores.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Scoring request: one entry per duty period in every array.
///
/// Arrays are optional so that a missing parameter can be reported with its
/// own error number instead of failing deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct FrmModelRequest {
    /// 1-based position of the duty inside its block
    pub idx_in_block: Option<Vec<i32>>,
    pub operational_sector_count: Option<Vec<i32>>,
    /// 0 or 1
    pub isa_home_standby_flag: Option<Vec<i32>>,
    /// `d/M/yyyy`
    pub start_date_local_time: Option<Vec<String>>,
    /// `HH:mm`
    pub start_time_local_time: Option<Vec<String>>,
    pub end_date_local_time: Option<Vec<String>>,
    pub end_time_local_time: Option<Vec<String>>,
    pub end_date_crew_reference_time: Option<Vec<String>>,
    pub end_time_crew_reference_time: Option<Vec<String>>,
    /// `d/M/yyyy H:mm[:ss]`
    pub start_date_time_zulu: Option<Vec<String>>,
    pub end_date_time_zulu: Option<Vec<String>>,
    /// `H:mm` duty duration
    pub duty_length: Option<Vec<String>>,
    pub is_duty_morning_start: Option<Vec<i32>>,
    pub is_duty_evening_finish: Option<Vec<i32>>,
    pub is_duty_night_finish: Option<Vec<i32>>,
    pub is_duty_elongated: Option<Vec<i32>>,
    pub is_duty_high_sector: Option<Vec<i32>>,
    /// `H:mm`, may exceed 24 hours
    pub hours_between_midnight: Option<Vec<String>>,
    /// Roster route code, e.g. `SBY`, `CTB`
    pub crew_route: Option<Vec<String>>,
    pub night_stop_flag: Option<Vec<String>>,
    /// `H:mm:ss` travel time between home and base
    pub commute_time: Option<Vec<String>>,
    /// Standby callout location, `HOME` for home standby
    pub sby_callout: Option<Vec<String>>,
    pub is_standby: Option<Vec<String>>,
    pub is_contactable: Option<Vec<String>>,
}

impl FrmModelRequest {
    /// Number of duty periods, taken from the ordinal array
    pub fn len(&self) -> usize {
        self.idx_in_block.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scoring response
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FrmModelResponse {
    /// Final per-duty scores after the sleep/wake adjustment
    #[serde(rename = "FRMScore")]
    pub frm_score: Option<Vec<String>>,
    /// Raw FRAM workload scores, one per duty period in request order
    pub workload_score: Option<Vec<String>>,
    /// 0 on success, otherwise 1001..=1004
    pub error_number: i32,
    pub error_description: Option<String>,
}

impl FrmModelResponse {
    pub fn is_success(&self) -> bool {
        self.error_number == 0
    }
}

/// A single validated duty period
#[derive(Debug, Clone, PartialEq)]
pub struct DutyPeriod {
    /// 1-based ordinal within the block
    pub duty_period_of_duty_block: i32,
    pub operational_sector_count: i32,
    pub is_home_standby: bool,
    pub start_date_local: NaiveDate,
    /// `HH:MM`
    pub start_time_local: String,
    pub end_date_local: NaiveDate,
    pub end_time_local: String,
    pub end_date_crew_reference: NaiveDate,
    pub end_time_crew_reference: String,
    pub start_zulu: NaiveDateTime,
    pub end_zulu: NaiveDateTime,
    pub duty_length: String,
    pub is_morning_start: bool,
    pub is_evening_finish: bool,
    pub is_night_finish: bool,
    pub is_elongated: bool,
    pub is_high_sector: bool,
    pub hours_between_midnight: String,
}

/// Contiguous run of duty periods
#[derive(Debug, Clone, PartialEq)]
pub struct DutyBlock {
    pub duty_periods: Vec<DutyPeriod>,
}

impl DutyBlock {
    pub fn new(duty_periods: Vec<DutyPeriod>) -> Self {
        Self { duty_periods }
    }

    /// Number of duty periods in the block
    pub fn duty_count(&self) -> usize {
        self.duty_periods.len()
    }
}

/// Signals derived from the raw duty attributes
#[derive(Debug, Clone)]
pub struct Stage2Signals {
    /// Source duty block
    pub block: DutyBlock,
    /// Run length of consecutive elongated duties
    pub consecutive_elongated: Vec<u32>,
    /// Run length of consecutive high-sector duties
    pub consecutive_high_sector: Vec<u32>,
    pub morning_to_evening: Vec<f64>,
    /// Ineffective contextual rest before subtracting the actual rest gap
    pub contextual_rest_part_one: Vec<f64>,
    pub night_to_early: Vec<f64>,
    pub suboptimal_night: Vec<f64>,
}

/// Contributions that depend on stage 2 signals
#[derive(Debug, Clone)]
pub struct Stage3Signals {
    /// Source stage 2 signals
    pub stage2: Stage2Signals,
    pub early_to_night: Vec<f64>,
    /// Part one minus the rest gap to the next duty, as a fraction of a day
    pub contextual_rest_part_two: Vec<f64>,
    pub sector: Vec<f64>,
    pub long_duties: Vec<f64>,
}

/// Ineffective contextual rest contribution
#[derive(Debug, Clone)]
pub struct Stage4Signals {
    /// Source stage 3 signals
    pub stage3: Stage3Signals,
    pub contextual_rest: Vec<f64>,
}

/// Lagged contribution of earlier duties in the block
#[derive(Debug, Clone)]
pub struct Stage5Signals {
    /// Source stage 4 signals
    pub stage4: Stage4Signals,
    pub preliminary: Vec<f64>,
}

/// Score of a single duty period
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DutyPeriodScore {
    pub score: f64,
}

/// Scores of every duty period in a block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DutyBlockScore {
    pub duty_period_scores: Vec<DutyPeriodScore>,
}

/// Scores of every block in request order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreList {
    pub duty_block_scores: Vec<DutyBlockScore>,
}

impl ScoreList {
    /// Iterate every duty period score in block order
    pub fn iter_scores(&self) -> impl Iterator<Item = f64> + '_ {
        self.duty_block_scores
            .iter()
            .flat_map(|b| b.duty_period_scores.iter().map(|s| s.score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_uses_contract_field_names() {
        let json = r#"{"IdxInBlock":[1,2],"CommuteTime":["0:45:00","0:45:00"]}"#;
        let request: FrmModelRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.idx_in_block, Some(vec![1, 2]));
        assert_eq!(request.len(), 2);
        assert!(request.duty_length.is_none());
    }

    #[test]
    fn test_response_serializes_score_field() {
        let response = FrmModelResponse {
            frm_score: Some(vec!["1.00".to_string()]),
            workload_score: None,
            error_number: 0,
            error_description: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["FRMScore"][0], "1.00");
        assert_eq!(json["ErrorNumber"], 0);
        assert!(response.is_success());
    }

    #[test]
    fn test_score_list_flattens_in_block_order() {
        let list = ScoreList {
            duty_block_scores: vec![
                DutyBlockScore {
                    duty_period_scores: vec![DutyPeriodScore { score: 1.0 }, DutyPeriodScore { score: 2.0 }],
                },
                DutyBlockScore {
                    duty_period_scores: vec![DutyPeriodScore { score: 3.0 }],
                },
            ],
        };
        assert_eq!(list.iter_scores().collect::<Vec<_>>(), vec![1.0, 2.0, 3.0]);
    }
}
