//! Pipeline orchestration
//!
//! This module provides the public API of the engine. It runs a request
//! through validation, the FRAM regression and the sleep/wake simulation,
//! and folds any failure into the error fields of the response.

use tracing::{debug, error};

use crate::error::ComputeError;
use crate::fram::ScoreCalculator;
use crate::mapper::EntityMapper;
use crate::sleepwake::{process_sleep_wake, SimulationConfig};
use crate::types::{FrmModelRequest, FrmModelResponse};

/// Score a request with the default simulation limits.
///
/// # Example
/// ```ignore
/// let response = generate(Some(&request));
/// if response.is_success() {
///     println!("{:?}", response.frm_score);
/// }
/// ```
pub fn generate(request: Option<&FrmModelRequest>) -> FrmModelResponse {
    ScoreGenerator::new().generate(request)
}

/// Raw FRAM workload scores without the sleep/wake adjustment
pub fn workload_scores(request: Option<&FrmModelRequest>) -> FrmModelResponse {
    into_response(fram_scores(request).map(|(_, strings)| (None, strings)))
}

/// Scores a request end to end.
///
/// The generator only carries the simulation limits; it holds no state
/// between requests.
#[derive(Debug, Clone, Default)]
pub struct ScoreGenerator {
    config: SimulationConfig,
}

impl ScoreGenerator {
    /// Create a generator with default simulation limits
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a generator with specific simulation limits
    pub fn with_config(config: SimulationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Score every duty period of the request.
    ///
    /// Never fails: errors are reported through `error_number` and
    /// `error_description`, with both score arrays cleared.
    pub fn generate(&self, request: Option<&FrmModelRequest>) -> FrmModelResponse {
        into_response(self.try_generate(request).map(|(frm, workload)| (Some(frm), workload)))
    }

    /// Score every duty period, returning `(frm_scores, workload_scores)`
    pub fn try_generate(&self, request: Option<&FrmModelRequest>) -> Result<(Vec<String>, Vec<String>), ComputeError> {
        let (workload, strings) = fram_scores(request)?;
        let request = request.ok_or_else(|| ComputeError::Internal("request vanished after validation".to_string()))?;
        let frm = process_sleep_wake(request, &workload, &self.config)?;
        debug!(duties = workload.len(), scores = frm.len(), "generated FRM scores");
        Ok((frm, strings))
    }
}

/// Validate the request and run the FRAM regression
fn fram_scores(request: Option<&FrmModelRequest>) -> Result<(Vec<f64>, Vec<String>), ComputeError> {
    let blocks = EntityMapper::duty_blocks(request)?;
    let scores = ScoreCalculator::calculate(blocks)?;
    let workload: Vec<f64> = scores.iter_scores().collect();
    Ok((workload, EntityMapper::score_array(&scores)))
}

fn into_response(result: Result<(Option<Vec<String>>, Vec<String>), ComputeError>) -> FrmModelResponse {
    match result {
        Ok((frm_score, workload_score)) => FrmModelResponse {
            frm_score,
            workload_score: Some(workload_score),
            error_number: 0,
            error_description: None,
        },
        Err(err) => {
            let error_number = err.error_number();
            error!(error_number, error = %err, "scoring failed");
            FrmModelResponse {
                frm_score: None,
                workload_score: None,
                error_number,
                error_description: Some(err.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ERROR_INVALID_FORMAT, ERROR_INVALID_VALUE, ERROR_NULL_ARGUMENT, ERROR_UNCLASSIFIED};
    use crate::mapper::tests::make_test_request;
    use crate::mapper::NULL_REQUEST;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_generate_success() {
        let request = make_test_request(&[1, 2, 3]);
        let response = generate(Some(&request));
        assert!(response.is_success(), "{:?}", response.error_description);
        assert_eq!(response.frm_score.as_ref().map(Vec::len), Some(3));
        assert_eq!(response.workload_score.as_ref().map(Vec::len), Some(3));
        assert!(response.error_description.is_none());
    }

    #[test]
    fn test_null_request() {
        let response = generate(None);
        assert_eq!(response.error_number, ERROR_NULL_ARGUMENT);
        assert_eq!(response.error_description.as_deref(), Some(NULL_REQUEST));
        assert!(response.frm_score.is_none());
        assert!(response.workload_score.is_none());
    }

    #[test]
    fn test_length_mismatch() {
        let mut request = make_test_request(&[1, 2]);
        request.duty_length = Some(vec!["08:00".to_string()]);
        let response = generate(Some(&request));
        assert_eq!(response.error_number, ERROR_INVALID_FORMAT);
        assert!(response.frm_score.is_none());
    }

    #[test]
    fn test_invalid_home_standby_value() {
        let mut request = make_test_request(&[1, 2]);
        request.isa_home_standby_flag = Some(vec![0, 2]);
        let response = generate(Some(&request));
        assert_eq!(response.error_number, ERROR_INVALID_VALUE);
        let description = response.error_description.unwrap();
        assert!(description.starts_with("InvalidDataValueException for parameter"));
        assert!(description.ends_with("at Index 1 contains Value 2"), "{description}");
    }

    #[test]
    fn test_empty_request_is_unclassified() {
        let request = make_test_request(&[]);
        let response = generate(Some(&request));
        assert_eq!(response.error_number, ERROR_UNCLASSIFIED);
        assert!(response.frm_score.is_none());
    }

    #[test]
    fn test_workload_scores_skip_simulation() {
        let request = make_test_request(&[1, 2, 3]);
        let response = workload_scores(Some(&request));
        assert!(response.is_success());
        assert!(response.frm_score.is_none());
        let full = generate(Some(&request));
        assert_eq!(response.workload_score, full.workload_score);
    }

    #[test]
    fn test_tight_filter_limit_still_answers() {
        let config = SimulationConfig {
            max_filter_steps: 1,
            max_grid_escalations: 0,
        };
        let response = ScoreGenerator::with_config(config).generate(Some(&make_test_request(&[1, 2])));
        // either scored or reported as unsolvable, never a panic
        assert!(response.is_success() || response.error_number == ERROR_UNCLASSIFIED);
        assert_eq!(ScoreGenerator::with_config(config).config(), &config);
    }
}
