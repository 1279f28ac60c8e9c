//! Final sleep/wake score per duty

use crate::sleepwake::types::DutyRow;

const WORKLOAD_WEIGHT: f64 = 0.96;
const ALERTNESS_BEFORE_DUTY_WEIGHT: f64 = 1.36;
const CUMULATIVE_ALERTNESS_WEIGHT: f64 = -0.91;
const ALERTNESS_WHEN_SLEEP_WEIGHT: f64 = 0.83;
const CUMULATIVE_SLEEP_WEIGHT: f64 = -1.85;

/// Linear regression over the workload score and the simulated features
pub struct Scorer;

impl Scorer {
    /// Raw score of one row
    pub fn score(row: &DutyRow) -> f64 {
        let f = &row.features;
        WORKLOAD_WEIGHT * row.workload_score
            + ALERTNESS_BEFORE_DUTY_WEIGHT * f.alertness_before_duty
            + CUMULATIVE_ALERTNESS_WEIGHT * f.cumulative_alertness
            + ALERTNESS_WHEN_SLEEP_WEIGHT * f.alertness_when_sleep
            + CUMULATIVE_SLEEP_WEIGHT * f.cumulative_sleep_length
    }

    /// Formatted scores in request order
    pub fn scores(rows: &[DutyRow]) -> Vec<String> {
        let mut ordered: Vec<&DutyRow> = rows.iter().collect();
        ordered.sort_by_key(|r| r.row_index);
        ordered.into_iter().map(|r| format_n2(Self::score(r))).collect()
    }
}

/// Two decimals with comma thousands separators, e.g. `-1,234.57`
pub fn format_n2(value: f64) -> String {
    if !value.is_finite() {
        return "NaN".to_string();
    }
    let fixed = format!("{value:.2}");
    let (sign, digits) = match fixed.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", fixed.as_str()),
    };
    let (int, frac) = digits.split_once('.').unwrap_or((digits, "00"));

    let mut grouped = String::with_capacity(int.len() + int.len() / 3);
    for (i, ch) in int.chars().enumerate() {
        if i > 0 && (int.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    format!("{sign}{grouped}.{frac}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::tests::make_test_request;
    use crate::sleepwake::preprocess::Preprocessor;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_n2() {
        assert_eq!(format_n2(0.0), "0.00");
        assert_eq!(format_n2(12.346), "12.35");
        assert_eq!(format_n2(-3.1), "-3.10");
        assert_eq!(format_n2(1234.5), "1,234.50");
        assert_eq!(format_n2(-1234567.891), "-1,234,567.89");
        assert_eq!(format_n2(999.999), "1,000.00");
        assert_eq!(format_n2(f64::NAN), "NaN");
        assert_eq!(format_n2(f64::INFINITY), "NaN");
    }

    #[test]
    fn test_score_weights() {
        let request = make_test_request(&[1]);
        let mut rows = Preprocessor::prepare(&request, &[10.0]).unwrap();
        let f = &mut rows[0].features;
        f.alertness_before_duty = 1.0;
        f.cumulative_alertness = 1.0;
        f.alertness_when_sleep = 1.0;
        f.cumulative_sleep_length = 1.0;
        // 9.6 + 1.36 - 0.91 + 0.83 - 1.85
        assert!((Scorer::score(&rows[0]) - 9.03).abs() < 1e-9);
    }

    #[test]
    fn test_scores_follow_request_order() {
        let request = make_test_request(&[1, 2]);
        let mut rows = Preprocessor::prepare(&request, &[1.0, 2.0]).unwrap();
        rows.reverse();
        assert_eq!(Scorer::scores(&rows), vec!["0.96", "1.92"]);
    }
}
