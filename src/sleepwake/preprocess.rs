//! Duty preprocessing for the sleep/wake simulation
//!
//! Builds one [`DutyRow`] per request entry, merges duties separated by a
//! short rest, assigns blocks and estimates commute windows.

use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use tracing::warn;

use crate::error::ComputeError;
use crate::mapper::{parse_clock, parse_date, parse_duration};
use crate::sleepwake::model::{midnight, INTERVAL_MINUTES, MIN_ONE_DAY_OFF_HOURS, MIN_REST_HOURS, SHORT_SLEEP_HOURS};
use crate::sleepwake::types::{Disruption, DutyRow, DutyType, SleepFeatures};
use crate::types::FrmModelRequest;

/// Crew routes for contactable duties
pub const CONTACTABLES: [&str; 12] = [
    "CTB", "EXPT", "HCTB", "HCT", "HCTD", "HCTY", "IDCT", "TCBA", "NFID", "TCBP", "TCTB", "UNCT",
];

/// Crew routes for standby duties
pub const STANDBYS: [&str; 17] = [
    "ADRS", "ADTY", "ASBY", "ASRS", "CSBE", "CSBL", "CSBY", "ESBY", "HSBY", "LSBY", "MSBY", "R21S", "SBE",
    "SBL", "SBM", "SBY", "TSBY",
];

/// Standby callout location that marks a home standby
pub const HOME_CALLOUT: &str = "HOME";

/// Prepares duty rows from a validated request
pub struct Preprocessor;

impl Preprocessor {
    /// Build, sort, merge and annotate the duty rows.
    ///
    /// `workload` holds one FRAM score per request entry.
    pub fn prepare(request: &FrmModelRequest, workload: &[f64]) -> Result<Vec<DutyRow>, ComputeError> {
        let mut rows = build_rows(request, workload)?;
        if rows.is_empty() {
            return Err(ComputeError::Internal("no duties to simulate".to_string()));
        }
        rows.sort_by_key(|r| (r.start.date(), r.start.time()));

        merge_short_rests(&mut rows);
        assign_blocks(&mut rows);
        estimate_commutes(&mut rows);
        for row in rows.iter_mut() {
            row.duty_type = duty_type(row.start, row.end);
            row.disruption = disruption(row.start.time(), row.end.time());
            row.is_contactable = CONTACTABLES.contains(&row.crew_route.as_str());
            row.is_standby = STANDBYS.contains(&row.crew_route.as_str());
        }
        shift_late_availability(&mut rows);
        Ok(rows)
    }
}

fn build_rows(request: &FrmModelRequest, workload: &[f64]) -> Result<Vec<DutyRow>, ComputeError> {
    let n = request.len();
    let missing = |name: &str| ComputeError::NullArgument(format!("{name} is required for the sleep/wake simulation"));
    let start_dates = request.start_date_local_time.as_deref().ok_or_else(|| missing("StartDateLocalTime"))?;
    let start_times = request.start_time_local_time.as_deref().ok_or_else(|| missing("StartTimeLocalTime"))?;
    let end_dates = request.end_date_local_time.as_deref().ok_or_else(|| missing("EndDateLocalTime"))?;
    let end_times = request.end_time_local_time.as_deref().ok_or_else(|| missing("EndTimeLocalTime"))?;
    let sectors = request.operational_sector_count.as_deref().ok_or_else(|| missing("OperationalSectorCount"))?;
    let callouts = request.sby_callout.as_deref().ok_or_else(|| missing("SbyCallout"))?;
    let commutes = request.commute_time.as_deref().ok_or_else(|| missing("CommuteTime"))?;
    let routes = request.crew_route.as_deref().ok_or_else(|| missing("CrewRoute"))?;
    let night_stops = request.night_stop_flag.as_deref().ok_or_else(|| missing("NightStopFlag"))?;

    (0..n)
        .map(|i| {
            let field = |values: &[String]| values.get(i).cloned().unwrap_or_default();
            let start = parse_date(&field(start_dates))?.and_time(parse_clock(&field(start_times))?);
            let end = parse_date(&field(end_dates))?.and_time(parse_clock(&field(end_times))?);
            Ok(DutyRow {
                row_index: i + 1,
                start,
                end,
                commute_time: parse_duration(&field(commutes))?,
                crew_route: field(routes),
                sby_callout: field(callouts),
                sector_count: sectors.get(i).copied().unwrap_or_default(),
                night_stop_flag: field(night_stops),
                duty_id: 0,
                rest_time: Duration::zero(),
                block_id: 0,
                day_in_block: 0,
                block_length: 0,
                commute_estimate: Duration::zero(),
                commute_begin: start,
                commute_end: end,
                min_rest_time: Duration::zero(),
                duty_type: DutyType::Undefined,
                disruption: Disruption::NonDisruptive,
                is_contactable: false,
                is_standby: false,
                workload_score: workload.get(i).copied().unwrap_or_default(),
                features: SleepFeatures::default(),
            })
        })
        .collect()
}

fn update_rest_times(rows: &mut [DutyRow]) {
    for i in 0..rows.len().saturating_sub(1) {
        rows[i].rest_time = rows[i + 1].start - rows[i].end;
    }
}

/// Fold every duty followed by less than the minimum rest into its successor
fn merge_short_rests(rows: &mut Vec<DutyRow>) {
    update_rest_times(rows);
    let min_rest = Duration::hours(MIN_REST_HOURS);
    let mut short: Vec<usize> = (0..rows.len().saturating_sub(1))
        .filter(|&i| rows[i].rest_time < min_rest)
        .collect();
    short.sort_unstable_by(|a, b| b.cmp(a));
    for idx in short {
        if idx + 1 >= rows.len() {
            continue;
        }
        let next = rows.remove(idx + 1);
        let row = &mut rows[idx];
        row.end = next.end;
        row.sector_count += next.sector_count;
        row.commute_time = row.commute_time.max(next.commute_time);
    }
    update_rest_times(rows);
    if let Some(last) = rows.last_mut() {
        last.rest_time = Duration::hours(MIN_ONE_DAY_OFF_HOURS);
    }
}

/// A new block starts when the start date advances by more than one day
fn assign_blocks(rows: &mut [DutyRow]) {
    let mut block_id = 1;
    for i in 0..rows.len() {
        if i > 0 && (rows[i].start.date() - rows[i - 1].start.date()).num_days() > 1 {
            block_id += 1;
        }
        rows[i].block_id = block_id;
        rows[i].duty_id = block_id;
    }

    let mut start = 0;
    while start < rows.len() {
        let id = rows[start].block_id;
        let end = rows[start..]
            .iter()
            .position(|r| r.block_id != id)
            .map_or(rows.len(), |p| start + p);
        let length = end - start;
        for (day, row) in rows[start..end].iter_mut().enumerate() {
            row.day_in_block = day + 1;
            row.block_length = length;
        }
        start = end;
    }
}

/// Door-to-door estimate for a commute of the given duration
pub(crate) fn estimated_commute_time(commute: Duration) -> Duration {
    let minutes = commute.num_seconds() as f64 / 60.0;
    let extra = (0.03 * minutes).powf(1.45).round_ties_even();
    commute + Duration::minutes(extra as i64)
}

/// Round the time of day to the nearest multiple of `interval` minutes
pub(crate) fn round_to_interval(t: NaiveDateTime, interval: i64) -> NaiveDateTime {
    let minutes = t.time().num_seconds_from_midnight() as f64 / 60.0;
    let rounded = (minutes / interval as f64).round_ties_even() as i64 * interval;
    midnight(t) + Duration::minutes(rounded)
}

fn estimate_commutes(rows: &mut [DutyRow]) {
    for row in rows.iter_mut() {
        row.commute_estimate = estimated_commute_time(row.commute_time);
        row.commute_begin = round_to_interval(row.start - row.commute_estimate, INTERVAL_MINUTES);
        row.commute_end = round_to_interval(row.end + row.commute_estimate, INTERVAL_MINUTES);
    }

    let positive: Vec<f64> = rows
        .iter()
        .filter(|r| r.commute_estimate > Duration::zero())
        .map(|r| r.commute_estimate.num_seconds() as f64 / 60.0)
        .collect();
    let average_minutes = if positive.is_empty() {
        0
    } else {
        (positive.iter().sum::<f64>() / positive.len() as f64) as i64
    };

    for i in 0..rows.len().saturating_sub(1) {
        rows[i].min_rest_time = rows[i + 1].commute_begin - rows[i].commute_end;
    }
    if let Some(last) = rows.last_mut() {
        last.min_rest_time = Duration::hours(MIN_REST_HOURS) - Duration::minutes(average_minutes * 2);
    }

    let min_sleep = Duration::minutes((SHORT_SLEEP_HOURS * 60.0) as i64);
    for row in rows.iter().filter(|r| r.min_rest_time < min_sleep) {
        warn!(
            row_index = row.row_index,
            duty_id = row.duty_id,
            commute_begin = %row.commute_begin,
            commute_end = %row.commute_end,
            min_rest_minutes = row.min_rest_time.num_minutes(),
            "not enough time for the minimum sleep"
        );
    }
}

fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or_default()
}

/// Classify a duty by its start time and its finish relative to the start day
pub fn duty_type(begin: NaiveDateTime, end: NaiveDateTime) -> DutyType {
    let begin_time = begin.time();
    let morning_finish = midnight(begin) + Duration::minutes(17 * 60 + 59);
    let evening_finish = midnight(begin) + Duration::hours(18);
    let early = begin_time <= hm(9, 29);
    let late = begin_time >= hm(9, 30);
    if early && end <= morning_finish {
        DutyType::Morning
    } else if late && end >= evening_finish {
        DutyType::Evening
    } else if early && end >= evening_finish {
        DutyType::Dual
    } else if late && end <= morning_finish {
        DutyType::Neutral
    } else {
        DutyType::Undefined
    }
}

pub fn disruption(begin: NaiveTime, end: NaiveTime) -> Disruption {
    if end >= hm(1, 0) && end <= hm(1, 59) {
        Disruption::Late
    } else if end >= hm(2, 0) && end <= hm(4, 59) {
        Disruption::Night
    } else if begin >= hm(2, 0) && begin <= hm(6, 59) {
        Disruption::Early
    } else {
        Disruption::NonDisruptive
    }
}

/// Contactable and home standby duties with an early commute are assumed to
/// start at 09:00
fn shift_late_availability(rows: &mut [DutyRow]) {
    let shift = |row: &mut DutyRow| {
        if row.commute_begin.hour() < 9 && row.commute_end.hour() < 9 {
            let hours = Duration::hours(9 - row.commute_begin.hour() as i64);
            row.commute_begin += hours;
            row.commute_end += hours;
        }
    };
    for row in rows.iter_mut() {
        if row.is_contactable || (row.is_standby && row.sby_callout == HOME_CALLOUT) {
            shift(row);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::tests::make_test_request;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_estimated_commute_time() {
        // 45 min: (1.35)^1.45 = 1.545 -> 2 extra minutes
        assert_eq!(estimated_commute_time(Duration::minutes(45)), Duration::minutes(47));
        assert_eq!(estimated_commute_time(Duration::zero()), Duration::zero());
    }

    #[test]
    fn test_round_to_interval() {
        assert_eq!(round_to_interval(at(1, 7, 13), 10), at(1, 7, 10));
        assert_eq!(round_to_interval(at(1, 7, 16), 10), at(1, 7, 20));
        // 23:55 rounds half-even to 24:00, the next midnight
        assert_eq!(round_to_interval(at(1, 23, 55), 10), at(2, 0, 0));
        // 7:15 -> 43.5 intervals -> 44
        assert_eq!(round_to_interval(at(1, 7, 15), 10), at(1, 7, 20));
    }

    #[test]
    fn test_duty_type() {
        assert_eq!(duty_type(at(1, 6, 0), at(1, 14, 0)), DutyType::Morning);
        assert_eq!(duty_type(at(1, 12, 0), at(1, 22, 0)), DutyType::Evening);
        assert_eq!(duty_type(at(1, 6, 0), at(1, 19, 0)), DutyType::Dual);
        assert_eq!(duty_type(at(1, 10, 0), at(1, 16, 0)), DutyType::Neutral);
        assert_eq!(duty_type(at(1, 6, 0), at(1, 17, 59) + Duration::seconds(30)), DutyType::Undefined);
    }

    #[test]
    fn test_disruption() {
        assert_eq!(disruption(hm(15, 0), hm(1, 30)), Disruption::Late);
        assert_eq!(disruption(hm(18, 0), hm(3, 0)), Disruption::Night);
        assert_eq!(disruption(hm(5, 30), hm(13, 0)), Disruption::Early);
        assert_eq!(disruption(hm(8, 0), hm(16, 0)), Disruption::NonDisruptive);
    }

    #[test]
    fn test_prepare_assigns_single_block() {
        let request = make_test_request(&[1, 2, 3]);
        let rows = Preprocessor::prepare(&request, &[1.0, 2.0, 3.0]).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.block_id == 1 && r.block_length == 3));
        assert_eq!(rows.iter().map(|r| r.day_in_block).collect::<Vec<_>>(), vec![1, 2, 3]);
        // 08:00 - 47 min = 07:13 -> 07:10; 16:00 + 47 min = 16:47 -> 16:50
        assert_eq!(rows[0].commute_begin, at(1, 7, 10));
        assert_eq!(rows[0].commute_end, at(1, 16, 50));
        assert_eq!(rows[0].min_rest_time, at(2, 7, 10) - at(1, 16, 50));
        // 8h minus twice the 47 minute average estimate
        assert_eq!(rows[2].min_rest_time, Duration::minutes(480 - 94));
        assert_eq!(rows[2].rest_time, Duration::hours(36));
        assert_eq!(rows[1].workload_score, 2.0);
        assert_eq!(rows[0].duty_type, DutyType::Morning);
    }

    #[test]
    fn test_prepare_merges_short_rest() {
        let mut request = make_test_request(&[1, 2]);
        request.start_date_local_time = Some(vec!["1/3/2024".into(), "1/3/2024".into()]);
        request.end_date_local_time = Some(vec!["1/3/2024".into(), "1/3/2024".into()]);
        request.start_time_local_time = Some(vec!["06:00".into(), "13:00".into()]);
        request.end_time_local_time = Some(vec!["10:00".into(), "18:00".into()]);
        request.commute_time = Some(vec!["0:30:00".into(), "1:00:00".into()]);
        let rows = Preprocessor::prepare(&request, &[1.0, 2.0]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].end, at(1, 18, 0));
        assert_eq!(rows[0].sector_count, 4);
        assert_eq!(rows[0].commute_time, Duration::hours(1));
        assert_eq!(rows[0].workload_score, 1.0);
    }

    #[test]
    fn test_prepare_splits_blocks_on_day_gap() {
        let mut request = make_test_request(&[1, 2, 1]);
        request.start_date_local_time = Some(vec!["1/3/2024".into(), "2/3/2024".into(), "5/3/2024".into()]);
        request.end_date_local_time = request.start_date_local_time.clone();
        let rows = Preprocessor::prepare(&request, &[0.0; 3]).unwrap();
        assert_eq!(rows.iter().map(|r| r.block_id).collect::<Vec<_>>(), vec![1, 1, 2]);
        assert_eq!(rows.iter().map(|r| r.duty_id).collect::<Vec<_>>(), vec![1, 1, 2]);
        assert_eq!(rows[2].block_length, 1);
    }

    #[test]
    fn test_prepare_sorts_by_start() {
        let mut request = make_test_request(&[1, 2]);
        request.start_date_local_time = Some(vec!["3/3/2024".into(), "2/3/2024".into()]);
        request.end_date_local_time = request.start_date_local_time.clone();
        let rows = Preprocessor::prepare(&request, &[5.0, 6.0]).unwrap();
        assert_eq!(rows[0].row_index, 2);
        assert_eq!(rows[0].workload_score, 6.0);
    }

    #[test]
    fn test_contactable_commute_shifted_to_nine() {
        let mut request = make_test_request(&[1]);
        request.crew_route = Some(vec!["CTB".into()]);
        request.start_time_local_time = Some(vec!["05:00".into()]);
        request.end_time_local_time = Some(vec!["07:00".into()]);
        let rows = Preprocessor::prepare(&request, &[0.0]).unwrap();
        assert!(rows[0].is_contactable);
        // 04:13 -> 04:10 shifted by 5 hours
        assert_eq!(rows[0].commute_begin, at(1, 9, 10));
        assert_eq!(rows[0].commute_end, at(1, 12, 50));
    }

    #[test]
    fn test_home_standby_needs_home_callout() {
        let mut request = make_test_request(&[1]);
        request.crew_route = Some(vec!["SBY".into()]);
        request.start_time_local_time = Some(vec!["05:00".into()]);
        request.end_time_local_time = Some(vec!["07:00".into()]);
        let rows = Preprocessor::prepare(&request, &[0.0]).unwrap();
        assert!(rows[0].is_standby);
        assert_eq!(rows[0].commute_begin, at(1, 4, 10));

        request.sby_callout = Some(vec!["HOME".into()]);
        let rows = Preprocessor::prepare(&request, &[0.0]).unwrap();
        assert_eq!(rows[0].commute_begin, at(1, 9, 10));
    }
}
