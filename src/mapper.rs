//! Request validation and mapping into duty blocks
//!
//! The mapper is the only place where the loosely typed request arrays are
//! inspected. Validation runs in a fixed order (presence, then lengths, then
//! per-index values) so the first problem found decides the error number.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use tracing::debug;

use crate::error::ComputeError;
use crate::types::{DutyBlock, DutyPeriod, FrmModelRequest, ScoreList};

/// Description reported when the request itself is absent
pub const NULL_REQUEST: &str = "Null request";
/// Description reported when a required request array is absent
pub const NULL_PARAMETER: &str = "Null request parameter value";
/// Description reported when the request arrays differ in length
pub const LENGTH_MISMATCH: &str = "Mismatch of duty periods count";

/// Maps scoring requests into validated duty blocks
pub struct EntityMapper;

impl EntityMapper {
    /// Validate the request and group its duty periods into blocks.
    pub fn duty_blocks(request: Option<&FrmModelRequest>) -> Result<Vec<DutyBlock>, ComputeError> {
        let request = request.ok_or_else(|| ComputeError::NullArgument(NULL_REQUEST.to_string()))?;
        let view = RequestView::from_request(request)?;
        view.validate_format()?;
        view.validate_values()?;
        view.map_blocks()
    }

    /// Block sizes derived from the ordinal sequence.
    ///
    /// A block ends at the last entry or wherever the next ordinal does not
    /// increase.
    pub fn block_sizes(ordinals: &[i32]) -> Vec<usize> {
        let mut sizes = Vec::new();
        let mut run = 0;
        for (i, &ordinal) in ordinals.iter().enumerate() {
            run += 1;
            let boundary = match ordinals.get(i + 1) {
                Some(&next) => next <= ordinal,
                None => true,
            };
            if boundary {
                sizes.push(run);
                run = 0;
            }
        }
        sizes
    }

    /// Flatten block scores into strings in block order
    pub fn score_array(scores: &ScoreList) -> Vec<String> {
        scores.iter_scores().map(|s| s.to_string()).collect()
    }
}

/// Borrowed view of a request whose required arrays are known to be present
struct RequestView<'a> {
    idx_in_block: &'a [i32],
    operational_sector_count: &'a [i32],
    isa_home_standby_flag: &'a [i32],
    start_date_local_time: &'a [String],
    start_time_local_time: &'a [String],
    end_date_local_time: &'a [String],
    end_time_local_time: &'a [String],
    end_date_crew_reference_time: &'a [String],
    end_time_crew_reference_time: &'a [String],
    start_date_time_zulu: &'a [String],
    end_date_time_zulu: &'a [String],
    duty_length: &'a [String],
    is_duty_morning_start: &'a [i32],
    is_duty_evening_finish: &'a [i32],
    is_duty_night_finish: &'a [i32],
    is_duty_elongated: &'a [i32],
    is_duty_high_sector: &'a [i32],
    hours_between_midnight: &'a [String],
    is_standby: &'a [String],
    is_contactable: &'a [String],
    commute_time: &'a [String],
    crew_route: &'a [String],
    night_stop_flag: &'a [String],
    sby_callout: &'a [String],
}

fn required<'a, T>(field: &str, value: &'a Option<Vec<T>>) -> Result<&'a [T], ComputeError> {
    match value {
        Some(v) => Ok(v.as_slice()),
        None => {
            debug!(field, "missing request parameter");
            Err(ComputeError::NullArgument(NULL_PARAMETER.to_string()))
        }
    }
}

impl<'a> RequestView<'a> {
    fn from_request(r: &'a FrmModelRequest) -> Result<Self, ComputeError> {
        Ok(Self {
            idx_in_block: required("IdxInBlock", &r.idx_in_block)?,
            operational_sector_count: required("OperationalSectorCount", &r.operational_sector_count)?,
            isa_home_standby_flag: required("IsaHomeStandbyFlag", &r.isa_home_standby_flag)?,
            start_date_local_time: required("StartDateLocalTime", &r.start_date_local_time)?,
            start_time_local_time: required("StartTimeLocalTime", &r.start_time_local_time)?,
            end_date_local_time: required("EndDateLocalTime", &r.end_date_local_time)?,
            end_time_local_time: required("EndTimeLocalTime", &r.end_time_local_time)?,
            end_date_crew_reference_time: required("EndDateCrewReferenceTime", &r.end_date_crew_reference_time)?,
            end_time_crew_reference_time: required("EndTimeCrewReferenceTime", &r.end_time_crew_reference_time)?,
            start_date_time_zulu: required("StartDateTimeZulu", &r.start_date_time_zulu)?,
            end_date_time_zulu: required("EndDateTimeZulu", &r.end_date_time_zulu)?,
            duty_length: required("DutyLength", &r.duty_length)?,
            is_duty_morning_start: required("IsDutyMorningStart", &r.is_duty_morning_start)?,
            is_duty_evening_finish: required("IsDutyEveningFinish", &r.is_duty_evening_finish)?,
            is_duty_night_finish: required("IsDutyNightFinish", &r.is_duty_night_finish)?,
            is_duty_elongated: required("IsDutyElongated", &r.is_duty_elongated)?,
            is_duty_high_sector: required("IsDutyHighSector", &r.is_duty_high_sector)?,
            hours_between_midnight: required("HoursBetweenMidnight", &r.hours_between_midnight)?,
            is_standby: required("IsStandby", &r.is_standby)?,
            is_contactable: required("IsContactable", &r.is_contactable)?,
            commute_time: required("CommuteTime", &r.commute_time)?,
            crew_route: required("CrewRoute", &r.crew_route)?,
            night_stop_flag: required("NightStopFlag", &r.night_stop_flag)?,
            sby_callout: required("SbyCallout", &r.sby_callout)?,
        })
    }

    fn validate_format(&self) -> Result<(), ComputeError> {
        let n = self.idx_in_block.len();
        let lengths = [
            self.operational_sector_count.len(),
            self.isa_home_standby_flag.len(),
            self.start_date_local_time.len(),
            self.start_time_local_time.len(),
            self.end_date_local_time.len(),
            self.end_time_local_time.len(),
            self.end_date_crew_reference_time.len(),
            self.end_time_crew_reference_time.len(),
            self.start_date_time_zulu.len(),
            self.end_date_time_zulu.len(),
            self.duty_length.len(),
            self.is_duty_morning_start.len(),
            self.is_duty_evening_finish.len(),
            self.is_duty_night_finish.len(),
            self.is_duty_elongated.len(),
            self.is_duty_high_sector.len(),
            self.hours_between_midnight.len(),
            self.is_contactable.len(),
            self.is_standby.len(),
            self.commute_time.len(),
            self.crew_route.len(),
            self.night_stop_flag.len(),
            self.sby_callout.len(),
        ];
        if lengths.iter().all(|&len| len == n) {
            Ok(())
        } else {
            Err(ComputeError::InvalidFormat(LENGTH_MISMATCH.to_string()))
        }
    }

    fn validate_values(&self) -> Result<(), ComputeError> {
        for index in 0..self.idx_in_block.len() {
            if self.idx_in_block[index] <= 0 {
                return Err(ComputeError::invalid_value("IdxInBlock", index, self.idx_in_block[index]));
            }
            if self.operational_sector_count[index] < 0 {
                return Err(ComputeError::invalid_value(
                    "OperationalSectorCount",
                    index,
                    self.operational_sector_count[index],
                ));
            }
            check_flag("IsaHomeStandbyFlag", index, self.isa_home_standby_flag[index])?;
            check_strict_date("StartDateLocalTime", index, &self.start_date_local_time[index])?;
            check_strict_date("EndDateLocalTime", index, &self.end_date_local_time[index])?;
            check_strict_date("EndDateCrewReferenceTime", index, &self.end_date_crew_reference_time[index])?;
            check_flag("IsDutyMorningStart", index, self.is_duty_morning_start[index])?;
            check_flag("IsDutyEveningFinish", index, self.is_duty_evening_finish[index])?;
            check_flag("IsDutyNightFinish", index, self.is_duty_night_finish[index])?;
            check_flag("IsDutyElongated", index, self.is_duty_elongated[index])?;
            check_flag("IsDutyHighSector", index, self.is_duty_high_sector[index])?;
        }
        Ok(())
    }

    fn map_blocks(&self) -> Result<Vec<DutyBlock>, ComputeError> {
        let mut blocks = Vec::new();
        let mut offset = 0;
        for size in EntityMapper::block_sizes(self.idx_in_block) {
            let periods = (offset..offset + size)
                .map(|i| self.duty_period(i))
                .collect::<Result<Vec<_>, _>>()?;
            blocks.push(DutyBlock::new(periods));
            offset += size;
        }
        debug!(blocks = blocks.len(), duties = offset, "mapped request into duty blocks");
        Ok(blocks)
    }

    fn duty_period(&self, i: usize) -> Result<DutyPeriod, ComputeError> {
        Ok(DutyPeriod {
            duty_period_of_duty_block: self.idx_in_block[i],
            operational_sector_count: self.operational_sector_count[i],
            is_home_standby: self.isa_home_standby_flag[i] == 1,
            start_date_local: parse_date(&self.start_date_local_time[i])?,
            start_time_local: format_clock(parse_clock(&self.start_time_local_time[i])?),
            end_date_local: parse_date(&self.end_date_local_time[i])?,
            end_time_local: format_clock(parse_clock(&self.end_time_local_time[i])?),
            end_date_crew_reference: parse_date(&self.end_date_crew_reference_time[i])?,
            end_time_crew_reference: format_clock(parse_clock(&self.end_time_crew_reference_time[i])?),
            start_zulu: parse_date_time(&self.start_date_time_zulu[i])?,
            end_zulu: parse_date_time(&self.end_date_time_zulu[i])?,
            duty_length: self.duty_length[i].clone(),
            is_morning_start: self.is_duty_morning_start[i] == 1,
            is_evening_finish: self.is_duty_evening_finish[i] == 1,
            is_night_finish: self.is_duty_night_finish[i] == 1,
            is_elongated: self.is_duty_elongated[i] == 1,
            is_high_sector: self.is_duty_high_sector[i] == 1,
            hours_between_midnight: self.hours_between_midnight[i].clone(),
        })
    }
}

fn check_flag(field: &str, index: usize, value: i32) -> Result<(), ComputeError> {
    if value == 0 || value == 1 {
        Ok(())
    } else {
        Err(ComputeError::invalid_value(field, index, value))
    }
}

fn check_strict_date(field: &str, index: usize, value: &str) -> Result<(), ComputeError> {
    match parse_strict_date(value) {
        Some(_) => Ok(()),
        None => Err(ComputeError::invalid_value(field, index, value)),
    }
}

/// Parse exactly `d/M/yyyy`: one or two digit day and month, four digit year
fn parse_strict_date(value: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = value.split('/').collect();
    if parts.len() != 3 {
        return None;
    }
    let short = |p: &str| !p.is_empty() && p.len() <= 2 && p.bytes().all(|b| b.is_ascii_digit());
    if !short(parts[0]) || !short(parts[1]) || parts[2].len() != 4 || !parts[2].bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let day = parts[0].parse().ok()?;
    let month = parts[1].parse().ok()?;
    let year = parts[2].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Parse a calendar date in day-first or ISO form
pub(crate) fn parse_date(value: &str) -> Result<NaiveDate, ComputeError> {
    let value = value.trim();
    let date_part = value.split_whitespace().next().unwrap_or(value);
    parse_strict_date(date_part)
        .or_else(|| NaiveDate::parse_from_str(date_part, "%d/%m/%Y").ok())
        .or_else(|| NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok())
        .ok_or_else(|| ComputeError::DateParseError(value.to_string()))
}

/// Parse a wall clock time `H:mm[:ss]`
pub(crate) fn parse_clock(value: &str) -> Result<NaiveTime, ComputeError> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M"))
        .map_err(|_| ComputeError::TimeFormat(value.to_string()))
}

/// Parse a date-time `d/M/yyyy H:mm[:ss]`; a bare date means midnight
pub(crate) fn parse_date_time(value: &str) -> Result<NaiveDateTime, ComputeError> {
    let value = value.trim();
    let (date_part, time_part) = match value.split_once(|c: char| c == ' ' || c == 'T') {
        Some((d, t)) => (d, Some(t.trim())),
        None => (value, None),
    };
    let date = parse_date(date_part).map_err(|_| ComputeError::DateParseError(value.to_string()))?;
    let time = match time_part {
        Some(t) if !t.is_empty() => parse_clock(t)?,
        _ => NaiveTime::default(),
    };
    Ok(date.and_time(time))
}

/// Parse a duration `H:mm[:ss]` into a signed time span
pub(crate) fn parse_duration(value: &str) -> Result<Duration, ComputeError> {
    let value = value.trim();
    let err = || ComputeError::TimeFormat(value.to_string());
    let mut parts = value.split(':');
    let mut next = || -> Result<i64, ComputeError> {
        match parts.next() {
            Some(p) => p.trim().parse::<i64>().map_err(|_| err()),
            None => Ok(0),
        }
    };
    let hours = next()?;
    let minutes = next()?;
    let seconds = next()?;
    if !(0..60).contains(&minutes) || !(0..60).contains(&seconds) {
        return Err(err());
    }
    Ok(Duration::hours(hours) + Duration::minutes(minutes) + Duration::seconds(seconds))
}

pub(crate) fn format_clock(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}
