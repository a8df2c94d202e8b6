//! Acquisition metadata recovered from product and file names
//!
//! Handles Sentinel-1 product names (`S1A_IW_GRDH_1SDV_20200815T005913_...`)
//! and measurement file names (`s1a-iw-grd-vv-20200815t005913-...tiff`).

use crate::types::{Polarization, SarError, SarResult};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;

const DATE_PATTERN: &str = r"(\d{4})(\d{2})(\d{2})(?:[Tt](\d{2})(\d{2})(\d{2}))?";
const POLARIZATION_PATTERN: &str = r"(?i)(?:^|[-_.])(vv|vh|hh|hv)(?:[-_.]|$)";

/// Metadata parsed from a name
#[derive(Debug, Clone, PartialEq)]
pub struct SceneName {
    pub date: NaiveDate,
    /// Present when the name carries a time of day
    pub datetime: Option<NaiveDateTime>,
    pub polarization: Option<Polarization>,
}

/// First valid acquisition timestamp in `name`; a bare date maps to midnight
/// with `has_time` false
fn first_timestamp(name: &str) -> SarResult<Option<(NaiveDateTime, bool)>> {
    let re = Regex::new(DATE_PATTERN)
        .map_err(|e| SarError::Processing(format!("Invalid date pattern: {}", e)))?;

    for captures in re.captures_iter(name) {
        let field = |i: usize| captures.get(i).and_then(|m| m.as_str().parse::<u32>().ok());
        let (Some(year), Some(month), Some(day)) = (field(1), field(2), field(3)) else {
            continue;
        };
        let Some(date) = NaiveDate::from_ymd_opt(year as i32, month, day) else {
            continue;
        };
        match (field(4), field(5), field(6)) {
            (Some(h), Some(m), Some(s)) => {
                if let Some(time) = NaiveTime::from_hms_opt(h, m, s) {
                    return Ok(Some((date.and_time(time), true)));
                }
            }
            _ => {
                if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
                    return Ok(Some((midnight, false)));
                }
            }
        }
    }
    Ok(None)
}

/// Acquisition date (`YYYYMMDD`) from a name
pub fn acquisition_date(name: &str) -> SarResult<Option<NaiveDate>> {
    Ok(first_timestamp(name)?.map(|(dt, _)| dt.date()))
}

/// Polarization token (`vv`, `vh`, `hh`, `hv`) from a name
pub fn polarization(name: &str) -> SarResult<Option<Polarization>> {
    let re = Regex::new(POLARIZATION_PATTERN)
        .map_err(|e| SarError::Processing(format!("Invalid polarization pattern: {}", e)))?;
    Ok(re.captures(name)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok()))
}

/// Date, optional time and polarization from a name; a name without a date is rejected
pub fn parse_scene_name(name: &str) -> SarResult<SceneName> {
    let (datetime, has_time) = first_timestamp(name)?
        .ok_or_else(|| SarError::InvalidFormat(format!("No acquisition date in name: {}", name)))?;
    Ok(SceneName {
        date: datetime.date(),
        datetime: has_time.then_some(datetime),
        polarization: polarization(name)?,
    })
}
