use crate::error::CoreError;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::str::FromStr;

/// Parse an IANA timezone name
pub fn parse_timezone(timezone: &str) -> Result<Tz, CoreError> {
    Tz::from_str(timezone).map_err(|_| CoreError::InvalidTimezone(timezone.to_string()))
}

/// Validate IANA timezone name
pub fn validate_timezone(timezone: &str) -> Result<(), CoreError> {
    parse_timezone(timezone).map(|_| ())
}

/// Current calendar date in `tz`
pub fn today_in(tz: &Tz) -> NaiveDate {
    Utc::now().with_timezone(tz).date_naive()
}

/// UTC instant of local `time` on `date` in `tz`.
///
/// Ambiguous local times (fall back) resolve to the earlier instant; times
/// that don't exist (spring forward) move forward by the gap.
pub fn scheduled_at(date: NaiveDate, time: NaiveTime, tz: &Tz) -> DateTime<Utc> {
    local_to_utc(date.and_time(time), tz)
}

/// UTC bounds `[start, end)` covering local days `from..=to` in `tz`.
pub fn local_range_utc(from: NaiveDate, to: NaiveDate, tz: &Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = local_to_utc(from.and_time(NaiveTime::MIN), tz);
    let end = local_to_utc((to + Duration::days(1)).and_time(NaiveTime::MIN), tz);
    (start, end)
}

fn local_to_utc(naive: chrono::NaiveDateTime, tz: &Tz) -> DateTime<Utc> {
    if let Some(local) = tz.from_local_datetime(&naive).earliest() {
        return local.with_timezone(&Utc);
    }
    // Gaps are at most a few hours; probe forward in 30 minute steps
    for step in 1..=8 {
        let shifted = naive + Duration::minutes(30 * step);
        if let Some(local) = tz.from_local_datetime(&shifted).earliest() {
            return local.with_timezone(&Utc);
        }
    }
    Utc.from_utc_datetime(&naive)
}

/// Format a UTC instant in `tz` for display
pub fn format_in(dt: DateTime<Utc>, tz: &Tz, format: &str) -> String {
    dt.with_timezone(tz).format(format).to_string()
}
