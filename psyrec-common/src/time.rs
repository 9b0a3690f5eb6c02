//! Timestamp and date utilities for Psytools exports

use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// `Completed Timestamp` / `Processed Timestamp` columns, e.g. `2017-01-21 10:42:07.000000`
pub const PSYTOOLS_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Full dates typed by respondents, e.g. `12-04-2005`
pub const DAY_MONTH_YEAR_FORMAT: &str = "%d-%m-%Y";

/// Month precision dates typed by respondents, e.g. `04-2017`
pub const MONTH_YEAR_FORMAT: &str = "%m-%Y";

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Parse a timestamp column under the given chrono format
pub fn parse_timestamp(value: &str, format: &str) -> Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), format)
        .map_err(|e| Error::Parse(format!("timestamp '{}' ({}): {}", value, format, e)))
}

/// Parse a `DD-MM-YYYY` answer
pub fn parse_day_month_year(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DAY_MONTH_YEAR_FORMAT)
        .map_err(|e| Error::Parse(format!("date '{}' ({}): {}", value, DAY_MONTH_YEAR_FORMAT, e)))
}

/// Parse a `MM-YYYY` answer as the first day of that month
pub fn parse_month_year(value: &str) -> Result<NaiveDate> {
    // chrono refuses to build a date without a day
    let padded = format!("01-{}", value.trim());
    NaiveDate::parse_from_str(&padded, DAY_MONTH_YEAR_FORMAT)
        .map_err(|e| Error::Parse(format!("date '{}' ({}): {}", value, MONTH_YEAR_FORMAT, e)))
}

/// Age in days at `at` for someone born on `birth` (negative if `at` precedes birth)
pub fn age_in_days(at: NaiveDate, birth: NaiveDate) -> i64 {
    (at - birth).num_days()
}
