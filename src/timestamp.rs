//! Tolerant date/time parsing
//!
//! Meter exports write timestamps in whatever format the vendor chose. The
//! parser tries a fixed list of layouts (numeric offsets, 12-hour clocks and
//! month names included), month-first before day-first for ambiguous slash
//! dates, and gives up with `None` rather than guessing.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime};
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{EnergyError, Result};

lazy_static! {
    /// Cheap pre-check for content that could be a date or time
    static ref DATE_LIKE: Regex = Regex::new(concat!(
        r"^(?:(?:\d{1,4}[-/.]\d{1,2}[-/.]\d{1,4}",
        r"|\d{1,2}[- ][A-Za-z]{3,9}[- ]\d{4}",
        r"|[A-Za-z]{3,9} \d{1,2},? \d{4})(?:[ T].*)?",
        r"|\d{1,2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?: ?[AaPp][Mm])?)$"
    ))
    .unwrap();
}

/// Layouts carrying a numeric UTC offset; the offset is dropped
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f %z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M %z",
    "%Y-%m-%dT%H:%M%z",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M",
    "%m/%d/%Y %H:%M:%S%.f",
    "%m/%d/%Y %H:%M",
    "%d/%m/%Y %H:%M:%S%.f",
    "%d/%m/%Y %H:%M",
    "%d-%m-%Y %H:%M:%S%.f",
    "%d-%m-%Y %H:%M",
    "%d.%m.%Y %H:%M:%S%.f",
    "%d.%m.%Y %H:%M",
    // 12-hour clocks
    "%Y-%m-%d %I:%M:%S%.f %p",
    "%Y-%m-%d %I:%M %p",
    "%m/%d/%Y %I:%M:%S%.f %p",
    "%m/%d/%Y %I:%M %p",
    "%d/%m/%Y %I:%M:%S%.f %p",
    "%d/%m/%Y %I:%M %p",
    // Month names
    "%d-%b-%Y %H:%M:%S%.f",
    "%d-%b-%Y %H:%M",
    "%d-%b-%Y %I:%M:%S%.f %p",
    "%d-%b-%Y %I:%M %p",
    "%d %B %Y %H:%M:%S%.f",
    "%d %B %Y %H:%M",
    "%B %d, %Y %H:%M:%S%.f",
    "%B %d, %Y %H:%M",
    "%B %d, %Y %I:%M:%S%.f %p",
    "%B %d, %Y %I:%M %p",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%d-%b-%Y",
    "%d %B %Y",
    "%B %d, %Y",
];

const TIME_FORMATS: &[&str] = &["%H:%M:%S%.f", "%H:%M", "%I:%M:%S%.f %p", "%I:%M %p"];

/// Parse a timestamp written in any of the supported layouts
///
/// Offsets (RFC 3339 or `+hhmm`) are dropped, keeping the wall-clock time as
/// written. A bare time of day is placed on the current local date.
///
/// # Examples
/// ```
/// use wattwatch::timestamp::parse_timestamp;
///
/// assert!(parse_timestamp("2024-03-01 12:30:00").is_some());
/// assert!(parse_timestamp("13/02/2024 08:00").is_some());
/// assert!(parse_timestamp("not a date").is_none());
/// ```
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local());
    }

    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(s, format) {
            return Some(dt.naive_local());
        }
    }

    for format in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt);
        }
    }

    for format in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, format) {
            return d.and_hms_opt(0, 0, 0);
        }
    }

    for format in TIME_FORMATS {
        if let Ok(t) = NaiveTime::parse_from_str(s, format) {
            return Some(Local::now().date_naive().and_time(t));
        }
    }

    None
}

/// Whether the text has the shape of a date or time
pub fn looks_like_timestamp(raw: &str) -> bool {
    DATE_LIKE.is_match(raw.trim())
}

/// Parse a user-supplied window bound, accepting the same layouts
///
/// An absent or blank bound is `Ok(None)`; text that is not a timestamp is
/// an `InvalidInput` error rather than a silently widened window.
pub fn parse_bound(raw: Option<&str>) -> Result<Option<NaiveDateTime>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(text) => parse_timestamp(text)
            .map(Some)
            .ok_or_else(|| EnergyError::InvalidInput(format!("'{}' is not a date or time", text))),
    }
}
