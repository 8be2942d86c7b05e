//! Time and granularity arithmetic.
//!
//! Everything here is pure: granularity strings such as `"5m"` or `"73h"`,
//! relative time tokens such as `"2w-ago"`, and the window alignment the
//! server applies to aggregate queries.

use crate::error::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Smallest timestamp the platform accepts, in ms since epoch
pub const MIN_TIMESTAMP_MS: i64 = 0;

/// Largest timestamp the platform accepts, 2099-12-31T23:59:59.999Z
pub const MAX_TIMESTAMP_MS: i64 = 4_102_444_799_999;

const SECOND_MS: i64 = 1_000;
const MINUTE_MS: i64 = 60 * SECOND_MS;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;
const WEEK_MS: i64 = 7 * DAY_MS;

const GRANULARITY_FORMAT: &str = "<integer>(s|m|h|d), e.g. '5m', '3h' or '1d'";
const TIME_AGO_FORMAT: &str = "<integer>(s|m|h|d|w)-ago or 'now', e.g. '3d-ago' or '1w-ago'";

lazy_static! {
    static ref GRANULARITY_RE: Regex = Regex::new(r"^(\d+)([smhd])$").unwrap();
    static ref TIME_AGO_RE: Regex = Regex::new(r"^(\d+)([smhdw])-ago$").unwrap();
}

/// Unit of an aggregate granularity.
///
/// Week is deliberately absent: the API accepts it in relative time
/// expressions but not as an aggregation bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GranularityUnit {
    /// Seconds
    Second,
    /// Minutes
    Minute,
    /// Hours
    Hour,
    /// Days
    Day,
}

impl GranularityUnit {
    /// Milliseconds in one unit
    pub fn unit_ms(self) -> i64 {
        match self {
            GranularityUnit::Second => SECOND_MS,
            GranularityUnit::Minute => MINUTE_MS,
            GranularityUnit::Hour => HOUR_MS,
            GranularityUnit::Day => DAY_MS,
        }
    }

    fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "s" => Some(GranularityUnit::Second),
            "m" => Some(GranularityUnit::Minute),
            "h" => Some(GranularityUnit::Hour),
            "d" => Some(GranularityUnit::Day),
            _ => None,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            GranularityUnit::Second => "s",
            GranularityUnit::Minute => "m",
            GranularityUnit::Hour => "h",
            GranularityUnit::Day => "d",
        }
    }
}

/// A parsed aggregate granularity such as `"15m"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Granularity {
    magnitude: i64,
    unit: GranularityUnit,
}

impl Granularity {
    /// Parse `<integer><unit>`; the magnitude must be positive
    pub fn parse(granularity: &str) -> Result<Self> {
        let invalid = || Error::invalid_format(granularity, GRANULARITY_FORMAT);
        let captures = GRANULARITY_RE.captures(granularity).ok_or_else(invalid)?;
        let magnitude: i64 = captures[1].parse().map_err(|_| invalid())?;
        let unit = GranularityUnit::from_symbol(&captures[2]).ok_or_else(invalid)?;
        if magnitude == 0 || magnitude.checked_mul(unit.unit_ms()).is_none() {
            return Err(invalid());
        }
        Ok(Self { magnitude, unit })
    }

    /// Multiple of the base unit
    pub fn magnitude(&self) -> i64 {
        self.magnitude
    }

    /// Base unit
    pub fn unit(&self) -> GranularityUnit {
        self.unit
    }

    /// Milliseconds in one base unit, independent of the magnitude
    pub fn unit_ms(&self) -> i64 {
        self.unit.unit_ms()
    }

    /// Milliseconds in one full bucket
    pub fn total_ms(&self) -> i64 {
        self.magnitude * self.unit.unit_ms()
    }
}

impl FromStr for Granularity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.magnitude, self.unit.symbol())
    }
}

/// Convert a granularity string to its bucket width in ms
pub fn granularity_to_ms(granularity: &str) -> Result<i64> {
    Granularity::parse(granularity).map(|g| g.total_ms())
}

/// Width of the granularity's base unit in ms, ignoring the magnitude
pub fn granularity_unit_ms(granularity: &str) -> Result<i64> {
    Granularity::parse(granularity).map(|g| g.unit_ms())
}

/// Align `[start, end)` the way the API aligns aggregate windows.
///
/// The API always aligns `start` with 1s, 1m, 1h or 1d, even when given a
/// multiple such as 73h. Buckets are then laid out every `total_ms` from that
/// floored start, so `end` is ceiled onto the next bucket boundary. Fails
/// with `OutOfRange` when the ceiled end does not fit in an `i64`.
pub fn align_window(start: i64, end: i64, granularity: &Granularity) -> Result<(i64, i64)> {
    let start = start
        .checked_sub(start.rem_euclid(granularity.unit_ms()))
        .ok_or_else(|| Error::out_of_range(format!("start aligned to {}", granularity), start))?;
    let bucket = granularity.total_ms();
    let remainder = end
        .checked_sub(start)
        .ok_or_else(|| Error::out_of_range(format!("start {}", start), start))?
        .rem_euclid(bucket);
    let end = if remainder == 0 {
        end
    } else {
        end.checked_add(bucket - remainder)
            .ok_or_else(|| Error::out_of_range(format!("end aligned to {}", granularity), end))?
    };
    Ok((start, end))
}

/// Convert a relative time token to elapsed ms; `"now"` is 0
pub fn time_ago_to_ms(time_ago: &str) -> Result<i64> {
    if time_ago == "now" {
        return Ok(0);
    }
    let invalid = || Error::invalid_format(time_ago, TIME_AGO_FORMAT);
    let captures = TIME_AGO_RE.captures(time_ago).ok_or_else(invalid)?;
    let magnitude: i64 = captures[1].parse().map_err(|_| invalid())?;
    let unit_ms = match &captures[2] {
        "w" => WEEK_MS,
        symbol => GranularityUnit::from_symbol(symbol)
            .ok_or_else(invalid)?
            .unit_ms(),
    };
    magnitude.checked_mul(unit_ms).ok_or_else(invalid)
}

/// A point in time as callers are allowed to express it.
#[derive(Debug, Clone, PartialEq)]
pub enum Timestamp {
    /// Milliseconds since epoch
    Millis(i64),
    /// Milliseconds since epoch, fractional part truncated
    Float(f64),
    /// `"now"` or `"<n><unit>-ago"`
    Relative(String),
    /// Calendar time
    DateTime(DateTime<Utc>),
}

impl From<i64> for Timestamp {
    fn from(ms: i64) -> Self {
        Timestamp::Millis(ms)
    }
}

impl From<i32> for Timestamp {
    fn from(ms: i32) -> Self {
        Timestamp::Millis(ms.into())
    }
}

impl From<f64> for Timestamp {
    fn from(ms: f64) -> Self {
        Timestamp::Float(ms)
    }
}

impl From<&str> for Timestamp {
    fn from(token: &str) -> Self {
        Timestamp::Relative(token.to_string())
    }
}

impl From<String> for Timestamp {
    fn from(token: String) -> Self {
        Timestamp::Relative(token)
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Timestamp::DateTime(dt)
    }
}

impl Timestamp {
    /// Read a timestamp from a JSON value of a user supplied dict
    pub fn from_json(field: &str, value: &Value) -> Result<Self> {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(ms) => Ok(Timestamp::Millis(ms)),
                None => n
                    .as_f64()
                    .map(Timestamp::Float)
                    .ok_or_else(|| Error::wrong_type(field, "an i64 or f64 number", n.to_string())),
            },
            Value::String(s) => Ok(Timestamp::Relative(s.clone())),
            other => Err(Error::wrong_type(
                field,
                "a number, a time-ago string or a datetime",
                json_type_name(other),
            )),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Millis(ms) => write!(f, "{}", ms),
            Timestamp::Float(ms) => write!(f, "{}", ms),
            Timestamp::Relative(token) => write!(f, "'{}'", token),
            Timestamp::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
        }
    }
}

/// Resolve a timestamp to ms since epoch, relative tokens against the clock
pub fn timestamp_to_ms(timestamp: &Timestamp) -> Result<i64> {
    timestamp_to_ms_at(timestamp, Utc::now().timestamp_millis())
}

/// Resolve a timestamp to ms since epoch with relative tokens measured from `now_ms`
pub fn timestamp_to_ms_at(timestamp: &Timestamp, now_ms: i64) -> Result<i64> {
    let ms = match timestamp {
        Timestamp::Millis(ms) => *ms,
        Timestamp::Float(ms) => {
            // `as` saturates, so out-of-range floats must be caught before the cast.
            if !ms.is_finite() || *ms < i64::MIN as f64 || *ms >= i64::MAX as f64 {
                return Err(Error::wrong_type(
                    "timestamp",
                    "a finite number within the i64 range",
                    ms.to_string(),
                ));
            }
            ms.trunc() as i64
        }
        Timestamp::Relative(token) => {
            let ago = time_ago_to_ms(token)?;
            now_ms
                .checked_sub(ago)
                .ok_or_else(|| Error::out_of_range(timestamp.to_string(), i64::MIN))?
        }
        Timestamp::DateTime(dt) => datetime_to_ms(dt),
    };
    if !(MIN_TIMESTAMP_MS..=MAX_TIMESTAMP_MS).contains(&ms) {
        return Err(Error::out_of_range(timestamp.to_string(), ms));
    }
    Ok(ms)
}

/// Milliseconds since epoch for a calendar time
pub fn datetime_to_ms(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Calendar time for ms since epoch, `None` when out of chrono's range
pub fn ms_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

pub(crate) fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use assert_matches::assert_matches;

    fn g(s: &str) -> Granularity {
        s.parse().unwrap()
    }

    #[test]
    fn test_granularity_to_ms() {
        assert_eq!(granularity_to_ms("5m").unwrap(), 300_000);
        assert_eq!(granularity_to_ms("3h").unwrap(), 10_800_000);
        assert_eq!(granularity_to_ms("1d").unwrap(), 86_400_000);
        assert_eq!(granularity_to_ms("90s").unwrap(), 90_000);
    }

    #[test]
    fn test_granularity_rejects_bad_input() {
        for bad in ["13x", "1w", "m", "5", "5 m", " 5m", "5m-ago", "0h", "-1h", ""] {
            let err = granularity_to_ms(bad).unwrap_err();
            assert_matches!(err.kind, ErrorKind::InvalidFormat { .. }, "{bad}");
        }
    }

    #[test]
    fn test_granularity_unit_ms_ignores_magnitude() {
        assert_eq!(granularity_unit_ms("73h").unwrap(), HOUR_MS);
        assert_eq!(granularity_unit_ms("120s").unwrap(), SECOND_MS);
        assert_eq!(g("73h").to_string(), "73h");
    }

    #[test]
    fn test_align_window_floors_start_to_unit() {
        // 1970-01-01T01:30 to 02:10 with 1h buckets
        let (start, end) = align_window(90 * MINUTE_MS, 130 * MINUTE_MS, &g("1h")).unwrap();
        assert_eq!(start, HOUR_MS);
        assert_eq!(end, 3 * HOUR_MS);
    }

    #[test]
    fn test_align_window_multiple_uses_unit_for_start_and_bucket_for_end() {
        let (start, end) = align_window(90 * MINUTE_MS, 100 * HOUR_MS, &g("73h")).unwrap();
        assert_eq!(start, HOUR_MS);
        // buckets from 1h: 74h, 147h
        assert_eq!(end, 147 * HOUR_MS);
    }

    #[test]
    fn test_align_window_keeps_aligned_end() {
        let (start, end) = align_window(0, 2 * DAY_MS, &g("1d")).unwrap();
        assert_eq!((start, end), (0, 2 * DAY_MS));
    }

    #[test]
    fn test_align_window_is_idempotent() {
        let granularities = ["1s", "7s", "1m", "15m", "1h", "73h", "1d", "3d"];
        let points = [0, 1, 999, 59_999, 3_599_999, 1_234_567_890, 1_650_000_123_456];
        for gran in granularities {
            let gran = g(gran);
            for &start in &points {
                for delta in [1, 1_000, 3_333_333, 86_400_001] {
                    let once = align_window(start, start + delta, &gran).unwrap();
                    let twice = align_window(once.0, once.1, &gran).unwrap();
                    assert_eq!(once, twice, "{gran} {start} {delta}");
                    assert!(once.0 <= start && once.1 >= start + delta);
                }
            }
        }
    }

    #[test]
    fn test_time_ago_to_ms() {
        assert_eq!(time_ago_to_ms("now").unwrap(), 0);
        assert_eq!(time_ago_to_ms("3s-ago").unwrap(), 3_000);
        assert_eq!(time_ago_to_ms("2d-ago").unwrap(), 2 * DAY_MS);
        assert_eq!(time_ago_to_ms("1w-ago").unwrap(), WEEK_MS);
        assert_matches!(
            time_ago_to_ms("1w").unwrap_err().kind,
            ErrorKind::InvalidFormat { .. }
        );
        assert_matches!(
            time_ago_to_ms("yesterday").unwrap_err().kind,
            ErrorKind::InvalidFormat { .. }
        );
    }

    #[test]
    fn test_timestamp_to_ms_variants() {
        let now = 1_700_000_000_000;
        assert_eq!(timestamp_to_ms_at(&Timestamp::from(1234), now).unwrap(), 1234);
        assert_eq!(timestamp_to_ms_at(&Timestamp::from(1234.9), now).unwrap(), 1234);
        assert_eq!(timestamp_to_ms_at(&Timestamp::from("now"), now).unwrap(), now);
        assert_eq!(
            timestamp_to_ms_at(&Timestamp::from("1h-ago"), now).unwrap(),
            now - HOUR_MS
        );
        let dt = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(
            timestamp_to_ms_at(&Timestamp::from(dt), now).unwrap(),
            1_577_836_800_000
        );
    }

    #[test]
    fn test_timestamp_before_minimum_is_out_of_range() {
        let err = timestamp_to_ms_at(&Timestamp::from(-1), 0).unwrap_err();
        assert_matches!(err.kind, ErrorKind::OutOfRange { ms: -1, .. });

        let err = timestamp_to_ms_at(&Timestamp::from("1d-ago"), 1_000).unwrap_err();
        assert_matches!(err.kind, ErrorKind::OutOfRange { .. });
    }

    #[test]
    fn test_timestamp_after_maximum_is_out_of_range() {
        assert_eq!(
            timestamp_to_ms_at(&Timestamp::from(MAX_TIMESTAMP_MS), 0).unwrap(),
            MAX_TIMESTAMP_MS
        );
        let err = timestamp_to_ms_at(&Timestamp::from(MAX_TIMESTAMP_MS + 1), 0).unwrap_err();
        assert_matches!(err.kind, ErrorKind::OutOfRange { max_ms: MAX_TIMESTAMP_MS, .. });
        let err = timestamp_to_ms_at(&Timestamp::from(i64::MAX), 0).unwrap_err();
        assert_matches!(err.kind, ErrorKind::OutOfRange { .. });
    }

    #[test]
    fn test_float_outside_i64_range_is_rejected() {
        for huge in [1e300, -1e300, 9.3e18] {
            let err = timestamp_to_ms_at(&Timestamp::from(huge), 0).unwrap_err();
            assert_matches!(err.kind, ErrorKind::Type { .. });
        }
        // Fits in i64 but lies past the platform maximum.
        let err = timestamp_to_ms_at(&Timestamp::from(1e17), 0).unwrap_err();
        assert_matches!(err.kind, ErrorKind::OutOfRange { .. });
    }

    #[test]
    fn test_align_window_overflow_is_an_error() {
        let err = align_window(0, i64::MAX - 1, &g("7h")).unwrap_err();
        assert_matches!(err.kind, ErrorKind::OutOfRange { .. });
        let (_, end) = align_window(0, MAX_TIMESTAMP_MS, &g("7h")).unwrap();
        assert!(end >= MAX_TIMESTAMP_MS);
    }

    #[test]
    fn test_timestamp_from_json_types() {
        assert_eq!(
            Timestamp::from_json("start", &serde_json::json!(5)).unwrap(),
            Timestamp::Millis(5)
        );
        assert_eq!(
            Timestamp::from_json("start", &serde_json::json!("2d-ago")).unwrap(),
            Timestamp::from("2d-ago")
        );
        assert_matches!(
            Timestamp::from_json("start", &serde_json::json!(true)).unwrap_err().kind,
            ErrorKind::Type { .. }
        );
        assert_matches!(
            timestamp_to_ms_at(&Timestamp::Float(f64::NAN), 0).unwrap_err().kind,
            ErrorKind::Type { .. }
        );
    }

    #[test]
    fn test_ms_to_datetime_round_trip() {
        let dt = ms_to_datetime(1_577_836_800_123).unwrap();
        assert_eq!(datetime_to_ms(&dt), 1_577_836_800_123);
    }
}
