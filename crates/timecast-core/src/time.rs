//! Fire-time resolution against the server's configured timezone.
//!
//! Clients may express the moment a time event fires in three ways:
//! - a UNIX timestamp in seconds (fractional seconds allowed),
//! - an RFC 3339 string carrying its own offset,
//! - a naive `YYYY-MM-DDTHH:MM:SS[.fff]` string, read as wall-clock time in
//!   the configured timezone.
//!
//! Whatever the input, the result is an absolute instant; comparisons never
//! look at the wall-clock text.

use std::time::Duration;

use chrono::{DateTime, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Naive formats accepted for wall-clock fire times.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// Errors produced while resolving a fire time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimeError {
    /// The timezone identifier is not in the IANA database.
    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),

    /// The timestamp is not finite or does not fit a datetime.
    #[error("timestamp out of range: {0}")]
    OutOfRange(f64),

    /// The text is neither RFC 3339 nor a supported naive format.
    #[error("invalid datetime {value:?}: {reason}")]
    InvalidDateTime { value: String, reason: String },

    /// The wall-clock time occurs twice in the timezone (DST fold).
    #[error("local time {value} is ambiguous in {timezone}")]
    Ambiguous { value: String, timezone: String },

    /// The wall-clock time is skipped in the timezone (DST gap).
    #[error("local time {value} does not exist in {timezone}")]
    NonExistent { value: String, timezone: String },
}

/// A fire time as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FireAt {
    /// Seconds since the UNIX epoch.
    Timestamp(f64),
    /// RFC 3339 or naive datetime text.
    Text(String),
}

impl FireAt {
    /// Resolves this fire time to an instant expressed in `tz`.
    pub fn resolve(&self, tz: Tz) -> Result<DateTime<Tz>, TimeError> {
        match self {
            Self::Timestamp(secs) => from_unix_seconds(*secs, tz),
            Self::Text(text) => parse_datetime(text, tz),
        }
    }
}

impl From<f64> for FireAt {
    fn from(secs: f64) -> Self {
        Self::Timestamp(secs)
    }
}

impl From<&str> for FireAt {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for FireAt {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl<T: TimeZone> From<DateTime<T>> for FireAt {
    fn from(dt: DateTime<T>) -> Self {
        Self::Text(dt.with_timezone(&Utc).to_rfc3339())
    }
}

/// Parses an IANA timezone identifier such as `Europe/Paris` or `UTC`.
pub fn parse_timezone(name: &str) -> Result<Tz, TimeError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| TimeError::UnknownTimezone(name.to_string()))
}

/// Returns the current instant in `tz`.
pub fn now_in(tz: Tz) -> DateTime<Tz> {
    Utc::now().with_timezone(&tz)
}

/// Converts a UNIX timestamp in (possibly fractional) seconds.
pub fn from_unix_seconds(secs: f64, tz: Tz) -> Result<DateTime<Tz>, TimeError> {
    if !secs.is_finite() || secs.abs() >= i64::MAX as f64 {
        return Err(TimeError::OutOfRange(secs));
    }

    let mut whole = secs.floor();
    let mut nanos = ((secs - whole) * 1_000_000_000.0).round() as u32;
    if nanos >= 1_000_000_000 {
        whole += 1.0;
        nanos = 0;
    }

    DateTime::from_timestamp(whole as i64, nanos)
        .map(|dt| dt.with_timezone(&tz))
        .ok_or(TimeError::OutOfRange(secs))
}

/// Converts an instant back to fractional UNIX seconds.
pub fn to_unix_seconds<T: TimeZone>(dt: &DateTime<T>) -> f64 {
    dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) / 1_000_000_000.0
}

/// Parses RFC 3339 text, falling back to naive wall-clock time in `tz`.
pub fn parse_datetime(text: &str, tz: Tz) -> Result<DateTime<Tz>, TimeError> {
    let text = text.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&tz));
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .ok_or_else(|| TimeError::InvalidDateTime {
            value: text.to_string(),
            reason: "expected RFC 3339 or YYYY-MM-DDTHH:MM:SS".to_string(),
        })?;

    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt),
        LocalResult::Ambiguous(_, _) => Err(TimeError::Ambiguous {
            value: text.to_string(),
            timezone: tz.name().to_string(),
        }),
        LocalResult::None => Err(TimeError::NonExistent {
            value: text.to_string(),
            timezone: tz.name().to_string(),
        }),
    }
}

/// Time left until `deadline`, or zero if it has already passed.
pub fn time_until<T: TimeZone>(deadline: &DateTime<T>) -> Duration {
    (deadline.with_timezone(&Utc) - Utc::now())
        .to_std()
        .unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn parse_known_timezones() {
        assert_eq!(parse_timezone("UTC").unwrap(), Tz::UTC);
        assert_eq!(
            parse_timezone("Europe/Paris").unwrap(),
            chrono_tz::Europe::Paris
        );
        assert!(matches!(
            parse_timezone("Mars/Olympus"),
            Err(TimeError::UnknownTimezone(_))
        ));
    }

    #[test]
    fn timestamp_resolves_to_absolute_instant() {
        let dt = FireAt::Timestamp(1_700_000_000.25).resolve(Tz::UTC).unwrap();
        assert_eq!(dt.timestamp(), 1_700_000_000);
        assert_eq!(dt.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn timestamp_rejects_non_finite() {
        assert!(matches!(
            from_unix_seconds(f64::NAN, Tz::UTC),
            Err(TimeError::OutOfRange(_))
        ));
        assert!(matches!(
            from_unix_seconds(f64::INFINITY, Tz::UTC),
            Err(TimeError::OutOfRange(_))
        ));
    }

    #[test]
    fn rfc3339_keeps_its_own_offset() {
        let dt = parse_datetime("2024-01-15T12:00:00+02:00", chrono_tz::Asia::Tokyo).unwrap();
        assert_eq!(dt.with_timezone(&Utc).hour(), 10);
        assert_eq!(dt.timezone(), chrono_tz::Asia::Tokyo);
    }

    #[test]
    fn naive_text_uses_configured_timezone() {
        let dt = parse_datetime("2024-01-15T12:00:00", chrono_tz::Europe::Paris).unwrap();
        let utc = dt.with_timezone(&Utc);
        assert_eq!(utc.hour(), 11);
        assert_eq!(utc.day(), 15);

        let with_fraction =
            parse_datetime("2024-01-15 12:00:00.500", chrono_tz::Europe::Paris).unwrap();
        assert_eq!(with_fraction.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn naive_text_in_dst_gap_is_rejected() {
        let result = parse_datetime("2024-03-31T02:30:00", chrono_tz::Europe::Paris);
        assert!(matches!(result, Err(TimeError::NonExistent { .. })));
    }

    #[test]
    fn naive_text_in_dst_fold_is_rejected() {
        let result = parse_datetime("2024-10-27T02:30:00", chrono_tz::Europe::Paris);
        assert!(matches!(result, Err(TimeError::Ambiguous { .. })));
    }

    #[test]
    fn garbage_text_is_rejected() {
        let result = parse_datetime("next tuesday", Tz::UTC);
        assert!(matches!(result, Err(TimeError::InvalidDateTime { .. })));
    }

    #[test]
    fn fire_at_deserializes_number_or_text() {
        let number: FireAt = serde_json::from_str("1700000000").unwrap();
        assert_eq!(number, FireAt::Timestamp(1_700_000_000.0));

        let text: FireAt = serde_json::from_str(r#""2024-01-15T12:00:00Z""#).unwrap();
        assert_eq!(text, FireAt::Text("2024-01-15T12:00:00Z".to_string()));
    }

    #[test]
    fn unix_seconds_roundtrip() {
        let dt = from_unix_seconds(1_700_000_123.5, Tz::UTC).unwrap();
        assert!((to_unix_seconds(&dt) - 1_700_000_123.5).abs() < 1e-6);
    }

    #[test]
    fn time_until_past_deadline_is_zero() {
        let past = Utc::now() - chrono::Duration::seconds(5);
        assert_eq!(time_until(&past), Duration::ZERO);

        let future = Utc::now() + chrono::Duration::seconds(60);
        assert!(time_until(&future) > Duration::from_secs(50));
    }
}
