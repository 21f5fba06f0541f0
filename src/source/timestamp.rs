use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

/// Name of the JSON field carrying the event time of a structured log line.
pub const TIMESTAMP_FIELD: &str = "@timestamp";

#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("failed to parse timestamp '{value}': {source}")]
    ParseError {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("epoch millis out of range: {0}")]
    OutOfRange(i64),
}

/// Parse an absolute ISO-8601 / RFC 3339 timestamp, e.g. `2025-12-04T02:42:11.011Z`.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, TimestampError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|source| TimestampError::ParseError {
            value: value.to_string(),
            source,
        })
}

pub fn from_epoch_millis(millis: i64) -> Result<DateTime<Utc>, TimestampError> {
    DateTime::from_timestamp_millis(millis).ok_or(TimestampError::OutOfRange(millis))
}

/// ISO-8601 UTC rendering with fractional seconds only when they are non-zero.
pub fn format_instant(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}
