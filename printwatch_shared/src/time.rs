//! Timestamp handling for log entries and samples.
//!
//! Log timestamps arrive in UTC with an explicit `Z` marker, while a job's start time is a
//! naive local wall-clock value. The start time is interpreted under one fixed offset that the
//! caller supplies; this does not follow daylight-saving changes.

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use thiserror::Error;

/// Format used for sample timestamps and job start times.
pub const SAMPLE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const LOG_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("log timestamp '{0}' has no UTC marker")]
    MissingUtcMarker(String),
    #[error("invalid timestamp '{value}': {source}")]
    Invalid {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("start time {0} cannot be placed at the configured offset")]
    Unrepresentable(NaiveDateTime),
}

/// Parse a log timestamp such as `2025-07-29T19:44:05.123Z`.
pub fn parse_log_timestamp(ts: &str) -> Result<DateTime<Utc>, TimestampError> {
    let trimmed = ts
        .strip_suffix('Z')
        .ok_or_else(|| TimestampError::MissingUtcMarker(ts.to_string()))?;
    let naive = NaiveDateTime::parse_from_str(trimmed, LOG_TIMESTAMP_FORMAT).map_err(|source| {
        TimestampError::Invalid {
            value: ts.to_string(),
            source,
        }
    })?;
    Ok(naive.and_utc())
}

/// Place a naive start time at `offset` and convert it to UTC.
pub fn start_time_as_utc(start: NaiveDateTime, offset: FixedOffset) -> Result<DateTime<Utc>, TimestampError> {
    start
        .and_local_timezone(offset)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or(TimestampError::Unrepresentable(start))
}

/// Current wall-clock time at `offset`, with the offset dropped.
pub fn now_at(offset: FixedOffset) -> NaiveDateTime {
    Utc::now().with_timezone(&offset).naive_local()
}

/// True when the log timestamp `ts` is strictly after the job start.
///
/// Any parse failure excludes the entry.
pub fn is_after_start(ts: &str, start: NaiveDateTime, offset: FixedOffset) -> bool {
    let parsed = parse_log_timestamp(ts).and_then(|at| Ok((at, start_time_as_utc(start, offset)?)));
    match parsed {
        Ok((at, start)) => at > start,
        Err(e) => {
            tracing::warn!("Skipping log entry: {}", e);
            false
        }
    }
}

/// Serde adapter for `YYYY-MM-DD HH:MM:SS` timestamps.
pub mod naive_seconds {
    use super::SAMPLE_TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&value.format(SAMPLE_TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, SAMPLE_TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}
