// ⏰ Temporal Model - created is identity-time, modified is value-time
//
// Two times per record:
// 1. created:  when the identity first entered the store (never changes)
// 2. modified: when the current value became true (bumped per revision)
//
// Timestamps are written with millisecond precision, so the run time is
// truncated to milliseconds up front and a stored record round-trips exactly.

use chrono::{DateTime, Duration, DurationRound, SecondsFormat, Utc};

/// Current UTC time at millisecond precision
pub fn run_time() -> DateTime<Utc> {
    truncate_to_millis(Utc::now())
}

pub fn truncate_to_millis(time: DateTime<Utc>) -> DateTime<Utc> {
    time.duration_trunc(Duration::milliseconds(1)).unwrap_or(time)
}

/// `2024-05-01T12:00:00.000Z`
pub fn format_timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// `modified` for a new revision: the run time, unless the stored value is
/// not older than it, in which case one millisecond past the stored value.
pub fn next_modified(previous: DateTime<Utc>, run_time: DateTime<Utc>) -> DateTime<Utc> {
    if run_time > previous {
        run_time
    } else {
        previous + Duration::milliseconds(1)
    }
}

/// Serde adapter for STIX timestamps
pub mod stix_timestamp {
    use chrono::{DateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_timestamp(time))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw)
            .ok_or_else(|| D::Error::custom(format!("invalid timestamp '{}'", raw)))
    }
}
