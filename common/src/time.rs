// Time types shared across the bridge.
// System time is only used for logging, cache keys and admission control,
// never to order ledger entries (insertion order is the ledger's total order).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::NaiveDateTime;

// Millis timestamps used to determine it using its type
pub type TimestampMillis = u64;

// Seconds timestamps used to determine it using its type
pub type TimestampSeconds = u64;

#[inline]
pub fn get_current_time() -> Duration {
    let start = SystemTime::now();

    start
        .duration_since(UNIX_EPOCH)
        .expect("Incorrect time returned from get_current_time")
}

// Return timestamp in seconds
pub fn get_current_time_in_seconds() -> TimestampSeconds {
    get_current_time().as_secs()
}

// Return timestamp in milliseconds
pub fn get_current_time_in_millis() -> TimestampMillis {
    get_current_time().as_millis() as TimestampMillis
}

// Truncate a millis timestamp to the start of its minute.
// Balance cache keys use minute precision for `as_of`.
pub fn truncate_to_minute(timestamp: TimestampMillis) -> TimestampMillis {
    timestamp - (timestamp % 60_000)
}

// Parse a block header timestamp as emitted by Hive nodes ("2024-01-01T00:00:00")
pub fn parse_chain_timestamp(value: &str) -> Option<TimestampMillis> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis() as TimestampMillis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minute_truncation() {
        assert_eq!(truncate_to_minute(1_700_000_059_999), 1_700_000_040_000);
        assert_eq!(truncate_to_minute(1_700_000_040_000), 1_700_000_040_000);
    }

    #[test]
    fn chain_timestamp_parsing() {
        let ts = parse_chain_timestamp("2024-01-01T00:00:00").unwrap();
        assert_eq!(ts, 1_704_067_200_000);
        assert!(parse_chain_timestamp("not a date").is_none());
    }
}
