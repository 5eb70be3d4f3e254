//! Unix-millisecond timestamp helpers for the storage layer.

use chrono::{DateTime, TimeZone, Utc};

/// Current time in Unix milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert stored milliseconds back to a UTC datetime.
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let ms = 1_700_000_000_123;
        assert_eq!(ms_to_datetime(ms).timestamp_millis(), ms);
    }

    #[test]
    fn test_now_ms_is_recent() {
        assert!(now_ms() > 1_700_000_000_000);
    }
}
