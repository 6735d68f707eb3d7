//! Best-effort wall-clock estimate for device-reported timestamps.
//!
//! Cheap devices often send an uptime counter or an unsynchronised clock
//! instead of epoch seconds. Anything we can't trust becomes "observed now".

/// Reports beyond this (2033-05-18) are assumed to be uptime counters, not
/// epoch seconds.
pub const FAR_FUTURE_EPOCH_SECONDS: i64 = 2_000_000_000;

/// Reports older than this many seconds are treated as clock skew.
pub const STALE_THRESHOLD_SECONDS: i64 = 3600;

pub fn sanitize(reported: Option<i64>, now: i64) -> i64 {
    match reported {
        None => now,
        Some(ts) if ts > FAR_FUTURE_EPOCH_SECONDS => now,
        Some(ts) if ts < now - STALE_THRESHOLD_SECONDS => now,
        Some(ts) => ts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_760_000_000;

    #[test]
    fn test_absent_timestamp_is_now() {
        assert_eq!(sanitize(None, NOW), NOW);
    }

    #[test]
    fn test_uptime_counter_is_now() {
        // millis() / 1000 style counter from a device up for a month
        assert_eq!(sanitize(Some(2_600_000_000), NOW), NOW);
        assert_eq!(sanitize(Some(i64::MAX), NOW), NOW);
    }

    #[test]
    fn test_stale_timestamp_is_now() {
        assert_eq!(sanitize(Some(NOW - 7200), NOW), NOW);
        assert_eq!(sanitize(Some(0), NOW), NOW);
        assert_eq!(sanitize(Some(-5), NOW), NOW);
    }

    #[test]
    fn test_recent_timestamp_passes_through() {
        assert_eq!(sanitize(Some(NOW - 5), NOW), NOW - 5);
        assert_eq!(sanitize(Some(NOW - STALE_THRESHOLD_SECONDS), NOW), NOW - 3600);
        assert_eq!(sanitize(Some(NOW), NOW), NOW);
    }
}
