//! Timestamp helpers for the database layer.
//!
//! Timestamps are stored as `INTEGER` Unix epoch milliseconds (UTC) in
//! SQLite. Calendar-day keys use the configured service time zone.

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Current time as Unix epoch milliseconds (UTC).
#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert a `DateTime<Utc>` to Unix epoch milliseconds.
#[inline]
pub fn datetime_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Convert Unix epoch milliseconds to `DateTime<Utc>`.
///
/// Values outside chrono's representable range clamp to the nearest
/// representable timestamp.
#[inline]
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    match Utc.timestamp_millis_opt(ms) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(dt, _) => dt,
        chrono::LocalResult::None => {
            if ms.is_negative() {
                Utc.timestamp_millis_opt(i64::MIN)
                    .earliest()
                    .unwrap_or_else(Utc::now)
            } else {
                Utc.timestamp_millis_opt(i64::MAX)
                    .latest()
                    .unwrap_or_else(Utc::now)
            }
        }
    }
}

/// Calendar-day key (`YYYY-MM-DD`) of an instant in the given zone.
///
/// Used for the per-day reminder dedup window; every process must derive the
/// key from the same configured zone for the window to line up.
#[inline]
pub fn day_key(dt: DateTime<Utc>, tz: Tz) -> String {
    dt.with_timezone(&tz).format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ms_roundtrip() {
        let now = Utc::now();
        let ms = datetime_to_ms(now);
        assert_eq!(ms_to_datetime(ms).timestamp_millis(), ms);
    }

    #[test]
    fn day_key_follows_the_zone() {
        // 2026-03-01T03:30Z is still Feb 28 in New York.
        let dt = Utc.with_ymd_and_hms(2026, 3, 1, 3, 30, 0).single().unwrap();
        assert_eq!(day_key(dt, chrono_tz::UTC), "2026-03-01");
        assert_eq!(day_key(dt, chrono_tz::America::New_York), "2026-02-28");
    }
}
