use std::time::Duration;

use time::OffsetDateTime;

/// Time left until the next top of the hour (UTC wall clock).
///
/// Exactly on the hour yields a full hour, so the result is never zero.
pub fn delay_until_next_hour(now: OffsetDateTime) -> Duration {
    let now = now.to_offset(time::UtcOffset::UTC);
    let into_hour = Duration::from_secs(u64::from(now.minute()) * 60 + u64::from(now.second()))
        + Duration::from_nanos(u64::from(now.nanosecond()));
    Duration::from_secs(3600).saturating_sub(into_hour)
}
