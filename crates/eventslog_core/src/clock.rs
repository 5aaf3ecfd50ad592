use std::time::Duration;

use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime, Time};

use crate::{EventsLogError, EventsLogResult};

const DATE_TIME_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
const DATE_ONLY_FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

const SECONDS_PER_DAY: i64 = 86_400;

/// Current UTC wall-clock time, the zone every stored timestamp is in.
pub fn now_utc() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

/// Parse `yyyy-MM-dd HH:mm:ss`, or `yyyy-MM-dd` read as midnight.
pub fn parse_timestamp(raw: &str) -> EventsLogResult<PrimitiveDateTime> {
    let raw = raw.trim();
    if let Ok(parsed) = PrimitiveDateTime::parse(raw, DATE_TIME_FORMAT) {
        return Ok(parsed);
    }
    Date::parse(raw, DATE_ONLY_FORMAT)
        .map(|date| PrimitiveDateTime::new(date, Time::MIDNIGHT))
        .map_err(|err| EventsLogError::malformed(format!("cannot parse timestamp '{raw}': {err}")))
}

pub fn format_timestamp(value: PrimitiveDateTime) -> EventsLogResult<String> {
    value
        .format(DATE_TIME_FORMAT)
        .map_err(|err| EventsLogError::storage(format!("format timestamp: {err}")))
}

/// Cut-off for rows older than `days` days.
pub fn days_before(now: PrimitiveDateTime, days: u32) -> PrimitiveDateTime {
    now.saturating_sub(time::Duration::seconds(i64::from(days) * SECONDS_PER_DAY))
}

/// Delay from `now` until the next `hour`:00 on the same clock, today if it
/// has not passed yet, otherwise tomorrow.
pub fn delay_until_hour(now: OffsetDateTime, hour: u8) -> Duration {
    let target_time = Time::from_hms(hour.min(23), 0, 0).unwrap_or(Time::MIDNIGHT);
    let mut next = now.replace_time(target_time);
    if now > next {
        next += time::Duration::days(1);
    }
    let delta = next - now;
    Duration::try_from(delta).unwrap_or_default()
}

/// Local time when the offset can be determined, UTC otherwise.
pub fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}
