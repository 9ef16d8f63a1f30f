//! Reminder scanning: horizons, calendar-day windows and the hourly
//! scheduler.
//!
//! All "today"/"tomorrow" arithmetic is pinned to one configured zone so the
//! scheduler and the stored due-dates never disagree about what day it is.

mod scheduler;

pub use scheduler::{ReminderRunReport, ReminderScheduler, ScanStats};

use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::database::models::{NotificationKind, RelatedKind, ReminderCategory};

/// The time offset a scan is looking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Horizon {
    Today,
    Tomorrow,
}

impl Horizon {
    pub fn target_date(&self, today: NaiveDate) -> NaiveDate {
        match self {
            Self::Today => today,
            Self::Tomorrow => today + Days::new(1),
        }
    }

    /// The reminder rule tag for an item class at this horizon. Distinct per
    /// (class, horizon) pair so both horizons can fire for the same target.
    pub fn category_for(&self, kind: RelatedKind) -> ReminderCategory {
        match (kind, self) {
            (RelatedKind::Task, Self::Tomorrow) => ReminderCategory::TaskDueTomorrow,
            (RelatedKind::Task, Self::Today) => ReminderCategory::TaskDueToday,
            (RelatedKind::Event, Self::Tomorrow) => ReminderCategory::EventDueTomorrow,
            (RelatedKind::Event, Self::Today) => ReminderCategory::EventDueToday,
        }
    }

    /// Same-day reminders carry the stronger severity to convey urgency.
    pub fn severity_for(&self, kind: RelatedKind) -> NotificationKind {
        match (kind, self) {
            (RelatedKind::Task, Self::Tomorrow) => NotificationKind::Warning,
            (RelatedKind::Task, Self::Today) => NotificationKind::Error,
            (RelatedKind::Event, Self::Tomorrow) => NotificationKind::Info,
            (RelatedKind::Event, Self::Today) => NotificationKind::Success,
        }
    }

    pub fn phrase(&self) -> &'static str {
        match self {
            Self::Today => "today",
            Self::Tomorrow => "tomorrow",
        }
    }
}

/// Current calendar date in the service zone.
pub fn local_today(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

/// UTC instant of local midnight on `date`.
///
/// On DST transitions where midnight does not exist or is ambiguous, the
/// earliest valid interpretation wins; a window boundary off by an hour once
/// a year is harmless at calendar-day granularity.
fn local_day_start(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    let local = tz
        .from_local_datetime(&midnight)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(midnight + chrono::Duration::hours(1)))
                .earliest()
        });
    match local {
        Some(dt) => dt.with_timezone(&Utc),
        None => DateTime::from_naive_utc_and_offset(midnight, Utc),
    }
}

/// `[start, end)` of a local calendar day as Unix epoch milliseconds.
pub fn day_window_utc_ms(date: NaiveDate, tz: Tz) -> (i64, i64) {
    let start = local_day_start(date, tz);
    let end = local_day_start(date + Days::new(1), tz);
    (start.timestamp_millis(), end.timestamp_millis())
}

/// The next wall-clock top of hour strictly after `after`.
pub fn next_top_of_hour(after: DateTime<Utc>) -> DateTime<Utc> {
    let into_hour = chrono::Duration::minutes(after.minute() as i64)
        + chrono::Duration::seconds(after.second() as i64)
        + chrono::Duration::nanoseconds(after.timestamp_subsec_nanos() as i64);
    after - into_hour + chrono::Duration::hours(1)
}
