//! Pure calendar arithmetic on wall-clock (zone-naive) time.
//!
//! Everything here is deterministic and free of I/O. Occurrence math is
//! local-wall-clock by design: timestamps are `NaiveDateTime` and days are
//! `NaiveDate`, with no timezone conversion anywhere in the pipeline.
//! Weekday indices follow the 0=Sunday..6=Saturday convention used by the
//! rule model.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

/// Truncates a timestamp to the start of its day (local midnight).
#[inline]
pub fn day_start(dt: NaiveDateTime) -> NaiveDateTime {
    dt.date().and_time(NaiveTime::MIN)
}

/// Places a time-of-day (minutes since midnight, clamped to [0, 1439]) on a date.
#[inline]
pub fn at_minutes(date: NaiveDate, minutes: u32) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN) + Duration::minutes(minutes.min(1439) as i64)
}

/// Minutes since local midnight for a timestamp.
#[inline]
pub fn minute_of_day(dt: NaiveDateTime) -> u32 {
    dt.hour() * 60 + dt.minute()
}

/// Year-ignoring (month, day) key, used for annual-anchor comparison.
#[inline]
pub fn month_day_key(date: NaiveDate) -> (u32, u32) {
    (date.month(), date.day())
}

/// Number of days in a calendar month.
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month >= 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

/// Weekday index with 0=Sunday .. 6=Saturday.
#[inline]
pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

/// Start (Sunday) of the week containing `date`.
#[inline]
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(weekday_index(date) as i64)
}

/// Adds calendar months, clamping the day-of-month to the target month's
/// actual length. The anchor day (when given) wins over the current day, and
/// the clamp always prefers the smaller of (anchor day, last day of target
/// month): Jan 31 + 1 month lands on Feb 28/29, never Mar 3.
pub fn add_months_clamped(
    dt: NaiveDateTime,
    months: i32,
    anchor_day: Option<u32>,
) -> NaiveDateTime {
    let date = dt.date();
    let zero_based = date.year() * 12 + date.month0() as i32 + months;
    let year = zero_based.div_euclid(12);
    let month = zero_based.rem_euclid(12) as u32 + 1;
    let day = anchor_day
        .unwrap_or_else(|| date.day())
        .clamp(1, days_in_month(year, month));
    match NaiveDate::from_ymd_opt(year, month, day) {
        Some(target) => target.and_time(dt.time()),
        None => dt,
    }
}

/// Date of the first occurrence of `weekday` (0=Sunday) in a month.
pub fn first_weekday_of_month(year: i32, month: u32, weekday: u8) -> Option<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let offset = (weekday as i64 - weekday_index(first) as i64).rem_euclid(7);
    Some(first + Duration::days(offset))
}

/// Date of the last occurrence of `weekday` (0=Sunday) in a month.
pub fn last_weekday_of_month(year: i32, month: u32, weekday: u8) -> Option<NaiveDate> {
    let last = NaiveDate::from_ymd_opt(year, month, days_in_month(year, month))?;
    let offset = (weekday_index(last) as i64 - weekday as i64).rem_euclid(7);
    Some(last - Duration::days(offset))
}

/// Signed calendar-month difference between two dates, ignoring days.
#[inline]
pub fn months_between(from: NaiveDate, to: NaiveDate) -> i32 {
    (to.year() - from.year()) * 12 + to.month() as i32 - from.month() as i32
}
