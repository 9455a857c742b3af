//! Occurrence generation for recurrence rules.
//!
//! All functions here are pure and synchronous: they take rule data as plain
//! arguments, never touch storage, and never panic or error. "Cannot compute"
//! degrades to `None`/`false` sentinels so malformed rules result in no
//! occurrence being shown rather than a failure surfacing to callers.
//!
//! The walking functions are bounded-iteration loops. The caps are part of
//! the public contract: they exist only as a runaway guard against malformed
//! anchors, since the computation itself is inherently finite.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};

use crate::calendar;
use crate::models::{Frequency, MonthlyPattern, RecurrenceRule};

/// Iteration cap for the forward walk that establishes a rule's first
/// occurrence. Exhausting it yields `None` ("no occurrences can be
/// generated"), by design, rather than looping on malformed rules.
pub const FIRST_OCCURRENCE_MAX_STEPS: u32 = 800;

/// Iteration cap for the forward scan in [`last_occurrence_before`].
pub const BOUNDARY_SCAN_MAX_STEPS: u32 = 10_000;

/// The weekday a monthly first/last pattern targets: the configured weekday
/// set's head, falling back to the anchor's own weekday.
fn pattern_weekday(rule: &RecurrenceRule) -> Option<u8> {
    rule.day_of_week
        .as_ref()
        .and_then(|days| days.first().copied())
        .or_else(|| rule.anchor().map(|a| calendar::weekday_index(a.date())))
}

fn monthly_weekday_target(
    year: i32,
    month: u32,
    pattern: MonthlyPattern,
    weekday: u8,
) -> Option<NaiveDate> {
    match pattern {
        MonthlyPattern::First => calendar::first_weekday_of_month(year, month, weekday),
        MonthlyPattern::Last => calendar::last_weekday_of_month(year, month, weekday),
        MonthlyPattern::Day => None,
    }
}

/// Checks whether `day` falls on an allowed multiple of the rule's base unit,
/// counted from the anchor day.
///
/// # Behavior
/// - Trivially true when `repeat_every` is 1
/// - Fail-open (`true`) when no anchor is resolvable: interval filtering is
///   silently disabled for rules missing both `start_at` and `created_at`
/// - Daily counts day differences, weekly counts week differences between
///   Sunday-aligned week starts, monthly counts calendar months, annual
///   counts years
pub fn interval_allows_day(rule: &RecurrenceRule, day: NaiveDate) -> bool {
    if rule.repeat_every <= 1 {
        return true;
    }
    let Some(anchor) = rule.anchor() else {
        return true;
    };
    let anchor_day = anchor.date();
    let every = rule.repeat_every as i64;
    let diff = match rule.frequency {
        Frequency::Daily => (day - anchor_day).num_days(),
        Frequency::Weekly => {
            (calendar::week_start(day) - calendar::week_start(anchor_day)).num_days() / 7
        }
        Frequency::Monthly => calendar::months_between(anchor_day, day) as i64,
        Frequency::Annually => (day.year() - anchor_day.year()) as i64,
    };
    diff.rem_euclid(every) == 0
}

/// Frequency-specific predicate: does the rule generate an occurrence on
/// `day`?
///
/// # Behavior
/// - Daily: interval check only
/// - Weekly: weekday membership and interval check; an empty or missing
///   weekday set matches every day (fail-open)
/// - Monthly `day`: the day-of-month equals the anchor day clamped to the
///   month's length, plus the interval check
/// - Monthly `first`/`last`: the day is the first/last occurrence of the
///   pattern weekday in its month, plus the interval check
/// - Annually: the month/day key matches the anchor's, plus the interval
///   check (a Feb 29 anchor therefore matches only leap years)
/// - Monthly and annual rules without a resolvable anchor match nothing
pub fn rule_matches_day(rule: &RecurrenceRule, day: NaiveDate) -> bool {
    match rule.frequency {
        Frequency::Daily => interval_allows_day(rule, day),
        Frequency::Weekly => {
            let member = match &rule.day_of_week {
                Some(days) if !days.is_empty() => days.contains(&calendar::weekday_index(day)),
                _ => true,
            };
            member && interval_allows_day(rule, day)
        }
        Frequency::Monthly => {
            let Some(anchor) = rule.anchor() else {
                return false;
            };
            let matched = match rule.monthly_pattern.unwrap_or(MonthlyPattern::Day) {
                MonthlyPattern::Day => {
                    let target = anchor
                        .date()
                        .day()
                        .min(calendar::days_in_month(day.year(), day.month()));
                    day.day() == target
                }
                pattern => match pattern_weekday(rule) {
                    Some(weekday) => {
                        monthly_weekday_target(day.year(), day.month(), pattern, weekday)
                            == Some(day)
                    }
                    None => false,
                },
            };
            matched && interval_allows_day(rule, day)
        }
        Frequency::Annually => {
            let Some(anchor) = rule.anchor() else {
                return false;
            };
            calendar::month_day_key(day) == calendar::month_day_key(anchor.date())
                && interval_allows_day(rule, day)
        }
    }
}

/// Computes the next occurrence start strictly after `current`.
///
/// `current` is expected to be an occurrence of the rule (or a candidate
/// produced while walking toward one); the result preserves its time of day.
///
/// # Behavior
/// - Daily: advance `repeat_every` days
/// - Weekly: the nearest upcoming weekday in the configured set, wrapping to
///   the next interval-block of weeks when none remain in the current week;
///   an empty set falls back to the anchor's weekday
/// - Monthly `day`: advance `repeat_every` months with the anchor day
///   clamped to each target month's length
/// - Monthly `first`/`last`: the target weekday position later in the
///   current month if any, else recomputed in the month advanced by
///   `repeat_every`
/// - Annually: advance `repeat_every` years, clamping Feb 29 anchors
pub fn next_occurrence_start(rule: &RecurrenceRule, current: NaiveDateTime) -> NaiveDateTime {
    let every = rule.repeat_every.max(1) as i64;
    match rule.frequency {
        Frequency::Daily => current + Duration::days(every),
        Frequency::Weekly => {
            let fallback = rule
                .anchor()
                .map(|a| calendar::weekday_index(a.date()))
                .unwrap_or_else(|| calendar::weekday_index(current.date()));
            let days: &[u8] = match &rule.day_of_week {
                Some(days) if !days.is_empty() => days,
                _ => std::slice::from_ref(&fallback),
            };
            let current_weekday = calendar::weekday_index(current.date());
            match days.iter().find(|&&d| d > current_weekday) {
                Some(&next) => current + Duration::days((next - current_weekday) as i64),
                None => {
                    // Wrap into the next interval-block of weeks.
                    let first = days[0];
                    current
                        + Duration::days(7 * every - current_weekday as i64 + first as i64)
                }
            }
        }
        Frequency::Monthly => match rule.monthly_pattern.unwrap_or(MonthlyPattern::Day) {
            MonthlyPattern::Day => {
                let anchor_day = rule.anchor().map(|a| a.date().day());
                calendar::add_months_clamped(current, every as i32, anchor_day)
            }
            pattern => {
                let weekday = pattern_weekday(rule)
                    .unwrap_or_else(|| calendar::weekday_index(current.date()));
                let time = current.time();
                if let Some(target) = monthly_weekday_target(
                    current.date().year(),
                    current.date().month(),
                    pattern,
                    weekday,
                ) {
                    let candidate = target.and_time(time);
                    if candidate > current {
                        return candidate;
                    }
                }
                let probe = calendar::add_months_clamped(current, every as i32, Some(1));
                monthly_weekday_target(probe.date().year(), probe.date().month(), pattern, weekday)
                    .map(|target| target.and_time(time))
                    .unwrap_or(probe)
            }
        },
        Frequency::Annually => {
            let anchor_day = rule.anchor().map(|a| a.date().day());
            calendar::add_months_clamped(current, (12 * every) as i32, anchor_day)
        }
    }
}

/// Establishes the rule's first occurrence: the earliest candidate at the
/// rule's time of day that matches the rule and is not before the anchor.
///
/// Returns `None` when no anchor exists or the
/// [`FIRST_OCCURRENCE_MAX_STEPS`] guard is exhausted; callers treat that as
/// "no occurrences can be generated" and skip scheduling for the rule.
pub fn first_occurrence_start(rule: &RecurrenceRule) -> Option<NaiveDateTime> {
    let anchor = rule.anchor()?;
    let mut candidate = calendar::at_minutes(anchor.date(), rule.time_of_day_minutes);
    for _ in 0..FIRST_OCCURRENCE_MAX_STEPS {
        if candidate >= anchor && rule_matches_day(rule, candidate.date()) {
            return Some(candidate);
        }
        let next = next_occurrence_start(rule, candidate);
        if next <= candidate {
            // No forward progress; the rule cannot generate occurrences.
            return None;
        }
        candidate = next;
    }
    None
}

/// Start of the Nth occurrence counted from the first (1-indexed), used to
/// set an explicit end boundary for "repeat N more times".
pub fn end_after_occurrences(rule: &RecurrenceRule, occurrences: u32) -> Option<NaiveDateTime> {
    let mut current = first_occurrence_start(rule)?;
    for _ in 1..occurrences.max(1) {
        let next = next_occurrence_start(rule, current);
        if next <= current {
            return None;
        }
        current = next;
    }
    Some(current)
}

/// Latest occurrence start strictly before `boundary`, or `None` when the
/// first occurrence already meets or exceeds it.
///
/// The forward scan is capped at [`BOUNDARY_SCAN_MAX_STEPS`]; hitting the
/// cap returns the latest occurrence accumulated so far.
pub fn last_occurrence_before(
    rule: &RecurrenceRule,
    boundary: NaiveDateTime,
) -> Option<NaiveDateTime> {
    let first = first_occurrence_start(rule)?;
    if first >= boundary {
        return None;
    }
    let mut latest = first;
    for _ in 0..BOUNDARY_SCAN_MAX_STEPS {
        let next = next_occurrence_start(rule, latest);
        if next <= latest || next >= boundary {
            break;
        }
        latest = next;
    }
    Some(latest)
}
