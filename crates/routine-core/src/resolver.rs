//! Rule window resolution.
//!
//! Decides whether a bounded rule can be retired because every occurrence in
//! its active window has a disposition: a confirmed history record or an
//! explicit exception. Unbounded (still-repeating) rules are never eligible.

use chrono::{Duration, NaiveDate};
use std::collections::HashSet;

use crate::models::{ConfirmedOccurrence, RecurrenceRule, RuleException};
use crate::recurrence::rule_matches_day;

/// Point-in-time key-sets of occurrence dispositions, built from history and
/// exception snapshots for O(1) lookup while scanning a window.
#[derive(Debug, Default)]
pub struct ResolutionSnapshot {
    confirmed: HashSet<String>,
    excepted: HashSet<String>,
}

impl ResolutionSnapshot {
    pub fn new(confirmed: &[ConfirmedOccurrence], exceptions: &[RuleException]) -> Self {
        let confirmed = confirmed
            .iter()
            .map(|c| Self::key(&c.routine_id, c.occurrence_date))
            .collect();
        let excepted = exceptions
            .iter()
            .map(|e| Self::key(&e.routine_id, e.occurrence_date))
            .collect();
        Self { confirmed, excepted }
    }

    fn key(routine_id: &str, day: NaiveDate) -> String {
        format!("{}:{}", routine_id, day.format("%Y-%m-%d"))
    }

    /// Whether the occurrence on `day` has any disposition.
    pub fn is_resolved(&self, routine_id: &str, day: NaiveDate) -> bool {
        let key = Self::key(routine_id, day);
        self.confirmed.contains(&key) || self.excepted.contains(&key)
    }
}

/// Returns `true` only if every matching day between the rule's window start
/// and its end boundary (inclusive) has a disposition.
///
/// # Behavior
/// - Rules without a finite `end_at` are never resolved
/// - Window start is `start_at`'s day when present, else `created_at`'s day
///   plus one (the creation day itself never counts as an occurrence
///   requiring resolution); rules with neither are never resolved
/// - Early-exits on the first matching day found in neither key-set
pub fn is_rule_window_fully_resolved(
    rule: &RecurrenceRule,
    snapshot: &ResolutionSnapshot,
) -> bool {
    let Some(end) = rule.end_at else {
        return false;
    };
    let window_start = match (rule.start_at, rule.created_at) {
        (Some(start), _) => start.date(),
        (None, Some(created)) => created.date() + Duration::days(1),
        (None, None) => return false,
    };

    let end_day = end.date();
    let mut day = window_start;
    while day <= end_day {
        if rule_matches_day(rule, day) && !snapshot.is_resolved(&rule.id, day) {
            return false;
        }
        day += Duration::days(1);
    }
    true
}
