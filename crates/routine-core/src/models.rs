use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::error::CoreError;
use crate::timezone;

/// Base unit of a recurrence rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Annually,
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frequency::Daily => write!(f, "daily"),
            Frequency::Weekly => write!(f, "weekly"),
            Frequency::Monthly => write!(f, "monthly"),
            Frequency::Annually => write!(f, "annually"),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid frequency: {0}")]
pub struct ParseFrequencyError(String);

impl FromStr for Frequency {
    type Err = ParseFrequencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(Frequency::Daily),
            "weekly" => Ok(Frequency::Weekly),
            "monthly" => Ok(Frequency::Monthly),
            "annually" => Ok(Frequency::Annually),
            _ => Err(ParseFrequencyError(s.to_string())),
        }
    }
}

/// How a monthly rule anchors within the month.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MonthlyPattern {
    /// Anchor to a day-of-month, clamped to the target month's last day.
    Day,
    /// Anchor to the first occurrence of the rule's weekday in the month.
    First,
    /// Anchor to the last occurrence of the rule's weekday in the month.
    Last,
}

impl std::fmt::Display for MonthlyPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MonthlyPattern::Day => write!(f, "day"),
            MonthlyPattern::First => write!(f, "first"),
            MonthlyPattern::Last => write!(f, "last"),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid monthly pattern: {0}")]
pub struct ParseMonthlyPatternError(String);

impl FromStr for MonthlyPattern {
    type Err = ParseMonthlyPatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "day" => Ok(MonthlyPattern::Day),
            "first" => Ok(MonthlyPattern::First),
            "last" => Ok(MonthlyPattern::Last),
            _ => Err(ParseMonthlyPatternError(s.to_string())),
        }
    }
}

/// A declarative recurring-session rule.
///
/// `start_at` is the preferred arithmetic anchor; `created_at` (the timestamp
/// of the history entry the rule was derived from) is the fallback. A rule
/// whose id is not UUID-shaped is a locally-generated pending rule awaiting
/// its canonical id from the first successful remote write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecurrenceRule {
    pub id: String,
    pub user_id: String,
    pub active: bool,
    pub frequency: Frequency,
    /// Interval multiplier in the base unit; always >= 1 after normalization.
    pub repeat_every: u32,
    /// Ordered weekday set (0=Sunday..6=Saturday). Required for weekly rules;
    /// holds the single anchor weekday for monthly first/last patterns.
    pub day_of_week: Option<Vec<u8>>,
    pub monthly_pattern: Option<MonthlyPattern>,
    /// Minutes since local midnight, in [0, 1439].
    pub time_of_day_minutes: u32,
    pub duration_minutes: u32,
    pub task_name: String,
    pub goal_name: Option<String>,
    pub bucket_name: Option<String>,
    /// Best-effort IANA name; never used for occurrence arithmetic.
    pub timezone: Option<String>,
    pub created_at: Option<NaiveDateTime>,
    pub start_at: Option<NaiveDateTime>,
    pub end_at: Option<NaiveDateTime>,
}

impl RecurrenceRule {
    /// Normalizes a rule into its canonical form.
    ///
    /// Applied at every ingestion boundary (row decode, manager input) so no
    /// call site re-derives defaults ad hoc. Validation failures are corrected
    /// by clamping rather than rejected: the engine consumes data that may
    /// have been hand-edited or partially migrated.
    ///
    /// # Behavior
    /// - Floors `repeat_every` at 1 and `duration_minutes` at 1 (0 becomes
    ///   the 60-minute default), clamps `time_of_day_minutes` to [0, 1439]
    /// - Dedups, sorts, and range-clamps the weekday set; derives it from the
    ///   anchor weekday for weekly rules missing one; drops it for daily and
    ///   annual rules; keeps only the anchor weekday for monthly first/last
    /// - Defaults `monthly_pattern` to `day` for monthly rules and clears it
    ///   for every other frequency
    /// - Derives a blank `task_name` from bucket, then goal, then "Session"
    /// - Discards an unparseable timezone (best-effort field)
    ///
    /// The single rejected state is an inverted window (`start_at > end_at`),
    /// which is fatal to the entity: callers delete such rules rather than
    /// persist them.
    pub fn normalized(mut self) -> Result<Self, CoreError> {
        if let (Some(start), Some(end)) = (self.start_at, self.end_at) {
            if start > end {
                return Err(CoreError::InvalidWindow { start, end });
            }
        }

        self.repeat_every = self.repeat_every.max(1);
        self.time_of_day_minutes = self.time_of_day_minutes.min(1439);
        if self.duration_minutes == 0 {
            self.duration_minutes = 60;
        }

        let anchor_weekday = self
            .start_at
            .or(self.created_at)
            .map(|a| crate::calendar::weekday_index(a.date()));

        self.day_of_week = match self.frequency {
            Frequency::Weekly => {
                let mut days: Vec<u8> = self
                    .day_of_week
                    .unwrap_or_default()
                    .into_iter()
                    .map(|d| d.min(6))
                    .collect();
                days.sort_unstable();
                days.dedup();
                if days.is_empty() {
                    anchor_weekday.map(|wd| vec![wd])
                } else {
                    Some(days)
                }
            }
            Frequency::Monthly => match self.monthly_pattern {
                Some(MonthlyPattern::First) | Some(MonthlyPattern::Last) => self
                    .day_of_week
                    .and_then(|days| days.first().map(|d| vec![(*d).min(6)]))
                    .or_else(|| anchor_weekday.map(|wd| vec![wd])),
                _ => None,
            },
            Frequency::Daily | Frequency::Annually => None,
        };

        self.monthly_pattern = match self.frequency {
            Frequency::Monthly => Some(self.monthly_pattern.unwrap_or(MonthlyPattern::Day)),
            _ => None,
        };

        if self.task_name.trim().is_empty() {
            self.task_name = self
                .bucket_name
                .as_deref()
                .or(self.goal_name.as_deref())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or("Session")
                .to_string();
        }

        if let Some(tz) = &self.timezone {
            if timezone::validate_timezone(tz).is_err() {
                tracing::warn!(timezone = %tz, rule_id = %self.id, "discarding unparseable timezone");
                self.timezone = None;
            }
        }

        Ok(self)
    }

    /// The reference timestamp all occurrence arithmetic is measured from.
    #[inline]
    pub fn anchor(&self) -> Option<NaiveDateTime> {
        self.start_at.or(self.created_at)
    }

    /// Whether this rule has a finite retirement boundary.
    #[inline]
    pub fn is_bounded(&self) -> bool {
        self.end_at.is_some()
    }
}

/// Returns whether a rule id is canonical (UUID-v4-shaped). Anything else is
/// a pending local id subject to remap on first successful remote write.
pub fn is_canonical_id(id: &str) -> bool {
    Uuid::parse_str(id)
        .map(|u| u.get_version_num() == 4)
        .unwrap_or(false)
}

/// Per-occurrence override action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ExceptionAction {
    /// Suppress the occurrence entirely.
    Skipped,
    /// Redirect the occurrence to a new start/end.
    Rescheduled,
}

impl std::fmt::Display for ExceptionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExceptionAction::Skipped => write!(f, "skipped"),
            ExceptionAction::Rescheduled => write!(f, "rescheduled"),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid exception action: {0}")]
pub struct ParseExceptionActionError(String);

impl FromStr for ExceptionAction {
    type Err = ParseExceptionActionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "skipped" => Ok(ExceptionAction::Skipped),
            "rescheduled" => Ok(ExceptionAction::Rescheduled),
            _ => Err(ParseExceptionActionError(s.to_string())),
        }
    }
}

/// A per-occurrence override that suppresses or redirects a single generated
/// occurrence without altering the underlying rule.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RuleException {
    pub id: String,
    pub routine_id: String,
    /// Local occurrence day the override applies to.
    pub occurrence_date: NaiveDate,
    pub action: ExceptionAction,
    pub new_started_at: Option<NaiveDateTime>,
    pub new_ended_at: Option<NaiveDateTime>,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Data for recording a new exception. Writes are last-write-wins per
/// `(routine_id, occurrence_date, action)`.
#[derive(Debug, Clone)]
pub struct NewRuleException {
    pub routine_id: String,
    pub occurrence_date: NaiveDate,
    pub action: ExceptionAction,
    pub new_started_at: Option<NaiveDateTime>,
    pub new_ended_at: Option<NaiveDateTime>,
    pub notes: Option<String>,
}

/// A logged session. Owned by the history collaborator; the engine consults
/// it read-only except when confirming a guide into a real entry.
///
/// `repeating_session_id` and `original_time` link a confirmed occurrence
/// back to its generating rule and the exact scheduled instant it replaced.
/// `future_session` marks synthesized guide placeholders.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct HistoryEntry {
    pub id: String,
    pub user_id: String,
    pub task_name: String,
    pub goal_name: Option<String>,
    pub bucket_name: Option<String>,
    pub started_at: NaiveDateTime,
    pub ended_at: NaiveDateTime,
    pub repeating_session_id: Option<String>,
    pub original_time: Option<NaiveDateTime>,
    pub future_session: bool,
}

/// A rule occurrence with a confirmed history record behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedOccurrence {
    pub routine_id: String,
    pub occurrence_date: NaiveDate,
}
