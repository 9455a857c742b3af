//! Rule lifecycle management.
//!
//! `RoutineManager` ties the pure occurrence arithmetic to the stores: it
//! creates rules from logged entries, applies end boundaries, records
//! per-occurrence actions, retires fully-resolved rules, and keeps the
//! per-user cache converged with the remote store.
//!
//! Writes are local-first: every remote write has a cache fallback, so a
//! rule stays usable even when the backend is unreachable. Only strict-mode
//! callers (data-migration flows) opt into propagating remote errors.

use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use uuid::Uuid;

use crate::cache::RuleCache;
use crate::calendar;
use crate::error::CoreError;
use crate::lock::AdvisoryLock;
use crate::models::{
    ExceptionAction, Frequency, HistoryEntry, MonthlyPattern, NewRuleException, RecurrenceRule,
    RuleException,
};
use crate::recurrence;
use crate::repository::Repository;
use crate::resolver::{is_rule_window_fully_resolved, ResolutionSnapshot};

/// Advisory-lock lease for a bulk local-to-remote push. Long enough to cover
/// a push, short enough that a crashed holder stalls other writers only
/// briefly.
pub const SYNC_LOCK_TTL: StdDuration = StdDuration::from_secs(15);

/// Options for creating a rule from a logged entry.
#[derive(Debug, Clone, Default)]
pub struct RuleSpawnOptions {
    /// Bound the rule so its last occurrence is on or before this date.
    pub end_date: Option<NaiveDate>,
    /// Bound the rule to a total occurrence count ("repeat N times").
    pub occurrence_count: Option<u32>,
    /// Propagate remote-write failures instead of falling back to local
    /// persistence. Used by migration flows only.
    pub strict: bool,
}

pub struct RoutineManager<R: Repository> {
    repo: R,
    cache: RuleCache,
    lock: Arc<dyn AdvisoryLock>,
}

impl<R: Repository> RoutineManager<R> {
    pub fn new(repo: R, lock: Arc<dyn AdvisoryLock>) -> Self {
        Self {
            repo,
            cache: RuleCache::new(),
            lock,
        }
    }

    /// The per-user cache snapshot; the authority for synchronous reads.
    pub fn cache(&self) -> &RuleCache {
        &self.cache
    }

    /// Cached rules for a user, without touching the remote store.
    pub fn cached_rules(&self, user_id: &str) -> Vec<RecurrenceRule> {
        self.cache.get(user_id)
    }

    /// Creates a recurrence rule from a logged history entry.
    ///
    /// # Behavior
    /// - Derives time-of-day and duration from the entry's start/end, the
    ///   weekday set from the entry's weekday (weekly and monthly
    ///   first/last), and anchors `start_at` to the entry's own scheduled
    ///   minute rather than wall-clock now
    /// - Optionally precomputes `end_at` from an occurrence count or an
    ///   explicit end date (the chosen date's occurrence stays valid)
    /// - Attempts the remote insert and adopts the canonical id it assigns;
    ///   on failure the rule is kept locally under a pending id and remains
    ///   usable immediately (unless `options.strict`)
    pub async fn create_rule_from_entry(
        &self,
        entry: &HistoryEntry,
        frequency: Frequency,
        monthly_pattern: Option<MonthlyPattern>,
        options: RuleSpawnOptions,
    ) -> Result<RecurrenceRule, CoreError> {
        let scheduled = entry.original_time.unwrap_or(entry.started_at);
        let start_at = calendar::at_minutes(scheduled.date(), calendar::minute_of_day(scheduled));
        let duration = (entry.ended_at - entry.started_at).num_minutes().max(1) as u32;

        let day_of_week = match (frequency, monthly_pattern) {
            (Frequency::Weekly, _)
            | (Frequency::Monthly, Some(MonthlyPattern::First))
            | (Frequency::Monthly, Some(MonthlyPattern::Last)) => {
                Some(vec![calendar::weekday_index(start_at.date())])
            }
            _ => None,
        };

        let mut rule = RecurrenceRule {
            id: pending_rule_id(),
            user_id: entry.user_id.clone(),
            active: true,
            frequency,
            repeat_every: 1,
            day_of_week,
            monthly_pattern,
            time_of_day_minutes: calendar::minute_of_day(start_at),
            duration_minutes: duration,
            task_name: entry.task_name.clone(),
            goal_name: entry.goal_name.clone(),
            bucket_name: entry.bucket_name.clone(),
            timezone: None,
            created_at: Some(entry.started_at),
            start_at: Some(start_at),
            end_at: None,
        }
        .normalized()?;

        if let Some(count) = options.occurrence_count {
            rule.end_at = recurrence::end_after_occurrences(&rule, count);
        } else if let Some(end_date) = options.end_date {
            let boundary = calendar::at_minutes(end_date + Duration::days(1), 0);
            rule.end_at = recurrence::last_occurrence_before(&rule, boundary);
            if rule.end_at.is_none() {
                return Err(CoreError::InvalidInput(format!(
                    "rule has no occurrence on or before {}",
                    end_date
                )));
            }
        }

        match self.repo.upsert_rules(std::slice::from_ref(&rule)).await {
            Ok(remap) => {
                if let Some(canonical) = remap.get(&rule.id) {
                    rule.id = canonical.clone();
                }
                self.cache.upsert(&rule.user_id, rule.clone());
                Ok(rule)
            }
            Err(err) if options.strict => Err(err),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    rule_id = %rule.id,
                    "remote insert failed; keeping rule locally under a pending id"
                );
                self.cache.upsert(&rule.user_id, rule.clone());
                Ok(rule)
            }
        }
    }

    /// Flips inactive every active rule matching an entry's label, time of
    /// day, duration, and (per frequency) date pattern. Used when a user
    /// marks a logged session as a one-off. Returns the number deactivated.
    pub async fn deactivate_matching_rules(
        &self,
        entry: &HistoryEntry,
    ) -> Result<usize, CoreError> {
        let matches = self.repo.find_rules_matching_entry(entry, true).await?;
        for rule in &matches {
            self.repo.set_rule_active(&rule.id, false).await?;
            let mut cached = rule.clone();
            cached.active = false;
            self.cache.upsert(&entry.user_id, cached);
        }
        Ok(matches.len())
    }

    /// Deletes every rule matching an entry outright (active or not).
    pub async fn delete_matching_rules(&self, entry: &HistoryEntry) -> Result<usize, CoreError> {
        let matches = self.repo.find_rules_matching_entry(entry, false).await?;
        for rule in &matches {
            self.repo.delete_rule(&rule.id).await?;
            self.cache.remove(&entry.user_id, &rule.id);
        }
        Ok(matches.len())
    }

    /// Bounds a rule so nothing after `cutoff` is generated ("stop repeating
    /// after X").
    ///
    /// # Behavior
    /// - Sets `end_at` to the last valid occurrence strictly before the
    ///   exclusive next-day boundary, so an occurrence on the cutoff day
    ///   itself remains valid
    /// - Deletes already-materialized future guide placeholders past the
    ///   cutoff
    /// - Deletes the rule outright when no occurrence precedes the boundary
    ///   or the window collapses to empty (start >= end), rather than
    ///   persisting an invalid range
    ///
    /// Returns the new end boundary, or `None` when the rule was deleted.
    pub async fn stop_repeating_after(
        &self,
        rule_id: &str,
        cutoff: NaiveDate,
    ) -> Result<Option<NaiveDateTime>, CoreError> {
        let rule = self.find_rule(rule_id).await?;
        let boundary = calendar::at_minutes(cutoff + Duration::days(1), 0);

        let Some(last) = recurrence::last_occurrence_before(&rule, boundary) else {
            tracing::info!(rule_id, %cutoff, "cutoff precedes every occurrence; deleting rule");
            self.remove_rule(&rule).await?;
            return Ok(None);
        };

        if rule.anchor().map_or(false, |start| start >= last) {
            tracing::info!(rule_id, "end boundary collapses the window; deleting rule");
            self.remove_rule(&rule).await?;
            return Ok(None);
        }

        match self.repo.update_rule_end(&rule.id, last).await {
            Ok(()) => {}
            Err(CoreError::NotFound(_)) => {
                // Pending local rule not yet remote; the cache update below
                // still applies and the boundary lands on the next push.
                tracing::debug!(rule_id, "end boundary kept locally for pending rule");
            }
            Err(err) => return Err(err),
        }
        self.repo.prune_future_placeholders(&rule.id, cutoff).await?;

        let mut bounded = rule.clone();
        bounded.end_at = Some(last);
        self.cache.upsert(&rule.user_id, bounded);
        Ok(Some(last))
    }

    /// Retires a bounded rule if and only if every occurrence in its window
    /// has a disposition. This is the only path that deletes a rule
    /// automatically; all other deletions are explicit user actions.
    /// Returns whether the rule was retired.
    pub async fn evaluate_and_maybe_retire_rule(&self, rule_id: &str) -> Result<bool, CoreError> {
        let Some(rule) = self.repo.find_rule_by_id(rule_id).await? else {
            return Ok(false);
        };
        if !rule.is_bounded() {
            return Ok(false);
        }

        let confirmed = self.repo.list_confirmed_occurrences(&rule.user_id).await?;
        let exceptions = self.repo.list_exceptions(&rule.user_id).await?;
        let snapshot = ResolutionSnapshot::new(&confirmed, &exceptions);

        if !is_rule_window_fully_resolved(&rule, &snapshot) {
            return Ok(false);
        }

        self.remove_rule(&rule).await?;
        tracing::info!(rule_id, "retired fully resolved rule");
        Ok(true)
    }

    /// Records a skip for one occurrence; the occurrence is suppressed but
    /// the rule is untouched.
    pub async fn skip_occurrence(
        &self,
        rule_id: &str,
        occurrence_date: NaiveDate,
        notes: Option<String>,
    ) -> Result<RuleException, CoreError> {
        self.repo
            .upsert_exception(NewRuleException {
                routine_id: rule_id.to_string(),
                occurrence_date,
                action: ExceptionAction::Skipped,
                new_started_at: None,
                new_ended_at: None,
                notes,
            })
            .await
    }

    /// Redirects one occurrence to a new start/end without altering the rule.
    pub async fn reschedule_occurrence(
        &self,
        rule_id: &str,
        occurrence_date: NaiveDate,
        new_started_at: NaiveDateTime,
        new_ended_at: NaiveDateTime,
        notes: Option<String>,
    ) -> Result<RuleException, CoreError> {
        self.repo
            .upsert_exception(NewRuleException {
                routine_id: rule_id.to_string(),
                occurrence_date,
                action: ExceptionAction::Rescheduled,
                new_started_at: Some(new_started_at),
                new_ended_at: Some(new_ended_at),
                notes,
            })
            .await
    }

    /// Confirms a generated occurrence into a real history entry, linking it
    /// back to the rule and the scheduled instant it replaced, and clears any
    /// reschedule override for that day.
    pub async fn confirm_occurrence(
        &self,
        rule: &RecurrenceRule,
        occurrence_start: NaiveDateTime,
    ) -> Result<HistoryEntry, CoreError> {
        let entry = HistoryEntry {
            id: Uuid::new_v4().to_string(),
            user_id: rule.user_id.clone(),
            task_name: rule.task_name.clone(),
            goal_name: rule.goal_name.clone(),
            bucket_name: rule.bucket_name.clone(),
            started_at: occurrence_start,
            ended_at: occurrence_start + Duration::minutes(rule.duration_minutes as i64),
            repeating_session_id: Some(rule.id.clone()),
            original_time: Some(occurrence_start),
            future_session: false,
        };
        let entry = self.repo.add_entry(entry).await?;
        self.repo
            .delete_reschedule_exception(&rule.id, occurrence_start.date())
            .await?;
        Ok(entry)
    }

    /// Converges the cache with the remote store.
    ///
    /// # Behavior
    /// - Takes the per-user advisory lock and pushes rules still carrying a
    ///   pending local id, renaming them in the cache via the returned remap;
    ///   contention or push failure skips the push (best-effort; the next
    ///   sync retries)
    /// - Reads the remote rule list and replaces the cache with it, keeping
    ///   any still-pending local rules on top
    pub async fn sync_rules(&self, user_id: &str) -> Result<Vec<RecurrenceRule>, CoreError> {
        let lock_key = format!("rule-sync:{}", user_id);
        if self.lock.try_acquire(&lock_key, SYNC_LOCK_TTL) {
            let pending = self.cache.pending(user_id);
            if !pending.is_empty() {
                match self.repo.upsert_rules(&pending).await {
                    Ok(remap) => {
                        self.cache.apply_remap(user_id, &remap);
                        tracing::debug!(user_id, pushed = pending.len(), "pushed pending local rules");
                    }
                    Err(err) => {
                        tracing::warn!(user_id, error = %err, "deferring pending rule push");
                    }
                }
            }
            self.lock.release(&lock_key);
        } else {
            tracing::debug!(user_id, "sync lock held elsewhere; skipping push");
        }

        let mut merged = self.repo.list_rules(user_id).await?;
        for pending in self.cache.pending(user_id) {
            if !merged.iter().any(|r| r.id == pending.id) {
                merged.push(pending);
            }
        }
        self.cache.set(user_id, merged.clone());
        Ok(merged)
    }

    async fn find_rule(&self, rule_id: &str) -> Result<RecurrenceRule, CoreError> {
        match self.repo.find_rule_by_id(rule_id).await {
            Ok(Some(rule)) => Ok(rule),
            Ok(None) => self
                .cache
                .find_by_id(rule_id)
                .ok_or_else(|| CoreError::NotFound(rule_id.to_string())),
            Err(err) => match self.cache.find_by_id(rule_id) {
                Some(rule) => {
                    tracing::warn!(rule_id, error = %err, "remote lookup failed; using cached rule");
                    Ok(rule)
                }
                None => Err(err),
            },
        }
    }

    async fn remove_rule(&self, rule: &RecurrenceRule) -> Result<(), CoreError> {
        self.repo.delete_rule(&rule.id).await?;
        self.cache.remove(&rule.user_id, &rule.id);
        Ok(())
    }
}

/// A pending id for a rule not yet acknowledged by the remote store.
/// Deliberately not UUID-shaped so it is recognized as non-canonical.
fn pending_rule_id() -> String {
    format!("pending-{}", Uuid::new_v4().simple())
}
