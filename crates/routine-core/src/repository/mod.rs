use crate::db::DbPool;
use crate::error::CoreError;
use crate::models::{
    ConfirmedOccurrence, HistoryEntry, NewRuleException, RecurrenceRule, RuleException,
};
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;

// Re-export domain modules
pub mod exceptions;
pub mod history;
pub mod rules;

// Traits are defined in this module and implemented in respective domain modules

/// Domain-specific trait for rule persistence.
///
/// Storage-agnostic: the SQLite implementation below stands in for the
/// hosted backend, but callers only depend on this contract.
#[async_trait]
pub trait RuleStore {
    /// Lists a user's rules. Rows whose window is inverted (`start_at >
    /// end_at`) are deleted during the scan and never returned.
    async fn list_rules(&self, user_id: &str) -> Result<Vec<RecurrenceRule>, CoreError>;

    /// Inserts or replaces rules. Rules carrying a non-canonical (locally
    /// generated) id are assigned a canonical id on write; the returned map
    /// records every `old id -> canonical id` rename.
    async fn upsert_rules(
        &self,
        rules: &[RecurrenceRule],
    ) -> Result<HashMap<String, String>, CoreError>;

    async fn find_rule_by_id(&self, rule_id: &str) -> Result<Option<RecurrenceRule>, CoreError>;
    async fn update_rule_end(&self, rule_id: &str, end_at: NaiveDateTime)
        -> Result<(), CoreError>;
    async fn delete_rule(&self, rule_id: &str) -> Result<(), CoreError>;
    async fn set_rule_active(&self, rule_id: &str, active: bool) -> Result<(), CoreError>;

    /// Finds rules sharing an entry's label, time of day, and duration.
    /// Matching is per-frequency: weekly additionally requires the entry's
    /// weekday in the rule's set; monthly and annual rules are filtered
    /// post-fetch against the entry's date, since day-of-month and
    /// month-day-key checks are not simple store predicates.
    async fn find_rules_matching_entry(
        &self,
        entry: &HistoryEntry,
        active_only: bool,
    ) -> Result<Vec<RecurrenceRule>, CoreError>;
}

/// Domain-specific trait for per-occurrence exception records.
#[async_trait]
pub trait ExceptionStore {
    async fn list_exceptions(&self, user_id: &str) -> Result<Vec<RuleException>, CoreError>;

    /// Records an exception, replacing any prior record for the same
    /// `(routine_id, occurrence_date, action)` triple (last write wins).
    async fn upsert_exception(
        &self,
        exception: NewRuleException,
    ) -> Result<RuleException, CoreError>;

    async fn has_exception(
        &self,
        routine_id: &str,
        occurrence_date: NaiveDate,
    ) -> Result<bool, CoreError>;

    /// Removes a reschedule override for one occurrence; returns whether a
    /// record existed.
    async fn delete_reschedule_exception(
        &self,
        routine_id: &str,
        occurrence_date: NaiveDate,
    ) -> Result<bool, CoreError>;
}

/// Domain-specific trait for the session-history ledger. The engine consults
/// it read-only, except for confirming occurrences and pruning guides.
#[async_trait]
pub trait HistoryStore {
    /// Occurrence dispositions derived from logged entries with a non-null
    /// `repeating_session_id` and `original_time` (guides excluded).
    async fn list_confirmed_occurrences(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConfirmedOccurrence>, CoreError>;

    /// Deletes synthesized future guide placeholders for a rule whose
    /// scheduled time falls strictly after `after`. Returns the number of
    /// rows removed.
    async fn prune_future_placeholders(
        &self,
        rule_id: &str,
        after: NaiveDate,
    ) -> Result<u64, CoreError>;

    async fn add_entry(&self, entry: HistoryEntry) -> Result<HistoryEntry, CoreError>;
    async fn find_entry_by_id(&self, id: &str) -> Result<Option<HistoryEntry>, CoreError>;
}

/// Main repository trait that composes all domain traits
#[async_trait]
pub trait Repository: RuleStore + ExceptionStore + HistoryStore + Send + Sync {}

/// SQLite implementation of the repository pattern
pub struct SqliteRepository {
    pool: DbPool,
}

impl SqliteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the database pool shared across the store modules
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

impl Repository for SqliteRepository {}
