use crate::calendar;
use crate::error::CoreError;
use crate::models::{
    is_canonical_id, Frequency, HistoryEntry, MonthlyPattern, RecurrenceRule,
};
use crate::recurrence;
use crate::repository::SqliteRepository;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use sqlx::sqlite::Sqlite;
use sqlx::{FromRow, Transaction};
use std::collections::HashMap;
use uuid::Uuid;

/// Raw persisted shape of a rule. Decoding goes through
/// `RecurrenceRule::normalized()` so every read-side ingestion funnels
/// through the same clamping and defaulting.
#[derive(Debug, FromRow)]
struct RuleRow {
    id: String,
    user_id: String,
    active: bool,
    frequency: Frequency,
    repeat_every: i64,
    day_of_week: Option<String>,
    monthly_pattern: Option<MonthlyPattern>,
    time_of_day_minutes: i64,
    duration_minutes: i64,
    task_name: String,
    goal_name: Option<String>,
    bucket_name: Option<String>,
    timezone: Option<String>,
    created_at: Option<NaiveDateTime>,
    start_at: Option<NaiveDateTime>,
    end_at: Option<NaiveDateTime>,
}

impl RuleRow {
    fn into_rule(self) -> Result<RecurrenceRule, CoreError> {
        // A malformed weekday column degrades to "no set"; normalization
        // re-derives a default where one is required.
        let day_of_week = self
            .day_of_week
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Vec<u8>>(raw).ok());

        RecurrenceRule {
            id: self.id,
            user_id: self.user_id,
            active: self.active,
            frequency: self.frequency,
            repeat_every: self.repeat_every.max(0) as u32,
            day_of_week,
            monthly_pattern: self.monthly_pattern,
            time_of_day_minutes: self.time_of_day_minutes.clamp(0, 1439) as u32,
            duration_minutes: self.duration_minutes.max(0) as u32,
            task_name: self.task_name,
            goal_name: self.goal_name,
            bucket_name: self.bucket_name,
            timezone: self.timezone,
            created_at: self.created_at,
            start_at: self.start_at,
            end_at: self.end_at,
        }
        .normalized()
    }
}

#[async_trait]
impl super::RuleStore for SqliteRepository {
    async fn list_rules(&self, user_id: &str) -> Result<Vec<RecurrenceRule>, CoreError> {
        let rows: Vec<RuleRow> =
            sqlx::query_as("SELECT * FROM repeating_rules WHERE user_id = $1 ORDER BY created_at")
                .bind(user_id)
                .fetch_all(self.pool())
                .await?;

        let mut rules = Vec::with_capacity(rows.len());
        let mut invalid_ids = Vec::new();
        for row in rows {
            let id = row.id.clone();
            match row.into_rule() {
                Ok(rule) => rules.push(rule),
                Err(CoreError::InvalidWindow { start, end }) => {
                    // Inverted windows are fatal to the entity: delete rather
                    // than display.
                    tracing::warn!(rule_id = %id, %start, %end, "deleting rule with inverted window");
                    invalid_ids.push(id);
                }
                Err(err) => return Err(err),
            }
        }

        for id in invalid_ids {
            sqlx::query("DELETE FROM repeating_rules WHERE id = $1")
                .bind(&id)
                .execute(self.pool())
                .await?;
        }

        Ok(rules)
    }

    async fn upsert_rules(
        &self,
        rules: &[RecurrenceRule],
    ) -> Result<HashMap<String, String>, CoreError> {
        let mut tx = self.pool().begin().await?;
        let mut remap = HashMap::new();

        for rule in rules {
            let canonical_id = if is_canonical_id(&rule.id) {
                rule.id.clone()
            } else {
                let assigned = Uuid::new_v4().to_string();
                remap.insert(rule.id.clone(), assigned.clone());
                assigned
            };
            Self::upsert_rule_in_transaction(&mut tx, rule, &canonical_id).await?;
        }

        tx.commit().await?;
        Ok(remap)
    }

    async fn find_rule_by_id(&self, rule_id: &str) -> Result<Option<RecurrenceRule>, CoreError> {
        let row: Option<RuleRow> = sqlx::query_as("SELECT * FROM repeating_rules WHERE id = $1")
            .bind(rule_id)
            .fetch_optional(self.pool())
            .await?;
        row.map(RuleRow::into_rule).transpose()
    }

    async fn update_rule_end(
        &self,
        rule_id: &str,
        end_at: NaiveDateTime,
    ) -> Result<(), CoreError> {
        let result = sqlx::query("UPDATE repeating_rules SET end_at = $1 WHERE id = $2")
            .bind(end_at)
            .bind(rule_id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(rule_id.to_string()));
        }
        Ok(())
    }

    async fn delete_rule(&self, rule_id: &str) -> Result<(), CoreError> {
        sqlx::query("DELETE FROM repeating_rules WHERE id = $1")
            .bind(rule_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn set_rule_active(&self, rule_id: &str, active: bool) -> Result<(), CoreError> {
        let result = sqlx::query("UPDATE repeating_rules SET active = $1 WHERE id = $2")
            .bind(active)
            .bind(rule_id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(rule_id.to_string()));
        }
        Ok(())
    }

    async fn find_rules_matching_entry(
        &self,
        entry: &HistoryEntry,
        active_only: bool,
    ) -> Result<Vec<RecurrenceRule>, CoreError> {
        let scheduled = entry.original_time.unwrap_or(entry.started_at);
        let minutes = calendar::minute_of_day(scheduled) as i64;
        let duration = (entry.ended_at - entry.started_at).num_minutes().max(1);

        let mut sql = String::from(
            "SELECT * FROM repeating_rules \
             WHERE user_id = $1 AND task_name = $2 \
             AND time_of_day_minutes = $3 AND duration_minutes = $4",
        );
        if active_only {
            sql.push_str(" AND active = TRUE");
        }

        let rows: Vec<RuleRow> = sqlx::query_as(&sql)
            .bind(&entry.user_id)
            .bind(&entry.task_name)
            .bind(minutes)
            .bind(duration)
            .fetch_all(self.pool())
            .await?;

        let entry_day = scheduled.date();
        let entry_weekday = calendar::weekday_index(entry_day);

        let mut matched = Vec::new();
        for row in rows {
            let rule = match row.into_rule() {
                Ok(rule) => rule,
                Err(CoreError::InvalidWindow { .. }) => continue,
                Err(err) => return Err(err),
            };
            let keep = match rule.frequency {
                Frequency::Daily => true,
                Frequency::Weekly => rule
                    .day_of_week
                    .as_ref()
                    .map(|days| days.contains(&entry_weekday))
                    .unwrap_or(true),
                // Day-of-month and month-day-key checks happen post-fetch.
                Frequency::Monthly | Frequency::Annually => {
                    recurrence::rule_matches_day(&rule, entry_day)
                }
            };
            if keep {
                matched.push(rule);
            }
        }
        Ok(matched)
    }
}

impl SqliteRepository {
    /// Insert or replace a rule row within an existing transaction, writing
    /// it under `canonical_id` (which may differ from `rule.id` when a
    /// pending local id is being renamed).
    pub(crate) async fn upsert_rule_in_transaction(
        tx: &mut Transaction<'_, Sqlite>,
        rule: &RecurrenceRule,
        canonical_id: &str,
    ) -> Result<(), CoreError> {
        let day_of_week_json = rule
            .day_of_week
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| CoreError::InvalidInput(format!("unserializable weekday set: {}", e)))?;

        sqlx::query(
            r#"INSERT OR REPLACE INTO repeating_rules
            (id, user_id, active, frequency, repeat_every, day_of_week, monthly_pattern,
             time_of_day_minutes, duration_minutes, task_name, goal_name, bucket_name,
             timezone, created_at, start_at, end_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"#,
        )
        .bind(canonical_id)
        .bind(&rule.user_id)
        .bind(rule.active)
        .bind(rule.frequency)
        .bind(rule.repeat_every as i64)
        .bind(day_of_week_json)
        .bind(rule.monthly_pattern)
        .bind(rule.time_of_day_minutes as i64)
        .bind(rule.duration_minutes as i64)
        .bind(&rule.task_name)
        .bind(&rule.goal_name)
        .bind(&rule.bucket_name)
        .bind(&rule.timezone)
        .bind(rule.created_at)
        .bind(rule.start_at)
        .bind(rule.end_at)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}
