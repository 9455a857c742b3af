use crate::error::CoreError;
use crate::models::{ExceptionAction, NewRuleException, RuleException};
use crate::repository::SqliteRepository;
use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use uuid::Uuid;

#[async_trait]
impl super::ExceptionStore for SqliteRepository {
    async fn list_exceptions(&self, user_id: &str) -> Result<Vec<RuleException>, CoreError> {
        // Exceptions are user-scoped through their owning rule.
        let exceptions = sqlx::query_as(
            r#"SELECT e.* FROM rule_exceptions e
            JOIN repeating_rules r ON r.id = e.routine_id
            WHERE r.user_id = $1
            ORDER BY e.occurrence_date"#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;
        Ok(exceptions)
    }

    async fn upsert_exception(
        &self,
        exception: NewRuleException,
    ) -> Result<RuleException, CoreError> {
        if exception.action == ExceptionAction::Rescheduled
            && exception.new_started_at.is_none()
        {
            return Err(CoreError::InvalidInput(
                "Reschedule exceptions require a new start time".to_string(),
            ));
        }

        let record = RuleException {
            id: Uuid::new_v4().to_string(),
            routine_id: exception.routine_id,
            occurrence_date: exception.occurrence_date,
            action: exception.action,
            new_started_at: exception.new_started_at,
            new_ended_at: exception.new_ended_at,
            notes: exception.notes,
            created_at: Local::now().naive_local(),
        };

        let mut tx = self.pool().begin().await?;

        // Last write wins per (routine, day, action).
        sqlx::query(
            "DELETE FROM rule_exceptions WHERE routine_id = $1 AND occurrence_date = $2 AND action = $3",
        )
        .bind(&record.routine_id)
        .bind(record.occurrence_date)
        .bind(record.action)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"INSERT INTO rule_exceptions
            (id, routine_id, occurrence_date, action, new_started_at, new_ended_at, notes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"#,
        )
        .bind(&record.id)
        .bind(&record.routine_id)
        .bind(record.occurrence_date)
        .bind(record.action)
        .bind(record.new_started_at)
        .bind(record.new_ended_at)
        .bind(&record.notes)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(record)
    }

    async fn has_exception(
        &self,
        routine_id: &str,
        occurrence_date: NaiveDate,
    ) -> Result<bool, CoreError> {
        let found = sqlx::query(
            "SELECT 1 FROM rule_exceptions WHERE routine_id = $1 AND occurrence_date = $2 LIMIT 1",
        )
        .bind(routine_id)
        .bind(occurrence_date)
        .fetch_optional(self.pool())
        .await?;
        Ok(found.is_some())
    }

    async fn delete_reschedule_exception(
        &self,
        routine_id: &str,
        occurrence_date: NaiveDate,
    ) -> Result<bool, CoreError> {
        let result = sqlx::query(
            "DELETE FROM rule_exceptions WHERE routine_id = $1 AND occurrence_date = $2 AND action = $3",
        )
        .bind(routine_id)
        .bind(occurrence_date)
        .bind(ExceptionAction::Rescheduled)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
