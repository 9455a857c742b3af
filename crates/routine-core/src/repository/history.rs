use crate::calendar;
use crate::error::CoreError;
use crate::models::{ConfirmedOccurrence, HistoryEntry};
use crate::repository::SqliteRepository;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use sqlx::FromRow;

#[derive(Debug, FromRow)]
struct ConfirmedRow {
    repeating_session_id: String,
    original_time: NaiveDateTime,
}

#[async_trait]
impl super::HistoryStore for SqliteRepository {
    async fn list_confirmed_occurrences(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConfirmedOccurrence>, CoreError> {
        let rows: Vec<ConfirmedRow> = sqlx::query_as(
            r#"SELECT repeating_session_id, original_time FROM session_history
            WHERE user_id = $1
            AND repeating_session_id IS NOT NULL
            AND original_time IS NOT NULL
            AND future_session = FALSE"#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ConfirmedOccurrence {
                routine_id: row.repeating_session_id,
                occurrence_date: row.original_time.date(),
            })
            .collect())
    }

    async fn prune_future_placeholders(
        &self,
        rule_id: &str,
        after: NaiveDate,
    ) -> Result<u64, CoreError> {
        // "After the cutoff date" is exclusive: anything scheduled from the
        // next day's midnight onward goes.
        let boundary = calendar::at_minutes(after + Duration::days(1), 0);
        let result = sqlx::query(
            r#"DELETE FROM session_history
            WHERE repeating_session_id = $1
            AND future_session = TRUE
            AND original_time >= $2"#,
        )
        .bind(rule_id)
        .bind(boundary)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    async fn add_entry(&self, entry: HistoryEntry) -> Result<HistoryEntry, CoreError> {
        sqlx::query(
            r#"INSERT INTO session_history
            (id, user_id, task_name, goal_name, bucket_name, started_at, ended_at,
             repeating_session_id, original_time, future_session)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"#,
        )
        .bind(&entry.id)
        .bind(&entry.user_id)
        .bind(&entry.task_name)
        .bind(&entry.goal_name)
        .bind(&entry.bucket_name)
        .bind(entry.started_at)
        .bind(entry.ended_at)
        .bind(&entry.repeating_session_id)
        .bind(entry.original_time)
        .bind(entry.future_session)
        .execute(self.pool())
        .await?;
        Ok(entry)
    }

    async fn find_entry_by_id(&self, id: &str) -> Result<Option<HistoryEntry>, CoreError> {
        let entry = sqlx::query_as("SELECT * FROM session_history WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(entry)
    }
}
