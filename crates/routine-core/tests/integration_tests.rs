use routine_core::db::establish_connection;
use routine_core::lock::InMemoryAdvisoryLock;
use routine_core::manager::{RoutineManager, RuleSpawnOptions};
use routine_core::models::*;
use routine_core::repository::{
    ExceptionStore, HistoryStore, RuleStore, SqliteRepository,
};
use chrono::{NaiveDate, NaiveDateTime};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

/// Helper function to create a test database with a repository and manager
/// sharing the same pool.
async fn setup_test_db() -> (SqliteRepository, RoutineManager<SqliteRepository>, TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
    let db_path = temp_dir.path().join("test.db");

    let pool = establish_connection(&db_path.to_string_lossy())
        .await
        .expect("Failed to establish test database connection");

    let repo = SqliteRepository::new(pool.clone());
    let manager = RoutineManager::new(
        SqliteRepository::new(pool),
        Arc::new(InMemoryAdvisoryLock::new()),
    );

    (repo, manager, temp_dir)
}

fn dt(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, min, 0)
        .unwrap()
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// A logged one-hour session for `user-1`, scheduled at the given start.
fn test_entry(task: &str, started_at: NaiveDateTime) -> HistoryEntry {
    HistoryEntry {
        id: Uuid::new_v4().to_string(),
        user_id: "user-1".to_string(),
        task_name: task.to_string(),
        goal_name: None,
        bucket_name: None,
        started_at,
        ended_at: started_at + chrono::Duration::minutes(60),
        repeating_session_id: None,
        original_time: None,
        future_session: false,
    }
}

#[tokio::test]
async fn test_create_rule_from_entry_gets_canonical_id() {
    let (repo, manager, _temp_dir) = setup_test_db().await;

    // 2024-01-01 is a Monday.
    let entry = test_entry("Deep work", dt(2024, 1, 1, 9, 0));
    let rule = manager
        .create_rule_from_entry(&entry, Frequency::Weekly, None, RuleSpawnOptions::default())
        .await
        .expect("Failed to create rule");

    assert!(is_canonical_id(&rule.id));
    assert_eq!(rule.frequency, Frequency::Weekly);
    assert_eq!(rule.day_of_week, Some(vec![1])); // Monday
    assert_eq!(rule.time_of_day_minutes, 540);
    assert_eq!(rule.duration_minutes, 60);
    assert_eq!(rule.start_at, Some(dt(2024, 1, 1, 9, 0)));

    // Persisted remotely and cached locally under the same id.
    let stored = repo
        .find_rule_by_id(&rule.id)
        .await
        .expect("Failed to fetch rule")
        .expect("Rule not persisted");
    assert_eq!(stored.task_name, "Deep work");
    assert_eq!(manager.cached_rules("user-1").len(), 1);
}

#[tokio::test]
async fn test_create_rule_with_occurrence_count_bound() {
    let (_repo, manager, _temp_dir) = setup_test_db().await;

    let entry = test_entry("Review", dt(2024, 1, 1, 9, 0));
    let rule = manager
        .create_rule_from_entry(
            &entry,
            Frequency::Daily,
            None,
            RuleSpawnOptions {
                occurrence_count: Some(3),
                ..Default::default()
            },
        )
        .await
        .expect("Failed to create rule");

    // Three daily occurrences from Jan 1 end at the Jan 3 start.
    assert_eq!(rule.end_at, Some(dt(2024, 1, 3, 9, 0)));
    assert!(rule.is_bounded());
}

#[tokio::test]
async fn test_create_rule_with_end_date_keeps_boundary_occurrence() {
    let (_repo, manager, _temp_dir) = setup_test_db().await;

    // Weekly Monday rule, end date on a Wednesday: the last Monday on or
    // before it is Jan 15.
    let entry = test_entry("Standup", dt(2024, 1, 1, 9, 0));
    let rule = manager
        .create_rule_from_entry(
            &entry,
            Frequency::Weekly,
            None,
            RuleSpawnOptions {
                end_date: Some(date(2024, 1, 17)),
                ..Default::default()
            },
        )
        .await
        .expect("Failed to create rule");

    assert_eq!(rule.end_at, Some(dt(2024, 1, 15, 9, 0)));
}

#[tokio::test]
async fn test_deactivate_and_delete_matching_rules() {
    let (repo, manager, _temp_dir) = setup_test_db().await;

    let entry = test_entry("Gym", dt(2024, 1, 1, 18, 0));
    let rule = manager
        .create_rule_from_entry(&entry, Frequency::Weekly, None, RuleSpawnOptions::default())
        .await
        .expect("Failed to create rule");

    // A same-label entry at a different minute matches nothing.
    let off_minute = test_entry("Gym", dt(2024, 1, 8, 19, 0));
    assert_eq!(
        manager.deactivate_matching_rules(&off_minute).await.unwrap(),
        0
    );

    // Same label, same minute, matching weekday: deactivated.
    let next_monday = test_entry("Gym", dt(2024, 1, 8, 18, 0));
    assert_eq!(
        manager.deactivate_matching_rules(&next_monday).await.unwrap(),
        1
    );
    let stored = repo.find_rule_by_id(&rule.id).await.unwrap().unwrap();
    assert!(!stored.active);

    // Delete matches regardless of the active flag.
    assert_eq!(manager.delete_matching_rules(&next_monday).await.unwrap(), 1);
    assert!(repo.find_rule_by_id(&rule.id).await.unwrap().is_none());
    assert!(manager.cached_rules("user-1").is_empty());
}

#[tokio::test]
async fn test_stop_repeating_after_sets_end_and_prunes_guides() {
    let (repo, manager, _temp_dir) = setup_test_db().await;

    let entry = test_entry("Journal", dt(2024, 1, 1, 21, 0));
    let rule = manager
        .create_rule_from_entry(&entry, Frequency::Daily, None, RuleSpawnOptions::default())
        .await
        .expect("Failed to create rule");

    // Materialized future guides on both sides of the cutoff.
    for day in [9, 10, 11] {
        let mut guide = test_entry("Journal", dt(2024, 1, day, 21, 0));
        guide.repeating_session_id = Some(rule.id.clone());
        guide.original_time = Some(guide.started_at);
        guide.future_session = true;
        repo.add_entry(guide).await.expect("Failed to add guide");
    }

    let end = manager
        .stop_repeating_after(&rule.id, date(2024, 1, 10))
        .await
        .expect("Failed to stop rule")
        .expect("Rule should survive with an end boundary");
    assert_eq!(end, dt(2024, 1, 10, 21, 0));

    let stored = repo.find_rule_by_id(&rule.id).await.unwrap().unwrap();
    assert_eq!(stored.end_at, Some(dt(2024, 1, 10, 21, 0)));

    // The Jan 11 guide is gone; Jan 9 and 10 remain.
    let remaining: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM session_history WHERE repeating_session_id = $1")
            .bind(&rule.id)
            .fetch_one(repo.pool())
            .await
            .expect("Failed to count guides");
    assert_eq!(remaining, 2);
}

#[tokio::test]
async fn test_stop_repeating_before_first_occurrence_deletes_rule() {
    let (repo, manager, _temp_dir) = setup_test_db().await;

    let entry = test_entry("Journal", dt(2024, 3, 15, 21, 0));
    let rule = manager
        .create_rule_from_entry(&entry, Frequency::Daily, None, RuleSpawnOptions::default())
        .await
        .expect("Failed to create rule");

    let end = manager
        .stop_repeating_after(&rule.id, date(2024, 3, 1))
        .await
        .expect("Failed to stop rule");
    assert!(end.is_none());
    assert!(repo.find_rule_by_id(&rule.id).await.unwrap().is_none());
    assert!(manager.cached_rules("user-1").is_empty());
}

#[tokio::test]
async fn test_rule_retires_once_every_occurrence_is_resolved() {
    let (repo, manager, _temp_dir) = setup_test_db().await;

    // Daily rule bounded to three occurrences: Jan 1, 2, 3.
    let entry = test_entry("Reading", dt(2024, 1, 1, 8, 0));
    let rule = manager
        .create_rule_from_entry(
            &entry,
            Frequency::Daily,
            None,
            RuleSpawnOptions {
                occurrence_count: Some(3),
                ..Default::default()
            },
        )
        .await
        .expect("Failed to create rule");

    manager
        .confirm_occurrence(&rule, dt(2024, 1, 1, 8, 0))
        .await
        .expect("Failed to confirm");
    manager
        .skip_occurrence(&rule.id, date(2024, 1, 2), None)
        .await
        .expect("Failed to skip");

    // Two of three resolved: not retired yet.
    assert!(!manager
        .evaluate_and_maybe_retire_rule(&rule.id)
        .await
        .unwrap());
    assert!(repo.find_rule_by_id(&rule.id).await.unwrap().is_some());

    manager
        .reschedule_occurrence(
            &rule.id,
            date(2024, 1, 3),
            dt(2024, 1, 3, 10, 0),
            dt(2024, 1, 3, 11, 0),
            None,
        )
        .await
        .expect("Failed to reschedule");

    assert!(manager
        .evaluate_and_maybe_retire_rule(&rule.id)
        .await
        .unwrap());
    assert!(repo.find_rule_by_id(&rule.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unbounded_rule_never_retires() {
    let (repo, manager, _temp_dir) = setup_test_db().await;

    let entry = test_entry("Reading", dt(2024, 1, 1, 8, 0));
    let rule = manager
        .create_rule_from_entry(&entry, Frequency::Daily, None, RuleSpawnOptions::default())
        .await
        .expect("Failed to create rule");

    manager
        .confirm_occurrence(&rule, dt(2024, 1, 1, 8, 0))
        .await
        .expect("Failed to confirm");

    assert!(!manager
        .evaluate_and_maybe_retire_rule(&rule.id)
        .await
        .unwrap());
    assert!(repo.find_rule_by_id(&rule.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_exception_last_write_wins_per_day_and_action() {
    let (repo, manager, _temp_dir) = setup_test_db().await;

    let entry = test_entry("Yoga", dt(2024, 1, 1, 7, 0));
    let rule = manager
        .create_rule_from_entry(&entry, Frequency::Daily, None, RuleSpawnOptions::default())
        .await
        .expect("Failed to create rule");

    manager
        .skip_occurrence(&rule.id, date(2024, 1, 5), Some("travel".to_string()))
        .await
        .expect("Failed to skip");
    manager
        .skip_occurrence(&rule.id, date(2024, 1, 5), Some("still traveling".to_string()))
        .await
        .expect("Failed to skip again");

    let exceptions = repo.list_exceptions("user-1").await.unwrap();
    assert_eq!(exceptions.len(), 1);
    assert_eq!(exceptions[0].notes.as_deref(), Some("still traveling"));
}

#[tokio::test]
async fn test_confirm_occurrence_clears_reschedule_override() {
    let (repo, manager, _temp_dir) = setup_test_db().await;

    let entry = test_entry("Piano", dt(2024, 1, 1, 17, 0));
    let rule = manager
        .create_rule_from_entry(&entry, Frequency::Daily, None, RuleSpawnOptions::default())
        .await
        .expect("Failed to create rule");

    manager
        .reschedule_occurrence(
            &rule.id,
            date(2024, 1, 2),
            dt(2024, 1, 2, 19, 0),
            dt(2024, 1, 2, 20, 0),
            None,
        )
        .await
        .expect("Failed to reschedule");
    assert!(repo.has_exception(&rule.id, date(2024, 1, 2)).await.unwrap());

    let confirmed = manager
        .confirm_occurrence(&rule, dt(2024, 1, 2, 17, 0))
        .await
        .expect("Failed to confirm");
    assert_eq!(confirmed.repeating_session_id.as_deref(), Some(rule.id.as_str()));
    assert_eq!(confirmed.original_time, Some(dt(2024, 1, 2, 17, 0)));
    assert_eq!(confirmed.ended_at, dt(2024, 1, 2, 18, 0));
    assert!(!repo.has_exception(&rule.id, date(2024, 1, 2)).await.unwrap());
}

#[tokio::test]
async fn test_sync_pushes_pending_rules_and_remaps_ids() {
    let (repo, manager, _temp_dir) = setup_test_db().await;

    // A rule that only exists locally under a pending id.
    let pending = RecurrenceRule {
        id: "pending-abc123".to_string(),
        user_id: "user-1".to_string(),
        active: true,
        frequency: Frequency::Daily,
        repeat_every: 1,
        day_of_week: None,
        monthly_pattern: None,
        time_of_day_minutes: 540,
        duration_minutes: 30,
        task_name: "Stretch".to_string(),
        goal_name: None,
        bucket_name: None,
        timezone: None,
        created_at: Some(dt(2024, 1, 1, 9, 0)),
        start_at: Some(dt(2024, 1, 1, 9, 0)),
        end_at: None,
    };
    manager.cache().upsert("user-1", pending);

    let synced = manager.sync_rules("user-1").await.expect("Failed to sync");

    assert_eq!(synced.len(), 1);
    assert!(is_canonical_id(&synced[0].id));
    assert_eq!(synced[0].task_name, "Stretch");
    assert!(manager.cache().pending("user-1").is_empty());

    // The remote store holds it under the canonical id.
    let remote = repo.list_rules("user-1").await.unwrap();
    assert_eq!(remote.len(), 1);
    assert_eq!(remote[0].id, synced[0].id);
}

#[tokio::test]
async fn test_list_rules_deletes_inverted_window_rows() {
    let (repo, manager, _temp_dir) = setup_test_db().await;

    let entry = test_entry("Valid", dt(2024, 1, 1, 9, 0));
    manager
        .create_rule_from_entry(&entry, Frequency::Daily, None, RuleSpawnOptions::default())
        .await
        .expect("Failed to create rule");

    // A corrupted row whose window ends before it starts.
    let bad_id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"INSERT INTO repeating_rules
        (id, user_id, active, frequency, repeat_every, day_of_week, monthly_pattern,
         time_of_day_minutes, duration_minutes, task_name, goal_name, bucket_name,
         timezone, created_at, start_at, end_at)
        VALUES ($1, 'user-1', TRUE, 'daily', 1, NULL, NULL, 540, 60, 'Broken',
         NULL, NULL, NULL, $2, $3, $4)"#,
    )
    .bind(&bad_id)
    .bind(dt(2024, 1, 1, 9, 0))
    .bind(dt(2024, 6, 1, 9, 0))
    .bind(dt(2024, 1, 1, 9, 0))
    .execute(repo.pool())
    .await
    .expect("Failed to insert corrupted row");

    let rules = repo.list_rules("user-1").await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].task_name, "Valid");
    assert!(repo.find_rule_by_id(&bad_id).await.unwrap().is_none());
}
