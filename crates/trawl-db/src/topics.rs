//! Database operations for the `topics` table.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{map_unique_violation, DbError};

/// A row from the `topics` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TopicRow {
    pub id: i64,
    pub text: String,
    pub category: Option<String>,
    pub is_active: bool,
    pub priority: i32,
    pub daily_quota: i32,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const TOPIC_COLUMNS: &str = "id, text, category, is_active, priority, daily_quota, \
                             last_run_at, created_at, updated_at";

/// Returns active topics in collection order: highest priority first, then
/// least recently run (never-run topics before any that have run).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_active_topics(pool: &PgPool) -> Result<Vec<TopicRow>, DbError> {
    let rows = sqlx::query_as::<_, TopicRow>(&format!(
        "SELECT {TOPIC_COLUMNS} FROM topics \
         WHERE is_active = true \
         ORDER BY priority DESC, last_run_at ASC NULLS FIRST, id ASC"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns every topic, active or not, ordered by text.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_topics(pool: &PgPool) -> Result<Vec<TopicRow>, DbError> {
    let rows = sqlx::query_as::<_, TopicRow>(&format!(
        "SELECT {TOPIC_COLUMNS} FROM topics ORDER BY text"
    ))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_topic(pool: &PgPool, id: i64) -> Result<Option<TopicRow>, DbError> {
    let row = sqlx::query_as::<_, TopicRow>(&format!(
        "SELECT {TOPIC_COLUMNS} FROM topics WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Looks a topic up by its exact text, regardless of active flag.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_topic_by_text(pool: &PgPool, text: &str) -> Result<Option<TopicRow>, DbError> {
    let row = sqlx::query_as::<_, TopicRow>(&format!(
        "SELECT {TOPIC_COLUMNS} FROM topics WHERE text = $1"
    ))
    .bind(text)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Inserts a new active topic.
///
/// # Errors
///
/// Returns [`DbError::Conflict`] if a topic with the same text exists, or
/// [`DbError::Sqlx`] if the insert fails.
pub async fn insert_topic(
    pool: &PgPool,
    text: &str,
    priority: i32,
    daily_quota: i32,
    category: Option<&str>,
) -> Result<TopicRow, DbError> {
    sqlx::query_as::<_, TopicRow>(&format!(
        "INSERT INTO topics (text, priority, daily_quota, category) \
         VALUES ($1, $2, $3, $4) \
         RETURNING {TOPIC_COLUMNS}"
    ))
    .bind(text)
    .bind(priority)
    .bind(daily_quota)
    .bind(category)
    .fetch_one(pool)
    .await
    .map_err(map_unique_violation)
}

/// Sets the active flag on the topic with the given text.
///
/// Returns `false` when no such topic exists.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn set_topic_active(pool: &PgPool, text: &str, active: bool) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE topics SET is_active = $1, updated_at = NOW() WHERE text = $2",
    )
    .bind(active)
    .bind(text)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Stamps `last_run_at = NOW()` after a successful fetch for the topic.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn touch_topic_last_run(pool: &PgPool, id: i64) -> Result<(), DbError> {
    sqlx::query("UPDATE topics SET last_run_at = NOW(), updated_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
