//! Database operations for `collection_runs` and `collection_run_topics`.
//!
//! Run lifecycle: `queued` → `running` → `succeeded` | `failed`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use trawl_core::TriggerSource;
use uuid::Uuid;

use crate::DbError;

/// A row from the `collection_runs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CollectionRunRow {
    pub id: i64,
    pub public_id: Uuid,
    pub trigger_source: String,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub records_processed: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A row from the `collection_run_topics` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CollectionRunTopicRow {
    pub id: i64,
    pub collection_run_id: i64,
    pub topic_id: i64,
    pub status: String,
    pub records_processed: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

const RUN_COLUMNS: &str = "id, public_id, trigger_source, status, started_at, completed_at, \
                           records_processed, error_message, created_at";

/// Creates a new collection run in `queued` status.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn create_collection_run(
    pool: &PgPool,
    trigger_source: TriggerSource,
) -> Result<CollectionRunRow, DbError> {
    let row = sqlx::query_as::<_, CollectionRunRow>(&format!(
        "INSERT INTO collection_runs (public_id, trigger_source, status) \
         VALUES ($1, $2, 'queued') \
         RETURNING {RUN_COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(trigger_source.as_str())
    .fetch_one(pool)
    .await?;

    Ok(row)
}

async fn transition(
    pool: &PgPool,
    id: i64,
    sql: &str,
    expected_status: &'static str,
    bind_value: Option<BindValue<'_>>,
) -> Result<(), DbError> {
    let mut query = sqlx::query(sql);
    match bind_value {
        Some(BindValue::Count(n)) => query = query.bind(n),
        Some(BindValue::Message(m)) => query = query.bind(m),
        None => {}
    }
    let result = query.bind(id).execute(pool).await?;

    if result.rows_affected() == 0 {
        return Err(DbError::InvalidCollectionRunTransition {
            id,
            expected_status,
        });
    }
    Ok(())
}

enum BindValue<'a> {
    Count(i32),
    Message(&'a str),
}

/// Marks a `queued` run as `running` and sets `started_at = NOW()`.
///
/// # Errors
///
/// Returns [`DbError::InvalidCollectionRunTransition`] if the run is not
/// queued, or [`DbError::Sqlx`] if the update fails.
pub async fn start_collection_run(pool: &PgPool, id: i64) -> Result<(), DbError> {
    transition(
        pool,
        id,
        "UPDATE collection_runs SET status = 'running', started_at = NOW() \
         WHERE id = $1 AND status = 'queued'",
        "queued",
        None,
    )
    .await
}

/// Marks a `running` run as `succeeded` with its total saved count.
///
/// # Errors
///
/// Returns [`DbError::InvalidCollectionRunTransition`] if the run is not
/// running, or [`DbError::Sqlx`] if the update fails.
pub async fn complete_collection_run(
    pool: &PgPool,
    id: i64,
    records_processed: i32,
) -> Result<(), DbError> {
    transition(
        pool,
        id,
        "UPDATE collection_runs \
         SET status = 'succeeded', completed_at = NOW(), records_processed = $1 \
         WHERE id = $2 AND status = 'running'",
        "running",
        Some(BindValue::Count(records_processed)),
    )
    .await
}

/// Marks a `running` run as `failed` with an error message.
///
/// # Errors
///
/// Returns [`DbError::InvalidCollectionRunTransition`] if the run is not
/// running, or [`DbError::Sqlx`] if the update fails.
pub async fn fail_collection_run(
    pool: &PgPool,
    id: i64,
    error_message: &str,
) -> Result<(), DbError> {
    transition(
        pool,
        id,
        "UPDATE collection_runs \
         SET status = 'failed', completed_at = NOW(), error_message = $1 \
         WHERE id = $2 AND status = 'running'",
        "running",
        Some(BindValue::Message(error_message)),
    )
    .await
}

/// # Errors
///
/// Returns [`DbError::NotFound`] if no run has the given `id`, or
/// [`DbError::Sqlx`] if the query fails.
pub async fn get_collection_run(pool: &PgPool, id: i64) -> Result<CollectionRunRow, DbError> {
    sqlx::query_as::<_, CollectionRunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM collection_runs WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Returns the most recent `limit` runs, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_collection_runs(
    pool: &PgPool,
    limit: i64,
) -> Result<Vec<CollectionRunRow>, DbError> {
    let rows = sqlx::query_as::<_, CollectionRunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM collection_runs \
         ORDER BY created_at DESC, id DESC \
         LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Inserts or replaces the per-topic result row for a run.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn upsert_collection_run_topic(
    pool: &PgPool,
    run_id: i64,
    topic_id: i64,
    status: &str,
    records_processed: i32,
    error_message: Option<&str>,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO collection_run_topics \
             (collection_run_id, topic_id, status, records_processed, error_message) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (collection_run_id, topic_id) DO UPDATE SET \
             status            = EXCLUDED.status, \
             records_processed = EXCLUDED.records_processed, \
             error_message     = EXCLUDED.error_message",
    )
    .bind(run_id)
    .bind(topic_id)
    .bind(status)
    .bind(records_processed)
    .bind(error_message)
    .execute(pool)
    .await?;

    Ok(())
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_collection_run_topics(
    pool: &PgPool,
    run_id: i64,
) -> Result<Vec<CollectionRunTopicRow>, DbError> {
    let rows = sqlx::query_as::<_, CollectionRunTopicRow>(
        "SELECT id, collection_run_id, topic_id, status, records_processed, \
                error_message, created_at \
         FROM collection_run_topics \
         WHERE collection_run_id = $1 \
         ORDER BY id",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
