//! Database operations for the `items` table.
//!
//! `processing_status` only ever advances away from `collected`: every status
//! write is guarded by `WHERE processing_status = 'collected'`, so repeating
//! one against a filtered item changes nothing.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use trawl_core::{FilterOutcome, ProcessingStatus};

use crate::{map_unique_violation, DbError};

/// A row from the `items` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ItemRow {
    pub id: i64,
    pub external_id: String,
    pub author_id: Option<i64>,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub collected_at: DateTime<Utc>,
    pub retweet_count: i64,
    pub like_count: i64,
    pub reply_count: i64,
    pub quote_count: i64,
    pub view_count: i64,
    pub is_repost: bool,
    pub is_reply: bool,
    pub is_quote: bool,
    pub language: Option<String>,
    pub possibly_sensitive: bool,
    pub processing_status: String,
    pub filter_outcome: String,
    pub raw: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl ItemRow {
    /// # Errors
    ///
    /// Returns [`DbError::InvalidValue`] if the stored string is not a known status.
    pub fn status(&self) -> Result<ProcessingStatus, DbError> {
        Ok(self.processing_status.parse()?)
    }

    /// # Errors
    ///
    /// Returns [`DbError::InvalidValue`] if the stored string is not a known outcome.
    pub fn outcome(&self) -> Result<FilterOutcome, DbError> {
        Ok(self.filter_outcome.parse()?)
    }
}

/// Engagement counters refreshed on every sighting of an item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Engagement {
    pub retweets: i64,
    pub likes: i64,
    pub replies: i64,
    pub quotes: i64,
    pub views: i64,
}

/// A newly seen item. Status and outcome start at `collected` / `pending`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub external_id: String,
    pub author_id: Option<i64>,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub engagement: Engagement,
    pub is_repost: bool,
    pub is_reply: bool,
    pub is_quote: bool,
    pub language: Option<String>,
    pub possibly_sensitive: bool,
    pub raw: serde_json::Value,
}

const ITEM_COLUMNS: &str = "id, external_id, author_id, body, created_at, collected_at, \
                            retweet_count, like_count, reply_count, quote_count, view_count, \
                            is_repost, is_reply, is_quote, language, possibly_sensitive, \
                            processing_status, filter_outcome, raw, updated_at";

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_item(pool: &PgPool, id: i64) -> Result<Option<ItemRow>, DbError> {
    let row = sqlx::query_as::<_, ItemRow>(&format!(
        "SELECT {ITEM_COLUMNS} FROM items WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_item_by_external_id(
    pool: &PgPool,
    external_id: &str,
) -> Result<Option<ItemRow>, DbError> {
    let row = sqlx::query_as::<_, ItemRow>(&format!(
        "SELECT {ITEM_COLUMNS} FROM items WHERE external_id = $1"
    ))
    .bind(external_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Inserts a new item in `collected` / `pending` state.
///
/// # Errors
///
/// Returns [`DbError::Conflict`] if an item with the same `external_id`
/// already exists, or [`DbError::Sqlx`] if the insert fails.
pub async fn insert_item(pool: &PgPool, item: &NewItem) -> Result<ItemRow, DbError> {
    sqlx::query_as::<_, ItemRow>(&format!(
        "INSERT INTO items \
             (external_id, author_id, body, created_at, \
              retweet_count, like_count, reply_count, quote_count, view_count, \
              is_repost, is_reply, is_quote, language, possibly_sensitive, raw) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15) \
         RETURNING {ITEM_COLUMNS}"
    ))
    .bind(&item.external_id)
    .bind(item.author_id)
    .bind(&item.body)
    .bind(item.created_at)
    .bind(item.engagement.retweets)
    .bind(item.engagement.likes)
    .bind(item.engagement.replies)
    .bind(item.engagement.quotes)
    .bind(item.engagement.views)
    .bind(item.is_repost)
    .bind(item.is_reply)
    .bind(item.is_quote)
    .bind(&item.language)
    .bind(item.possibly_sensitive)
    .bind(&item.raw)
    .fetch_one(pool)
    .await
    .map_err(map_unique_violation)
}

/// Overwrites the engagement counters of an existing item.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if the item does not exist, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn update_item_engagement(
    pool: &PgPool,
    id: i64,
    engagement: &Engagement,
) -> Result<(), DbError> {
    let result = sqlx::query(
        "UPDATE items SET \
             retweet_count = $1, like_count = $2, reply_count = $3, \
             quote_count = $4, view_count = $5, updated_at = NOW() \
         WHERE id = $6",
    )
    .bind(engagement.retweets)
    .bind(engagement.likes)
    .bind(engagement.replies)
    .bind(engagement.quotes)
    .bind(engagement.views)
    .bind(id)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Moves a `collected` item to a terminal status.
///
/// Returns `false` if the item was not in `collected` (or does not exist).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn set_item_status(
    pool: &PgPool,
    id: i64,
    status: ProcessingStatus,
    outcome: FilterOutcome,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "UPDATE items SET processing_status = $1, filter_outcome = $2, updated_at = NOW() \
         WHERE id = $3 AND processing_status = 'collected'",
    )
    .bind(status.as_str())
    .bind(outcome.as_str())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Applies many status transitions in one statement. Items no longer in
/// `collected` are skipped. Returns the ids of the rows that changed.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn set_item_statuses(
    pool: &PgPool,
    updates: &[(i64, ProcessingStatus, FilterOutcome)],
) -> Result<Vec<i64>, DbError> {
    if updates.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<i64> = updates.iter().map(|(id, _, _)| *id).collect();
    let statuses: Vec<String> = updates
        .iter()
        .map(|(_, status, _)| status.as_str().to_string())
        .collect();
    let outcomes: Vec<String> = updates
        .iter()
        .map(|(_, _, outcome)| outcome.as_str().to_string())
        .collect();

    let changed = sqlx::query_scalar::<_, i64>(
        "UPDATE items AS i SET \
             processing_status = u.status, \
             filter_outcome = u.outcome, \
             updated_at = NOW() \
         FROM UNNEST($1::bigint[], $2::text[], $3::text[]) AS u(id, status, outcome) \
         WHERE i.id = u.id AND i.processing_status = 'collected' \
         RETURNING i.id",
    )
    .bind(&ids)
    .bind(&statuses)
    .bind(&outcomes)
    .fetch_all(pool)
    .await?;

    Ok(changed)
}

/// Returns up to `limit` items in the given status, oldest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_items_by_status(
    pool: &PgPool,
    status: ProcessingStatus,
    limit: i64,
) -> Result<Vec<ItemRow>, DbError> {
    let rows = sqlx::query_as::<_, ItemRow>(&format!(
        "SELECT {ITEM_COLUMNS} FROM items \
         WHERE processing_status = $1 \
         ORDER BY id ASC \
         LIMIT $2"
    ))
    .bind(status.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
