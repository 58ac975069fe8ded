//! Database operations for the `authors` table.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

/// A row from the `authors` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuthorRow {
    pub id: i64,
    pub external_id: String,
    pub user_name: Option<String>,
    pub display_name: Option<String>,
    pub followers_count: i64,
    pub following_count: i64,
    pub is_verified: bool,
    pub profile: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Author fields as mapped from an API record.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuthor {
    pub external_id: String,
    pub user_name: Option<String>,
    pub display_name: Option<String>,
    pub followers_count: i64,
    pub following_count: i64,
    pub is_verified: bool,
    pub profile: serde_json::Value,
}

/// Inserts the author on first sighting; later sightings refresh only the
/// mutable counters and verified flag. Returns the author's `id`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn upsert_author(pool: &PgPool, author: &NewAuthor) -> Result<i64, DbError> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO authors \
             (external_id, user_name, display_name, followers_count, following_count, \
              is_verified, profile) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         ON CONFLICT (external_id) DO UPDATE SET \
             followers_count = EXCLUDED.followers_count, \
             following_count = EXCLUDED.following_count, \
             is_verified     = EXCLUDED.is_verified, \
             updated_at      = NOW() \
         RETURNING id",
    )
    .bind(&author.external_id)
    .bind(&author.user_name)
    .bind(&author.display_name)
    .bind(author.followers_count)
    .bind(author.following_count)
    .bind(author.is_verified)
    .bind(&author.profile)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_author_by_external_id(
    pool: &PgPool,
    external_id: &str,
) -> Result<Option<AuthorRow>, DbError> {
    let row = sqlx::query_as::<_, AuthorRow>(
        "SELECT id, external_id, user_name, display_name, followers_count, following_count, \
                is_verified, profile, created_at, updated_at \
         FROM authors WHERE external_id = $1",
    )
    .bind(external_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
