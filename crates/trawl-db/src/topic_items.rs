//! Database operations for the `topic_items` link table.

use sqlx::PgPool;

use crate::DbError;

/// Links an item to a topic. Re-linking an existing pair is a no-op.
///
/// Returns `true` when a new link row was created.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn link_item_to_topic(
    pool: &PgPool,
    topic_id: i64,
    item_id: i64,
    relevance_score: f64,
) -> Result<bool, DbError> {
    let result = sqlx::query(
        "INSERT INTO topic_items (topic_id, item_id, relevance_score) \
         VALUES ($1, $2, $3) \
         ON CONFLICT (topic_id, item_id) DO NOTHING",
    )
    .bind(topic_id)
    .bind(item_id)
    .bind(relevance_score)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Returns the ids of every topic the item is linked to, ascending.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_topic_ids_for_item(pool: &PgPool, item_id: i64) -> Result<Vec<i64>, DbError> {
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT topic_id FROM topic_items WHERE item_id = $1 ORDER BY topic_id",
    )
    .bind(item_id)
    .fetch_all(pool)
    .await?;

    Ok(ids)
}
