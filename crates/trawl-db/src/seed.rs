use sqlx::PgPool;
use trawl_core::TopicConfig;

use crate::DbError;

/// Upsert topics from the seed file, keyed by text.
///
/// Existing topics get their priority, quota, category and active flag
/// replaced; `last_run_at` is left alone. All upserts share one transaction.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any database operation fails.
pub async fn seed_topics(pool: &PgPool, topics: &[TopicConfig]) -> Result<usize, DbError> {
    let mut tx = pool.begin().await?;
    let mut count = 0usize;

    for topic in topics {
        sqlx::query(
            "INSERT INTO topics (text, category, is_active, priority, daily_quota) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (text) DO UPDATE SET \
                 category    = EXCLUDED.category, \
                 is_active   = EXCLUDED.is_active, \
                 priority    = EXCLUDED.priority, \
                 daily_quota = EXCLUDED.daily_quota, \
                 updated_at  = NOW()",
        )
        .bind(topic.text.trim())
        .bind(&topic.category)
        .bind(topic.active)
        .bind(topic.priority)
        .bind(topic.daily_quota)
        .execute(&mut *tx)
        .await?;

        count += 1;
    }

    tx.commit().await?;
    Ok(count)
}
