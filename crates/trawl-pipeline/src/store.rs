//! The narrow storage contract the pipeline runs against.
//!
//! [`PgStore`] delegates to `trawl_db`; [`MemoryStore`] keeps everything in
//! process for tests and can simulate an unreachable database.

use async_trait::async_trait;
use sqlx::PgPool;
use trawl_core::{FilterOutcome, ProcessingStatus, TriggerSource};
use trawl_db::{DbError, Engagement, ItemRow, NewAuthor, NewItem, TopicRow};

mod memory;

pub use memory::MemoryStore;

#[async_trait]
pub trait Store: Send + Sync {
    /// Active topics, priority descending then least recently run.
    async fn list_active_topics(&self) -> Result<Vec<TopicRow>, DbError>;
    async fn get_topic_by_text(&self, text: &str) -> Result<Option<TopicRow>, DbError>;
    async fn touch_topic_last_run(&self, topic_id: i64) -> Result<(), DbError>;

    async fn get_item(&self, id: i64) -> Result<Option<ItemRow>, DbError>;
    async fn get_item_by_external_id(&self, external_id: &str)
        -> Result<Option<ItemRow>, DbError>;
    /// Fails with [`DbError::Conflict`] when `external_id` already exists.
    async fn insert_item(&self, item: &NewItem) -> Result<ItemRow, DbError>;
    async fn update_item_engagement(&self, id: i64, engagement: &Engagement)
        -> Result<(), DbError>;
    /// Returns `false` unless the item was still `collected`.
    async fn set_item_status(
        &self,
        id: i64,
        status: ProcessingStatus,
        outcome: FilterOutcome,
    ) -> Result<bool, DbError>;
    /// Returns the ids that actually moved out of `collected`.
    async fn set_item_statuses(
        &self,
        updates: &[(i64, ProcessingStatus, FilterOutcome)],
    ) -> Result<Vec<i64>, DbError>;
    async fn list_items_by_status(
        &self,
        status: ProcessingStatus,
        limit: i64,
    ) -> Result<Vec<ItemRow>, DbError>;

    async fn upsert_author(&self, author: &NewAuthor) -> Result<i64, DbError>;
    /// Returns `true` when a new link was created.
    async fn link_item_to_topic(
        &self,
        topic_id: i64,
        item_id: i64,
        relevance_score: f64,
    ) -> Result<bool, DbError>;

    /// Opens a run ledger entry in `running` state and returns its id.
    async fn begin_cycle(&self, trigger: TriggerSource) -> Result<i64, DbError>;
    async fn record_topic_result(
        &self,
        run_id: i64,
        topic_id: i64,
        saved: u32,
        error: Option<&str>,
    ) -> Result<(), DbError>;
    /// Closes the run as succeeded, or failed when `error` is set.
    async fn finish_cycle(
        &self,
        run_id: i64,
        total_saved: u32,
        error: Option<&str>,
    ) -> Result<(), DbError>;
}

/// Postgres-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn to_i32(n: u32) -> i32 {
    i32::try_from(n).unwrap_or(i32::MAX)
}

#[async_trait]
impl Store for PgStore {
    async fn list_active_topics(&self) -> Result<Vec<TopicRow>, DbError> {
        trawl_db::list_active_topics(&self.pool).await
    }

    async fn get_topic_by_text(&self, text: &str) -> Result<Option<TopicRow>, DbError> {
        trawl_db::get_topic_by_text(&self.pool, text).await
    }

    async fn touch_topic_last_run(&self, topic_id: i64) -> Result<(), DbError> {
        trawl_db::touch_topic_last_run(&self.pool, topic_id).await
    }

    async fn get_item(&self, id: i64) -> Result<Option<ItemRow>, DbError> {
        trawl_db::get_item(&self.pool, id).await
    }

    async fn get_item_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<ItemRow>, DbError> {
        trawl_db::get_item_by_external_id(&self.pool, external_id).await
    }

    async fn insert_item(&self, item: &NewItem) -> Result<ItemRow, DbError> {
        trawl_db::insert_item(&self.pool, item).await
    }

    async fn update_item_engagement(
        &self,
        id: i64,
        engagement: &Engagement,
    ) -> Result<(), DbError> {
        trawl_db::update_item_engagement(&self.pool, id, engagement).await
    }

    async fn set_item_status(
        &self,
        id: i64,
        status: ProcessingStatus,
        outcome: FilterOutcome,
    ) -> Result<bool, DbError> {
        trawl_db::set_item_status(&self.pool, id, status, outcome).await
    }

    async fn set_item_statuses(
        &self,
        updates: &[(i64, ProcessingStatus, FilterOutcome)],
    ) -> Result<Vec<i64>, DbError> {
        trawl_db::set_item_statuses(&self.pool, updates).await
    }

    async fn list_items_by_status(
        &self,
        status: ProcessingStatus,
        limit: i64,
    ) -> Result<Vec<ItemRow>, DbError> {
        trawl_db::list_items_by_status(&self.pool, status, limit).await
    }

    async fn upsert_author(&self, author: &NewAuthor) -> Result<i64, DbError> {
        trawl_db::upsert_author(&self.pool, author).await
    }

    async fn link_item_to_topic(
        &self,
        topic_id: i64,
        item_id: i64,
        relevance_score: f64,
    ) -> Result<bool, DbError> {
        trawl_db::link_item_to_topic(&self.pool, topic_id, item_id, relevance_score).await
    }

    async fn begin_cycle(&self, trigger: TriggerSource) -> Result<i64, DbError> {
        let run = trawl_db::create_collection_run(&self.pool, trigger).await?;
        trawl_db::start_collection_run(&self.pool, run.id).await?;
        Ok(run.id)
    }

    async fn record_topic_result(
        &self,
        run_id: i64,
        topic_id: i64,
        saved: u32,
        error: Option<&str>,
    ) -> Result<(), DbError> {
        let status = if error.is_some() { "failed" } else { "succeeded" };
        trawl_db::upsert_collection_run_topic(
            &self.pool,
            run_id,
            topic_id,
            status,
            to_i32(saved),
            error,
        )
        .await
    }

    async fn finish_cycle(
        &self,
        run_id: i64,
        total_saved: u32,
        error: Option<&str>,
    ) -> Result<(), DbError> {
        match error {
            Some(message) => trawl_db::fail_collection_run(&self.pool, run_id, message).await,
            None => {
                trawl_db::complete_collection_run(&self.pool, run_id, to_i32(total_saved)).await
            }
        }
    }
}
