//! In-memory [`Store`] for tests. No database required.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use trawl_core::{FilterOutcome, ProcessingStatus, TriggerSource};
use trawl_db::{
    AuthorRow, CollectionRunRow, CollectionRunTopicRow, DbError, Engagement, ItemRow, NewAuthor,
    NewItem, TopicRow,
};
use uuid::Uuid;

use super::Store;

#[derive(Default)]
struct State {
    topics: Vec<TopicRow>,
    authors: Vec<AuthorRow>,
    items: Vec<ItemRow>,
    links: BTreeSet<(i64, i64)>,
    runs: Vec<CollectionRunRow>,
    run_topics: Vec<CollectionRunTopicRow>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Thread-safe in-memory store with fault injection.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    unavailable: AtomicBool,
    failing_inserts: Mutex<HashSet<String>>,
    failing_links: AtomicUsize,
    hidden_lookups: Mutex<HashSet<String>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_available(&self) -> Result<(), DbError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DbError::Sqlx(sqlx::Error::PoolClosed));
        }
        Ok(())
    }

    /// Makes every subsequent call fail as if the database were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes inserts of the item with this external id fail with a query error.
    pub fn fail_inserts_for(&self, external_id: &str) {
        self.failing_inserts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(external_id.to_owned());
    }

    /// Makes the next `count` topic links fail with a query error.
    pub fn fail_next_links(&self, count: usize) {
        self.failing_links.store(count, Ordering::SeqCst);
    }

    /// Makes the next lookup by this external id miss, as if a concurrent
    /// writer inserted the item just after it.
    pub fn hide_next_lookup_of(&self, external_id: &str) {
        self.hidden_lookups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(external_id.to_owned());
    }

    pub fn add_topic(&self, text: &str, priority: i32, daily_quota: i32) -> TopicRow {
        let mut state = self.state();
        let now = Utc::now();
        let row = TopicRow {
            id: state.next_id(),
            text: text.to_owned(),
            category: None,
            is_active: true,
            priority,
            daily_quota,
            last_run_at: None,
            created_at: now,
            updated_at: now,
        };
        state.topics.push(row.clone());
        row
    }

    pub fn set_topic_active(&self, text: &str, active: bool) {
        if let Some(topic) = self.state().topics.iter_mut().find(|t| t.text == text) {
            topic.is_active = active;
        }
    }

    /// Writes `processing_status` directly, bypassing the `collected` guard.
    pub fn overwrite_status(&self, external_id: &str, status: &str) {
        if let Some(item) = self
            .state()
            .items
            .iter_mut()
            .find(|i| i.external_id == external_id)
        {
            item.processing_status = status.to_owned();
        }
    }

    #[must_use]
    pub fn topics(&self) -> Vec<TopicRow> {
        self.state().topics.clone()
    }

    #[must_use]
    pub fn items(&self) -> Vec<ItemRow> {
        self.state().items.clone()
    }

    #[must_use]
    pub fn item_by_external_id(&self, external_id: &str) -> Option<ItemRow> {
        self.state()
            .items
            .iter()
            .find(|i| i.external_id == external_id)
            .cloned()
    }

    #[must_use]
    pub fn authors(&self) -> Vec<AuthorRow> {
        self.state().authors.clone()
    }

    /// `(topic_id, item_id)` pairs.
    #[must_use]
    pub fn links(&self) -> Vec<(i64, i64)> {
        self.state().links.iter().copied().collect()
    }

    #[must_use]
    pub fn runs(&self) -> Vec<CollectionRunRow> {
        self.state().runs.clone()
    }

    #[must_use]
    pub fn run_topics(&self) -> Vec<CollectionRunTopicRow> {
        self.state().run_topics.clone()
    }
}

fn apply_status(item: &mut ItemRow, status: ProcessingStatus, outcome: FilterOutcome) -> bool {
    if item.processing_status != ProcessingStatus::Collected.as_str() {
        return false;
    }
    item.processing_status = status.as_str().to_owned();
    item.filter_outcome = outcome.as_str().to_owned();
    item.updated_at = Utc::now();
    true
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_active_topics(&self) -> Result<Vec<TopicRow>, DbError> {
        self.check_available()?;
        let mut topics: Vec<TopicRow> = self
            .state()
            .topics
            .iter()
            .filter(|t| t.is_active)
            .cloned()
            .collect();
        // None sorts before Some, matching NULLS FIRST.
        topics.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.last_run_at.cmp(&b.last_run_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(topics)
    }

    async fn get_topic_by_text(&self, text: &str) -> Result<Option<TopicRow>, DbError> {
        self.check_available()?;
        Ok(self.state().topics.iter().find(|t| t.text == text).cloned())
    }

    async fn touch_topic_last_run(&self, topic_id: i64) -> Result<(), DbError> {
        self.check_available()?;
        if let Some(topic) = self.state().topics.iter_mut().find(|t| t.id == topic_id) {
            topic.last_run_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn get_item(&self, id: i64) -> Result<Option<ItemRow>, DbError> {
        self.check_available()?;
        Ok(self.state().items.iter().find(|i| i.id == id).cloned())
    }

    async fn get_item_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<ItemRow>, DbError> {
        self.check_available()?;
        if self
            .hidden_lookups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(external_id)
        {
            return Ok(None);
        }
        Ok(self.item_by_external_id(external_id))
    }

    async fn insert_item(&self, item: &NewItem) -> Result<ItemRow, DbError> {
        self.check_available()?;
        if self
            .failing_inserts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&item.external_id)
        {
            return Err(DbError::Sqlx(sqlx::Error::Protocol(format!(
                "injected insert failure for {}",
                item.external_id
            ))));
        }

        let mut state = self.state();
        if state.items.iter().any(|i| i.external_id == item.external_id) {
            return Err(DbError::Conflict("items_external_id_key".to_owned()));
        }
        let now = Utc::now();
        let row = ItemRow {
            id: state.next_id(),
            external_id: item.external_id.clone(),
            author_id: item.author_id,
            body: item.body.clone(),
            created_at: item.created_at,
            collected_at: now,
            retweet_count: item.engagement.retweets,
            like_count: item.engagement.likes,
            reply_count: item.engagement.replies,
            quote_count: item.engagement.quotes,
            view_count: item.engagement.views,
            is_repost: item.is_repost,
            is_reply: item.is_reply,
            is_quote: item.is_quote,
            language: item.language.clone(),
            possibly_sensitive: item.possibly_sensitive,
            processing_status: ProcessingStatus::Collected.as_str().to_owned(),
            filter_outcome: FilterOutcome::Pending.as_str().to_owned(),
            raw: item.raw.clone(),
            updated_at: now,
        };
        state.items.push(row.clone());
        Ok(row)
    }

    async fn update_item_engagement(
        &self,
        id: i64,
        engagement: &Engagement,
    ) -> Result<(), DbError> {
        self.check_available()?;
        let mut state = self.state();
        let item = state
            .items
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(DbError::NotFound)?;
        item.retweet_count = engagement.retweets;
        item.like_count = engagement.likes;
        item.reply_count = engagement.replies;
        item.quote_count = engagement.quotes;
        item.view_count = engagement.views;
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn set_item_status(
        &self,
        id: i64,
        status: ProcessingStatus,
        outcome: FilterOutcome,
    ) -> Result<bool, DbError> {
        self.check_available()?;
        Ok(self
            .state()
            .items
            .iter_mut()
            .find(|i| i.id == id)
            .is_some_and(|item| apply_status(item, status, outcome)))
    }

    async fn set_item_statuses(
        &self,
        updates: &[(i64, ProcessingStatus, FilterOutcome)],
    ) -> Result<Vec<i64>, DbError> {
        self.check_available()?;
        let mut state = self.state();
        let mut changed = Vec::new();
        for (id, status, outcome) in updates {
            if let Some(item) = state.items.iter_mut().find(|i| i.id == *id) {
                if apply_status(item, *status, *outcome) {
                    changed.push(*id);
                }
            }
        }
        Ok(changed)
    }

    async fn list_items_by_status(
        &self,
        status: ProcessingStatus,
        limit: i64,
    ) -> Result<Vec<ItemRow>, DbError> {
        self.check_available()?;
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .state()
            .items
            .iter()
            .filter(|i| i.processing_status == status.as_str())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn upsert_author(&self, author: &NewAuthor) -> Result<i64, DbError> {
        self.check_available()?;
        let mut state = self.state();
        let now = Utc::now();
        if let Some(existing) = state
            .authors
            .iter_mut()
            .find(|a| a.external_id == author.external_id)
        {
            existing.followers_count = author.followers_count;
            existing.following_count = author.following_count;
            existing.is_verified = author.is_verified;
            existing.updated_at = now;
            return Ok(existing.id);
        }
        let id = state.next_id();
        state.authors.push(AuthorRow {
            id,
            external_id: author.external_id.clone(),
            user_name: author.user_name.clone(),
            display_name: author.display_name.clone(),
            followers_count: author.followers_count,
            following_count: author.following_count,
            is_verified: author.is_verified,
            profile: author.profile.clone(),
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn link_item_to_topic(
        &self,
        topic_id: i64,
        item_id: i64,
        _relevance_score: f64,
    ) -> Result<bool, DbError> {
        self.check_available()?;
        if self
            .failing_links
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(DbError::Sqlx(sqlx::Error::Protocol(format!(
                "injected link failure for item {item_id}"
            ))));
        }
        Ok(self.state().links.insert((topic_id, item_id)))
    }

    async fn begin_cycle(&self, trigger: TriggerSource) -> Result<i64, DbError> {
        self.check_available()?;
        let mut state = self.state();
        let now = Utc::now();
        let id = state.next_id();
        state.runs.push(CollectionRunRow {
            id,
            public_id: Uuid::new_v4(),
            trigger_source: trigger.as_str().to_owned(),
            status: "running".to_owned(),
            started_at: Some(now),
            completed_at: None,
            records_processed: 0,
            error_message: None,
            created_at: now,
        });
        Ok(id)
    }

    async fn record_topic_result(
        &self,
        run_id: i64,
        topic_id: i64,
        saved: u32,
        error: Option<&str>,
    ) -> Result<(), DbError> {
        self.check_available()?;
        let mut state = self.state();
        let id = state.next_id();
        state
            .run_topics
            .retain(|r| !(r.collection_run_id == run_id && r.topic_id == topic_id));
        state.run_topics.push(CollectionRunTopicRow {
            id,
            collection_run_id: run_id,
            topic_id,
            status: if error.is_some() { "failed" } else { "succeeded" }.to_owned(),
            records_processed: i32::try_from(saved).unwrap_or(i32::MAX),
            error_message: error.map(ToOwned::to_owned),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn finish_cycle(
        &self,
        run_id: i64,
        total_saved: u32,
        error: Option<&str>,
    ) -> Result<(), DbError> {
        self.check_available()?;
        let mut state = self.state();
        let run = state
            .runs
            .iter_mut()
            .find(|r| r.id == run_id && r.status == "running")
            .ok_or(DbError::InvalidCollectionRunTransition {
                id: run_id,
                expected_status: "running",
            })?;
        run.completed_at = Some(Utc::now());
        match error {
            Some(message) => {
                run.status = "failed".to_owned();
                run.error_message = Some(message.to_owned());
            }
            None => {
                run.status = "succeeded".to_owned();
                run.records_processed = i32::try_from(total_saved).unwrap_or(i32::MAX);
            }
        }
        Ok(())
    }
}
