//! Turns raw search results into stored items, authors and topic links.
//!
//! Ingestion is idempotent per `external_id`: a repeat sighting refreshes the
//! engagement counters and adds a missing topic link, nothing else. Only a
//! fresh insert emits `item_ingested`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use trawl_client::{AuthorRecord, ItemRecord};
use trawl_db::{DbError, Engagement, ItemRow, NewAuthor, NewItem};

use crate::error::PipelineError;
use crate::events::{EventBus, ItemIngested, PipelineEvent};
use crate::store::Store;

const TWITTER_DATE_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";
const DEFAULT_RELEVANCE: f64 = 1.0;

/// Per-batch counts. `saved` counts new items only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub saved: u32,
    pub updated: u32,
    pub failed: u32,
}

enum Ingested {
    Created,
    Updated,
}

pub struct IngestionEngine {
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
}

impl IngestionEngine {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    /// Ingests `raw_items` in order on behalf of `topic_id`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::StorageUnavailable`] as soon as storage cannot
    /// be reached. Every other per-item failure is logged and skipped.
    pub async fn ingest(
        &self,
        topic_id: i64,
        raw_items: &[Value],
    ) -> Result<IngestReport, PipelineError> {
        let mut report = IngestReport::default();

        for raw in raw_items {
            match self.ingest_one(topic_id, raw).await {
                Ok(Ingested::Created) => report.saved += 1,
                Ok(Ingested::Updated) => report.updated += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    report.failed += 1;
                    let external_id = raw.get("id").and_then(serde_json::Value::as_str);
                    tracing::warn!(
                        topic_id,
                        external_id = external_id.unwrap_or("?"),
                        error = %e,
                        "ingest: skipping item"
                    );
                }
            }
        }

        tracing::debug!(
            topic_id,
            saved = report.saved,
            updated = report.updated,
            failed = report.failed,
            "ingest: batch done"
        );
        Ok(report)
    }

    async fn ingest_one(&self, topic_id: i64, raw: &Value) -> Result<Ingested, PipelineError> {
        let record =
            ItemRecord::from_value(raw).map_err(|e| PipelineError::Malformed(e.to_string()))?;
        if record.id.trim().is_empty() {
            return Err(PipelineError::Malformed("empty item id".to_owned()));
        }

        if let Some(existing) = self.store.get_item_by_external_id(&record.id).await? {
            self.refresh(topic_id, &existing, &record).await?;
            return Ok(Ingested::Updated);
        }

        let author_id = match &record.author {
            Some(author) => Some(self.store.upsert_author(&map_author(author)).await?),
            None => None,
        };

        let new_item = map_item(&record, author_id, raw.clone());
        let item = match self.store.insert_item(&new_item).await {
            Ok(item) => item,
            Err(DbError::Conflict(_)) => {
                // Lost a race with another writer; treat as a repeat sighting.
                let existing = self
                    .store
                    .get_item_by_external_id(&record.id)
                    .await?
                    .ok_or(PipelineError::Store(DbError::NotFound))?;
                self.refresh(topic_id, &existing, &record).await?;
                return Ok(Ingested::Updated);
            }
            Err(e) => return Err(e.into()),
        };

        // The row exists from here on, so it must reach the filter even if
        // the link does not; a later sighting re-links it.
        if let Err(e) = self
            .store
            .link_item_to_topic(topic_id, item.id, DEFAULT_RELEVANCE)
            .await
        {
            let e = PipelineError::from(e);
            if e.is_fatal() {
                return Err(e);
            }
            tracing::warn!(item_id = item.id, topic_id, error = %e, "ingest: could not link new item");
        }

        tracing::debug!(item_id = item.id, external_id = %item.external_id, "ingest: new item");
        self.bus
            .emit(PipelineEvent::ItemIngested(ItemIngested {
                item_id: item.id,
                external_id: item.external_id,
                topic_id,
            }))
            .await;

        Ok(Ingested::Created)
    }

    async fn refresh(
        &self,
        topic_id: i64,
        existing: &ItemRow,
        record: &ItemRecord,
    ) -> Result<(), PipelineError> {
        self.store
            .update_item_engagement(existing.id, &engagement(record))
            .await?;
        let linked = self
            .store
            .link_item_to_topic(topic_id, existing.id, DEFAULT_RELEVANCE)
            .await?;
        tracing::trace!(item_id = existing.id, linked, "ingest: refreshed existing item");
        Ok(())
    }
}

fn engagement(record: &ItemRecord) -> Engagement {
    Engagement {
        retweets: record.retweet_count.unwrap_or(0),
        likes: record.like_count.unwrap_or(0),
        replies: record.reply_count.unwrap_or(0),
        quotes: record.quote_count.unwrap_or(0),
        views: record.view_count.unwrap_or(0),
    }
}

fn map_author(author: &AuthorRecord) -> NewAuthor {
    NewAuthor {
        external_id: author.id.clone(),
        user_name: author.user_name.clone(),
        display_name: author.name.clone(),
        followers_count: author.followers.unwrap_or(0),
        following_count: author.following.unwrap_or(0),
        is_verified: author.is_blue_verified,
        profile: Value::Object(author.profile.clone()),
    }
}

fn map_item(record: &ItemRecord, author_id: Option<i64>, raw: Value) -> NewItem {
    NewItem {
        external_id: record.id.clone(),
        author_id,
        body: record.text.clone(),
        created_at: parse_created_at(record.created_at.as_deref()).unwrap_or_else(Utc::now),
        engagement: engagement(record),
        is_repost: record.is_repost(),
        is_reply: record.is_reply(),
        is_quote: record.is_quote(),
        language: record.lang.clone(),
        possibly_sensitive: record.possibly_sensitive,
        raw,
    }
}

/// Parses the API's `createdAt`, e.g. `Tue Dec 10 07:00:30 +0000 2024`, or
/// an RFC 3339 timestamp.
fn parse_created_at(value: Option<&str>) -> Option<DateTime<Utc>> {
    let value = value?.trim();
    DateTime::parse_from_str(value, TWITTER_DATE_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
