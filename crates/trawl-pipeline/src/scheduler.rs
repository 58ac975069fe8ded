//! Collection cycles: single-flight, priority-ordered, quota-bounded.
//!
//! A cycle is entered either by the periodic timer or by an external trigger.
//! The Idle → Running transition is a compare-exchange on one flag, so a
//! trigger that arrives mid-cycle is rejected rather than queued.

use std::pin::pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{watch, Notify};
use trawl_client::SearchQuery;
use trawl_core::{AppConfig, TriggerSource};
use trawl_db::TopicRow;

use crate::error::PipelineError;
use crate::events::{CycleSummary, EventBus, PipelineEvent, TopicResult};
use crate::ingest::IngestionEngine;
use crate::source::SearchSource;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pause between consecutive topics of one cycle.
    pub inter_topic_delay: Duration,
    /// Appended to every query as a `lang:` qualifier.
    pub search_language: Option<String>,
}

impl SchedulerConfig {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            inter_topic_delay: config.inter_topic_delay(),
            search_language: config.search_language.clone(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            inter_topic_delay: Duration::from_secs(1),
            search_language: None,
        }
    }
}

/// Parameters of one triggered cycle. The default collects every active topic
/// at its daily quota.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CollectionRequest {
    /// Collect only this topic (by text), even if inactive.
    #[serde(default)]
    pub topic: Option<String>,
    /// Upper bound on items per topic; never raises a topic's quota.
    #[serde(default)]
    pub max_items: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Accepted,
    /// A cycle is already running.
    Busy,
    /// The stop signal has been raised; no new cycles start.
    Stopping,
}

/// Clears the running flag when the cycle ends, however it ends.
struct CycleGuard {
    running: Arc<AtomicBool>,
    idle: Arc<Notify>,
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.idle.notify_waiters();
    }
}

pub struct CollectionScheduler {
    store: Arc<dyn Store>,
    source: Arc<dyn SearchSource>,
    ingest: IngestionEngine,
    bus: Arc<EventBus>,
    config: SchedulerConfig,
    running: Arc<AtomicBool>,
    idle: Arc<Notify>,
    stop_tx: watch::Sender<bool>,
}

impl CollectionScheduler {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        source: Arc<dyn SearchSource>,
        bus: Arc<EventBus>,
        config: SchedulerConfig,
    ) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            ingest: IngestionEngine::new(Arc::clone(&store), Arc::clone(&bus)),
            store,
            source,
            bus,
            config,
            running: Arc::new(AtomicBool::new(false)),
            idle: Arc::new(Notify::new()),
            stop_tx,
        }
    }

    /// Shares an existing stop channel, e.g. one the API client already
    /// listens on.
    #[must_use]
    pub fn with_stop_sender(mut self, stop_tx: watch::Sender<bool>) -> Self {
        self.stop_tx = stop_tx;
        self
    }

    /// A receiver that flips to `true` once [`stop`](Self::stop) is called.
    #[must_use]
    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    /// Raises the stop signal. An in-flight cycle finishes its current topic;
    /// no new cycle starts.
    pub fn stop(&self) {
        if !self.stop_tx.send_replace(true) {
            tracing::info!("scheduler: stop requested");
        }
    }

    #[must_use]
    pub fn is_stopping(&self) -> bool {
        *self.stop_tx.borrow()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Resolves once no cycle is running.
    pub async fn wait_until_idle(&self) {
        loop {
            let mut notified = pin!(self.idle.notified());
            notified.as_mut().enable();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }

    fn try_begin(&self) -> Option<CycleGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleGuard {
                running: Arc::clone(&self.running),
                idle: Arc::clone(&self.idle),
            })
    }

    /// Starts a cycle in the background and returns without waiting for it.
    pub fn request_collection(
        self: &Arc<Self>,
        request: CollectionRequest,
        trigger: TriggerSource,
    ) -> TriggerOutcome {
        if self.is_stopping() {
            tracing::warn!(trigger = %trigger, "scheduler: stopping, trigger rejected");
            return TriggerOutcome::Stopping;
        }
        let Some(guard) = self.try_begin() else {
            tracing::warn!(trigger = %trigger, "scheduler: cycle already running, trigger rejected");
            return TriggerOutcome::Busy;
        };

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = scheduler.execute(request, trigger).await {
                tracing::error!(trigger = %trigger, error = %e, "scheduler: cycle aborted");
            }
        });
        TriggerOutcome::Accepted
    }

    /// Runs one cycle to completion on the current task.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Busy`] if a cycle is already running,
    /// [`PipelineError::Stopped`] after [`stop`](Self::stop), or the fatal
    /// error that aborted the cycle.
    pub async fn run_once(
        &self,
        request: CollectionRequest,
        trigger: TriggerSource,
    ) -> Result<CycleSummary, PipelineError> {
        if self.is_stopping() {
            return Err(PipelineError::Stopped);
        }
        let Some(_guard) = self.try_begin() else {
            tracing::warn!(trigger = %trigger, "scheduler: cycle already running, trigger rejected");
            return Err(PipelineError::Busy);
        };
        self.execute(request, trigger).await
    }

    async fn execute(
        &self,
        request: CollectionRequest,
        trigger: TriggerSource,
    ) -> Result<CycleSummary, PipelineError> {
        let run_id = match self.store.begin_cycle(trigger).await {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, "scheduler: could not open run ledger entry");
                None
            }
        };
        tracing::info!(trigger = %trigger, run_id, "scheduler: cycle started");

        let topics = match self.select_topics(request.topic.as_deref()).await {
            Ok(topics) => topics,
            Err(e) => {
                self.finish_ledger(run_id, 0, Some(&e.to_string())).await;
                return Err(e);
            }
        };

        let mut results = Vec::with_capacity(topics.len());
        let mut interrupted = false;

        for (index, topic) in topics.iter().enumerate() {
            if self.is_stopping() {
                interrupted = true;
                break;
            }
            if index > 0 && !self.pause(self.config.inter_topic_delay).await {
                interrupted = true;
                break;
            }

            match self.collect_topic(topic, request.max_items).await {
                Ok(saved) => {
                    tracing::info!(topic = %topic.text, saved, "scheduler: topic collected");
                    self.record_topic(run_id, topic.id, saved, None).await;
                    results.push(TopicResult {
                        topic: topic.text.clone(),
                        saved,
                        failed: false,
                    });
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(topic = %topic.text, error = %e, "scheduler: storage unavailable, aborting cycle");
                    self.finish_ledger(run_id, 0, Some(&e.to_string())).await;
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!(topic = %topic.text, error = %e, "scheduler: topic failed");
                    self.record_topic(run_id, topic.id, 0, Some(&e.to_string()))
                        .await;
                    results.push(TopicResult {
                        topic: topic.text.clone(),
                        saved: 0,
                        failed: true,
                    });
                }
            }
        }

        let summary = CycleSummary {
            run_id,
            trigger,
            results,
            interrupted,
        };
        self.finish_ledger(run_id, summary.total_saved(), None).await;
        tracing::info!(
            trigger = %trigger,
            topics = summary.results.len(),
            saved = summary.total_saved(),
            interrupted,
            "scheduler: cycle completed"
        );
        self.bus
            .emit(PipelineEvent::CycleCompleted(summary.clone()))
            .await;
        Ok(summary)
    }

    async fn select_topics(&self, target: Option<&str>) -> Result<Vec<TopicRow>, PipelineError> {
        let Some(text) = target else {
            return Ok(self.store.list_active_topics().await?);
        };
        match self.store.get_topic_by_text(text).await? {
            Some(topic) => Ok(vec![topic]),
            None => {
                tracing::warn!(topic = %text, "scheduler: unknown topic requested");
                Ok(Vec::new())
            }
        }
    }

    async fn collect_topic(
        &self,
        topic: &TopicRow,
        max_items: Option<u32>,
    ) -> Result<u32, PipelineError> {
        let quota = effective_quota(topic.daily_quota, max_items);
        let query = SearchQuery::new(topic.text.clone()).language(self.config.search_language.clone());

        let batch = self.source.fetch(&query, quota).await?;
        tracing::debug!(topic = %topic.text, quota, fetched = batch.len(), "scheduler: batch fetched");

        let report = self.ingest.ingest(topic.id, &batch.items).await?;

        if let Err(e) = self.store.touch_topic_last_run(topic.id).await {
            let e = PipelineError::from(e);
            if e.is_fatal() {
                return Err(e);
            }
            tracing::warn!(topic = %topic.text, error = %e, "scheduler: could not update last run");
        }
        Ok(report.saved)
    }

    /// Sleeps for `delay`; returns `false` if the stop signal cut it short.
    async fn pause(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            return !self.is_stopping();
        }
        let mut stop = self.stop_tx.subscribe();
        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            stopped = async { stop.wait_for(|s| *s).await.is_ok() } => !stopped,
        }
    }

    async fn record_topic(&self, run_id: Option<i64>, topic_id: i64, saved: u32, error: Option<&str>) {
        let Some(run_id) = run_id else { return };
        if let Err(e) = self
            .store
            .record_topic_result(run_id, topic_id, saved, error)
            .await
        {
            tracing::warn!(run_id, topic_id, error = %e, "scheduler: could not record topic result");
        }
    }

    async fn finish_ledger(&self, run_id: Option<i64>, saved: u32, error: Option<&str>) {
        let Some(run_id) = run_id else { return };
        if let Err(e) = self.store.finish_cycle(run_id, saved, error).await {
            tracing::warn!(run_id, error = %e, "scheduler: could not close run ledger entry");
        }
    }
}

/// `min(daily_quota, override)`; an override never raises the quota.
fn effective_quota(daily_quota: i32, max_items: Option<u32>) -> u32 {
    let quota = u32::try_from(daily_quota).unwrap_or(0);
    max_items.map_or(quota, |m| m.min(quota))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_only_lowers_quota() {
        assert_eq!(effective_quota(50, None), 50);
        assert_eq!(effective_quota(50, Some(500)), 50);
        assert_eq!(effective_quota(50, Some(20)), 20);
        assert_eq!(effective_quota(-1, None), 0);
    }

    #[test]
    fn request_deserializes_with_optional_fields() {
        let req: CollectionRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req, CollectionRequest::default());
        let req: CollectionRequest =
            serde_json::from_str(r#"{"topic":"eclipse2026","max_items":5}"#).unwrap();
        assert_eq!(req.topic.as_deref(), Some("eclipse2026"));
        assert_eq!(req.max_items, Some(5));
    }
}
