//! The filter state machine: `collected` → `filtered_accepted` |
//! `filtered_<reason>` | `filter_error`, each terminal.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use trawl_core::{FilterOutcome, ProcessingStatus, RejectReason};
use trawl_db::ItemRow;

use crate::error::PipelineError;
use crate::events::{
    panic_message, EventBus, EventHandler, EventKind, ItemAccepted, PipelineEvent, PipelineStage,
    Subscription,
};
use crate::store::Store;

mod rules;

pub use rules::{LowQualityRule, OffensiveRule, PropagandaRule, Rule, RuleChain, SpamRule};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// Missing, or already past `collected`.
    Skipped,
    Accepted,
    Rejected(RejectReason),
    Errored,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterPendingReport {
    pub examined: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub errored: usize,
    /// Rows actually transitioned by the batch update.
    pub updated: usize,
}

pub struct FilterStage {
    store: Arc<dyn Store>,
    rules: RuleChain,
}

impl FilterStage {
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_rules(store, RuleChain::standard())
    }

    #[must_use]
    pub fn with_rules(store: Arc<dyn Store>, rules: RuleChain) -> Self {
        Self { store, rules }
    }

    /// Runs the rule chain behind a panic boundary. `Err` carries the panic message.
    fn evaluate(&self, item: &ItemRow) -> Result<Option<RejectReason>, String> {
        std::panic::catch_unwind(AssertUnwindSafe(|| {
            self.rules.evaluate(&item.body, item.language.as_deref())
        }))
        .map_err(|payload| panic_message(payload.as_ref()).to_owned())
    }

    /// Evaluates one item if it is still `collected`. Re-evaluating a terminal
    /// item is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the item cannot be read or its new status
    /// cannot be written.
    pub async fn process_item(
        &self,
        item_id: i64,
        bus: &EventBus,
    ) -> Result<FilterDecision, PipelineError> {
        let Some(item) = self.store.get_item(item_id).await? else {
            tracing::warn!(item_id, "filter: item not found");
            return Ok(FilterDecision::Skipped);
        };

        let status = match item.status() {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(item_id, error = %e, "filter: unreadable status, skipping");
                return Ok(FilterDecision::Skipped);
            }
        };
        if status.is_terminal() {
            tracing::debug!(item_id, status = %status, "filter: already processed");
            return Ok(FilterDecision::Skipped);
        }

        let (decision, new_status, outcome) = match self.evaluate(&item) {
            Ok(Some(reason)) => (
                FilterDecision::Rejected(reason),
                ProcessingStatus::Rejected(reason),
                FilterOutcome::Rejected,
            ),
            Ok(None) => (
                FilterDecision::Accepted,
                ProcessingStatus::Accepted,
                FilterOutcome::Accepted,
            ),
            Err(panic) => {
                tracing::error!(item_id, panic = %panic, "filter: evaluation failed");
                (
                    FilterDecision::Errored,
                    ProcessingStatus::FilterError,
                    FilterOutcome::Pending,
                )
            }
        };

        if !self
            .store
            .set_item_status(item_id, new_status, outcome)
            .await?
        {
            tracing::debug!(item_id, "filter: lost transition, item already processed");
            return Ok(FilterDecision::Skipped);
        }

        tracing::debug!(item_id, status = %new_status, "filter: item evaluated");
        if decision == FilterDecision::Accepted {
            bus.emit(PipelineEvent::ItemAccepted(ItemAccepted {
                item_id,
                external_id: item.external_id,
            }))
            .await;
        }
        Ok(decision)
    }

    /// Re-drives up to `limit` items still in `collected`, persisting all
    /// outcomes with one batch update.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] if the pending items cannot be listed or the
    /// batch update fails.
    pub async fn filter_pending(
        &self,
        limit: i64,
        bus: &EventBus,
    ) -> Result<FilterPendingReport, PipelineError> {
        let pending = self
            .store
            .list_items_by_status(ProcessingStatus::Collected, limit)
            .await?;

        let mut report = FilterPendingReport {
            examined: pending.len(),
            ..FilterPendingReport::default()
        };
        let mut updates = Vec::with_capacity(pending.len());
        let mut accepted = Vec::new();

        for item in pending {
            match self.evaluate(&item) {
                Ok(Some(reason)) => {
                    report.rejected += 1;
                    updates.push((
                        item.id,
                        ProcessingStatus::Rejected(reason),
                        FilterOutcome::Rejected,
                    ));
                }
                Ok(None) => {
                    report.accepted += 1;
                    updates.push((item.id, ProcessingStatus::Accepted, FilterOutcome::Accepted));
                    accepted.push(ItemAccepted {
                        item_id: item.id,
                        external_id: item.external_id,
                    });
                }
                Err(panic) => {
                    report.errored += 1;
                    tracing::error!(item_id = item.id, panic = %panic, "filter: evaluation failed");
                    updates.push((item.id, ProcessingStatus::FilterError, FilterOutcome::Pending));
                }
            }
        }

        if updates.is_empty() {
            return Ok(report);
        }

        let changed: HashSet<i64> = self
            .store
            .set_item_statuses(&updates)
            .await?
            .into_iter()
            .collect();
        report.updated = changed.len();
        for event in accepted {
            if changed.contains(&event.item_id) {
                bus.emit(PipelineEvent::ItemAccepted(event)).await;
            } else {
                tracing::debug!(item_id = event.item_id, "filter: lost transition, item already processed");
            }
        }

        tracing::info!(
            examined = report.examined,
            accepted = report.accepted,
            rejected = report.rejected,
            errored = report.errored,
            "filter: pending items processed"
        );
        Ok(report)
    }
}

#[async_trait]
impl EventHandler for FilterStage {
    async fn handle(&self, event: &PipelineEvent, bus: &EventBus) -> anyhow::Result<()> {
        if let PipelineEvent::ItemIngested(ingested) = event {
            self.process_item(ingested.item_id, bus).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl PipelineStage for FilterStage {
    fn name(&self) -> &'static str {
        "filter"
    }

    fn attach(self: Arc<Self>, bus: &EventBus) -> Vec<Subscription> {
        vec![bus.subscribe(EventKind::ItemIngested, self)]
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        tracing::info!("filter: stage stopped");
        Ok(())
    }
}
