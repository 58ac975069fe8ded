//! In-process publish/subscribe dispatch between pipeline stages.
//!
//! Dispatch runs on the emitter's task: [`EventBus::emit`] awaits each
//! subscriber in subscription order before returning. Every handler runs
//! behind its own error and panic boundary, so one failing subscriber never
//! stops the rest or the emitter. The subscriber list is snapshotted when
//! `emit` starts; subscribe/unsubscribe during dispatch affect later emits.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use trawl_core::TriggerSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ItemIngested,
    ItemAccepted,
    CycleCompleted,
}

impl EventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::ItemIngested => "item_ingested",
            EventKind::ItemAccepted => "item_accepted",
            EventKind::CycleCompleted => "cycle_completed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A newly created item, emitted once per insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemIngested {
    pub item_id: i64,
    pub external_id: String,
    pub topic_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemAccepted {
    pub item_id: i64,
    pub external_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicResult {
    pub topic: String,
    pub saved: u32,
    /// The topic failed and `saved` is zero for that reason.
    pub failed: bool,
}

/// Per-topic outcome of one collection cycle, failed topics included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub run_id: Option<i64>,
    pub trigger: TriggerSource,
    pub results: Vec<TopicResult>,
    /// The stop signal ended the cycle before every topic was visited.
    pub interrupted: bool,
}

impl CycleSummary {
    #[must_use]
    pub fn total_saved(&self) -> u32 {
        self.results.iter().map(|r| r.saved).sum()
    }

    #[must_use]
    pub fn saved_for(&self, topic: &str) -> Option<u32> {
        self.results
            .iter()
            .find(|r| r.topic == topic)
            .map(|r| r.saved)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    ItemIngested(ItemIngested),
    ItemAccepted(ItemAccepted),
    CycleCompleted(CycleSummary),
}

impl PipelineEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            PipelineEvent::ItemIngested(_) => EventKind::ItemIngested,
            PipelineEvent::ItemAccepted(_) => EventKind::ItemAccepted,
            PipelineEvent::CycleCompleted(_) => EventKind::CycleCompleted,
        }
    }
}

/// A subscriber. The bus is passed in so handlers can emit follow-up
/// events without holding a reference to it.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &PipelineEvent, bus: &EventBus) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription {
    pub kind: EventKind,
    pub id: SubscriptionId,
}

type HandlerList = Vec<(SubscriptionId, Arc<dyn EventHandler>)>;

#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<HashMap<EventKind, HandlerList>>,
    next_id: AtomicU64,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `handler` to the subscriber list for `kind`.
    pub fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(kind)
            .or_default()
            .push((id, handler));
        Subscription { kind, id }
    }

    /// Returns `false` if the subscription was not registered.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(list) = subscribers.get_mut(&subscription.kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(id, _)| *id != subscription.id);
        list.len() != before
    }

    #[must_use]
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Delivers `event` to every current subscriber of its kind, in order.
    pub async fn emit(&self, event: PipelineEvent) {
        let kind = event.kind();
        let handlers: HandlerList = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        if handlers.is_empty() {
            tracing::trace!(event = kind.as_str(), "events: no subscribers");
            return;
        }

        for (id, handler) in handlers {
            let outcome = AssertUnwindSafe(handler.handle(&event, self))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(
                        event = kind.as_str(),
                        subscription = id.0,
                        error = %format!("{e:#}"),
                        "events: handler failed"
                    );
                }
                Err(panic) => {
                    tracing::error!(
                        event = kind.as_str(),
                        subscription = id.0,
                        panic = panic_message(panic.as_ref()),
                        "events: handler panicked"
                    );
                }
            }
        }
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<EventKind, usize> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(kind, list)| (*kind, list.len()))
            .collect();
        f.debug_struct("EventBus")
            .field("subscribers", &counts)
            .finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Lifecycle hooks for a stage wired onto the bus.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Subscribes the stage's handlers and returns the subscriptions so
    /// they can be removed on shutdown.
    fn attach(self: Arc<Self>, bus: &EventBus) -> Vec<Subscription>;

    async fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: &PipelineEvent, _bus: &EventBus) -> anyhow::Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.label, event.kind()));
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn handle(&self, _event: &PipelineEvent, _bus: &EventBus) -> anyhow::Result<()> {
            anyhow::bail!("boom")
        }
    }

    struct Panicking;

    #[async_trait]
    impl EventHandler for Panicking {
        async fn handle(&self, _event: &PipelineEvent, _bus: &EventBus) -> anyhow::Result<()> {
            panic!("handler exploded")
        }
    }

    /// Subscribes another handler while being dispatched.
    struct Subscriber {
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl EventHandler for Subscriber {
        async fn handle(&self, _event: &PipelineEvent, bus: &EventBus) -> anyhow::Result<()> {
            bus.subscribe(
                EventKind::ItemAccepted,
                Arc::new(Recorder {
                    label: "late",
                    log: Arc::clone(&self.log),
                }),
            );
            Ok(())
        }
    }

    fn accepted() -> PipelineEvent {
        PipelineEvent::ItemAccepted(ItemAccepted {
            item_id: 1,
            external_id: "1".to_owned(),
        })
    }

    fn recorder(label: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn EventHandler> {
        Arc::new(Recorder {
            label,
            log: Arc::clone(log),
        })
    }

    #[tokio::test]
    async fn delivers_in_subscription_order() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(EventKind::ItemAccepted, recorder("a", &log));
        bus.subscribe(EventKind::ItemAccepted, recorder("b", &log));
        bus.subscribe(EventKind::ItemIngested, recorder("other", &log));

        bus.emit(accepted()).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:item_accepted", "b:item_accepted"]
        );
    }

    #[tokio::test]
    async fn failing_and_panicking_handlers_do_not_stop_dispatch() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(EventKind::ItemAccepted, Arc::new(Failing));
        bus.subscribe(EventKind::ItemAccepted, Arc::new(Panicking));
        bus.subscribe(EventKind::ItemAccepted, recorder("after", &log));

        bus.emit(accepted()).await;

        assert_eq!(*log.lock().unwrap(), vec!["after:item_accepted"]);
    }

    #[tokio::test]
    async fn unsubscribe_removes_only_that_handler() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = bus.subscribe(EventKind::ItemAccepted, recorder("a", &log));
        bus.subscribe(EventKind::ItemAccepted, recorder("b", &log));

        assert!(bus.unsubscribe(first));
        assert!(!bus.unsubscribe(first));
        bus.emit(accepted()).await;

        assert_eq!(*log.lock().unwrap(), vec!["b:item_accepted"]);
        assert_eq!(bus.subscriber_count(EventKind::ItemAccepted), 1);
    }

    #[tokio::test]
    async fn subscribers_are_snapshotted_at_emit() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.subscribe(
            EventKind::ItemAccepted,
            Arc::new(Subscriber {
                log: Arc::clone(&log),
            }),
        );

        bus.emit(accepted()).await;
        assert!(log.lock().unwrap().is_empty());

        bus.emit(accepted()).await;
        assert_eq!(*log.lock().unwrap(), vec!["late:item_accepted"]);
    }

    #[test]
    fn events_serialize_with_snake_case_tag() {
        let json = serde_json::to_value(accepted()).unwrap();
        assert_eq!(json["event"], "item_accepted");
        assert_eq!(json["item_id"], 1);
    }
}
