//! Collection-and-ingestion pipeline: event bus, storage contract,
//! ingestion, filtering and the collection scheduler.

pub mod error;
pub mod events;
pub mod filter;
pub mod ingest;
pub mod scheduler;
pub mod source;
pub mod store;

pub use error::PipelineError;
pub use events::{
    CycleSummary, EventBus, EventHandler, EventKind, ItemAccepted, ItemIngested, PipelineEvent,
    PipelineStage, Subscription, SubscriptionId, TopicResult,
};
pub use filter::{FilterDecision, FilterPendingReport, FilterStage, Rule, RuleChain};
pub use ingest::{IngestReport, IngestionEngine};
pub use scheduler::{CollectionRequest, CollectionScheduler, SchedulerConfig, TriggerOutcome};
pub use source::SearchSource;
pub use store::{MemoryStore, PgStore, Store};
