//! Background job scheduler.
//!
//! Registers the fixed-interval collection timer. Each tick only requests a
//! cycle; if one is still running the tick is rejected as busy and dropped.

use std::sync::Arc;
use std::time::Duration;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use trawl_core::TriggerSource;
use trawl_pipeline::{CollectionRequest, CollectionScheduler, TriggerOutcome};

/// Builds and starts the background job scheduler.
///
/// Returns the running [`JobScheduler`] handle, which must be kept alive for
/// the lifetime of the process. Dropping it shuts down all scheduled jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised, the
/// job cannot be registered, or the scheduler fails to start.
pub async fn build_scheduler(
    collector: Arc<CollectionScheduler>,
    interval: Duration,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;
    register_collection_job(&scheduler, collector, interval).await?;
    scheduler.start().await?;
    Ok(scheduler)
}

async fn register_collection_job(
    scheduler: &JobScheduler,
    collector: Arc<CollectionScheduler>,
    interval: Duration,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_repeated_async(interval, move |_uuid, _lock| {
        let collector = Arc::clone(&collector);

        Box::pin(async move {
            tick(&collector);
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(interval_secs = interval.as_secs(), "scheduler: collection timer registered");
    Ok(())
}

/// Requests a timer cycle unless the collector is stopping.
pub fn tick(collector: &Arc<CollectionScheduler>) -> TriggerOutcome {
    let outcome = collector.request_collection(CollectionRequest::default(), TriggerSource::Timer);
    if outcome == TriggerOutcome::Accepted {
        tracing::info!("scheduler: timer cycle started");
    }
    outcome
}
