//! Foreground collection and filter re-drive.

use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::watch;
use trawl_client::{ClientConfig, RateLimitedClient};
use trawl_core::{AppConfig, TriggerSource};
use trawl_pipeline::{
    CollectionRequest, CollectionScheduler, CycleSummary, EventBus, FilterStage, PgStore,
    PipelineStage, SchedulerConfig, Store,
};

/// Runs one cycle with the filter attached and prints the per-topic summary.
///
/// Ctrl-C raises the stop signal: the current topic finishes, the rest are
/// skipped.
///
/// # Errors
///
/// Returns an error if the client cannot be built or the cycle aborts on a
/// storage failure.
pub(crate) async fn run_collect(
    pool: PgPool,
    config: &AppConfig,
    topic: Option<String>,
    max_items: Option<u32>,
) -> anyhow::Result<()> {
    let (stop_tx, stop_rx) = watch::channel(false);
    let client = RateLimitedClient::new(ClientConfig::from_app_config(config))?
        .with_cancellation(stop_rx);

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
    let bus = Arc::new(EventBus::new());
    Arc::new(FilterStage::new(Arc::clone(&store))).attach(&bus);

    let scheduler = Arc::new(
        CollectionScheduler::new(
            store,
            Arc::new(client),
            bus,
            SchedulerConfig::from_app_config(config),
        )
        .with_stop_sender(stop_tx),
    );

    let stopper = Arc::clone(&scheduler);
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("interrupt received; finishing current topic");
            stopper.stop();
        }
    });

    let result = scheduler
        .run_once(CollectionRequest { topic, max_items }, TriggerSource::Cli)
        .await;
    interrupt.abort();

    let summary = result?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &CycleSummary) {
    if summary.results.is_empty() {
        println!("no topics collected");
        return;
    }
    for result in &summary.results {
        let note = if result.failed { " (failed)" } else { "" };
        println!("{:<32} {:>6}{note}", result.topic, result.saved);
    }
    let interrupted = if summary.interrupted {
        "; interrupted before all topics ran"
    } else {
        ""
    };
    println!(
        "saved {} new items across {} topics{interrupted}",
        summary.total_saved(),
        summary.results.len()
    );
}

/// Filters up to `limit` items still waiting in `collected`.
///
/// # Errors
///
/// Returns an error if pending items cannot be listed or updated.
pub(crate) async fn run_filter_pending(pool: PgPool, limit: i64) -> anyhow::Result<()> {
    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool));
    let bus = EventBus::new();
    let stage = FilterStage::new(store);

    let report = stage.filter_pending(limit.max(1), &bus).await?;
    println!(
        "examined {} items: {} accepted, {} rejected, {} errored ({} updated)",
        report.examined, report.accepted, report.rejected, report.errored, report.updated
    );
    Ok(())
}
