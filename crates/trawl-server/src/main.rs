mod api;
mod middleware;
mod scheduler;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use trawl_client::{ClientConfig, RateLimitedClient};
use trawl_pipeline::{
    CollectionScheduler, EventBus, FilterStage, PgStore, PipelineStage, SchedulerConfig, Store,
};

use crate::{
    api::{build_app, AppState},
    middleware::AuthState,
};

/// How long shutdown waits for an in-flight cycle to finish its topic.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(trawl_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    tracing::info!(config = ?config, "starting trawl-server");

    let pool_config = trawl_db::PoolConfig::from_app_config(&config);
    let pool = trawl_db::connect_pool(&config.database_url, pool_config).await?;
    let applied = trawl_db::run_migrations(&pool).await?;
    tracing::info!(applied, "migrations up to date");

    let (stop_tx, stop_rx) = watch::channel(false);
    let client = RateLimitedClient::new(ClientConfig::from_app_config(&config))?
        .with_cancellation(stop_rx);

    let store: Arc<dyn Store> = Arc::new(PgStore::new(pool.clone()));
    let bus = Arc::new(EventBus::new());
    let filter = Arc::new(FilterStage::new(Arc::clone(&store)));
    let subscriptions = Arc::clone(&filter).attach(&bus);
    tracing::info!(stage = filter.name(), handlers = subscriptions.len(), "stage attached");

    let collector = Arc::new(
        CollectionScheduler::new(
            store,
            Arc::new(client),
            Arc::clone(&bus),
            SchedulerConfig::from_app_config(&config),
        )
        .with_stop_sender(stop_tx),
    );

    let mut jobs = scheduler::build_scheduler(Arc::clone(&collector), config.collect_interval()).await?;
    scheduler::tick(&collector);

    let auth = AuthState::from_tokens(
        &config.trigger_tokens,
        matches!(config.env, trawl_core::Environment::Development),
    )?;
    let app = build_app(
        AppState {
            pool,
            scheduler: Arc::clone(&collector),
        },
        auth,
    );

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");
    let shutdown_collector = Arc::clone(&collector);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_collector.stop();
        })
        .await?;

    jobs.shutdown().await?;
    if tokio::time::timeout(DRAIN_TIMEOUT, collector.wait_until_idle())
        .await
        .is_err()
    {
        tracing::warn!("collection cycle still running after drain timeout; exiting anyway");
    }
    for subscription in subscriptions {
        bus.unsubscribe(subscription);
    }
    filter.shutdown().await?;
    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
