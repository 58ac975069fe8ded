mod collect;
mod topics;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::collect::{run_collect, run_filter_pending};
use crate::topics::TopicCommands;

#[derive(Debug, Parser)]
#[command(name = "trawl-cli")]
#[command(about = "trawl collector command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database maintenance
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
    /// Manage tracked topics
    Topics {
        #[command(subcommand)]
        command: TopicCommands,
    },
    /// Run one collection cycle in the foreground
    Collect {
        /// Collect only this topic (by text), even if inactive
        #[arg(long)]
        topic: Option<String>,

        /// Cap items fetched per topic; never raises a topic's daily quota
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        max_items: Option<u32>,
    },
    /// Re-run the filter over items still in `collected`
    FilterPending {
        #[arg(long, default_value_t = 500)]
        limit: i64,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    /// Check database connectivity
    Ping,
    /// Apply pending migrations
    Migrate,
    /// Upsert topics from the topics file
    Seed,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let Some(command) = cli.command else {
        println!("trawl-cli: no command given; see --help");
        return Ok(());
    };

    let config = trawl_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = trawl_db::PoolConfig::from_app_config(&config);
    let pool = trawl_db::connect_pool(&config.database_url, pool_config).await?;

    match command {
        Commands::Db { command } => run_db(&pool, &config, command).await?,
        Commands::Topics { command } => topics::run(&pool, command).await?,
        Commands::Collect { topic, max_items } => {
            run_collect(pool, &config, topic, max_items).await?;
        }
        Commands::FilterPending { limit } => run_filter_pending(pool, limit).await?,
    }

    Ok(())
}

async fn run_db(
    pool: &sqlx::PgPool,
    config: &trawl_core::AppConfig,
    command: DbCommands,
) -> anyhow::Result<()> {
    match command {
        DbCommands::Ping => {
            trawl_db::health_check(pool).await?;
            println!("database ok");
        }
        DbCommands::Migrate => {
            let applied = trawl_db::run_migrations(pool).await?;
            println!("migrations up to date ({applied} applied)");
        }
        DbCommands::Seed => {
            let file = trawl_core::load_topics(&config.topics_path)?;
            let seeded = trawl_db::seed_topics(pool, &file.topics).await?;
            println!(
                "seeded {seeded} topics from {}",
                config.topics_path.display()
            );
        }
    }
    Ok(())
}
