//! `topics` sub-commands: list, add, activate, deactivate.

use clap::Subcommand;
use sqlx::PgPool;

/// Sub-commands available under `topics`.
#[derive(Debug, Subcommand)]
pub enum TopicCommands {
    /// List every topic in collection order
    List,
    /// Add a new active topic
    Add {
        text: String,

        /// Higher runs first
        #[arg(long, default_value_t = 5)]
        priority: i32,

        /// Maximum items fetched per cycle
        #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(i32).range(1..))]
        daily_quota: i32,

        #[arg(long)]
        category: Option<String>,
    },
    /// Include a topic in scheduled cycles
    Activate { text: String },
    /// Exclude a topic from scheduled cycles
    Deactivate { text: String },
}

pub(crate) async fn run(pool: &PgPool, command: TopicCommands) -> anyhow::Result<()> {
    match command {
        TopicCommands::List => list(pool).await,
        TopicCommands::Add {
            text,
            priority,
            daily_quota,
            category,
        } => {
            let text = text.trim();
            if text.is_empty() {
                anyhow::bail!("topic text must be non-empty");
            }
            let topic =
                trawl_db::insert_topic(pool, text, priority, daily_quota, category.as_deref())
                    .await
                    .map_err(|e| match e {
                        trawl_db::DbError::Conflict(_) => {
                            anyhow::anyhow!("topic '{text}' already exists")
                        }
                        other => other.into(),
                    })?;
            println!("added topic '{}' (id {})", topic.text, topic.id);
            Ok(())
        }
        TopicCommands::Activate { text } => set_active(pool, &text, true).await,
        TopicCommands::Deactivate { text } => set_active(pool, &text, false).await,
    }
}

async fn list(pool: &PgPool) -> anyhow::Result<()> {
    let topics = trawl_db::list_topics(pool).await?;
    if topics.is_empty() {
        println!("no topics; add one with `trawl-cli topics add` or `trawl-cli db seed`");
        return Ok(());
    }

    println!(
        "{:<6} {:<32} {:>8} {:>8} {:<8} LAST RUN",
        "ID", "TEXT", "PRIORITY", "QUOTA", "ACTIVE"
    );
    for topic in topics {
        let last_run = topic
            .last_run_at
            .map_or_else(|| "never".to_owned(), |t| t.to_rfc3339());
        println!(
            "{:<6} {:<32} {:>8} {:>8} {:<8} {last_run}",
            topic.id,
            topic.text,
            topic.priority,
            topic.daily_quota,
            if topic.is_active { "yes" } else { "no" },
        );
    }
    Ok(())
}

async fn set_active(pool: &PgPool, text: &str, active: bool) -> anyhow::Result<()> {
    if !trawl_db::set_topic_active(pool, text, active).await? {
        anyhow::bail!("topic '{text}' not found");
    }
    let verb = if active { "activated" } else { "deactivated" };
    println!("{verb} topic '{text}'");
    Ok(())
}
