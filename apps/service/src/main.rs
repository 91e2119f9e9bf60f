mod config;
mod database;
mod monitoring;
mod pool;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing::info;

use crate::config::Config;
use crate::database::{Database, DatabaseImpl};
use crate::monitoring::ProbeExecutor;
use crate::monitoring::notifier::{LogChannel, NotificationEngine, NotifyChannel, WebhookChannel};
use crate::monitoring::scheduler::{Scheduler, TokioQueue};
use crate::monitoring::sweeper::{SnapshotSweeper, SweepPolicy};
use crate::pool::{LibsqlManager, LibsqlPool};

/// Adaptive uptime and content monitor
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database path override
    #[arg(short, long)]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logger::init();
    let cli = Cli::parse();

    let config = Config::from_config(cli.config.as_deref())
        .map_err(|e| anyhow!("failed to load configuration: {e:?}"))?;
    info!("{config}");

    let db_path = cli.database.unwrap_or_else(|| config.database.path.clone());
    let db = libsql::Builder::new_local(&db_path)
        .build()
        .await
        .with_context(|| format!("failed to open database at {db_path}"))?;
    let pool: LibsqlPool = deadpool::managed::Pool::builder(LibsqlManager::new(db)).build()?;

    {
        let conn = pool.get().await?;
        database::initialize_database(&conn).await?;
    }

    let database: Arc<dyn Database> = Arc::new(DatabaseImpl::new_from_pool(pool));

    let executor = Arc::new(ProbeExecutor::new(
        database.clone(),
        config.probe.timeout_seconds,
        config.probe.max_redirects,
    ));

    let mut channels: Vec<Arc<dyn NotifyChannel>> = vec![Arc::new(LogChannel)];
    if let Some(url) = &config.notifications.webhook_url {
        channels.push(Arc::new(WebhookChannel::new(url.clone())));
    }
    let notifier = Arc::new(NotificationEngine::new(database.clone(), channels));

    let queue = Arc::new(TokioQueue::new(config.queue.lane.clone()));
    let scheduler = Scheduler::new(database.clone(), executor, notifier, queue);
    scheduler.arm_all().await?;

    let sweeper = SnapshotSweeper::new(
        database.clone(),
        SweepPolicy {
            interval_seconds: config.sweeper.interval_seconds,
            fail_after_seconds: config.sweeper.fail_after_seconds,
        },
    );
    let _sweep_handle = sweeper.start_periodic();

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
