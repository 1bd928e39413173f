use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};
use vigil::{
    actors::{SchedulerHandle, SchedulerSettings, TaskRouter, WorkerPoolHandle, WorkerSettings},
    alarm::{AlarmRepository, Trigger, loader::FileAlarmRepository},
    config::{Config, read_config_file},
    dashboard::{BroadcastPublisher, DashboardPublisher},
    notification::{Dispatcher, Mailer, NotificationHandler, SmtpMailer},
    pipeline::CheckPipeline,
    sentinel::SentinelRegistry,
    storage::create_signal_store,
    tasks::{CronTriggers, MemoryQueue, PeriodicTriggers, TaskKind, TaskQueue},
    util,
};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file (defaults to $VIGIL_CONFIG or ./vigil.toml)
    #[arg(short)]
    file: Option<String>,
}

fn init() {
    let level = util::get_log_level();
    let filter = filter::Targets::new().with_targets(vec![("vigil", level), ("vigil_hub", level)]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();

    let args = Args::parse();
    trace!("started with args: {args:?}");

    let path = args.file.unwrap_or_else(util::get_config_path);
    let config = read_config_file(&path)?;

    run(config).await
}

async fn run(config: Config) -> anyhow::Result<()> {
    let store = create_signal_store(&config.storage)
        .await
        .context("failed to open signal store")?;

    let alarms: Arc<dyn AlarmRepository> = Arc::new(FileAlarmRepository::new(&config.alarms_dir));
    debug!("reading alarms from {}", config.alarms_dir.display());

    let registry = Arc::new(SentinelRegistry::with_builtins());
    debug!("available sentinels: {}", registry.names().join(", "));

    let queue: Arc<dyn TaskQueue> = Arc::new(MemoryQueue::new());
    let triggers = Arc::new(CronTriggers::start(queue.clone()).await?);

    let mailer: Option<Arc<dyn Mailer>> = match &config.smtp {
        Some(smtp) => Some(Arc::new(SmtpMailer::from_config(smtp)?)),
        None => {
            warn!("no [smtp] section or SMTP_HOST configured, email notifications are disabled");
            None
        }
    };

    let pipeline = Arc::new(CheckPipeline::new(
        alarms.clone(),
        registry,
        store.clone(),
        queue.clone(),
        Duration::from_secs(config.worker.check_timeout_secs),
    ));
    let notifier = Arc::new(NotificationHandler::new(
        alarms.clone(),
        Dispatcher::new(mailer),
    ));
    let dashboard = Arc::new(DashboardPublisher::new(
        alarms.clone(),
        store,
        Arc::new(BroadcastPublisher::new(64)),
    ));

    let router = TaskRouter::new()
        .route(TaskKind::AlarmCheck, pipeline.clone())
        .route(TaskKind::SignalWrite, pipeline.clone())
        .route(TaskKind::CleanSignals, pipeline)
        .route(TaskKind::AlarmNotify, notifier)
        .route(TaskKind::DashboardNotify, dashboard);

    let workers = WorkerPoolHandle::spawn(
        queue,
        router,
        WorkerSettings {
            concurrency: config.worker.concurrency,
            retry_backoff: Duration::from_millis(config.worker.retry_backoff_ms),
        },
    );

    let scheduler = SchedulerHandle::spawn(
        alarms,
        triggers.clone(),
        SchedulerSettings {
            sync_interval: Duration::from_secs(config.scheduler.sync_interval_secs),
            cleanup: Trigger::every(&config.scheduler.cleanup_interval)?,
        },
    );

    info!(
        "hub running with {} workers, press ctrl-c to stop",
        config.worker.concurrency
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("shutting down");

    if let Err(e) = scheduler.shutdown().await {
        error!("failed to stop scheduler: {e:#}");
    }
    if let Err(e) = triggers.shutdown().await {
        error!("failed to stop triggers: {e:#}");
    }
    if let Err(e) = workers.shutdown().await {
        error!("failed to stop workers: {e:#}");
    }

    info!("bye");
    Ok(())
}
