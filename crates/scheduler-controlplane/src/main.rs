//! Control-plane binary: runs the Dispatcher, Status Tracker, Zombie
//! Detector, and Failed-Occurrence Handler as concurrent tasks sharing
//! one coordination-store client, one bus connection, and one Postgres
//! pool.

mod auto_disable;
mod dispatcher;
mod failed_occurrence_handler;
mod status_tracker;
mod zombie_detector;

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use scheduler_core::bus::{AmqpConfig, LapinBus};
use scheduler_core::config::{LogFormat, LoggingConfig};
use scheduler_core::coordination::{KeyPrefix, RedisCoordinationStore};
use scheduler_core::repository::{
    create_pool, Database, FailedOccurrenceRepository, OccurrenceRepository, ScheduledJobRepository,
};
use scheduler_core::{auto_migrate, Config};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::auto_disable::AutoDisableTracker;
use crate::dispatcher::Dispatcher;
use crate::failed_occurrence_handler::FailedOccurrenceHandler;
use crate::status_tracker::StatusTracker;
use crate::zombie_detector::ZombieDetector;

#[derive(Parser)]
#[command(name = "scheduler-controlplane", about = "Job scheduler control plane", version)]
struct Cli {
    #[arg(short, long, value_name = "FILE", help = "Configuration file path")]
    config: Option<String>,

    #[arg(short, long, help = "Enable verbose logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the dispatcher, status tracker, zombie detector, and DLQ handler.
    Run,
    /// Run pending database migrations.
    Migrate,
    /// Show or validate the effective configuration.
    Config {
        #[arg(short, long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };

    let _log_guard = init_tracing(&config.logging, cli.verbose);
    info!("starting scheduler-controlplane v{}", env!("CARGO_PKG_VERSION"));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await?,
        Commands::Migrate => run_migrations(config).await?,
        Commands::Config { show } => {
            config.validate()?;
            info!("configuration is valid");
            if show {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }

    Ok(())
}

/// Builds the subscriber from `LoggingConfig`: env-filter level (bumped to
/// `debug` by `--verbose`), JSON formatting for production or pretty
/// formatting for development, and an optional rolling-free file sink.
/// The returned guard must be held for the process lifetime — dropping it
/// stops the non-blocking writer from flushing.
fn init_tracing(logging: &LoggingConfig, verbose: bool) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let directive = format!("scheduler_controlplane={level},scheduler_core={level},sqlx=warn");
    let env_filter = tracing_subscriber::EnvFilter::new(directive);

    let (writer, guard): (tracing_subscriber::fmt::writer::BoxMakeWriter, Option<_>) = match &logging.file_path {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .unwrap_or_else(|err| panic!("failed to open log file {path}: {err}"));
            let (non_blocking, guard) = tracing_appender::non_blocking(file);
            (tracing_subscriber::fmt::writer::BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (tracing_subscriber::fmt::writer::BoxMakeWriter::new(std::io::stdout), None),
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_writer(writer);

    match logging.format {
        LogFormat::Json => tracing_subscriber::registry().with(env_filter).with(fmt_layer.json()).init(),
        LogFormat::Text => tracing_subscriber::registry().with(env_filter).with(fmt_layer.pretty()).init(),
    }

    guard
}

async fn run_migrations(config: Config) -> Result<()> {
    let pool = create_pool(
        &config.database.host,
        config.database.port,
        &config.database.database,
        &config.database.username,
        &config.database.password,
        config.database.pool_size,
    )
    .await?;
    auto_migrate(&pool).await?;
    info!("migrations complete");
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    let pool = create_pool(
        &config.database.host,
        config.database.port,
        &config.database.database,
        &config.database.username,
        &config.database.password,
        config.database.pool_size,
    )
    .await?;
    auto_migrate(&pool).await?;
    let db = Database::new(pool);

    let jobs = Arc::new(ScheduledJobRepository::new(db.clone()));
    let occurrences = Arc::new(OccurrenceRepository::new(db.clone()));
    let failed_occurrences = Arc::new(FailedOccurrenceRepository::new(db.clone()));

    let coordination: Arc<dyn scheduler_core::CoordinationStore> =
        Arc::new(RedisCoordinationStore::connect(config.coordination.clone()).await?);
    let keys = KeyPrefix::new(config.coordination.key_prefix.clone());

    let amqp_config: AmqpConfig = config.bus.clone().into();
    let bus: Arc<dyn scheduler_core::bus::MessageBus> = Arc::new(LapinBus::connect(amqp_config).await?);

    let failed_occurrence_handler =
        Arc::new(FailedOccurrenceHandler::new(bus.clone(), jobs.clone(), failed_occurrences.clone()));

    let auto_disable = Arc::new(AutoDisableTracker::new(
        jobs.clone(),
        config.status_tracker.auto_disable_threshold,
        config.status_tracker.failure_window_minutes,
        config.status_tracker.auto_re_enable_cooldown_minutes,
    ));

    let dispatcher = Dispatcher::new(
        coordination.clone(),
        bus.clone(),
        jobs.clone(),
        occurrences.clone(),
        keys.clone(),
        config.dispatcher.clone(),
    );

    let status_tracker = StatusTracker::new(
        coordination.clone(),
        bus.clone(),
        occurrences.clone(),
        failed_occurrence_handler.clone(),
        auto_disable.clone(),
        keys.clone(),
        config.status_tracker.clone(),
    );

    let zombie_detector = ZombieDetector::new(
        coordination.clone(),
        occurrences.clone(),
        failed_occurrence_handler.clone(),
        auto_disable.clone(),
        keys.clone(),
        config.zombie_detector.clone(),
    );

    let dispatcher_task = tokio::spawn(async move {
        if let Err(err) = dispatcher.run().await {
            error!(error = %err, "dispatcher task exited");
        }
    });
    let status_tracker_task = tokio::spawn(async move {
        if let Err(err) = status_tracker.run().await {
            error!(error = %err, "status tracker task exited");
        }
    });
    let zombie_detector_task = tokio::spawn(async move {
        if let Err(err) = zombie_detector.run().await {
            error!(error = %err, "zombie detector task exited");
        }
    });

    info!("control plane running");
    tokio::select! {
        _ = dispatcher_task => {}
        _ = status_tracker_task => {}
        _ = zombie_detector_task => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    Ok(())
}
