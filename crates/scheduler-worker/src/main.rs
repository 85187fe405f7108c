//! Worker binary: registers job handlers, connects to the coordination
//! store and bus, and runs the consumer loop(s), the worker-level
//! heartbeat loop, and the outbox sync orchestrator as concurrent tasks
//! sharing one durable local outbox.

mod cancellation;
mod capacity;
mod consumer;
mod executor;
mod handlers;
mod outbox;
mod sync;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use scheduler_core::bus::{AmqpConfig, LapinBus, RegistrationMessage, WorkerHeartbeatMessage};
use scheduler_core::config::{LogFormat, LoggingConfig};
use scheduler_core::coordination::{KeyPrefix, RedisCoordinationStore};
use scheduler_core::handler::HandlerRegistry;
use scheduler_core::Config;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::cancellation::CancellationRegistry;
use crate::consumer::Consumer;
use crate::handlers::{LogHandler, ShellCommandHandler};
use crate::outbox::Outbox;
use crate::sync::SyncOrchestrator;

#[derive(Parser)]
#[command(name = "scheduler-worker", about = "Job scheduler worker runtime", version)]
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
    /// Run the consumer, outbox sync orchestrator, and heartbeat loops.
    Run,
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
    info!("starting scheduler-worker v{}", env!("CARGO_PKG_VERSION"));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await?,
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

/// Builds the subscriber from `LoggingConfig`, matching the control
/// plane's init: env-filter level bumped by `--verbose`, JSON for
/// production or pretty for development, optional file sink. The guard
/// must live for the process lifetime.
fn init_tracing(logging: &LoggingConfig, verbose: bool) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let directive = format!("scheduler_worker={level},scheduler_core={level}");
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

fn build_registry() -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(LogHandler));
    registry.register(Arc::new(ShellCommandHandler));
    Arc::new(registry)
}

async fn run(config: Config) -> Result<()> {
    let worker = config.worker.clone();

    let coordination: Arc<dyn scheduler_core::CoordinationStore> =
        Arc::new(RedisCoordinationStore::connect(config.coordination.clone()).await?);
    let keys = KeyPrefix::new(config.coordination.key_prefix.clone());

    let amqp_config: AmqpConfig = config.bus.clone().into();
    let bus: Arc<dyn scheduler_core::bus::MessageBus> = Arc::new(LapinBus::connect(amqp_config).await?);

    let outbox = Outbox::open(&worker.outbox_path)?;
    let handlers = build_registry();
    let cancellation = CancellationRegistry::new();

    let unsupported: Vec<&str> =
        worker.job_types.iter().map(|j| j.job_name_in_worker.as_str()).filter(|name| handlers.get(name).is_none()).collect();
    if !unsupported.is_empty() {
        error!(?unsupported, "configured job types have no registered handler");
    }

    publish_registration(&bus, &worker).await?;

    let cancellation_listener = cancellation.clone().spawn_listener(coordination.clone(), keys.clone());

    let consumer = Arc::new(Consumer::new(
        bus.clone(),
        coordination.clone(),
        keys.clone(),
        outbox.clone(),
        handlers,
        cancellation,
        worker.clone(),
    ));
    let heartbeat_consumer = consumer.clone();
    let consumer_task = tokio::spawn(async move {
        if let Err(err) = consumer.run().await {
            error!(error = %err, "consumer task exited");
        }
    });

    let sync_orchestrator = SyncOrchestrator::new(bus.clone(), outbox.clone(), Duration::from_millis(500));
    let sync_task = tokio::spawn(async move {
        if let Err(err) = sync_orchestrator.run().await {
            error!(error = %err, "outbox sync orchestrator exited");
        }
    });

    let heartbeat_outbox = outbox.clone();
    let heartbeat_worker = worker.clone();
    let heartbeat_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(heartbeat_worker.worker_heartbeat_interval_seconds));
        loop {
            ticker.tick().await;
            let _ = heartbeat_outbox.set_worker_heartbeat(WorkerHeartbeatMessage {
                worker_id: heartbeat_worker.worker_id.clone(),
                instance_id: heartbeat_worker.instance_id.clone(),
                current_jobs: heartbeat_consumer.current_jobs(),
                timestamp: Utc::now(),
            });
        }
    });

    info!(worker_id = %worker.worker_id, instance_id = %worker.instance_id, "worker running");
    tokio::select! {
        _ = consumer_task => {}
        _ = sync_task => {}
        _ = heartbeat_task => {}
        _ = cancellation_listener => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    Ok(())
}

async fn publish_registration(bus: &Arc<dyn scheduler_core::bus::MessageBus>, worker: &scheduler_core::config::WorkerConfig) -> Result<()> {
    let message = RegistrationMessage {
        worker_id: worker.worker_id.clone(),
        instance_id: worker.instance_id.clone(),
        display_name: worker.worker_id.clone(),
        host_name: hostname(),
        ip_address: "0.0.0.0".to_string(),
        routing_patterns: worker.job_types.iter().map(|j| j.routing_pattern.clone()).collect(),
        job_data_definitions: serde_json::Value::Null,
        job_types: worker.job_types.iter().map(|j| j.job_name_in_worker.clone()).collect(),
        max_parallel_jobs: worker.max_parallel_jobs,
        version: env!("CARGO_PKG_VERSION").to_string(),
        metadata: serde_json::Value::Null,
    };
    bus.publish_registration(&message).await?;
    Ok(())
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}
