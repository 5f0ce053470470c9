//! rabbit-operator - converges a RabbitMQ broker toward declared manifests

use std::sync::Arc;

use clap::Parser;
use rabbit_converge::{EventLog, HttpManagerFactory, MemoryStore, Reconciler};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod manifests;
mod operator;
mod scheduler;

use config::Args;
use operator::Operator;
use scheduler::work_queue;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "rabbit_operator={lvl},rabbit_converge={lvl},rabbit_admin={lvl},info",
                    lvl = log_level
                )
                .into()
            }),
        )
        .with(args.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!args.log_json).then(tracing_subscriber::fmt::layer))
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let config = args.engine_config()?;
    let defaults = args.connection_defaults()?;

    info!("======================================");
    info!("  rabbit-operator");
    info!("======================================");
    info!("Manifests: {}", args.manifests.display());
    info!(
        "Default broker: {}",
        defaults.host.as_deref().unwrap_or("<none>")
    );
    info!("Hashing algorithm: {}", config.hashing_algorithm.as_str());
    info!("Resync: {}s", args.resync_secs);
    info!("Mode: {}", if args.once { "ONCE" } else { "CONTINUOUS" });
    info!("======================================");

    let store = Arc::new(MemoryStore::new());
    let (scheduler, queue) = work_queue();
    let reconciler = Reconciler::new(
        Arc::new(HttpManagerFactory::new(config.request_timeout())),
        store.clone(),
        store.clone(),
        Arc::new(EventLog::new()),
        Arc::new(scheduler),
    )
    .with_defaults(defaults)
    .with_config(config);

    let mut operator = Operator::new(reconciler, store, queue, args.manifests.clone());

    if args.once {
        let summary = operator.run_once().await?;
        info!(
            passes = summary.passes,
            ready = summary.ready,
            pending = summary.pending,
            failed = summary.failed,
            "run complete"
        );
        if summary.failed > 0 {
            std::process::exit(1);
        }
        return Ok(());
    }

    operator.run(args.resync_interval()).await
}
