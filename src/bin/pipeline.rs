use std::sync::Arc;

use clap::{Parser, ValueEnum};
use telemetry_pipeline::{
    bus::nats::NatsConnector,
    config::{Config, read_config_file},
    pipeline::{Pipeline, SystemSampler},
    storage::{EventStore, sqlite::SqliteStore},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    Consumer,
    Manager,
}

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: Option<String>,

    /// Role to run
    #[arg(long, value_enum, default_value_t = RoleArg::Consumer)]
    role: RoleArg,
}

fn init() {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_targets(vec![
        ("telemetry_pipeline", LevelFilter::DEBUG),
        ("pipeline", LevelFilter::TRACE),
    ]);
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
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = match &args.file {
        Some(file) => read_config_file(file)?,
        None => Config::default(),
    };
    let resolved = config.resolve();

    let db_path = config.db_path();
    info!("opening store at {}", db_path.display());
    let store = Arc::new(SqliteStore::new(&db_path).await?);

    let connector = Arc::new(NatsConnector::new(config.bus_url(), "telemetry-pipeline"));

    let pipeline = match args.role {
        RoleArg::Consumer => Pipeline::consumer(resolved, store.clone(), connector),
        RoleArg::Manager => Pipeline::manager(
            resolved,
            store.clone(),
            connector,
            Box::new(SystemSampler::new()),
        ),
    };

    let ctx = CancellationToken::new();
    let on_signal = ctx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {e}");
            return;
        }
        info!("received Ctrl-C, shutting down");
        on_signal.cancel();
    });

    let result = pipeline.start(ctx).await;
    info!("final counters: {:?}", pipeline.stats());
    drop(pipeline);

    if let Err(e) = store.close().await {
        error!("failed to close store: {e}");
    }

    result?;
    Ok(())
}
