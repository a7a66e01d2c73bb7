use clap::{Parser, Subcommand};
use meshgate::cluster::{HttpNodeClient, MemoryStore, Orchestrator};
use meshgate::clock::SystemClock;
use meshgate::config::AppConfig;
use meshgate::training::{
    serve, DigestValidator, InProcessSynthesizer, NodeServerState, TrainingWorker,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "meshgate")]
#[command(version = "0.1.0")]
#[command(about = "Training-cluster coordinator with latency-gated route admission", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config directory
    #[arg(short, long, default_value = "config")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the cluster orchestrator
    Orchestrator,
    /// Run a worker node
    Worker {
        /// Address to bind the node HTTP surface
        #[arg(short, long, default_value = "127.0.0.1:7070")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging();

    let config = AppConfig::load_from(&cli.config)?;
    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("config: {}", e);
        }
        anyhow::bail!("invalid configuration ({} errors)", errors.len());
    }

    match cli.command {
        Commands::Orchestrator => run_orchestrator(config).await,
        Commands::Worker { bind } => run_worker(config, &bind).await,
    }
}

async fn run_orchestrator(config: AppConfig) -> anyhow::Result<()> {
    let client = Arc::new(HttpNodeClient::new(config.cluster.probe_timeout_ms)?);
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(SystemClock);

    let orchestrator = Arc::new(Orchestrator::new(
        config.cluster.clone(),
        client,
        store,
        clock,
    ));
    orchestrator.bootstrap().await?;

    // All nodes start offline, so the first election usually fails; the
    // health loop re-elects once probes succeed.
    match orchestrator.elect_primary().await {
        Ok(primary) => info!("primary is {}", primary),
        Err(e) => warn!("{e}; waiting for nodes to come online"),
    }

    orchestrator.start();
    info!("orchestrator running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;
    orchestrator.stop();
    Ok(())
}

async fn run_worker(config: AppConfig, bind: &str) -> anyhow::Result<()> {
    let worker = Arc::new(TrainingWorker::new(
        config.cluster.local_node_id.clone(),
        config.training.clone(),
        Arc::new(InProcessSynthesizer::default()),
        Arc::new(DigestValidator::default()),
        Arc::new(SystemClock),
        None,
    ));

    serve(bind.parse()?, NodeServerState::new(worker)).await?;
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,meshgate=debug"));

    // Optional daily-rolling file layer; console only when the directory is
    // not writable.
    let file_layer = std::env::var("MESHGATE_LOG_DIR").ok().and_then(|log_dir| {
        if std::fs::create_dir_all(&log_dir).is_err() {
            eprintln!("Warning: could not create log directory {log_dir}, file logging disabled");
            return None;
        }
        let file_appender = tracing_appender::rolling::daily(&log_dir, "meshgate.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        // Keep the guard alive for the life of the process.
        Box::leak(Box::new(guard));

        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(true),
        )
    });

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();
}
