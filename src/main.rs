//! WolfElect - Leader Election Node
//!
//! Runs one election node, or the bundled coordination service.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wolfelect::api::MetricsServer;
use wolfelect::automaton::{Context, LoopRunner, State};
use wolfelect::config::{parse_duration, ElectConfig};
use wolfelect::coordination::{CoordinationServer, Namespace, TcpCoordinator};
use wolfelect::error::Result;
use wolfelect::metrics::Metrics;
use wolfelect::storage::DirStore;

/// WolfElect - Leader Election Node
#[derive(Parser)]
#[command(name = "wolfelect")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an election node
    Run(RunArgs),

    /// Run the bundled coordination service
    Coordinator {
        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0:2181")]
        listen: String,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Path to configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Coordination service endpoints, host:port, comma separated (default: localhost:2181, where `wolfelect coordinator` listens)
    #[arg(short = 's', long, value_delimiter = ',')]
    zk_servers: Option<Vec<String>>,

    /// Leader heartbeat interval (e.g. 10s, 500ms)
    #[arg(short = 'l', long, value_parser = parse_duration)]
    leader_timeout: Option<Duration>,

    /// Attempter poll interval (e.g. 10s, 500ms)
    #[arg(short = 'a', long, value_parser = parse_duration)]
    attempter_timeout: Option<Duration>,

    /// Directory for liveness artifacts
    #[arg(short = 'f', long)]
    file_dir: Option<PathBuf>,

    /// Number of liveness artifacts to keep
    #[arg(short = 'c', long)]
    storage_capacity: Option<usize>,

    /// Metrics listen address
    #[arg(long)]
    metrics_address: Option<String>,
}

impl RunArgs {
    /// Load the config file, if any, then apply flag overrides
    fn load_config(&self) -> Result<ElectConfig> {
        let mut config = match &self.config {
            Some(path) => ElectConfig::from_file(path)?,
            None => ElectConfig::default(),
        };

        if let Some(endpoints) = &self.zk_servers {
            config.coordination.endpoints = endpoints.clone();
        }
        if let Some(interval) = self.leader_timeout {
            config.election.leader_interval_ms = interval.as_millis() as u64;
        }
        if let Some(interval) = self.attempter_timeout {
            config.election.attempter_interval_ms = interval.as_millis() as u64;
        }
        if let Some(dir) = &self.file_dir {
            config.storage.dir = dir.clone();
        }
        if let Some(capacity) = self.storage_capacity {
            config.storage.capacity = capacity;
        }
        if let Some(address) = &self.metrics_address {
            config.metrics.bind_address = address.clone();
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run(args) => run_node(args, cli.log_level).await,
        Commands::Coordinator { listen } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"));
            run_coordinator(listen).await
        }
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Cancel `token` on SIGINT or SIGTERM
fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut terminate) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = terminate.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("Cannot listen for SIGTERM: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        tracing::info!("Received shutdown signal");
        token.cancel();
    });
}

/// Run an election node until shutdown or a fatal error
async fn run_node(args: RunArgs, log_level: Option<String>) -> Result<()> {
    let config = args.load_config()?;
    init_logging(log_level.as_deref().unwrap_or(&config.logging.level));

    tracing::info!("Starting WolfElect node...");
    tracing::info!("  Coordination: {}", config.coordination.endpoints.join(", "));
    tracing::info!("  Election path: {}", config.election.path);
    tracing::info!("  Artifacts: {:?} (keep {})", config.storage.dir, config.storage.capacity);

    let metrics = Arc::new(Metrics::new());
    if config.metrics.enabled {
        let (address, _server) = MetricsServer::new(config.metrics.clone(), Arc::clone(&metrics))
            .spawn()
            .await?;
        tracing::debug!("Metrics server bound to {}", address);
    } else {
        tracing::info!("Metrics disabled");
    }

    let coordinator = Arc::new(TcpCoordinator::new(
        Duration::from_millis(config.coordination.session_timeout_ms),
        Duration::from_millis(config.coordination.request_timeout_ms),
    ));
    let store = Arc::new(DirStore::new(config.storage.dir.clone()));
    let cancel = CancellationToken::new();
    cancel_on_signal(cancel.clone());

    let ctx = Context::new(config, coordinator, store, cancel);
    let runner = LoopRunner::new(metrics);

    runner.run(&ctx, State::init()).await?;
    tracing::info!("WolfElect node stopped");
    Ok(())
}

/// Run the bundled coordination service until shutdown
async fn run_coordinator(listen: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    tracing::info!("Coordination service listening on {}", listen);

    let cancel = CancellationToken::new();
    cancel_on_signal(cancel.clone());

    CoordinationServer::new(Arc::new(Namespace::new()))
        .run(listener, cancel)
        .await
}
