//! Quarry Server - Redis-protocol key/value server with replication
//!
//! Starts the connection service on the configured address. With `--slaveof`
//! (or `SLAVEOF host port` at runtime) the server follows an upstream master
//! and serves its own replicas from the mirrored stream.

use clap::Parser;
use quarry_server::Config;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::thread;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Quarry Server CLI arguments
#[derive(Parser, Debug)]
#[command(name = "quarry-server")]
#[command(about = "Redis-protocol key/value server with replication", long_about = None)]
struct Args {
    /// Config file (TOML); defaults to config/quarry.toml when present
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Follow this master (host:port)
    #[arg(long)]
    slaveof: Option<String>,

    /// Replication backlog size in bytes
    #[arg(long)]
    backlog_size: Option<usize>,

    /// Maximum concurrent full resyncs
    #[arg(long)]
    full_sync_limit: Option<usize>,

    /// Directory for the replication checkpoint
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(long, short = 'v')]
    verbose: bool,
}

impl Args {
    fn apply(self, config: &mut Config) {
        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(slaveof) = self.slaveof {
            config.slaveof = Some(slaveof);
        }
        if let Some(backlog_size) = self.backlog_size {
            config.backlog_size = backlog_size;
        }
        if let Some(limit) = self.full_sync_limit {
            config.full_sync_limit = limit;
        }
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "quarry_server=debug,quarry_core=debug".into())
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "quarry_server=info,quarry_core=info".into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    let worker_threads = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .clamp(2, 16);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .thread_name("quarry-worker")
        .enable_all()
        .build()?;

    tracing::info!(
        "Starting quarry-server on {} ({} worker threads)",
        config.listen,
        worker_threads
    );

    rt.block_on(quarry_server::run(config, shutdown_signal()))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
