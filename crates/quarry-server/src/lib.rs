//! Quarry Server - process wiring for the Quarry core
//!
//! Builds the replication state from the checkpoint, the keyspace, the
//! upstream link and the connection service, runs them until a shutdown
//! signal, then stores the checkpoint again.

#![deny(missing_docs)]

pub mod config;

use anyhow::Context;
use quarry_core::binlog::{Binlog, FileBinlog, ReplicationCheckpoint};
use quarry_core::keyspace::Keyspace;
use quarry_core::replication::{Counters, Replication, UpstreamLink};
use quarry_core::service::Service;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

pub use config::Config;

/// Bind the configured address and serve until `shutdown` resolves
pub async fn run(config: Config, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    serve(config, listener, shutdown).await
}

/// Serve on an already bound listener until `shutdown` resolves or the
/// accept loop fails
pub async fn serve(
    config: Config,
    listener: TcpListener,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    config.validate()?;

    let binlog = FileBinlog::new(&config.data_dir);
    let checkpoint = binlog
        .load()
        .with_context(|| format!("Failed to load {:?}", binlog.path()))?
        .unwrap_or_default();

    let repl = Arc::new(
        Replication::new(config.replication_config(), Arc::new(Counters::default()))
            .with_start_offset(checkpoint.master_offset),
    );
    tracing::info!(
        "Run id {}, replication offset {}",
        repl.run_id(),
        checkpoint.master_offset
    );

    let keyspace = Arc::new(Keyspace::new(config.databases, repl.clone()));
    let link = tokio::spawn(UpstreamLink::new(repl.clone(), keyspace.clone()).run());
    let service = Service::new(
        config.service_config(),
        repl.clone(),
        keyspace.clone(),
        keyspace,
    );

    let result = tokio::select! {
        result = service.serve(listener) => result.context("Connection service failed"),
        _ = shutdown => {
            tracing::info!("Shutdown signal received");
            Ok(())
        }
    };

    repl.shutdown();
    match link.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Upstream link ended with error: {}", e),
        Err(e) => tracing::warn!("Upstream link task failed: {}", e),
    }

    binlog
        .persist(&ReplicationCheckpoint {
            master_offset: repl.master_offset(),
        })
        .context("Failed to persist replication checkpoint")?;

    result
}
