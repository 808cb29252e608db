//! Connection service
//!
//! The acceptor owns the listening socket and spawns one worker task per
//! connection. A worker serves commands until the peer disconnects, turns
//! into a replica stream on `SYNC`/`PSYNC`, and always unwinds through the
//! same cleanup path.
//!
//! ```text
//! Accepted ──► Serving ──► ReplicaStreaming
//!                 │               │
//!                 └──────┬────────┘
//!                        ▼
//!                      Closed
//! ```

mod sync;
mod worker;

use crate::Result;
use crate::handler::HandlerTable;
use crate::replication::{Counters, Replication, SnapshotSource};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Service settings
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Idle timeout for client connections; zero disables it
    pub conn_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            conn_timeout: Duration::ZERO,
        }
    }
}

pub(crate) struct ServiceContext {
    pub(crate) config: ServiceConfig,
    pub(crate) repl: Arc<Replication>,
    pub(crate) handler: Arc<dyn HandlerTable>,
    pub(crate) snapshots: Arc<dyn SnapshotSource>,
}

/// Client-facing server
#[derive(Clone)]
pub struct Service {
    ctx: Arc<ServiceContext>,
}

impl Service {
    /// Create a service dispatching to `handler` and producing full-resync
    /// snapshots from `snapshots`
    pub fn new(
        config: ServiceConfig,
        repl: Arc<Replication>,
        handler: Arc<dyn HandlerTable>,
        snapshots: Arc<dyn SnapshotSource>,
    ) -> Self {
        Self {
            ctx: Arc::new(ServiceContext {
                config,
                repl,
                handler,
                snapshots,
            }),
        }
    }

    /// Replication state shared with the workers
    pub fn replication(&self) -> &Arc<Replication> {
        &self.ctx.repl
    }

    /// Accept connections until shutdown.
    ///
    /// An accept failure ends the loop and is returned; failures inside a
    /// worker only close that connection.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let shutdown = self.ctx.repl.shutdown_token().clone();
        let counters = self.ctx.repl.counters().clone();

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(
                "Quarry {} listening on {}",
                self.ctx.repl.run_id(),
                addr
            );
        }

        loop {
            let (socket, addr) = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    tracing::info!("Accept loop stopped");
                    return Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                        return Err(e.into());
                    }
                },
            };

            Counters::incr(&counters.clients_accepted);
            tracing::debug!("Accepted connection from {}", addr);

            let ctx = self.ctx.clone();
            tokio::spawn(worker::run(ctx, socket));
        }
    }
}
