//! Upstream link: this server as a replica of another master
//!
//! The link task:
//! - Follows the upstream target set by configuration or `SLAVEOF`
//! - Connects and sends `PSYNC`, resuming from the local offset when the
//!   upstream's run id is known
//! - Restores the snapshot on a full resync
//! - Applies every streamed command locally and appends the received bytes
//!   verbatim to the local backlog, so sub-replicas see the same stream
//! - Sends `REPLCONF ACK` periodically
//! - Reconnects with exponential backoff
//!
//! The upstream's offset is tracked by the link itself. Local offsets only
//! move forward, so after a full resync from an upstream with a shorter
//! history the two differ by a constant.

use crate::connection::Connection;
use crate::replication::protocol::{SyncReply, SyncRequest, encode_ack};
use crate::replication::run_id::RunId;
use crate::replication::snapshot::SnapshotSink;
use crate::replication::state::Replication;
use crate::{Error, Result};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Local side of the replicated stream.
///
/// `apply` receives one command of the upstream stream together with its
/// exact encoding. Implementations must apply the command and hand `raw` to
/// [`Replication::feed_upstream`] in one step with respect to
/// [`SnapshotSink`] and snapshot production, so that a local snapshot never
/// contains a write its offset does not cover.
pub trait ReplicaApplier: SnapshotSink {
    /// Apply `args` against `db`, the database selected in the stream after
    /// this command
    fn apply(&self, db: u32, args: &[Bytes], raw: &[u8]) -> Result<()>;
}

/// Background task following an upstream master
pub struct UpstreamLink {
    repl: Arc<Replication>,
    applier: Arc<dyn ReplicaApplier>,
    master_run_id: Option<RunId>,
    upstream_offset: u64,
}

enum Wake {
    Shutdown,
    Retarget,
    Retry,
}

impl UpstreamLink {
    /// Create a link applying the upstream stream through `applier`
    pub fn new(repl: Arc<Replication>, applier: Arc<dyn ReplicaApplier>) -> Self {
        Self {
            repl,
            applier,
            master_run_id: None,
            upstream_offset: 0,
        }
    }

    /// Run until shutdown
    pub async fn run(mut self) -> Result<()> {
        let shutdown = self.repl.shutdown_token().clone();
        let mut target_rx = self.repl.subscribe_upstream();

        loop {
            let target = target_rx.borrow_and_update().clone();
            // Local writes may have happened since the last session, even if
            // the target looks unchanged.
            self.master_run_id = None;
            self.upstream_offset = 0;
            let Some(addr) = target else {
                self.repl.update_link(|link| link.connected = false);
                tokio::select! {
                    _ = shutdown.cancelled() => return Ok(()),
                    changed = target_rx.changed() => {
                        if changed.is_err() {
                            return Ok(());
                        }
                    }
                }
                continue;
            };

            tracing::info!("Following upstream master {}", addr);
            let mut delay = INITIAL_RECONNECT_DELAY;

            loop {
                let mut synced = false;
                let wake = tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => Wake::Shutdown,
                    changed = target_rx.changed() => {
                        if changed.is_err() { Wake::Shutdown } else { Wake::Retarget }
                    }
                    result = self.session(&addr, &mut synced) => {
                        match result {
                            Ok(()) => tracing::info!("Upstream {} closed the connection", addr),
                            Err(e) => tracing::warn!("Upstream {} link failed: {}", addr, e),
                        }
                        Wake::Retry
                    }
                };

                self.repl.update_link(|link| link.connected = false);
                match wake {
                    Wake::Shutdown => return Ok(()),
                    Wake::Retarget => break,
                    Wake::Retry => {}
                }

                if synced {
                    delay = INITIAL_RECONNECT_DELAY;
                }
                self.repl.update_link(|link| link.reconnects += 1);
                tracing::info!("Reconnecting to {} in {:?}", addr, delay);

                match Self::backoff(delay, &shutdown, &mut target_rx).await {
                    Wake::Shutdown => return Ok(()),
                    Wake::Retarget => break,
                    Wake::Retry => {}
                }
                delay = std::cmp::min(delay * 2, self.repl.config().max_reconnect_delay);
            }
        }
    }

    async fn backoff(
        delay: Duration,
        shutdown: &tokio_util::sync::CancellationToken,
        target_rx: &mut watch::Receiver<Option<String>>,
    ) -> Wake {
        tokio::select! {
            _ = shutdown.cancelled() => Wake::Shutdown,
            changed = target_rx.changed() => {
                if changed.is_err() { Wake::Shutdown } else { Wake::Retarget }
            }
            _ = tokio::time::sleep(delay) => Wake::Retry,
        }
    }

    /// One connection: handshake, optional snapshot, then streaming
    async fn session(&mut self, addr: &str, synced: &mut bool) -> Result<()> {
        let stream = tokio::time::timeout(self.repl.config().connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::replication(format!("Connection to {} timed out", addr)))??;
        let mut conn = Connection::new(stream);

        let request = match &self.master_run_id {
            Some(run_id) => SyncRequest::resume(run_id, self.upstream_offset),
            None => SyncRequest::fresh(),
        };
        conn.write_raw(&request.encode()).await?;

        let reply = conn
            .read_frame()
            .await?
            .ok_or_else(|| Error::replication("Upstream closed during handshake"))?;

        let mut db = match SyncReply::parse(&reply)? {
            SyncReply::Continue { run_id } => {
                if let Some(run_id) = run_id.as_deref().and_then(RunId::parse) {
                    self.master_run_id = Some(run_id);
                }
                tracing::info!(
                    "Partial resync with {} continues at upstream offset {}",
                    addr,
                    self.upstream_offset
                );
                self.repl.last_select_db().unwrap_or(0)
            }
            SyncReply::FullResync { run_id, offset } => {
                tracing::info!("Full resync from {} at offset {}", addr, offset);
                let payload = conn.read_bulk_payload().await?;
                let db = self.applier.restore(&payload, offset)?;
                self.master_run_id = RunId::parse(&run_id);
                self.upstream_offset = offset;
                tracing::info!(
                    "Snapshot of {} bytes restored, local offset now {}",
                    payload.len(),
                    self.repl.master_offset()
                );
                db.unwrap_or(0)
            }
        };

        *synced = true;
        self.repl.update_link(|link| {
            link.connected = true;
            link.master_run_id = self.master_run_id.as_ref().map(RunId::to_string);
            link.master_offset = self.upstream_offset;
        });

        let mut ack = tokio::time::interval(self.repl.config().ack_interval);
        ack.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ack.tick() => {
                    conn.write_raw(&encode_ack(self.upstream_offset)).await?;
                    let offset = self.upstream_offset;
                    self.repl.update_link(|link| link.master_offset = offset);
                }
                frame = conn.read_frame_raw() => {
                    let Some((frame, raw)) = frame? else {
                        return Ok(());
                    };
                    let args = frame.into_args()?;
                    if args[0].eq_ignore_ascii_case(b"SELECT") {
                        db = parse_select(&args)?;
                    }
                    self.applier.apply(db, &args, &raw)?;
                    self.upstream_offset += raw.len() as u64;
                }
            }
        }
    }
}

fn parse_select(args: &[Bytes]) -> Result<u32> {
    args.get(1)
        .and_then(|raw| std::str::from_utf8(raw).ok())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::protocol("invalid SELECT in replication stream"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_select() {
        let args = vec![Bytes::from_static(b"SELECT"), Bytes::from_static(b"3")];
        assert_eq!(parse_select(&args).unwrap(), 3);

        let args = vec![Bytes::from_static(b"SELECT"), Bytes::from_static(b"x")];
        assert!(parse_select(&args).is_err());
        assert!(parse_select(&args[..1]).is_err());
    }
}
