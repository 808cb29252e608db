//! Replica side of a connection: sync handshake and live streaming

use crate::connection::Connection;
use crate::replication::protocol::{parse_ack, snapshot_header};
use crate::replication::{ConnId, Counters, SlaveHandle, SyncDecision, SyncReply, SyncRequest};
use crate::service::ServiceContext;
use crate::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::Ordering;

const SNAPSHOT_CHUNK: usize = 64 * 1024;

/// Bytes of a snapshot transfer not yet written; whatever is left is taken
/// back off the gauge when the transfer ends, successful or not
struct PendingSnapshot {
    counters: Arc<Counters>,
    remaining: i64,
}

impl PendingSnapshot {
    fn start(counters: Arc<Counters>, len: usize) -> Self {
        let remaining = len as i64;
        counters
            .sync_snapshot_remains
            .fetch_add(remaining, Ordering::Relaxed);
        Self {
            counters,
            remaining,
        }
    }

    fn sent(&mut self, n: usize) {
        let n = n as i64;
        self.remaining -= n;
        self.counters
            .sync_snapshot_remains
            .fetch_sub(n, Ordering::Relaxed);
    }
}

impl Drop for PendingSnapshot {
    fn drop(&mut self) {
        self.counters
            .sync_snapshot_remains
            .fetch_sub(self.remaining, Ordering::Relaxed);
    }
}

pub(crate) async fn serve_replica(
    ctx: &ServiceContext,
    conn: &mut Connection,
    id: ConnId,
    request: SyncRequest,
) -> Result<()> {
    let repl = &ctx.repl;
    let counters = repl.counters();
    let decision = repl.request_sync(
        id,
        conn.peer_addr(),
        request.run_id.as_deref(),
        request.offset,
    );

    let handle = match decision {
        SyncDecision::Partial { handle, catch_up } => {
            tracing::info!(
                "{} partial resync from offset {} ({} bytes behind)",
                id,
                handle.next_offset() - catch_up.len() as u64,
                catch_up.len()
            );
            let reply = SyncReply::Continue {
                run_id: Some(repl.run_id().to_string()),
            };
            conn.write_raw(&reply.encode()).await?;
            if !catch_up.is_empty() {
                conn.write_raw(&catch_up).await?;
                Counters::add(&counters.sync_total_bytes, catch_up.len() as u64);
            }
            handle
        }
        SyncDecision::Full { reason } => {
            tracing::info!("{} full resync needed: {:?}", id, reason);
            full_sync(ctx, conn, id).await?
        }
    };

    stream(conn, handle, counters).await
}

async fn full_sync(ctx: &ServiceContext, conn: &mut Connection, id: ConnId) -> Result<SlaveHandle> {
    let repl = &ctx.repl;
    let counters = repl.counters();

    let permit = tokio::select! {
        permit = repl.acquire_full_sync() => permit?,
        err = watch_peer(conn) => return Err(err),
    };

    let snapshot = ctx.snapshots.snapshot()?;
    let handle = repl.register_slave(id, conn.peer_addr(), snapshot.offset)?;
    tracing::info!(
        "{} sending snapshot of {} bytes at offset {}",
        id,
        snapshot.payload.len(),
        snapshot.offset
    );

    let reply = SyncReply::FullResync {
        run_id: repl.run_id().to_string(),
        offset: snapshot.offset,
    };
    let header = snapshot_header(snapshot.payload.len());
    conn.write_raw(&reply.encode()).await?;
    conn.write_raw(&header).await?;
    Counters::add(&counters.sync_total_bytes, header.len() as u64);

    let mut pending = PendingSnapshot::start(counters.clone(), snapshot.payload.len());
    for chunk in snapshot.payload.chunks(SNAPSHOT_CHUNK) {
        conn.write_raw(chunk).await?;
        pending.sent(chunk.len());
        Counters::add(&counters.sync_total_bytes, chunk.len() as u64);
    }
    drop(pending);
    permit.release();

    tracing::info!("{} snapshot delivered", id);
    Ok(handle)
}

/// Resolves with an error once the peer disconnects; frames received in the
/// meantime are discarded
async fn watch_peer(conn: &mut Connection) -> Error {
    loop {
        match conn.read_frame().await {
            Ok(Some(_)) => continue,
            Ok(None) => {
                return Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "replica left while waiting for a full resync slot",
                ));
            }
            Err(e) => return e,
        }
    }
}

/// Deliver `[next_offset, master_offset)` on every wake-up until the replica
/// disconnects, is dropped from the registry, or the server shuts down
async fn stream(conn: &mut Connection, mut handle: SlaveHandle, counters: &Counters) -> Result<()> {
    loop {
        while let Some(data) = handle.pull()? {
            conn.write_raw(&data).await?;
            Counters::add(&counters.sync_total_bytes, data.len() as u64);
        }

        tokio::select! {
            _ = handle.notified() => {}
            _ = handle.closed() => return Err(Error::Cancelled),
            frame = conn.read_frame() => {
                let Some(frame) = frame? else {
                    return Ok(());
                };
                let args = frame.into_args()?;
                match parse_ack(&args) {
                    Some(offset) => handle.record_ack(offset),
                    None => tracing::debug!(
                        "{} ignoring {} from replica",
                        handle.id(),
                        String::from_utf8_lossy(&args[0])
                    ),
                }
            }
        }
    }
}
