use crate::connection::Connection;
use crate::handler::{Session, check_args};
use crate::replication::{ConnId, Counters, SyncRequest};
use crate::resp::Frame;
use crate::service::{ServiceContext, sync};
use crate::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::net::TcpStream;

/// Keeps the active-clients gauge in step with the worker's lifetime
struct ActiveClient {
    counters: Arc<Counters>,
}

impl ActiveClient {
    fn enter(counters: Arc<Counters>) -> Self {
        counters.clients.fetch_add(1, Ordering::Relaxed);
        Self { counters }
    }
}

impl Drop for ActiveClient {
    fn drop(&mut self) {
        self.counters.clients.fetch_sub(1, Ordering::Relaxed);
    }
}

pub(crate) async fn run(ctx: Arc<ServiceContext>, socket: TcpStream) {
    let _active = ActiveClient::enter(ctx.repl.counters().clone());
    let mut conn = Connection::new(socket);
    let id = ctx.repl.next_conn_id();
    let peer = conn
        .peer_addr()
        .map_or_else(|| "?".to_string(), |a| a.to_string());
    tracing::info!("{} connected from {}", id, peer);

    match serve(&ctx, &mut conn, id).await {
        Ok(()) => tracing::info!("{} closed", id),
        Err(e) if e.is_disconnect() => tracing::info!("{} disconnected: {}", id, e),
        Err(Error::Cancelled) => tracing::info!("{} closed by shutdown", id),
        Err(e) => tracing::warn!("{} closed with error: {}", id, e),
    }
}

async fn serve(ctx: &ServiceContext, conn: &mut Connection, id: ConnId) -> Result<()> {
    let counters = ctx.repl.counters();
    let shutdown = ctx.repl.shutdown_token();
    let mut session = Session::new(id, conn.peer_addr(), ctx.repl.clone());

    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(()),
            frame = read_command(conn, ctx.config.conn_timeout) => frame?,
        };
        let Some(frame) = frame else {
            return Ok(());
        };

        let args = frame.into_args()?;
        Counters::incr(&counters.commands);

        if let Err(e) = check_args(&args) {
            Counters::incr(&counters.commands_failed);
            conn.write_frame(&e.into_frame()).await?;
            continue;
        }

        if SyncRequest::is_sync_command(&args[0]) {
            match SyncRequest::parse(&args) {
                Ok(request) => return sync::serve_replica(ctx, conn, id, request).await,
                Err(e) => {
                    Counters::incr(&counters.commands_failed);
                    conn.write_frame(&Frame::err(e)).await?;
                    continue;
                }
            }
        }

        let reply = match ctx.handler.dispatch(&mut session, &args) {
            Ok(reply) => reply,
            Err(e) => {
                Counters::incr(&counters.commands_failed);
                tracing::debug!("{} command failed: {}", id, e);
                e.into_frame()
            }
        };
        conn.write_frame(&reply).await?;
    }
}

async fn read_command(conn: &mut Connection, idle: Duration) -> Result<Option<Frame>> {
    if idle.is_zero() {
        return conn.read_frame().await;
    }
    match tokio::time::timeout(idle, conn.read_frame()).await {
        Ok(frame) => frame,
        Err(_) => Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("idle for {:?}", idle),
        ))),
    }
}
