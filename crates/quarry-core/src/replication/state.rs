//! Master-side replication state
//!
//! One [`Replication`] exists per process. It owns:
//! - the backlog ring and the offsets derived from it
//! - the last database selected in the stream
//! - the registry of live replica connections and their wake-up signals
//! - the full-sync gate and the shutdown token
//!
//! All offset, backlog and registry mutations happen under one exclusive
//! lock; delivery reads take it shared. The lock is a `parking_lot` lock and
//! is never held across an await point.

use crate::replication::backlog::BacklogBuffer;
use crate::replication::config::{ReplicationConfig, ReplicationRole};
use crate::replication::counters::Counters;
use crate::replication::gate::{FullSyncGate, FullSyncPermit};
use crate::replication::run_id::RunId;
use crate::replication::slave::{ConnId, SlaveHandle};
use crate::resp::encode_command;
use crate::{Error, Result};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;

/// Why a sync request could not be served from the backlog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FullSyncReason {
    /// `SYNC` or `PSYNC ? -1`: the replica has no history
    NoHistory,
    /// The replica's history belongs to another master instance
    RunIdMismatch,
    /// The requested offset has been evicted
    OffsetEvicted {
        /// Requested offset
        requested: u64,
        /// Oldest retained offset
        backlog_offset: u64,
    },
    /// The requested offset is ahead of anything written
    OffsetAhead {
        /// Requested offset
        requested: u64,
        /// Current master offset
        master_offset: u64,
    },
    /// Reading the catch-up range failed
    BacklogMiss,
}

/// Outcome of [`Replication::request_sync`]
#[derive(Debug)]
pub enum SyncDecision {
    /// Continue from the requested offset
    Partial {
        /// Registration, positioned after `catch_up`
        handle: SlaveHandle,
        /// Bytes `[requested, master_offset)` to send before live data
        catch_up: Bytes,
    },
    /// A snapshot transfer is needed
    Full {
        /// Why partial resync was refused
        reason: FullSyncReason,
    },
}

/// Registered replica as seen by status queries
#[derive(Debug, Clone)]
pub struct SlaveInfo {
    /// Connection id
    pub id: ConnId,
    /// Remote address
    pub addr: Option<SocketAddr>,
    /// Offset the replica's stream started at
    pub start_offset: u64,
    /// Last offset acknowledged with `REPLCONF ACK`
    pub ack_offset: u64,
    /// Time since registration
    pub connected_for: std::time::Duration,
}

/// Upstream link state, maintained by the link task
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkStatus {
    /// Handshake completed and the stream is live
    pub connected: bool,
    /// Run id of the upstream master last synced from
    pub master_run_id: Option<String>,
    /// Upstream offset processed, as of the last acknowledgement
    pub master_offset: u64,
    /// Reconnect attempts since start
    pub reconnects: u64,
}

/// Replication status snapshot
#[derive(Debug, Clone)]
pub struct ReplicationInfo {
    /// This server's run id
    pub run_id: String,
    /// Current role
    pub role: ReplicationRole,
    /// Upstream address when acting as a replica
    pub upstream: Option<String>,
    /// Offset one past the newest byte
    pub master_offset: u64,
    /// Oldest retained offset
    pub backlog_offset: u64,
    /// Backlog capacity in bytes
    pub backlog_size: usize,
    /// Bytes currently retained
    pub backlog_len: usize,
    /// Full resyncs currently holding a gate slot
    pub full_syncs_in_progress: usize,
    /// Registered replicas
    pub slaves: Vec<SlaveInfo>,
    /// Upstream link state
    pub link: LinkStatus,
}

pub(crate) struct SlaveEntry {
    pub(crate) notify: Arc<Notify>,
    pub(crate) closed: CancellationToken,
    pub(crate) ack_offset: Arc<AtomicU64>,
    addr: Option<SocketAddr>,
    start_offset: u64,
    registered_at: Instant,
}

struct ReplState {
    backlog: BacklogBuffer,
    last_select_db: Option<u32>,
    slaves: HashMap<ConnId, SlaveEntry>,
    closed: bool,
}

/// Replication coordinator
pub struct Replication {
    run_id: RunId,
    config: ReplicationConfig,
    state: RwLock<ReplState>,
    gate: FullSyncGate,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
    upstream: watch::Sender<Option<String>>,
    link: Mutex<LinkStatus>,
    next_conn_id: AtomicU64,
}

impl std::fmt::Debug for Replication {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replication")
            .field("run_id", &self.run_id)
            .field("master_offset", &self.master_offset())
            .finish_non_exhaustive()
    }
}

impl Replication {
    /// Create replication state with a fresh random run id
    pub fn new(config: ReplicationConfig, counters: Arc<Counters>) -> Self {
        let backlog = BacklogBuffer::new(config.backlog_size.max(1));
        let (upstream, _) = watch::channel(config.upstream.clone());

        Self {
            run_id: RunId::random(),
            gate: FullSyncGate::new(config.full_sync_limit),
            config,
            state: RwLock::new(ReplState {
                backlog,
                last_select_db: None,
                slaves: HashMap::new(),
                closed: false,
            }),
            counters,
            shutdown: CancellationToken::new(),
            upstream,
            link: Mutex::new(LinkStatus::default()),
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Start the stream at `offset` instead of zero (seeded from the binlog)
    pub fn with_start_offset(self, offset: u64) -> Self {
        self.state.write().backlog.reset(offset);
        self
    }

    /// This server's run id
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Configuration
    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Shared counters
    pub fn counters(&self) -> &Arc<Counters> {
        &self.counters
    }

    /// Process-wide shutdown signal
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Allocate an id for a new connection
    pub fn next_conn_id(&self) -> ConnId {
        ConnId(self.next_conn_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Offset one past the newest byte
    pub fn master_offset(&self) -> u64 {
        self.state.read().backlog.master_offset()
    }

    /// Oldest retained offset
    pub fn backlog_offset(&self) -> u64 {
        self.state.read().backlog.backlog_offset()
    }

    /// Database last selected in the stream
    pub fn last_select_db(&self) -> Option<u32> {
        self.state.read().last_select_db
    }

    /// Number of registered replicas
    pub fn slave_count(&self) -> usize {
        self.state.read().slaves.len()
    }

    /// Current role
    pub fn role(&self) -> ReplicationRole {
        if self.upstream.borrow().is_some() {
            ReplicationRole::Replica
        } else {
            ReplicationRole::Master
        }
    }

    /// True while following an upstream master
    pub fn is_replica(&self) -> bool {
        self.role() == ReplicationRole::Replica
    }

    /// Point the upstream link at `target`, or detach it with `None`
    pub fn set_upstream(&self, target: Option<String>) {
        self.upstream.send_replace(target);
    }

    /// Watch upstream target changes
    pub fn subscribe_upstream(&self) -> watch::Receiver<Option<String>> {
        self.upstream.subscribe()
    }

    /// Upstream link state
    pub fn link_status(&self) -> LinkStatus {
        self.link.lock().clone()
    }

    pub(crate) fn update_link(&self, f: impl FnOnce(&mut LinkStatus)) {
        f(&mut *self.link.lock());
    }

    /// Record one replicated write issued against `db`.
    ///
    /// Emits a `SELECT` first when the stream is positioned on another
    /// database, then wakes every registered replica.
    pub fn propagate(&self, db: u32, command: &[u8]) {
        let notifiers = {
            let mut state = self.state.write();
            if state.closed {
                return;
            }
            if state.last_select_db != Some(db) {
                let db_arg = db.to_string();
                let select = encode_command(&["SELECT", db_arg.as_str()]);
                state.backlog.append(&select);
                state.last_select_db = Some(db);
            }
            state.backlog.append(command);
            Self::notifiers(&state)
        };

        for notify in notifiers {
            notify.notify_one();
        }
    }

    /// Append bytes received from an upstream master verbatim, so offsets
    /// stay identical along a replication chain. `stream_db` is the database
    /// selected in the stream after these bytes.
    pub fn feed_upstream(&self, raw: &[u8], stream_db: u32) {
        let notifiers = {
            let mut state = self.state.write();
            if state.closed {
                return;
            }
            state.backlog.append(raw);
            state.last_select_db = Some(stream_db);
            Self::notifiers(&state)
        };

        for notify in notifiers {
            notify.notify_one();
        }
    }

    /// Start a new history after a full resync from an upstream whose
    /// snapshot is consistent with `upstream_offset`. Returns the local
    /// offset the new history starts at.
    ///
    /// Local offsets never go backwards: the new history starts at
    /// `upstream_offset` when that is ahead of everything written so far,
    /// otherwise one past the current master offset. Either way every offset
    /// of the discarded history falls below the backlog and can only be
    /// served by a full resync. Existing sub-replicas are disconnected.
    pub fn reset_offset(&self, upstream_offset: u64, stream_db: Option<u32>) -> u64 {
        let (offset, dropped) = {
            let mut state = self.state.write();
            let current = state.backlog.master_offset();
            let offset = if upstream_offset > current {
                upstream_offset
            } else {
                current + 1
            };
            state.backlog.reset(offset);
            state.last_select_db = stream_db;
            let dropped = state.slaves.drain().map(|(_, s)| s.closed).collect::<Vec<_>>();
            (offset, dropped)
        };

        tracing::info!(
            "New history at offset {} (upstream offset {}), disconnecting {} sub-replicas",
            offset,
            upstream_offset,
            dropped.len()
        );
        for closed in dropped {
            closed.cancel();
        }
        offset
    }

    /// Replication offset and selected database a snapshot taken now would
    /// correspond to. Callers must hold whatever lock orders their writes
    /// against [`Replication::propagate`].
    pub fn snapshot_point(&self) -> (u64, Option<u32>) {
        let state = self.state.read();
        (state.backlog.master_offset(), state.last_select_db)
    }

    /// Decide between partial and full resync for a replica.
    ///
    /// On partial resync the catch-up read and the registration happen in
    /// one critical section, so no write can fall between them.
    pub fn request_sync(
        self: &Arc<Self>,
        conn: ConnId,
        addr: Option<SocketAddr>,
        replica_run_id: Option<&str>,
        requested_offset: Option<u64>,
    ) -> SyncDecision {
        let decision = {
            let mut state = self.state.write();
            match self.check_partial(&state, replica_run_id, requested_offset) {
                Err(reason) => SyncDecision::Full { reason },
                Ok(from) => match state.backlog.read_from(from) {
                    Ok(catch_up) => {
                        let start = state.backlog.master_offset();
                        let handle = self.register_locked(&mut state, conn, addr, start);
                        SyncDecision::Partial { handle, catch_up }
                    }
                    Err(e) => {
                        tracing::warn!("Partial resync for {} failed: {}", conn, e);
                        Counters::incr(&self.counters.sync_partial_err);
                        SyncDecision::Full {
                            reason: FullSyncReason::BacklogMiss,
                        }
                    }
                },
            }
        };

        match &decision {
            SyncDecision::Partial { catch_up, .. } => {
                Counters::incr(&self.counters.sync_partial_ok);
                Counters::add(&self.counters.sync_cache_bytes, catch_up.len() as u64);
            }
            SyncDecision::Full { .. } => Counters::incr(&self.counters.sync_full),
        }

        decision
    }

    fn check_partial(
        &self,
        state: &ReplState,
        replica_run_id: Option<&str>,
        requested_offset: Option<u64>,
    ) -> std::result::Result<u64, FullSyncReason> {
        let (Some(run_id), Some(requested)) = (replica_run_id, requested_offset) else {
            return Err(FullSyncReason::NoHistory);
        };
        if self.run_id != *run_id {
            return Err(FullSyncReason::RunIdMismatch);
        }

        let backlog_offset = state.backlog.backlog_offset();
        let master_offset = state.backlog.master_offset();
        if requested < backlog_offset {
            return Err(FullSyncReason::OffsetEvicted {
                requested,
                backlog_offset,
            });
        }
        if requested > master_offset {
            return Err(FullSyncReason::OffsetAhead {
                requested,
                master_offset,
            });
        }
        Ok(requested)
    }

    /// Wait for a full-sync slot. Shutdown aborts the wait; callers race it
    /// against their own connection to give up when the peer leaves.
    pub async fn acquire_full_sync(&self) -> Result<FullSyncPermit> {
        self.gate.acquire(&self.shutdown).await
    }

    /// The full-sync gate
    pub fn gate(&self) -> &FullSyncGate {
        &self.gate
    }

    /// Register a replica whose stream starts at `start_offset` (the offset
    /// of the snapshot it received). Writes after that offset are replayed
    /// from the backlog, so the start must still be retained.
    pub fn register_slave(
        self: &Arc<Self>,
        conn: ConnId,
        addr: Option<SocketAddr>,
        start_offset: u64,
    ) -> Result<SlaveHandle> {
        let mut state = self.state.write();
        if state.closed {
            return Err(Error::Cancelled);
        }
        if !state.backlog.contains(start_offset) {
            return Err(Error::BacklogMiss {
                from: start_offset,
                to: state.backlog.master_offset(),
                backlog_offset: state.backlog.backlog_offset(),
                master_offset: state.backlog.master_offset(),
            });
        }
        Ok(self.register_locked(&mut state, conn, addr, start_offset))
    }

    fn register_locked(
        self: &Arc<Self>,
        state: &mut ReplState,
        conn: ConnId,
        addr: Option<SocketAddr>,
        start_offset: u64,
    ) -> SlaveHandle {
        let entry = SlaveEntry {
            notify: Arc::new(Notify::new()),
            closed: self.shutdown.child_token(),
            ack_offset: Arc::new(AtomicU64::new(start_offset)),
            addr,
            start_offset,
            registered_at: Instant::now(),
        };
        let handle = SlaveHandle::new(self.clone(), conn, start_offset, &entry);
        if state.closed {
            entry.closed.cancel();
        }
        state.slaves.insert(conn, entry);
        tracing::info!(
            "Replica {} registered at offset {} ({} connected)",
            conn,
            start_offset,
            state.slaves.len()
        );
        handle
    }

    /// Remove a replica; returns false if it was not registered
    pub(crate) fn unregister_slave(&self, conn: ConnId) -> bool {
        let removed = self.state.write().slaves.remove(&conn);
        match removed {
            Some(entry) => {
                entry.closed.cancel();
                tracing::info!("Replica {} unregistered", conn);
                true
            }
            None => false,
        }
    }

    /// Read `[from, master_offset)` for delivery. Returns the bytes and the
    /// new end offset.
    pub fn read_from(&self, from: u64) -> Result<(Bytes, u64)> {
        let state = self.state.read();
        let data = state.backlog.read_from(from)?;
        Ok((data, state.backlog.master_offset()))
    }

    /// Read an explicit range from the backlog
    pub fn read(&self, from: u64, to: u64) -> Result<Bytes> {
        self.state.read().backlog.read(from, to)
    }

    /// Status snapshot for INFO
    pub fn info(&self) -> ReplicationInfo {
        let state = self.state.read();
        ReplicationInfo {
            run_id: self.run_id.to_string(),
            role: self.role(),
            upstream: self.upstream.borrow().clone(),
            master_offset: state.backlog.master_offset(),
            backlog_offset: state.backlog.backlog_offset(),
            backlog_size: state.backlog.capacity(),
            backlog_len: state.backlog.len(),
            full_syncs_in_progress: self.gate.in_use(),
            slaves: state
                .slaves
                .iter()
                .map(|(id, s)| SlaveInfo {
                    id: *id,
                    addr: s.addr,
                    start_offset: s.start_offset,
                    ack_offset: s.ack_offset.load(Ordering::Relaxed),
                    connected_for: s.registered_at.elapsed(),
                })
                .collect(),
            link: self.link_status(),
        }
    }

    /// Stop replication: wake every worker, clear the replica set and abort
    /// queued full syncs. Idempotent.
    pub fn shutdown(&self) {
        let dropped = {
            let mut state = self.state.write();
            state.closed = true;
            state.slaves.drain().count()
        };
        self.shutdown.cancel();
        self.gate.close();
        tracing::info!("Replication shut down ({} replicas dropped)", dropped);
    }

    /// Whether shutdown has started
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn notifiers(state: &ReplState) -> Vec<Arc<Notify>> {
        state.slaves.values().map(|s| s.notify.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn replication(backlog_size: usize) -> Arc<Replication> {
        let config = ReplicationConfig::master().with_backlog_size(backlog_size);
        Arc::new(Replication::new(config, Arc::new(Counters::default())))
    }

    fn run_id(repl: &Replication) -> String {
        repl.run_id().to_string()
    }

    #[test]
    fn test_propagate_emits_select_on_db_change() {
        let repl = replication(1024);
        let set = encode_command(&["SET", "k", "v"]);

        repl.propagate(0, &set);
        repl.propagate(0, &set);
        repl.propagate(2, &set);

        let stream = repl.read(0, repl.master_offset()).unwrap();
        let mut expected = Vec::new();
        expected.extend_from_slice(&encode_command(&["SELECT", "0"]));
        expected.extend_from_slice(&set);
        expected.extend_from_slice(&set);
        expected.extend_from_slice(&encode_command(&["SELECT", "2"]));
        expected.extend_from_slice(&set);
        assert_eq!(&stream[..], &expected[..]);
        assert_eq!(repl.last_select_db(), Some(2));
    }

    #[test]
    fn test_sync_decision_scenario() {
        let repl = replication(8);
        let id = run_id(&repl);

        repl.feed_upstream(b"ABCDEFGH", 0);
        match repl.request_sync(ConnId(1), None, Some(id.as_str()), Some(0)) {
            SyncDecision::Partial { catch_up, handle } => {
                assert_eq!(&catch_up[..], b"ABCDEFGH");
                assert_eq!(handle.next_offset(), 8);
            }
            other => panic!("expected partial resync, got {:?}", other),
        }

        repl.feed_upstream(b"IJ", 0);
        assert_eq!(repl.backlog_offset(), 2);

        assert!(matches!(
            repl.request_sync(ConnId(2), None, Some(id.as_str()), Some(0)),
            SyncDecision::Full {
                reason: FullSyncReason::OffsetEvicted { .. }
            }
        ));

        match repl.request_sync(ConnId(3), None, Some(id.as_str()), Some(4)) {
            SyncDecision::Partial { catch_up, .. } => assert_eq!(&catch_up[..], b"EFGHIJ"),
            other => panic!("expected partial resync, got {:?}", other),
        }

        let counters = repl.counters().snapshot();
        assert_eq!(counters.sync_partial_ok, 2);
        assert_eq!(counters.sync_full, 1);
        assert_eq!(counters.sync_cache_bytes, 14);
    }

    #[test]
    fn test_full_sync_reasons() {
        let repl = replication(64);
        let id = run_id(&repl);
        repl.feed_upstream(b"0123456789", 0);

        assert!(matches!(
            repl.request_sync(ConnId(1), None, None, None),
            SyncDecision::Full {
                reason: FullSyncReason::NoHistory
            }
        ));
        assert!(matches!(
            repl.request_sync(ConnId(2), None, Some("0".repeat(40).as_str()), Some(5)),
            SyncDecision::Full {
                reason: FullSyncReason::RunIdMismatch
            }
        ));
        assert!(matches!(
            repl.request_sync(ConnId(3), None, Some(id.as_str()), Some(11)),
            SyncDecision::Full {
                reason: FullSyncReason::OffsetAhead { .. }
            }
        ));
        assert_eq!(repl.counters().snapshot().sync_full, 3);
        assert_eq!(repl.slave_count(), 0);
    }

    #[test]
    fn test_partial_at_master_offset_has_empty_catch_up() {
        let repl = replication(64);
        let id = run_id(&repl);
        repl.feed_upstream(b"abc", 0);

        match repl.request_sync(ConnId(1), None, Some(id.as_str()), Some(3)) {
            SyncDecision::Partial { catch_up, .. } => assert!(catch_up.is_empty()),
            other => panic!("expected partial resync, got {:?}", other),
        }
        assert_eq!(repl.slave_count(), 1);
    }

    #[test]
    fn test_register_rejects_evicted_start() {
        let repl = replication(4);
        repl.feed_upstream(b"abcdef", 0);

        assert!(matches!(
            repl.register_slave(ConnId(1), None, 1),
            Err(Error::BacklogMiss { .. })
        ));
        let handle = repl.register_slave(ConnId(2), None, 2).unwrap();
        assert_eq!(handle.next_offset(), 2);
    }

    #[test]
    fn test_handle_drop_unregisters_once() {
        let repl = replication(64);
        let handle = repl.register_slave(ConnId(9), None, 0).unwrap();
        assert_eq!(repl.slave_count(), 1);

        drop(handle);
        assert_eq!(repl.slave_count(), 0);
        assert!(!repl.unregister_slave(ConnId(9)));
    }

    #[test]
    fn test_start_offset_seed() {
        let config = ReplicationConfig::master().with_backlog_size(16);
        let repl = Replication::new(config, Arc::new(Counters::default())).with_start_offset(500);
        assert_eq!(repl.master_offset(), 500);
        assert_eq!(repl.backlog_offset(), 500);
    }

    #[test]
    fn test_reset_offset_drops_sub_replicas() {
        let repl = replication(64);
        repl.feed_upstream(b"abc", 0);
        let handle = repl.register_slave(ConnId(1), None, 0).unwrap();

        assert_eq!(repl.reset_offset(1000, Some(3)), 1000);
        assert_eq!(repl.slave_count(), 0);
        assert!(handle.is_closed());
        assert_eq!(repl.master_offset(), 1000);
        assert_eq!(repl.last_select_db(), Some(3));
    }

    #[test]
    fn test_reset_to_lower_offset_keeps_offsets_monotonic() {
        let repl = replication(4096);
        let id = run_id(&repl);
        repl.feed_upstream(&[b'A'; 1000], 0);

        assert_eq!(repl.reset_offset(50, None), 1001);
        assert_eq!(repl.master_offset(), 1001);
        repl.feed_upstream(&[b'B'; 2000], 0);

        for old in [0, 50, 1000] {
            assert!(matches!(
                repl.request_sync(ConnId(old), None, Some(id.as_str()), Some(old)),
                SyncDecision::Full {
                    reason: FullSyncReason::OffsetEvicted { .. }
                }
            ));
        }
        match repl.request_sync(ConnId(1), None, Some(id.as_str()), Some(1001)) {
            SyncDecision::Partial { catch_up, .. } => assert_eq!(&catch_up[..], &[b'B'; 2000][..]),
            other => panic!("expected partial resync, got {:?}", other),
        }
    }

    #[test]
    fn test_reset_at_current_offset_discards_history() {
        let repl = replication(64);
        let id = run_id(&repl);
        repl.feed_upstream(b"abc", 0);

        assert_eq!(repl.reset_offset(3, Some(0)), 4);
        assert!(matches!(
            repl.request_sync(ConnId(1), None, Some(id.as_str()), Some(3)),
            SyncDecision::Full {
                reason: FullSyncReason::OffsetEvicted { .. }
            }
        ));
    }

    #[tokio::test]
    async fn test_shutdown_aborts_queued_full_sync() {
        let config = ReplicationConfig::master().with_full_sync_limit(1);
        let repl = Arc::new(Replication::new(config, Arc::new(Counters::default())));

        let held = repl.acquire_full_sync().await.unwrap();
        let waiter = {
            let repl = repl.clone();
            tokio::spawn(async move { repl.acquire_full_sync().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        repl.shutdown();
        assert!(matches!(waiter.await.unwrap(), Err(Error::Cancelled)));
        drop(held);
        assert!(repl.is_shut_down());
    }

    #[test]
    fn test_role_follows_upstream_target() {
        let repl = replication(64);
        assert_eq!(repl.role(), ReplicationRole::Master);
        repl.set_upstream(Some("127.0.0.1:7000".into()));
        assert!(repl.is_replica());
        assert_eq!(repl.info().upstream.as_deref(), Some("127.0.0.1:7000"));
        repl.set_upstream(None);
        assert_eq!(repl.role(), ReplicationRole::Master);
    }
}
