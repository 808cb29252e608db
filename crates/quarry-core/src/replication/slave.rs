//! Per-replica registration handle

use crate::Result;
use crate::replication::state::{Replication, SlaveEntry};
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Connection identifier, unique for the lifetime of the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A registered replica.
///
/// The handle tracks how far this replica's stream has been delivered. Its
/// registration is removed when the handle is dropped, so every exit path of
/// the owning worker deregisters exactly once.
pub struct SlaveHandle {
    id: ConnId,
    repl: Arc<Replication>,
    notify: Arc<Notify>,
    closed: CancellationToken,
    ack_offset: Arc<AtomicU64>,
    next_offset: u64,
}

impl fmt::Debug for SlaveHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlaveHandle")
            .field("id", &self.id)
            .field("next_offset", &self.next_offset)
            .finish()
    }
}

impl SlaveHandle {
    pub(crate) fn new(
        repl: Arc<Replication>,
        id: ConnId,
        start_offset: u64,
        entry: &SlaveEntry,
    ) -> Self {
        Self {
            id,
            repl,
            notify: entry.notify.clone(),
            closed: entry.closed.clone(),
            ack_offset: entry.ack_offset.clone(),
            next_offset: start_offset,
        }
    }

    /// Connection id
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// First offset not yet delivered to this replica
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    /// Take everything written since the last pull.
    ///
    /// Returns `Ok(None)` when the replica is caught up and a backlog miss
    /// when it fell so far behind that its next byte was evicted.
    pub fn pull(&mut self) -> Result<Option<Bytes>> {
        let (data, end) = self.repl.read_from(self.next_offset)?;
        if data.is_empty() {
            return Ok(None);
        }
        self.next_offset = end;
        Ok(Some(data))
    }

    /// Wait for the next write notification.
    ///
    /// Notifications are coalesced: one stored wake-up covers any number of
    /// writes, and a write between `pull` and this call is never lost.
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    /// Resolves when the replica is dropped from the registry or the server
    /// shuts down
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }

    /// True once [`SlaveHandle::closed`] would resolve immediately
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Record a `REPLCONF ACK` offset
    pub fn record_ack(&self, offset: u64) {
        self.ack_offset.fetch_max(offset, Ordering::Relaxed);
    }

    /// Last acknowledged offset
    pub fn ack_offset(&self) -> u64 {
        self.ack_offset.load(Ordering::Relaxed)
    }
}

impl Drop for SlaveHandle {
    fn drop(&mut self) {
        self.repl.unregister_slave(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::{Counters, ReplicationConfig};
    use std::time::Duration;

    fn replication() -> Arc<Replication> {
        let config = ReplicationConfig::master().with_backlog_size(8);
        Arc::new(Replication::new(config, Arc::new(Counters::default())))
    }

    #[test]
    fn test_pull_advances() {
        let repl = replication();
        let mut handle = repl.register_slave(ConnId(1), None, 0).unwrap();
        assert!(handle.pull().unwrap().is_none());

        repl.feed_upstream(b"abc", 0);
        assert_eq!(&handle.pull().unwrap().unwrap()[..], b"abc");
        assert_eq!(handle.next_offset(), 3);
        assert!(handle.pull().unwrap().is_none());
    }

    #[test]
    fn test_pull_after_eviction_fails() {
        let repl = replication();
        let mut handle = repl.register_slave(ConnId(1), None, 0).unwrap();
        repl.feed_upstream(b"0123456789", 0);
        assert!(handle.pull().is_err());
    }

    #[tokio::test]
    async fn test_notification_not_lost() {
        let repl = replication();
        let handle = repl.register_slave(ConnId(1), None, 0).unwrap();

        repl.feed_upstream(b"x", 0);
        repl.feed_upstream(b"y", 0);
        tokio::time::timeout(Duration::from_secs(1), handle.notified())
            .await
            .unwrap();
    }

    #[test]
    fn test_ack_is_monotonic() {
        let repl = replication();
        let handle = repl.register_slave(ConnId(1), None, 0).unwrap();
        handle.record_ack(5);
        handle.record_ack(3);
        assert_eq!(handle.ack_offset(), 5);
        assert_eq!(repl.info().slaves[0].ack_offset, 5);
    }
}
