//! Lock-free server counters

use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Observability counters shared by the service and replication state.
///
/// Every field is independent; readers may observe them at slightly
/// different instants.
#[derive(Debug, Default)]
pub struct Counters {
    /// Currently connected clients
    pub clients: AtomicI64,
    /// Connections accepted since start
    pub clients_accepted: AtomicU64,
    /// Commands processed
    pub commands: AtomicU64,
    /// Commands answered with an error
    pub commands_failed: AtomicU64,
    /// Snapshots produced for full resyncs
    pub bgsave: AtomicU64,
    /// Snapshot bytes still to be written to replicas
    pub sync_snapshot_remains: AtomicI64,
    /// Catch-up bytes served from the backlog
    pub sync_cache_bytes: AtomicU64,
    /// All bytes written to replicas
    pub sync_total_bytes: AtomicU64,
    /// Full resyncs started
    pub sync_full: AtomicU64,
    /// Partial resyncs accepted
    pub sync_partial_ok: AtomicU64,
    /// Partial resync attempts that fell back to a full resync
    pub sync_partial_err: AtomicU64,
}

/// Point-in-time copy of [`Counters`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    /// Currently connected clients
    pub clients: i64,
    /// Connections accepted since start
    pub clients_accepted: u64,
    /// Commands processed
    pub commands: u64,
    /// Commands answered with an error
    pub commands_failed: u64,
    /// Snapshots produced for full resyncs
    pub bgsave: u64,
    /// Snapshot bytes still to be written to replicas
    pub sync_snapshot_remains: i64,
    /// Catch-up bytes served from the backlog
    pub sync_cache_bytes: u64,
    /// All bytes written to replicas
    pub sync_total_bytes: u64,
    /// Full resyncs started
    pub sync_full: u64,
    /// Partial resyncs accepted
    pub sync_partial_ok: u64,
    /// Partial resync attempts that fell back to a full resync
    pub sync_partial_err: u64,
}

impl Counters {
    /// Increment a monotonic counter
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Add to a monotonic counter
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Copy all counters
    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            clients: self.clients.load(Ordering::Relaxed),
            clients_accepted: self.clients_accepted.load(Ordering::Relaxed),
            commands: self.commands.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
            bgsave: self.bgsave.load(Ordering::Relaxed),
            sync_snapshot_remains: self.sync_snapshot_remains.load(Ordering::Relaxed),
            sync_cache_bytes: self.sync_cache_bytes.load(Ordering::Relaxed),
            sync_total_bytes: self.sync_total_bytes.load(Ordering::Relaxed),
            sync_full: self.sync_full.load(Ordering::Relaxed),
            sync_partial_ok: self.sync_partial_ok.load(Ordering::Relaxed),
            sync_partial_err: self.sync_partial_err.load(Ordering::Relaxed),
        }
    }
}

impl CountersSnapshot {
    /// `(key, value)` pairs sorted by key, for INFO output
    pub fn info_lines(&self) -> Vec<(String, String)> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map
                .into_iter()
                .map(|(k, v)| (k, v.to_string()))
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_updates() {
        let counters = Counters::default();
        Counters::incr(&counters.commands);
        Counters::incr(&counters.commands);
        Counters::add(&counters.sync_total_bytes, 128);
        counters.clients.fetch_add(2, Ordering::Relaxed);
        counters.clients.fetch_sub(1, Ordering::Relaxed);

        let snap = counters.snapshot();
        assert_eq!(snap.commands, 2);
        assert_eq!(snap.sync_total_bytes, 128);
        assert_eq!(snap.clients, 1);
        assert_eq!(snap.sync_full, 0);
    }

    #[test]
    fn test_info_lines() {
        let counters = Counters::default();
        Counters::incr(&counters.sync_partial_ok);
        let lines = counters.snapshot().info_lines();
        assert!(lines.contains(&("sync_partial_ok".to_string(), "1".to_string())));
        assert_eq!(lines.len(), 11);
    }
}
