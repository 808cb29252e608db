//! Replication subsystem
//!
//! This module implements master-side replication with:
//! - A fixed-size backlog holding the tail of the write stream
//! - Partial resync from the backlog after a replica reconnects
//! - Full resync (snapshot transfer) bounded by a permit gate
//! - Chained replication through the upstream link
//!
//! # Architecture
//!
//! ```text
//!                  propagate()       ┌──────────────────┐   notify   ┌───────────┐
//!  client write ───────────────────► │   Replication    │ ─────────► │ replica 1 │
//!                                    │                  │            └───────────┘
//!  upstream link ─ feed_upstream() ─►│ backlog [b, m)   │   notify   ┌───────────┐
//!                                    │ slaves, gate     │ ─────────► │ replica 2 │
//!                                    └──────────────────┘            └───────────┘
//! ```
//!
//! # Offsets
//!
//! Every byte of the stream has a global offset. The backlog retains
//! `[backlog_offset, master_offset)`; a replica asking for an offset in
//! `[backlog_offset, master_offset]` under the current run id continues from
//! the backlog, anything else gets a snapshot.

pub mod backlog;
pub mod config;
pub mod counters;
pub mod gate;
pub mod protocol;
pub mod run_id;
pub mod slave;
pub mod snapshot;
pub mod state;
pub mod upstream;

pub use backlog::BacklogBuffer;
pub use config::{ReplicationConfig, ReplicationRole};
pub use counters::{Counters, CountersSnapshot};
pub use gate::{FullSyncGate, FullSyncPermit};
pub use protocol::{SyncReply, SyncRequest};
pub use run_id::RunId;
pub use slave::{ConnId, SlaveHandle};
pub use snapshot::{Snapshot, SnapshotSink, SnapshotSource};
pub use state::{FullSyncReason, LinkStatus, Replication, ReplicationInfo, SlaveInfo, SyncDecision};
pub use upstream::{ReplicaApplier, UpstreamLink};

/// Default backlog capacity in bytes
pub const DEFAULT_BACKLOG_SIZE: usize = 1024 * 1024;

/// Default number of concurrent full resyncs
pub const DEFAULT_FULL_SYNC_LIMIT: usize = 4;
