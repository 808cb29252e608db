//! Quarry Core - Redis-protocol server with master-side replication
//!
//! This crate provides the network-facing core of Quarry:
//! - RESP2 codec and buffered connections
//! - Connection service (acceptor and per-connection workers)
//! - Replication backlog, partial/full resync decision, full-sync gate
//! - Upstream link for running as a replica of another master
//! - In-memory keyspace used as command table and snapshot source
//! - Replication checkpoint persisted across restarts
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │              Service (acceptor)              │
//! │        one worker task per connection        │
//! └──────────────┬───────────────┬──────────────┘
//!                │ commands      │ SYNC / PSYNC
//! ┌──────────────┴──────┐ ┌──────┴──────────────┐
//! │   Keyspace          │ │   Replication        │
//! │ (HandlerTable,      │─►  backlog, slaves,    │
//! │  SnapshotSource)    │ │  full-sync gate      │
//! └─────────────────────┘ └──────────▲───────────┘
//!                                    │ feed_upstream
//!                         ┌──────────┴───────────┐
//!                         │   UpstreamLink       │
//!                         └──────────────────────┘
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod binlog;
pub mod connection;
pub mod error;
pub mod handler;
pub mod keyspace;
pub mod replication;
pub mod resp;
pub mod service;

pub use error::{Error, Result};
