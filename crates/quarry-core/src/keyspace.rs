//! In-memory keyspace
//!
//! A fixed number of databases of byte-string values. The keyspace is the
//! command table served to clients, the snapshot source for full resyncs and
//! the applier for an upstream stream.
//!
//! Every replicated write is appended to the replication stream while the
//! keyspace lock is held, and snapshots read their offset under the same
//! lock. A snapshot therefore contains exactly the writes before its offset.
//! Lock order is keyspace, then replication state.

use crate::handler::{CommandError, HandlerTable, Session};
use crate::replication::snapshot::{self, Snapshot, SnapshotSink, SnapshotSource};
use crate::replication::{Counters, ReplicaApplier, Replication};
use crate::resp::{Frame, encode_command};
use crate::{Error, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

type Database = HashMap<Bytes, Bytes>;

#[derive(Serialize, Deserialize)]
struct SnapshotBody {
    select_db: Option<u32>,
    databases: Vec<Vec<(Vec<u8>, Vec<u8>)>>,
}

/// Databases plus the replication handle writes propagate through
pub struct Keyspace {
    databases: Mutex<Vec<Database>>,
    repl: Arc<Replication>,
}

impl std::fmt::Debug for Keyspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyspace")
            .field("databases", &self.databases.lock().len())
            .finish_non_exhaustive()
    }
}

impl Keyspace {
    /// Create `databases` empty databases
    pub fn new(databases: usize, repl: Arc<Replication>) -> Self {
        Self {
            databases: Mutex::new(vec![Database::new(); databases.max(1)]),
            repl,
        }
    }

    /// Number of databases
    pub fn database_count(&self) -> usize {
        self.databases.lock().len()
    }

    /// Keys in `db`, zero if out of range
    pub fn len(&self, db: u32) -> usize {
        self.databases
            .lock()
            .get(db as usize)
            .map_or(0, HashMap::len)
    }

    /// True if every database is empty
    pub fn is_empty(&self) -> bool {
        self.databases.lock().iter().all(HashMap::is_empty)
    }

    /// Read a value directly
    pub fn get(&self, db: u32, key: &[u8]) -> Option<Bytes> {
        self.databases.lock().get(db as usize)?.get(key).cloned()
    }

    fn info(&self) -> String {
        let info = self.repl.info();
        let counters = self.repl.counters().snapshot();
        let mut out = String::new();

        let _ = write!(out, "# Replication\r\n");
        let _ = write!(out, "run_id:{}\r\n", info.run_id);
        let _ = write!(out, "role:{}\r\n", info.role.as_str());
        if let Some(upstream) = &info.upstream {
            let _ = write!(out, "master:{}\r\n", upstream);
            let status = if info.link.connected { "up" } else { "down" };
            let _ = write!(out, "master_link_status:{}\r\n", status);
            let _ = write!(out, "master_link_reconnects:{}\r\n", info.link.reconnects);
            let _ = write!(out, "master_link_offset:{}\r\n", info.link.master_offset);
        }
        let _ = write!(out, "master_offset:{}\r\n", info.master_offset);
        let _ = write!(out, "backlog_offset:{}\r\n", info.backlog_offset);
        let _ = write!(out, "backlog_size:{}\r\n", info.backlog_size);
        let _ = write!(out, "backlog_len:{}\r\n", info.backlog_len);
        let _ = write!(out, "full_syncs_in_progress:{}\r\n", info.full_syncs_in_progress);
        let _ = write!(out, "connected_slaves:{}\r\n", info.slaves.len());
        for (i, slave) in info.slaves.iter().enumerate() {
            let addr = slave
                .addr
                .map_or_else(|| "?".to_string(), |a| a.to_string());
            let _ = write!(
                out,
                "slave{}:id={},addr={},offset={},ack={}\r\n",
                i, slave.id, addr, slave.start_offset, slave.ack_offset
            );
        }

        let _ = write!(out, "\r\n# Stats\r\n");
        for (key, value) in counters.info_lines() {
            let _ = write!(out, "{}:{}\r\n", key, value);
        }

        let _ = write!(out, "\r\n# Keyspace\r\n");
        for (i, db) in self.databases.lock().iter().enumerate() {
            if !db.is_empty() {
                let _ = write!(out, "db{}:keys={}\r\n", i, db.len());
            }
        }
        out
    }

    fn select(&self, session: &mut Session, args: &[Bytes]) -> std::result::Result<Frame, CommandError> {
        if args.len() != 2 {
            return Err(CommandError::arity(&args[0]));
        }
        let db = parse_int(&args[1])?;
        if db < 0 || db as usize >= self.database_count() {
            return Err(CommandError::DbIndexOutOfRange);
        }
        session.db = db as u32;
        Ok(Frame::ok())
    }

    fn slaveof(&self, args: &[Bytes]) -> std::result::Result<Frame, CommandError> {
        if args.len() != 3 {
            return Err(CommandError::arity(&args[0]));
        }
        if args[1].eq_ignore_ascii_case(b"NO") && args[2].eq_ignore_ascii_case(b"ONE") {
            if self.repl.is_replica() {
                tracing::info!("SLAVEOF NO ONE: promoted to master");
            }
            self.repl.set_upstream(None);
            return Ok(Frame::ok());
        }

        let host = std::str::from_utf8(&args[1]).map_err(|_| CommandError::Syntax)?;
        let port: u16 = std::str::from_utf8(&args[2])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(CommandError::NotInteger)?;
        let target = format!("{}:{}", host, port);
        tracing::info!("SLAVEOF {}", target);
        self.repl.set_upstream(Some(target));
        Ok(Frame::ok())
    }

    /// Run a write against the locked databases and append it to the
    /// replication stream before releasing the lock
    fn write(&self, db: u32, args: &[Bytes]) -> std::result::Result<Frame, CommandError> {
        if self.repl.is_replica() {
            return Err(CommandError::ReadOnly);
        }
        let mut databases = self.databases.lock();
        let (reply, changed) = execute_write(&mut databases, db, args)?;
        if changed {
            self.repl.propagate(db, &encode_command(args));
        }
        Ok(reply)
    }
}

/// Apply a write command; returns the reply and whether anything changed
fn execute_write(
    databases: &mut [Database],
    db: u32,
    args: &[Bytes],
) -> std::result::Result<(Frame, bool), CommandError> {
    let name = args[0].to_ascii_uppercase();
    if name.as_slice() == b"FLUSHALL" {
        if args.len() != 1 {
            return Err(CommandError::arity(&args[0]));
        }
        databases.iter_mut().for_each(HashMap::clear);
        return Ok((Frame::ok(), true));
    }

    let data = databases
        .get_mut(db as usize)
        .ok_or(CommandError::DbIndexOutOfRange)?;

    match name.as_slice() {
        b"SET" => {
            if args.len() < 3 {
                return Err(CommandError::arity(&args[0]));
            }
            if args.len() > 3 {
                return Err(CommandError::Syntax);
            }
            data.insert(args[1].clone(), args[2].clone());
            Ok((Frame::ok(), true))
        }
        b"DEL" => {
            if args.len() < 2 {
                return Err(CommandError::arity(&args[0]));
            }
            let removed = args[1..]
                .iter()
                .filter(|key| data.remove(*key).is_some())
                .count();
            Ok((Frame::Integer(removed as i64), removed > 0))
        }
        b"INCR" => {
            if args.len() != 2 {
                return Err(CommandError::arity(&args[0]));
            }
            let current = match data.get(&args[1]) {
                Some(value) => parse_int(value)?,
                None => 0,
            };
            let next = current.checked_add(1).ok_or(CommandError::NotInteger)?;
            data.insert(args[1].clone(), Bytes::from(next.to_string()));
            Ok((Frame::Integer(next), true))
        }
        _ => Err(CommandError::UnknownCommand(
            String::from_utf8_lossy(&args[0]).into_owned(),
        )),
    }
}

fn is_write(name: &[u8]) -> bool {
    matches!(name, b"SET" | b"DEL" | b"INCR" | b"FLUSHALL")
}

fn parse_int(raw: &[u8]) -> std::result::Result<i64, CommandError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CommandError::NotInteger)
}

impl HandlerTable for Keyspace {
    fn dispatch(&self, session: &mut Session, args: &[Bytes]) -> std::result::Result<Frame, CommandError> {
        let Some(first) = args.first() else {
            return Err(CommandError::UnknownCommand(String::new()));
        };
        let name = first.to_ascii_uppercase();
        tracing::debug!(
            "{} db={} {}",
            session.conn_id,
            session.db,
            String::from_utf8_lossy(&name)
        );

        if is_write(&name) {
            return self.write(session.db, args);
        }

        match name.as_slice() {
            b"PING" => match args.len() {
                1 => Ok(Frame::Simple("PONG".into())),
                2 => Ok(Frame::Bulk(args[1].clone())),
                _ => Err(CommandError::arity(first)),
            },
            b"ECHO" => match args.len() {
                2 => Ok(Frame::Bulk(args[1].clone())),
                _ => Err(CommandError::arity(first)),
            },
            b"SELECT" => self.select(session, args),
            b"GET" => {
                if args.len() != 2 {
                    return Err(CommandError::arity(first));
                }
                Ok(self
                    .get(session.db, &args[1])
                    .map_or(Frame::Null, Frame::Bulk))
            }
            b"EXISTS" => {
                if args.len() < 2 {
                    return Err(CommandError::arity(first));
                }
                let databases = self.databases.lock();
                let data = databases
                    .get(session.db as usize)
                    .ok_or(CommandError::DbIndexOutOfRange)?;
                let found = args[1..].iter().filter(|k| data.contains_key(*k)).count();
                Ok(Frame::Integer(found as i64))
            }
            b"DBSIZE" => match args.len() {
                1 => Ok(Frame::Integer(self.len(session.db) as i64)),
                _ => Err(CommandError::arity(first)),
            },
            b"INFO" => Ok(Frame::bulk(self.info())),
            b"SLAVEOF" | b"REPLICAOF" => self.slaveof(args),
            b"REPLCONF" => Ok(Frame::ok()),
            _ => Err(CommandError::UnknownCommand(
                String::from_utf8_lossy(first).into_owned(),
            )),
        }
    }
}

impl SnapshotSource for Keyspace {
    fn snapshot(&self) -> Result<Snapshot> {
        let databases = self.databases.lock();
        let (offset, select_db) = self.repl.snapshot_point();
        let body = SnapshotBody {
            select_db,
            databases: databases
                .iter()
                .map(|db| db.iter().map(|(k, v)| (k.to_vec(), v.to_vec())).collect())
                .collect(),
        };
        drop(databases);

        let encoded = bincode::serialize(&body)
            .map_err(|e| Error::snapshot(format!("Serialization failed: {}", e)))?;
        Counters::incr(&self.repl.counters().bgsave);

        Ok(Snapshot {
            offset,
            payload: snapshot::seal(&encoded),
        })
    }
}

impl SnapshotSink for Keyspace {
    fn restore(&self, payload: &[u8], offset: u64) -> Result<Option<u32>> {
        let body: SnapshotBody = bincode::deserialize(snapshot::unseal(payload)?)
            .map_err(|e| Error::snapshot(format!("Deserialization failed: {}", e)))?;

        let mut databases = self.databases.lock();
        if body.databases.len() > databases.len() {
            return Err(Error::snapshot(format!(
                "Snapshot has {} databases, only {} configured",
                body.databases.len(),
                databases.len()
            )));
        }

        databases.iter_mut().for_each(HashMap::clear);
        for (db, entries) in databases.iter_mut().zip(body.databases) {
            db.extend(
                entries
                    .into_iter()
                    .map(|(k, v)| (Bytes::from(k), Bytes::from(v))),
            );
        }
        self.repl.reset_offset(offset, body.select_db);
        Ok(body.select_db)
    }
}

impl ReplicaApplier for Keyspace {
    fn apply(&self, db: u32, args: &[Bytes], raw: &[u8]) -> Result<()> {
        let name = args[0].to_ascii_uppercase();
        let mut databases = self.databases.lock();

        if db as usize >= databases.len() {
            return Err(Error::replication(format!(
                "Upstream selected database {} but only {} configured",
                db,
                databases.len()
            )));
        }

        if is_write(&name) {
            if let Err(e) = execute_write(&mut databases, db, args) {
                tracing::warn!(
                    "Replicated {} failed locally: {}",
                    String::from_utf8_lossy(&name),
                    e
                );
            }
        }
        self.repl.feed_upstream(raw, db);
        Ok(())
    }
}
