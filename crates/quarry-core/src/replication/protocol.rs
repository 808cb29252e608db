//! Replication handshake messages
//!
//! A replica opens the stream with one of:
//!
//! ```text
//! SYNC
//! PSYNC <runid|?> <offset|-1>
//! ```
//!
//! and the master answers with a status line, followed by the payload:
//!
//! ```text
//! +CONTINUE <runid>\r\n<catch-up bytes><live stream>
//! +FULLRESYNC <runid> <offset>\r\n$<len>\r\n<snapshot><live stream>
//! ```
//!
//! The snapshot bulk has no trailing CRLF; the live stream starts right after
//! its last byte.

use crate::replication::run_id::RunId;
use crate::resp::{Frame, encode_command};
use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// A replica's request to start streaming
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    /// Run id of the master the replica last synced from
    pub run_id: Option<String>,
    /// First offset the replica is missing
    pub offset: Option<u64>,
}

impl SyncRequest {
    /// Request with no history; always answered with a full resync
    pub fn fresh() -> Self {
        Self {
            run_id: None,
            offset: None,
        }
    }

    /// Request continuing from `offset` of the master identified by `run_id`
    pub fn resume(run_id: &RunId, offset: u64) -> Self {
        Self {
            run_id: Some(run_id.to_string()),
            offset: Some(offset),
        }
    }

    /// True if `args[0]` names a sync command
    pub fn is_sync_command(name: &[u8]) -> bool {
        name.eq_ignore_ascii_case(b"SYNC") || name.eq_ignore_ascii_case(b"PSYNC")
    }

    /// Parse `SYNC` or `PSYNC <runid> <offset>`
    pub fn parse(args: &[Bytes]) -> Result<Self> {
        let Some(name) = args.first() else {
            return Err(Error::protocol("empty sync request"));
        };

        if name.eq_ignore_ascii_case(b"SYNC") {
            if args.len() != 1 {
                return Err(Error::protocol("wrong number of arguments for 'sync'"));
            }
            return Ok(Self::fresh());
        }

        if !name.eq_ignore_ascii_case(b"PSYNC") {
            return Err(Error::protocol(format!(
                "not a sync command: {}",
                String::from_utf8_lossy(name)
            )));
        }
        if args.len() != 3 {
            return Err(Error::protocol("wrong number of arguments for 'psync'"));
        }

        let run_id = match &args[1][..] {
            b"?" => None,
            raw => Some(
                std::str::from_utf8(raw)
                    .map_err(|_| Error::protocol("run id is not valid UTF-8"))?
                    .to_string(),
            ),
        };

        let offset = std::str::from_utf8(&args[2])
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| Error::protocol("offset is not an integer"))?;
        let offset = u64::try_from(offset).ok();

        Ok(Self { run_id, offset })
    }

    /// Encode as a RESP command
    pub fn encode(&self) -> Bytes {
        let run_id = self.run_id.as_deref().unwrap_or("?");
        let offset = match self.offset {
            Some(offset) => offset.to_string(),
            None => "-1".to_string(),
        };
        encode_command(&["PSYNC", run_id, offset.as_str()])
    }
}

/// Master's answer to a [`SyncRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncReply {
    /// Stream continues from the requested offset
    Continue {
        /// Master run id, absent for peers that omit it
        run_id: Option<String>,
    },
    /// A snapshot consistent with `offset` follows
    FullResync {
        /// Master run id
        run_id: String,
        /// Offset the snapshot is consistent with
        offset: u64,
    },
}

impl SyncReply {
    /// Status line as a RESP simple string
    pub fn encode(&self) -> Bytes {
        let line = match self {
            Self::Continue { run_id: Some(id) } => format!("CONTINUE {}", id),
            Self::Continue { run_id: None } => "CONTINUE".to_string(),
            Self::FullResync { run_id, offset } => format!("FULLRESYNC {} {}", run_id, offset),
        };
        Frame::Simple(line).to_bytes()
    }

    /// Parse the master's status reply
    pub fn parse(frame: &Frame) -> Result<Self> {
        let line = match frame {
            Frame::Simple(line) => line,
            Frame::Error(msg) => {
                return Err(Error::replication(format!("upstream refused sync: {}", msg)));
            }
            other => {
                return Err(Error::protocol(format!(
                    "unexpected sync reply: {}",
                    other
                )));
            }
        };

        let mut parts = line.split_ascii_whitespace();
        match parts.next() {
            Some(kw) if kw.eq_ignore_ascii_case("CONTINUE") => Ok(Self::Continue {
                run_id: parts.next().map(str::to_string),
            }),
            Some(kw) if kw.eq_ignore_ascii_case("FULLRESYNC") => {
                let run_id = parts
                    .next()
                    .ok_or_else(|| Error::protocol("FULLRESYNC without run id"))?;
                let offset = parts
                    .next()
                    .and_then(|s| s.parse::<u64>().ok())
                    .ok_or_else(|| Error::protocol("FULLRESYNC without valid offset"))?;
                Ok(Self::FullResync {
                    run_id: run_id.to_string(),
                    offset,
                })
            }
            _ => Err(Error::protocol(format!("unexpected sync reply: {}", line))),
        }
    }
}

/// `$<len>\r\n` header preceding a snapshot payload
pub fn snapshot_header(len: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(24);
    buf.put_u8(b'$');
    buf.put_slice(len.to_string().as_bytes());
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// `REPLCONF ACK <offset>` sent by a replica
pub fn encode_ack(offset: u64) -> Bytes {
    let offset = offset.to_string();
    encode_command(&["REPLCONF", "ACK", offset.as_str()])
}

/// Extract the offset from `REPLCONF ACK <offset>`
pub fn parse_ack(args: &[Bytes]) -> Option<u64> {
    if args.len() != 3
        || !args[0].eq_ignore_ascii_case(b"REPLCONF")
        || !args[1].eq_ignore_ascii_case(b"ACK")
    {
        return None;
    }
    std::str::from_utf8(&args[2]).ok()?.parse().ok()
}
