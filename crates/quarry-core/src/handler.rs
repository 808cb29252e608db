//! Command dispatch seam
//!
//! The connection worker owns a [`Session`] per client and hands every
//! command to a [`HandlerTable`]. Failures are typed as [`CommandError`] and
//! rendered as RESP error replies; they never close the connection.

use crate::replication::{ConnId, Replication};
use crate::resp::Frame;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;

/// Per-connection command context
#[derive(Debug)]
pub struct Session {
    /// Currently selected database
    pub db: u32,
    /// Connection id
    pub conn_id: ConnId,
    /// Remote address
    pub addr: Option<SocketAddr>,
    /// Replication handle
    pub repl: Arc<Replication>,
}

impl Session {
    /// Session on database 0
    pub fn new(conn_id: ConnId, addr: Option<SocketAddr>, repl: Arc<Replication>) -> Self {
        Self {
            db: 0,
            conn_id,
            addr,
            repl,
        }
    }
}

/// Errors returned to the client as RESP error replies
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// A zero-length argument; the index counts arguments after the command
    /// name
    #[error("ERR args[{0}] is nil")]
    NilArgument(usize),

    /// Command not in the table
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),

    /// Arity mismatch
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),

    /// Malformed options
    #[error("ERR syntax error")]
    Syntax,

    /// Integer argument or value could not be parsed
    #[error("ERR value is not an integer or out of range")]
    NotInteger,

    /// SELECT beyond the configured databases
    #[error("ERR DB index is out of range")]
    DbIndexOutOfRange,

    /// Write rejected while following an upstream master
    #[error("READONLY You can't write against a read only replica.")]
    ReadOnly,
}

impl CommandError {
    /// Render as a RESP error frame
    pub fn into_frame(self) -> Frame {
        Frame::Error(self.to_string())
    }

    /// Arity error for `name`, lowercased like the command table names it
    pub fn arity(name: &[u8]) -> Self {
        Self::WrongArity(String::from_utf8_lossy(name).to_ascii_lowercase())
    }
}

/// Command dispatch table
pub trait HandlerTable: Send + Sync {
    /// Execute one command. `args[0]` is the command name.
    fn dispatch(&self, session: &mut Session, args: &[Bytes]) -> Result<Frame, CommandError>;
}

/// Reject zero-length arguments before dispatch
pub fn check_args(args: &[Bytes]) -> Result<(), CommandError> {
    match args.iter().skip(1).position(|arg| arg.is_empty()) {
        Some(i) => Err(CommandError::NilArgument(i)),
        None => Ok(()),
    }
}
