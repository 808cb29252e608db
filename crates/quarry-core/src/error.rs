//! Error types for Quarry Core

use thiserror::Error;

/// Result type alias using Quarry Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the Quarry server
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from sockets and checkpoint files
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed RESP input or an unexpected frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The requested offset range is no longer (or not yet) held by the backlog
    #[error(
        "Backlog miss: requested [{from}, {to}) but backlog holds [{backlog_offset}, {master_offset})"
    )]
    BacklogMiss {
        /// First requested offset
        from: u64,
        /// End of the requested range (exclusive)
        to: u64,
        /// Oldest offset still retained
        backlog_offset: u64,
        /// Offset one past the newest byte
        master_offset: u64,
    },

    /// Replication handshake or streaming errors
    #[error("Replication error: {0}")]
    Replication(String),

    /// Snapshot creation/restore errors
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// The waiting operation was aborted by connection close or shutdown
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a replication error
    pub fn replication(msg: impl Into<String>) -> Self {
        Self::Replication(msg.into())
    }

    /// Create a snapshot error
    pub fn snapshot(msg: impl Into<String>) -> Self {
        Self::Snapshot(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True when the peer simply went away (EOF, reset, broken pipe)
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::UnexpectedEof
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backlog_miss_message() {
        let err = Error::BacklogMiss {
            from: 0,
            to: 10,
            backlog_offset: 2,
            master_offset: 10,
        };
        assert_eq!(
            err.to_string(),
            "Backlog miss: requested [0, 10) but backlog holds [2, 10)"
        );
    }

    #[test]
    fn test_disconnect_classification() {
        let eof = Error::Io(std::io::Error::from(std::io::ErrorKind::UnexpectedEof));
        assert!(eof.is_disconnect());
        assert!(!Error::protocol("bad frame").is_disconnect());
        assert!(!Error::Cancelled.is_disconnect());
    }
}
