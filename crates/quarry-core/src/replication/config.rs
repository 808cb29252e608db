//! Replication configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Node role in replication topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationRole {
    /// Accepts writes and serves replicas
    Master,
    /// Follows an upstream master; rejects client writes
    Replica,
}

impl ReplicationRole {
    /// Name used in INFO output
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Replica => "slave",
        }
    }
}

/// Replication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Backlog ring capacity in bytes
    pub backlog_size: usize,

    /// Maximum concurrent full resyncs (snapshot transfers)
    pub full_sync_limit: usize,

    /// Upstream master (`host:port`) when this node starts as a replica
    pub upstream: Option<String>,

    /// Connection timeout for the upstream link
    pub connect_timeout: Duration,

    /// Interval between `REPLCONF ACK` messages sent upstream
    pub ack_interval: Duration,

    /// Upper bound of the upstream reconnect backoff
    pub max_reconnect_delay: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            backlog_size: super::DEFAULT_BACKLOG_SIZE,
            full_sync_limit: super::DEFAULT_FULL_SYNC_LIMIT,
            upstream: None,
            connect_timeout: Duration::from_secs(10),
            ack_interval: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(60),
        }
    }
}

impl ReplicationConfig {
    /// Create a master configuration
    pub fn master() -> Self {
        Self::default()
    }

    /// Create a replica configuration following `upstream`
    pub fn replica(upstream: impl Into<String>) -> Self {
        Self {
            upstream: Some(upstream.into()),
            ..Default::default()
        }
    }

    /// Set backlog capacity
    pub fn with_backlog_size(mut self, bytes: usize) -> Self {
        self.backlog_size = bytes;
        self
    }

    /// Set the full-sync concurrency limit
    pub fn with_full_sync_limit(mut self, limit: usize) -> Self {
        self.full_sync_limit = limit;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.backlog_size == 0 {
            return Err("backlog_size must be at least 1".into());
        }

        if self.full_sync_limit == 0 {
            return Err("full_sync_limit must be at least 1".into());
        }

        if let Some(upstream) = &self.upstream {
            if !upstream.contains(':') {
                return Err(format!("upstream '{}' must be host:port", upstream));
            }
        }

        if self.ack_interval.is_zero() {
            return Err("ack_interval must be non-zero".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ReplicationConfig::default();
        assert!(config.upstream.is_none());
        assert_eq!(config.backlog_size, 1024 * 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_replica_config() {
        let config = ReplicationConfig::replica("127.0.0.1:6380");
        assert_eq!(config.upstream.as_deref(), Some("127.0.0.1:6380"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values() {
        assert!(ReplicationConfig::master().with_backlog_size(0).validate().is_err());
        assert!(
            ReplicationConfig::master()
                .with_full_sync_limit(0)
                .validate()
                .is_err()
        );
        assert!(ReplicationConfig::replica("nohost").validate().is_err());
    }
}
