//! Server configuration
//!
//! Priority: CLI flags > `QUARRY_*` environment variables > TOML file >
//! defaults. CLI flags are applied by the binary after [`Config::load`].

use quarry_core::replication::ReplicationConfig;
use quarry_core::service::ServiceConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Config file used when `--config` is not given, if it exists
pub const DEFAULT_CONFIG_PATH: &str = "config/quarry.toml";

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("Failed to read {path:?}: {source}")]
    Read {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`Config`]
    #[error("Failed to parse {path:?}: {source}")]
    Parse {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: toml::de::Error,
    },

    /// An environment variable has an unusable value
    #[error("Invalid value for {var}: {value:?}")]
    Env {
        /// Variable name
        var: String,
        /// Offending value
        value: String,
    },

    /// Values are individually valid but unusable
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Client listen address
    pub listen: SocketAddr,
    /// Idle timeout for client connections in seconds; 0 disables it
    pub conn_timeout_secs: u64,
    /// Replication backlog capacity in bytes
    pub backlog_size: usize,
    /// Maximum concurrent full resyncs
    pub full_sync_limit: usize,
    /// Upstream master (`host:port`) to follow at startup
    pub slaveof: Option<String>,
    /// Interval between `REPLCONF ACK`s sent upstream, in milliseconds
    pub ack_interval_ms: u64,
    /// Number of databases
    pub databases: usize,
    /// Directory holding the replication checkpoint
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 6380)),
            conn_timeout_secs: 0,
            backlog_size: quarry_core::replication::DEFAULT_BACKLOG_SIZE,
            full_sync_limit: quarry_core::replication::DEFAULT_FULL_SYNC_LIMIT,
            slaveof: None,
            ack_interval_ms: 1000,
            databases: 16,
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl Config {
    /// Load from `path` (or [`DEFAULT_CONFIG_PATH`] when present) and apply
    /// environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => {
                tracing::debug!("No config file, using defaults");
                Self::default()
            }
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Parse a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Override fields from `QUARRY_*` variables resolved through `lookup`
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        fn parse<T: std::str::FromStr>(var: &str, value: String) -> Result<T, ConfigError> {
            value.parse().map_err(|_| ConfigError::Env {
                var: var.to_string(),
                value,
            })
        }

        if let Some(v) = lookup("QUARRY_LISTEN") {
            self.listen = parse("QUARRY_LISTEN", v)?;
        }
        if let Some(v) = lookup("QUARRY_CONN_TIMEOUT_SECS") {
            self.conn_timeout_secs = parse("QUARRY_CONN_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("QUARRY_BACKLOG_SIZE") {
            self.backlog_size = parse("QUARRY_BACKLOG_SIZE", v)?;
        }
        if let Some(v) = lookup("QUARRY_FULL_SYNC_LIMIT") {
            self.full_sync_limit = parse("QUARRY_FULL_SYNC_LIMIT", v)?;
        }
        if let Some(v) = lookup("QUARRY_SLAVEOF") {
            self.slaveof = (!v.is_empty()).then_some(v);
        }
        if let Some(v) = lookup("QUARRY_ACK_INTERVAL_MS") {
            self.ack_interval_ms = parse("QUARRY_ACK_INTERVAL_MS", v)?;
        }
        if let Some(v) = lookup("QUARRY_DATABASES") {
            self.databases = parse("QUARRY_DATABASES", v)?;
        }
        if let Some(v) = lookup("QUARRY_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        Ok(())
    }

    /// Replication settings derived from this configuration
    pub fn replication_config(&self) -> ReplicationConfig {
        ReplicationConfig {
            backlog_size: self.backlog_size,
            full_sync_limit: self.full_sync_limit,
            upstream: self.slaveof.clone(),
            ack_interval: Duration::from_millis(self.ack_interval_ms),
            ..ReplicationConfig::default()
        }
    }

    /// Connection service settings
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            conn_timeout: Duration::from_secs(self.conn_timeout_secs),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.databases == 0 {
            return Err(ConfigError::Invalid("databases must be at least 1".into()));
        }
        if self.databases > u32::MAX as usize {
            return Err(ConfigError::Invalid("databases is too large".into()));
        }
        self.replication_config()
            .validate()
            .map_err(ConfigError::Invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.listen.port(), 6380);
        assert_eq!(config.backlog_size, 1024 * 1024);
        assert_eq!(config.full_sync_limit, 4);
        assert_eq!(config.databases, 16);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("quarry.toml");
        std::fs::write(
            &path,
            "listen = \"0.0.0.0:7000\"\nbacklog_size = 4096\nslaveof = \"10.0.0.1:6380\"\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.listen.port(), 7000);
        assert_eq!(config.backlog_size, 4096);
        assert_eq!(config.slaveof.as_deref(), Some("10.0.0.1:6380"));
        assert_eq!(config.full_sync_limit, 4);
    }

    #[test]
    fn test_config_bad_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("quarry.toml");
        std::fs::write(&path, "backlog_size = \"big\"").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            Config::from_file(&dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("QUARRY_LISTEN", "127.0.0.1:7001"),
            ("QUARRY_FULL_SYNC_LIMIT", "2"),
            ("QUARRY_SLAVEOF", "master:6380"),
            ("QUARRY_DATA_DIR", "/var/lib/quarry"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_env(|var| env.get(var).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.listen.port(), 7001);
        assert_eq!(config.full_sync_limit, 2);
        assert_eq!(config.slaveof.as_deref(), Some("master:6380"));
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/quarry"));

        let err = config
            .apply_env(|var| (var == "QUARRY_BACKLOG_SIZE").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("QUARRY_BACKLOG_SIZE"));
    }

    #[test]
    #[serial]
    fn test_load_reads_process_env() {
        unsafe {
            std::env::set_var("QUARRY_DATABASES", "4");
        }
        let config = Config::load(None);
        unsafe {
            std::env::remove_var("QUARRY_DATABASES");
        }
        assert_eq!(config.unwrap().databases, 4);
    }

    #[test]
    fn test_validate() {
        let config = Config {
            databases: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            backlog_size: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            full_sync_limit: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_configs() {
        let config = Config {
            conn_timeout_secs: 30,
            ack_interval_ms: 250,
            slaveof: Some("h:1".into()),
            ..Config::default()
        };
        assert_eq!(config.service_config().conn_timeout, Duration::from_secs(30));
        let repl = config.replication_config();
        assert_eq!(repl.ack_interval, Duration::from_millis(250));
        assert_eq!(repl.upstream.as_deref(), Some("h:1"));
    }
}
