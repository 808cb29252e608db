//! Replication checkpoint
//!
//! The master offset survives restarts so that offsets keep increasing across
//! server runs. The run id does not survive, so replicas still full-resync
//! after a restart; the checkpoint only keeps offsets from going backwards.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// File name of the checkpoint inside the data directory
pub const CHECKPOINT_FILE: &str = "replication.json";

/// Persisted replication position
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationCheckpoint {
    /// Offset one past the last replicated byte
    pub master_offset: u64,
}

/// Durable store for the replication checkpoint
pub trait Binlog: Send + Sync {
    /// Load the last checkpoint, `None` on first start
    fn load(&self) -> Result<Option<ReplicationCheckpoint>>;

    /// Store a checkpoint, replacing the previous one
    fn persist(&self, checkpoint: &ReplicationCheckpoint) -> Result<()>;
}

/// JSON file checkpoint, replaced atomically via rename
#[derive(Debug, Clone)]
pub struct FileBinlog {
    dir: PathBuf,
}

impl FileBinlog {
    /// Checkpoint stored in `dir`, which is created if missing
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the checkpoint file
    pub fn path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_FILE)
    }

    fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Binlog for FileBinlog {
    fn load(&self) -> Result<Option<ReplicationCheckpoint>> {
        let path = self.path();
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&raw).map(Some).map_err(|e| {
            Error::internal(format!("Corrupt checkpoint {}: {}", path.display(), e))
        })
    }

    fn persist(&self, checkpoint: &ReplicationCheckpoint) -> Result<()> {
        std::fs::create_dir_all(self.dir())?;

        let mut tmp = tempfile::NamedTempFile::new_in(self.dir())?;
        serde_json::to_writer_pretty(&mut tmp, checkpoint)
            .map_err(|e| Error::internal(format!("Failed to encode checkpoint: {}", e)))?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.path()).map_err(|e| Error::Io(e.error))?;

        tracing::info!(
            "Replication checkpoint saved at offset {}",
            checkpoint.master_offset
        );
        Ok(())
    }
}
