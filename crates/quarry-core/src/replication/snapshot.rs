//! Snapshot interfaces for full resync
//!
//! The data store produces a snapshot paired with the replication offset it
//! is consistent with; the master streams the writes after that offset from
//! the backlog once the snapshot has been delivered. Payloads are sealed with
//! a magic header and a CRC32 trailer so a truncated or corrupted transfer is
//! rejected before anything is restored.
//!
//! ```text
//! [magic:4 "QSNP"][body:N][crc32:4]
//! ```

use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};

const MAGIC: &[u8; 4] = b"QSNP";

/// A full-dataset transfer
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Replication offset the dataset reflects
    pub offset: u64,
    /// Sealed payload
    pub payload: Bytes,
}

/// Produces snapshots on the master side
pub trait SnapshotSource: Send + Sync {
    /// Capture the dataset and the replication offset it corresponds to.
    ///
    /// Implementations must take the offset atomically with the data, i.e. no
    /// write may be applied to one but not the other.
    fn snapshot(&self) -> Result<Snapshot>;
}

/// Loads snapshots on the replica side
pub trait SnapshotSink: Send + Sync {
    /// Replace the dataset with `payload`, taken at the upstream's `offset`,
    /// and start a new local history (see [`Replication::reset_offset`]).
    /// Returns the database selected in the stream at that offset, if the
    /// payload records one.
    ///
    /// [`Replication::reset_offset`]: crate::replication::Replication::reset_offset
    fn restore(&self, payload: &[u8], offset: u64) -> Result<Option<u32>>;
}

/// Frame a snapshot body with magic and checksum
pub fn seal(body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(MAGIC.len() + body.len() + 4);
    buf.put_slice(MAGIC);
    buf.put_slice(body);
    buf.put_u32_le(crc32fast::hash(&buf));
    buf.freeze()
}

/// Verify a sealed payload and return its body
pub fn unseal(payload: &[u8]) -> Result<&[u8]> {
    if payload.len() < MAGIC.len() + 4 {
        return Err(Error::snapshot("Snapshot too short"));
    }
    if &payload[..MAGIC.len()] != MAGIC {
        return Err(Error::snapshot("Bad snapshot magic"));
    }

    let crc_offset = payload.len() - 4;
    let mut stored = [0u8; 4];
    stored.copy_from_slice(&payload[crc_offset..]);
    let stored = u32::from_le_bytes(stored);
    let computed = crc32fast::hash(&payload[..crc_offset]);
    if stored != computed {
        return Err(Error::snapshot(format!(
            "Snapshot checksum mismatch: expected {:x}, got {:x}",
            stored, computed
        )));
    }

    Ok(&payload[MAGIC.len()..crc_offset])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_unseal() {
        let sealed = seal(b"dataset");
        assert_eq!(unseal(&sealed).unwrap(), b"dataset");
    }

    #[test]
    fn test_empty_body() {
        let sealed = seal(b"");
        assert_eq!(sealed.len(), 8);
        assert!(unseal(&sealed).unwrap().is_empty());
    }

    #[test]
    fn test_corruption_detected() {
        let mut sealed = seal(b"dataset").to_vec();
        sealed[6] ^= 0xFF;
        let err = unseal(&sealed).unwrap_err();
        assert!(err.to_string().contains("checksum"));

        assert!(unseal(b"XXXXdata1234").is_err());
        assert!(unseal(b"QSN").is_err());
    }
}
