//! Replication backlog ring buffer
//!
//! Holds the most recent `capacity` bytes of the replication stream. Every byte
//! has a global offset; the byte at offset `o` lives at slot `o % capacity`,
//! so wrapping needs no separate head pointer and `reset` keeps the mapping
//! valid for any starting offset.
//!
//! ```text
//!   backlog_offset                        master_offset
//!        │◄──────────── retained ─────────────►│
//!   ─────┼─────────────────────────────────────┼────► offset
//!   evicted                                   next write
//! ```

use crate::{Error, Result};
use bytes::Bytes;

/// Fixed-capacity circular byte buffer addressed by stream offset
#[derive(Debug)]
pub struct BacklogBuffer {
    buf: Box<[u8]>,
    /// Offset one past the newest byte (total bytes ever appended)
    master_offset: u64,
    /// Offset of the oldest retained byte
    backlog_offset: u64,
}

impl BacklogBuffer {
    /// Create an empty backlog starting at offset 0
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        Self::with_offset(capacity, 0)
    }

    /// Create an empty backlog whose next byte will have `offset`
    pub fn with_offset(capacity: usize, offset: u64) -> Self {
        assert!(capacity > 0, "backlog capacity must be non-zero");
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            master_offset: offset,
            backlog_offset: offset,
        }
    }

    /// Fixed capacity in bytes
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Offset one past the newest byte
    pub fn master_offset(&self) -> u64 {
        self.master_offset
    }

    /// Offset of the oldest retained byte
    pub fn backlog_offset(&self) -> u64 {
        self.backlog_offset
    }

    /// Number of bytes currently retained
    pub fn len(&self) -> usize {
        (self.master_offset - self.backlog_offset) as usize
    }

    /// True when nothing is retained
    pub fn is_empty(&self) -> bool {
        self.master_offset == self.backlog_offset
    }

    /// Whether `offset` can serve as the start of a read
    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.backlog_offset && offset <= self.master_offset
    }

    /// Append bytes, evicting the oldest ones once full
    pub fn append(&mut self, data: &[u8]) {
        let cap = self.capacity();
        let total = data.len() as u64;

        // Only the tail of an oversized append can survive.
        let data = if data.len() > cap {
            &data[data.len() - cap..]
        } else {
            data
        };
        let start = self.master_offset + total - data.len() as u64;

        let pos = (start % cap as u64) as usize;
        let first = data.len().min(cap - pos);
        self.buf[pos..pos + first].copy_from_slice(&data[..first]);
        self.buf[..data.len() - first].copy_from_slice(&data[first..]);

        self.master_offset += total;
        let floor = self.master_offset.saturating_sub(cap as u64);
        if self.backlog_offset < floor {
            self.backlog_offset = floor;
        }
    }

    /// Copy out the bytes in `[from, to)`.
    ///
    /// Fails with [`Error::BacklogMiss`] unless
    /// `backlog_offset <= from <= to <= master_offset`.
    pub fn read(&self, from: u64, to: u64) -> Result<Bytes> {
        if from < self.backlog_offset || from > to || to > self.master_offset {
            return Err(Error::BacklogMiss {
                from,
                to,
                backlog_offset: self.backlog_offset,
                master_offset: self.master_offset,
            });
        }

        let cap = self.capacity();
        let len = (to - from) as usize;
        let pos = (from % cap as u64) as usize;
        let first = len.min(cap - pos);

        let mut out = Vec::with_capacity(len);
        out.extend_from_slice(&self.buf[pos..pos + first]);
        out.extend_from_slice(&self.buf[..len - first]);
        Ok(Bytes::from(out))
    }

    /// Copy out everything from `from` to the current master offset
    pub fn read_from(&self, from: u64) -> Result<Bytes> {
        self.read(from, self.master_offset)
    }

    /// Drop all content and continue the stream at `offset`
    pub fn reset(&mut self, offset: u64) {
        self.master_offset = offset;
        self.backlog_offset = offset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_append_within_capacity() {
        let mut backlog = BacklogBuffer::new(16);
        backlog.append(b"hello");
        backlog.append(b" world");

        assert_eq!(backlog.master_offset(), 11);
        assert_eq!(backlog.backlog_offset(), 0);
        assert_eq!(&backlog.read_from(0).unwrap()[..], b"hello world");
        assert_eq!(&backlog.read(6, 11).unwrap()[..], b"world");
    }

    #[test]
    fn test_eviction_scenario() {
        let mut backlog = BacklogBuffer::new(8);
        backlog.append(b"ABCDEFGH");
        assert_eq!(&backlog.read_from(0).unwrap()[..], b"ABCDEFGH");

        backlog.append(b"IJ");
        assert_eq!(backlog.backlog_offset(), 2);
        assert_eq!(backlog.master_offset(), 10);
        assert!(matches!(
            backlog.read_from(0),
            Err(Error::BacklogMiss {
                backlog_offset: 2,
                ..
            })
        ));
        assert_eq!(&backlog.read_from(4).unwrap()[..], b"EFGHIJ");
        assert_eq!(&backlog.read_from(2).unwrap()[..], b"CDEFGHIJ");
    }

    #[test]
    fn test_oversized_append_keeps_tail() {
        let mut backlog = BacklogBuffer::new(4);
        backlog.append(b"ab");
        backlog.append(b"0123456789");

        assert_eq!(backlog.master_offset(), 12);
        assert_eq!(backlog.backlog_offset(), 8);
        assert_eq!(&backlog.read_from(8).unwrap()[..], b"6789");
    }

    #[test]
    fn test_read_bounds() {
        let mut backlog = BacklogBuffer::new(8);
        backlog.append(b"abc");

        assert!(backlog.read(0, 4).is_err());
        assert!(backlog.read(2, 1).is_err());
        assert_eq!(backlog.read(3, 3).unwrap().len(), 0);
        assert!(backlog.contains(3));
        assert!(!backlog.contains(4));
    }

    #[test]
    fn test_reset_moves_window() {
        let mut backlog = BacklogBuffer::new(8);
        backlog.append(b"abcdef");
        backlog.reset(1000);

        assert!(backlog.is_empty());
        assert!(backlog.read_from(0).is_err());
        backlog.append(b"0123456789");
        assert_eq!(backlog.backlog_offset(), 1002);
        assert_eq!(&backlog.read_from(1002).unwrap()[..], b"23456789");
    }

    proptest! {
        #[test]
        fn prop_backlog_retains_most_recent_bytes(
            capacity in 1usize..64,
            chunks in proptest::collection::vec(
                proptest::collection::vec(any::<u8>(), 0..40),
                0..30,
            ),
        ) {
            let mut backlog = BacklogBuffer::new(capacity);
            let mut stream = Vec::new();

            for chunk in &chunks {
                backlog.append(chunk);
                stream.extend_from_slice(chunk);

                prop_assert!(backlog.len() <= capacity);
                prop_assert_eq!(backlog.master_offset(), stream.len() as u64);

                let tail_start = stream.len().saturating_sub(capacity);
                prop_assert_eq!(backlog.backlog_offset(), tail_start as u64);
                let retained = backlog
                    .read(backlog.backlog_offset(), backlog.master_offset())
                    .unwrap();
                prop_assert_eq!(&retained[..], &stream[tail_start..]);
            }
        }
    }
}
