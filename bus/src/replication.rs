//! Buffering policy for inbound replication payloads.
//!
//! When configured, an inbound `AppendEntries`/`InstallSnapshot` payload is first copied into a
//! [`ReplicationBuffer`] before the coordinator hands it to the log, decoupling network reception
//! from the log's own fsync latency. Without a configured policy, entries flow straight from the
//! wire into the log as the teacher's `raft` crate already does.
//!
//! There is no prior art for spooling to disk in the teacher (`redisless`'s log is always
//! in-memory), so the disk-backed arm is grounded on the pack's general idiom of reaching for
//! `tempfile` wherever a Rust service needs a throwaway file-backed buffer.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use bytes::Bytes;
use tempfile::NamedTempFile;

/// Configures when inbound replication payloads are buffered before reaching the log, and the
/// size threshold past which the buffer spills to disk instead of staying in memory.
#[derive(Debug, Clone, Copy)]
pub struct BufferingOptions {
    /// Payloads at or above this many bytes are buffered in a temp file rather than a `Vec<u8>`.
    pub file_threshold_bytes: usize,
}

impl Default for BufferingOptions {
    fn default() -> Self {
        Self {
            file_threshold_bytes: 1024 * 1024,
        }
    }
}

/// A payload copied out of the network receive path, either in memory or spooled to a temp file.
pub enum ReplicationBuffer {
    /// Held entirely in memory; the common case for ordinary log entries.
    Memory(Vec<u8>),
    /// Spooled to a temp file once the payload exceeded the configured threshold, e.g. a snapshot.
    File(NamedTempFile),
}

impl ReplicationBuffer {
    /// Copies `data` into a buffer chosen by `options` (or into memory unconditionally if
    /// `options` is `None`).
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if spooling to a temp file fails.
    pub fn buffer(data: &[u8], options: Option<BufferingOptions>) -> std::io::Result<Self> {
        let use_file = options
            .map(|options| data.len() >= options.file_threshold_bytes)
            .unwrap_or(false);
        if use_file {
            let mut file = NamedTempFile::new()?;
            file.write_all(data)?;
            file.flush()?;
            Ok(Self::File(file))
        } else {
            Ok(Self::Memory(data.to_vec()))
        }
    }

    /// Reads the buffered payload back out in full.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if reading a spooled temp file fails.
    pub fn into_bytes(self) -> std::io::Result<Bytes> {
        match self {
            Self::Memory(data) => Ok(Bytes::from(data)),
            Self::File(mut file) => {
                file.as_file_mut().seek(SeekFrom::Start(0))?;
                let mut data = Vec::new();
                File::read_to_end(file.as_file_mut(), &mut data)?;
                Ok(Bytes::from(data))
            }
        }
    }

    /// Returns whether this buffer spilled to disk.
    pub fn is_file_backed(&self) -> bool {
        matches!(self, Self::File(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_payload_without_options_stays_in_memory() {
        let buffer = ReplicationBuffer::buffer(b"hello", None).unwrap();
        assert!(!buffer.is_file_backed());
        assert_eq!(buffer.into_bytes().unwrap(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn payload_under_threshold_stays_in_memory() {
        let options = BufferingOptions {
            file_threshold_bytes: 1024,
        };
        let buffer = ReplicationBuffer::buffer(b"small", Some(options)).unwrap();
        assert!(!buffer.is_file_backed());
    }

    #[test]
    fn payload_at_or_over_threshold_spills_to_a_temp_file() {
        let options = BufferingOptions {
            file_threshold_bytes: 4,
        };
        let buffer = ReplicationBuffer::buffer(b"0123456789", Some(options)).unwrap();
        assert!(buffer.is_file_backed());
        assert_eq!(
            buffer.into_bytes().unwrap(),
            Bytes::from_static(b"0123456789")
        );
    }
}
