//! Snapshot reader for restore
//!
//! Loads and validates snapshot files: size, magic, format version, body
//! length and CRC32 are all checked before the body is decoded.

use std::path::Path;

use lad_core::Timestamp;

use crate::entry::SeriesEntry;
use crate::error::SnapshotError;
use crate::format::{SnapshotHeader, SNAPSHOT_FOOTER_SIZE, SNAPSHOT_HEADER_SIZE};

/// Snapshot reader
#[derive(Debug, Default, Clone, Copy)]
pub struct SnapshotReader;

impl SnapshotReader {
    /// Create a reader
    pub fn new() -> Self {
        SnapshotReader
    }

    /// Load a snapshot from file
    pub fn load(&self, path: &Path) -> Result<LoadedSnapshot, SnapshotError> {
        let data = std::fs::read(path)?;
        self.decode(&data)
    }

    /// Validate and decode snapshot bytes
    pub fn decode(&self, data: &[u8]) -> Result<LoadedSnapshot, SnapshotError> {
        if data.len() < SNAPSHOT_HEADER_SIZE + SNAPSHOT_FOOTER_SIZE {
            return Err(SnapshotError::FileTooSmall { size: data.len() });
        }

        let header_bytes: &[u8; SNAPSHOT_HEADER_SIZE] = data[..SNAPSHOT_HEADER_SIZE]
            .try_into()
            .map_err(|_| SnapshotError::InvalidHeader)?;
        let header = SnapshotHeader::from_bytes(header_bytes).ok_or(SnapshotError::InvalidHeader)?;
        header.validate()?;

        let body_end = data.len() - SNAPSHOT_FOOTER_SIZE;
        let body = &data[SNAPSHOT_HEADER_SIZE..body_end];
        if body.len() as u64 != header.body_len {
            return Err(SnapshotError::LengthMismatch {
                declared: header.body_len,
                actual: body.len() as u64,
            });
        }

        let footer: [u8; SNAPSHOT_FOOTER_SIZE] = data[body_end..]
            .try_into()
            .map_err(|_| SnapshotError::FileTooSmall { size: data.len() })?;
        let stored = u32::from_le_bytes(footer);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(header_bytes);
        hasher.update(body);
        let computed = hasher.finalize();
        if stored != computed {
            return Err(SnapshotError::CrcMismatch { stored, computed });
        }

        let entries: Vec<SeriesEntry> =
            bincode::deserialize(body).map_err(|e| SnapshotError::Decode(e.to_string()))?;

        Ok(LoadedSnapshot {
            header,
            entries,
            crc: stored,
        })
    }
}

/// Loaded snapshot data
#[derive(Debug, Clone)]
pub struct LoadedSnapshot {
    /// Snapshot header
    pub header: SnapshotHeader,
    /// Series entries
    pub entries: Vec<SeriesEntry>,
    /// CRC32 checksum
    pub crc: u32,
}

impl LoadedSnapshot {
    /// Creation timestamp
    pub fn created_at(&self) -> Timestamp {
        Timestamp::from_micros(self.header.created_at)
    }

    /// Number of samples across all entries
    pub fn sample_count(&self) -> usize {
        self.entries.iter().map(|e| e.samples.len()).sum()
    }

    /// Highest ingest sequence number recorded
    pub fn max_sequence(&self) -> u64 {
        self.header.max_sequence
    }
}
