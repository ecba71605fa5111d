//! Snapshot file format
//!
//! Snapshots are named `{basename}-{timestamp_us:017}.snap`; the embedded
//! timestamp orders them. Each file is a 64-byte header, a bincode body and
//! a CRC32 footer.
//!
//! # File Structure
//!
//! ```text
//! +------------------+ 0
//! | SnapshotHeader   | 64 bytes
//! +------------------+ 64
//! | Body             | header.body_len bytes (bincode Vec<SeriesEntry>)
//! +------------------+
//! | Footer CRC32     | 4 bytes, over header + body
//! +------------------+
//! ```

use std::path::{Path, PathBuf};

use crate::error::SnapshotError;

/// Magic bytes: "LADS"
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"LADS";

/// Snapshot format version
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// Snapshot header size in bytes
pub const SNAPSHOT_HEADER_SIZE: usize = 64;

/// Footer size in bytes
pub const SNAPSHOT_FOOTER_SIZE: usize = 4;

/// File extension of completed snapshots
pub const SNAPSHOT_EXTENSION: &str = "snap";

/// Snapshot header (64 bytes)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHeader {
    /// Magic bytes: "LADS"
    pub magic: [u8; 4],
    /// Format version
    pub format_version: u32,
    /// Creation timestamp (microseconds since epoch); matches the file name
    pub created_at: u64,
    /// Number of series in the body
    pub series_count: u64,
    /// Number of samples in the body
    pub sample_count: u64,
    /// Highest ingest sequence number in the body
    pub max_sequence: u64,
    /// Body length in bytes
    pub body_len: u64,
    /// Reserved
    pub reserved: [u8; 16],
}

impl SnapshotHeader {
    /// Create a header for a body
    pub fn new(
        created_at: u64,
        series_count: u64,
        sample_count: u64,
        max_sequence: u64,
        body_len: u64,
    ) -> Self {
        SnapshotHeader {
            magic: SNAPSHOT_MAGIC,
            format_version: SNAPSHOT_FORMAT_VERSION,
            created_at,
            series_count,
            sample_count,
            max_sequence,
            body_len,
            reserved: [0u8; 16],
        }
    }

    /// Serialize header to bytes
    pub fn to_bytes(&self) -> [u8; SNAPSHOT_HEADER_SIZE] {
        let mut bytes = [0u8; SNAPSHOT_HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4..8].copy_from_slice(&self.format_version.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.created_at.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.series_count.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.sample_count.to_le_bytes());
        bytes[32..40].copy_from_slice(&self.max_sequence.to_le_bytes());
        bytes[40..48].copy_from_slice(&self.body_len.to_le_bytes());
        bytes[48..64].copy_from_slice(&self.reserved);
        bytes
    }

    /// Parse header from bytes
    pub fn from_bytes(bytes: &[u8; SNAPSHOT_HEADER_SIZE]) -> Option<Self> {
        Some(SnapshotHeader {
            magic: bytes[0..4].try_into().ok()?,
            format_version: u32::from_le_bytes(bytes[4..8].try_into().ok()?),
            created_at: u64::from_le_bytes(bytes[8..16].try_into().ok()?),
            series_count: u64::from_le_bytes(bytes[16..24].try_into().ok()?),
            sample_count: u64::from_le_bytes(bytes[24..32].try_into().ok()?),
            max_sequence: u64::from_le_bytes(bytes[32..40].try_into().ok()?),
            body_len: u64::from_le_bytes(bytes[40..48].try_into().ok()?),
            reserved: bytes[48..64].try_into().ok()?,
        })
    }

    /// Validate magic and version
    pub fn validate(&self) -> Result<(), SnapshotError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::InvalidMagic {
                expected: SNAPSHOT_MAGIC,
                actual: self.magic,
            });
        }
        if self.format_version == 0 || self.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                version: self.format_version,
                max_supported: SNAPSHOT_FORMAT_VERSION,
            });
        }
        Ok(())
    }
}

/// File name of a snapshot
pub fn snapshot_file_name(basename: &str, timestamp_us: u64) -> String {
    format!("{}-{:017}.{}", basename, timestamp_us, SNAPSHOT_EXTENSION)
}

/// Path of a snapshot
pub fn snapshot_path(dir: &Path, basename: &str, timestamp_us: u64) -> PathBuf {
    dir.join(snapshot_file_name(basename, timestamp_us))
}

/// Path of the temporary file a snapshot is written to before rename
pub fn temp_path(dir: &Path, basename: &str, timestamp_us: u64) -> PathBuf {
    dir.join(format!(".{}-{:017}.tmp", basename, timestamp_us))
}

/// Parse the embedded timestamp from a snapshot file name
///
/// Returns None if the name doesn't belong to `basename` or is malformed.
pub fn parse_snapshot_timestamp(basename: &str, file_name: &str) -> Option<u64> {
    let digits = file_name
        .strip_prefix(basename)?
        .strip_prefix('-')?
        .strip_suffix(SNAPSHOT_EXTENSION)?
        .strip_suffix('.')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// List all snapshot files for `basename` in a directory, oldest first
pub fn list_snapshots(dir: &Path, basename: &str) -> std::io::Result<Vec<(u64, PathBuf)>> {
    let mut snapshots = Vec::new();

    if !dir.exists() {
        return Ok(snapshots);
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().to_string();
        if let Some(ts) = parse_snapshot_timestamp(basename, &file_name) {
            snapshots.push((ts, entry.path()));
        }
    }

    snapshots.sort_by_key(|(ts, _)| *ts);
    Ok(snapshots)
}

/// Find the newest snapshot in a directory
pub fn find_latest_snapshot(dir: &Path, basename: &str) -> std::io::Result<Option<(u64, PathBuf)>> {
    let snapshots = list_snapshots(dir, basename)?;
    Ok(snapshots.into_iter().last())
}
