//! Durability layer for the LAD store
//!
//! This crate implements snapshot persistence:
//! - Snapshot file format (header, bincode body, CRC32 footer)
//! - Crash-safe writer (write-fsync-rename), temp cleanup, backup pruning
//! - Validating reader
//! - Directory listing ordered by the timestamp embedded in file names
//!
//! # Crash Safety
//!
//! A snapshot becomes visible only through an atomic rename after its
//! contents are fsynced, so a reader never sees a partial file under a
//! final name.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod entry;
pub mod error;
pub mod format;
pub mod reader;
pub mod writer;

pub use entry::SeriesEntry;
pub use error::SnapshotError;
pub use format::{
    find_latest_snapshot, list_snapshots, parse_snapshot_timestamp, snapshot_file_name,
    snapshot_path, SnapshotHeader, SNAPSHOT_FORMAT_VERSION, SNAPSHOT_HEADER_SIZE, SNAPSHOT_MAGIC,
};
pub use reader::{LoadedSnapshot, SnapshotReader};
pub use writer::{SnapshotInfo, SnapshotWriter};
