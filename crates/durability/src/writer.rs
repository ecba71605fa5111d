//! Crash-safe snapshot writer
//!
//! Uses write-fsync-rename pattern for atomic snapshot creation.
//!
//! # Crash Safety
//!
//! The snapshot creation follows this pattern:
//! 1. Write to temporary file (.{basename}-TTTT.tmp)
//! 2. fsync the temporary file
//! 3. Atomic rename to final path ({basename}-TTTT.snap)
//! 4. fsync the parent directory
//!
//! Either the complete snapshot exists or it doesn't; a crash leaves at most
//! a stale temporary file, removed by [`SnapshotWriter::cleanup_temp_files`].

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use lad_core::Timestamp;
use tracing::{debug, warn};

use crate::entry::SeriesEntry;
use crate::error::SnapshotError;
use crate::format::{list_snapshots, snapshot_path, temp_path, SnapshotHeader};

/// Snapshot writer with crash-safe semantics
pub struct SnapshotWriter {
    snapshots_dir: PathBuf,
    basename: String,
}

impl SnapshotWriter {
    /// Create a new snapshot writer
    ///
    /// Creates the snapshots directory if it doesn't exist.
    pub fn new(snapshots_dir: PathBuf, basename: impl Into<String>) -> io::Result<Self> {
        std::fs::create_dir_all(&snapshots_dir)?;
        Ok(SnapshotWriter {
            snapshots_dir,
            basename: basename.into(),
        })
    }

    /// Get the snapshots directory
    pub fn snapshots_dir(&self) -> &Path {
        &self.snapshots_dir
    }

    /// File basename
    pub fn basename(&self) -> &str {
        &self.basename
    }

    /// Write every entry into a new snapshot file.
    ///
    /// The file timestamp is the current time, raised past the newest
    /// existing snapshot so names never collide and newer files always sort
    /// later.
    pub fn write(&self, entries: &[SeriesEntry]) -> Result<SnapshotInfo, SnapshotError> {
        let body = bincode::serialize(entries).map_err(|e| SnapshotError::Encode(e.to_string()))?;

        let series_count = entries.len() as u64;
        let sample_count = entries.iter().map(|e| e.samples.len() as u64).sum();
        let max_sequence = entries
            .iter()
            .filter_map(SeriesEntry::max_sequence)
            .max()
            .unwrap_or(0);

        let newest_existing = list_snapshots(&self.snapshots_dir, &self.basename)?
            .last()
            .map(|(ts, _)| *ts);
        let mut created_at = Timestamp::now().as_micros();
        if let Some(newest) = newest_existing {
            created_at = created_at.max(newest + 1);
        }
        while snapshot_path(&self.snapshots_dir, &self.basename, created_at).exists() {
            created_at += 1;
        }

        let header = SnapshotHeader::new(
            created_at,
            series_count,
            sample_count,
            max_sequence,
            body.len() as u64,
        );
        let header_bytes = header.to_bytes();

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header_bytes);
        hasher.update(&body);
        let crc = hasher.finalize();

        let final_path = snapshot_path(&self.snapshots_dir, &self.basename, created_at);
        let temp = temp_path(&self.snapshots_dir, &self.basename, created_at);

        // Step 1: Write to temporary file
        let result = (|| -> io::Result<()> {
            let mut file = OpenOptions::new()
                .create_new(true)
                .write(true)
                .open(&temp)?;
            file.write_all(&header_bytes)?;
            file.write_all(&body)?;
            file.write_all(&crc.to_le_bytes())?;

            // Step 2: fsync the file
            file.sync_all()?;
            drop(file);

            // Step 3: Atomic rename
            std::fs::rename(&temp, &final_path)?;

            // Step 4: fsync parent directory
            let dir = File::open(&self.snapshots_dir)?;
            dir.sync_all()?;
            Ok(())
        })();

        if let Err(e) = result {
            if temp.exists() {
                if let Err(cleanup) = std::fs::remove_file(&temp) {
                    warn!(target: "lad::snapshot", path = ?temp, error = %cleanup, "Failed to remove temporary snapshot");
                }
            }
            return Err(e.into());
        }

        let bytes = (header_bytes.len() + body.len() + 4) as u64;
        debug!(
            target: "lad::snapshot",
            path = ?final_path,
            series = series_count,
            samples = sample_count,
            bytes,
            "Snapshot written"
        );

        Ok(SnapshotInfo {
            timestamp: Timestamp::from_micros(created_at),
            path: final_path,
            series_count,
            sample_count,
            bytes,
            crc,
        })
    }

    /// Clean up incomplete temporary files
    ///
    /// Called at startup to remove temporary snapshot files left behind by
    /// crashes.
    pub fn cleanup_temp_files(&self) -> io::Result<usize> {
        let mut count = 0;

        if !self.snapshots_dir.exists() {
            return Ok(0);
        }

        let prefix = format!(".{}-", self.basename);
        for entry in std::fs::read_dir(&self.snapshots_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(&prefix) && name.ends_with(".tmp") {
                std::fs::remove_file(entry.path())?;
                count += 1;
            }
        }

        Ok(count)
    }

    /// Delete the oldest snapshots so at most `max_backups` remain.
    ///
    /// Zero keeps everything. Returns the deleted paths.
    pub fn prune(&self, max_backups: usize) -> io::Result<Vec<PathBuf>> {
        if max_backups == 0 {
            return Ok(Vec::new());
        }
        let snapshots = list_snapshots(&self.snapshots_dir, &self.basename)?;
        let excess = snapshots.len().saturating_sub(max_backups);
        let mut removed = Vec::with_capacity(excess);
        for (_, path) in snapshots.into_iter().take(excess) {
            std::fs::remove_file(&path)?;
            removed.push(path);
        }
        Ok(removed)
    }
}

/// Information about a created snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    /// Timestamp embedded in the file name
    pub timestamp: Timestamp,
    /// Path to the snapshot file
    pub path: PathBuf,
    /// Series written
    pub series_count: u64,
    /// Samples written
    pub sample_count: u64,
    /// File size
    pub bytes: u64,
    /// CRC32 checksum of header and body
    pub crc: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{SNAPSHOT_FOOTER_SIZE, SNAPSHOT_HEADER_SIZE};
    use lad_core::{Discriminator, QueryType, RecordedState, Sample, SampleValue, ValueSource};
    use std::sync::Arc;

    fn entries(n: u64) -> Vec<SeriesEntry> {
        let d = Discriminator::new(QueryType::ChannelValue, ValueSource::Flight, RecordedState::Realtime);
        let samples = (0..n)
            .map(|i| {
                Arc::new(
                    Sample::new("A-1", Timestamp::from_millis(i), SampleValue::Unsigned(i))
                        .with_sequence(i),
                )
            })
            .collect();
        vec![SeriesEntry::new(d, "A-1", samples)]
    }

    #[test]
    fn test_write_snapshot_basic() {
        let temp_dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(temp_dir.path().to_path_buf(), "lad").unwrap();

        let info = writer.write(&entries(5)).unwrap();
        assert!(info.path.exists());
        assert_eq!(info.series_count, 1);
        assert_eq!(info.sample_count, 5);
        assert!(info
            .path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("lad-"));

        let file_len = std::fs::metadata(&info.path).unwrap().len();
        assert_eq!(file_len, info.bytes);
        assert!(file_len > (SNAPSHOT_HEADER_SIZE + SNAPSHOT_FOOTER_SIZE) as u64);
    }

    #[test]
    fn test_write_creates_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        let nested = temp_dir.path().join("a").join("b");
        let writer = SnapshotWriter::new(nested.clone(), "lad").unwrap();
        writer.write(&[]).unwrap();
        assert_eq!(list_snapshots(&nested, "lad").unwrap().len(), 1);
    }

    #[test]
    fn test_successive_snapshots_have_increasing_timestamps() {
        let temp_dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(temp_dir.path().to_path_buf(), "lad").unwrap();

        // A snapshot stamped far in the future forces the next one past it
        let future = Timestamp::now().as_micros() + 60_000_000;
        std::fs::write(snapshot_path(temp_dir.path(), "lad", future), b"x").unwrap();

        let a = writer.write(&entries(1)).unwrap();
        let b = writer.write(&entries(1)).unwrap();
        assert!(a.timestamp.as_micros() > future);
        assert!(b.timestamp > a.timestamp);
    }

    #[test]
    fn test_no_temp_files_left_after_write() {
        let temp_dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(temp_dir.path().to_path_buf(), "lad").unwrap();
        writer.write(&entries(3)).unwrap();

        let temps = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .ends_with(".tmp")
            })
            .count();
        assert_eq!(temps, 0);
    }

    #[test]
    fn test_cleanup_temp_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(temp_dir.path().to_path_buf(), "lad").unwrap();

        std::fs::write(temp_path(temp_dir.path(), "lad", 1), b"partial").unwrap();
        std::fs::write(temp_path(temp_dir.path(), "lad", 2), b"partial").unwrap();
        std::fs::write(temp_path(temp_dir.path(), "other", 3), b"partial").unwrap();

        assert_eq!(writer.cleanup_temp_files().unwrap(), 2);
        assert!(temp_path(temp_dir.path(), "other", 3).exists());
    }

    #[test]
    fn test_prune_keeps_newest() {
        let temp_dir = tempfile::tempdir().unwrap();
        let writer = SnapshotWriter::new(temp_dir.path().to_path_buf(), "lad").unwrap();
        let infos: Vec<SnapshotInfo> = (0..5).map(|_| writer.write(&entries(1)).unwrap()).collect();

        let removed = writer.prune(2).unwrap();
        assert_eq!(removed.len(), 3);

        let remaining: Vec<PathBuf> = list_snapshots(temp_dir.path(), "lad")
            .unwrap()
            .into_iter()
            .map(|(_, p)| p)
            .collect();
        assert_eq!(remaining, vec![infos[3].path.clone(), infos[4].path.clone()]);

        assert!(writer.prune(0).unwrap().is_empty());
    }
}
