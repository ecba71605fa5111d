//! Snapshot manager: backup, restore and listing over the container tree
//!
//! Backups walk the tree, write one crash-safe file through
//! [`SnapshotWriter`], then prune old files. Restores read through
//! [`SnapshotReader`] and bulk-load via [`ContainerTree::route_batch`], so
//! restored series are bounded exactly like live ones.

use lad_core::{LadError, LadResult, Timestamp};
use lad_durability::{list_snapshots, SeriesEntry, SnapshotInfo, SnapshotReader, SnapshotWriter};
use lad_storage::ContainerTree;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// One snapshot file on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupInfo {
    /// Timestamp embedded in the file name
    pub timestamp: Timestamp,
    /// Path
    pub path: PathBuf,
    /// File size
    pub bytes: u64,
}

/// Outcome of a restore
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    /// Snapshot loaded, if any
    pub path: Option<PathBuf>,
    /// Series in the snapshot
    pub series: usize,
    /// Samples inserted
    pub loaded: usize,
    /// Samples rejected while loading
    pub rejected: usize,
    /// Samples evicted while loading under the current policies
    pub evicted: usize,
    /// Highest ingest sequence found in the snapshot
    pub max_sequence: Option<u64>,
    /// Newer snapshots skipped because they could not be read
    pub skipped: usize,
}

/// Backup counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupStats {
    /// Snapshot directory
    pub directory: PathBuf,
    /// Backups written
    pub written: u64,
    /// Backups that failed
    pub failed: u64,
    /// Files deleted by retention
    pub pruned: u64,
    /// Time of the last successful backup
    pub last_backup: Option<Timestamp>,
}

/// Backup, restore and listing for one container tree
pub struct SnapshotManager {
    tree: Arc<ContainerTree>,
    writer: SnapshotWriter,
    reader: SnapshotReader,
    max_backups: usize,
    written: AtomicU64,
    failed: AtomicU64,
    pruned: AtomicU64,
    last_backup: AtomicU64,
}

impl SnapshotManager {
    /// Create a manager writing `{basename}-{timestamp}.snap` files into
    /// `directory`, which is created if missing.
    pub fn new(
        tree: Arc<ContainerTree>,
        directory: PathBuf,
        basename: &str,
        max_backups: usize,
    ) -> LadResult<Self> {
        let writer = SnapshotWriter::new(directory.clone(), basename).map_err(|e| {
            LadError::Startup(format!(
                "cannot create snapshot directory '{}': {}",
                directory.display(),
                e
            ))
        })?;
        Ok(SnapshotManager {
            tree,
            writer,
            reader: SnapshotReader::new(),
            max_backups,
            written: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            pruned: AtomicU64::new(0),
            last_backup: AtomicU64::new(0),
        })
    }

    /// Snapshot directory
    pub fn directory(&self) -> &Path {
        self.writer.snapshots_dir()
    }

    /// Remove temporary files left by an interrupted backup
    pub fn cleanup_temp_files(&self) -> usize {
        match self.writer.cleanup_temp_files() {
            Ok(0) => 0,
            Ok(count) => {
                info!(target: "lad::snapshot", count, "Removed stale temporary snapshot files");
                count
            }
            Err(e) => {
                warn!(target: "lad::snapshot", error = %e, "Failed to clean temporary snapshot files");
                0
            }
        }
    }

    fn collect(&self) -> Vec<SeriesEntry> {
        let mut entries = Vec::new();
        self.tree.for_each_series(|discriminator, series| {
            let samples = series.samples();
            if !samples.is_empty() {
                entries.push(SeriesEntry::new(
                    (**discriminator).clone(),
                    series.identifier(),
                    samples,
                ));
            }
        });
        entries
    }

    /// Write the whole tree to a new snapshot, then prune old ones.
    pub fn backup_now(&self) -> LadResult<SnapshotInfo> {
        let entries = self.collect();
        let info = match self.writer.write(&entries) {
            Ok(info) => info,
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                return Err(e.into());
            }
        };
        self.written.fetch_add(1, Ordering::Relaxed);
        self.last_backup
            .store(info.timestamp.as_micros(), Ordering::Relaxed);

        info!(
            target: "lad::snapshot",
            path = ?info.path,
            series = info.series_count,
            samples = info.sample_count,
            bytes = info.bytes,
            "Backup written"
        );

        match self.writer.prune(self.max_backups) {
            Ok(removed) if !removed.is_empty() => {
                self.pruned
                    .fetch_add(removed.len() as u64, Ordering::Relaxed);
                debug!(target: "lad::snapshot", count = removed.len(), "Pruned old backups");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(target: "lad::snapshot", error = %e, "Failed to prune old backups");
            }
        }
        Ok(info)
    }

    /// Snapshots in the directory, oldest first
    pub fn list_backups(&self) -> LadResult<Vec<BackupInfo>> {
        let snapshots = list_snapshots(self.writer.snapshots_dir(), self.writer.basename())?;
        Ok(snapshots
            .into_iter()
            .map(|(ts, path)| BackupInfo {
                timestamp: Timestamp::from_micros(ts),
                bytes: std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0),
                path,
            })
            .collect())
    }

    /// Load one snapshot file into the tree
    pub fn restore_from(&self, path: &Path) -> LadResult<RestoreReport> {
        let snapshot = self.reader.load(path)?;
        let series = snapshot.entries.len();
        let max_sequence = (snapshot.header.sample_count > 0).then(|| snapshot.max_sequence());
        let outcome = self
            .tree
            .route_batch(snapshot.entries.into_iter().flat_map(SeriesEntry::into_records));

        let report = RestoreReport {
            path: Some(path.to_path_buf()),
            series,
            loaded: outcome.loaded,
            rejected: outcome.rejected,
            evicted: outcome.evicted,
            max_sequence,
            skipped: 0,
        };
        info!(
            target: "lad::snapshot",
            path = ?path,
            series,
            loaded = report.loaded,
            rejected = report.rejected,
            "Snapshot restored"
        );
        Ok(report)
    }

    /// Load the newest readable snapshot.
    ///
    /// Unreadable files are skipped with a warning and the next older one is
    /// tried. With no usable snapshot the tree stays empty and the report
    /// has no path.
    pub fn restore_newest(&self) -> RestoreReport {
        let snapshots = match list_snapshots(self.writer.snapshots_dir(), self.writer.basename()) {
            Ok(snapshots) => snapshots,
            Err(e) => {
                warn!(target: "lad::snapshot", error = %e, "Cannot list snapshots, starting empty");
                return RestoreReport::default();
            }
        };

        let mut skipped = 0;
        for (_, path) in snapshots.iter().rev() {
            match self.restore_from(path) {
                Ok(mut report) => {
                    report.skipped = skipped;
                    return report;
                }
                Err(e) => {
                    skipped += 1;
                    warn!(target: "lad::snapshot", path = ?path, error = %e, "Skipping unreadable snapshot");
                }
            }
        }

        if snapshots.is_empty() {
            info!(target: "lad::snapshot", dir = ?self.directory(), "No snapshot to restore");
        } else {
            warn!(target: "lad::snapshot", skipped, "No readable snapshot, starting empty");
        }
        RestoreReport {
            skipped,
            ..RestoreReport::default()
        }
    }

    /// Counters
    pub fn stats(&self) -> BackupStats {
        let last = self.last_backup.load(Ordering::Relaxed);
        BackupStats {
            directory: self.directory().to_path_buf(),
            written: self.written.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            pruned: self.pruned.load(Ordering::Relaxed),
            last_backup: (last > 0).then(|| Timestamp::from_micros(last)),
        }
    }
}

/// Periodic backup thread with a fixed delay between runs
pub struct BackupScheduler {
    manager: Arc<SnapshotManager>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl BackupScheduler {
    /// Create a scheduler
    pub fn new(manager: Arc<SnapshotManager>, interval: Duration) -> Self {
        BackupScheduler {
            manager,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the background thread
    ///
    /// The thread runs until `shutdown()` is called. A failed backup is
    /// logged and the schedule continues.
    pub fn start(&self) -> io::Result<JoinHandle<()>> {
        let manager = Arc::clone(&self.manager);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;

        thread::Builder::new()
            .name("lad-backup".to_string())
            .spawn(move || {
                while !shutdown.load(Ordering::Relaxed) {
                    let sleep_interval = Duration::from_millis(100).min(interval);
                    let mut elapsed = Duration::ZERO;
                    while elapsed < interval {
                        if shutdown.load(Ordering::Relaxed) {
                            return;
                        }
                        thread::sleep(sleep_interval);
                        elapsed += sleep_interval;
                    }

                    if let Err(e) = manager.backup_now() {
                        error!(target: "lad::snapshot", error = %e, "Scheduled backup failed");
                    }
                }
            })
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}
