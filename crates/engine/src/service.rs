//! Lifecycle coordinator
//!
//! [`LadService::start`] brings the store up in a fixed order and only
//! returns once sources may attach:
//!
//! 1. Validate the configuration and build the container tree and router
//! 2. Start the shard workers
//! 3. Restore a snapshot, if configured, to completion
//! 4. Start the backup schedule and the idle reaper
//! 5. Open the source gate
//!
//! Shutdown runs the reverse: close the gate, stop the background threads,
//! cancel queued events and join the workers.

use lad_core::{
    Discriminator, DiscriminatorFilter, IdentifierPattern, LadError, LadQuery, LadResult,
    QueryResult, QueryType, Record, Timestamp,
};
use lad_durability::SnapshotInfo;
use lad_storage::{ContainerTree, DepthEntry, Reaper, RetentionPolicy, SeriesStats};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::LadConfig;
use crate::decode::{JsonSampleDecoder, SampleDecoder};
use crate::ingest::{
    DiscardHandler, EventHandler, IngestRouter, InsertHandler, PublishOutcome, RouterConfig,
};
use crate::query::{InsertTarget, QueryRequest};
use crate::snapshot::{BackupInfo, BackupScheduler, RestoreReport, SnapshotManager};
use crate::stats::LadStats;

const STARTING: u8 = 0;
const READY: u8 = 1;
const STOPPING: u8 = 2;
const STOPPED: u8 = 3;

fn state_name(state: u8) -> &'static str {
    match state {
        STARTING => "starting",
        READY => "ready",
        STOPPING => "stopping",
        _ => "stopped",
    }
}

fn check_gate(state: &AtomicU8) -> LadResult<()> {
    match state.load(Ordering::Acquire) {
        READY => Ok(()),
        STARTING => Err(LadError::NotReady("startup has not completed".to_string())),
        _ => Err(LadError::ShuttingDown),
    }
}

/// Startup overrides usually supplied on the command line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Restore this snapshot file instead of the newest one
    pub restore_path: Option<PathBuf>,
    /// Restore the newest snapshot even when persistence is disabled
    pub force_restore: bool,
}

/// A source's connection to the ingest pipeline.
///
/// Publishing fails with [`LadError::ShuttingDown`] once the service stops.
pub struct SourceHandle {
    name: String,
    router: Arc<IngestRouter>,
    state: Arc<AtomicU8>,
}

impl SourceHandle {
    /// Source name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Publish a decoded record. Returns its sequence number.
    pub fn publish_record(&self, record: Record) -> LadResult<u64> {
        check_gate(&self.state)?;
        self.router.publish_record(record)
    }

    /// Publish raw bytes decoded on the shard worker
    pub fn publish_raw(&self, bytes: Vec<u8>, decoder: Arc<dyn SampleDecoder>) -> LadResult<u64> {
        check_gate(&self.state)?;
        self.router.publish_raw(bytes, decoder)
    }
}

/// A running LAD store
pub struct LadService {
    config: LadConfig,
    tree: Arc<ContainerTree>,
    router: Arc<IngestRouter>,
    snapshots: Option<Arc<SnapshotManager>>,
    backup: Option<BackupScheduler>,
    reaper: Option<Reaper>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    state: Arc<AtomicU8>,
    restore: Option<RestoreReport>,
    started_at: Timestamp,
}

impl LadService {
    /// Start a service.
    ///
    /// # Errors
    ///
    /// Invalid configuration, an uncreatable snapshot directory while
    /// persistence is enabled, or a thread that cannot be spawned. A
    /// snapshot that cannot be restored is not an error: the store starts
    /// empty.
    pub fn start(config: LadConfig, options: StartOptions) -> LadResult<Self> {
        config.validate()?;
        let state = Arc::new(AtomicU8::new(STARTING));

        let tree = Arc::new(ContainerTree::new(config.retention.policy_table()));
        let router = Arc::new(IngestRouter::new(RouterConfig::from(&config.ingest)));

        let handler: Arc<dyn EventHandler> = if config.ingest.discard {
            warn!(target: "lad::service", "Discard mode: ingested events are not stored");
            Arc::new(DiscardHandler::new())
        } else {
            Arc::new(InsertHandler::new(Arc::clone(&tree)))
        };
        router
            .start(handler)
            .map_err(|e| LadError::Startup(format!("cannot start shard workers: {}", e)))?;

        let persistence = &config.persistence;
        let wants_restore = options.restore_path.is_some()
            || options.force_restore
            || (persistence.enabled && persistence.restore);

        let snapshots = if persistence.enabled {
            Some(Arc::new(SnapshotManager::new(
                Arc::clone(&tree),
                persistence.directory.clone(),
                &persistence.basename,
                persistence.max_backups,
            )?))
        } else if wants_restore {
            match SnapshotManager::new(
                Arc::clone(&tree),
                persistence.directory.clone(),
                &persistence.basename,
                persistence.max_backups,
            ) {
                Ok(manager) => Some(Arc::new(manager)),
                Err(e) => {
                    warn!(target: "lad::service", error = %e, "Snapshot directory unavailable, skipping restore");
                    None
                }
            }
        } else {
            None
        };

        let restore = match (&snapshots, wants_restore) {
            (Some(manager), true) => {
                manager.cleanup_temp_files();
                let report = match &options.restore_path {
                    Some(path) => manager.restore_from(path).unwrap_or_else(|e| {
                        warn!(target: "lad::service", path = ?path, error = %e, "Restore failed, starting empty");
                        RestoreReport {
                            skipped: 1,
                            ..RestoreReport::default()
                        }
                    }),
                    None => manager.restore_newest(),
                };
                if let Some(max) = report.max_sequence {
                    router.advance_sequence(max.saturating_add(1));
                }
                Some(report)
            }
            (Some(manager), false) => {
                manager.cleanup_temp_files();
                None
            }
            (None, _) => None,
        };

        let mut threads = Vec::new();
        let backup = match (&snapshots, persistence.enabled) {
            (Some(manager), true) => {
                let scheduler = BackupScheduler::new(Arc::clone(manager), persistence.interval());
                threads.push(scheduler.start().map_err(|e| {
                    LadError::Startup(format!("cannot start backup thread: {}", e))
                })?);
                Some(scheduler)
            }
            _ => None,
        };

        let reaper = if config.reaping.enabled {
            let reaper = Reaper::new(
                Arc::clone(&tree),
                Duration::from_secs(config.reaping.interval_secs),
                Duration::from_secs(config.reaping.idle_ttl_secs),
            );
            match reaper.start() {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    if let Some(scheduler) = &backup {
                        scheduler.shutdown();
                    }
                    for handle in threads {
                        let _ = handle.join();
                    }
                    return Err(LadError::Startup(format!("cannot start reaper thread: {}", e)));
                }
            }
            Some(reaper)
        } else {
            None
        };

        state.store(READY, Ordering::Release);
        info!(
            target: "lad::service",
            shards = config.ingest.shards,
            ring_capacity = config.ingest.ring_capacity,
            persistence = persistence.enabled,
            restored = restore.as_ref().map_or(0, |r| r.loaded),
            "LAD service ready"
        );

        Ok(LadService {
            config,
            tree,
            router,
            snapshots,
            backup,
            reaper,
            threads: Mutex::new(threads),
            state,
            restore,
            started_at: Timestamp::now(),
        })
    }

    /// Configuration the service was started with
    pub fn config(&self) -> &LadConfig {
        &self.config
    }

    /// Whether sources may attach
    pub fn is_ready(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }

    /// Outcome of the startup restore, if one ran
    pub fn restore_report(&self) -> Option<&RestoreReport> {
        self.restore.as_ref()
    }

    /// Attach a data source. Fails before startup completes and after stop.
    pub fn attach_source(&self, name: impl Into<String>) -> LadResult<SourceHandle> {
        check_gate(&self.state)?;
        let name = name.into();
        info!(target: "lad::service", source = %name, "Source attached");
        Ok(SourceHandle {
            name,
            router: Arc::clone(&self.router),
            state: Arc::clone(&self.state),
        })
    }

    /// Decode a JSON insert body for `{queryType}/{valueSource}/{recordedState}/insert`
    /// and publish every record.
    ///
    /// A body that fails to decode publishes nothing. Once decoded, every
    /// record is attempted; the outcome says how many were accepted and how
    /// many were dropped under backpressure.
    pub fn insert(&self, path: &str, body: &[u8]) -> LadResult<PublishOutcome> {
        check_gate(&self.state)?;
        let target = InsertTarget::from_path(path)?;
        let records = JsonSampleDecoder::scoped(target).decode(body)?;
        let outcome = self.router.publish_batch(records)?;
        if outcome.dropped > 0 {
            warn!(
                target: "lad::service",
                target_path = %target,
                published = outcome.published,
                dropped = outcome.dropped,
                "Insert partially dropped"
            );
        }
        Ok(outcome)
    }

    /// Run a query
    pub fn query(&self, query: &LadQuery) -> LadResult<QueryResult> {
        self.tree.query(query)
    }

    /// Run a parsed request
    pub fn query_request(&self, request: &QueryRequest) -> LadResult<QueryResult> {
        self.tree.query(&request.query)
    }

    /// Series occupancy without sample bodies
    pub fn depth(&self, filter: &DiscriminatorFilter) -> Vec<DepthEntry> {
        self.tree.depth(filter)
    }

    /// Per-series statistics
    pub fn series_stats(
        &self,
        filter: &DiscriminatorFilter,
        patterns: &[IdentifierPattern],
    ) -> Vec<(Arc<Discriminator>, SeriesStats)> {
        self.tree
            .series_matching(filter, patterns)
            .into_iter()
            .map(|(d, series)| (d, series.stats()))
            .collect()
    }

    /// Delete matching series. Returns the number removed.
    pub fn remove(&self, filter: &DiscriminatorFilter, patterns: &[IdentifierPattern]) -> usize {
        let removed = self.tree.remove(filter, patterns);
        info!(target: "lad::service", removed, "Removed series");
        removed
    }

    /// Delete everything. Returns the number of series removed.
    pub fn clear(&self) -> usize {
        let removed = self.tree.clear();
        info!(target: "lad::service", removed, "Cleared store");
        removed
    }

    /// Change the retention policy of a query type, live series included.
    /// Returns the samples evicted by the change.
    pub fn set_policy(&self, query_type: QueryType, policy: RetentionPolicy) -> usize {
        let evicted = self.tree.set_policy(query_type, policy);
        info!(
            target: "lad::service",
            query_type = %query_type,
            max_count = policy.max_count,
            evicted,
            "Retention policy changed"
        );
        evicted
    }

    fn snapshot_manager(&self) -> LadResult<&Arc<SnapshotManager>> {
        self.snapshots
            .as_ref()
            .ok_or_else(|| LadError::config("persistence is not configured"))
    }

    /// Write a snapshot now
    pub fn backup_now(&self) -> LadResult<SnapshotInfo> {
        self.snapshot_manager()?.backup_now()
    }

    /// Snapshots on disk, oldest first
    pub fn list_backups(&self) -> LadResult<Vec<BackupInfo>> {
        self.snapshot_manager()?.list_backups()
    }

    /// Wait until published events have been handled
    pub fn drain(&self, timeout: Duration) -> bool {
        self.router.drain(timeout)
    }

    /// Counters
    pub fn stats(&self) -> LadStats {
        LadStats {
            state: state_name(self.state.load(Ordering::Acquire)),
            started_at: self.started_at,
            uptime_secs: Timestamp::now().saturating_elapsed(self.started_at).as_secs(),
            ingest: self.router.stats(),
            population: self.tree.counts(),
            backups: self.snapshots.as_ref().map(|m| m.stats()),
            restore: self.restore.clone(),
            reaped: self.reaper.as_ref().map_or(0, Reaper::reaped),
        }
    }

    /// Stop the service. Safe to call more than once.
    pub fn shutdown(&self) {
        if self
            .state
            .compare_exchange(READY, STOPPING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        if let Some(scheduler) = &self.backup {
            scheduler.shutdown();
        }
        if let Some(reaper) = &self.reaper {
            reaper.shutdown();
        }
        for handle in self.threads.lock().drain(..) {
            if handle.join().is_err() {
                error!(target: "lad::service", "Background thread exited abnormally");
            }
        }

        let cancelled = self.router.shutdown();
        self.state.store(STOPPED, Ordering::Release);
        info!(target: "lad::service", cancelled, "LAD service stopped");
    }
}

impl Drop for LadService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lad_core::{RecordedState, Sample, SampleValue, ValueSource};

    fn record(id: &str, ert_ms: u64) -> Record {
        Record::new(
            Discriminator::new(QueryType::ChannelValue, ValueSource::Flight, RecordedState::Realtime),
            Sample::new(id, Timestamp::from_millis(ert_ms), SampleValue::Unsigned(ert_ms)),
        )
    }

    #[test]
    fn test_gate_rejects_before_ready_and_after_stop() {
        let state = AtomicU8::new(STARTING);
        assert!(matches!(check_gate(&state), Err(LadError::NotReady(_))));
        state.store(READY, Ordering::Release);
        assert!(check_gate(&state).is_ok());
        state.store(STOPPED, Ordering::Release);
        assert!(matches!(check_gate(&state), Err(LadError::ShuttingDown)));
    }

    #[test]
    fn test_start_publish_query_stop() {
        let service = LadService::start(LadConfig::default(), StartOptions::default()).unwrap();
        assert!(service.is_ready());
        assert!(service.restore_report().is_none());

        let source = service.attach_source("test").unwrap();
        for i in 0..10 {
            source.publish_record(record("A-1", i)).unwrap();
        }
        assert!(service.drain(Duration::from_secs(5)));

        let result = service
            .query(&LadQuery::new(DiscriminatorFilter::all()).with_max_results(5))
            .unwrap();
        assert_eq!(result.len(), 5);
        assert_eq!(result.records[4].sample.ert, Some(Timestamp::from_millis(9)));

        service.shutdown();
        assert_eq!(service.stats().state, "stopped");
        assert!(matches!(source.publish_record(record("A-1", 99)), Err(LadError::ShuttingDown)));
        assert!(matches!(service.attach_source("late"), Err(LadError::ShuttingDown)));
        service.shutdown();
    }

    #[test]
    fn test_invalid_config_aborts_start() {
        let mut config = LadConfig::default();
        config.ingest.shards = 0;
        let err = LadService::start(config, StartOptions::default()).err().unwrap();
        assert!(matches!(err, LadError::Config(_)));
    }

    #[test]
    fn test_backup_without_persistence_is_config_error() {
        let service = LadService::start(LadConfig::default(), StartOptions::default()).unwrap();
        assert!(matches!(service.backup_now(), Err(LadError::Config(_))));
        assert!(service.stats().backups.is_none());
    }

    #[test]
    fn test_insert_path() {
        let service = LadService::start(LadConfig::default(), StartOptions::default()).unwrap();
        let body = serde_json::to_vec(&vec![record("A-1", 1), record("A-2", 2)]).unwrap();
        let outcome = service.insert("eha/fsw/realtime/insert", &body).unwrap();
        assert_eq!(outcome.published, 2);
        assert_eq!(outcome.dropped, 0);
        assert!(service.drain(Duration::from_secs(5)));
        assert_eq!(service.depth(&DiscriminatorFilter::all()).len(), 2);

        let err = service.insert("alarm/fsw/realtime/insert", &body).unwrap_err();
        assert!(matches!(err, LadError::Decode(_)));
    }

    #[test]
    fn test_insert_under_backpressure_reports_every_record() {
        let mut config = LadConfig::default();
        config.ingest.shards = 1;
        config.ingest.ring_capacity = 1;
        config.ingest.publish_timeout_ms = 0;
        let service = LadService::start(config, StartOptions::default()).unwrap();

        let body: Vec<Record> = (0..2_000).map(|i| record(&format!("C-{}", i), i)).collect();
        let body = serde_json::to_vec(&body).unwrap();
        let outcome = service.insert("eha/fsw/realtime/insert", &body).unwrap();
        assert_eq!(outcome.published + outcome.dropped, 2_000);
        assert!(service.drain(Duration::from_secs(10)));

        let stats = service.stats();
        assert_eq!(stats.ingest.published, outcome.published as u64);
        assert_eq!(stats.ingest.dropped, outcome.dropped as u64);
        assert_eq!(stats.population.samples, outcome.published);
    }

    #[test]
    fn test_discard_mode_stores_nothing() {
        let mut config = LadConfig::default();
        config.ingest.discard = true;
        let service = LadService::start(config, StartOptions::default()).unwrap();
        let source = service.attach_source("profiler").unwrap();
        for i in 0..20 {
            source.publish_record(record("A-1", i)).unwrap();
        }
        assert!(service.drain(Duration::from_secs(5)));
        let stats = service.stats();
        assert_eq!(stats.ingest.published, 20);
        assert_eq!(stats.population.series, 0);
    }
}
