//! Sharded ingestion router
//!
//! Events get a strictly increasing sequence number and land in partition
//! `sequence % N` of a fixed set of bounded channels. Shard worker `i` is
//! the only consumer of partition `i`, so each event is handled exactly
//! once and partitions drain in parallel.
//!
//! # Ordering
//!
//! Sequence assignment and the send into the partition happen under one
//! short-lived ordering lock, so every partition receives its sequences in
//! increasing order. Publishers wait for that lock and for partition space
//! against the same deadline; when it passes the event is dropped.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use lad_core::{LadError, LadResult, Record};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::handler::{EventHandler, IngestEvent, Payload};
use crate::config::IngestConfig;
use crate::decode::SampleDecoder;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const NO_SEQUENCE: u64 = u64::MAX;

/// Router sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterConfig {
    /// Total buffer capacity, split evenly across partitions
    pub capacity: usize,
    /// Number of partitions and shard workers
    pub shards: usize,
    /// Longest a publisher waits before its event is dropped
    pub publish_timeout: Duration,
}

impl From<&IngestConfig> for RouterConfig {
    fn from(config: &IngestConfig) -> Self {
        RouterConfig {
            capacity: config.ring_capacity,
            shards: config.shards,
            publish_timeout: config.publish_timeout(),
        }
    }
}

struct Partition {
    tx: Sender<IngestEvent>,
    rx: Receiver<IngestEvent>,
    last_sequence: AtomicU64,
    processed: AtomicU64,
}

struct RouterInner {
    partitions: Vec<Partition>,
    publish_timeout: Duration,
    order: Mutex<()>,
    next_sequence: AtomicU64,
    pending: AtomicUsize,
    drain_lock: Mutex<()>,
    drained: Condvar,
    stopped: AtomicBool,
    published: AtomicU64,
    dropped: AtomicU64,
    decode_errors: AtomicU64,
    handler_failures: AtomicU64,
    cancelled: AtomicU64,
}

impl RouterInner {
    fn partition_of(&self, sequence: u64) -> usize {
        (sequence % self.partitions.len() as u64) as usize
    }

    fn record_drop(&self, partition: usize, sequence: u64) -> LadError {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if dropped.is_power_of_two() {
            warn!(
                target: "lad::ingest",
                partition,
                sequence,
                dropped,
                "Ingest buffer full, dropping events"
            );
        }
        LadError::Capacity {
            partition,
            sequence,
        }
    }

    fn finish_one(&self) {
        let prev = self.pending.fetch_sub(1, Ordering::AcqRel);
        // Lock before notifying so a drain() between its check and wait()
        // cannot miss the wakeup.
        if prev == 1 {
            let _guard = self.drain_lock.lock();
            self.drained.notify_all();
        }
    }
}

/// Marks one received event finished, even if its handler panics
struct PendingGuard<'a> {
    inner: &'a RouterInner,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.inner.finish_one();
    }
}

/// Per-partition counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardStats {
    /// Partition index
    pub shard: usize,
    /// Last sequence handled by the worker
    pub last_sequence: Option<u64>,
    /// Events handled
    pub processed: u64,
    /// Events waiting in the partition
    pub queued: usize,
}

/// Router-wide counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouterStats {
    /// Next sequence number to be assigned
    pub next_sequence: u64,
    /// Events accepted into a partition
    pub published: u64,
    /// Events dropped on a full partition
    pub dropped: u64,
    /// Events whose payload failed to decode
    pub decode_errors: u64,
    /// Events whose handler failed or panicked
    pub handler_failures: u64,
    /// Events discarded at shutdown
    pub cancelled: u64,
    /// Capacity of each partition
    pub partition_capacity: usize,
    /// Per-partition detail
    pub shards: Vec<ShardStats>,
}

/// Outcome of publishing a batch of records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PublishOutcome {
    /// Records accepted into a partition
    pub published: usize,
    /// Records dropped, on a full partition or after the router stopped
    pub dropped: usize,
}

/// Partitioned event router with a fixed pool of shard workers
pub struct IngestRouter {
    inner: Arc<RouterInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    partition_capacity: usize,
}

impl IngestRouter {
    /// Create a router. Events can be published before workers start; they
    /// queue until [`start`](Self::start) is called.
    pub fn new(config: RouterConfig) -> Self {
        let shards = config.shards.max(1);
        let partition_capacity = ((config.capacity + shards - 1) / shards).max(1);
        let partitions = (0..shards)
            .map(|_| {
                let (tx, rx) = bounded(partition_capacity);
                Partition {
                    tx,
                    rx,
                    last_sequence: AtomicU64::new(NO_SEQUENCE),
                    processed: AtomicU64::new(0),
                }
            })
            .collect();

        IngestRouter {
            inner: Arc::new(RouterInner {
                partitions,
                publish_timeout: config.publish_timeout,
                order: Mutex::new(()),
                next_sequence: AtomicU64::new(0),
                pending: AtomicUsize::new(0),
                drain_lock: Mutex::new(()),
                drained: Condvar::new(),
                stopped: AtomicBool::new(false),
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
                decode_errors: AtomicU64::new(0),
                handler_failures: AtomicU64::new(0),
                cancelled: AtomicU64::new(0),
            }),
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            partition_capacity,
        }
    }

    /// Number of partitions
    pub fn shards(&self) -> usize {
        self.inner.partitions.len()
    }

    /// Spawn one worker per partition.
    ///
    /// Workers are named `lad-shard-0`, `lad-shard-1`, etc.
    pub fn start(&self, handler: Arc<dyn EventHandler>) -> io::Result<()> {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::Other, "ingest router is stopped"));
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "ingest workers already started",
            ));
        }

        let mut workers = self.workers.lock();
        for shard in 0..self.shards() {
            let inner = Arc::clone(&self.inner);
            let handler = Arc::clone(&handler);
            let handle = std::thread::Builder::new()
                .name(format!("lad-shard-{}", shard))
                .spawn(move || shard_loop(&inner, shard, handler.as_ref()))?;
            workers.push(handle);
        }
        debug!(target: "lad::ingest", shards = self.shards(), "Shard workers started");
        Ok(())
    }

    /// Publish an already decoded record. Returns its sequence number.
    pub fn publish_record(&self, record: Record) -> LadResult<u64> {
        self.publish(Payload::Decoded(record))
    }

    /// Publish every record of a batch, one event each.
    ///
    /// A full partition drops only the record being published; the rest of
    /// the batch is still attempted. If the router stops part-way, the
    /// remaining records are counted as dropped.
    ///
    /// # Errors
    ///
    /// [`LadError::ShuttingDown`] if the router was stopped before any
    /// record was attempted.
    pub fn publish_batch(&self, records: Vec<Record>) -> LadResult<PublishOutcome> {
        let total = records.len();
        let mut outcome = PublishOutcome::default();
        for record in records {
            match self.publish_record(record) {
                Ok(_) => outcome.published += 1,
                Err(LadError::Capacity { .. }) => outcome.dropped += 1,
                Err(e) if outcome.published + outcome.dropped == 0 => return Err(e),
                Err(_) => {
                    outcome.dropped = total - outcome.published;
                    break;
                }
            }
        }
        Ok(outcome)
    }

    /// Publish raw bytes to be decoded on the shard worker.
    pub fn publish_raw(&self, bytes: Vec<u8>, decoder: Arc<dyn SampleDecoder>) -> LadResult<u64> {
        self.publish(Payload::Raw { bytes, decoder })
    }

    /// Publish a payload.
    ///
    /// Blocks at most the publish timeout. A dropped event still consumes
    /// its sequence number and is reported as [`LadError::Capacity`].
    pub fn publish(&self, payload: Payload) -> LadResult<u64> {
        let inner = &*self.inner;
        if inner.stopped.load(Ordering::Acquire) {
            return Err(LadError::ShuttingDown);
        }

        let deadline = Instant::now() + inner.publish_timeout;
        let Some(_order) = inner.order.try_lock_until(deadline) else {
            let sequence = inner.next_sequence.fetch_add(1, Ordering::AcqRel);
            return Err(inner.record_drop(inner.partition_of(sequence), sequence));
        };
        if inner.stopped.load(Ordering::Acquire) {
            return Err(LadError::ShuttingDown);
        }

        let sequence = inner.next_sequence.fetch_add(1, Ordering::AcqRel);
        let partition = inner.partition_of(sequence);
        inner.pending.fetch_add(1, Ordering::AcqRel);

        let event = IngestEvent { sequence, payload };
        match inner.partitions[partition].tx.send_deadline(event, deadline) {
            Ok(()) => {
                inner.published.fetch_add(1, Ordering::Relaxed);
                Ok(sequence)
            }
            Err(SendTimeoutError::Timeout(_)) | Err(SendTimeoutError::Disconnected(_)) => {
                inner.finish_one();
                Err(inner.record_drop(partition, sequence))
            }
        }
    }

    /// Never issue a sequence number below `next` again
    pub fn advance_sequence(&self, next: u64) {
        let prev = self.inner.next_sequence.fetch_max(next, Ordering::AcqRel);
        if next > prev {
            debug!(target: "lad::ingest", next, "Sequence advanced");
        }
    }

    /// Wait until every published event has been handled.
    ///
    /// Returns false if events are still pending when `timeout` elapses.
    pub fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.inner.drain_lock.lock();
        while self.inner.pending.load(Ordering::Acquire) > 0 {
            if self.inner.drained.wait_until(&mut guard, deadline).timed_out() {
                return self.inner.pending.load(Ordering::Acquire) == 0;
            }
        }
        true
    }

    /// Whether [`shutdown`](Self::shutdown) has run
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Stop accepting events, cancel everything still queued, and join the
    /// workers. Returns the number of events cancelled over the router's
    /// lifetime. Safe to call more than once.
    pub fn shutdown(&self) -> u64 {
        let inner = &*self.inner;
        if inner.stopped.swap(true, Ordering::AcqRel) {
            return inner.cancelled.load(Ordering::Relaxed);
        }

        // Waits out any publisher that is mid-send
        let order = inner.order.lock();
        let mut cancelled = 0u64;
        for partition in &inner.partitions {
            while partition.rx.try_recv().is_ok() {
                cancelled += 1;
                inner.finish_one();
            }
        }
        drop(order);
        inner.cancelled.fetch_add(cancelled, Ordering::Relaxed);

        let mut workers = self.workers.lock();
        for handle in workers.drain(..) {
            if handle.join().is_err() {
                error!(target: "lad::ingest", "Shard worker exited abnormally");
            }
        }

        let total = inner.cancelled.load(Ordering::Relaxed);
        info!(target: "lad::ingest", cancelled = total, "Ingest router stopped");
        total
    }

    /// Counters
    pub fn stats(&self) -> RouterStats {
        let inner = &*self.inner;
        RouterStats {
            next_sequence: inner.next_sequence.load(Ordering::Acquire),
            published: inner.published.load(Ordering::Relaxed),
            dropped: inner.dropped.load(Ordering::Relaxed),
            decode_errors: inner.decode_errors.load(Ordering::Relaxed),
            handler_failures: inner.handler_failures.load(Ordering::Relaxed),
            cancelled: inner.cancelled.load(Ordering::Relaxed),
            partition_capacity: self.partition_capacity,
            shards: inner
                .partitions
                .iter()
                .enumerate()
                .map(|(shard, p)| {
                    let last = p.last_sequence.load(Ordering::Acquire);
                    ShardStats {
                        shard,
                        last_sequence: (last != NO_SEQUENCE).then_some(last),
                        processed: p.processed.load(Ordering::Relaxed),
                        queued: p.rx.len(),
                    }
                })
                .collect(),
        }
    }
}

impl Drop for IngestRouter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("(non-string panic)")
}

fn shard_loop(inner: &RouterInner, shard: usize, handler: &dyn EventHandler) {
    let partition = &inner.partitions[shard];
    loop {
        let event = match partition.rx.recv_timeout(POLL_INTERVAL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => {
                if inner.stopped.load(Ordering::Acquire) {
                    return;
                }
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => return,
        };

        let _guard = PendingGuard { inner };
        if inner.stopped.load(Ordering::Acquire) {
            inner.cancelled.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        let sequence = event.sequence;
        // A failing event must not take the worker down with it
        match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            handler.on_event(shard, event)
        })) {
            Ok(Ok(())) => {}
            Ok(Err(LadError::Decode(detail))) => {
                let count = inner.decode_errors.fetch_add(1, Ordering::Relaxed) + 1;
                if count.is_power_of_two() {
                    warn!(
                        target: "lad::ingest",
                        shard,
                        sequence,
                        decode_errors = count,
                        detail = %detail,
                        "Dropping undecodable event"
                    );
                }
            }
            Ok(Err(e)) => {
                inner.handler_failures.fetch_add(1, Ordering::Relaxed);
                warn!(target: "lad::ingest", shard, sequence, error = %e, "Event handler failed");
            }
            Err(panic) => {
                inner.handler_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    target: "lad::ingest",
                    shard,
                    sequence,
                    "Event handler panicked: {}",
                    panic_message(panic.as_ref())
                );
            }
        }

        partition.last_sequence.store(sequence, Ordering::Release);
        partition.processed.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::DiscardHandler;
    use lad_core::{Discriminator, QueryType, RecordedState, Sample, SampleValue, Timestamp, ValueSource};

    fn router(capacity: usize, shards: usize, timeout_ms: u64) -> IngestRouter {
        IngestRouter::new(RouterConfig {
            capacity,
            shards,
            publish_timeout: Duration::from_millis(timeout_ms),
        })
    }

    fn record(i: u64) -> Record {
        Record::new(
            Discriminator::new(QueryType::ChannelValue, ValueSource::Flight, RecordedState::Realtime),
            Sample::new(format!("C-{}", i % 3), Timestamp::from_millis(i), SampleValue::Unsigned(i)),
        )
    }

    struct Panicky;

    impl EventHandler for Panicky {
        fn on_event(&self, _shard: usize, event: IngestEvent) -> LadResult<()> {
            match event.sequence % 3 {
                0 => panic!("boom"),
                1 => Err(LadError::decode("bad")),
                _ => Ok(()),
            }
        }
    }

    #[test]
    fn test_publish_batch_counts_drops_and_keeps_going() {
        let r = router(4, 1, 10);
        let outcome = r.publish_batch((0..7).map(record).collect()).unwrap();
        assert_eq!(
            outcome,
            PublishOutcome {
                published: 4,
                dropped: 3
            }
        );

        let stats = r.stats();
        assert_eq!(stats.published, 4);
        assert_eq!(stats.dropped, 3);
        assert_eq!(stats.next_sequence, 7);

        r.start(Arc::new(DiscardHandler::new())).unwrap();
        assert!(r.drain(Duration::from_secs(5)));
        let outcome = r.publish_batch((7..9).map(record).collect()).unwrap();
        assert_eq!(outcome.published, 2);
        assert_eq!(outcome.dropped, 0);

        r.shutdown();
        assert!(matches!(
            r.publish_batch(vec![record(9)]),
            Err(LadError::ShuttingDown)
        ));
        assert_eq!(r.publish_batch(Vec::new()).unwrap(), PublishOutcome::default());
    }

    #[test]
    fn test_partition_capacity_rounds_up() {
        let r = router(10, 4, 10);
        assert_eq!(r.stats().partition_capacity, 3);
        assert_eq!(r.shards(), 4);
    }

    #[test]
    fn test_sequences_increase_and_fill_round_robin() {
        let r = router(8, 4, 10);
        for expected in 0..8 {
            assert_eq!(r.publish_record(record(expected)).unwrap(), expected);
        }
        let stats = r.stats();
        assert_eq!(stats.published, 8);
        assert!(stats.shards.iter().all(|s| s.queued == 2));
    }

    #[test]
    fn test_dropped_event_consumes_sequence() {
        let r = router(4, 4, 5);
        for i in 0..4 {
            r.publish_record(record(i)).unwrap();
        }
        let err = r.publish_record(record(4)).unwrap_err();
        assert!(matches!(
            err,
            LadError::Capacity {
                partition: 0,
                sequence: 4
            }
        ));
        assert_eq!(r.stats().dropped, 1);
        assert_eq!(r.stats().next_sequence, 5);
    }

    #[test]
    fn test_worker_survives_panics_and_errors() {
        let r = router(64, 2, 50);
        r.start(Arc::new(Panicky)).unwrap();
        for i in 0..9 {
            r.publish_record(record(i)).unwrap();
        }
        assert!(r.drain(Duration::from_secs(5)));

        let stats = r.stats();
        assert_eq!(stats.decode_errors, 3);
        assert_eq!(stats.handler_failures, 3);
        assert_eq!(stats.shards.iter().map(|s| s.processed).sum::<u64>(), 9);
        assert_eq!(stats.shards[0].last_sequence, Some(8));
        assert_eq!(stats.shards[1].last_sequence, Some(7));
    }

    #[test]
    fn test_start_twice_fails() {
        let r = router(8, 2, 10);
        r.start(Arc::new(DiscardHandler::new())).unwrap();
        assert!(r.start(Arc::new(DiscardHandler::new())).is_err());
    }

    #[test]
    fn test_advance_sequence_never_goes_back() {
        let r = router(8, 2, 10);
        r.advance_sequence(100);
        r.advance_sequence(50);
        assert_eq!(r.publish_record(record(0)).unwrap(), 100);
    }

    #[test]
    fn test_shutdown_cancels_queued_events() {
        let r = router(16, 4, 10);
        for i in 0..10 {
            r.publish_record(record(i)).unwrap();
        }
        assert_eq!(r.shutdown(), 10);
        assert_eq!(r.shutdown(), 10);
        assert!(r.drain(Duration::from_millis(10)));
        assert!(matches!(r.publish_record(record(11)), Err(LadError::ShuttingDown)));
    }

    #[test]
    fn test_drain_times_out_without_workers() {
        let r = router(8, 2, 10);
        r.publish_record(record(0)).unwrap();
        assert!(!r.drain(Duration::from_millis(20)));
    }
}
