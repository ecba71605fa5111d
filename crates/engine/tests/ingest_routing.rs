//! Ingest router behavior tests
//!
//! - Partition assignment is `sequence % N` and each event is handled once
//! - Per-partition order follows sequence order, even with many publishers
//! - A full partition drops exactly the rejected events within the timeout

use lad_core::{
    Discriminator, LadError, LadResult, QueryType, Record, RecordedState, Sample, SampleValue,
    Timestamp, ValueSource,
};
use lad_engine::{EventHandler, IngestEvent, IngestRouter, RouterConfig};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn router(capacity: usize, shards: usize, timeout: Duration) -> IngestRouter {
    IngestRouter::new(RouterConfig {
        capacity,
        shards,
        publish_timeout: timeout,
    })
}

fn record(i: u64) -> Record {
    Record::new(
        Discriminator::new(QueryType::ChannelValue, ValueSource::Flight, RecordedState::Realtime),
        Sample::new("A-0001", Timestamp::from_millis(i), SampleValue::Unsigned(i)),
    )
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(usize, u64)>>,
}

impl EventHandler for Recorder {
    fn on_event(&self, shard: usize, event: IngestEvent) -> LadResult<()> {
        self.seen.lock().push((shard, event.sequence));
        Ok(())
    }
}

#[test]
fn test_partition_assignment_and_exactly_once() {
    let r = router(64, 4, Duration::from_millis(100));
    for i in 0..10 {
        r.publish_record(record(i)).unwrap();
    }

    let recorder = Arc::new(Recorder::default());
    r.start(recorder.clone()).unwrap();
    assert!(r.drain(Duration::from_secs(5)));

    let seen = recorder.seen.lock().clone();
    let shard_two: BTreeSet<u64> = seen
        .iter()
        .filter(|(shard, _)| *shard == 2)
        .map(|(_, seq)| *seq)
        .collect();
    assert_eq!(shard_two, BTreeSet::from([2, 6]));

    let mut sequences: Vec<u64> = seen.iter().map(|(_, seq)| *seq).collect();
    sequences.sort_unstable();
    assert_eq!(sequences, (0..10).collect::<Vec<_>>());

    for (shard, seq) in &seen {
        assert_eq!(*seq % 4, *shard as u64);
    }
}

#[test]
fn test_partition_order_with_concurrent_publishers() {
    let r = Arc::new(router(256, 4, Duration::from_secs(5)));
    let recorder = Arc::new(Recorder::default());
    r.start(recorder.clone()).unwrap();

    let publishers: Vec<_> = (0..4)
        .map(|t| {
            let r = Arc::clone(&r);
            thread::spawn(move || {
                for i in 0..500 {
                    r.publish_record(record(t * 1_000 + i)).unwrap();
                }
            })
        })
        .collect();
    for p in publishers {
        p.join().unwrap();
    }
    assert!(r.drain(Duration::from_secs(10)));

    let seen = recorder.seen.lock().clone();
    assert_eq!(seen.len(), 2_000);
    for shard in 0..4 {
        let order: Vec<u64> = seen
            .iter()
            .filter(|(s, _)| *s == shard)
            .map(|(_, seq)| *seq)
            .collect();
        assert!(order.windows(2).all(|w| w[0] < w[1]), "shard {} out of order", shard);
    }
    assert_eq!(r.stats().dropped, 0);
}

#[test]
fn test_backpressure_drops_exact_count_within_timeout() {
    let timeout = Duration::from_millis(20);
    let r = router(8, 4, timeout);

    for i in 0..8 {
        r.publish_record(record(i)).unwrap();
    }

    let extra = 5u64;
    for i in 0..extra {
        let started = Instant::now();
        let err = r.publish_record(record(100 + i)).unwrap_err();
        assert!(matches!(err, LadError::Capacity { .. }));
        assert!(err.is_ingest_drop());
        assert!(
            started.elapsed() < timeout + Duration::from_millis(500),
            "publish blocked for {:?}",
            started.elapsed()
        );
    }

    let stats = r.stats();
    assert_eq!(stats.dropped, extra);
    assert_eq!(stats.published, 8);
    assert_eq!(stats.shards.iter().map(|s| s.queued).sum::<usize>(), 8);
}

#[test]
fn test_queue_space_frees_after_workers_catch_up() {
    let r = router(4, 2, Duration::from_millis(10));
    for i in 0..4 {
        r.publish_record(record(i)).unwrap();
    }
    assert!(r.publish_record(record(4)).is_err());

    r.start(Arc::new(Recorder::default())).unwrap();
    assert!(r.drain(Duration::from_secs(5)));
    r.publish_record(record(5)).unwrap();
    assert!(r.drain(Duration::from_secs(5)));

    let stats = r.stats();
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.shards.iter().map(|s| s.processed).sum::<u64>(), 5);
}
