//! Bounded, ERT-ordered history for one (discriminator, identifier)
//!
//! # Design
//!
//! - Samples live in a `VecDeque` ordered by (ERT, ingest sequence); eviction
//!   always removes from the front.
//! - In-order arrival is a tail push. Out-of-order (recorded) data is placed
//!   by binary search.
//! - Count bound: once `len > max_count` the oldest samples are removed in
//!   one batch down to three quarters of `max_count`.
//! - Age bound: samples older than `time_to_live` relative to the newest
//!   sample are truncated from the leading edge.
//! - State sits behind a `parking_lot::RwLock`; counters are atomics so
//!   stats never take the lock for writing.

use lad_core::{Completeness, LadResult, Sample, TimeType, Timestamp};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::policy::RetentionPolicy;

/// A sample with its precomputed ordering key
#[derive(Debug, Clone)]
struct StoredSample {
    ert: Timestamp,
    sequence: u64,
    sample: Arc<Sample>,
}

impl StoredSample {
    fn new(sample: Arc<Sample>) -> LadResult<Self> {
        let ert = sample.require_ert()?;
        Ok(StoredSample {
            ert,
            sequence: sample.provenance.sequence,
            sample,
        })
    }

    #[inline]
    fn key(&self) -> (Timestamp, u64) {
        (self.ert, self.sequence)
    }
}

#[derive(Debug)]
struct SeriesState {
    samples: VecDeque<StoredSample>,
    policy: RetentionPolicy,
    /// ERT of the newest sample ever evicted
    trim_mark: Option<Timestamp>,
}

impl SeriesState {
    fn insert(&mut self, stored: StoredSample) {
        let key = stored.key();
        match self.samples.back() {
            Some(last) if last.key() > key => {
                let idx = self.samples.partition_point(|s| s.key() <= key);
                self.samples.insert(idx, stored);
            }
            _ => self.samples.push_back(stored),
        }
    }

    /// Apply count then age bounds. Returns the number of samples removed.
    fn evict(&mut self) -> usize {
        let mut removed = 0;

        if self.samples.len() > self.policy.max_count {
            let excess = self.samples.len() - self.policy.trim_target();
            for stored in self.samples.drain(..excess) {
                self.trim_mark = self.trim_mark.max(Some(stored.ert));
            }
            removed += excess;
        }

        let newest = self.samples.back().map(|s| s.ert);
        if let (Some(ttl), Some(newest)) = (self.policy.time_to_live, newest) {
            while let Some(front) = self.samples.front() {
                if newest.saturating_elapsed(front.ert) <= ttl {
                    break;
                }
                self.trim_mark = self.trim_mark.max(Some(front.ert));
                self.samples.pop_front();
                removed += 1;
            }
        }

        removed
    }
}

/// Point-in-time statistics of one series
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesStats {
    /// Identifier
    pub identifier: String,
    /// Samples currently held
    pub len: usize,
    /// Samples ever inserted
    pub inserts: u64,
    /// Samples ever evicted
    pub evicted: u64,
    /// Reads served
    pub queries: u64,
    /// Wall-clock time of the last insert
    pub last_insert: Timestamp,
    /// ERT of the newest held sample
    pub newest_ert: Option<Timestamp>,
    /// ERT of the newest evicted sample
    pub trim_mark: Option<Timestamp>,
}

/// Ordered, bounded collection of samples for one identifier
#[derive(Debug)]
pub struct Series {
    identifier: String,
    state: RwLock<SeriesState>,
    inserts: AtomicU64,
    evicted: AtomicU64,
    queries: AtomicU64,
    last_insert: AtomicU64,
}

impl Series {
    /// Create an empty series
    pub fn new(identifier: impl Into<String>, policy: RetentionPolicy) -> Self {
        Series {
            identifier: identifier.into(),
            state: RwLock::new(SeriesState {
                samples: VecDeque::with_capacity(policy.max_count.min(64) + 1),
                policy,
                trim_mark: None,
            }),
            inserts: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            queries: AtomicU64::new(0),
            last_insert: AtomicU64::new(Timestamp::now().as_micros()),
        }
    }

    /// Identifier this series holds
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Insert one sample in ERT order and apply eviction.
    ///
    /// Count eviction fires only when the length passes `max_count`, and then
    /// trims to three quarters of it. Between trims the series refills, so
    /// after a run of appends it holds anywhere from that trim target up to
    /// `max_count`: with `max_count = 100`, 130 appends trim at the 101st and
    /// 127th and leave 78. [`extend`](Self::extend) evicts once per batch.
    ///
    /// Returns the number of samples evicted. A sample without ERT is
    /// rejected with a decode error and the series is left untouched.
    pub fn append(&self, sample: Arc<Sample>) -> LadResult<usize> {
        let stored = StoredSample::new(sample)?;
        let removed = {
            let mut state = self.state.write();
            state.insert(stored);
            state.evict()
        };
        self.record_inserts(1, removed);
        Ok(removed)
    }

    /// Insert a batch, then apply eviction once.
    ///
    /// Used by bulk loads so a batch larger than `max_count` ends at exactly
    /// the trim target. Any sample without ERT rejects the whole batch.
    pub fn extend<I>(&self, samples: I) -> LadResult<usize>
    where
        I: IntoIterator<Item = Arc<Sample>>,
    {
        let stored = samples
            .into_iter()
            .map(StoredSample::new)
            .collect::<LadResult<Vec<_>>>()?;
        if stored.is_empty() {
            return Ok(0);
        }
        let count = stored.len() as u64;
        let removed = {
            let mut state = self.state.write();
            for s in stored {
                state.insert(s);
            }
            state.evict()
        };
        self.record_inserts(count, removed);
        Ok(removed)
    }

    fn record_inserts(&self, inserted: u64, removed: usize) {
        self.inserts.fetch_add(inserted, Ordering::Relaxed);
        self.evicted.fetch_add(removed as u64, Ordering::Relaxed);
        self.last_insert
            .store(Timestamp::now().as_micros(), Ordering::Relaxed);
    }

    /// Newest `n` samples, oldest first
    pub fn latest(&self, n: usize) -> Vec<Arc<Sample>> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let state = self.state.read();
        let skip = state.samples.len().saturating_sub(n);
        state
            .samples
            .iter()
            .skip(skip)
            .map(|s| Arc::clone(&s.sample))
            .collect()
    }

    /// Samples with ERT at or after `t`, oldest first
    pub fn since(&self, t: Timestamp) -> Vec<Arc<Sample>> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let state = self.state.read();
        let start = state.samples.partition_point(|s| s.ert < t);
        state
            .samples
            .iter()
            .skip(start)
            .map(|s| Arc::clone(&s.sample))
            .collect()
    }

    /// Newest `max` samples whose `time_type` time lies within the inclusive
    /// bounds, ordered ascending by that time.
    pub fn window(
        &self,
        time_type: TimeType,
        lower: Option<Timestamp>,
        upper: Option<Timestamp>,
        max: usize,
    ) -> Vec<Arc<Sample>> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        let state = self.state.read();
        let in_bounds = |t: Timestamp| lower.map_or(true, |lo| t >= lo) && upper.map_or(true, |hi| t <= hi);

        let mut selected: Vec<(Timestamp, Arc<Sample>)> = state
            .samples
            .iter()
            .filter_map(|s| {
                let t = s.sample.time(time_type)?;
                in_bounds(t).then(|| (t, Arc::clone(&s.sample)))
            })
            .collect();
        drop(state);

        if time_type != TimeType::Ert {
            selected.sort_by_key(|(t, _)| *t);
        }
        let skip = selected.len().saturating_sub(max);
        selected.into_iter().skip(skip).map(|(_, s)| s).collect()
    }

    /// Whether a query bounded below by `lower` sees every sample it would
    /// have seen without eviction.
    pub fn completeness(&self, time_type: TimeType, lower: Option<Timestamp>) -> Completeness {
        let Some(lower) = lower else {
            return Completeness::Unknown;
        };
        if time_type != TimeType::Ert {
            return Completeness::Unknown;
        }
        match self.state.read().trim_mark {
            Some(mark) if mark >= lower => Completeness::Incomplete,
            _ => Completeness::Complete,
        }
    }

    /// Every held sample, oldest first
    pub fn samples(&self) -> Vec<Arc<Sample>> {
        self.state
            .read()
            .samples
            .iter()
            .map(|s| Arc::clone(&s.sample))
            .collect()
    }

    /// Number of held samples
    pub fn len(&self) -> usize {
        self.state.read().samples.len()
    }

    /// Whether the series holds nothing
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current policy
    pub fn policy(&self) -> RetentionPolicy {
        self.state.read().policy
    }

    /// Replace the policy and re-apply eviction. Returns samples evicted.
    pub fn set_policy(&self, policy: RetentionPolicy) -> usize {
        let removed = {
            let mut state = self.state.write();
            state.policy = policy;
            state.evict()
        };
        self.evicted.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Wall-clock time of the last insert (creation time if none)
    pub fn last_insert(&self) -> Timestamp {
        Timestamp::from_micros(self.last_insert.load(Ordering::Relaxed))
    }

    /// Time since the last insert
    pub fn idle_for(&self, now: Timestamp) -> Duration {
        now.saturating_elapsed(self.last_insert())
    }

    /// Statistics snapshot
    pub fn stats(&self) -> SeriesStats {
        let state = self.state.read();
        SeriesStats {
            identifier: self.identifier.clone(),
            len: state.samples.len(),
            inserts: self.inserts.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            last_insert: self.last_insert(),
            newest_ert: state.samples.back().map(|s| s.ert),
            trim_mark: state.trim_mark,
        }
    }
}
