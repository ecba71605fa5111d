//! Idle-series reaper
//!
//! Runs in a background thread and periodically drops series that have not
//! received a sample for `idle_ttl`, pruning the container nodes left empty.
//!
//! # Example
//!
//! ```ignore
//! let tree = Arc::new(ContainerTree::default());
//! let reaper = Reaper::new(Arc::clone(&tree), Duration::from_secs(60), Duration::from_secs(3600));
//! let handle = reaper.start()?;
//!
//! // ... ingest ...
//!
//! reaper.shutdown();
//! handle.join().unwrap();
//! ```

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::info;

use crate::container::ContainerTree;

/// Background idle-series cleanup task
pub struct Reaper {
    tree: Arc<ContainerTree>,
    check_interval: Duration,
    idle_ttl: Duration,
    shutdown: Arc<AtomicBool>,
    reaped: Arc<AtomicU64>,
}

impl Reaper {
    /// Create a reaper
    ///
    /// # Arguments
    ///
    /// * `tree` - The container tree to reap
    /// * `check_interval` - How often to look for idle series
    /// * `idle_ttl` - How long a series may go without inserts
    pub fn new(tree: Arc<ContainerTree>, check_interval: Duration, idle_ttl: Duration) -> Self {
        Self {
            tree,
            check_interval,
            idle_ttl,
            shutdown: Arc::new(AtomicBool::new(false)),
            reaped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the background thread
    ///
    /// The thread runs until `shutdown()` is called.
    pub fn start(&self) -> io::Result<JoinHandle<()>> {
        let tree = Arc::clone(&self.tree);
        let shutdown = Arc::clone(&self.shutdown);
        let reaped = Arc::clone(&self.reaped);
        let check_interval = self.check_interval;
        let idle_ttl = self.idle_ttl;

        thread::Builder::new()
            .name("lad-reaper".to_string())
            .spawn(move || {
                while !shutdown.load(Ordering::Relaxed) {
                    // Sleep in short slices so shutdown is noticed promptly
                    let sleep_interval = Duration::from_millis(100).min(check_interval);
                    let mut elapsed = Duration::ZERO;
                    while elapsed < check_interval {
                        if shutdown.load(Ordering::Relaxed) {
                            return;
                        }
                        thread::sleep(sleep_interval);
                        elapsed += sleep_interval;
                    }

                    let count = tree.reap(idle_ttl);
                    if count > 0 {
                        reaped.fetch_add(count as u64, Ordering::Relaxed);
                        info!(target: "lad::reaper", count, "Reaped idle series");
                    }
                }
            })
    }

    /// Signal shutdown
    ///
    /// The thread exits within one sleep slice.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Series reaped since start
    pub fn reaped(&self) -> u64 {
        self.reaped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lad_core::{
        Discriminator, QueryType, Record, RecordedState, Sample, SampleValue, Timestamp,
        ValueSource,
    };

    fn populated_tree() -> Arc<ContainerTree> {
        let tree = Arc::new(ContainerTree::default());
        let d = Discriminator::new(
            QueryType::Alarm,
            ValueSource::Monitor,
            RecordedState::Realtime,
        );
        tree.route(Record::new(
            d,
            Sample::new("DN-1", Timestamp::from_millis(1), SampleValue::Boolean(true)),
        ))
        .unwrap();
        tree
    }

    #[test]
    fn test_reaper_shutdown() {
        let reaper = Reaper::new(
            populated_tree(),
            Duration::from_secs(60),
            Duration::from_secs(60),
        );
        let handle = reaper.start().unwrap();
        reaper.shutdown();
        handle.join().unwrap();
        assert_eq!(reaper.reaped(), 0);
    }

    #[test]
    fn test_reaper_removes_idle_series() {
        let tree = populated_tree();
        let reaper = Reaper::new(
            Arc::clone(&tree),
            Duration::from_millis(50),
            Duration::from_millis(10),
        );
        let handle = reaper.start().unwrap();

        thread::sleep(Duration::from_millis(500));
        assert!(tree.is_empty());
        assert_eq!(reaper.reaped(), 1);

        reaper.shutdown();
        handle.join().unwrap();
    }

    #[test]
    fn test_reaper_keeps_active_series() {
        let tree = populated_tree();
        let reaper = Reaper::new(
            Arc::clone(&tree),
            Duration::from_millis(50),
            Duration::from_secs(3600),
        );
        let handle = reaper.start().unwrap();

        thread::sleep(Duration::from_millis(300));
        assert_eq!(tree.counts().series, 1);

        reaper.shutdown();
        handle.join().unwrap();
    }
}
