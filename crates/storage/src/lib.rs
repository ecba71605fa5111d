//! Storage layer for the LAD store
//!
//! This crate holds the in-memory state:
//! - Series: bounded, ERT-ordered history with count and age eviction
//! - RetentionPolicy / PolicyTable: per-query-type bounds
//! - ContainerTree: discriminator-keyed hierarchy, query walk and merge
//! - Reaper: background removal of idle series
//!
//! # Concurrency
//!
//! - Child maps at every node are independent `DashMap`s (Fx hasher)
//! - Each series has its own `RwLock`; a write to one series never blocks
//!   another
//! - Node pruning is serialized against inserts by a structure gate

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod container;
pub mod policy;
pub mod reaper;
pub mod series;

pub use container::{BulkLoad, ContainerTree, DepthEntry, FxDashMap, LeafNode, TreeCounts};
pub use policy::{
    PolicyTable, RetentionPolicy, DEFAULT_ALARM_DEPTH, DEFAULT_CHANNEL_DEPTH, DEFAULT_EVENT_DEPTH,
};
pub use reaper::Reaper;
pub use series::{Series, SeriesStats};
