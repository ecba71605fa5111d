//! Service engine for the LAD store
//!
//! This crate wires the lower layers into a running store:
//! - LadConfig: `lad.toml` loading and validation
//! - Ingest: sequenced, partitioned events consumed by shard workers
//! - SnapshotManager: backup, restore and listing over lad-durability
//! - LadService: startup/shutdown ordering and the source gate
//! - QueryRequest / InsertTarget: request parsing for the query surface
//!
//! The engine is the only component that knows about:
//! - Thread lifecycles (shard workers, backup schedule, reaper)
//! - Restore-before-ingest ordering

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod decode;
pub mod ingest;
pub mod query;
pub mod service;
pub mod snapshot;
pub mod stats;

pub use config::{
    IngestConfig, LadConfig, PersistenceConfig, ReapingConfig, RetentionConfig, RetentionEntry,
    CONFIG_FILE_NAME,
};
pub use decode::{JsonSampleDecoder, SampleDecoder};
pub use ingest::{
    DiscardHandler, EventHandler, IngestEvent, IngestRouter, InsertHandler, Payload, PublishOutcome,
    RouterConfig, RouterStats, ShardStats,
};
pub use query::{InsertTarget, OutputFormat, QueryRequest};
pub use service::{LadService, SourceHandle, StartOptions};
pub use snapshot::{BackupInfo, BackupScheduler, BackupStats, RestoreReport, SnapshotManager};
pub use stats::LadStats;
