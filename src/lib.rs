//! ladstore - Latest-available-data store for spacecraft telemetry
//!
//! Holds the most recent samples of every telemetry stream in memory,
//! keyed by a discriminator tree, with bounded per-series history, sharded
//! ingestion and periodic snapshots.
//!
//! # Quick Start
//!
//! ```ignore
//! use ladstore::{LadConfig, LadService, StartOptions, LadQuery, DiscriminatorFilter};
//!
//! let service = LadService::start(LadConfig::default(), StartOptions::default())?;
//! let source = service.attach_source("gds-1")?;
//! source.publish_record(record)?;
//!
//! let latest = service.query(&LadQuery::new(DiscriminatorFilter::all()))?;
//! service.shutdown();
//! ```
//!
//! # Architecture
//!
//! - `lad-core`: data model, queries, errors
//! - `lad-storage`: series, container tree, reaper
//! - `lad-durability`: snapshot files
//! - `lad-engine`: configuration, ingest router, snapshot manager, service

pub use lad_core::{
    Completeness, Discriminator, DiscriminatorFilter, IdentifierPattern, LadError, LadQuery,
    LadResult, Provenance, QueryRecord, QueryResult, QueryType, Record, RecordedState, Sample,
    SampleValue, Sclk, TimeType, Timestamp, ValueSource,
};
pub use lad_engine::{
    BackupInfo, InsertTarget, JsonSampleDecoder, LadConfig, LadService, LadStats, OutputFormat,
    PublishOutcome, QueryRequest, RestoreReport, SampleDecoder, SourceHandle, StartOptions,
    CONFIG_FILE_NAME,
};
pub use lad_storage::{ContainerTree, DepthEntry, PolicyTable, RetentionPolicy, SeriesStats, TreeCounts};
