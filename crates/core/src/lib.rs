//! Core types for the LAD store
//!
//! This crate defines the data model shared by every other crate:
//! - Discriminator: composite stream key, tree levels, query-side filters
//! - Sample / Record: immutable data points and their stream binding
//! - Timestamp / Sclk: time domains
//! - LadQuery / QueryResult: what callers ask for and get back
//! - LadError: the error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod discriminator;
pub mod error;
pub mod query;
pub mod sample;
pub mod time;

pub use discriminator::{
    ComponentKey, Discriminator, DiscriminatorFilter, Level, QueryType, RecordedState,
    ValueSource,
};
pub use error::{LadError, LadResult};
pub use query::{
    Completeness, IdentifierPattern, LadQuery, QueryRecord, QueryResult, TimeType,
};
pub use sample::{Provenance, Record, Sample, SampleValue};
pub use time::{Sclk, Timestamp};
