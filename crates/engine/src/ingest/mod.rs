//! Ingestion pipeline: sequenced, partitioned events and the workers that
//! consume them

mod handler;
mod router;

pub use handler::{DiscardHandler, EventHandler, IngestEvent, InsertHandler, Payload};
pub use router::{IngestRouter, PublishOutcome, RouterConfig, RouterStats, ShardStats};
