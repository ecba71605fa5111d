//! Error types for the LAD store
//!
//! One taxonomy is shared by every crate in the workspace. Ingestion-path
//! errors (`Decode`, `Capacity`) are counted and dropped by the caller,
//! persistence errors are logged and survived, query errors are reported to
//! the client, and configuration/startup errors abort startup.

use std::io;
use thiserror::Error;

/// Result type alias for LAD operations
pub type LadResult<T> = std::result::Result<T, LadError>;

/// Error types for the LAD store
#[derive(Debug, Error)]
pub enum LadError {
    /// A payload could not be turned into a sample
    #[error("Decode error: {0}")]
    Decode(String),

    /// Ingest ring buffer partition stayed full past the publish timeout
    #[error("Ingest buffer full: partition {partition} rejected sequence {sequence}")]
    Capacity {
        /// Partition that was full
        partition: usize,
        /// Sequence number of the rejected event
        sequence: u64,
    },

    /// Snapshot write or read failure
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Query references a structurally invalid discriminator component
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Configuration rejected
    #[error("Configuration error: {0}")]
    Config(String),

    /// Required resources could not be acquired at startup
    #[error("Startup failed: {0}")]
    Startup(String),

    /// Sources cannot attach before startup completes
    #[error("Service not ready: {0}")]
    NotReady(String),

    /// Service is stopping or stopped
    #[error("Service is shutting down")]
    ShuttingDown,
}

impl LadError {
    /// Create a decode error
    pub fn decode(detail: impl Into<String>) -> Self {
        LadError::Decode(detail.into())
    }

    /// Create an invalid-query error
    pub fn invalid_query(detail: impl Into<String>) -> Self {
        LadError::InvalidQuery(detail.into())
    }

    /// Create a configuration error
    pub fn config(detail: impl Into<String>) -> Self {
        LadError::Config(detail.into())
    }

    /// Create a snapshot error
    pub fn snapshot(detail: impl Into<String>) -> Self {
        LadError::Snapshot(detail.into())
    }

    /// True when the caller supplied bad input (maps to a 4xx-style status
    /// on the query surface rather than a server fault).
    pub fn is_client_error(&self) -> bool {
        matches!(self, LadError::InvalidQuery(_) | LadError::Decode(_))
    }

    /// True for errors on the ingestion path that are counted and dropped.
    pub fn is_ingest_drop(&self) -> bool {
        matches!(self, LadError::Decode(_) | LadError::Capacity { .. })
    }
}

impl From<bincode::Error> for LadError {
    fn from(e: bincode::Error) -> Self {
        LadError::Serialization(e.to_string())
    }
}
