//! Service statistics report

use lad_core::{LadError, LadResult, Timestamp};
use lad_storage::TreeCounts;
use serde::Serialize;

use crate::ingest::RouterStats;
use crate::snapshot::{BackupStats, RestoreReport};

/// Point-in-time view of a running service
#[derive(Debug, Clone, Serialize)]
pub struct LadStats {
    /// Lifecycle state name
    pub state: &'static str,
    /// When the service became ready
    pub started_at: Timestamp,
    /// Seconds since start
    pub uptime_secs: u64,
    /// Ingest pipeline counters
    pub ingest: RouterStats,
    /// Container, series and sample population
    pub population: TreeCounts,
    /// Backup counters, when persistence is configured
    pub backups: Option<BackupStats>,
    /// Startup restore outcome
    pub restore: Option<RestoreReport>,
    /// Series dropped by the idle reaper
    pub reaped: u64,
}

impl LadStats {
    /// Pretty-printed JSON
    pub fn to_json(&self) -> LadResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| LadError::Serialization(e.to_string()))
    }
}
