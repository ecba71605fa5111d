//! Service configuration via `lad.toml`
//!
//! One explicitly constructed [`LadConfig`] is passed to
//! [`LadService::start`](crate::LadService::start); nothing is read from
//! globals, so tests run several independent stores side by side. Every
//! field has a default, so a partial file (or none at all) is valid.

use lad_core::{LadError, LadResult, QueryType};
use lad_storage::{
    PolicyTable, RetentionPolicy, DEFAULT_ALARM_DEPTH, DEFAULT_CHANNEL_DEPTH, DEFAULT_EVENT_DEPTH,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file name
pub const CONFIG_FILE_NAME: &str = "lad.toml";

/// Ingestion pipeline settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Total ring buffer capacity across all shards
    pub ring_capacity: usize,
    /// Number of shard workers
    pub shards: usize,
    /// Longest a publisher blocks on a full buffer before the event is dropped
    pub publish_timeout_ms: u64,
    /// Consume and discard events instead of inserting (throughput profiling)
    pub discard: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            ring_capacity: 8192,
            shards: 4,
            publish_timeout_ms: 250,
            discard: false,
        }
    }
}

impl IngestConfig {
    /// Publish timeout as a duration
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

/// Snapshot persistence settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Write periodic snapshots
    pub enabled: bool,
    /// Snapshot directory
    pub directory: PathBuf,
    /// Delay between the end of one backup and the start of the next
    pub interval_secs: u64,
    /// Snapshots kept; older ones are deleted after each backup (0 keeps all)
    pub max_backups: usize,
    /// Snapshot file basename
    pub basename: String,
    /// Restore the newest snapshot at startup
    pub restore: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        PersistenceConfig {
            enabled: false,
            directory: PathBuf::from("lad-backups"),
            interval_secs: 300,
            max_backups: 10,
            basename: "lad".to_string(),
            restore: true,
        }
    }
}

impl PersistenceConfig {
    /// Backup interval as a duration
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Bounds for one query type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionEntry {
    /// Maximum samples per series
    pub max_count: usize,
    /// Maximum age relative to the newest sample, in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_live_ms: Option<u64>,
}

impl RetentionEntry {
    fn depth(max_count: usize) -> Self {
        RetentionEntry {
            max_count,
            time_to_live_ms: None,
        }
    }

    /// As a storage policy
    pub fn policy(&self) -> RetentionPolicy {
        let policy = RetentionPolicy::keep_last(self.max_count);
        match self.time_to_live_ms {
            Some(ms) => policy.with_time_to_live(Duration::from_millis(ms)),
            None => policy,
        }
    }
}

/// Per-query-type retention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Channel values
    pub channel_value: RetentionEntry,
    /// Event records
    pub event_record: RetentionEntry,
    /// Alarms
    pub alarm: RetentionEntry,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        RetentionConfig {
            channel_value: RetentionEntry::depth(DEFAULT_CHANNEL_DEPTH),
            event_record: RetentionEntry::depth(DEFAULT_EVENT_DEPTH),
            alarm: RetentionEntry::depth(DEFAULT_ALARM_DEPTH),
        }
    }
}

impl RetentionConfig {
    /// Entry for a query type
    pub fn entry(&self, query_type: QueryType) -> &RetentionEntry {
        match query_type {
            QueryType::ChannelValue => &self.channel_value,
            QueryType::EventRecord => &self.event_record,
            QueryType::Alarm => &self.alarm,
        }
    }

    /// As a storage policy table
    pub fn policy_table(&self) -> PolicyTable {
        let mut table = PolicyTable::default();
        for qt in QueryType::ALL {
            table.set(qt, self.entry(qt).policy());
        }
        table
    }
}

/// Idle-series reaping settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReapingConfig {
    /// Run the reaper
    pub enabled: bool,
    /// How often to look for idle series
    pub interval_secs: u64,
    /// How long a series may go without inserts before it is dropped
    pub idle_ttl_secs: u64,
}

impl Default for ReapingConfig {
    fn default() -> Self {
        ReapingConfig {
            enabled: false,
            interval_secs: 60,
            idle_ttl_secs: 3600,
        }
    }
}

/// Service configuration loaded from `lad.toml`.
///
/// # Example
///
/// ```toml
/// [ingest]
/// ring_capacity = 8192
/// shards = 4
///
/// [persistence]
/// enabled = true
/// directory = "/var/lib/lad"
///
/// [retention.event_record]
/// max_count = 5000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LadConfig {
    /// Ingestion pipeline
    pub ingest: IngestConfig,
    /// Snapshot persistence
    pub persistence: PersistenceConfig,
    /// Per-query-type retention
    pub retention: RetentionConfig,
    /// Idle-series reaping
    pub reaping: ReapingConfig,
}

impl LadConfig {
    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# LAD store configuration

[ingest]
# Total ring buffer capacity, split evenly across shards
ring_capacity = 8192
# Number of shard workers
shards = 4
# Longest a publisher blocks on a full buffer before the event is dropped
publish_timeout_ms = 250
# Consume and discard events instead of inserting (throughput profiling)
discard = false

[persistence]
# Write periodic snapshots
enabled = false
directory = "lad-backups"
# Delay between backups
interval_secs = 300
# Snapshots kept (0 keeps all)
max_backups = 10
basename = "lad"
# Restore the newest snapshot at startup
restore = true

# Per-query-type bounds. time_to_live_ms is optional.
[retention.channel_value]
max_count = 100

[retention.event_record]
max_count = 1000

[retention.alarm]
max_count = 100
# time_to_live_ms = 600000

[reaping]
# Drop series that stop receiving data
enabled = false
interval_secs = 60
idle_ttl_secs = 3600
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> LadResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LadError::config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config = Self::from_toml(&content).map_err(|e| {
            LadError::config(format!("Config file '{}': {}", path.display(), e))
        })?;
        Ok(config)
    }

    /// Parse and validate config text
    pub fn from_toml(content: &str) -> LadResult<Self> {
        let config: LadConfig = toml::from_str(content)
            .map_err(|e| LadError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> LadResult<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                LadError::config(format!(
                    "Failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> LadResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| LadError::config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            LadError::config(format!(
                "Failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> LadResult<()> {
        let ingest = &self.ingest;
        if ingest.shards == 0 {
            return Err(LadError::config("ingest.shards must be at least 1"));
        }
        if ingest.ring_capacity < ingest.shards {
            return Err(LadError::config(format!(
                "ingest.ring_capacity ({}) must be at least ingest.shards ({})",
                ingest.ring_capacity, ingest.shards
            )));
        }

        let persistence = &self.persistence;
        if persistence.enabled && persistence.interval_secs == 0 {
            return Err(LadError::config("persistence.interval_secs must be positive"));
        }
        if persistence.basename.is_empty()
            || persistence
                .basename
                .contains(|c: char| c == '/' || c == '\\' || c.is_whitespace())
        {
            return Err(LadError::config(format!(
                "persistence.basename '{}' is not a valid file name prefix",
                persistence.basename
            )));
        }

        for qt in QueryType::ALL {
            let entry = self.retention.entry(qt);
            if entry.max_count == 0 {
                return Err(LadError::config(format!(
                    "retention.{}.max_count must be at least 1",
                    qt
                )));
            }
            if entry.time_to_live_ms == Some(0) {
                return Err(LadError::config(format!(
                    "retention.{}.time_to_live_ms must be positive",
                    qt
                )));
            }
        }

        if self.reaping.enabled && (self.reaping.interval_secs == 0 || self.reaping.idle_ttl_secs == 0) {
            return Err(LadError::config(
                "reaping.interval_secs and reaping.idle_ttl_secs must be positive",
            ));
        }
        Ok(())
    }
}
