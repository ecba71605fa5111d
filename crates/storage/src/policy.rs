//! Retention policy types
//!
//! Every series is bounded by a [`RetentionPolicy`]: a maximum sample count
//! and an optional age relative to the newest sample. Policies are chosen per
//! query type from a [`PolicyTable`] when a series is created, and can be
//! replaced at runtime.
//!
//! # Example
//!
//! ```ignore
//! use lad_storage::{PolicyTable, RetentionPolicy};
//! use std::time::Duration;
//!
//! let mut table = PolicyTable::default();
//! table.set(QueryType::EventRecord, RetentionPolicy::keep_last(5000));
//! table.set(
//!     QueryType::ChannelValue,
//!     RetentionPolicy::keep_last(100).with_time_to_live(Duration::from_secs(600)),
//! );
//! ```

use lad_core::QueryType;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default depth for channel-value series
pub const DEFAULT_CHANNEL_DEPTH: usize = 100;
/// Default depth for event-record series
pub const DEFAULT_EVENT_DEPTH: usize = 1000;
/// Default depth for alarm series
pub const DEFAULT_ALARM_DEPTH: usize = 100;

/// Bound applied to one series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Maximum samples held; exceeding it trims to three quarters
    pub max_count: usize,
    /// Maximum age relative to the newest sample's ERT
    pub time_to_live: Option<Duration>,
}

impl RetentionPolicy {
    /// Count-bounded policy
    ///
    /// A zero count is raised to one; a series always holds its newest sample.
    pub fn keep_last(max_count: usize) -> Self {
        RetentionPolicy {
            max_count: max_count.max(1),
            time_to_live: None,
        }
    }

    /// Add an age bound
    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    /// Length a series is trimmed to once it exceeds `max_count`
    pub fn trim_target(&self) -> usize {
        (self.max_count * 3 / 4).max(1)
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy::keep_last(DEFAULT_CHANNEL_DEPTH)
    }
}

/// Per-query-type policies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTable {
    /// Channel values
    pub channel_value: RetentionPolicy,
    /// Event records
    pub event_record: RetentionPolicy,
    /// Alarms
    pub alarm: RetentionPolicy,
}

impl PolicyTable {
    /// Policy for a query type
    pub fn get(&self, query_type: QueryType) -> RetentionPolicy {
        match query_type {
            QueryType::ChannelValue => self.channel_value,
            QueryType::EventRecord => self.event_record,
            QueryType::Alarm => self.alarm,
        }
    }

    /// Replace the policy for a query type
    pub fn set(&mut self, query_type: QueryType, policy: RetentionPolicy) {
        match query_type {
            QueryType::ChannelValue => self.channel_value = policy,
            QueryType::EventRecord => self.event_record = policy,
            QueryType::Alarm => self.alarm = policy,
        }
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        PolicyTable {
            channel_value: RetentionPolicy::keep_last(DEFAULT_CHANNEL_DEPTH),
            event_record: RetentionPolicy::keep_last(DEFAULT_EVENT_DEPTH),
            alarm: RetentionPolicy::keep_last(DEFAULT_ALARM_DEPTH),
        }
    }
}
