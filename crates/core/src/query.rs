//! Query-side types: what a caller asks for and what it gets back

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::discriminator::{Discriminator, DiscriminatorFilter};
use crate::error::LadError;
use crate::sample::Sample;
use crate::time::Timestamp;

/// Time domain used for bounds and merge ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeType {
    /// Earth-receive time
    #[default]
    Ert,
    /// Spacecraft event time
    Scet,
    /// Ingest wall-clock time
    Event,
}

impl TimeType {
    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeType::Ert => "ert",
            TimeType::Scet => "scet",
            TimeType::Event => "event",
        }
    }
}

impl fmt::Display for TimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeType {
    type Err = LadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ert" => Ok(TimeType::Ert),
            "scet" => Ok(TimeType::Scet),
            "event" | "event_time" => Ok(TimeType::Event),
            other => Err(LadError::invalid_query(format!("unknown time type '{}'", other))),
        }
    }
}

/// Identifier selector: exact, or prefix when it ends in `*`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentifierPattern {
    /// Exact identifier
    Exact(String),
    /// Every identifier starting with this prefix
    Prefix(String),
}

impl IdentifierPattern {
    /// Parse a user-supplied pattern
    pub fn parse(s: &str) -> Result<Self, LadError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(LadError::invalid_query("empty identifier"));
        }
        match s.strip_suffix('*') {
            Some(prefix) if prefix.contains('*') => Err(LadError::invalid_query(format!(
                "identifier pattern '{}' may only end with '*'",
                s
            ))),
            Some(prefix) => Ok(IdentifierPattern::Prefix(prefix.to_string())),
            None if s.contains('*') => Err(LadError::invalid_query(format!(
                "identifier pattern '{}' may only end with '*'",
                s
            ))),
            None => Ok(IdentifierPattern::Exact(s.to_string())),
        }
    }

    /// Whether `identifier` is selected
    pub fn matches(&self, identifier: &str) -> bool {
        match self {
            IdentifierPattern::Exact(id) => id == identifier,
            IdentifierPattern::Prefix(prefix) => identifier.starts_with(prefix.as_str()),
        }
    }

    /// The exact identifier, if this is not a prefix pattern
    pub fn as_exact(&self) -> Option<&str> {
        match self {
            IdentifierPattern::Exact(id) => Some(id),
            IdentifierPattern::Prefix(_) => None,
        }
    }
}

/// A parsed query against the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadQuery {
    /// Streams to visit
    pub filter: DiscriminatorFilter,
    /// Identifiers to select; empty selects every identifier
    pub identifiers: Vec<IdentifierPattern>,
    /// Time domain for bounds and ordering
    pub time_type: TimeType,
    /// Inclusive lower bound
    pub lower_bound: Option<Timestamp>,
    /// Inclusive upper bound
    pub upper_bound: Option<Timestamp>,
    /// Newest samples taken from each series
    pub max_results: usize,
}

impl LadQuery {
    /// Latest value of every series matching `filter`
    pub fn new(filter: DiscriminatorFilter) -> Self {
        LadQuery {
            filter,
            identifiers: Vec::new(),
            time_type: TimeType::Ert,
            lower_bound: None,
            upper_bound: None,
            max_results: 1,
        }
    }

    /// Restrict to identifiers
    pub fn with_identifiers(mut self, identifiers: Vec<IdentifierPattern>) -> Self {
        self.identifiers = identifiers;
        self
    }

    /// Take the newest `n` samples per series
    pub fn with_max_results(mut self, n: usize) -> Self {
        self.max_results = n;
        self
    }

    /// Bound results by time
    pub fn with_bounds(
        mut self,
        time_type: TimeType,
        lower: Option<Timestamp>,
        upper: Option<Timestamp>,
    ) -> Self {
        self.time_type = time_type;
        self.lower_bound = lower;
        self.upper_bound = upper;
        self
    }

    /// Reject bounds that can never match
    pub fn validate(&self) -> Result<(), LadError> {
        if let (Some(lo), Some(hi)) = (self.lower_bound, self.upper_bound) {
            if lo > hi {
                return Err(LadError::invalid_query(format!(
                    "lower bound {} is after upper bound {}",
                    lo, hi
                )));
            }
        }
        if self.max_results == 0 {
            return Err(LadError::invalid_query("maxResults must be at least 1"));
        }
        Ok(())
    }
}

/// Whether a delta query may have missed evicted data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completeness {
    /// Every sample at or after the lower bound is still held
    Complete,
    /// Samples at or after the lower bound have been evicted
    Incomplete,
    /// No lower bound, or completeness cannot be judged
    Unknown,
}

impl Completeness {
    /// Combine the verdicts of two series
    pub fn merge(self, other: Completeness) -> Completeness {
        use Completeness::*;
        match (self, other) {
            (Incomplete, _) | (_, Incomplete) => Incomplete,
            (Unknown, _) | (_, Unknown) => Unknown,
            (Complete, Complete) => Complete,
        }
    }
}

/// One returned sample and the stream it came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRecord {
    /// Stream key
    pub discriminator: Arc<Discriminator>,
    /// Data point
    pub sample: Arc<Sample>,
}

/// Merged result of a query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// Records ordered ascending by the query's time type
    pub records: Vec<QueryRecord>,
    /// Delta-query verdict across every visited series
    pub completeness: Completeness,
}

impl QueryResult {
    /// Empty result
    pub fn empty() -> Self {
        QueryResult {
            records: Vec::new(),
            completeness: Completeness::Unknown,
        }
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no records were returned
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
