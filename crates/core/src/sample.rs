//! Samples and records
//!
//! A [`Sample`] is one immutable data point for one identifier. A
//! [`Record`] pairs a sample with the discriminator of the stream it belongs
//! to; decoders produce records, snapshots hold them, queries return them.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::discriminator::Discriminator;
use crate::error::{LadError, LadResult};
use crate::query::TimeType;
use crate::time::{Sclk, Timestamp};

/// Value payload of a sample
///
/// Externally tagged so the same derive serves JSON and bincode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleValue {
    /// Signed integer channel value
    Signed(i64),
    /// Unsigned integer channel value
    Unsigned(u64),
    /// Floating point channel value
    Float(f64),
    /// Boolean channel value
    Boolean(bool),
    /// String channel value
    Text(String),
    /// Enumerated or alarm state with its raw data number
    Status {
        /// Raw data number
        dn: i64,
        /// State name
        state: String,
    },
    /// Event record body
    Event {
        /// Event definition id
        event_id: u64,
        /// Event name
        name: String,
        /// Formatted message
        message: String,
    },
}

impl fmt::Display for SampleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleValue::Signed(v) => write!(f, "{}", v),
            SampleValue::Unsigned(v) => write!(f, "{}", v),
            SampleValue::Float(v) => write!(f, "{}", v),
            SampleValue::Boolean(v) => write!(f, "{}", v),
            SampleValue::Text(v) => f.write_str(v),
            SampleValue::Status { dn, state } => write!(f, "{} ({})", state, dn),
            SampleValue::Event { name, message, .. } => write!(f, "{}: {}", name, message),
        }
    }
}

/// Where and when a sample entered the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Producing host
    pub host: String,
    /// Producing session
    pub session: u64,
    /// Ingest sequence number; assigned by the router
    pub sequence: u64,
}

/// One immutable data point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Channel id, or event level for event records
    pub identifier: String,
    /// Earth-receive time; required for ordering
    pub ert: Option<Timestamp>,
    /// Spacecraft event time
    #[serde(default)]
    pub scet: Option<Timestamp>,
    /// Spacecraft clock
    #[serde(default)]
    pub sclk: Option<Sclk>,
    /// Local solar time
    #[serde(default)]
    pub lst: Option<String>,
    /// Ingest wall-clock time
    #[serde(default)]
    pub event_time: Timestamp,
    /// Payload
    pub value: SampleValue,
    /// Provenance
    #[serde(default)]
    pub provenance: Provenance,
}

impl Sample {
    /// Create a sample with an earth-receive time, stamped with the current
    /// wall clock.
    pub fn new(identifier: impl Into<String>, ert: Timestamp, value: SampleValue) -> Self {
        Sample {
            identifier: identifier.into(),
            ert: Some(ert),
            scet: None,
            sclk: None,
            lst: None,
            event_time: Timestamp::now(),
            value,
            provenance: Provenance::default(),
        }
    }

    /// Set spacecraft event time
    pub fn with_scet(mut self, scet: Timestamp) -> Self {
        self.scet = Some(scet);
        self
    }

    /// Set spacecraft clock
    pub fn with_sclk(mut self, sclk: Sclk) -> Self {
        self.sclk = Some(sclk);
        self
    }

    /// Set local solar time
    pub fn with_lst(mut self, lst: impl Into<String>) -> Self {
        self.lst = Some(lst.into());
        self
    }

    /// Set provenance host and session
    pub fn with_origin(mut self, host: impl Into<String>, session: u64) -> Self {
        self.provenance.host = host.into();
        self.provenance.session = session;
        self
    }

    /// Set ingest sequence number
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.provenance.sequence = sequence;
        self
    }

    /// Earth-receive time, or a decode error when absent
    pub fn require_ert(&self) -> LadResult<Timestamp> {
        self.ert.ok_or_else(|| {
            LadError::decode(format!("sample '{}' has no earth-receive time", self.identifier))
        })
    }

    /// Time in the requested domain; falls back to ERT when the sample
    /// carries no value in that domain.
    pub fn time(&self, time_type: TimeType) -> Option<Timestamp> {
        match time_type {
            TimeType::Ert => self.ert,
            TimeType::Scet => self.scet.or(self.ert),
            TimeType::Event => Some(self.event_time),
        }
    }
}

/// A sample bound to its stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stream key
    pub discriminator: Discriminator,
    /// Data point
    pub sample: Sample,
}

impl Record {
    /// Create a record
    pub fn new(discriminator: Discriminator, sample: Sample) -> Self {
        Record {
            discriminator,
            sample,
        }
    }
}
