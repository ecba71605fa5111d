//! Discriminators: the composite key of one logical data stream
//!
//! A [`Discriminator`] is a plain struct with derived hashing and equality.
//! The container tree consumes it one [`Level`] at a time through
//! [`Discriminator::component`], so every level is keyed by a
//! [`ComponentKey`] rather than by a runtime type.
//!
//! The query side uses [`DiscriminatorFilter`], where `None` is a wildcard
//! ("all" sources, "both" recorded states, any station, ...).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LadError;

/// Kind of data a stream carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    /// Channel values (EHA)
    ChannelValue,
    /// Event records (EVR)
    EventRecord,
    /// Alarm states
    Alarm,
}

impl QueryType {
    /// All query types in tree order
    pub const ALL: [QueryType; 3] = [
        QueryType::ChannelValue,
        QueryType::EventRecord,
        QueryType::Alarm,
    ];

    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::ChannelValue => "channel_value",
            QueryType::EventRecord => "event_record",
            QueryType::Alarm => "alarm",
        }
    }

    fn tag(self) -> u8 {
        match self {
            QueryType::ChannelValue => 0,
            QueryType::EventRecord => 1,
            QueryType::Alarm => 2,
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryType {
    type Err = LadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "eha" | "channel_value" | "channel-value" | "channel" => Ok(QueryType::ChannelValue),
            "evr" | "event_record" | "event-record" | "event" => Ok(QueryType::EventRecord),
            "alarm" | "alarms" => Ok(QueryType::Alarm),
            other => Err(LadError::invalid_query(format!(
                "unknown query type '{}'",
                other
            ))),
        }
    }
}

/// Where a value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    /// Flight software
    Flight,
    /// Simulation / support equipment
    Simulation,
    /// Frame or packet header derived
    Header,
    /// Ground station monitor
    Monitor,
}

impl ValueSource {
    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueSource::Flight => "flight",
            ValueSource::Simulation => "simulation",
            ValueSource::Header => "header",
            ValueSource::Monitor => "monitor",
        }
    }

    fn tag(self) -> u8 {
        match self {
            ValueSource::Flight => 0,
            ValueSource::Simulation => 1,
            ValueSource::Header => 2,
            ValueSource::Monitor => 3,
        }
    }

    /// Parse a query-side source where `all` is a wildcard.
    pub fn parse_filter(s: &str) -> Result<Option<Self>, LadError> {
        if s.eq_ignore_ascii_case("all") {
            Ok(None)
        } else {
            s.parse().map(Some)
        }
    }
}

impl fmt::Display for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueSource {
    type Err = LadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fsw" | "flight" => Ok(ValueSource::Flight),
            "sse" | "simulation" => Ok(ValueSource::Simulation),
            "header" => Ok(ValueSource::Header),
            "monitor" => Ok(ValueSource::Monitor),
            other => Err(LadError::invalid_query(format!(
                "unknown value source '{}'",
                other
            ))),
        }
    }
}

/// Realtime vs recorded playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordedState {
    /// Received as it happened
    Realtime,
    /// Played back from onboard storage
    Recorded,
}

impl RecordedState {
    /// Canonical name
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordedState::Realtime => "realtime",
            RecordedState::Recorded => "recorded",
        }
    }

    fn tag(self) -> u8 {
        match self {
            RecordedState::Realtime => 0,
            RecordedState::Recorded => 1,
        }
    }

    /// Parse a query-side state where `both` is a wildcard.
    pub fn parse_filter(s: &str) -> Result<Option<Self>, LadError> {
        if s.eq_ignore_ascii_case("both") {
            Ok(None)
        } else {
            s.parse().map(Some)
        }
    }
}

impl fmt::Display for RecordedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordedState {
    type Err = LadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "realtime" | "rt" => Ok(RecordedState::Realtime),
            "recorded" | "rec" => Ok(RecordedState::Recorded),
            other => Err(LadError::invalid_query(format!(
                "unknown recorded state '{}'",
                other
            ))),
        }
    }
}

/// Fully specified key of one logical data stream
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Discriminator {
    /// Kind of data
    pub query_type: QueryType,
    /// Origin of the values
    pub value_source: ValueSource,
    /// Realtime or recorded
    pub recorded_state: RecordedState,
    /// Ground station (DSS) identifier
    pub station_id: u32,
    /// Virtual channel identifier
    pub virtual_channel_id: u32,
    /// Spacecraft identifier
    pub spacecraft_id: u32,
    /// Host that produced the session
    pub session_host: String,
    /// Session number
    pub session_number: u64,
    /// Application (packet APID) identifier
    pub application_id: u32,
}

impl Discriminator {
    /// Create a discriminator with zeroed mission dimensions
    pub fn new(
        query_type: QueryType,
        value_source: ValueSource,
        recorded_state: RecordedState,
    ) -> Self {
        Discriminator {
            query_type,
            value_source,
            recorded_state,
            station_id: 0,
            virtual_channel_id: 0,
            spacecraft_id: 0,
            session_host: String::new(),
            session_number: 0,
            application_id: 0,
        }
    }

    /// Set session host and number
    pub fn with_session(mut self, host: impl Into<String>, number: u64) -> Self {
        self.session_host = host.into();
        self.session_number = number;
        self
    }

    /// Set spacecraft, virtual channel and station
    pub fn with_link(mut self, spacecraft_id: u32, virtual_channel_id: u32, station_id: u32) -> Self {
        self.spacecraft_id = spacecraft_id;
        self.virtual_channel_id = virtual_channel_id;
        self.station_id = station_id;
        self
    }

    /// Set application identifier
    pub fn with_application(mut self, application_id: u32) -> Self {
        self.application_id = application_id;
        self
    }

    /// The key of this discriminator at one tree level
    pub fn component(&self, level: Level) -> ComponentKey {
        match level {
            Level::QueryType => ComponentKey::Tag(self.query_type.tag()),
            Level::ValueSource => ComponentKey::Tag(self.value_source.tag()),
            Level::RecordedState => ComponentKey::Tag(self.recorded_state.tag()),
            Level::SessionHost => ComponentKey::Text(self.session_host.clone()),
            Level::SessionNumber => ComponentKey::Number(self.session_number),
            Level::SpacecraftId => ComponentKey::Number(u64::from(self.spacecraft_id)),
            Level::VirtualChannelId => ComponentKey::Number(u64::from(self.virtual_channel_id)),
            Level::StationId => ComponentKey::Number(u64::from(self.station_id)),
            Level::ApplicationId => ComponentKey::Number(u64::from(self.application_id)),
        }
    }
}

impl fmt::Display for Discriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{} host={} session={} scid={} vcid={} dss={} apid={}",
            self.query_type,
            self.value_source,
            self.recorded_state,
            self.session_host,
            self.session_number,
            self.spacecraft_id,
            self.virtual_channel_id,
            self.station_id,
            self.application_id
        )
    }
}

/// One level of the container tree, root first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    /// Query type (root level)
    QueryType,
    /// Value source
    ValueSource,
    /// Recorded state
    RecordedState,
    /// Session host
    SessionHost,
    /// Session number
    SessionNumber,
    /// Spacecraft
    SpacecraftId,
    /// Virtual channel
    VirtualChannelId,
    /// Station
    StationId,
    /// Application identifier; children of this level are leaves
    ApplicationId,
}

impl Level {
    /// Levels in tree order
    pub const ORDER: [Level; 9] = [
        Level::QueryType,
        Level::ValueSource,
        Level::RecordedState,
        Level::SessionHost,
        Level::SessionNumber,
        Level::SpacecraftId,
        Level::VirtualChannelId,
        Level::StationId,
        Level::ApplicationId,
    ];

    /// The level below this one, or `None` for the last level
    pub fn next(self) -> Option<Level> {
        let idx = Level::ORDER.iter().position(|l| *l == self)?;
        Level::ORDER.get(idx + 1).copied()
    }
}

/// Key of a child at one tree level
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ComponentKey {
    /// Enumerated component (query type, source, recorded state)
    Tag(u8),
    /// Numeric component
    Number(u64),
    /// Text component
    Text(String),
}

/// Query-side discriminator with wildcard components
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscriminatorFilter {
    /// Query type, `None` for all
    pub query_type: Option<QueryType>,
    /// Value source, `None` for all
    pub value_source: Option<ValueSource>,
    /// Recorded state, `None` for both
    pub recorded_state: Option<RecordedState>,
    /// Station
    pub station_id: Option<u32>,
    /// Virtual channel
    pub virtual_channel_id: Option<u32>,
    /// Spacecraft
    pub spacecraft_id: Option<u32>,
    /// Session host
    pub session_host: Option<String>,
    /// Session number
    pub session_number: Option<u64>,
    /// Application identifier
    pub application_id: Option<u32>,
}

impl DiscriminatorFilter {
    /// Filter matching everything
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter matching the three leading components
    pub fn new(
        query_type: Option<QueryType>,
        value_source: Option<ValueSource>,
        recorded_state: Option<RecordedState>,
    ) -> Self {
        DiscriminatorFilter {
            query_type,
            value_source,
            recorded_state,
            ..Default::default()
        }
    }

    /// Filter matching exactly one discriminator
    pub fn exact(d: &Discriminator) -> Self {
        DiscriminatorFilter {
            query_type: Some(d.query_type),
            value_source: Some(d.value_source),
            recorded_state: Some(d.recorded_state),
            station_id: Some(d.station_id),
            virtual_channel_id: Some(d.virtual_channel_id),
            spacecraft_id: Some(d.spacecraft_id),
            session_host: Some(d.session_host.clone()),
            session_number: Some(d.session_number),
            application_id: Some(d.application_id),
        }
    }

    /// The exact key this filter requires at `level`, or `None` for a wildcard
    pub fn component(&self, level: Level) -> Option<ComponentKey> {
        match level {
            Level::QueryType => self.query_type.map(|q| ComponentKey::Tag(q.tag())),
            Level::ValueSource => self.value_source.map(|v| ComponentKey::Tag(v.tag())),
            Level::RecordedState => self.recorded_state.map(|r| ComponentKey::Tag(r.tag())),
            Level::SessionHost => self.session_host.clone().map(ComponentKey::Text),
            Level::SessionNumber => self.session_number.map(ComponentKey::Number),
            Level::SpacecraftId => self.spacecraft_id.map(|v| ComponentKey::Number(u64::from(v))),
            Level::VirtualChannelId => self
                .virtual_channel_id
                .map(|v| ComponentKey::Number(u64::from(v))),
            Level::StationId => self.station_id.map(|v| ComponentKey::Number(u64::from(v))),
            Level::ApplicationId => self
                .application_id
                .map(|v| ComponentKey::Number(u64::from(v))),
        }
    }

    /// Whether a full discriminator satisfies this filter
    pub fn matches(&self, d: &Discriminator) -> bool {
        Level::ORDER.iter().all(|level| match self.component(*level) {
            Some(key) => key == d.component(*level),
            None => true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_discriminator() -> Discriminator {
        Discriminator::new(
            QueryType::ChannelValue,
            ValueSource::Flight,
            RecordedState::Realtime,
        )
        .with_session("gds-host", 42)
        .with_link(76, 0, 14)
    }

    #[test]
    fn test_query_type_aliases() {
        assert_eq!("eha".parse::<QueryType>().unwrap(), QueryType::ChannelValue);
        assert_eq!("EVR".parse::<QueryType>().unwrap(), QueryType::EventRecord);
        assert_eq!("alarm".parse::<QueryType>().unwrap(), QueryType::Alarm);
        let err = "telemetry".parse::<QueryType>().unwrap_err();
        assert!(err.is_client_error());
    }

    #[test]
    fn test_wildcard_parsing() {
        assert_eq!(ValueSource::parse_filter("all").unwrap(), None);
        assert_eq!(
            ValueSource::parse_filter("fsw").unwrap(),
            Some(ValueSource::Flight)
        );
        assert_eq!(RecordedState::parse_filter("both").unwrap(), None);
        assert_eq!(
            RecordedState::parse_filter("recorded").unwrap(),
            Some(RecordedState::Recorded)
        );
        assert!(RecordedState::parse_filter("sometimes").is_err());
    }

    #[test]
    fn test_level_order() {
        assert_eq!(Level::QueryType.next(), Some(Level::ValueSource));
        assert_eq!(Level::StationId.next(), Some(Level::ApplicationId));
        assert_eq!(Level::ApplicationId.next(), None);
    }

    #[test]
    fn test_exact_filter_matches_only_itself() {
        let d = sample_discriminator();
        let filter = DiscriminatorFilter::exact(&d);
        assert!(filter.matches(&d));

        let other = d.clone().with_session("gds-host", 43);
        assert!(!filter.matches(&other));
    }

    #[test]
    fn test_wildcard_filter_matches_many() {
        let d = sample_discriminator();
        let filter = DiscriminatorFilter::new(Some(QueryType::ChannelValue), None, None);
        assert!(filter.matches(&d));
        assert!(filter.matches(&Discriminator::new(
            QueryType::ChannelValue,
            ValueSource::Monitor,
            RecordedState::Recorded
        )));
        assert!(!filter.matches(&Discriminator::new(
            QueryType::Alarm,
            ValueSource::Flight,
            RecordedState::Realtime
        )));
    }

    #[test]
    fn test_component_keys_distinguish_levels() {
        let d = sample_discriminator();
        assert_eq!(d.component(Level::SessionHost), ComponentKey::Text("gds-host".into()));
        assert_eq!(d.component(Level::SessionNumber), ComponentKey::Number(42));
        assert_eq!(d.component(Level::StationId), ComponentKey::Number(14));
    }

    #[test]
    fn test_discriminator_hash_eq() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(sample_discriminator());
        set.insert(sample_discriminator());
        assert_eq!(set.len(), 1);
    }
}
