//! Request parsing for the query and insert surfaces
//!
//! Paths look like `{queryType}/{valueSource}/{recordedState}[/{timeType}][/{identifier}]`
//! for queries and `{queryType}/{valueSource}/{recordedState}/insert` for
//! inserts. Everything that fails to parse is a client error.

use lad_core::{
    Discriminator, DiscriminatorFilter, IdentifierPattern, LadError, LadQuery, LadResult,
    QueryType, RecordedState, TimeType, Timestamp, ValueSource,
};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Result rendering requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// JSON document
    #[default]
    Json,
    /// Comma-separated values
    Csv,
    /// CSV in the legacy layout
    LmCsv,
}

impl FromStr for OutputFormat {
    type Err = LadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            "lm_csv" | "lmcsv" => Ok(OutputFormat::LmCsv),
            other => Err(LadError::invalid_query(format!(
                "unknown output format '{}'",
                other
            ))),
        }
    }
}

/// A parsed query request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    /// The store query
    pub query: LadQuery,
    /// Rendering
    pub output_format: OutputFormat,
    /// Whether CSV output starts with a header row
    pub show_column_headers: bool,
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> LadResult<T> {
    value.trim().parse().map_err(|_| {
        LadError::invalid_query(format!("{} must be a non-negative integer, got '{}'", name, value))
    })
}

fn parse_bool(name: &str, value: &str) -> LadResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(LadError::invalid_query(format!(
            "{} must be true or false, got '{}'",
            name, value
        ))),
    }
}

fn parse_patterns(value: &str) -> LadResult<Vec<IdentifierPattern>> {
    value
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(IdentifierPattern::parse)
        .collect()
}

fn split_path(path: &str) -> Vec<&str> {
    path.trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect()
}

impl QueryRequest {
    /// Parse a request path and its query parameters.
    ///
    /// Unknown parameters are ignored.
    pub fn from_path<I, K, V>(path: &str, params: I) -> LadResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let segments = split_path(path);
        if segments.len() < 3 || segments.len() > 5 {
            return Err(LadError::invalid_query(format!(
                "expected {{queryType}}/{{valueSource}}/{{recordedState}}[/{{timeType}}][/{{id}}], got '{}'",
                path
            )));
        }

        let query_type: QueryType = segments[0].parse()?;
        let value_source = ValueSource::parse_filter(segments[1])?;
        let recorded_state = RecordedState::parse_filter(segments[2])?;

        let mut time_type = TimeType::Ert;
        let mut identifiers = Vec::new();
        let mut rest = &segments[3..];
        if let Some(first) = rest.first() {
            if let Ok(tt) = first.parse::<TimeType>() {
                time_type = tt;
                rest = &rest[1..];
            }
        }
        match rest {
            [] => {}
            [id] => identifiers.push(IdentifierPattern::parse(id)?),
            _ => {
                return Err(LadError::invalid_query(format!(
                    "unexpected path segments in '{}'",
                    path
                )))
            }
        }

        let mut filter = DiscriminatorFilter::new(Some(query_type), value_source, recorded_state);
        let mut max_results = 1usize;
        let mut lower = None;
        let mut upper = None;
        let mut output_format = OutputFormat::Json;
        let mut show_column_headers = true;

        for (key, value) in params {
            let (key, value) = (key.as_ref(), value.as_ref());
            match key {
                "sessionNumber" => filter.session_number = Some(parse_number(key, value)?),
                "host" => filter.session_host = Some(value.to_string()),
                "vcid" => filter.virtual_channel_id = Some(parse_number(key, value)?),
                "scid" => filter.spacecraft_id = Some(parse_number(key, value)?),
                "dssId" => filter.station_id = Some(parse_number(key, value)?),
                "apid" => filter.application_id = Some(parse_number(key, value)?),
                "channelId" => {
                    if query_type == QueryType::EventRecord {
                        return Err(LadError::invalid_query(
                            "channelId does not apply to event records; use evrLevel",
                        ));
                    }
                    identifiers.extend(parse_patterns(value)?);
                }
                "evrLevel" => {
                    if query_type != QueryType::EventRecord {
                        return Err(LadError::invalid_query(format!(
                            "evrLevel does not apply to {}",
                            query_type
                        )));
                    }
                    identifiers.extend(parse_patterns(value)?);
                }
                "maxResults" => max_results = parse_number(key, value)?,
                "lowerBoundTime" => lower = Some(Timestamp::parse_bound(value)?),
                "upperBoundTime" => upper = Some(Timestamp::parse_bound(value)?),
                "timeType" => time_type = value.parse()?,
                "outputFormat" => output_format = value.parse()?,
                "showColumnHeaders" => show_column_headers = parse_bool(key, value)?,
                _ => {}
            }
        }

        let query = LadQuery::new(filter)
            .with_identifiers(identifiers)
            .with_max_results(max_results)
            .with_bounds(time_type, lower, upper);
        query.validate()?;

        Ok(QueryRequest {
            query,
            output_format,
            show_column_headers,
        })
    }
}

/// Destination of an insert request; every component must be concrete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InsertTarget {
    /// Query type
    pub query_type: QueryType,
    /// Value source
    pub value_source: ValueSource,
    /// Recorded state
    pub recorded_state: RecordedState,
}

impl InsertTarget {
    /// Create a target
    pub fn new(
        query_type: QueryType,
        value_source: ValueSource,
        recorded_state: RecordedState,
    ) -> Self {
        InsertTarget {
            query_type,
            value_source,
            recorded_state,
        }
    }

    /// Parse `{queryType}/{valueSource}/{recordedState}/insert`
    pub fn from_path(path: &str) -> LadResult<Self> {
        match split_path(path).as_slice() {
            [qt, vs, rs, "insert"] => Ok(InsertTarget::new(qt.parse()?, vs.parse()?, rs.parse()?)),
            _ => Err(LadError::invalid_query(format!(
                "expected {{queryType}}/{{valueSource}}/{{recordedState}}/insert, got '{}'",
                path
            ))),
        }
    }

    /// Whether a record for `discriminator` may be inserted here
    pub fn accepts(&self, discriminator: &Discriminator) -> bool {
        discriminator.query_type == self.query_type
            && discriminator.value_source == self.value_source
            && discriminator.recorded_state == self.recorded_state
    }
}

impl fmt::Display for InsertTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.query_type, self.value_source, self.recorded_state
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_PARAMS: [(&str, &str); 0] = [];

    #[test]
    fn test_parse_minimal_path() {
        let req = QueryRequest::from_path("eha/fsw/realtime", NO_PARAMS).unwrap();
        assert_eq!(req.query.filter.query_type, Some(QueryType::ChannelValue));
        assert_eq!(req.query.filter.value_source, Some(ValueSource::Flight));
        assert_eq!(req.query.filter.recorded_state, Some(RecordedState::Realtime));
        assert_eq!(req.query.max_results, 1);
        assert_eq!(req.query.time_type, TimeType::Ert);
        assert_eq!(req.output_format, OutputFormat::Json);
        assert!(req.show_column_headers);
    }

    #[test]
    fn test_parse_wildcards_time_type_and_identifier() {
        let req = QueryRequest::from_path("/evr/all/both/scet/WARNING*", NO_PARAMS).unwrap();
        assert_eq!(req.query.filter.value_source, None);
        assert_eq!(req.query.filter.recorded_state, None);
        assert_eq!(req.query.time_type, TimeType::Scet);
        assert_eq!(
            req.query.identifiers,
            vec![IdentifierPattern::Prefix("WARNING".into())]
        );
    }

    #[test]
    fn test_parse_parameters() {
        let params = [
            ("sessionNumber", "42"),
            ("host", "gds-1"),
            ("scid", "76"),
            ("vcid", "0"),
            ("dssId", "14"),
            ("channelId", "A-0001,B-*"),
            ("maxResults", "10"),
            ("lowerBoundTime", "1000"),
            ("upperBoundTime", "2020-01-01T00:00:00Z"),
            ("outputFormat", "lm_csv"),
            ("showColumnHeaders", "false"),
            ("somethingElse", "ignored"),
        ];
        let req = QueryRequest::from_path("channel_value/flight/recorded", params).unwrap();
        let f = &req.query.filter;
        assert_eq!(f.session_number, Some(42));
        assert_eq!(f.session_host.as_deref(), Some("gds-1"));
        assert_eq!(f.spacecraft_id, Some(76));
        assert_eq!(f.virtual_channel_id, Some(0));
        assert_eq!(f.station_id, Some(14));
        assert_eq!(req.query.identifiers.len(), 2);
        assert_eq!(req.query.max_results, 10);
        assert_eq!(req.query.lower_bound, Some(Timestamp::from_millis(1000)));
        assert!(req.query.upper_bound.is_some());
        assert_eq!(req.output_format, OutputFormat::LmCsv);
        assert!(!req.show_column_headers);
    }

    #[test]
    fn test_invalid_requests_are_client_errors() {
        let cases: Vec<(&str, Vec<(&str, &str)>)> = vec![
            ("eha/fsw", vec![]),
            ("bogus/fsw/realtime", vec![]),
            ("eha/nowhere/realtime", vec![]),
            ("eha/fsw/sometimes", vec![]),
            ("eha/fsw/realtime/a/b", vec![]),
            ("eha/fsw/realtime", vec![("sessionNumber", "-3")]),
            ("eha/fsw/realtime", vec![("maxResults", "0")]),
            ("eha/fsw/realtime", vec![("lowerBoundTime", "yesterday")]),
            ("eha/fsw/realtime", vec![("lowerBoundTime", "5000"), ("upperBoundTime", "1000")]),
            ("eha/fsw/realtime", vec![("evrLevel", "FATAL")]),
            ("evr/fsw/realtime", vec![("channelId", "A-1")]),
            ("eha/fsw/realtime", vec![("outputFormat", "xml")]),
            ("eha/fsw/realtime/A*B", vec![]),
        ];
        for (path, params) in cases {
            let err = QueryRequest::from_path(path, params).unwrap_err();
            assert!(err.is_client_error(), "{} should be a client error: {}", path, err);
        }
    }

    #[test]
    fn test_insert_target() {
        let target = InsertTarget::from_path("alarm/fsw/rt/insert").unwrap();
        assert_eq!(target.query_type, QueryType::Alarm);
        assert_eq!(target.to_string(), "alarm/flight/realtime");

        assert!(InsertTarget::from_path("alarm/all/rt/insert").is_err());
        assert!(InsertTarget::from_path("alarm/fsw/both/insert").is_err());
        assert!(InsertTarget::from_path("alarm/fsw/rt").is_err());
    }
}
