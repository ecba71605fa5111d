//! Payload decoding for the ingest path
//!
//! Workers hand raw payloads to a [`SampleDecoder`]; anything it rejects is
//! counted as a decode error and dropped.

use lad_core::{LadError, LadResult, Record};
use serde::Deserialize;

use crate::query::InsertTarget;

/// Turns one raw payload into records
pub trait SampleDecoder: Send + Sync {
    /// Decode a payload. An empty vector is a valid outcome.
    fn decode(&self, payload: &[u8]) -> LadResult<Vec<Record>>;

    /// Name used in logs
    fn name(&self) -> &str {
        "decoder"
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<Record>),
    One(Box<Record>),
}

/// Decodes the JSON form of [`Record`]: one object or an array of them.
///
/// ```json
/// {
///   "discriminator": { "query_type": "channel_value", "value_source": "flight", ... },
///   "sample": { "identifier": "A-0001", "ert": 1700000000000000,
///               "value": { "float": 3.5 } }
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct JsonSampleDecoder {
    scope: Option<InsertTarget>,
}

impl JsonSampleDecoder {
    /// Decoder accepting any discriminator
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder that only accepts records for `target`
    pub fn scoped(target: InsertTarget) -> Self {
        JsonSampleDecoder {
            scope: Some(target),
        }
    }

    fn check(&self, record: &Record) -> LadResult<()> {
        record.sample.require_ert()?;
        if record.sample.identifier.is_empty() {
            return Err(LadError::decode("sample has an empty identifier"));
        }
        if let Some(target) = &self.scope {
            if !target.accepts(&record.discriminator) {
                return Err(LadError::decode(format!(
                    "record for {} does not belong to insert target {}",
                    record.discriminator, target
                )));
            }
        }
        Ok(())
    }
}

impl SampleDecoder for JsonSampleDecoder {
    fn decode(&self, payload: &[u8]) -> LadResult<Vec<Record>> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Err(LadError::decode("empty payload"));
        }
        let records = match serde_json::from_slice::<OneOrMany>(payload)
            .map_err(|e| LadError::decode(format!("invalid JSON record: {}", e)))?
        {
            OneOrMany::Many(records) => records,
            OneOrMany::One(record) => vec![*record],
        };
        for record in &records {
            self.check(record)?;
        }
        Ok(records)
    }

    fn name(&self) -> &str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lad_core::{
        Discriminator, QueryType, RecordedState, Sample, SampleValue, Timestamp, ValueSource,
    };

    fn record(qt: QueryType, id: &str) -> Record {
        Record::new(
            Discriminator::new(qt, ValueSource::Flight, RecordedState::Realtime).with_session("gds", 7),
            Sample::new(id, Timestamp::from_millis(1_000), SampleValue::Float(1.5)),
        )
    }

    #[test]
    fn test_decode_single_and_array() {
        let decoder = JsonSampleDecoder::new();

        let one = serde_json::to_vec(&record(QueryType::ChannelValue, "A-1")).unwrap();
        let decoded = decoder.decode(&one).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].sample.identifier, "A-1");

        let many = serde_json::to_vec(&vec![
            record(QueryType::ChannelValue, "A-1"),
            record(QueryType::Alarm, "B-2"),
        ])
        .unwrap();
        assert_eq!(decoder.decode(&many).unwrap().len(), 2);
    }

    #[test]
    fn test_decode_rejects_garbage_and_empty() {
        let decoder = JsonSampleDecoder::new();
        assert!(matches!(decoder.decode(b"{not json"), Err(LadError::Decode(_))));
        assert!(matches!(decoder.decode(b"  \n"), Err(LadError::Decode(_))));
    }

    #[test]
    fn test_decode_requires_ert() {
        let mut r = record(QueryType::ChannelValue, "A-1");
        r.sample.ert = None;
        let bytes = serde_json::to_vec(&r).unwrap();
        let err = JsonSampleDecoder::new().decode(&bytes).unwrap_err();
        assert!(err.is_ingest_drop());
    }

    #[test]
    fn test_scoped_decoder_rejects_other_streams() {
        let target = InsertTarget::new(QueryType::Alarm, ValueSource::Flight, RecordedState::Realtime);
        let decoder = JsonSampleDecoder::scoped(target);

        let ok = serde_json::to_vec(&record(QueryType::Alarm, "B-2")).unwrap();
        assert!(decoder.decode(&ok).is_ok());

        let wrong = serde_json::to_vec(&record(QueryType::ChannelValue, "A-1")).unwrap();
        assert!(matches!(decoder.decode(&wrong), Err(LadError::Decode(_))));
    }
}
