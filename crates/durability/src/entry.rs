//! Snapshot body entries

use lad_core::{Discriminator, Record, Sample};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Every held sample of one series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesEntry {
    /// Stream key
    pub discriminator: Discriminator,
    /// Identifier within the stream
    pub identifier: String,
    /// Samples, oldest first
    pub samples: Vec<Arc<Sample>>,
}

impl SeriesEntry {
    /// Create an entry
    pub fn new(discriminator: Discriminator, identifier: impl Into<String>, samples: Vec<Arc<Sample>>) -> Self {
        SeriesEntry {
            discriminator,
            identifier: identifier.into(),
            samples,
        }
    }

    /// Highest ingest sequence number among the samples
    pub fn max_sequence(&self) -> Option<u64> {
        self.samples.iter().map(|s| s.provenance.sequence).max()
    }

    /// Turn the entry back into records for routing
    pub fn into_records(self) -> impl Iterator<Item = Record> {
        let discriminator = self.discriminator;
        self.samples.into_iter().map(move |sample| {
            let sample = Arc::try_unwrap(sample).unwrap_or_else(|shared| (*shared).clone());
            Record::new(discriminator.clone(), sample)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lad_core::{QueryType, RecordedState, SampleValue, Timestamp, ValueSource};

    #[test]
    fn test_into_records_keeps_order_and_discriminator() {
        let d = Discriminator::new(QueryType::ChannelValue, ValueSource::Header, RecordedState::Recorded);
        let samples = (0..3)
            .map(|i| {
                Arc::new(
                    Sample::new("H-1", Timestamp::from_millis(i), SampleValue::Signed(i as i64))
                        .with_sequence(10 + i),
                )
            })
            .collect();
        let entry = SeriesEntry::new(d.clone(), "H-1", samples);
        assert_eq!(entry.max_sequence(), Some(12));

        let records: Vec<Record> = entry.into_records().collect();
        assert_eq!(records.len(), 3);
        assert!(records.iter().all(|r| r.discriminator == d));
        assert_eq!(records[2].sample.value, SampleValue::Signed(2));
    }

    #[test]
    fn test_empty_entry_has_no_max_sequence() {
        let d = Discriminator::new(QueryType::Alarm, ValueSource::Flight, RecordedState::Realtime);
        assert_eq!(SeriesEntry::new(d, "X", Vec::new()).max_sequence(), None);
    }
}
