//! What shard workers do with an event

use lad_core::{LadResult, Record, Timestamp};
use lad_storage::ContainerTree;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::decode::SampleDecoder;

/// Event body as published by a source
pub enum Payload {
    /// Undecoded bytes and the decoder that understands them
    Raw {
        /// Payload bytes
        bytes: Vec<u8>,
        /// Decoder run on the shard worker
        decoder: Arc<dyn SampleDecoder>,
    },
    /// Already decoded by the source
    Decoded(Record),
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Raw { bytes, decoder } => f
                .debug_struct("Raw")
                .field("len", &bytes.len())
                .field("decoder", &decoder.name())
                .finish(),
            Payload::Decoded(record) => f.debug_tuple("Decoded").field(record).finish(),
        }
    }
}

impl Payload {
    /// Decode into records
    pub fn into_records(self) -> LadResult<Vec<Record>> {
        match self {
            Payload::Raw { bytes, decoder } => decoder.decode(&bytes),
            Payload::Decoded(record) => Ok(vec![record]),
        }
    }
}

/// One sequenced event in a partition
#[derive(Debug)]
pub struct IngestEvent {
    /// Router-assigned sequence number
    pub sequence: u64,
    /// Body
    pub payload: Payload,
}

/// Consumes events on a shard worker.
///
/// Errors are counted by the worker: [`LadError::Decode`](lad_core::LadError::Decode)
/// as a decode error, anything else as a handler failure.
pub trait EventHandler: Send + Sync {
    /// Handle one event taken from partition `shard`
    fn on_event(&self, shard: usize, event: IngestEvent) -> LadResult<()>;
}

/// Decodes events and routes them into the container tree.
///
/// Every record of an event is stamped with the event's sequence number and
/// the time the worker received it. A record that cannot be routed does not
/// stop the rest of its event; the first failure is returned afterwards.
pub struct InsertHandler {
    tree: Arc<ContainerTree>,
}

impl InsertHandler {
    /// Create a handler writing into `tree`
    pub fn new(tree: Arc<ContainerTree>) -> Self {
        InsertHandler { tree }
    }
}

impl EventHandler for InsertHandler {
    fn on_event(&self, _shard: usize, event: IngestEvent) -> LadResult<()> {
        let sequence = event.sequence;
        let received = Timestamp::now();
        let mut first_error = None;
        for mut record in event.payload.into_records()? {
            record.sample.provenance.sequence = sequence;
            record.sample.event_time = received;
            if let Err(e) = self.tree.route(record) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Consumes and throws away every event
#[derive(Debug, Default)]
pub struct DiscardHandler {
    discarded: AtomicU64,
}

impl DiscardHandler {
    /// Create a handler
    pub fn new() -> Self {
        Self::default()
    }

    /// Events consumed so far
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

impl EventHandler for DiscardHandler {
    fn on_event(&self, _shard: usize, _event: IngestEvent) -> LadResult<()> {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
