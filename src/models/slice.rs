//! # Slice Model
//!
//! One bounded, independently-claimable chunk of a batch job's records.
//! Records are materialized lazily from the encoded payload through the
//! owning category's codec and memoized per instance; any direct mutation of
//! the records re-encodes the payload and refreshes the cache.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::{Codec, Decoded};
use crate::error::{Result, SliceworksError};
use crate::models::{JobException, Record};
use crate::state_machine::{SliceEvent, SliceState, StateMachine, Stateful};

/// A bounded unit of work within one `(job, category)` collection.
///
/// Ids are monotonically increasing in creation order and claiming always
/// takes the lowest queued id first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slice {
    /// Ordering-significant id, unique within its collection.
    pub id: u64,
    pub state: SliceState,
    /// Record number of this slice's first record within the whole upload.
    pub first_record_number: u64,
    pub record_count: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub worker_name: Option<String>,
    pub failure_count: u32,
    pub exception: Option<JobException>,
    /// Encoded byte form of the records.
    #[serde(with = "serde_bytes_base64")]
    pub payload: Vec<u8>,
    /// Lazily decoded records, invalidated whenever the payload changes.
    #[serde(skip)]
    decoded: Option<Vec<Record>>,
}

impl Slice {
    /// Build a slice by encoding `records` through `codec`.
    pub fn build(
        id: u64,
        first_record_number: u64,
        records: Vec<Record>,
        codec: &Codec,
    ) -> Result<Self> {
        let payload = codec.encode(&records)?;
        Ok(Self {
            id,
            state: SliceState::Queued,
            first_record_number,
            record_count: records.len() as u64,
            started_at: None,
            worker_name: None,
            failure_count: 0,
            exception: None,
            payload,
            decoded: Some(records),
        })
    }

    /// Decode and memoize the record sequence. Idempotent: repeat calls
    /// return the cached decode.
    pub fn records(&mut self, codec: &Codec) -> Result<&[Record]> {
        if self.decoded.is_none() {
            match codec.decode(&self.payload)? {
                Decoded::Records(records) => self.decoded = Some(records),
                Decoded::Stream(_) => {
                    return Err(SliceworksError::Codec(
                        "streamed slice payloads are opaque; use raw_stream".into(),
                    ))
                }
            }
        }
        Ok(self.decoded.as_deref().unwrap_or_default())
    }

    /// Decoded byte stream for the streamed (bzip2) codecs.
    pub fn raw_stream(&self, codec: &Codec) -> Result<Vec<u8>> {
        match codec.decode(&self.payload)? {
            Decoded::Stream(bytes) => Ok(bytes),
            Decoded::Records(_) => Err(SliceworksError::Codec(
                "record slice payloads are not streams; use records".into(),
            )),
        }
    }

    /// Replace the record sequence, re-encoding the payload.
    pub fn set_records(&mut self, records: Vec<Record>, codec: &Codec) -> Result<()> {
        self.payload = codec.encode(&records)?;
        self.record_count = records.len() as u64;
        self.decoded = Some(records);
        Ok(())
    }

    /// Wall-clock processing time, if started.
    pub fn processing_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        self.started_at.map(|at| (now - at).num_seconds())
    }

    /// The shared slice transition table.
    pub fn machine() -> &'static StateMachine<Slice> {
        static MACHINE: OnceLock<StateMachine<Slice>> = OnceLock::new();
        MACHINE.get_or_init(|| {
            let mut machine = StateMachine::new(SliceState::Queued);
            machine
                .event(SliceEvent::Start.name())
                .transition(SliceState::Queued, SliceState::Running)
                .before(|slice: &mut Slice| {
                    slice.started_at = Some(Utc::now());
                    Ok(())
                });
            machine
                .event(SliceEvent::Complete.name())
                .transition(SliceState::Running, SliceState::Completed);
            machine
                .event(SliceEvent::Fail.name())
                .transition(SliceState::Running, SliceState::Failed)
                .transition(SliceState::Queued, SliceState::Failed)
                .before(|slice: &mut Slice| {
                    slice.failure_count += 1;
                    slice.worker_name = None;
                    Ok(())
                });
            machine
                .event(SliceEvent::Retry.name())
                .transition(SliceState::Failed, SliceState::Queued)
                .before(|slice: &mut Slice| {
                    slice.exception = None;
                    slice.started_at = None;
                    Ok(())
                });
            machine
        })
    }

    pub fn fire(&mut self, event: SliceEvent) -> Result<SliceState> {
        Ok(Self::machine().fire(self, event.name())?)
    }

    /// Claim bookkeeping: fired by the store inside its atomic update.
    pub fn start(&mut self, worker_name: &str) -> Result<()> {
        self.fire(SliceEvent::Start)?;
        self.worker_name = Some(worker_name.to_string());
        Ok(())
    }

    pub fn complete(&mut self) -> Result<()> {
        self.fire(SliceEvent::Complete)?;
        Ok(())
    }

    pub fn fail_with(&mut self, exception: JobException) -> Result<()> {
        self.fire(SliceEvent::Fail)?;
        self.exception = Some(exception);
        Ok(())
    }
}

impl Stateful for Slice {
    type State = SliceState;

    fn state(&self) -> SliceState {
        self.state
    }

    fn set_state(&mut self, state: SliceState) {
        self.state = state;
    }
}

/// Serialize payload bytes as base64 so slices stay JSON-representable for
/// document stores without a native binary type.
mod serde_bytes_base64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Codec;

    fn records(values: &[&str]) -> Vec<Record> {
        values.iter().map(|v| Record::from(*v)).collect()
    }

    #[test]
    fn build_and_lazy_decode() {
        let codec = Codec::plain();
        let mut slice = Slice::build(1, 1, records(&["a", "b"]), &codec).unwrap();
        assert_eq!(slice.record_count, 2);

        // First access uses the construction-time cache.
        assert_eq!(slice.records(&codec).unwrap().len(), 2);

        // Simulate a reload from the store: cache gone, payload decodes.
        slice.decoded = None;
        assert_eq!(slice.records(&codec).unwrap(), &records(&["a", "b"])[..]);
        // And is memoized.
        assert_eq!(slice.records(&codec).unwrap().len(), 2);
    }

    #[test]
    fn set_records_reencodes() {
        let codec = Codec::plain();
        let mut slice = Slice::build(1, 1, records(&["a"]), &codec).unwrap();
        let original_payload = slice.payload.clone();

        slice.set_records(records(&["x", "y", "z"]), &codec).unwrap();
        assert_ne!(slice.payload, original_payload);
        assert_eq!(slice.record_count, 3);
        assert_eq!(slice.records(&codec).unwrap().len(), 3);
    }

    #[test]
    fn lifecycle_transitions() {
        let codec = Codec::plain();
        let mut slice = Slice::build(1, 1, records(&["a"]), &codec).unwrap();

        slice.start("host:1:0").unwrap();
        assert_eq!(slice.state, SliceState::Running);
        assert!(slice.started_at.is_some());
        assert_eq!(slice.worker_name.as_deref(), Some("host:1:0"));

        slice
            .fail_with(JobException::new("Parse", "bad row").with_record_number(1))
            .unwrap();
        assert_eq!(slice.state, SliceState::Failed);
        assert_eq!(slice.failure_count, 1);
        assert!(slice.worker_name.is_none());

        slice.fire(SliceEvent::Retry).unwrap();
        assert_eq!(slice.state, SliceState::Queued);
        assert!(slice.exception.is_none());
        assert!(slice.started_at.is_none());
    }

    #[test]
    fn complete_from_queued_is_invalid() {
        let codec = Codec::plain();
        let mut slice = Slice::build(1, 1, records(&["a"]), &codec).unwrap();
        assert!(slice.complete().is_err());
        assert_eq!(slice.state, SliceState::Queued);
    }

    #[test]
    fn payload_survives_serde_round_trip() {
        let codec = Codec::plain();
        let slice = Slice::build(7, 42, records(&["hello", "world"]), &codec).unwrap();

        let json = serde_json::to_string(&slice).unwrap();
        let mut reloaded: Slice = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded.id, 7);
        assert_eq!(reloaded.first_record_number, 42);
        assert_eq!(reloaded.payload, slice.payload);
        assert_eq!(
            reloaded.records(&codec).unwrap(),
            &records(&["hello", "world"])[..]
        );
    }
}
