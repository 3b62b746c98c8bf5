//! Record codecs.

use crate::error::{CodecError, CodecResult};
use crate::record::StateRecord;
use std::fmt;

/// Turns state records into bytes and back.
///
/// # Invariants
///
/// - `decode(encode(r)) == r` for every record
/// - `encode(decode(b)) == b` for every `b` produced by `encode`
/// - `Value::Null` properties and empty collections are preserved
pub trait RecordCodec: Send + Sync + fmt::Debug {
    /// Short codec name, used in errors and logs.
    fn name(&self) -> &'static str;

    /// Encodes a record.
    ///
    /// # Errors
    ///
    /// Returns `EncodingFailed` if the record cannot be serialized.
    fn encode(&self, record: &StateRecord) -> CodecResult<Vec<u8>>;

    /// Decodes a record.
    ///
    /// # Errors
    ///
    /// Returns `DecodingFailed` for malformed input and `InvalidStructure`
    /// when required fields are empty.
    fn decode(&self, bytes: &[u8]) -> CodecResult<StateRecord>;
}

/// JSON codec backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl RecordCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, record: &StateRecord) -> CodecResult<Vec<u8>> {
        serde_json::to_vec(record)
            .map_err(|e| CodecError::encoding_failed(self.name(), e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<StateRecord> {
        let record: StateRecord = serde_json::from_slice(bytes)
            .map_err(|e| CodecError::decoding_failed(self.name(), e.to_string()))?;
        record.validate()?;
        Ok(record)
    }
}

/// CBOR codec backed by `ciborium`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborCodec;

impl RecordCodec for CborCodec {
    fn name(&self) -> &'static str {
        "cbor"
    }

    fn encode(&self, record: &StateRecord) -> CodecResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(record, &mut buf)
            .map_err(|e| CodecError::encoding_failed(self.name(), e.to_string()))?;
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8]) -> CodecResult<StateRecord> {
        let record: StateRecord = ciborium::de::from_reader(bytes)
            .map_err(|e| CodecError::decoding_failed(self.name(), e.to_string()))?;
        record.validate()?;
        Ok(record)
    }
}
