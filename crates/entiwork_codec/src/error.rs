//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while encoding or decoding state records.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode a record.
    #[error("encoding failed ({codec}): {message}")]
    EncodingFailed {
        /// Name of the codec that failed.
        codec: &'static str,
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode bytes into a record.
    #[error("decoding failed ({codec}): {message}")]
    DecodingFailed {
        /// Name of the codec that failed.
        codec: &'static str,
        /// Description of the decoding error.
        message: String,
    },

    /// The decoded record is structurally invalid.
    #[error("invalid record structure: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(codec: &'static str, message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            codec,
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(codec: &'static str, message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            codec,
            message: message.into(),
        }
    }

    /// Create an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }
}
