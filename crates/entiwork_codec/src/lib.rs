//! # EntiWork Codec
//!
//! State record model and codecs for EntiWork entity stores.
//!
//! This crate provides:
//! - [`Value`], the dynamic property value model
//! - [`StateRecord`], the persisted shape of one entity
//! - [`RecordCodec`] with [`JsonCodec`] and [`CborCodec`] implementations
//!
//! ## Usage
//!
//! ```
//! use entiwork_codec::{JsonCodec, RecordCodec, StateRecord, Value};
//!
//! let mut record = StateRecord::new("user:42", "User", "1.0");
//! record.properties.insert("name".into(), Value::from("Ann"));
//!
//! let bytes = JsonCodec.encode(&record).unwrap();
//! let decoded = JsonCodec.decode(&bytes).unwrap();
//! assert_eq!(record, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod record;
mod value;

pub use codec::{CborCodec, JsonCodec, RecordCodec};
pub use error::{CodecError, CodecResult};
pub use record::{StateRecord, UNVERSIONED};
pub use value::{Value, ValueKind};
