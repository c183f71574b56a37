//! # ArborDB Codec
//!
//! Values, ordering and binary encodings shared by the ArborDB index engine.
//!
//! This crate provides:
//! - [`Value`]: a node value of the hierarchical database
//! - [`IndexValue`]: a primitive, totally ordered tree key
//! - [`Metadata`]: per-entry metadata records
//! - [`RecordPointer`]: the locator stored with every tree entry value
//! - [`InfoBlock`]: typed name/value blocks used in index file headers
//! - [`Encoder`] / [`Decoder`]: bounds-checked big-endian primitives
//!
//! ## Usage
//!
//! ```
//! use arbordb_codec::{IndexValue, RecordKey, RecordPointer};
//!
//! assert!(IndexValue::Number(10.0) < IndexValue::from("10"));
//!
//! let pointer = RecordPointer::new(vec!["ewout".into()], RecordKey::from("post1"));
//! let bytes = pointer.encode().unwrap();
//! assert_eq!(RecordPointer::decode(&bytes).unwrap(), pointer);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod info;
mod key;
mod metadata;
mod pointer;
mod value;

pub use decoder::Decoder;
pub use encoder::{truncate_utf8, Encoder};
pub use error::{CodecError, CodecResult};
pub use info::{InfoBlock, InfoValue};
pub use key::{IndexValue, MAX_STRING_LENGTH};
pub use metadata::{decode_metadata, encode_metadata, Metadata};
pub use pointer::{RecordKey, RecordPointer};
pub use value::Value;
