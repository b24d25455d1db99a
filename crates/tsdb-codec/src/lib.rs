//! # tsdb-codec
//!
//! The block-level codecs from spec §4.1: timestamp delta-of-delta, value
//! XOR/Gorilla, a per-block label dictionary, general-purpose RLE, and an
//! adaptive selector that picks a value sub-codec from the observed sample
//! shape. Every codec is deterministic, round-trips bitwise, and allocates
//! output proportional to input.

pub mod adaptive;
pub mod bits;
pub mod dictionary;
pub mod rle;
pub mod timestamp;
pub mod value;
pub mod varint;

pub use adaptive::{AdaptiveClass, AdaptiveCodec, AdaptiveConfig};
pub use dictionary::LabelDictionary;
pub use rle::RleCodec;
pub use timestamp::{TimestampCodec, TimestampCodecConfig, TimestampStatsSnapshot};
pub use value::ValueCodec;

pub use tsdb_core::error::DecodeError;
