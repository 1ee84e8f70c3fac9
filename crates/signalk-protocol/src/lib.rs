//! # signalk-protocol
//!
//! NMEA 0183 output protocol for Signal K data.
//!
//! This crate provides:
//! - Sentence framing and checksum verification (`sentence`)
//! - The built-in Signal K to NMEA 0183 encoders (`encoders`)
//! - The combine-latest / debounce state machine that decides when an
//!   encoder emits (`combiner`)
//!
//! Like `signalk-core` it contains no async code.

pub mod combiner;
pub mod encoders;
pub mod sentence;

pub use combiner::{SentenceCombiner, DEBOUNCE_WINDOW};
pub use encoders::{builtin_encoders, EncoderDefinition, APB, MWV, RMC};
pub use sentence::{checksum, decode_sentence, encode_sentence, DecodedSentence, SentenceError};
