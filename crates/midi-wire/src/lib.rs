//! MIDI Wire Classification Library
//!
//! This crate classifies the bytes of a raw MIDI 1.0 byte stream:
//!
//! - **Channel messages**: status 0x80-0xEF followed by one or two data bytes
//! - **System common**: status 0xF1-0xF6 with a fixed data length
//! - **Exclusive blocks**: 0xF0 ... 0xF7, any length
//! - **System real-time**: single bytes 0xF8-0xFF that may appear anywhere
//!
//! It holds no state; framing a stream (running status, exclusive blocks)
//! is left to the caller.
//!
//! # Example
//!
//! ```rust
//! use midi_wire::{classify, ByteKind, Category};
//!
//! match classify(0x93) {
//!     ByteKind::Status(status) => {
//!         assert_eq!(status.category(), Category::Channel);
//!         assert_eq!(status.data_len(), 2);
//!         assert_eq!(status.channel(), Some(3));
//!     }
//!     other => panic!("unexpected {other:?}"),
//! }
//! assert_eq!(classify(0xF8), ByteKind::RealTime(0xF8));
//! ```

pub mod error;
pub mod status;

pub use error::WireError;
pub use status::{
    classify, data_len, is_realtime, is_status, ByteKind, Category, Status, SYSEX_END,
    SYSEX_START, TIMING_CLOCK,
};
