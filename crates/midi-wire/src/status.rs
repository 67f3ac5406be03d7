//! Status byte classification
//!
//! Every byte on a MIDI wire is either a status byte (bit 7 set) or a data
//! byte (bit 7 clear). Status bytes fall into five categories:
//!
//! ```text
//! 0x80-0xEF  channel message     high nibble = type, low nibble = channel
//! 0xF0       exclusive start     opens a block of any length
//! 0xF1-0xF6  system common       fixed data length from the low nibble
//! 0xF7       exclusive end       closes the block
//! 0xF8-0xFF  system real-time    single byte, may appear anywhere
//! ```

use std::fmt;

use crate::error::WireError;

/// Start of an exclusive (sysex) block
pub const SYSEX_START: u8 = 0xF0;
/// End of an exclusive (sysex) block
pub const SYSEX_END: u8 = 0xF7;
/// Real-time timing clock, 24 per quarter note
pub const TIMING_CLOCK: u8 = 0xF8;

const STATUS_BIT: u8 = 0x80;
const REALTIME_MASK: u8 = 0xF8;

/// Trailing data bytes per message type nibble
///
/// Entries 0x0-0x7 are indexed by the low nibble of a system common status
/// (0xFn), entries 0x8-0xE by the high nibble of a channel status.
const DATA_LEN: [u8; 16] = [
    0, // 0xF0 SOX
    1, // 0xF1 MTC quarter frame, 0nnndddd
    2, // 0xF2 song position, lo, hi
    1, // 0xF3 song select
    0, // 0xF4 undefined
    0, // 0xF5 undefined
    0, // 0xF6 tune request
    0, // 0xF7 EOX
    2, // 0x8n note off, key, velocity
    2, // 0x9n note on, key, velocity
    2, // 0xAn poly aftertouch, key, pressure
    2, // 0xBn control change, controller, value
    1, // 0xCn program change
    1, // 0xDn channel aftertouch
    2, // 0xEn pitch bend, lo, hi
    0, // 0xFn system, handled separately
];

/// Broad category of a status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Voice/mode message addressed to one of 16 channels (0x80-0xEF)
    Channel,
    /// System common message (0xF1-0xF6)
    SystemCommon,
    /// Exclusive block opener (0xF0)
    SysexStart,
    /// Exclusive block terminator (0xF7)
    SysexEnd,
    /// System real-time message (0xF8-0xFF)
    RealTime,
}

/// A validated status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(u8);

impl Status {
    /// Exclusive block terminator (0xF7)
    pub const END_OF_EXCLUSIVE: Status = Status(SYSEX_END);

    /// Get the raw byte
    pub fn as_u8(self) -> u8 {
        self.0
    }

    /// Category this status belongs to
    pub fn category(self) -> Category {
        match self.0 {
            0x80..=0xEF => Category::Channel,
            SYSEX_START => Category::SysexStart,
            SYSEX_END => Category::SysexEnd,
            b if is_realtime(b) => Category::RealTime,
            _ => Category::SystemCommon,
        }
    }

    /// Number of data bytes that follow this status in a complete message
    ///
    /// Exclusive blocks report 0: their length is only known once the
    /// terminator arrives.
    pub fn data_len(self) -> usize {
        let idx = match self.category() {
            Category::Channel => self.0 >> 4,
            Category::RealTime => return 0,
            _ => self.0 & 0x0F,
        };
        DATA_LEN[idx as usize] as usize
    }

    /// Whether this is a channel message status (the only kind running status applies to)
    pub fn is_channel(self) -> bool {
        self.category() == Category::Channel
    }

    /// Zero-based channel number for channel messages
    pub fn channel(self) -> Option<u8> {
        self.is_channel().then_some(self.0 & 0x0F)
    }

    /// Returns a human-readable name for the message type
    pub fn name(self) -> &'static str {
        match self.0 {
            0x80..=0x8F => "note off",
            0x90..=0x9F => "note on",
            0xA0..=0xAF => "poly aftertouch",
            0xB0..=0xBF => "control change",
            0xC0..=0xCF => "program change",
            0xD0..=0xDF => "channel aftertouch",
            0xE0..=0xEF => "pitch bend",
            0xF0 => "sysex start",
            0xF1 => "MTC quarter frame",
            0xF2 => "song position",
            0xF3 => "song select",
            0xF6 => "tune request",
            0xF7 => "sysex end",
            0xF8 => "timing clock",
            0xFA => "start",
            0xFB => "continue",
            0xFC => "stop",
            0xFE => "active sensing",
            0xFF => "system reset",
            _ => "undefined",
        }
    }
}

impl TryFrom<u8> for Status {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if is_status(value) {
            Ok(Self(value))
        } else {
            Err(WireError::NotStatus(value))
        }
    }
}

impl From<Status> for u8 {
    fn from(status: Status) -> Self {
        status.0
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.channel() {
            Some(ch) => write!(f, "{} ch{} (0x{:02X})", self.name(), ch + 1, self.0),
            None => write!(f, "{} (0x{:02X})", self.name(), self.0),
        }
    }
}

/// What a single byte read from a stream means to the framer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteKind {
    /// Data byte, only meaningful after a status
    Data(u8),
    /// Channel or system common status that opens a fixed-length message
    Status(Status),
    /// Single-byte real-time message
    RealTime(u8),
    /// 0xF0
    SysexStart,
    /// 0xF7
    SysexEnd,
}

/// Check whether a byte has bit 7 set
pub fn is_status(byte: u8) -> bool {
    byte & STATUS_BIT != 0
}

/// Check whether a byte is a system real-time message (0xF8-0xFF)
pub fn is_realtime(byte: u8) -> bool {
    byte & REALTIME_MASK == REALTIME_MASK
}

/// Data length for a raw status byte, or `None` for data bytes
pub fn data_len(byte: u8) -> Option<usize> {
    Status::try_from(byte).ok().map(Status::data_len)
}

/// Classify one byte from an input stream
pub fn classify(byte: u8) -> ByteKind {
    if !is_status(byte) {
        return ByteKind::Data(byte);
    }
    match byte {
        SYSEX_START => ByteKind::SysexStart,
        SYSEX_END => ByteKind::SysexEnd,
        b if is_realtime(b) => ByteKind::RealTime(b),
        b => ByteKind::Status(Status(b)),
    }
}
