//! Error types for the merger

use midi_wire::Status;
use thiserror::Error;

use crate::state::StreamId;

/// Ways an input stream can break MIDI framing
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// A status byte arrived before the previous message was complete
    #[error("0x{found:02X} arrived while {status} still expected {missing} data byte(s)")]
    InterruptedMessage {
        /// Status of the incomplete message
        status: Status,
        /// The offending byte
        found: u8,
        /// Data bytes still outstanding
        missing: usize,
    },

    /// A status byte other than 0xF7 or real-time inside an exclusive block
    #[error("0x{0:02X} interrupted an exclusive block")]
    InterruptedSysex(u8),

    /// Data byte with no status to continue
    #[error("data byte 0x{0:02X} without a running status")]
    NoRunningStatus(u8),

    /// Input ended mid-message
    #[error("input ended while {status} still expected {missing} data byte(s)")]
    Truncated {
        /// Status of the incomplete message
        status: Status,
        /// Data bytes still outstanding
        missing: usize,
    },

    /// Input ended before 0xF7
    #[error("input ended inside an exclusive block")]
    TruncatedSysex,
}

/// Errors that can occur while merging
#[derive(Debug, Error)]
pub enum MergeError {
    /// Reading from an input stream failed
    #[error("read failed on stream {stream}: {source}")]
    Read {
        /// Stream that failed
        stream: StreamId,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Writing to the shared destination failed
    #[error("write to destination failed: {0}")]
    Sink(#[source] std::io::Error),

    /// The destination already failed for another stream
    #[error("destination is no longer writable")]
    SinkClosed,

    /// Input stream broke MIDI framing
    #[error("malformed message on stream {stream}: {violation}")]
    Malformed {
        /// Stream that sent the bytes
        stream: StreamId,
        /// What was wrong
        violation: Violation,
    },

    /// More sources than the configured maximum
    #[error("too many input streams: {given} given, at most {max} allowed")]
    TooManyStreams {
        /// Number of sources supplied
        given: usize,
        /// Largest number of sources accepted
        max: usize,
    },

    /// No sources at all
    #[error("no input streams given")]
    NoStreams,

    /// Cancellation was requested while the stream was being read
    #[error("merge cancelled")]
    Cancelled,

    /// Worker task panicked or was aborted before reporting
    #[error("stream {stream} worker aborted: {reason}")]
    WorkerAborted {
        /// Stream the task was serving
        stream: StreamId,
        /// Join error description
        reason: String,
    },
}

impl MergeError {
    /// Whether this error means the shared destination is unusable
    pub fn is_sink_failure(&self) -> bool {
        matches!(self, Self::Sink(_) | Self::SinkClosed)
    }

    /// The protocol violation, if this is a malformed-message error
    pub fn violation(&self) -> Option<Violation> {
        match self {
            Self::Malformed { violation, .. } => Some(*violation),
            _ => None,
        }
    }
}
