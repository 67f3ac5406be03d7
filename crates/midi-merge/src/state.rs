//! Per-stream identity, counters and results

use std::fmt;

use crate::error::MergeError;

/// Unique identifier for an input stream within one merge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u32);

impl StreamId {
    /// Get the raw id value
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a stream that did not fail came to an end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The input reached end of file between messages
    Exhausted,
    /// The merge was cancelled while the stream was still live
    Cancelled,
}

/// Counters kept by a stream worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Channel and system common messages forwarded
    pub messages: u64,
    /// Messages whose status byte was left out thanks to running status
    pub elided_status: u64,
    /// Real-time bytes forwarded
    pub realtime: u64,
    /// Complete exclusive blocks forwarded
    pub sysex_blocks: u64,
}

/// Final result of one stream worker
#[derive(Debug)]
pub struct StreamReport {
    /// Stream identity
    pub id: StreamId,
    /// Display name (usually the path it was opened from)
    pub name: String,
    /// Counters at the time the worker stopped
    pub stats: StreamStats,
    /// Clean end or the error that stopped the worker
    pub outcome: Result<StreamEnd, MergeError>,
}

impl StreamReport {
    /// Whether the stream ended without error
    pub fn is_clean(&self) -> bool {
        self.outcome.is_ok()
    }

    /// The error that stopped the stream, if any
    pub fn error(&self) -> Option<&MergeError> {
        self.outcome.as_ref().err()
    }
}
