//! Merge configuration

use serde::{Deserialize, Serialize};

use crate::error::MergeError;

/// Default stream limit, counting the destination
pub const MAX_STREAMS: usize = 8;

/// Merge configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeConfig {
    /// Maximum number of streams, destination included
    pub max_streams: usize,
    /// Terminate an exclusive block with 0xF7 when its source stops mid-block
    pub close_dangling_sysex: bool,
    /// Flush the destination after every message
    pub flush_each_message: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            max_streams: MAX_STREAMS,
            close_dangling_sysex: true,
            flush_each_message: true,
        }
    }
}

impl MergeConfig {
    /// Largest number of sources accepted alongside the one destination
    pub fn max_sources(&self) -> usize {
        self.max_streams.saturating_sub(1)
    }

    /// Check a source count against the limit
    pub fn validate_sources(&self, count: usize) -> Result<(), MergeError> {
        if count == 0 {
            return Err(MergeError::NoStreams);
        }
        if count > self.max_sources() {
            return Err(MergeError::TooManyStreams {
                given: count,
                max: self.max_sources(),
            });
        }
        Ok(())
    }
}
