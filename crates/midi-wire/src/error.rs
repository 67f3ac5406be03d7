//! Error types for MIDI byte classification

use thiserror::Error;

/// Errors that can occur while interpreting wire bytes
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Byte has bit 7 clear and therefore cannot be a status byte
    #[error("0x{0:02X} is a data byte, not a status byte")]
    NotStatus(u8),
}
