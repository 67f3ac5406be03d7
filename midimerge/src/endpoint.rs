//! Source and destination endpoints
//!
//! An endpoint names where bytes come from or go to:
//!
//! ```text
//! -                       stdin (source) or stdout (destination)
//! serial:/dev/ttyUSB0     serial port at 31250 baud
//! serial:COM3@115200      serial port at an explicit baud rate
//! /dev/snd/midiC1D0       anything else is a file or device path
//! ```

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::debug;

/// MIDI DIN baud rate
pub const DEFAULT_SERIAL_BAUD: u32 = 31_250;

const SERIAL_PREFIX: &str = "serial:";

/// Boxed readable endpoint
pub type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
/// Boxed writable endpoint
pub type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Errors parsing an endpoint argument
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EndpointError {
    /// Empty argument
    #[error("empty endpoint")]
    Empty,

    /// `serial:` with nothing after it
    #[error("missing serial port name in {0:?}")]
    MissingPort(String),

    /// Baud rate that is not a positive integer
    #[error("invalid baud rate {0:?}")]
    InvalidBaud(String),
}

/// Where a stream is read from or written to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// stdin or stdout
    Stdio,
    /// File, FIFO or character device
    Path(PathBuf),
    /// Serial port
    Serial {
        /// Port name (e.g., /dev/ttyUSB0, COM3)
        port: String,
        /// Baud rate
        baud: u32,
    },
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(EndpointError::Empty);
        }
        if s == "-" {
            return Ok(Self::Stdio);
        }
        let Some(rest) = s.strip_prefix(SERIAL_PREFIX) else {
            return Ok(Self::Path(PathBuf::from(s)));
        };

        let (port, baud) = match rest.rsplit_once('@') {
            Some((port, baud)) => {
                let baud = baud
                    .parse::<u32>()
                    .ok()
                    .filter(|b| *b > 0)
                    .ok_or_else(|| EndpointError::InvalidBaud(baud.to_string()))?;
                (port, baud)
            }
            None => (rest, DEFAULT_SERIAL_BAUD),
        };
        if port.is_empty() {
            return Err(EndpointError::MissingPort(s.to_string()));
        }

        Ok(Self::Serial {
            port: port.to_string(),
            baud,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => write!(f, "-"),
            Self::Path(path) => write!(f, "{}", path.display()),
            Self::Serial { port, baud } => write!(f, "{}{}@{}", SERIAL_PREFIX, port, baud),
        }
    }
}

impl Endpoint {
    /// Open for reading
    pub async fn open_source(&self) -> io::Result<BoxedReader> {
        debug!("Opening source {}", self);
        Ok(match self {
            Self::Stdio => Box::new(tokio::io::stdin()),
            Self::Path(path) => Box::new(File::open(path).await?),
            Self::Serial { port, baud } => Box::new(open_serial(port, *baud)?),
        })
    }

    /// Open for writing
    pub async fn open_destination(&self) -> io::Result<BoxedWriter> {
        debug!("Opening destination {}", self);
        Ok(match self {
            Self::Stdio => Box::new(tokio::io::stdout()),
            Self::Path(path) => Box::new(
                OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)
                    .await?,
            ),
            Self::Serial { port, baud } => Box::new(open_serial(port, *baud)?),
        })
    }
}

fn open_serial(port: &str, baud: u32) -> io::Result<SerialStream> {
    tokio_serial::new(port, baud)
        .open_native_async()
        .map_err(io::Error::from)
}
