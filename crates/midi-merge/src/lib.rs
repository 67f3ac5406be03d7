//! MIDI Stream Merger
//!
//! This crate merges several MIDI byte streams into one destination while
//! keeping every message intact and squeezing out redundant status bytes.
//!
//! # Architecture
//!
//! - A [`StreamWorker`] per source frames its bytes into messages
//! - All workers share one [`SharedOutput`], which tracks the status byte last
//!   written and elides it when the next message needs the same one, whichever
//!   stream that message comes from
//! - The [`Supervisor`] spawns the workers, joins them as they finish and stops
//!   the whole merge if the destination fails
//!
//! Message atomicity comes from two locks. The normal lock is held for a whole
//! message or exclusive block. The real-time lock guards the sink and is the
//! only lock real-time bytes need, so clock ticks are never stuck behind
//! another stream's note data, yet they cannot land inside an exclusive block
//! because the block holds both.
//!
//! # Example
//!
//! ```rust
//! use midi_merge::Supervisor;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), midi_merge::MergeError> {
//! let keys: &'static [u8] = &[0x90, 0x40, 0x7F, 0x40, 0x50];
//! let idle: &'static [u8] = &[];
//!
//! let supervisor = Supervisor::new(vec![("keys", keys), ("idle", idle)], Vec::new())?;
//! let summary = supervisor.run().await;
//!
//! assert!(summary.is_success());
//! assert_eq!(summary.sink, Some(vec![0x90, 0x40, 0x7F, 0x40, 0x50]));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod output;
pub mod state;
pub mod supervisor;
pub mod worker;

pub use config::{MergeConfig, MAX_STREAMS};
pub use error::{MergeError, Violation};
pub use output::{NormalGuard, SharedOutput, SysexGuard};
pub use state::{StreamEnd, StreamId, StreamReport, StreamStats};
pub use supervisor::{MergeSummary, Supervisor};
pub use worker::StreamWorker;
