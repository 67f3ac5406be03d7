//! Per-input stream worker
//!
//! A [`StreamWorker`] owns one input, reads it a byte at a time and frames the
//! bytes into messages:
//!
//! - real-time bytes go straight out under the real-time lock
//! - a status byte (or a data byte continuing running status) takes the
//!   normal lock, collects the message's data bytes and emits the message
//! - 0xF0 takes both locks and streams the block through until 0xF7
//!
//! The worker stops at the first end of input, read error, destination error
//! or framing violation and reports why in a [`StreamReport`].

use std::sync::Arc;

use midi_wire::{classify, ByteKind, Status, SYSEX_START};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{MergeError, Violation};
use crate::output::{SharedOutput, SysexGuard};
use crate::state::{StreamEnd, StreamId, StreamReport, StreamStats};

/// Framing state machine for one input stream
pub struct StreamWorker<R, W> {
    id: StreamId,
    name: String,
    input: BufReader<R>,
    output: Arc<SharedOutput<W>>,
    cancel: CancellationToken,
    close_dangling_sysex: bool,
    /// Last status this stream sent, for running-status continuations
    running_status: Option<Status>,
    stats: StreamStats,
}

impl<R, W> StreamWorker<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Create a worker reading `input` into `output`
    pub fn new(
        id: StreamId,
        name: impl Into<String>,
        input: R,
        output: Arc<SharedOutput<W>>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            input: BufReader::new(input),
            output,
            cancel: CancellationToken::new(),
            close_dangling_sysex: true,
            running_status: None,
            stats: StreamStats::default(),
        }
    }

    /// Stop reading when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Whether to write 0xF7 when this stream stops inside an exclusive block
    pub fn with_close_dangling_sysex(mut self, enabled: bool) -> Self {
        self.close_dangling_sysex = enabled;
        self
    }

    /// Stream identity
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run until the input ends, fails, breaks framing or is cancelled
    pub async fn run(mut self) -> StreamReport {
        info!("Stream {} ({}) starting", self.id, self.name);

        let outcome = match self.pump().await {
            Err(MergeError::Cancelled) => Ok(StreamEnd::Cancelled),
            other => other,
        };

        match &outcome {
            Ok(end) => info!("Stream {} ({}) ended: {:?}", self.id, self.name, end),
            Err(e) => warn!("Stream {} ({}) stopped: {}", self.id, self.name, e),
        }

        StreamReport {
            id: self.id,
            name: self.name,
            stats: self.stats,
            outcome,
        }
    }

    async fn pump(&mut self) -> Result<StreamEnd, MergeError> {
        loop {
            let Some(byte) = self.next_byte().await? else {
                return Ok(StreamEnd::Exhausted);
            };

            match classify(byte) {
                ByteKind::RealTime(b) => {
                    self.output.write_realtime(b).await?;
                    self.stats.realtime += 1;
                }
                ByteKind::SysexStart => self.forward_sysex().await?,
                ByteKind::SysexEnd => {
                    self.forward_message(Status::END_OF_EXCLUSIVE, None)
                        .await?
                }
                ByteKind::Status(status) => self.forward_message(status, None).await?,
                ByteKind::Data(d) => {
                    // A status with no data bytes has nothing to continue
                    let status = self
                        .running_status
                        .filter(|s| s.data_len() > 0)
                        .ok_or_else(|| self.malformed(Violation::NoRunningStatus(d)))?;
                    self.forward_message(status, Some(d)).await?
                }
            }
        }
    }

    /// Read one byte; `None` at end of input
    async fn next_byte(&mut self) -> Result<Option<u8>, MergeError> {
        let read = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(MergeError::Cancelled),
            read = self.input.read_u8() => read,
        };

        match read {
            Ok(byte) => Ok(Some(byte)),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(MergeError::Read {
                stream: self.id,
                source: e,
            }),
        }
    }

    /// Collect and emit one channel or system common message
    ///
    /// `first` is a data byte already read when the source relied on running
    /// status; otherwise the source sent `status` explicitly.
    async fn forward_message(
        &mut self,
        status: Status,
        first: Option<u8>,
    ) -> Result<(), MergeError> {
        let output = Arc::clone(&self.output);
        let mut normal = output.lock_normal().await;

        let count = status.data_len();
        let mut data = Vec::with_capacity(count);
        data.extend(first);

        while data.len() < count {
            let missing = count - data.len();
            let Some(byte) = self.next_byte().await? else {
                return Err(self.malformed(Violation::Truncated { status, missing }));
            };
            match classify(byte) {
                ByteKind::Data(b) => data.push(b),
                // Forwarded now, not counted towards the message
                ByteKind::RealTime(b) => {
                    normal.write_realtime(b).await?;
                    self.stats.realtime += 1;
                }
                _ => {
                    return Err(self.malformed(Violation::InterruptedMessage {
                        status,
                        found: byte,
                        missing,
                    }))
                }
            }
        }

        let wrote_status = normal.emit(status, &data).await?;
        debug!(
            "Stream {} forwarded {} {:02X?} (status {})",
            self.id,
            status,
            data,
            if wrote_status { "written" } else { "elided" }
        );

        self.stats.messages += 1;
        if !wrote_status {
            self.stats.elided_status += 1;
        }
        self.running_status = Some(status);
        Ok(())
    }

    /// Stream an exclusive block through with both locks held
    async fn forward_sysex(&mut self) -> Result<(), MergeError> {
        let output = Arc::clone(&self.output);
        let mut block = output.begin_sysex().await;
        block.forward(SYSEX_START).await?;

        loop {
            let byte = match self.next_byte().await {
                Ok(Some(byte)) => byte,
                Ok(None) => {
                    let cause = self.malformed(Violation::TruncatedSysex);
                    return Err(self.abandon_sysex(block, cause).await);
                }
                Err(e) => return Err(self.abandon_sysex(block, e).await),
            };

            match classify(byte) {
                ByteKind::SysexEnd => {
                    block.forward(byte).await?;
                    break;
                }
                ByteKind::Data(_) | ByteKind::RealTime(_) => block.forward(byte).await?,
                ByteKind::Status(_) | ByteKind::SysexStart => {
                    let cause = self.malformed(Violation::InterruptedSysex(byte));
                    return Err(self.abandon_sysex(block, cause).await);
                }
            }
        }

        debug!("Stream {} forwarded exclusive block of {} bytes", self.id, block.len());
        block.finish().await?;
        self.stats.sysex_blocks += 1;
        Ok(())
    }

    /// Close a block cut short by `cause`, which stays the reported error
    async fn abandon_sysex(&mut self, block: SysexGuard<'_, W>, cause: MergeError) -> MergeError {
        if let Err(e) = block.abort(self.close_dangling_sysex).await {
            warn!(
                "Stream {} could not close exclusive block after {}: {}",
                self.id, cause, e
            );
        }
        cause
    }

    fn malformed(&self, violation: Violation) -> MergeError {
        MergeError::Malformed {
            stream: self.id,
            violation,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use super::*;

    /// Accepts `room` bytes, then fails every write
    struct ShortSink {
        room: usize,
    }

    impl AsyncWrite for ShortSink {
        fn poll_write(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            if buf.len() > self.room {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "full")));
            }
            self.room -= buf.len();
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    async fn run_single(input: &'static [u8]) -> (StreamReport, Vec<u8>) {
        let output = Arc::new(SharedOutput::new(Vec::new()));
        let worker = StreamWorker::new(StreamId(0), "test", input, Arc::clone(&output));
        let report = worker.run().await;
        let output = Arc::into_inner(output).expect("worker released the output");
        (report, output.close().await)
    }

    #[tokio::test]
    async fn test_running_status_from_source() {
        let (report, out) = run_single(&[0x90, 0x40, 0x7F, 0x40, 0x50]).await;
        assert!(matches!(report.outcome, Ok(StreamEnd::Exhausted)));
        assert_eq!(out, vec![0x90, 0x40, 0x7F, 0x40, 0x50]);
        assert_eq!(report.stats.messages, 2);
        assert_eq!(report.stats.elided_status, 1);
    }

    #[tokio::test]
    async fn test_explicit_repeat_status_is_compressed() {
        let (report, out) = run_single(&[0x90, 0x40, 0x7F, 0x90, 0x40, 0x00]).await;
        assert!(report.is_clean());
        assert_eq!(out, vec![0x90, 0x40, 0x7F, 0x40, 0x00]);
    }

    #[tokio::test]
    async fn test_one_byte_messages() {
        let (report, out) = run_single(&[0xC0, 0x05, 0x06, 0xD1, 0x30]).await;
        assert!(report.is_clean());
        assert_eq!(out, vec![0xC0, 0x05, 0x06, 0xD1, 0x30]);
        assert_eq!(report.stats.messages, 3);
    }

    #[tokio::test]
    async fn test_realtime_inside_message_goes_first() {
        let (report, out) = run_single(&[0x90, 0x40, 0xF8, 0x7F]).await;
        assert!(report.is_clean());
        assert_eq!(out, vec![0xF8, 0x90, 0x40, 0x7F]);
        assert_eq!(report.stats.realtime, 1);
    }

    #[tokio::test]
    async fn test_continuation_after_system_common_repeats_it() {
        let (report, out) = run_single(&[0xF2, 0x10, 0x20, 0x30, 0x40]).await;
        assert!(report.is_clean());
        assert_eq!(out, vec![0xF2, 0x10, 0x20, 0xF2, 0x30, 0x40]);
        assert_eq!(report.stats.messages, 2);
        assert_eq!(report.stats.elided_status, 0);
    }

    #[tokio::test]
    async fn test_system_common_replaces_channel_running_status() {
        let (report, out) =
            run_single(&[0x90, 0x40, 0x7F, 0xF2, 0x10, 0x20, 0x30, 0x40, 0xF6, 0xF6]).await;
        assert!(report.is_clean());
        assert_eq!(
            out,
            vec![0x90, 0x40, 0x7F, 0xF2, 0x10, 0x20, 0xF2, 0x30, 0x40, 0xF6, 0xF6]
        );
    }

    #[tokio::test]
    async fn test_data_after_tune_request_is_malformed() {
        let (report, out) = run_single(&[0x90, 0x40, 0x7F, 0xF6, 0x41, 0x7F]).await;
        assert_eq!(
            report.error().and_then(MergeError::violation),
            Some(Violation::NoRunningStatus(0x41))
        );
        assert_eq!(out, vec![0x90, 0x40, 0x7F, 0xF6]);
    }

    #[tokio::test]
    async fn test_sysex_passes_through_and_resets_status() {
        let (report, out) = run_single(&[
            0x90, 0x40, 0x7F, 0xF0, 0x43, 0x10, 0xF8, 0xF7, 0x41, 0x7F,
        ])
        .await;
        assert!(report.is_clean());
        assert_eq!(
            out,
            vec![0x90, 0x40, 0x7F, 0xF0, 0x43, 0x10, 0xF8, 0xF7, 0x90, 0x41, 0x7F]
        );
        assert_eq!(report.stats.sysex_blocks, 1);
    }

    #[tokio::test]
    async fn test_stray_eox_forwarded_bare() {
        let (report, out) = run_single(&[0xF7, 0xF5]).await;
        assert!(report.is_clean());
        assert_eq!(out, vec![0xF7, 0xF5]);
    }

    #[tokio::test]
    async fn test_data_without_status_is_malformed() {
        let (report, out) = run_single(&[0x40, 0x7F]).await;
        assert_eq!(
            report.error().and_then(MergeError::violation),
            Some(Violation::NoRunningStatus(0x40))
        );
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_truncated_message_is_malformed() {
        let (report, out) = run_single(&[0x90, 0x40, 0x7F, 0x90]).await;
        let status = Status::try_from(0x90).unwrap();
        assert_eq!(
            report.error().and_then(MergeError::violation),
            Some(Violation::Truncated { status, missing: 2 })
        );
        assert_eq!(out, vec![0x90, 0x40, 0x7F]);
    }

    #[tokio::test]
    async fn test_status_inside_message_is_malformed() {
        let (report, out) = run_single(&[0x90, 0x40, 0x80, 0x40, 0x00]).await;
        let status = Status::try_from(0x90).unwrap();
        assert_eq!(
            report.error().and_then(MergeError::violation),
            Some(Violation::InterruptedMessage {
                status,
                found: 0x80,
                missing: 1
            })
        );
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_status_inside_sysex_closes_block() {
        let (report, out) = run_single(&[0xF0, 0x01, 0x90, 0x40]).await;
        assert_eq!(
            report.error().and_then(MergeError::violation),
            Some(Violation::InterruptedSysex(0x90))
        );
        assert_eq!(out, vec![0xF0, 0x01, 0xF7]);
    }

    #[tokio::test]
    async fn test_nested_sysex_start_closes_block() {
        let (report, out) = run_single(&[0xF0, 0x01, 0xF0, 0x02, 0xF7]).await;
        assert_eq!(
            report.error().and_then(MergeError::violation),
            Some(Violation::InterruptedSysex(0xF0))
        );
        assert_eq!(out, vec![0xF0, 0x01, 0xF7]);
    }

    #[tokio::test]
    async fn test_sysex_bytes_inside_message_are_malformed() {
        let (report, out) = run_single(&[0x90, 0x40, 0xF0, 0x01, 0xF7]).await;
        assert_eq!(
            report.error().and_then(MergeError::violation),
            Some(Violation::InterruptedMessage {
                status: Status::try_from(0x90).unwrap(),
                found: 0xF0,
                missing: 1
            })
        );
        assert!(out.is_empty());

        let (report, out) = run_single(&[0xB0, 0xF7]).await;
        assert_eq!(
            report.error().and_then(MergeError::violation),
            Some(Violation::InterruptedMessage {
                status: Status::try_from(0xB0).unwrap(),
                found: 0xF7,
                missing: 2
            })
        );
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_violation_kept_when_closing_block_fails() {
        let output = Arc::new(SharedOutput::new(ShortSink { room: 2 }));
        let input: &'static [u8] = &[0xF0, 0x01, 0x90];
        let report = StreamWorker::new(StreamId(2), "short", input, Arc::clone(&output))
            .run()
            .await;
        assert_eq!(
            report.error().and_then(MergeError::violation),
            Some(Violation::InterruptedSysex(0x90))
        );
    }

    #[tokio::test]
    async fn test_truncated_sysex_left_open_when_disabled() {
        let output = Arc::new(SharedOutput::new(Vec::new()));
        let input: &'static [u8] = &[0xF0, 0x01, 0x02];
        let report = StreamWorker::new(StreamId(3), "sx", input, Arc::clone(&output))
            .with_close_dangling_sysex(false)
            .run()
            .await;
        assert_eq!(
            report.error().and_then(MergeError::violation),
            Some(Violation::TruncatedSysex)
        );
        let out = Arc::into_inner(output).unwrap().close().await;
        assert_eq!(out, vec![0xF0, 0x01, 0x02]);
    }

    #[tokio::test]
    async fn test_cancel_stops_live_stream() {
        let (_writer, reader) = tokio::io::duplex(16);
        let output = Arc::new(SharedOutput::new(Vec::new()));
        let token = CancellationToken::new();
        let worker = StreamWorker::new(StreamId(1), "live", reader, Arc::clone(&output))
            .with_cancellation(token.clone());

        let task = tokio::spawn(worker.run());
        token.cancel();
        let report = task.await.unwrap();
        assert!(matches!(report.outcome, Ok(StreamEnd::Cancelled)));
    }
}
