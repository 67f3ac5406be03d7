//! Shared destination with two-tier locking
//!
//! All stream workers write into one [`SharedOutput`]. It owns two locks:
//!
//! - the **normal lock** guards the status byte last written to the sink and
//!   is held for the whole of a channel/system common message or exclusive
//!   block, so messages from different streams never interleave
//! - the **real-time lock** guards the sink itself. Real-time bytes take only
//!   this lock, so they slip in between other streams' messages without
//!   waiting for them
//!
//! Locks are always taken normal first, real-time second. A message is written
//! to the sink in one piece under the real-time lock, which keeps real-time
//! bytes out of its middle. An exclusive block holds both locks from 0xF0 to
//! 0xF7, which keeps them out of the block as well.

use midi_wire::{Status, SYSEX_END};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, warn};

use crate::config::MergeConfig;
use crate::error::MergeError;

/// The destination writer plus its failure flag
struct Sink<W> {
    writer: W,
    failed: bool,
}

impl<W> Sink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, bytes: &[u8], flush: bool) -> Result<(), MergeError> {
        if self.failed {
            return Err(MergeError::SinkClosed);
        }
        let result = match self.writer.write_all(bytes).await {
            Ok(()) if flush => self.writer.flush().await,
            other => other,
        };
        self.check(result)
    }

    async fn flush(&mut self) -> Result<(), MergeError> {
        if self.failed {
            return Err(MergeError::SinkClosed);
        }
        let result = self.writer.flush().await;
        self.check(result)
    }

    fn check(&mut self, result: std::io::Result<()>) -> Result<(), MergeError> {
        result.map_err(|e| {
            error!("Destination write failed: {}", e);
            self.failed = true;
            MergeError::Sink(e)
        })
    }
}

/// Destination shared by every stream worker
pub struct SharedOutput<W> {
    /// Normal lock: status byte most recently written to the sink
    last_status: Mutex<Option<Status>>,
    /// Real-time lock: the sink itself
    sink: Mutex<Sink<W>>,
    flush_each_message: bool,
}

impl<W> SharedOutput<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Wrap a writer with the default configuration
    pub fn new(writer: W) -> Self {
        Self::with_config(writer, &MergeConfig::default())
    }

    /// Wrap a writer
    pub fn with_config(writer: W, config: &MergeConfig) -> Self {
        Self {
            last_status: Mutex::new(None),
            sink: Mutex::new(Sink {
                writer,
                failed: false,
            }),
            flush_each_message: config.flush_each_message,
        }
    }

    /// Write a single real-time byte, taking only the real-time lock
    pub async fn write_realtime(&self, byte: u8) -> Result<(), MergeError> {
        self.sink
            .lock()
            .await
            .write(&[byte], self.flush_each_message)
            .await
    }

    /// Take the normal lock for the duration of one message
    pub async fn lock_normal(&self) -> NormalGuard<'_, W> {
        NormalGuard {
            output: self,
            last_status: self.last_status.lock().await,
        }
    }

    /// Take both locks for the duration of one exclusive block
    pub async fn begin_sysex(&self) -> SysexGuard<'_, W> {
        let last_status = self.last_status.lock().await;
        let sink = self.sink.lock().await;
        SysexGuard {
            last_status,
            sink,
            len: 0,
        }
    }

    /// Status byte most recently written, as seen under the normal lock
    pub async fn last_status(&self) -> Option<Status> {
        *self.last_status.lock().await
    }

    /// Release the writer, shutting it down unless it already failed
    pub async fn close(self) -> W {
        let Sink { mut writer, failed } = self.sink.into_inner();
        if !failed {
            if let Err(e) = writer.shutdown().await {
                warn!("Failed to shut down destination: {}", e);
            }
        }
        writer
    }
}

/// Normal lock held for one channel or system common message
pub struct NormalGuard<'a, W> {
    output: &'a SharedOutput<W>,
    last_status: MutexGuard<'a, Option<Status>>,
}

impl<W> NormalGuard<'_, W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Forward a real-time byte that arrived inside this message
    pub async fn write_realtime(&self, byte: u8) -> Result<(), MergeError> {
        self.output.write_realtime(byte).await
    }

    /// Write a complete message, leaving out the status byte when running
    /// status allows it
    ///
    /// Returns whether the status byte was written. Only channel statuses are
    /// ever elided; a system common message always carries its status and
    /// cancels running status for everyone.
    pub async fn emit(&mut self, status: Status, data: &[u8]) -> Result<bool, MergeError> {
        let elide = status.is_channel() && *self.last_status == Some(status);

        let mut frame = Vec::with_capacity(1 + data.len());
        if !elide {
            frame.push(status.as_u8());
        }
        frame.extend_from_slice(data);

        self.output
            .sink
            .lock()
            .await
            .write(&frame, self.output.flush_each_message)
            .await?;

        *self.last_status = status.is_channel().then_some(status);
        Ok(!elide)
    }
}

/// Both locks held for one exclusive block
pub struct SysexGuard<'a, W> {
    last_status: MutexGuard<'a, Option<Status>>,
    sink: MutexGuard<'a, Sink<W>>,
    len: usize,
}

impl<W> SysexGuard<'_, W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Forward one byte of the block
    pub async fn forward(&mut self, byte: u8) -> Result<(), MergeError> {
        self.sink.write(&[byte], false).await?;
        self.len += 1;
        Ok(())
    }

    /// Bytes forwarded so far
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing has been forwarded yet
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Complete the block after its 0xF7 has been forwarded
    pub async fn finish(mut self) -> Result<(), MergeError> {
        *self.last_status = None;
        self.sink.flush().await
    }

    /// Give up on a block whose source stopped before 0xF7
    ///
    /// With `terminate` set, a 0xF7 is written so receivers leave exclusive
    /// mode.
    pub async fn abort(mut self, terminate: bool) -> Result<(), MergeError> {
        if terminate {
            debug!(len = self.len, "Closing dangling exclusive block");
            self.sink.write(&[SYSEX_END], false).await?;
        }
        *self.last_status = None;
        self.sink.flush().await
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use super::*;

    struct FailingSink;

    impl AsyncWrite for FailingSink {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    fn status(byte: u8) -> Status {
        Status::try_from(byte).unwrap()
    }

    #[tokio::test]
    async fn test_running_status_elides_repeat() {
        let output = SharedOutput::new(Vec::new());
        {
            let mut guard = output.lock_normal().await;
            assert!(guard.emit(status(0x90), &[0x40, 0x7F]).await.unwrap());
            assert!(!guard.emit(status(0x90), &[0x40, 0x00]).await.unwrap());
        }
        assert_eq!(output.last_status().await, Some(status(0x90)));
        assert_eq!(output.close().await, vec![0x90, 0x40, 0x7F, 0x40, 0x00]);
    }

    #[tokio::test]
    async fn test_status_change_is_written() {
        let output = SharedOutput::new(Vec::new());
        {
            let mut guard = output.lock_normal().await;
            guard.emit(status(0x90), &[0x40, 0x7F]).await.unwrap();
            guard.emit(status(0x80), &[0x40, 0x00]).await.unwrap();
            guard.emit(status(0x90), &[0x41, 0x7F]).await.unwrap();
        }
        assert_eq!(
            output.close().await,
            vec![0x90, 0x40, 0x7F, 0x80, 0x40, 0x00, 0x90, 0x41, 0x7F]
        );
    }

    #[tokio::test]
    async fn test_system_common_never_elided() {
        let output = SharedOutput::new(Vec::new());
        {
            let mut guard = output.lock_normal().await;
            assert!(guard.emit(status(0xF6), &[]).await.unwrap());
            assert!(guard.emit(status(0xF6), &[]).await.unwrap());
        }
        assert_eq!(output.last_status().await, None);
        assert_eq!(output.close().await, vec![0xF6, 0xF6]);
    }

    #[tokio::test]
    async fn test_realtime_leaves_running_status() {
        let output = SharedOutput::new(Vec::new());
        output
            .lock_normal()
            .await
            .emit(status(0xB0), &[0x07, 0x64])
            .await
            .unwrap();
        output.write_realtime(0xF8).await.unwrap();
        output
            .lock_normal()
            .await
            .emit(status(0xB0), &[0x07, 0x65])
            .await
            .unwrap();
        assert_eq!(
            output.close().await,
            vec![0xB0, 0x07, 0x64, 0xF8, 0x07, 0x65]
        );
    }

    #[tokio::test]
    async fn test_sysex_clears_running_status() {
        let output = SharedOutput::new(Vec::new());
        output
            .lock_normal()
            .await
            .emit(status(0x90), &[0x40, 0x7F])
            .await
            .unwrap();
        {
            let mut block = output.begin_sysex().await;
            for byte in [0xF0, 0x7E, 0x01, 0xF7] {
                block.forward(byte).await.unwrap();
            }
            assert_eq!(block.len(), 4);
            block.finish().await.unwrap();
        }
        assert_eq!(output.last_status().await, None);
    }

    #[tokio::test]
    async fn test_abort_terminates_block() {
        let output = SharedOutput::new(Vec::new());
        {
            let mut block = output.begin_sysex().await;
            block.forward(0xF0).await.unwrap();
            block.forward(0x01).await.unwrap();
            block.abort(true).await.unwrap();
        }
        assert_eq!(output.close().await, vec![0xF0, 0x01, 0xF7]);
    }

    #[tokio::test]
    async fn test_sink_failure_is_sticky() {
        let output = SharedOutput::new(FailingSink);
        match output.write_realtime(0xF8).await {
            Err(MergeError::Sink(e)) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("Expected Sink error, got {:?}", other),
        }
        assert!(matches!(
            output.write_realtime(0xF8).await,
            Err(MergeError::SinkClosed)
        ));
        let result = output.lock_normal().await.emit(status(0x90), &[1, 2]).await;
        assert!(matches!(result, Err(MergeError::SinkClosed)));
    }
}
