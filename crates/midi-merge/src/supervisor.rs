//! Merge supervisor
//!
//! The [`Supervisor`] validates the source list, builds one [`StreamWorker`]
//! per source around a single [`SharedOutput`], spawns them and joins them as
//! they finish. A failing source is simply drained; the rest keep going. A
//! failing destination stops everyone, since every worker writes to it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::MergeConfig;
use crate::error::MergeError;
use crate::output::SharedOutput;
use crate::state::{StreamId, StreamReport, StreamStats};
use crate::worker::StreamWorker;

/// Result of a complete merge
#[derive(Debug)]
pub struct MergeSummary<W> {
    /// One report per source, ordered by stream id
    pub streams: Vec<StreamReport>,
    /// The destination, handed back once every worker has released it
    pub sink: Option<W>,
}

impl<W> MergeSummary<W> {
    /// Whether every stream ended without error
    pub fn is_success(&self) -> bool {
        self.streams.iter().all(StreamReport::is_clean)
    }

    /// Streams that ended with an error
    pub fn failures(&self) -> impl Iterator<Item = &StreamReport> {
        self.streams.iter().filter(|r| !r.is_clean())
    }

    /// Report for a specific stream
    pub fn stream(&self, id: StreamId) -> Option<&StreamReport> {
        self.streams.iter().find(|r| r.id == id)
    }
}

/// Owns the workers and the shared destination for one merge
pub struct Supervisor<R, W> {
    workers: Vec<StreamWorker<R, W>>,
    output: Arc<SharedOutput<W>>,
    cancel: CancellationToken,
}

impl<R, W> Supervisor<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Create a supervisor with the default configuration
    pub fn new<I, N>(sources: I, sink: W) -> Result<Self, MergeError>
    where
        I: IntoIterator<Item = (N, R)>,
        N: Into<String>,
    {
        Self::with_config(sources, sink, MergeConfig::default())
    }

    /// Create a supervisor
    ///
    /// Fails before anything is spawned if there are no sources or more than
    /// `config.max_sources()`.
    pub fn with_config<I, N>(sources: I, sink: W, config: MergeConfig) -> Result<Self, MergeError>
    where
        I: IntoIterator<Item = (N, R)>,
        N: Into<String>,
    {
        let sources: Vec<(N, R)> = sources.into_iter().collect();
        config.validate_sources(sources.len())?;

        let output = Arc::new(SharedOutput::with_config(sink, &config));
        let cancel = CancellationToken::new();

        let workers = sources
            .into_iter()
            .zip(0u32..)
            .map(|((name, input), id)| {
                StreamWorker::new(StreamId(id), name, input, Arc::clone(&output))
                    .with_cancellation(cancel.child_token())
                    .with_close_dangling_sysex(config.close_dangling_sysex)
            })
            .collect();

        Ok(Self {
            workers,
            output,
            cancel,
        })
    }

    /// Token that stops every worker when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of sources being merged
    pub fn stream_count(&self) -> usize {
        self.workers.len()
    }

    /// Run every worker to completion
    pub async fn run(self) -> MergeSummary<W> {
        let Self {
            workers,
            output,
            cancel,
        } = self;

        let mut tasks = JoinSet::new();
        let mut names = HashMap::with_capacity(workers.len());
        for worker in workers {
            let id = worker.id();
            let name = worker.name().to_string();
            let handle = tasks.spawn(worker.run());
            names.insert(handle.id(), (id, name));
        }
        info!("Merging {} streams", names.len());

        let mut streams = Vec::with_capacity(names.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            let report = match joined {
                Ok((_, report)) => report,
                Err(e) => {
                    let (id, name) = names
                        .remove(&e.id())
                        .unwrap_or_else(|| (StreamId(u32::MAX), String::from("unknown")));
                    StreamReport {
                        id,
                        name,
                        stats: StreamStats::default(),
                        outcome: Err(MergeError::WorkerAborted {
                            stream: id,
                            reason: e.to_string(),
                        }),
                    }
                }
            };

            match &report.outcome {
                Ok(end) => info!(
                    "Stream {} ({}) joined: {:?}, {} messages, {} status bytes elided, {} real-time, {} exclusive",
                    report.id,
                    report.name,
                    end,
                    report.stats.messages,
                    report.stats.elided_status,
                    report.stats.realtime,
                    report.stats.sysex_blocks
                ),
                Err(e) if e.is_sink_failure() => {
                    if !cancel.is_cancelled() {
                        error!("Destination failed on stream {}, stopping all streams", report.id);
                        cancel.cancel();
                    }
                }
                Err(e) => warn!("Stream {} ({}) failed: {}", report.id, report.name, e),
            }

            streams.push(report);
        }
        streams.sort_by_key(|r| r.id);

        let sink = match Arc::into_inner(output) {
            Some(output) => Some(output.close().await),
            None => {
                warn!("Destination still referenced after all streams finished");
                None
            }
        };

        MergeSummary { streams, sink }
    }
}
