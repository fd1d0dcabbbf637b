//! Progress reporting and cancellation support.
//!
//! Ingestion reports partial [`Stats`] through a [`ProgressCallback`] every
//! [`batch_size`](crate::PipelineOptions::with_progress_batch) video packets,
//! and checks a [`CancellationToken`] before each packet.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use vidpace::{IngestProgress, PipelineOptions, ProgressCallback, SourceDescriptor};
//!
//! struct PrintProgress;
//!
//! impl ProgressCallback for PrintProgress {
//!     fn on_progress(&self, info: &IngestProgress) {
//!         println!("{} video packets after {:?}", info.stats.video_packets, info.elapsed);
//!     }
//! }
//!
//! let options = PipelineOptions::new().with_progress(Arc::new(PrintProgress));
//! let stats = vidpace::inspect(SourceDescriptor::File("input.ts".into()), &options)?;
//! # Ok::<(), vidpace::VidpaceError>(())
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::{Duration, Instant};

use crate::stats::Stats;

/// A snapshot of ingestion progress.
#[derive(Debug, Clone)]
pub struct IngestProgress {
    /// Counters so far. `keyframe_ratio` reflects the partial counts.
    pub stats: Stats,
    /// Wall-clock time since ingestion started.
    pub elapsed: Duration,
    /// Size of the source in bytes.
    pub source_size: u64,
    /// `true` on the single report emitted after end of stream.
    pub finished: bool,
}

/// Trait for receiving progress updates during ingestion.
///
/// Callbacks are infallible observers; use [`CancellationToken`] to stop an
/// ingestion early.
pub trait ProgressCallback: Send + Sync {
    /// Called every batch of video packets and once at the end.
    fn on_progress(&self, info: &IngestProgress);
}

/// Discards all notifications. The default callback.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &IngestProgress) {}
}

/// Cooperative cancellation token backed by an [`AtomicBool`].
///
/// Clones share state. The same token type is used by
/// [`Session::stop`](crate::Session::stop) to end playback.
///
/// ```
/// use vidpace::CancellationToken;
///
/// let token = CancellationToken::new();
/// let clone = token.clone();
/// token.cancel();
/// assert!(clone.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// A token that is not cancelled.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. All clones observe it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Batches video-packet progress into callback invocations.
pub(crate) struct ProgressTracker {
    callback: Arc<dyn ProgressCallback>,
    batch_size: u64,
    source_size: u64,
    start_time: Instant,
    since_last_report: u64,
}

impl ProgressTracker {
    pub(crate) fn new(callback: Arc<dyn ProgressCallback>, batch_size: u64, source_size: u64) -> Self {
        Self {
            callback,
            batch_size: batch_size.max(1),
            source_size,
            start_time: Instant::now(),
            since_last_report: 0,
        }
    }

    /// Record one video packet and report if the batch is full.
    pub(crate) fn advance(&mut self, stats: &Stats) {
        self.since_last_report += 1;
        if self.since_last_report >= self.batch_size {
            self.report(stats, false);
            self.since_last_report = 0;
        }
    }

    /// Emit the final report.
    pub(crate) fn finish(&mut self, stats: &Stats) {
        self.report(stats, true);
    }

    fn report(&self, stats: &Stats, finished: bool) {
        let info = IngestProgress {
            stats: stats.clone(),
            elapsed: self.start_time.elapsed(),
            source_size: self.source_size,
            finished,
        };
        self.callback.on_progress(&info);
    }
}
