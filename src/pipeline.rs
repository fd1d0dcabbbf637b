//! End-to-end pipeline: ingestion on the caller's thread, then paced
//! decoding on a playback thread.
//!
//! [`run`] returns as soon as ingestion statistics are final and the decoder
//! is configured. Decoding and delivery to the [`FrameSink`] continue in the
//! background and are observed and controlled through the returned
//! [`Session`].
//!
//! # Example
//!
//! ```no_run
//! use vidpace::{NullSink, PipelineOptions, SourceDescriptor};
//!
//! let session = vidpace::run(
//!     SourceDescriptor::File("input.ts".into()),
//!     NullSink::new(),
//!     &PipelineOptions::default(),
//! )?;
//! println!("{}", session.stats());
//! let report = session.wait()?;
//! println!("{} chunks emitted, {} skipped", report.emitted, report.skipped);
//! # Ok::<(), vidpace::VidpaceError>(())
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crate::bitstream::CodecDescription;
use crate::configuration::PipelineOptions;
use crate::decode::{CodecProfile, DecodedFrame, FfmpegDecoder, VideoDecoder};
use crate::demux::{Demuxer, FfmpegDemuxer};
use crate::error::VidpaceError;
use crate::ingest::{Ingestion, ingest};
use crate::pacing::{ChunkConsumer, FrameClock, PacedChunk, PacingScheduler, drive};
use crate::progress::CancellationToken;
use crate::sink::FrameSink;
use crate::source::{SourceDescriptor, open_source};
use crate::stats::Stats;

/// Live playback counters shared with the playback thread.
#[derive(Debug, Default)]
struct PlaybackCounters {
    emitted: AtomicU64,
    decoded: AtomicU64,
    skipped: AtomicU64,
}

/// How playback ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackReport {
    /// Chunks handed to the decoder.
    pub emitted: u64,
    /// Frames accepted by the sink.
    pub decoded_frames: u64,
    /// Chunks or frames dropped by a soft failure.
    pub skipped: u64,
    /// Chunks still queued when playback ended.
    pub discarded: usize,
    /// The watchdog bound was reached first.
    pub timed_out: bool,
    /// [`Session::stop`] was called.
    pub stopped: bool,
}

/// Handle on a running pipeline.
///
/// Dropping a session without calling [`wait`](Self::wait) stops playback.
#[derive(Debug)]
pub struct Session {
    stats: Stats,
    description: CodecDescription,
    counters: Arc<PlaybackCounters>,
    stop: CancellationToken,
    deadline: Instant,
    grace: Duration,
    total: usize,
    report: Option<Receiver<PlaybackReport>>,
}

impl Session {
    /// Final ingestion statistics.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    /// The codec description the decoder was configured with.
    pub fn description(&self) -> &CodecDescription {
        &self.description
    }

    /// Chunks handed to the decoder so far.
    pub fn emitted(&self) -> u64 {
        self.counters.emitted.load(Ordering::Relaxed)
    }

    /// Frames accepted by the sink so far.
    pub fn decoded_frames(&self) -> u64 {
        self.counters.decoded.load(Ordering::Relaxed)
    }

    /// Units dropped because they failed to decode or render.
    pub fn skipped_units(&self) -> u64 {
        self.counters.skipped.load(Ordering::Relaxed)
    }

    /// Stop playback and discard queued chunks. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Block until playback finishes or the watchdog bound passes.
    ///
    /// When the bound passes first, playback is stopped and the playback
    /// thread gets one more grace period to hand over its final report. If
    /// it is still busy in the decoder, the report is built from the live
    /// counters and every chunk not yet emitted counts as discarded. Either
    /// way `timed_out` is set.
    ///
    /// # Errors
    ///
    /// Returns [`VidpaceError::PlaybackAborted`] if the playback thread
    /// terminated without reporting.
    pub fn wait(mut self) -> Result<PlaybackReport, VidpaceError> {
        let Some(report) = self.report.take() else {
            return Err(VidpaceError::PlaybackAborted(
                "playback already awaited".to_string(),
            ));
        };
        let bound = self.deadline.saturating_duration_since(Instant::now()) + self.grace;

        match report.recv_timeout(bound) {
            Ok(report) => Ok(report),
            Err(RecvTimeoutError::Timeout) => {
                log::warn!("Playback did not finish within the watchdog bound; stopping");
                self.stop.cancel();
                let settled = report.recv_timeout(self.grace).unwrap_or_else(|_| {
                    let emitted = self.emitted();
                    PlaybackReport {
                        emitted,
                        decoded_frames: self.decoded_frames(),
                        skipped: self.skipped_units(),
                        discarded: self.total.saturating_sub(emitted as usize),
                        timed_out: true,
                        stopped: false,
                    }
                });
                Ok(PlaybackReport {
                    timed_out: true,
                    stopped: false,
                    ..settled
                })
            }
            Err(RecvTimeoutError::Disconnected) => Err(VidpaceError::PlaybackAborted(
                "playback thread exited without a report".to_string(),
            )),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.report.is_some() {
            self.stop.cancel();
        }
    }
}

/// Decodes each emitted chunk straight into the sink.
struct PlaybackConsumer {
    decoder: Box<dyn VideoDecoder>,
    sink: Box<dyn FrameSink>,
    counters: Arc<PlaybackCounters>,
}

impl PlaybackConsumer {
    fn deliver(sink: &mut dyn FrameSink, counters: &PlaybackCounters, frame: DecodedFrame) {
        let index = frame.index;
        match sink.accept_frame(frame) {
            Ok(()) => {
                counters.decoded.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => {
                log::warn!("Sink rejected frame {index}: {error}");
                counters.skipped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn flush(&mut self) {
        let Self {
            decoder,
            sink,
            counters,
        } = self;
        let mut output = |frame| Self::deliver(sink.as_mut(), counters, frame);
        if let Err(error) = decoder.flush(&mut output) {
            log::warn!("Failed to flush decoder: {error}");
        }
    }
}

impl ChunkConsumer for PlaybackConsumer {
    fn consume(&mut self, chunk: PacedChunk) {
        let Self {
            decoder,
            sink,
            counters,
        } = self;
        counters.emitted.fetch_add(1, Ordering::Relaxed);

        let mut output = |frame| Self::deliver(sink.as_mut(), counters, frame);
        if let Err(error) = decoder.decode(&chunk, &mut output) {
            log::warn!("Skipping chunk {}: {error}", chunk.sequence_number);
            counters.skipped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Statistics only: open, demux, and classify `source` without decoding.
///
/// # Errors
///
/// Any fatal ingestion error; see [`ingest`].
pub fn inspect(source: SourceDescriptor, options: &PipelineOptions) -> Result<Stats, VidpaceError> {
    let mut demuxer = open_demuxer(source, options)?;
    Ok(ingest(&mut demuxer, options)?.stats)
}

/// Run the full pipeline over `source`, delivering frames to `sink`.
///
/// # Errors
///
/// Fatal conditions reject the call: [`VidpaceError::SourceUnavailable`],
/// [`VidpaceError::StreamOpen`], [`VidpaceError::NoVideoStream`],
/// [`VidpaceError::PacketRead`], [`VidpaceError::UnsupportedCodec`], and
/// [`VidpaceError::Cancelled`].
pub fn run<S: FrameSink + 'static>(
    source: SourceDescriptor,
    sink: S,
    options: &PipelineOptions,
) -> Result<Session, VidpaceError> {
    let mut demuxer = open_demuxer(source, options)?;
    let decoder = FfmpegDecoder::new(options.pixel_format);
    run_with(&mut demuxer, Box::new(decoder), Box::new(sink), options)
}

/// [`run`] over a caller-supplied demuxer and decoder.
///
/// # Errors
///
/// As for [`run`], minus the source and container errors, which belong to
/// whoever built `demuxer`.
pub fn run_with<D: Demuxer + ?Sized>(
    demuxer: &mut D,
    mut decoder: Box<dyn VideoDecoder>,
    sink: Box<dyn FrameSink>,
    options: &PipelineOptions,
) -> Result<Session, VidpaceError> {
    let ingestion = ingest(demuxer, options)?;
    let profile = CodecProfile::new(
        ingestion.family,
        &ingestion.description,
        ingestion.video_stream.width,
        ingestion.video_stream.height,
    );

    if !decoder.is_supported(&profile) {
        return Err(VidpaceError::UnsupportedCodec {
            codec: profile.codec_string,
            reason: "decoder does not support this profile".to_string(),
        });
    }
    decoder.configure(&profile, &ingestion.description)?;

    start_playback(ingestion, decoder, sink, options)
}

/// Tokio entry point. Ingestion runs on the blocking pool.
///
/// # Errors
///
/// As for [`run`], plus [`VidpaceError::PlaybackAborted`] if the blocking
/// task panicked.
#[cfg(feature = "async")]
pub async fn run_async<S: FrameSink + 'static>(
    source: SourceDescriptor,
    sink: S,
    options: PipelineOptions,
) -> Result<Session, VidpaceError> {
    tokio::task::spawn_blocking(move || run(source, sink, &options))
        .await
        .map_err(|error| VidpaceError::PlaybackAborted(error.to_string()))?
}

fn open_demuxer(
    source: SourceDescriptor,
    options: &PipelineOptions,
) -> Result<FfmpegDemuxer, VidpaceError> {
    options.validate()?;
    let format = source.container_format();
    let bytes = open_source(source, options)?;
    FfmpegDemuxer::open(bytes, format)
}

fn start_playback(
    ingestion: Ingestion,
    decoder: Box<dyn VideoDecoder>,
    sink: Box<dyn FrameSink>,
    options: &PipelineOptions,
) -> Result<Session, VidpaceError> {
    let Ingestion {
        stats,
        chunks,
        description,
        ..
    } = ingestion;

    let counters = Arc::new(PlaybackCounters::default());
    let stop = CancellationToken::new();
    let watchdog = options.watchdog_for(chunks.len());
    let interval = options.target_interval;
    let mut clock = FrameClock::new(options.refresh_interval);
    let (sender, receiver) = mpsc::channel();

    let consumer = PlaybackConsumer {
        decoder,
        sink,
        counters: Arc::clone(&counters),
    };
    let thread_counters = Arc::clone(&counters);
    let thread_stop = stop.clone();
    let total = chunks.len();

    thread::Builder::new()
        .name("vidpace-playback".to_string())
        .spawn(move || {
            let mut scheduler = PacingScheduler::new(interval, consumer);
            let now = Instant::now();
            for chunk in chunks {
                scheduler.enqueue(chunk, now);
            }

            let outcome = drive(&mut scheduler, &mut clock, watchdog, &thread_stop);
            let mut consumer = scheduler.into_consumer();
            if !outcome.stopped && !outcome.timed_out {
                consumer.flush();
            }
            consumer.decoder.close();

            let report = PlaybackReport {
                emitted: thread_counters.emitted.load(Ordering::Relaxed),
                decoded_frames: thread_counters.decoded.load(Ordering::Relaxed),
                skipped: thread_counters.skipped.load(Ordering::Relaxed),
                discarded: outcome.discarded,
                timed_out: outcome.timed_out,
                stopped: outcome.stopped,
            };
            log::info!(
                "Playback finished: {}/{total} chunks emitted, {} frames, {} skipped",
                report.emitted,
                report.decoded_frames,
                report.skipped
            );
            // The receiver is gone if the session was dropped.
            let _ = sender.send(report);
        })?;

    Ok(Session {
        stats,
        description,
        counters,
        stop,
        deadline: Instant::now() + watchdog,
        grace: options.watchdog_grace,
        total,
        report: Some(receiver),
    })
}
