//! # vidpace
//!
//! Ingest a containerised H.264 or H.265 video, classify every video packet
//! at the NAL-unit level, derive the decoder configuration, and deliver the
//! units to a decoder at a fixed real-time cadence.
//!
//! The pipeline runs in two strictly sequential phases:
//!
//! 1. **Ingestion** reads the whole container through a [`ByteSource`] and
//!    an FFmpeg-backed [`Demuxer`], counting packets, classifying keyframes
//!    (container flag OR a bounded bitstream scan), and resolving a
//!    [`CodecDescription`]. The result is final [`Stats`].
//! 2. **Playback** drains the materialised units through a
//!    [`PacingScheduler`] into a [`VideoDecoder`] and on to a [`FrameSink`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use vidpace::{PipelineOptions, SourceDescriptor};
//!
//! let stats = vidpace::inspect(
//!     SourceDescriptor::File("input.ts".into()),
//!     &PipelineOptions::default(),
//! )?;
//! println!("{} keyframes, {}%", stats.keyframes, stats.keyframe_ratio_display());
//! # Ok::<(), vidpace::VidpaceError>(())
//! ```
//!
//! ### Optional Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `async` | [`run_async`] runs ingestion on Tokio's blocking pool |
//! | `http`  | `HttpSource`: remote files fetched with ranged GETs |
//! | `full`  | Enables all of the above |
//!
//! ## Requirements
//!
//! FFmpeg development libraries must be installed on your system.

mod avio;
pub mod bitstream;
pub mod configuration;
mod conversion;
pub mod decode;
pub mod demux;
pub mod error;
pub mod ffmpeg;
pub mod format;
#[cfg(feature = "http")]
mod http;
pub mod ingest;
pub mod pacing;
pub mod pipeline;
pub mod progress;
pub mod sink;
pub mod source;
pub mod stats;

pub use bitstream::{
    CodecDescription, CodecFamily, DescriptionOrigin, DescriptionResolver, KeyframeClassification,
    NalUnit, classify, extract_parameter_sets, nal_units, scan_for_keyframe,
};
pub use configuration::{PipelineOptions, PixelFormat};
pub use decode::{CodecProfile, DecodedFrame, FfmpegDecoder, VideoDecoder};
pub use demux::{Demuxer, FfmpegDemuxer, Packet, StreamDescriptor, StreamRole};
pub use error::VidpaceError;
pub use ffmpeg::{FfmpegLogLevel, get_ffmpeg_log_level, set_ffmpeg_log_level};
pub use format::ContainerFormat;
pub use ingest::{Ingestion, ingest};
pub use pacing::{
    ChunkConsumer, Clock, DriveReport, FrameClock, PacedChunk, PacingScheduler, SchedulerState,
    TickAction, TickOutcome, drive,
};
#[cfg(feature = "async")]
pub use pipeline::run_async;
pub use pipeline::{PlaybackReport, Session, inspect, run, run_with};
pub use progress::{CancellationToken, IngestProgress, ProgressCallback};
pub use sink::{FrameSink, ImageSequenceSink, NullSink};
#[cfg(feature = "http")]
pub use source::HttpSource;
pub use source::{ByteSource, FileSource, MemorySource, ReadOutcome, SourceDescriptor, open_source};
pub use stats::Stats;
