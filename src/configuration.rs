//! Pipeline configuration.
//!
//! [`PipelineOptions`] is a builder that threads the forced codec, pacing
//! cadence, scan bound, progress callback, cancellation token, and source
//! tuning through [`run`](crate::run) and [`inspect`](crate::inspect)
//! without widening their signatures.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use vidpace::{CodecFamily, PipelineOptions};
//!
//! let options = PipelineOptions::new()
//!     .with_forced_codec(CodecFamily::H265)
//!     .with_target_interval(Duration::from_millis(35))
//!     .with_progress_batch(50);
//! assert!(options.validate().is_ok());
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::time::Duration;

use ffmpeg_next::format::Pixel;

use crate::bitstream::{CodecFamily, DEFAULT_KEYFRAME_SCAN_LIMIT};
use crate::error::VidpaceError;
use crate::progress::{CancellationToken, NoOpProgress, ProgressCallback};
use crate::source::DEFAULT_BUFFER_CEILING;

/// Default pacing interval between emitted chunks.
pub const DEFAULT_TARGET_INTERVAL: Duration = Duration::from_millis(40);

/// Default number of video packets between progress reports.
pub const DEFAULT_PROGRESS_BATCH: u64 = 100;

/// Pixel layout of frames produced by [`FfmpegDecoder`](crate::FfmpegDecoder).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// 8-bit RGB (24 bpp). This is the default.
    #[default]
    Rgb8,
    /// 8-bit RGBA with opaque alpha (32 bpp).
    Rgba8,
    /// 8-bit grayscale (8 bpp).
    Gray8,
}

impl PixelFormat {
    pub(crate) fn to_ffmpeg_pixel(self) -> Pixel {
        match self {
            PixelFormat::Rgb8 => Pixel::RGB24,
            PixelFormat::Rgba8 => Pixel::RGBA,
            PixelFormat::Gray8 => Pixel::GRAY8,
        }
    }

    pub(crate) fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// Options for ingestion and playback.
///
/// A default-constructed value uses the reference constants: 40 ms cadence,
/// 100-byte keyframe scan, progress every 100 video packets, 200 MiB
/// buffering ceiling.
#[derive(Clone)]
pub struct PipelineOptions {
    pub(crate) forced_codec: Option<CodecFamily>,
    pub(crate) target_interval: Duration,
    pub(crate) keyframe_scan_limit: usize,
    pub(crate) progress: Arc<dyn ProgressCallback>,
    pub(crate) progress_batch: u64,
    pub(crate) cancellation: Option<CancellationToken>,
    pub(crate) buffer_ceiling: u64,
    pub(crate) refresh_interval: Duration,
    pub(crate) watchdog_grace: Duration,
    pub(crate) request_timeout: Duration,
    pub(crate) pixel_format: PixelFormat,
}

impl Debug for PipelineOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("PipelineOptions")
            .field("forced_codec", &self.forced_codec)
            .field("target_interval", &self.target_interval)
            .field("keyframe_scan_limit", &self.keyframe_scan_limit)
            .field("progress_batch", &self.progress_batch)
            .field("has_cancellation", &self.cancellation.is_some())
            .field("buffer_ceiling", &self.buffer_ceiling)
            .field("refresh_interval", &self.refresh_interval)
            .field("watchdog_grace", &self.watchdog_grace)
            .field("pixel_format", &self.pixel_format)
            .finish_non_exhaustive()
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineOptions {
    /// Options with every default applied.
    pub fn new() -> Self {
        Self {
            forced_codec: None,
            target_interval: DEFAULT_TARGET_INTERVAL,
            keyframe_scan_limit: DEFAULT_KEYFRAME_SCAN_LIMIT,
            progress: Arc::new(NoOpProgress),
            progress_batch: DEFAULT_PROGRESS_BATCH,
            cancellation: None,
            buffer_ceiling: DEFAULT_BUFFER_CEILING,
            refresh_interval: Duration::from_micros(16_667),
            watchdog_grace: Duration::from_secs(2),
            request_timeout: Duration::from_secs(30),
            pixel_format: PixelFormat::Rgb8,
        }
    }

    /// Override the codec family detected from the container.
    #[must_use]
    pub fn with_forced_codec(mut self, family: CodecFamily) -> Self {
        self.forced_codec = Some(family);
        self
    }

    /// Interval between paced emissions.
    #[must_use]
    pub fn with_target_interval(mut self, interval: Duration) -> Self {
        self.target_interval = interval;
        self
    }

    /// Bytes of each payload examined by the keyframe scan.
    #[must_use]
    pub fn with_keyframe_scan_limit(mut self, limit: usize) -> Self {
        self.keyframe_scan_limit = limit;
        self
    }

    /// Attach a progress callback.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Report progress every `batch` video packets. Clamped to at least 1.
    #[must_use]
    pub fn with_progress_batch(mut self, batch: u64) -> Self {
        self.progress_batch = batch.max(1);
        self
    }

    /// Attach a cancellation token checked before every packet.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Largest source, in bytes, that is read fully into memory.
    #[must_use]
    pub fn with_buffer_ceiling(mut self, bytes: u64) -> Self {
        self.buffer_ceiling = bytes;
        self
    }

    /// Period of the clock that drives the pacing scheduler.
    #[must_use]
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Fixed grace added to twice the expected playback duration.
    #[must_use]
    pub fn with_watchdog_grace(mut self, grace: Duration) -> Self {
        self.watchdog_grace = grace;
        self
    }

    /// Per-request timeout for remote sources.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Pixel format of decoded frames.
    #[must_use]
    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.pixel_format = format;
        self
    }

    /// Interval between paced emissions.
    pub fn target_interval(&self) -> Duration {
        self.target_interval
    }

    /// Bytes of each payload examined by the keyframe scan.
    pub fn keyframe_scan_limit(&self) -> usize {
        self.keyframe_scan_limit
    }

    /// Reject values the pipeline cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`VidpaceError::InvalidConfiguration`] for a zero target
    /// interval, refresh interval, or keyframe scan limit.
    pub fn validate(&self) -> Result<(), VidpaceError> {
        if self.target_interval.is_zero() {
            return Err(VidpaceError::InvalidConfiguration(
                "target interval must be greater than zero".to_string(),
            ));
        }
        if self.refresh_interval.is_zero() {
            return Err(VidpaceError::InvalidConfiguration(
                "refresh interval must be greater than zero".to_string(),
            ));
        }
        if self.keyframe_scan_limit == 0 {
            return Err(VidpaceError::InvalidConfiguration(
                "keyframe scan limit must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|token| token.is_cancelled())
    }

    /// Playback deadline for `chunks` units: twice their nominal duration
    /// plus the grace period.
    pub(crate) fn watchdog_for(&self, chunks: usize) -> Duration {
        let nominal = self.target_interval.saturating_mul(chunks as u32);
        nominal.saturating_mul(2).saturating_add(self.watchdog_grace)
    }
}
