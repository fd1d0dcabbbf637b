//! Error types for the `vidpace` crate.
//!
//! This module defines [`VidpaceError`], the unified error type returned by
//! every fallible operation in the crate. Fatal pipeline conditions (the
//! source cannot be read, no video stream, an unsupported codec, a corrupt
//! container) each have their own variant so callers can match on them.
//!
//! Soft conditions are not represented here as failures of `run`: a missing
//! codec description is logged and reflected in
//! [`CodecDescription::origin`](crate::CodecDescription::origin), and a chunk
//! that fails to decode is logged and counted as skipped.

use std::io::Error as IoError;

use ffmpeg_next::Error as FfmpegError;
use image::ImageError;
use thiserror::Error;

/// The unified error type for all `vidpace` operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VidpaceError {
    /// The initial size probe or a read of the byte source failed.
    #[error("Source {locator} is unavailable: {reason}")]
    SourceUnavailable {
        /// Path, URL, or `<memory>` for buffered sources.
        locator: String,
        /// Underlying reason.
        reason: String,
    },

    /// The demultiplexer could not open or analyse the container.
    #[error("Failed to open {format} container: {reason}")]
    StreamOpen {
        /// FFmpeg short name of the grammar that was tried.
        format: String,
        /// Underlying reason.
        reason: String,
    },

    /// Stream analysis completed but no stream has the video role.
    #[error("No video stream found in container")]
    NoVideoStream,

    /// The decoder cannot be configured for the detected or forced codec.
    #[error("Unsupported codec {codec}: {reason}")]
    UnsupportedCodec {
        /// Codec name or codec string.
        codec: String,
        /// Why configuration was refused.
        reason: String,
    },

    /// The demultiplexer reported a non end-of-stream failure.
    #[error("Failed to read packet: {0}")]
    PacketRead(String),

    /// A single chunk could not be decoded. Never fatal to a pipeline.
    #[error("Failed to decode chunk: {0}")]
    DecodeError(String),

    /// The playback thread terminated abnormally.
    #[error("Playback aborted: {0}")]
    PlaybackAborted(String),

    /// An option value is out of range.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The operation was cancelled via a [`CancellationToken`](crate::CancellationToken).
    #[error("Operation cancelled")]
    Cancelled,

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// An I/O error occurred while reading a local file or writing frames.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// An error from the `image` crate while converting or saving frames.
    #[error("Image processing error: {0}")]
    ImageError(#[from] ImageError),
}

impl VidpaceError {
    /// Returns `true` for conditions that abort a pipeline.
    ///
    /// Decode failures of individual chunks are the only soft kind.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, VidpaceError::DecodeError(_))
    }
}

impl From<FfmpegError> for VidpaceError {
    fn from(error: FfmpegError) -> Self {
        VidpaceError::FfmpegError(error.to_string())
    }
}
