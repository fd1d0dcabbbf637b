//! Aggregate ingestion counters.
//!
//! [`Stats`] is updated packet by packet while the container is read and is
//! handed back to the caller once the demultiplexer reaches end of stream.
//! Partial copies are delivered to progress callbacks along the way.

use std::fmt::{Display, Formatter, Result as FmtResult};

use crate::bitstream::CodecFamily;
use crate::demux::StreamDescriptor;

/// Packet and keyframe counters for one ingestion run.
///
/// Invariant: `total_packets >= video_packets >= keyframes`.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub struct Stats {
    /// Every packet read from the container, all streams.
    pub total_packets: u64,
    /// Packets belonging to the selected video stream.
    pub video_packets: u64,
    /// Video packets classified as keyframes.
    pub keyframes: u64,
    /// `keyframes / video_packets * 100`, or `0` with no video packets.
    pub keyframe_ratio: f64,
    /// Coded width from stream analysis.
    pub width: u32,
    /// Coded height from stream analysis.
    pub height: u32,
    /// FFmpeg codec name of the video stream (e.g. `"h264"`).
    pub codec_name: String,
    /// Bitstream family used for classification.
    pub codec_family: CodecFamily,
    /// Container index of the selected video stream.
    pub video_stream_index: usize,
}

/// Keyframe percentage with the zero-denominator convention.
pub fn keyframe_ratio(keyframes: u64, video_packets: u64) -> f64 {
    if video_packets == 0 {
        0.0
    } else {
        keyframes as f64 / video_packets as f64 * 100.0
    }
}

impl Stats {
    /// Zeroed counters for `stream`, classified as `family`.
    pub(crate) fn new(stream: &StreamDescriptor, family: CodecFamily) -> Self {
        Self {
            total_packets: 0,
            video_packets: 0,
            keyframes: 0,
            keyframe_ratio: 0.0,
            width: stream.width,
            height: stream.height,
            codec_name: stream.codec_name.clone(),
            codec_family: family,
            video_stream_index: stream.index,
        }
    }

    pub(crate) fn record_packet(&mut self) {
        self.total_packets += 1;
    }

    pub(crate) fn record_video_packet(&mut self, is_keyframe: bool) {
        self.video_packets += 1;
        if is_keyframe {
            self.keyframes += 1;
        }
        self.keyframe_ratio = keyframe_ratio(self.keyframes, self.video_packets);
    }

    /// Keyframe ratio rendered with two decimals, e.g. `"10.00"`.
    pub fn keyframe_ratio_display(&self) -> String {
        format!("{:.2}", self.keyframe_ratio)
    }
}

impl Display for Stats {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "{} ({}) {}x{} stream #{}: {} packets, {} video, {} keyframes ({}%)",
            self.codec_name,
            self.codec_family,
            self.width,
            self.height,
            self.video_stream_index,
            self.total_packets,
            self.video_packets,
            self.keyframes,
            self.keyframe_ratio_display(),
        )
    }
}
