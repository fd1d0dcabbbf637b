//! The ingestion phase: read every packet, classify the video ones, and
//! resolve the codec description.
//!
//! Ingestion runs to completion before playback starts. Its output is the
//! fully materialised, ordered list of video units together with final
//! [`Stats`], so statistics are available to the caller immediately.

use crate::bitstream::{CodecDescription, CodecFamily, DescriptionResolver, classify};
use crate::configuration::PipelineOptions;
use crate::demux::{Demuxer, StreamDescriptor, StreamRole};
use crate::error::VidpaceError;
use crate::pacing::PacedChunk;
use crate::progress::ProgressTracker;
use crate::stats::Stats;

/// Everything the playback phase needs.
#[derive(Debug, Clone)]
pub struct Ingestion {
    /// Counters gathered over the whole container.
    pub stats: Stats,
    /// The selected video stream.
    pub video_stream: StreamDescriptor,
    /// Codec family used for classification and decoding.
    pub family: CodecFamily,
    /// Video units in container order.
    pub chunks: Vec<PacedChunk>,
    /// Decoder configuration, possibly empty.
    pub description: CodecDescription,
    /// Keyframe payloads scanned to build `description`. `0` when the
    /// container supplied it.
    pub description_scans: u32,
}

/// First stream with the video role. Later video streams are ignored.
pub fn select_video_stream(streams: &[StreamDescriptor]) -> Result<&StreamDescriptor, VidpaceError> {
    streams
        .iter()
        .find(|stream| stream.role == StreamRole::Video)
        .ok_or(VidpaceError::NoVideoStream)
}

/// Codec family for `stream`, honouring a forced override.
///
/// # Errors
///
/// Returns [`VidpaceError::UnsupportedCodec`] when the stream is neither
/// H.264 nor H.265 and no family was forced.
pub fn resolve_family(
    stream: &StreamDescriptor,
    forced: Option<CodecFamily>,
) -> Result<CodecFamily, VidpaceError> {
    forced
        .or(stream.family)
        .ok_or_else(|| VidpaceError::UnsupportedCodec {
            codec: stream.codec_name.clone(),
            reason: "only H.264 and H.265 bitstreams can be classified".to_string(),
        })
}

/// Run the ingestion loop over `demuxer` until end of stream.
///
/// # Errors
///
/// - [`VidpaceError::NoVideoStream`] right after stream analysis.
/// - [`VidpaceError::UnsupportedCodec`] if the video codec has no family.
/// - [`VidpaceError::PacketRead`] on any demuxer failure.
/// - [`VidpaceError::Cancelled`] if the cancellation token fires.
pub fn ingest<D: Demuxer + ?Sized>(
    demuxer: &mut D,
    options: &PipelineOptions,
) -> Result<Ingestion, VidpaceError> {
    options.validate()?;

    let video_stream = select_video_stream(demuxer.streams())?.clone();
    let family = resolve_family(&video_stream, options.forced_codec)?;
    log::debug!(
        "Selected video stream #{} ({}, classified as {family})",
        video_stream.index,
        video_stream.codec_name
    );

    let mut stats = Stats::new(&video_stream, family);
    let mut tracker = ProgressTracker::new(
        options.progress.clone(),
        options.progress_batch,
        demuxer.source_size(),
    );
    let mut chunks = Vec::new();

    loop {
        if options.is_cancelled() {
            return Err(VidpaceError::Cancelled);
        }
        let Some(packet) = demuxer.next_packet()? else {
            break;
        };

        stats.record_packet();
        if packet.stream_index != video_stream.index {
            continue;
        }

        let verdict = classify(
            &packet.payload,
            packet.container_keyframe,
            family,
            options.keyframe_scan_limit,
        );
        stats.record_video_packet(verdict.is_keyframe);
        chunks.push(
            PacedChunk::new(stats.video_packets - 1, packet.payload, verdict.is_keyframe)
                .with_pts(packet.pts),
        );
        tracker.advance(&stats);
    }
    tracker.finish(&stats);

    let mut resolver = DescriptionResolver::new(family, video_stream.extradata.clone());
    for keyframe in chunks.iter().filter(|chunk| chunk.is_keyframe) {
        if resolver.is_resolved() {
            break;
        }
        resolver.offer_keyframe(&keyframe.payload);
    }
    let description_scans = resolver.scan_attempts();
    let description = resolver.finish();

    log::info!(
        "Ingested {} packets ({} video, {} keyframes, {}%)",
        stats.total_packets,
        stats.video_packets,
        stats.keyframes,
        stats.keyframe_ratio_display()
    );

    Ok(Ingestion {
        stats,
        video_stream,
        family,
        chunks,
        description,
        description_scans,
    })
}
