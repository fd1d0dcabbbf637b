//! Decode contract and the libavcodec adapter.
//!
//! [`VideoDecoder`] is what the playback side of the pipeline talks to:
//! a support query, one-time configuration from a [`CodecProfile`] and
//! [`CodecDescription`], per-chunk decoding with frames delivered to an
//! output callback, and teardown.
//!
//! A chunk that fails to decode returns [`VidpaceError::DecodeError`]. The
//! pipeline logs it, counts it as skipped, and moves on to the next chunk.

use std::ffi::c_int;

use ffmpeg_next::{
    Packet as FfmpegPacket,
    codec::{Id, context::Context as CodecContext, packet::Flags as PacketFlags},
    decoder::Video as VideoDecoderContext,
    format::Pixel,
    frame::Video as VideoFrame,
    software::scaling::{Context as ScalingContext, Flags as ScalingFlags},
};
use image::DynamicImage;

use crate::bitstream::{CodecDescription, CodecFamily, DescriptionOrigin};
use crate::configuration::PixelFormat;
use crate::conversion::frame_to_image;
use crate::error::VidpaceError;
use crate::pacing::PacedChunk;

/// Codec string used when no H.264 SPS is available.
const FALLBACK_AVC_CODEC: &str = "avc1.42E01E";
/// Codec string for every H.265 stream (Main profile, level 3.1).
const HEVC_CODEC: &str = "hvc1.1.6.L93.B0";

/// What the decoder is asked to support.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecProfile {
    /// Bitstream family of the stream.
    pub family: CodecFamily,
    /// RFC 6381 style codec string, e.g. `avc1.64001F`.
    pub codec_string: String,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl CodecProfile {
    /// Derive a profile from the stream's description.
    ///
    /// For H.264 the profile, compatibility, and level bytes come from the
    /// `avcC` header (out-of-band) or the first SPS entry (scanned).
    pub fn new(family: CodecFamily, description: &CodecDescription, width: u32, height: u32) -> Self {
        let codec_string = match family {
            CodecFamily::H264 => avc_codec_string(description)
                .unwrap_or_else(|| FALLBACK_AVC_CODEC.to_string()),
            CodecFamily::H265 => HEVC_CODEC.to_string(),
        };
        Self {
            family,
            codec_string,
            width,
            height,
        }
    }
}

fn avc_codec_string(description: &CodecDescription) -> Option<String> {
    let profile_bytes = match description.origin() {
        DescriptionOrigin::OutOfBand => {
            let bytes = description.as_bytes();
            // avcC: configurationVersion == 1, then profile/compat/level.
            (bytes.len() >= 4 && bytes[0] == 1).then(|| [bytes[1], bytes[2], bytes[3]])
        }
        DescriptionOrigin::Scanned => description
            .entries()
            .into_iter()
            .find(|entry| entry.len() >= 4 && CodecFamily::H264.unit_type(entry[0]) == 7)
            .map(|sps| [sps[1], sps[2], sps[3]]),
        DescriptionOrigin::Empty => None,
    }?;
    Some(format!(
        "avc1.{:02X}{:02X}{:02X}",
        profile_bytes[0], profile_bytes[1], profile_bytes[2]
    ))
}

/// One decoded picture.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Output order index, from 0.
    pub index: u64,
    /// Presentation timestamp carried over from the chunk.
    pub pts: Option<i64>,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Pixels in the configured [`PixelFormat`].
    pub image: DynamicImage,
}

/// Decode contract of a hardware or software video decoder.
pub trait VideoDecoder: Send {
    /// Whether `profile` can be configured at all.
    fn is_supported(&self, profile: &CodecProfile) -> bool;

    /// Prepare for decoding. Called once before the first chunk.
    ///
    /// # Errors
    ///
    /// Returns [`VidpaceError::UnsupportedCodec`] if the decoder rejects the
    /// profile or description.
    fn configure(
        &mut self,
        profile: &CodecProfile,
        description: &CodecDescription,
    ) -> Result<(), VidpaceError>;

    /// Decode one chunk, passing any frames it completes to `output`.
    ///
    /// # Errors
    ///
    /// Returns [`VidpaceError::DecodeError`] for a chunk that cannot be
    /// decoded. The decoder must stay usable for later chunks.
    fn decode(
        &mut self,
        chunk: &PacedChunk,
        output: &mut dyn FnMut(DecodedFrame),
    ) -> Result<(), VidpaceError>;

    /// Emit frames still buffered inside the decoder.
    fn flush(&mut self, _output: &mut dyn FnMut(DecodedFrame)) -> Result<(), VidpaceError> {
        Ok(())
    }

    /// Release decoder resources. Further decodes fail.
    fn close(&mut self);
}

fn codec_id(family: CodecFamily) -> Id {
    match family {
        CodecFamily::H264 => Id::H264,
        CodecFamily::H265 => Id::HEVC,
    }
}

/// Cached scaler keyed by its source geometry.
struct Scaler {
    context: ScalingContext,
    source: (Pixel, u32, u32),
}

/// Software [`VideoDecoder`] backed by libavcodec.
///
/// Frames are converted to the configured [`PixelFormat`] at their coded
/// size.
pub struct FfmpegDecoder {
    pixel_format: PixelFormat,
    decoder: Option<VideoDecoderContext>,
    scaler: Option<Scaler>,
    decoded: VideoFrame,
    frames_out: u64,
}

// SAFETY: the decoder, scaler, and frame are owned exclusively by this value
// and are only touched through `&mut self`; no FFmpeg state is shared with
// another thread.
unsafe impl Send for FfmpegDecoder {}

impl FfmpegDecoder {
    /// A decoder producing frames in `pixel_format`. Nothing is opened until
    /// [`configure`](VideoDecoder::configure).
    pub fn new(pixel_format: PixelFormat) -> Self {
        Self {
            pixel_format,
            decoder: None,
            scaler: None,
            decoded: VideoFrame::empty(),
            frames_out: 0,
        }
    }

    fn drain(&mut self, output: &mut dyn FnMut(DecodedFrame)) -> Result<(), VidpaceError> {
        let Some(decoder) = self.decoder.as_mut() else {
            return Ok(());
        };
        while decoder.receive_frame(&mut self.decoded).is_ok() {
            let image = scale(&mut self.scaler, &self.decoded, self.pixel_format)?;
            output(DecodedFrame {
                index: self.frames_out,
                pts: self.decoded.pts(),
                width: self.decoded.width(),
                height: self.decoded.height(),
                image,
            });
            self.frames_out += 1;
        }
        Ok(())
    }
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self::new(PixelFormat::default())
    }
}

fn scale(
    scaler: &mut Option<Scaler>,
    frame: &VideoFrame,
    pixel_format: PixelFormat,
) -> Result<DynamicImage, VidpaceError> {
    let source = (frame.format(), frame.width(), frame.height());
    if scaler.as_ref().is_none_or(|existing| existing.source != source) {
        let context = ScalingContext::get(
            source.0,
            source.1,
            source.2,
            pixel_format.to_ffmpeg_pixel(),
            source.1,
            source.2,
            ScalingFlags::BILINEAR,
        )?;
        *scaler = Some(Scaler { context, source });
    }

    let mut scaled = VideoFrame::empty();
    if let Some(active) = scaler.as_mut() {
        active.context.run(frame, &mut scaled)?;
    }
    frame_to_image(&scaled, pixel_format)
}

/// Attach `bytes` as codec extradata, padded as libavcodec requires.
///
/// The buffer is freed by `avcodec_free_context` when the context drops.
fn set_extradata(context: &mut CodecContext, bytes: &[u8]) -> Result<(), VidpaceError> {
    let padded = bytes.len() + ffmpeg_sys_next::AV_INPUT_BUFFER_PADDING_SIZE as usize;
    // SAFETY: the allocation is zeroed, large enough for `bytes` plus
    // padding, and handed to the codec context which takes ownership.
    unsafe {
        let buffer = ffmpeg_sys_next::av_mallocz(padded) as *mut u8;
        if buffer.is_null() {
            return Err(VidpaceError::FfmpegError(
                "Failed to allocate codec extradata".to_string(),
            ));
        }
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), buffer, bytes.len());
        let raw = context.as_mut_ptr();
        (*raw).extradata = buffer;
        (*raw).extradata_size = bytes.len() as c_int;
    }
    Ok(())
}

impl VideoDecoder for FfmpegDecoder {
    fn is_supported(&self, profile: &CodecProfile) -> bool {
        crate::ffmpeg::initialize().is_ok() && ffmpeg_next::decoder::find(codec_id(profile.family)).is_some()
    }

    fn configure(
        &mut self,
        profile: &CodecProfile,
        description: &CodecDescription,
    ) -> Result<(), VidpaceError> {
        let unsupported = |reason: String| VidpaceError::UnsupportedCodec {
            codec: profile.codec_string.clone(),
            reason,
        };

        let codec = ffmpeg_next::decoder::find(codec_id(profile.family))
            .ok_or_else(|| unsupported("no decoder available".to_string()))?;
        let mut context = CodecContext::new_with_codec(codec);

        // Out-of-band bytes are already in the container's native layout;
        // scanned parameter sets are handed over as Annex B.
        let extradata = description.to_annex_b();
        if !extradata.is_empty() {
            set_extradata(&mut context, &extradata)?;
        }

        let decoder = context
            .decoder()
            .video()
            .map_err(|error| unsupported(error.to_string()))?;

        log::debug!(
            "Configured {} decoder ({}, {} bytes of {:?} description)",
            profile.family,
            profile.codec_string,
            description.as_bytes().len(),
            description.origin(),
        );
        self.decoder = Some(decoder);
        self.scaler = None;
        self.frames_out = 0;
        Ok(())
    }

    fn decode(
        &mut self,
        chunk: &PacedChunk,
        output: &mut dyn FnMut(DecodedFrame),
    ) -> Result<(), VidpaceError> {
        let decoder = self
            .decoder
            .as_mut()
            .ok_or_else(|| VidpaceError::DecodeError("decoder is not configured".to_string()))?;

        let mut packet = FfmpegPacket::copy(&chunk.payload);
        packet.set_pts(chunk.pts);
        if chunk.is_keyframe {
            packet.set_flags(PacketFlags::KEY);
        }

        decoder.send_packet(&packet).map_err(|error| {
            VidpaceError::DecodeError(format!("chunk {}: {error}", chunk.sequence_number))
        })?;
        self.drain(output)
    }

    fn flush(&mut self, output: &mut dyn FnMut(DecodedFrame)) -> Result<(), VidpaceError> {
        if let Some(decoder) = self.decoder.as_mut() {
            decoder.send_eof()?;
        }
        self.drain(output)
    }

    fn close(&mut self) {
        if self.decoder.take().is_some() {
            log::debug!("Closed decoder after {} frame(s)", self.frames_out);
        }
        self.scaler = None;
    }
}
