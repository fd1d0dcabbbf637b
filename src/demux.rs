//! Container demultiplexing.
//!
//! [`Demuxer`] is the packet-iteration contract the ingestion loop consumes.
//! [`FfmpegDemuxer`] implements it with libavformat reading through a
//! [`ByteSource`]: opening the container and the initial stream-analysis
//! pass both happen in [`FfmpegDemuxer::open`], and the format context is
//! released when the demuxer is dropped.
//!
//! # Example
//!
//! ```no_run
//! use vidpace::{ContainerFormat, Demuxer, FfmpegDemuxer, MemorySource};
//!
//! let bytes = std::fs::read("input.ts")?;
//! let mut demuxer = FfmpegDemuxer::open(Box::new(MemorySource::new(bytes)), ContainerFormat::TransportStream)?;
//! for stream in demuxer.streams() {
//!     println!("#{} {:?} {}", stream.index, stream.role, stream.codec_name);
//! }
//! while let Some(packet) = demuxer.next_packet()? {
//!     println!("stream {} size {}", packet.stream_index, packet.size());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::ffi::{CString, c_int};
use std::fmt::{Debug, Formatter, Result as FmtResult};

use ffmpeg_next::{
    Error as FfmpegError, Packet as FfmpegPacket, codec::Id, format::context::Input,
    format::stream::Stream, media::Type,
};

use crate::avio::SourceIo;
use crate::bitstream::CodecFamily;
use crate::error::VidpaceError;
use crate::format::ContainerFormat;
use crate::source::ByteSource;

/// What a container stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamRole {
    Video,
    Audio,
    Other,
}

/// One container stream as reported by the initial analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    /// Container stream index.
    pub index: usize,
    /// Media kind of the stream.
    pub role: StreamRole,
    /// FFmpeg codec name (e.g. `"h264"`, `"hevc"`, `"aac"`).
    pub codec_name: String,
    /// Bitstream family, when the codec is one of the supported two.
    pub family: Option<CodecFamily>,
    /// Coded width; `0` for non-video streams.
    pub width: u32,
    /// Coded height; `0` for non-video streams.
    pub height: u32,
    /// Out-of-band decoder configuration (e.g. `avcC`/`hvcC`), if any.
    pub extradata: Option<Vec<u8>>,
}

/// One demuxed packet with an owned copy of its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Index of the stream this packet belongs to.
    pub stream_index: usize,
    /// Packet bytes as stored in the container.
    pub payload: Vec<u8>,
    /// The container marked this packet as a sync point.
    pub container_keyframe: bool,
    /// Presentation timestamp in the stream time base.
    pub pts: Option<i64>,
}

impl Packet {
    /// Payload length in bytes.
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// Packet-iteration contract of a demultiplexer.
///
/// Streams are fully analysed before the first call to
/// [`next_packet`](Demuxer::next_packet). Resources are released on drop.
pub trait Demuxer {
    /// Stream descriptors in index order.
    fn streams(&self) -> &[StreamDescriptor];

    /// Next packet, `Ok(None)` at end of stream.
    ///
    /// # Errors
    ///
    /// Any other failure is fatal and reported as
    /// [`VidpaceError::PacketRead`].
    fn next_packet(&mut self) -> Result<Option<Packet>, VidpaceError>;

    /// Total bytes behind the container, when known.
    fn source_size(&self) -> u64 {
        0
    }
}

/// libavformat-backed [`Demuxer`].
pub struct FfmpegDemuxer {
    // Declared before `io`: the format context must be closed before the
    // I/O context it reads from is freed.
    input: Input,
    io: SourceIo,
    streams: Vec<StreamDescriptor>,
    format: ContainerFormat,
}

impl Debug for FfmpegDemuxer {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("FfmpegDemuxer")
            .field("format", &self.format)
            .field("streams", &self.streams)
            .finish_non_exhaustive()
    }
}

impl FfmpegDemuxer {
    /// Open `source` with the given grammar and analyse its streams.
    ///
    /// # Errors
    ///
    /// Returns [`VidpaceError::StreamOpen`] if FFmpeg cannot open the
    /// container or its stream analysis fails.
    pub fn open(source: Box<dyn ByteSource>, format: ContainerFormat) -> Result<Self, VidpaceError> {
        let open_error = |reason: String| VidpaceError::StreamOpen {
            format: format.ffmpeg_name().to_string(),
            reason,
        };

        crate::ffmpeg::initialize().map_err(|error| open_error(error.to_string()))?;

        let io = SourceIo::new(source)?;
        let format_name =
            CString::new(format.ffmpeg_name()).map_err(|error| open_error(error.to_string()))?;

        log::debug!("Opening {format} container ({} bytes)", io.size());

        // SAFETY: the format context is allocated here, given our custom
        // `pb`, and flagged so libavformat never closes it. On failure
        // `avformat_open_input` frees the context itself; after a failed
        // stream analysis it is closed explicitly. On success ownership
        // moves into `Input`, which closes it on drop.
        let input = unsafe {
            let mut context = ffmpeg_sys_next::avformat_alloc_context();
            if context.is_null() {
                return Err(open_error("failed to allocate format context".to_string()));
            }
            (*context).pb = io.as_ptr();
            (*context).flags |= ffmpeg_sys_next::AVFMT_FLAG_CUSTOM_IO as c_int;

            let input_format = ffmpeg_sys_next::av_find_input_format(format_name.as_ptr());
            let result = ffmpeg_sys_next::avformat_open_input(
                &mut context,
                std::ptr::null(),
                input_format,
                std::ptr::null_mut(),
            );
            if result < 0 {
                return Err(open_error(FfmpegError::from(result).to_string()));
            }

            let result = ffmpeg_sys_next::avformat_find_stream_info(context, std::ptr::null_mut());
            if result < 0 {
                ffmpeg_sys_next::avformat_close_input(&mut context);
                return Err(open_error(format!(
                    "stream analysis failed: {}",
                    FfmpegError::from(result)
                )));
            }

            Input::wrap(context)
        };

        let streams: Vec<StreamDescriptor> = input.streams().map(|stream| describe(&stream)).collect();
        for stream in &streams {
            log::debug!(
                "Stream #{}: {:?} {} {}x{} (extradata: {} bytes)",
                stream.index,
                stream.role,
                stream.codec_name,
                stream.width,
                stream.height,
                stream.extradata.as_ref().map_or(0, Vec::len),
            );
        }

        Ok(Self {
            input,
            io,
            streams,
            format,
        })
    }

    /// The grammar this demuxer was opened with.
    pub fn format(&self) -> ContainerFormat {
        self.format
    }
}

fn family_of(id: Id) -> Option<CodecFamily> {
    match id {
        Id::H264 => Some(CodecFamily::H264),
        Id::HEVC => Some(CodecFamily::H265),
        _ => None,
    }
}

fn describe(stream: &Stream) -> StreamDescriptor {
    let parameters = stream.parameters();
    let role = match parameters.medium() {
        Type::Video => StreamRole::Video,
        Type::Audio => StreamRole::Audio,
        _ => StreamRole::Other,
    };
    let id = parameters.id();

    // SAFETY: the parameters pointer is valid while `stream` is borrowed and
    // the extradata slice is copied out before returning.
    let (width, height, extradata) = unsafe {
        let raw = parameters.as_ptr();
        let extradata = if (*raw).extradata.is_null() || (*raw).extradata_size <= 0 {
            None
        } else {
            Some(
                std::slice::from_raw_parts((*raw).extradata, (*raw).extradata_size as usize)
                    .to_vec(),
            )
        };
        ((*raw).width.max(0) as u32, (*raw).height.max(0) as u32, extradata)
    };

    StreamDescriptor {
        index: stream.index(),
        role,
        codec_name: id.name().to_string(),
        family: family_of(id),
        width,
        height,
        extradata,
    }
}

impl Demuxer for FfmpegDemuxer {
    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn next_packet(&mut self) -> Result<Option<Packet>, VidpaceError> {
        let mut packet = FfmpegPacket::empty();
        match packet.read(&mut self.input) {
            // The payload is copied: the FFmpeg packet is released on return.
            Ok(()) => Ok(Some(Packet {
                stream_index: packet.stream(),
                payload: packet.data().map(<[u8]>::to_vec).unwrap_or_default(),
                container_keyframe: packet.is_key(),
                pts: packet.pts(),
            })),
            Err(FfmpegError::Eof) => Ok(None),
            Err(error) => Err(VidpaceError::PacketRead(error.to_string())),
        }
    }

    fn source_size(&self) -> u64 {
        self.io.size()
    }
}

impl Drop for FfmpegDemuxer {
    fn drop(&mut self) {
        log::debug!("Releasing {} demuxer", self.format);
    }
}
