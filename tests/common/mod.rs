//! Synthetic demuxer, decoder, sink, and clock shared by the integration
//! tests. None of them touch FFmpeg.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use image::DynamicImage;
use vidpace::{
    Clock, CodecDescription, CodecFamily, CodecProfile, DecodedFrame, Demuxer, FrameSink,
    PacedChunk, Packet, StreamDescriptor, StreamRole, VideoDecoder, VidpaceError,
};

pub const SPS: &[u8] = &[0x67, 0x64, 0x00, 0x1F, 0xAC, 0xD9];
pub const PPS: &[u8] = &[0x68, 0xEE, 0x3C, 0x80];
pub const IDR: &[u8] = &[0x65, 0x88, 0x84, 0x00, 0x33];
pub const SLICE: &[u8] = &[0x41, 0x9A, 0x02, 0x11];

/// Join units with 4-byte start codes.
pub fn annex_b(units: &[&[u8]]) -> Vec<u8> {
    let mut payload = Vec::new();
    for unit in units {
        payload.extend_from_slice(&[0, 0, 0, 1]);
        payload.extend_from_slice(unit);
    }
    payload
}

pub fn video_stream(index: usize, extradata: Option<Vec<u8>>) -> StreamDescriptor {
    StreamDescriptor {
        index,
        role: StreamRole::Video,
        codec_name: "h264".to_string(),
        family: Some(CodecFamily::H264),
        width: 1280,
        height: 720,
        extradata,
    }
}

pub fn audio_stream(index: usize) -> StreamDescriptor {
    StreamDescriptor {
        index,
        role: StreamRole::Audio,
        codec_name: "aac".to_string(),
        family: None,
        width: 0,
        height: 0,
        extradata: None,
    }
}

pub fn packet(stream_index: usize, payload: Vec<u8>, container_keyframe: bool) -> Packet {
    Packet {
        stream_index,
        payload,
        container_keyframe,
        pts: None,
    }
}

/// Replays a fixed list of packets (or errors).
pub struct ScriptedDemuxer {
    streams: Vec<StreamDescriptor>,
    packets: VecDeque<Result<Packet, VidpaceError>>,
    pub reads: usize,
}

impl ScriptedDemuxer {
    pub fn new(streams: Vec<StreamDescriptor>, packets: Vec<Packet>) -> Self {
        Self {
            streams,
            packets: packets.into_iter().map(Ok).collect(),
            reads: 0,
        }
    }

    pub fn push_error(&mut self, error: VidpaceError) {
        self.packets.push_back(Err(error));
    }
}

impl Demuxer for ScriptedDemuxer {
    fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    fn next_packet(&mut self) -> Result<Option<Packet>, VidpaceError> {
        self.reads += 1;
        self.packets.pop_front().transpose()
    }
}

/// 1000 packets: 400 on video stream 0 (40 of them keyframes), the rest on
/// audio stream 1. Half the keyframes carry only the container flag, the
/// other half only an IDR in the bitstream.
pub fn thousand_packet_demuxer() -> ScriptedDemuxer {
    let mut packets = Vec::new();
    let mut video_index = 0u32;
    for n in 0..1000u32 {
        if n % 5 >= 2 {
            packets.push(packet(1, vec![0xFF, 0xF1, 0x50], false));
            continue;
        }
        let (payload, flagged) = match video_index % 20 {
            0 => (annex_b(&[SLICE]), true),
            10 => (annex_b(&[SPS, PPS, IDR]), false),
            _ => (annex_b(&[SLICE]), false),
        };
        packets.push(packet(0, payload, flagged));
        video_index += 1;
    }
    ScriptedDemuxer::new(vec![video_stream(0, None), audio_stream(1)], packets)
}

#[derive(Debug, Default)]
pub struct DecoderLog {
    pub supported_queries: u32,
    pub configured: Option<(CodecProfile, CodecDescription)>,
    pub decoded: Vec<u64>,
    pub flushed: bool,
    pub closed: bool,
}

/// Emits one 2x2 frame per chunk, except for chunks listed in `fail_on`.
pub struct RecordingDecoder {
    pub log: Arc<Mutex<DecoderLog>>,
    supported: bool,
    fail_on: Vec<u64>,
    stall: Option<(u64, Duration)>,
}

impl RecordingDecoder {
    pub fn new() -> (Self, Arc<Mutex<DecoderLog>>) {
        let log = Arc::new(Mutex::new(DecoderLog::default()));
        (
            Self {
                log: Arc::clone(&log),
                supported: true,
                fail_on: Vec::new(),
                stall: None,
            },
            log,
        )
    }

    pub fn unsupported(mut self) -> Self {
        self.supported = false;
        self
    }

    pub fn failing_on(mut self, sequence_numbers: &[u64]) -> Self {
        self.fail_on = sequence_numbers.to_vec();
        self
    }

    /// Block inside `decode` for `pause` when chunk `sequence_number` arrives.
    pub fn stalling_on(mut self, sequence_number: u64, pause: Duration) -> Self {
        self.stall = Some((sequence_number, pause));
        self
    }
}

impl VideoDecoder for RecordingDecoder {
    fn is_supported(&self, _profile: &CodecProfile) -> bool {
        self.log.lock().unwrap().supported_queries += 1;
        self.supported
    }

    fn configure(
        &mut self,
        profile: &CodecProfile,
        description: &CodecDescription,
    ) -> Result<(), VidpaceError> {
        self.log.lock().unwrap().configured = Some((profile.clone(), description.clone()));
        Ok(())
    }

    fn decode(
        &mut self,
        chunk: &PacedChunk,
        output: &mut dyn FnMut(DecodedFrame),
    ) -> Result<(), VidpaceError> {
        if let Some((sequence_number, pause)) = self.stall
            && sequence_number == chunk.sequence_number
        {
            std::thread::sleep(pause);
        }
        if self.fail_on.contains(&chunk.sequence_number) {
            return Err(VidpaceError::DecodeError(format!(
                "corrupt chunk {}",
                chunk.sequence_number
            )));
        }
        self.log.lock().unwrap().decoded.push(chunk.sequence_number);
        output(DecodedFrame {
            index: chunk.sequence_number,
            pts: chunk.pts,
            width: 2,
            height: 2,
            image: DynamicImage::new_rgb8(2, 2),
        });
        Ok(())
    }

    fn flush(&mut self, _output: &mut dyn FnMut(DecodedFrame)) -> Result<(), VidpaceError> {
        self.log.lock().unwrap().flushed = true;
        Ok(())
    }

    fn close(&mut self) {
        self.log.lock().unwrap().closed = true;
    }
}

/// Collects frame indices.
#[derive(Clone, Default)]
pub struct CollectingSink {
    pub frames: Arc<Mutex<Vec<u64>>>,
}

impl FrameSink for CollectingSink {
    fn accept_frame(&mut self, frame: DecodedFrame) -> Result<(), VidpaceError> {
        self.frames.lock().unwrap().push(frame.index);
        Ok(())
    }
}

/// Deterministic clock advanced by a fixed step per tick.
pub struct ManualClock {
    pub now: Instant,
    pub step: Duration,
}

impl ManualClock {
    pub fn new(start: Instant, step: Duration) -> Self {
        Self { now: start, step }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now
    }

    fn wait_for_tick(&mut self) {
        self.now += self.step;
    }
}
