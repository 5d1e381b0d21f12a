//! Synthetic test source.
//!
//! Colour bars and a sine tone, muxed by presentation time. Every knob maps
//! to a condition real sources produce: bottom-up pictures, timestamp jumps,
//! slow or failing reads, undeliverable sample formats, streams joined
//! mid-GOP. Used by the test suite and by `reel --pattern`.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::MediaConfig;
use crate::control::Interrupt;
use crate::decode::{Decoded, StreamDecoder};
use crate::demuxer::{Demuxer, Packet, Rational, StreamInfo, StreamKind, NANOS_PER_SEC};
use crate::error::{MediaError, Result};
use crate::frame::{DecodedFrame, FramePayload, PicturePlane, RawAudio, RawPicture, SampleFormat};
use crate::pixel_convert::{ColorRange, ColorSpace, PixelFormat};
use crate::source::{MediaOpener, OpenedMedia};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioPattern {
    pub sample_rate: u32,
    pub channels: u32,
    pub frames_per_packet: u32,
    pub tone_hz: f32,
}

impl Default for AudioPattern {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            channels: 2,
            frames_per_packet: 960,
            tone_hz: 440.0,
        }
    }
}

/// Both streams jump forward by `by_ms` from `at_ms` on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtsJump {
    pub at_ms: u64,
    pub by_ms: u64,
}

/// Every read after the first `after_packets` blocks for `delay_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stall {
    pub after_packets: u64,
    pub delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternSpec {
    pub video: bool,
    pub width: u32,
    pub height: u32,
    pub frame_rate: Rational,
    pub pixel_format: PixelFormat,
    pub bottom_up: bool,
    pub keyframe_interval: u32,
    /// Frames before the first keyframe
    pub leading_non_keyframes: u32,
    /// Overrides the frame count the container reports
    pub report_frame_count: Option<u64>,
    pub audio: Option<AudioPattern>,
    /// Every n-th audio packet decodes to 64-bit float
    pub unsupported_audio_every: Option<u32>,
    pub duration_ms: u64,
    pub pts_jump: Option<PtsJump>,
    pub stall: Option<Stall>,
    /// Reads fail once this many packets were read
    pub fail_at_packet: Option<u64>,
    pub seekable: bool,
}

impl Default for PatternSpec {
    fn default() -> Self {
        Self {
            video: true,
            width: 64,
            height: 36,
            frame_rate: Rational::new(25, 1),
            pixel_format: PixelFormat::YUV420P,
            bottom_up: false,
            keyframe_interval: 12,
            leading_non_keyframes: 0,
            report_frame_count: None,
            audio: Some(AudioPattern::default()),
            unsupported_audio_every: None,
            duration_ms: 1_000,
            pts_jump: None,
            stall: None,
            fail_at_packet: None,
            seekable: true,
        }
    }
}

impl PatternSpec {
    fn duration_ns(&self) -> i64 {
        (self.duration_ms as i64).saturating_mul(1_000_000)
    }

    fn video_time_base(&self) -> Rational {
        Rational::new(self.frame_rate.den, self.frame_rate.num)
    }

    fn video_frames(&self) -> u64 {
        let tb = self.video_time_base();
        let frame_ns = tb.rescale_ns(1).max(1);
        div_ceil(self.duration_ns(), frame_ns)
    }

    fn is_keyframe(&self, index: u64) -> bool {
        let lead = self.leading_non_keyframes as u64;
        index >= lead && (index - lead) % self.keyframe_interval.max(1) as u64 == 0
    }

    /// Last keyframe at or before `index`.
    fn keyframe_before(&self, index: u64) -> u64 {
        (0..=index).rev().find(|i| self.is_keyframe(*i)).unwrap_or(0)
    }

    fn jumped(&self, natural_ns: i64) -> i64 {
        match self.pts_jump {
            Some(jump) if natural_ns >= jump.at_ms as i64 * 1_000_000 => {
                natural_ns + jump.by_ms as i64 * 1_000_000
            }
            _ => natural_ns,
        }
    }
}

fn div_ceil(value: i64, step: i64) -> u64 {
    if value <= 0 || step <= 0 {
        return 0;
    }
    ((value + step - 1) / step) as u64
}

pub struct PatternOpener {
    spec: PatternSpec,
}

impl PatternOpener {
    pub fn new(spec: PatternSpec) -> Self {
        Self { spec }
    }
}

impl MediaOpener for PatternOpener {
    fn name(&self) -> &str {
        "pattern"
    }

    fn open(&self, config: &MediaConfig, interrupt: &Interrupt) -> Result<OpenedMedia> {
        let spec = &self.spec;
        if spec.video && !spec.frame_rate.is_valid() {
            return Err(MediaError::open(&config.path, "pattern frame rate must be positive"));
        }
        if let Some(audio) = spec.audio {
            if audio.sample_rate == 0 || audio.channels == 0 || audio.frames_per_packet == 0 {
                return Err(MediaError::open(&config.path, "pattern audio needs rate, channels and packet size"));
            }
        }

        if config.hardware_decoding {
            debug!("Hardware decoding requested for '{}', pattern frames are generated in software", config.path);
        }

        let demuxer = PatternDemuxer::new(spec.clone(), interrupt.clone(), config.effective_buffering());
        let video = demuxer.video_index.map(|index| {
            Box::new(PatternVideoDecoder::new(spec.clone(), index)) as Box<dyn StreamDecoder>
        });
        let audio = match (demuxer.audio_index, spec.audio) {
            (Some(index), Some(pattern)) => Some(Box::new(PatternAudioDecoder::new(
                pattern,
                index,
                spec.unsupported_audio_every,
            )) as Box<dyn StreamDecoder>),
            _ => None,
        };

        debug!(
            "Pattern source: {} packets over {} ms",
            demuxer.schedule.len(),
            spec.duration_ms
        );
        Ok(OpenedMedia {
            demuxer: Box::new(demuxer),
            video,
            audio,
        })
    }
}

// ============================================================================
// Demuxer
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Slot {
    kind: StreamKind,
    index: u64,
    start_ns: i64,
}

pub struct PatternDemuxer {
    spec: PatternSpec,
    streams: Vec<StreamInfo>,
    video_index: Option<usize>,
    audio_index: Option<usize>,
    schedule: Vec<Slot>,
    cursor: usize,
    packets_read: u64,
    interrupt: Interrupt,
    /// Network-style read-ahead bound in bytes, streamed sources only
    read_ahead: Option<usize>,
    prefetched: VecDeque<Packet>,
    prefetched_bytes: usize,
}

impl PatternDemuxer {
    fn new(spec: PatternSpec, interrupt: Interrupt, read_ahead: Option<usize>) -> Self {
        let mut streams = Vec::new();
        let mut schedule = Vec::new();
        let mut video_index = None;
        let mut audio_index = None;

        if spec.video {
            let tb = spec.video_time_base();
            let frames = spec.video_frames();
            let mut info = StreamInfo::new(streams.len(), StreamKind::Video, "pattern-video", tb);
            info.width = spec.width;
            info.height = spec.height;
            info.frame_rate = Some(spec.frame_rate);
            info.frame_count = spec.report_frame_count.or(Some(frames));
            info.pixel_format = Some(spec.pixel_format);
            video_index = Some(info.index);
            streams.push(info);

            schedule.extend((0..frames).map(|index| Slot {
                kind: StreamKind::Video,
                index,
                start_ns: tb.rescale_ns(index as i64),
            }));
        }

        if let Some(audio) = spec.audio {
            let tb = Rational::new(1, audio.sample_rate as i64);
            let mut info = StreamInfo::new(streams.len(), StreamKind::Audio, "pattern-audio", tb);
            info.sample_rate = audio.sample_rate;
            info.channels = audio.channels;
            audio_index = Some(info.index);
            streams.push(info);

            let packet_ns = tb.rescale_ns(audio.frames_per_packet as i64).max(1);
            let packets = div_ceil(spec.duration_ns(), packet_ns);
            schedule.extend((0..packets).map(|index| Slot {
                kind: StreamKind::Audio,
                index,
                start_ns: tb.rescale_ns(index as i64 * audio.frames_per_packet as i64),
            }));
        }

        // Container order: by time, video first on ties
        schedule.sort_by_key(|slot| (slot.start_ns, slot.kind != StreamKind::Video));

        Self {
            spec,
            streams,
            video_index,
            audio_index,
            schedule,
            cursor: 0,
            packets_read: 0,
            interrupt,
            read_ahead,
            prefetched: VecDeque::new(),
            prefetched_bytes: 0,
        }
    }

    /// Bytes read ahead of the consumer.
    pub fn buffered_bytes(&self) -> usize {
        self.prefetched_bytes
    }

    fn next_scheduled(&mut self) -> Result<Option<Packet>> {
        self.interrupt.check()?;

        if let Some(limit) = self.spec.fail_at_packet {
            if self.packets_read >= limit {
                return Err(MediaError::Io(format!("pattern source failed after {} packets", limit)));
            }
        }
        if let Some(stall) = self.spec.stall {
            if self.packets_read >= stall.after_packets {
                self.interrupt.wait(Duration::from_millis(stall.delay_ms))?;
            }
        }

        let Some(slot) = self.schedule.get(self.cursor).copied() else {
            return Ok(None);
        };
        self.cursor += 1;
        self.packets_read += 1;

        let packet = match (slot.kind, self.spec.audio) {
            (StreamKind::Audio, Some(pattern)) => self.audio_packet(slot.index, pattern),
            _ => self.video_packet(slot.index),
        };
        Ok(Some(packet))
    }

    /// Read ahead until `limit` bytes are buffered or the source ends.
    fn fill(&mut self, limit: usize) -> Result<()> {
        while self.prefetched_bytes < limit {
            match self.next_scheduled() {
                Ok(Some(packet)) => {
                    self.prefetched_bytes += packet.data.len();
                    self.prefetched.push_back(packet);
                }
                Ok(None) => break,
                Err(e) if self.prefetched.is_empty() => return Err(e),
                // Failures are sticky and come back once the buffer drains
                Err(_) => break,
            }
        }
        Ok(())
    }

    fn video_packet(&self, index: u64) -> Packet {
        let tb = self.spec.video_time_base();
        let pts_ns = self.spec.jumped(tb.rescale_ns(index as i64));
        Packet {
            stream_index: self.video_index.unwrap_or(0),
            data: Bytes::copy_from_slice(&index.to_le_bytes()),
            pts: Some(tb.from_ns(pts_ns)),
            duration: 1,
            keyframe: self.spec.is_keyframe(index),
        }
    }

    fn audio_packet(&self, index: u64, pattern: AudioPattern) -> Packet {
        let first_sample = index * pattern.frames_per_packet as u64;
        let total = (self.spec.duration_ns() as i128 * pattern.sample_rate as i128
            / NANOS_PER_SEC as i128) as u64;
        let frames = (total.saturating_sub(first_sample)).min(pattern.frames_per_packet as u64).max(1);

        let tb = Rational::new(1, pattern.sample_rate as i64);
        let pts_ns = self.spec.jumped(tb.rescale_ns(first_sample as i64));

        let mut data = Vec::with_capacity(12);
        data.extend_from_slice(&index.to_le_bytes());
        data.extend_from_slice(&(frames as u32).to_le_bytes());
        Packet {
            stream_index: self.audio_index.unwrap_or(0),
            data: Bytes::from(data),
            pts: Some(tb.from_ns(pts_ns)),
            duration: frames as i64,
            keyframe: true,
        }
    }
}

impl Demuxer for PatternDemuxer {
    fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    fn read_packet(&mut self) -> Result<Option<Packet>> {
        let Some(limit) = self.read_ahead else {
            return self.next_scheduled();
        };

        self.interrupt.check()?;
        if self.prefetched.is_empty() {
            self.fill(limit)?;
        }
        let packet = self.prefetched.pop_front();
        if let Some(packet) = &packet {
            self.prefetched_bytes -= packet.data.len();
        }
        Ok(packet)
    }

    fn seek(&mut self, target_ns: i64) -> Result<()> {
        if !self.spec.seekable {
            return Err(MediaError::Seek("pattern source is not seekable".into()));
        }

        // Start from the keyframe that covers the target
        let from_ns = if self.spec.video && self.spec.frame_rate.is_valid() {
            let tb = self.spec.video_time_base();
            let index = tb.from_ns(target_ns.max(0)).max(0) as u64;
            tb.rescale_ns(self.spec.keyframe_before(index) as i64)
        } else {
            target_ns.max(0)
        };

        self.cursor = self
            .schedule
            .iter()
            .position(|slot| slot.start_ns >= from_ns)
            .unwrap_or(self.schedule.len());
        self.prefetched.clear();
        self.prefetched_bytes = 0;
        Ok(())
    }

    fn duration_ns(&self) -> Option<i64> {
        Some(self.spec.duration_ns())
    }

    fn is_seekable(&self) -> bool {
        self.spec.seekable
    }
}

// ============================================================================
// Video
// ============================================================================

struct PatternVideoDecoder {
    spec: PatternSpec,
    stream_index: usize,
    pending: VecDeque<DecodedFrame>,
    eof: bool,
}

impl PatternVideoDecoder {
    fn new(spec: PatternSpec, stream_index: usize) -> Self {
        Self {
            spec,
            stream_index,
            pending: VecDeque::new(),
            eof: false,
        }
    }

    fn picture(&self, frame_num: u64, keyframe: bool) -> RawPicture {
        let width = self.spec.width as usize;
        let height = self.spec.height as usize;
        let rgb = color_bars(width, height, frame_num);
        let format = self.spec.pixel_format;

        let planes = encode_planes(format, &rgb, width, height)
            .into_iter()
            .enumerate()
            .map(|(plane, data)| {
                let pitch = format.row_bytes(width, plane);
                if self.spec.bottom_up {
                    let rows = format.plane_rows(height, plane);
                    PicturePlane {
                        data: Bytes::from(flip_rows(&data, pitch, rows)),
                        stride: -(pitch as isize),
                    }
                } else {
                    PicturePlane::new(Bytes::from(data), pitch)
                }
            })
            .collect();

        RawPicture {
            planes,
            width: self.spec.width,
            height: self.spec.height,
            format,
            color_space: ColorSpace::BT601,
            color_range: ColorRange::Partial,
            keyframe,
        }
    }
}

impl StreamDecoder for PatternVideoDecoder {
    fn kind(&self) -> StreamKind {
        StreamKind::Video
    }

    fn stream_index(&self) -> usize {
        self.stream_index
    }

    fn time_base(&self) -> Rational {
        self.spec.video_time_base()
    }

    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let frame_num = packet
            .data
            .get(..8)
            .and_then(|b| b.try_into().ok())
            .map(u64::from_le_bytes)
            .ok_or_else(|| MediaError::Decode("truncated pattern packet".into()))?;

        self.pending.push_back(DecodedFrame {
            pts: packet.pts,
            duration: packet.duration,
            payload: FramePayload::Video(self.picture(frame_num, packet.keyframe)),
        });
        Ok(())
    }

    fn send_eof(&mut self) -> Result<()> {
        self.eof = true;
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Decoded> {
        Ok(match self.pending.pop_front() {
            Some(frame) => Decoded::Frame(frame),
            None if self.eof => Decoded::Drained,
            None => Decoded::NeedsInput,
        })
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.eof = false;
    }
}

/// Eight animated colour bars with a frame marker in the corner, packed RGB.
fn color_bars(width: usize, height: usize, frame_num: u64) -> Vec<u8> {
    let mut data = vec![0u8; width * height * 3];
    let offset = (frame_num % 256) as u8;

    for y in 0..height {
        for x in 0..width {
            let idx = (y * width + x) * 3;
            let bar = (x * 8 / width) as u8;
            data[idx] = ((bar & 1) * 255).wrapping_add(offset);
            data[idx + 1] = (((bar >> 1) & 1) * 255).wrapping_add(offset);
            data[idx + 2] = (((bar >> 2) & 1) * 255).wrapping_add(offset);
        }
    }

    let marker = ((frame_num * 3) % 256) as u8;
    for y in 2..(2 + 8).min(height) {
        for x in 2..(2 + 8).min(width) {
            let idx = (y * width + x) * 3;
            data[idx] = marker;
            data[idx + 1] = 255 - marker;
            data[idx + 2] = 128;
        }
    }
    data
}

/// BT.601 limited range.
fn rgb_to_yuv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let (r, g, b) = (r as f32, g as f32, b as f32);
    let y = 16.0 + (65.738 * r + 129.057 * g + 25.064 * b) / 256.0;
    let u = 128.0 + (-37.945 * r - 74.494 * g + 112.439 * b) / 256.0;
    let v = 128.0 + (112.439 * r - 94.154 * g - 18.285 * b) / 256.0;
    (
        y.round().clamp(0.0, 255.0) as u8,
        u.round().clamp(0.0, 255.0) as u8,
        v.round().clamp(0.0, 255.0) as u8,
    )
}

/// Store packed RGB as `format`, tightly packed, top-down.
fn encode_planes(format: PixelFormat, rgb: &[u8], width: usize, height: usize) -> Vec<Vec<u8>> {
    let pixel = |x: usize, y: usize| -> (u8, u8, u8) {
        let idx = (y * width + x) * 3;
        (rgb[idx], rgb[idx + 1], rgb[idx + 2])
    };
    let yuv = |x: usize, y: usize| {
        let (r, g, b) = pixel(x, y);
        rgb_to_yuv(r, g, b)
    };
    let mut planes: Vec<Vec<u8>> = (0..format.plane_count())
        .map(|p| vec![0u8; format.row_bytes(width, p) * format.plane_rows(height, p)])
        .collect();

    match format {
        PixelFormat::YUV420P
        | PixelFormat::YUV422P
        | PixelFormat::YUV444P
        | PixelFormat::YUVA420P
        | PixelFormat::YUV420P10LE => {
            let (sx, sy) = match format {
                PixelFormat::YUV444P => (1, 1),
                PixelFormat::YUV422P => (2, 1),
                _ => (2, 2),
            };
            let wide = format == PixelFormat::YUV420P10LE;
            let put = |plane: &mut Vec<u8>, pos: usize, value: u8| {
                if wide {
                    let sample = (value as u16) << 2;
                    plane[pos * 2..pos * 2 + 2].copy_from_slice(&sample.to_le_bytes());
                } else {
                    plane[pos] = value;
                }
            };
            let chroma_w = (width + sx - 1) / sx;
            let chroma_h = (height + sy - 1) / sy;

            for y in 0..height {
                for x in 0..width {
                    put(&mut planes[0], y * width + x, yuv(x, y).0);
                }
            }
            for cy in 0..chroma_h {
                for cx in 0..chroma_w {
                    let (_, u, v) = yuv(cx * sx, cy * sy);
                    put(&mut planes[1], cy * chroma_w + cx, u);
                    put(&mut planes[2], cy * chroma_w + cx, v);
                }
            }
            if format == PixelFormat::YUVA420P {
                planes[3].fill(255);
            }
        }
        PixelFormat::NV12 | PixelFormat::P010 => {
            let wide = format == PixelFormat::P010;
            let put = |plane: &mut Vec<u8>, pos: usize, value: u8| {
                if wide {
                    let sample = (value as u16) << 8;
                    plane[pos * 2..pos * 2 + 2].copy_from_slice(&sample.to_le_bytes());
                } else {
                    plane[pos] = value;
                }
            };
            let chroma_w = (width + 1) / 2;
            for y in 0..height {
                for x in 0..width {
                    put(&mut planes[0], y * width + x, yuv(x, y).0);
                }
            }
            for cy in 0..(height + 1) / 2 {
                for cx in 0..chroma_w {
                    let (_, u, v) = yuv(cx * 2, cy * 2);
                    put(&mut planes[1], cy * chroma_w * 2 + cx * 2, u);
                    put(&mut planes[1], cy * chroma_w * 2 + cx * 2 + 1, v);
                }
            }
        }
        PixelFormat::YUY2 | PixelFormat::UYVY => {
            let pitch = format.row_bytes(width, 0);
            for y in 0..height {
                for pair in 0..(width + 1) / 2 {
                    let x0 = pair * 2;
                    let x1 = (x0 + 1).min(width - 1);
                    let (y0, u, v) = yuv(x0, y);
                    let y1 = yuv(x1, y).0;
                    let at = y * pitch + pair * 4;
                    let bytes = if format == PixelFormat::YUY2 {
                        [y0, u, y1, v]
                    } else {
                        [u, y0, v, y1]
                    };
                    planes[0][at..at + 4].copy_from_slice(&bytes);
                }
            }
        }
        PixelFormat::RGB24
        | PixelFormat::BGR24
        | PixelFormat::RGBA32
        | PixelFormat::BGRA32
        | PixelFormat::BGRX32 => {
            let bpp = format.bytes_per_pixel();
            let bgr = matches!(
                format,
                PixelFormat::BGR24 | PixelFormat::BGRA32 | PixelFormat::BGRX32
            );
            for y in 0..height {
                for x in 0..width {
                    let (r, g, b) = pixel(x, y);
                    let at = (y * width + x) * bpp;
                    let out = &mut planes[0][at..at + bpp];
                    out[0] = if bgr { b } else { r };
                    out[1] = g;
                    out[2] = if bgr { r } else { b };
                    if bpp == 4 {
                        out[3] = 255;
                    }
                }
            }
        }
    }
    planes
}

/// Reverse row order so memory starts with the bottom row.
fn flip_rows(data: &[u8], pitch: usize, rows: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for row in (0..rows).rev() {
        if let Some(line) = data.get(row * pitch..(row + 1) * pitch) {
            out.extend_from_slice(line);
        }
    }
    out
}

// ============================================================================
// Audio
// ============================================================================

struct PatternAudioDecoder {
    pattern: AudioPattern,
    stream_index: usize,
    unsupported_every: Option<u32>,
    pending: VecDeque<DecodedFrame>,
    eof: bool,
}

impl PatternAudioDecoder {
    fn new(pattern: AudioPattern, stream_index: usize, unsupported_every: Option<u32>) -> Self {
        Self {
            pattern,
            stream_index,
            unsupported_every,
            pending: VecDeque::new(),
            eof: false,
        }
    }

    fn tone(&self, packet_index: u64, frames: u32) -> RawAudio {
        let unsupported = self
            .unsupported_every
            .filter(|n| *n > 0)
            .is_some_and(|n| packet_index % n as u64 == n as u64 - 1);
        let format = if unsupported {
            SampleFormat::F64Planar
        } else {
            SampleFormat::F32Planar
        };

        let first = packet_index * self.pattern.frames_per_packet as u64;
        let step = std::f64::consts::TAU * self.pattern.tone_hz as f64 / self.pattern.sample_rate as f64;
        let mut plane = Vec::with_capacity(frames as usize * format.bytes_per_sample());
        for i in 0..frames as u64 {
            let sample = ((first + i) as f64 * step).sin() * 0.25;
            if unsupported {
                plane.extend_from_slice(&sample.to_le_bytes());
            } else {
                plane.extend_from_slice(&(sample as f32).to_le_bytes());
            }
        }
        let plane = Bytes::from(plane);

        RawAudio {
            planes: vec![plane; self.pattern.channels as usize],
            sample_rate: self.pattern.sample_rate,
            channels: self.pattern.channels,
            format,
            frames,
        }
    }
}

impl StreamDecoder for PatternAudioDecoder {
    fn kind(&self) -> StreamKind {
        StreamKind::Audio
    }

    fn stream_index(&self) -> usize {
        self.stream_index
    }

    fn time_base(&self) -> Rational {
        Rational::new(1, self.pattern.sample_rate as i64)
    }

    fn send_packet(&mut self, packet: &Packet) -> Result<()> {
        let header = packet
            .data
            .get(..12)
            .ok_or_else(|| MediaError::Decode("truncated pattern packet".into()))?;
        let mut index = [0u8; 8];
        index.copy_from_slice(&header[..8]);
        let mut frames = [0u8; 4];
        frames.copy_from_slice(&header[8..12]);

        self.pending.push_back(DecodedFrame {
            pts: packet.pts,
            duration: packet.duration,
            payload: FramePayload::Audio(self.tone(u64::from_le_bytes(index), u32::from_le_bytes(frames))),
        });
        Ok(())
    }

    fn send_eof(&mut self) -> Result<()> {
        self.eof = true;
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Decoded> {
        Ok(match self.pending.pop_front() {
            Some(frame) => Decoded::Frame(frame),
            None if self.eof => Decoded::Drained,
            None => Decoded::NeedsInput,
        })
    }

    fn flush(&mut self) {
        self.pending.clear();
        self.eof = false;
    }
}
