//! # Frames - decoder output and delivered records
//!
//! Two layers live here:
//! - what a `StreamDecoder` produces (`DecodedFrame`, `RawPicture`, `RawAudio`),
//!   still in stream time-base units and native layout
//! - what the consumer receives (`VideoFrame`, `AudioBuffer`), normalized,
//!   timestamped and ready to present
//!
//! Pixel and sample data are `Bytes`, so the loop cache, the normalizer and
//! the delivery callback share one allocation. Callbacks get `&VideoFrame`;
//! cloning one is a refcount bump, never a copy.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::pixel_convert::{ColorRange, ColorSpace, PixelFormat};

// ============================================================================
// Decoder Output
// ============================================================================

/// One plane of a decoded picture.
///
/// `data` always starts at the lowest address. A negative stride means the
/// rows are stored bottom-up: the top row is the last one in memory.
#[derive(Debug, Clone)]
pub struct PicturePlane {
    pub data: Bytes,
    pub stride: isize,
}

impl PicturePlane {
    pub fn new(data: Bytes, stride: usize) -> Self {
        Self {
            data,
            stride: stride as isize,
        }
    }

    /// Row `row` counted from the top of the image.
    pub fn row(&self, row: usize, rows: usize) -> &[u8] {
        let pitch = self.stride.unsigned_abs();
        if pitch == 0 || row >= rows {
            return &[];
        }
        let index = if self.stride < 0 { rows - 1 - row } else { row };
        let start = index * pitch;
        let end = (start + pitch).min(self.data.len());
        self.data.get(start..end).unwrap_or(&[])
    }
}

#[derive(Debug, Clone)]
pub struct RawPicture {
    pub planes: Vec<PicturePlane>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub color_space: ColorSpace,
    /// What the decoder reports. `Default` when it reports nothing.
    pub color_range: ColorRange,
    pub keyframe: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    U8,
    S16,
    S32,
    F32,
    U8Planar,
    S16Planar,
    S32Planar,
    F32Planar,
    F64,
    F64Planar,
}

impl SampleFormat {
    /// Formats the consumer can mix. Buffers in anything else are dropped.
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::F64 | Self::F64Planar)
    }

    pub fn is_planar(&self) -> bool {
        matches!(
            self,
            Self::U8Planar | Self::S16Planar | Self::S32Planar | Self::F32Planar | Self::F64Planar
        )
    }

    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::U8 | Self::U8Planar => 1,
            Self::S16 | Self::S16Planar => 2,
            Self::S32 | Self::S32Planar | Self::F32 | Self::F32Planar => 4,
            Self::F64 | Self::F64Planar => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeakerLayout {
    Unknown,
    Mono,
    Stereo,
    TwoPointOne,
    FourPointZero,
    FourPointOne,
    FivePointOne,
    SevenPointOne,
}

impl SpeakerLayout {
    pub fn from_channels(channels: u32) -> Self {
        match channels {
            1 => Self::Mono,
            2 => Self::Stereo,
            3 => Self::TwoPointOne,
            4 => Self::FourPointZero,
            5 => Self::FourPointOne,
            6 => Self::FivePointOne,
            8 => Self::SevenPointOne,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RawAudio {
    /// One plane per channel for planar formats, a single plane otherwise
    pub planes: Vec<Bytes>,
    pub sample_rate: u32,
    pub channels: u32,
    pub format: SampleFormat,
    pub frames: u32,
}

#[derive(Debug, Clone)]
pub enum FramePayload {
    Video(RawPicture),
    Audio(RawAudio),
}

/// A frame as produced by a decoder, timed in its stream's time base.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub pts: Option<i64>,
    /// 0 when unknown
    pub duration: i64,
    pub payload: FramePayload,
}

// ============================================================================
// Delivered Records
// ============================================================================

#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub planes: Vec<Bytes>,
    pub linesize: Vec<usize>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Row-major YUV to RGB matrix
    pub color_matrix: [f32; 16],
    pub color_range_min: [f32; 3],
    pub color_range_max: [f32; 3],
    pub full_range: bool,
    /// Delivery time in nanoseconds since the clock epoch
    pub timestamp: i64,
    /// Rows are stored bottom-up
    pub flip: bool,
    /// Colour values are linear, alpha is not premultiplied in gamma space
    pub linear_alpha: bool,
    /// Decode-time PTS in the session clock, kept for replay
    pub dec_pts: i64,
}

impl VideoFrame {
    /// Bytes held by the planes.
    pub fn byte_size(&self) -> usize {
        self.planes.iter().map(|p| p.len()).sum()
    }
}

#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub planes: Vec<Bytes>,
    /// Decoder rate scaled by the playback speed
    pub samples_per_sec: u32,
    pub speakers: SpeakerLayout,
    pub format: SampleFormat,
    pub frames: u32,
    pub timestamp: i64,
    pub dec_frame_pts: i64,
}

impl AudioBuffer {
    pub fn byte_size(&self) -> usize {
        self.planes.iter().map(|p| p.len()).sum()
    }

    /// Wrap decoder output. `None` for sample formats the consumer can't mix.
    pub fn from_raw(raw: &RawAudio, speed_percent: u32, dec_frame_pts: i64) -> Option<Self> {
        if !raw.format.is_supported() {
            return None;
        }
        let samples_per_sec = (raw.sample_rate as u64 * speed_percent as u64 / 100) as u32;
        Some(Self {
            planes: raw.planes.clone(),
            samples_per_sec,
            speakers: SpeakerLayout::from_channels(raw.channels),
            format: raw.format,
            frames: raw.frames,
            timestamp: 0,
            dec_frame_pts,
        })
    }
}
