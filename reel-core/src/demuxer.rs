//! Demuxer facade and packet routing.
//!
//! Container parsing is a backend concern behind the `Demuxer` trait. The
//! `DemuxRouter` pulls one packet at a time and queues it on the stream
//! state that owns its index.

use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::control::Interrupt;
use crate::decode::StreamState;
use crate::error::{MediaError, Result};
use crate::pixel_convert::PixelFormat;

pub const NANOS_PER_SEC: i64 = 1_000_000_000;

/// A time base or frame rate as `num / den`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub num: i64,
    pub den: i64,
}

impl Rational {
    pub const fn new(num: i64, den: i64) -> Self {
        Self { num, den }
    }

    /// Ticks in this time base to nanoseconds.
    pub fn rescale_ns(&self, ticks: i64) -> i64 {
        if self.den == 0 {
            return 0;
        }
        let ns = ticks as i128 * self.num as i128 * NANOS_PER_SEC as i128 / self.den as i128;
        ns.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    /// Nanoseconds to ticks in this time base, rounded down.
    pub fn from_ns(&self, ns: i64) -> i64 {
        if self.num == 0 {
            return 0;
        }
        let ticks = ns as i128 * self.den as i128 / (self.num as i128 * NANOS_PER_SEC as i128);
        ticks.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    pub fn as_f64(&self) -> f64 {
        if self.den == 0 {
            0.0
        } else {
            self.num as f64 / self.den as f64
        }
    }

    pub fn is_valid(&self) -> bool {
        self.num > 0 && self.den > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamKind {
    Audio,
    Video,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: StreamKind,
    pub codec: String,
    pub time_base: Rational,
    // Video
    pub width: u32,
    pub height: u32,
    pub frame_rate: Option<Rational>,
    pub frame_count: Option<u64>,
    pub pixel_format: Option<PixelFormat>,
    // Audio
    pub sample_rate: u32,
    pub channels: u32,
}

impl StreamInfo {
    pub fn new(index: usize, kind: StreamKind, codec: impl Into<String>, time_base: Rational) -> Self {
        Self {
            index,
            kind,
            codec: codec.into(),
            time_base,
            width: 0,
            height: 0,
            frame_rate: None,
            frame_count: None,
            pixel_format: None,
            sample_rate: 0,
            channels: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Packet {
    pub stream_index: usize,
    pub data: Bytes,
    /// Stream time base ticks
    pub pts: Option<i64>,
    pub duration: i64,
    pub keyframe: bool,
}

pub trait Demuxer: Send {
    fn streams(&self) -> &[StreamInfo];

    /// Next packet in container order. `Ok(None)` at clean end of stream.
    fn read_packet(&mut self) -> Result<Option<Packet>>;

    /// Reposition so the next packets start at or before `target_ns`.
    fn seek(&mut self, target_ns: i64) -> Result<()>;

    fn duration_ns(&self) -> Option<i64>;

    fn start_time_ns(&self) -> i64 {
        0
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

/// Container hint from the explicit format name or the file extension.
pub fn container_hint(path: &str, format_hint: Option<&str>) -> Option<String> {
    if let Some(hint) = format_hint.filter(|h| !h.trim().is_empty()) {
        return Some(hint.trim().to_ascii_lowercase());
    }
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

// ============================================================================
// Router
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketRoute {
    Audio,
    Video,
    Other,
    EndOfStream,
}

pub struct DemuxRouter {
    demuxer: Box<dyn Demuxer>,
    interrupt: Interrupt,
    audio_index: Option<usize>,
    video_index: Option<usize>,
}

impl DemuxRouter {
    pub fn new(
        demuxer: Box<dyn Demuxer>,
        interrupt: Interrupt,
        audio_index: Option<usize>,
        video_index: Option<usize>,
    ) -> Self {
        Self {
            demuxer,
            interrupt,
            audio_index,
            video_index,
        }
    }

    pub fn demuxer(&self) -> &dyn Demuxer {
        self.demuxer.as_ref()
    }

    /// Read one packet and queue it on the stream that owns it.
    ///
    /// Empty packets and packets for streams nobody decodes are read and
    /// discarded. Read failures other than end of stream are returned as is.
    pub fn next_packet(
        &mut self,
        audio: Option<&mut StreamState>,
        video: Option<&mut StreamState>,
    ) -> Result<PacketRoute> {
        self.interrupt.check()?;

        let packet = match self.demuxer.read_packet() {
            Ok(Some(packet)) => packet,
            Ok(None) => return Ok(PacketRoute::EndOfStream),
            Err(e) => {
                if !e.is_interrupt() {
                    warn!("Read failed: {}", e);
                }
                return Err(e);
            }
        };

        if packet.data.is_empty() {
            return Ok(PacketRoute::Other);
        }

        if Some(packet.stream_index) == self.audio_index {
            if let Some(state) = audio {
                state.push_packet(packet);
                return Ok(PacketRoute::Audio);
            }
        }
        if Some(packet.stream_index) == self.video_index {
            if let Some(state) = video {
                state.push_packet(packet);
                return Ok(PacketRoute::Video);
            }
        }
        Ok(PacketRoute::Other)
    }

    pub fn seek(&mut self, target_ns: i64) -> Result<()> {
        self.demuxer
            .seek(target_ns)
            .map_err(|e| match e {
                MediaError::Seek(_) => e,
                other => MediaError::Seek(other.to_string()),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{Decoded, StreamDecoder};
    use std::collections::VecDeque;

    struct ListDemuxer {
        streams: Vec<StreamInfo>,
        packets: VecDeque<Result<Option<Packet>>>,
    }

    impl Demuxer for ListDemuxer {
        fn streams(&self) -> &[StreamInfo] {
            &self.streams
        }
        fn read_packet(&mut self) -> Result<Option<Packet>> {
            self.packets.pop_front().unwrap_or(Ok(None))
        }
        fn seek(&mut self, _target_ns: i64) -> Result<()> {
            Err(MediaError::Io("not seekable".into()))
        }
        fn duration_ns(&self) -> Option<i64> {
            None
        }
    }

    struct NullDecoder(StreamKind, usize);

    impl StreamDecoder for NullDecoder {
        fn kind(&self) -> StreamKind {
            self.0
        }
        fn stream_index(&self) -> usize {
            self.1
        }
        fn time_base(&self) -> Rational {
            Rational::new(1, 1000)
        }
        fn send_packet(&mut self, _packet: &Packet) -> Result<()> {
            Ok(())
        }
        fn send_eof(&mut self) -> Result<()> {
            Ok(())
        }
        fn receive_frame(&mut self) -> Result<Decoded> {
            Ok(Decoded::NeedsInput)
        }
        fn flush(&mut self) {}
    }

    fn packet(stream_index: usize, len: usize) -> Result<Option<Packet>> {
        Ok(Some(Packet {
            stream_index,
            data: Bytes::from(vec![0u8; len]),
            pts: Some(0),
            duration: 1,
            keyframe: true,
        }))
    }

    fn state(kind: StreamKind, index: usize) -> StreamState {
        StreamState::new(Box::new(NullDecoder(kind, index)), None, 100)
    }

    #[test]
    fn test_rational_rescale() {
        let tb = Rational::new(1, 90_000);
        assert_eq!(tb.rescale_ns(90_000), NANOS_PER_SEC);
        assert_eq!(tb.from_ns(NANOS_PER_SEC / 2), 45_000);
        let ntsc = Rational::new(1001, 30_000);
        assert_eq!(ntsc.rescale_ns(30), 1_001_000_000);
        assert!(!Rational::new(0, 1).is_valid());
    }

    #[test]
    fn test_routing() {
        let demuxer = ListDemuxer {
            streams: vec![],
            packets: VecDeque::from(vec![
                packet(1, 4),
                packet(0, 4),
                packet(0, 0),
                packet(7, 4),
                Err(MediaError::Io("connection reset".into())),
            ]),
        };
        let mut router = DemuxRouter::new(Box::new(demuxer), Interrupt::new(), Some(1), Some(0));
        let mut audio = state(StreamKind::Audio, 1);
        let mut video = state(StreamKind::Video, 0);

        assert_eq!(router.next_packet(Some(&mut audio), Some(&mut video)).unwrap(), PacketRoute::Audio);
        assert_eq!(router.next_packet(Some(&mut audio), Some(&mut video)).unwrap(), PacketRoute::Video);
        // Empty packet is ignored
        assert_eq!(router.next_packet(Some(&mut audio), Some(&mut video)).unwrap(), PacketRoute::Other);
        assert_eq!(router.next_packet(Some(&mut audio), Some(&mut video)).unwrap(), PacketRoute::Other);
        assert!(matches!(
            router.next_packet(Some(&mut audio), Some(&mut video)),
            Err(MediaError::Io(_))
        ));
        assert_eq!(router.next_packet(Some(&mut audio), Some(&mut video)).unwrap(), PacketRoute::EndOfStream);
        assert_eq!(audio.queued_packets(), 1);
        assert_eq!(video.queued_packets(), 1);
    }

    #[test]
    fn test_interrupted_before_read() {
        let demuxer = ListDemuxer {
            streams: vec![],
            packets: VecDeque::from(vec![packet(0, 4)]),
        };
        let interrupt = Interrupt::new();
        let mut router = DemuxRouter::new(Box::new(demuxer), interrupt.clone(), None, Some(0));
        interrupt.kill();
        assert!(matches!(router.next_packet(None, None), Err(MediaError::Interrupted)));
    }

    #[test]
    fn test_seek_errors_are_seek_errors() {
        let demuxer = ListDemuxer {
            streams: vec![],
            packets: VecDeque::new(),
        };
        let mut router = DemuxRouter::new(Box::new(demuxer), Interrupt::new(), None, None);
        assert!(matches!(router.seek(0), Err(MediaError::Seek(_))));
    }

    #[test]
    fn test_container_hint() {
        assert_eq!(container_hint("a/b/Clip.MKV", None).as_deref(), Some("mkv"));
        assert_eq!(container_hint("a.mp4", Some(" WAV ")).as_deref(), Some("wav"));
        assert_eq!(container_hint("noext", Some("")), None);
    }
}
