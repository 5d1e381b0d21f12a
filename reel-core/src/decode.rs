//! # Stream Decode
//!
//! `StreamDecoder` is the capability boundary: a backend turns packets of one
//! elementary stream into frames. `StreamState` wraps a decoder with the
//! bookkeeping the engine needs (ready flag, PTS in the session clock, EOF,
//! first keyframe) and owns the stream's packet queue.

use std::collections::VecDeque;

use tracing::debug;

use crate::demuxer::{Packet, Rational, StreamKind};
use crate::error::Result;
use crate::frame::{DecodedFrame, FramePayload, RawAudio, RawPicture};

/// Result of asking a decoder for output.
#[derive(Debug)]
pub enum Decoded {
    Frame(DecodedFrame),
    /// Feed more packets
    NeedsInput,
    /// End of stream was signalled and everything buffered is out
    Drained,
}

/// Decoder trait - implemented by every backend
pub trait StreamDecoder: Send {
    fn kind(&self) -> StreamKind;

    fn stream_index(&self) -> usize;

    fn time_base(&self) -> Rational;

    /// Errors here mean this packet is undecodable; the caller drops it.
    fn send_packet(&mut self, packet: &Packet) -> Result<()>;

    /// No more packets will come; drain buffered frames.
    fn send_eof(&mut self) -> Result<()>;

    fn receive_frame(&mut self) -> Result<Decoded>;

    /// Drop buffered state (seek/reset)
    fn flush(&mut self);
}

pub struct StreamState {
    decoder: Box<dyn StreamDecoder>,
    kind: StreamKind,
    time_base: Rational,
    frame_rate: Option<Rational>,
    speed: u32,
    packets: VecDeque<Packet>,
    frame: Option<DecodedFrame>,
    draining: bool,
    last_raw_pts: Option<i64>,
    last_duration: i64,

    pub frame_ready: bool,
    /// PTS of the ready frame, nanoseconds, speed adjusted
    pub frame_pts: i64,
    /// Where the frame after this one is expected
    pub next_pts: i64,
    pub eof: bool,
    pub got_first_keyframe: bool,
}

impl StreamState {
    pub fn new(decoder: Box<dyn StreamDecoder>, frame_rate: Option<Rational>, speed: u32) -> Self {
        Self {
            kind: decoder.kind(),
            time_base: decoder.time_base(),
            decoder,
            frame_rate: frame_rate.filter(|r| r.is_valid()),
            speed: speed.max(1),
            packets: VecDeque::new(),
            frame: None,
            draining: false,
            last_raw_pts: None,
            last_duration: 0,
            frame_ready: false,
            frame_pts: 0,
            next_pts: 0,
            eof: false,
            got_first_keyframe: false,
        }
    }

    pub fn kind(&self) -> StreamKind {
        self.kind
    }

    pub fn stream_index(&self) -> usize {
        self.decoder.stream_index()
    }

    pub fn push_packet(&mut self, packet: Packet) {
        self.packets.push_back(packet);
    }

    pub fn queued_packets(&self) -> usize {
        self.packets.len()
    }

    /// Current frame, whether or not it was already consumed.
    pub fn frame(&self) -> Option<&DecodedFrame> {
        self.frame.as_ref()
    }

    pub fn picture(&self) -> Option<&RawPicture> {
        match self.frame.as_ref().map(|f| &f.payload) {
            Some(FramePayload::Video(picture)) => Some(picture),
            _ => None,
        }
    }

    pub fn audio(&self) -> Option<&RawAudio> {
        match self.frame.as_ref().map(|f| &f.payload) {
            Some(FramePayload::Audio(audio)) => Some(audio),
            _ => None,
        }
    }

    /// Mark the ready frame as delivered.
    pub fn consume(&mut self) {
        self.frame_ready = false;
    }

    /// `frame_ready` or try to make it so.
    pub fn ensure_frame(&mut self, demux_eof: bool) -> Result<bool> {
        if self.frame_ready {
            return Ok(true);
        }
        self.decode_next(demux_eof)
    }

    /// Decode until a frame is ready or more input is needed.
    ///
    /// Returns true when a new frame became ready. Undecodable packets are
    /// dropped here; only decoder failures unrelated to input are returned.
    pub fn decode_next(&mut self, demux_eof: bool) -> Result<bool> {
        self.frame_ready = false;

        loop {
            match self.decoder.receive_frame()? {
                Decoded::Frame(frame) => {
                    self.accept(frame);
                    return Ok(true);
                }
                Decoded::Drained => {
                    self.eof = true;
                    return Ok(false);
                }
                Decoded::NeedsInput => {}
            }

            if self.draining {
                self.eof = true;
                return Ok(false);
            }

            match self.packets.pop_front() {
                Some(packet) => {
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        debug!("{:?} packet dropped: {}", self.kind, e);
                    }
                }
                None if demux_eof => {
                    self.decoder.send_eof()?;
                    self.draining = true;
                }
                None => return Ok(false),
            }
        }
    }

    pub fn flush(&mut self) {
        self.decoder.flush();
        self.packets.clear();
        self.frame = None;
        self.frame_ready = false;
        self.eof = false;
        self.draining = false;
        self.last_raw_pts = None;
    }

    fn accept(&mut self, frame: DecodedFrame) {
        let raw_pts = match frame.pts {
            Some(pts) => self.time_base.rescale_ns(pts),
            None => self.unscale(self.next_pts),
        };

        let duration = if frame.duration > 0 {
            self.time_base.rescale_ns(frame.duration)
        } else {
            self.estimate_duration(&frame, raw_pts)
        };

        self.last_raw_pts = Some(raw_pts);
        self.frame_pts = self.scale(raw_pts);
        self.last_duration = self.scale(duration);
        self.next_pts = self.frame_pts + self.last_duration;
        self.frame = Some(frame);
        self.frame_ready = true;
    }

    fn estimate_duration(&self, frame: &DecodedFrame, raw_pts: i64) -> i64 {
        if let Some(last) = self.last_raw_pts {
            if raw_pts > last {
                return raw_pts - last;
            }
        }
        if let FramePayload::Audio(audio) = &frame.payload {
            if audio.sample_rate > 0 {
                return Rational::new(1, audio.sample_rate as i64).rescale_ns(audio.frames as i64);
            }
        }
        if self.last_duration > 0 {
            return self.unscale(self.last_duration);
        }
        match self.frame_rate {
            Some(rate) => Rational::new(rate.den, rate.num).rescale_ns(1),
            None => 0,
        }
    }

    // Slower playback stretches the timeline
    fn scale(&self, ns: i64) -> i64 {
        if self.speed == 100 {
            ns
        } else {
            (ns as i128 * 100 / self.speed as i128) as i64
        }
    }

    fn unscale(&self, ns: i64) -> i64 {
        if self.speed == 100 {
            ns
        } else {
            (ns as i128 * self.speed as i128 / 100) as i64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MediaError;
    use crate::frame::SampleFormat;
    use bytes::Bytes;

    /// Emits one audio frame per packet; packets shorter than 2 bytes fail.
    struct EchoDecoder {
        pending: VecDeque<DecodedFrame>,
        eof: bool,
        with_pts: bool,
    }

    impl EchoDecoder {
        fn new(with_pts: bool) -> Self {
            Self {
                pending: VecDeque::new(),
                eof: false,
                with_pts,
            }
        }
    }

    impl StreamDecoder for EchoDecoder {
        fn kind(&self) -> StreamKind {
            StreamKind::Audio
        }
        fn stream_index(&self) -> usize {
            0
        }
        fn time_base(&self) -> Rational {
            Rational::new(1, 1000)
        }
        fn send_packet(&mut self, packet: &Packet) -> Result<()> {
            if packet.data.len() < 2 {
                return Err(MediaError::Decode("truncated".into()));
            }
            self.pending.push_back(DecodedFrame {
                pts: if self.with_pts { packet.pts } else { None },
                duration: 0,
                payload: FramePayload::Audio(RawAudio {
                    planes: vec![packet.data.clone()],
                    sample_rate: 1000,
                    channels: 1,
                    format: SampleFormat::U8,
                    frames: 20,
                }),
            });
            Ok(())
        }
        fn send_eof(&mut self) -> Result<()> {
            self.eof = true;
            Ok(())
        }
        fn receive_frame(&mut self) -> Result<Decoded> {
            match self.pending.pop_front() {
                Some(frame) => Ok(Decoded::Frame(frame)),
                None if self.eof => Ok(Decoded::Drained),
                None => Ok(Decoded::NeedsInput),
            }
        }
        fn flush(&mut self) {
            self.pending.clear();
            self.eof = false;
        }
    }

    fn packet(pts: i64, len: usize) -> Packet {
        Packet {
            stream_index: 0,
            data: Bytes::from(vec![1u8; len]),
            pts: Some(pts),
            duration: 0,
            keyframe: true,
        }
    }

    #[test]
    fn test_decode_next_needs_input() {
        let mut state = StreamState::new(Box::new(EchoDecoder::new(true)), None, 100);
        assert!(!state.decode_next(false).unwrap());
        assert!(!state.eof);

        state.push_packet(packet(40, 4));
        assert!(state.decode_next(false).unwrap());
        assert!(state.frame_ready);
        assert_eq!(state.frame_pts, 40_000_000);
        // Duration from sample count: 20 samples at 1 kHz
        assert_eq!(state.next_pts, 60_000_000);
    }

    #[test]
    fn test_bad_packet_dropped_not_fatal() {
        let mut state = StreamState::new(Box::new(EchoDecoder::new(true)), None, 100);
        state.push_packet(packet(0, 1));
        state.push_packet(packet(20, 4));
        assert!(state.decode_next(false).unwrap());
        assert_eq!(state.frame_pts, 20_000_000);
    }

    #[test]
    fn test_eof_after_drain() {
        let mut state = StreamState::new(Box::new(EchoDecoder::new(true)), None, 100);
        state.push_packet(packet(0, 4));
        assert!(state.decode_next(true).unwrap());
        state.consume();
        assert!(!state.decode_next(true).unwrap());
        assert!(state.eof);
        assert!(!state.frame_ready);

        state.flush();
        assert!(!state.eof);
        assert_eq!(state.queued_packets(), 0);
        // next_pts survives a flush so resets know where the pass ended
        assert_eq!(state.next_pts, 20_000_000);
    }

    #[test]
    fn test_speed_scales_pts() {
        let mut state = StreamState::new(Box::new(EchoDecoder::new(true)), None, 50);
        state.push_packet(packet(100, 4));
        assert!(state.decode_next(false).unwrap());
        assert_eq!(state.frame_pts, 200_000_000);
        assert_eq!(state.next_pts, 240_000_000);
    }

    #[test]
    fn test_missing_pts_continues_from_next() {
        let mut state = StreamState::new(Box::new(EchoDecoder::new(false)), None, 100);
        state.push_packet(packet(0, 4));
        state.push_packet(packet(0, 4));
        assert!(state.decode_next(false).unwrap());
        assert_eq!(state.frame_pts, 0);
        assert!(state.decode_next(false).unwrap());
        assert_eq!(state.frame_pts, 20_000_000);
    }

    #[test]
    fn test_ensure_frame_keeps_ready() {
        let mut state = StreamState::new(Box::new(EchoDecoder::new(true)), None, 100);
        state.push_packet(packet(5, 4));
        state.push_packet(packet(25, 4));
        assert!(state.ensure_frame(false).unwrap());
        assert!(state.ensure_frame(false).unwrap());
        assert_eq!(state.frame_pts, 5_000_000);
        assert_eq!(state.audio().map(|a| a.frames), Some(20));
    }
}
