//! # Loop Cache
//!
//! Decoded output of the first pass through a looping local file, replayed
//! on later passes instead of decoding again.
//!
//! Each stream track is either still `Decoding` (write-through, growing) or
//! `Replaying` (closed for writes, fixed length, cursor based). The switch
//! happens once, when the first pass reaches end of stream.

use serde::Serialize;

use crate::demuxer::{Rational, NANOS_PER_SEC};
use crate::frame::{AudioBuffer, VideoFrame};

/// Estimated decoded footprint above which nothing is cached, in MB.
pub const CACHE_CEILING_MB: f64 = 1024.0;

/// Frame count from duration and average frame rate, rounded up.
pub fn estimate_frames(duration_ns: Option<i64>, frame_rate: Option<Rational>) -> u64 {
    match (duration_ns, frame_rate) {
        (Some(duration), Some(rate)) if duration > 0 && rate.is_valid() => {
            (duration as f64 / NANOS_PER_SEC as f64 * rate.as_f64()).ceil() as u64
        }
        _ => 0,
    }
}

/// Cache admission: width x height x 1.5 bytes per frame must stay under the ceiling.
pub fn admit(width: u32, height: u32, frames: u64) -> bool {
    let megabytes = width as f64 * height as f64 * 1.5 * frames as f64 / 1_000_000.0;
    megabytes < CACHE_CEILING_MB
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub replaying: bool,
    pub video_entries: usize,
    pub audio_entries: usize,
    pub bytes: usize,
    /// Observed spacing between cached video frames
    pub video_refresh_ns: i64,
    pub audio_refresh_ns: i64,
    /// Completed replay passes
    pub loops: u64,
}

pub trait CacheEntry: Clone {
    fn dec_pts(&self) -> i64;
    fn timestamp(&self) -> i64;
    fn byte_size(&self) -> usize;
}

impl CacheEntry for VideoFrame {
    fn dec_pts(&self) -> i64 {
        self.dec_pts
    }
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
    fn byte_size(&self) -> usize {
        VideoFrame::byte_size(self)
    }
}

impl CacheEntry for AudioBuffer {
    fn dec_pts(&self) -> i64 {
        self.dec_frame_pts
    }
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
    fn byte_size(&self) -> usize {
        AudioBuffer::byte_size(self)
    }
}

// ============================================================================
// Track
// ============================================================================

#[derive(Debug)]
enum TrackMode<T> {
    Decoding { entries: Vec<T> },
    Replaying { buffer: Vec<T>, cursor: usize, length: usize },
}

#[derive(Debug)]
pub struct CacheTrack<T> {
    mode: TrackMode<T>,
    refresh_rate_ns: i64,
    bytes: usize,
}

impl<T: CacheEntry> CacheTrack<T> {
    fn new() -> Self {
        Self {
            mode: TrackMode::Decoding { entries: Vec::new() },
            refresh_rate_ns: 0,
            bytes: 0,
        }
    }

    fn record(&mut self, item: &T) {
        if let TrackMode::Decoding { entries } = &mut self.mode {
            if let Some(previous) = entries.last() {
                self.refresh_rate_ns = item.timestamp() - previous.timestamp();
            }
            self.bytes += item.byte_size();
            entries.push(item.clone());
        }
    }

    fn freeze(&mut self) {
        if let TrackMode::Decoding { entries } = &mut self.mode {
            let buffer = std::mem::take(entries);
            let length = buffer.len();
            self.mode = TrackMode::Replaying {
                buffer,
                cursor: 0,
                length,
            };
        }
    }

    fn clear(&mut self) {
        self.mode = TrackMode::Decoding { entries: Vec::new() };
        self.refresh_rate_ns = 0;
        self.bytes = 0;
    }

    fn is_replaying(&self) -> bool {
        matches!(self.mode, TrackMode::Replaying { .. })
    }

    fn len(&self) -> usize {
        match &self.mode {
            TrackMode::Decoding { entries } => entries.len(),
            TrackMode::Replaying { length, .. } => *length,
        }
    }

    fn head(&self) -> Option<&T> {
        match &self.mode {
            TrackMode::Replaying { buffer, cursor, length } if cursor < length => buffer.get(*cursor),
            _ => None,
        }
    }

    fn advance(&mut self) -> Option<T> {
        match &mut self.mode {
            TrackMode::Replaying { buffer, cursor, length } if *cursor < *length => {
                let item = buffer.get(*cursor).cloned();
                *cursor += 1;
                item
            }
            _ => None,
        }
    }

    fn first(&self) -> Option<&T> {
        match &self.mode {
            TrackMode::Replaying { buffer, .. } => buffer.first(),
            TrackMode::Decoding { entries } => entries.first(),
        }
    }

    fn rewind(&mut self) {
        if let TrackMode::Replaying { cursor, .. } = &mut self.mode {
            *cursor = 0;
        }
    }

    fn seek(&mut self, pts: i64) {
        if let TrackMode::Replaying { buffer, cursor, length } = &mut self.mode {
            *cursor = buffer
                .iter()
                .position(|entry| entry.dec_pts() >= pts)
                .unwrap_or(*length);
        }
    }
}

// ============================================================================
// Cache
// ============================================================================

#[derive(Debug)]
pub struct FrameCache {
    video: CacheTrack<VideoFrame>,
    audio: CacheTrack<AudioBuffer>,
    end_pts: i64,
    loops: u64,
}

impl Default for FrameCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCache {
    pub fn new() -> Self {
        Self {
            video: CacheTrack::new(),
            audio: CacheTrack::new(),
            end_pts: 0,
            loops: 0,
        }
    }

    pub fn record_video(&mut self, frame: &VideoFrame) {
        self.video.record(frame);
    }

    pub fn record_audio(&mut self, buffer: &AudioBuffer) {
        self.audio.record(buffer);
    }

    /// Close both tracks for writes. `end_pts` is where the pass ended.
    pub fn freeze(&mut self, end_pts: i64) {
        if self.is_replaying() {
            return;
        }
        self.video.freeze();
        self.audio.freeze();
        self.end_pts = end_pts;
    }

    pub fn is_replaying(&self) -> bool {
        self.video.is_replaying() && self.audio.is_replaying()
    }

    pub fn is_empty(&self) -> bool {
        self.video.len() == 0 && self.audio.len() == 0
    }

    /// Drop everything and go back to write-through.
    pub fn clear(&mut self) {
        self.video.clear();
        self.audio.clear();
        self.end_pts = 0;
        self.loops = 0;
    }

    /// Start the next replay pass.
    pub fn rewind(&mut self) {
        if self.is_replaying() {
            self.video.rewind();
            self.audio.rewind();
            self.loops += 1;
        }
    }

    /// Move both cursors to the first entries at or after `pts`.
    pub fn seek(&mut self, pts: i64) {
        self.video.seek(pts);
        self.audio.seek(pts);
    }

    pub fn video_head_pts(&self) -> Option<i64> {
        self.video.head().map(|f| f.dec_pts)
    }

    pub fn audio_head_pts(&self) -> Option<i64> {
        self.audio.head().map(|b| b.dec_frame_pts)
    }

    pub fn peek_video(&self) -> Option<&VideoFrame> {
        self.video.head()
    }

    pub fn next_video(&mut self) -> Option<VideoFrame> {
        self.video.advance()
    }

    pub fn next_audio(&mut self) -> Option<AudioBuffer> {
        self.audio.advance()
    }

    /// Both tracks have been played out.
    pub fn exhausted(&self) -> bool {
        self.is_replaying() && self.video.head().is_none() && self.audio.head().is_none()
    }

    pub fn end_pts(&self) -> i64 {
        self.end_pts
    }

    /// Earliest PTS of a pass.
    pub fn first_pts(&self) -> Option<i64> {
        let video = self.video.first().map(|f| f.dec_pts);
        let audio = self.audio.first().map(|b| b.dec_frame_pts);
        match (video, audio) {
            (Some(v), Some(a)) => Some(v.min(a)),
            (v, a) => v.or(a),
        }
    }

    pub fn stats(&self, enabled: bool) -> CacheStats {
        CacheStats {
            enabled,
            replaying: self.is_replaying(),
            video_entries: self.video.len(),
            audio_entries: self.audio.len(),
            bytes: self.video.bytes + self.audio.bytes,
            video_refresh_ns: self.video.refresh_rate_ns,
            audio_refresh_ns: self.audio.refresh_rate_ns,
            loops: self.loops,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{SampleFormat, SpeakerLayout};
    use crate::pixel_convert::PixelFormat;
    use bytes::Bytes;

    fn video(pts: i64, timestamp: i64) -> VideoFrame {
        VideoFrame {
            planes: vec![Bytes::from(vec![0u8; 16])],
            linesize: vec![8],
            width: 2,
            height: 2,
            format: PixelFormat::BGRA32,
            color_matrix: [0.0; 16],
            color_range_min: [0.0; 3],
            color_range_max: [1.0; 3],
            full_range: true,
            timestamp,
            flip: false,
            linear_alpha: false,
            dec_pts: pts,
        }
    }

    fn audio(pts: i64, timestamp: i64) -> AudioBuffer {
        AudioBuffer {
            planes: vec![Bytes::from(vec![0u8; 8])],
            samples_per_sec: 48_000,
            speakers: SpeakerLayout::Mono,
            format: SampleFormat::F32,
            frames: 2,
            timestamp,
            dec_frame_pts: pts,
        }
    }

    #[test]
    fn test_admission() {
        // 4000x3000 with 100k frames is far over the ceiling
        assert!(!admit(4000, 3000, 100_000));
        assert!(admit(640, 360, 300));
        // 1920x1080 x 1.5 = ~3.1 MB per frame, ceiling hit near 330 frames
        assert!(admit(1920, 1080, 329));
        assert!(!admit(1920, 1080, 330));
    }

    #[test]
    fn test_estimate_frames() {
        let fps = Some(Rational::new(30, 1));
        assert_eq!(estimate_frames(Some(2_000_000_000), fps), 60);
        assert_eq!(estimate_frames(Some(1_010_000_000), fps), 31);
        assert_eq!(estimate_frames(None, fps), 0);
        assert_eq!(estimate_frames(Some(1), Some(Rational::new(0, 1))), 0);
    }

    #[test]
    fn test_fill_then_replay() {
        let mut cache = FrameCache::new();
        for i in 0..3 {
            cache.record_video(&video(i * 40, 1_000 + i * 40));
            cache.record_audio(&audio(i * 20, 1_000 + i * 20));
        }
        assert!(!cache.is_replaying());
        assert_eq!(cache.stats(true).video_refresh_ns, 40);
        assert_eq!(cache.stats(true).audio_refresh_ns, 20);
        assert_eq!(cache.video_head_pts(), None);

        cache.freeze(120);
        assert!(cache.is_replaying());
        assert_eq!(cache.end_pts(), 120);
        assert_eq!(cache.first_pts(), Some(0));

        // Frozen: further writes are ignored
        cache.record_video(&video(999, 0));
        assert_eq!(cache.stats(true).video_entries, 3);

        let mut seen = Vec::new();
        while let Some(frame) = cache.next_video() {
            seen.push(frame.dec_pts);
        }
        assert_eq!(seen, vec![0, 40, 80]);
        assert!(!cache.exhausted());
        while cache.next_audio().is_some() {}
        assert!(cache.exhausted());

        cache.rewind();
        assert_eq!(cache.video_head_pts(), Some(0));
        assert_eq!(cache.stats(true).loops, 1);
    }

    #[test]
    fn test_seek_repositions_cursor() {
        let mut cache = FrameCache::new();
        for i in 0..5 {
            cache.record_video(&video(i * 40, 0));
        }
        cache.freeze(200);
        cache.seek(90);
        assert_eq!(cache.video_head_pts(), Some(120));
        cache.seek(500);
        assert_eq!(cache.video_head_pts(), None);
    }

    #[test]
    fn test_clear_returns_to_filling() {
        let mut cache = FrameCache::new();
        cache.record_video(&video(0, 0));
        cache.freeze(40);
        cache.clear();
        assert!(!cache.is_replaying());
        assert!(cache.is_empty());
        assert_eq!(cache.stats(false).bytes, 0);
    }
}
