//! # Playback Engine
//!
//! Everything that runs on the media worker thread. One `Engine` owns the
//! demuxer, both stream decoders, the normalizer, the presentation clock and
//! the loop cache; nothing in here is shared except the command channel,
//! the interrupt flags and `SharedStatus`.
//!
//! Worker loop:
//! ```text
//! inactive ──recv()──┐             active ──sleep_to(deadline)──┐
//!                    ▼                                          ▼
//!             drain commands ── Kill ──► exit
//!                    │
//!          reset / seek pending? ──► handle, next iteration
//!                    │
//!          deliver video ─► deliver audio ─► prepare frames (or replay)
//!                    │
//!          end of stream? ──► stop or loop (reset)
//!                    │
//!          advance the schedule to the earliest ready PTS
//! ```

use std::sync::Arc;

use crossbeam_channel::Receiver;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::MediaConfig;
use crate::control::{Command, Interrupt, PlaybackState, SharedStatus};
use crate::decode::StreamState;
use crate::demuxer::{DemuxRouter, PacketRoute};
use crate::error::{MediaError, Result};
use crate::frame::{AudioBuffer, VideoFrame};
use crate::frame_cache::{admit, FrameCache};
use crate::normalizer::FormatNormalizer;
use crate::session::{MediaInfo, MediaSink};
use crate::source::MediaOpener;
use crate::sync::PresentationClock;

/// Why a video frame is being handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Play,
    /// Poster frame after a reset while inactive
    Preload,
    /// Frame at the new position while paused or inactive
    Seek,
}

/// Commands collected during one drain.
#[derive(Debug, Default)]
struct Pending {
    reset: bool,
    seek: Option<i64>,
    kill: bool,
}

pub(crate) struct Engine {
    config: MediaConfig,
    speed: u32,
    clock: Arc<dyn Clock>,
    sink: Box<dyn MediaSink>,
    router: DemuxRouter,
    video: Option<StreamState>,
    audio: Option<StreamState>,
    normalizer: FormatNormalizer,
    pclock: PresentationClock,
    cache: FrameCache,
    cache_allowed: bool,
    caching: bool,
    /// The current pass began at the media start; only such a pass may fill the cache
    pass_from_start: bool,
    active: bool,
    looping: bool,
    stopping: bool,
    paused_at: Option<i64>,
    demux_eof: bool,
    commands: Receiver<Command>,
    interrupt: Interrupt,
    status: Arc<SharedStatus>,
    info: MediaInfo,
}

impl Engine {
    /// Open the source and decode up to the first frame of every stream.
    pub(crate) fn open(
        config: MediaConfig,
        opener: &dyn MediaOpener,
        clock: Arc<dyn Clock>,
        sink: Box<dyn MediaSink>,
        commands: Receiver<Command>,
        interrupt: Interrupt,
        status: Arc<SharedStatus>,
    ) -> Result<Self> {
        let speed = config.effective_speed();
        debug!("Opening '{}' with {} (speed {}%)", config.path, opener.name(), speed);

        let opened = match opener.open(&config, &interrupt) {
            Ok(opened) => opened,
            Err(e) => {
                warn!("{}", e);
                return Err(e);
            }
        };

        if opened.video.is_none() && opened.audio.is_none() {
            warn!("Could not initialize audio or video: '{}'", config.path);
            return Err(MediaError::NoStreams(config.path.clone()));
        }

        let video_index = opened.video.as_ref().map(|d| d.stream_index());
        let audio_index = opened.audio.as_ref().map(|d| d.stream_index());
        let info = MediaInfo::describe(
            &config.path,
            opened.demuxer.as_ref(),
            video_index,
            audio_index,
        );

        let cache_allowed = !info.has_video
            || admit(info.width, info.height, info.frame_count.unwrap_or(0));
        if !cache_allowed {
            info!(
                "'{}' is too large to cache ({}x{}, {:?} frames)",
                config.path, info.width, info.height, info.frame_count
            );
        }

        let video = opened
            .video
            .map(|decoder| StreamState::new(decoder, info.frame_rate, speed));
        let audio = opened
            .audio
            .map(|decoder| StreamState::new(decoder, None, speed));
        let router = DemuxRouter::new(opened.demuxer, interrupt.clone(), audio_index, video_index);

        let mut engine = Self {
            speed,
            normalizer: FormatNormalizer::new(config.force_range)
                .with_linear_alpha(config.linear_alpha),
            pclock: PresentationClock::new(clock.epoch_ns()),
            looping: config.looping,
            config,
            clock,
            sink,
            router,
            video,
            audio,
            cache: FrameCache::new(),
            cache_allowed,
            caching: false,
            pass_from_start: false,
            active: false,
            stopping: false,
            paused_at: None,
            demux_eof: false,
            commands,
            interrupt,
            status,
            info,
        };
        engine.caching = engine.should_cache();

        if let Err(e) = engine.reset(false) {
            warn!("Failed to prepare '{}': {}", engine.config.path, e);
            return Err(e);
        }
        Ok(engine)
    }

    pub(crate) fn info(&self) -> &MediaInfo {
        &self.info
    }

    /// Worker thread body.
    pub(crate) fn run(mut self) {
        self.sink.on_ready(&self.info);

        let outcome = self.start().and_then(|_| self.run_loop());
        match outcome {
            Ok(()) => debug!("Media thread for '{}' exiting", self.config.path),
            Err(e) => {
                error!("Playback of '{}' failed: {}", self.config.path, e);
                self.sink.on_stopped();
            }
        }

        self.cache.clear();
        self.status.set_state(PlaybackState::Killed);
    }

    fn start(&mut self) -> Result<()> {
        if self.config.is_local_file {
            tolerate_interrupt(self.deliver_video(Delivery::Preload))?;
        }
        self.status.set_state(PlaybackState::Waiting);
        Ok(())
    }

    fn run_loop(&mut self) -> Result<()> {
        loop {
            let running = self.is_running();
            let mut early = false;

            if running {
                early = self.pclock.sleep_to(self.clock.as_ref());
            } else {
                // The session handle is gone once every sender dropped
                let Ok(command) = self.commands.recv() else {
                    return Ok(());
                };
                let mut pending = Pending::default();
                self.apply(command, &mut pending);
                if self.handle_pending(pending)? {
                    return Ok(());
                }
            }

            let mut pending = Pending::default();
            while let Ok(command) = self.commands.try_recv() {
                self.apply(command, &mut pending);
            }
            if pending.kill {
                return Ok(());
            }
            if pending.reset || pending.seek.is_some() {
                self.handle_pending(pending)?;
                continue;
            }

            if running && !early && self.is_running() {
                tolerate_interrupt(self.tick())?;
            }
        }
    }

    /// Returns true when the worker should exit.
    fn handle_pending(&mut self, pending: Pending) -> Result<bool> {
        if pending.kill {
            return Ok(true);
        }
        if pending.reset {
            tolerate_interrupt(self.reset(true))?;
        }
        if let Some(ms) = pending.seek {
            tolerate_interrupt(self.seek(ms))?;
        }
        Ok(false)
    }

    fn is_running(&self) -> bool {
        self.active && self.paused_at.is_none()
    }

    fn should_cache(&self) -> bool {
        self.config.enable_caching && self.looping && self.config.is_local_file && self.cache_allowed
    }

    // ========================================================================
    // Commands
    // ========================================================================

    fn apply(&mut self, command: Command, pending: &mut Pending) {
        debug!("Command {:?}", command);
        let now = self.clock.now_ns();

        match command {
            Command::Play { looping } => {
                if self.active {
                    pending.reset = true;
                }
                self.looping = looping;

                let caching = self.should_cache();
                if !caching && !self.cache.is_empty() {
                    // Replay state cannot be resumed by the decoders
                    if self.cache.is_replaying() {
                        pending.reset = true;
                    }
                    self.cache.clear();
                }
                self.caching = caching;

                self.active = true;
                if let Some(at) = self.paused_at.take() {
                    self.pclock.shift(now - at);
                }
                self.status.set_state(PlaybackState::Active);
                self.publish_cache();
            }
            Command::Pause(true) => {
                if self.active && self.paused_at.is_none() {
                    self.paused_at = Some(now);
                    self.status.set_state(PlaybackState::Paused);
                }
            }
            Command::Pause(false) => {
                if let Some(at) = self.paused_at.take() {
                    self.pclock.shift(now - at);
                    self.status.set_state(PlaybackState::Active);
                }
            }
            Command::Stop => {
                if self.active {
                    pending.reset = true;
                    self.active = false;
                    self.stopping = true;
                    self.paused_at = None;
                    self.status.set_state(PlaybackState::Stopping);
                } else {
                    self.interrupt.set_stopping(false);
                }
            }
            Command::Seek(ms) => pending.seek = Some(ms),
            Command::Kill => pending.kill = true,
        }
    }

    // ========================================================================
    // Tick
    // ========================================================================

    fn tick(&mut self) -> Result<()> {
        self.deliver_video(Delivery::Play)?;
        self.deliver_audio();

        if self.is_replaying() {
            if self.cache.exhausted() {
                return self.end_of_stream();
            }
            let next = min_pts(self.cache.video_head_pts(), self.cache.audio_head_pts());
            if let Some(next) = next {
                self.pclock.advance_to(next);
            }
            return Ok(());
        }

        self.prepare_frames()?;
        if self.at_eof() {
            return self.end_of_stream();
        }
        if let Some(next) = self.min_ready_pts() {
            self.pclock.advance_to(next);
        }
        Ok(())
    }

    /// Decode until every stream either has a frame ready or hit its end.
    fn prepare_frames(&mut self) -> Result<()> {
        while !self.frames_prepared() {
            if !self.demux_eof {
                let route = self.router.next_packet(self.audio.as_mut(), self.video.as_mut())?;
                if route == PacketRoute::EndOfStream {
                    debug!("Demuxer reached end of '{}'", self.config.path);
                    self.demux_eof = true;
                }
            }
            if let Some(video) = self.video.as_mut() {
                video.ensure_frame(self.demux_eof)?;
            }
            if let Some(audio) = self.audio.as_mut() {
                audio.ensure_frame(self.demux_eof)?;
            }
        }

        if let Some(picture) = self
            .video
            .as_ref()
            .filter(|v| v.frame_ready)
            .and_then(|v| v.picture())
        {
            self.normalizer.prepare(picture)?;
        }
        Ok(())
    }

    fn frames_prepared(&self) -> bool {
        [self.video.as_ref(), self.audio.as_ref()]
            .into_iter()
            .flatten()
            .all(|s| s.eof || s.frame_ready)
    }

    fn at_eof(&self) -> bool {
        [self.video.as_ref(), self.audio.as_ref()]
            .into_iter()
            .flatten()
            .all(|s| !s.frame_ready)
    }

    fn min_ready_pts(&self) -> Option<i64> {
        [self.video.as_ref(), self.audio.as_ref()]
            .into_iter()
            .flatten()
            .filter(|s| s.frame_ready)
            .map(|s| s.frame_pts)
            .min()
    }

    /// Where the pass that just ended stopped.
    fn end_pts(&self) -> i64 {
        [self.video.as_ref(), self.audio.as_ref()]
            .into_iter()
            .flatten()
            .map(|s| s.next_pts)
            .max()
            .unwrap_or(0)
            .max(0)
    }

    fn is_replaying(&self) -> bool {
        self.caching && self.cache.is_replaying()
    }

    fn filling_cache(&self) -> bool {
        self.caching && self.pass_from_start && !self.cache.is_replaying()
    }

    fn end_of_stream(&mut self) -> Result<()> {
        if !self.looping {
            debug!("End of '{}'", self.config.path);
            self.active = false;
            self.stopping = true;
            self.status.set_state(PlaybackState::Stopping);
        } else if self.filling_cache() {
            self.cache.freeze(self.end_pts());
            let stats = self.cache.stats(true);
            info!(
                "Loop cache filled: {} video, {} audio, {} bytes",
                stats.video_entries, stats.audio_entries, stats.bytes
            );
        }
        self.reset(true)
    }

    // ========================================================================
    // Reset
    // ========================================================================

    /// Go back to the start of the media.
    ///
    /// Runs at open, on loop boundaries, on stop and on play-while-active.
    fn reset(&mut self, preload: bool) -> Result<()> {
        self.status.set_state(PlaybackState::Resetting);
        let stopping = std::mem::take(&mut self.stopping);
        self.interrupt.set_stopping(false);
        let now = self.clock.now_ns();

        if self.is_replaying() {
            self.cache.rewind();
            let first = self.cache.first_pts().unwrap_or(0);
            self.pclock.rebase(self.cache.end_pts(), first, self.active, now);
            debug!("Loop cache pass {}", self.cache.stats(true).loops);
        } else {
            if !self.cache.is_empty() {
                self.cache.clear();
            }
            if self.config.is_local_file {
                let start = self.router.demuxer().start_time_ns();
                match self.router.seek(start) {
                    Ok(()) => self.pass_from_start = true,
                    Err(e) => {
                        warn!("Failed to rewind '{}': {}", self.config.path, e);
                        self.pass_from_start = false;
                    }
                }
                self.flush_streams();
            }
            let end = self.end_pts();
            self.demux_eof = false;
            self.prepare_frames()?;
            let first = self.min_ready_pts().unwrap_or(0);
            self.pclock.rebase(end, first, self.active, now);
        }
        self.publish_cache();

        if !self.active && self.config.is_local_file && preload {
            self.deliver_video(Delivery::Preload)?;
        }

        if stopping {
            info!("Stopped '{}'", self.config.path);
            self.status.set_state(PlaybackState::Stopped);
            self.sink.on_stopped();
        } else if self.active {
            self.status.set_state(PlaybackState::Active);
        } else {
            self.status.set_state(PlaybackState::Waiting);
        }
        Ok(())
    }

    fn flush_streams(&mut self) {
        if let Some(video) = self.video.as_mut() {
            video.flush();
        }
        if let Some(audio) = self.audio.as_mut() {
            audio.flush();
        }
    }

    // ========================================================================
    // Seek
    // ========================================================================

    fn seek(&mut self, ms: i64) -> Result<()> {
        if !self.config.is_local_file || !self.router.demuxer().is_seekable() {
            debug!("Seek ignored, '{}' is not seekable", self.config.path);
            return Ok(());
        }

        let start = self.router.demuxer().start_time_ns();
        let media_ns = start.saturating_add(ms.max(0).saturating_mul(1_000_000));
        let target_pts = self.scale(media_ns);
        let now = self.clock.now_ns();

        if self.is_replaying() {
            self.cache.seek(target_pts);
            let first = min_pts(self.cache.video_head_pts(), self.cache.audio_head_pts());
            self.pclock.reanchor(first.unwrap_or(target_pts), now);
        } else {
            if let Err(e) = self.router.seek(media_ns) {
                warn!("Seek to {} ms in '{}' failed: {}", ms, self.config.path, e);
                return Ok(());
            }
            // The rest of this pass starts mid-media; caching resumes on the next one
            if !self.cache.is_empty() {
                info!("Seek during the first pass, loop cache dropped");
                self.cache.clear();
            }
            self.pass_from_start = false;
            self.flush_streams();
            self.demux_eof = false;
            self.prepare_frames()?;
            self.skip_to(target_pts)?;
            let first = self.min_ready_pts().unwrap_or(target_pts);
            self.pclock.reanchor(first, now);
        }

        if self.paused_at.is_some() {
            self.paused_at = Some(now);
        }
        self.publish_cache();
        debug!("Seeked '{}' to {} ms", self.config.path, ms);

        if !self.active || self.paused_at.is_some() {
            self.deliver_video(Delivery::Seek)?;
        }
        Ok(())
    }

    /// Drop frames that start before `target_pts`.
    fn skip_to(&mut self, target_pts: i64) -> Result<()> {
        loop {
            let mut skipped = false;
            for state in [self.video.as_mut(), self.audio.as_mut()].into_iter().flatten() {
                if state.frame_ready && state.frame_pts < target_pts {
                    state.consume();
                    skipped = true;
                }
            }
            if !skipped {
                return Ok(());
            }
            self.prepare_frames()?;
        }
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    fn deliver_video(&mut self, delivery: Delivery) -> Result<()> {
        if self.is_replaying() {
            let frame = match delivery {
                Delivery::Play => match self.cache.video_head_pts() {
                    Some(pts) if self.pclock.can_play(pts) => self.cache.next_video(),
                    _ => None,
                },
                Delivery::Preload | Delivery::Seek => self.cache.peek_video().cloned(),
            };
            if let Some(mut frame) = frame {
                frame.timestamp = self.pclock.timestamp(frame.dec_pts);
                self.emit_video(&frame, delivery);
            }
            return Ok(());
        }

        let Some(state) = self.video.as_mut() else {
            return Ok(());
        };
        if !state.frame_ready {
            return Ok(());
        }
        if delivery == Delivery::Play {
            if !self.pclock.can_play(state.frame_pts) {
                return Ok(());
            }
            state.consume();
        }
        let pts = state.frame_pts;

        if !self.config.is_local_file && !state.got_first_keyframe {
            if !state.picture().is_some_and(|p| p.keyframe) {
                debug!("Waiting for a keyframe, frame at {} ns dropped", pts);
                return Ok(());
            }
            state.got_first_keyframe = true;
        }

        let Some(picture) = state.picture() else {
            return Ok(());
        };
        let Some(mut frame) = self.normalizer.normalize(picture, pts)? else {
            return Ok(());
        };
        frame.timestamp = self.pclock.timestamp(pts);

        if delivery == Delivery::Play && self.filling_cache() {
            self.cache.record_video(&frame);
            self.publish_cache();
        }
        self.emit_video(&frame, delivery);
        Ok(())
    }

    fn emit_video(&mut self, frame: &VideoFrame, delivery: Delivery) {
        self.status.set_position_ms(self.media_ms(frame.dec_pts));
        match delivery {
            Delivery::Play => self.sink.on_video_frame(frame),
            Delivery::Preload => self.sink.on_video_preload(frame),
            Delivery::Seek => self.sink.on_video_seek(frame),
        }
    }

    fn deliver_audio(&mut self) {
        if self.is_replaying() {
            let buffer = match self.cache.audio_head_pts() {
                Some(pts) if self.pclock.can_play(pts) => self.cache.next_audio(),
                _ => None,
            };
            if let Some(mut buffer) = buffer {
                buffer.timestamp = self.pclock.timestamp(buffer.dec_frame_pts);
                self.emit_audio(&buffer);
            }
            return;
        }

        let Some(state) = self.audio.as_mut() else {
            return;
        };
        if !state.frame_ready || !self.pclock.can_play(state.frame_pts) {
            return;
        }
        state.consume();
        let pts = state.frame_pts;

        let Some(raw) = state.audio() else {
            return;
        };
        let Some(mut buffer) = AudioBuffer::from_raw(raw, self.speed, pts) else {
            debug!("Dropping audio buffer in unsupported format {:?}", raw.format);
            return;
        };
        buffer.timestamp = self.pclock.timestamp(pts);

        if self.filling_cache() {
            self.cache.record_audio(&buffer);
            self.publish_cache();
        }
        self.emit_audio(&buffer);
    }

    fn emit_audio(&mut self, buffer: &AudioBuffer) {
        if !self.info.has_video {
            self.status.set_position_ms(self.media_ms(buffer.dec_frame_pts));
        }
        self.sink.on_audio_frame(buffer);
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn publish_cache(&self) {
        self.status.set_cache(self.cache.stats(self.caching));
    }

    // Media time runs `100 / speed` times slower in the session clock
    fn scale(&self, ns: i64) -> i64 {
        (ns as i128 * 100 / self.speed.max(1) as i128) as i64
    }

    fn media_ms(&self, pts: i64) -> i64 {
        let media_ns = (pts as i128 * self.speed as i128 / 100) as i64;
        (media_ns - self.router.demuxer().start_time_ns()) / 1_000_000
    }
}

/// A read interrupted by stop or kill is not a playback failure.
fn tolerate_interrupt(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_interrupt() => {
            debug!("Interrupted");
            Ok(())
        }
        other => other,
    }
}

fn min_pts(a: Option<i64>, b: Option<i64>) -> Option<i64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
