//! # Media Session
//!
//! The public handle. `open` does all the fallible setup on the caller's
//! thread (container, decoders, first frames, scaler) and only then starts
//! the worker, so every fatal-at-open condition comes back as an `Err`.
//!
//! ```text
//! caller ──Command──► channel ──► worker ──callbacks──► MediaSink
//!    ▲                               │
//!    └──── SharedStatus (state, position, cache stats) ◄┘
//! ```

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::MediaConfig;
use crate::control::{Command, Interrupt, PlaybackState, SharedStatus};
use crate::demuxer::{Demuxer, Rational, StreamKind};
use crate::engine::Engine;
use crate::error::{MediaError, Result};
use crate::frame::{AudioBuffer, VideoFrame};
use crate::frame_cache::{estimate_frames, CacheStats};
use crate::pixel_convert::PixelFormat;
use crate::source::MediaOpener;

/// Receives everything the worker produces. All methods run on the worker
/// thread; blocking in them stalls playback.
pub trait MediaSink: Send {
    fn on_ready(&mut self, _info: &MediaInfo) {}

    fn on_video_frame(&mut self, _frame: &VideoFrame) {}

    /// Poster frame after a reset of an inactive local session.
    fn on_video_preload(&mut self, _frame: &VideoFrame) {}

    /// Frame at the new position after seeking while paused or stopped.
    fn on_video_seek(&mut self, _frame: &VideoFrame) {}

    fn on_audio_frame(&mut self, _buffer: &AudioBuffer) {}

    fn on_stopped(&mut self) {}
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MediaInfo {
    pub path: String,
    pub has_video: bool,
    pub has_audio: bool,
    pub duration_ns: Option<i64>,
    /// Container count, or estimated from duration and frame rate
    pub frame_count: Option<u64>,
    pub width: u32,
    pub height: u32,
    pub pixel_format: Option<PixelFormat>,
    pub frame_rate: Option<Rational>,
    pub sample_rate: u32,
    pub channels: u32,
    pub seekable: bool,
}

impl MediaInfo {
    pub fn describe(
        path: &str,
        demuxer: &dyn Demuxer,
        video_index: Option<usize>,
        audio_index: Option<usize>,
    ) -> Self {
        let mut info = MediaInfo {
            path: path.to_string(),
            has_video: video_index.is_some(),
            has_audio: audio_index.is_some(),
            duration_ns: demuxer.duration_ns(),
            seekable: demuxer.is_seekable(),
            ..Default::default()
        };

        for stream in demuxer.streams() {
            if Some(stream.index) == video_index && stream.kind == StreamKind::Video {
                info.width = stream.width;
                info.height = stream.height;
                info.pixel_format = stream.pixel_format;
                info.frame_rate = stream.frame_rate;
                info.frame_count = stream
                    .frame_count
                    .or_else(|| match estimate_frames(info.duration_ns, stream.frame_rate) {
                        0 => None,
                        n => Some(n),
                    });
            }
            if Some(stream.index) == audio_index && stream.kind == StreamKind::Audio {
                info.sample_rate = stream.sample_rate;
                info.channels = stream.channels;
            }
        }
        info
    }
}

pub struct MediaSession {
    path: String,
    commands: Sender<Command>,
    interrupt: Interrupt,
    status: Arc<SharedStatus>,
    info: MediaInfo,
    worker: Option<JoinHandle<()>>,
}

impl MediaSession {
    pub fn open(
        config: MediaConfig,
        opener: &dyn MediaOpener,
        clock: Arc<dyn Clock>,
        sink: Box<dyn MediaSink>,
    ) -> Result<Self> {
        config.validate()?;

        let path = config.path.clone();
        let status = Arc::new(SharedStatus::default());
        status.set_state(PlaybackState::Opening);

        let interrupt = Interrupt::new();
        let (commands, receiver) = crossbeam_channel::unbounded();

        let engine = Engine::open(
            config,
            opener,
            clock,
            sink,
            receiver,
            interrupt.clone(),
            status.clone(),
        )?;
        let info = engine.info().clone();

        let worker = std::thread::Builder::new()
            .name("reel-media".into())
            .spawn(move || engine.run())
            .map_err(|e| {
                warn!("Could not create media thread for '{}': {}", path, e);
                MediaError::Spawn(e.to_string())
            })?;

        info!(
            "Opened '{}' (video: {}, audio: {})",
            path, info.has_video, info.has_audio
        );

        Ok(Self {
            path,
            commands,
            interrupt,
            status,
            info,
            worker: Some(worker),
        })
    }

    pub fn play(&self, looping: bool) {
        self.send(Command::Play { looping });
    }

    pub fn pause(&self, paused: bool) {
        self.send(Command::Pause(paused));
    }

    pub fn stop(&self) {
        // Raised before the command goes out so the worker can't clear it first
        self.interrupt.set_stopping(true);
        self.send(Command::Stop);
    }

    /// Seek to `ms` of media time. Ignored on streamed sources.
    pub fn seek(&self, ms: i64) {
        self.send(Command::Seek(ms));
    }

    /// Stop the worker and wait for it. Idempotent.
    pub fn free(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.send(Command::Kill);
            self.interrupt.kill();
            if worker.join().is_err() {
                warn!("Media thread for '{}' panicked", self.path);
            }
            debug!("Freed '{}'", self.path);
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.status.state()
    }

    pub fn info(&self) -> &MediaInfo {
        &self.info
    }

    /// Media time of the last delivered frame.
    pub fn position_ms(&self) -> i64 {
        self.status.position_ms()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.status.cache()
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Media thread for '{}' is gone, {:?} dropped", self.path, command);
        }
    }
}

impl Drop for MediaSession {
    fn drop(&mut self) {
        self.free();
    }
}
