//! Media backends.
//!
//! A `MediaOpener` turns a `MediaConfig` into a demuxer plus one decoder per
//! chosen stream. The engine never sees anything backend specific beyond
//! the `Demuxer` and `StreamDecoder` traits.

use crate::config::MediaConfig;
use crate::control::Interrupt;
use crate::decode::StreamDecoder;
use crate::demuxer::{Demuxer, StreamInfo, StreamKind};
use crate::error::Result;

pub mod pattern;

#[cfg(feature = "symphonia")]
pub mod symphonia;

pub use pattern::{PatternOpener, PatternSpec};

#[cfg(feature = "symphonia")]
pub use self::symphonia::SymphoniaOpener;

/// Demuxer and decoders for one opened source.
pub struct OpenedMedia {
    pub demuxer: Box<dyn Demuxer>,
    pub video: Option<Box<dyn StreamDecoder>>,
    pub audio: Option<Box<dyn StreamDecoder>>,
}

pub trait MediaOpener: Send + Sync {
    fn name(&self) -> &str;

    /// Open `config.path`. Blocking reads must give up once `interrupt` is raised.
    fn open(&self, config: &MediaConfig, interrupt: &Interrupt) -> Result<OpenedMedia>;
}

/// First usable stream of `kind`. Video streams need a size, audio streams a rate.
pub fn best_stream(streams: &[StreamInfo], kind: StreamKind) -> Option<usize> {
    streams
        .iter()
        .filter(|s| s.kind == kind)
        .find(|s| match kind {
            StreamKind::Video => s.width > 0 || s.pixel_format.is_some(),
            StreamKind::Audio => s.sample_rate > 0,
            StreamKind::Other => false,
        })
        .map(|s| s.index)
}
