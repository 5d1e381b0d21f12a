//! # Reel Core
//!
//! Threaded media playback engine. A session opens one file or stream,
//! decodes it on a dedicated worker thread and hands timestamped, normalized
//! video frames and audio buffers to a consumer through callbacks, paced
//! against a shared clock. Looping local files are replayed from a decoded
//! frame cache after the first pass.

// ============================================================================
// Session API
// ============================================================================
pub mod config;
pub mod error;
pub mod session;
pub mod control;

// ============================================================================
// Timing
// ============================================================================
pub mod clock;
pub mod sync;

// ============================================================================
// Demux / Decode
// ============================================================================
pub mod demuxer;
pub mod decode;
pub mod source;

// ============================================================================
// Frames
// ============================================================================
pub mod frame;
pub mod pixel_convert;
pub mod normalizer;
pub mod frame_cache;

mod engine;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::MediaConfig;
pub use control::PlaybackState;
pub use error::{MediaError, Result};
pub use frame::{AudioBuffer, VideoFrame};
pub use frame_cache::CacheStats;
pub use session::{MediaInfo, MediaSession, MediaSink};
pub use source::{MediaOpener, PatternOpener, PatternSpec};

// ============================================================================
// Version
// ============================================================================
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
