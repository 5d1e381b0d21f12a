//! # Reel Player
//!
//! Headless front end for reel-core: opens one media session, drives it with
//! the command API and prints what was delivered as JSON.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use reel_core::clock::SystemClock;
use reel_core::pixel_convert::ColorRange;
use reel_core::source::{MediaOpener, PatternOpener, PatternSpec};
use reel_core::{
    AudioBuffer, CacheStats, MediaConfig, MediaInfo, MediaSession, MediaSink, PlaybackState,
    VideoFrame,
};

#[derive(Parser, Debug)]
#[command(name = "reel", version, about = "Headless media playback")]
struct Cli {
    /// File path or stream URL
    input: Option<String>,

    /// JSON file with a MediaConfig; flags below override it
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Play the synthetic test pattern instead of a file
    #[arg(long)]
    pattern: bool,

    /// Pattern length in milliseconds
    #[arg(long, default_value_t = 5_000)]
    pattern_ms: u64,

    #[arg(long = "loop")]
    looping: bool,

    #[arg(long)]
    no_cache: bool,

    /// Playback speed in percent (local files only)
    #[arg(long)]
    speed: Option<u32>,

    #[arg(long, value_enum)]
    range: Option<RangeArg>,

    /// Seek here before playing
    #[arg(long, value_name = "MS")]
    seek: Option<i64>,

    /// Give up after this many seconds (looping sessions never stop on their own)
    #[arg(long, default_value_t = 30.0)]
    seconds: f64,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum RangeArg {
    Default,
    Partial,
    Full,
}

impl From<RangeArg> for ColorRange {
    fn from(range: RangeArg) -> Self {
        match range {
            RangeArg::Default => ColorRange::Default,
            RangeArg::Partial => ColorRange::Partial,
            RangeArg::Full => ColorRange::Full,
        }
    }
}

// ============================================================================
// Delivery Statistics
// ============================================================================

#[derive(Debug, Default, Clone, Serialize)]
struct PlaybackStats {
    video_frames: u64,
    audio_buffers: u64,
    audio_frames: u64,
    preload_frames: u64,
    seek_frames: u64,
    first_timestamp_ns: Option<i64>,
    last_timestamp_ns: Option<i64>,
    max_video_gap_ns: i64,
    flipped_frames: u64,
    video_format: Option<String>,
    audio_rate: Option<u32>,
    stopped: bool,
}

#[derive(Clone, Default)]
struct StatsSink {
    stats: Arc<Mutex<PlaybackStats>>,
}

impl StatsSink {
    fn snapshot(&self) -> PlaybackStats {
        self.stats.lock().clone()
    }

    fn note_timestamp(stats: &mut PlaybackStats, timestamp: i64) {
        stats.first_timestamp_ns.get_or_insert(timestamp);
        stats.last_timestamp_ns = Some(timestamp);
    }
}

impl MediaSink for StatsSink {
    fn on_ready(&mut self, info: &MediaInfo) {
        info!(
            "Ready: {}x{} {:?}, audio {} Hz x{}",
            info.width, info.height, info.pixel_format, info.sample_rate, info.channels
        );
    }

    fn on_video_frame(&mut self, frame: &VideoFrame) {
        let mut stats = self.stats.lock();
        if let Some(last) = stats.last_timestamp_ns.filter(|_| stats.video_frames > 0) {
            stats.max_video_gap_ns = stats.max_video_gap_ns.max(frame.timestamp - last);
        }
        stats.video_frames += 1;
        if frame.flip {
            stats.flipped_frames += 1;
        }
        stats.video_format = Some(format!("{:?}", frame.format));
        Self::note_timestamp(&mut stats, frame.timestamp);
    }

    fn on_video_preload(&mut self, _frame: &VideoFrame) {
        self.stats.lock().preload_frames += 1;
    }

    fn on_video_seek(&mut self, _frame: &VideoFrame) {
        self.stats.lock().seek_frames += 1;
    }

    fn on_audio_frame(&mut self, buffer: &AudioBuffer) {
        let mut stats = self.stats.lock();
        stats.audio_buffers += 1;
        stats.audio_frames += buffer.frames as u64;
        stats.audio_rate = Some(buffer.samples_per_sec);
    }

    fn on_stopped(&mut self) {
        self.stats.lock().stopped = true;
    }
}

#[derive(Serialize)]
struct Report {
    info: MediaInfo,
    playback: PlaybackStats,
    cache: CacheStats,
    final_state: PlaybackState,
    position_ms: i64,
    wall_ms: u128,
}

// ============================================================================
// Setup
// ============================================================================

/// Anything with a URL scheme other than `file:` is streamed.
fn is_local_source(input: &str) -> bool {
    match url::Url::parse(input) {
        // Single letter schemes are Windows drive letters
        Ok(url) => url.scheme() == "file" || url.scheme().len() == 1,
        Err(_) => true,
    }
}

/// Path handed to the opener: `file:` URLs become plain paths.
fn source_path(input: &str) -> Result<String> {
    match url::Url::parse(input) {
        Ok(url) if url.scheme() == "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| anyhow::anyhow!("not a local file URL: {}", input))?;
            Ok(path.to_string_lossy().into_owned())
        }
        _ => Ok(input.to_string()),
    }
}

fn build_config(cli: &Cli) -> Result<MediaConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            MediaConfig::from_json(&text)?
        }
        None => MediaConfig::default(),
    };

    if let Some(input) = &cli.input {
        config.path = source_path(input)?;
        config.is_local_file = is_local_source(input);
    }
    if cli.pattern && config.path.is_empty() {
        config.path = "pattern://bars".into();
    }
    if cli.looping {
        config.looping = true;
    }
    if cli.no_cache {
        config.enable_caching = false;
    }
    if let Some(speed) = cli.speed {
        config.speed_percent = speed;
    }
    if let Some(range) = cli.range {
        config.force_range = range.into();
    }

    config.validate()?;
    Ok(config)
}

fn select_opener(cli: &Cli) -> Result<Box<dyn MediaOpener>> {
    if cli.pattern {
        return Ok(Box::new(PatternOpener::new(PatternSpec {
            duration_ms: cli.pattern_ms,
            ..Default::default()
        })));
    }
    #[cfg(feature = "symphonia")]
    {
        Ok(Box::new(reel_core::source::SymphoniaOpener))
    }
    #[cfg(not(feature = "symphonia"))]
    {
        bail!("no media backend compiled in; use --pattern or enable the symphonia feature")
    }
}

// ============================================================================
// Main
// ============================================================================

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("reel=info")),
        )
        .init();

    let cli = Cli::parse();
    if cli.input.is_none() && !cli.pattern && cli.config.is_none() {
        bail!("nothing to play: give a path, --config or --pattern");
    }
    info!("Reel v{}", reel_core::VERSION);

    let config = build_config(&cli)?;
    let opener = select_opener(&cli)?;
    let sink = StatsSink::default();

    let started = Instant::now();
    let looping = config.looping;
    let mut session = MediaSession::open(
        config,
        opener.as_ref(),
        SystemClock::shared(),
        Box::new(sink.clone()),
    )
    .context("opening media")?;

    if let Some(ms) = cli.seek {
        session.seek(ms);
    }
    session.play(looping);

    let deadline = started + Duration::from_secs_f64(cli.seconds.max(0.0));
    while Instant::now() < deadline && session.is_running() && !sink.snapshot().stopped {
        std::thread::sleep(Duration::from_millis(20));
    }
    if !sink.snapshot().stopped && session.is_running() {
        warn!("Time limit reached, stopping");
        session.stop();
    }
    session.free();

    let report = Report {
        info: session.info().clone(),
        playback: sink.snapshot(),
        cache: session.cache_stats(),
        final_state: session.state(),
        position_ms: session.position_ms(),
        wall_ms: started.elapsed().as_millis(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("reel").chain(args.iter().copied()))
    }

    #[test]
    fn test_local_source_detection() {
        assert!(is_local_source("/media/clip.mp4"));
        assert!(is_local_source("clip.mp4"));
        assert!(is_local_source("C:\\video\\clip.mkv"));
        assert!(is_local_source("file:///tmp/clip.wav"));
        assert!(!is_local_source("rtmp://live.example.com/app/key"));
        assert!(!is_local_source("https://example.com/stream.m3u8"));
    }

    #[test]
    fn test_file_url_becomes_path() {
        let config = build_config(&cli(&["file:///tmp/clip.wav"])).unwrap();
        assert_eq!(config.path, "/tmp/clip.wav");
        assert!(config.is_local_file);

        assert_eq!(source_path("/media/clip.mp4").unwrap(), "/media/clip.mp4");
        assert_eq!(source_path("https://example.com/a.m3u8").unwrap(), "https://example.com/a.m3u8");
    }

    #[test]
    fn test_flags_override_json_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"path": "from_json.wav", "speed_percent": 150, "enable_caching": true}}"#
        )
        .unwrap();
        let path = file.path().to_string_lossy().to_string();

        let config = build_config(&cli(&["--config", &path, "--no-cache", "--range", "full"])).unwrap();
        assert_eq!(config.path, "from_json.wav");
        assert_eq!(config.speed_percent, 150);
        assert!(!config.enable_caching);
        assert_eq!(config.force_range, ColorRange::Full);

        let config = build_config(&cli(&["--config", &path, "http://host/live", "--speed", "50"])).unwrap();
        assert_eq!(config.path, "http://host/live");
        assert!(!config.is_local_file);
        assert_eq!(config.effective_speed(), 100);
    }

    #[test]
    fn test_pattern_needs_no_path() {
        let config = build_config(&cli(&["--pattern", "--loop"])).unwrap();
        assert_eq!(config.path, "pattern://bars");
        assert!(config.looping);
        assert!(build_config(&cli(&[])).is_err());
    }

    #[test]
    fn test_stats_sink_counts_deliveries() {
        let mut config = MediaConfig::new("pattern://bars");
        config.looping = false;
        let sink = StatsSink::default();
        let mut session = MediaSession::open(
            config,
            &PatternOpener::new(PatternSpec {
                duration_ms: 200,
                ..Default::default()
            }),
            Arc::new(reel_core::ManualClock::new(0)),
            Box::new(sink.clone()),
        )
        .unwrap();
        session.play(false);

        let deadline = Instant::now() + Duration::from_secs(10);
        while !sink.snapshot().stopped && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        session.free();

        let stats = sink.snapshot();
        assert!(stats.stopped);
        assert_eq!(stats.video_frames, 5);
        assert_eq!(stats.audio_buffers, 10);
        assert_eq!(stats.audio_rate, Some(48_000));
        assert_eq!(stats.max_video_gap_ns, 40_000_000);
        assert_eq!(stats.video_format.as_deref(), Some("YUV420P"));
        // One poster frame at open, one after the stop
        assert_eq!(stats.preload_frames, 2);
    }
}
