//! Session configuration, fixed for the lifetime of an open session.

use serde::{Deserialize, Serialize};

use crate::error::{MediaError, Result};
use crate::pixel_convert::ColorRange;

pub const MIN_SPEED_PERCENT: u32 = 1;
pub const MAX_SPEED_PERCENT: u32 = 200;
pub const DEFAULT_SPEED_PERCENT: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// File path or network URL
    pub path: String,
    /// Explicit container format name, if the extension is not enough
    pub format_hint: Option<String>,
    pub hardware_decoding: bool,
    /// Network read buffer size in bytes (streamed sources only, 0 = backend default)
    pub buffering_bytes: usize,
    pub speed_percent: u32,
    /// `ColorRange::Default` keeps whatever the decoder reports
    pub force_range: ColorRange,
    pub linear_alpha: bool,
    pub looping: bool,
    pub enable_caching: bool,
    pub is_local_file: bool,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            format_hint: None,
            hardware_decoding: false,
            buffering_bytes: 2 * 1024 * 1024,
            speed_percent: DEFAULT_SPEED_PERCENT,
            force_range: ColorRange::Default,
            linear_alpha: false,
            looping: false,
            enable_caching: true,
            is_local_file: true,
        }
    }
}

impl MediaConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Speed only applies to local files; anything out of range plays at 100%.
    pub fn effective_speed(&self) -> u32 {
        if !self.is_local_file
            || self.speed_percent < MIN_SPEED_PERCENT
            || self.speed_percent > MAX_SPEED_PERCENT
        {
            DEFAULT_SPEED_PERCENT
        } else {
            self.speed_percent
        }
    }

    /// Buffer size handed to the opener, only meaningful for streamed sources.
    pub fn effective_buffering(&self) -> Option<usize> {
        if self.is_local_file || self.buffering_bytes == 0 {
            None
        } else {
            Some(self.buffering_bytes)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.path.trim().is_empty() {
            return Err(MediaError::Config("empty source path".into()));
        }
        Ok(())
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| MediaError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speed_normalization() {
        let mut config = MediaConfig::new("clip.mp4");
        config.speed_percent = 50;
        assert_eq!(config.effective_speed(), 50);

        config.speed_percent = 0;
        assert_eq!(config.effective_speed(), 100);

        config.speed_percent = 201;
        assert_eq!(config.effective_speed(), 100);

        config.speed_percent = 200;
        config.is_local_file = false;
        assert_eq!(config.effective_speed(), 100);
    }

    #[test]
    fn test_buffering_only_for_streams() {
        let mut config = MediaConfig::new("rtmp://host/live");
        assert_eq!(config.effective_buffering(), None);
        config.is_local_file = false;
        assert_eq!(config.effective_buffering(), Some(2 * 1024 * 1024));
        config.buffering_bytes = 0;
        assert_eq!(config.effective_buffering(), None);
    }

    #[test]
    fn test_validate_rejects_empty_path() {
        assert!(MediaConfig::default().validate().is_err());
        assert!(MediaConfig::new("a.wav").validate().is_ok());
    }

    #[test]
    fn test_json_partial_config() {
        let config =
            MediaConfig::from_json(r#"{"path": "loop.mov", "looping": true, "force_range": "Full"}"#)
                .unwrap();
        assert_eq!(config.path, "loop.mov");
        assert!(config.looping);
        assert_eq!(config.force_range, ColorRange::Full);
        assert_eq!(config.speed_percent, 100);
        assert!(config.enable_caching);
    }
}
