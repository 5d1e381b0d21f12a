//! Engine error taxonomy.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Failed to open media '{path}': {reason}")]
    Open { path: String, reason: String },
    #[error("Could not initialize audio or video: '{0}'")]
    NoStreams(String),
    #[error("Failed to initialize scaler {src} -> {dst}: {reason}")]
    Scaler {
        src: String,
        dst: String,
        reason: String,
    },
    #[error("Read failed: {0}")]
    Io(String),
    #[error("Decode failed: {0}")]
    Decode(String),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Seek failed: {0}")]
    Seek(String),
    #[error("Read interrupted")]
    Interrupted,
    #[error("Could not create media thread: {0}")]
    Spawn(String),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl MediaError {
    pub fn open(path: &str, reason: impl Into<String>) -> Self {
        MediaError::Open {
            path: path.to_string(),
            reason: reason.into(),
        }
    }

    /// Errors that make `open` fail before any worker exists.
    pub fn is_fatal_at_open(&self) -> bool {
        matches!(
            self,
            MediaError::Open { .. }
                | MediaError::NoStreams(_)
                | MediaError::Scaler { .. }
                | MediaError::Spawn(_)
                | MediaError::Config(_)
        )
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, MediaError::Interrupted)
    }
}

impl From<std::io::Error> for MediaError {
    fn from(e: std::io::Error) -> Self {
        MediaError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MediaError>;
