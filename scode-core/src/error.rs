//! Runtime error types
use thiserror::Error;

/// Errors that can occur while loading the atlas or sound buffers
#[derive(Error, Debug)]
pub enum SoundError {
    /// Network or filesystem failure while fetching the atlas document
    #[error("Atlas fetch failed: {0}")]
    AtlasFetch(String),
    /// The atlas document did not parse or shape-check
    #[error("Atlas malformed: {0}")]
    AtlasMalformed(String),
    /// Fetching an encoded audio file failed
    #[error("Fetch failed for {location}: {reason}")]
    Fetch { location: String, reason: String },
    /// Fetched bytes could not be decoded to PCM
    #[error("Decode failed for {file_name}: {reason}")]
    Decode { file_name: String, reason: String },
    /// Operation on a manager that has been disposed
    #[error("Sound manager is disposed")]
    Disposed,
    /// File system IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SoundError {
    pub fn atlas_fetch(e: impl std::fmt::Display) -> Self {
        Self::AtlasFetch(e.to_string())
    }

    pub fn atlas_malformed(msg: impl Into<String>) -> Self {
        Self::AtlasMalformed(msg.into())
    }

    pub fn fetch(location: impl Into<String>, e: impl std::fmt::Display) -> Self {
        Self::Fetch {
            location: location.into(),
            reason: e.to_string(),
        }
    }

    pub fn decode(file_name: impl Into<String>, e: impl std::fmt::Display) -> Self {
        Self::Decode {
            file_name: file_name.into(),
            reason: e.to_string(),
        }
    }
}
