//! Encoder error types
use thiserror::Error;

/// Errors that can occur while encoding the package tree
#[derive(Error, Debug)]
pub enum EncodeError {
    /// Configuration file or flag problem
    #[error("Configuration error: {0}")]
    Config(String),
    /// A source is not 48 kHz PCM and re-materialization was not possible
    #[error("Source not conforming: {0}")]
    SourceNotConforming(String),
    /// The external media tool returned non-zero
    #[error("Media tool failed: {0}")]
    Encode(String),
    /// Cached content address disagrees with a recompute
    #[error("Content address mismatch for {path}: cached {cached}, computed {computed}")]
    HashMismatch {
        path: String,
        cached: u64,
        computed: u64,
    },
    /// The user declined a confirmation prompt
    #[error("Cancelled: {0}")]
    Cancelled(String),
    /// File system IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Worker task panicked or was cancelled
    #[error("Task failed: {0}")]
    Task(String),
}

impl EncodeError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    pub fn cancelled(msg: impl Into<String>) -> Self {
        Self::Cancelled(msg.into())
    }

    pub fn task(e: impl std::fmt::Display) -> Self {
        Self::Task(e.to_string())
    }
}
