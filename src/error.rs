//! Error types for motion-detect-core

use std::io;
use thiserror::Error;

/// Result type alias using DetectError
pub type Result<T> = std::result::Result<T, DetectError>;

/// Detection error types
///
/// All errors that can occur while coordinating a detection session.
#[derive(Debug, Error)]
pub enum DetectError {
    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Worker process failed to start
    #[error("Launch error: {0}")]
    Launch(String),

    /// Unparseable control message or a raw event missing required fields
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The worker channel tore down while a request was pending
    #[error("Channel closed")]
    ChannelClosed,

    /// Session already has a stream attached
    #[error("Session already active")]
    AlreadyActive,

    /// Frame transport socket failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Error reported by the worker in a reply
    #[error("Worker error: {0}")]
    Worker(String),

    /// A request did not receive a reply within the configured timeout
    #[error("Request timed out")]
    Timeout,
}

impl DetectError {
    /// Create a Launch error
    pub fn launch(msg: impl Into<String>) -> Self {
        Self::Launch(msg.into())
    }

    /// Create a Protocol error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a Transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}
