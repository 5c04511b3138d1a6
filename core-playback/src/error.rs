//! # Playback Error Types
//!
//! Error types for queue, playback, source resolution and download operations.

use bridge_traits::BridgeError;
use thiserror::Error;

/// Errors that can occur during playback operations.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Source Errors
    // ========================================================================
    /// Track has neither a local file nor a remote reference.
    #[error("No playable source for track: {0}")]
    MissingSource(String),

    /// A source exists but cannot be used right now (e.g. offline mode).
    #[error("Audio source unavailable: {0}")]
    SourceUnavailable(String),

    // ========================================================================
    // Queue Errors
    // ========================================================================
    /// Referenced track is not part of the current queue.
    #[error("Track not in queue: {0}")]
    TrackNotInQueue(String),

    /// Track payload failed validation.
    #[error("Invalid track: {0}")]
    InvalidTrack(String),

    // ========================================================================
    // Download Errors
    // ========================================================================
    /// Network transfer failed.
    #[error("Network error: {0}")]
    Network(String),

    /// Local file operation failed.
    #[error("Filesystem error: {0}")]
    Filesystem(String),

    /// Catalog and disk disagree in a way that cannot be healed.
    #[error("Download catalog inconsistency: {0}")]
    CatalogInconsistency(String),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// Host bridge reported a failure.
    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error (should not occur in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PlaybackError {
    /// Returns `true` if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            PlaybackError::Network(_) | PlaybackError::SourceUnavailable(_) => true,
            PlaybackError::Bridge(e) => e.is_network(),
            _ => false,
        }
    }

    /// Returns `true` if this error is due to network issues.
    pub fn is_network_error(&self) -> bool {
        match self {
            PlaybackError::Network(_) => true,
            PlaybackError::Bridge(e) => e.is_network(),
            _ => false,
        }
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
