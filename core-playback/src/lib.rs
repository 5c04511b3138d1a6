//! # Playback Engine Core
//!
//! Decides which track is active, what plays next, where its bytes come
//! from, and keeps offline copies.
//!
//! ## Overview
//!
//! This crate handles:
//! - Queue ordering with sequential, shuffled and looped playback
//! - The playback state machine driving a host audio device
//! - Resolution of tracks to local `file://` or remote URIs
//! - Download jobs and the durable catalog of downloaded tracks
//! - Debounced sync of playback preferences to a remote endpoint
//!
//! Everything is reached through [`PlaybackEngine`], built from a
//! [`core_runtime::config::EngineConfig`].

pub mod controller;
pub mod downloads;
pub mod engine;
pub mod error;
pub mod models;
pub mod queue;
pub mod settings_sync;
pub mod source;

pub use controller::{PlaybackController, PlayerSnapshot, LAST_PLAYED_KEY};
pub use downloads::{DownloadManager, CATALOG_KEY};
pub use engine::{PlaybackEngine, OFFLINE_MODE_KEY};
pub use error::{PlaybackError, Result};
pub use models::{
    DownloadJob, DownloadStatus, DownloadedTrackRecord, PlaybackState, PlaybackStatus,
    ResolvedSource, Track, TrackPayload,
};
pub use queue::{PlaybackMode, QueueManager, QueueStep, RESTART_THRESHOLD_SECONDS};
pub use settings_sync::{RemotePlaybackSettings, SettingsSync};
pub use source::{LocalCopyLookup, SourceResolver};
