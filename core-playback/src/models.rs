//! Domain types shared by the queue, controller and download manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::PlaybackError;

/// Immutable snapshot of a playable track.
///
/// Tracks are supplied by callers; the engine never owns them long-term.
/// A track with neither `remote_audio_ref` nor `local_path` has no
/// resolvable source and is rejected when played.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub duration_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_audio_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_image_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
}

impl Track {
    /// Track streamed from the API.
    pub fn remote(
        id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        duration_seconds: f64,
        audio_ref: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            duration_seconds,
            remote_audio_ref: Some(audio_ref.into()),
            remote_image_ref: None,
            local_path: None,
        }
    }

    /// Track backed by a file on this device.
    pub fn local(
        id: impl Into<String>,
        title: impl Into<String>,
        artist: impl Into<String>,
        duration_seconds: f64,
        path: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            duration_seconds,
            remote_audio_ref: None,
            remote_image_ref: None,
            local_path: Some(path.into()),
        }
    }

    pub fn with_image(mut self, image_ref: impl Into<String>) -> Self {
        self.remote_image_ref = Some(image_ref.into());
        self
    }

    pub fn has_source(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        present(&self.remote_audio_ref) || present(&self.local_path)
    }

    pub fn is_local(&self) -> bool {
        self.local_path.is_some()
    }
}

/// Loosely-typed track shape as returned by the remote API.
///
/// Field names vary between endpoints, hence the aliases. Convert with
/// `Track::try_from(payload)`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackPayload {
    #[serde(default, alias = "_id", alias = "trackId")]
    pub id: Option<String>,
    #[serde(default, alias = "name")]
    pub title: Option<String>,
    #[serde(default, alias = "artistName")]
    pub artist: Option<String>,
    #[serde(default, alias = "duration")]
    pub duration_seconds: Option<f64>,
    #[serde(default, alias = "audioUrl", alias = "url")]
    pub remote_audio_ref: Option<String>,
    #[serde(default, alias = "imageUrl", alias = "coverUrl")]
    pub remote_image_ref: Option<String>,
    #[serde(default)]
    pub local_path: Option<String>,
}

const UNKNOWN_TITLE: &str = "Unknown Title";
const UNKNOWN_ARTIST: &str = "Unknown Artist";

impl TryFrom<TrackPayload> for Track {
    type Error = PlaybackError;

    fn try_from(payload: TrackPayload) -> Result<Self, Self::Error> {
        let id = payload
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| PlaybackError::InvalidTrack("track id is missing".to_string()))?;

        let duration_seconds = payload.duration_seconds.unwrap_or(0.0);
        if !duration_seconds.is_finite() || duration_seconds < 0.0 {
            return Err(PlaybackError::InvalidTrack(format!(
                "track {} has invalid duration {}",
                id, duration_seconds
            )));
        }

        let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        Ok(Track {
            title: non_blank(payload.title).unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
            artist: non_blank(payload.artist).unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
            duration_seconds,
            remote_audio_ref: non_blank(payload.remote_audio_ref),
            remote_image_ref: non_blank(payload.remote_image_ref),
            local_path: non_blank(payload.local_path),
            id,
        })
    }
}

/// Playback state machine status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlaybackStatus {
    #[default]
    Idle,
    Loading,
    Playing,
    Paused,
    Ended,
}

/// Concrete URI the device should load for a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSource {
    pub uri: String,
    pub is_local: bool,
}

impl ResolvedSource {
    pub fn local(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            is_local: true,
        }
    }

    pub fn remote(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            is_local: false,
        }
    }
}

/// Observable player state.
///
/// `current_track`, `source`, `position_seconds` and `duration_seconds`
/// always change together.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    pub current_track: Option<Track>,
    pub source: Option<ResolvedSource>,
    pub position_seconds: f64,
    pub duration_seconds: f64,
    pub volume: f32,
    pub muted: bool,
    pub shuffle_enabled: bool,
    pub loop_enabled: bool,
    /// Seek requested by the UI that the device has not applied yet.
    pub pending_seek: Option<f64>,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            status: PlaybackStatus::Idle,
            current_track: None,
            source: None,
            position_seconds: 0.0,
            duration_seconds: 0.0,
            volume: 1.0,
            muted: false,
            shuffle_enabled: false,
            loop_enabled: false,
            pending_seek: None,
        }
    }
}

impl PlaybackState {
    pub fn is_playing(&self) -> bool {
        self.status == PlaybackStatus::Playing
    }

    pub fn current_track_id(&self) -> Option<&str> {
        self.current_track.as_ref().map(|t| t.id.as_str())
    }

    /// Volume actually sent to the device.
    pub fn effective_volume(&self) -> f32 {
        if self.muted {
            0.0
        } else {
            self.volume
        }
    }
}

/// Download job lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl DownloadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadStatus::Completed | DownloadStatus::Failed)
    }
}

/// Transient record of a single transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadJob {
    pub track_id: String,
    pub destination_path: PathBuf,
    pub status: DownloadStatus,
    pub progress_percent: u8,
}

impl DownloadJob {
    pub fn new(track_id: impl Into<String>, destination_path: PathBuf) -> Self {
        Self {
            track_id: track_id.into(),
            destination_path,
            status: DownloadStatus::Pending,
            progress_percent: 0,
        }
    }
}

/// Durable catalog entry for a completed download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadedTrackRecord {
    pub track_id: String,
    pub local_path: String,
    pub downloaded_at: DateTime<Utc>,
    pub file_size_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_with_aliases() {
        let payload: TrackPayload = serde_json::from_str(
            r#"{"_id":"abc","name":"Song","artistName":"Band","duration":201.5,"audioUrl":"/audio/abc.mp3"}"#,
        )
        .unwrap();
        let track = Track::try_from(payload).unwrap();

        assert_eq!(track.id, "abc");
        assert_eq!(track.title, "Song");
        assert_eq!(track.artist, "Band");
        assert_eq!(track.duration_seconds, 201.5);
        assert_eq!(track.remote_audio_ref.as_deref(), Some("/audio/abc.mp3"));
        assert!(track.has_source());
    }

    #[test]
    fn test_payload_defaults_missing_names() {
        let payload = TrackPayload {
            id: Some("x".into()),
            title: Some("   ".into()),
            ..Default::default()
        };
        let track = Track::try_from(payload).unwrap();
        assert_eq!(track.title, UNKNOWN_TITLE);
        assert_eq!(track.artist, UNKNOWN_ARTIST);
        assert!(!track.has_source());
    }

    #[test]
    fn test_payload_rejects_bad_fields() {
        let no_id = TrackPayload::default();
        assert!(matches!(
            Track::try_from(no_id),
            Err(PlaybackError::InvalidTrack(_))
        ));

        let negative = TrackPayload {
            id: Some("y".into()),
            duration_seconds: Some(-1.0),
            ..Default::default()
        };
        assert!(Track::try_from(negative).is_err());
    }

    #[test]
    fn test_track_serializes_camel_case() {
        let track = Track::local("l1", "Title", "Artist", 10.0, "/music/a.mp3");
        let json = serde_json::to_value(&track).unwrap();
        assert_eq!(json["durationSeconds"], 10.0);
        assert_eq!(json["localPath"], "/music/a.mp3");
        assert!(json.get("remoteAudioRef").is_none());
    }

    #[test]
    fn test_effective_volume() {
        let mut state = PlaybackState {
            volume: 0.6,
            ..Default::default()
        };
        assert_eq!(state.effective_volume(), 0.6);
        state.muted = true;
        assert_eq!(state.effective_volume(), 0.0);
    }
}
