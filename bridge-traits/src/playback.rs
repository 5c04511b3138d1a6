//! Playback device bridge.
//!
//! The engine never decodes audio itself. It drives a host-provided audio
//! device (ExoPlayer, AVPlayer, a desktop sink, ...) through a small command
//! surface and consumes the events that device reports back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// State reported by the host audio device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    Idle,
    Buffering,
    Playing,
    Paused,
    Stopped,
}

/// Events emitted by the audio device and fed into the playback controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceEvent {
    /// Playback position advanced or was moved.
    PositionChanged { position_seconds: f64 },
    /// The device changed its own playing/paused state (e.g. headset unplug).
    StateChanged { state: DeviceState },
    /// The loaded track reached its end.
    TrackEnded,
}

/// Trait for host audio devices.
///
/// Implementations must treat `load` as replacing whatever was loaded
/// before; `play` after `load` starts from the beginning unless a seek was
/// issued in between.
#[async_trait]
pub trait PlaybackDevice: Send + Sync {
    /// Load a playable URI (`file://...` or `http(s)://...`).
    async fn load(&self, uri: &str) -> Result<()>;

    /// Begin or resume playback.
    async fn play(&self) -> Result<()>;

    /// Pause playback without releasing the loaded source.
    async fn pause(&self) -> Result<()>;

    /// Stop playback and release the loaded source.
    async fn stop(&self) -> Result<()>;

    /// Seek to an absolute position.
    async fn seek_to(&self, position_seconds: f64) -> Result<()>;

    /// Adjust output volume, normalized to `0.0..=1.0`.
    async fn set_volume(&self, volume: f32) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_event_serializes_with_variant_name() {
        let json = serde_json::to_string(&DeviceEvent::TrackEnded).unwrap();
        assert_eq!(json, "\"TrackEnded\"");

        let event: DeviceEvent =
            serde_json::from_str(r#"{"PositionChanged":{"position_seconds":12.5}}"#).unwrap();
        assert_eq!(
            event,
            DeviceEvent::PositionChanged {
                position_seconds: 12.5
            }
        );
    }
}
