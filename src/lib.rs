//! # Playback Engine
//!
//! Umbrella crate for hosts that want the whole engine behind one
//! dependency. Re-exports the workspace crates and, with the
//! `desktop-shims` feature (default), wires the desktop bridges.
//!
//! ```ignore
//! use playback_engine::{desktop, PlaybackEngine};
//!
//! let config = desktop::config(Arc::new(MyAudioDevice::new()), "https://api.example.com")
//!     .await?;
//! let engine = PlaybackEngine::new(config);
//! engine.initialize().await;
//! ```

pub use bridge_traits;
pub use core_playback;
pub use core_runtime;

pub use core_playback::{PlaybackEngine, PlaybackError, PlaybackState, PlaybackStatus, Track};
pub use core_runtime::config::{DownloadSettings, EngineConfig};
pub use core_runtime::events::{CoreEvent, DownloadEvent, PlaybackEvent, QueueEvent};

#[cfg(feature = "desktop-shims")]
pub mod desktop {
    //! Engine configuration backed by the desktop bridges.

    use bridge_desktop::{ReqwestHttpClient, SqliteSettingsStore, TokioFileSystem};
    use bridge_traits::PlaybackDevice;
    use core_runtime::config::EngineConfig;
    use core_runtime::Result;
    use std::sync::Arc;

    const SETTINGS_DATABASE: &str = "settings.db";

    /// Build a configuration using the user data directory, an SQLite
    /// settings file inside it and a `reqwest` client.
    pub async fn config(device: Arc<dyn PlaybackDevice>, api_base_url: &str) -> Result<EngineConfig> {
        let fs = TokioFileSystem::new();
        let settings =
            SqliteSettingsStore::new(fs.data_directory().join(SETTINGS_DATABASE)).await?;
        let http_client = ReqwestHttpClient::new()?;

        EngineConfig::builder()
            .file_system(Arc::new(fs))
            .settings_store(Arc::new(settings))
            .http_client(Arc::new(http_client))
            .playback_device(device)
            .api_base_url(api_base_url)
            .build()
    }
}
