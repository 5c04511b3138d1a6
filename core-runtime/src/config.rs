//! # Engine Configuration Module
//!
//! Provides configuration management for the playback engine.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct an
//! `EngineConfig` holding every bridge the engine depends on plus its
//! tunables. It enforces fail-fast validation so a host that forgot to
//! inject a capability learns about it at startup, not on the first
//! download.
//!
//! ## Required Dependencies
//!
//! - `FileSystemAccess` - download directory, catalog verification, library scans
//! - `SettingsStore` - durable catalog, last-played track, offline flag
//! - `HttpClient` - downloads and the remote settings endpoint
//! - `PlaybackDevice` - the host audio player
//!
//! ## Optional Dependencies
//!
//! - `Clock` - defaults to [`SystemClock`]
//! - `EventBus` - a fresh bus is created when none is supplied
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::EngineConfig;
//! use std::sync::Arc;
//!
//! let config = EngineConfig::builder()
//!     .file_system(Arc::new(MyFileSystem))
//!     .settings_store(Arc::new(MySettingsStore))
//!     .http_client(Arc::new(MyHttpClient))
//!     .playback_device(Arc::new(MyDevice))
//!     .api_base_url("https://api.example.com")
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::events::EventBus;
use bridge_traits::{
    Clock, FileSystemAccess, HttpClient, PlaybackDevice, SettingsStore, SystemClock,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Default delay before coalesced preference changes are pushed remotely.
pub const DEFAULT_SETTINGS_DEBOUNCE: Duration = Duration::from_millis(500);

/// Default remote path for playback preferences, relative to the API base.
pub const DEFAULT_SETTINGS_ENDPOINT: &str = "/me/player/settings";

/// Audio file extensions recognised by the local library scan.
pub const DEFAULT_AUDIO_EXTENSIONS: &[&str] =
    &["mp3", "m4a", "aac", "flac", "wav", "ogg", "opus"];

/// Well-known device directories that commonly hold user music.
pub const DEFAULT_SCAN_DIRECTORIES: &[&str] = &[
    "/storage/emulated/0/Music",
    "/storage/emulated/0/Download",
    "/sdcard/Music",
];

/// Download and local-library tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSettings {
    /// Sub-directory of the app data directory that holds downloads.
    pub directory_name: String,
    /// Minimum percentage-point change before progress is published.
    pub progress_step_percent: u8,
    /// Directories walked by the local library scan (the download
    /// directory is always included).
    pub scan_directories: Vec<PathBuf>,
    /// Lower-case extensions considered audio by the scan.
    pub audio_extensions: Vec<String>,
    /// How deep the scan descends below each root.
    pub scan_max_depth: usize,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            directory_name: "downloads".to_string(),
            progress_step_percent: 5,
            scan_directories: DEFAULT_SCAN_DIRECTORIES.iter().map(PathBuf::from).collect(),
            audio_extensions: DEFAULT_AUDIO_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            scan_max_depth: 3,
        }
    }
}

impl DownloadSettings {
    pub fn validate(&self) -> Result<()> {
        if self.directory_name.trim().is_empty() {
            return Err(Error::Config(
                "Download directory name cannot be empty".to_string(),
            ));
        }
        if self.progress_step_percent == 0 || self.progress_step_percent > 100 {
            return Err(Error::Config(format!(
                "Progress step must be within 1..=100, got {}",
                self.progress_step_percent
            )));
        }
        Ok(())
    }
}

/// Configuration for the playback engine.
///
/// Use [`EngineConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct EngineConfig {
    pub file_system: Arc<dyn FileSystemAccess>,
    pub settings_store: Arc<dyn SettingsStore>,
    pub http_client: Arc<dyn HttpClient>,
    pub playback_device: Arc<dyn PlaybackDevice>,
    pub clock: Arc<dyn Clock>,
    pub event_bus: EventBus,

    /// Base address used for relative track references and the settings API.
    pub api_base_url: Option<String>,
    /// Path of the playback-settings resource below `api_base_url`.
    pub settings_endpoint: String,
    /// Optional bearer token for the settings API.
    pub auth_token: Option<String>,
    /// Quiet period before preference changes are sent remotely.
    pub settings_debounce: Duration,

    pub downloads: DownloadSettings,
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("file_system", &"FileSystemAccess { ... }")
            .field("settings_store", &"SettingsStore { ... }")
            .field("http_client", &"HttpClient { ... }")
            .field("playback_device", &"PlaybackDevice { ... }")
            .field("event_bus", &self.event_bus)
            .field("api_base_url", &self.api_base_url)
            .field("settings_endpoint", &self.settings_endpoint)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("settings_debounce", &self.settings_debounce)
            .field("downloads", &self.downloads)
            .finish()
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Absolute URL of the playback-settings resource, if a base is configured.
    pub fn settings_url(&self) -> Option<String> {
        self.api_base_url.as_ref().map(|base| {
            format!(
                "{}/{}",
                base.trim_end_matches('/'),
                self.settings_endpoint.trim_start_matches('/')
            )
        })
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(base) = &self.api_base_url {
            if !(base.starts_with("http://") || base.starts_with("https://")) {
                return Err(Error::Config(format!(
                    "API base URL must be absolute http(s), got '{}'",
                    base
                )));
            }
        }
        if self.settings_debounce.is_zero() {
            return Err(Error::Config(
                "Settings debounce must be greater than zero".to_string(),
            ));
        }
        self.downloads.validate()
    }
}

/// Builder for [`EngineConfig`].
#[derive(Default)]
pub struct EngineConfigBuilder {
    file_system: Option<Arc<dyn FileSystemAccess>>,
    settings_store: Option<Arc<dyn SettingsStore>>,
    http_client: Option<Arc<dyn HttpClient>>,
    playback_device: Option<Arc<dyn PlaybackDevice>>,
    clock: Option<Arc<dyn Clock>>,
    event_bus: Option<EventBus>,
    api_base_url: Option<String>,
    settings_endpoint: Option<String>,
    auth_token: Option<String>,
    settings_debounce: Option<Duration>,
    downloads: Option<DownloadSettings>,
}

impl EngineConfigBuilder {
    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn settings_store(mut self, store: Arc<dyn SettingsStore>) -> Self {
        self.settings_store = Some(store);
        self
    }

    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn playback_device(mut self, device: Arc<dyn PlaybackDevice>) -> Self {
        self.playback_device = Some(device);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn event_bus(mut self, bus: EventBus) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    pub fn settings_endpoint(mut self, path: impl Into<String>) -> Self {
        self.settings_endpoint = Some(path.into());
        self
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn settings_debounce(mut self, delay: Duration) -> Self {
        self.settings_debounce = Some(delay);
        self
    }

    pub fn downloads(mut self, downloads: DownloadSettings) -> Self {
        self.downloads = Some(downloads);
        self
    }

    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// [`Error::CapabilityMissing`] when a required bridge was not injected,
    /// [`Error::Config`] when a tunable is out of range.
    pub fn build(self) -> Result<EngineConfig> {
        let file_system = self
            .file_system
            .ok_or_else(|| missing("FileSystemAccess", "download storage and library scans"))?;
        let settings_store = self
            .settings_store
            .ok_or_else(|| missing("SettingsStore", "the download catalog and last-played track"))?;
        let http_client = self
            .http_client
            .ok_or_else(|| missing("HttpClient", "downloads and settings sync"))?;
        let playback_device = self
            .playback_device
            .ok_or_else(|| missing("PlaybackDevice", "audio output"))?;

        let config = EngineConfig {
            file_system,
            settings_store,
            http_client,
            playback_device,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            event_bus: self.event_bus.unwrap_or_default(),
            api_base_url: self.api_base_url,
            settings_endpoint: self
                .settings_endpoint
                .unwrap_or_else(|| DEFAULT_SETTINGS_ENDPOINT.to_string()),
            auth_token: self.auth_token,
            settings_debounce: self.settings_debounce.unwrap_or(DEFAULT_SETTINGS_DEBOUNCE),
            downloads: self.downloads.unwrap_or_default(),
        };

        config.validate()?;
        Ok(config)
    }
}

fn missing(capability: &str, purpose: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: format!(
            "{} implementation is required for {}. \
             Desktop: enable the 'desktop-shims' feature for default adapters. \
             Mobile: inject the platform-native adapter.",
            capability, purpose
        ),
    }
}
