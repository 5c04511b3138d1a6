//! # Playback Engine
//!
//! The object UI layers talk to. It owns the controller, the download
//! manager, the source resolver and settings sync, all wired from one
//! [`EngineConfig`], so a fresh engine can be built per test.
//!
//! ## Usage
//!
//! ```ignore
//! let engine = PlaybackEngine::new(config);
//! engine.initialize().await;
//!
//! engine.play_collection(album_tracks, 0).await;
//! engine.toggle_shuffle().await;
//! let ok = engine.download(track).await;
//! ```

use bridge_traits::{DeviceEvent, SettingsStore};
use core_runtime::config::EngineConfig;
use core_runtime::events::{CoreEvent, EventBus};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::controller::{PlaybackController, PlayerSnapshot, LAST_PLAYED_KEY};
use crate::downloads::DownloadManager;
use crate::models::{DownloadStatus, DownloadedTrackRecord, PlaybackState, Track};
use crate::settings_sync::SettingsSync;
use crate::source::SourceResolver;

/// Settings key for the offline-mode flag.
pub const OFFLINE_MODE_KEY: &str = "playback.offline_mode";

pub struct PlaybackEngine {
    controller: Arc<PlaybackController>,
    downloads: Arc<DownloadManager>,
    resolver: Arc<SourceResolver>,
    settings_sync: SettingsSync,
    settings_store: Arc<dyn SettingsStore>,
    event_bus: EventBus,
}

impl PlaybackEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Build with a fixed random source for reproducible shuffle order.
    pub fn with_rng(config: EngineConfig, rng: StdRng) -> Self {
        let settings_url = config.settings_url();
        let EngineConfig {
            file_system,
            settings_store,
            http_client,
            playback_device,
            clock,
            event_bus,
            api_base_url,
            auth_token,
            settings_debounce,
            downloads,
            ..
        } = config;

        let downloads = Arc::new(
            DownloadManager::new(
                downloads,
                file_system.clone(),
                http_client.clone(),
                settings_store.clone(),
                clock,
            )
            .with_event_bus(event_bus.clone()),
        );

        let resolver = Arc::new(
            SourceResolver::new(file_system, api_base_url).with_downloads(downloads.clone()),
        );

        let settings_sync = SettingsSync::new(http_client, settings_url, auth_token, settings_debounce);

        let controller = Arc::new(
            PlaybackController::new(playback_device, resolver.clone(), settings_store.clone())
                .with_event_bus(event_bus.clone())
                .with_settings_sync(settings_sync.clone())
                .with_rng(rng),
        );

        Self {
            controller,
            downloads,
            resolver,
            settings_sync,
            settings_store,
            event_bus,
        }
    }

    /// Startup work: reconcile the download catalog, restore the offline
    /// flag, the last played track and remote preferences.
    ///
    /// Every step is best-effort; failures are logged.
    #[instrument(skip(self))]
    pub async fn initialize(&self) {
        if let Err(e) = self.downloads.load_catalog().await {
            warn!(error = %e, "Download catalog could not be loaded");
        }

        match self.settings_store.get_bool(OFFLINE_MODE_KEY).await {
            Ok(Some(offline)) => self.resolver.set_offline(offline),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Offline flag unreadable"),
        }

        match self.settings_store.get_string(LAST_PLAYED_KEY).await {
            Ok(Some(raw)) => match serde_json::from_str::<Track>(&raw) {
                Ok(track) => self.controller.restore_track(track).await,
                Err(e) => warn!(error = %e, "Stored last played track is malformed"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Last played track unreadable"),
        }

        if let Some(remote) = self.settings_sync.fetch().await {
            debug!(?remote, "Applying remote playback settings");
            self.controller
                .restore_preferences(remote.shuffle, remote.loop_enabled, remote.volume)
                .await;
        }

        info!(
            downloaded = self.downloads.records().len(),
            offline = self.resolver.is_offline(),
            "Playback engine initialized"
        );
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn state(&self) -> PlaybackState {
        self.controller.state()
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        self.controller.snapshot()
    }

    pub fn current_track(&self) -> Option<Track> {
        self.controller.current_track()
    }

    pub fn is_playing(&self) -> bool {
        self.controller.is_playing()
    }

    /// `(position, duration)` in seconds, read together.
    pub fn position_and_duration(&self) -> (f64, f64) {
        let state = self.controller.state();
        (state.position_seconds, state.duration_seconds)
    }

    pub fn queue(&self) -> Vec<Track> {
        self.controller.queue()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.controller.current_index()
    }

    pub fn shuffle_enabled(&self) -> bool {
        self.controller.state().shuffle_enabled
    }

    pub fn loop_enabled(&self) -> bool {
        self.controller.state().loop_enabled
    }

    pub fn download_progress(&self) -> HashMap<String, u8> {
        self.downloads.progress_map()
    }

    pub fn download_status(&self, track_id: &str) -> Option<DownloadStatus> {
        self.downloads.job_status(track_id)
    }

    pub fn is_downloaded(&self, track_id: &str) -> bool {
        self.downloads.is_downloaded(track_id)
    }

    pub fn downloaded_tracks(&self) -> Vec<DownloadedTrackRecord> {
        self.downloads.records()
    }

    pub fn storage_used_bytes(&self) -> u64 {
        self.downloads.storage_used_bytes()
    }

    pub fn is_offline(&self) -> bool {
        self.resolver.is_offline()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.event_bus.subscribe()
    }

    pub fn controller(&self) -> &Arc<PlaybackController> {
        &self.controller
    }

    pub fn downloads(&self) -> &Arc<DownloadManager> {
        &self.downloads
    }

    // ========================================================================
    // Playback commands
    // ========================================================================

    pub async fn play_track(&self, track: Track) {
        self.controller.play_track(track).await;
    }

    pub async fn play_collection(&self, tracks: Vec<Track>, start_index: usize) {
        self.controller.play_collection(tracks, start_index).await;
    }

    pub async fn toggle_play_pause(&self) {
        self.controller.toggle_play_pause().await;
    }

    pub async fn pause(&self) {
        self.controller.pause().await;
    }

    pub async fn resume(&self) {
        self.controller.resume().await;
    }

    pub async fn next(&self) {
        self.controller.next().await;
    }

    pub async fn previous(&self) {
        self.controller.previous().await;
    }

    /// Record the seek and hand it to the device when a source is loaded.
    pub async fn seek_to(&self, seconds: f64) {
        self.controller.seek_to(seconds).await;
        self.controller.apply_pending_seek().await;
    }

    pub async fn set_volume(&self, volume: f32) {
        self.controller.set_volume(volume).await;
    }

    pub async fn toggle_mute(&self) {
        self.controller.toggle_mute().await;
    }

    pub async fn toggle_shuffle(&self) {
        self.controller.toggle_shuffle().await;
    }

    pub async fn toggle_loop(&self) {
        self.controller.toggle_loop().await;
    }

    pub async fn set_queue(&self, tracks: Vec<Track>, preserve_current: bool) {
        self.controller.set_queue(tracks, preserve_current).await;
    }

    pub async fn add_to_queue(&self, track: Track) {
        self.controller.add_to_queue(track).await;
    }

    pub async fn remove_from_queue(&self, track_id: &str) {
        self.controller.remove_from_queue(track_id).await;
    }

    pub async fn clear_queue(&self) {
        self.controller.clear_queue().await;
    }

    pub async fn handle_device_event(&self, event: DeviceEvent) {
        self.controller.handle_device_event(event).await;
    }

    /// Forward device events from `events` until the sender is dropped.
    pub fn spawn_device_event_pump(&self, mut events: mpsc::Receiver<DeviceEvent>) -> JoinHandle<()> {
        let controller = self.controller.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                controller.handle_device_event(event).await;
            }
            debug!("Device event channel closed");
        })
    }

    // ========================================================================
    // Downloads
    // ========================================================================

    /// Download `track` for offline playback. `true` on success or when it
    /// is already downloaded.
    pub async fn download(&self, track: Track) -> bool {
        if self.downloads.is_downloaded(&track.id) {
            return true;
        }
        let url = match self.resolver.remote_uri(&track) {
            Ok(url) => url,
            Err(e) => {
                warn!(track_id = %track.id, error = %e, "Track cannot be downloaded");
                return false;
            }
        };
        self.downloads.download(&track, &url).await
    }

    pub async fn delete_download(&self, track_id: &str) -> bool {
        self.downloads.delete(track_id).await
    }

    /// Remove every download. Returns how many were removed.
    pub async fn clear_downloads(&self) -> usize {
        match self.downloads.clear_all().await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "Clearing downloads failed");
                0
            }
        }
    }

    pub async fn scan_local_library(&self) -> Vec<Track> {
        self.downloads.scan_local_library().await
    }

    /// Refuse remote sources while enabled. The flag is persisted.
    pub async fn set_offline_mode(&self, offline: bool) {
        self.resolver.set_offline(offline);
        if let Err(e) = self.settings_store.set_bool(OFFLINE_MODE_KEY, offline).await {
            warn!(error = %e, "Failed to persist offline flag");
        }
        info!(offline, "Offline mode changed");
    }

    /// Drop the queue and session state. Downloads are kept.
    #[instrument(skip(self))]
    pub async fn logout(&self) {
        self.settings_sync.cancel();
        self.controller.clear_queue().await;
        if let Err(e) = self.settings_store.delete(LAST_PLAYED_KEY).await {
            warn!(error = %e, "Failed to forget last played track");
        }
        info!("Playback session cleared");
    }
}
