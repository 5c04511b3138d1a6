//! # Playback Controller
//!
//! State machine that drives the host [`PlaybackDevice`].
//!
//! ```text
//! Idle -> Loading -> Playing <-> Paused
//!                       |
//!                     Ended -> (next track) | Paused at 0
//! ```
//!
//! ## Atomicity
//!
//! Commands run one at a time behind an async command lock. Each command
//! stages its queue change on a copy, resolves the new track's source, and
//! then swaps queue and state in a single write-lock section. A reader never
//! sees a new track paired with the previous track's duration or URI.
//!
//! ## Failure policy
//!
//! The UI-facing commands never return errors: rejected commands are logged
//! and leave state unchanged. `try_*` variants return the reason.

use bridge_traits::{DeviceEvent, DeviceState, PlaybackDevice, SettingsStore};
use core_runtime::events::{CoreEvent, EventBus, PlaybackEvent, QueueEvent};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, instrument, warn};

use crate::error::{PlaybackError, Result};
use crate::models::{PlaybackState, PlaybackStatus, ResolvedSource, Track};
use crate::queue::{PlaybackMode, QueueManager, QueueStep, RemoveOutcome};
use crate::settings_sync::SettingsSync;
use crate::source::SourceResolver;

/// Settings key for the last remote track that was played.
pub const LAST_PLAYED_KEY: &str = "playback.last_played_track";

/// Queue and player state read under one lock.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub state: PlaybackState,
    pub queue: Vec<Track>,
    pub current_index: Option<usize>,
}

struct Inner {
    queue: QueueManager,
    state: PlaybackState,
    /// The current source has been handed to the device.
    loaded: bool,
}

pub struct PlaybackController {
    inner: RwLock<Inner>,
    command_lock: AsyncMutex<()>,
    rng: Mutex<StdRng>,
    resolver: Arc<SourceResolver>,
    device: Arc<dyn PlaybackDevice>,
    settings_store: Arc<dyn SettingsStore>,
    settings_sync: Option<SettingsSync>,
    event_bus: Option<EventBus>,
}

impl PlaybackController {
    pub fn new(
        device: Arc<dyn PlaybackDevice>,
        resolver: Arc<SourceResolver>,
        settings_store: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            inner: RwLock::new(Inner {
                queue: QueueManager::new(),
                state: PlaybackState::default(),
                loaded: false,
            }),
            command_lock: AsyncMutex::new(()),
            rng: Mutex::new(StdRng::from_entropy()),
            resolver,
            device,
            settings_store,
            settings_sync: None,
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn with_settings_sync(mut self, sync: SettingsSync) -> Self {
        self.settings_sync = Some(sync);
        self
    }

    /// Use a fixed random source (deterministic shuffle order).
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn state(&self) -> PlaybackState {
        self.inner.read().state.clone()
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        let inner = self.inner.read();
        PlayerSnapshot {
            state: inner.state.clone(),
            queue: inner.queue.tracks().to_vec(),
            current_index: inner.queue.current_index(),
        }
    }

    pub fn current_track(&self) -> Option<Track> {
        self.inner.read().state.current_track.clone()
    }

    pub fn is_playing(&self) -> bool {
        self.inner.read().state.is_playing()
    }

    pub fn queue(&self) -> Vec<Track> {
        self.inner.read().queue.tracks().to_vec()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.inner.read().queue.current_index()
    }

    pub fn shuffle_pool(&self) -> Vec<String> {
        self.inner.read().queue.shuffle_pool().to_vec()
    }

    fn mode(&self) -> PlaybackMode {
        let inner = self.inner.read();
        PlaybackMode {
            shuffle: inner.state.shuffle_enabled,
            loop_enabled: inner.state.loop_enabled,
        }
    }

    // ========================================================================
    // Track selection
    // ========================================================================

    /// Play `track`, or toggle play/pause if it is already current.
    pub async fn play_track(&self, track: Track) {
        let track_id = track.id.clone();
        if let Err(e) = self.try_play_track(track).await {
            self.reject(Some(track_id), e);
        }
    }

    /// Tracks not in the queue are appended when their source is local and
    /// rejected with [`PlaybackError::TrackNotInQueue`] otherwise.
    #[instrument(skip(self, track), fields(track_id = %track.id))]
    pub async fn try_play_track(&self, track: Track) -> Result<()> {
        let _command = self.command_lock.lock().await;

        let is_current = self.inner.read().state.current_track_id() == Some(track.id.as_str());
        if is_current {
            return self.toggle_play_pause_locked().await;
        }

        let mode = self.mode();
        let mut staged = self.inner.read().queue.clone();
        let mut appended = None;
        match staged.position_of(&track.id) {
            Some(index) => {
                staged.select(index, mode.shuffle, &mut *self.rng.lock());
            }
            None => {
                let source = self.resolver.resolve(&track).await?;
                if !source.is_local {
                    return Err(PlaybackError::TrackNotInQueue(track.id));
                }
                debug!("Appending local track to queue");
                appended = Some(track.id.clone());
                staged.add(track);
                let last = staged.len() - 1;
                staged.select(last, mode.shuffle, &mut *self.rng.lock());
            }
        }

        self.commit_selection(staged, true).await?;
        if let Some(track_id) = appended {
            self.emit_queue(QueueEvent::TrackAdded { track_id });
        }
        Ok(())
    }

    /// Replace the queue with `tracks` and start playing at `start_index`.
    pub async fn play_collection(&self, tracks: Vec<Track>, start_index: usize) {
        if let Err(e) = self.try_play_collection(tracks, start_index).await {
            self.reject(None, e);
        }
    }

    #[instrument(skip(self, tracks), fields(tracks = tracks.len()))]
    pub async fn try_play_collection(&self, tracks: Vec<Track>, start_index: usize) -> Result<()> {
        let _command = self.command_lock.lock().await;
        if tracks.is_empty() {
            debug!("Empty collection, nothing to play");
            return Ok(());
        }

        let mode = self.mode();
        let mut staged = self.inner.read().queue.clone();
        staged.select_and_play(tracks, start_index, mode.shuffle, &mut *self.rng.lock());
        let length = staged.len();
        let current_index = staged.current_index();

        self.commit_selection(staged, true).await?;
        self.emit_queue(QueueEvent::Replaced {
            length,
            current_index,
        });
        Ok(())
    }

    pub async fn next(&self) {
        if let Err(e) = self.try_next().await {
            self.reject(None, e);
        }
    }

    pub async fn try_next(&self) -> Result<()> {
        let _command = self.command_lock.lock().await;
        self.advance().await
    }

    pub async fn previous(&self) {
        if let Err(e) = self.try_previous().await {
            self.reject(None, e);
        }
    }

    pub async fn try_previous(&self) -> Result<()> {
        let _command = self.command_lock.lock().await;
        let step = {
            let inner = self.inner.read();
            let mode = PlaybackMode {
                shuffle: inner.state.shuffle_enabled,
                loop_enabled: inner.state.loop_enabled,
            };
            inner.queue.compute_previous(inner.state.position_seconds, mode)
        };
        self.apply_step(step).await
    }

    async fn advance(&self) -> Result<()> {
        let mode = self.mode();
        let step = {
            let inner = self.inner.read();
            let mut rng = self.rng.lock();
            inner.queue.compute_next(mode, &mut *rng)
        };
        self.apply_step(step).await
    }

    async fn apply_step(&self, step: QueueStep) -> Result<()> {
        match step {
            QueueStep::Stay => {
                debug!("Queue empty, nothing to do");
                Ok(())
            }
            QueueStep::Select { .. } => {
                let mut staged = self.inner.read().queue.clone();
                staged.apply(&step);
                self.commit_selection(staged, true).await
            }
            QueueStep::Restart => {
                let (track_id, loaded) = {
                    let mut inner = self.inner.write();
                    inner.state.position_seconds = 0.0;
                    inner.state.pending_seek = None;
                    (inner.state.current_track_id().map(str::to_string), inner.loaded)
                };
                if loaded {
                    self.device_call("seek", self.device.seek_to(0.0).await);
                }
                if let Some(track_id) = track_id {
                    self.emit(PlaybackEvent::SeekRequested {
                        track_id,
                        position_ms: 0,
                    });
                }
                Ok(())
            }
            QueueStep::Stop => {
                self.settle_at_end().await;
                Ok(())
            }
        }
    }

    /// Queue exhausted or the next track failed to load: stay on the
    /// current track, paused at 0.
    async fn settle_at_end(&self) {
        let (track_id, loaded) = {
            let mut inner = self.inner.write();
            inner.state.status = PlaybackStatus::Paused;
            inner.state.position_seconds = 0.0;
            inner.state.pending_seek = None;
            (inner.state.current_track_id().map(str::to_string), inner.loaded)
        };
        if loaded {
            self.device_call("pause", self.device.pause().await);
            self.device_call("seek", self.device.seek_to(0.0).await);
        }
        info!(track_id = ?track_id, "Reached end of queue");
        if let Some(track_id) = track_id {
            self.emit(PlaybackEvent::QueueEnded { track_id });
        }
    }

    /// Swap in `staged` and make its current track the player's track.
    ///
    /// With `autoplay` the source must resolve or nothing changes. Without
    /// it, a missing source is tolerated and resolved again on resume.
    async fn commit_selection(&self, staged: QueueManager, autoplay: bool) -> Result<()> {
        let Some(track) = staged.current_track().cloned() else {
            self.commit_empty(staged).await;
            return Ok(());
        };

        let source = if autoplay {
            Some(self.resolver.resolve(&track).await?)
        } else {
            match self.resolver.resolve(&track).await {
                Ok(source) => Some(source),
                Err(e) => {
                    debug!(track_id = %track.id, error = %e, "Selected track has no source yet");
                    None
                }
            }
        };

        {
            let mut inner = self.inner.write();
            inner.queue = staged;
            inner.loaded = false;
            let state = &mut inner.state;
            state.current_track = Some(track.clone());
            state.source = source.clone();
            state.position_seconds = 0.0;
            state.duration_seconds = track.duration_seconds;
            state.pending_seek = None;
            state.status = if autoplay {
                PlaybackStatus::Loading
            } else {
                PlaybackStatus::Idle
            };
        }

        info!(
            track_id = %track.id,
            is_local = source.as_ref().map(|s| s.is_local),
            autoplay,
            "Current track changed"
        );
        self.emit(PlaybackEvent::TrackChanged {
            track_id: track.id.clone(),
            title: track.title.clone(),
            duration_ms: seconds_to_ms(track.duration_seconds),
            is_local: source.as_ref().is_some_and(|s| s.is_local),
        });
        if let Some(source) = &source {
            self.remember_last_played(&track, source).await;
        }

        match source {
            Some(source) if autoplay => self.start_device(&track.id, &source.uri, 0.0).await,
            _ => self.device_call("stop", self.device.stop().await),
        }
        Ok(())
    }

    async fn commit_empty(&self, staged: QueueManager) {
        {
            let mut inner = self.inner.write();
            inner.queue = staged;
            inner.loaded = false;
            let state = &mut inner.state;
            state.current_track = None;
            state.source = None;
            state.position_seconds = 0.0;
            state.duration_seconds = 0.0;
            state.pending_seek = None;
            state.status = PlaybackStatus::Idle;
        }
        self.device_call("stop", self.device.stop().await);
        self.emit(PlaybackEvent::Stopped);
    }

    /// Load `uri`, seek to `position` if non-zero, and start playback.
    async fn start_device(&self, track_id: &str, uri: &str, position: f64) {
        let started = async {
            self.device.load(uri).await?;
            if position > 0.0 {
                self.device.seek_to(position).await?;
            }
            self.device.play().await
        }
        .await;

        match started {
            Ok(()) => {
                let still_current = {
                    let mut inner = self.inner.write();
                    let current = inner.state.current_track_id() == Some(track_id);
                    if current {
                        inner.loaded = true;
                        inner.state.status = PlaybackStatus::Playing;
                    }
                    current
                };
                if still_current {
                    self.emit(PlaybackEvent::Playing {
                        track_id: track_id.to_string(),
                    });
                }
            }
            Err(e) => {
                warn!(track_id, error = %e, "Device failed to start playback");
                {
                    let mut inner = self.inner.write();
                    inner.loaded = false;
                    inner.state.status = PlaybackStatus::Paused;
                }
                self.emit(PlaybackEvent::Error {
                    track_id: Some(track_id.to_string()),
                    message: e.to_string(),
                    recoverable: true,
                });
            }
        }
    }

    // ========================================================================
    // Transport
    // ========================================================================

    pub async fn pause(&self) {
        let _command = self.command_lock.lock().await;
        self.pause_locked().await;
    }

    async fn pause_locked(&self) {
        let paused = {
            let mut inner = self.inner.write();
            let active = matches!(
                inner.state.status,
                PlaybackStatus::Playing | PlaybackStatus::Loading
            );
            if active {
                inner.state.status = PlaybackStatus::Paused;
            }
            active.then(|| {
                (
                    inner.state.current_track_id().map(str::to_string),
                    inner.state.position_seconds,
                    inner.loaded,
                )
            })
        };

        let Some((track_id, position, loaded)) = paused else {
            debug!("Not playing, pause ignored");
            return;
        };
        if loaded {
            self.device_call("pause", self.device.pause().await);
        }
        if let Some(track_id) = track_id {
            self.emit(PlaybackEvent::Paused {
                track_id,
                position_ms: seconds_to_ms(position),
            });
        }
    }

    pub async fn resume(&self) {
        if let Err(e) = self.try_resume().await {
            self.reject(None, e);
        }
    }

    /// Resume playback, loading the current track first if it never was.
    pub async fn try_resume(&self) -> Result<()> {
        let _command = self.command_lock.lock().await;
        self.resume_locked().await
    }

    async fn resume_locked(&self) -> Result<()> {
        let (track, status, loaded, source, position) = {
            let inner = self.inner.read();
            (
                inner.state.current_track.clone(),
                inner.state.status,
                inner.loaded,
                inner.state.source.clone(),
                inner.state.position_seconds,
            )
        };

        let Some(track) = track else {
            // Nothing selected yet: start from the top of the queue.
            return self.advance().await;
        };

        if matches!(status, PlaybackStatus::Playing | PlaybackStatus::Loading) {
            return Ok(());
        }

        if loaded {
            match self.device.play().await {
                Ok(()) => {
                    self.inner.write().state.status = PlaybackStatus::Playing;
                    self.emit(PlaybackEvent::Playing { track_id: track.id });
                }
                Err(e) => {
                    warn!(error = %e, "Device failed to resume");
                    self.emit(PlaybackEvent::Error {
                        track_id: Some(track.id),
                        message: e.to_string(),
                        recoverable: true,
                    });
                }
            }
            return Ok(());
        }

        let source: ResolvedSource = match source {
            Some(source) => source,
            None => self.resolver.resolve(&track).await?,
        };
        {
            let mut inner = self.inner.write();
            inner.state.source = Some(source.clone());
            inner.state.status = PlaybackStatus::Loading;
            inner.state.pending_seek = None;
        }
        self.remember_last_played(&track, &source).await;
        self.start_device(&track.id, &source.uri, position).await;
        Ok(())
    }

    pub async fn toggle_play_pause(&self) {
        let _command = self.command_lock.lock().await;
        if let Err(e) = self.toggle_play_pause_locked().await {
            self.reject(None, e);
        }
    }

    async fn toggle_play_pause_locked(&self) -> Result<()> {
        let status = self.inner.read().state.status;
        match status {
            PlaybackStatus::Playing | PlaybackStatus::Loading => {
                self.pause_locked().await;
                Ok(())
            }
            _ => self.resume_locked().await,
        }
    }

    /// Record a seek, clamped to `[0, duration]`. The device is moved by
    /// [`apply_pending_seek`](Self::apply_pending_seek).
    pub async fn seek_to(&self, seconds: f64) {
        let _command = self.command_lock.lock().await;
        if !seconds.is_finite() {
            warn!(seconds, "Ignoring non-finite seek");
            return;
        }

        let requested = {
            let mut inner = self.inner.write();
            let state = &mut inner.state;
            match state.current_track_id().map(str::to_string) {
                Some(track_id) => {
                    let upper = if state.duration_seconds > 0.0 {
                        state.duration_seconds
                    } else {
                        f64::MAX
                    };
                    let clamped = seconds.clamp(0.0, upper);
                    state.position_seconds = clamped;
                    state.pending_seek = Some(clamped);
                    Some((track_id, clamped))
                }
                None => None,
            }
        };

        match requested {
            Some((track_id, position)) => self.emit(PlaybackEvent::SeekRequested {
                track_id,
                position_ms: seconds_to_ms(position),
            }),
            None => debug!("No current track, seek ignored"),
        }
    }

    /// Hand a recorded seek to the device. Returns the applied position.
    ///
    /// While nothing is loaded the seek stays recorded in the position and
    /// is used when playback starts.
    pub async fn apply_pending_seek(&self) -> Option<f64> {
        let _command = self.command_lock.lock().await;
        let target = {
            let mut inner = self.inner.write();
            if !inner.loaded {
                return None;
            }
            inner.state.pending_seek.take()
        }?;

        self.device_call("seek", self.device.seek_to(target).await);
        Some(target)
    }

    // ========================================================================
    // Volume and modes
    // ========================================================================

    /// Set volume in `[0, 1]`; zero mutes, anything else unmutes.
    pub async fn set_volume(&self, volume: f32) {
        let _command = self.command_lock.lock().await;
        if !volume.is_finite() {
            warn!(volume, "Ignoring non-finite volume");
            return;
        }
        let volume = volume.clamp(0.0, 1.0);
        let effective = {
            let mut inner = self.inner.write();
            inner.state.volume = volume;
            inner.state.muted = volume == 0.0;
            inner.state.effective_volume()
        };
        self.apply_volume(effective).await;
        if let Some(sync) = &self.settings_sync {
            sync.notify(None, None, Some(volume));
        }
    }

    pub async fn toggle_mute(&self) {
        let _command = self.command_lock.lock().await;
        let effective = {
            let mut inner = self.inner.write();
            let state = &mut inner.state;
            state.muted = !state.muted;
            if !state.muted && state.volume == 0.0 {
                state.volume = 1.0;
            }
            state.effective_volume()
        };
        self.apply_volume(effective).await;
    }

    async fn apply_volume(&self, effective: f32) {
        self.device_call("set_volume", self.device.set_volume(effective).await);
        let (volume, muted) = {
            let inner = self.inner.read();
            (inner.state.volume, inner.state.muted)
        };
        self.emit(PlaybackEvent::VolumeChanged {
            volume_percent: (volume * 100.0).round() as u8,
            muted,
        });
    }

    pub async fn toggle_shuffle(&self) {
        let _command = self.command_lock.lock().await;
        let mode = {
            let mut inner = self.inner.write();
            let enabled = !inner.state.shuffle_enabled;
            inner.state.shuffle_enabled = enabled;
            if enabled {
                inner.queue.rebuild_pool(&mut *self.rng.lock());
            } else {
                inner.queue.discard_pool();
            }
            PlaybackMode {
                shuffle: enabled,
                loop_enabled: inner.state.loop_enabled,
            }
        };
        self.mode_changed(mode);
        if let Some(sync) = &self.settings_sync {
            sync.notify(Some(mode.shuffle), None, None);
        }
    }

    pub async fn toggle_loop(&self) {
        let _command = self.command_lock.lock().await;
        let mode = {
            let mut inner = self.inner.write();
            inner.state.loop_enabled = !inner.state.loop_enabled;
            PlaybackMode {
                shuffle: inner.state.shuffle_enabled,
                loop_enabled: inner.state.loop_enabled,
            }
        };
        self.mode_changed(mode);
        if let Some(sync) = &self.settings_sync {
            sync.notify(None, Some(mode.loop_enabled), None);
        }
    }

    fn mode_changed(&self, mode: PlaybackMode) {
        debug!(shuffle = mode.shuffle, loop_enabled = mode.loop_enabled, "Playback mode changed");
        self.emit(PlaybackEvent::ModeChanged {
            shuffle: mode.shuffle,
            loop_enabled: mode.loop_enabled,
        });
    }

    /// Apply stored preferences without echoing them to the remote store.
    pub async fn restore_preferences(
        &self,
        shuffle: Option<bool>,
        loop_enabled: Option<bool>,
        volume: Option<f32>,
    ) {
        let _command = self.command_lock.lock().await;
        let effective = {
            let mut inner = self.inner.write();
            if let Some(loop_enabled) = loop_enabled {
                inner.state.loop_enabled = loop_enabled;
            }
            if let Some(shuffle) = shuffle {
                if shuffle != inner.state.shuffle_enabled {
                    inner.state.shuffle_enabled = shuffle;
                    if shuffle {
                        inner.queue.rebuild_pool(&mut *self.rng.lock());
                    } else {
                        inner.queue.discard_pool();
                    }
                }
            }
            if let Some(volume) = volume.filter(|v| v.is_finite()) {
                let volume = volume.clamp(0.0, 1.0);
                inner.state.volume = volume;
                inner.state.muted = volume == 0.0;
            }
            inner.state.effective_volume()
        };
        self.device_call("set_volume", self.device.set_volume(effective).await);
    }

    // ========================================================================
    // Queue editing
    // ========================================================================

    /// Replace the queue. Keeps the current track when it is still present;
    /// otherwise selects the first track without starting playback.
    pub async fn set_queue(&self, tracks: Vec<Track>, preserve_current: bool) {
        let _command = self.command_lock.lock().await;
        let (staged, previous_id) = {
            let inner = self.inner.read();
            (
                inner.queue.clone(),
                inner.state.current_track_id().map(str::to_string),
            )
        };
        let mut staged = staged;
        let shuffle = self.mode().shuffle;
        staged.set_queue(tracks, preserve_current, shuffle, &mut *self.rng.lock());
        let length = staged.len();
        let current_index = staged.current_index();
        let next_id = staged.current_track().map(|t| t.id.clone());

        if next_id.is_some() && next_id == previous_id {
            self.inner.write().queue = staged;
        } else if let Err(e) = self.commit_selection(staged, false).await {
            self.reject(next_id, e);
            return;
        }

        self.emit_queue(QueueEvent::Replaced {
            length,
            current_index,
        });
    }

    pub async fn add_to_queue(&self, track: Track) {
        let _command = self.command_lock.lock().await;
        let track_id = track.id.clone();
        let added = {
            let mut inner = self.inner.write();
            let shuffle = inner.state.shuffle_enabled;
            let added = inner.queue.add(track);
            if added && shuffle {
                inner.queue.add_to_pool(&track_id, &mut *self.rng.lock());
            }
            added
        };
        if added {
            self.emit_queue(QueueEvent::TrackAdded { track_id });
        } else {
            debug!(track_id = %track_id, "Track already queued");
        }
    }

    pub async fn remove_from_queue(&self, track_id: &str) {
        let _command = self.command_lock.lock().await;
        let (mut staged, was_playing) = {
            let inner = self.inner.read();
            (inner.queue.clone(), inner.state.is_playing())
        };

        match staged.remove(track_id) {
            RemoveOutcome::NotFound => {
                debug!(track_id, "Track not in queue, nothing removed");
                return;
            }
            RemoveOutcome::Removed => {
                self.inner.write().queue = staged;
            }
            RemoveOutcome::CurrentReplaced { .. } => {
                if let Err(e) = self.commit_selection(staged.clone(), was_playing).await {
                    debug!(error = %e, "Successor cannot play, selecting without playback");
                    if let Err(e) = self.commit_selection(staged, false).await {
                        self.reject(Some(track_id.to_string()), e);
                        return;
                    }
                }
            }
            RemoveOutcome::Emptied => self.commit_empty(staged).await,
        }
        self.emit_queue(QueueEvent::TrackRemoved {
            track_id: track_id.to_string(),
        });
    }

    pub async fn clear_queue(&self) {
        let _command = self.command_lock.lock().await;
        self.commit_empty(QueueManager::new()).await;
        self.emit_queue(QueueEvent::Cleared);
    }

    /// Show `track` as the current track without loading or playing it.
    pub async fn restore_track(&self, track: Track) {
        let _command = self.command_lock.lock().await;
        if self.inner.read().state.current_track.is_some() {
            return;
        }
        {
            let mut inner = self.inner.write();
            inner.queue.select_and_play(vec![track.clone()], 0, false, &mut *self.rng.lock());
            inner.loaded = false;
            let state = &mut inner.state;
            state.current_track = Some(track.clone());
            state.source = None;
            state.position_seconds = 0.0;
            state.duration_seconds = track.duration_seconds;
            state.pending_seek = None;
            state.status = PlaybackStatus::Idle;
        }
        info!(track_id = %track.id, "Restored last played track");
        self.emit(PlaybackEvent::TrackChanged {
            track_id: track.id.clone(),
            title: track.title.clone(),
            duration_ms: seconds_to_ms(track.duration_seconds),
            is_local: false,
        });
    }

    // ========================================================================
    // Device events
    // ========================================================================

    pub async fn handle_device_event(&self, event: DeviceEvent) {
        match event {
            DeviceEvent::PositionChanged { position_seconds } => {
                if !position_seconds.is_finite() {
                    return;
                }
                let mut inner = self.inner.write();
                // Late updates from the previous track arrive while loading.
                if inner.state.status == PlaybackStatus::Loading
                    || inner.state.current_track.is_none()
                {
                    return;
                }
                let upper = if inner.state.duration_seconds > 0.0 {
                    inner.state.duration_seconds
                } else {
                    f64::MAX
                };
                inner.state.position_seconds = position_seconds.clamp(0.0, upper);
            }
            DeviceEvent::StateChanged { state } => self.mirror_device_state(state),
            DeviceEvent::TrackEnded => {
                let _command = self.command_lock.lock().await;
                let track_id = {
                    let mut inner = self.inner.write();
                    if inner.state.current_track.is_none() {
                        return;
                    }
                    inner.state.status = PlaybackStatus::Ended;
                    inner.state.current_track_id().map(str::to_string)
                };
                debug!(track_id = ?track_id, "Track ended, advancing");
                if let Err(e) = self.advance().await {
                    self.reject(track_id, e);
                    // The next track did not load; never stay in Ended.
                    self.settle_at_end().await;
                }
            }
        }
    }

    fn mirror_device_state(&self, device_state: DeviceState) {
        let event = {
            let mut inner = self.inner.write();
            let Some(track_id) = inner.state.current_track_id().map(str::to_string) else {
                return;
            };
            match (device_state, inner.state.status) {
                (DeviceState::Playing, status) if status != PlaybackStatus::Playing && inner.loaded => {
                    inner.state.status = PlaybackStatus::Playing;
                    Some(PlaybackEvent::Playing { track_id })
                }
                (DeviceState::Paused, PlaybackStatus::Playing) => {
                    inner.state.status = PlaybackStatus::Paused;
                    Some(PlaybackEvent::Paused {
                        track_id,
                        position_ms: seconds_to_ms(inner.state.position_seconds),
                    })
                }
                (DeviceState::Stopped, PlaybackStatus::Playing | PlaybackStatus::Paused) => {
                    inner.state.status = PlaybackStatus::Paused;
                    inner.loaded = false;
                    Some(PlaybackEvent::Paused {
                        track_id,
                        position_ms: seconds_to_ms(inner.state.position_seconds),
                    })
                }
                _ => None,
            }
        };
        if let Some(event) = event {
            self.emit(event);
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn remember_last_played(&self, track: &Track, source: &ResolvedSource) {
        if source.is_local {
            return;
        }
        let json = match serde_json::to_string(track) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Cannot encode last played track");
                return;
            }
        };
        if let Err(e) = self.settings_store.set_string(LAST_PLAYED_KEY, &json).await {
            warn!(error = %e, "Failed to save last played track");
        }
    }

    fn device_call(&self, operation: &str, result: bridge_traits::error::Result<()>) {
        if let Err(e) = result {
            warn!(operation, error = %e, "Playback device command failed");
            let track_id = self.inner.read().state.current_track_id().map(str::to_string);
            self.emit(PlaybackEvent::Error {
                track_id,
                message: format!("{} failed: {}", operation, e),
                recoverable: true,
            });
        }
    }

    fn reject(&self, track_id: Option<String>, error: PlaybackError) {
        warn!(track_id = ?track_id, error = %error, "Playback command rejected");
        self.emit(PlaybackEvent::Error {
            track_id,
            message: error.to_string(),
            recoverable: error.is_transient(),
        });
    }

    fn emit(&self, event: PlaybackEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Playback(event));
        }
    }

    fn emit_queue(&self, event: QueueEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Queue(event));
        }
    }
}

fn seconds_to_ms(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    }
}
