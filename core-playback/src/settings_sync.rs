//! # Settings Sync
//!
//! Best-effort propagation of shuffle, loop and volume preferences to the
//! remote settings endpoint.
//!
//! Changes are coalesced: every [`SettingsSync::notify`] call restarts a
//! debounce timer, and only the latest values are sent when it fires.
//! Transport failures are logged and dropped; playback never waits on this
//! path.

use bridge_traits::{HttpClient, HttpMethod, HttpRequest};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Playback preferences as exchanged with the remote API.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePlaybackSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shuffle: Option<bool>,
    #[serde(default, rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
}

impl RemotePlaybackSettings {
    fn merge(&mut self, shuffle: Option<bool>, loop_enabled: Option<bool>, volume: Option<f32>) {
        if shuffle.is_some() {
            self.shuffle = shuffle;
        }
        if loop_enabled.is_some() {
            self.loop_enabled = loop_enabled;
        }
        if let Some(v) = volume {
            self.volume = Some(v.clamp(0.0, 1.0));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.shuffle.is_none() && self.loop_enabled.is_none() && self.volume.is_none()
    }
}

struct SyncInner {
    http_client: Arc<dyn HttpClient>,
    url: Option<String>,
    auth_token: Option<String>,
    debounce: Duration,
    latest: Mutex<RemotePlaybackSettings>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct SettingsSync {
    inner: Arc<SyncInner>,
}

impl SettingsSync {
    /// `url` is the absolute settings resource; `None` disables remote sync.
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        url: Option<String>,
        auth_token: Option<String>,
        debounce: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                http_client,
                url,
                auth_token,
                debounce,
                latest: Mutex::new(RemotePlaybackSettings::default()),
                timer: Mutex::new(None),
            }),
        }
    }

    /// Latest values known locally.
    pub fn latest(&self) -> RemotePlaybackSettings {
        self.inner.latest.lock().clone()
    }

    /// Whether a debounced write is waiting to fire.
    pub fn is_pending(&self) -> bool {
        self.inner
            .timer
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Record changed preferences and restart the debounce timer.
    pub fn notify(&self, shuffle: Option<bool>, loop_enabled: Option<bool>, volume: Option<f32>) {
        self.inner.latest.lock().merge(shuffle, loop_enabled, volume);

        if self.inner.url.is_none() {
            debug!("Remote settings sync disabled");
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, preference change kept locally only");
            return;
        };

        let inner = self.inner.clone();
        let mut timer = self.inner.timer.lock();
        if let Some(previous) = timer.take() {
            previous.abort();
        }
        *timer = Some(runtime.spawn(async move {
            tokio::time::sleep(inner.debounce).await;
            let snapshot = inner.latest.lock().clone();
            push(&inner, snapshot).await;
        }));
    }

    /// Drop any pending write.
    pub fn cancel(&self) {
        if let Some(handle) = self.inner.timer.lock().take() {
            handle.abort();
            debug!("Pending settings write cancelled");
        }
    }

    /// Read the remote settings. `None` on any failure.
    #[instrument(skip(self))]
    pub async fn fetch(&self) -> Option<RemotePlaybackSettings> {
        let url = self.inner.url.as_ref()?;
        let mut request = HttpRequest::new(HttpMethod::Get, url.clone()).timeout(REQUEST_TIMEOUT);
        if let Some(token) = &self.inner.auth_token {
            request = request.bearer_token(token.clone());
        }

        let response = match self.inner.http_client.execute(request).await {
            Ok(response) if response.is_success() => response,
            Ok(response) => {
                warn!(status = response.status, "Fetching playback settings failed");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Fetching playback settings failed");
                return None;
            }
        };

        match response.json::<RemotePlaybackSettings>() {
            Ok(settings) => Some(settings),
            Err(e) => {
                warn!(error = %e, "Remote playback settings unreadable");
                None
            }
        }
    }
}

impl Drop for SyncInner {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().take() {
            handle.abort();
        }
    }
}

async fn push(inner: &SyncInner, settings: RemotePlaybackSettings) {
    let Some(url) = inner.url.as_ref() else {
        return;
    };
    if settings.is_empty() {
        return;
    }

    let request = match HttpRequest::new(HttpMethod::Patch, url.clone())
        .timeout(REQUEST_TIMEOUT)
        .json(&settings)
    {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Cannot encode playback settings");
            return;
        }
    };
    let request = match &inner.auth_token {
        Some(token) => request.bearer_token(token.clone()),
        None => request,
    };

    match inner.http_client.execute(request).await {
        Ok(response) if response.is_success() => debug!("Playback settings synced"),
        Ok(response) => warn!(status = response.status, "Playback settings sync rejected"),
        Err(e) => warn!(error = %e, "Playback settings sync failed"),
    }
}
