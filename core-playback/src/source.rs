//! # Source Resolution
//!
//! Maps a [`Track`] to the URI the playback device should load.
//!
//! Lookup order:
//! 1. The track's own `local_path`, if the file is present.
//! 2. A completed download for the track id, if its file is present.
//! 3. The remote reference, joined to the API base when relative.
//!
//! In offline mode step 3 is refused.

use bridge_traits::FileSystemAccess;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::error::{PlaybackError, Result};
use crate::models::{ResolvedSource, Track};

const FILE_SCHEME: &str = "file://";

/// Lookup of previously downloaded copies, keyed by track id.
pub trait LocalCopyLookup: Send + Sync {
    fn local_copy(&self, track_id: &str) -> Option<PathBuf>;
}

pub struct SourceResolver {
    fs: Arc<dyn FileSystemAccess>,
    base_url: Option<String>,
    downloads: Option<Arc<dyn LocalCopyLookup>>,
    offline: AtomicBool,
}

impl SourceResolver {
    pub fn new(fs: Arc<dyn FileSystemAccess>, base_url: Option<String>) -> Self {
        Self {
            fs,
            base_url: base_url.map(|b| b.trim_end_matches('/').to_string()),
            downloads: None,
            offline: AtomicBool::new(false),
        }
    }

    /// Consult `lookup` for downloaded copies before falling back to remote.
    pub fn with_downloads(mut self, lookup: Arc<dyn LocalCopyLookup>) -> Self {
        self.downloads = Some(lookup);
        self
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    #[instrument(skip(self, track), fields(track_id = %track.id))]
    pub async fn resolve(&self, track: &Track) -> Result<ResolvedSource> {
        if let Some(local) = track.local_path.as_deref().filter(|p| !p.trim().is_empty()) {
            let path = strip_file_scheme(local);
            if self.file_present(Path::new(path)).await {
                return Ok(ResolvedSource::local(to_file_uri(Path::new(path))));
            }
            debug!(path = %path, "Local file missing, trying other sources");
        }

        let downloaded = self
            .downloads
            .as_ref()
            .and_then(|lookup| lookup.local_copy(&track.id));
        if let Some(path) = downloaded {
            if self.file_present(&path).await {
                return Ok(ResolvedSource::local(to_file_uri(&path)));
            }
            debug!(path = ?path, "Downloaded copy missing on disk");
        }

        match self.remote_uri(track) {
            Ok(uri) if self.is_offline() => {
                debug!(uri = %uri, "Offline mode, refusing remote source");
                Err(PlaybackError::SourceUnavailable(format!(
                    "track {} is not available offline",
                    track.id
                )))
            }
            Ok(uri) => Ok(ResolvedSource::remote(uri)),
            Err(e) => Err(e),
        }
    }

    /// Absolute remote URI for a track, ignoring any local copy.
    pub fn remote_uri(&self, track: &Track) -> Result<String> {
        let reference = track
            .remote_audio_ref
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| PlaybackError::MissingSource(track.id.clone()))?;

        if is_absolute_url(reference) {
            return Ok(reference.to_string());
        }

        match &self.base_url {
            Some(base) => Ok(format!("{}/{}", base, reference.trim_start_matches('/'))),
            None => Err(PlaybackError::MissingSource(format!(
                "{} (relative reference without a base URL)",
                track.id
            ))),
        }
    }

    async fn file_present(&self, path: &Path) -> bool {
        match self.fs.exists(path).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(path = ?path, error = %e, "Existence check failed");
                false
            }
        }
    }
}

fn is_absolute_url(reference: &str) -> bool {
    reference.contains("://")
}

fn strip_file_scheme(path: &str) -> &str {
    path.strip_prefix(FILE_SCHEME).unwrap_or(path)
}

/// Render a filesystem path as a `file://` URI.
pub fn to_file_uri(path: &Path) -> String {
    let normalized = path.to_string_lossy().replace('\\', "/");
    if normalized.starts_with(FILE_SCHEME) {
        normalized
    } else if normalized.starts_with('/') {
        format!("{FILE_SCHEME}{normalized}")
    } else {
        format!("{FILE_SCHEME}/{normalized}")
    }
}
