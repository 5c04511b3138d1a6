//! # Download Manager
//!
//! Runs download jobs and owns the catalog of completed downloads.
//!
//! - At most one job per track id; duplicate requests wait for the running
//!   job instead of transferring again
//! - Progress is published in coarse steps and only while the job is
//!   registered
//! - Every catalog change persists the whole catalog under one lock, so the
//!   stored order matches the order of changes
//! - Failed transfers remove their partial file and are not retried

use bridge_traits::{Clock, FileSystemAccess, HttpClient, SettingsStore};
use core_runtime::config::DownloadSettings;
use core_runtime::events::{CoreEvent, DownloadEvent, EventBus};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, error, info, instrument, warn};

use crate::downloads::catalog::CatalogStore;
use crate::downloads::scanner::LibraryScanner;
use crate::error::{PlaybackError, Result};
use crate::models::{DownloadJob, DownloadStatus, DownloadedTrackRecord, Track};
use crate::source::{to_file_uri, LocalCopyLookup};

const CHUNK_SIZE: usize = 64 * 1024;
const DEFAULT_EXTENSION: &str = "mp3";

struct ActiveJob {
    job: DownloadJob,
    outcome: watch::Receiver<Option<bool>>,
}

/// Downloads remote tracks for offline playback.
pub struct DownloadManager {
    settings: DownloadSettings,
    fs: Arc<dyn FileSystemAccess>,
    http_client: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    catalog_store: CatalogStore,
    event_bus: Option<EventBus>,
    records: RwLock<Vec<DownloadedTrackRecord>>,
    jobs: Mutex<HashMap<String, ActiveJob>>,
    failed: Mutex<HashMap<String, DownloadJob>>,
    storage_used: AtomicU64,
    persist_lock: AsyncMutex<()>,
}

impl DownloadManager {
    pub fn new(
        settings: DownloadSettings,
        fs: Arc<dyn FileSystemAccess>,
        http_client: Arc<dyn HttpClient>,
        settings_store: Arc<dyn SettingsStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            settings,
            fs,
            http_client,
            clock,
            catalog_store: CatalogStore::new(settings_store),
            event_bus: None,
            records: RwLock::new(Vec::new()),
            jobs: Mutex::new(HashMap::new()),
            failed: Mutex::new(HashMap::new()),
            storage_used: AtomicU64::new(0),
            persist_lock: AsyncMutex::new(()),
        }
    }

    /// Set event bus for progress events.
    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// App-private directory that receives downloads.
    pub async fn download_directory(&self) -> Result<PathBuf> {
        let data_dir = self.fs.get_data_directory().await?;
        Ok(data_dir.join(&self.settings.directory_name))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn is_downloaded(&self, track_id: &str) -> bool {
        self.records.read().iter().any(|r| r.track_id == track_id)
    }

    pub fn record(&self, track_id: &str) -> Option<DownloadedTrackRecord> {
        self.records
            .read()
            .iter()
            .find(|r| r.track_id == track_id)
            .cloned()
    }

    pub fn records(&self) -> Vec<DownloadedTrackRecord> {
        self.records.read().clone()
    }

    /// Progress of every registered job.
    pub fn progress_map(&self) -> HashMap<String, u8> {
        self.jobs
            .lock()
            .iter()
            .map(|(id, active)| (id.clone(), active.job.progress_percent))
            .collect()
    }

    pub fn active_job(&self, track_id: &str) -> Option<DownloadJob> {
        self.jobs.lock().get(track_id).map(|a| a.job.clone())
    }

    /// Status of the latest request for a track, if any.
    pub fn job_status(&self, track_id: &str) -> Option<DownloadStatus> {
        if let Some(active) = self.jobs.lock().get(track_id) {
            return Some(active.job.status);
        }
        if self.failed.lock().contains_key(track_id) {
            return Some(DownloadStatus::Failed);
        }
        self.is_downloaded(track_id)
            .then_some(DownloadStatus::Completed)
    }

    pub fn storage_used_bytes(&self) -> u64 {
        self.storage_used.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Catalog
    // ========================================================================

    /// Load the stored catalog and drop records whose file is gone.
    ///
    /// Re-persists when anything was dropped or the stored value was
    /// unreadable.
    #[instrument(skip(self))]
    pub async fn load_catalog(&self) -> Result<()> {
        let _guard = self.persist_lock.lock().await;
        let loaded = self.catalog_store.load().await?;
        let total = loaded.records.len();

        let mut kept = Vec::with_capacity(total);
        for record in loaded.records {
            match self.fs.exists(Path::new(&record.local_path)).await {
                Ok(true) => kept.push(record),
                Ok(false) => {
                    warn!(track_id = %record.track_id, path = %record.local_path, "Dropping download record, file missing");
                }
                Err(e) => {
                    warn!(track_id = %record.track_id, error = %e, "Dropping download record, file unreadable");
                }
            }
        }

        let dropped = total - kept.len();
        if dropped > 0 || loaded.malformed {
            self.catalog_store.save(&kept).await?;
        }

        let kept_count = kept.len();
        *self.records.write() = kept;
        self.recompute_storage();

        info!(kept = kept_count, dropped, "Download catalog loaded");
        self.emit(DownloadEvent::CatalogReconciled {
            kept: kept_count,
            dropped,
        });
        Ok(())
    }

    /// Apply `change` to a copy of the catalog, persist the full snapshot and
    /// only then publish it. A failed save leaves the catalog untouched.
    async fn update_catalog<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<DownloadedTrackRecord>),
    {
        let _guard = self.persist_lock.lock().await;
        let mut snapshot = self.records.read().clone();
        change(&mut snapshot);
        self.catalog_store.save(&snapshot).await?;

        *self.records.write() = snapshot;
        self.recompute_storage();
        Ok(())
    }

    fn recompute_storage(&self) {
        let total: u64 = self.records.read().iter().map(|r| r.file_size_bytes).sum();
        self.storage_used.store(total, Ordering::SeqCst);
    }

    // ========================================================================
    // Download
    // ========================================================================

    /// Download `track` from `remote_url`. Returns `true` on success or when
    /// the track is already downloaded.
    pub async fn download(&self, track: &Track, remote_url: &str) -> bool {
        match self.try_download(track, remote_url).await {
            Ok(()) => true,
            Err(e) => {
                warn!(track_id = %track.id, error = %e, "Download failed");
                false
            }
        }
    }

    #[instrument(skip(self, track, remote_url), fields(track_id = %track.id))]
    pub async fn try_download(&self, track: &Track, remote_url: &str) -> Result<()> {
        if self.is_downloaded(&track.id) {
            debug!("Track already downloaded");
            return Ok(());
        }

        let registration = {
            let mut jobs = self.jobs.lock();
            match jobs.get(&track.id) {
                Some(active) => Err(active.outcome.clone()),
                // A job may have committed its record and unregistered
                // since the check above.
                None if self.is_downloaded(&track.id) => {
                    debug!("Track downloaded by a concurrent request");
                    return Ok(());
                }
                None => {
                    let (tx, rx) = watch::channel(None);
                    let job = DownloadJob::new(track.id.clone(), PathBuf::new());
                    jobs.insert(track.id.clone(), ActiveJob { job, outcome: rx });
                    Ok(tx)
                }
            }
        };
        let outcome_tx = match registration {
            Ok(tx) => tx,
            Err(outcome) => return self.await_existing(&track.id, outcome).await,
        };
        self.failed.lock().remove(&track.id);

        let mut guard = JobGuard {
            manager: self,
            track_id: &track.id,
            outcome: outcome_tx,
            finished: false,
        };

        let result = self.run_job(track, remote_url).await;
        guard.finish(result.as_ref().err().map(|e| e.to_string()));
        result
    }

    async fn await_existing(
        &self,
        track_id: &str,
        mut outcome: watch::Receiver<Option<bool>>,
    ) -> Result<()> {
        debug!(track_id, "Download already in flight, waiting for it");
        let succeeded = match outcome.wait_for(|v| v.is_some()).await {
            Ok(value) => value.unwrap_or(false),
            Err(_) => false,
        };
        if succeeded {
            Ok(())
        } else {
            Err(PlaybackError::Network(format!(
                "concurrent download of {} failed",
                track_id
            )))
        }
    }

    async fn run_job(&self, track: &Track, remote_url: &str) -> Result<()> {
        let directory = self.download_directory().await?;
        self.fs.create_dir_all(&directory).await.map_err(|e| {
            error!("Failed to create download directory: {}", e);
            PlaybackError::Filesystem(format!("cannot create {:?}: {}", directory, e))
        })?;

        let destination = directory.join(format!(
            "{}.{}",
            sanitize_file_component(&track.id),
            self.extension_for(remote_url)
        ));

        self.update_job(&track.id, |job| {
            job.destination_path = destination.clone();
            job.status = DownloadStatus::Downloading;
        });
        self.emit(DownloadEvent::Started {
            track_id: track.id.clone(),
        });
        info!(destination = ?destination, "Starting download");

        match self.transfer(&track.id, remote_url, &destination).await {
            Ok(()) => {}
            Err(e) => {
                self.discard_partial(&destination).await;
                return Err(e);
            }
        }

        let size = match self.fs.metadata(&destination).await {
            Ok(meta) => meta.size,
            Err(e) => {
                self.discard_partial(&destination).await;
                return Err(PlaybackError::Filesystem(format!(
                    "cannot stat {:?}: {}",
                    destination, e
                )));
            }
        };

        let record = DownloadedTrackRecord {
            track_id: track.id.clone(),
            local_path: destination.to_string_lossy().into_owned(),
            downloaded_at: self.clock.now(),
            file_size_bytes: size,
        };
        let committed = self
            .update_catalog(|records| {
                records.retain(|r| r.track_id != record.track_id);
                records.push(record);
            })
            .await;
        if let Err(e) = committed {
            error!(error = %e, "Failed to persist download record");
            self.discard_partial(&destination).await;
            return Err(e);
        }

        info!(file_size_bytes = size, "Download complete");
        self.emit(DownloadEvent::Completed {
            track_id: track.id.clone(),
            file_size_bytes: size,
        });
        Ok(())
    }

    async fn transfer(&self, track_id: &str, url: &str, destination: &Path) -> Result<()> {
        let stream = self
            .http_client
            .download_stream(url.to_string())
            .await
            .map_err(|e| PlaybackError::Network(e.to_string()))?;
        let content_length = stream.content_length.filter(|len| *len > 0);
        let mut reader = stream.reader;

        let mut writer = self.fs.open_write_stream(destination).await.map_err(|e| {
            PlaybackError::Filesystem(format!("cannot open {:?}: {}", destination, e))
        })?;

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut written: u64 = 0;
        loop {
            let read = reader
                .read(&mut buffer)
                .await
                .map_err(|e| PlaybackError::Network(format!("transfer interrupted: {}", e)))?;
            if read == 0 {
                break;
            }
            writer
                .write_all(&buffer[..read])
                .await
                .map_err(|e| PlaybackError::Filesystem(format!("write failed: {}", e)))?;
            written += read as u64;

            if let Some(total) = content_length {
                let percent = (written.saturating_mul(100) / total).min(100) as u8;
                self.report_progress(track_id, percent);
            }
        }

        writer
            .shutdown()
            .await
            .map_err(|e| PlaybackError::Filesystem(format!("flush failed: {}", e)))?;
        self.report_progress(track_id, 100);
        debug!(bytes = written, "Transfer finished");
        Ok(())
    }

    /// Record progress for a registered job, in steps of at least
    /// `progress_step_percent`. Unregistered jobs are ignored.
    pub fn report_progress(&self, track_id: &str, percent: u8) {
        let percent = percent.min(100);
        let step = self.settings.progress_step_percent;
        let published = {
            let mut jobs = self.jobs.lock();
            let Some(active) = jobs.get_mut(track_id) else {
                debug!(track_id, percent, "Ignoring progress for unregistered job");
                return;
            };
            let current = active.job.progress_percent;
            let due = percent >= current.saturating_add(step) || (percent == 100 && current < 100);
            if due {
                active.job.progress_percent = percent;
            }
            due
        };
        if published {
            self.emit(DownloadEvent::Progress {
                track_id: track_id.to_string(),
                percent,
            });
        }
    }

    async fn discard_partial(&self, path: &Path) {
        match self.fs.exists(path).await {
            Ok(true) => {
                if let Err(e) = self.fs.delete_file(path).await {
                    warn!(path = ?path, error = %e, "Failed to remove partial download");
                }
            }
            Ok(false) => {}
            Err(e) => warn!(path = ?path, error = %e, "Cannot check partial download"),
        }
    }

    fn update_job<F: FnOnce(&mut DownloadJob)>(&self, track_id: &str, f: F) {
        if let Some(active) = self.jobs.lock().get_mut(track_id) {
            f(&mut active.job);
        }
    }

    fn extension_for(&self, url: &str) -> String {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let file_name = path.rsplit('/').next().unwrap_or(path);
        file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| self.settings.audio_extensions.iter().any(|known| known == ext))
            .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
    }

    // ========================================================================
    // Delete
    // ========================================================================

    /// Remove a downloaded track. Refused while a job for it is in flight.
    pub async fn delete(&self, track_id: &str) -> bool {
        match self.try_delete(track_id).await {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!(track_id, error = %e, "Delete failed");
                false
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn try_delete(&self, track_id: &str) -> Result<bool> {
        if self.jobs.lock().contains_key(track_id) {
            warn!("Download in flight, refusing delete");
            return Ok(false);
        }
        self.failed.lock().remove(track_id);

        let Some(record) = self.record(track_id) else {
            debug!("Track not downloaded");
            return Ok(false);
        };

        let path = PathBuf::from(&record.local_path);
        if self.fs.exists(&path).await? {
            self.fs.delete_file(&path).await.map_err(|e| {
                PlaybackError::Filesystem(format!("cannot delete {:?}: {}", path, e))
            })?;
        }

        self.update_catalog(|records| records.retain(|r| r.track_id != track_id))
            .await?;

        info!(freed_bytes = record.file_size_bytes, "Download deleted");
        self.emit(DownloadEvent::Deleted {
            track_id: track_id.to_string(),
        });
        Ok(true)
    }

    /// Delete every completed download. Returns the number removed.
    #[instrument(skip(self))]
    pub async fn clear_all(&self) -> Result<usize> {
        let records = self.records();
        let mut removed = Vec::new();

        for record in &records {
            if self.jobs.lock().contains_key(&record.track_id) {
                continue;
            }
            let path = PathBuf::from(&record.local_path);
            let deleted = match self.fs.exists(&path).await {
                Ok(true) => self.fs.delete_file(&path).await.is_ok(),
                Ok(false) => true,
                Err(_) => false,
            };
            if deleted {
                removed.push(record.track_id.clone());
            } else {
                warn!(track_id = %record.track_id, "Could not remove download file");
            }
        }

        self.update_catalog(|records| records.retain(|r| !removed.contains(&r.track_id)))
            .await?;
        self.failed.lock().clear();

        for track_id in &removed {
            self.emit(DownloadEvent::Deleted {
                track_id: track_id.clone(),
            });
        }
        info!(removed = removed.len(), "Downloads cleared");
        Ok(removed.len())
    }

    // ========================================================================
    // Local library
    // ========================================================================

    /// Scan the configured directories plus the download directory for audio.
    ///
    /// Files that belong to a catalog record are skipped; those tracks are
    /// already known under their own id.
    pub async fn scan_local_library(&self) -> Vec<Track> {
        let mut roots = self.settings.scan_directories.clone();
        match self.download_directory().await {
            Ok(dir) => roots.push(dir),
            Err(e) => warn!(error = %e, "Download directory unavailable for scan"),
        }

        let scanner = LibraryScanner::new(self.fs.clone(), roots, &self.settings.audio_extensions)
            .with_max_depth(self.settings.scan_max_depth);
        let catalogued: HashSet<String> = self
            .records
            .read()
            .iter()
            .map(|r| to_file_uri(Path::new(&r.local_path)))
            .collect();
        let tracks: Vec<Track> = scanner
            .scan()
            .await
            .into_iter()
            .filter(|track| {
                track
                    .local_path
                    .as_ref()
                    .map_or(true, |uri| !catalogued.contains(uri))
            })
            .collect();

        self.emit(DownloadEvent::LibraryScanned {
            tracks_found: tracks.len(),
        });
        tracks
    }

    fn emit(&self, event: DownloadEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Download(event));
        }
    }
}

impl LocalCopyLookup for DownloadManager {
    fn local_copy(&self, track_id: &str) -> Option<PathBuf> {
        self.record(track_id).map(|r| PathBuf::from(r.local_path))
    }
}

/// Unregisters a job when its request finishes or is dropped mid-flight.
struct JobGuard<'a> {
    manager: &'a DownloadManager,
    track_id: &'a str,
    outcome: watch::Sender<Option<bool>>,
    finished: bool,
}

impl JobGuard<'_> {
    fn finish(&mut self, failure: Option<String>) {
        let removed = self.manager.jobs.lock().remove(self.track_id);
        let succeeded = failure.is_none();
        if let Some(message) = failure {
            let mut job = removed
                .map(|active| active.job)
                .unwrap_or_else(|| DownloadJob::new(self.track_id, PathBuf::new()));
            job.status = DownloadStatus::Failed;
            self.manager
                .failed
                .lock()
                .insert(self.track_id.to_string(), job);
            self.manager.emit(DownloadEvent::Failed {
                track_id: self.track_id.to_string(),
                message,
            });
        }
        let _ = self.outcome.send(Some(succeeded));
        self.finished = true;
    }
}

impl Drop for JobGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            debug!(track_id = self.track_id, "Download request dropped before completion");
            self.manager.jobs.lock().remove(self.track_id);
            let _ = self.outcome.send(Some(false));
        }
    }
}

/// Restrict a track id to characters safe in a file name.
fn sanitize_file_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "track".to_string()
    } else {
        cleaned
    }
}
