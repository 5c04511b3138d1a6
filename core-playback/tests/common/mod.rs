//! In-memory bridge implementations shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::error::{BridgeError, Result};
use bridge_traits::http::{DownloadStream, HttpRequest, HttpResponse};
use bridge_traits::storage::FileMetadata;
use bridge_traits::{Clock, FileSystemAccess, HttpClient, PlaybackDevice, SettingsStore};
use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use core_playback::{PlaybackEngine, Track};
use core_runtime::config::{DownloadSettings, EngineConfig};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

pub const DATA_DIR: &str = "/data";
pub const API_BASE: &str = "https://api.example.com";

// ============================================================================
// File system
// ============================================================================

#[derive(Default)]
struct FsState {
    files: HashMap<PathBuf, Vec<u8>>,
    dirs: HashSet<PathBuf>,
    unreadable: HashSet<PathBuf>,
    write_streams: HashMap<PathBuf, usize>,
}

#[derive(Clone, Default)]
pub struct MemoryFileSystem {
    state: Arc<Mutex<FsState>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        let fs = Self::default();
        fs.add_dir(DATA_DIR);
        fs
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        let mut state = self.state.lock();
        for ancestor in path.as_ref().ancestors() {
            if !ancestor.as_os_str().is_empty() {
                state.dirs.insert(ancestor.to_path_buf());
            }
        }
    }

    pub fn add_file(&self, path: impl AsRef<Path>, data: &[u8]) {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            self.add_dir(parent);
        }
        self.state.lock().files.insert(path, data.to_vec());
    }

    pub fn remove_file(&self, path: impl AsRef<Path>) {
        self.state.lock().files.remove(path.as_ref());
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.state.lock().files.get(path.as_ref()).cloned()
    }

    pub fn has_file(&self, path: impl AsRef<Path>) -> bool {
        self.state.lock().files.contains_key(path.as_ref())
    }

    pub fn file_count(&self) -> usize {
        self.state.lock().files.len()
    }

    /// Make `list_directory` fail for `path`.
    pub fn make_unreadable(&self, path: impl AsRef<Path>) {
        self.state.lock().unreadable.insert(path.as_ref().to_path_buf());
    }

    /// Number of write streams opened for `path`.
    pub fn write_streams(&self, path: impl AsRef<Path>) -> usize {
        self.state
            .lock()
            .write_streams
            .get(path.as_ref())
            .copied()
            .unwrap_or(0)
    }

    pub fn total_write_streams(&self) -> usize {
        self.state.lock().write_streams.values().sum()
    }
}

fn not_found(path: &Path) -> BridgeError {
    BridgeError::Io(io::Error::new(
        io::ErrorKind::NotFound,
        format!("{} not found", path.display()),
    ))
}

#[async_trait]
impl FileSystemAccess for MemoryFileSystem {
    async fn get_data_directory(&self) -> Result<PathBuf> {
        Ok(PathBuf::from(DATA_DIR))
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let state = self.state.lock();
        Ok(state.files.contains_key(path) || state.dirs.contains(path))
    }

    async fn metadata(&self, path: &Path) -> Result<FileMetadata> {
        let state = self.state.lock();
        if let Some(data) = state.files.get(path) {
            return Ok(FileMetadata {
                size: data.len() as u64,
                modified_at: None,
                is_directory: false,
            });
        }
        if state.dirs.contains(path) {
            return Ok(FileMetadata {
                size: 0,
                modified_at: None,
                is_directory: true,
            });
        }
        Err(not_found(path))
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.add_dir(path);
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> Result<Bytes> {
        self.file(path).map(Bytes::from).ok_or_else(|| not_found(path))
    }

    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()> {
        self.add_file(path, &data);
        Ok(())
    }

    async fn delete_file(&self, path: &Path) -> Result<()> {
        self.state
            .lock()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| not_found(path))
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let state = self.state.lock();
        if state.unreadable.contains(path) {
            return Err(BridgeError::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "permission denied",
            )));
        }
        if !state.dirs.contains(path) {
            return Err(not_found(path));
        }
        let mut entries: Vec<PathBuf> = state
            .files
            .keys()
            .chain(state.dirs.iter())
            .filter(|p| p.parent() == Some(path))
            .cloned()
            .collect();
        entries.sort();
        Ok(entries)
    }

    async fn open_write_stream(&self, path: &Path) -> Result<Box<dyn AsyncWrite + Send + Unpin>> {
        {
            let mut state = self.state.lock();
            if let Some(parent) = path.parent() {
                if !state.dirs.contains(parent) {
                    return Err(not_found(parent));
                }
            }
            state.files.insert(path.to_path_buf(), Vec::new());
            *state.write_streams.entry(path.to_path_buf()).or_default() += 1;
        }
        Ok(Box::new(MemoryWriter {
            state: self.state.clone(),
            path: path.to_path_buf(),
        }))
    }
}

struct MemoryWriter {
    state: Arc<Mutex<FsState>>,
    path: PathBuf,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.state
            .lock()
            .files
            .entry(self.path.clone())
            .or_default()
            .extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

// ============================================================================
// Settings store
// ============================================================================

#[derive(Clone, Default)]
pub struct MemorySettingsStore {
    values: Arc<Mutex<HashMap<String, String>>>,
    read_only: Arc<Mutex<HashSet<String>>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }

    pub fn put(&self, key: &str, value: &str) {
        self.values.lock().insert(key.to_string(), value.to_string());
    }

    /// Make writes to `key` fail until the flag is cleared.
    pub fn set_read_only(&self, key: &str, read_only: bool) {
        let mut keys = self.read_only.lock();
        if read_only {
            keys.insert(key.to_string());
        } else {
            keys.remove(key);
        }
    }

    fn check_writable(&self, key: &str) -> Result<()> {
        if self.read_only.lock().contains(key) {
            return Err(BridgeError::OperationFailed(format!("{key} is read-only")));
        }
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.check_writable(key)?;
        self.put(key, value);
        Ok(())
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.raw(key))
    }

    async fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.check_writable(key)?;
        self.put(key, if value { "true" } else { "false" });
        Ok(())
    }

    async fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        Ok(self.raw(key).map(|v| v == "true"))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.lock().remove(key);
        Ok(())
    }
}

// ============================================================================
// HTTP
// ============================================================================

#[derive(Clone)]
struct RemoteFile {
    data: Vec<u8>,
    /// Bytes delivered before the transfer breaks.
    fail_after: Option<usize>,
    send_length: bool,
}

#[derive(Default)]
struct HttpState {
    files: HashMap<String, RemoteFile>,
    requests: Vec<HttpRequest>,
    downloads: Vec<String>,
    status: Option<u16>,
    response_body: Vec<u8>,
}

#[derive(Clone, Default)]
pub struct FakeHttpClient {
    state: Arc<Mutex<HttpState>>,
    offline: Arc<AtomicBool>,
    download_delay: Arc<Mutex<Option<Duration>>>,
}

impl FakeHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, url: &str, data: &[u8]) {
        self.state.lock().files.insert(
            url.to_string(),
            RemoteFile {
                data: data.to_vec(),
                fail_after: None,
                send_length: true,
            },
        );
    }

    /// Serve without a `Content-Length` header.
    pub fn serve_unsized(&self, url: &str, data: &[u8]) {
        self.state.lock().files.insert(
            url.to_string(),
            RemoteFile {
                data: data.to_vec(),
                fail_after: None,
                send_length: false,
            },
        );
    }

    /// Serve `data` but break the connection after `after` bytes.
    pub fn serve_broken(&self, url: &str, data: &[u8], after: usize) {
        self.state.lock().files.insert(
            url.to_string(),
            RemoteFile {
                data: data.to_vec(),
                fail_after: Some(after),
                send_length: true,
            },
        );
    }

    pub fn set_download_delay(&self, delay: Duration) {
        *self.download_delay.lock() = Some(delay);
    }

    /// Every request fails with a network error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn respond_with(&self, status: u16, body: &str) {
        let mut state = self.state.lock();
        state.status = Some(status);
        state.response_body = body.as_bytes().to_vec();
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state.lock().requests.clone()
    }

    pub fn download_count(&self, url: &str) -> usize {
        self.state
            .lock()
            .downloads
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }
}

#[async_trait]
impl HttpClient for FakeHttpClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(BridgeError::Network("connection refused".to_string()));
        }
        let mut state = self.state.lock();
        state.requests.push(request);
        Ok(HttpResponse {
            status: state.status.unwrap_or(200),
            headers: HashMap::new(),
            body: Bytes::from(state.response_body.clone()),
        })
    }

    async fn download_stream(&self, url: String) -> Result<DownloadStream> {
        let delay = *self.download_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(BridgeError::Network("connection refused".to_string()));
        }

        let file = {
            let mut state = self.state.lock();
            state.downloads.push(url.clone());
            state.files.get(&url).cloned()
        };
        let Some(file) = file else {
            return Err(BridgeError::OperationFailed(format!("HTTP 404 for {}", url)));
        };

        let length = file.send_length.then_some(file.data.len() as u64);
        let reader: Box<dyn AsyncRead + Send + Unpin> = match file.fail_after {
            Some(after) => {
                let partial = file.data[..after.min(file.data.len())].to_vec();
                Box::new(io::Cursor::new(partial).chain(BrokenReader))
            }
            None => Box::new(io::Cursor::new(file.data)),
        };
        Ok(DownloadStream::new(reader, length))
    }
}

struct BrokenReader;

impl AsyncRead for BrokenReader {
    fn poll_read(self: Pin<&mut Self>, _cx: &mut Context<'_>, _buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset",
        )))
    }
}

// ============================================================================
// Playback device
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    Load(String),
    Play,
    Pause,
    Stop,
    Seek(f64),
    Volume(f32),
}

#[derive(Clone, Default)]
pub struct RecordingDevice {
    commands: Arc<Mutex<Vec<DeviceCommand>>>,
    fail_load: Arc<AtomicBool>,
    loads: Arc<AtomicUsize>,
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commands(&self) -> Vec<DeviceCommand> {
        self.commands.lock().clone()
    }

    pub fn clear(&self) {
        self.commands.lock().clear();
    }

    pub fn last_load(&self) -> Option<String> {
        self.commands.lock().iter().rev().find_map(|c| match c {
            DeviceCommand::Load(uri) => Some(uri.clone()),
            _ => None,
        })
    }

    pub fn set_fail_load(&self, fail: bool) {
        self.fail_load.store(fail, Ordering::SeqCst);
    }

    fn record(&self, command: DeviceCommand) {
        self.commands.lock().push(command);
    }
}

#[async_trait]
impl PlaybackDevice for RecordingDevice {
    async fn load(&self, uri: &str) -> Result<()> {
        if self.fail_load.load(Ordering::SeqCst) {
            return Err(BridgeError::OperationFailed("decoder unavailable".to_string()));
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.record(DeviceCommand::Load(uri.to_string()));
        Ok(())
    }

    async fn play(&self) -> Result<()> {
        self.record(DeviceCommand::Play);
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.record(DeviceCommand::Pause);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.record(DeviceCommand::Stop);
        Ok(())
    }

    async fn seek_to(&self, position_seconds: f64) -> Result<()> {
        self.record(DeviceCommand::Seek(position_seconds));
        Ok(())
    }

    async fn set_volume(&self, volume: f32) -> Result<()> {
        self.record(DeviceCommand::Volume(volume));
        Ok(())
    }
}

// ============================================================================
// Clock
// ============================================================================

pub struct FixedClock(pub DateTime<Utc>);

impl Default for FixedClock {
    fn default() -> Self {
        Self(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub fs: MemoryFileSystem,
    pub http: FakeHttpClient,
    pub store: MemorySettingsStore,
    pub device: RecordingDevice,
    pub engine: PlaybackEngine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_parts(MemoryFileSystem::new(), MemorySettingsStore::new(), FakeHttpClient::new())
    }

    pub fn with_parts(fs: MemoryFileSystem, store: MemorySettingsStore, http: FakeHttpClient) -> Self {
        let device = RecordingDevice::new();
        let config = EngineConfig::builder()
            .file_system(Arc::new(fs.clone()))
            .settings_store(Arc::new(store.clone()))
            .http_client(Arc::new(http.clone()))
            .playback_device(Arc::new(device.clone()))
            .clock(Arc::new(FixedClock::default()))
            .api_base_url(API_BASE)
            .settings_debounce(Duration::from_millis(500))
            .downloads(DownloadSettings {
                scan_directories: vec![PathBuf::from("/music")],
                ..DownloadSettings::default()
            })
            .build()
            .expect("valid config");

        let engine = PlaybackEngine::with_rng(config, StdRng::seed_from_u64(42));
        Self {
            fs,
            http,
            store,
            device,
            engine,
        }
    }
}

pub fn remote_track(id: &str, duration: f64) -> Track {
    Track::remote(id, format!("Song {id}"), "Artist", duration, format!("/audio/{id}.mp3"))
}

pub fn remote_url(id: &str) -> String {
    format!("{API_BASE}/audio/{id}.mp3")
}
