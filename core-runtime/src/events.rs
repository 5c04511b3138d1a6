//! # Event Bus System
//!
//! Event-driven notifications for the playback engine using `tokio::sync::broadcast`.
//!
//! ## Overview
//!
//! - **EventBus**: central broadcast channel for publishing events
//! - **CoreEvent**: top-level enum wrapping playback, queue and download events
//! - **EventStream**: receiver wrapper with optional filtering
//!
//! UI layers subscribe once and re-render on the events they care about;
//! download progress in particular is delivered here rather than by mutating
//! shared state from inside the transfer loop.
//!
//! ```text
//! ┌──────────────────┐   emit   ┌───────────┐  subscribe  ┌──────────┐
//! │ PlaybackController├────────►│ EventBus  ├────────────►│ UI layer │
//! │ DownloadManager   │         │ (broadcast)│            └──────────┘
//! └──────────────────┘          └───────────┘
//! ```
//!
//! ## Error handling
//!
//! `emit` fails only when nobody is subscribed; publishers treat that as
//! benign and ignore it. Slow subscribers receive `RecvError::Lagged(n)` and
//! should resynchronise from the engine's query surface.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

/// Top-level event enum encompassing all event categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    /// Playback state-machine events
    Playback(PlaybackEvent),
    /// Queue mutations
    Queue(QueueEvent),
    /// Download jobs and catalog changes
    Download(DownloadEvent),
}

impl CoreEvent {
    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Playback(e) => e.description(),
            CoreEvent::Queue(e) => e.description(),
            CoreEvent::Download(e) => e.description(),
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Playback(PlaybackEvent::Error { .. }) => EventSeverity::Error,
            CoreEvent::Download(DownloadEvent::Failed { .. }) => EventSeverity::Warning,
            CoreEvent::Download(DownloadEvent::CatalogReconciled { dropped, .. })
                if *dropped > 0 =>
            {
                EventSeverity::Warning
            }
            CoreEvent::Playback(PlaybackEvent::TrackChanged { .. }) => EventSeverity::Info,
            CoreEvent::Download(DownloadEvent::Completed { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Playback Events
// ============================================================================

/// Events related to the playback state machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    /// A different track became current.
    TrackChanged {
        track_id: String,
        title: String,
        /// Track duration (milliseconds).
        duration_ms: u64,
        /// Whether the source resolved to a local file.
        is_local: bool,
    },
    /// Playback started or resumed.
    Playing { track_id: String },
    /// Playback paused.
    Paused {
        track_id: String,
        /// Position when paused (milliseconds).
        position_ms: u64,
    },
    /// The queue ran out with loop disabled.
    QueueEnded { track_id: String },
    /// Playback stopped and the device was released.
    Stopped,
    /// A seek was requested; the device integration applies it.
    SeekRequested { track_id: String, position_ms: u64 },
    /// Volume or mute changed.
    VolumeChanged { volume_percent: u8, muted: bool },
    /// Shuffle or loop changed.
    ModeChanged { shuffle: bool, loop_enabled: bool },
    /// A playback command was rejected or the device failed.
    Error {
        track_id: Option<String>,
        message: String,
        recoverable: bool,
    },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::TrackChanged { .. } => "Current track changed",
            PlaybackEvent::Playing { .. } => "Playback started",
            PlaybackEvent::Paused { .. } => "Playback paused",
            PlaybackEvent::QueueEnded { .. } => "Queue ended",
            PlaybackEvent::Stopped => "Playback stopped",
            PlaybackEvent::SeekRequested { .. } => "Seek requested",
            PlaybackEvent::VolumeChanged { .. } => "Volume changed",
            PlaybackEvent::ModeChanged { .. } => "Playback mode changed",
            PlaybackEvent::Error { .. } => "Playback error",
        }
    }
}

// ============================================================================
// Queue Events
// ============================================================================

/// Events describing queue mutations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum QueueEvent {
    /// The whole sequence was replaced.
    Replaced {
        length: usize,
        current_index: Option<usize>,
    },
    TrackAdded { track_id: String },
    TrackRemoved { track_id: String },
    Cleared,
}

impl QueueEvent {
    fn description(&self) -> &str {
        match self {
            QueueEvent::Replaced { .. } => "Queue replaced",
            QueueEvent::TrackAdded { .. } => "Track added to queue",
            QueueEvent::TrackRemoved { .. } => "Track removed from queue",
            QueueEvent::Cleared => "Queue cleared",
        }
    }
}

// ============================================================================
// Download Events
// ============================================================================

/// Events emitted by the download manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum DownloadEvent {
    Started { track_id: String },
    /// Coarse-grained progress (only emitted on step-sized changes).
    Progress { track_id: String, percent: u8 },
    Completed {
        track_id: String,
        file_size_bytes: u64,
    },
    Failed { track_id: String, message: String },
    Deleted { track_id: String },
    /// Startup reconciliation of the persisted catalog.
    CatalogReconciled { kept: usize, dropped: usize },
    /// A local library scan finished.
    LibraryScanned { tracks_found: usize },
}

impl DownloadEvent {
    fn description(&self) -> &str {
        match self {
            DownloadEvent::Started { .. } => "Download started",
            DownloadEvent::Progress { .. } => "Download progress",
            DownloadEvent::Completed { .. } => "Download completed",
            DownloadEvent::Failed { .. } => "Download failed",
            DownloadEvent::Deleted { .. } => "Download deleted",
            DownloadEvent::CatalogReconciled { .. } => "Download catalog reconciled",
            DownloadEvent::LibraryScanned { .. } => "Local library scanned",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Central event bus for publishing and subscribing to events.
///
/// Uses `tokio::sync::broadcast` internally: clone the bus for more
/// producers, call [`subscribe`](EventBus::subscribe) for more consumers.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, QueueEvent};
///
/// let bus = EventBus::new(16);
/// let mut rx = bus.subscribe();
/// bus.emit(CoreEvent::Queue(QueueEvent::Cleared)).ok();
/// assert_eq!(rx.try_recv().unwrap(), CoreEvent::Queue(QueueEvent::Cleared));
/// ```
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    /// Creates a new event bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an
    /// error if there are no active subscribers.
    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

/// Type alias for event filter functions.
type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CoreEvent, EventBus, EventStream};
///
/// let bus = EventBus::new(16);
/// let downloads_only = EventStream::new(bus.subscribe())
///     .filter(|event| matches!(event, CoreEvent::Download(_)));
/// ```
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events matching `predicate` will be returned by `recv()`.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CoreEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive a matching event without waiting.
    ///
    /// Returns `None` if no matching events are currently buffered.
    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}
