//! # Queue Manager
//!
//! Ordered track list, current selection and shuffle pool.
//!
//! Next/previous are computed as [`QueueStep`] values by pure functions and
//! applied separately, so the controller can resolve the new track's source
//! before any observable state changes.

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use crate::models::Track;

/// Elapsed time after which "previous" restarts the current track.
pub const RESTART_THRESHOLD_SECONDS: f64 = 3.0;

/// Shuffle/loop flags that drive next/previous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackMode {
    pub shuffle: bool,
    pub loop_enabled: bool,
}

/// Transition computed by [`QueueManager::compute_next`] or
/// [`QueueManager::compute_previous`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueStep {
    /// Nothing to do (empty queue).
    Stay,
    /// Move to `index`; replace the shuffle pool when `shuffle_pool` is set.
    Select {
        index: usize,
        shuffle_pool: Option<Vec<String>>,
    },
    /// Seek the current track back to 0.
    Restart,
    /// Queue exhausted with loop off: pause at 0 on the current track.
    Stop,
}

/// Outcome of [`QueueManager::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    NotFound,
    /// A non-current track was removed.
    Removed,
    /// The current track was removed and the selection moved.
    CurrentReplaced { index: usize },
    /// The last remaining track was removed.
    Emptied,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueManager {
    tracks: Vec<Track>,
    current_index: Option<usize>,
    shuffle_pool: Vec<String>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.current_index.and_then(|i| self.tracks.get(i))
    }

    pub fn shuffle_pool(&self) -> &[String] {
        &self.shuffle_pool
    }

    pub fn position_of(&self, track_id: &str) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == track_id)
    }

    /// Build a fresh play order for one shuffle pass, excluding `exclude`.
    pub fn build_pool<R: Rng + ?Sized>(&self, exclude: Option<&str>, rng: &mut R) -> Vec<String> {
        let mut pool: Vec<String> = self
            .tracks
            .iter()
            .filter(|t| Some(t.id.as_str()) != exclude)
            .map(|t| t.id.clone())
            .collect();
        // Fisher-Yates
        pool.shuffle(rng);
        pool
    }

    pub fn rebuild_pool<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let exclude = self.current_track().map(|t| t.id.clone());
        self.shuffle_pool = self.build_pool(exclude.as_deref(), rng);
    }

    /// Insert a newly queued id at a random position of the current pass.
    pub fn add_to_pool<R: Rng + ?Sized>(&mut self, track_id: &str, rng: &mut R) {
        if self.shuffle_pool.iter().any(|id| id == track_id)
            || self.current_track().is_some_and(|t| t.id == track_id)
        {
            return;
        }
        let at = rng.gen_range(0..=self.shuffle_pool.len());
        self.shuffle_pool.insert(at, track_id.to_string());
    }

    pub fn discard_pool(&mut self) {
        self.shuffle_pool.clear();
    }

    /// Index that would be selected after replacing the sequence with `tracks`.
    pub fn selection_after_replace(&self, tracks: &[Track], preserve_current: bool) -> Option<usize> {
        if tracks.is_empty() {
            return None;
        }
        let kept = if preserve_current {
            self.current_track()
                .and_then(|current| tracks.iter().position(|t| t.id == current.id))
        } else {
            None
        };
        kept.or(Some(0))
    }

    /// Replace the sequence.
    ///
    /// Keeps the current track selected when it is still present (and
    /// `preserve_current` is set); otherwise selects the first track. Returns
    /// the new selection.
    pub fn set_queue<R: Rng + ?Sized>(
        &mut self,
        tracks: Vec<Track>,
        preserve_current: bool,
        shuffle: bool,
        rng: &mut R,
    ) -> Option<usize> {
        let selection = self.selection_after_replace(&tracks, preserve_current);
        self.tracks = tracks;
        self.current_index = selection;
        self.shuffle_pool.clear();
        if shuffle && selection.is_some() {
            self.rebuild_pool(rng);
        }
        debug!(
            length = self.tracks.len(),
            current_index = ?self.current_index,
            "Queue replaced"
        );
        selection
    }

    /// Replace the sequence and select `start_index` (clamped).
    pub fn select_and_play<R: Rng + ?Sized>(
        &mut self,
        tracks: Vec<Track>,
        start_index: usize,
        shuffle: bool,
        rng: &mut R,
    ) -> Option<usize> {
        self.tracks = tracks;
        self.shuffle_pool.clear();
        if self.tracks.is_empty() {
            self.current_index = None;
            return None;
        }
        let index = start_index.min(self.tracks.len() - 1);
        self.current_index = Some(index);
        if shuffle {
            self.rebuild_pool(rng);
        }
        Some(index)
    }

    /// Select a specific index, keeping the shuffle pool consistent.
    pub fn select<R: Rng + ?Sized>(&mut self, index: usize, shuffle: bool, rng: &mut R) -> bool {
        if index >= self.tracks.len() {
            return false;
        }
        self.current_index = Some(index);
        if shuffle {
            let id = self.tracks[index].id.clone();
            match self.shuffle_pool.iter().position(|p| *p == id) {
                Some(pos) => {
                    self.shuffle_pool.remove(pos);
                }
                None => self.rebuild_pool(rng),
            }
        }
        true
    }

    /// Append a track unless one with the same id is already queued.
    pub fn add(&mut self, track: Track) -> bool {
        if self.position_of(&track.id).is_some() {
            return false;
        }
        self.tracks.push(track);
        true
    }

    pub fn remove(&mut self, track_id: &str) -> RemoveOutcome {
        let Some(removed) = self.position_of(track_id) else {
            return RemoveOutcome::NotFound;
        };
        self.tracks.remove(removed);
        self.shuffle_pool.retain(|id| id != track_id);

        if self.tracks.is_empty() {
            self.current_index = None;
            self.shuffle_pool.clear();
            return RemoveOutcome::Emptied;
        }

        match self.current_index {
            Some(current) if current == removed => {
                let index = removed.min(self.tracks.len() - 1);
                self.current_index = Some(index);
                let id = self.tracks[index].id.clone();
                self.shuffle_pool.retain(|p| *p != id);
                RemoveOutcome::CurrentReplaced { index }
            }
            Some(current) if current > removed => {
                self.current_index = Some(current - 1);
                RemoveOutcome::Removed
            }
            _ => RemoveOutcome::Removed,
        }
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.current_index = None;
        self.shuffle_pool.clear();
    }

    /// Compute the transition for "next". Does not mutate the queue.
    pub fn compute_next<R: Rng + ?Sized>(&self, mode: PlaybackMode, rng: &mut R) -> QueueStep {
        if self.tracks.is_empty() {
            return QueueStep::Stay;
        }

        let Some(current) = self.current_index else {
            let shuffle_pool = mode
                .shuffle
                .then(|| self.build_pool(Some(self.tracks[0].id.as_str()), rng));
            return QueueStep::Select {
                index: 0,
                shuffle_pool,
            };
        };

        if mode.shuffle {
            let mut pool = if self.shuffle_pool.is_empty() {
                if !mode.loop_enabled {
                    return QueueStep::Stop;
                }
                let exclude = self.tracks.get(current).map(|t| t.id.as_str());
                self.build_pool(exclude, rng)
            } else {
                self.shuffle_pool.clone()
            };

            if pool.is_empty() {
                // Single-track queue with loop on: replay it.
                return QueueStep::Select {
                    index: current,
                    shuffle_pool: Some(pool),
                };
            }

            let head = pool.remove(0);
            let index = self.position_of(&head).unwrap_or(current);
            return QueueStep::Select {
                index,
                shuffle_pool: Some(pool),
            };
        }

        let last = self.tracks.len() - 1;
        if current >= last && !mode.loop_enabled {
            return QueueStep::Stop;
        }
        QueueStep::Select {
            index: (current + 1) % self.tracks.len(),
            shuffle_pool: None,
        }
    }

    /// Compute the transition for "previous" given the elapsed position.
    pub fn compute_previous(&self, position_seconds: f64, mode: PlaybackMode) -> QueueStep {
        if self.tracks.is_empty() {
            return QueueStep::Stay;
        }
        let Some(current) = self.current_index else {
            return QueueStep::Stay;
        };

        if position_seconds > RESTART_THRESHOLD_SECONDS {
            return QueueStep::Restart;
        }

        let index = if current == 0 {
            self.tracks.len() - 1
        } else {
            current - 1
        };

        let shuffle_pool = if mode.shuffle {
            let id = &self.tracks[index].id;
            self.shuffle_pool
                .contains(id)
                .then(|| self.shuffle_pool.iter().filter(|p| *p != id).cloned().collect())
        } else {
            None
        };

        QueueStep::Select {
            index,
            shuffle_pool,
        }
    }

    /// Apply a step produced by this queue. `Restart`, `Stop` and `Stay`
    /// leave the queue untouched.
    pub fn apply(&mut self, step: &QueueStep) {
        if let QueueStep::Select {
            index,
            shuffle_pool,
        } = step
        {
            if *index < self.tracks.len() {
                self.current_index = Some(*index);
            }
            if let Some(pool) = shuffle_pool {
                self.shuffle_pool = pool.clone();
            }
        }
    }
}
