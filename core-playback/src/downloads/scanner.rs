//! Local library scan.
//!
//! Walks a set of root directories for audio files and turns each one into
//! a [`Track`] whose title and artist come from an `"Artist - Title.ext"`
//! file name.

use bridge_traits::FileSystemAccess;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::models::Track;
use crate::source::to_file_uri;

const ARTIST_SEPARATOR: &str = " - ";
const UNKNOWN_ARTIST: &str = "Unknown Artist";

pub struct LibraryScanner {
    fs: Arc<dyn FileSystemAccess>,
    roots: Vec<PathBuf>,
    extensions: Vec<String>,
    max_depth: usize,
}

impl LibraryScanner {
    pub fn new(fs: Arc<dyn FileSystemAccess>, roots: Vec<PathBuf>, extensions: &[String]) -> Self {
        Self {
            fs,
            roots,
            extensions: extensions.iter().map(|e| e.to_ascii_lowercase()).collect(),
            max_depth: 3,
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Scan every root. Unreadable directories are skipped.
    #[instrument(skip(self), fields(roots = self.roots.len()))]
    pub async fn scan(&self) -> Vec<Track> {
        let mut seen = HashSet::new();
        let mut tracks = Vec::new();

        for root in &self.roots {
            match self.fs.exists(root).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(root = ?root, "Scan root does not exist");
                    continue;
                }
                Err(e) => {
                    warn!(root = ?root, error = %e, "Cannot check scan root");
                    continue;
                }
            }

            let mut pending = vec![(root.clone(), 0usize)];
            while let Some((dir, depth)) = pending.pop() {
                let entries = match self.fs.list_directory(&dir).await {
                    Ok(entries) => entries,
                    Err(e) => {
                        warn!(dir = ?dir, error = %e, "Skipping unreadable directory");
                        continue;
                    }
                };

                for entry in entries {
                    let is_directory = match self.fs.metadata(&entry).await {
                        Ok(meta) => meta.is_directory,
                        Err(e) => {
                            debug!(path = ?entry, error = %e, "Skipping entry without metadata");
                            continue;
                        }
                    };

                    if is_directory {
                        if depth < self.max_depth {
                            pending.push((entry, depth + 1));
                        }
                    } else if self.is_audio(&entry) && seen.insert(entry.clone()) {
                        tracks.push(track_from_path(&entry));
                    }
                }
            }
        }

        info!(tracks_found = tracks.len(), "Local library scan complete");
        tracks
    }

    fn is_audio(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.iter().any(|known| known.eq_ignore_ascii_case(ext)))
            .unwrap_or(false)
    }
}

/// Split `"Artist - Title"` into `(artist, title)`.
///
/// Without a separator the whole stem is the title and the artist is unknown.
pub fn parse_file_name(stem: &str) -> (String, String) {
    if let Some((artist, title)) = stem.split_once(ARTIST_SEPARATOR) {
        let (artist, title) = (artist.trim(), title.trim());
        if !artist.is_empty() && !title.is_empty() {
            return (artist.to_string(), title.to_string());
        }
    }
    (UNKNOWN_ARTIST.to_string(), stem.trim().to_string())
}

fn track_from_path(path: &Path) -> Track {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (artist, title) = parse_file_name(&stem);

    Track::local(local_track_id(path), title, artist, 0.0, to_file_uri(path))
}

/// Stable id for a file on this device.
fn local_track_id(path: &Path) -> String {
    let digest = Sha256::digest(path.to_string_lossy().as_bytes());
    format!("local-{}", &hex::encode(digest)[..16])
}
