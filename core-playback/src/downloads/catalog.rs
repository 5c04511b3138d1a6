//! Durable download catalog.
//!
//! The catalog is always written as a complete JSON array so the stored
//! value is a valid snapshot after every write.

use bridge_traits::SettingsStore;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::DownloadedTrackRecord;

/// Settings key holding the JSON array of [`DownloadedTrackRecord`].
pub const CATALOG_KEY: &str = "playback.downloaded_tracks";

/// Result of reading the stored catalog.
#[derive(Debug, Default)]
pub struct LoadedCatalog {
    pub records: Vec<DownloadedTrackRecord>,
    /// The stored value could not be parsed and was ignored.
    pub malformed: bool,
}

pub struct CatalogStore {
    settings: Arc<dyn SettingsStore>,
}

impl CatalogStore {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self { settings }
    }

    pub async fn load(&self) -> Result<LoadedCatalog> {
        let Some(raw) = self.settings.get_string(CATALOG_KEY).await? else {
            debug!("No stored download catalog");
            return Ok(LoadedCatalog::default());
        };

        match serde_json::from_str::<Vec<DownloadedTrackRecord>>(&raw) {
            Ok(records) => Ok(LoadedCatalog {
                records,
                malformed: false,
            }),
            Err(e) => {
                warn!(error = %e, "Stored download catalog is malformed, starting empty");
                Ok(LoadedCatalog {
                    records: Vec::new(),
                    malformed: true,
                })
            }
        }
    }

    pub async fn save(&self, records: &[DownloadedTrackRecord]) -> Result<()> {
        let json = serde_json::to_string(records)?;
        self.settings.set_string(CATALOG_KEY, &json).await?;
        debug!(records = records.len(), "Download catalog persisted");
        Ok(())
    }
}
