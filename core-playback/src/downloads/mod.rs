//! # Downloads
//!
//! Offline copies of remote tracks and discovery of audio already on the
//! device.
//!
//! ## Components
//!
//! - [`DownloadManager`] - runs download jobs and owns the catalog
//! - [`CatalogStore`] - persists the catalog as one JSON snapshot
//! - [`LibraryScanner`] - walks well-known directories for audio files

pub mod catalog;
pub mod manager;
pub mod scanner;

pub use catalog::{CatalogStore, LoadedCatalog, CATALOG_KEY};
pub use manager::DownloadManager;
pub use scanner::{parse_file_name, LibraryScanner};
