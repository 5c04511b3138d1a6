//! # Desktop Bridge Implementations
//!
//! Default implementations of the host bridges for desktop platforms
//! (macOS, Windows, Linux), used by tools and integration tests that run
//! the engine outside a mobile shell.
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`, with streaming downloads
//! - `FileSystemAccess` using `tokio::fs` rooted at the user data directory
//! - `SettingsStore` using an SQLite-backed key-value table
//!
//! Audio output is not provided here; hosts inject their own
//! `PlaybackDevice`.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, SqliteSettingsStore, TokioFileSystem};
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::error::Result<()> {
//!     let http_client = ReqwestHttpClient::new()?;
//!     let fs = TokioFileSystem::new();
//!     let settings = SqliteSettingsStore::new(fs.data_directory().join("settings.db")).await?;
//!     // Hand these to EngineConfig::builder()
//!     Ok(())
//! }
//! ```

mod filesystem;
mod http;
mod settings;

pub use filesystem::TokioFileSystem;
pub use http::ReqwestHttpClient;
pub use settings::SqliteSettingsStore;
