//! # Core Runtime Module
//!
//! Foundational runtime infrastructure shared by the playback engine:
//! - Logging and tracing infrastructure
//! - Engine configuration and bridge wiring
//! - Event bus for playback, queue and download notifications
//!
//! ## Overview
//!
//! This crate holds no playback logic. It establishes the logging
//! conventions, the fail-fast configuration builder, and the broadcast
//! channel that UI layers subscribe to.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
