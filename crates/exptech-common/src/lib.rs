//! # ExpTech Common
//!
//! Shared utilities for the ExpTech offline engine crates.
//!
//! ## Features
//!
//! - Logging configuration and setup
//! - Wall-clock helpers for cache generation stamping

use std::time::{SystemTime, UNIX_EPOCH};

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

/// Milliseconds since the Unix epoch.
///
/// Used to stamp cache generations and entry write times. A clock that
/// reads before the epoch yields 0.
pub fn unix_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
