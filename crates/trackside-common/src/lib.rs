//! # Trackside Common
//!
//! Logging configuration and small helpers shared by the Trackside crates.
//!
//! ## Features
//!
//! - Logging configuration and setup
//! - Best-effort result handling (log and continue)
//! - Wall-clock timestamps for cache snapshots and notification payloads

use std::fmt::Display;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod logging;

pub use logging::{init_logging, LogConfig, LogFormat};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Extension trait for best-effort operations.
///
/// Event handlers must never surface internal failures to the host, so most
/// boundary calls end in "log it and carry on".
pub trait LogErrorExt<T> {
    /// Log the error at WARN and discard it.
    fn log_warn(self, what: &str) -> Option<T>;

    /// Log the error at ERROR and discard it.
    fn log_error(self, what: &str) -> Option<T>;
}

impl<T, E: Display> LogErrorExt<T> for Result<T, E> {
    fn log_warn(self, what: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, "{what}");
                None
            }
        }
    }

    fn log_error(self, what: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(error = %e, "{what}");
                None
            }
        }
    }
}
