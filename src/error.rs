//! Custom error types for the synchronization core.
//!
//! This module defines the primary error type, `SyncError`, used across the
//! crate. Using the `thiserror` crate, it provides a consistent taxonomy for
//! the failure modes of the bridge:
//!
//! - **`Connection`**: the registry daemon could not be reached, or tearing
//!   down a previous connection failed.
//! - **`Node`**: a registry path is absent, not readable/writable, or its
//!   stored type does not match the requested one.
//! - **`UnsupportedMode`**: a signal descriptor advertises an access kind the
//!   bridge does not handle (neither stream nor data-on-demand).
//! - **`Open`** / **`Read`** / **`StreamRead`**: remote acquisition failures,
//!   split by protocol so a disabled signal can report what actually broke.
//! - **`Execute`**: a remote action node refused to run.
//! - **`NotConnected`**: an operation that needs a live handle was called on
//!   a disconnected one.
//! - **`Config`**: wraps `figment` extraction errors from configuration
//!   loading.
//!
//! Errors never cross thread boundaries as panics. Worker threads record the
//! last failure into an [`ErrorLatch`], a swap slot holding a single
//! timestamped record, which callers poll; see the concurrency notes on
//! `SyncClient`.

use chrono::{DateTime, Utc};
use std::sync::Mutex;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum SyncError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Node error at '{path}': {reason}")]
    Node { path: String, reason: String },

    #[error("Unsupported signal access mode at '{0}'")]
    UnsupportedMode(String),

    #[error("Failed to open signal '{path}': {reason}")]
    Open { path: String, reason: String },

    #[error("Failed to read signal '{path}': {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to read stream '{path}': {reason}")]
    StreamRead { path: String, reason: String },

    #[error("Execute failed at '{path}': {reason}")]
    Execute { path: String, reason: String },

    #[error("Not connected")]
    NotConnected,

    #[error("No binding registered for key {0}")]
    UnknownBinding(usize),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),
}

impl SyncError {
    /// Node-access failure for a missing path.
    pub fn absent(path: impl Into<String>) -> Self {
        SyncError::Node {
            path: path.into(),
            reason: "no such node".into(),
        }
    }

    /// Node-access failure for a stored/requested type mismatch.
    pub fn type_mismatch(path: impl Into<String>, expected: &str, actual: &str) -> Self {
        SyncError::Node {
            path: path.into(),
            reason: format!("type mismatch: requested {expected}, stored {actual}"),
        }
    }
}

/// A single captured failure, kept until replaced or taken.
#[derive(Clone, Debug)]
pub struct ErrorRecord {
    /// Human-readable rendering of the error.
    pub message: String,
    /// When the failure was recorded.
    pub at: DateTime<Utc>,
}

/// Last-error latch shared between worker threads and callers.
///
/// This is a latch, not a queue: recording replaces whatever was there.
/// Callers observe failures by polling [`ErrorLatch::peek`] or draining with
/// [`ErrorLatch::take`].
#[derive(Debug, Default)]
pub struct ErrorLatch {
    slot: Mutex<Option<ErrorRecord>>,
}

impl ErrorLatch {
    /// Create an empty latch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure, replacing any previous one.
    pub fn record(&self, err: &SyncError) {
        let record = ErrorRecord {
            message: err.to_string(),
            at: Utc::now(),
        };
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(record);
        }
    }

    /// True if a failure is currently latched.
    pub fn is_set(&self) -> bool {
        self.slot.lock().map(|s| s.is_some()).unwrap_or(false)
    }

    /// Copy of the latched record, if any.
    pub fn peek(&self) -> Option<ErrorRecord> {
        self.slot.lock().ok().and_then(|s| s.clone())
    }

    /// Remove and return the latched record.
    pub fn take(&self) -> Option<ErrorRecord> {
        self.slot.lock().ok().and_then(|mut s| s.take())
    }

    /// Clear without reading.
    pub fn clear(&self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}
