// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the change stream mirror.
//!
//! Errors are split by where they stop. Source-side errors end the session;
//! everything raised while applying a single change is absorbed by the
//! [`classifier`](crate::classifier) and the loop moves on.
//!
//! # Error Categories
//!
//! | Error Type | Fatal | Retryable | Description |
//! |------------|-------|-----------|-------------|
//! | `Source` | Yes | No | Change stream could not be opened or read |
//! | `StreamClosed` | Yes | No | Server terminated the change stream |
//! | `Target` | No | Depends | Write against the target failed |
//! | `ApplyTimeout` | No | Yes | Transaction did not commit before the deadline |
//! | `InvalidEvent` | No | No | Change is missing the document or its `_id` |
//! | `Config` | No | No | Configuration invalid |
//! | `InvalidState` | No | No | Session state machine violation |
//!
//! "Retryable" only matters when the applier is configured with more than one
//! attempt; by default every per-event failure is logged once and dropped.

use crate::target::TargetError;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Errors that can occur during replication.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Source change stream error.
    ///
    /// Raised when connecting to the source, opening the change stream, or
    /// fetching the next batch. Fatal: there is no reconnect or resume logic.
    #[error("Source error ({operation}): {message}")]
    Source {
        operation: String,
        message: String,
        #[source]
        source: Option<mongodb::error::Error>,
    },

    /// The server closed the change stream (e.g. after an invalidate event).
    #[error("Change stream closed: {0}")]
    StreamClosed(String),

    /// Write against the target store failed.
    #[error("Target error: {0}")]
    Target(#[from] TargetError),

    /// The per-event transaction did not finish before its deadline.
    ///
    /// The transaction is aborted when its future is dropped, so nothing from
    /// this event reaches the target.
    #[error("Apply timed out after {}", humantime::format_duration(*.0))]
    ApplyTimeout(Duration),

    /// The change cannot be mapped to a write (missing document or `_id`).
    #[error("Invalid change event: {0}")]
    InvalidEvent(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Session state machine violation (e.g. calling `run()` twice).
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },
}

impl ReplicationError {
    /// Create a source error from a driver error.
    pub fn source(operation: impl Into<String>, source: mongodb::error::Error) -> Self {
        Self::Source {
            operation: operation.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a source error without an underlying driver error.
    pub fn source_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Source {
            operation: operation.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Whether this error ends the replication session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Source { .. } | Self::StreamClosed(_))
    }

    /// Whether a fresh attempt at the same event could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Target(e) => e.is_retryable(),
            Self::ApplyTimeout(_) => true,
            Self::Source { .. } => false,
            Self::StreamClosed(_) => false,
            Self::InvalidEvent(_) => false,
            Self::Config(_) => false,
            Self::InvalidState { .. } => false,
        }
    }

    /// Whether this is a unique-index violation on the target.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::Target(TargetError::DuplicateKey { .. }))
    }

    /// Short, stable label for logs and metrics.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Source { .. } => "source",
            Self::StreamClosed(_) => "stream_closed",
            Self::Target(e) => e.kind_label(),
            Self::ApplyTimeout(_) => "timeout",
            Self::InvalidEvent(_) => "invalid_event",
            Self::Config(_) => "config",
            Self::InvalidState { .. } => "invalid_state",
        }
    }
}
