// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the named-count core.
//!
//! Errors are categorized by where they occur (request validation, catalogue
//! lookup, mirror replication) and include context to help with debugging.
//!
//! # Error Categories
//!
//! | Error Type | Retryable | Surfaced to caller | Description |
//! |------------|-----------|--------------------|-------------|
//! | `NotFound` | No | Yes | Unknown counter id or name |
//! | `NameConflict` | No | Yes | Rename collides with a live definition |
//! | `InvalidArgument` | No | Yes | Malformed name, user id, or delta |
//! | `Mirror` | Yes | No | Durable mirror unreachable or write failed |
//! | `InvalidState` | No | No | Engine state machine violation |
//! | `Shutdown` | No | Yes | Engine is shutting down |
//! | `Internal` | No | Yes | Unexpected store failure |
//!
//! # Retry Behavior
//!
//! Use [`CounterError::is_retryable()`] to determine if an operation should
//! be retried with backoff. Only mirror errors are retryable, and only the
//! replication drain task retries them; validation and lookup errors on the
//! synchronous path are returned to the caller exactly once.

use thiserror::Error;

/// Result type alias for named-count operations.
pub type Result<T> = std::result::Result<T, CounterError>;

/// Errors that can occur in the counter core.
///
/// Each variant includes context about where the error occurred.
/// Use [`is_retryable()`](Self::is_retryable) to check if the operation
/// should be retried.
#[derive(Error, Debug)]
pub enum CounterError {
    /// Unknown counter id or name.
    ///
    /// Returned when a value operation references a counter id that does
    /// not resolve to a live definition, or a catalogue lookup misses.
    #[error("not found: {0}")]
    NotFound(String),

    /// Rename collides with another live definition.
    ///
    /// Only `update` can produce this; `put` resolves creation races
    /// deterministically and never surfaces a uniqueness violation.
    #[error("name conflict: {name:?} is already counter {existing_id}")]
    NameConflict { name: String, existing_id: i64 },

    /// Malformed request field (empty name, non-positive user id, overflow).
    ///
    /// Not retryable - the caller must fix the request.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Durable mirror write or read failure.
    ///
    /// Occurs inside the replication drain task. Retryable with backoff;
    /// never surfaced on the request path, since the authoritative write
    /// already committed.
    #[error("mirror error ({operation}): {message}")]
    Mirror { operation: String, message: String },

    /// Engine state machine violation.
    ///
    /// Occurs when an operation is attempted in the wrong state
    /// (e.g., calling `start()` on an already-running engine).
    /// Not retryable - indicates a bug in the caller.
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Shutdown in progress.
    ///
    /// Returned when operations are attempted during shutdown.
    #[error("shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    ///
    /// Catch-all for errors that shouldn't happen.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CounterError {
    /// Create a mirror error with operation context.
    pub fn mirror(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Mirror {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Mirror { .. } => true, // Transient mirror unavailability
            Self::NotFound(_) => false,
            Self::NameConflict { .. } => false,
            Self::InvalidArgument(_) => false,
            Self::InvalidState { .. } => false,
            Self::Shutdown => false,
            Self::Internal(_) => false,
        }
    }

    /// Wire-level error code for the response envelope.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::NameConflict { .. } => ErrorCode::NameConflict,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            // Mirror and lifecycle errors never belong on the request path;
            // if one leaks, the caller sees it as an internal failure.
            Self::Mirror { .. } | Self::InvalidState { .. } | Self::Internal(_) => {
                ErrorCode::Internal
            }
            Self::Shutdown => ErrorCode::Unavailable,
        }
    }
}

/// Structured error code carried in the response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    NameConflict,
    InvalidArgument,
    Unavailable,
    Internal,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "NOT_FOUND"),
            Self::NameConflict => write!(f, "NAME_CONFLICT"),
            Self::InvalidArgument => write!(f, "INVALID_ARGUMENT"),
            Self::Unavailable => write!(f, "UNAVAILABLE"),
            Self::Internal => write!(f, "INTERNAL"),
        }
    }
}
