//! Response envelope types.
//!
//! Every operation answers with a [`Reply`]: a status indicator, a typed
//! payload on success, and a structured error (code + message) on failure.
//! Streaming operations yield a sequence of per-item envelopes, so one
//! failed item does not abort the remaining stream.

use crate::catalogue::CounterDefinition;
use crate::error::{CounterError, ErrorCode};
use serde::{Deserialize, Serialize};

/// Terminal status of one request or one stream item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplyStatus {
    Success,
    Error,
}

/// Structured error carried alongside an `Error` status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

/// The uniform response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply<T> {
    pub status: ReplyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl<T> Reply<T> {
    /// Successful reply carrying a payload.
    pub fn success(value: T) -> Self {
        Self {
            status: ReplyStatus::Success,
            value: Some(value),
            error: None,
        }
    }

    /// Failed reply carrying the error's wire code and message.
    pub fn error(err: &CounterError) -> Self {
        Self {
            status: ReplyStatus::Error,
            value: None,
            error: Some(ErrorInfo {
                code: err.code(),
                message: err.to_string(),
            }),
        }
    }

    /// Build a reply from a store result.
    pub fn from_result(result: crate::error::Result<T>) -> Self {
        match result {
            Ok(value) => Self::success(value),
            Err(ref err) => Self::error(err),
        }
    }

    /// Check for a successful reply.
    pub fn is_success(&self) -> bool {
        self.status == ReplyStatus::Success
    }

    /// The error code, if this is an error reply.
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}

/// Wire view of one catalogue definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogueEntry {
    pub id: i64,
    pub name: String,
    pub description: String,
}

impl From<CounterDefinition> for CatalogueEntry {
    fn from(def: CounterDefinition) -> Self {
        Self {
            id: def.id,
            name: def.name,
            description: def.description,
        }
    }
}

/// Result of a catalogue `put`: the resolved id and whether this call
/// created the definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutOutcome {
    pub id: i64,
    pub created: bool,
}

/// Wire view of one counter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountReply {
    pub counter_id: i64,
    pub value: i64,
}
