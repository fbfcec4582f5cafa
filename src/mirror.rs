// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Durable mirror integration traits.
//!
//! Defines the narrow contract between the replication drain task and the
//! secondary store. The mirror is write-only-by-replication: the drain task
//! is the sole writer, and the read-backs exist for verification and
//! operational tooling, never for the live request path.
//!
//! # Example
//!
//! ```rust,no_run
//! use named_count::mirror::{MirrorStore, BoxFuture};
//! use named_count::catalogue::CounterDefinition;
//! use named_count::values::CounterValue;
//!
//! struct MyMirror { /* ... */ }
//!
//! impl MirrorStore for MyMirror {
//!     fn upsert_definition(&self, _def: CounterDefinition) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!
//!     fn upsert_value(&self, _row: CounterValue) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!
//!     fn definition(&self, _name: &str) -> BoxFuture<'_, Option<CounterDefinition>> {
//!         Box::pin(async move { Ok(None) })
//!     }
//!
//!     fn value(&self, _counter_id: i64, _user_id: i64) -> BoxFuture<'_, Option<i64>> {
//!         Box::pin(async move { Ok(None) })
//!     }
//! }
//! ```

use crate::catalogue::CounterDefinition;
use crate::values::CounterValue;
use std::future::Future;
use std::pin::Pin;

/// Result type for mirror operations.
pub type MirrorResult<T> = std::result::Result<T, MirrorError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = MirrorResult<T>> + Send + 'a>>;

/// Simplified error for mirror operations.
///
/// The drain task treats every mirror error as transient and retries with
/// backoff; the message is carried for logs and the dead-letter channel.
#[derive(Debug, Clone)]
pub struct MirrorError(pub String);

impl std::fmt::Display for MirrorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for MirrorError {}

/// Trait defining what the replication engine needs from the durable mirror.
///
/// The daemon provides an implementation (normally
/// [`PostgresMirror`](crate::postgres::PostgresMirror)), allowing the engine to:
/// 1. Upsert replicated definitions (`upsert_definition`)
/// 2. Upsert replicated value rows (`upsert_value`)
/// 3. Read back state for verification (`definition`, `value`)
///
/// Both upserts must be idempotent: the same record applied twice leaves the
/// mirror unchanged. This trait allows testing with mocks and decouples the
/// engine from any particular database.
pub trait MirrorStore: Send + Sync + 'static {
    /// Upsert a counter definition by id.
    ///
    /// The record carries the full post-commit state, so conflicts resolve
    /// by overwrite (`name`, `description`, `updated_at`); `id` and
    /// `created_at` stay fixed on conflict.
    fn upsert_definition(&self, def: CounterDefinition) -> BoxFuture<'_, ()>;

    /// Upsert a value row by `(counter_id, user_id)`.
    ///
    /// The mirror never computes increments itself, it stores the
    /// pre-computed value from the primary.
    fn upsert_value(&self, row: CounterValue) -> BoxFuture<'_, ()>;

    /// Fetch a mirrored definition by name (verification/ops only).
    fn definition(&self, name: &str) -> BoxFuture<'_, Option<CounterDefinition>>;

    /// Fetch a mirrored value (verification/ops only).
    fn value(&self, counter_id: i64, user_id: i64) -> BoxFuture<'_, Option<i64>>;

    /// Liveness probe. Default implementation succeeds, for mirrors with no
    /// meaningful health signal.
    fn ping(&self) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// A no-op implementation for testing/standalone mode.
///
/// Logs operations but doesn't actually store anything.
#[derive(Clone)]
pub struct NoOpMirror;

impl MirrorStore for NoOpMirror {
    fn upsert_definition(&self, def: CounterDefinition) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            tracing::debug!(
                id = def.id,
                name = %def.name,
                "NoOp: would upsert definition"
            );
            Ok(())
        })
    }

    fn upsert_value(&self, row: CounterValue) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            tracing::debug!(
                counter_id = row.counter_id,
                user_id = row.user_id,
                value = row.value,
                "NoOp: would upsert value"
            );
            Ok(())
        })
    }

    fn definition(&self, _name: &str) -> BoxFuture<'_, Option<CounterDefinition>> {
        Box::pin(async { Ok(None) })
    }

    fn value(&self, _counter_id: i64, _user_id: i64) -> BoxFuture<'_, Option<i64>> {
        Box::pin(async { Ok(None) })
    }
}
