// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication records and the producer-side queue handle.
//!
//! Every successful mutation on the catalogue or value store enqueues a
//! [`ReplicationRecord`] carrying the **full post-commit state** of the
//! changed row. Full-state records make mirror application idempotent and
//! allow the drain task to coalesce per key (latest wins) without violating
//! the per-key ordering contract: applying only the newest state is
//! equivalent to applying every intermediate state in order.
//!
//! ```text
//! store mutation ──▶ ReplicationSender::enqueue ──▶ unbounded mpsc ──▶ drain task
//!                    (never blocks, never fails          (sole consumer)
//!                     the request path)
//! ```
//!
//! The queue is a single shared append/drain structure: producers (request
//! completions) only append, the drain task is the sole consumer.

use crate::catalogue::CounterDefinition;
use crate::values::CounterValue;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// A queued change awaiting propagation to the durable mirror.
///
/// Owned exclusively by the replication engine once enqueued; consumed and
/// discarded after the mirror acknowledges the apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReplicationRecord {
    /// Catalogue upsert or rename: the definition's current state.
    Definition(CounterDefinition),
    /// Value mutation (increment, reset, or lazy materialization).
    Value(CounterValue),
}

/// Coalescing key: records with the same key target the same mirror row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Definition(i64),
    Value { counter_id: i64, user_id: i64 },
}

impl ReplicationRecord {
    /// The mirror row this record targets.
    pub fn key(&self) -> RecordKey {
        match self {
            Self::Definition(def) => RecordKey::Definition(def.id),
            Self::Value(v) => RecordKey::Value {
                counter_id: v.counter_id,
                user_id: v.user_id,
            },
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Definition(_) => "definition",
            Self::Value(_) => "value",
        }
    }
}

/// A record abandoned after the retry budget was exhausted.
///
/// Surfaced on the engine's dead-letter channel (the operational error
/// channel), never to the original caller, since that request already committed
/// against the authoritative store.
#[derive(Debug, Clone)]
pub struct AbandonedRecord {
    pub record: ReplicationRecord,
    pub attempts: usize,
    pub last_error: String,
}

/// Producer-side handle for the replication queue.
///
/// Cloneable and cheap; each store holds one. Enqueueing never blocks and
/// never fails the request path. If the drain task is gone (engine stopped
/// or replication disabled), the record is dropped with a debug log.
#[derive(Clone)]
pub struct ReplicationSender {
    tx: mpsc::UnboundedSender<ReplicationRecord>,
}

impl ReplicationSender {
    /// Create a sender/receiver pair for the queue.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ReplicationRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Create a sender with no consumer (replication disabled).
    pub fn disconnected() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    /// Append a record to the queue.
    pub fn enqueue(&self, record: ReplicationRecord) {
        crate::metrics::record_enqueued(record.kind());
        if self.tx.send(record).is_err() {
            // Drain task not running; the mirror will not see this change.
            debug!("Replication queue closed, dropping record");
        }
    }

    /// Whether the drain side of the queue is still attached.
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}
