// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Counter value store: authoritative `(counter_id, user_id)` → value map.
//!
//! Rows spring into existence lazily: the first `get`, `increment`, or
//! `reset` touching a pair materializes it at the definition's
//! `default_value`. There is no explicit create operation and rows are never
//! deleted.
//!
//! # Consistency
//!
//! All mutations (and lazy materialization) take the store write lock, so
//! increments and resets on the same pair are linearizable: N concurrent
//! increments of deltas d1..dN always land on `default_value + Σdi`, and a
//! reset racing an increment resolves to one of the two valid
//! serializations. Counter id validity is checked against the catalogue
//! before any row is touched.
//!
//! # Replication
//!
//! Every mutation enqueues the row's full post-commit state while holding
//! the store lock, so the mirror queue observes states in commit order.

use crate::catalogue::CatalogueStore;
use crate::error::{CounterError, Result};
use crate::replication::{ReplicationRecord, ReplicationSender};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Current count for one `(counter_id, user_id)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterValue {
    pub counter_id: i64,
    pub user_id: i64,
    pub value: i64,
    /// Timestamp of the last mutation, used for ordering and staleness checks.
    pub updated_at: DateTime<Utc>,
}

/// The authoritative per-user counter value store.
pub struct CounterValueStore {
    catalogue: Arc<CatalogueStore>,
    rows: RwLock<HashMap<(i64, i64), CounterValue>>,
    replication: ReplicationSender,
}

impl CounterValueStore {
    /// Create an empty value store backed by `catalogue` for id validation
    /// and default seeding.
    pub fn new(catalogue: Arc<CatalogueStore>, replication: ReplicationSender) -> Self {
        Self {
            catalogue,
            rows: RwLock::new(HashMap::new()),
            replication,
        }
    }

    /// Resolve the definition backing `counter_id`, or `NotFound`.
    async fn default_for(&self, counter_id: i64) -> Result<i64> {
        Ok(self.catalogue.definition(counter_id).await?.default_value)
    }

    /// Current value for the pair, materializing the row at the counter's
    /// `default_value` if absent.
    ///
    /// Never returns `NotFound` for a valid `counter_id`, only id validity
    /// is checked.
    pub async fn get(&self, counter_id: i64, user_id: i64) -> Result<i64> {
        let default_value = self.default_for(counter_id).await?;

        // Fast path: row already materialized.
        if let Some(row) = self.rows.read().await.get(&(counter_id, user_id)) {
            return Ok(row.value);
        }

        let mut rows = self.rows.write().await;
        // Re-check under the write lock: another task may have won the race.
        if let Some(row) = rows.get(&(counter_id, user_id)) {
            return Ok(row.value);
        }

        let row = CounterValue {
            counter_id,
            user_id,
            value: default_value,
            updated_at: Utc::now(),
        };
        rows.insert((counter_id, user_id), row.clone());
        crate::metrics::set_value_rows(rows.len());
        // The row now exists on the primary, so the mirror must learn it.
        self.replication.enqueue(ReplicationRecord::Value(row));

        debug!(counter_id, user_id, default_value, "Materialized counter row");
        Ok(default_value)
    }

    /// Atomically add `delta` (may be negative) to the pair's value, seeding
    /// from `default_value` if the row is new. Returns the post-increment
    /// value.
    ///
    /// Overflow is an `InvalidArgument` and leaves the store unchanged.
    pub async fn increment(&self, counter_id: i64, user_id: i64, delta: i64) -> Result<i64> {
        let default_value = self.default_for(counter_id).await?;
        let now = Utc::now();

        let mut rows = self.rows.write().await;
        let current = rows
            .get(&(counter_id, user_id))
            .map(|row| row.value)
            .unwrap_or(default_value);

        let new_value = current.checked_add(delta).ok_or_else(|| {
            CounterError::InvalidArgument(format!(
                "increment overflows: {current} + {delta}"
            ))
        })?;

        let row = CounterValue {
            counter_id,
            user_id,
            value: new_value,
            updated_at: now,
        };
        rows.insert((counter_id, user_id), row.clone());
        crate::metrics::set_value_rows(rows.len());
        self.replication.enqueue(ReplicationRecord::Value(row));

        Ok(new_value)
    }

    /// Unconditionally set the pair's value to 0 and return 0.
    ///
    /// Serialized with concurrent increments through the store write lock;
    /// a racing increment lands either entirely before or entirely after.
    pub async fn reset(&self, counter_id: i64, user_id: i64) -> Result<i64> {
        // Validity check only; the reset outcome ignores default_value.
        self.default_for(counter_id).await?;

        let mut rows = self.rows.write().await;
        let row = CounterValue {
            counter_id,
            user_id,
            value: 0,
            updated_at: Utc::now(),
        };
        rows.insert((counter_id, user_id), row.clone());
        crate::metrics::set_value_rows(rows.len());
        self.replication.enqueue(ReplicationRecord::Value(row));

        debug!(counter_id, user_id, "Counter reset");
        Ok(0)
    }

    /// Snapshot of `(counter_id, value)` pairs for one user, ordered by
    /// counter id. The service layer streams this snapshot item by item.
    pub async fn list(&self, user_id: i64) -> Vec<(i64, i64)> {
        let rows = self.rows.read().await;
        let mut values: Vec<(i64, i64)> = rows
            .values()
            .filter(|row| row.user_id == user_id)
            .map(|row| (row.counter_id, row.value))
            .collect();
        values.sort_by_key(|&(counter_id, _)| counter_id);
        values
    }

    /// Number of materialized rows (for diagnostics).
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Check if no rows have been materialized yet.
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}
