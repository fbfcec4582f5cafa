//! Record batch for mirror replication.
//!
//! Collects queued records with per-key coalescing (latest wins) before the
//! drain task flushes them to the mirror.
//!
//! # Design
//!
//! ```text
//! ReplicationRecords ──┬──▶ RecordBatch ──▶ flush threshold (time/count)
//!                      │
//!                      │ HashMap<RecordKey, record>
//!                      │ (latest wins)
//!                      ▼
//!            drain task applies each record via MirrorStore
//! ```
//!
//! Records carry full post-commit state, so keeping only the newest record
//! per key is equivalent to applying every intermediate state in order;
//! the mirror converges to the same row either way. Cross-key ordering
//! follows first-enqueue order, which is stable enough because keys are
//! independent mirror rows.

use crate::replication::{RecordKey, ReplicationRecord};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Configuration for batch accumulation.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Maximum records before forcing a flush.
    pub max_batch_size: usize,
    /// Maximum time to wait before flushing.
    pub max_batch_delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_batch_delay: Duration::from_millis(50),
        }
    }
}

impl BatchConfig {
    /// Fast flush for testing.
    pub fn testing() -> Self {
        Self {
            max_batch_size: 10,
            max_batch_delay: Duration::from_millis(5),
        }
    }
}

/// Accumulates replication records with per-key latest-wins coalescing.
pub struct RecordBatch {
    /// Pending records keyed by mirror row (latest wins).
    pending: HashMap<RecordKey, ReplicationRecord>,
    /// Keys in first-enqueue order, so `take()` is deterministic.
    order: Vec<RecordKey>,
    /// When the current batch started accumulating.
    batch_start: Option<Instant>,
    /// Records replaced by a newer state for the same key.
    coalesced: usize,
    config: BatchConfig,
}

impl RecordBatch {
    /// Create an empty batch.
    pub fn new(config: BatchConfig) -> Self {
        Self {
            pending: HashMap::new(),
            order: Vec::new(),
            batch_start: None,
            coalesced: 0,
            config,
        }
    }

    /// Add a record to the batch.
    ///
    /// If the same key has a pending record, the new one replaces it
    /// (latest wins).
    pub fn add(&mut self, record: ReplicationRecord) {
        // Start batch timer on first record
        if self.batch_start.is_none() {
            self.batch_start = Some(Instant::now());
        }

        let key = record.key();
        if self.pending.insert(key.clone(), record).is_some() {
            self.coalesced += 1;
        } else {
            self.order.push(key);
        }
    }

    /// Check if the batch should be flushed.
    pub fn should_flush(&self) -> bool {
        // Size threshold
        if self.pending.len() >= self.config.max_batch_size {
            return true;
        }

        // Time threshold
        if let Some(start) = self.batch_start {
            if start.elapsed() >= self.config.max_batch_delay {
                return true;
            }
        }

        false
    }

    /// Time remaining until the delay threshold forces a flush.
    ///
    /// `None` when the batch is empty (nothing to wait for).
    pub fn time_until_flush(&self) -> Option<Duration> {
        let start = self.batch_start?;
        Some(
            self.config
                .max_batch_delay
                .saturating_sub(start.elapsed()),
        )
    }

    /// Take all pending records in first-enqueue key order, resetting the
    /// batch. Returns the records plus how many were coalesced away.
    pub fn take(&mut self) -> (Vec<ReplicationRecord>, usize) {
        let mut pending = std::mem::take(&mut self.pending);
        let order = std::mem::take(&mut self.order);
        let coalesced = std::mem::replace(&mut self.coalesced, 0);
        self.batch_start = None;

        let records = order
            .into_iter()
            .filter_map(|key| pending.remove(&key))
            .collect();
        (records, coalesced)
    }

    /// Number of pending records (after coalescing).
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if batch is empty.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
