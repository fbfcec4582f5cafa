//! Drain task: applies queued replication records to the durable mirror.
//!
//! The engine spawns one drain task, the sole consumer of the replication
//! queue. The task:
//! 1. Receives records from the queue
//! 2. Coalesces them per key (latest wins) in a [`RecordBatch`]
//! 3. Flushes on size/delay thresholds through the mirror circuit breaker
//! 4. Retries failed applies on the [`RetryConfig`] schedule
//! 5. Abandons a record to the dead-letter channel once the budget is spent
//!
//! # Graceful Shutdown
//!
//! When a shutdown signal is received:
//! 1. The task stops waiting for new records immediately (via tokio::select!)
//! 2. Records already sitting in the queue are pulled in without waiting
//! 3. The pending batch is flushed through the circuit breaker
//! 4. Confirmation is logged before the task exits
//!
//! # Circuit Breaker Protection
//!
//! All applies pass through a shared circuit breaker. When the circuit opens
//! (too many consecutive failures), a rejection counts against the record's
//! retry budget like any failed attempt, so an extended mirror outage
//! eventually dead-letters the backlog instead of spinning forever.

use crate::batch::{BatchConfig, RecordBatch};
use crate::circuit_breaker::{CircuitError, MirrorCircuit};
use crate::metrics;
use crate::mirror::{MirrorError, MirrorStore};
use crate::replication::{AbandonedRecord, ReplicationRecord};
use crate::resilience::RetryConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Everything the drain task needs, bundled to keep the spawn site tidy.
pub(crate) struct DrainContext<M: MirrorStore> {
    pub mirror: Arc<M>,
    pub circuit: Arc<MirrorCircuit>,
    pub retry: RetryConfig,
    pub batch_config: BatchConfig,
    pub dead_letter_tx: mpsc::UnboundedSender<AbandonedRecord>,
}

/// Outcome of flushing one batch.
#[derive(Debug, Default)]
struct FlushOutcome {
    applied: usize,
    abandoned: usize,
}

/// Run the drain loop until shutdown is signaled and the backlog is flushed.
pub(crate) async fn run_drain<M: MirrorStore>(
    mut rx: mpsc::UnboundedReceiver<ReplicationRecord>,
    ctx: DrainContext<M>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("Starting replication drain task");

    let mut batch = RecordBatch::new(ctx.batch_config.clone());

    loop {
        metrics::set_queue_depth(rx.len() + batch.len());

        if batch.is_empty() {
            // Nothing pending: wait for the next record or shutdown.
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(record) => batch.add(record),
                    None => {
                        // All producers dropped; nothing more will arrive.
                        debug!("Replication queue closed");
                        break;
                    }
                },
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
            continue;
        }

        // Batch open: accumulate until a flush threshold fires.
        let wait = batch.time_until_flush().unwrap_or(Duration::ZERO);
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(record) => {
                    batch.add(record);
                    if batch.should_flush() {
                        flush_batch(&mut batch, &ctx).await;
                    }
                }
                None => {
                    flush_batch(&mut batch, &ctx).await;
                    break;
                }
            },
            _ = tokio::time::sleep(wait) => {
                flush_batch(&mut batch, &ctx).await;
            },
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    // Shutdown: pull in whatever is already queued, then flush once more.
    while let Ok(record) = rx.try_recv() {
        batch.add(record);
    }
    if !batch.is_empty() {
        info!(pending = batch.len(), "Flushing replication backlog on shutdown");
        flush_batch(&mut batch, &ctx).await;
    }

    metrics::set_queue_depth(0);
    info!("Replication drain task stopped");
}

/// Flush the batch: apply every record, retrying each on the configured
/// schedule before abandoning it.
async fn flush_batch<M: MirrorStore>(batch: &mut RecordBatch, ctx: &DrainContext<M>) {
    let (records, coalesced) = batch.take();
    if records.is_empty() {
        return;
    }

    let total = records.len();
    let flush_start = Instant::now();
    debug!(batch_size = total, coalesced, "Flushing batch to mirror");

    let mut outcome = FlushOutcome::default();
    for record in records {
        match apply_with_retry(&record, ctx).await {
            Ok(()) => outcome.applied += 1,
            Err((attempts, last_error)) => {
                outcome.abandoned += 1;
                abandon(record, attempts, last_error, ctx);
            }
        }
    }

    metrics::record_batch_flush(
        coalesced,
        outcome.applied,
        outcome.abandoned,
        flush_start.elapsed(),
    );

    if outcome.abandoned > 0 {
        warn!(
            applied = outcome.applied,
            abandoned = outcome.abandoned,
            "Batch flushed with abandoned records"
        );
    } else {
        debug!(applied = outcome.applied, "Batch flushed");
    }
}

/// Apply one record through the circuit breaker, retrying on the schedule.
///
/// Returns `Err((attempts, last_error))` once the budget is exhausted.
async fn apply_with_retry<M: MirrorStore>(
    record: &ReplicationRecord,
    ctx: &DrainContext<M>,
) -> Result<(), (usize, String)> {
    let kind = record.kind();
    let mut attempts = 0;
    let mut last_error;

    loop {
        attempts += 1;
        let apply_start = Instant::now();
        let result = ctx
            .circuit
            .applies
            .call(|| apply_record(&*ctx.mirror, record))
            .await;

        match result {
            Ok(()) => {
                metrics::record_mirror_apply(kind, true, apply_start.elapsed());
                return Ok(());
            }
            Err(CircuitError::Rejected) => {
                last_error = "mirror circuit open".to_string();
            }
            Err(CircuitError::Inner(e)) => {
                metrics::record_mirror_apply(kind, false, apply_start.elapsed());
                last_error = e.to_string();
            }
        }

        if !ctx.retry.allows_attempt(attempts) {
            return Err((attempts, last_error));
        }

        let delay = ctx.retry.delay_for_attempt(attempts);
        metrics::record_mirror_retry(kind);
        debug!(
            kind,
            attempts,
            delay_ms = delay.as_millis() as u64,
            error = %last_error,
            "Mirror apply failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Dispatch a record to the matching mirror upsert.
async fn apply_record<M: MirrorStore>(
    mirror: &M,
    record: &ReplicationRecord,
) -> Result<(), MirrorError> {
    match record {
        ReplicationRecord::Definition(def) => mirror.upsert_definition(def.clone()).await,
        ReplicationRecord::Value(row) => mirror.upsert_value(row.clone()).await,
    }
}

/// Report an abandoned record to the operational channel.
fn abandon<M: MirrorStore>(
    record: ReplicationRecord,
    attempts: usize,
    last_error: String,
    ctx: &DrainContext<M>,
) {
    error!(
        kind = record.kind(),
        attempts,
        error = %last_error,
        "Abandoning replication record after retry budget"
    );
    metrics::record_abandoned(record.kind());

    let abandoned = AbandonedRecord {
        record,
        attempts,
        last_error,
    };
    if ctx.dead_letter_tx.send(abandoned).is_err() {
        // Engine dropped its receiver; the error log above is the only trace.
        warn!("Dead-letter channel closed");
    }
}
