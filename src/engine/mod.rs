// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Counter engine: lifecycle orchestrator for the named-count core.
//!
//! The engine ties together:
//! - The authoritative stores ([`CatalogueStore`], [`CounterValueStore`])
//! - The replication queue and its drain task
//! - The durable mirror via [`MirrorStore`]
//!
//! # Architecture
//!
//! The engine manages the full service lifecycle:
//! 1. Builds the stores wired to the replication queue
//! 2. `start()` spawns the drain task (sole queue consumer)
//! 3. Serves requests through the stores (via the service layer)
//! 4. Handles graceful shutdown with backlog draining
//!
//! The engine never writes to the mirror from the request path; committed
//! mutations flow through the queue, and the drain task is the only mirror
//! writer.

mod drain;
mod types;

pub use types::{EngineState, HealthCheck};

use crate::batch::BatchConfig;
use crate::catalogue::CatalogueStore;
use crate::circuit_breaker::{CircuitConfig, MirrorCircuit};
use crate::config::NamedCountConfig;
use crate::error::{CounterError, Result};
use crate::mirror::{MirrorStore, NoOpMirror};
use crate::replication::{AbandonedRecord, ReplicationRecord, ReplicationSender};
use crate::values::CounterValueStore;
use crate::metrics;
use drain::DrainContext;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, info, warn};

/// The main counter engine.
///
/// Owns the authoritative stores and the replication pipeline. The mirror
/// implementation is generic so tests can substitute a recording mock and
/// standalone deployments can run with [`NoOpMirror`].
pub struct NamedCountEngine<M: MirrorStore = NoOpMirror> {
    /// Configuration (fixed for the engine's lifetime)
    config: NamedCountConfig,

    /// Authoritative catalogue store
    catalogue: Arc<CatalogueStore>,

    /// Authoritative value store
    values: Arc<CounterValueStore>,

    /// Durable mirror (drain task is the sole writer)
    mirror: Arc<M>,

    /// Circuit breaker for mirror protection
    circuit: Arc<MirrorCircuit>,

    /// Producer handle kept for health checks
    replication: ReplicationSender,

    /// Queue receiver, taken by `start()`
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<ReplicationRecord>>>,

    /// Engine state (broadcast to watchers)
    state_tx: watch::Sender<EngineState>,

    /// Engine state receiver (for internal use)
    state_rx: watch::Receiver<EngineState>,

    /// Shutdown signal sender
    shutdown_tx: watch::Sender<bool>,

    /// Shutdown signal receiver
    shutdown_rx: watch::Receiver<bool>,

    /// Dead-letter channel: records abandoned after the retry budget
    dead_letter_rx: Mutex<mpsc::UnboundedReceiver<AbandonedRecord>>,
    dead_letter_tx: mpsc::UnboundedSender<AbandonedRecord>,

    /// Drain task handle
    drain_handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
}

impl NamedCountEngine<NoOpMirror> {
    /// Create an engine with a no-op mirror (for testing/standalone).
    ///
    /// The engine starts in `Created` state. Call [`start()`](Self::start)
    /// to begin draining the replication queue.
    pub fn new(config: NamedCountConfig) -> Self {
        Self::with_mirror(config, Arc::new(NoOpMirror))
    }
}

impl<M: MirrorStore> NamedCountEngine<M> {
    /// Create an engine with a mirror implementation.
    ///
    /// This is the primary constructor used by the daemon, normally with a
    /// [`PostgresMirror`](crate::postgres::PostgresMirror).
    pub fn with_mirror(config: NamedCountConfig, mirror: Arc<M>) -> Self {
        let (state_tx, state_rx) = watch::channel(EngineState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (dead_letter_tx, dead_letter_rx) = mpsc::unbounded_channel();

        let (replication, queue_rx) = if config.replication.enabled {
            let (sender, rx) = ReplicationSender::channel();
            (sender, Some(rx))
        } else {
            (ReplicationSender::disconnected(), None)
        };

        let catalogue = Arc::new(CatalogueStore::new(replication.clone()));
        let values = Arc::new(CounterValueStore::new(
            Arc::clone(&catalogue),
            replication.clone(),
        ));

        let circuit = Arc::new(MirrorCircuit::with_config(CircuitConfig::from_settings(
            config.replication.circuit_failure_threshold,
            config.replication.circuit_recovery_sec,
        )));

        Self {
            config,
            catalogue,
            values,
            mirror,
            circuit,
            replication,
            queue_rx: Mutex::new(queue_rx),
            state_tx,
            state_rx,
            shutdown_tx,
            shutdown_rx,
            dead_letter_rx: Mutex::new(dead_letter_rx),
            dead_letter_tx,
            drain_handle: RwLock::new(None),
        }
    }

    /// Get the authoritative catalogue store.
    pub fn catalogue(&self) -> &Arc<CatalogueStore> {
        &self.catalogue
    }

    /// Get the authoritative value store.
    pub fn values(&self) -> &Arc<CounterValueStore> {
        &self.values
    }

    /// Get a reference to the mirror.
    pub fn mirror(&self) -> &Arc<M> {
        &self.mirror
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &NamedCountConfig {
        &self.config
    }

    /// Get current engine state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Check if engine is running.
    pub fn is_running(&self) -> bool {
        matches!(self.state(), EngineState::Running)
    }

    /// The configured propagation bound: how long a committed mutation may
    /// take to reach the mirror under normal operation. Tests poll against
    /// this instead of sleeping.
    pub fn propagation_bound(&self) -> std::time::Duration {
        self.config.replication.propagation_bound_duration()
    }

    /// Collect records abandoned by the drain task since the last call.
    ///
    /// This is the operational error channel: the original requests already
    /// committed, so these only matter to operators reconciling the mirror.
    pub async fn take_dead_letters(&self) -> Vec<AbandonedRecord> {
        let mut rx = self.dead_letter_rx.lock().await;
        let mut letters = Vec::new();
        while let Ok(letter) = rx.try_recv() {
            letters.push(letter);
        }
        letters
    }

    /// Get comprehensive health status for monitoring endpoints.
    ///
    /// **Performance**: no mirror I/O; all data comes from cached internal
    /// state (watch channels, store sizes, circuit metrics).
    pub async fn health_check(&self) -> HealthCheck {
        let state = self.state();
        let queue_connected = self.replication.is_connected();
        let mirror_circuit_open = self.circuit.is_open();
        let dead_letters_pending = self.dead_letter_rx.lock().await.len();

        let ready = state == EngineState::Running;
        let healthy = ready
            && !mirror_circuit_open
            && (queue_connected || !self.config.replication.enabled);

        HealthCheck {
            state,
            ready,
            healthy,
            catalogue_definitions: self.catalogue.len().await,
            value_rows: self.values.len().await,
            queue_connected,
            mirror_circuit_open,
            dead_letters_pending,
        }
    }

    /// Start the engine.
    ///
    /// Spawns the replication drain task (if replication is enabled) and
    /// transitions to `Running`.
    pub async fn start(&self) -> Result<()> {
        if self.state() != EngineState::Created {
            return Err(CounterError::InvalidState {
                expected: "Created".to_string(),
                actual: format!("{:?}", self.state()),
            });
        }

        info!(
            instance_id = %self.config.instance_id,
            replication_enabled = self.config.replication.enabled,
            "Starting named-count engine"
        );

        if let Some(queue_rx) = self.queue_rx.lock().await.take() {
            let ctx = DrainContext {
                mirror: Arc::clone(&self.mirror),
                circuit: Arc::clone(&self.circuit),
                retry: self.config.replication.retry_config(),
                batch_config: BatchConfig {
                    max_batch_size: self.config.replication.max_batch_size,
                    max_batch_delay: self.config.replication.max_batch_delay_duration(),
                },
                dead_letter_tx: self.dead_letter_tx.clone(),
            };
            let shutdown_rx = self.shutdown_rx.clone();

            let handle = tokio::spawn(async move {
                drain::run_drain(queue_rx, ctx, shutdown_rx).await;
            });
            *self.drain_handle.write().await = Some(handle);
            debug!("Spawned replication drain task");
        } else if self.config.replication.enabled {
            warn!("Replication enabled but queue already taken; running without drain task");
        }

        let _ = self.state_tx.send(EngineState::Running);
        metrics::set_engine_state("Running");
        info!("Named-count engine running");
        Ok(())
    }

    /// Shutdown the engine gracefully.
    ///
    /// Shutdown sequence:
    /// 1. Signal the drain task to stop
    /// 2. Wait for it to flush the queued backlog (with timeout)
    /// 3. Transition to `Stopped`
    pub async fn shutdown(&self) {
        info!("Shutting down named-count engine");
        let _ = self.state_tx.send(EngineState::ShuttingDown);
        metrics::set_engine_state("ShuttingDown");

        // Signal shutdown to the drain task
        let _ = self.shutdown_tx.send(true);

        let handle = self.drain_handle.write().await.take();
        if let Some(handle) = handle {
            // Give the drain task time to flush its backlog
            let drain_timeout = std::time::Duration::from_secs(10);
            match tokio::time::timeout(drain_timeout, handle).await {
                Ok(Ok(())) => debug!("Drain task completed gracefully"),
                Ok(Err(e)) => warn!(error = %e, "Drain task panicked during shutdown"),
                Err(_) => warn!("Drain task timed out during shutdown (backlog may be lost)"),
            }
        }

        let _ = self.state_tx.send(EngineState::Stopped);
        metrics::set_engine_state("Stopped");
        info!("Named-count engine stopped");
    }
}
