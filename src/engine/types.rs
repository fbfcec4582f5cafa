//! Engine state types.
//!
//! Defines the state machine for the counter engine lifecycle.
//!
//! # State Transitions
//!
//! ```text
//!                  start()
//! Created ───────────────────→ Running
//!    │                            │
//!    │ (never started)            │ shutdown()
//!    ↓                            ↓
//! Stopped ←──────────────── ShuttingDown
//!
//! (start() from any state other than Created → Failed is never entered;
//!  Failed is reserved for an unrecoverable drain-task loss.)
//! ```
//!
//! # State Descriptions
//!
//! - **Created**: Initial state after construction. Stores accept requests,
//!   but nothing drains the replication queue yet.
//! - **Running**: Normal operation. The drain task is flushing records to
//!   the mirror.
//! - **ShuttingDown**: `shutdown()` called. The drain task is flushing its
//!   pending batch and the already-queued records.
//! - **Stopped**: Graceful shutdown complete. Safe to drop.
//! - **Failed**: Unrecoverable error. Engine cannot continue.

/// State of the counter engine.
///
/// See module docs for the state transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Engine created but not started.
    ///
    /// Call [`start()`](super::NamedCountEngine::start) to begin draining
    /// the replication queue.
    Created,

    /// Running: stores serve requests, drain task mirrors mutations.
    Running,

    /// Shutting down gracefully.
    ///
    /// Queued records are being flushed to the mirror.
    /// Transitions to `Stopped` when complete.
    ShuttingDown,

    /// Stopped.
    ///
    /// Engine has shut down cleanly. Safe to drop.
    Stopped,

    /// Failed to start or unrecoverable error.
    ///
    /// Check logs for error details. Engine cannot recover from this state.
    Failed,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Created => write!(f, "Created"),
            EngineState::Running => write!(f, "Running"),
            EngineState::ShuttingDown => write!(f, "ShuttingDown"),
            EngineState::Stopped => write!(f, "Stopped"),
            EngineState::Failed => write!(f, "Failed"),
        }
    }
}

/// Point-in-time health snapshot for monitoring endpoints.
///
/// Collected from cached internal state, with no mirror I/O.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Current engine state.
    pub state: EngineState,
    /// Engine is running and able to serve requests.
    pub ready: bool,
    /// Ready, replication queue attached, and mirror circuit closed.
    pub healthy: bool,
    /// Live catalogue definitions.
    pub catalogue_definitions: usize,
    /// Materialized counter value rows.
    pub value_rows: usize,
    /// Whether the drain task is attached to the queue.
    pub queue_connected: bool,
    /// Whether the mirror circuit is currently open.
    pub mirror_circuit_open: bool,
    /// Records abandoned after the retry budget, not yet collected.
    pub dead_letters_pending: usize,
}
