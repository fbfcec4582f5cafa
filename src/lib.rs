// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Named Count
//!
//! Core engine for the named-count service: a catalogue mapping
//! human-readable counter names to stable identifiers, per-user counter
//! values with atomic increment/get/reset, and asynchronous replication of
//! committed state to a durable Postgres mirror.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            named-count                                  │
//! │                                                                         │
//! │  ┌────────────┐   ┌─────────────────┐   ┌──────────────────────────┐    │
//! │  │   Router   │──►│ CatalogueStore  │──►│ ReplicationSender (mpsc) │    │
//! │  │ (validate, │   │ CounterValue-   │   └────────────┬─────────────┘    │
//! │  │  envelope) │   │ Store           │                ▼                  │
//! │  └────────────┘   └─────────────────┘   ┌──────────────────────────┐    │
//! │                                         │ Drain task: coalesce,    │    │
//! │                                         │ circuit breaker, retry   │    │
//! │                                         └────────────┬─────────────┘    │
//! │                                                      ▼                  │
//! │                                         ┌──────────────────────────┐    │
//! │                                         │ MirrorStore (Postgres)   │    │
//! │                                         └──────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Synchronous requests touch only the in-memory stores; mirror I/O lives
//! entirely on the background drain task, which guarantees bounded-delay
//! eventual propagation and contains every mirror failure.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use named_count::{NamedCountEngine, Router, CounterRef};
//! use named_count::config::NamedCountConfig;
//! use named_count::service::{CatalogueService, CountService};
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = NamedCountEngine::new(NamedCountConfig::default());
//!     engine.start().await.expect("Failed to start");
//!
//!     let router = Router::for_engine(&engine);
//!     let put = router.put("requests_counter", "HTTP request counter", 0).await;
//!     let id = put.value.unwrap().id;
//!     let reply = router.increment(CounterRef::Id(id), 123, 5).await;
//!     assert_eq!(reply.value.unwrap().value, 5);
//!
//!     engine.shutdown().await;
//! }
//! ```

pub mod batch;
pub mod catalogue;
pub mod circuit_breaker;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod mirror;
pub mod postgres;
pub mod replication;
pub mod resilience;
pub mod service;
pub mod values;

// Re-exports for convenience
pub use catalogue::{CatalogueFilter, CatalogueStore, CounterDefinition};
pub use circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError, MirrorCircuit};
pub use config::{MirrorConfig, NamedCountConfig, ReplicationSettings, ValidationConfig};
pub use engine::{EngineState, HealthCheck, NamedCountEngine};
pub use error::{CounterError, ErrorCode, Result};
pub use mirror::{MirrorError, MirrorStore, NoOpMirror};
pub use postgres::PostgresMirror;
pub use replication::{AbandonedRecord, ReplicationRecord, ReplicationSender};
pub use service::{CatalogueService, CountService, CounterRef, Reply, ReplyStatus, Router};
pub use values::{CounterValue, CounterValueStore};
