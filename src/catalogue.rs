// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Catalogue store: the authoritative name → counter definition mapping.
//!
//! The catalogue is the single writer of counter definitions. All access
//! goes through its contract; nothing else touches the underlying maps.
//!
//! # Upsert Semantics
//!
//! `put()` is an atomic upsert keyed on name: exactly one caller wins a
//! creation race for a given name, and every concurrent caller observes the
//! same resulting id. Existing names only refresh `description` and
//! `updated_at`; `default_value` is settable at creation time and frozen
//! afterwards. Ids are never reused and never change for the lifetime of a
//! definition; `update()` renames in place and preserves the id.
//!
//! Definitions are never physically deleted.
//!
//! # Replication
//!
//! Every successful mutation enqueues the definition's full post-commit
//! state for the durable mirror, while still holding the store lock so the
//! queue observes mutations in commit order.

use crate::error::{CounterError, Result};
use crate::replication::{ReplicationRecord, ReplicationSender};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// One named counter definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterDefinition {
    /// Stable identifier, immutable once assigned.
    pub id: i64,
    /// Unique human-readable name. Renames preserve `id`.
    pub name: String,
    /// Free-text description, mutable.
    pub description: String,
    /// Seed value applied when a `(counter, user)` pair is first observed.
    /// Settable at creation only.
    pub default_value: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Filter for catalogue listings.
///
/// An empty filter matches every live definition. A name filter matches at
/// most one definition (names are unique).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogueFilter {
    pub name: Option<String>,
}

impl CatalogueFilter {
    /// Filter by exact name.
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }

    fn matches(&self, def: &CounterDefinition) -> bool {
        match &self.name {
            Some(name) => def.name == *name,
            None => true,
        }
    }
}

struct CatalogueInner {
    /// name → id index. Invariant: every entry points at a definition in
    /// `by_id` whose `name` field equals the key.
    by_name: HashMap<String, i64>,
    /// id → definition, the authoritative rows.
    by_id: HashMap<i64, CounterDefinition>,
    /// Next id to allocate. Monotonic; guarded by the store lock.
    next_id: i64,
}

/// The authoritative catalogue store.
pub struct CatalogueStore {
    inner: RwLock<CatalogueInner>,
    replication: ReplicationSender,
}

impl CatalogueStore {
    /// Create an empty catalogue. Mutations are replicated through `replication`.
    pub fn new(replication: ReplicationSender) -> Self {
        Self {
            inner: RwLock::new(CatalogueInner {
                by_name: HashMap::new(),
                by_id: HashMap::new(),
                next_id: 1,
            }),
            replication,
        }
    }

    /// Atomic upsert by name.
    ///
    /// Returns `(id, created)`. If the name exists, refreshes `description`
    /// and `updated_at` in place and returns the existing id with
    /// `created = false`. Uniqueness violations cannot surface here: the
    /// store lock serializes concurrent `put` calls on the same name.
    pub async fn put(
        &self,
        name: &str,
        description: &str,
        default_value: i64,
    ) -> Result<(i64, bool)> {
        let mut inner = self.inner.write().await;
        let now = Utc::now();

        if let Some(&id) = inner.by_name.get(name) {
            let def = inner
                .by_id
                .get_mut(&id)
                .ok_or_else(|| CounterError::Internal(format!("dangling name index for {name:?}")))?;
            def.description = description.to_string();
            def.updated_at = now;
            let snapshot = def.clone();
            // Enqueue before releasing the lock: the queue must observe
            // mutations in commit order.
            self.replication.enqueue(ReplicationRecord::Definition(snapshot));
            debug!(name = %name, id, "Catalogue entry refreshed");
            return Ok((id, false));
        }

        let id = inner.next_id;
        inner.next_id += 1;

        let def = CounterDefinition {
            id,
            name: name.to_string(),
            description: description.to_string(),
            default_value,
            created_at: now,
            updated_at: now,
        };
        inner.by_name.insert(name.to_string(), id);
        inner.by_id.insert(id, def.clone());
        crate::metrics::set_catalogue_size(inner.by_id.len());
        self.replication.enqueue(ReplicationRecord::Definition(def));

        info!(name = %name, id, default_value, "Catalogue entry created");
        Ok((id, true))
    }

    /// Rename a definition in place, optionally updating the description.
    ///
    /// The id stays fixed. Fails with `NotFound` for an unknown id and
    /// `NameConflict` when `new_name` belongs to a different live definition.
    /// Renaming a definition to its current name is a no-op rename (the
    /// description update still applies).
    pub async fn update(
        &self,
        id: i64,
        new_name: &str,
        new_description: Option<&str>,
    ) -> Result<CounterDefinition> {
        let mut guard = self.inner.write().await;
        let inner = &mut *guard;

        let Some(def) = inner.by_id.get_mut(&id) else {
            return Err(CounterError::NotFound(format!("counter id {id}")));
        };
        if let Some(&existing_id) = inner.by_name.get(new_name) {
            if existing_id != id {
                return Err(CounterError::NameConflict {
                    name: new_name.to_string(),
                    existing_id,
                });
            }
        }

        let old_name = std::mem::replace(&mut def.name, new_name.to_string());
        if let Some(desc) = new_description {
            def.description = desc.to_string();
        }
        def.updated_at = Utc::now();
        let snapshot = def.clone();

        inner.by_name.remove(&old_name);
        inner.by_name.insert(new_name.to_string(), id);
        self.replication
            .enqueue(ReplicationRecord::Definition(snapshot.clone()));
        drop(guard);

        info!(id, old_name = %old_name, new_name = %new_name, "Catalogue entry renamed");
        Ok(snapshot)
    }

    /// Resolve a name to its id.
    pub async fn resolve_id(&self, name: &str) -> Result<i64> {
        self.inner
            .read()
            .await
            .by_name
            .get(name)
            .copied()
            .ok_or_else(|| CounterError::NotFound(format!("counter {name:?}")))
    }

    /// Fetch a definition by name.
    pub async fn get(&self, name: &str) -> Result<CounterDefinition> {
        let inner = self.inner.read().await;
        inner
            .by_name
            .get(name)
            .and_then(|id| inner.by_id.get(id))
            .cloned()
            .ok_or_else(|| CounterError::NotFound(format!("counter {name:?}")))
    }

    /// Fetch a definition by id.
    pub async fn definition(&self, id: i64) -> Result<CounterDefinition> {
        self.inner
            .read()
            .await
            .by_id
            .get(&id)
            .cloned()
            .ok_or_else(|| CounterError::NotFound(format!("counter id {id}")))
    }

    /// Check whether an id refers to a live definition.
    pub async fn contains_id(&self, id: i64) -> bool {
        self.inner.read().await.by_id.contains_key(&id)
    }

    /// Snapshot of definitions matching `filter`, ordered by id.
    ///
    /// The service layer streams this snapshot item by item; taking the
    /// snapshot under a short read lock keeps the stream free of the lock.
    pub async fn list(&self, filter: &CatalogueFilter) -> Vec<CounterDefinition> {
        let inner = self.inner.read().await;
        let mut defs: Vec<CounterDefinition> = inner
            .by_id
            .values()
            .filter(|def| filter.matches(def))
            .cloned()
            .collect();
        defs.sort_by_key(|def| def.id);
        defs
    }

    /// Number of live definitions.
    pub async fn len(&self) -> usize {
        self.inner.read().await.by_id.len()
    }

    /// Check if the catalogue is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.by_id.is_empty()
    }
}
