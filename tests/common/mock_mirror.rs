//! Mock MirrorStore for testing.
//!
//! Stores applied state in memory so read-backs work, counts upserts for
//! assertions, and supports configurable failure injection to exercise the
//! drain task's retry and dead-letter paths.

use named_count::catalogue::CounterDefinition;
use named_count::mirror::{BoxFuture, MirrorError, MirrorStore};
use named_count::values::CounterValue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Mock implementation of MirrorStore.
///
/// # Example
/// ```rust,ignore
/// let mirror = Arc::new(MockMirror::new());
///
/// // Inject two failures, then recover
/// mirror.fail_next(2);
///
/// // ... run the engine ...
///
/// assert_eq!(mirror.value_upserts(), 5);
/// assert_eq!(mirror.stored_value(7, 123), Some(5));
/// ```
pub struct MockMirror {
    /// Applied definitions by id
    definitions: Mutex<HashMap<i64, CounterDefinition>>,
    /// Applied values by (counter_id, user_id)
    values: Mutex<HashMap<(i64, i64), i64>>,
    /// Every value ever applied per pair, in apply order (for
    /// never-saw-a-phantom-value assertions)
    value_history: Mutex<HashMap<(i64, i64), Vec<i64>>>,
    /// Upsert counters
    definition_upserts: AtomicUsize,
    value_upserts: AtomicUsize,
    /// Failure injection: fail the next N applies
    fail_remaining: AtomicUsize,
    /// Failure injection: fail every apply until cleared
    fail_always: AtomicBool,
}

impl Default for MockMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMirror {
    /// Create a mock that accepts every apply.
    pub fn new() -> Self {
        Self {
            definitions: Mutex::new(HashMap::new()),
            values: Mutex::new(HashMap::new()),
            value_history: Mutex::new(HashMap::new()),
            definition_upserts: AtomicUsize::new(0),
            value_upserts: AtomicUsize::new(0),
            fail_remaining: AtomicUsize::new(0),
            fail_always: AtomicBool::new(false),
        }
    }

    /// Shared handle, the shape the engine wants.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    // =========================================================================
    // Failure injection
    // =========================================================================

    /// Fail the next `n` applies with a transient error.
    #[allow(dead_code)]
    pub fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Fail every apply until [`recover()`](Self::recover) is called.
    #[allow(dead_code)]
    pub fn fail_always(&self) {
        self.fail_always.store(true, Ordering::SeqCst);
    }

    /// Stop failing applies.
    #[allow(dead_code)]
    pub fn recover(&self) {
        self.fail_always.store(false, Ordering::SeqCst);
        self.fail_remaining.store(0, Ordering::SeqCst);
    }

    fn check_failure(&self) -> Result<(), MirrorError> {
        if self.fail_always.load(Ordering::SeqCst) {
            return Err(MirrorError("injected failure (always)".to_string()));
        }
        let mut remaining = self.fail_remaining.load(Ordering::SeqCst);
        while remaining > 0 {
            match self.fail_remaining.compare_exchange(
                remaining,
                remaining - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Err(MirrorError("injected failure".to_string())),
                Err(actual) => remaining = actual,
            }
        }
        Ok(())
    }

    // =========================================================================
    // Assertion helpers
    // =========================================================================

    /// Number of definition upserts applied (failures excluded).
    #[allow(dead_code)]
    pub fn definition_upserts(&self) -> usize {
        self.definition_upserts.load(Ordering::SeqCst)
    }

    /// Number of value upserts applied (failures excluded).
    #[allow(dead_code)]
    pub fn value_upserts(&self) -> usize {
        self.value_upserts.load(Ordering::SeqCst)
    }

    /// Currently mirrored value for a pair.
    #[allow(dead_code)]
    pub fn stored_value(&self, counter_id: i64, user_id: i64) -> Option<i64> {
        self.values.lock().unwrap().get(&(counter_id, user_id)).copied()
    }

    /// Currently mirrored definition by id.
    #[allow(dead_code)]
    pub fn stored_definition(&self, id: i64) -> Option<CounterDefinition> {
        self.definitions.lock().unwrap().get(&id).cloned()
    }

    /// Every value ever applied for a pair, in apply order.
    #[allow(dead_code)]
    pub fn applied_values(&self, counter_id: i64, user_id: i64) -> Vec<i64> {
        self.value_history
            .lock()
            .unwrap()
            .get(&(counter_id, user_id))
            .cloned()
            .unwrap_or_default()
    }
}

impl MirrorStore for MockMirror {
    fn upsert_definition(&self, def: CounterDefinition) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.check_failure()?;
            self.definitions.lock().unwrap().insert(def.id, def);
            self.definition_upserts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn upsert_value(&self, row: CounterValue) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.check_failure()?;
            let key = (row.counter_id, row.user_id);
            self.values.lock().unwrap().insert(key, row.value);
            self.value_history
                .lock()
                .unwrap()
                .entry(key)
                .or_default()
                .push(row.value);
            self.value_upserts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn definition(&self, name: &str) -> BoxFuture<'_, Option<CounterDefinition>> {
        let name = name.to_string();
        Box::pin(async move {
            Ok(self
                .definitions
                .lock()
                .unwrap()
                .values()
                .find(|def| def.name == name)
                .cloned())
        })
    }

    fn value(&self, counter_id: i64, user_id: i64) -> BoxFuture<'_, Option<i64>> {
        Box::pin(async move { Ok(self.stored_value(counter_id, user_id)) })
    }
}
