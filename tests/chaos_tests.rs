// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Chaos tests: simulate mirror failures and verify graceful degradation.
//!
//! These tests verify the system handles failures gracefully without panics,
//! deadlocks, or data loss on the authoritative path. The request path must
//! never observe a mirror failure; the drain task must retry transient
//! failures and dead-letter records only after the budget is spent.
//!
//! Run with: cargo test --test chaos_tests -- --nocapture

mod common;

use common::{wait_for, MockMirror};
use named_count::config::NamedCountConfig;
use named_count::service::{CatalogueService, CountService};
use named_count::{CounterRef, EngineState, NamedCountEngine, Router};
use std::sync::Arc;
use std::time::Duration;

async fn start_engine_with(
    mirror: Arc<MockMirror>,
) -> (NamedCountEngine<MockMirror>, Router) {
    let engine = NamedCountEngine::with_mirror(
        NamedCountConfig::for_testing("chaos-engine"),
        mirror,
    );
    engine.start().await.expect("engine should start");
    let router = Router::for_engine(&engine);
    (engine, router)
}

// =============================================================================
// Transient Mirror Failures
// =============================================================================

/// Test: a mirror that fails a few times still receives the record.
#[tokio::test]
async fn transient_mirror_failure_is_retried() {
    let mirror = MockMirror::shared();
    // Two injected failures, fewer than the test retry budget of 3.
    mirror.fail_next(2);

    let (engine, router) = start_engine_with(Arc::clone(&mirror)).await;
    let id = router.put("flaky", "", 0).await.value.unwrap().id;
    router.increment(CounterRef::Id(id), 1, 5).await;

    let converged = wait_for(Duration::from_secs(2), || {
        let mirror = Arc::clone(&mirror);
        async move { mirror.stored_value(id, 1) == Some(5) }
    })
    .await;
    assert!(converged, "record should land after retries");

    engine.shutdown().await;
    assert!(
        engine.take_dead_letters().await.is_empty(),
        "transient failures must not dead-letter"
    );
}

/// Test: mirror failures never surface on the request path.
#[tokio::test]
async fn request_path_is_isolated_from_mirror_outage() {
    let mirror = MockMirror::shared();
    mirror.fail_always();

    let (engine, router) = start_engine_with(Arc::clone(&mirror)).await;

    // Every request succeeds while the mirror is down hard.
    let id = router.put("isolated", "", 0).await.value.unwrap().id;
    for _ in 0..10 {
        assert!(router.increment(CounterRef::Id(id), 1, 1).await.is_success());
    }
    assert_eq!(router.get(CounterRef::Id(id), 1).await.value.unwrap().value, 10);
    assert!(router.reset(CounterRef::Id(id), 1).await.is_success());

    engine.shutdown().await;
}

// =============================================================================
// Retry Budget Exhaustion → Dead Letters
// =============================================================================

/// Test: records are abandoned to the dead-letter channel after the budget,
/// and the engine reports them to the operational channel, not the caller.
#[tokio::test]
async fn exhausted_retry_budget_dead_letters_records() {
    let mirror = MockMirror::shared();
    mirror.fail_always();

    let (engine, router) = start_engine_with(Arc::clone(&mirror)).await;
    let put = router.put("doomed", "", 0).await;
    assert!(put.is_success(), "caller still sees success");

    // Testing retry config: 3 attempts at ≤100ms delays, so abandonment
    // happens well within a couple of seconds.
    let abandoned = wait_for(Duration::from_secs(5), || {
        let engine = &engine;
        async move { engine.health_check().await.dead_letters_pending > 0 }
    })
    .await;
    assert!(abandoned, "record should be dead-lettered after the budget");

    let letters = engine.take_dead_letters().await;
    assert!(!letters.is_empty());
    assert!(letters[0].attempts >= 3);
    assert!(!letters[0].last_error.is_empty());

    // Collected once; channel is drained.
    assert!(engine.take_dead_letters().await.is_empty());

    engine.shutdown().await;
}

/// Test: recovery after an outage lets later records through.
#[tokio::test]
async fn mirror_recovery_resumes_replication() {
    let mirror = MockMirror::shared();
    mirror.fail_always();

    let (engine, router) = start_engine_with(Arc::clone(&mirror)).await;
    let id = router.put("recovering", "", 0).await.value.unwrap().id;
    router.increment(CounterRef::Id(id), 1, 1).await;

    // Let the outage burn through some retries, then recover.
    tokio::time::sleep(Duration::from_millis(100)).await;
    mirror.recover();

    // New mutations propagate normally after recovery.
    router.increment(CounterRef::Id(id), 1, 1).await;
    let converged = wait_for(Duration::from_secs(2), || {
        let mirror = Arc::clone(&mirror);
        async move { mirror.stored_value(id, 1) == Some(2) }
    })
    .await;
    assert!(converged, "replication should resume after recovery");

    engine.shutdown().await;
}

// =============================================================================
// Concurrency Under Failure
// =============================================================================

/// Test: a concurrent increment storm with a flaky mirror still converges
/// and never loses authoritative updates.
#[tokio::test]
async fn increment_storm_with_flaky_mirror_converges() {
    let mirror = MockMirror::shared();
    mirror.fail_next(5);

    let (engine, router) = start_engine_with(Arc::clone(&mirror)).await;
    let id = router.put("storm", "", 0).await.value.unwrap().id;

    let mut handles = Vec::new();
    for user_id in 1..=4i64 {
        for _ in 0..25 {
            let router = router.clone();
            handles.push(tokio::spawn(async move {
                router.increment(CounterRef::Id(id), user_id, 1).await
            }));
        }
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_success());
    }

    // Authoritative totals are exact per user.
    for user_id in 1..=4i64 {
        assert_eq!(
            router.get(CounterRef::Id(id), user_id).await.value.unwrap().value,
            25
        );
    }

    // And the mirror converges for every pair.
    let converged = wait_for(Duration::from_secs(2), || {
        let mirror = Arc::clone(&mirror);
        async move {
            (1..=4).all(|user_id| mirror.stored_value(id, user_id) == Some(25))
        }
    })
    .await;
    assert!(converged);

    engine.shutdown().await;
}

/// Test: reset racing an increment resolves to a valid serialization.
#[tokio::test]
async fn reset_increment_race_is_serializable() {
    for _ in 0..20 {
        let mirror = MockMirror::shared();
        let (engine, router) = start_engine_with(Arc::clone(&mirror)).await;
        let id = router.put("raced", "", 0).await.value.unwrap().id;
        router.increment(CounterRef::Id(id), 1, 100).await;

        let inc_router = router.clone();
        let reset_router = router.clone();
        let inc = tokio::spawn(async move {
            inc_router.increment(CounterRef::Id(id), 1, 7).await
        });
        let reset = tokio::spawn(async move {
            reset_router.reset(CounterRef::Id(id), 1).await
        });
        assert!(inc.await.unwrap().is_success());
        assert!(reset.await.unwrap().is_success());

        let final_value = router.get(CounterRef::Id(id), 1).await.value.unwrap().value;
        // Either the increment happened first and was wiped by the reset,
        // or the reset happened first and the delta survives.
        assert!(
            final_value == 0 || final_value == 7,
            "final value {final_value} is not a valid serialization"
        );

        engine.shutdown().await;
    }
}

// =============================================================================
// Shutdown Under Load
// =============================================================================

/// Test: shutting down mid-stream doesn't panic, deadlock, or corrupt state.
#[tokio::test]
async fn shutdown_under_load_is_clean() {
    let mirror = MockMirror::shared();
    let (engine, router) = start_engine_with(Arc::clone(&mirror)).await;
    let id = router.put("loaded", "", 0).await.value.unwrap().id;

    let writer = {
        let router = router.clone();
        tokio::spawn(async move {
            for _ in 0..1000 {
                if !router.increment(CounterRef::Id(id), 1, 1).await.is_success() {
                    break;
                }
            }
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    engine.shutdown().await;
    assert_eq!(engine.state(), EngineState::Stopped);

    writer.await.unwrap();

    // The router now rejects requests with a terminal Shutdown status...
    let rejected = router.get(CounterRef::Id(id), 1).await;
    assert_eq!(
        rejected.error_code(),
        Some(named_count::ErrorCode::Unavailable)
    );

    // ...but everything committed before shutdown is intact in the store.
    let value = engine.values().get(id, 1).await.unwrap();
    assert!(value > 0);
}

/// Test: a dropped list stream mid-consumption leaves the stores intact.
#[tokio::test]
async fn abandoned_list_stream_does_not_corrupt_state() {
    use futures::StreamExt;

    let mirror = MockMirror::shared();
    let (engine, router) = start_engine_with(Arc::clone(&mirror)).await;

    for i in 0..50 {
        router.put(&format!("bulk-{i:02}"), "", 0).await;
    }

    {
        let mut stream = CatalogueService::list(&router, Default::default());
        let _first = stream.next().await;
        // Dropped here, mid-stream.
    }

    // Stores still serve everything.
    let all: Vec<_> = CatalogueService::list(&router, Default::default())
        .collect()
        .await;
    assert_eq!(all.len(), 50);

    let user_stream: Vec<_> = CountService::list(&router, 1).collect().await;
    assert!(user_stream.is_empty());

    engine.shutdown().await;
}
