// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Postgres-backed durable mirror.
//!
//! Holds replicated copies of the catalogue and value state in two tables:
//!
//! ```text
//! counter_catalogue (id PK, name UNIQUE, description, default_value, created, updated)
//! counter_values    (counter_id, user_id, value, updated; PK (counter_id, user_id))
//! ```
//!
//! Applies use idempotent `INSERT ... ON CONFLICT ... DO UPDATE` upserts, so
//! replaying a record after a drain-task restart is harmless. The mirror
//! never computes increments, it stores pre-computed values from the
//! primary path.
//!
//! # Transient Failure Handling
//!
//! Postgres can reject concurrent upserts with serialization failures or
//! deadlocks (SQLSTATE 40001/40P01). Those are retried in place with a short
//! exponential backoff; everything else is reported to the drain task, which
//! owns the longer retry schedule and the dead-letter budget.
//!
//! # Schema Ownership
//!
//! Production schema migration belongs to the deployment. `ensure_schema()`
//! exists so integration tests can bootstrap a throwaway database.

use crate::catalogue::CounterDefinition;
use crate::config::MirrorConfig;
use crate::error::{CounterError, Result};
use crate::mirror::{BoxFuture, MirrorError, MirrorStore};
use crate::values::CounterValue;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Configuration for transient-failure retry behavior
const PG_RETRY_MAX_ATTEMPTS: u32 = 5;
const PG_RETRY_BASE_DELAY_MS: u64 = 10;
const PG_RETRY_MAX_DELAY_MS: u64 = 500;

/// Check if an error is a retryable serialization/deadlock failure
fn is_pg_transient_error(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db_err) => {
            // 40001 = serialization_failure, 40P01 = deadlock_detected
            if let Some(code) = db_err.code() {
                return code == "40001" || code == "40P01";
            }
            false
        }
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

/// Execute a database operation with retry on transient Postgres failures
async fn execute_with_retry<F, Fut, T>(
    operation_name: &str,
    mut f: F,
) -> std::result::Result<T, sqlx::Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, sqlx::Error>>,
{
    let mut attempts = 0;
    let mut delay_ms = PG_RETRY_BASE_DELAY_MS;

    loop {
        attempts += 1;
        match f().await {
            Ok(result) => {
                if attempts > 1 {
                    debug!(
                        operation = operation_name,
                        attempts,
                        "Postgres operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if is_pg_transient_error(&e) && attempts < PG_RETRY_MAX_ATTEMPTS => {
                warn!(
                    operation = operation_name,
                    attempts,
                    max_attempts = PG_RETRY_MAX_ATTEMPTS,
                    delay_ms,
                    "Postgres transient failure, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                delay_ms = (delay_ms * 2).min(PG_RETRY_MAX_DELAY_MS);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Durable mirror backed by Postgres.
///
/// Owned exclusively by the replication drain task; nothing on the request
/// path touches this connection.
pub struct PostgresMirror {
    pool: PgPool,
}

impl PostgresMirror {
    /// Connect to the mirror database described by `config`.
    pub async fn connect(config: &MirrorConfig) -> Result<Self> {
        info!(max_connections = config.max_connections, "Connecting to mirror database");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout_duration())
            .connect(&config.postgres_url)
            .await
            .map_err(|e| CounterError::mirror("connect", e.to_string()))?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool (for tests that manage their own container).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the mirror tables if they don't exist.
    ///
    /// Integration-test bootstrap only; production schema is migrated by the
    /// deployment.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS counter_catalogue (
                id BIGINT PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                description TEXT NOT NULL DEFAULT '',
                default_value BIGINT NOT NULL DEFAULT 0,
                created TIMESTAMPTZ NOT NULL,
                updated TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CounterError::mirror("ensure_schema", e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS counter_values (
                counter_id BIGINT NOT NULL,
                user_id BIGINT NOT NULL,
                value BIGINT NOT NULL,
                updated TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (counter_id, user_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CounterError::mirror("ensure_schema", e.to_string()))?;

        debug!("Mirror schema ensured");
        Ok(())
    }

    /// Close the connection pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
        info!("Mirror connection closed");
    }
}

impl MirrorStore for PostgresMirror {
    fn upsert_definition(&self, def: CounterDefinition) -> BoxFuture<'_, ()> {
        let pool = self.pool.clone();
        Box::pin(async move {
            execute_with_retry("upsert_definition", || async {
                sqlx::query(
                    r#"
                    INSERT INTO counter_catalogue (id, name, description, default_value, created, updated)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT (id) DO UPDATE SET
                        name = EXCLUDED.name,
                        description = EXCLUDED.description,
                        updated = EXCLUDED.updated
                    "#,
                )
                .bind(def.id)
                .bind(&def.name)
                .bind(&def.description)
                .bind(def.default_value)
                .bind(def.created_at)
                .bind(def.updated_at)
                .execute(&pool)
                .await
            })
            .await
            .map_err(|e| MirrorError(format!("upsert_definition: {e}")))?;
            Ok(())
        })
    }

    fn upsert_value(&self, row: CounterValue) -> BoxFuture<'_, ()> {
        let pool = self.pool.clone();
        Box::pin(async move {
            execute_with_retry("upsert_value", || async {
                sqlx::query(
                    r#"
                    INSERT INTO counter_values (counter_id, user_id, value, updated)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (counter_id, user_id) DO UPDATE SET
                        value = EXCLUDED.value,
                        updated = EXCLUDED.updated
                    "#,
                )
                .bind(row.counter_id)
                .bind(row.user_id)
                .bind(row.value)
                .bind(row.updated_at)
                .execute(&pool)
                .await
            })
            .await
            .map_err(|e| MirrorError(format!("upsert_value: {e}")))?;
            Ok(())
        })
    }

    fn definition(&self, name: &str) -> BoxFuture<'_, Option<CounterDefinition>> {
        let pool = self.pool.clone();
        let name = name.to_string();
        Box::pin(async move {
            let row: Option<(i64, String, String, i64, DateTime<Utc>, DateTime<Utc>)> =
                sqlx::query_as(
                    "SELECT id, name, description, default_value, created, updated \
                     FROM counter_catalogue WHERE name = $1",
                )
                .bind(&name)
                .fetch_optional(&pool)
                .await
                .map_err(|e| MirrorError(format!("definition: {e}")))?;

            Ok(row.map(
                |(id, name, description, default_value, created_at, updated_at)| {
                    CounterDefinition {
                        id,
                        name,
                        description,
                        default_value,
                        created_at,
                        updated_at,
                    }
                },
            ))
        })
    }

    fn value(&self, counter_id: i64, user_id: i64) -> BoxFuture<'_, Option<i64>> {
        let pool = self.pool.clone();
        Box::pin(async move {
            let row: Option<(i64,)> = sqlx::query_as(
                "SELECT value FROM counter_values WHERE counter_id = $1 AND user_id = $2",
            )
            .bind(counter_id)
            .bind(user_id)
            .fetch_optional(&pool)
            .await
            .map_err(|e| MirrorError(format!("value: {e}")))?;

            Ok(row.map(|(value,)| value))
        })
    }

    fn ping(&self) -> BoxFuture<'_, ()> {
        let pool = self.pool.clone();
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&pool)
                .await
                .map_err(|e| MirrorError(format!("ping: {e}")))?;
            Ok(())
        })
    }
}
