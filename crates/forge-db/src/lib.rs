//! sqlx-backed database adapter: a subject-scoped connection wrapper, pool
//! stats, migration-ledger helpers, and advisory locks (C10).
//!
//! The `app.user_id` session GUC set per-transaction here is exactly what
//! `forge_normalize::sql::SUBJECT_SQL` reads back out of the SQL side of
//! row-level security (`current_setting('app.user_id', true)::uuid`) — the
//! two halves of one dual-enforcement design, kept in separate crates so
//! the pure rule evaluator (C9) never needs a database handle.
//!
//! Advisory locking mirrors `rust/src/database/locks.rs`:
//! transaction-scoped `pg_advisory_xact_lock`, released automatically on
//! commit or rollback.

use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

#[derive(Clone, Copy, Debug)]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
}

/// Owns the pool for one FORGE runtime process.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, DbError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats { size: self.pool.size(), idle: self.pool.num_idle() }
    }

    /// Begin a transaction scoped to `subject` via the `app.user_id`
    /// session GUC. `SET LOCAL` can't be parameterized, but a `Uuid`'s
    /// `Display` impl only ever emits hex digits and dashes, so formatting
    /// it directly into the statement carries no injection risk.
    pub async fn begin_as_subject(&self, subject: Option<Uuid>) -> Result<Transaction<'_, Postgres>, DbError> {
        let mut tx = self.pool.begin().await?;
        if let Some(subject) = subject {
            sqlx::query(&format!("SET LOCAL app.user_id = '{subject}'")).execute(&mut *tx).await?;
        }
        Ok(tx)
    }
}

/// Derive a stable `i64` advisory lock key from an entity name and row id,
/// the same scheme as `rust/src/database/locks.rs::lock_key`.
pub fn advisory_lock_key(entity: &str, id: Uuid) -> i64 {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    entity.hash(&mut hasher);
    id.hash(&mut hasher);
    hasher.finish() as i64
}

/// Block until the transaction-scoped advisory lock is acquired. Released
/// automatically at commit or rollback.
pub async fn advisory_xact_lock(tx: &mut Transaction<'_, Postgres>, key: i64) -> Result<(), DbError> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)").bind(key).execute(&mut **tx).await?;
    Ok(())
}

/// Non-blocking variant used by the migration runner (C14) to avoid
/// stampeding on a hot-reload race between multiple server instances.
pub async fn try_advisory_xact_lock(tx: &mut Transaction<'_, Postgres>, key: i64) -> Result<bool, DbError> {
    let row: PgRow = sqlx::query("SELECT pg_try_advisory_xact_lock($1) AS acquired").bind(key).fetch_one(&mut **tx).await?;
    Ok(row.try_get::<bool, _>("acquired")?)
}

/// Ledger table recording every migration version applied to this
/// database, so the runner (C14) can diff the artifact's migration against
/// what's already live.
pub async fn ensure_migration_ledger(pool: &PgPool) -> Result<(), DbError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS _forge_migrations (
            version text PRIMARY KEY,
            checksum text NOT NULL,
            applied_at timestamptz NOT NULL DEFAULT now(),
            duration_ms bigint NOT NULL,
            statements integer NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn applied_versions(pool: &PgPool) -> Result<Vec<String>, DbError> {
    let rows = sqlx::query("SELECT version FROM _forge_migrations ORDER BY applied_at").fetch_all(pool).await?;
    Ok(rows.iter().map(|row| row.get::<String, _>("version")).collect())
}

pub async fn record_migration(tx: &mut Transaction<'_, Postgres>, version: &str, checksum: &str, duration_ms: i64, statements: i32) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO _forge_migrations (version, checksum, duration_ms, statements) VALUES ($1, $2, $3, $4) ON CONFLICT (version) DO NOTHING",
    )
    .bind(version)
    .bind(checksum)
    .bind(duration_ms)
    .bind(statements)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Apply every statement of a migration inside one transaction. Each
/// `up_statement` from the planner (C6) is already wrapped in its own
/// `DO $$ ... EXCEPTION WHEN duplicate_object THEN NULL; END $$;` guard
/// where idempotency matters (enum/FK creation), so re-applying an already
/// applied migration is safe and this function does not special-case it
/// beyond the ledger check the caller performs first.
pub async fn apply_in_transaction(pool: &PgPool, version: &str, checksum: &str, statements: &[String]) -> Result<(), DbError> {
    let started = std::time::Instant::now();
    let mut tx = pool.begin().await?;
    for stmt in statements {
        sqlx::query(stmt).execute(&mut *tx).await?;
    }
    let duration_ms = started.elapsed().as_millis() as i64;
    record_migration(&mut tx, version, checksum, duration_ms, statements.len() as i32).await?;
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advisory_lock_key_is_deterministic_and_distinguishes_entities() {
        let id = Uuid::new_v4();
        assert_eq!(advisory_lock_key("Ticket", id), advisory_lock_key("Ticket", id));
        assert_ne!(advisory_lock_key("Ticket", id), advisory_lock_key("Project", id));
    }
}
