//! Applies an artifact's migration against the target database: advisory
//! lock, ledger check, transactional apply, ledger record (C14).
//!
//! Sequencing follows `spec.md` §4.14 exactly: acquire the transaction-scoped
//! advisory lock keyed by [`forge_plan::ADVISORY_LOCK_KEY`], ensure the
//! ledger table exists, diff the artifact's migration version against
//! `applied_versions`, and apply only if it's missing. The lock is held for
//! the whole check-then-apply sequence so two server instances racing a
//! hot-reload never both attempt the same migration.

use forge_artifact::ArtifactStore;
use forge_db::{DbError, advisory_xact_lock};
use forge_plan::ADVISORY_LOCK_KEY;
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error(transparent)]
    Db(#[from] DbError),
}

/// What happened on one runner pass, surfaced to the CLI's `--verbose`
/// output and to the server's startup log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// This version was already in the ledger; nothing ran.
    AlreadyApplied { version: String },
    /// The migration's statements ran and were recorded.
    Applied { version: String, statement_count: usize },
}

/// Run the full migration sequence for whatever artifact is currently live
/// in `store`, against `pool`. Idempotent: calling this twice in a row with
/// no source change applies zero new statements the second time
/// (`spec.md` §8 property 4).
pub async fn run_pending_migration(pool: &PgPool, store: &Arc<ArtifactStore>) -> Result<MigrationOutcome, MigrateError> {
    let mut tx = pool.begin().await.map_err(DbError::from)?;
    advisory_xact_lock(&mut tx, ADVISORY_LOCK_KEY).await?;
    tx.commit().await.map_err(DbError::from)?;

    forge_db::ensure_migration_ledger(pool).await?;

    let artifact = store.artifact().await;
    let version = artifact.migration.version.clone();
    let applied = forge_db::applied_versions(pool).await?;
    if applied.contains(&version) {
        tracing::debug!(version = %version, "migration already applied, skipping");
        return Ok(MigrationOutcome::AlreadyApplied { version });
    }

    // Re-acquire the lock for the apply itself: the check above ran in its
    // own short transaction so a concurrent reloader can't hold the lock
    // across the whole check-then-apply window and starve other readers.
    let mut guard_tx = pool.begin().await.map_err(DbError::from)?;
    advisory_xact_lock(&mut guard_tx, ADVISORY_LOCK_KEY).await?;
    let still_unapplied = !forge_db::applied_versions(pool).await?.contains(&version);
    guard_tx.commit().await.map_err(DbError::from)?;

    if !still_unapplied {
        tracing::debug!(version = %version, "migration applied by a concurrent runner while we waited for the lock");
        return Ok(MigrationOutcome::AlreadyApplied { version });
    }

    let statement_count = artifact.migration.up_statements.len();
    forge_db::apply_in_transaction(pool, &version, &artifact.migration.checksum, &artifact.migration.up_statements).await?;
    tracing::info!(version = %version, statements = statement_count, "migration applied");
    Ok(MigrationOutcome::Applied { version, statement_count })
}

/// Poll for newly-required migrations after every artifact reload, used by
/// the server's background hot-reload loop (`spec.md` §4.8 "notifies the
/// migration runner to apply any newly-required statements").
pub async fn watch_and_apply(pool: PgPool, store: Arc<ArtifactStore>, mut reload_signal: tokio::sync::watch::Receiver<()>) {
    loop {
        if reload_signal.changed().await.is_err() {
            return;
        }
        match run_pending_migration(&pool, &store).await {
            Ok(MigrationOutcome::Applied { version, statement_count }) => {
                tracing::info!(version = %version, statements = statement_count, "post-reload migration applied");
            }
            Ok(MigrationOutcome::AlreadyApplied { .. }) => {}
            Err(err) => tracing::error!(error = %err, "post-reload migration failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_fixture(src: &str) -> forge_emit::Artifact {
        let (artifact, diags) = forge_emit::compile_source("t.forge", src);
        assert!(!diags.has_errors(), "{:?}", diags.all());
        artifact.unwrap()
    }

    #[test]
    fn migration_outcome_equality_distinguishes_applied_from_skipped() {
        let a = MigrationOutcome::Applied { version: "v1".to_string(), statement_count: 3 };
        let b = MigrationOutcome::AlreadyApplied { version: "v1".to_string() };
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn an_empty_entity_source_compiles_to_zero_migration_statements() {
        let artifact = compile_fixture("entity Ticket { title: string }");
        assert!(!artifact.migration.up_statements.is_empty());
        let empty = compile_fixture("");
        assert!(empty.migration.up_statements.is_empty());
    }
}
