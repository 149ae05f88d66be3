//! Reversible, per-module migration runner.
//!
//! Modules hand over their `MigrationTrait` list; the runner executes it with
//! its privileged connection, so modules never receive raw database access.
//!
//! # History tables
//!
//! Each module gets its own history table named
//! `umroh_migrations__<module>__<hash8>`, where `<hash8>` is derived from the
//! module name via `xxh3_64`. Two modules may therefore use the same migration
//! names without clashing.
//!
//! # Atomicity
//!
//! A migration's `up` and the history row that marks it applied are written in
//! one transaction; `down` and the removal of that row likewise. A failing
//! migration leaves no trace and stays [`MigrationState::NotApplied`].

use sea_orm::{
    ConnectionTrait, DatabaseBackend, DbErr, ExecResult, FromQueryResult, Statement,
    TransactionTrait,
};
use sea_orm_migration::{MigrationTrait, SchemaManager};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, warn};
use xxhash_rust::xxh3::xxh3_64;

/// Errors that can occur during migration execution.
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("failed to create migration table for module '{module}': {source}")]
    CreateTable { module: String, source: DbErr },

    #[error("failed to query migration history for module '{module}': {source}")]
    QueryHistory { module: String, source: DbErr },

    /// `up` failed; its transaction was rolled back.
    #[error("migration '{migration}' failed for module '{module}': {source}")]
    MigrationFailed {
        module: String,
        migration: String,
        source: DbErr,
    },

    /// `down` failed; the migration is still applied.
    #[error("rollback of migration '{migration}' failed for module '{module}': {source}")]
    RollbackFailed {
        module: String,
        migration: String,
        source: DbErr,
    },

    #[error("failed to record migration '{migration}' for module '{module}': {source}")]
    RecordFailed {
        module: String,
        migration: String,
        source: DbErr,
    },

    #[error("duplicate migration name '{name}' for module '{module}'")]
    DuplicateMigrationName { module: String, name: String },
}

/// Result of a forward migration run.
#[derive(Debug, Clone, Default)]
pub struct MigrationResult {
    pub applied: usize,
    pub skipped: usize,
    pub applied_names: Vec<String>,
}

/// Result of a rollback run, most recent migration first.
#[derive(Debug, Clone, Default)]
pub struct RollbackResult {
    pub rolled_back_names: Vec<String>,
}

/// Steady states of a migration. `applying` only exists inside the runner's
/// transaction and is never observable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationState {
    NotApplied,
    Applied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub name: String,
    pub state: MigrationState,
}

#[derive(Debug, FromQueryResult)]
struct MigrationRecord {
    version: String,
}

/// Sanitize a module name into a safe identifier fragment: `[a-zA-Z0-9_]`
/// survive, everything else becomes `_`.
fn sanitize_module_name(name: &str) -> String {
    let out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() { "_".to_owned() } else { out }
}

/// `umroh_migrations__<prefix>__<hash8>`, capped to the 63-byte `PostgreSQL`
/// identifier limit. The hash is taken over the original module name.
fn migration_table_name(module_name: &str) -> String {
    const PREFIX: &str = "umroh_migrations__";
    const SEP: &str = "__";
    const HASH_LEN: usize = 8;
    const PG_IDENT_MAX: usize = 63;

    let sanitized = sanitize_module_name(module_name);
    let hash = xxh3_64(module_name.as_bytes());
    let hash8 = &format!("{hash:016x}")[..HASH_LEN];

    let max_prefix_len = PG_IDENT_MAX.saturating_sub(PREFIX.len() + SEP.len() + HASH_LEN);
    let prefix_part = &sanitized[..sanitized.len().min(max_prefix_len)];

    format!("{PREFIX}{prefix_part}{SEP}{hash8}")
}

fn ordered_names(
    module_name: &str,
    migrations: &[Box<dyn MigrationTrait>],
) -> Result<Vec<String>, MigrationError> {
    let mut seen = HashSet::new();
    for m in migrations {
        if !seen.insert(m.name()) {
            return Err(MigrationError::DuplicateMigrationName {
                module: module_name.to_owned(),
                name: m.name().to_owned(),
            });
        }
    }
    let mut names: Vec<String> = seen.into_iter().map(str::to_owned).collect();
    names.sort();
    Ok(names)
}

async fn ensure_migration_table(
    conn: &impl ConnectionTrait,
    table_name: &str,
    module_name: &str,
) -> Result<(), MigrationError> {
    let backend = conn.get_database_backend();

    let sql = match backend {
        DatabaseBackend::Postgres => format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{table_name}" (
                version VARCHAR(255) PRIMARY KEY,
                applied_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#
        ),
        DatabaseBackend::Sqlite | DatabaseBackend::MySql => format!(
            r#"
            CREATE TABLE IF NOT EXISTS "{table_name}" (
                version TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#
        ),
    };

    conn.execute(Statement::from_string(backend, sql))
        .await
        .map_err(|e| MigrationError::CreateTable {
            module: module_name.to_owned(),
            source: e,
        })?;

    Ok(())
}

async fn history_table_exists(
    conn: &impl ConnectionTrait,
    table_name: &str,
    module_name: &str,
) -> Result<bool, MigrationError> {
    let backend = conn.get_database_backend();
    let sql = match backend {
        DatabaseBackend::Postgres | DatabaseBackend::MySql => format!(
            "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = '{table_name}'"
        ),
        DatabaseBackend::Sqlite => format!(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='{table_name}'"
        ),
    };
    let row = conn
        .query_one(Statement::from_string(backend, sql))
        .await
        .map_err(|e| MigrationError::QueryHistory {
            module: module_name.to_owned(),
            source: e,
        })?;
    Ok(row
        .and_then(|r| r.try_get_by_index::<i64>(0).ok())
        .is_some_and(|c| c > 0))
}

async fn get_applied_migrations(
    conn: &impl ConnectionTrait,
    table_name: &str,
    module_name: &str,
) -> Result<HashSet<String>, MigrationError> {
    let backend = conn.get_database_backend();
    let sql = format!(r#"SELECT version FROM "{table_name}""#);

    let records: Vec<MigrationRecord> =
        MigrationRecord::find_by_statement(Statement::from_string(backend, sql))
            .all(conn)
            .await
            .map_err(|e| MigrationError::QueryHistory {
                module: module_name.to_owned(),
                source: e,
            })?;

    Ok(records.into_iter().map(|r| r.version).collect())
}

async fn record_migration(
    conn: &impl ConnectionTrait,
    table_name: &str,
    module_name: &str,
    migration_name: &str,
) -> Result<ExecResult, MigrationError> {
    let backend = conn.get_database_backend();
    let sql = format!(r#"INSERT INTO "{table_name}" (version) VALUES ($1)"#);

    conn.execute(Statement::from_sql_and_values(
        backend,
        &sql,
        [migration_name.into()],
    ))
    .await
    .map_err(|e| MigrationError::RecordFailed {
        module: module_name.to_owned(),
        migration: migration_name.to_owned(),
        source: e,
    })
}

async fn forget_migration(
    conn: &impl ConnectionTrait,
    table_name: &str,
    module_name: &str,
    migration_name: &str,
) -> Result<ExecResult, MigrationError> {
    let backend = conn.get_database_backend();
    let sql = format!(r#"DELETE FROM "{table_name}" WHERE version = $1"#);

    conn.execute(Statement::from_sql_and_values(
        backend,
        &sql,
        [migration_name.into()],
    ))
    .await
    .map_err(|e| MigrationError::RecordFailed {
        module: module_name.to_owned(),
        migration: migration_name.to_owned(),
        source: e,
    })
}

/// Apply every pending migration of a module, in name (timestamp) order.
///
/// ```ignore
/// let result = run_migrations_for_module(&db, "tenancy", Migrator::migrations()).await?;
/// info!(applied = result.applied, "tenancy schema ready");
/// ```
///
/// # Errors
/// Returns `Err(MigrationError)` if the history table cannot be created or
/// read, names are duplicated, or a migration fails. Migrations applied before
/// the failing one stay applied.
pub async fn run_migrations_for_module(
    db: &crate::Db,
    module_name: &str,
    migrations: Vec<Box<dyn MigrationTrait>>,
) -> Result<MigrationResult, MigrationError> {
    run_module_migrations(db.sea_internal(), module_name, migrations).await
}

async fn run_module_migrations<C>(
    conn: &C,
    module_name: &str,
    migrations: Vec<Box<dyn MigrationTrait>>,
) -> Result<MigrationResult, MigrationError>
where
    C: ConnectionTrait + TransactionTrait,
{
    if migrations.is_empty() {
        debug!(module = module_name, "No migrations to run");
        return Ok(MigrationResult::default());
    }
    ordered_names(module_name, &migrations)?;

    let table_name = migration_table_name(module_name);
    ensure_migration_table(conn, &table_name, module_name).await?;
    let applied = get_applied_migrations(conn, &table_name, module_name).await?;

    let mut sorted = migrations;
    sorted.sort_by(|a, b| a.name().cmp(b.name()));

    let mut result = MigrationResult::default();

    for migration in sorted {
        let name = migration.name().to_owned();

        if applied.contains(&name) {
            debug!(module = module_name, migration = %name, "Migration already applied, skipping");
            result.skipped += 1;
            continue;
        }

        info!(module = module_name, migration = %name, "Applying migration");

        let failed = |source: DbErr| MigrationError::MigrationFailed {
            module: module_name.to_owned(),
            migration: name.clone(),
            source,
        };

        let txn = conn.begin().await.map_err(failed)?;
        let manager = SchemaManager::new(&txn);
        let res: Result<(), MigrationError> = async {
            migration.up(&manager).await.map_err(failed)?;
            record_migration(&txn, &table_name, module_name, &name).await?;
            Ok(())
        }
        .await;

        match res {
            Ok(()) => txn.commit().await.map_err(failed)?,
            Err(err) => {
                _ = txn.rollback().await;
                warn!(module = module_name, migration = %name, error = %err, "Migration rolled back");
                return Err(err);
            }
        }

        info!(module = module_name, migration = %name, "Migration applied successfully");
        result.applied += 1;
        result.applied_names.push(name);
    }

    info!(
        module = module_name,
        applied = result.applied,
        skipped = result.skipped,
        "Migration run complete"
    );

    Ok(result)
}

/// Revert the `steps` most recently applied migrations of a module, newest
/// first, running each `down` with the removal of its history row.
///
/// Applied migrations unknown to `migrations` are left alone.
///
/// # Errors
/// Returns `Err(MigrationError)` if the history cannot be read, names are
/// duplicated, or a `down` fails. Migrations reverted before the failing one
/// stay reverted.
pub async fn rollback_migrations_for_module(
    db: &crate::Db,
    module_name: &str,
    migrations: Vec<Box<dyn MigrationTrait>>,
    steps: usize,
) -> Result<RollbackResult, MigrationError> {
    let conn = db.sea_internal();
    ordered_names(module_name, &migrations)?;

    let table_name = migration_table_name(module_name);
    if !history_table_exists(conn, &table_name, module_name).await? {
        return Ok(RollbackResult::default());
    }
    let applied = get_applied_migrations(conn, &table_name, module_name).await?;

    let mut to_revert: Vec<Box<dyn MigrationTrait>> = migrations
        .into_iter()
        .filter(|m| applied.contains(m.name()))
        .collect();
    to_revert.sort_by(|a, b| b.name().cmp(a.name()));
    to_revert.truncate(steps);

    let mut result = RollbackResult::default();

    for migration in to_revert {
        let name = migration.name().to_owned();
        info!(module = module_name, migration = %name, "Rolling back migration");

        let failed = |source: DbErr| MigrationError::RollbackFailed {
            module: module_name.to_owned(),
            migration: name.clone(),
            source,
        };

        let txn = conn.begin().await.map_err(failed)?;
        let manager = SchemaManager::new(&txn);
        let res: Result<(), MigrationError> = async {
            migration.down(&manager).await.map_err(failed)?;
            forget_migration(&txn, &table_name, module_name, &name).await?;
            Ok(())
        }
        .await;

        match res {
            Ok(()) => txn.commit().await.map_err(failed)?,
            Err(err) => {
                _ = txn.rollback().await;
                return Err(err);
            }
        }

        info!(module = module_name, migration = %name, "Migration rolled back");
        result.rolled_back_names.push(name);
    }

    Ok(result)
}

/// State of every known migration of a module, in name order.
///
/// # Errors
/// Returns `Err(MigrationError)` if the history cannot be read or names are
/// duplicated.
pub async fn migration_status(
    db: &crate::Db,
    module_name: &str,
    migrations: &[Box<dyn MigrationTrait>],
) -> Result<Vec<MigrationStatus>, MigrationError> {
    let conn = db.sea_internal();
    let names = ordered_names(module_name, migrations)?;

    let table_name = migration_table_name(module_name);
    let applied = if history_table_exists(conn, &table_name, module_name).await? {
        get_applied_migrations(conn, &table_name, module_name).await?
    } else {
        HashSet::new()
    };

    Ok(names
        .into_iter()
        .map(|name| {
            let state = if applied.contains(&name) {
                MigrationState::Applied
            } else {
                MigrationState::NotApplied
            };
            MigrationStatus { name, state }
        })
        .collect())
}

/// Names of the migrations of a module that have not been applied yet.
///
/// # Errors
/// Returns `Err(MigrationError)` if the migration history cannot be queried.
pub async fn get_pending_migrations(
    db: &crate::Db,
    module_name: &str,
    migrations: &[Box<dyn MigrationTrait>],
) -> Result<Vec<String>, MigrationError> {
    Ok(migration_status(db, module_name, migrations)
        .await?
        .into_iter()
        .filter(|s| s.state == MigrationState::NotApplied)
        .map(|s| s.name)
        .collect())
}
