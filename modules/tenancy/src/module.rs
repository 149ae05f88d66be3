use std::sync::Arc;

use anyhow::Context;
use sea_orm_migration::MigratorTrait;
use tracing::info;
use umroh_db::Db;
use umroh_db::migration_runner::{
    MigrationStatus, RollbackResult, migration_status, rollback_migrations_for_module,
    run_migrations_for_module,
};
use umroh_security::TokenCodec;

use crate::config::TenancyConfig;
use crate::domain::error::DomainError;
use crate::domain::service::{
    AssignmentService, ContextResolver, SessionService, TenantService, UserService,
};
use crate::infra::storage::migrations::{MODULE_NAME, Migrator};
use crate::infra::storage::{
    OrmAssignmentsRepository, OrmSessionsRepository, OrmTenantsRepository, OrmUsersRepository,
};

pub type Tenants = TenantService<OrmTenantsRepository>;
pub type Users = UserService<OrmUsersRepository, OrmAssignmentsRepository>;
pub type Sessions = SessionService<OrmSessionsRepository, OrmUsersRepository>;
pub type Contexts = ContextResolver<OrmSessionsRepository, OrmUsersRepository>;
pub type Assignments = AssignmentService<OrmAssignmentsRepository, OrmUsersRepository>;

/// Composition root: the services of the module wired to the sea-orm
/// repositories over one [`Db`].
#[derive(Clone, Debug)]
pub struct Tenancy {
    db: Db,
    pub tenants: Tenants,
    pub users: Users,
    pub sessions: Sessions,
    pub contexts: Contexts,
    pub assignments: Assignments,
}

impl Tenancy {
    /// Connect, migrate and wire everything from `cfg`.
    ///
    /// # Errors
    /// Fails on invalid configuration, an unreachable database or a failed
    /// migration.
    pub async fn init(cfg: &TenancyConfig) -> anyhow::Result<Self> {
        info!("Initializing tenancy module");
        cfg.validate()?;
        let db = umroh_db::connect_db(&cfg.database)
            .await
            .context("connecting tenancy database")?;
        Self::migrate(&db)
            .await
            .context("running tenancy migrations")?;
        Ok(Self::with_db(db, cfg))
    }

    /// Wire the services over an already migrated `db`.
    #[must_use]
    pub fn with_db(db: Db, cfg: &TenancyConfig) -> Self {
        let tenants_repo = Arc::new(OrmTenantsRepository::new());
        let users_repo = Arc::new(OrmUsersRepository::new());
        let sessions_repo = Arc::new(OrmSessionsRepository::new());
        let assignments_repo = Arc::new(OrmAssignmentsRepository::new());

        let codec = TokenCodec::new(
            &cfg.tokens.issuer,
            &cfg.tokens.signing_secret,
            cfg.tokens.access_ttl,
            cfg.tokens.leeway_seconds,
        );

        Self {
            tenants: TenantService::new(db.clone(), Arc::clone(&tenants_repo)),
            users: UserService::new(
                db.clone(),
                Arc::clone(&users_repo),
                Arc::clone(&assignments_repo),
                cfg.login,
            ),
            sessions: SessionService::new(
                db.clone(),
                Arc::clone(&sessions_repo),
                Arc::clone(&users_repo),
                codec.clone(),
                cfg.tokens.refresh_ttl,
            ),
            contexts: ContextResolver::new(
                db.clone(),
                sessions_repo,
                Arc::clone(&users_repo),
                codec,
            ),
            assignments: AssignmentService::new(db.clone(), assignments_repo, users_repo),
            db,
        }
    }

    #[must_use]
    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Apply every pending migration of the module.
    ///
    /// # Errors
    /// `MigrationFailed` naming the migration whose `up` failed; it is left
    /// not applied.
    pub async fn migrate(db: &Db) -> Result<(), DomainError> {
        let result = run_migrations_for_module(db, MODULE_NAME, Migrator::migrations()).await?;
        info!(
            applied = result.applied,
            skipped = result.skipped,
            "tenancy schema up to date"
        );
        Ok(())
    }

    /// Undo the last `steps` applied migrations, newest first.
    ///
    /// # Errors
    /// `MigrationFailed` naming the migration whose `down` failed.
    pub async fn rollback(db: &Db, steps: usize) -> Result<RollbackResult, DomainError> {
        Ok(rollback_migrations_for_module(db, MODULE_NAME, Migrator::migrations(), steps).await?)
    }

    /// # Errors
    /// `MigrationFailed` when the history cannot be read.
    pub async fn migration_status(db: &Db) -> Result<Vec<MigrationStatus>, DomainError> {
        Ok(migration_status(db, MODULE_NAME, &Migrator::migrations()).await?)
    }
}
