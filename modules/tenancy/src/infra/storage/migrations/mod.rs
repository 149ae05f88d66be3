//! Schema of the tenancy module.
//!
//! Each migration pairs a table with its indexes, triggers and (on
//! `PostgreSQL`) row-level security policy, and its `down` drops exactly
//! those objects in reverse order. `MySQL` is rejected: the live-assignment
//! uniqueness relies on a partial index.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{ConnectionTrait, DatabaseBackend};

mod m20250101_000001_create_tenants;
mod m20250101_000002_create_users;
mod m20250101_000003_create_sessions;
mod m20250101_000004_create_jamaah_assignments;

/// Module name under which the runner keeps this module's history.
pub const MODULE_NAME: &str = "tenancy";

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_tenants::Migration),
            Box::new(m20250101_000002_create_users::Migration),
            Box::new(m20250101_000003_create_sessions::Migration),
            Box::new(m20250101_000004_create_jamaah_assignments::Migration),
        ]
    }
}

/// Run the script matching the connection's backend.
async fn run_for_backend(
    manager: &SchemaManager<'_>,
    postgres: &str,
    sqlite: &str,
) -> Result<(), DbErr> {
    let sql = match manager.get_database_backend() {
        DatabaseBackend::Postgres => postgres,
        DatabaseBackend::Sqlite => sqlite,
        DatabaseBackend::MySql => {
            return Err(DbErr::Migration(
                "MySQL is not supported: partial indexes are part of the tenancy schema"
                    .to_owned(),
            ));
        }
    };
    manager.get_connection().execute_unprepared(sql).await?;
    Ok(())
}
