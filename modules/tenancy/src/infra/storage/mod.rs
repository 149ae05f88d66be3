//! Infrastructure storage layer: sea-orm entities, migrations and the
//! repository implementations.
//!
//! Every query here goes through `umroh_db::secure`, so a repository method
//! cannot run without the scope its service prepared.

pub mod assignments_sea_repo;
pub mod entity;
pub mod mapper;
pub mod migrations;
pub mod sessions_sea_repo;
pub mod tenants_sea_repo;
pub mod users_sea_repo;

pub use assignments_sea_repo::OrmAssignmentsRepository;
pub use sessions_sea_repo::OrmSessionsRepository;
pub use tenants_sea_repo::OrmTenantsRepository;
pub use users_sea_repo::OrmUsersRepository;

use sea_orm::{DbErr, SqlErr};
use umroh_db::secure::ScopeError;

use crate::domain::error::DomainError;
use crate::domain::validator::AssignmentReference;

/// Prefix of the messages raised by the cross-tenant reference triggers.
pub(crate) const CROSS_TENANT_MARKER: &str = "cross-tenant reference: ";

/// Map a sea-orm error to the domain taxonomy.
///
/// Unique violations become [`DomainError::Conflict`]; aborts raised by the
/// reference triggers become [`DomainError::CrossTenantReference`].
pub(crate) fn db_err(e: DbErr) -> DomainError {
    if let Some(SqlErr::UniqueConstraintViolation(detail)) = e.sql_err() {
        return DomainError::conflict(detail);
    }
    let message = e.to_string();
    if let Some(reference) = trigger_reference(&message) {
        return DomainError::CrossTenantReference {
            reference,
            detail: message,
        };
    }
    DomainError::database(message)
}

fn trigger_reference(message: &str) -> Option<AssignmentReference> {
    let (_, rest) = message.split_once(CROSS_TENANT_MARKER)?;
    let column: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    AssignmentReference::from_column(&column)
}

impl From<ScopeError> for DomainError {
    fn from(e: ScopeError) -> Self {
        match e {
            ScopeError::Denied(msg) => Self::IsolationViolation(msg.to_owned()),
            ScopeError::Invalid(msg) => Self::validation("scope", msg),
            ScopeError::Db(err) => db_err(err),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn trigger_message_names_reference() {
        let msg = "Execution Error: error returned from database: (code: 1811) cross-tenant reference: agent_id";
        assert_eq!(trigger_reference(msg), Some(AssignmentReference::Agent));
        let err = db_err(DbErr::Custom(msg.to_owned()));
        assert!(matches!(
            err,
            DomainError::CrossTenantReference {
                reference: AssignmentReference::Agent,
                ..
            }
        ));
    }

    #[test]
    fn unrelated_errors_stay_database_errors() {
        assert!(trigger_reference("no such table: users").is_none());
        assert!(matches!(
            db_err(DbErr::Custom("boom".to_owned())),
            DomainError::Database { .. }
        ));
    }

    #[test]
    fn scope_denial_is_an_isolation_violation() {
        let err: DomainError = ScopeError::Denied("tenant_id not present in security scope").into();
        assert!(matches!(err, DomainError::IsolationViolation(_)));
    }
}
