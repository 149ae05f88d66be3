use thiserror::Error;
use umroh_db::DbError;
use umroh_db::migration_runner::MigrationError;
use umroh_security::SecurityError;
use uuid::Uuid;

use crate::domain::model::TenantStatus;
use crate::domain::validator::{AssignmentReference, ReferenceViolation};

/// Domain-specific errors using thiserror
#[derive(Error, Debug)]
pub enum DomainError {
    /// The row does not exist or is outside the caller's scope; callers
    /// cannot tell which.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    /// A write aimed outside the bound tenant, or an operation attempted
    /// without a binding.
    #[error("isolation violation: {0}")]
    IsolationViolation(String),

    #[error("cross-tenant reference on {reference}: {detail}")]
    CrossTenantReference {
        reference: AssignmentReference,
        detail: String,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    MigrationFailed(#[from] MigrationError),

    #[error("Validation failed: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("invalid tenant transition: {from} -> {to}")]
    InvalidTransition { from: TenantStatus, to: TenantStatus },

    #[error("unauthenticated: {0}")]
    Unauthenticated(&'static str),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("Database error: {message}")]
    Database { message: String },
}

impl DomainError {
    #[must_use]
    pub fn not_found(entity: &'static str, id: Uuid) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    #[must_use]
    pub fn invalid_transition(from: TenantStatus, to: TenantStatus) -> Self {
        Self::InvalidTransition { from, to }
    }
}

impl From<ReferenceViolation> for DomainError {
    fn from(v: ReferenceViolation) -> Self {
        Self::CrossTenantReference {
            reference: v.reference,
            detail: v.to_string(),
        }
    }
}

impl From<SecurityError> for DomainError {
    fn from(e: SecurityError) -> Self {
        match e {
            SecurityError::Unbound => Self::IsolationViolation(e.to_string()),
            SecurityError::CrossTenantDenied { .. }
            | SecurityError::MissingReason
            | SecurityError::UnknownRole(_) => Self::Forbidden(e.to_string()),
        }
    }
}

impl From<DbError> for DomainError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::Security(sec) => sec.into(),
            DbError::Sea(err) => crate::infra::storage::db_err(err),
            other => Self::database(other.to_string()),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::domain::validator::ReferenceProblem;
    use umroh_security::Role;

    #[test]
    fn unbound_binding_is_an_isolation_violation() {
        let err: DomainError = DbError::Security(SecurityError::Unbound).into();
        assert!(matches!(err, DomainError::IsolationViolation(_)));
    }

    #[test]
    fn denied_cross_tenant_path_is_forbidden() {
        let err: DomainError = SecurityError::CrossTenantDenied { role: Role::Admin }.into();
        assert!(matches!(err, DomainError::Forbidden(_)));
    }

    #[test]
    fn reference_violation_names_the_column() {
        let err: DomainError = ReferenceViolation {
            reference: AssignmentReference::Agent,
            id: Uuid::nil(),
            problem: ReferenceProblem::Missing,
        }
        .into();
        assert!(err.to_string().contains("agent_id"));
    }
}
