//! Conversions between sea-orm models and domain types.
//!
//! Enum columns are CHECK-constrained text, so a value that fails to parse
//! here means the row was written around the schema; it surfaces as a
//! database error rather than a panic.

use umroh_security::Role;

use crate::domain::error::DomainError;
use crate::domain::model::{
    AssignmentState, DomainVerification, JamaahAssignment, ResourceLimits, Session, Tenant,
    TenantStatus, TenantTier, User, UserStatus,
};
use crate::infra::storage::entity::{jamaah_assignment, session, tenant, user};

fn corrupt(entity: &str, column: &str, err: impl std::fmt::Display) -> DomainError {
    DomainError::database(format!("corrupt {entity}.{column}: {err}"))
}

impl TryFrom<tenant::Model> for Tenant {
    type Error = DomainError;

    fn try_from(m: tenant::Model) -> Result<Self, Self::Error> {
        let status: TenantStatus = m
            .status
            .parse()
            .map_err(|e| corrupt("tenants", "status", e))?;
        let tier: TenantTier = m.tier.parse().map_err(|e| corrupt("tenants", "tier", e))?;
        let limits: ResourceLimits = serde_json::from_value(m.resource_limits)
            .map_err(|e| corrupt("tenants", "resource_limits", e))?;

        let domain = match (m.custom_domain, m.domain_verification_token, m.domain_verified_at) {
            (None, _, _) => DomainVerification::NoDomain,
            (Some(domain), _, Some(at)) => DomainVerification::Verified { domain, at },
            (Some(domain), Some(_), None) => DomainVerification::TokenIssued { domain },
            (Some(domain), None, None) => DomainVerification::Unverified { domain },
        };

        Ok(Self {
            id: m.id,
            name: m.name,
            slug: m.slug,
            status,
            tier,
            limits,
            owner_email: m.owner_email,
            owner_phone: m.owner_phone,
            owner_verified_at: m.owner_verified_at,
            domain,
            activated_at: m.activated_at,
            created_at: m.created_at,
            updated_at: m.updated_at,
            deleted_at: m.deleted_at,
        })
    }
}

impl TryFrom<user::Model> for User {
    type Error = DomainError;

    fn try_from(m: user::Model) -> Result<Self, Self::Error> {
        let role: Role = m.role.parse().map_err(|e| corrupt("users", "role", e))?;
        let status: UserStatus = m.status.parse().map_err(|e| corrupt("users", "status", e))?;
        let failed_login_attempts = u32::try_from(m.failed_login_attempts)
            .map_err(|e| corrupt("users", "failed_login_attempts", e))?;
        Ok(Self {
            id: m.id,
            tenant_id: m.tenant_id,
            email: m.email,
            full_name: m.full_name,
            phone: m.phone,
            role,
            status,
            failed_login_attempts,
            locked_until: m.locked_until,
            last_login_at: m.last_login_at,
            created_at: m.created_at,
            updated_at: m.updated_at,
        })
    }
}

impl From<session::Model> for Session {
    fn from(m: session::Model) -> Self {
        Self {
            id: m.id,
            tenant_id: m.tenant_id,
            user_id: m.user_id,
            is_active: m.is_active,
            revoked_at: m.revoked_at,
            expires_at: m.expires_at,
            created_at: m.created_at,
        }
    }
}

impl TryFrom<jamaah_assignment::Model> for JamaahAssignment {
    type Error = DomainError;

    fn try_from(m: jamaah_assignment::Model) -> Result<Self, Self::Error> {
        let state = match (m.deleted_at, m.revoked_by_id) {
            (None, None) => AssignmentState::Active,
            (Some(at), Some(by)) => AssignmentState::Revoked { at, by },
            _ => {
                return Err(corrupt(
                    "jamaah_assignments",
                    "deleted_at",
                    "revocation time and revoker must be set together",
                ));
            }
        };
        Ok(Self {
            id: m.id,
            tenant_id: m.tenant_id,
            jamaah_id: m.jamaah_id,
            agent_id: m.agent_id,
            assigned_by_id: m.assigned_by_id,
            assigned_at: m.assigned_at,
            state,
        })
    }
}
