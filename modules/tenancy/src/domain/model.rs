//! Domain types of the tenancy module.

use std::fmt;
use std::str::FromStr;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use umroh_security::Role;
use uuid::Uuid;

use crate::domain::error::DomainError;

/// Declares a closed string-backed enum together with its database spelling.
///
/// Each value set is mirrored by a `CHECK` constraint in the migrations, so
/// adding a variant is a schema change.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(DomainError::validation(
                        stringify!($name),
                        format!("unknown value '{other}'"),
                    )),
                }
            }
        }
    };
}

string_enum!(
    /// Main lifecycle of a tenant.
    TenantStatus {
        Pending => "pending",
        Active => "active",
        Suspended => "suspended",
        Inactive => "inactive",
        Failed => "failed",
        Deleted => "deleted",
    }
);

string_enum!(
    TenantTier {
        Basic => "basic",
        Premium => "premium",
        Enterprise => "enterprise",
    }
);

string_enum!(
    UserStatus {
        Active => "active",
        Inactive => "inactive",
        Suspended => "suspended",
        PendingVerification => "pending_verification",
    }
);

impl TenantStatus {
    /// Allowed lifecycle edges. `deleted` is terminal.
    #[must_use]
    pub fn can_transition_to(self, next: TenantStatus) -> bool {
        use TenantStatus::{Active, Deleted, Failed, Inactive, Pending, Suspended};
        matches!(
            (self, next),
            (Pending, Active | Failed | Deleted)
                | (Active, Suspended | Inactive | Deleted)
                | (Suspended, Active | Inactive | Deleted)
                | (Inactive, Active | Deleted)
                | (Failed, Pending | Deleted)
        )
    }
}

/// Upper bounds a tenant's subscription grants. Stored as a JSON blob; the
/// counters they bound live in other subsystems, which enforce them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourceLimits {
    pub max_agents: u32,
    pub max_monthly_jamaah: u32,
    pub max_landing_pages: u32,
    pub max_storage_mb: u64,
}

impl ResourceLimits {
    #[must_use]
    pub fn for_tier(tier: TenantTier) -> Self {
        match tier {
            TenantTier::Basic => Self {
                max_agents: 5,
                max_monthly_jamaah: 100,
                max_landing_pages: 1,
                max_storage_mb: 1_024,
            },
            TenantTier::Premium => Self {
                max_agents: 25,
                max_monthly_jamaah: 1_000,
                max_landing_pages: 5,
                max_storage_mb: 10_240,
            },
            TenantTier::Enterprise => Self {
                max_agents: 250,
                max_monthly_jamaah: 20_000,
                max_landing_pages: 50,
                max_storage_mb: 102_400,
            },
        }
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self::for_tier(TenantTier::Basic)
    }
}

/// Custom-domain ownership proof, tracked apart from [`TenantStatus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainVerification {
    NoDomain,
    Unverified { domain: String },
    TokenIssued { domain: String },
    Verified { domain: String, at: OffsetDateTime },
}

impl DomainVerification {
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        match self {
            Self::NoDomain => None,
            Self::Unverified { domain }
            | Self::TokenIssued { domain }
            | Self::Verified { domain, .. } => Some(domain),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub status: TenantStatus,
    pub tier: TenantTier,
    pub limits: ResourceLimits,
    pub owner_email: Option<String>,
    pub owner_phone: Option<String>,
    pub owner_verified_at: Option<OffsetDateTime>,
    pub domain: DomainVerification,
    pub activated_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub deleted_at: Option<OffsetDateTime>,
}

#[derive(Debug, Clone)]
pub struct NewTenant {
    pub name: String,
    pub slug: String,
    pub tier: TenantTier,
    pub owner_email: Option<String>,
    pub owner_phone: Option<String>,
    /// Defaults to [`ResourceLimits::for_tier`].
    pub limits: Option<ResourceLimits>,
}

/// Update of a nullable column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nullable<T> {
    Keep,
    Clear,
    Set(T),
}

impl<T> Default for Nullable<T> {
    fn default() -> Self {
        Self::Keep
    }
}

/// Column changes for a tenant row. `None` / [`Nullable::Keep`] leave a
/// column untouched.
#[derive(Debug, Clone, Default)]
pub struct TenantChanges {
    pub status: Option<TenantStatus>,
    pub limits: Option<ResourceLimits>,
    pub owner_verified_at: Option<OffsetDateTime>,
    pub activated_at: Option<OffsetDateTime>,
    pub deleted_at: Option<OffsetDateTime>,
    pub custom_domain: Nullable<String>,
    pub domain_verification_token: Nullable<String>,
    pub domain_verified_at: Nullable<OffsetDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub status: UserStatus,
    pub failed_login_attempts: u32,
    pub locked_until: Option<OffsetDateTime>,
    pub last_login_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    #[must_use]
    pub fn is_locked(&self, now: OffsetDateTime) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub role: Role,
}

#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub status: Option<UserStatus>,
    pub failed_login_attempts: Option<u32>,
    pub locked_until: Nullable<OffsetDateTime>,
    pub last_login_at: Option<OffsetDateTime>,
}

/// A refresh-token-bearing session. The token itself is never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub is_active: bool,
    pub revoked_at: Option<OffsetDateTime>,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

impl Session {
    #[must_use]
    pub fn is_live(&self, now: OffsetDateTime) -> bool {
        self.is_active && self.revoked_at.is_none() && self.expires_at > now
    }
}

/// What a successful login or refresh hands back to the caller.
#[derive(Debug)]
pub struct IssuedSession {
    pub session: Session,
    pub access_token: SecretString,
    pub access_expires_at: OffsetDateTime,
    /// Returned once; only its SHA-256 is kept.
    pub refresh_token: SecretString,
}

/// Whether an assignment is live. Revocation is recorded, never erased.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentState {
    Active,
    Revoked { at: OffsetDateTime, by: Uuid },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JamaahAssignment {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub jamaah_id: Uuid,
    pub agent_id: Uuid,
    pub assigned_by_id: Uuid,
    pub assigned_at: OffsetDateTime,
    pub state: AssignmentState,
}

impl JamaahAssignment {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state == AssignmentState::Active
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GrantRequest {
    pub jamaah_id: Uuid,
    pub agent_id: Uuid,
}

/// Filter for the assignment audit listing.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssignmentFilter {
    pub jamaah_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    /// Include revoked rows (the audit path).
    pub include_revoked: bool,
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn deleted_is_terminal() {
        for next in TenantStatus::ALL {
            assert!(!TenantStatus::Deleted.can_transition_to(*next));
        }
    }

    #[test]
    fn lifecycle_edges() {
        use TenantStatus::{Active, Failed, Inactive, Pending, Suspended};
        assert!(Pending.can_transition_to(Active));
        assert!(Active.can_transition_to(Suspended));
        assert!(Suspended.can_transition_to(Active));
        assert!(Failed.can_transition_to(Pending));
        assert!(!Pending.can_transition_to(Suspended));
        assert!(!Failed.can_transition_to(Active));
        assert!(!Inactive.can_transition_to(Suspended));
    }

    #[test]
    fn enums_parse_their_database_spelling() {
        for s in UserStatus::ALL {
            assert_eq!(s.as_str().parse::<UserStatus>().unwrap(), *s);
        }
        assert_eq!(
            "pending_verification".parse::<UserStatus>().unwrap(),
            UserStatus::PendingVerification
        );
        assert!("archived".parse::<TenantStatus>().is_err());
    }

    #[test]
    fn lock_expires() {
        let now = OffsetDateTime::now_utc();
        let mut user = User {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            email: "a@b.test".to_owned(),
            full_name: "A".to_owned(),
            phone: None,
            role: Role::Jamaah,
            status: UserStatus::Active,
            failed_login_attempts: 0,
            locked_until: Some(now + time::Duration::minutes(5)),
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        assert!(user.is_locked(now));
        user.locked_until = Some(now - time::Duration::seconds(1));
        assert!(!user.is_locked(now));
    }

    #[test]
    fn limits_blob_accepts_partial_json() {
        let limits: ResourceLimits =
            serde_json::from_value(serde_json::json!({ "max_agents": 7 })).unwrap();
        assert_eq!(limits.max_agents, 7);
        assert_eq!(limits.max_landing_pages, ResourceLimits::default().max_landing_pages);
    }
}
