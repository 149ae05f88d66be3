use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, info};
use umroh_db::Db;
use umroh_security::AuthorizationContext;
use uuid::Uuid;

use super::{random_token, require_elevated, tokens_match};
use crate::domain::error::DomainError;
use crate::domain::model::{
    DomainVerification, NewTenant, Nullable, ResourceLimits, Tenant, TenantChanges, TenantStatus,
};
use crate::domain::repos::TenantsRepository;

const MAX_SLUG_LEN: usize = 63;

/// Decides the column changes of a lifecycle step, given the current row.
type Prepare = fn(&Tenant, OffsetDateTime) -> Result<TenantChanges, DomainError>;

/// Tenant registry.
///
/// Creation and lifecycle steps are platform operations: they run on the
/// audited cross-tenant path and need `super_admin`. Owner verification and
/// custom-domain proof are run by the tenant's own elevated users.
#[derive(Clone)]
pub struct TenantService<TR> {
    db: Db,
    repo: Arc<TR>,
}

impl<TR> std::fmt::Debug for TenantService<TR> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantService").finish_non_exhaustive()
    }
}

impl<TR> TenantService<TR>
where
    TR: TenantsRepository + 'static,
{
    #[must_use]
    pub fn new(db: Db, repo: Arc<TR>) -> Self {
        Self { db, repo }
    }

    /// Register a tenant in `pending`.
    ///
    /// # Errors
    /// `Forbidden` unless the caller is `super_admin`, `Validation` for a bad
    /// name or slug, `Conflict` for a taken slug.
    #[tracing::instrument(skip_all, fields(slug = %new.slug))]
    pub async fn create(
        &self,
        ctx: &AuthorizationContext,
        new: NewTenant,
    ) -> Result<Tenant, DomainError> {
        let name = new.name.trim().to_owned();
        if name.is_empty() {
            return Err(DomainError::validation("name", "must not be empty"));
        }
        validate_slug(&new.slug)?;

        let now = OffsetDateTime::now_utc();
        let tenant = Tenant {
            id: Uuid::new_v4(),
            name,
            slug: new.slug,
            status: TenantStatus::Pending,
            tier: new.tier,
            limits: new.limits.unwrap_or_else(|| ResourceLimits::for_tier(new.tier)),
            owner_email: new.owner_email.map(|e| e.trim().to_lowercase()),
            owner_phone: new.owner_phone,
            owner_verified_at: None,
            domain: DomainVerification::NoDomain,
            activated_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        let reason = format!("register tenant '{}'", tenant.slug);
        let repo = Arc::clone(&self.repo);
        let created = self
            .db
            .admin_unit_of_work(ctx, &reason, move |tx, scope| {
                Box::pin(async move { repo.insert(tx, &scope, tenant).await })
            })
            .await?;

        info!(tenant_id = %created.id, "tenant registered");
        Ok(created)
    }

    /// The caller's own tenant. Any other id reads as not found.
    ///
    /// # Errors
    /// `NotFound` when `id` is absent or outside the caller's tenant.
    #[tracing::instrument(skip_all, fields(tenant_id = %id))]
    pub async fn get(&self, ctx: &AuthorizationContext, id: Uuid) -> Result<Tenant, DomainError> {
        let scope = ctx.scope().prepare();
        let repo = Arc::clone(&self.repo);
        self.db
            .unit_of_work(ctx, move |tx| {
                Box::pin(async move {
                    repo.get(tx, &scope, id)
                        .await?
                        .ok_or_else(|| DomainError::not_found("tenant", id))
                })
            })
            .await
    }

    /// Every tenant, on the audited path.
    ///
    /// # Errors
    /// `Forbidden` unless the caller is `super_admin` and gives a reason.
    #[tracing::instrument(skip_all)]
    pub async fn list_all(
        &self,
        ctx: &AuthorizationContext,
        reason: &str,
    ) -> Result<Vec<Tenant>, DomainError> {
        let repo = Arc::clone(&self.repo);
        self.db
            .admin_unit_of_work(ctx, reason, move |tx, scope| {
                Box::pin(async move { repo.list(tx, &scope).await })
            })
            .await
    }

    /// `pending -> active`. The owner must have a verified email or phone.
    ///
    /// # Errors
    /// `InvalidTransition` unless the tenant is pending, `Validation` when the
    /// owner is unverified.
    pub async fn activate(
        &self,
        ctx: &AuthorizationContext,
        id: Uuid,
    ) -> Result<Tenant, DomainError> {
        self.transition(ctx, id, TenantStatus::Active, |t, now| {
            if t.status != TenantStatus::Pending {
                return Err(DomainError::invalid_transition(t.status, TenantStatus::Active));
            }
            let has_contact = t.owner_email.is_some() || t.owner_phone.is_some();
            if t.owner_verified_at.is_none() || !has_contact {
                return Err(DomainError::validation(
                    "owner",
                    "owner email or phone must be verified before activation",
                ));
            }
            Ok(TenantChanges {
                activated_at: Some(now),
                ..TenantChanges::default()
            })
        })
        .await
    }

    /// # Errors
    /// `InvalidTransition` unless the tenant is active.
    pub async fn suspend(
        &self,
        ctx: &AuthorizationContext,
        id: Uuid,
    ) -> Result<Tenant, DomainError> {
        self.transition(ctx, id, TenantStatus::Suspended, |_, _| {
            Ok(TenantChanges::default())
        })
        .await
    }

    /// `suspended | inactive -> active`. A deleted tenant never comes back.
    ///
    /// # Errors
    /// `InvalidTransition` from any other status.
    pub async fn reactivate(
        &self,
        ctx: &AuthorizationContext,
        id: Uuid,
    ) -> Result<Tenant, DomainError> {
        self.transition(ctx, id, TenantStatus::Active, |t, _| {
            if matches!(t.status, TenantStatus::Suspended | TenantStatus::Inactive) {
                Ok(TenantChanges::default())
            } else {
                Err(DomainError::invalid_transition(t.status, TenantStatus::Active))
            }
        })
        .await
    }

    /// # Errors
    /// `InvalidTransition` unless the tenant is active or suspended.
    pub async fn deactivate(
        &self,
        ctx: &AuthorizationContext,
        id: Uuid,
    ) -> Result<Tenant, DomainError> {
        self.transition(ctx, id, TenantStatus::Inactive, |_, _| {
            Ok(TenantChanges::default())
        })
        .await
    }

    /// Provisioning failed. `failed -> pending` through
    /// [`retry_provisioning`](Self::retry_provisioning).
    ///
    /// # Errors
    /// `InvalidTransition` unless the tenant is pending.
    pub async fn mark_failed(
        &self,
        ctx: &AuthorizationContext,
        id: Uuid,
    ) -> Result<Tenant, DomainError> {
        self.transition(ctx, id, TenantStatus::Failed, |_, _| {
            Ok(TenantChanges::default())
        })
        .await
    }

    /// # Errors
    /// `InvalidTransition` unless the tenant is failed.
    pub async fn retry_provisioning(
        &self,
        ctx: &AuthorizationContext,
        id: Uuid,
    ) -> Result<Tenant, DomainError> {
        self.transition(ctx, id, TenantStatus::Pending, |_, _| {
            Ok(TenantChanges::default())
        })
        .await
    }

    /// Mark the tenant deleted. The row stays for audit.
    ///
    /// # Errors
    /// `InvalidTransition` when already deleted.
    pub async fn soft_delete(
        &self,
        ctx: &AuthorizationContext,
        id: Uuid,
    ) -> Result<Tenant, DomainError> {
        self.transition(ctx, id, TenantStatus::Deleted, |_, now| {
            Ok(TenantChanges {
                deleted_at: Some(now),
                ..TenantChanges::default()
            })
        })
        .await
    }

    /// Replace the subscription limits. Stored only; other subsystems enforce
    /// them.
    ///
    /// # Errors
    /// `Forbidden` unless the caller is `super_admin`, `NotFound` for an
    /// unknown tenant.
    #[tracing::instrument(skip_all, fields(tenant_id = %id))]
    pub async fn update_limits(
        &self,
        ctx: &AuthorizationContext,
        id: Uuid,
        limits: ResourceLimits,
    ) -> Result<Tenant, DomainError> {
        let reason = format!("update limits of tenant {id}");
        let repo = Arc::clone(&self.repo);
        self.db
            .admin_unit_of_work(ctx, &reason, move |tx, scope| {
                Box::pin(async move {
                    if repo.get(tx, &scope, id).await?.is_none() {
                        return Err(DomainError::not_found("tenant", id));
                    }
                    let changes = TenantChanges {
                        limits: Some(limits),
                        ..TenantChanges::default()
                    };
                    repo.update(tx, &scope, id, changes).await
                })
            })
            .await
    }

    /// Record that the owner's contact was verified out of band.
    ///
    /// # Errors
    /// `Forbidden` for non-elevated callers, `NotFound` outside the caller's
    /// tenant.
    #[tracing::instrument(skip_all, fields(tenant_id = %id))]
    pub async fn mark_owner_verified(
        &self,
        ctx: &AuthorizationContext,
        id: Uuid,
    ) -> Result<Tenant, DomainError> {
        require_elevated(ctx, "verify the tenant owner")?;
        self.update_own(ctx, id, |t, now| {
            if t.owner_email.is_none() && t.owner_phone.is_none() {
                return Err(DomainError::validation(
                    "owner",
                    "tenant has no owner email or phone",
                ));
            }
            Ok(TenantChanges {
                owner_verified_at: Some(now),
                ..TenantChanges::default()
            })
        })
        .await
    }

    /// Set or clear the custom domain. Any earlier proof is discarded.
    ///
    /// # Errors
    /// `Validation` for a malformed domain, `Conflict` when another tenant
    /// holds it.
    #[tracing::instrument(skip_all, fields(tenant_id = %id))]
    pub async fn set_custom_domain(
        &self,
        ctx: &AuthorizationContext,
        id: Uuid,
        domain: Option<String>,
    ) -> Result<Tenant, DomainError> {
        require_elevated(ctx, "change the custom domain")?;
        let domain = domain.map(|d| normalize_domain(&d)).transpose()?;

        let scope = ctx.scope().prepare();
        let repo = Arc::clone(&self.repo);
        self.db
            .unit_of_work(ctx, move |tx| {
                Box::pin(async move {
                    if repo.get(tx, &scope, id).await?.is_none() {
                        return Err(DomainError::not_found("tenant", id));
                    }
                    let changes = TenantChanges {
                        custom_domain: domain.map_or(Nullable::Clear, Nullable::Set),
                        domain_verification_token: Nullable::Clear,
                        domain_verified_at: Nullable::Clear,
                        ..TenantChanges::default()
                    };
                    repo.update(tx, &scope, id, changes).await
                })
            })
            .await
    }

    /// Issue a fresh ownership token for the custom domain. The tenant
    /// publishes it (e.g. as a DNS TXT record) and then calls
    /// [`verify_domain`](Self::verify_domain).
    ///
    /// # Errors
    /// `Validation` when no domain is set, `Conflict` when it is already
    /// verified.
    #[tracing::instrument(skip_all, fields(tenant_id = %id))]
    pub async fn issue_domain_verification(
        &self,
        ctx: &AuthorizationContext,
        id: Uuid,
    ) -> Result<String, DomainError> {
        require_elevated(ctx, "verify the custom domain")?;
        let token = random_token();
        let issued = token.clone();
        self.update_own(ctx, id, move |t, _| match &t.domain {
            DomainVerification::NoDomain => Err(DomainError::validation(
                "custom_domain",
                "no custom domain set",
            )),
            DomainVerification::Verified { .. } => {
                Err(DomainError::conflict("custom domain already verified"))
            }
            DomainVerification::Unverified { .. } | DomainVerification::TokenIssued { .. } => {
                Ok(TenantChanges {
                    domain_verification_token: Nullable::Set(issued),
                    ..TenantChanges::default()
                })
            }
        })
        .await?;
        Ok(token)
    }

    /// Prove domain ownership with the token from
    /// [`issue_domain_verification`](Self::issue_domain_verification).
    ///
    /// # Errors
    /// `Validation` when no token is pending or `presented` does not match.
    #[tracing::instrument(skip_all, fields(tenant_id = %id))]
    pub async fn verify_domain(
        &self,
        ctx: &AuthorizationContext,
        id: Uuid,
        presented: &str,
    ) -> Result<Tenant, DomainError> {
        require_elevated(ctx, "verify the custom domain")?;
        let presented = presented.trim().to_owned();
        let scope = ctx.scope().prepare();
        let repo = Arc::clone(&self.repo);
        let tenant = self
            .db
            .unit_of_work(ctx, move |tx| {
                Box::pin(async move {
                    let Some(expected) = repo.verification_token(tx, &scope, id).await? else {
                        return Err(DomainError::validation(
                            "domain_verification_token",
                            "no verification pending",
                        ));
                    };
                    if !tokens_match(&expected, &presented) {
                        return Err(DomainError::validation(
                            "domain_verification_token",
                            "token does not match",
                        ));
                    }
                    let changes = TenantChanges {
                        domain_verification_token: Nullable::Clear,
                        domain_verified_at: Nullable::Set(OffsetDateTime::now_utc()),
                        ..TenantChanges::default()
                    };
                    repo.update(tx, &scope, id, changes).await
                })
            })
            .await?;
        info!(domain = tenant.domain.domain().unwrap_or_default(), "custom domain verified");
        Ok(tenant)
    }

    async fn update_own<P>(
        &self,
        ctx: &AuthorizationContext,
        id: Uuid,
        prepare: P,
    ) -> Result<Tenant, DomainError>
    where
        P: FnOnce(&Tenant, OffsetDateTime) -> Result<TenantChanges, DomainError> + Send + 'static,
    {
        let scope = ctx.scope().prepare();
        let repo = Arc::clone(&self.repo);
        self.db
            .unit_of_work(ctx, move |tx| {
                Box::pin(async move {
                    let current = repo
                        .get(tx, &scope, id)
                        .await?
                        .ok_or_else(|| DomainError::not_found("tenant", id))?;
                    let changes = prepare(&current, OffsetDateTime::now_utc())?;
                    repo.update(tx, &scope, id, changes).await
                })
            })
            .await
    }

    #[tracing::instrument(skip_all, fields(tenant_id = %id, to = %to))]
    async fn transition(
        &self,
        ctx: &AuthorizationContext,
        id: Uuid,
        to: TenantStatus,
        prepare: Prepare,
    ) -> Result<Tenant, DomainError> {
        let reason = format!("move tenant {id} to {to}");
        let repo = Arc::clone(&self.repo);
        let tenant = self
            .db
            .admin_unit_of_work(ctx, &reason, move |tx, scope| {
                Box::pin(async move {
                    let current = repo
                        .get(tx, &scope, id)
                        .await?
                        .ok_or_else(|| DomainError::not_found("tenant", id))?;
                    if !current.status.can_transition_to(to) {
                        return Err(DomainError::invalid_transition(current.status, to));
                    }
                    let mut changes = prepare(&current, OffsetDateTime::now_utc())?;
                    changes.status = Some(to);
                    debug!(from = %current.status, "tenant transition allowed");
                    repo.update(tx, &scope, id, changes).await
                })
            })
            .await?;
        info!(status = %tenant.status, "tenant status changed");
        Ok(tenant)
    }
}

fn validate_slug(slug: &str) -> Result<(), DomainError> {
    if slug.is_empty() || slug.len() > MAX_SLUG_LEN {
        return Err(DomainError::validation(
            "slug",
            format!("must be 1 to {MAX_SLUG_LEN} characters"),
        ));
    }
    if !slug
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err(DomainError::validation(
            "slug",
            "only lowercase letters, digits and '-' are allowed",
        ));
    }
    if slug.starts_with('-') || slug.ends_with('-') {
        return Err(DomainError::validation(
            "slug",
            "must not start or end with '-'",
        ));
    }
    Ok(())
}

fn normalize_domain(domain: &str) -> Result<String, DomainError> {
    let domain = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    let labels_ok = domain.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
    });
    if !domain.contains('.') || !labels_ok {
        return Err(DomainError::validation(
            "custom_domain",
            format!("'{domain}' is not a valid host name"),
        ));
    }
    Ok(domain)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn slugs() {
        assert!(validate_slug("al-hijrah-2025").is_ok());
        assert!(validate_slug("").is_err());
        assert!(validate_slug("Al-Hijrah").is_err());
        assert!(validate_slug("-hijrah").is_err());
        assert!(validate_slug("al hijrah").is_err());
        assert!(validate_slug(&"a".repeat(MAX_SLUG_LEN + 1)).is_err());
    }

    #[test]
    fn domains_are_normalized() {
        assert_eq!(
            normalize_domain(" Umroh.AlHijrah.test. ").unwrap(),
            "umroh.alhijrah.test"
        );
        assert!(normalize_domain("localhost").is_err());
        assert!(normalize_domain("bad..domain").is_err());
        assert!(normalize_domain("under_score.test").is_err());
    }
}
