use tracing::warn;
use uuid::Uuid;

use crate::constants::AUDIT_TARGET;
use crate::{AccessScope, Role, SecurityError, SubjectConstraint};

/// The three values bound to every unit of work: tenant, user and role.
///
/// Always derived from a verified access token. A context missing any of the
/// three is *unbound* and every scope built from it denies all rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationContext {
    tenant_id: Uuid,
    user_id: Uuid,
    role: Option<Role>,
}

impl AuthorizationContext {
    #[must_use]
    pub fn builder() -> AuthorizationContextBuilder {
        AuthorizationContextBuilder::default()
    }

    /// A context with nothing bound. Useful as the starting state of a request.
    #[must_use]
    pub fn anonymous() -> Self {
        AuthorizationContextBuilder::default().build()
    }

    #[must_use]
    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    #[must_use]
    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    #[must_use]
    pub fn is_bound(&self) -> bool {
        !self.tenant_id.is_nil() && !self.user_id.is_nil() && self.role.is_some()
    }

    /// # Errors
    /// Returns [`SecurityError::Unbound`] when tenant, user or role is missing.
    pub fn ensure_bound(&self) -> Result<Role, SecurityError> {
        match self.role {
            Some(role) if self.is_bound() => Ok(role),
            _ => Err(SecurityError::Unbound),
        }
    }

    #[must_use]
    pub fn is_elevated(&self) -> bool {
        self.is_bound() && self.role.is_some_and(Role::is_elevated)
    }

    /// Start building the access scope for this context.
    #[must_use]
    pub fn scope(&self) -> AccessScopeResolver {
        AccessScopeResolver {
            context: self.clone(),
            visible_jamaah: None,
        }
    }

    /// The audited administrative path: a scope without a tenant predicate.
    ///
    /// Only `super_admin` may obtain it, and every issuance is logged on the
    /// audit target.
    ///
    /// # Errors
    /// - [`SecurityError::Unbound`] for an unbound context
    /// - [`SecurityError::CrossTenantDenied`] for any role other than `super_admin`
    /// - [`SecurityError::MissingReason`] when `reason` is blank
    pub fn cross_tenant_scope(&self, reason: &str) -> Result<AccessScope, SecurityError> {
        self.authorize_cross_tenant(reason)?;
        warn!(
            target: AUDIT_TARGET,
            tenant_id = %self.tenant_id,
            user_id = %self.user_id,
            reason,
            "cross-tenant scope issued"
        );
        Ok(AccessScope::root())
    }

    /// Check that this context may use the cross-tenant path, without issuing a scope.
    ///
    /// # Errors
    /// Same conditions as [`Self::cross_tenant_scope`].
    pub fn authorize_cross_tenant(&self, reason: &str) -> Result<(), SecurityError> {
        let role = self.ensure_bound()?;
        if role != Role::SuperAdmin {
            return Err(SecurityError::CrossTenantDenied { role });
        }
        if reason.trim().is_empty() {
            return Err(SecurityError::MissingReason);
        }
        Ok(())
    }
}

/// Turns a context into an [`AccessScope`].
///
/// Agents need the set of pilgrims they are assigned to; callers resolve it
/// (see the assignment subsystem) and pass it via
/// [`include_visible_jamaah`](Self::include_visible_jamaah). When it is not
/// supplied the agent sees only rows it owns.
#[derive(Debug)]
pub struct AccessScopeResolver {
    context: AuthorizationContext,
    visible_jamaah: Option<Vec<Uuid>>,
}

impl AccessScopeResolver {
    #[must_use]
    pub fn include_visible_jamaah(mut self, jamaah_ids: Vec<Uuid>) -> Self {
        self.visible_jamaah = Some(jamaah_ids);
        self
    }

    /// True when [`prepare`](Self::prepare) would use a visible-pilgrim set.
    #[must_use]
    pub fn needs_visible_jamaah(&self) -> bool {
        self.context.is_bound() && self.context.role == Some(Role::Agent)
    }

    #[must_use]
    pub fn prepare(self) -> AccessScope {
        let Ok(role) = self.context.ensure_bound() else {
            return AccessScope::deny_all();
        };
        let tenant = AccessScope::tenant(self.context.tenant_id);
        let me = self.context.user_id;

        match role {
            Role::SuperAdmin | Role::AgencyOwner | Role::Admin => tenant,
            Role::Agent => tenant.narrowed(SubjectConstraint::new(
                me,
                self.visible_jamaah.unwrap_or_default(),
            )),
            Role::Jamaah => tenant.narrowed(SubjectConstraint::new(me, vec![me])),
            Role::Affiliate | Role::Family => {
                tenant.narrowed(SubjectConstraint::new(me, Vec::new()))
            }
        }
    }
}

#[derive(Default, Debug)]
pub struct AuthorizationContextBuilder {
    tenant_id: Option<Uuid>,
    user_id: Option<Uuid>,
    role: Option<Role>,
}

impl AuthorizationContextBuilder {
    #[must_use]
    pub fn tenant_id(mut self, tenant_id: Uuid) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    #[must_use]
    pub fn user_id(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    #[must_use]
    pub fn role(mut self, role: Role) -> Self {
        self.role = Some(role);
        self
    }

    #[must_use]
    pub fn build(self) -> AuthorizationContext {
        AuthorizationContext {
            tenant_id: self.tenant_id.unwrap_or_default(),
            user_id: self.user_id.unwrap_or_default(),
            role: self.role,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    fn ctx(role: Role) -> AuthorizationContext {
        AuthorizationContext::builder()
            .tenant_id(Uuid::new_v4())
            .user_id(Uuid::new_v4())
            .role(role)
            .build()
    }

    #[test]
    fn anonymous_context_prepares_deny_all() {
        let scope = AuthorizationContext::anonymous().scope().prepare();
        assert!(scope.is_empty());
    }

    #[test]
    fn missing_role_is_unbound() {
        let c = AuthorizationContext::builder()
            .tenant_id(Uuid::new_v4())
            .user_id(Uuid::new_v4())
            .build();
        assert!(!c.is_bound());
        assert_eq!(c.ensure_bound(), Err(SecurityError::Unbound));
        assert!(c.scope().prepare().is_empty());
    }

    #[test]
    fn elevated_roles_get_plain_tenant_scope() {
        for role in [Role::AgencyOwner, Role::Admin, Role::SuperAdmin] {
            let c = ctx(role);
            let scope = c.scope().prepare();
            assert_eq!(scope.tenant_ids(), &[c.tenant_id()]);
            assert!(scope.subject().is_none());
        }
    }

    #[test]
    fn agent_scope_carries_visible_jamaah() {
        let c = ctx(Role::Agent);
        let p1 = Uuid::new_v4();
        let resolver = c.scope();
        assert!(resolver.needs_visible_jamaah());
        let scope = resolver.include_visible_jamaah(vec![p1]).prepare();
        let subject = scope.subject().unwrap();
        assert_eq!(subject.owner_id(), c.user_id());
        assert_eq!(subject.jamaah_ids(), &[p1]);
    }

    #[test]
    fn agent_without_visible_set_sees_only_owned_rows() {
        let c = ctx(Role::Agent);
        let scope = c.scope().prepare();
        assert!(scope.subject().unwrap().jamaah_ids().is_empty());
    }

    #[test]
    fn jamaah_sees_itself() {
        let c = ctx(Role::Jamaah);
        let scope = c.scope().prepare();
        assert_eq!(scope.subject().unwrap().jamaah_ids(), &[c.user_id()]);
    }

    #[test]
    fn cross_tenant_scope_requires_super_admin() {
        let err = ctx(Role::AgencyOwner)
            .cross_tenant_scope("support ticket 42")
            .unwrap_err();
        assert_eq!(
            err,
            SecurityError::CrossTenantDenied {
                role: Role::AgencyOwner
            }
        );
    }

    #[test]
    fn cross_tenant_scope_requires_reason() {
        let err = ctx(Role::SuperAdmin).cross_tenant_scope("  ").unwrap_err();
        assert_eq!(err, SecurityError::MissingReason);
    }

    #[test]
    fn super_admin_gets_root_scope() {
        let scope = ctx(Role::SuperAdmin)
            .cross_tenant_scope("tenant provisioning")
            .unwrap();
        assert!(scope.is_root());
    }
}
