use uuid::Uuid;

/// Narrows a tenant scope to rows the caller owns or was assigned.
///
/// Applied only to entities that declare an owner or pilgrim column; entities
/// with neither are filtered by tenant alone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubjectConstraint {
    owner_id: Uuid,
    jamaah_ids: Vec<Uuid>,
}

impl SubjectConstraint {
    #[must_use]
    pub fn new(owner_id: Uuid, jamaah_ids: Vec<Uuid>) -> Self {
        Self {
            owner_id,
            jamaah_ids,
        }
    }

    #[inline]
    #[must_use]
    pub fn owner_id(&self) -> Uuid {
        self.owner_id
    }

    #[inline]
    #[must_use]
    pub fn jamaah_ids(&self) -> &[Uuid] {
        &self.jamaah_ids
    }
}

/// Access scope defining which tenant rows a unit of work may touch.
///
/// An empty scope (no tenants, not root) is a "deny all" scope. A root scope
/// has no tenant predicate and can only be obtained through
/// [`AuthorizationContext::cross_tenant_scope`](crate::AuthorizationContext::cross_tenant_scope).
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct AccessScope {
    pub(crate) tenant_ids: Vec<Uuid>,
    pub(crate) subject: Option<SubjectConstraint>,
    pub(crate) root: bool,
}

impl AccessScope {
    /// Scope limited to a single tenant with no role narrowing.
    ///
    /// Used by elevated callers and by tenant-internal lookups that run before a
    /// full context exists (session resolution, refresh).
    #[must_use]
    pub fn tenant(tenant_id: Uuid) -> Self {
        if tenant_id.is_nil() {
            return Self::deny_all();
        }
        Self {
            tenant_ids: vec![tenant_id],
            subject: None,
            root: false,
        }
    }

    #[must_use]
    pub fn deny_all() -> Self {
        Self::default()
    }

    pub(crate) fn root() -> Self {
        Self {
            tenant_ids: Vec::new(),
            subject: None,
            root: true,
        }
    }

    /// Layer a role-conditioned constraint on top of the tenant predicate.
    #[must_use]
    pub fn narrowed(mut self, subject: SubjectConstraint) -> Self {
        self.subject = Some(subject);
        self
    }

    #[inline]
    #[must_use]
    pub fn tenant_ids(&self) -> &[Uuid] {
        &self.tenant_ids
    }

    #[inline]
    #[must_use]
    pub fn subject(&self) -> Option<&SubjectConstraint> {
        self.subject.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.root
    }

    /// True when this scope must not match any row.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.root && self.tenant_ids.is_empty()
    }

    /// True when rows of `tenant_id` may be written through this scope.
    #[must_use]
    pub fn allows_tenant(&self, tenant_id: Uuid) -> bool {
        self.root || self.tenant_ids.contains(&tenant_id)
    }
}
