use async_trait::async_trait;
use umroh_db::secure::{AccessScope, DBRunner};
use uuid::Uuid;

use crate::domain::error::DomainError;
use crate::domain::model::{Tenant, TenantChanges};

#[async_trait]
pub trait TenantsRepository: Send + Sync {
    async fn get<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
    ) -> Result<Option<Tenant>, DomainError>;

    /// The pending domain-verification token, if one was issued.
    async fn verification_token<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
    ) -> Result<Option<String>, DomainError>;

    /// Slug and custom-domain collisions surface as [`DomainError::Conflict`].
    async fn insert<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        tenant: Tenant,
    ) -> Result<Tenant, DomainError>;

    async fn update<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
        changes: TenantChanges,
    ) -> Result<Tenant, DomainError>;

    /// Tenants visible in `scope`, ordered by slug.
    async fn list<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
    ) -> Result<Vec<Tenant>, DomainError>;
}
