use async_trait::async_trait;
use sea_orm::ActiveValue::{Set, Unchanged};
use sea_orm::{EntityTrait, Order};
use time::OffsetDateTime;
use umroh_db::secure::{
    AccessScope, DBRunner, SecureEntityExt, secure_insert, secure_update_with_scope,
};
use uuid::Uuid;

use crate::domain::error::DomainError;
use crate::domain::model::{Nullable, ResourceLimits, Tenant, TenantChanges};
use crate::domain::repos::TenantsRepository;
use crate::infra::storage::entity::tenant::{
    ActiveModel as TenantAM, Column, Entity as TenantEntity, Model as TenantModel,
};

/// ORM-based implementation of the `TenantsRepository` trait.
#[derive(Clone, Debug, Default)]
pub struct OrmTenantsRepository;

impl OrmTenantsRepository {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    async fn find<C: DBRunner>(
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
    ) -> Result<Option<TenantModel>, DomainError> {
        Ok(TenantEntity::find()
            .secure()
            .scope_with(scope)
            .and_id(id)?
            .one(conn)
            .await?)
    }
}

fn limits_json(limits: ResourceLimits) -> Result<serde_json::Value, DomainError> {
    serde_json::to_value(limits).map_err(|e| DomainError::database(e.to_string()))
}

fn nullable<T>(change: Nullable<T>) -> Option<sea_orm::ActiveValue<Option<T>>>
where
    Option<T>: Into<sea_orm::Value>,
{
    match change {
        Nullable::Keep => None,
        Nullable::Clear => Some(Set(None)),
        Nullable::Set(v) => Some(Set(Some(v))),
    }
}

#[async_trait]
impl TenantsRepository for OrmTenantsRepository {
    async fn get<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
    ) -> Result<Option<Tenant>, DomainError> {
        Self::find(conn, scope, id)
            .await?
            .map(Tenant::try_from)
            .transpose()
    }

    async fn verification_token<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
    ) -> Result<Option<String>, DomainError> {
        Ok(Self::find(conn, scope, id)
            .await?
            .and_then(|m| m.domain_verification_token))
    }

    async fn insert<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        tenant: Tenant,
    ) -> Result<Tenant, DomainError> {
        let custom_domain = tenant.domain.domain().map(str::to_owned);
        let m = TenantAM {
            id: Set(tenant.id),
            name: Set(tenant.name),
            slug: Set(tenant.slug),
            status: Set(tenant.status.as_str().to_owned()),
            tier: Set(tenant.tier.as_str().to_owned()),
            resource_limits: Set(limits_json(tenant.limits)?),
            owner_email: Set(tenant.owner_email),
            owner_phone: Set(tenant.owner_phone),
            owner_verified_at: Set(tenant.owner_verified_at),
            custom_domain: Set(custom_domain),
            domain_verification_token: Set(None),
            domain_verified_at: Set(None),
            activated_at: Set(tenant.activated_at),
            created_at: Set(tenant.created_at),
            updated_at: Set(tenant.updated_at),
            deleted_at: Set(tenant.deleted_at),
        };
        let saved = secure_insert::<TenantEntity, _>(m, scope, conn).await?;
        Tenant::try_from(saved)
    }

    async fn update<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
        changes: TenantChanges,
    ) -> Result<Tenant, DomainError> {
        let mut m = TenantAM {
            id: Unchanged(id),
            updated_at: Set(OffsetDateTime::now_utc()),
            ..TenantAM::default()
        };
        if let Some(status) = changes.status {
            m.status = Set(status.as_str().to_owned());
        }
        if let Some(limits) = changes.limits {
            m.resource_limits = Set(limits_json(limits)?);
        }
        if let Some(at) = changes.owner_verified_at {
            m.owner_verified_at = Set(Some(at));
        }
        if let Some(at) = changes.activated_at {
            m.activated_at = Set(Some(at));
        }
        if let Some(at) = changes.deleted_at {
            m.deleted_at = Set(Some(at));
        }
        if let Some(v) = nullable(changes.custom_domain) {
            m.custom_domain = v;
        }
        if let Some(v) = nullable(changes.domain_verification_token) {
            m.domain_verification_token = v;
        }
        if let Some(v) = nullable(changes.domain_verified_at) {
            m.domain_verified_at = v;
        }

        let saved = secure_update_with_scope::<TenantEntity, _>(m, scope, conn).await?;
        Tenant::try_from(saved)
    }

    async fn list<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
    ) -> Result<Vec<Tenant>, DomainError> {
        TenantEntity::find()
            .secure()
            .scope_with(scope)
            .order_by(Column::Slug, Order::Asc)
            .all(conn)
            .await?
            .into_iter()
            .map(Tenant::try_from)
            .collect()
    }
}
