use async_trait::async_trait;
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, Condition, EntityTrait};
use time::OffsetDateTime;
use umroh_db::secure::{AccessScope, DBRunner, SecureEntityExt, SecureUpdateExt, secure_insert};
use uuid::Uuid;

use crate::domain::error::DomainError;
use crate::domain::model::Session;
use crate::domain::repos::SessionsRepository;
use crate::infra::storage::entity::session::{
    ActiveModel as SessionAM, Column, Entity as SessionEntity,
};

/// ORM-based implementation of the `SessionsRepository` trait.
#[derive(Clone, Debug, Default)]
pub struct OrmSessionsRepository;

impl OrmSessionsRepository {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SessionsRepository for OrmSessionsRepository {
    async fn insert<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        session: Session,
        refresh_token_hash: String,
    ) -> Result<Session, DomainError> {
        let m = SessionAM {
            id: Set(session.id),
            tenant_id: Set(session.tenant_id),
            user_id: Set(session.user_id),
            refresh_token_hash: Set(refresh_token_hash),
            is_active: Set(session.is_active),
            revoked_at: Set(session.revoked_at),
            expires_at: Set(session.expires_at),
            created_at: Set(session.created_at),
        };
        Ok(secure_insert::<SessionEntity, _>(m, scope, conn).await?.into())
    }

    async fn get<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
    ) -> Result<Option<Session>, DomainError> {
        let found = SessionEntity::find()
            .secure()
            .scope_with(scope)
            .and_id(id)?
            .one(conn)
            .await?;
        Ok(found.map(Into::into))
    }

    async fn find_by_token_hash<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        refresh_token_hash: &str,
    ) -> Result<Option<Session>, DomainError> {
        let found = SessionEntity::find()
            .secure()
            .scope_with(scope)
            .filter(Condition::all().add(Column::RefreshTokenHash.eq(refresh_token_hash)))
            .one(conn)
            .await?;
        Ok(found.map(Into::into))
    }

    async fn revoke<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
        at: OffsetDateTime,
    ) -> Result<Session, DomainError> {
        let unrevoked = Condition::all()
            .add(Column::Id.eq(id))
            .add(Column::RevokedAt.is_null());
        deactivate(conn, scope, unrevoked, at).await?;
        self.get(conn, scope, id)
            .await?
            .ok_or_else(|| DomainError::not_found("session", id))
    }

    async fn revoke_if_live<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
        now: OffsetDateTime,
    ) -> Result<bool, DomainError> {
        let live = Condition::all()
            .add(Column::Id.eq(id))
            .add(Column::IsActive.eq(true))
            .add(Column::RevokedAt.is_null())
            .add(Column::ExpiresAt.gt(now));
        Ok(deactivate(conn, scope, live, now).await? == 1)
    }

    async fn revoke_all_for_user<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        user_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<u64, DomainError> {
        let unrevoked = Condition::all()
            .add(Column::UserId.eq(user_id))
            .add(Column::RevokedAt.is_null());
        deactivate(conn, scope, unrevoked, at).await
    }
}

/// Deactivate the sessions matching `filter` within `scope`. The filter is
/// part of the `UPDATE`, so rows revoked by a concurrent writer are skipped.
async fn deactivate<C: DBRunner>(
    conn: &C,
    scope: &AccessScope,
    filter: Condition,
    at: OffsetDateTime,
) -> Result<u64, DomainError> {
    let res = SessionEntity::update_many()
        .col_expr(Column::IsActive, Expr::value(false))
        .col_expr(Column::RevokedAt, Expr::value(Some(at)))
        .secure()
        .scope_with(scope)
        .filter(filter)
        .exec(conn)
        .await?;
    Ok(res.rows_affected)
}
