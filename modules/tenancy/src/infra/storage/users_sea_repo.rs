use async_trait::async_trait;
use sea_orm::ActiveValue::{Set, Unchanged};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, Condition, EntityTrait, Order};
use time::OffsetDateTime;
use umroh_db::secure::{
    AccessScope, DBRunner, SecureEntityExt, SecureUpdateExt, resolve_owning_tenants,
    secure_insert, secure_update_with_scope,
};
use umroh_security::Role;
use uuid::Uuid;

use crate::domain::error::DomainError;
use crate::domain::model::{Nullable, User, UserChanges};
use crate::domain::repos::UsersRepository;
use crate::domain::validator::ReferenceTenants;
use crate::infra::storage::entity::user::{ActiveModel as UserAM, Column, Entity as UserEntity};

/// ORM-based implementation of the `UsersRepository` trait.
#[derive(Clone, Debug, Default)]
pub struct OrmUsersRepository;

impl OrmUsersRepository {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn attempts(n: u32) -> Result<i32, DomainError> {
    i32::try_from(n).map_err(|_| DomainError::validation("failed_login_attempts", "out of range"))
}

#[async_trait]
impl UsersRepository for OrmUsersRepository {
    async fn get<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
    ) -> Result<Option<User>, DomainError> {
        UserEntity::find()
            .secure()
            .scope_with(scope)
            .and_id(id)?
            .one(conn)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn find_by_email<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        email: &str,
    ) -> Result<Option<User>, DomainError> {
        UserEntity::find()
            .secure()
            .scope_with(scope)
            .filter(Condition::all().add(Column::Email.eq(email)))
            .one(conn)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn insert<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        user: User,
    ) -> Result<User, DomainError> {
        let m = UserAM {
            id: Set(user.id),
            tenant_id: Set(user.tenant_id),
            email: Set(user.email),
            full_name: Set(user.full_name),
            phone: Set(user.phone),
            role: Set(user.role.as_str().to_owned()),
            status: Set(user.status.as_str().to_owned()),
            failed_login_attempts: Set(attempts(user.failed_login_attempts)?),
            locked_until: Set(user.locked_until),
            last_login_at: Set(user.last_login_at),
            created_at: Set(user.created_at),
            updated_at: Set(user.updated_at),
        };
        let saved = secure_insert::<UserEntity, _>(m, scope, conn).await?;
        User::try_from(saved)
    }

    async fn update<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
        changes: UserChanges,
    ) -> Result<User, DomainError> {
        let mut m = UserAM {
            id: Unchanged(id),
            updated_at: Set(OffsetDateTime::now_utc()),
            ..UserAM::default()
        };
        if let Some(status) = changes.status {
            m.status = Set(status.as_str().to_owned());
        }
        if let Some(n) = changes.failed_login_attempts {
            m.failed_login_attempts = Set(attempts(n)?);
        }
        match changes.locked_until {
            Nullable::Keep => {}
            Nullable::Clear => m.locked_until = Set(None),
            Nullable::Set(at) => m.locked_until = Set(Some(at)),
        }
        if let Some(at) = changes.last_login_at {
            m.last_login_at = Set(Some(at));
        }

        let saved = secure_update_with_scope::<UserEntity, _>(m, scope, conn).await?;
        User::try_from(saved)
    }

    async fn increment_failed_logins<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
    ) -> Result<bool, DomainError> {
        let res = UserEntity::update_many()
            .col_expr(
                Column::FailedLoginAttempts,
                Expr::col(Column::FailedLoginAttempts).add(1),
            )
            .col_expr(Column::UpdatedAt, Expr::value(OffsetDateTime::now_utc()))
            .secure()
            .scope_with(scope)
            .filter(Condition::all().add(Column::Id.eq(id)))
            .exec(conn)
            .await?;
        Ok(res.rows_affected == 1)
    }

    async fn lock_if_failed_at_least<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
        threshold: u32,
        until: OffsetDateTime,
    ) -> Result<bool, DomainError> {
        let res = UserEntity::update_many()
            .col_expr(Column::FailedLoginAttempts, Expr::value(0))
            .col_expr(Column::LockedUntil, Expr::value(Some(until)))
            .col_expr(Column::UpdatedAt, Expr::value(OffsetDateTime::now_utc()))
            .secure()
            .scope_with(scope)
            .filter(
                Condition::all()
                    .add(Column::Id.eq(id))
                    .add(Column::FailedLoginAttempts.gte(attempts(threshold)?)),
            )
            .exec(conn)
            .await?;
        Ok(res.rows_affected == 1)
    }

    async fn list<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        role: Option<Role>,
    ) -> Result<Vec<User>, DomainError> {
        let mut cond = Condition::all();
        if let Some(role) = role {
            cond = cond.add(Column::Role.eq(role.as_str()));
        }
        UserEntity::find()
            .secure()
            .scope_with(scope)
            .filter(cond)
            .order_by(Column::Email, Order::Asc)
            .all(conn)
            .await?
            .into_iter()
            .map(User::try_from)
            .collect()
    }

    async fn owning_tenants<C: DBRunner>(
        &self,
        conn: &C,
        ids: &[Uuid],
    ) -> Result<ReferenceTenants, DomainError> {
        let owners = resolve_owning_tenants::<UserEntity, _>(conn, ids).await?;
        Ok(ReferenceTenants::new(owners))
    }
}
