use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, EntityTrait, IntoActiveModel, ModelTrait,
    QueryFilter, Value,
};
use std::marker::PhantomData;
use uuid::Uuid;

use crate::secure::cond::build_scope_condition;
use crate::secure::error::ScopeError;
use crate::secure::runner::{DBRunner, with_runner};
use crate::secure::{AccessScope, ScopableEntity, Scoped, SecureEntityExt, Unscoped};

fn uuid_of(value: ActiveValue<Value>) -> Option<Uuid> {
    match value {
        ActiveValue::Set(Value::Uuid(Some(id))) | ActiveValue::Unchanged(Value::Uuid(Some(id))) => {
            Some(*id)
        }
        _ => None,
    }
}

/// Whether a row with these owner/pilgrim values passes the scope's subject
/// constraint. Entities without either column only need the tenant check.
fn subject_allows<E: ScopableEntity>(
    scope: &AccessScope,
    owner: Option<Uuid>,
    jamaah: Option<Uuid>,
) -> bool {
    let Some(subject) = scope.subject() else {
        return true;
    };
    if E::owner_col().is_none() && E::jamaah_col().is_none() {
        return true;
    }
    owner.is_some_and(|o| o == subject.owner_id())
        || jamaah.is_some_and(|j| subject.jamaah_ids().contains(&j))
}

/// Insert a tenant-owned row after checking it lands inside `scope`.
///
/// - The tenant column must be set and belong to the scope.
/// - Under a narrowed scope the row must be owned by, or about a pilgrim
///   visible to, the caller.
/// - Entities without a tenant column can only be written through the root
///   scope (or when marked unrestricted).
///
/// # Errors
/// - `ScopeError::Invalid` if the tenant column is not set
/// - `ScopeError::Denied` if the row would land outside the scope
/// - `ScopeError::Db` if the insert fails
pub async fn secure_insert<E, C>(
    am: E::ActiveModel,
    scope: &AccessScope,
    runner: &C,
) -> Result<E::Model, ScopeError>
where
    E: ScopableEntity,
    E::Column: ColumnTrait + Copy,
    E::ActiveModel: ActiveModelTrait<Entity = E> + Send,
    E::Model: IntoActiveModel<E::ActiveModel>,
    C: DBRunner,
{
    if scope.is_empty() {
        return Err(ScopeError::Denied("empty security scope"));
    }

    match E::tenant_col() {
        Some(col) => {
            let tenant_id =
                uuid_of(am.get(col)).ok_or(ScopeError::Invalid("tenant_id must be set"))?;
            validate_tenant_in_scope(tenant_id, scope)?;
        }
        None if E::IS_UNRESTRICTED || scope.is_root() => {}
        None => return Err(ScopeError::Denied("entity has no tenant column")),
    }

    let owner = E::owner_col().and_then(|c| uuid_of(am.get(c)));
    let jamaah = E::jamaah_col().and_then(|c| uuid_of(am.get(c)));
    if !subject_allows::<E>(scope, owner, jamaah) {
        return Err(ScopeError::Denied("row is outside the caller's subject scope"));
    }

    Ok(with_runner!(runner, |c| am.insert(c).await?))
}

/// Update a single row identified by the active model's resource column.
///
/// The row must be visible through `scope`, and the tenant column can never
/// change: moving a row to another tenant is a delete-and-recreate.
///
/// # Errors
/// - `ScopeError::Invalid` if the resource id is missing or the tenant column
///   is being changed
/// - `ScopeError::Denied` if the row is not visible in the scope
/// - `ScopeError::Db` if the update fails
pub async fn secure_update_with_scope<E, C>(
    am: E::ActiveModel,
    scope: &AccessScope,
    runner: &C,
) -> Result<E::Model, ScopeError>
where
    E: ScopableEntity,
    E::Column: ColumnTrait + Copy,
    E::ActiveModel: ActiveModelTrait<Entity = E> + Send,
    E::Model: IntoActiveModel<E::ActiveModel> + Send + Sync,
    C: DBRunner,
{
    let resource_col = E::resource_col().ok_or(ScopeError::Invalid(
        "Entity must have a resource_col to be updated",
    ))?;
    let id = uuid_of(am.get(resource_col)).ok_or(ScopeError::Invalid("resource id must be set"))?;

    let existing = E::find()
        .secure()
        .scope_with(scope)
        .and_id(id)?
        .one(runner)
        .await?
        .ok_or(ScopeError::Denied("row not found in security scope"))?;

    if let Some(col) = E::tenant_col()
        && let ActiveValue::Set(new) = am.get(col)
        && new != existing.get(col)
    {
        return Err(ScopeError::Invalid("tenant_id is immutable"));
    }

    let current = |col: Option<E::Column>| {
        col.and_then(|c| match am.get(c) {
            set @ ActiveValue::Set(_) => uuid_of(set),
            _ => uuid_of(ActiveValue::Unchanged(existing.get(c))),
        })
    };
    if !subject_allows::<E>(scope, current(E::owner_col()), current(E::jamaah_col())) {
        return Err(ScopeError::Denied("row would leave the caller's subject scope"));
    }

    Ok(with_runner!(runner, |c| am.update(c).await?))
}

/// Check that `tenant_id` may be written through `scope`.
///
/// # Errors
/// Returns `ScopeError::Denied` if the tenant is not in the scope.
pub fn validate_tenant_in_scope(tenant_id: Uuid, scope: &AccessScope) -> Result<(), ScopeError> {
    if scope.allows_tenant(tenant_id) {
        Ok(())
    } else {
        Err(ScopeError::Denied(
            "tenant_id not present in security scope",
        ))
    }
}

/// A sea-orm `UpdateMany` that can only execute after `.scope_with()`.
///
/// Callers must not use `col_expr` on the tenant column.
#[derive(Clone, Debug)]
pub struct SecureUpdateMany<E: EntityTrait, S> {
    pub(crate) inner: sea_orm::UpdateMany<E>,
    pub(crate) _state: PhantomData<S>,
}

pub trait SecureUpdateExt<E: EntityTrait>: Sized {
    fn secure(self) -> SecureUpdateMany<E, Unscoped>;
}

impl<E> SecureUpdateExt<E> for sea_orm::UpdateMany<E>
where
    E: EntityTrait,
{
    fn secure(self) -> SecureUpdateMany<E, Unscoped> {
        SecureUpdateMany {
            inner: self,
            _state: PhantomData,
        }
    }
}

impl<E> SecureUpdateMany<E, Unscoped>
where
    E: ScopableEntity,
    E::Column: ColumnTrait + Copy,
{
    #[must_use]
    pub fn scope_with(self, scope: &AccessScope) -> SecureUpdateMany<E, Scoped> {
        let cond = build_scope_condition::<E>(scope);
        SecureUpdateMany {
            inner: self.inner.filter(cond),
            _state: PhantomData,
        }
    }
}

impl<E> SecureUpdateMany<E, Scoped>
where
    E: EntityTrait,
{
    #[must_use]
    pub fn filter(mut self, filter: sea_orm::Condition) -> Self {
        self.inner = QueryFilter::filter(self.inner, filter);
        self
    }

    /// # Errors
    /// Returns `ScopeError::Db` if the database operation fails.
    pub async fn exec<C: DBRunner>(self, runner: &C) -> Result<sea_orm::UpdateResult, ScopeError> {
        Ok(with_runner!(runner, |c| self.inner.exec(c).await?))
    }
}

/// A sea-orm `DeleteMany` that can only execute after `.scope_with()`.
///
/// Tenant-owned core tables are soft-deleted; this exists for scoped cleanup
/// of rows that carry no audit value.
#[derive(Clone, Debug)]
pub struct SecureDeleteMany<E: EntityTrait, S> {
    pub(crate) inner: sea_orm::DeleteMany<E>,
    pub(crate) _state: PhantomData<S>,
}

pub trait SecureDeleteExt<E: EntityTrait>: Sized {
    fn secure(self) -> SecureDeleteMany<E, Unscoped>;
}

impl<E> SecureDeleteExt<E> for sea_orm::DeleteMany<E>
where
    E: EntityTrait,
{
    fn secure(self) -> SecureDeleteMany<E, Unscoped> {
        SecureDeleteMany {
            inner: self,
            _state: PhantomData,
        }
    }
}

impl<E> SecureDeleteMany<E, Unscoped>
where
    E: ScopableEntity,
    E::Column: ColumnTrait + Copy,
{
    #[must_use]
    pub fn scope_with(self, scope: &AccessScope) -> SecureDeleteMany<E, Scoped> {
        let cond = build_scope_condition::<E>(scope);
        SecureDeleteMany {
            inner: self.inner.filter(cond),
            _state: PhantomData,
        }
    }
}

impl<E> SecureDeleteMany<E, Scoped>
where
    E: EntityTrait,
{
    #[must_use]
    pub fn filter(mut self, filter: sea_orm::Condition) -> Self {
        self.inner = QueryFilter::filter(self.inner, filter);
        self
    }

    /// # Errors
    /// Returns `ScopeError::Db` if the database operation fails.
    pub async fn exec<C: DBRunner>(self, runner: &C) -> Result<sea_orm::DeleteResult, ScopeError> {
        Ok(with_runner!(runner, |c| self.inner.exec(c).await?))
    }
}
