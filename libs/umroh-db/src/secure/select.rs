use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect};
use std::marker::PhantomData;

use crate::secure::cond::build_scope_condition;
use crate::secure::error::ScopeError;
use crate::secure::runner::{DBRunner, with_runner};
use crate::secure::{AccessScope, ScopableEntity};

/// Typestate marker: query has not yet been scoped and cannot be executed.
#[derive(Debug, Clone, Copy)]
pub struct Unscoped;

/// Typestate marker: the isolation predicate has been applied.
#[derive(Debug, Clone, Copy)]
pub struct Scoped;

/// A sea-orm `Select` that can only execute after `.scope_with()`.
///
/// ```ignore
/// let users = user::Entity::find()
///     .secure()            // SecureSelect<E, Unscoped>
///     .scope_with(&scope)  // SecureSelect<E, Scoped>
///     .all(&conn)
///     .await?;
/// ```
#[must_use]
#[derive(Clone, Debug)]
pub struct SecureSelect<E: EntityTrait, S> {
    pub(crate) inner: sea_orm::Select<E>,
    pub(crate) _state: PhantomData<S>,
}

/// Converts a sea-orm `Select` into an unscoped [`SecureSelect`].
pub trait SecureEntityExt<E: EntityTrait>: Sized {
    fn secure(self) -> SecureSelect<E, Unscoped>;
}

impl<E> SecureEntityExt<E> for sea_orm::Select<E>
where
    E: EntityTrait,
{
    fn secure(self) -> SecureSelect<E, Unscoped> {
        SecureSelect {
            inner: self,
            _state: PhantomData,
        }
    }
}

impl<E> SecureSelect<E, Unscoped>
where
    E: ScopableEntity,
    E::Column: ColumnTrait + Copy,
{
    /// Apply the isolation predicate, transitioning to the `Scoped` state.
    pub fn scope_with(self, scope: &AccessScope) -> SecureSelect<E, Scoped> {
        let cond = build_scope_condition::<E>(scope);
        SecureSelect {
            inner: self.inner.filter(cond),
            _state: PhantomData,
        }
    }
}

impl<E> SecureSelect<E, Scoped>
where
    E: EntityTrait,
    E::Model: Send + Sync,
{
    /// # Errors
    /// Returns `ScopeError::Db` if the database query fails.
    pub async fn all<C: DBRunner>(self, runner: &C) -> Result<Vec<E::Model>, ScopeError> {
        Ok(with_runner!(runner, |c| self.inner.all(c).await?))
    }

    /// # Errors
    /// Returns `ScopeError::Db` if the database query fails.
    pub async fn one<C: DBRunner>(self, runner: &C) -> Result<Option<E::Model>, ScopeError> {
        Ok(with_runner!(runner, |c| self.inner.one(c).await?))
    }

    /// # Errors
    /// Returns `ScopeError::Db` if the database query fails.
    pub async fn count<C: DBRunner>(self, runner: &C) -> Result<u64, ScopeError> {
        Ok(with_runner!(runner, |c| self.inner.count(c).await?))
    }

    /// Narrow the scoped query to a single resource.
    ///
    /// # Errors
    /// Returns `ScopeError::Invalid` if the entity doesn't have a resource column.
    pub fn and_id(self, id: uuid::Uuid) -> Result<Self, ScopeError>
    where
        E: ScopableEntity,
        E::Column: ColumnTrait + Copy,
    {
        let resource_col = E::resource_col().ok_or(ScopeError::Invalid(
            "Entity must have a resource_col to use and_id()",
        ))?;
        Ok(self.filter(sea_orm::Condition::all().add(resource_col.eq(id))))
    }

    /// Add filters on top of the scope; the isolation predicate stays in place.
    pub fn filter(mut self, filter: sea_orm::Condition) -> Self {
        self.inner = QueryFilter::filter(self.inner, filter);
        self
    }

    pub fn order_by<C>(mut self, col: C, order: sea_orm::Order) -> Self
    where
        C: sea_orm::IntoSimpleExpr,
    {
        self.inner = QueryOrder::order_by(self.inner, col, order);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.inner = QuerySelect::limit(self.inner, limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.inner = QuerySelect::offset(self.inner, offset);
        self
    }

    /// Unwrap the inner sea-orm `Select`, for projections such as
    /// `select_only().column(..).into_tuple()`.
    ///
    /// The isolation predicate is already part of the query; callers must not
    /// rebuild it from scratch.
    #[must_use]
    pub fn into_inner(self) -> sea_orm::Select<E> {
        self.inner
    }
}
