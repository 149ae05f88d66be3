use sea_orm::EntityTrait;

/// Declares which columns of an entity carry its isolation dimensions.
///
/// Every dimension must be stated explicitly, either as `Some(Column::..)` or
/// `None`; the [`Scopable`](crate::secure::Scopable) derive refuses to guess.
///
/// - `tenant_col`: the owning tenant. Tenant-owned entities must declare it;
///   an entity without one is invisible to any tenant scope.
/// - `resource_col`: the primary key, used by `and_id`.
/// - `owner_col`: the user a row belongs to (the user itself, a session's
///   user, an assignment's agent).
/// - `jamaah_col`: the pilgrim a row is about. Agents see it when the pilgrim
///   is in their visible set.
///
/// An entity with neither `owner_col` nor `jamaah_col` is filtered by tenant
/// alone, whatever the caller's role.
pub trait ScopableEntity: EntityTrait {
    /// Set by `#[secure(unrestricted)]` for global lookup tables. Such
    /// entities still return nothing for an empty scope.
    const IS_UNRESTRICTED: bool = false;

    fn tenant_col() -> Option<Self::Column>;

    fn resource_col() -> Option<Self::Column>;

    fn owner_col() -> Option<Self::Column>;

    fn jamaah_col() -> Option<Self::Column>;
}
