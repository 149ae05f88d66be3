use async_trait::async_trait;
use time::OffsetDateTime;
use umroh_db::secure::{AccessScope, DBRunner};
use umroh_security::Role;
use uuid::Uuid;

use crate::domain::error::DomainError;
use crate::domain::model::{User, UserChanges};
use crate::domain::validator::ReferenceTenants;

/// Repository trait for User persistence operations.
///
/// All methods accept:
/// - `conn: &C` - the runner of the current unit of work
/// - `scope: &AccessScope` - security scope prepared by the service layer
#[async_trait]
pub trait UsersRepository: Send + Sync {
    async fn get<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
    ) -> Result<Option<User>, DomainError>;

    /// Look up by the normalized (lowercase) email.
    async fn find_by_email<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        email: &str,
    ) -> Result<Option<User>, DomainError>;

    async fn insert<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        user: User,
    ) -> Result<User, DomainError>;

    async fn update<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
        changes: UserChanges,
    ) -> Result<User, DomainError>;

    /// Add one to the failed login count in a single `UPDATE`, so concurrent
    /// failures are all counted. Returns `false` when `id` is not in scope.
    async fn increment_failed_logins<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
    ) -> Result<bool, DomainError>;

    /// Lock `id` until `until` and reset its count, but only while the count
    /// is at least `threshold`. Returns whether this call locked it.
    async fn lock_if_failed_at_least<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
        threshold: u32,
        until: OffsetDateTime,
    ) -> Result<bool, DomainError>;

    /// Users visible in `scope`, optionally restricted to one role, ordered
    /// by email.
    async fn list<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        role: Option<Role>,
    ) -> Result<Vec<User>, DomainError>;

    /// Owning tenant of each id that exists, for reference validation.
    async fn owning_tenants<C: DBRunner>(
        &self,
        conn: &C,
        ids: &[Uuid],
    ) -> Result<ReferenceTenants, DomainError>;
}
