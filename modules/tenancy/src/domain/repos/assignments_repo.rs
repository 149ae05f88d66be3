use async_trait::async_trait;
use time::OffsetDateTime;
use umroh_db::secure::{AccessScope, DBRunner};
use uuid::Uuid;

use crate::domain::error::DomainError;
use crate::domain::model::{AssignmentFilter, JamaahAssignment};
use crate::domain::validator::ValidatedAssignment;

#[async_trait]
pub trait AssignmentsRepository: Send + Sync {
    /// Only validated assignments can be written. A live duplicate surfaces
    /// as [`DomainError::Conflict`].
    async fn insert<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
        assignment: ValidatedAssignment,
        assigned_at: OffsetDateTime,
    ) -> Result<JamaahAssignment, DomainError>;

    async fn get<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
    ) -> Result<Option<JamaahAssignment>, DomainError>;

    async fn find_live<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        jamaah_id: Uuid,
        agent_id: Uuid,
    ) -> Result<Option<JamaahAssignment>, DomainError>;

    /// Revoke `id` if it is still live, recording `at` and `by`. Returns
    /// `false` when it was already revoked; the first revocation's audit
    /// fields are never overwritten.
    async fn mark_revoked<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
        at: OffsetDateTime,
        by: Uuid,
    ) -> Result<bool, DomainError>;

    /// Pilgrims with a live assignment naming `agent_id`.
    async fn visible_jamaah<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        agent_id: Uuid,
    ) -> Result<Vec<Uuid>, DomainError>;

    async fn list<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        filter: AssignmentFilter,
    ) -> Result<Vec<JamaahAssignment>, DomainError>;
}
