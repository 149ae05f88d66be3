use async_trait::async_trait;
use time::OffsetDateTime;
use umroh_db::secure::{AccessScope, DBRunner};
use uuid::Uuid;

use crate::domain::error::DomainError;
use crate::domain::model::Session;

#[async_trait]
pub trait SessionsRepository: Send + Sync {
    /// Store `session` with the SHA-256 of its refresh token.
    async fn insert<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        session: Session,
        refresh_token_hash: String,
    ) -> Result<Session, DomainError>;

    async fn get<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
    ) -> Result<Option<Session>, DomainError>;

    async fn find_by_token_hash<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        refresh_token_hash: &str,
    ) -> Result<Option<Session>, DomainError>;

    /// Deactivate one session. Revoking an already revoked session keeps its
    /// original `revoked_at`. The write is conditional on the session still
    /// being unrevoked, so concurrent revocations record the first one only.
    async fn revoke<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
        at: OffsetDateTime,
    ) -> Result<Session, DomainError>;

    /// Revoke `id` only if it is still live at `now`, in one conditional
    /// update. Returns whether this call revoked it; of two callers racing on
    /// the same session exactly one gets `true`.
    async fn revoke_if_live<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
        now: OffsetDateTime,
    ) -> Result<bool, DomainError>;

    /// Deactivate every live session of `user_id`; returns how many changed.
    async fn revoke_all_for_user<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        user_id: Uuid,
        at: OffsetDateTime,
    ) -> Result<u64, DomainError>;
}
