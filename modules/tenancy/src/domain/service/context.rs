use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, warn};
use umroh_db::Db;
use umroh_db::secure::AccessScope;
use umroh_security::{AuthorizationContext, TokenCodec};

use super::sessions::ensure_can_sign_in;
use crate::domain::error::DomainError;
use crate::domain::repos::{SessionsRepository, UsersRepository};

/// Turns a bearer access token into the [`AuthorizationContext`] every other
/// operation requires.
///
/// A valid signature is not enough: the session named by the token must still
/// be live and owned by the token's user, and that user must still be allowed
/// to sign in. The role comes from the user row, so a token minted before a
/// demotion cannot keep the old role.
#[derive(Clone)]
pub struct ContextResolver<SR, UR> {
    db: Db,
    sessions: Arc<SR>,
    users: Arc<UR>,
    codec: TokenCodec,
}

impl<SR, UR> std::fmt::Debug for ContextResolver<SR, UR> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextResolver")
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

impl<SR, UR> ContextResolver<SR, UR>
where
    SR: SessionsRepository + 'static,
    UR: UsersRepository + 'static,
{
    #[must_use]
    pub fn new(db: Db, sessions: Arc<SR>, users: Arc<UR>, codec: TokenCodec) -> Self {
        Self {
            db,
            sessions,
            users,
            codec,
        }
    }

    /// # Errors
    /// `Unauthenticated` for any token, session or user that does not check
    /// out. The cause is logged, not returned.
    #[tracing::instrument(skip_all)]
    pub async fn resolve(&self, access_token: &str) -> Result<AuthorizationContext, DomainError> {
        let claims = self.codec.verify(access_token).map_err(|e| {
            debug!(error = %e, "access token rejected");
            DomainError::Unauthenticated("invalid access token")
        })?;

        let sessions = Arc::clone(&self.sessions);
        let users = Arc::clone(&self.users);
        let (tenant_id, user_id, session_id) = (claims.tid, claims.sub, claims.sid);
        let role = self
            .db
            .tenant_unit_of_work(tenant_id, move |tx| {
                Box::pin(async move {
                    let scope = AccessScope::tenant(tenant_id);
                    let now = OffsetDateTime::now_utc();
                    sessions
                        .get(tx, &scope, session_id)
                        .await?
                        .filter(|s| s.user_id == user_id && s.is_live(now))
                        .ok_or(DomainError::Unauthenticated("session is not live"))?;
                    let user = users
                        .get(tx, &scope, user_id)
                        .await?
                        .ok_or(DomainError::Unauthenticated("unknown user"))?;
                    ensure_can_sign_in(&user, now)?;
                    Ok(user.role)
                })
            })
            .await
            .map_err(|e: DomainError| {
                if matches!(e, DomainError::Database { .. }) {
                    warn!(error = %e, "context resolution failed");
                } else {
                    debug!(error = %e, "context rejected");
                }
                DomainError::Unauthenticated("access token does not resolve to a live session")
            })?;

        if role != claims.role {
            debug!(token_role = %claims.role, current_role = %role, "role changed since token was issued");
        }

        Ok(AuthorizationContext::builder()
            .tenant_id(tenant_id)
            .user_id(user_id)
            .role(role)
            .build())
    }
}
