use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use time::OffsetDateTime;
use tracing::{debug, info};
use umroh_db::Db;
use umroh_db::secure::{AccessScope, DBRunner};
use umroh_security::{AuthorizationContext, TokenCodec};
use uuid::Uuid;

use super::{after, hash_token, random_token};
use crate::domain::error::DomainError;
use crate::domain::model::{IssuedSession, Session, User, UserStatus};
use crate::domain::repos::{SessionsRepository, UsersRepository};

/// Sessions and the tokens that carry them.
///
/// Opening and refreshing happen before a caller is authenticated, so they
/// run in a unit of work bound to the tenant alone.
#[derive(Clone)]
pub struct SessionService<SR, UR> {
    db: Db,
    sessions: Arc<SR>,
    users: Arc<UR>,
    codec: TokenCodec,
    refresh_ttl: Duration,
}

impl<SR, UR> std::fmt::Debug for SessionService<SR, UR> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionService")
            .field("codec", &self.codec)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

/// A user may hold a session only while active and not locked out.
pub(crate) fn ensure_can_sign_in(user: &User, now: OffsetDateTime) -> Result<(), DomainError> {
    if user.status != UserStatus::Active {
        return Err(DomainError::Unauthenticated("user is not active"));
    }
    if user.is_locked(now) {
        return Err(DomainError::Unauthenticated("user is locked"));
    }
    Ok(())
}

async fn start_session<SR, C>(
    sessions: &SR,
    conn: &C,
    scope: &AccessScope,
    codec: &TokenCodec,
    user: &User,
    refresh_ttl: Duration,
) -> Result<IssuedSession, DomainError>
where
    SR: SessionsRepository,
    C: DBRunner,
{
    let now = OffsetDateTime::now_utc();
    let refresh_token = random_token();
    let session = Session {
        id: Uuid::new_v4(),
        tenant_id: user.tenant_id,
        user_id: user.id,
        is_active: true,
        revoked_at: None,
        expires_at: after(now, refresh_ttl)?,
        created_at: now,
    };
    let session = sessions
        .insert(conn, scope, session, hash_token(&refresh_token))
        .await?;

    let (access_token, _claims) = codec
        .issue(user.tenant_id, user.id, user.role, session.id, now)
        .map_err(|e| DomainError::database(format!("failed to issue access token: {e}")))?;

    Ok(IssuedSession {
        session,
        access_token: SecretString::from(access_token),
        access_expires_at: after(now, codec.ttl())?,
        refresh_token: SecretString::from(refresh_token),
    })
}

impl<SR, UR> SessionService<SR, UR>
where
    SR: SessionsRepository + 'static,
    UR: UsersRepository + 'static,
{
    #[must_use]
    pub fn new(
        db: Db,
        sessions: Arc<SR>,
        users: Arc<UR>,
        codec: TokenCodec,
        refresh_ttl: Duration,
    ) -> Self {
        Self {
            db,
            sessions,
            users,
            codec,
            refresh_ttl,
        }
    }

    /// Open a session for a user whose credentials were already checked.
    ///
    /// # Errors
    /// `Unauthenticated` when the user is unknown in `tenant_id`, inactive or
    /// locked.
    #[tracing::instrument(skip_all, fields(%tenant_id, %user_id))]
    pub async fn open_session(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<IssuedSession, DomainError> {
        let sessions = Arc::clone(&self.sessions);
        let users = Arc::clone(&self.users);
        let codec = self.codec.clone();
        let refresh_ttl = self.refresh_ttl;
        let issued = self
            .db
            .tenant_unit_of_work(tenant_id, move |tx| {
                Box::pin(async move {
                    let scope = AccessScope::tenant(tenant_id);
                    let user = users
                        .get(tx, &scope, user_id)
                        .await?
                        .ok_or(DomainError::Unauthenticated("unknown user"))?;
                    ensure_can_sign_in(&user, OffsetDateTime::now_utc())?;
                    start_session(sessions.as_ref(), tx, &scope, &codec, &user, refresh_ttl)
                        .await
                })
            })
            .await?;

        info!(session_id = %issued.session.id, "session opened");
        Ok(issued)
    }

    /// Exchange a refresh token for a new session. The presented token's
    /// session is revoked in the same unit of work, so a token works once.
    ///
    /// # Errors
    /// `Unauthenticated` when the token is unknown, revoked or expired, or
    /// its user may no longer sign in.
    #[tracing::instrument(skip_all, fields(%tenant_id))]
    pub async fn refresh(
        &self,
        tenant_id: Uuid,
        refresh_token: &SecretString,
    ) -> Result<IssuedSession, DomainError> {
        let hash = hash_token(refresh_token.expose_secret());
        let sessions = Arc::clone(&self.sessions);
        let users = Arc::clone(&self.users);
        let codec = self.codec.clone();
        let refresh_ttl = self.refresh_ttl;
        let issued = self
            .db
            .tenant_unit_of_work(tenant_id, move |tx| {
                Box::pin(async move {
                    let scope = AccessScope::tenant(tenant_id);
                    let now = OffsetDateTime::now_utc();
                    let old = sessions
                        .find_by_token_hash(tx, &scope, &hash)
                        .await?
                        .filter(|s| s.is_live(now))
                        .ok_or(DomainError::Unauthenticated("refresh token is not valid"))?;
                    let user = users
                        .get(tx, &scope, old.user_id)
                        .await?
                        .ok_or(DomainError::Unauthenticated("unknown user"))?;
                    ensure_can_sign_in(&user, now)?;

                    // Conditional on the session still being live: of two
                    // refreshes presenting the same token only one rotates it.
                    if !sessions.revoke_if_live(tx, &scope, old.id, now).await? {
                        return Err(DomainError::Unauthenticated("refresh token is not valid"));
                    }
                    debug!(previous = %old.id, "refresh token rotated");
                    start_session(sessions.as_ref(), tx, &scope, &codec, &user, refresh_ttl)
                        .await
                })
            })
            .await?;

        info!(session_id = %issued.session.id, "session refreshed");
        Ok(issued)
    }

    /// Revoke one session. Users see only their own sessions; elevated roles
    /// see every session of the tenant.
    ///
    /// # Errors
    /// `NotFound` when the session is not visible to the caller.
    #[tracing::instrument(skip_all, fields(session_id = %id))]
    pub async fn revoke_session(
        &self,
        ctx: &AuthorizationContext,
        id: Uuid,
    ) -> Result<Session, DomainError> {
        let scope = ctx.scope().prepare();
        let sessions = Arc::clone(&self.sessions);
        self.db
            .unit_of_work(ctx, move |tx| {
                Box::pin(async move {
                    if sessions.get(tx, &scope, id).await?.is_none() {
                        return Err(DomainError::not_found("session", id));
                    }
                    sessions
                        .revoke(tx, &scope, id, OffsetDateTime::now_utc())
                        .await
                })
            })
            .await
    }

    /// Revoke every live session of `user_id`; returns how many were live.
    ///
    /// # Errors
    /// `Forbidden` unless the caller is elevated or is `user_id`.
    #[tracing::instrument(skip_all, fields(%user_id))]
    pub async fn revoke_all_for_user(
        &self,
        ctx: &AuthorizationContext,
        user_id: Uuid,
    ) -> Result<u64, DomainError> {
        ctx.ensure_bound()?;
        if !ctx.is_elevated() && ctx.user_id() != user_id {
            return Err(DomainError::forbidden(
                "only elevated roles may sign out other users",
            ));
        }
        let scope = ctx.scope().prepare();
        let sessions = Arc::clone(&self.sessions);
        let revoked = self
            .db
            .unit_of_work(ctx, move |tx| {
                Box::pin(async move {
                    sessions
                        .revoke_all_for_user(tx, &scope, user_id, OffsetDateTime::now_utc())
                        .await
                })
            })
            .await?;
        info!(revoked, "sessions revoked");
        Ok(revoked)
    }
}
