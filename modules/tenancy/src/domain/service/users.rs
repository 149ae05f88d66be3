use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{info, warn};
use umroh_db::Db;
use umroh_db::secure::AccessScope;
use umroh_security::constants::AUDIT_TARGET;
use umroh_security::{AuthorizationContext, Role};
use uuid::Uuid;

use super::{after, require_elevated, scope_for};
use crate::config::LoginPolicy;
use crate::domain::error::DomainError;
use crate::domain::model::{NewUser, Nullable, User, UserChanges, UserStatus};
use crate::domain::repos::{AssignmentsRepository, UsersRepository};

/// Users of a tenant and their login lockout state.
///
/// Reads are role-conditioned: an agent sees itself plus the pilgrims it is
/// assigned to, a pilgrim sees only itself.
#[derive(Clone)]
pub struct UserService<UR, AR> {
    db: Db,
    users: Arc<UR>,
    assignments: Arc<AR>,
    login: LoginPolicy,
}

impl<UR, AR> std::fmt::Debug for UserService<UR, AR> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserService")
            .field("login", &self.login)
            .finish_non_exhaustive()
    }
}

impl<UR, AR> UserService<UR, AR>
where
    UR: UsersRepository + 'static,
    AR: AssignmentsRepository + 'static,
{
    #[must_use]
    pub fn new(db: Db, users: Arc<UR>, assignments: Arc<AR>, login: LoginPolicy) -> Self {
        Self {
            db,
            users,
            assignments,
            login,
        }
    }

    /// Create a user in the caller's tenant.
    ///
    /// # Errors
    /// - `Forbidden` for non-elevated callers, or when anyone but a
    ///   `super_admin` creates a `super_admin`
    /// - `Validation` for a malformed email or empty name
    /// - `Conflict` when the email is taken in this tenant
    #[tracing::instrument(skip_all, fields(tenant_id = %ctx.tenant_id(), role = %new.role))]
    pub async fn create_user(
        &self,
        ctx: &AuthorizationContext,
        new: NewUser,
    ) -> Result<User, DomainError> {
        let caller = require_elevated(ctx, "create users")?;
        if new.role == Role::SuperAdmin && caller != Role::SuperAdmin {
            return Err(DomainError::forbidden(
                "only a super_admin may create a super_admin",
            ));
        }
        let email = normalize_email(&new.email)?;
        let full_name = new.full_name.trim().to_owned();
        if full_name.is_empty() {
            return Err(DomainError::validation("full_name", "must not be empty"));
        }

        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            tenant_id: ctx.tenant_id(),
            email,
            full_name,
            phone: new.phone,
            role: new.role,
            status: UserStatus::Active,
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };

        let scope = ctx.scope().prepare();
        let users = Arc::clone(&self.users);
        let created = self
            .db
            .unit_of_work(ctx, move |tx| {
                Box::pin(async move {
                    if users.find_by_email(tx, &scope, &user.email).await?.is_some() {
                        return Err(DomainError::conflict(format!(
                            "email '{}' already registered in this tenant",
                            user.email
                        )));
                    }
                    users.insert(tx, &scope, user).await
                })
            })
            .await?;

        info!(user_id = %created.id, "user created");
        Ok(created)
    }

    /// # Errors
    /// `NotFound` when the user does not exist or is not visible to the caller.
    #[tracing::instrument(skip_all, fields(user_id = %id))]
    pub async fn get_user(&self, ctx: &AuthorizationContext, id: Uuid) -> Result<User, DomainError> {
        let users = Arc::clone(&self.users);
        let assignments = Arc::clone(&self.assignments);
        let ctx_owned = ctx.clone();
        self.db
            .unit_of_work(ctx, move |tx| {
                Box::pin(async move {
                    let scope = scope_for(&ctx_owned, assignments.as_ref(), tx).await?;
                    users
                        .get(tx, &scope, id)
                        .await?
                        .ok_or_else(|| DomainError::not_found("user", id))
                })
            })
            .await
    }

    /// Users visible to the caller, optionally of one role.
    ///
    /// # Errors
    /// `IsolationViolation` for an unbound context, or a database error.
    #[tracing::instrument(skip_all)]
    pub async fn list_users(
        &self,
        ctx: &AuthorizationContext,
        role: Option<Role>,
    ) -> Result<Vec<User>, DomainError> {
        let users = Arc::clone(&self.users);
        let assignments = Arc::clone(&self.assignments);
        let ctx_owned = ctx.clone();
        self.db
            .unit_of_work(ctx, move |tx| {
                Box::pin(async move {
                    let scope = scope_for(&ctx_owned, assignments.as_ref(), tx).await?;
                    users.list(tx, &scope, role).await
                })
            })
            .await
    }

    /// Pilgrims visible to the caller. For an agent this is exactly the set
    /// its live assignments name.
    ///
    /// # Errors
    /// Same as [`list_users`](Self::list_users).
    pub async fn list_jamaah(&self, ctx: &AuthorizationContext) -> Result<Vec<User>, DomainError> {
        self.list_users(ctx, Some(Role::Jamaah)).await
    }

    /// # Errors
    /// `Forbidden` for non-elevated callers, `NotFound` outside the tenant.
    #[tracing::instrument(skip_all, fields(user_id = %id, status = %status))]
    pub async fn set_status(
        &self,
        ctx: &AuthorizationContext,
        id: Uuid,
        status: UserStatus,
    ) -> Result<User, DomainError> {
        require_elevated(ctx, "change user status")?;
        let scope = ctx.scope().prepare();
        let users = Arc::clone(&self.users);
        self.db
            .unit_of_work(ctx, move |tx| {
                Box::pin(async move {
                    if users.get(tx, &scope, id).await?.is_none() {
                        return Err(DomainError::not_found("user", id));
                    }
                    let changes = UserChanges {
                        status: Some(status),
                        ..UserChanges::default()
                    };
                    users.update(tx, &scope, id, changes).await
                })
            })
            .await
    }

    /// Count a failed login. Reaching the policy's limit locks the user for
    /// the lockout period and starts a fresh count.
    ///
    /// # Errors
    /// `NotFound` when the user is not in `tenant_id`.
    #[tracing::instrument(skip_all, fields(%tenant_id, %user_id))]
    pub async fn record_login_failure(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<User, DomainError> {
        let users = Arc::clone(&self.users);
        let policy = self.login;
        let (user, locked) = self
            .db
            .tenant_unit_of_work(tenant_id, move |tx| {
                Box::pin(async move {
                    let scope = AccessScope::tenant(tenant_id);
                    if !users.increment_failed_logins(tx, &scope, user_id).await? {
                        return Err(DomainError::not_found("user", user_id));
                    }
                    let until = after(OffsetDateTime::now_utc(), policy.lockout)?;
                    let locked = users
                        .lock_if_failed_at_least(
                            tx,
                            &scope,
                            user_id,
                            policy.max_failed_attempts,
                            until,
                        )
                        .await?;
                    let user = users
                        .get(tx, &scope, user_id)
                        .await?
                        .ok_or_else(|| DomainError::not_found("user", user_id))?;
                    Ok::<_, DomainError>((user, locked))
                })
            })
            .await?;

        if let Some(until) = user.locked_until.filter(|_| locked) {
            warn!(target: AUDIT_TARGET, %until, "user locked after repeated login failures");
        }
        Ok(user)
    }

    /// Reset the failure count and any lock, and stamp the login time.
    ///
    /// # Errors
    /// `NotFound` when the user is not in `tenant_id`.
    #[tracing::instrument(skip_all, fields(%tenant_id, %user_id))]
    pub async fn record_login_success(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
    ) -> Result<User, DomainError> {
        let users = Arc::clone(&self.users);
        self.db
            .tenant_unit_of_work(tenant_id, move |tx| {
                Box::pin(async move {
                    let scope = AccessScope::tenant(tenant_id);
                    if users.get(tx, &scope, user_id).await?.is_none() {
                        return Err(DomainError::not_found("user", user_id));
                    }
                    let changes = UserChanges {
                        failed_login_attempts: Some(0),
                        locked_until: Nullable::Clear,
                        last_login_at: Some(OffsetDateTime::now_utc()),
                        ..UserChanges::default()
                    };
                    users.update(tx, &scope, user_id, changes).await
                })
            })
            .await
    }

    /// # Errors
    /// `NotFound` when the user is not in `tenant_id`.
    pub async fn is_locked(&self, tenant_id: Uuid, user_id: Uuid) -> Result<bool, DomainError> {
        let users = Arc::clone(&self.users);
        let user = self
            .db
            .tenant_unit_of_work(tenant_id, move |tx| {
                Box::pin(async move {
                    users
                        .get(tx, &AccessScope::tenant(tenant_id), user_id)
                        .await?
                        .ok_or_else(|| DomainError::not_found("user", user_id))
                })
            })
            .await?;
        Ok(user.is_locked(OffsetDateTime::now_utc()))
    }
}

fn normalize_email(raw: &str) -> Result<String, DomainError> {
    let email = raw.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(DomainError::validation(
            "email",
            format!("'{email}' is not an email address"),
        )),
    }
}
