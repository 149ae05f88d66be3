use std::sync::Arc;

use time::OffsetDateTime;
use tracing::info;
use umroh_db::Db;
use umroh_db::secure::{AccessScope, DBRunner, TxConfig};
use umroh_security::constants::AUDIT_TARGET;
use umroh_security::{AuthorizationContext, Role};
use uuid::Uuid;

use super::require_elevated;
use crate::domain::error::DomainError;
use crate::domain::model::{AssignmentFilter, GrantRequest, JamaahAssignment};
use crate::domain::repos::{AssignmentsRepository, UsersRepository};
use crate::domain::validator::{ProposedAssignment, validate_assignment_references};

/// Agent-to-pilgrim grants.
///
/// Grants and revocations are made by elevated users of the tenant. Revoked
/// rows are kept; they drop out of visibility and out of the uniqueness check
/// but stay on the audit listing.
#[derive(Clone)]
pub struct AssignmentService<AR, UR> {
    db: Db,
    assignments: Arc<AR>,
    users: Arc<UR>,
}

impl<AR, UR> std::fmt::Debug for AssignmentService<AR, UR> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssignmentService").finish_non_exhaustive()
    }
}

/// Validate and write one grant inside an open unit of work.
async fn grant_in<AR, UR, C>(
    assignments: &AR,
    users: &UR,
    conn: &C,
    scope: &AccessScope,
    tenant_id: Uuid,
    assigned_by_id: Uuid,
    request: GrantRequest,
) -> Result<JamaahAssignment, DomainError>
where
    AR: AssignmentsRepository,
    UR: UsersRepository,
    C: DBRunner,
{
    let proposal = ProposedAssignment {
        jamaah_id: request.jamaah_id,
        agent_id: request.agent_id,
        assigned_by_id,
    };
    let owners = users.owning_tenants(conn, &proposal.referenced_ids()).await?;
    let validated = validate_assignment_references(tenant_id, &proposal, &owners)?;

    for (id, expected) in [
        (validated.jamaah_id(), Role::Jamaah),
        (validated.agent_id(), Role::Agent),
    ] {
        let user = users
            .get(conn, scope, id)
            .await?
            .ok_or_else(|| DomainError::not_found("user", id))?;
        if user.role != expected {
            return Err(DomainError::validation(
                if expected == Role::Agent { "agent_id" } else { "jamaah_id" },
                format!("user {id} has role '{}', expected '{expected}'", user.role),
            ));
        }
    }

    if let Some(live) = assignments
        .find_live(conn, scope, validated.jamaah_id(), validated.agent_id())
        .await?
    {
        return Err(DomainError::conflict(format!(
            "jamaah {} is already assigned to agent {} by assignment {}",
            live.jamaah_id, live.agent_id, live.id
        )));
    }

    assignments
        .insert(conn, scope, Uuid::new_v4(), validated, OffsetDateTime::now_utc())
        .await
}

impl<AR, UR> AssignmentService<AR, UR>
where
    AR: AssignmentsRepository + 'static,
    UR: UsersRepository + 'static,
{
    #[must_use]
    pub fn new(db: Db, assignments: Arc<AR>, users: Arc<UR>) -> Self {
        Self {
            db,
            assignments,
            users,
        }
    }

    /// Grant `request.agent_id` visibility of `request.jamaah_id`. The caller
    /// is recorded as the assigner.
    ///
    /// # Errors
    /// - `Forbidden` for non-elevated callers
    /// - `CrossTenantReference` naming the first reference outside the tenant
    /// - `Validation` when the users do not hold the jamaah and agent roles
    /// - `Conflict` when a live grant for the pair already exists
    #[tracing::instrument(
        skip_all,
        fields(jamaah_id = %request.jamaah_id, agent_id = %request.agent_id)
    )]
    pub async fn grant(
        &self,
        ctx: &AuthorizationContext,
        request: GrantRequest,
    ) -> Result<JamaahAssignment, DomainError> {
        require_elevated(ctx, "grant assignments")?;
        let scope = ctx.scope().prepare();
        let (tenant_id, assigned_by) = (ctx.tenant_id(), ctx.user_id());
        let assignments = Arc::clone(&self.assignments);
        let users = Arc::clone(&self.users);
        let granted = self
            .db
            .unit_of_work(ctx, move |tx| {
                Box::pin(async move {
                    grant_in(
                        assignments.as_ref(),
                        users.as_ref(),
                        tx,
                        &scope,
                        tenant_id,
                        assigned_by,
                        request,
                    )
                    .await
                })
            })
            .await?;

        info!(
            target: AUDIT_TARGET,
            assignment_id = %granted.id,
            %tenant_id,
            assigned_by = %assigned_by,
            "assignment granted"
        );
        Ok(granted)
    }

    /// Revoke an assignment. Revoking a revoked assignment returns it
    /// unchanged.
    ///
    /// # Errors
    /// `Forbidden` for non-elevated callers, `NotFound` outside the tenant.
    #[tracing::instrument(skip_all, fields(assignment_id = %id))]
    pub async fn revoke(
        &self,
        ctx: &AuthorizationContext,
        id: Uuid,
    ) -> Result<JamaahAssignment, DomainError> {
        require_elevated(ctx, "revoke assignments")?;
        let scope = ctx.scope().prepare();
        let revoked_by = ctx.user_id();
        let assignments = Arc::clone(&self.assignments);
        let (assignment, changed) = self
            .db
            .unit_of_work(ctx, move |tx| {
                Box::pin(async move {
                    let current = assignments
                        .get(tx, &scope, id)
                        .await?
                        .ok_or_else(|| DomainError::not_found("assignment", id))?;
                    if !current.is_active() {
                        return Ok((current, false));
                    }
                    let changed = assignments
                        .mark_revoked(tx, &scope, id, OffsetDateTime::now_utc(), revoked_by)
                        .await?;
                    let revoked = assignments
                        .get(tx, &scope, id)
                        .await?
                        .ok_or_else(|| DomainError::not_found("assignment", id))?;
                    Ok::<_, DomainError>((revoked, changed))
                })
            })
            .await?;

        if changed {
            info!(target: AUDIT_TARGET, %revoked_by, "assignment revoked");
        }
        Ok(assignment)
    }

    /// Pilgrims `agent_id` currently holds a live grant for, within the
    /// caller's tenant.
    ///
    /// Elevated callers may ask about any agent; an agent only about itself.
    /// Anyone else gets an empty set.
    ///
    /// # Errors
    /// `IsolationViolation` for an unbound context.
    #[tracing::instrument(skip_all, fields(%agent_id))]
    pub async fn visible_jamaah_for(
        &self,
        ctx: &AuthorizationContext,
        agent_id: Uuid,
    ) -> Result<Vec<Uuid>, DomainError> {
        let role = ctx.ensure_bound()?;
        let allowed = role.is_elevated() || (role == Role::Agent && ctx.user_id() == agent_id);
        if !allowed {
            return Ok(Vec::new());
        }
        let scope = ctx.scope().prepare();
        let assignments = Arc::clone(&self.assignments);
        self.db
            .unit_of_work(ctx, move |tx| {
                Box::pin(async move { assignments.visible_jamaah(tx, &scope, agent_id).await })
            })
            .await
    }

    /// Hand a pilgrim over to another agent: the current grant is revoked and
    /// a new one is made, together or not at all.
    ///
    /// # Errors
    /// `Validation` when the assignment is already revoked, plus everything
    /// [`grant`](Self::grant) returns.
    #[tracing::instrument(skip_all, fields(assignment_id = %id, %new_agent_id))]
    pub async fn reassign(
        &self,
        ctx: &AuthorizationContext,
        id: Uuid,
        new_agent_id: Uuid,
    ) -> Result<JamaahAssignment, DomainError> {
        require_elevated(ctx, "reassign pilgrims")?;
        let scope = ctx.scope().prepare();
        let (tenant_id, actor) = (ctx.tenant_id(), ctx.user_id());
        let assignments = Arc::clone(&self.assignments);
        let users = Arc::clone(&self.users);
        let granted = self
            .db
            .unit_of_work_with_config(ctx, TxConfig::serializable(), move |tx| {
                Box::pin(async move {
                    let current = assignments
                        .get(tx, &scope, id)
                        .await?
                        .ok_or_else(|| DomainError::not_found("assignment", id))?;
                    let revoked = current.is_active()
                        && assignments
                            .mark_revoked(tx, &scope, id, OffsetDateTime::now_utc(), actor)
                            .await?;
                    if !revoked {
                        return Err(DomainError::validation(
                            "assignment",
                            "a revoked assignment cannot be reassigned",
                        ));
                    }
                    let request = GrantRequest {
                        jamaah_id: current.jamaah_id,
                        agent_id: new_agent_id,
                    };
                    grant_in(
                        assignments.as_ref(),
                        users.as_ref(),
                        tx,
                        &scope,
                        tenant_id,
                        actor,
                        request,
                    )
                    .await
                })
            })
            .await?;

        info!(
            target: AUDIT_TARGET,
            previous = %id,
            assignment_id = %granted.id,
            "pilgrim reassigned"
        );
        Ok(granted)
    }

    /// The audit listing. Agents see only their own grants.
    ///
    /// # Errors
    /// `IsolationViolation` for an unbound context.
    #[tracing::instrument(skip_all, fields(include_revoked = filter.include_revoked))]
    pub async fn list_assignments(
        &self,
        ctx: &AuthorizationContext,
        filter: AssignmentFilter,
    ) -> Result<Vec<JamaahAssignment>, DomainError> {
        let scope = ctx.scope().prepare();
        let assignments = Arc::clone(&self.assignments);
        self.db
            .unit_of_work(ctx, move |tx| {
                Box::pin(async move { assignments.list(tx, &scope, filter).await })
            })
            .await
    }
}
