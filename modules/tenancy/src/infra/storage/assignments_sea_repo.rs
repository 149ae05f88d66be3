use async_trait::async_trait;
use sea_orm::ActiveValue::Set;
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, Condition, EntityTrait, Order};
use time::OffsetDateTime;
use umroh_db::secure::{AccessScope, DBRunner, SecureEntityExt, SecureUpdateExt, secure_insert};
use uuid::Uuid;

use crate::domain::error::DomainError;
use crate::domain::model::{AssignmentFilter, JamaahAssignment};
use crate::domain::repos::AssignmentsRepository;
use crate::domain::validator::ValidatedAssignment;
use crate::infra::storage::entity::jamaah_assignment::{
    ActiveModel as AssignmentAM, Column, Entity as AssignmentEntity,
};

/// ORM-based implementation of the `AssignmentsRepository` trait.
#[derive(Clone, Debug, Default)]
pub struct OrmAssignmentsRepository;

impl OrmAssignmentsRepository {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn live() -> Condition {
    Condition::all().add(Column::DeletedAt.is_null())
}

#[async_trait]
impl AssignmentsRepository for OrmAssignmentsRepository {
    async fn insert<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
        assignment: ValidatedAssignment,
        assigned_at: OffsetDateTime,
    ) -> Result<JamaahAssignment, DomainError> {
        let m = AssignmentAM {
            id: Set(id),
            tenant_id: Set(assignment.tenant_id()),
            jamaah_id: Set(assignment.jamaah_id()),
            agent_id: Set(assignment.agent_id()),
            assigned_by_id: Set(assignment.assigned_by_id()),
            assigned_at: Set(assigned_at),
            deleted_at: Set(None),
            revoked_by_id: Set(None),
        };
        JamaahAssignment::try_from(secure_insert::<AssignmentEntity, _>(m, scope, conn).await?)
    }

    async fn get<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
    ) -> Result<Option<JamaahAssignment>, DomainError> {
        AssignmentEntity::find()
            .secure()
            .scope_with(scope)
            .and_id(id)?
            .one(conn)
            .await?
            .map(JamaahAssignment::try_from)
            .transpose()
    }

    async fn find_live<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        jamaah_id: Uuid,
        agent_id: Uuid,
    ) -> Result<Option<JamaahAssignment>, DomainError> {
        AssignmentEntity::find()
            .secure()
            .scope_with(scope)
            .filter(
                live()
                    .add(Column::JamaahId.eq(jamaah_id))
                    .add(Column::AgentId.eq(agent_id)),
            )
            .one(conn)
            .await?
            .map(JamaahAssignment::try_from)
            .transpose()
    }

    async fn mark_revoked<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        id: Uuid,
        at: OffsetDateTime,
        by: Uuid,
    ) -> Result<bool, DomainError> {
        let res = AssignmentEntity::update_many()
            .col_expr(Column::DeletedAt, Expr::value(Some(at)))
            .col_expr(Column::RevokedById, Expr::value(Some(by)))
            .secure()
            .scope_with(scope)
            .filter(live().add(Column::Id.eq(id)))
            .exec(conn)
            .await?;
        Ok(res.rows_affected == 1)
    }

    async fn visible_jamaah<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        agent_id: Uuid,
    ) -> Result<Vec<Uuid>, DomainError> {
        let rows = AssignmentEntity::find()
            .secure()
            .scope_with(scope)
            .filter(live().add(Column::AgentId.eq(agent_id)))
            .order_by(Column::AssignedAt, Order::Asc)
            .all(conn)
            .await?;
        Ok(rows.into_iter().map(|m| m.jamaah_id).collect())
    }

    async fn list<C: DBRunner>(
        &self,
        conn: &C,
        scope: &AccessScope,
        filter: AssignmentFilter,
    ) -> Result<Vec<JamaahAssignment>, DomainError> {
        let mut cond = if filter.include_revoked {
            Condition::all()
        } else {
            live()
        };
        if let Some(jamaah_id) = filter.jamaah_id {
            cond = cond.add(Column::JamaahId.eq(jamaah_id));
        }
        if let Some(agent_id) = filter.agent_id {
            cond = cond.add(Column::AgentId.eq(agent_id));
        }
        AssignmentEntity::find()
            .secure()
            .scope_with(scope)
            .filter(cond)
            .order_by(Column::AssignedAt, Order::Asc)
            .all(conn)
            .await?
            .into_iter()
            .map(JamaahAssignment::try_from)
            .collect()
    }
}
